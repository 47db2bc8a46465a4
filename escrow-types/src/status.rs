// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Lifecycle states shared by the contracts and the mirror

use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of an escrow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EscrowStatus {
    Active,
    Disputed,
    Completed,
    Cancelled,
    Refunded,
}

impl EscrowStatus {
    /// Completed, Cancelled and Refunded never transition further
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EscrowStatus::Completed | EscrowStatus::Cancelled | EscrowStatus::Refunded
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EscrowStatus::Active => "active",
            EscrowStatus::Disputed => "disputed",
            EscrowStatus::Completed => "completed",
            EscrowStatus::Cancelled => "cancelled",
            EscrowStatus::Refunded => "refunded",
        }
    }

    /// On-chain encoding (EVM enum ordinal / Move u8)
    pub fn to_u8(&self) -> u8 {
        *self as u8
    }

    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0 => EscrowStatus::Active,
            1 => EscrowStatus::Disputed,
            2 => EscrowStatus::Completed,
            3 => EscrowStatus::Cancelled,
            4 => EscrowStatus::Refunded,
            _ => return None,
        })
    }
}

impl fmt::Display for EscrowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a single milestone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MilestoneStatus {
    Pending,
    InProgress,
    Submitted,
    Approved,
    Disputed,
    Released,
    Refunded,
}

impl MilestoneStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, MilestoneStatus::Released | MilestoneStatus::Refunded)
    }

    /// Position in the forward-only progression. Both terminal states share
    /// the highest rank.
    pub fn progress_rank(&self) -> u8 {
        match self {
            MilestoneStatus::Pending => 0,
            MilestoneStatus::InProgress => 1,
            MilestoneStatus::Submitted => 2,
            MilestoneStatus::Approved => 3,
            MilestoneStatus::Disputed => 4,
            MilestoneStatus::Released | MilestoneStatus::Refunded => 5,
        }
    }

    /// Whether the mirror may move from `self` to `target`.
    ///
    /// Terminal states are frozen. Otherwise any strictly later state is
    /// accepted, which lets the mirror catch up when intermediate events were
    /// missed or arrive late.
    pub fn can_advance_to(&self, target: MilestoneStatus) -> bool {
        !self.is_terminal() && target.progress_rank() > self.progress_rank()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MilestoneStatus::Pending => "pending",
            MilestoneStatus::InProgress => "in_progress",
            MilestoneStatus::Submitted => "submitted",
            MilestoneStatus::Approved => "approved",
            MilestoneStatus::Disputed => "disputed",
            MilestoneStatus::Released => "released",
            MilestoneStatus::Refunded => "refunded",
        }
    }

    pub fn to_u8(&self) -> u8 {
        *self as u8
    }

    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0 => MilestoneStatus::Pending,
            1 => MilestoneStatus::InProgress,
            2 => MilestoneStatus::Submitted,
            3 => MilestoneStatus::Approved,
            4 => MilestoneStatus::Disputed,
            5 => MilestoneStatus::Released,
            6 => MilestoneStatus::Refunded,
            _ => return None,
        })
    }
}

impl fmt::Display for MilestoneStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a bridge transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BridgeTransferStatus {
    /// Initiated on the source chain, no confirmations yet
    Initiated,
    /// At least one relayer confirmation below the threshold
    Confirming,
    /// Threshold reached (transient on chain, execution follows immediately)
    Confirmed,
    /// Executed on the destination side
    Completed,
    /// Marked failed by the admin, refundable
    Failed,
    /// Refunded to the original sender
    Refunded,
}

impl BridgeTransferStatus {
    /// Completed and Refunded are final. Failed still allows a refund.
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            BridgeTransferStatus::Completed | BridgeTransferStatus::Refunded
        )
    }

    /// Whether relayer confirmations are still accepted
    pub fn accepts_confirmations(&self) -> bool {
        matches!(
            self,
            BridgeTransferStatus::Initiated | BridgeTransferStatus::Confirming
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BridgeTransferStatus::Initiated => "initiated",
            BridgeTransferStatus::Confirming => "confirming",
            BridgeTransferStatus::Confirmed => "confirmed",
            BridgeTransferStatus::Completed => "completed",
            BridgeTransferStatus::Failed => "failed",
            BridgeTransferStatus::Refunded => "refunded",
        }
    }
}

impl fmt::Display for BridgeTransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which party a resolved dispute favoured
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DisputeOutcome {
    Client,
    Freelancer,
}

impl DisputeOutcome {
    /// Majority outcome for a tally; `None` on a tie
    pub fn from_tally(for_client: u32, for_freelancer: u32) -> Option<Self> {
        match for_client.cmp(&for_freelancer) {
            std::cmp::Ordering::Greater => Some(DisputeOutcome::Client),
            std::cmp::Ordering::Less => Some(DisputeOutcome::Freelancer),
            std::cmp::Ordering::Equal => None,
        }
    }

    pub fn favours_client(&self) -> bool {
        matches!(self, DisputeOutcome::Client)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DisputeOutcome::Client => "client",
            DisputeOutcome::Freelancer => "freelancer",
        }
    }
}

impl fmt::Display for DisputeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
