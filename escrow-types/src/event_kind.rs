// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};
use std::fmt;

/// Every on-chain event emitted by the escrow deployments. The names are the
/// wire contract: the EVM event signature name and the Move struct name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventKind {
    EscrowCreated,
    MilestoneStarted,
    MilestoneSubmitted,
    MilestoneApproved,
    MilestoneReleased,
    MilestoneRefunded,
    DisputeInitiated,
    DisputeVoteCast,
    DisputeResolved,
    EscrowCompleted,
    EscrowCancelled,
    EscrowRefunded,
    BridgeTransferInitiated,
    BridgeTransferConfirmed,
    BridgeTransferExecuted,
    BridgeTransferRefunded,
    BridgeTransferFailed,
}

impl EventKind {
    pub const ALL: [EventKind; 17] = [
        EventKind::EscrowCreated,
        EventKind::MilestoneStarted,
        EventKind::MilestoneSubmitted,
        EventKind::MilestoneApproved,
        EventKind::MilestoneReleased,
        EventKind::MilestoneRefunded,
        EventKind::DisputeInitiated,
        EventKind::DisputeVoteCast,
        EventKind::DisputeResolved,
        EventKind::EscrowCompleted,
        EventKind::EscrowCancelled,
        EventKind::EscrowRefunded,
        EventKind::BridgeTransferInitiated,
        EventKind::BridgeTransferConfirmed,
        EventKind::BridgeTransferExecuted,
        EventKind::BridgeTransferRefunded,
        EventKind::BridgeTransferFailed,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            EventKind::EscrowCreated => "EscrowCreated",
            EventKind::MilestoneStarted => "MilestoneStarted",
            EventKind::MilestoneSubmitted => "MilestoneSubmitted",
            EventKind::MilestoneApproved => "MilestoneApproved",
            EventKind::MilestoneReleased => "MilestoneReleased",
            EventKind::MilestoneRefunded => "MilestoneRefunded",
            EventKind::DisputeInitiated => "DisputeInitiated",
            EventKind::DisputeVoteCast => "DisputeVoteCast",
            EventKind::DisputeResolved => "DisputeResolved",
            EventKind::EscrowCompleted => "EscrowCompleted",
            EventKind::EscrowCancelled => "EscrowCancelled",
            EventKind::EscrowRefunded => "EscrowRefunded",
            EventKind::BridgeTransferInitiated => "BridgeTransferInitiated",
            EventKind::BridgeTransferConfirmed => "BridgeTransferConfirmed",
            EventKind::BridgeTransferExecuted => "BridgeTransferExecuted",
            EventKind::BridgeTransferRefunded => "BridgeTransferRefunded",
            EventKind::BridgeTransferFailed => "BridgeTransferFailed",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.name() == name)
    }

    /// Bridge events live in their own Move module and are routed to the
    /// global bridge topic
    pub fn is_bridge(&self) -> bool {
        matches!(
            self,
            EventKind::BridgeTransferInitiated
                | EventKind::BridgeTransferConfirmed
                | EventKind::BridgeTransferExecuted
                | EventKind::BridgeTransferRefunded
                | EventKind::BridgeTransferFailed
        )
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
