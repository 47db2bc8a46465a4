// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Chain-neutral view of escrow events. Addresses are rendered as `0x` hex,
//! escrow IDs as the chain's native string form.

use crate::source::ChainCursor;
use escrow_types::{ChainKind, DisputeOutcome, EventKind, TransferId};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DomainEvent {
    EscrowCreated {
        escrow_id: String,
        client: String,
        freelancer: String,
        total_amount: u128,
        milestone_amounts: Vec<u128>,
        cross_chain_recipient: Option<String>,
        token_symbol: String,
        title: String,
    },
    MilestoneStarted {
        escrow_id: String,
        index: u32,
    },
    MilestoneSubmitted {
        escrow_id: String,
        index: u32,
        note: String,
    },
    MilestoneApproved {
        escrow_id: String,
        index: u32,
    },
    MilestoneReleased {
        escrow_id: String,
        index: u32,
        recipient_amount: u128,
        fee: u128,
        bridge_transfer_id: Option<TransferId>,
    },
    MilestoneRefunded {
        escrow_id: String,
        index: u32,
        amount: u128,
    },
    DisputeInitiated {
        escrow_id: String,
        initiator: String,
        index: u32,
        reason: String,
    },
    DisputeVoteCast {
        escrow_id: String,
        arbiter: String,
        index: u32,
        vote_for_client: bool,
        votes_for_client: u32,
        votes_for_freelancer: u32,
    },
    DisputeResolved {
        escrow_id: String,
        index: u32,
        outcome: DisputeOutcome,
        votes_for_client: u32,
        votes_for_freelancer: u32,
    },
    EscrowCompleted {
        escrow_id: String,
    },
    EscrowCancelled {
        escrow_id: String,
        refund_amount: u128,
    },
    EscrowRefunded {
        escrow_id: String,
        amount: u128,
    },
    BridgeTransferInitiated {
        transfer_id: TransferId,
        sender: String,
        recipient: String,
        amount: u128,
        /// Chain-native unit: seconds on EVM, milliseconds on Sui
        timestamp: u64,
        nonce: u64,
    },
    BridgeTransferConfirmed {
        transfer_id: TransferId,
        relayer: String,
        confirmations: u32,
    },
    BridgeTransferExecuted {
        transfer_id: TransferId,
        recipient: String,
        amount: u128,
    },
    BridgeTransferRefunded {
        transfer_id: TransferId,
        sender: String,
        amount: u128,
    },
    BridgeTransferFailed {
        transfer_id: TransferId,
        reason: String,
    },
}

impl DomainEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            DomainEvent::EscrowCreated { .. } => EventKind::EscrowCreated,
            DomainEvent::MilestoneStarted { .. } => EventKind::MilestoneStarted,
            DomainEvent::MilestoneSubmitted { .. } => EventKind::MilestoneSubmitted,
            DomainEvent::MilestoneApproved { .. } => EventKind::MilestoneApproved,
            DomainEvent::MilestoneReleased { .. } => EventKind::MilestoneReleased,
            DomainEvent::MilestoneRefunded { .. } => EventKind::MilestoneRefunded,
            DomainEvent::DisputeInitiated { .. } => EventKind::DisputeInitiated,
            DomainEvent::DisputeVoteCast { .. } => EventKind::DisputeVoteCast,
            DomainEvent::DisputeResolved { .. } => EventKind::DisputeResolved,
            DomainEvent::EscrowCompleted { .. } => EventKind::EscrowCompleted,
            DomainEvent::EscrowCancelled { .. } => EventKind::EscrowCancelled,
            DomainEvent::EscrowRefunded { .. } => EventKind::EscrowRefunded,
            DomainEvent::BridgeTransferInitiated { .. } => EventKind::BridgeTransferInitiated,
            DomainEvent::BridgeTransferConfirmed { .. } => EventKind::BridgeTransferConfirmed,
            DomainEvent::BridgeTransferExecuted { .. } => EventKind::BridgeTransferExecuted,
            DomainEvent::BridgeTransferRefunded { .. } => EventKind::BridgeTransferRefunded,
            DomainEvent::BridgeTransferFailed { .. } => EventKind::BridgeTransferFailed,
        }
    }

    pub fn escrow_id(&self) -> Option<&str> {
        match self {
            DomainEvent::EscrowCreated { escrow_id, .. }
            | DomainEvent::MilestoneStarted { escrow_id, .. }
            | DomainEvent::MilestoneSubmitted { escrow_id, .. }
            | DomainEvent::MilestoneApproved { escrow_id, .. }
            | DomainEvent::MilestoneReleased { escrow_id, .. }
            | DomainEvent::MilestoneRefunded { escrow_id, .. }
            | DomainEvent::DisputeInitiated { escrow_id, .. }
            | DomainEvent::DisputeVoteCast { escrow_id, .. }
            | DomainEvent::DisputeResolved { escrow_id, .. }
            | DomainEvent::EscrowCompleted { escrow_id }
            | DomainEvent::EscrowCancelled { escrow_id, .. }
            | DomainEvent::EscrowRefunded { escrow_id, .. } => Some(escrow_id),
            _ => None,
        }
    }

    pub fn transfer_id(&self) -> Option<&TransferId> {
        match self {
            DomainEvent::BridgeTransferInitiated { transfer_id, .. }
            | DomainEvent::BridgeTransferConfirmed { transfer_id, .. }
            | DomainEvent::BridgeTransferExecuted { transfer_id, .. }
            | DomainEvent::BridgeTransferRefunded { transfer_id, .. }
            | DomainEvent::BridgeTransferFailed { transfer_id, .. } => Some(transfer_id),
            _ => None,
        }
    }
}

/// Where an event came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventMeta {
    pub chain: ChainKind,
    pub tx_hash: String,
    pub timestamp_ms: u64,
    /// Resume position just after this event
    pub cursor: ChainCursor,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedEvent {
    pub meta: EventMeta,
    pub event: DomainEvent,
}

impl IndexedEvent {
    pub fn chain(&self) -> ChainKind {
        self.meta.chain
    }
}
