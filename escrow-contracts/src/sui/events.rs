// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Move event structs emitted by the escrow package. The BCS layout of each
//! struct is the wire contract with the indexer; field order must not change.

use super::types::{EventId, ObjectId, SuiAddress};
use escrow_types::EventKind;
use serde::{Deserialize, Serialize};

/// Move module holding the escrow state machine
pub const ESCROW_MODULE: &str = "milestone_escrow";
/// Move module holding the bridge tracker
pub const BRIDGE_MODULE: &str = "bridge";

#[derive(Debug, thiserror::Error)]
pub enum SuiEventError {
    #[error("failed to decode {event} bcs: {source}")]
    Bcs {
        event: &'static str,
        #[source]
        source: bcs::Error,
    },
    #[error("failed to encode event: {0}")]
    Encode(#[from] bcs::Error),
}

/// An event as returned by the Sui RPC (`suix_queryEvents`) or a
/// subscription, with the BCS payload still encoded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuiEvent {
    pub id: EventId,
    pub package_id: ObjectId,
    pub transaction_module: String,
    pub sender: SuiAddress,
    /// `<package>::<module>::<Name>`
    pub type_: String,
    pub bcs: Vec<u8>,
    pub timestamp_ms: Option<u64>,
}

/// One page of `suix_queryEvents`
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SuiEventPage {
    pub data: Vec<SuiEvent>,
    pub next_cursor: Option<EventId>,
    pub has_next_page: bool,
}

pub fn module_for(kind: EventKind) -> &'static str {
    if kind.is_bridge() {
        BRIDGE_MODULE
    } else {
        ESCROW_MODULE
    }
}

/// Fully-qualified Move type of an event kind
pub fn event_type(package: &ObjectId, kind: EventKind) -> String {
    format!("{}::{}::{}", package, module_for(kind), kind.name())
}

/// Resolves a fully-qualified type back to an event kind of `package`
pub fn parse_event_type(package: &ObjectId, type_: &str) -> Option<EventKind> {
    let mut parts = type_.splitn(3, "::");
    let pkg: ObjectId = parts.next()?.parse().ok()?;
    let module = parts.next()?;
    let name = parts.next()?;
    if &pkg != package {
        return None;
    }
    let kind = EventKind::from_name(name)?;
    (module_for(kind) == module).then_some(kind)
}

macro_rules! move_events {
    ($($kind:ident => $move_struct:ident { $($field:ident : $ty:ty),* $(,)? })*) => {
        $(
            // `$kind` emitted by the escrow package
            #[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
            pub struct $move_struct {
                $(pub $field: $ty,)*
            }
        )*

        #[derive(Debug, Clone, PartialEq, Eq)]
        pub enum SuiEscrowEvent {
            $($kind($move_struct),)*
        }

        impl SuiEscrowEvent {
            pub fn kind(&self) -> EventKind {
                match self {
                    $(SuiEscrowEvent::$kind(_) => EventKind::$kind,)*
                }
            }

            pub fn to_bcs(&self) -> Result<Vec<u8>, SuiEventError> {
                Ok(match self {
                    $(SuiEscrowEvent::$kind(e) => bcs::to_bytes(e)?,)*
                })
            }

            fn from_bcs(kind: EventKind, bytes: &[u8]) -> Result<Self, SuiEventError> {
                let map = |source: bcs::Error| SuiEventError::Bcs { event: kind.name(), source };
                Ok(match kind {
                    $(EventKind::$kind => SuiEscrowEvent::$kind(bcs::from_bytes(bytes).map_err(map)?),)*
                })
            }
        }
    };
}

move_events! {
    EscrowCreated => MoveEscrowCreatedEvent {
        escrow_id: ObjectId,
        client: SuiAddress,
        freelancer: SuiAddress,
        total_amount: u64,
        milestone_amounts: Vec<u64>,
        is_cross_chain: bool,
        cross_chain_recipient: String,
        token_symbol: String,
        title: String,
    }
    MilestoneStarted => MoveMilestoneStartedEvent {
        escrow_id: ObjectId,
        milestone_index: u64,
    }
    MilestoneSubmitted => MoveMilestoneSubmittedEvent {
        escrow_id: ObjectId,
        milestone_index: u64,
        note: String,
    }
    MilestoneApproved => MoveMilestoneApprovedEvent {
        escrow_id: ObjectId,
        milestone_index: u64,
    }
    MilestoneReleased => MoveMilestoneReleasedEvent {
        escrow_id: ObjectId,
        milestone_index: u64,
        recipient_amount: u64,
        fee: u64,
        // empty for a same-chain release
        bridge_transfer_id: Vec<u8>,
    }
    MilestoneRefunded => MoveMilestoneRefundedEvent {
        escrow_id: ObjectId,
        milestone_index: u64,
        amount: u64,
    }
    DisputeInitiated => MoveDisputeInitiatedEvent {
        escrow_id: ObjectId,
        initiator: SuiAddress,
        milestone_index: u64,
        reason: String,
    }
    DisputeVoteCast => MoveDisputeVoteCastEvent {
        escrow_id: ObjectId,
        arbiter: SuiAddress,
        milestone_index: u64,
        vote_for_client: bool,
        votes_for_client: u64,
        votes_for_freelancer: u64,
    }
    DisputeResolved => MoveDisputeResolvedEvent {
        escrow_id: ObjectId,
        milestone_index: u64,
        favour_client: bool,
        votes_for_client: u64,
        votes_for_freelancer: u64,
    }
    EscrowCompleted => MoveEscrowCompletedEvent {
        escrow_id: ObjectId,
    }
    EscrowCancelled => MoveEscrowCancelledEvent {
        escrow_id: ObjectId,
        refund_amount: u64,
    }
    EscrowRefunded => MoveEscrowRefundedEvent {
        escrow_id: ObjectId,
        amount: u64,
    }
    BridgeTransferInitiated => MoveBridgeTransferInitiatedEvent {
        transfer_id: Vec<u8>,
        sender: SuiAddress,
        recipient: String,
        amount: u64,
        timestamp_ms: u64,
        nonce: u64,
    }
    BridgeTransferConfirmed => MoveBridgeTransferConfirmedEvent {
        transfer_id: Vec<u8>,
        relayer: SuiAddress,
        confirmations: u64,
    }
    BridgeTransferExecuted => MoveBridgeTransferExecutedEvent {
        transfer_id: Vec<u8>,
        recipient: String,
        amount: u64,
    }
    BridgeTransferRefunded => MoveBridgeTransferRefundedEvent {
        transfer_id: Vec<u8>,
        sender: SuiAddress,
        amount: u64,
    }
    BridgeTransferFailed => MoveBridgeTransferFailedEvent {
        transfer_id: Vec<u8>,
        reason: String,
    }
}

impl SuiEscrowEvent {
    /// Wraps the event in the envelope the chain attaches on emission
    pub fn to_sui_event(
        &self,
        package: &ObjectId,
        id: EventId,
        sender: SuiAddress,
        timestamp_ms: u64,
    ) -> Result<SuiEvent, SuiEventError> {
        let kind = self.kind();
        Ok(SuiEvent {
            id,
            package_id: *package,
            transaction_module: module_for(kind).to_string(),
            sender,
            type_: event_type(package, kind),
            bcs: self.to_bcs()?,
            timestamp_ms: Some(timestamp_ms),
        })
    }

    /// Decodes an event of `package`. Events of other packages or unknown
    /// types yield `Ok(None)`.
    pub fn try_from_sui_event(
        event: &SuiEvent,
        package: &ObjectId,
    ) -> Result<Option<Self>, SuiEventError> {
        let Some(kind) = parse_event_type(package, &event.type_) else {
            return Ok(None);
        };
        Self::from_bcs(kind, &event.bcs).map(Some)
    }
}
