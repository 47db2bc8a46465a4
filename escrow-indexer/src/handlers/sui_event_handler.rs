// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Turns escrow package events into domain events.

use crate::events::{DomainEvent, EventMeta, IndexedEvent};
use crate::source::{ChainCursor, SourceError};
use escrow_contracts::sui::{ObjectId, SuiEscrowEvent, SuiEvent};
use escrow_types::{ChainKind, DisputeOutcome, TransferId};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct SuiEventHandler {
    package: ObjectId,
}

fn small(v: u64, what: &str) -> Result<u32, SourceError> {
    u32::try_from(v).map_err(|_| SourceError::Decode(format!("{} {} out of range", what, v)))
}

fn transfer_id(raw: &[u8]) -> Result<TransferId, SourceError> {
    TransferId::from_slice(raw).map_err(|e| SourceError::Decode(e.to_string()))
}

impl SuiEventHandler {
    pub fn new(package: ObjectId) -> Self {
        Self { package }
    }

    pub fn package(&self) -> ObjectId {
        self.package
    }

    /// `Ok(None)` for events of other packages or unknown types
    pub fn decode(&self, event: &SuiEvent) -> Result<Option<IndexedEvent>, SourceError> {
        let Some(raw) = SuiEscrowEvent::try_from_sui_event(event, &self.package)
            .map_err(|e| SourceError::Decode(e.to_string()))?
        else {
            debug!("[SUI] Ignoring event of type {}", event.type_);
            return Ok(None);
        };
        Ok(Some(IndexedEvent {
            meta: EventMeta {
                chain: ChainKind::Sui,
                tx_hash: event.id.tx_digest.clone(),
                timestamp_ms: event.timestamp_ms.unwrap_or_default(),
                cursor: ChainCursor::Sui(event.id.clone()),
            },
            event: Self::to_domain(raw)?,
        }))
    }

    fn to_domain(event: SuiEscrowEvent) -> Result<DomainEvent, SourceError> {
        Ok(match event {
            SuiEscrowEvent::EscrowCreated(e) => DomainEvent::EscrowCreated {
                escrow_id: e.escrow_id.to_string(),
                client: e.client.to_string(),
                freelancer: e.freelancer.to_string(),
                total_amount: e.total_amount as u128,
                milestone_amounts: e.milestone_amounts.iter().map(|a| *a as u128).collect(),
                cross_chain_recipient: e.is_cross_chain.then_some(e.cross_chain_recipient),
                token_symbol: e.token_symbol,
                title: e.title,
            },
            SuiEscrowEvent::MilestoneStarted(e) => DomainEvent::MilestoneStarted {
                escrow_id: e.escrow_id.to_string(),
                index: small(e.milestone_index, "milestone index")?,
            },
            SuiEscrowEvent::MilestoneSubmitted(e) => DomainEvent::MilestoneSubmitted {
                escrow_id: e.escrow_id.to_string(),
                index: small(e.milestone_index, "milestone index")?,
                note: e.note,
            },
            SuiEscrowEvent::MilestoneApproved(e) => DomainEvent::MilestoneApproved {
                escrow_id: e.escrow_id.to_string(),
                index: small(e.milestone_index, "milestone index")?,
            },
            SuiEscrowEvent::MilestoneReleased(e) => DomainEvent::MilestoneReleased {
                escrow_id: e.escrow_id.to_string(),
                index: small(e.milestone_index, "milestone index")?,
                recipient_amount: e.recipient_amount as u128,
                fee: e.fee as u128,
                bridge_transfer_id: if e.bridge_transfer_id.is_empty() {
                    None
                } else {
                    Some(transfer_id(&e.bridge_transfer_id)?)
                },
            },
            SuiEscrowEvent::MilestoneRefunded(e) => DomainEvent::MilestoneRefunded {
                escrow_id: e.escrow_id.to_string(),
                index: small(e.milestone_index, "milestone index")?,
                amount: e.amount as u128,
            },
            SuiEscrowEvent::DisputeInitiated(e) => DomainEvent::DisputeInitiated {
                escrow_id: e.escrow_id.to_string(),
                initiator: e.initiator.to_string(),
                index: small(e.milestone_index, "milestone index")?,
                reason: e.reason,
            },
            SuiEscrowEvent::DisputeVoteCast(e) => DomainEvent::DisputeVoteCast {
                escrow_id: e.escrow_id.to_string(),
                arbiter: e.arbiter.to_string(),
                index: small(e.milestone_index, "milestone index")?,
                vote_for_client: e.vote_for_client,
                votes_for_client: small(e.votes_for_client, "vote count")?,
                votes_for_freelancer: small(e.votes_for_freelancer, "vote count")?,
            },
            SuiEscrowEvent::DisputeResolved(e) => DomainEvent::DisputeResolved {
                escrow_id: e.escrow_id.to_string(),
                index: small(e.milestone_index, "milestone index")?,
                outcome: if e.favour_client {
                    DisputeOutcome::Client
                } else {
                    DisputeOutcome::Freelancer
                },
                votes_for_client: small(e.votes_for_client, "vote count")?,
                votes_for_freelancer: small(e.votes_for_freelancer, "vote count")?,
            },
            SuiEscrowEvent::EscrowCompleted(e) => DomainEvent::EscrowCompleted {
                escrow_id: e.escrow_id.to_string(),
            },
            SuiEscrowEvent::EscrowCancelled(e) => DomainEvent::EscrowCancelled {
                escrow_id: e.escrow_id.to_string(),
                refund_amount: e.refund_amount as u128,
            },
            SuiEscrowEvent::EscrowRefunded(e) => DomainEvent::EscrowRefunded {
                escrow_id: e.escrow_id.to_string(),
                amount: e.amount as u128,
            },
            SuiEscrowEvent::BridgeTransferInitiated(e) => DomainEvent::BridgeTransferInitiated {
                transfer_id: transfer_id(&e.transfer_id)?,
                sender: e.sender.to_string(),
                recipient: e.recipient,
                amount: e.amount as u128,
                timestamp: e.timestamp_ms,
                nonce: e.nonce,
            },
            SuiEscrowEvent::BridgeTransferConfirmed(e) => DomainEvent::BridgeTransferConfirmed {
                transfer_id: transfer_id(&e.transfer_id)?,
                relayer: e.relayer.to_string(),
                confirmations: small(e.confirmations, "confirmations")?,
            },
            SuiEscrowEvent::BridgeTransferExecuted(e) => DomainEvent::BridgeTransferExecuted {
                transfer_id: transfer_id(&e.transfer_id)?,
                recipient: e.recipient,
                amount: e.amount as u128,
            },
            SuiEscrowEvent::BridgeTransferRefunded(e) => DomainEvent::BridgeTransferRefunded {
                transfer_id: transfer_id(&e.transfer_id)?,
                sender: e.sender.to_string(),
                amount: e.amount as u128,
            },
            SuiEscrowEvent::BridgeTransferFailed(e) => DomainEvent::BridgeTransferFailed {
                transfer_id: transfer_id(&e.transfer_id)?,
                reason: e.reason,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use escrow_contracts::sui::events::{
        MoveBridgeTransferConfirmedEvent, MoveMilestoneReleasedEvent,
    };
    use escrow_contracts::sui::{EventId, SuiAddress};

    fn package() -> ObjectId {
        ObjectId::repeat_byte(0x0a)
    }

    fn envelope(event: SuiEscrowEvent, seq: u64) -> SuiEvent {
        event
            .to_sui_event(&package(), EventId::new("dig", seq), SuiAddress::repeat_byte(1), 77)
            .unwrap()
    }

    #[test]
    fn test_cross_chain_release_carries_transfer() {
        let handler = SuiEventHandler::new(package());
        let raw = SuiEscrowEvent::MilestoneReleased(MoveMilestoneReleasedEvent {
            escrow_id: ObjectId::repeat_byte(3),
            milestone_index: 0,
            recipient_amount: 2970,
            fee: 30,
            bridge_transfer_id: vec![5; 32],
        });
        let event = handler.decode(&envelope(raw, 2)).unwrap().unwrap();
        assert_eq!(event.meta.timestamp_ms, 77);
        assert_eq!(event.meta.cursor, ChainCursor::Sui(EventId::new("dig", 2)));
        match event.event {
            DomainEvent::MilestoneReleased {
                bridge_transfer_id, ..
            } => assert_eq!(bridge_transfer_id, Some(TransferId::new([5; 32]))),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_short_transfer_id_rejected() {
        let handler = SuiEventHandler::new(package());
        let raw = SuiEscrowEvent::BridgeTransferConfirmed(MoveBridgeTransferConfirmedEvent {
            transfer_id: vec![1, 2, 3],
            relayer: SuiAddress::repeat_byte(2),
            confirmations: 1,
        });
        assert!(matches!(
            handler.decode(&envelope(raw, 0)),
            Err(SourceError::Decode(_))
        ));
    }

    #[test]
    fn test_other_package_ignored() {
        let handler = SuiEventHandler::new(ObjectId::repeat_byte(0x0b));
        let raw = SuiEscrowEvent::MilestoneReleased(MoveMilestoneReleasedEvent {
            escrow_id: ObjectId::repeat_byte(3),
            milestone_index: 0,
            recipient_amount: 1,
            fee: 0,
            bridge_transfer_id: vec![],
        });
        assert!(handler.decode(&envelope(raw, 0)).unwrap().is_none());
    }
}
