// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Turns escrow contract logs into domain events.

use crate::events::{DomainEvent, EventMeta, IndexedEvent};
use crate::source::{ChainCursor, SourceError};
use escrow_contracts::evm::EvmEscrowEvent;
use escrow_types::{ChainKind, DisputeOutcome, TransferId};
use ethers::types::{Address, Log, U256};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct EvmEventHandler {
    contract: Address,
}

fn amount(v: U256) -> Result<u128, SourceError> {
    if v > U256::from(u128::MAX) {
        return Err(SourceError::Decode(format!("amount {} exceeds u128", v)));
    }
    Ok(v.as_u128())
}

fn small(v: u64, what: &str) -> Result<u32, SourceError> {
    u32::try_from(v).map_err(|_| SourceError::Decode(format!("{} {} out of range", what, v)))
}

fn addr(a: Address) -> String {
    format!("{:?}", a)
}

fn transfer_id(raw: [u8; 32]) -> TransferId {
    TransferId::new(raw)
}

impl EvmEventHandler {
    pub fn new(contract: Address) -> Self {
        Self { contract }
    }

    pub fn contract(&self) -> Address {
        self.contract
    }

    /// `Ok(None)` for logs of other contracts, removed logs and unknown
    /// topics
    pub fn decode(&self, log: &Log, timestamp_ms: u64) -> Result<Option<IndexedEvent>, SourceError> {
        if log.address != self.contract || log.removed == Some(true) {
            return Ok(None);
        }
        let (Some(block), Some(log_index)) = (log.block_number, log.log_index) else {
            return Err(SourceError::Decode("log without block position".into()));
        };
        let Some(raw) = EvmEscrowEvent::from_log(log).map_err(|e| SourceError::Decode(e.to_string()))?
        else {
            debug!("[EVM] Ignoring log with unknown topic in block {}", block);
            return Ok(None);
        };
        let tx_hash = log
            .transaction_hash
            .map(|h| format!("{:?}", h))
            .unwrap_or_default();
        Ok(Some(IndexedEvent {
            meta: EventMeta {
                chain: ChainKind::Evm,
                tx_hash,
                timestamp_ms,
                cursor: ChainCursor::Evm {
                    block: block.as_u64(),
                    log_index: log_index.low_u64(),
                },
            },
            event: Self::to_domain(raw)?,
        }))
    }

    fn to_domain(event: EvmEscrowEvent) -> Result<DomainEvent, SourceError> {
        Ok(match event {
            EvmEscrowEvent::EscrowCreated {
                escrow_id,
                client,
                freelancer,
                total_amount,
                milestone_amounts,
                is_cross_chain,
                cross_chain_recipient,
                token_symbol,
                title,
            } => DomainEvent::EscrowCreated {
                escrow_id: escrow_id.to_string(),
                client: addr(client),
                freelancer: addr(freelancer),
                total_amount: amount(total_amount)?,
                milestone_amounts: milestone_amounts
                    .into_iter()
                    .map(amount)
                    .collect::<Result<_, _>>()?,
                cross_chain_recipient: is_cross_chain.then_some(cross_chain_recipient),
                token_symbol,
                title,
            },
            EvmEscrowEvent::MilestoneStarted {
                escrow_id,
                milestone_index,
            } => DomainEvent::MilestoneStarted {
                escrow_id: escrow_id.to_string(),
                index: small(milestone_index, "milestone index")?,
            },
            EvmEscrowEvent::MilestoneSubmitted {
                escrow_id,
                milestone_index,
                note,
            } => DomainEvent::MilestoneSubmitted {
                escrow_id: escrow_id.to_string(),
                index: small(milestone_index, "milestone index")?,
                note,
            },
            EvmEscrowEvent::MilestoneApproved {
                escrow_id,
                milestone_index,
            } => DomainEvent::MilestoneApproved {
                escrow_id: escrow_id.to_string(),
                index: small(milestone_index, "milestone index")?,
            },
            EvmEscrowEvent::MilestoneReleased {
                escrow_id,
                milestone_index,
                recipient_amount,
                fee,
                bridge_transfer_id,
            } => DomainEvent::MilestoneReleased {
                escrow_id: escrow_id.to_string(),
                index: small(milestone_index, "milestone index")?,
                recipient_amount: amount(recipient_amount)?,
                fee: amount(fee)?,
                bridge_transfer_id: (bridge_transfer_id != [0u8; 32])
                    .then(|| transfer_id(bridge_transfer_id)),
            },
            EvmEscrowEvent::MilestoneRefunded {
                escrow_id,
                milestone_index,
                amount: refunded,
            } => DomainEvent::MilestoneRefunded {
                escrow_id: escrow_id.to_string(),
                index: small(milestone_index, "milestone index")?,
                amount: amount(refunded)?,
            },
            EvmEscrowEvent::DisputeInitiated {
                escrow_id,
                initiator,
                milestone_index,
                reason,
            } => DomainEvent::DisputeInitiated {
                escrow_id: escrow_id.to_string(),
                initiator: addr(initiator),
                index: small(milestone_index, "milestone index")?,
                reason,
            },
            EvmEscrowEvent::DisputeVoteCast {
                escrow_id,
                arbiter,
                milestone_index,
                vote_for_client,
                votes_for_client,
                votes_for_freelancer,
            } => DomainEvent::DisputeVoteCast {
                escrow_id: escrow_id.to_string(),
                arbiter: addr(arbiter),
                index: small(milestone_index, "milestone index")?,
                vote_for_client,
                votes_for_client: small(votes_for_client, "vote count")?,
                votes_for_freelancer: small(votes_for_freelancer, "vote count")?,
            },
            EvmEscrowEvent::DisputeResolved {
                escrow_id,
                milestone_index,
                favour_client,
                votes_for_client,
                votes_for_freelancer,
            } => DomainEvent::DisputeResolved {
                escrow_id: escrow_id.to_string(),
                index: small(milestone_index, "milestone index")?,
                outcome: if favour_client {
                    DisputeOutcome::Client
                } else {
                    DisputeOutcome::Freelancer
                },
                votes_for_client: small(votes_for_client, "vote count")?,
                votes_for_freelancer: small(votes_for_freelancer, "vote count")?,
            },
            EvmEscrowEvent::EscrowCompleted { escrow_id } => DomainEvent::EscrowCompleted {
                escrow_id: escrow_id.to_string(),
            },
            EvmEscrowEvent::EscrowCancelled {
                escrow_id,
                refund_amount,
            } => DomainEvent::EscrowCancelled {
                escrow_id: escrow_id.to_string(),
                refund_amount: amount(refund_amount)?,
            },
            EvmEscrowEvent::EscrowRefunded {
                escrow_id,
                amount: refunded,
            } => DomainEvent::EscrowRefunded {
                escrow_id: escrow_id.to_string(),
                amount: amount(refunded)?,
            },
            EvmEscrowEvent::BridgeTransferInitiated {
                transfer_id: id,
                sender,
                recipient,
                amount: value,
                timestamp,
                nonce,
            } => DomainEvent::BridgeTransferInitiated {
                transfer_id: transfer_id(id),
                sender: addr(sender),
                recipient,
                amount: amount(value)?,
                timestamp,
                nonce,
            },
            EvmEscrowEvent::BridgeTransferConfirmed {
                transfer_id: id,
                relayer,
                confirmations,
            } => DomainEvent::BridgeTransferConfirmed {
                transfer_id: transfer_id(id),
                relayer: addr(relayer),
                confirmations: small(confirmations, "confirmations")?,
            },
            EvmEscrowEvent::BridgeTransferExecuted {
                transfer_id: id,
                recipient,
                amount: value,
            } => DomainEvent::BridgeTransferExecuted {
                transfer_id: transfer_id(id),
                recipient,
                amount: amount(value)?,
            },
            EvmEscrowEvent::BridgeTransferRefunded {
                transfer_id: id,
                sender,
                amount: value,
            } => DomainEvent::BridgeTransferRefunded {
                transfer_id: transfer_id(id),
                sender: addr(sender),
                amount: amount(value)?,
            },
            EvmEscrowEvent::BridgeTransferFailed {
                transfer_id: id,
                reason,
            } => DomainEvent::BridgeTransferFailed {
                transfer_id: transfer_id(id),
                reason,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::{H256, U64};

    fn positioned(mut log: Log, block: u64, index: u64) -> Log {
        log.block_number = Some(U64::from(block));
        log.log_index = Some(U256::from(index));
        log.transaction_hash = Some(H256::repeat_byte(0x11));
        log
    }

    #[test]
    fn test_release_without_bridge() {
        let contract = Address::repeat_byte(0xee);
        let handler = EvmEventHandler::new(contract);
        let log = EvmEscrowEvent::MilestoneReleased {
            escrow_id: U256::from(3u64),
            milestone_index: 1,
            recipient_amount: U256::from(2970u64),
            fee: U256::from(30u64),
            bridge_transfer_id: [0u8; 32],
        }
        .to_log(contract);
        let event = handler
            .decode(&positioned(log, 8, 2), 1_000)
            .unwrap()
            .unwrap();
        assert_eq!(
            event.event,
            DomainEvent::MilestoneReleased {
                escrow_id: "3".into(),
                index: 1,
                recipient_amount: 2970,
                fee: 30,
                bridge_transfer_id: None,
            }
        );
        assert_eq!(event.meta.cursor, ChainCursor::Evm { block: 8, log_index: 2 });
        assert_eq!(event.meta.tx_hash, format!("0x{}", "11".repeat(32)));
    }

    #[test]
    fn test_cross_chain_created() {
        let contract = Address::repeat_byte(0xee);
        let handler = EvmEventHandler::new(contract);
        let log = EvmEscrowEvent::EscrowCreated {
            escrow_id: U256::one(),
            client: Address::repeat_byte(0xc1),
            freelancer: Address::repeat_byte(0xf1),
            total_amount: U256::from(10u64),
            milestone_amounts: vec![U256::from(4u64), U256::from(6u64)],
            is_cross_chain: true,
            cross_chain_recipient: "0xsui".into(),
            token_symbol: "ETH".into(),
            title: "t".into(),
        }
        .to_log(contract);
        let event = handler.decode(&positioned(log, 1, 0), 0).unwrap().unwrap();
        match event.event {
            DomainEvent::EscrowCreated {
                milestone_amounts,
                cross_chain_recipient,
                client,
                ..
            } => {
                assert_eq!(milestone_amounts, vec![4, 6]);
                assert_eq!(cross_chain_recipient.as_deref(), Some("0xsui"));
                assert_eq!(client, format!("0x{}", "c1".repeat(20)));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_foreign_and_unpositioned_logs() {
        let contract = Address::repeat_byte(0xee);
        let handler = EvmEventHandler::new(contract);
        let event = EvmEscrowEvent::EscrowCompleted {
            escrow_id: U256::one(),
        };
        let foreign = positioned(event.to_log(Address::repeat_byte(0x01)), 1, 0);
        assert!(handler.decode(&foreign, 0).unwrap().is_none());

        let mut removed = positioned(event.to_log(contract), 1, 0);
        removed.removed = Some(true);
        assert!(handler.decode(&removed, 0).unwrap().is_none());

        let pending = event.to_log(contract);
        assert!(matches!(
            handler.decode(&pending, 0),
            Err(SourceError::Decode(_))
        ));
    }
}
