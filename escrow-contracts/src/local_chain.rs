// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! In-process ledgers for the two deployments.
//!
//! Each ledger serializes calls behind a single lock, the way a chain
//! serializes transactions, and records the emitted events with their
//! position so the indexer can be driven end to end without a node.

use crate::error::{EscrowError, EscrowResult};
use crate::evm::{CallContext, EvmEscrowContract};
use crate::sui::{EventId, ObjectId, SuiAddress, SuiEscrowModule, SuiEvent, SuiEventPage, TxContext};
use ethers::types::{Address, Log, H256, U256, U64};
use ethers::utils::keccak256;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct EvmReceipt<R> {
    pub tx_hash: H256,
    pub block_number: u64,
    pub logs: Vec<Log>,
    pub output: R,
}

struct EvmLedger {
    contract: EvmEscrowContract,
    /// Timestamp of every block, indexed by block number
    block_timestamps: Vec<u64>,
    clock: u64,
    logs: Vec<Log>,
}

impl EvmLedger {
    fn head(&self) -> u64 {
        self.block_timestamps.len() as u64 - 1
    }

    fn mine(&mut self) -> u64 {
        self.block_timestamps.push(self.clock);
        self.head()
    }
}

/// EVM chain with one escrow contract. Every successful call mines a block.
pub struct LocalEvmChain {
    inner: Mutex<EvmLedger>,
}

impl LocalEvmChain {
    pub fn new(contract: EvmEscrowContract, genesis_timestamp: u64) -> Self {
        Self {
            inner: Mutex::new(EvmLedger {
                contract,
                block_timestamps: vec![genesis_timestamp],
                clock: genesis_timestamp,
                logs: vec![],
            }),
        }
    }

    fn ledger(&self) -> MutexGuard<'_, EvmLedger> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn contract_address(&self) -> Address {
        self.ledger().contract.address()
    }

    /// Runs one transaction. A failed call mines nothing.
    pub fn execute<R>(
        &self,
        sender: Address,
        value: U256,
        call: impl FnOnce(&mut EvmEscrowContract, &CallContext) -> EscrowResult<R>,
    ) -> EscrowResult<EvmReceipt<R>> {
        let mut ledger = self.ledger();
        let ctx = CallContext::new(sender, ledger.clock).with_value(value);
        let output = call(&mut ledger.contract, &ctx)?;
        let events = ledger.contract.take_events();
        let block_number = ledger.mine();
        let tx_hash = H256(keccak256(block_number.to_be_bytes()));
        let block_hash = H256(keccak256([b"block".as_slice(), &block_number.to_be_bytes()].concat()));
        let address = ledger.contract.address();
        let logs: Vec<Log> = events
            .iter()
            .enumerate()
            .map(|(i, event)| {
                let mut log = event.to_log(address);
                log.block_number = Some(U64::from(block_number));
                log.block_hash = Some(block_hash);
                log.transaction_hash = Some(tx_hash);
                log.transaction_index = Some(U64::zero());
                log.log_index = Some(U256::from(i));
                log
            })
            .collect();
        ledger.logs.extend(logs.iter().cloned());
        debug!("[LocalEvm] Block {} with {} logs", block_number, logs.len());
        Ok(EvmReceipt {
            tx_hash,
            block_number,
            logs,
            output,
        })
    }

    /// Moves the clock forward; the next block carries the new time
    pub fn advance_time(&self, secs: u64) {
        self.ledger().clock += secs;
    }

    pub fn mine_empty_blocks(&self, count: u64) {
        let mut ledger = self.ledger();
        for _ in 0..count {
            ledger.mine();
        }
    }

    pub fn latest_block(&self) -> u64 {
        self.ledger().head()
    }

    pub fn block_timestamp(&self, block: u64) -> Option<u64> {
        self.ledger().block_timestamps.get(block as usize).copied()
    }

    /// Logs in the inclusive block range, in chain order
    pub fn logs(&self, from_block: u64, to_block: u64) -> Vec<Log> {
        self.ledger()
            .logs
            .iter()
            .filter(|log| {
                log.block_number
                    .map(|n| (from_block..=to_block).contains(&n.as_u64()))
                    .unwrap_or(false)
            })
            .cloned()
            .collect()
    }

    pub fn read<R>(&self, f: impl FnOnce(&EvmEscrowContract) -> R) -> R {
        f(&self.ledger().contract)
    }
}

#[derive(Debug, Clone)]
pub struct SuiReceipt<R> {
    pub digest: String,
    pub events: Vec<SuiEvent>,
    pub output: R,
}

struct SuiLedger {
    module: SuiEscrowModule,
    clock_ms: u64,
    tx_count: u64,
    events: Vec<SuiEvent>,
}

/// Sui network with one escrow package. Events are queryable by cursor and
/// pushed to live subscribers.
pub struct LocalSuiChain {
    inner: Mutex<SuiLedger>,
    live: broadcast::Sender<SuiEvent>,
}

impl LocalSuiChain {
    pub fn new(module: SuiEscrowModule, genesis_ms: u64) -> Self {
        let (live, _) = broadcast::channel(1024);
        Self {
            inner: Mutex::new(SuiLedger {
                module,
                clock_ms: genesis_ms,
                tx_count: 0,
                events: vec![],
            }),
            live,
        }
    }

    fn ledger(&self) -> MutexGuard<'_, SuiLedger> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn package_id(&self) -> ObjectId {
        self.ledger().module.package_id()
    }

    pub fn execute<R>(
        &self,
        sender: SuiAddress,
        call: impl FnOnce(&mut SuiEscrowModule, &TxContext) -> EscrowResult<R>,
    ) -> EscrowResult<SuiReceipt<R>> {
        let mut ledger = self.ledger();
        let digest = hex::encode(keccak256((ledger.tx_count + 1).to_be_bytes()));
        let ctx = TxContext::new(sender, digest.clone(), ledger.clock_ms);
        let output = call(&mut ledger.module, &ctx)?;
        ledger.tx_count += 1;
        let package = ledger.module.package_id();
        let mut events = vec![];
        for (seq, event) in ledger.module.take_events().into_iter().enumerate() {
            let envelope = event
                .to_sui_event(
                    &package,
                    EventId::new(digest.clone(), seq as u64),
                    sender,
                    ctx.timestamp_ms,
                )
                .map_err(|e| EscrowError::invalid_state(e.to_string()))?;
            events.push(envelope);
        }
        ledger.events.extend(events.iter().cloned());
        drop(ledger);
        for event in &events {
            // no subscribers is fine
            let _ = self.live.send(event.clone());
        }
        debug!("[LocalSui] Tx {} with {} events", digest, events.len());
        Ok(SuiReceipt {
            digest,
            events,
            output,
        })
    }

    pub fn advance_clock(&self, ms: u64) {
        self.ledger().clock_ms += ms;
    }

    /// Events strictly after `cursor` (from genesis when `None`)
    pub fn query_events(&self, cursor: Option<&EventId>, limit: usize) -> EscrowResult<SuiEventPage> {
        let ledger = self.ledger();
        let start = match cursor {
            None => 0,
            Some(cursor) => {
                ledger
                    .events
                    .iter()
                    .position(|e| &e.id == cursor)
                    .ok_or_else(|| EscrowError::NotFound(format!("event cursor {}", cursor)))?
                    + 1
            }
        };
        let data: Vec<SuiEvent> = ledger.events.iter().skip(start).take(limit).cloned().collect();
        let has_next_page = start + data.len() < ledger.events.len();
        Ok(SuiEventPage {
            next_cursor: data.last().map(|e| e.id.clone()).or_else(|| cursor.cloned()),
            data,
            has_next_page,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SuiEvent> {
        self.live.subscribe()
    }

    pub fn read<R>(&self, f: impl FnOnce(&SuiEscrowModule) -> R) -> R {
        f(&self.ledger().module)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeploymentConfig;
    use crate::evm::{CreateEscrowParams, EvmEscrowEvent};
    use crate::sui::{CreateEscrowArgs, SuiEscrowEvent};

    fn evm_chain() -> LocalEvmChain {
        let config = DeploymentConfig {
            admin: Address::repeat_byte(0xad),
            treasury: Address::repeat_byte(0x7e),
            fee_bps: 100,
            arbiters: vec![
                Address::repeat_byte(0xa1),
                Address::repeat_byte(0xa2),
                Address::repeat_byte(0xa3),
            ],
            relayers: vec![Address::repeat_byte(0xb1), Address::repeat_byte(0xb2)],
            required_confirmations: 2,
            refund_timeout: 86_400,
        };
        LocalEvmChain::new(
            EvmEscrowContract::new(Address::repeat_byte(0xee), config).unwrap(),
            1_700_000_000,
        )
    }

    fn sui_chain() -> LocalSuiChain {
        let config = DeploymentConfig {
            admin: SuiAddress::repeat_byte(0xad),
            treasury: SuiAddress::repeat_byte(0x7e),
            fee_bps: 100,
            arbiters: vec![
                SuiAddress::repeat_byte(0xa1),
                SuiAddress::repeat_byte(0xa2),
                SuiAddress::repeat_byte(0xa3),
            ],
            relayers: vec![SuiAddress::repeat_byte(0xb1), SuiAddress::repeat_byte(0xb2)],
            required_confirmations: 2,
            refund_timeout: 86_400_000,
        };
        LocalSuiChain::new(
            SuiEscrowModule::new(ObjectId::repeat_byte(0x0a), config).unwrap(),
            1_700_000_000_000,
        )
    }

    #[test]
    fn test_evm_logs_are_positioned_and_decodable() {
        let chain = evm_chain();
        let receipt = chain
            .execute(Address::repeat_byte(0xc1), U256::from(100u64), |c, ctx| {
                c.create_escrow(
                    ctx,
                    CreateEscrowParams {
                        freelancer: Address::repeat_byte(0xf1),
                        milestone_amounts: vec![U256::from(100u64)],
                        milestone_descriptions: vec!["m".into()],
                        ..Default::default()
                    },
                )
            })
            .unwrap();
        assert_eq!(receipt.block_number, 1);
        assert_eq!(chain.latest_block(), 1);
        let logs = chain.logs(0, 1);
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].transaction_hash, Some(receipt.tx_hash));
        let event = EvmEscrowEvent::from_log(&logs[0]).unwrap().unwrap();
        assert!(matches!(event, EvmEscrowEvent::EscrowCreated { .. }));
        assert!(chain.logs(2, 10).is_empty());
    }

    #[test]
    fn test_evm_failed_call_mines_nothing() {
        let chain = evm_chain();
        let result = chain.execute(Address::repeat_byte(0xc1), U256::zero(), |c, ctx| {
            c.start_milestone(ctx, U256::one(), 0)
        });
        assert!(matches!(result, Err(EscrowError::NotFound(_))));
        assert_eq!(chain.latest_block(), 0);
        chain.mine_empty_blocks(3);
        chain.advance_time(12);
        chain.mine_empty_blocks(1);
        assert_eq!(chain.latest_block(), 4);
        assert_eq!(chain.block_timestamp(4), Some(1_700_000_012));
    }

    #[tokio::test]
    async fn test_sui_query_and_subscribe() {
        let chain = sui_chain();
        let mut live = chain.subscribe();
        let receipt = chain
            .execute(SuiAddress::repeat_byte(0xc1), |m, ctx| {
                m.create_escrow(
                    ctx,
                    10,
                    CreateEscrowArgs {
                        freelancer: SuiAddress::repeat_byte(0xf1),
                        milestone_amounts: vec![10],
                        milestone_descriptions: vec!["m".into()],
                        ..Default::default()
                    },
                )
            })
            .unwrap();
        assert_eq!(receipt.events.len(), 1);
        let pushed = live.recv().await.unwrap();
        assert_eq!(pushed, receipt.events[0]);

        let page = chain.query_events(None, 10).unwrap();
        assert_eq!(page.data.len(), 1);
        assert!(!page.has_next_page);
        let decoded = SuiEscrowEvent::try_from_sui_event(&page.data[0], &chain.package_id())
            .unwrap()
            .unwrap();
        assert!(matches!(decoded, SuiEscrowEvent::EscrowCreated(_)));

        let after = chain.query_events(page.next_cursor.as_ref(), 10).unwrap();
        assert!(after.data.is_empty());
        assert_eq!(after.next_cursor, page.next_cursor);

        let lost = EventId::new("unknown", 0);
        assert!(matches!(
            chain.query_events(Some(&lost), 10),
            Err(EscrowError::NotFound(_))
        ));
    }
}
