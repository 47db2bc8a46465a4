// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Polling source for the EVM escrow contract.

use super::{ChainCursor, ChainSource, IndexerState, SourceBatch, SourceError};
use crate::handlers::EvmEventHandler;
use crate::retry_with_max_elapsed_time;
use async_trait::async_trait;
use escrow_types::ChainKind;
use ethers::providers::{Http, Middleware, Provider};
use ethers::types::{Address, Filter, Log};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{self, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Read access to an EVM node, narrowed to what the poller needs
#[async_trait]
pub trait EvmLogFetcher: Send + Sync {
    async fn latest_block(&self) -> Result<u64, SourceError>;

    /// Contract logs in `[from, to]`, both inclusive
    async fn logs(&self, from: u64, to: u64) -> Result<Vec<Log>, SourceError>;

    /// Block timestamp in seconds
    async fn block_timestamp(&self, block: u64) -> Result<u64, SourceError>;
}

pub struct EthersLogFetcher {
    provider: Provider<Http>,
    contract: Address,
}

impl EthersLogFetcher {
    pub fn new(rpc_url: &str, contract: Address) -> Result<Self, SourceError> {
        let provider = Provider::<Http>::try_from(rpc_url)
            .map_err(|e| SourceError::Config(format!("bad rpc url {}: {}", rpc_url, e)))?;
        Ok(Self { provider, contract })
    }
}

#[async_trait]
impl EvmLogFetcher for EthersLogFetcher {
    async fn latest_block(&self) -> Result<u64, SourceError> {
        self.provider
            .get_block_number()
            .await
            .map(|n| n.as_u64())
            .map_err(|e| SourceError::Rpc(e.to_string()))
    }

    async fn logs(&self, from: u64, to: u64) -> Result<Vec<Log>, SourceError> {
        let filter = Filter::new()
            .address(self.contract)
            .from_block(from)
            .to_block(to);
        self.provider
            .get_logs(&filter)
            .await
            .map_err(|e| SourceError::Rpc(e.to_string()))
    }

    async fn block_timestamp(&self, block: u64) -> Result<u64, SourceError> {
        let block_data = self
            .provider
            .get_block(block)
            .await
            .map_err(|e| SourceError::Rpc(e.to_string()))?
            .ok_or_else(|| SourceError::Rpc(format!("block {} not found", block)))?;
        Ok(block_data.timestamp.as_u64())
    }
}

#[derive(Debug, Clone)]
pub struct EvmPollerConfig {
    pub poll_interval: Duration,
    /// Used when there is no stored cursor
    pub start_block: u64,
    /// Overrides `start_block` with `latest - lookback_blocks` when set
    pub lookback_blocks: Option<u64>,
    /// Blocks behind the head that are not read yet
    pub finality_blocks: u64,
    pub max_block_range: u64,
    pub max_retry_duration: Duration,
}

impl Default for EvmPollerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            start_block: 0,
            lookback_blocks: None,
            finality_blocks: 0,
            max_block_range: 1000,
            max_retry_duration: Duration::from_secs(30),
        }
    }
}

pub struct EvmPoller<F> {
    fetcher: Arc<F>,
    handler: EvmEventHandler,
    config: EvmPollerConfig,
    next_block: u64,
    last: Option<(u64, u64)>,
    interval: Option<Interval>,
    more_blocks: bool,
}

impl<F: EvmLogFetcher> EvmPoller<F> {
    pub fn new(fetcher: Arc<F>, contract: Address, config: EvmPollerConfig) -> Self {
        Self {
            fetcher,
            handler: EvmEventHandler::new(contract),
            next_block: config.start_block,
            config,
            last: None,
            interval: None,
            more_blocks: false,
        }
    }

    fn is_past_cursor(&self, block: u64, log_index: u64) -> bool {
        match self.last {
            Some(last) => (block, log_index) > last,
            None => true,
        }
    }
}

#[async_trait]
impl<F: EvmLogFetcher + 'static> ChainSource for EvmPoller<F> {
    fn chain(&self) -> ChainKind {
        ChainKind::Evm
    }

    fn mode(&self) -> IndexerState {
        IndexerState::Polling
    }

    async fn start(&mut self, cursor: Option<ChainCursor>) -> Result<(), SourceError> {
        let fetcher = self.fetcher.clone();
        let head = retry_with_max_elapsed_time!(fetcher.latest_block(), self.config.max_retry_duration)?;
        match cursor {
            Some(ChainCursor::Evm { block, log_index }) => {
                if block > head {
                    return Err(SourceError::CursorLost(format!(
                        "cursor block {} is ahead of chain head {}",
                        block, head
                    )));
                }
                // The cursor block is read again; logs up to the cursor are skipped.
                self.next_block = block;
                self.last = Some((block, log_index));
            }
            Some(other) => {
                return Err(SourceError::CursorLost(format!("not an EVM cursor: {}", other)));
            }
            None => {
                self.next_block = match self.config.lookback_blocks {
                    Some(lookback) => head.saturating_sub(lookback),
                    None => self.config.start_block,
                };
                self.last = None;
            }
        }
        self.interval = None;
        self.more_blocks = false;
        info!(
            "[EVM] Polling contract {:?} from block {} (head {})",
            self.handler.contract(),
            self.next_block,
            head
        );
        Ok(())
    }

    async fn next_batch(&mut self) -> Result<SourceBatch, SourceError> {
        let poll_interval = self.config.poll_interval;
        let interval = self.interval.get_or_insert_with(|| {
            let mut interval = time::interval(poll_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            interval
        });
        // Catching up does not wait for the next tick.
        if !self.more_blocks {
            interval.tick().await;
        }

        let fetcher = self.fetcher.clone();
        let max_retry = self.config.max_retry_duration;
        let head = retry_with_max_elapsed_time!(fetcher.latest_block(), max_retry)?;
        let safe_head = head.saturating_sub(self.config.finality_blocks);
        if safe_head < self.next_block {
            self.more_blocks = false;
            return Ok(SourceBatch::default());
        }
        let from = self.next_block;
        let to = safe_head.min(from.saturating_add(self.config.max_block_range.max(1) - 1));

        let mut logs = retry_with_max_elapsed_time!(fetcher.logs(from, to), max_retry)?;
        logs.sort_by_key(|log| {
            (
                log.block_number.map(|b| b.as_u64()).unwrap_or_default(),
                log.log_index.map(|i| i.low_u64()).unwrap_or_default(),
            )
        });

        let mut timestamps: BTreeMap<u64, u64> = BTreeMap::new();
        let mut events = Vec::new();
        let mut last = self.last;
        for log in &logs {
            let (Some(block), Some(log_index)) = (log.block_number, log.log_index) else {
                warn!("[EVM] Skipping log without block position");
                continue;
            };
            let (block, log_index) = (block.as_u64(), log_index.low_u64());
            if !self.is_past_cursor(block, log_index) {
                continue;
            }
            let timestamp_ms = match timestamps.get(&block) {
                Some(ts) => *ts,
                None => {
                    let secs =
                        retry_with_max_elapsed_time!(fetcher.block_timestamp(block), max_retry)?;
                    let ts = ChainKind::Evm.timestamp_to_ms(secs);
                    timestamps.insert(block, ts);
                    ts
                }
            };
            match self.handler.decode(log, timestamp_ms) {
                Ok(Some(event)) => events.push(event),
                Ok(None) => {}
                Err(e) => warn!(
                    "[EVM] Skipping undecodable log {}:{}: {}",
                    block, log_index, e
                ),
            }
            last = Some((block, log_index));
        }

        debug!(
            "[EVM] Scanned blocks {}..={} ({} logs, {} events)",
            from,
            to,
            logs.len(),
            events.len()
        );
        self.next_block = to + 1;
        self.more_blocks = to < safe_head;
        // The whole range is done; the next scan starts after it.
        self.last = Some((to, u64::MAX)).max(last);
        Ok(SourceBatch {
            events,
            cursor: Some(ChainCursor::Evm {
                block: to,
                log_index: u64::MAX,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use escrow_contracts::evm::EvmEscrowEvent;
    use ethers::types::{H256, U256, U64};
    use std::sync::Mutex;

    struct ScriptedFetcher {
        head: Mutex<u64>,
        logs: Vec<Log>,
        calls: Mutex<Vec<(u64, u64)>>,
        fail_next: Mutex<bool>,
    }

    impl ScriptedFetcher {
        fn new(head: u64, logs: Vec<Log>) -> Self {
            Self {
                head: Mutex::new(head),
                logs,
                calls: Mutex::new(vec![]),
                fail_next: Mutex::new(false),
            }
        }
    }

    #[async_trait]
    impl EvmLogFetcher for ScriptedFetcher {
        async fn latest_block(&self) -> Result<u64, SourceError> {
            Ok(*self.head.lock().unwrap())
        }

        async fn logs(&self, from: u64, to: u64) -> Result<Vec<Log>, SourceError> {
            let mut fail = self.fail_next.lock().unwrap();
            if *fail {
                *fail = false;
                return Err(SourceError::Rpc("connection reset".into()));
            }
            self.calls.lock().unwrap().push((from, to));
            Ok(self
                .logs
                .iter()
                .filter(|l| {
                    let b = l.block_number.unwrap().as_u64();
                    b >= from && b <= to
                })
                .cloned()
                .collect())
        }

        async fn block_timestamp(&self, block: u64) -> Result<u64, SourceError> {
            Ok(1_000 + block)
        }
    }

    fn contract() -> Address {
        Address::repeat_byte(0xee)
    }

    fn completed(escrow: u64, block: u64, index: u64) -> Log {
        let mut log = EvmEscrowEvent::EscrowCompleted {
            escrow_id: U256::from(escrow),
        }
        .to_log(contract());
        log.block_number = Some(U64::from(block));
        log.log_index = Some(U256::from(index));
        log.transaction_hash = Some(H256::from_low_u64_be(block));
        log
    }

    fn config() -> EvmPollerConfig {
        EvmPollerConfig {
            poll_interval: Duration::from_millis(5),
            max_block_range: 10,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_scans_in_ranges_and_orders_logs() {
        let fetcher = Arc::new(ScriptedFetcher::new(
            25,
            vec![completed(2, 12, 1), completed(1, 12, 0), completed(3, 3, 0)],
        ));
        let mut poller = EvmPoller::new(fetcher.clone(), contract(), config());
        poller.start(None).await.unwrap();

        let first = poller.next_batch().await.unwrap();
        assert_eq!(first.events.len(), 1);
        assert_eq!(first.events[0].meta.timestamp_ms, 1_003_000);
        assert_eq!(
            first.cursor,
            Some(ChainCursor::Evm {
                block: 9,
                log_index: u64::MAX
            })
        );

        let second = poller.next_batch().await.unwrap();
        let cursors: Vec<_> = second.events.iter().map(|e| e.meta.cursor.clone()).collect();
        assert_eq!(
            cursors,
            vec![
                ChainCursor::Evm { block: 12, log_index: 0 },
                ChainCursor::Evm { block: 12, log_index: 1 },
            ]
        );
        poller.next_batch().await.unwrap();
        assert_eq!(*fetcher.calls.lock().unwrap(), vec![(0, 9), (10, 19), (20, 25)]);

        // Nothing new: an empty batch without a cursor
        let idle = poller.next_batch().await.unwrap();
        assert!(idle.events.is_empty());
        assert!(idle.cursor.is_none());
    }

    #[tokio::test]
    async fn test_resume_skips_processed_logs() {
        let fetcher = Arc::new(ScriptedFetcher::new(
            15,
            vec![completed(1, 12, 0), completed(2, 12, 1), completed(3, 13, 0)],
        ));
        let mut poller = EvmPoller::new(fetcher, contract(), config());
        poller
            .start(Some(ChainCursor::Evm {
                block: 12,
                log_index: 0,
            }))
            .await
            .unwrap();
        let batch = poller.next_batch().await.unwrap();
        let ids: Vec<_> = batch
            .events
            .iter()
            .map(|e| e.event.escrow_id().unwrap().to_string())
            .collect();
        assert_eq!(ids, vec!["2", "3"]);
    }

    #[tokio::test]
    async fn test_cursor_ahead_of_head_is_lost() {
        let fetcher = Arc::new(ScriptedFetcher::new(5, vec![]));
        let mut poller = EvmPoller::new(fetcher, contract(), config());
        let err = poller
            .start(Some(ChainCursor::Evm {
                block: 50,
                log_index: 0,
            }))
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::CursorLost(_)));
    }

    #[tokio::test]
    async fn test_lookback_and_finality() {
        let fetcher = Arc::new(ScriptedFetcher::new(100, vec![]));
        let mut poller = EvmPoller::new(
            fetcher.clone(),
            contract(),
            EvmPollerConfig {
                lookback_blocks: Some(20),
                finality_blocks: 5,
                max_block_range: 1000,
                ..config()
            },
        );
        poller.start(None).await.unwrap();
        poller.next_batch().await.unwrap();
        assert_eq!(*fetcher.calls.lock().unwrap(), vec![(80, 95)]);
    }

    #[tokio::test]
    async fn test_transient_rpc_error_is_retried() {
        let fetcher = Arc::new(ScriptedFetcher::new(3, vec![completed(1, 2, 0)]));
        *fetcher.fail_next.lock().unwrap() = true;
        let mut poller = EvmPoller::new(fetcher, contract(), config());
        poller.start(None).await.unwrap();
        let batch = poller.next_batch().await.unwrap();
        assert_eq!(batch.events.len(), 1);
    }
}
