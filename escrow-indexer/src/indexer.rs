// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Per-chain indexer task.
//!
//! One task per chain drives its [`ChainSource`], hands each event to the
//! [`ReconciliationEngine`] and stores the event's cursor once it is applied.
//! A restart resumes strictly after the stored cursor, so a crash between
//! applying and saving replays at most one event, which the engine treats as
//! a duplicate.

use crate::events::IndexedEvent;
use crate::metrics::IndexerMetrics;
use crate::reconcile::ReconciliationEngine;
use crate::source::{ChainCursor, ChainSource, IndexerState, SourceError};
use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use escrow_schema::{MirrorStore, EVM_INDEXER_TASK, SUI_INDEXER_TASK};
use escrow_types::ChainKind;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum IndexerError {
    #[error("{0} indexer is already running")]
    AlreadyRunning(&'static str),
    #[error("source is for {found}, indexer is for {expected}")]
    WrongChain {
        expected: &'static str,
        found: &'static str,
    },
}

/// Backoff between retries of an unavailable store or a failing source
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub initial_interval: Duration,
    pub max_interval: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(400),
            max_interval: Duration::from_secs(120),
        }
    }
}

impl RetryConfig {
    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.initial_interval,
            randomization_factor: 0.1,
            multiplier: 2.0,
            max_interval: self.max_interval,
            max_elapsed_time: None,
            ..Default::default()
        }
    }
}

pub fn progress_task_name(chain: ChainKind) -> &'static str {
    match chain {
        ChainKind::Evm => EVM_INDEXER_TASK,
        ChainKind::Sui => SUI_INDEXER_TASK,
    }
}

struct Running {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct ChainIndexer {
    chain: ChainKind,
    store: Arc<dyn MirrorStore>,
    engine: Arc<ReconciliationEngine>,
    metrics: Arc<IndexerMetrics>,
    retry: RetryConfig,
    state: Arc<RwLock<IndexerState>>,
    running: Option<Running>,
}

impl ChainIndexer {
    pub fn new(
        chain: ChainKind,
        store: Arc<dyn MirrorStore>,
        engine: Arc<ReconciliationEngine>,
        metrics: Arc<IndexerMetrics>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            chain,
            store,
            engine,
            metrics,
            retry,
            state: Arc::new(RwLock::new(IndexerState::Stopped)),
            running: None,
        }
    }

    pub fn chain(&self) -> ChainKind {
        self.chain
    }

    /// Shared view of the lifecycle state, for health reporting
    pub fn state_handle(&self) -> Arc<RwLock<IndexerState>> {
        self.state.clone()
    }

    pub async fn state(&self) -> IndexerState {
        *self.state.read().await
    }

    /// Spawns the indexing task. The state turns `Polling` or `Subscribed`
    /// once the source is positioned.
    pub fn start(&mut self, source: Box<dyn ChainSource>) -> Result<(), IndexerError> {
        if let Some(running) = &self.running {
            if !running.handle.is_finished() {
                return Err(IndexerError::AlreadyRunning(self.chain.as_str()));
            }
        }
        if source.chain() != self.chain {
            return Err(IndexerError::WrongChain {
                expected: self.chain.as_str(),
                found: source.chain().as_str(),
            });
        }
        let cancel = CancellationToken::new();
        let task = IndexerTask {
            chain: self.chain,
            task_name: progress_task_name(self.chain),
            store: self.store.clone(),
            engine: self.engine.clone(),
            metrics: self.metrics.clone(),
            retry: self.retry.clone(),
            state: self.state.clone(),
            cancel: cancel.clone(),
        };
        let handle = tokio::spawn(task.run(source));
        self.running = Some(Running { cancel, handle });
        Ok(())
    }

    /// Cancels the task and waits for it. No mirror or cursor write happens
    /// after this returns.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        running.cancel.cancel();
        if let Err(e) = running.handle.await {
            error!("[{}] Indexer task ended abnormally: {}", self.tag(), e);
        }
        *self.state.write().await = IndexerState::Stopped;
        info!("[{}] Indexer stopped", self.tag());
    }

    fn tag(&self) -> &'static str {
        chain_tag(self.chain)
    }
}

fn chain_tag(chain: ChainKind) -> &'static str {
    match chain {
        ChainKind::Evm => "EVM",
        ChainKind::Sui => "SUI",
    }
}

struct IndexerTask {
    chain: ChainKind,
    task_name: &'static str,
    store: Arc<dyn MirrorStore>,
    engine: Arc<ReconciliationEngine>,
    metrics: Arc<IndexerMetrics>,
    retry: RetryConfig,
    state: Arc<RwLock<IndexerState>>,
    cancel: CancellationToken,
}

/// What the loop does after a step
enum Flow {
    Continue,
    Stop,
}

impl IndexerTask {
    fn tag(&self) -> &'static str {
        chain_tag(self.chain)
    }

    /// Sleeps unless cancelled first; false when cancelled
    async fn pause(&self, delay: Duration) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    async fn pause_with(&self, backoff: &mut ExponentialBackoff) -> bool {
        let delay = backoff.next_backoff().unwrap_or(self.retry.max_interval);
        self.pause(delay).await
    }

    async fn load_cursor(&self) -> Option<Option<ChainCursor>> {
        let mut backoff = self.retry.backoff();
        let stored = loop {
            match self.store.load_cursor(self.task_name).await {
                Ok(stored) => break stored,
                Err(e) if e.is_retryable() => {
                    warn!("[{}] Failed to load cursor, retrying: {}", self.tag(), e);
                    self.metrics
                        .store_retries
                        .with_label_values(&[self.chain.as_str()])
                        .inc();
                    if !self.pause_with(&mut backoff).await {
                        return None;
                    }
                }
                Err(e) => {
                    error!("[{}] Unreadable cursor record, starting fresh: {}", self.tag(), e);
                    break None;
                }
            }
        };
        let cursor = stored.and_then(|raw| match raw.parse::<ChainCursor>() {
            Ok(cursor) if cursor.chain() == self.chain => Some(cursor),
            _ => {
                warn!("[{}] Discarding unusable cursor '{}'", self.tag(), raw);
                None
            }
        });
        Some(cursor)
    }

    async fn save_cursor(&self, cursor: &ChainCursor) -> Flow {
        let raw = cursor.to_string();
        let mut backoff = self.retry.backoff();
        loop {
            match self.store.save_cursor(self.task_name, &raw).await {
                Ok(()) => {
                    if let ChainCursor::Evm { block, log_index } = cursor {
                        // A block is fully synced once the cursor moves past its last log.
                        let synced = if *log_index == u64::MAX {
                            *block
                        } else {
                            block.saturating_sub(1)
                        };
                        self.metrics
                            .last_synced_evm_block
                            .with_label_values(&[self.chain.as_str()])
                            .set(synced as i64);
                    }
                    return Flow::Continue;
                }
                Err(e) => {
                    warn!("[{}] Failed to save cursor {}, retrying: {}", self.tag(), raw, e);
                    self.metrics
                        .store_retries
                        .with_label_values(&[self.chain.as_str()])
                        .inc();
                    if !self.pause_with(&mut backoff).await {
                        return Flow::Stop;
                    }
                }
            }
        }
    }

    /// Applies one event, retrying the same event while the store is down
    async fn apply(&self, event: &IndexedEvent) -> Flow {
        let mut backoff = self.retry.backoff();
        loop {
            match self.engine.apply(event).await {
                Ok(_) => return Flow::Continue,
                Err(e) => {
                    warn!(
                        "[{}] Store unavailable while applying {} ({}), retrying: {}",
                        self.tag(),
                        event.event.kind().name(),
                        event.meta.cursor,
                        e
                    );
                    self.metrics
                        .store_retries
                        .with_label_values(&[self.chain.as_str()])
                        .inc();
                    if !self.pause_with(&mut backoff).await {
                        return Flow::Stop;
                    }
                }
            }
        }
    }

    /// Positions the source, falling back to a fresh start when the stored
    /// cursor no longer exists on chain
    async fn start_source(&self, source: &mut dyn ChainSource, cursor: Option<ChainCursor>) -> Flow {
        let mut cursor = cursor;
        let mut backoff = self.retry.backoff();
        loop {
            let result = tokio::select! {
                _ = self.cancel.cancelled() => return Flow::Stop,
                r = source.start(cursor.clone()) => r,
            };
            match result {
                Ok(()) => {
                    *self.state.write().await = source.mode();
                    return Flow::Continue;
                }
                Err(SourceError::CursorLost(reason)) if cursor.is_some() => {
                    warn!(
                        "[{}] Stored cursor is gone ({}), rescanning from the configured start",
                        self.tag(),
                        reason
                    );
                    self.metrics
                        .source_restarts
                        .with_label_values(&[self.chain.as_str(), "cursor_lost"])
                        .inc();
                    if let Err(e) = self.store.clear_cursor(self.task_name).await {
                        warn!("[{}] Failed to clear cursor: {}", self.tag(), e);
                    }
                    cursor = None;
                }
                Err(SourceError::Config(reason)) => {
                    error!("[{}] Source misconfigured, stopping: {}", self.tag(), reason);
                    return Flow::Stop;
                }
                Err(e) => {
                    warn!("[{}] Failed to start source, retrying: {}", self.tag(), e);
                    self.metrics
                        .source_errors
                        .with_label_values(&[self.chain.as_str(), e.error_type()])
                        .inc();
                    if !self.pause_with(&mut backoff).await {
                        return Flow::Stop;
                    }
                }
            }
        }
    }

    async fn run(self, mut source: Box<dyn ChainSource>) {
        let Some(cursor) = self.load_cursor().await else {
            return;
        };
        info!(
            "[{}] Starting indexer from {}",
            self.tag(),
            cursor
                .as_ref()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "the configured start".into())
        );
        if let Flow::Stop = self.start_source(source.as_mut(), cursor.clone()).await {
            *self.state.write().await = IndexerState::Stopped;
            return;
        }

        let mut last_saved = cursor;
        let mut backoff = self.retry.backoff();
        'indexing: loop {
            let batch = tokio::select! {
                _ = self.cancel.cancelled() => break,
                batch = source.next_batch() => batch,
            };
            match batch {
                Ok(batch) => {
                    backoff.reset();
                    for event in &batch.events {
                        if self.cancel.is_cancelled() {
                            break 'indexing;
                        }
                        if let Flow::Stop = self.apply(event).await {
                            break 'indexing;
                        }
                        if let Flow::Stop = self.save_cursor(&event.meta.cursor).await {
                            break 'indexing;
                        }
                        last_saved = Some(event.meta.cursor.clone());
                    }
                    if let Some(cursor) = batch.cursor {
                        if last_saved.as_ref() != Some(&cursor) {
                            if let Flow::Stop = self.save_cursor(&cursor).await {
                                break;
                            }
                            last_saved = Some(cursor);
                        }
                    }
                }
                Err(e) if e.is_recoverable() => {
                    warn!("[{}] Source error, retrying: {}", self.tag(), e);
                    self.metrics
                        .source_errors
                        .with_label_values(&[self.chain.as_str(), e.error_type()])
                        .inc();
                    if !self.pause_with(&mut backoff).await {
                        break;
                    }
                }
                Err(SourceError::CursorLost(reason)) => {
                    warn!("[{}] Cursor lost while indexing: {}", self.tag(), reason);
                    self.metrics
                        .source_restarts
                        .with_label_values(&[self.chain.as_str(), "cursor_lost"])
                        .inc();
                    if let Err(e) = self.store.clear_cursor(self.task_name).await {
                        warn!("[{}] Failed to clear cursor: {}", self.tag(), e);
                    }
                    last_saved = None;
                    if let Flow::Stop = self.start_source(source.as_mut(), None).await {
                        break;
                    }
                }
                Err(SourceError::StreamClosed) => {
                    warn!("[{}] Event stream closed, resubscribing", self.tag());
                    self.metrics
                        .source_restarts
                        .with_label_values(&[self.chain.as_str(), "stream_closed"])
                        .inc();
                    if !self.pause_with(&mut backoff).await {
                        break;
                    }
                    if let Flow::Stop = self.start_source(source.as_mut(), last_saved.clone()).await {
                        break;
                    }
                }
                Err(e) => {
                    error!("[{}] Unrecoverable source error, stopping: {}", self.tag(), e);
                    self.metrics
                        .source_errors
                        .with_label_values(&[self.chain.as_str(), e.error_type()])
                        .inc();
                    break;
                }
            }
        }
        *self.state.write().await = IndexerState::Stopped;
        info!("[{}] Indexer task exited", self.tag());
    }
}
