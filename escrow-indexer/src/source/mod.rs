// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Chain event sources.
//!
//! A source yields decoded events in chain order and resumes strictly after
//! an opaque cursor. The EVM source polls; the Sui source subscribes and
//! backfills.

pub mod evm;
pub mod sui;

use crate::events::IndexedEvent;
use async_trait::async_trait;
use escrow_contracts::sui::EventId;
use escrow_types::ChainKind;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

pub use evm::{EthersLogFetcher, EvmLogFetcher, EvmPoller, EvmPollerConfig};
pub use sui::{SuiEventProvider, SuiRpcClient, SuiSubscriber, SuiSubscriberConfig};

/// Position of the last processed event
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum ChainCursor {
    Evm { block: u64, log_index: u64 },
    Sui(EventId),
}

impl ChainCursor {
    pub fn chain(&self) -> ChainKind {
        match self {
            ChainCursor::Evm { .. } => ChainKind::Evm,
            ChainCursor::Sui(_) => ChainKind::Sui,
        }
    }
}

/// Stored form: `evm:<block>:<log_index>` or `sui:<digest>:<seq>`
impl fmt::Display for ChainCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainCursor::Evm { block, log_index } => write!(f, "evm:{}:{}", block, log_index),
            ChainCursor::Sui(id) => write!(f, "sui:{}:{}", id.tx_digest, id.event_seq),
        }
    }
}

impl FromStr for ChainCursor {
    type Err = SourceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || SourceError::Decode(format!("malformed cursor '{}'", s));
        let (chain, rest) = s.split_once(':').ok_or_else(bad)?;
        let (left, right) = rest.rsplit_once(':').ok_or_else(bad)?;
        let right: u64 = right.parse().map_err(|_| bad())?;
        match chain {
            "evm" => Ok(ChainCursor::Evm {
                block: left.parse().map_err(|_| bad())?,
                log_index: right,
            }),
            "sui" if !left.is_empty() => Ok(ChainCursor::Sui(EventId::new(left, right))),
            _ => Err(bad()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    #[error("rpc error: {0}")]
    Rpc(String),
    #[error("failed to decode event: {0}")]
    Decode(String),
    #[error("cursor lost: {0}")]
    CursorLost(String),
    #[error("event stream closed")]
    StreamClosed,
    #[error("invalid source config: {0}")]
    Config(String),
}

impl SourceError {
    /// Recoverable errors are retried in place; the rest need a restart of
    /// the source or stop the indexer
    pub fn is_recoverable(&self) -> bool {
        matches!(self, SourceError::Rpc(_) | SourceError::Decode(_))
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            SourceError::Rpc(_) => "rpc",
            SourceError::Decode(_) => "decode",
            SourceError::CursorLost(_) => "cursor_lost",
            SourceError::StreamClosed => "stream_closed",
            SourceError::Config(_) => "config",
        }
    }
}

/// Indexer lifecycle as reported on `/health`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexerState {
    Stopped,
    Polling,
    Subscribed,
}

impl IndexerState {
    pub fn is_running(&self) -> bool {
        !matches!(self, IndexerState::Stopped)
    }
}

/// Events found since the last batch. `cursor` advances past events that
/// did not decode to an escrow event as well.
#[derive(Debug, Clone, Default)]
pub struct SourceBatch {
    pub events: Vec<IndexedEvent>,
    pub cursor: Option<ChainCursor>,
}

#[async_trait]
pub trait ChainSource: Send {
    fn chain(&self) -> ChainKind;

    /// The running state this source puts its indexer in
    fn mode(&self) -> IndexerState;

    /// Positions the source strictly after `cursor`, or at its configured
    /// start when `None`. Fails with `CursorLost` when the cursor no longer
    /// exists on chain.
    async fn start(&mut self, cursor: Option<ChainCursor>) -> Result<(), SourceError>;

    /// Waits for and returns the next events in chain order
    async fn next_batch(&mut self) -> Result<SourceBatch, SourceError>;
}
