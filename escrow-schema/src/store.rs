// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Mirror store interface.
//!
//! Every mutating call is a single conditional read-modify-write: it checks
//! the current row and either applies the change or reports that nothing
//! changed. Callers never read a row, await, and then write it back.

use crate::models::{BridgeTransferRecord, DisputeRecord, EscrowRecord};
use async_trait::async_trait;
use escrow_types::{ChainKind, DisputeOutcome, EscrowStatus, MilestoneStatus, TransferId};
use uuid::Uuid;

/// Progress task names, one cursor per chain source
pub const EVM_INDEXER_TASK: &str = "evm_indexer_cursor";
pub const SUI_INDEXER_TASK: &str = "sui_indexer_cursor";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("conflicting record: {0}")]
    Conflict(String),
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// Connectivity failures are retried; everything else skips the event
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            StoreError::Unavailable(_) => "store_unavailable",
            StoreError::Conflict(_) => "store_conflict",
            StoreError::Corrupt(_) => "store_corrupt",
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Result of matching an on-chain escrow against the mirror
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscrowUpsert {
    /// No row matched; a new one was created
    Inserted(Uuid),
    /// A pending row matched by creation tx; its chain ID is now pinned
    Pinned(Uuid),
    /// Already pinned to this chain ID
    Unchanged(Uuid),
}

impl EscrowUpsert {
    pub fn id(&self) -> Uuid {
        match self {
            EscrowUpsert::Inserted(id) | EscrowUpsert::Pinned(id) | EscrowUpsert::Unchanged(id) => {
                *id
            }
        }
    }

    pub fn changed(&self) -> bool {
        !matches!(self, EscrowUpsert::Unchanged(_))
    }
}

/// Forward move of one milestone
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MilestoneUpdate {
    pub status: MilestoneStatus,
    pub at_ms: u64,
    pub note: Option<String>,
    pub tx_hash: Option<String>,
    pub bridge_transfer_id: Option<TransferId>,
}

impl MilestoneUpdate {
    pub fn new(status: MilestoneStatus, at_ms: u64) -> Self {
        Self {
            status,
            at_ms,
            note: None,
            tx_hash: None,
            bridge_transfer_id: None,
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn with_tx_hash(mut self, tx_hash: impl Into<String>) -> Self {
        self.tx_hash = Some(tx_hash.into());
        self
    }

    pub fn with_bridge_transfer(mut self, id: Option<TransferId>) -> Self {
        self.bridge_transfer_id = id;
        self
    }
}

/// Terminal moves of a bridge transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeTransition {
    Completed { at_ms: u64, tx_hash: Option<String> },
    Refunded { at_ms: u64 },
    Failed { reason: String },
}

#[async_trait]
pub trait MirrorStore: Send + Sync {
    /// Inserts a row created ahead of the chain (API path)
    async fn insert_escrow(&self, record: EscrowRecord) -> StoreResult<Uuid>;

    /// Matches by creation tx hash, then by chain ID; inserts `record` when
    /// neither matches. `record.chain_escrow_id` must be set. Returns the
    /// row as stored after the write.
    async fn upsert_escrow_by_creation_tx(
        &self,
        record: EscrowRecord,
    ) -> StoreResult<(EscrowUpsert, EscrowRecord)>;

    async fn get_escrow(&self, id: Uuid) -> StoreResult<Option<EscrowRecord>>;

    async fn find_by_tx_hash(&self, chain: ChainKind, tx_hash: &str) -> StoreResult<Option<EscrowRecord>>;

    async fn find_by_chain_id(
        &self,
        chain: ChainKind,
        chain_escrow_id: &str,
    ) -> StoreResult<Option<EscrowRecord>>;

    /// Applies the update only if it moves the milestone forward. Releases
    /// and refunds take the milestone amount off the balance. Returns the
    /// updated row when something changed.
    async fn advance_milestone(
        &self,
        id: Uuid,
        index: u32,
        update: MilestoneUpdate,
    ) -> StoreResult<Option<EscrowRecord>>;

    /// Moves a non-terminal escrow to `next`. Cancelled and refunded escrows
    /// have their balance zeroed in the same write. Returns the updated row,
    /// or `None` when already there or terminal.
    async fn update_escrow_status_if(
        &self,
        id: Uuid,
        next: EscrowStatus,
        at_ms: u64,
    ) -> StoreResult<Option<EscrowRecord>>;

    /// Opens a dispute unless one is open or this milestone was disputed
    /// before; marks the escrow `Disputed`
    async fn open_dispute(&self, id: Uuid, dispute: DisputeRecord) -> StoreResult<bool>;

    /// Records a vote with the on-chain tally; false for a repeat voter or
    /// when the dispute on `milestone_index` is not the open one
    async fn record_dispute_vote(
        &self,
        id: Uuid,
        milestone_index: u32,
        voter: &str,
        votes_for_client: u32,
        votes_for_freelancer: u32,
    ) -> StoreResult<bool>;

    /// Latches the outcome of the open dispute on `milestone_index` and
    /// returns a disputed escrow to `Active`
    async fn resolve_dispute(
        &self,
        id: Uuid,
        milestone_index: u32,
        outcome: DisputeOutcome,
        at_ms: u64,
    ) -> StoreResult<bool>;

    /// Inserts the transfer if unknown; false if it already exists
    async fn upsert_bridge_transfer(&self, record: BridgeTransferRecord) -> StoreResult<bool>;

    async fn get_bridge_transfer(&self, id: &TransferId) -> StoreResult<Option<BridgeTransferRecord>>;

    /// Adds a relayer confirmation while the transfer still accepts them
    async fn confirm_bridge_transfer(
        &self,
        id: &TransferId,
        relayer: &str,
        confirmations: u32,
    ) -> StoreResult<bool>;

    async fn transition_bridge_transfer(
        &self,
        id: &TransferId,
        transition: BridgeTransition,
    ) -> StoreResult<bool>;

    /// Points a transfer at the milestone release that opened it
    async fn link_bridge_transfer(&self, id: &TransferId, escrow: Uuid, milestone: u32) -> StoreResult<bool>;

    /// The escrow milestone that references `id`, if any
    async fn find_escrow_by_bridge_transfer(&self, id: &TransferId) -> StoreResult<Option<(Uuid, u32)>>;

    async fn load_cursor(&self, task: &str) -> StoreResult<Option<String>>;

    async fn save_cursor(&self, task: &str, cursor: &str) -> StoreResult<()>;

    async fn clear_cursor(&self, task: &str) -> StoreResult<()>;
}
