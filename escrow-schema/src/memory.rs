// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! In-memory `MirrorStore`. One write lock per call keeps every conditional
//! update atomic.

use crate::models::{BridgeTransferRecord, DisputeRecord, EscrowRecord};
use crate::store::{
    BridgeTransition, EscrowUpsert, MilestoneUpdate, MirrorStore, StoreError, StoreResult,
};
use async_trait::async_trait;
use escrow_types::{
    BridgeTransferStatus, ChainKind, DisputeOutcome, EscrowStatus, MilestoneStatus, TransferId,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    escrows: HashMap<Uuid, EscrowRecord>,
    by_tx: HashMap<(ChainKind, String), Uuid>,
    by_chain_id: HashMap<(ChainKind, String), Uuid>,
    transfers: HashMap<TransferId, BridgeTransferRecord>,
    progress: HashMap<String, String>,
}

impl Tables {
    fn index(&mut self, record: &EscrowRecord) {
        if let Some(tx) = &record.creation_tx_hash {
            self.by_tx.insert((record.chain, tx.clone()), record.id);
        }
        if let Some(chain_id) = &record.chain_escrow_id {
            self.by_chain_id
                .insert((record.chain, chain_id.clone()), record.id);
        }
    }
}

#[derive(Default)]
pub struct InMemoryMirrorStore {
    tables: RwLock<Tables>,
    unavailable: AtomicBool,
    calls_before_outage: Mutex<Option<usize>>,
}

impl InMemoryMirrorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates a lost connection: every call fails with `Unavailable`
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Lets the next `calls` succeed, then behaves like
    /// `set_unavailable(true)`
    pub fn set_unavailable_after(&self, calls: usize) {
        *self
            .calls_before_outage
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(calls);
    }

    fn check(&self) -> StoreResult<()> {
        let mut budget = self
            .calls_before_outage
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        let exhausted = match budget.as_mut() {
            Some(0) => true,
            Some(left) => {
                *left -= 1;
                false
            }
            None => false,
        };
        if exhausted {
            *budget = None;
            self.set_unavailable(true);
        }
        drop(budget);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("connection refused".into()));
        }
        Ok(())
    }

    pub async fn escrows(&self) -> Vec<EscrowRecord> {
        let mut rows: Vec<_> = self.tables.read().await.escrows.values().cloned().collect();
        rows.sort_by_key(|r| (r.created_at_ms, r.id));
        rows
    }

    pub async fn bridge_transfers(&self) -> Vec<BridgeTransferRecord> {
        let mut rows: Vec<_> = self
            .tables
            .read()
            .await
            .transfers
            .values()
            .cloned()
            .collect();
        rows.sort_by_key(|r| (r.initiated_at_ms, r.transfer_id));
        rows
    }
}

#[async_trait]
impl MirrorStore for InMemoryMirrorStore {
    async fn insert_escrow(&self, record: EscrowRecord) -> StoreResult<Uuid> {
        self.check()?;
        let mut tables = self.tables.write().await;
        if tables.escrows.contains_key(&record.id) {
            return Err(StoreError::Conflict(format!("escrow {} exists", record.id)));
        }
        if let Some(tx) = &record.creation_tx_hash {
            if tables.by_tx.contains_key(&(record.chain, tx.clone())) {
                return Err(StoreError::Conflict(format!("creation tx {} already mapped", tx)));
            }
        }
        let id = record.id;
        tables.index(&record);
        tables.escrows.insert(id, record);
        Ok(id)
    }

    async fn upsert_escrow_by_creation_tx(
        &self,
        record: EscrowRecord,
    ) -> StoreResult<(EscrowUpsert, EscrowRecord)> {
        self.check()?;
        let chain_id = record
            .chain_escrow_id
            .clone()
            .ok_or_else(|| StoreError::Corrupt("upsert without chain escrow id".into()))?;
        let mut tables = self.tables.write().await;

        if let Some(existing) = tables.by_chain_id.get(&(record.chain, chain_id.clone())) {
            let row = tables
                .escrows
                .get(existing)
                .cloned()
                .ok_or_else(|| StoreError::Corrupt(format!("index points at missing escrow {}", existing)))?;
            return Ok((EscrowUpsert::Unchanged(row.id), row));
        }

        let by_tx = record
            .creation_tx_hash
            .as_ref()
            .and_then(|tx| tables.by_tx.get(&(record.chain, tx.clone())).copied());
        if let Some(id) = by_tx {
            let row = tables
                .escrows
                .get_mut(&id)
                .ok_or_else(|| StoreError::Corrupt(format!("index points at missing escrow {}", id)))?;
            if let Some(pinned) = &row.chain_escrow_id {
                return Err(StoreError::Conflict(format!(
                    "escrow {} already pinned to {}, not {}",
                    id, pinned, chain_id
                )));
            }
            row.chain_escrow_id = Some(chain_id.clone());
            if row.freelancer.is_none() {
                row.freelancer = record.freelancer.clone();
            }
            if row.title.is_empty() {
                row.title = record.title.clone();
            }
            if row.token_symbol.is_empty() {
                row.token_symbol = record.token_symbol.clone();
            }
            row.is_cross_chain = record.is_cross_chain;
            row.cross_chain_recipient = record.cross_chain_recipient.clone();
            row.total_amount = record.total_amount;
            row.balance = record.balance;
            if row.milestones.len() != record.milestones.len() {
                row.milestones = record.milestones.clone();
            }
            row.updated_at_ms = record.updated_at_ms;
            let pinned = row.clone();
            tables.by_chain_id.insert((record.chain, chain_id), id);
            debug!("[Store] Pinned escrow {}", id);
            return Ok((EscrowUpsert::Pinned(id), pinned));
        }

        let id = record.id;
        tables.index(&record);
        tables.escrows.insert(id, record.clone());
        Ok((EscrowUpsert::Inserted(id), record))
    }

    async fn get_escrow(&self, id: Uuid) -> StoreResult<Option<EscrowRecord>> {
        self.check()?;
        Ok(self.tables.read().await.escrows.get(&id).cloned())
    }

    async fn find_by_tx_hash(&self, chain: ChainKind, tx_hash: &str) -> StoreResult<Option<EscrowRecord>> {
        self.check()?;
        let tables = self.tables.read().await;
        Ok(tables
            .by_tx
            .get(&(chain, tx_hash.to_string()))
            .and_then(|id| tables.escrows.get(id))
            .cloned())
    }

    async fn find_by_chain_id(
        &self,
        chain: ChainKind,
        chain_escrow_id: &str,
    ) -> StoreResult<Option<EscrowRecord>> {
        self.check()?;
        let tables = self.tables.read().await;
        Ok(tables
            .by_chain_id
            .get(&(chain, chain_escrow_id.to_string()))
            .and_then(|id| tables.escrows.get(id))
            .cloned())
    }

    async fn advance_milestone(
        &self,
        id: Uuid,
        index: u32,
        update: MilestoneUpdate,
    ) -> StoreResult<Option<EscrowRecord>> {
        self.check()?;
        let mut tables = self.tables.write().await;
        let Some(row) = tables.escrows.get_mut(&id) else {
            return Ok(None);
        };
        let Some(milestone) = row.milestones.get_mut(index as usize) else {
            return Ok(None);
        };
        if !milestone.status.can_advance_to(update.status) {
            return Ok(None);
        }
        milestone.status = update.status;
        match update.status {
            MilestoneStatus::Submitted => {
                milestone.submitted_at_ms = Some(update.at_ms);
                if update.note.is_some() {
                    milestone.submission_note = update.note;
                }
            }
            MilestoneStatus::Approved => milestone.approved_at_ms = Some(update.at_ms),
            MilestoneStatus::Released | MilestoneStatus::Refunded => {
                if update.status == MilestoneStatus::Released {
                    milestone.released_at_ms = Some(update.at_ms);
                    milestone.release_tx_hash = update.tx_hash;
                    milestone.bridge_transfer_id = update.bridge_transfer_id;
                }
                let amount = milestone.amount;
                row.balance = row.balance.saturating_sub(amount);
            }
            _ => {}
        }
        row.updated_at_ms = row.updated_at_ms.max(update.at_ms);
        Ok(Some(row.clone()))
    }

    async fn update_escrow_status_if(
        &self,
        id: Uuid,
        next: EscrowStatus,
        at_ms: u64,
    ) -> StoreResult<Option<EscrowRecord>> {
        self.check()?;
        let mut tables = self.tables.write().await;
        let Some(row) = tables.escrows.get_mut(&id) else {
            return Ok(None);
        };
        if row.status.is_terminal() || row.status == next {
            return Ok(None);
        }
        row.status = next;
        if next.is_terminal() {
            if let Some(dispute) = row.dispute.as_mut() {
                dispute.resolved = true;
            }
        }
        // everything left in the contract went back to the client
        if matches!(next, EscrowStatus::Cancelled | EscrowStatus::Refunded) {
            row.balance = 0;
        }
        row.updated_at_ms = row.updated_at_ms.max(at_ms);
        Ok(Some(row.clone()))
    }

    async fn open_dispute(&self, id: Uuid, dispute: DisputeRecord) -> StoreResult<bool> {
        self.check()?;
        let mut tables = self.tables.write().await;
        let Some(row) = tables.escrows.get_mut(&id) else {
            return Ok(false);
        };
        if row.open_dispute().is_some() || row.status.is_terminal() {
            return Ok(false);
        }
        let Some(milestone) = row.milestones.get_mut(dispute.milestone_index as usize) else {
            return Ok(false);
        };
        if !milestone.status.can_advance_to(MilestoneStatus::Disputed) {
            return Ok(false);
        }
        milestone.status = MilestoneStatus::Disputed;
        row.status = EscrowStatus::Disputed;
        row.updated_at_ms = row.updated_at_ms.max(dispute.opened_at_ms);
        row.dispute = Some(dispute);
        Ok(true)
    }

    async fn record_dispute_vote(
        &self,
        id: Uuid,
        milestone_index: u32,
        voter: &str,
        votes_for_client: u32,
        votes_for_freelancer: u32,
    ) -> StoreResult<bool> {
        self.check()?;
        let mut tables = self.tables.write().await;
        let Some(dispute) = tables
            .escrows
            .get_mut(&id)
            .and_then(|row| row.dispute.as_mut())
            .filter(|d| d.milestone_index == milestone_index && !d.resolved)
        else {
            return Ok(false);
        };
        if !dispute.voters.insert(voter.to_string()) {
            return Ok(false);
        }
        // the on-chain tally is authoritative; it never goes down
        dispute.votes_for_client = dispute.votes_for_client.max(votes_for_client);
        dispute.votes_for_freelancer = dispute.votes_for_freelancer.max(votes_for_freelancer);
        Ok(true)
    }

    async fn resolve_dispute(
        &self,
        id: Uuid,
        milestone_index: u32,
        outcome: DisputeOutcome,
        at_ms: u64,
    ) -> StoreResult<bool> {
        self.check()?;
        let mut tables = self.tables.write().await;
        let Some(row) = tables.escrows.get_mut(&id) else {
            return Ok(false);
        };
        let Some(dispute) = row
            .dispute
            .as_mut()
            .filter(|d| d.milestone_index == milestone_index && !d.resolved)
        else {
            return Ok(false);
        };
        dispute.resolved = true;
        dispute.outcome = Some(outcome);
        if row.status == EscrowStatus::Disputed {
            row.status = EscrowStatus::Active;
        }
        row.updated_at_ms = row.updated_at_ms.max(at_ms);
        Ok(true)
    }

    async fn upsert_bridge_transfer(&self, record: BridgeTransferRecord) -> StoreResult<bool> {
        self.check()?;
        let mut tables = self.tables.write().await;
        if tables.transfers.contains_key(&record.transfer_id) {
            return Ok(false);
        }
        tables.transfers.insert(record.transfer_id, record);
        Ok(true)
    }

    async fn get_bridge_transfer(&self, id: &TransferId) -> StoreResult<Option<BridgeTransferRecord>> {
        self.check()?;
        Ok(self.tables.read().await.transfers.get(id).cloned())
    }

    async fn confirm_bridge_transfer(
        &self,
        id: &TransferId,
        relayer: &str,
        confirmations: u32,
    ) -> StoreResult<bool> {
        self.check()?;
        let mut tables = self.tables.write().await;
        let Some(transfer) = tables.transfers.get_mut(id) else {
            return Ok(false);
        };
        if !transfer.status.accepts_confirmations() || transfer.confirmed_by.contains(relayer) {
            return Ok(false);
        }
        transfer.confirmed_by.insert(relayer.to_string());
        transfer.confirmations = transfer
            .confirmations
            .max(confirmations)
            .max(transfer.confirmed_by.len() as u32);
        transfer.status = if transfer.confirmations >= transfer.required_confirmations {
            BridgeTransferStatus::Confirmed
        } else {
            BridgeTransferStatus::Confirming
        };
        Ok(true)
    }

    async fn transition_bridge_transfer(
        &self,
        id: &TransferId,
        transition: BridgeTransition,
    ) -> StoreResult<bool> {
        self.check()?;
        let mut tables = self.tables.write().await;
        let Some(transfer) = tables.transfers.get_mut(id) else {
            return Ok(false);
        };
        if transfer.status.is_final() {
            return Ok(false);
        }
        match transition {
            BridgeTransition::Completed { at_ms, tx_hash } => {
                if transfer.status == BridgeTransferStatus::Failed {
                    return Ok(false);
                }
                transfer.status = BridgeTransferStatus::Completed;
                transfer.completed_at_ms = Some(at_ms);
                transfer.destination_tx_hash = tx_hash;
            }
            BridgeTransition::Refunded { at_ms } => {
                transfer.status = BridgeTransferStatus::Refunded;
                transfer.completed_at_ms = Some(at_ms);
            }
            BridgeTransition::Failed { reason } => {
                if !transfer.status.accepts_confirmations() {
                    return Ok(false);
                }
                transfer.status = BridgeTransferStatus::Failed;
                transfer.failure_reason = Some(reason);
            }
        }
        Ok(true)
    }

    async fn link_bridge_transfer(&self, id: &TransferId, escrow: Uuid, milestone: u32) -> StoreResult<bool> {
        self.check()?;
        let mut tables = self.tables.write().await;
        let Some(transfer) = tables.transfers.get_mut(id) else {
            return Ok(false);
        };
        if transfer.escrow_id.is_some() {
            return Ok(false);
        }
        transfer.escrow_id = Some(escrow);
        transfer.milestone_index = Some(milestone);
        Ok(true)
    }

    async fn find_escrow_by_bridge_transfer(&self, id: &TransferId) -> StoreResult<Option<(Uuid, u32)>> {
        self.check()?;
        let tables = self.tables.read().await;
        Ok(tables.escrows.values().find_map(|row| {
            row.milestones
                .iter()
                .find(|m| m.bridge_transfer_id.as_ref() == Some(id))
                .map(|m| (row.id, m.index))
        }))
    }

    async fn load_cursor(&self, task: &str) -> StoreResult<Option<String>> {
        self.check()?;
        Ok(self.tables.read().await.progress.get(task).cloned())
    }

    async fn save_cursor(&self, task: &str, cursor: &str) -> StoreResult<()> {
        self.check()?;
        self.tables
            .write()
            .await
            .progress
            .insert(task.to_string(), cursor.to_string());
        Ok(())
    }

    async fn clear_cursor(&self, task: &str) -> StoreResult<()> {
        self.check()?;
        self.tables.write().await.progress.remove(task);
        Ok(())
    }
}
