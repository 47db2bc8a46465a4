// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Applies decoded chain events to the mirror.
//!
//! Every write is conditional on the current mirror state, so replaying an
//! event, or a stale event arriving after a newer one, changes nothing and
//! publishes nothing. Events whose parent row is unknown are logged and
//! skipped; only an unavailable store is reported back to the caller.

use crate::events::{DomainEvent, EventMeta, IndexedEvent};
use crate::metrics::IndexerMetrics;
use crate::notify::{Notifier, Topic};
use escrow_schema::{
    BridgeTransferRecord, BridgeTransition, DisputeRecord, EscrowRecord, EscrowUpsert,
    MilestoneRecord, MilestoneUpdate, MirrorStore, StoreError, StoreResult,
};
use escrow_types::{ChainKind, EscrowStatus, MilestoneStatus, TransferId};
use ethers::types::U256;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The escrow or transfer the event refers to is not mirrored
    MissingParent,
    /// The emitted transfer ID does not match the chain's derivation
    TransferIdMismatch,
    /// The event contradicts the mirror in a way no replay can fix
    Conflict,
    Invalid,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::MissingParent => "missing_parent",
            SkipReason::TransferIdMismatch => "transfer_id_mismatch",
            SkipReason::Conflict => "conflict",
            SkipReason::Invalid => "invalid",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    Duplicate,
    Skipped(SkipReason),
}

impl ApplyOutcome {
    fn from_changed(changed: bool) -> Self {
        if changed {
            ApplyOutcome::Applied
        } else {
            ApplyOutcome::Duplicate
        }
    }
}

pub struct ReconciliationEngine {
    store: Arc<dyn MirrorStore>,
    notifier: Arc<dyn Notifier>,
    metrics: Arc<IndexerMetrics>,
}

fn escrow_topics(row: &EscrowRecord) -> Vec<Topic> {
    let mut topics = vec![Topic::Escrow(row.id), Topic::User(row.client.clone())];
    if let Some(freelancer) = &row.freelancer {
        topics.push(Topic::User(freelancer.clone()));
    }
    topics
}

fn with_disputes(mut topics: Vec<Topic>) -> Vec<Topic> {
    topics.push(Topic::Disputes);
    topics
}

/// Recomputes the ID the source chain derives for a transfer
fn expected_transfer_id(
    chain: ChainKind,
    recipient: &str,
    amount: u128,
    timestamp: u64,
    nonce: u64,
) -> Option<TransferId> {
    match chain {
        ChainKind::Evm => Some(TransferId::evm(recipient, U256::from(amount), timestamp, nonce)),
        ChainKind::Sui => u64::try_from(amount)
            .ok()
            .map(|amount| TransferId::sui(recipient, amount, timestamp, nonce)),
    }
}

impl ReconciliationEngine {
    pub fn new(
        store: Arc<dyn MirrorStore>,
        notifier: Arc<dyn Notifier>,
        metrics: Arc<IndexerMetrics>,
    ) -> Self {
        Self {
            store,
            notifier,
            metrics,
        }
    }

    /// Applies one event. `Err` only for a retryable store failure; the
    /// caller retries the same event.
    pub async fn apply(&self, event: &IndexedEvent) -> Result<ApplyOutcome, StoreError> {
        let chain = event.chain();
        let kind = event.event.kind();
        let outcome = match self.apply_event(&event.meta, &event.event).await {
            Ok(outcome) => outcome,
            Err(e) if e.is_retryable() => return Err(e),
            Err(e) => {
                warn!(
                    "[Reconcile] Skipping {} from {} tx {}: {}",
                    kind.name(),
                    chain.as_str(),
                    event.meta.tx_hash,
                    e
                );
                ApplyOutcome::Skipped(SkipReason::Conflict)
            }
        };
        self.metrics.record_outcome(chain, kind, &outcome);
        if outcome == ApplyOutcome::Applied {
            self.metrics
                .last_event_timestamp_ms
                .with_label_values(&[chain.as_str()])
                .set(event.meta.timestamp_ms as i64);
        }
        Ok(outcome)
    }

    fn publish(&self, topics: &[Topic], event: &str, payload: Value) {
        for topic in topics {
            self.notifier.publish(topic, event, payload.clone());
            self.metrics
                .notifications_published
                .with_label_values(&[topic.label()])
                .inc();
        }
    }

    async fn parent(&self, meta: &EventMeta, escrow_id: &str) -> StoreResult<Option<EscrowRecord>> {
        let row = self.store.find_by_chain_id(meta.chain, escrow_id).await?;
        if row.is_none() {
            warn!(
                "[Reconcile] No mirrored escrow {} on {} (tx {}), skipping",
                escrow_id,
                meta.chain.as_str(),
                meta.tx_hash
            );
        }
        Ok(row)
    }

    async fn apply_event(&self, meta: &EventMeta, event: &DomainEvent) -> StoreResult<ApplyOutcome> {
        match event {
            DomainEvent::EscrowCreated {
                escrow_id,
                client,
                freelancer,
                total_amount,
                milestone_amounts,
                cross_chain_recipient,
                token_symbol,
                title,
            } => {
                let sum = milestone_amounts
                    .iter()
                    .try_fold(0u128, |acc, amount| acc.checked_add(*amount));
                if sum != Some(*total_amount) {
                    warn!(
                        "[Reconcile] Escrow {} milestones do not add up to {}",
                        escrow_id, total_amount
                    );
                    return Ok(ApplyOutcome::Skipped(SkipReason::Invalid));
                }
                let milestones = milestone_amounts
                    .iter()
                    .enumerate()
                    .map(|(i, amount)| MilestoneRecord::new(i as u32, "", *amount))
                    .collect();
                let mut record =
                    EscrowRecord::pending(meta.chain, &meta.tx_hash, client, milestones, meta.timestamp_ms);
                record.chain_escrow_id = Some(escrow_id.clone());
                record.freelancer = Some(freelancer.clone());
                record.title = title.clone();
                record.token_symbol = token_symbol.clone();
                record.is_cross_chain = cross_chain_recipient.is_some();
                record.cross_chain_recipient = cross_chain_recipient.clone();

                let (upsert, row) = self.store.upsert_escrow_by_creation_tx(record).await?;
                if !upsert.changed() {
                    return Ok(ApplyOutcome::Duplicate);
                }
                if let EscrowUpsert::Pinned(id) = upsert {
                    info!(
                        "[Reconcile] Pinned escrow {} to {} id {}",
                        id,
                        meta.chain.as_str(),
                        escrow_id
                    );
                }
                self.publish(
                    &escrow_topics(&row),
                    "escrow_created",
                    json!({
                        "escrow_id": row.id,
                        "chain": meta.chain.as_str(),
                        "chain_escrow_id": escrow_id,
                        "total_amount": total_amount.to_string(),
                    }),
                );
                Ok(ApplyOutcome::Applied)
            }
            DomainEvent::MilestoneStarted { escrow_id, index } => {
                let update = MilestoneUpdate::new(MilestoneStatus::InProgress, meta.timestamp_ms);
                self.advance(meta, escrow_id, *index, update, "milestone_started", json!({}))
                    .await
            }
            DomainEvent::MilestoneSubmitted {
                escrow_id,
                index,
                note,
            } => {
                let update = MilestoneUpdate::new(MilestoneStatus::Submitted, meta.timestamp_ms)
                    .with_note(note.clone());
                self.advance(
                    meta,
                    escrow_id,
                    *index,
                    update,
                    "milestone_submitted",
                    json!({ "note": note }),
                )
                .await
            }
            DomainEvent::MilestoneApproved { escrow_id, index } => {
                let update = MilestoneUpdate::new(MilestoneStatus::Approved, meta.timestamp_ms);
                self.advance(meta, escrow_id, *index, update, "milestone_approved", json!({}))
                    .await
            }
            DomainEvent::MilestoneReleased {
                escrow_id,
                index,
                recipient_amount,
                fee,
                bridge_transfer_id,
            } => {
                let update = MilestoneUpdate::new(MilestoneStatus::Released, meta.timestamp_ms)
                    .with_tx_hash(meta.tx_hash.clone())
                    .with_bridge_transfer(*bridge_transfer_id);
                let payload = json!({
                    "recipient_amount": recipient_amount.to_string(),
                    "fee": fee.to_string(),
                    "bridge_transfer_id": bridge_transfer_id.map(|id| id.to_string()),
                });
                let outcome = self
                    .advance(meta, escrow_id, *index, update, "milestone_released", payload)
                    .await?;
                if let Some(transfer_id) = bridge_transfer_id {
                    // The transfer may have been mirrored first.
                    if let Some(row) = self.store.find_by_chain_id(meta.chain, escrow_id).await? {
                        if self.store.get_bridge_transfer(transfer_id).await?.is_some()
                            && self
                                .store
                                .link_bridge_transfer(transfer_id, row.id, *index)
                                .await?
                        {
                            debug!(
                                "[Reconcile] Linked transfer {} to escrow {} milestone {}",
                                transfer_id, row.id, index
                            );
                        }
                    }
                }
                Ok(outcome)
            }
            DomainEvent::MilestoneRefunded {
                escrow_id,
                index,
                amount,
            } => {
                let update = MilestoneUpdate::new(MilestoneStatus::Refunded, meta.timestamp_ms)
                    .with_tx_hash(meta.tx_hash.clone());
                self.advance(
                    meta,
                    escrow_id,
                    *index,
                    update,
                    "milestone_refunded",
                    json!({ "amount": amount.to_string() }),
                )
                .await
            }
            DomainEvent::DisputeInitiated {
                escrow_id,
                initiator,
                index,
                reason,
            } => {
                let Some(row) = self.parent(meta, escrow_id).await? else {
                    return Ok(ApplyOutcome::Skipped(SkipReason::MissingParent));
                };
                if row.milestone(*index).is_none() {
                    return Ok(ApplyOutcome::Skipped(SkipReason::Invalid));
                }
                let dispute = DisputeRecord::open(initiator, *index, reason, meta.timestamp_ms);
                let changed = self.store.open_dispute(row.id, dispute).await?;
                if changed {
                    self.publish(
                        &with_disputes(escrow_topics(&row)),
                        "dispute_initiated",
                        json!({
                            "escrow_id": row.id,
                            "milestone_index": index,
                            "initiator": initiator,
                            "reason": reason,
                        }),
                    );
                }
                Ok(ApplyOutcome::from_changed(changed))
            }
            DomainEvent::DisputeVoteCast {
                escrow_id,
                arbiter,
                index,
                vote_for_client,
                votes_for_client,
                votes_for_freelancer,
            } => {
                let Some(row) = self.parent(meta, escrow_id).await? else {
                    return Ok(ApplyOutcome::Skipped(SkipReason::MissingParent));
                };
                let changed = self
                    .store
                    .record_dispute_vote(
                        row.id,
                        *index,
                        arbiter,
                        *votes_for_client,
                        *votes_for_freelancer,
                    )
                    .await?;
                if changed {
                    self.publish(
                        &[Topic::Escrow(row.id), Topic::Disputes],
                        "dispute_vote_cast",
                        json!({
                            "escrow_id": row.id,
                            "milestone_index": index,
                            "arbiter": arbiter,
                            "vote_for_client": vote_for_client,
                            "votes_for_client": votes_for_client,
                            "votes_for_freelancer": votes_for_freelancer,
                        }),
                    );
                }
                Ok(ApplyOutcome::from_changed(changed))
            }
            DomainEvent::DisputeResolved {
                escrow_id,
                index,
                outcome,
                votes_for_client,
                votes_for_freelancer,
            } => {
                let Some(row) = self.parent(meta, escrow_id).await? else {
                    return Ok(ApplyOutcome::Skipped(SkipReason::MissingParent));
                };
                let changed = self
                    .store
                    .resolve_dispute(row.id, *index, *outcome, meta.timestamp_ms)
                    .await?;
                if changed {
                    self.publish(
                        &with_disputes(escrow_topics(&row)),
                        "dispute_resolved",
                        json!({
                            "escrow_id": row.id,
                            "milestone_index": index,
                            "outcome": outcome,
                            "votes_for_client": votes_for_client,
                            "votes_for_freelancer": votes_for_freelancer,
                        }),
                    );
                }
                Ok(ApplyOutcome::from_changed(changed))
            }
            DomainEvent::EscrowCompleted { escrow_id } => {
                self.close(meta, escrow_id, EscrowStatus::Completed, "escrow_completed", json!({}))
                    .await
            }
            DomainEvent::EscrowCancelled {
                escrow_id,
                refund_amount,
            } => {
                self.close(
                    meta,
                    escrow_id,
                    EscrowStatus::Cancelled,
                    "escrow_cancelled",
                    json!({ "refund_amount": refund_amount.to_string() }),
                )
                .await
            }
            DomainEvent::EscrowRefunded { escrow_id, amount } => {
                self.close(
                    meta,
                    escrow_id,
                    EscrowStatus::Refunded,
                    "escrow_refunded",
                    json!({ "amount": amount.to_string() }),
                )
                .await
            }
            DomainEvent::BridgeTransferInitiated {
                transfer_id,
                sender,
                recipient,
                amount,
                timestamp,
                nonce,
            } => {
                let expected = expected_transfer_id(meta.chain, recipient, *amount, *timestamp, *nonce);
                if expected.as_ref() != Some(transfer_id) {
                    warn!(
                        "[Reconcile] Transfer {} on {} does not match its derived ID {:?}",
                        transfer_id,
                        meta.chain.as_str(),
                        expected
                    );
                    return Ok(ApplyOutcome::Skipped(SkipReason::TransferIdMismatch));
                }
                let mut record = BridgeTransferRecord::initiated(
                    *transfer_id,
                    meta.chain,
                    sender,
                    recipient,
                    *amount,
                    meta.chain.timestamp_to_ms(*timestamp),
                );
                record.source_tx_hash = Some(meta.tx_hash.clone());
                // The release may have been mirrored first.
                let release = self.store.find_escrow_by_bridge_transfer(transfer_id).await?;
                if let Some((escrow, index)) = release {
                    record.escrow_id = Some(escrow);
                    record.milestone_index = Some(index);
                }
                if !self.store.upsert_bridge_transfer(record).await? {
                    return Ok(ApplyOutcome::Duplicate);
                }
                let mut topics = vec![Topic::Bridge, Topic::User(sender.clone())];
                if let Some((escrow, _)) = release {
                    topics.push(Topic::Escrow(escrow));
                }
                self.publish(
                    &topics,
                    "bridge_transfer_initiated",
                    json!({
                        "transfer_id": transfer_id,
                        "source_chain": meta.chain.as_str(),
                        "recipient": recipient,
                        "amount": amount.to_string(),
                    }),
                );
                Ok(ApplyOutcome::Applied)
            }
            DomainEvent::BridgeTransferConfirmed {
                transfer_id,
                relayer,
                confirmations,
            } => {
                let Some(transfer) = self.transfer(meta, transfer_id).await? else {
                    return Ok(ApplyOutcome::Skipped(SkipReason::MissingParent));
                };
                let changed = self
                    .store
                    .confirm_bridge_transfer(transfer_id, relayer, *confirmations)
                    .await?;
                if changed {
                    self.publish(
                        &Self::transfer_topics(&transfer),
                        "bridge_transfer_confirmed",
                        json!({
                            "transfer_id": transfer_id,
                            "relayer": relayer,
                            "confirmations": confirmations,
                        }),
                    );
                }
                Ok(ApplyOutcome::from_changed(changed))
            }
            DomainEvent::BridgeTransferExecuted {
                transfer_id,
                recipient,
                amount,
            } => {
                let transition = BridgeTransition::Completed {
                    at_ms: meta.timestamp_ms,
                    tx_hash: Some(meta.tx_hash.clone()),
                };
                self.transition(
                    meta,
                    transfer_id,
                    transition,
                    "bridge_transfer_executed",
                    json!({ "transfer_id": transfer_id, "recipient": recipient, "amount": amount.to_string() }),
                )
                .await
            }
            DomainEvent::BridgeTransferRefunded {
                transfer_id,
                sender,
                amount,
            } => {
                let transition = BridgeTransition::Refunded {
                    at_ms: meta.timestamp_ms,
                };
                self.transition(
                    meta,
                    transfer_id,
                    transition,
                    "bridge_transfer_refunded",
                    json!({ "transfer_id": transfer_id, "sender": sender, "amount": amount.to_string() }),
                )
                .await
            }
            DomainEvent::BridgeTransferFailed {
                transfer_id,
                reason,
            } => {
                let transition = BridgeTransition::Failed {
                    reason: reason.clone(),
                };
                self.transition(
                    meta,
                    transfer_id,
                    transition,
                    "bridge_transfer_failed",
                    json!({ "transfer_id": transfer_id, "reason": reason }),
                )
                .await
            }
        }
    }

    async fn advance(
        &self,
        meta: &EventMeta,
        escrow_id: &str,
        index: u32,
        update: MilestoneUpdate,
        name: &str,
        mut payload: Value,
    ) -> StoreResult<ApplyOutcome> {
        let Some(row) = self.parent(meta, escrow_id).await? else {
            return Ok(ApplyOutcome::Skipped(SkipReason::MissingParent));
        };
        if row.milestone(index).is_none() {
            warn!(
                "[Reconcile] Escrow {} has no milestone {}, skipping {}",
                row.id, index, name
            );
            return Ok(ApplyOutcome::Skipped(SkipReason::Invalid));
        }
        let status = update.status;
        let Some(updated) = self.store.advance_milestone(row.id, index, update).await? else {
            return Ok(ApplyOutcome::Duplicate);
        };
        if let Value::Object(map) = &mut payload {
            map.insert("escrow_id".into(), json!(updated.id));
            map.insert("milestone_index".into(), json!(index));
            map.insert("status".into(), json!(status.as_str()));
            map.insert("balance".into(), json!(updated.balance.to_string()));
        }
        self.publish(&escrow_topics(&updated), name, payload);
        Ok(ApplyOutcome::Applied)
    }

    async fn close(
        &self,
        meta: &EventMeta,
        escrow_id: &str,
        status: EscrowStatus,
        name: &str,
        mut payload: Value,
    ) -> StoreResult<ApplyOutcome> {
        let Some(row) = self.parent(meta, escrow_id).await? else {
            return Ok(ApplyOutcome::Skipped(SkipReason::MissingParent));
        };
        let Some(updated) = self
            .store
            .update_escrow_status_if(row.id, status, meta.timestamp_ms)
            .await?
        else {
            return Ok(ApplyOutcome::Duplicate);
        };
        if let Value::Object(map) = &mut payload {
            map.insert("escrow_id".into(), json!(updated.id));
            map.insert("status".into(), json!(status.as_str()));
            map.insert("balance".into(), json!(updated.balance.to_string()));
        }
        self.publish(&escrow_topics(&updated), name, payload);
        Ok(ApplyOutcome::Applied)
    }

    async fn transfer(
        &self,
        meta: &EventMeta,
        transfer_id: &TransferId,
    ) -> StoreResult<Option<BridgeTransferRecord>> {
        let transfer = self.store.get_bridge_transfer(transfer_id).await?;
        if transfer.is_none() {
            warn!(
                "[Reconcile] Unknown bridge transfer {} (tx {}), skipping",
                transfer_id, meta.tx_hash
            );
        }
        Ok(transfer)
    }

    fn transfer_topics(transfer: &BridgeTransferRecord) -> Vec<Topic> {
        let mut topics = vec![Topic::Bridge, Topic::User(transfer.sender.clone())];
        if let Some(escrow) = transfer.escrow_id {
            topics.push(Topic::Escrow(escrow));
        }
        topics
    }

    async fn transition(
        &self,
        meta: &EventMeta,
        transfer_id: &TransferId,
        transition: BridgeTransition,
        name: &str,
        payload: Value,
    ) -> StoreResult<ApplyOutcome> {
        let Some(transfer) = self.transfer(meta, transfer_id).await? else {
            return Ok(ApplyOutcome::Skipped(SkipReason::MissingParent));
        };
        let changed = self
            .store
            .transition_bridge_transfer(transfer_id, transition)
            .await?;
        if changed {
            self.publish(&Self::transfer_topics(&transfer), name, payload);
        }
        Ok(ApplyOutcome::from_changed(changed))
    }
}
