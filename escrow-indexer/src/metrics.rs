// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::reconcile::ApplyOutcome;
use escrow_types::{ChainKind, EventKind};
use prometheus::{
    register_int_counter_vec_with_registry, register_int_gauge_vec_with_registry, IntCounterVec,
    IntGaugeVec, Registry,
};

#[derive(Clone, Debug)]
pub struct IndexerMetrics {
    pub(crate) events_applied: IntCounterVec,
    pub(crate) events_duplicate: IntCounterVec,
    pub(crate) events_skipped: IntCounterVec,
    pub(crate) store_retries: IntCounterVec,
    pub(crate) source_errors: IntCounterVec,
    pub(crate) source_restarts: IntCounterVec,
    pub(crate) notifications_published: IntCounterVec,
    pub(crate) last_event_timestamp_ms: IntGaugeVec,
    pub(crate) last_synced_evm_block: IntGaugeVec,
}

impl IndexerMetrics {
    pub fn new(registry: &Registry) -> prometheus::Result<Self> {
        Ok(Self {
            events_applied: register_int_counter_vec_with_registry!(
                "escrow_indexer_events_applied",
                "Total number of chain events that changed the mirror, by chain and event kind",
                &["chain", "kind"],
                registry,
            )?,
            events_duplicate: register_int_counter_vec_with_registry!(
                "escrow_indexer_events_duplicate",
                "Total number of chain events that were already reflected in the mirror",
                &["chain", "kind"],
                registry,
            )?,
            events_skipped: register_int_counter_vec_with_registry!(
                "escrow_indexer_events_skipped",
                "Total number of chain events skipped during reconciliation, by reason",
                &["chain", "reason"],
                registry,
            )?,
            store_retries: register_int_counter_vec_with_registry!(
                "escrow_indexer_store_retries",
                "Total number of retries caused by an unavailable mirror store",
                &["chain"],
                registry,
            )?,
            source_errors: register_int_counter_vec_with_registry!(
                "escrow_indexer_source_errors",
                "Total number of chain source errors, by error type",
                &["chain", "type"],
                registry,
            )?,
            source_restarts: register_int_counter_vec_with_registry!(
                "escrow_indexer_source_restarts",
                "Total number of chain source restarts after a lost cursor or closed stream",
                &["chain", "reason"],
                registry,
            )?,
            notifications_published: register_int_counter_vec_with_registry!(
                "escrow_indexer_notifications_published",
                "Total number of notifications published, by topic kind",
                &["topic"],
                registry,
            )?,
            last_event_timestamp_ms: register_int_gauge_vec_with_registry!(
                "escrow_indexer_last_event_timestamp_ms",
                "Chain timestamp of the last applied event in milliseconds",
                &["chain"],
                registry,
            )?,
            last_synced_evm_block: register_int_gauge_vec_with_registry!(
                "escrow_indexer_last_synced_evm_block",
                "Last EVM block whose logs were fully processed",
                &["chain"],
                registry,
            )?,
        })
    }

    #[cfg(test)]
    pub fn new_for_testing() -> Self {
        let registry = Registry::new();
        Self::new(&registry).unwrap()
    }

    pub(crate) fn record_outcome(&self, chain: ChainKind, kind: EventKind, outcome: &ApplyOutcome) {
        match outcome {
            ApplyOutcome::Applied => self
                .events_applied
                .with_label_values(&[chain.as_str(), kind.name()])
                .inc(),
            ApplyOutcome::Duplicate => self
                .events_duplicate
                .with_label_values(&[chain.as_str(), kind.name()])
                .inc(),
            ApplyOutcome::Skipped(reason) => self
                .events_skipped
                .with_label_values(&[chain.as_str(), reason.as_str()])
                .inc(),
        }
    }
}
