// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Local mirror of on-chain escrow state, plus the indexer progress table.

pub mod memory;
pub mod models;
pub mod store;

pub use memory::InMemoryMirrorStore;
pub use models::{BridgeTransferRecord, DisputeRecord, EscrowRecord, MilestoneRecord};
pub use store::{
    BridgeTransition, EscrowUpsert, MilestoneUpdate, MirrorStore, StoreError, StoreResult,
    EVM_INDEXER_TASK, SUI_INDEXER_TASK,
};
