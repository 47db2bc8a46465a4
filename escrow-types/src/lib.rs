// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Shared vocabulary for the milestone escrow system.
//!
//! Everything in this crate is part of the wire contract between the on-chain
//! state machines and the off-chain indexer: chain tags, status enums, the fee
//! formula and the bridge transfer-ID hash schemes. Both sides must compute
//! these identically, so they live in exactly one place.

pub mod chain;
pub mod event_kind;
pub mod money;
pub mod status;
pub mod transfer_id;

pub use chain::ChainKind;
pub use event_kind::EventKind;
pub use money::{compute_fee, FeeSplit, BPS_DENOMINATOR};
pub use status::{BridgeTransferStatus, DisputeOutcome, EscrowStatus, MilestoneStatus};
pub use transfer_id::{TransferId, TransferIdError};

/// Number of arbiter votes that resolves a dispute.
pub const DISPUTE_QUORUM: u32 = 3;

// An even quorum would allow a tied resolution.
const _: () = assert!(DISPUTE_QUORUM % 2 == 1);

/// Relayer confirmations required before a bridge transfer executes.
pub const DEFAULT_REQUIRED_CONFIRMATIONS: u32 = 2;

/// Bridge refund window on the EVM chain (block timestamps are seconds).
pub const EVM_BRIDGE_REFUND_TIMEOUT_SECS: u64 = 24 * 60 * 60;

/// Bridge refund window on Sui (clock timestamps are milliseconds).
pub const SUI_BRIDGE_REFUND_TIMEOUT_MS: u64 = 24 * 60 * 60 * 1000;
