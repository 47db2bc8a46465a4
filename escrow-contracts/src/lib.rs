// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! On-chain halves of the milestone escrow system.
//!
//! The escrow, milestone and dispute state machine is implemented once per
//! chain runtime: [`evm::EvmEscrowContract`] models the Solidity contract
//! (U256 amounts, second timestamps, ABI logs) and [`sui::SuiEscrowModule`]
//! models the Move package (u64 amounts, millisecond clock, BCS events).
//! Both share the [`bridge::BridgeTransferTracker`] and the dispute tally.
//! [`local_chain`] wraps each in a serialized in-process ledger used by
//! tests and by the indexer's end-to-end tests.

pub mod bridge;
pub mod config;
pub mod dispute;
pub mod error;
pub mod evm;
pub mod local_chain;
pub mod sui;

pub use config::DeploymentConfig;
pub use error::{EscrowError, EscrowResult};

#[cfg(test)]
mod parity_tests;
