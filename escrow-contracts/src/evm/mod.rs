// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

pub mod abi;
pub mod escrow;

pub use abi::{event_topic, AbiEventError, EvmEscrowEvent};
pub use escrow::{CallContext, CreateEscrowParams, CreatedEscrow, EvmEscrow, EvmEscrowContract, EvmMilestone};
