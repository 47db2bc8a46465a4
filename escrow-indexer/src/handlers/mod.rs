// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

mod evm_event_handler;
mod sui_event_handler;

pub use evm_event_handler::EvmEventHandler;
pub use sui_event_handler::SuiEventHandler;
