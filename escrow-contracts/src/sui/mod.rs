// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

pub mod escrow;
pub mod events;
pub mod types;

pub use escrow::{CreateEscrowArgs, CreatedEscrow, SuiEscrow, SuiEscrowModule, SuiMilestone, TxContext};
pub use events::{SuiEscrowEvent, SuiEvent, SuiEventError, SuiEventPage};
pub use types::{EventId, ObjectId, SuiAddress, SuiTypeError};
