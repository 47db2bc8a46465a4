// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Fee arithmetic. Amounts are integer minor units; no floating point.

use serde::{Deserialize, Serialize};

/// Basis-point denominator (100% = 10_000 bps)
pub const BPS_DENOMINATOR: u128 = 10_000;

/// Platform fee for `amount`, rounded down.
///
/// `fee_bps` above the denominator is clamped so the fee never exceeds the
/// amount.
pub fn compute_fee(amount: u128, fee_bps: u16) -> u128 {
    let bps = (fee_bps as u128).min(BPS_DENOMINATOR);
    // amount * bps cannot overflow for amount < 2^114
    amount.saturating_mul(bps) / BPS_DENOMINATOR
}

/// How a released milestone amount is divided
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSplit {
    pub recipient_amount: u128,
    pub fee: u128,
}

impl FeeSplit {
    pub fn new(amount: u128, fee_bps: u16) -> Self {
        let fee = compute_fee(amount, fee_bps);
        Self {
            recipient_amount: amount - fee,
            fee,
        }
    }

    pub fn total(&self) -> u128 {
        self.recipient_amount + self.fee
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fee_one_percent() {
        let split = FeeSplit::new(3000, 100);
        assert_eq!(split.fee, 30);
        assert_eq!(split.recipient_amount, 2970);
        assert_eq!(split.total(), 3000);
    }

    #[test]
    fn test_fee_rounds_down() {
        // 2.5% of 199 = 4.975
        assert_eq!(compute_fee(199, 250), 4);
        assert_eq!(compute_fee(99, 100), 0);
    }

    #[test]
    fn test_fee_clamped_to_amount() {
        assert_eq!(compute_fee(1000, u16::MAX), 1000);
        assert_eq!(FeeSplit::new(1000, 10_000).recipient_amount, 0);
    }
}
