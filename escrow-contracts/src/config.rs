// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::error::{EscrowError, EscrowResult};
use escrow_types::{BPS_DENOMINATOR, DEFAULT_REQUIRED_CONFIRMATIONS, DISPUTE_QUORUM};
use serde::{Deserialize, Serialize};

/// Per-deployment parameters. Each contract instance owns its copy; there is
/// no process-wide registry of arbiters or relayers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DeploymentConfig<A> {
    /// System agent allowed to release milestones, mark transfers failed and
    /// trigger emergency refunds
    pub admin: A,
    /// Receives platform fees
    pub treasury: A,
    pub fee_bps: u16,
    pub arbiters: Vec<A>,
    pub relayers: Vec<A>,
    #[serde(default = "default_required_confirmations")]
    pub required_confirmations: u32,
    /// Bridge refund window in the chain's native timestamp unit
    pub refund_timeout: u64,
}

fn default_required_confirmations() -> u32 {
    DEFAULT_REQUIRED_CONFIRMATIONS
}

impl<A: PartialEq> DeploymentConfig<A> {
    pub fn is_admin(&self, who: &A) -> bool {
        &self.admin == who
    }

    pub fn is_arbiter(&self, who: &A) -> bool {
        self.arbiters.contains(who)
    }

    pub fn is_relayer(&self, who: &A) -> bool {
        self.relayers.contains(who)
    }

    /// Rejects deployments that could never resolve a dispute or execute a
    /// transfer
    pub fn validate(&self) -> EscrowResult<()> {
        if self.fee_bps as u128 > BPS_DENOMINATOR {
            return Err(EscrowError::InvalidAmount(format!(
                "fee_bps {} exceeds {}",
                self.fee_bps, BPS_DENOMINATOR
            )));
        }
        if (self.arbiters.len() as u32) < DISPUTE_QUORUM {
            return Err(EscrowError::invalid_state(format!(
                "need at least {} arbiters, got {}",
                DISPUTE_QUORUM,
                self.arbiters.len()
            )));
        }
        if self.required_confirmations == 0
            || self.required_confirmations as usize > self.relayers.len()
        {
            return Err(EscrowError::invalid_state(format!(
                "required_confirmations {} not satisfiable by {} relayers",
                self.required_confirmations,
                self.relayers.len()
            )));
        }
        if self.refund_timeout == 0 {
            return Err(EscrowError::invalid_state("refund_timeout must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> DeploymentConfig<u8> {
        DeploymentConfig {
            admin: 1,
            treasury: 2,
            fee_bps: 100,
            arbiters: vec![10, 11, 12],
            relayers: vec![20, 21],
            required_confirmations: 2,
            refund_timeout: 86_400,
        }
    }

    #[test]
    fn test_valid_config() {
        let cfg = config();
        assert!(cfg.validate().is_ok());
        assert!(cfg.is_admin(&1));
        assert!(cfg.is_arbiter(&11));
        assert!(!cfg.is_arbiter(&20));
        assert!(cfg.is_relayer(&21));
    }

    #[test]
    fn test_rejects_unsatisfiable_config() {
        let mut cfg = config();
        cfg.fee_bps = 10_001;
        assert!(matches!(cfg.validate(), Err(EscrowError::InvalidAmount(_))));

        let mut cfg = config();
        cfg.arbiters.pop();
        assert!(matches!(cfg.validate(), Err(EscrowError::InvalidState(_))));

        let mut cfg = config();
        cfg.required_confirmations = 3;
        assert!(cfg.validate().is_err());

        let mut cfg = config();
        cfg.required_confirmations = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_yaml_defaults() {
        let yaml = r#"
admin: 1
treasury: 2
fee-bps: 250
arbiters: [3, 4, 5]
relayers: [6, 7]
refund-timeout: 60
"#;
        let cfg: DeploymentConfig<u8> = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.required_confirmations, DEFAULT_REQUIRED_CONFIRMATIONS);
        assert_eq!(cfg.fee_bps, 250);
        assert!(cfg.validate().is_ok());
    }
}
