// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Chain runtime hosting an escrow deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ChainKind {
    Evm = 0,
    Sui = 1,
}

impl ChainKind {
    /// Short lowercase name, used for metric labels and topic names
    pub fn as_str(&self) -> &'static str {
        match self {
            ChainKind::Evm => "evm",
            ChainKind::Sui => "sui",
        }
    }

    /// The other chain of the pair
    pub fn counterpart(&self) -> ChainKind {
        match self {
            ChainKind::Evm => ChainKind::Sui,
            ChainKind::Sui => ChainKind::Evm,
        }
    }

    /// Timestamps emitted by this chain, normalised to milliseconds
    pub fn timestamp_to_ms(&self, raw: u64) -> u64 {
        match self {
            ChainKind::Evm => raw.saturating_mul(1000),
            ChainKind::Sui => raw,
        }
    }
}

impl fmt::Display for ChainKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainKind::Evm => write!(f, "EVM"),
            ChainKind::Sui => write!(f, "SUI"),
        }
    }
}

impl FromStr for ChainKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "evm" | "eth" | "ethereum" => Ok(ChainKind::Evm),
            "sui" => Ok(ChainKind::Sui),
            other => Err(format!("unknown chain '{}'", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_kind_parse_and_display() {
        assert_eq!("EVM".parse::<ChainKind>().unwrap(), ChainKind::Evm);
        assert_eq!("ethereum".parse::<ChainKind>().unwrap(), ChainKind::Evm);
        assert_eq!("sui".parse::<ChainKind>().unwrap(), ChainKind::Sui);
        assert!("solana".parse::<ChainKind>().is_err());
        assert_eq!(ChainKind::Sui.to_string(), "SUI");
        assert_eq!(ChainKind::Evm.counterpart(), ChainKind::Sui);
    }

    #[test]
    fn test_timestamp_normalisation() {
        assert_eq!(ChainKind::Evm.timestamp_to_ms(1_700_000_000), 1_700_000_000_000);
        assert_eq!(ChainKind::Sui.timestamp_to_ms(1_700_000_000_123), 1_700_000_000_123);
    }
}
