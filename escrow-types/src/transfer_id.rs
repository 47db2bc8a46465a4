// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Deterministic bridge transfer identifiers.
//!
//! Each chain derives the ID from `(recipient, amount, timestamp, nonce)`
//! with its own packing rule. The indexer recomputes IDs with the source
//! chain's rule to reject forged or malformed `BridgeTransferInitiated`
//! events.

use ethers::types::U256;
use ethers::utils::keccak256;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TransferIdError {
    #[error("invalid hex: {0}")]
    InvalidHex(String),
    #[error("expected 32 bytes, got {0}")]
    InvalidLength(usize),
}

/// 32-byte bridge transfer ID
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct TransferId(pub [u8; 32]);

impl TransferId {
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, TransferIdError> {
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| TransferIdError::InvalidLength(bytes.len()))?;
        Ok(Self(arr))
    }

    /// EVM scheme: `keccak256(abi.encodePacked(recipient, amount, timestamp, nonce))`
    /// where the recipient is the raw string bytes and the three integers are
    /// packed as 32-byte big-endian words.
    pub fn evm(recipient: &str, amount: U256, timestamp_secs: u64, nonce: u64) -> Self {
        let mut packed = Vec::with_capacity(recipient.len() + 96);
        packed.extend_from_slice(recipient.as_bytes());
        let mut word = [0u8; 32];
        amount.to_big_endian(&mut word);
        packed.extend_from_slice(&word);
        U256::from(timestamp_secs).to_big_endian(&mut word);
        packed.extend_from_slice(&word);
        U256::from(nonce).to_big_endian(&mut word);
        packed.extend_from_slice(&word);
        Self(keccak256(packed))
    }

    /// Sui scheme: `keccak256(bcs(recipient, amount, timestamp_ms, nonce))`
    pub fn sui(recipient: &str, amount: u64, timestamp_ms: u64, nonce: u64) -> Self {
        // BCS of a (String, u64, u64, u64) tuple; serialisation of these
        // primitives cannot fail
        let bytes = bcs::to_bytes(&(recipient, amount, timestamp_ms, nonce)).unwrap_or_default();
        Self(keccak256(bytes))
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TransferId({})", self)
    }
}

impl FromStr for TransferId {
    type Err = TransferIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s).map_err(|e| TransferIdError::InvalidHex(e.to_string()))?;
        Self::from_slice(&bytes)
    }
}

impl Serialize for TransferId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for TransferId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
