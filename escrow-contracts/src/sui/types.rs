// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SuiTypeError {
    #[error("invalid hex: {0}")]
    InvalidHex(String),
    #[error("expected at most 32 bytes, got {0}")]
    TooLong(usize),
}

macro_rules! sui_id_type {
    ($name:ident) => {
        /// 32-byte Sui identifier, `0x`-prefixed hex when displayed
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
        pub struct $name(pub [u8; 32]);

        impl $name {
            pub const ZERO: $name = $name([0u8; 32]);

            pub fn new(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }

            pub fn repeat_byte(b: u8) -> Self {
                Self([b; 32])
            }

            pub fn is_zero(&self) -> bool {
                self.0 == [0u8; 32]
            }

            pub fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "0x{}", hex::encode(self.0))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self)
            }
        }

        /// Accepts short forms (`0x2`) by left-padding to 32 bytes
        impl FromStr for $name {
            type Err = SuiTypeError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let s = s.strip_prefix("0x").unwrap_or(s);
                if s.len() > 64 {
                    return Err(SuiTypeError::TooLong(s.len().div_ceil(2)));
                }
                let padded = format!("{:0>64}", s);
                let bytes =
                    hex::decode(&padded).map_err(|e| SuiTypeError::InvalidHex(e.to_string()))?;
                let mut out = [0u8; 32];
                out.copy_from_slice(&bytes);
                Ok(Self(out))
            }
        }
    };
}

sui_id_type!(SuiAddress);
sui_id_type!(ObjectId);

/// Position of an event in the Sui event stream; the resume cursor
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventId {
    pub tx_digest: String,
    pub event_seq: u64,
}

impl EventId {
    pub fn new(tx_digest: impl Into<String>, event_seq: u64) -> Self {
        Self {
            tx_digest: tx_digest.into(),
            event_seq,
        }
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.tx_digest, self.event_seq)
    }
}
