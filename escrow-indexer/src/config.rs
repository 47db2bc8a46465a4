// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::indexer::RetryConfig;
use crate::source::{EvmPollerConfig, SuiSubscriberConfig};
use anyhow::{anyhow, Context, Result};
use escrow_contracts::sui::ObjectId;
use ethers::types::Address;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// File-backed configuration: YAML for `.yaml`/`.yml` files, JSON otherwise
pub trait Config: Serialize + DeserializeOwned {
    fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Self = if is_yaml(path) {
            serde_yaml::from_str(&content)?
        } else {
            serde_json::from_str(&content)?
        };
        Ok(config)
    }

    fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = if is_yaml(path) {
            serde_yaml::to_string(self)?
        } else {
            serde_json::to_string_pretty(self)?
        };
        std::fs::write(path, content)?;
        Ok(())
    }
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|s| s.to_str()),
        Some("yaml") | Some("yml")
    )
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct IndexerConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evm: Option<EvmSourceConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sui: Option<SuiSourceConfig>,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
}

impl Config for IndexerConfig {}

fn default_evm_poll_interval_ms() -> u64 {
    5_000
}

fn default_max_block_range() -> u64 {
    1_000
}

fn default_max_retry_secs() -> u64 {
    30
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct EvmSourceConfig {
    pub rpc_url: String,
    pub contract_address: String,
    #[serde(default)]
    pub start_block: u64,
    /// When set and no cursor is stored, scanning starts this many blocks
    /// behind the head instead of at `start-block`
    #[serde(default)]
    pub lookback_blocks: Option<u64>,
    #[serde(default)]
    pub finality_blocks: u64,
    #[serde(default = "default_evm_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_max_block_range")]
    pub max_block_range: u64,
    #[serde(default = "default_max_retry_secs")]
    pub max_retry_secs: u64,
}

impl EvmSourceConfig {
    pub fn contract(&self) -> Result<Address> {
        self.contract_address
            .parse()
            .with_context(|| format!("Failed to parse contract-address {}", self.contract_address))
    }

    pub fn poller_config(&self) -> EvmPollerConfig {
        EvmPollerConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            start_block: self.start_block,
            lookback_blocks: self.lookback_blocks,
            finality_blocks: self.finality_blocks,
            max_block_range: self.max_block_range,
            max_retry_duration: Duration::from_secs(self.max_retry_secs),
        }
    }
}

fn default_sui_poll_interval_ms() -> u64 {
    1_000
}

fn default_page_size() -> usize {
    50
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SuiSourceConfig {
    pub rpc_url: String,
    pub package_id: String,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// Long-poll interval of the live subscription
    #[serde(default = "default_sui_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl SuiSourceConfig {
    pub fn package(&self) -> Result<ObjectId> {
        self.package_id
            .parse()
            .map_err(|e| anyhow!("Failed to parse package-id {}: {}", self.package_id, e))
    }

    pub fn subscriber_config(&self) -> SuiSubscriberConfig {
        SuiSubscriberConfig {
            page_size: self.page_size,
        }
    }
}

fn default_store_retry_initial_ms() -> u64 {
    400
}

fn default_store_retry_max_ms() -> u64 {
    120_000
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct EngineConfig {
    #[serde(default = "default_store_retry_initial_ms")]
    pub store_retry_initial_ms: u64,
    #[serde(default = "default_store_retry_max_ms")]
    pub store_retry_max_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            store_retry_initial_ms: default_store_retry_initial_ms(),
            store_retry_max_ms: default_store_retry_max_ms(),
        }
    }
}

impl EngineConfig {
    pub fn retry(&self) -> RetryConfig {
        RetryConfig {
            initial_interval: Duration::from_millis(self.store_retry_initial_ms),
            max_interval: Duration::from_millis(self.store_retry_max_ms),
        }
    }
}

fn default_channel_capacity() -> usize {
    256
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct NotificationConfig {
    /// Per-topic buffer; slower subscribers lose the oldest notifications
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl IndexerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.evm.is_none() && self.sui.is_none() {
            return Err(anyhow!("At least one of evm or sui must be configured"));
        }
        if let Some(evm) = &self.evm {
            evm.contract()?;
            if evm.max_block_range == 0 {
                return Err(anyhow!("evm.max-block-range must be positive"));
            }
            if evm.poll_interval_ms == 0 {
                return Err(anyhow!("evm.poll-interval-ms must be positive"));
            }
        }
        if let Some(sui) = &self.sui {
            sui.package()?;
            if sui.page_size == 0 {
                return Err(anyhow!("sui.page-size must be positive"));
            }
        }
        if self.engine.store_retry_initial_ms > self.engine.store_retry_max_ms {
            return Err(anyhow!(
                "engine.store-retry-initial-ms exceeds engine.store-retry-max-ms"
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = r#"
evm:
  rpc-url: http://localhost:8545
  contract-address: "0x5FbDB2315678afecb367f032d93F642f64180aa3"
  lookback-blocks: 500
sui:
  rpc-url: http://localhost:9000
  package-id: "0x2"
"#;

    #[test]
    fn test_yaml_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("indexer.yaml");
        std::fs::write(&path, YAML).unwrap();
        let config = IndexerConfig::load(&path).unwrap();
        config.validate().unwrap();

        let evm = config.evm.as_ref().unwrap();
        assert_eq!(evm.poller_config().poll_interval, Duration::from_secs(5));
        assert_eq!(evm.lookback_blocks, Some(500));
        assert_eq!(evm.max_block_range, 1_000);
        assert_eq!(config.sui.as_ref().unwrap().page_size, 50);
        assert_eq!(config.engine.retry().initial_interval, Duration::from_millis(400));
        assert_eq!(config.notifications.channel_capacity, 256);
    }

    #[test]
    fn test_json_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = dir.path().join("indexer.yml");
        std::fs::write(&yaml, YAML).unwrap();
        let config = IndexerConfig::load(&yaml).unwrap();

        let json = dir.path().join("indexer.json");
        config.save(&json).unwrap();
        let text = std::fs::read_to_string(&json).unwrap();
        assert!(text.contains("\"contract-address\""));
        assert_eq!(IndexerConfig::load(&json).unwrap(), config);
    }

    #[test]
    fn test_validation_errors() {
        let empty = IndexerConfig {
            evm: None,
            sui: None,
            engine: EngineConfig::default(),
            notifications: NotificationConfig::default(),
        };
        assert!(empty.validate().is_err());

        let bad_address = IndexerConfig {
            evm: Some(EvmSourceConfig {
                rpc_url: "http://localhost:8545".into(),
                contract_address: "not-an-address".into(),
                start_block: 0,
                lookback_blocks: None,
                finality_blocks: 0,
                poll_interval_ms: 1,
                max_block_range: 1,
                max_retry_secs: 1,
            }),
            ..empty
        };
        assert!(bad_address.validate().is_err());
    }
}
