//! Gateway configuration: a TOML file with per-section defaults.

use crate::mempool::MempoolCheckerSettings;
use crate::node::cleanup::CleanupSettings;
use crate::rpc::NodeEndpoint;
use crate::submit::SubmitSettings;
use crate::sync::SyncSettings;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub nodes: Vec<NodeEndpoint>,
    pub rpc: RpcConfig,
    pub submit: SubmitConfig,
    pub sync: SyncConfig,
    pub mempool: MempoolConfig,
    pub cleanup: CleanupConfig,
    pub quotes: QuoteConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    pub request_timeout_secs: u64,
    /// Per-call bound inside one aggregator fan-out.
    pub multi_request_timeout_secs: u64,
}

impl Default for RpcConfig {
    fn default() -> Self {
        RpcConfig {
            request_timeout_secs: 60,
            multi_request_timeout_secs: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SubmitConfig {
    pub dont_parse_blocks: bool,
    pub dont_insert_transactions: bool,
    pub resubmit_known_transactions: bool,
    pub check_fee_disabled: bool,
    pub resubmit_batch_size: usize,
}

impl Default for SubmitConfig {
    fn default() -> Self {
        SubmitConfig {
            dont_parse_blocks: false,
            dont_insert_transactions: false,
            resubmit_known_transactions: false,
            check_fee_disabled: false,
            resubmit_batch_size: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub max_fork_depth: u64,
    pub ds_height_window: u64,
    pub parse_queue_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            max_fork_depth: 288,
            ds_height_window: 144,
            parse_queue_capacity: 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MempoolConfig {
    pub disabled: bool,
    pub interval_secs: u64,
    pub unsuccessful_interval_secs: u64,
    pub block_parser_queued_max: usize,
    pub missing_inputs_retries: u32,
}

impl Default for MempoolConfig {
    fn default() -> Self {
        MempoolConfig {
            disabled: false,
            interval_secs: 60,
            unsuccessful_interval_secs: 10,
            block_parser_queued_max: 10,
            missing_inputs_retries: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupConfig {
    pub period_secs: u64,
    pub tx_retention_days: u64,
    pub mempool_expired_retention_days: u64,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        CleanupConfig {
            period_secs: 3600,
            tx_retention_days: 3,
            mempool_expired_retention_days: 7,
        }
    }
}

/// Seed data for the in-memory quote catalogue. Rates are satoshis per
/// 1000 bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuoteConfig {
    pub validity_minutes: u64,
    pub standard_mining_sat_per_kb: u64,
    pub standard_relay_sat_per_kb: u64,
    pub data_mining_sat_per_kb: u64,
    pub data_relay_sat_per_kb: u64,
}

impl Default for QuoteConfig {
    fn default() -> Self {
        QuoteConfig {
            validity_minutes: 10,
            standard_mining_sat_per_kb: 500,
            standard_relay_sat_per_kb: 250,
            data_mining_sat_per_kb: 250,
            data_relay_sat_per_kb: 125,
        }
    }
}

impl AppConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("cannot read config {}", path.as_ref().display()))?;
        let config: AppConfig = toml::from_str(&raw)
            .with_context(|| format!("cannot parse config {}", path.as_ref().display()))?;
        Ok(config)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc.request_timeout_secs)
    }

    pub fn multi_request_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc.multi_request_timeout_secs)
    }

    pub fn submit_settings(&self) -> SubmitSettings {
        SubmitSettings {
            dont_parse_blocks: self.submit.dont_parse_blocks,
            dont_insert_transactions: self.submit.dont_insert_transactions,
            resubmit_known_transactions: self.submit.resubmit_known_transactions,
            check_fee_disabled: self.submit.check_fee_disabled,
            resubmit_prechecks_inputs: self.mempool.missing_inputs_retries == 0,
            resubmit_batch_size: self.submit.resubmit_batch_size,
        }
    }

    pub fn sync_settings(&self) -> SyncSettings {
        SyncSettings {
            max_fork_depth: self.sync.max_fork_depth,
            ds_height_window: self.sync.ds_height_window,
            dont_parse_blocks: self.submit.dont_parse_blocks,
            parse_queue_capacity: self.sync.parse_queue_capacity,
        }
    }

    pub fn mempool_settings(&self) -> MempoolCheckerSettings {
        MempoolCheckerSettings {
            interval: Duration::from_secs(self.mempool.interval_secs),
            unsuccessful_interval: Duration::from_secs(self.mempool.unsuccessful_interval_secs),
            block_parser_queued_max: self.mempool.block_parser_queued_max,
            missing_inputs_retries: self.mempool.missing_inputs_retries,
            disabled: self.mempool.disabled || self.submit.dont_parse_blocks,
        }
    }

    pub fn cleanup_settings(&self) -> CleanupSettings {
        const DAY: u64 = 24 * 60 * 60;
        CleanupSettings {
            period: Duration::from_secs(self.cleanup.period_secs),
            tx_retention: Duration::from_secs(self.cleanup.tx_retention_days * DAY),
            mempool_expired_retention: Duration::from_secs(
                self.cleanup.mempool_expired_retention_days * DAY,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_partial_config_with_defaults() {
        let raw = r#"
            [[nodes]]
            host = "10.0.0.1"
            port = 8332
            username = "user"
            password = "pass"

            [mempool]
            interval_secs = 30
        "#;
        let config: AppConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.nodes.len(), 1);
        assert_eq!(config.nodes[0].port, 8332);
        assert_eq!(config.mempool.interval_secs, 30);
        // untouched sections keep their defaults
        assert_eq!(config.sync.max_fork_depth, 288);
        assert_eq!(config.submit.resubmit_batch_size, 1000);
    }

    #[test]
    fn zero_retries_enables_resubmit_precheck() {
        let mut config = AppConfig::default();
        config.mempool.missing_inputs_retries = 0;
        assert!(config.submit_settings().resubmit_prechecks_inputs);
        config.mempool.missing_inputs_retries = 3;
        assert!(!config.submit_settings().resubmit_prechecks_inputs);
    }
}
