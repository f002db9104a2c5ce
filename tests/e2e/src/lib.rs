//! End-to-End Test Framework for Kestrel
//!
//! Boots a full [`Node`] against a throwaway data directory so tests can
//! drive the router, the two-phase coordinator and the aggregator together,
//! then restart the node from what it persisted, or crash it and rebuild from
//! what is already on disk.

use amm_node::Node;
use anyhow::{Context, Result};
use kestrel_config::NodeConfig;
use std::path::Path;
use tempfile::TempDir;
use tracing::debug;
use types::{AccountId, Clock, PendingTransaction, TokenId, TxId};

/// Configuration every scenario starts from; `data_dir` is filled in per run
pub const BASE_CONFIG: &str = r#"
[global]
log_level = "debug"
operator = "operator"

[fees]
lp_fee_bps = 25
protocol_fee_bps = 5
treasury = "treasury"

[aggregator]
fee_bps = 30
native_preference_bps = 100
sanity_floor_divisor = 1000000
venue_timeout_ms = 500

[settlement]
max_attempts = 2
initial_backoff_ms = 10
max_backoff_ms = 20
stuck_after_minutes = 10
resume_interval_secs = 60

[snapshots]
interval_secs = 3600
lookback_secs = 86400

[[snapshots.prices]]
token = "USDC"
usd = "1.00"
decimals = 6

[[snapshots.prices]]
token = "WETH"
usd = "3000.00"
decimals = 18
"#;

pub fn token(raw: &str) -> TokenId {
    TokenId::new(raw).expect("valid token id")
}

pub fn account(raw: &str) -> AccountId {
    AccountId::new(raw).expect("valid account id")
}

/// A node plus the directory that outlives its restarts
pub struct TestNode {
    pub node: Node,
    data_dir: TempDir,
}

impl TestNode {
    pub fn start() -> Result<Self> {
        let data_dir = tempfile::tempdir().context("Failed to create data dir")?;
        let node = Node::build(config_for(data_dir.path())?)?;
        Ok(Self { node, data_dir })
    }

    /// Persist, drop the running node and build a new one on the same files
    pub fn restart(self) -> Result<Self> {
        self.node.persist()?;
        let Self { node, data_dir } = self;
        drop(node);
        debug!(dir = ?data_dir.path(), "restarting node");
        let node = Node::build(config_for(data_dir.path())?)?;
        Ok(Self { node, data_dir })
    }

    /// Drop the running node without saving anything and rebuild it from
    /// whatever is already on disk
    pub fn crash(self) -> Result<Self> {
        let Self { node, data_dir } = self;
        drop(node);
        debug!(dir = ?data_dir.path(), "rebuilding node after crash");
        let node = Node::build(config_for(data_dir.path())?)?;
        Ok(Self { node, data_dir })
    }

    pub fn data_dir(&self) -> &Path {
        self.data_dir.path()
    }

    pub fn deadline(&self) -> u64 {
        self.node.engine.clock().unix_seconds() + 300
    }

    /// TX1 then TX2 for a recorded operation
    pub async fn settle(&self, id: &TxId) -> Result<PendingTransaction> {
        let coordinator = &self.node.coordinator;
        coordinator.mark_tx1_complete(id, &format!("tx1-{id}"))?;
        Ok(coordinator.attempt_tx2(id).await?)
    }
}

pub fn config_for(data_dir: &Path) -> Result<NodeConfig> {
    let mut config = NodeConfig::from_toml(BASE_CONFIG)?;
    config.global.data_dir = data_dir.to_path_buf();
    config.validate()?;
    Ok(config)
}
