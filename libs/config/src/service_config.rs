//! Node Configuration Module
//!
//! Loads configuration from TOML files with environment-specific overrides
//! and `KESTREL_` environment variables on top.

use anyhow::{bail, Context, Result};
use config_crate::{Config, Environment, File};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const BPS_DENOMINATOR: u32 = 10_000;

/// Main node configuration structure
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct NodeConfig {
    /// Global settings
    pub global: GlobalConfig,

    /// Fee schedule for pools and the treasury leg
    pub fees: FeeConfig,

    /// Best-quote aggregation
    pub aggregator: AggregatorConfig,

    /// Two-phase settlement
    pub settlement: SettlementConfig,

    /// Reserve snapshots and APY estimation
    pub snapshots: SnapshotConfig,
}

/// Global configuration settings
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct GlobalConfig {
    pub log_level: String,
    pub json_logs: bool,
    pub data_dir: PathBuf,
    /// Account that holds TX1 deposits until settlement
    pub operator: String,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            data_dir: PathBuf::from("./data"),
            operator: "operator".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct FeeConfig {
    /// Stays in reserves
    pub lp_fee_bps: u32,
    /// Transferred to the treasury
    pub protocol_fee_bps: u32,
    pub treasury: String,
}

impl Default for FeeConfig {
    fn default() -> Self {
        Self {
            lp_fee_bps: 25,
            protocol_fee_bps: 5,
            treasury: "treasury".to_string(),
        }
    }
}

impl FeeConfig {
    pub fn total_bps(&self) -> u32 {
        self.lp_fee_bps.saturating_add(self.protocol_fee_bps)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct AggregatorConfig {
    pub fee_bps: u32,
    /// Native wins while within this many bps of the best external venue
    pub native_preference_bps: u32,
    /// Outputs below `net_in / divisor` are discarded
    pub sanity_floor_divisor: u64,
    pub venue_timeout_ms: u64,
    pub venues: Vec<VenueConfig>,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            fee_bps: 30,
            native_preference_bps: 100,
            sanity_floor_divisor: 1_000_000,
            venue_timeout_ms: 2_000,
            venues: Vec::new(),
        }
    }
}

/// External quote venue
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct VenueConfig {
    pub name: String,
    pub base_url: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct SettlementConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub stuck_after_minutes: u64,
    pub resume_interval_secs: u64,
    /// Ledger gateway; the in-process ledger is used when absent
    pub ledger_url: Option<String>,
    pub ledger_timeout_ms: u64,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 30_000,
            stuck_after_minutes: 10,
            resume_interval_secs: 60,
            ledger_url: None,
            ledger_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct SnapshotConfig {
    pub interval_secs: u64,
    pub lookback_secs: u64,
    /// Static USD prices
    pub prices: Vec<TokenPrice>,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            interval_secs: 3_600,
            lookback_secs: 86_400,
            prices: Vec::new(),
        }
    }
}

/// Listed as an array so token ids keep their case
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct TokenPrice {
    pub token: String,
    pub usd: Decimal,
    pub decimals: u32,
}

impl NodeConfig {
    /// Load configuration from files with environment overrides.
    ///
    /// The environment file is looked up in `environments/<env>.toml` next to
    /// the base file.
    pub fn load(base_path: Option<&Path>, environment: Option<&str>) -> Result<Self> {
        let base = base_path.unwrap_or(Path::new("config/node.toml"));

        let mut builder = Config::builder().add_source(File::from(base).required(true));

        if let Some(env) = environment {
            let env_file = base
                .parent()
                .unwrap_or(Path::new("."))
                .join("environments")
                .join(format!("{}.toml", env));

            if env_file.exists() {
                info!("Loading environment config: {:?}", env_file);
                builder = builder.add_source(File::from(env_file));
            } else {
                warn!("Environment config not found: {:?}", env_file);
            }
        }

        // KESTREL_FEES__LP_FEE_BPS=20 overrides fees.lp_fee_bps
        builder = builder.add_source(
            Environment::with_prefix("KESTREL")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build().context("Failed to build configuration")?;

        let config: NodeConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        debug!(
            lp_fee_bps = config.fees.lp_fee_bps,
            protocol_fee_bps = config.fees.protocol_fee_bps,
            venues = config.aggregator.venues.len(),
            "configuration loaded"
        );
        Ok(config)
    }

    /// Parse a TOML string without file or environment layering
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse configuration")
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.fees.total_bps() >= BPS_DENOMINATOR {
            bail!(
                "fees.lp_fee_bps + fees.protocol_fee_bps must be below {} (got {})",
                BPS_DENOMINATOR,
                self.fees.total_bps()
            );
        }
        if self.aggregator.fee_bps >= BPS_DENOMINATOR {
            bail!("aggregator.fee_bps must be below {}", BPS_DENOMINATOR);
        }
        if self.aggregator.native_preference_bps >= BPS_DENOMINATOR {
            bail!("aggregator.native_preference_bps must be below {}", BPS_DENOMINATOR);
        }
        if self.aggregator.sanity_floor_divisor == 0 {
            bail!("aggregator.sanity_floor_divisor must be positive");
        }
        if self.settlement.max_attempts == 0 {
            bail!("settlement.max_attempts must be at least 1");
        }
        if self.settlement.initial_backoff_ms > self.settlement.max_backoff_ms {
            bail!("settlement.initial_backoff_ms exceeds settlement.max_backoff_ms");
        }
        if self.snapshots.interval_secs == 0 {
            bail!("snapshots.interval_secs must be positive");
        }
        if self.fees.treasury.is_empty() || self.global.operator.is_empty() {
            bail!("fees.treasury and global.operator must be set");
        }
        Ok(())
    }

    /// Expand environment variables in path and URL values
    pub fn expand_env_vars(&mut self) -> Result<()> {
        let data_dir = self.global.data_dir.to_string_lossy().to_string();
        let expanded = shellexpand::env(&data_dir).context("Failed to expand data_dir")?;
        self.global.data_dir = PathBuf::from(expanded.as_ref());

        if let Some(url) = &self.settlement.ledger_url {
            let expanded = shellexpand::env(url).context("Failed to expand ledger URL")?;
            self.settlement.ledger_url = Some(expanded.to_string());
        }

        for venue in &mut self.aggregator.venues {
            let expanded = shellexpand::env(&venue.base_url)
                .with_context(|| format!("Failed to expand URL of venue {}", venue.name))?;
            venue.base_url = expanded.to_string();
        }

        Ok(())
    }

    pub fn state_file(&self) -> PathBuf {
        self.global.data_dir.join("pool_state.json")
    }

    pub fn transactions_file(&self) -> PathBuf {
        self.global.data_dir.join("pending_transactions.json")
    }
}

/// Convenience function to load, expand and validate with defaults
pub fn load_config(environment: Option<&str>) -> Result<NodeConfig> {
    let mut config = NodeConfig::load(None, environment)?;
    config.expand_env_vars()?;
    config.validate()?;
    Ok(config)
}
