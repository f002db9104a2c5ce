//! # Kestrel Configuration
//!
//! Layered configuration for every Kestrel component: a TOML base file, an
//! optional per-environment override, then `KESTREL_` environment variables.
//!
//! ## Usage
//!
//! ```no_run
//! use kestrel_config::load_config;
//!
//! let config = load_config(Some("production")).unwrap();
//! assert!(config.fees.lp_fee_bps < 10_000);
//! ```

pub mod service_config;

pub use service_config::{
    load_config, AggregatorConfig, FeeConfig, GlobalConfig, NodeConfig, SettlementConfig,
    SnapshotConfig, TokenPrice, VenueConfig,
};
