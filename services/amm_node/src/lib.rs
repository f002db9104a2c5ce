//! # AMM Node
//!
//! ## Purpose
//!
//! Owns the lifecycle of every Kestrel component in one process: restores
//! pool state, wires the engine, settlement coordinator and quote aggregator
//! from configuration, runs the snapshot and stuck-settlement loops, and
//! writes state back on shutdown.
//!
//! ## Startup Order
//!
//! 1. Load and validate configuration
//! 2. Restore pools, positions, snapshots and treasury from the state file
//! 3. Open the transaction store and ledger client
//! 4. Resume stuck settlements, then start the periodic loops

pub mod node;

pub use node::Node;
