//! # Pool State Service
//!
//! ## Purpose
//!
//! Live constant product pools and everything that mutates them: the pool
//! registry, LP position ledger, protocol treasury, the liquidity engine with
//! its deadline-checked router, reserve snapshots with APY estimates, and the
//! JSON state file.
//!
//! ## Integration Points
//!
//! - **Input Sources**: router calls, settlement plans/commits from the
//!   two-phase coordinator
//! - **Output Destinations**: [`PoolEvent`] broadcast, quote aggregator (native
//!   quotes), state file
//! - **Math**: all amounts computed by `kestrel_amm`
//!
//! ## Architecture Role
//!
//! ```text
//! Router ──deadline──→ LiquidityEngine ──→ PoolRegistry (per-pool RwLock)
//!                           │                   │
//!                           ├──→ LiquidityLedger
//!                           ├──→ Treasury
//!                           └──→ EventBus ──→ subscribers
//! ```
//!
//! ## Concurrency
//!
//! Each pool has its own lock; different pools never contend. Multi-hop swaps
//! take the locks of every pool on the path in ascending pool id order.
//!
//! ## Durability
//!
//! With a [`StateCheckpointer`] attached, the engine rewrites the state file
//! after every successful mutation, before the caller sees the result.

pub mod engine;
pub mod error;
pub mod events;
pub mod persistence;
pub mod pool;
pub mod positions;
pub mod registry;
pub mod router;
pub mod snapshot;
pub mod treasury;

pub use engine::{
    AddLiquidityReceipt, FeeSchedule, LiquidityEngine, RemoveLiquidityReceipt, SwapReceipt,
};
pub use error::{PoolError, Result};
pub use events::{EventBus, PoolEvent};
pub use persistence::{PersistedState, StateCheckpointer, StateStore};
pub use pool::{BurnOutcome, MintOutcome, Pool, PoolStatus, SwapOutcome};
pub use positions::{LiquidityLedger, LiquidityPosition};
pub use registry::{PoolHandle, PoolRegistry, DEFAULT_NAMESPACE};
pub use router::Router;
pub use snapshot::{ApyEstimate, ApyEstimator, PriceOracle, SnapshotBook, StaticPriceOracle};
pub use treasury::Treasury;
pub use types::{PlannedAction, SettlementPlan};
