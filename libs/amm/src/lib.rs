//! # Kestrel AMM Library - Exact Constant Product Mathematics
//!
//! ## Purpose
//!
//! Pure math for a constant product (x*y=k) market maker: swap quotes in both
//! directions, share minting and burning, optimal deposit ratios and a display
//! price impact. No state lives here; pools, ledgers and routers build on it.
//!
//! ## Integration Points
//!
//! - **Input Sources**: reserves and fee tiers from pool state
//! - **Output Destinations**: pool state, settlement planning, quote aggregation
//! - **Precision**: `u128` amounts, 256-bit intermediates, no floating point in
//!   any value that moves funds
//!
//! ## Rounding
//!
//! - Outputs and minted shares round down
//! - Required inputs round up
//! - Burned amounts round down
//!
//! Every rounding decision leaves dust in the pool, never with the caller.

pub mod arith;
pub mod error;
pub mod pool_traits;
pub mod v2_math;

pub use arith::{BPS_DENOMINATOR, MAX_RESERVE, MINIMUM_LIQUIDITY};
pub use error::{AmmError, Result};
pub use pool_traits::{AmmPool, PoolReserves, SwapDirection};
pub use v2_math::V2Math;

/// Common types for display calculations
pub use rust_decimal::Decimal;
pub use rust_decimal_macros::dec;
