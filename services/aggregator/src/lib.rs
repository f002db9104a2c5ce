//! # Quote Aggregator
//!
//! ## Purpose
//!
//! Finds the best execution for a single swap across the native pools and any
//! number of external quote venues. The aggregator fee is taken off the input
//! before anything is quoted, and the native pool is preferred unless an
//! external venue is clearly better.
//!
//! ## Integration Points
//!
//! - **Native liquidity**: [`pool_state::PoolRegistry`] snapshots, read only
//! - **External venues**: any [`QuoteVenue`]; [`HttpQuoteVenue`] for REST
//!   quote APIs
//! - **Output**: [`BestQuote`] with the chosen venue, output and fee
//!
//! ## Architecture Role
//!
//! ```text
//! amount_in ──fee──→ net_in ──┬──→ native pool quote
//!                             ├──→ venue A (timeout)
//!                             └──→ venue B (timeout)
//!                                        │
//!                       sanity floor + preference rule ──→ BestQuote
//! ```

pub mod aggregator;
pub mod error;
pub mod http_venue;
pub mod venue;

pub use aggregator::{choose, AggregatorSettings, BestQuote, Choice, QuoteAggregator};
pub use error::{AggregatorError, Result, VenueError};
pub use http_venue::HttpQuoteVenue;
pub use venue::{ExternalQuote, QuoteRequest, QuoteVenue, Venue};
