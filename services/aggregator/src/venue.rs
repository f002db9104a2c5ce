//! External quote sources

use crate::error::VenueError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use types::TokenId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteRequest {
    pub token_in: TokenId,
    pub token_out: TokenId,
    /// Already net of the aggregator fee
    pub amount_in: u128,
}

/// Untrusted answer from a venue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalQuote {
    pub amount_out: u128,
    /// Calldata or route reference needed to execute on the venue
    pub route_ref: Option<String>,
}

#[async_trait]
pub trait QuoteVenue: Send + Sync {
    fn name(&self) -> &str;

    async fn quote(&self, request: &QuoteRequest) -> Result<ExternalQuote, VenueError>;
}

/// Where a quote would be executed
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Venue {
    Native,
    External(String),
}

impl fmt::Display for Venue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Venue::Native => f.write_str("native"),
            Venue::External(name) => f.write_str(name),
        }
    }
}
