//! Aggregator errors

use kestrel_amm::AmmError;
use thiserror::Error;
use types::{ErrorClass, TypesError};

pub type Result<T> = std::result::Result<T, AggregatorError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AggregatorError {
    #[error(transparent)]
    InvalidRequest(#[from] TypesError),

    #[error(transparent)]
    Math(#[from] AmmError),

    #[error("Amount in must be positive")]
    ZeroAmount,
}

impl AggregatorError {
    pub fn class(&self) -> ErrorClass {
        match self {
            AggregatorError::InvalidRequest(e) => e.class(),
            AggregatorError::Math(e) => e.class(),
            AggregatorError::ZeroAmount => ErrorClass::Validation,
        }
    }
}

/// Failure of a single external venue; never fails the aggregate quote
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VenueError {
    #[error("Venue {venue} timed out after {timeout_ms}ms")]
    Timeout { venue: String, timeout_ms: u64 },

    #[error("Venue {venue} unreachable: {reason}")]
    Unavailable { venue: String, reason: String },

    #[error("Venue {venue} returned an invalid quote: {reason}")]
    InvalidQuote { venue: String, reason: String },

    #[error("Venue {venue} has no route")]
    NoRoute { venue: String },
}

impl VenueError {
    pub fn class(&self) -> ErrorClass {
        match self {
            VenueError::Timeout { .. } | VenueError::Unavailable { .. } => ErrorClass::Transient,
            VenueError::InvalidQuote { .. } | VenueError::NoRoute { .. } => ErrorClass::Liquidity,
        }
    }
}
