//! Pool state errors

use kestrel_amm::AmmError;
use thiserror::Error;
use types::{ErrorClass, PairKey, PoolId, TokenId, TypesError};

pub type Result<T> = std::result::Result<T, PoolError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error(transparent)]
    Math(#[from] AmmError),

    #[error(transparent)]
    Types(#[from] TypesError),

    #[error("Pool not found for pair {0}")]
    NotFound(PairKey),

    #[error("Unknown pool {0}")]
    UnknownPool(PoolId),

    #[error("Pair already exists: {0}")]
    PairExists(PairKey),

    /// The minimum liquidity locked by the first deposit never leaves the pool
    #[error("Locked liquidity of pool {0} cannot be withdrawn")]
    LockedLiquidity(PoolId),

    #[error("Pool {0} is paused")]
    Paused(PoolId),

    #[error("Deadline {deadline} expired at {now}")]
    Expired { deadline: u64, now: u64 },

    #[error("Invalid path: {0}")]
    InvalidPath(&'static str),

    #[error("Token {token} is not part of pool {pool_id}")]
    TokenNotInPool { token: TokenId, pool_id: PoolId },

    #[error("Insufficient output amount")]
    InsufficientOutputAmount,

    /// Commit found the pool worse off than when the operation was planned
    #[error("Reserves of pool {0} moved since planning")]
    ReservesMoved(PoolId),

    #[error("No USD price for token {0}")]
    PriceUnavailable(TokenId),

    #[error("Persistence error: {0}")]
    Persistence(String),
}

impl PoolError {
    pub fn class(&self) -> ErrorClass {
        match self {
            PoolError::Math(e) => e.class(),
            PoolError::Types(e) => e.class(),
            PoolError::NotFound(_)
            | PoolError::UnknownPool(_)
            | PoolError::PairExists(_)
            | PoolError::ReservesMoved(_) => ErrorClass::Liquidity,
            PoolError::Persistence(_) => ErrorClass::Internal,
            _ => ErrorClass::Validation,
        }
    }
}

impl From<std::io::Error> for PoolError {
    fn from(e: std::io::Error) -> Self {
        PoolError::Persistence(e.to_string())
    }
}

impl From<serde_json::Error> for PoolError {
    fn from(e: serde_json::Error) -> Self {
        PoolError::Persistence(e.to_string())
    }
}
