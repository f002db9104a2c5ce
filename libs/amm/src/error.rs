//! AMM math errors

use thiserror::Error;
use types::ErrorClass;

pub type Result<T> = std::result::Result<T, AmmError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AmmError {
    /// Zero input or output amount
    #[error("Invalid amount: {0}")]
    InvalidAmount(&'static str),

    /// Fee must be below 10000 bps
    #[error("Invalid fee: {0} bps")]
    InvalidFee(u32),

    /// A reserve is zero or the requested output drains the pool
    #[error("Insufficient liquidity")]
    InsufficientLiquidity,

    /// First deposit too small to cover the locked minimum liquidity
    #[error("Insufficient initial liquidity: sqrt(a*b) = {sqrt} must exceed {minimum}")]
    InsufficientInitialLiquidity { sqrt: u128, minimum: u128 },

    /// Deposit too small to mint a single share
    #[error("Insufficient liquidity minted")]
    InsufficientLiquidityMinted,

    /// Burn would return zero of one token
    #[error("Insufficient liquidity burned")]
    InsufficientLiquidityBurned,

    /// Share amount is zero or exceeds what is available
    #[error("Insufficient shares: requested {requested}, available {available}")]
    InsufficientShares { requested: u128, available: u128 },

    /// Pair-level swap received no input for a requested output
    #[error("Insufficient input amount")]
    InsufficientInputAmount,

    /// Result fell below the caller's minimum (or above its maximum input)
    #[error("Slippage exceeded: {bound} bound {limit}, got {actual}")]
    SlippageExceeded {
        bound: &'static str,
        limit: u128,
        actual: u128,
    },

    /// Reserves must fit in 112 bits
    #[error("Reserve overflow: {0} exceeds 112 bits")]
    ReserveOverflow(u128),

    /// Intermediate arithmetic overflowed
    #[error("Arithmetic overflow in {0}")]
    Overflow(&'static str),

    /// Constant product decreased
    #[error("Invariant violation: constant product decreased during {0}")]
    InvariantViolation(&'static str),
}

impl AmmError {
    pub fn class(&self) -> ErrorClass {
        match self {
            AmmError::InsufficientLiquidity
            | AmmError::InsufficientInitialLiquidity { .. } => ErrorClass::Liquidity,
            AmmError::InvariantViolation(_) | AmmError::Overflow(_) => ErrorClass::Invariant,
            _ => ErrorClass::Validation,
        }
    }
}
