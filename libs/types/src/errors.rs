//! Error types for identifier validation and state transitions

use crate::transactions::TxState;
use thiserror::Error;

/// Coarse error classification shared by every crate.
///
/// Callers use it to decide whether to surface, retry, or escalate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Caller mistake: bad token, bad amount, expired deadline, slippage
    Validation,
    /// Not enough liquidity, unknown pool, duplicate pair
    Liquidity,
    /// Internal-consistency failure that must never happen under correct logic
    Invariant,
    /// Network or timeout talking to the ledger or a venue
    Transient,
    /// Storage, serialization or other infrastructure failure
    Internal,
}

impl ErrorClass {
    /// Only transient failures are worth retrying
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorClass::Transient)
    }
}

/// Errors raised while building identifiers or moving records between states
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TypesError {
    /// Token identifier is empty or contains whitespace
    #[error("Invalid token identifier: '{0}'")]
    InvalidToken(String),

    /// Both sides of a pair are the same token
    #[error("Identical tokens: {0}")]
    IdenticalTokens(String),

    /// Account identifier is empty
    #[error("Invalid account identifier: '{0}'")]
    InvalidAccount(String),

    /// Account name reserved for the locked minimum liquidity
    #[error("Reserved account identifier: '{0}'")]
    ReservedAccount(String),

    /// Transaction state machine rejected the move
    #[error("Invalid transaction transition {from} -> {to}")]
    InvalidTransition { from: TxState, to: TxState },
}

impl TypesError {
    pub fn class(&self) -> ErrorClass {
        match self {
            TypesError::InvalidTransition { .. } => ErrorClass::Invariant,
            _ => ErrorClass::Validation,
        }
    }
}
