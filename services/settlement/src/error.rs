//! Settlement errors

use pool_state::PoolError;
use thiserror::Error;
use types::{ErrorClass, TxId, TxState, TypesError};

pub type Result<T> = std::result::Result<T, SettlementError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Transaction {0} not found")]
    NotFound(TxId),

    #[error("Transaction {0} already exists")]
    Duplicate(TxId),

    /// Compare-and-set lost: somebody moved the record first
    #[error("Transaction {id} is {actual}, expected {expected}")]
    Conflict {
        id: TxId,
        expected: TxState,
        actual: TxState,
    },

    #[error("Transaction store I/O: {0}")]
    Io(String),
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Io(e.to_string())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Connect failure, timeout or server error; safe to resubmit
    #[error("Ledger unavailable: {0}")]
    Transient(String),

    /// The ledger refused the settlement; resubmitting will not help
    #[error("Ledger rejected settlement: {0}")]
    Rejected(String),
}

impl LedgerError {
    pub fn is_transient(&self) -> bool {
        matches!(self, LedgerError::Transient(_))
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            LedgerError::Transient(_) => ErrorClass::Transient,
            LedgerError::Rejected(_) => ErrorClass::Validation,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SettlementError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Types(#[from] TypesError),

    #[error("Transaction {id} is {actual}, operation needs {expected}")]
    InvalidState {
        id: TxId,
        expected: TxState,
        actual: TxState,
    },

    /// Another task is settling the same transaction right now
    #[error("Settlement of {0} already in progress")]
    InProgress(TxId),

    #[error("Transaction {0} already settled")]
    AlreadySettled(TxId),

    /// Ledger holds a settlement for this transaction; refunding would pay twice
    #[error("Transaction {0} settled on the ledger; refund refused")]
    SettledOnLedger(TxId),

    /// TX1 went through, TX2 did not. The record is in `TX2_FAILED`.
    #[error("Settlement of {id} failed after TX1 {tx1_ref:?}: {reason}")]
    SettlementFailed {
        id: TxId,
        tx1_ref: Option<String>,
        reason: String,
        transient: bool,
    },

    #[error("Refund of {id} failed: {reason}")]
    RefundFailed { id: TxId, reason: String },
}

impl SettlementError {
    pub fn class(&self) -> ErrorClass {
        match self {
            SettlementError::Store(StoreError::Io(_)) => ErrorClass::Internal,
            SettlementError::Store(_) => ErrorClass::Validation,
            SettlementError::Pool(e) => e.class(),
            SettlementError::Types(e) => e.class(),
            SettlementError::InProgress(_) => ErrorClass::Transient,
            SettlementError::SettlementFailed { transient: true, .. }
            | SettlementError::RefundFailed { .. } => ErrorClass::Transient,
            _ => ErrorClass::Validation,
        }
    }
}
