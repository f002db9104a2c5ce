//! # Settlement Service
//!
//! ## Purpose
//!
//! Runs operations whose funds move in two ledger transactions: the user's
//! transfer into the intermediary account (TX1) and the operator's settlement
//! out of it (TX2). Every step is persisted, so an interrupted settlement can
//! be retried, resumed after a restart, or refunded.
//!
//! ## Integration Points
//!
//! - **Pool state**: `LiquidityEngine::plan` / `commit`; the plan is stored on
//!   the record before submission and committed once per transaction id
//! - **Ledger**: any [`SettlementLedger`]; [`LocalLedger`] in process,
//!   [`HttpSettlementLedger`] against a gateway
//! - **Storage**: any [`TransactionStore`]; memory or JSON file
//!
//! ## Failure Model
//!
//! - Transient ledger errors are retried with doubling backoff up to
//!   `max_attempts`, then recorded as `TX2_FAILED`
//! - Rejections and pool validation errors go straight to `TX2_FAILED`
//! - `TX2_FAILED` records keep their parameters and last error until an
//!   operator (or `recover_with_refund`) moves them to `RECOVERED`

pub mod coordinator;
pub mod error;
pub mod http_ledger;
pub mod ledger;
pub mod retry;
pub mod store;

pub use coordinator::{ResumeReport, TransactionCoordinator};
pub use error::{LedgerError, Result, SettlementError, StoreError};
pub use http_ledger::HttpSettlementLedger;
pub use ledger::{LocalLedger, SettlementLedger, SettlementRequest};
pub use retry::{RetryOutcome, RetryPolicy};
pub use store::{JsonFileTransactionStore, MemoryTransactionStore, TransactionStore};
