//! # Kestrel Shared Types
//!
//! Identifier and record types shared by every Kestrel crate.
//!
//! ## Design Philosophy
//!
//! - **Canonical Pairs**: `(A, B)` and `(B, A)` always resolve to the same [`PairKey`]
//! - **Predictable Pool Ids**: [`PoolId`] is derived from the pair key before the pool exists
//! - **Typed Identifiers**: tokens, accounts, pools and transactions cannot be mixed up
//! - **Explicit Time**: components receive a [`Clock`] instead of reading the system time
//!
//! ## Integration Points
//!
//! - **AMM math**: [`ErrorClass`] for error classification
//! - **Pool state**: pair keys, pool ids, snapshots, transfers
//! - **Settlement**: pending transaction records and their state machine
//! - **Aggregator**: token ids for quote requests

pub mod clock;
pub mod errors;
pub mod identifiers;
pub mod snapshot;
pub mod transactions;

pub use clock::{Clock, ManualClock, SystemClock};
pub use errors::{ErrorClass, TypesError};
pub use identifiers::{AccountId, PairKey, PoolId, TokenId, TxId};
pub use snapshot::Snapshot;
pub use transactions::{
    share_token, OperationParams, PendingTransaction, PlannedAction, SettlementPlan, Transfer,
    TxKind, TxState,
};
