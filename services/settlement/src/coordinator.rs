//! Two-Phase Transaction Coordinator
//!
//! TX1 moves the user's funds into the intermediary account; TX2 is the
//! operator's settlement out of it. The coordinator persists every step so a
//! crash between the two can be resumed from the stored parameters.
//!
//! ## Settlement order
//!
//! 1. take the in-flight guard for the transaction (one settler per id)
//! 2. reuse the plan stored on the record, or plan against current reserves
//!    (deadline checked here) and store it before anything is submitted
//! 3. submit the transfers from the intermediary with bounded retries; no
//!    pool lock is held while the ledger is called
//! 4. commit the plan to the pool, keyed by the transaction id
//! 5. compare-and-set `TX1_COMPLETE -> TX2_COMPLETE`
//!
//! Settlements on one pool run concurrently. The commit re-checks the plan
//! against the reserves of that moment, so one that lost a race fails as
//! `TX2_FAILED` with its ledger reference kept for the operator.

use crate::error::{LedgerError, Result, SettlementError, StoreError};
use crate::ledger::{SettlementLedger, SettlementRequest};
use crate::retry::RetryPolicy;
use crate::store::TransactionStore;
use chrono::Duration;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use pool_state::LiquidityEngine;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use types::{
    AccountId, OperationParams, PendingTransaction, SettlementPlan, TxId, TxState, Transfer,
};

/// Counts from one `resume_stuck` sweep
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ResumeReport {
    pub settled: usize,
    pub failed: usize,
    pub skipped: usize,
}

pub struct TransactionCoordinator {
    engine: Arc<LiquidityEngine>,
    store: Arc<dyn TransactionStore>,
    ledger: Arc<dyn SettlementLedger>,
    retry: RetryPolicy,
    /// Operator account that receives TX1 deposits and signs TX2
    intermediary: AccountId,
    in_flight: DashMap<TxId, ()>,
}

/// Removes the in-flight marker when dropped
struct InFlight<'a> {
    map: &'a DashMap<TxId, ()>,
    id: TxId,
}

impl<'a> InFlight<'a> {
    fn acquire(map: &'a DashMap<TxId, ()>, id: TxId) -> Result<Self> {
        match map.entry(id) {
            Entry::Occupied(_) => Err(SettlementError::InProgress(id)),
            Entry::Vacant(entry) => {
                entry.insert(());
                Ok(Self { map, id })
            }
        }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.map.remove(&self.id);
    }
}

impl TransactionCoordinator {
    pub fn new(
        engine: Arc<LiquidityEngine>,
        store: Arc<dyn TransactionStore>,
        ledger: Arc<dyn SettlementLedger>,
        retry: RetryPolicy,
        intermediary: AccountId,
    ) -> Self {
        Self {
            engine,
            store,
            ledger,
            retry,
            intermediary,
            in_flight: DashMap::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn TransactionStore> {
        &self.store
    }

    pub fn intermediary(&self) -> &AccountId {
        &self.intermediary
    }

    /// Record a new operation in `PENDING_TX1`
    pub fn create(&self, user: &AccountId, params: OperationParams) -> Result<TxId> {
        self.engine.ensure_deadline(params.deadline())?;
        let (token_a, token_b) = params.tokens();
        let registry = self.engine.registry();
        let pool_id = match &params {
            OperationParams::AddLiquidity { .. } => registry.get_or_create(token_a, token_b)?,
            _ => registry.get(token_a, token_b)?,
        };

        let tx = PendingTransaction::new(user.clone(), pool_id, params, self.engine.clock().now());
        let id = tx.id;
        let kind = tx.kind;
        self.store.insert(tx)?;
        info!(tx = %id, kind = %kind, user = %user, pool = %pool_id, "transaction created");
        Ok(id)
    }

    pub fn get(&self, id: &TxId) -> Result<PendingTransaction> {
        Ok(self.store.get(id)?)
    }

    /// Move a record to `next` under compare-and-set on its current state
    fn advance(
        &self,
        mut tx: PendingTransaction,
        next: TxState,
        update: impl FnOnce(&mut PendingTransaction),
    ) -> Result<PendingTransaction> {
        let expected = tx.state;
        tx.transition(next, self.engine.clock().now())?;
        update(&mut tx);
        self.store.compare_and_set(expected, tx.clone())?;
        info!(tx = %tx.id, from = %expected, to = %next, attempts = tx.attempts, "transaction state changed");
        Ok(tx)
    }

    /// Store the plan on a `TX1_COMPLETE` record before it is submitted
    fn record_plan(&self, mut tx: PendingTransaction, plan: SettlementPlan) -> Result<PendingTransaction> {
        tx.plan = Some(plan);
        tx.updated_at = self.engine.clock().now();
        self.store.compare_and_set(TxState::Tx1Complete, tx.clone())?;
        debug!(tx = %tx.id, "settlement plan stored");
        Ok(tx)
    }

    fn expect_state(tx: &PendingTransaction, expected: TxState) -> Result<()> {
        if tx.state != expected {
            return Err(SettlementError::InvalidState {
                id: tx.id,
                expected,
                actual: tx.state,
            });
        }
        Ok(())
    }

    pub fn mark_tx1_complete(&self, id: &TxId, tx1_ref: &str) -> Result<PendingTransaction> {
        let tx = self.store.get(id)?;
        Self::expect_state(&tx, TxState::PendingTx1)?;
        let tx1_ref = tx1_ref.to_string();
        self.advance(tx, TxState::Tx1Complete, |tx| tx.tx1_ref = Some(tx1_ref))
    }

    /// Settle TX2. Safe to call concurrently and repeatedly; at most one call
    /// moves the record to `TX2_COMPLETE`.
    pub async fn attempt_tx2(&self, id: &TxId) -> Result<PendingTransaction> {
        let _guard = InFlight::acquire(&self.in_flight, *id)?;

        let tx = self.store.get(id)?;
        match tx.state {
            TxState::Tx1Complete => {}
            TxState::Tx2Complete => return Err(SettlementError::AlreadySettled(*id)),
            actual => {
                return Err(SettlementError::InvalidState {
                    id: *id,
                    expected: TxState::Tx1Complete,
                    actual,
                })
            }
        }

        // a stored plan was fixed before its deadline and may already be on the ledger
        let (tx, plan) = match tx.plan.clone() {
            Some(plan) => {
                info!(tx = %tx.id, attempts = tx.attempts, "replaying stored settlement plan");
                (tx, plan)
            }
            None => match self.engine.plan(&tx.user, &tx.pool_id, &tx.params) {
                Ok(plan) => (self.record_plan(tx, plan.clone())?, plan),
                Err(e) => return self.fail(tx, 0, None, e.to_string(), false),
            },
        };

        let request = SettlementRequest {
            idempotency_key: tx.id.to_string(),
            pool_id: tx.pool_id,
            from: self.intermediary.clone(),
            transfers: plan.transfers.clone(),
        };
        let ledger = Arc::clone(&self.ledger);
        let outcome = self
            .retry
            .run(
                "settlement submit",
                |_| {
                    let ledger = Arc::clone(&ledger);
                    let request = request.clone();
                    async move { ledger.submit(&request).await }
                },
                LedgerError::is_transient,
            )
            .await;
        let attempts = tx.attempts + outcome.attempts;

        let tx2_ref = match outcome.result {
            Ok(reference) => reference,
            Err(e) => {
                let transient = e.is_transient();
                return self.fail(tx, attempts, None, e.to_string(), transient);
            }
        };

        if let Err(e) = self.engine.commit(&tx.id, &plan) {
            error!(
                tx = %tx.id,
                tx2 = %tx2_ref,
                error = %e,
                "ledger settled but pool commit failed, operator action required"
            );
            let reason = format!("ledger settled as {tx2_ref} but pool commit failed: {e}");
            return self.fail(tx, attempts, Some(tx2_ref), reason, false);
        }

        let id = tx.id;
        let settled = self.advance(tx, TxState::Tx2Complete, |tx| {
            tx.tx2_ref = Some(tx2_ref);
            tx.attempts = attempts;
            tx.last_error = None;
        })?;
        self.engine.release_applied(&id);
        Ok(settled)
    }

    fn fail(
        &self,
        tx: PendingTransaction,
        attempts: u32,
        tx2_ref: Option<String>,
        reason: String,
        transient: bool,
    ) -> Result<PendingTransaction> {
        warn!(tx = %tx.id, tx1 = ?tx.tx1_ref, reason = %reason, transient, "settlement failed");
        let id = tx.id;
        let tx1_ref = tx.tx1_ref.clone();
        let recorded = reason.clone();
        let attempts = attempts.max(tx.attempts);
        self.advance(tx, TxState::Tx2Failed, |tx| {
            tx.last_error = Some(recorded);
            tx.attempts = attempts;
            tx.tx2_ref = tx2_ref;
        })?;
        Err(SettlementError::SettlementFailed {
            id,
            tx1_ref,
            reason,
            transient,
        })
    }

    /// `TX1_COMPLETE` records not updated for at least `older_than`
    pub fn list_stuck(&self, older_than: Duration) -> Vec<PendingTransaction> {
        let cutoff = self.engine.clock().now() - older_than;
        self.store
            .list_in_state(TxState::Tx1Complete)
            .into_iter()
            .filter(|tx| tx.updated_at <= cutoff)
            .collect()
    }

    pub fn list_failed(&self) -> Vec<PendingTransaction> {
        self.store.list_in_state(TxState::Tx2Failed)
    }

    pub fn mark_recovered(&self, id: &TxId, recovery_ref: &str) -> Result<PendingTransaction> {
        let tx = self.store.get(id)?;
        Self::expect_state(&tx, TxState::Tx2Failed)?;
        let recovery_ref = recovery_ref.to_string();
        self.advance(tx, TxState::Recovered, |tx| {
            tx.recovery_ref = Some(recovery_ref)
        })
    }

    /// Return the TX1 deposit to the user and mark the record `RECOVERED`
    pub async fn recover_with_refund(&self, id: &TxId) -> Result<PendingTransaction> {
        let _guard = InFlight::acquire(&self.in_flight, *id)?;
        let tx = self.store.get(id)?;
        Self::expect_state(&tx, TxState::Tx2Failed)?;
        if tx.tx2_ref.is_some() {
            return Err(SettlementError::SettledOnLedger(*id));
        }

        let request = SettlementRequest {
            idempotency_key: format!("{}:refund", tx.id),
            pool_id: tx.pool_id,
            from: self.intermediary.clone(),
            transfers: tx
                .params
                .deposits(&tx.pool_id)
                .into_iter()
                .filter(|(_, amount)| *amount > 0)
                .map(|(token, amount)| Transfer {
                    token,
                    to: tx.user.clone(),
                    amount,
                })
                .collect(),
        };
        let ledger = Arc::clone(&self.ledger);
        let outcome = self
            .retry
            .run(
                "refund submit",
                |_| {
                    let ledger = Arc::clone(&ledger);
                    let request = request.clone();
                    async move { ledger.submit(&request).await }
                },
                LedgerError::is_transient,
            )
            .await;

        let recovery_ref = outcome.result.map_err(|e| SettlementError::RefundFailed {
            id: *id,
            reason: e.to_string(),
        })?;
        info!(tx = %id, refund = %recovery_ref, "deposit refunded");
        self.advance(tx, TxState::Recovered, |tx| {
            tx.recovery_ref = Some(recovery_ref)
        })
    }

    /// Forget commit markers of records that are no longer awaiting settlement
    pub fn release_finished(&self) -> usize {
        let mut released = 0;
        for id in self.engine.applied_ids() {
            let waiting = matches!(self.store.get(&id), Ok(tx) if tx.state == TxState::Tx1Complete);
            if !waiting {
                self.engine.release_applied(&id);
                released += 1;
            }
        }
        if released > 0 {
            debug!(released, "released finished commit markers");
        }
        released
    }

    /// Replay settlement for every stuck record
    pub async fn resume_stuck(&self, older_than: Duration) -> ResumeReport {
        let mut report = ResumeReport::default();
        let stuck = self.list_stuck(older_than);
        if !stuck.is_empty() {
            info!("Resuming {} stuck settlements", stuck.len());
        }
        for tx in stuck {
            match self.attempt_tx2(&tx.id).await {
                Ok(_) => report.settled += 1,
                Err(SettlementError::InProgress(_))
                | Err(SettlementError::AlreadySettled(_))
                | Err(SettlementError::Store(StoreError::Conflict { .. })) => report.skipped += 1,
                Err(_) => report.failed += 1,
            }
        }
        report
    }
}
