//! Settlement ledger seam
//!
//! TX2 is one operator-signed batch of transfers out of the intermediary
//! account. Every submission carries an idempotency key; a ledger must apply
//! a key at most once and return the original reference on replay.

use crate::error::LedgerError;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;
use types::{AccountId, PoolId, TokenId, Transfer};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementRequest {
    pub idempotency_key: String,
    pub pool_id: PoolId,
    /// Intermediary account the transfers are paid from
    pub from: AccountId,
    pub transfers: Vec<Transfer>,
}

#[async_trait]
pub trait SettlementLedger: Send + Sync {
    fn name(&self) -> &str;

    /// Submit the transfers; returns the ledger's reference for the settlement
    async fn submit(&self, request: &SettlementRequest) -> Result<String, LedgerError>;
}

/// In-process ledger. Credits recipients directly, tracks what each paying
/// account sent and remembers every key.
#[derive(Debug, Default)]
pub struct LocalLedger {
    balances: DashMap<(AccountId, TokenId), u128>,
    outflows: DashMap<(AccountId, TokenId), u128>,
    submissions: Mutex<HashMap<String, String>>,
}

impl LocalLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn balance_of(&self, account: &AccountId, token: &TokenId) -> u128 {
        self.balances
            .get(&(account.clone(), token.clone()))
            .map(|b| *b)
            .unwrap_or(0)
    }

    /// Total `account` has paid out in `token`
    pub fn outflow_of(&self, account: &AccountId, token: &TokenId) -> u128 {
        self.outflows
            .get(&(account.clone(), token.clone()))
            .map(|b| *b)
            .unwrap_or(0)
    }

    pub fn submission_count(&self) -> usize {
        self.submissions.lock().len()
    }
}

#[async_trait]
impl SettlementLedger for LocalLedger {
    fn name(&self) -> &str {
        "local"
    }

    async fn submit(&self, request: &SettlementRequest) -> Result<String, LedgerError> {
        let mut submissions = self.submissions.lock();
        if let Some(existing) = submissions.get(&request.idempotency_key) {
            debug!(key = %request.idempotency_key, reference = %existing, "replayed settlement");
            return Ok(existing.clone());
        }

        for transfer in &request.transfers {
            let mut balance = self
                .balances
                .entry((transfer.to.clone(), transfer.token.clone()))
                .or_insert(0);
            *balance = balance
                .checked_add(transfer.amount)
                .ok_or_else(|| LedgerError::Rejected(format!("balance overflow for {}", transfer.to)))?;
            drop(balance);
            let mut sent = self
                .outflows
                .entry((request.from.clone(), transfer.token.clone()))
                .or_insert(0);
            *sent = sent.saturating_add(transfer.amount);
        }

        let reference = format!("local-{}", submissions.len() + 1);
        submissions.insert(request.idempotency_key.clone(), reference.clone());
        debug!(
            key = %request.idempotency_key,
            reference = %reference,
            from = %request.from,
            transfers = request.transfers.len(),
            "settlement applied"
        );
        Ok(reference)
    }
}
