//! Protocol fee treasury
//!
//! The protocol leg of every swap fee accrues here per token; it never enters
//! pool reserves.

use crate::error::Result;
use dashmap::DashMap;
use kestrel_amm::AmmError;
use tracing::debug;
use types::{AccountId, TokenId};

#[derive(Debug)]
pub struct Treasury {
    account: AccountId,
    balances: DashMap<TokenId, u128>,
}

impl Treasury {
    pub fn new(account: AccountId) -> Self {
        Self {
            account,
            balances: DashMap::new(),
        }
    }

    pub fn account(&self) -> &AccountId {
        &self.account
    }

    pub fn accrue(&self, token: &TokenId, amount: u128) -> Result<()> {
        if amount == 0 {
            return Ok(());
        }
        let mut balance = self.balances.entry(token.clone()).or_insert(0);
        *balance = balance
            .checked_add(amount)
            .ok_or(AmmError::Overflow("treasury"))?;
        debug!(token = %token, amount, balance = *balance, "protocol fee accrued");
        Ok(())
    }

    pub fn balance_of(&self, token: &TokenId) -> u128 {
        self.balances.get(token).map(|b| *b).unwrap_or(0)
    }

    /// All balances, ordered by token
    pub fn balances(&self) -> Vec<(TokenId, u128)> {
        let mut balances: Vec<(TokenId, u128)> = self
            .balances
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect();
        balances.sort();
        balances
    }

    pub fn restore(&self, balances: Vec<(TokenId, u128)>) {
        self.balances.clear();
        for (token, amount) in balances {
            self.balances.insert(token, amount);
        }
    }
}
