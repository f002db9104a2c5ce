//! Liquidity position ledger
//!
//! Share balances per `(pool, provider)`. Rows for a pool are only written
//! while that pool's reserve lock is held, which keeps the sum of positions
//! equal to the pool's total shares.

use crate::error::{PoolError, Result};
use dashmap::DashMap;
use kestrel_amm::AmmError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;
use types::{AccountId, PoolId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidityPosition {
    pub pool_id: PoolId,
    pub provider: AccountId,
    pub shares: u128,
}

#[derive(Debug, Default)]
pub struct LiquidityLedger {
    positions: DashMap<PoolId, HashMap<AccountId, u128>>,
}

impl LiquidityLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add shares; returns the new balance
    pub fn credit(&self, pool_id: &PoolId, provider: &AccountId, shares: u128) -> Result<u128> {
        let mut rows = self.positions.entry(*pool_id).or_default();
        let balance = rows.entry(provider.clone()).or_insert(0);
        *balance = balance
            .checked_add(shares)
            .ok_or(AmmError::Overflow("position credit"))?;
        debug!(pool = %pool_id, provider = %provider, shares, balance = *balance, "position credited");
        Ok(*balance)
    }

    /// Remove shares; the row disappears at zero
    pub fn debit(&self, pool_id: &PoolId, provider: &AccountId, shares: u128) -> Result<u128> {
        self.ensure_shares(pool_id, provider, shares)?;
        let mut rows = self.positions.entry(*pool_id).or_default();
        let remaining = match rows.get_mut(provider) {
            Some(balance) => {
                *balance -= shares;
                *balance
            }
            None => 0,
        };
        if remaining == 0 {
            rows.remove(provider);
        }
        debug!(pool = %pool_id, provider = %provider, shares, remaining, "position debited");
        Ok(remaining)
    }

    /// `InsufficientShares` unless `provider` holds at least `shares` (and `shares > 0`);
    /// the locked holder is never debited
    pub fn ensure_shares(&self, pool_id: &PoolId, provider: &AccountId, shares: u128) -> Result<()> {
        if provider.is_locked() {
            return Err(PoolError::LockedLiquidity(*pool_id));
        }
        let available = self.shares_of(pool_id, provider);
        if shares == 0 || shares > available {
            return Err(AmmError::InsufficientShares {
                requested: shares,
                available,
            }
            .into());
        }
        Ok(())
    }

    pub fn shares_of(&self, pool_id: &PoolId, provider: &AccountId) -> u128 {
        self.positions
            .get(pool_id)
            .and_then(|rows| rows.get(provider).copied())
            .unwrap_or(0)
    }

    pub fn position_of(&self, pool_id: &PoolId, provider: &AccountId) -> Option<LiquidityPosition> {
        let shares = self.shares_of(pool_id, provider);
        (shares > 0).then(|| LiquidityPosition {
            pool_id: *pool_id,
            provider: provider.clone(),
            shares,
        })
    }

    /// Every position in a pool, ordered by provider
    pub fn all_positions(&self, pool_id: &PoolId) -> Vec<LiquidityPosition> {
        let mut positions: Vec<LiquidityPosition> = self
            .positions
            .get(pool_id)
            .map(|rows| {
                rows.iter()
                    .map(|(provider, shares)| LiquidityPosition {
                        pool_id: *pool_id,
                        provider: provider.clone(),
                        shares: *shares,
                    })
                    .collect()
            })
            .unwrap_or_default();
        positions.sort_by(|a, b| a.provider.cmp(&b.provider));
        positions
    }

    pub fn total_for(&self, pool_id: &PoolId) -> u128 {
        self.positions
            .get(pool_id)
            .map(|rows| rows.values().sum())
            .unwrap_or(0)
    }

    /// Every position in every pool
    pub fn export(&self) -> Vec<LiquidityPosition> {
        let mut pool_ids: Vec<PoolId> = self.positions.iter().map(|e| *e.key()).collect();
        pool_ids.sort();
        pool_ids
            .iter()
            .flat_map(|id| self.all_positions(id))
            .collect()
    }

    pub fn restore(&self, positions: Vec<LiquidityPosition>) {
        self.positions.clear();
        for position in positions.into_iter().filter(|p| p.shares > 0) {
            self.positions
                .entry(position.pool_id)
                .or_default()
                .insert(position.provider, position.shares);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> PoolId {
        PoolId::from_bytes([1u8; 20])
    }

    fn alice() -> AccountId {
        AccountId::new("alice").unwrap()
    }

    #[test]
    fn test_credit_and_debit() {
        let ledger = LiquidityLedger::new();
        assert_eq!(ledger.credit(&pool(), &alice(), 500).unwrap(), 500);
        assert_eq!(ledger.credit(&pool(), &alice(), 250).unwrap(), 750);
        assert_eq!(ledger.debit(&pool(), &alice(), 700).unwrap(), 50);
        assert_eq!(ledger.position_of(&pool(), &alice()).unwrap().shares, 50);
    }

    #[test]
    fn test_debit_to_zero_removes_position() {
        let ledger = LiquidityLedger::new();
        ledger.credit(&pool(), &alice(), 10).unwrap();
        ledger.debit(&pool(), &alice(), 10).unwrap();
        assert!(ledger.position_of(&pool(), &alice()).is_none());
        assert!(ledger.all_positions(&pool()).is_empty());
    }

    #[test]
    fn test_overdraw_is_rejected() {
        let ledger = LiquidityLedger::new();
        ledger.credit(&pool(), &alice(), 10).unwrap();
        let err = ledger.debit(&pool(), &alice(), 11).unwrap_err();
        assert_eq!(
            err,
            PoolError::Math(AmmError::InsufficientShares {
                requested: 11,
                available: 10
            })
        );
        assert!(ledger.debit(&pool(), &alice(), 0).is_err());
        assert_eq!(ledger.shares_of(&pool(), &alice()), 10);
    }

    #[test]
    fn test_all_positions_and_totals() {
        let ledger = LiquidityLedger::new();
        let bob = AccountId::new("bob").unwrap();
        ledger.credit(&pool(), &bob, 30).unwrap();
        ledger.credit(&pool(), &alice(), 20).unwrap();
        ledger.credit(&pool(), &AccountId::locked(), 1_000).unwrap();

        let positions = ledger.all_positions(&pool());
        assert_eq!(positions.len(), 3);
        assert_eq!(positions[0].provider, alice());
        assert_eq!(ledger.total_for(&pool()), 1_050);

        let copy = LiquidityLedger::new();
        copy.restore(ledger.export());
        assert_eq!(copy.total_for(&pool()), 1_050);
    }

    #[test]
    fn test_locked_shares_cannot_be_debited() {
        let ledger = LiquidityLedger::new();
        ledger.credit(&pool(), &AccountId::locked(), 1_000).unwrap();
        assert_eq!(
            ledger.debit(&pool(), &AccountId::locked(), 1).unwrap_err(),
            PoolError::LockedLiquidity(pool())
        );
        assert_eq!(ledger.shares_of(&pool(), &AccountId::locked()), 1_000);
    }
}
