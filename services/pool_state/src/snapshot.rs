//! Reserve snapshots and fee APY
//!
//! Snapshots are append-only and bucketed by `interval_secs`; the first
//! sample in a bucket wins. The APY estimate compares reserve value per share
//! now against the newest snapshot at least `lookback_secs` old, valued at
//! today's prices, so deposits and withdrawals do not register as fee income.

use crate::error::{PoolError, Result};
use crate::pool::Pool;
use dashmap::DashMap;
use kestrel_amm::AmmError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::debug;
use types::{PoolId, Snapshot, TokenId};

const SECONDS_PER_DAY: u64 = 86_400;
const DAYS_PER_YEAR: u64 = 365;

#[derive(Debug)]
pub struct SnapshotBook {
    interval_secs: u64,
    snapshots: DashMap<PoolId, BTreeMap<u64, Snapshot>>,
}

impl SnapshotBook {
    pub fn new(interval_secs: u64) -> Self {
        Self {
            interval_secs,
            snapshots: DashMap::new(),
        }
    }

    pub fn interval_secs(&self) -> u64 {
        self.interval_secs
    }

    /// Sample `pool` at `now`; false when its bucket already has a sample
    pub fn record(&self, pool: &Pool, now: u64) -> bool {
        let snapshot = pool.snapshot(now);
        let bucket = snapshot.bucket(self.interval_secs);
        let mut history = self.snapshots.entry(pool.id()).or_default();
        if history.contains_key(&bucket) {
            return false;
        }
        debug!(pool = %pool.id(), bucket, reserve0 = snapshot.reserve0, reserve1 = snapshot.reserve1, "snapshot recorded");
        history.insert(bucket, snapshot);
        true
    }

    /// Sample every pool; returns how many new snapshots were written
    pub fn record_all(&self, pools: &[Pool], now: u64) -> usize {
        pools.iter().filter(|pool| self.record(pool, now)).count()
    }

    pub fn history(&self, pool_id: &PoolId) -> Vec<Snapshot> {
        self.snapshots
            .get(pool_id)
            .map(|h| h.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Newest snapshot taken no later than `timestamp`
    pub fn latest_at_or_before(&self, pool_id: &PoolId, timestamp: u64) -> Option<Snapshot> {
        let history = self.snapshots.get(pool_id)?;
        let bucket = if self.interval_secs == 0 {
            timestamp
        } else {
            timestamp / self.interval_secs
        };
        history
            .range(..=bucket)
            .rev()
            .map(|(_, s)| s)
            .find(|s| s.timestamp <= timestamp)
            .cloned()
    }

    pub fn export(&self) -> Vec<Snapshot> {
        let mut all: Vec<Snapshot> = self
            .snapshots
            .iter()
            .flat_map(|e| e.value().values().cloned().collect::<Vec<_>>())
            .collect();
        all.sort_by(|a, b| (a.pool_id, a.timestamp).cmp(&(b.pool_id, b.timestamp)));
        all
    }

    pub fn restore(&self, snapshots: Vec<Snapshot>) {
        self.snapshots.clear();
        for snapshot in snapshots {
            let bucket = snapshot.bucket(self.interval_secs);
            self.snapshots
                .entry(snapshot.pool_id)
                .or_default()
                .entry(bucket)
                .or_insert(snapshot);
        }
    }
}

/// USD valuation of raw token amounts
pub trait PriceOracle: Send + Sync {
    /// `None` when the token has no price
    fn usd_value(&self, token: &TokenId, amount: u128) -> Option<Decimal>;
}

/// Fixed prices from configuration
#[derive(Debug, Default, Clone)]
pub struct StaticPriceOracle {
    prices: HashMap<TokenId, (Decimal, u32)>,
}

impl StaticPriceOracle {
    pub fn new() -> Self {
        Self::default()
    }

    /// `usd` per whole token; raw amounts carry `decimals` places
    pub fn with_price(mut self, token: TokenId, usd: Decimal, decimals: u32) -> Self {
        self.prices.insert(token, (usd, decimals));
        self
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }
}

impl PriceOracle for StaticPriceOracle {
    fn usd_value(&self, token: &TokenId, amount: u128) -> Option<Decimal> {
        let (usd, decimals) = self.prices.get(token)?;
        let raw = i128::try_from(amount).ok()?;
        let whole = Decimal::try_from_i128_with_scale(raw, *decimals).ok()?;
        whole.checked_mul(*usd)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApyEstimate {
    /// Annualized fee yield in percent
    pub apy: Decimal,
    pub volume_24h: Decimal,
    pub tvl_usd: Decimal,
}

pub struct ApyEstimator {
    snapshots: Arc<SnapshotBook>,
    oracle: Arc<dyn PriceOracle>,
    lookback_secs: u64,
}

fn overflow() -> PoolError {
    AmmError::Overflow("apy").into()
}

fn to_decimal(value: u128) -> Result<Decimal> {
    let raw = i128::try_from(value).map_err(|_| overflow())?;
    Decimal::try_from_i128_with_scale(raw, 0).map_err(|_| overflow())
}

impl ApyEstimator {
    pub fn new(
        snapshots: Arc<SnapshotBook>,
        oracle: Arc<dyn PriceOracle>,
        lookback_secs: u64,
    ) -> Self {
        Self {
            snapshots,
            oracle,
            lookback_secs,
        }
    }

    fn value_of(&self, pool: &Pool, reserve0: u128, reserve1: u128) -> Result<Decimal> {
        let pair = pool.pair();
        let value0 = self
            .oracle
            .usd_value(&pair.token0, reserve0)
            .ok_or_else(|| PoolError::PriceUnavailable(pair.token0.clone()))?;
        let value1 = self
            .oracle
            .usd_value(&pair.token1, reserve1)
            .ok_or_else(|| PoolError::PriceUnavailable(pair.token1.clone()))?;
        value0.checked_add(value1).ok_or_else(overflow)
    }

    pub fn estimate(&self, pool: &Pool, now: u64) -> Result<ApyEstimate> {
        let (reserve0, reserve1) = pool.reserves();
        let tvl_usd = self.value_of(pool, reserve0, reserve1)?;
        let zero = ApyEstimate {
            apy: Decimal::ZERO,
            volume_24h: Decimal::ZERO,
            tvl_usd,
        };

        let Some(baseline) = self
            .snapshots
            .latest_at_or_before(&pool.id(), now.saturating_sub(self.lookback_secs))
        else {
            return Ok(zero);
        };
        let elapsed = now.saturating_sub(baseline.timestamp);
        if elapsed == 0 || baseline.total_shares == 0 || pool.total_shares() == 0 || tvl_usd.is_zero() {
            return Ok(zero);
        }

        // baseline value scaled to today's share supply
        let base_value = self.value_of(pool, baseline.reserve0, baseline.reserve1)?;
        let scaled = base_value
            .checked_mul(to_decimal(pool.total_shares())?)
            .and_then(|v| v.checked_div(to_decimal(baseline.total_shares).ok()?))
            .ok_or_else(overflow)?;
        let growth = tvl_usd - scaled;
        if growth <= Decimal::ZERO {
            return Ok(zero);
        }

        let daily = growth
            .checked_mul(Decimal::from(SECONDS_PER_DAY))
            .and_then(|v| v.checked_div(Decimal::from(elapsed)))
            .ok_or_else(overflow)?;
        let apy = daily
            .checked_mul(Decimal::from(DAYS_PER_YEAR * 100))
            .and_then(|v| v.checked_div(tvl_usd))
            .ok_or_else(overflow)?;
        let volume_24h = if pool.fee_bps() == 0 {
            Decimal::ZERO
        } else {
            daily
                .checked_mul(Decimal::from(10_000u32))
                .and_then(|v| v.checked_div(Decimal::from(pool.fee_bps())))
                .ok_or_else(overflow)?
        };

        debug!(pool = %pool.id(), %apy, %volume_24h, %tvl_usd, elapsed, "apy estimated");
        Ok(ApyEstimate {
            apy,
            volume_24h,
            tvl_usd,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use types::PairKey;

    const T0: u64 = 1_700_006_400;

    fn token(s: &str) -> TokenId {
        TokenId::new(s).unwrap()
    }

    fn pool_with(amount0: u128, amount1: u128) -> Pool {
        let pair = PairKey::new(&token("AAA"), &token("BBB")).unwrap();
        let mut pool = Pool::new(PoolId::derive("kestrel", &pair), pair, 25).unwrap();
        pool.mint(amount0, amount1, 0, 0, T0).unwrap();
        pool
    }

    fn oracle() -> Arc<dyn PriceOracle> {
        Arc::new(
            StaticPriceOracle::new()
                .with_price(token("AAA"), dec!(1), 0)
                .with_price(token("BBB"), dec!(1), 0),
        )
    }

    fn baseline(pool: &Pool, reserve: u128, total_shares: u128, timestamp: u64) -> Snapshot {
        Snapshot {
            pool_id: pool.id(),
            reserve0: reserve,
            reserve1: reserve,
            total_shares,
            timestamp,
        }
    }

    #[test]
    fn test_record_is_idempotent_per_bucket() {
        let book = SnapshotBook::new(3_600);
        let pool = pool_with(1_000_000, 1_000_000);
        assert!(book.record(&pool, T0));
        assert!(!book.record(&pool, T0 + 10));
        assert!(book.record(&pool, T0 + 3_600));
        assert_eq!(book.history(&pool.id()).len(), 2);
        assert_eq!(book.history(&pool.id())[0].timestamp, T0);
    }

    #[test]
    fn test_latest_at_or_before() {
        let book = SnapshotBook::new(3_600);
        let pool = pool_with(1_000_000, 1_000_000);
        book.record(&pool, T0);
        book.record(&pool, T0 + 7_200);

        assert!(book.latest_at_or_before(&pool.id(), T0 - 1).is_none());
        assert_eq!(
            book.latest_at_or_before(&pool.id(), T0 + 7_199).unwrap().timestamp,
            T0
        );
        assert_eq!(
            book.latest_at_or_before(&pool.id(), T0 + 9_000).unwrap().timestamp,
            T0 + 7_200
        );
    }

    #[test]
    fn test_static_oracle_scales_decimals() {
        let oracle = StaticPriceOracle::new().with_price(token("USDC"), dec!(1), 6);
        assert_eq!(oracle.usd_value(&token("USDC"), 2_500_000), Some(dec!(2.5)));
        assert_eq!(oracle.usd_value(&token("WETH"), 1), None);
    }

    #[test]
    fn test_apy_from_fee_growth() {
        // same share supply a day ago, 2_000 less in reserves
        let pool = pool_with(1_001_000, 1_001_000);
        let book = Arc::new(SnapshotBook::new(3_600));
        book.restore(vec![baseline(&pool, 1_000_000, 1_001_000, T0)]);

        let estimator = ApyEstimator::new(book, oracle(), 86_400);
        let estimate = estimator.estimate(&pool, T0 + 86_400).unwrap();

        assert_eq!(estimate.tvl_usd, dec!(2002000));
        assert_eq!(estimate.volume_24h, dec!(800000));
        assert_eq!(estimate.apy.round_dp(2), dec!(36.46));
    }

    #[test]
    fn test_deposit_is_not_growth() {
        let pool = pool_with(2_000_000, 2_000_000);
        let book = Arc::new(SnapshotBook::new(3_600));
        book.restore(vec![baseline(&pool, 1_000_000, 1_000_000, T0)]);

        let estimator = ApyEstimator::new(book, oracle(), 86_400);
        let estimate = estimator.estimate(&pool, T0 + 86_400).unwrap();
        assert_eq!(estimate.apy, Decimal::ZERO);
        assert_eq!(estimate.volume_24h, Decimal::ZERO);
    }

    #[test]
    fn test_no_baseline_gives_zero() {
        let pool = pool_with(1_000_000, 1_000_000);
        let book = Arc::new(SnapshotBook::new(3_600));
        book.record(&pool, T0);

        let estimator = ApyEstimator::new(book, oracle(), 86_400);
        let estimate = estimator.estimate(&pool, T0 + 3_600).unwrap();
        assert_eq!(estimate.apy, Decimal::ZERO);
        assert_eq!(estimate.tvl_usd, dec!(2000000));
    }

    #[test]
    fn test_missing_price() {
        let pool = pool_with(1_000_000, 1_000_000);
        let oracle: Arc<dyn PriceOracle> =
            Arc::new(StaticPriceOracle::new().with_price(token("AAA"), dec!(1), 0));
        let estimator = ApyEstimator::new(Arc::new(SnapshotBook::new(3_600)), oracle, 86_400);
        assert_eq!(
            estimator.estimate(&pool, T0),
            Err(PoolError::PriceUnavailable(token("BBB")))
        );
    }
}
