//! Single constant product pool
//!
//! A [`Pool`] is plain data plus the state transitions that keep it valid:
//! every reserve change goes through one update step that enforces the
//! 112-bit reserve cap and advances the cumulative price accumulators.
//! Locking and position accounting live one level up, in the engine.

use crate::error::{PoolError, Result};
use ethnum::U256;
use kestrel_amm::arith::{ensure_reserve, mul_div, validate_fee, widen};
use kestrel_amm::{AmmError, AmmPool, PoolReserves, SwapDirection, V2Math, MINIMUM_LIQUIDITY};
use serde::{Deserialize, Serialize};
use types::{PairKey, PoolId, Snapshot, TokenId};

/// 2^112, the UQ112x112 resolution of the price accumulators
const Q112: u128 = 1 << 112;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolStatus {
    Active,
    Paused,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapOutcome {
    pub direction: SwapDirection,
    pub amount_in: u128,
    pub amount_out: u128,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MintOutcome {
    pub amount0: u128,
    pub amount1: u128,
    pub shares: u128,
    /// Permanently locked on the first deposit, zero afterwards
    pub locked: u128,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BurnOutcome {
    pub amount0: u128,
    pub amount1: u128,
    pub shares: u128,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pool {
    id: PoolId,
    pair: PairKey,
    reserve0: u128,
    reserve1: u128,
    total_shares: u128,
    fee_bps: u32,
    status: PoolStatus,
    #[serde(with = "u256_string")]
    price0_cumulative: U256,
    #[serde(with = "u256_string")]
    price1_cumulative: U256,
    block_timestamp_last: u32,
}

impl Pool {
    /// Empty pool; `mint` is the only way in
    pub fn new(id: PoolId, pair: PairKey, fee_bps: u32) -> Result<Self> {
        validate_fee(fee_bps)?;
        Ok(Self {
            id,
            pair,
            reserve0: 0,
            reserve1: 0,
            total_shares: 0,
            fee_bps,
            status: PoolStatus::Active,
            price0_cumulative: U256::ZERO,
            price1_cumulative: U256::ZERO,
            block_timestamp_last: 0,
        })
    }

    pub fn id(&self) -> PoolId {
        self.id
    }

    pub fn pair(&self) -> &PairKey {
        &self.pair
    }

    pub fn reserves(&self) -> (u128, u128) {
        (self.reserve0, self.reserve1)
    }

    pub fn total_shares(&self) -> u128 {
        self.total_shares
    }

    pub fn fee_bps(&self) -> u32 {
        self.fee_bps
    }

    pub fn status(&self) -> PoolStatus {
        self.status
    }

    pub fn is_paused(&self) -> bool {
        self.status == PoolStatus::Paused
    }

    pub fn price0_cumulative(&self) -> U256 {
        self.price0_cumulative
    }

    pub fn price1_cumulative(&self) -> U256 {
        self.price1_cumulative
    }

    pub fn block_timestamp_last(&self) -> u32 {
        self.block_timestamp_last
    }

    pub fn as_reserves(&self) -> PoolReserves {
        PoolReserves::new(self.reserve0, self.reserve1, self.fee_bps)
    }

    pub fn reserve_of(&self, token: &TokenId) -> Result<u128> {
        match self.direction(token)? {
            SwapDirection::ZeroForOne => Ok(self.reserve0),
            SwapDirection::OneForZero => Ok(self.reserve1),
        }
    }

    /// Direction of a swap selling `token_in`
    pub fn direction(&self, token_in: &TokenId) -> Result<SwapDirection> {
        if self.pair.token0 == *token_in {
            Ok(SwapDirection::ZeroForOne)
        } else if self.pair.token1 == *token_in {
            Ok(SwapDirection::OneForZero)
        } else {
            Err(PoolError::TokenNotInPool {
                token: token_in.clone(),
                pool_id: self.id,
            })
        }
    }

    pub fn set_status(&mut self, status: PoolStatus) {
        self.status = status;
    }

    fn ensure_active(&self) -> Result<()> {
        if self.is_paused() {
            return Err(PoolError::Paused(self.id));
        }
        Ok(())
    }

    /// Output for selling `amount_in` of `token_in`
    pub fn quote_out(&self, token_in: &TokenId, amount_in: u128) -> Result<u128> {
        self.ensure_active()?;
        let direction = self.direction(token_in)?;
        Ok(self.as_reserves().get_amount_out(amount_in, direction)?)
    }

    /// Minimal input needed to buy `amount_out` of `token_out`
    pub fn quote_in(&self, token_out: &TokenId, amount_out: u128) -> Result<u128> {
        self.ensure_active()?;
        let direction = self.direction(token_out)?.reversed();
        Ok(self.as_reserves().get_amount_in(amount_out, direction)?)
    }

    /// Exact-input swap. The whole input, LP fee included, stays in reserves.
    pub fn swap(
        &mut self,
        token_in: &TokenId,
        amount_in: u128,
        min_amount_out: u128,
        now: u64,
    ) -> Result<SwapOutcome> {
        self.ensure_active()?;
        let direction = self.direction(token_in)?;
        let amount_out = self.as_reserves().get_amount_out(amount_in, direction)?;
        if amount_out == 0 {
            return Err(PoolError::InsufficientOutputAmount);
        }
        if amount_out < min_amount_out {
            return Err(AmmError::SlippageExceeded {
                bound: "min_amount_out",
                limit: min_amount_out,
                actual: amount_out,
            }
            .into());
        }
        self.settle_swap(direction, amount_in, amount_out, now)?;
        Ok(SwapOutcome {
            direction,
            amount_in,
            amount_out,
        })
    }

    /// Apply a swap whose amounts were fixed elsewhere; the invariant still decides
    pub fn settle_swap(
        &mut self,
        direction: SwapDirection,
        amount_in: u128,
        amount_out: u128,
        now: u64,
    ) -> Result<()> {
        let overflow = AmmError::Overflow("swap balance");
        let (amount0_out, amount1_out, balance0, balance1) = match direction {
            SwapDirection::ZeroForOne => (
                0,
                amount_out,
                self.reserve0.checked_add(amount_in).ok_or(overflow)?,
                self.reserve1
                    .checked_sub(amount_out)
                    .ok_or(AmmError::InsufficientLiquidity)?,
            ),
            SwapDirection::OneForZero => (
                amount_out,
                0,
                self.reserve0
                    .checked_sub(amount_out)
                    .ok_or(AmmError::InsufficientLiquidity)?,
                self.reserve1.checked_add(amount_in).ok_or(overflow)?,
            ),
        };
        self.swap_with_balances(amount0_out, amount1_out, balance0, balance1, now)?;
        Ok(())
    }

    /// Pair-level swap.
    ///
    /// `balance0`/`balance1` are the pool's holdings after the requested
    /// outputs left; inputs are whatever those balances exceed the remaining
    /// reserves by. Returns `(amount0_in, amount1_in)`.
    pub fn swap_with_balances(
        &mut self,
        amount0_out: u128,
        amount1_out: u128,
        balance0: u128,
        balance1: u128,
        now: u64,
    ) -> Result<(u128, u128)> {
        self.ensure_active()?;
        if amount0_out == 0 && amount1_out == 0 {
            return Err(PoolError::InsufficientOutputAmount);
        }
        if amount0_out >= self.reserve0 || amount1_out >= self.reserve1 {
            return Err(AmmError::InsufficientLiquidity.into());
        }

        let kept0 = self.reserve0 - amount0_out;
        let kept1 = self.reserve1 - amount1_out;
        let amount0_in = balance0.saturating_sub(kept0);
        let amount1_in = balance1.saturating_sub(kept1);
        if amount0_in == 0 && amount1_in == 0 {
            return Err(AmmError::InsufficientInputAmount.into());
        }

        let holds = V2Math::fee_adjusted_invariant_holds(
            balance0,
            balance1,
            amount0_in,
            amount1_in,
            self.reserve0,
            self.reserve1,
            self.fee_bps,
        )?;
        if !holds {
            return Err(AmmError::InvariantViolation("swap").into());
        }

        self.update(balance0, balance1, now)?;
        Ok((amount0_in, amount1_in))
    }

    /// Amounts a deposit would actually use at the current ratio
    pub fn optimal_amounts(
        &self,
        amount0_desired: u128,
        amount1_desired: u128,
        amount0_min: u128,
        amount1_min: u128,
    ) -> Result<(u128, u128)> {
        Ok(V2Math::optimal_deposit(
            amount0_desired,
            amount1_desired,
            amount0_min,
            amount1_min,
            self.reserve0,
            self.reserve1,
        )?)
    }

    /// `(shares, locked)` that depositing exactly these amounts mints now
    pub fn shares_for(&self, amount0: u128, amount1: u128) -> Result<(u128, u128)> {
        if self.total_shares == 0 {
            Ok((V2Math::initial_shares(amount0, amount1)?, MINIMUM_LIQUIDITY))
        } else {
            let shares = V2Math::proportional_shares(
                amount0,
                amount1,
                self.reserve0,
                self.reserve1,
                self.total_shares,
            )?;
            Ok((shares, 0))
        }
    }

    pub fn mint(
        &mut self,
        amount0_desired: u128,
        amount1_desired: u128,
        amount0_min: u128,
        amount1_min: u128,
        now: u64,
    ) -> Result<MintOutcome> {
        self.ensure_active()?;
        let (amount0, amount1) =
            self.optimal_amounts(amount0_desired, amount1_desired, amount0_min, amount1_min)?;
        let (shares, locked) = self.shares_for(amount0, amount1)?;
        self.apply_mint(amount0, amount1, shares, locked, now)?;
        Ok(MintOutcome {
            amount0,
            amount1,
            shares,
            locked,
        })
    }

    /// Add fixed amounts and issue `shares + locked`
    pub fn apply_mint(
        &mut self,
        amount0: u128,
        amount1: u128,
        shares: u128,
        locked: u128,
        now: u64,
    ) -> Result<()> {
        self.ensure_active()?;
        let overflow = AmmError::Overflow("mint");
        let balance0 = self.reserve0.checked_add(amount0).ok_or(overflow.clone())?;
        let balance1 = self.reserve1.checked_add(amount1).ok_or(overflow.clone())?;
        let total = self
            .total_shares
            .checked_add(shares)
            .and_then(|t| t.checked_add(locked))
            .ok_or(overflow)?;
        self.update(balance0, balance1, now)?;
        self.total_shares = total;
        Ok(())
    }

    pub fn burn(
        &mut self,
        shares: u128,
        amount0_min: u128,
        amount1_min: u128,
        now: u64,
    ) -> Result<BurnOutcome> {
        self.ensure_active()?;
        let (amount0, amount1) =
            V2Math::burn_amounts(shares, self.reserve0, self.reserve1, self.total_shares)?;
        if amount0 < amount0_min {
            return Err(AmmError::SlippageExceeded {
                bound: "amount0_min",
                limit: amount0_min,
                actual: amount0,
            }
            .into());
        }
        if amount1 < amount1_min {
            return Err(AmmError::SlippageExceeded {
                bound: "amount1_min",
                limit: amount1_min,
                actual: amount1,
            }
            .into());
        }
        self.apply_burn(shares, amount0, amount1, now)?;
        Ok(BurnOutcome {
            amount0,
            amount1,
            shares,
        })
    }

    /// Retire `shares` and release fixed amounts
    pub fn apply_burn(&mut self, shares: u128, amount0: u128, amount1: u128, now: u64) -> Result<()> {
        self.ensure_active()?;
        if shares == 0 || shares > self.total_shares {
            return Err(AmmError::InsufficientShares {
                requested: shares,
                available: self.total_shares,
            }
            .into());
        }
        let balance0 = self
            .reserve0
            .checked_sub(amount0)
            .ok_or(AmmError::InsufficientLiquidity)?;
        let balance1 = self
            .reserve1
            .checked_sub(amount1)
            .ok_or(AmmError::InsufficientLiquidity)?;
        self.update(balance0, balance1, now)?;
        self.total_shares -= shares;
        Ok(())
    }

    /// What `shares` would redeem right now
    pub fn redeemable(&self, shares: u128) -> Result<(u128, u128)> {
        if self.total_shares == 0 {
            return Ok((0, 0));
        }
        let amount0 = mul_div(shares, self.reserve0, self.total_shares, "redeemable0")?;
        let amount1 = mul_div(shares, self.reserve1, self.total_shares, "redeemable1")?;
        Ok((amount0, amount1))
    }

    pub fn snapshot(&self, timestamp: u64) -> Snapshot {
        Snapshot {
            pool_id: self.id,
            reserve0: self.reserve0,
            reserve1: self.reserve1,
            total_shares: self.total_shares,
            timestamp,
        }
    }

    /// Single exit point for reserve changes
    fn update(&mut self, balance0: u128, balance1: u128, now: u64) -> Result<()> {
        ensure_reserve(balance0)?;
        ensure_reserve(balance1)?;

        let timestamp = (now % (1u64 << 32)) as u32;
        let elapsed = timestamp.wrapping_sub(self.block_timestamp_last);
        if elapsed > 0 && self.reserve0 != 0 && self.reserve1 != 0 {
            let q = widen(Q112);
            let elapsed = widen(elapsed as u128);
            let price0 = widen(self.reserve1) * q / widen(self.reserve0);
            let price1 = widen(self.reserve0) * q / widen(self.reserve1);
            // overflow is desired
            self.price0_cumulative = self
                .price0_cumulative
                .wrapping_add(price0.wrapping_mul(elapsed));
            self.price1_cumulative = self
                .price1_cumulative
                .wrapping_add(price1.wrapping_mul(elapsed));
        }

        self.reserve0 = balance0;
        self.reserve1 = balance1;
        self.block_timestamp_last = timestamp;
        Ok(())
    }
}

mod u256_string {
    use ethnum::U256;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
        let raw = String::deserialize(deserializer)?;
        U256::from_str_radix(&raw, 10).map_err(D::Error::custom)
    }
}
