//! Constant product (x*y=k) math with exact integer rounding
//!
//! Every division floors, and every place where flooring could short the
//! pool rounds the other way instead. Products are taken in 256 bits.

use crate::arith::{
    bps_of, mul_div, mul_div_ceil, sqrt_product, validate_fee, widen, BPS_DENOMINATOR,
    MINIMUM_LIQUIDITY,
};
use crate::error::{AmmError, Result};
use rust_decimal::Decimal;

/// Price impact is computed on a 10^8 scale (1 unit = 0.000001 %)
const IMPACT_SCALE: u128 = 100_000_000;

/// V2 AMM math functions
pub struct V2Math;

impl V2Math {
    /// Exact output for `amount_in`, LP fee taken from the input first.
    ///
    /// ```text
    /// amount_in_with_fee = amount_in * (10000 - fee_bps) / 10000
    /// amount_out = reserve_out * amount_in_with_fee / (reserve_in + amount_in_with_fee)
    /// ```
    pub fn calculate_output_amount(
        amount_in: u128,
        reserve_in: u128,
        reserve_out: u128,
        fee_bps: u32,
    ) -> Result<u128> {
        if amount_in == 0 {
            return Err(AmmError::InvalidAmount("input amount must be positive"));
        }
        if reserve_in == 0 || reserve_out == 0 {
            return Err(AmmError::InsufficientLiquidity);
        }
        validate_fee(fee_bps)?;

        let amount_in_with_fee = mul_div(
            amount_in,
            BPS_DENOMINATOR - fee_bps as u128,
            BPS_DENOMINATOR,
            "amount_in_with_fee",
        )?;
        let denominator = widen(reserve_in) + widen(amount_in_with_fee);
        let out = widen(reserve_out) * widen(amount_in_with_fee) / denominator;

        // out < reserve_out always holds, so it fits in u128
        let (_, low) = out.into_words();
        Ok(low)
    }

    /// Minimal input that yields at least `amount_out`.
    ///
    /// Rounds up twice: once for the fee-free input, once for the fee gross-up.
    pub fn calculate_input_amount(
        amount_out: u128,
        reserve_in: u128,
        reserve_out: u128,
        fee_bps: u32,
    ) -> Result<u128> {
        if amount_out == 0 {
            return Err(AmmError::InvalidAmount("output amount must be positive"));
        }
        if reserve_in == 0 || reserve_out == 0 || amount_out >= reserve_out {
            return Err(AmmError::InsufficientLiquidity);
        }
        validate_fee(fee_bps)?;

        let required_with_fee = mul_div_ceil(
            reserve_in,
            amount_out,
            reserve_out - amount_out,
            "amount_in_before_fee",
        )?;
        mul_div_ceil(
            required_with_fee,
            BPS_DENOMINATOR,
            BPS_DENOMINATOR - fee_bps as u128,
            "amount_in_gross",
        )
    }

    /// Amount of B equivalent to `amount_a` at the current ratio, no fee
    pub fn quote(amount_a: u128, reserve_a: u128, reserve_b: u128) -> Result<u128> {
        if amount_a == 0 {
            return Err(AmmError::InvalidAmount("quote amount must be positive"));
        }
        if reserve_a == 0 || reserve_b == 0 {
            return Err(AmmError::InsufficientLiquidity);
        }
        mul_div(amount_a, reserve_b, reserve_a, "quote")
    }

    /// Amounts actually deposited for a liquidity add.
    ///
    /// One desired amount is used in full; the other is scaled down to the
    /// current reserve ratio and checked against its minimum.
    pub fn optimal_deposit(
        amount_a_desired: u128,
        amount_b_desired: u128,
        amount_a_min: u128,
        amount_b_min: u128,
        reserve_a: u128,
        reserve_b: u128,
    ) -> Result<(u128, u128)> {
        if reserve_a == 0 && reserve_b == 0 {
            return Ok((amount_a_desired, amount_b_desired));
        }

        let amount_b_optimal = Self::quote(amount_a_desired, reserve_a, reserve_b)?;
        if amount_b_optimal <= amount_b_desired {
            if amount_b_optimal < amount_b_min {
                return Err(AmmError::SlippageExceeded {
                    bound: "amount_b_min",
                    limit: amount_b_min,
                    actual: amount_b_optimal,
                });
            }
            return Ok((amount_a_desired, amount_b_optimal));
        }

        let amount_a_optimal = Self::quote(amount_b_desired, reserve_b, reserve_a)?;
        if amount_a_optimal > amount_a_desired {
            return Err(AmmError::InvariantViolation("optimal_deposit"));
        }
        if amount_a_optimal < amount_a_min {
            return Err(AmmError::SlippageExceeded {
                bound: "amount_a_min",
                limit: amount_a_min,
                actual: amount_a_optimal,
            });
        }
        Ok((amount_a_optimal, amount_b_desired))
    }

    /// Shares for the first deposit: `isqrt(a * b) - MINIMUM_LIQUIDITY`
    pub fn initial_shares(amount_a: u128, amount_b: u128) -> Result<u128> {
        let root = sqrt_product(amount_a, amount_b);
        if root <= MINIMUM_LIQUIDITY {
            return Err(AmmError::InsufficientInitialLiquidity {
                sqrt: root,
                minimum: MINIMUM_LIQUIDITY,
            });
        }
        Ok(root - MINIMUM_LIQUIDITY)
    }

    /// Shares for a later deposit; the smaller side wins
    pub fn proportional_shares(
        amount_a: u128,
        amount_b: u128,
        reserve_a: u128,
        reserve_b: u128,
        total_shares: u128,
    ) -> Result<u128> {
        if reserve_a == 0 || reserve_b == 0 || total_shares == 0 {
            return Err(AmmError::InsufficientLiquidity);
        }
        let by_a = mul_div(amount_a, total_shares, reserve_a, "shares_by_a")?;
        let by_b = mul_div(amount_b, total_shares, reserve_b, "shares_by_b")?;
        let shares = by_a.min(by_b);
        if shares == 0 {
            return Err(AmmError::InsufficientLiquidityMinted);
        }
        Ok(shares)
    }

    /// Pro-rata amounts redeemed by burning `shares`
    pub fn burn_amounts(
        shares: u128,
        reserve_a: u128,
        reserve_b: u128,
        total_shares: u128,
    ) -> Result<(u128, u128)> {
        if shares == 0 || shares > total_shares {
            return Err(AmmError::InsufficientShares {
                requested: shares,
                available: total_shares,
            });
        }
        let amount_a = mul_div(shares, reserve_a, total_shares, "burn_a")?;
        let amount_b = mul_div(shares, reserve_b, total_shares, "burn_b")?;
        if amount_a == 0 || amount_b == 0 {
            return Err(AmmError::InsufficientLiquidityBurned);
        }
        Ok((amount_a, amount_b))
    }

    /// LP fee portion of an input
    pub fn fee_amount(amount_in: u128, fee_bps: u32) -> Result<u128> {
        validate_fee(fee_bps)?;
        bps_of(amount_in, fee_bps)
    }

    /// Price impact in percent, clamped at zero. Display only.
    ///
    /// `(1 - (amount_out / net_in) / (reserve_out / reserve_in)) * 100`
    pub fn calculate_price_impact(
        net_in: u128,
        amount_out: u128,
        reserve_in: u128,
        reserve_out: u128,
    ) -> Result<Decimal> {
        if net_in == 0 {
            return Err(AmmError::InvalidAmount("input amount must be positive"));
        }
        if reserve_in == 0 || reserve_out == 0 {
            return Err(AmmError::InsufficientLiquidity);
        }

        let numerator = widen(amount_out)
            .checked_mul(widen(reserve_in))
            .and_then(|v| v.checked_mul(widen(IMPACT_SCALE)))
            .ok_or(AmmError::Overflow("price_impact"))?;
        let denominator = widen(net_in)
            .checked_mul(widen(reserve_out))
            .ok_or(AmmError::Overflow("price_impact"))?;
        let ratio = numerator / denominator;

        if ratio >= widen(IMPACT_SCALE) {
            return Ok(Decimal::ZERO);
        }
        let (_, ratio) = ratio.into_words();
        let impact_units = IMPACT_SCALE - ratio;
        Ok(Decimal::new(impact_units as i64, 6))
    }

    /// Fee-adjusted constant product check used by the pair-level swap.
    ///
    /// `(b0*10000 - in0*fee) * (b1*10000 - in1*fee) >= r0 * r1 * 10000^2`
    pub fn fee_adjusted_invariant_holds(
        balance0: u128,
        balance1: u128,
        amount0_in: u128,
        amount1_in: u128,
        reserve0: u128,
        reserve1: u128,
        fee_bps: u32,
    ) -> Result<bool> {
        let scale = widen(BPS_DENOMINATOR);
        let fee = widen(fee_bps as u128);
        let adjusted0 = (widen(balance0) * scale)
            .checked_sub(widen(amount0_in) * fee)
            .ok_or(AmmError::InvariantViolation("swap"))?;
        let adjusted1 = (widen(balance1) * scale)
            .checked_sub(widen(amount1_in) * fee)
            .ok_or(AmmError::InvariantViolation("swap"))?;
        let lhs = adjusted0
            .checked_mul(adjusted1)
            .ok_or(AmmError::Overflow("invariant_lhs"))?;
        let rhs = (widen(reserve0) * widen(reserve1))
            .checked_mul(scale * scale)
            .ok_or(AmmError::Overflow("invariant_rhs"))?;
        Ok(lhs >= rhs)
    }
}
