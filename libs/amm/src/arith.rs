//! Exact integer primitives
//!
//! Amounts are `u128` at the API boundary and widened to 256 bits for every
//! product, so `reserve * reserve` never overflows. Reserves themselves are
//! capped at 112 bits to match the packed on-chain pair layout.

use crate::error::{AmmError, Result};
use ethnum::U256;

/// Basis-point denominator
pub const BPS_DENOMINATOR: u128 = 10_000;

/// Largest reserve a pool may hold (2^112 - 1)
pub const MAX_RESERVE: u128 = (1u128 << 112) - 1;

/// Shares permanently locked by the first deposit
pub const MINIMUM_LIQUIDITY: u128 = 1_000;

#[inline]
pub fn widen(value: u128) -> U256 {
    U256::new(value)
}

/// Narrow back to `u128`, failing instead of truncating
#[inline]
pub fn narrow(value: U256, context: &'static str) -> Result<u128> {
    let (high, low) = value.into_words();
    if high != 0 {
        return Err(AmmError::Overflow(context));
    }
    Ok(low)
}

/// `a * b / denominator`, floored
pub fn mul_div(a: u128, b: u128, denominator: u128, context: &'static str) -> Result<u128> {
    if denominator == 0 {
        return Err(AmmError::Overflow(context));
    }
    narrow(widen(a) * widen(b) / widen(denominator), context)
}

/// `a * b / denominator`, rounded up
pub fn mul_div_ceil(a: u128, b: u128, denominator: u128, context: &'static str) -> Result<u128> {
    if denominator == 0 {
        return Err(AmmError::Overflow(context));
    }
    let product = widen(a) * widen(b);
    let denominator = widen(denominator);
    let mut quotient = product / denominator;
    if product % denominator != U256::ZERO {
        quotient += U256::ONE;
    }
    narrow(quotient, context)
}

/// Floor of `amount * bps / 10000`
pub fn bps_of(amount: u128, bps: u32) -> Result<u128> {
    mul_div(amount, bps as u128, BPS_DENOMINATOR, "bps_of")
}

/// Fee must leave something of the input
pub fn validate_fee(fee_bps: u32) -> Result<()> {
    if fee_bps as u128 >= BPS_DENOMINATOR {
        return Err(AmmError::InvalidFee(fee_bps));
    }
    Ok(())
}

/// Reject reserves that would not fit the 112-bit packing
pub fn ensure_reserve(value: u128) -> Result<u128> {
    if value > MAX_RESERVE {
        return Err(AmmError::ReserveOverflow(value));
    }
    Ok(value)
}

/// Integer square root by Newton iteration.
///
/// Iterates until the estimate stops decreasing; exact for perfect squares,
/// floor otherwise.
pub fn isqrt(value: U256) -> U256 {
    let two = U256::new(2);
    if value > U256::new(3) {
        let mut z = value;
        let mut x = value / two + U256::ONE;
        while x < z {
            z = x;
            x = (value / x + x) / two;
        }
        z
    } else if value != U256::ZERO {
        U256::ONE
    } else {
        U256::ZERO
    }
}

/// `isqrt(a * b)` as `u128`; the result always fits since both inputs do
pub fn sqrt_product(a: u128, b: u128) -> u128 {
    let (_, low) = isqrt(widen(a) * widen(b)).into_words();
    low
}

/// Constant product `r0 * r1`
#[inline]
pub fn product(r0: u128, r1: u128) -> U256 {
    widen(r0) * widen(r1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_isqrt_perfect_squares_and_floors() {
        assert_eq!(isqrt(U256::ZERO), U256::ZERO);
        assert_eq!(isqrt(U256::ONE), U256::ONE);
        assert_eq!(isqrt(U256::new(3)), U256::ONE);
        assert_eq!(isqrt(U256::new(4)), U256::new(2));
        assert_eq!(isqrt(U256::new(15)), U256::new(3));
        assert_eq!(isqrt(U256::new(16)), U256::new(4));
        assert_eq!(
            isqrt(U256::new(4_000_000_000_000)),
            U256::new(2_000_000)
        );
    }

    #[test]
    fn test_isqrt_of_max_reserve_product() {
        let root = sqrt_product(MAX_RESERVE, MAX_RESERVE);
        assert_eq!(root, MAX_RESERVE);
    }

    #[test]
    fn test_mul_div_rounding() {
        assert_eq!(mul_div(7, 3, 2, "t").unwrap(), 10);
        assert_eq!(mul_div_ceil(7, 3, 2, "t").unwrap(), 11);
        assert_eq!(mul_div_ceil(8, 3, 2, "t").unwrap(), 12);
        assert!(matches!(mul_div(1, 1, 0, "t"), Err(AmmError::Overflow("t"))));
    }

    #[test]
    fn test_mul_div_overflow_is_reported() {
        let result = mul_div(u128::MAX, u128::MAX, 1, "big");
        assert_eq!(result, Err(AmmError::Overflow("big")));
    }

    #[test]
    fn test_bps_and_fee_validation() {
        assert_eq!(bps_of(10_000, 30).unwrap(), 30);
        assert_eq!(bps_of(333, 30).unwrap(), 0);
        assert!(validate_fee(9_999).is_ok());
        assert_eq!(validate_fee(10_000), Err(AmmError::InvalidFee(10_000)));
    }

    #[test]
    fn test_reserve_cap() {
        assert!(ensure_reserve(MAX_RESERVE).is_ok());
        assert_eq!(
            ensure_reserve(MAX_RESERVE + 1),
            Err(AmmError::ReserveOverflow(MAX_RESERVE + 1))
        );
    }
}
