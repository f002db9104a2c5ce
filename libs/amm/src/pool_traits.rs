//! Pool trait definitions for a unified quoting interface

use crate::error::Result;
use crate::v2_math::V2Math;
use serde::{Deserialize, Serialize};

/// Which side of the pair is being sold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SwapDirection {
    /// Sell token0, buy token1
    ZeroForOne,
    /// Sell token1, buy token0
    OneForZero,
}

impl SwapDirection {
    pub fn reversed(self) -> Self {
        match self {
            SwapDirection::ZeroForOne => SwapDirection::OneForZero,
            SwapDirection::OneForZero => SwapDirection::ZeroForOne,
        }
    }
}

/// Point-in-time reserves of a pair plus its LP fee
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolReserves {
    pub reserve0: u128,
    pub reserve1: u128,
    pub fee_bps: u32,
}

impl PoolReserves {
    pub fn new(reserve0: u128, reserve1: u128, fee_bps: u32) -> Self {
        Self {
            reserve0,
            reserve1,
            fee_bps,
        }
    }

    /// `(reserve_in, reserve_out)` for a direction
    pub fn oriented(&self, direction: SwapDirection) -> (u128, u128) {
        match direction {
            SwapDirection::ZeroForOne => (self.reserve0, self.reserve1),
            SwapDirection::OneForZero => (self.reserve1, self.reserve0),
        }
    }
}

/// Unified pool interface for quoting
pub trait AmmPool {
    /// Calculate output amount for given input
    fn get_amount_out(&self, amount_in: u128, direction: SwapDirection) -> Result<u128>;

    /// Calculate required input for desired output
    fn get_amount_in(&self, amount_out: u128, direction: SwapDirection) -> Result<u128>;

    /// Current reserves
    fn get_liquidity(&self) -> (u128, u128);

    /// Get fee tier
    fn get_fee_bps(&self) -> u32;
}

impl AmmPool for PoolReserves {
    fn get_amount_out(&self, amount_in: u128, direction: SwapDirection) -> Result<u128> {
        let (reserve_in, reserve_out) = self.oriented(direction);
        V2Math::calculate_output_amount(amount_in, reserve_in, reserve_out, self.fee_bps)
    }

    fn get_amount_in(&self, amount_out: u128, direction: SwapDirection) -> Result<u128> {
        let (reserve_in, reserve_out) = self.oriented(direction);
        V2Math::calculate_input_amount(amount_out, reserve_in, reserve_out, self.fee_bps)
    }

    fn get_liquidity(&self) -> (u128, u128) {
        (self.reserve0, self.reserve1)
    }

    fn get_fee_bps(&self) -> u32 {
        self.fee_bps
    }
}
