//! Deadline-checked entry points over the engine
//!
//! Every mutating call takes an absolute unix deadline; a call arriving after
//! it fails with `Expired` before any pool is locked.

use crate::engine::{AddLiquidityReceipt, LiquidityEngine, RemoveLiquidityReceipt, SwapReceipt};
use crate::error::Result;
use kestrel_amm::V2Math;
use std::sync::Arc;
use types::{AccountId, TokenId};

#[derive(Clone)]
pub struct Router {
    engine: Arc<LiquidityEngine>,
}

impl Router {
    pub fn new(engine: Arc<LiquidityEngine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Arc<LiquidityEngine> {
        &self.engine
    }

    fn ensure_deadline(&self, deadline: u64) -> Result<()> {
        self.engine.ensure_deadline(deadline)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn add_liquidity(
        &self,
        sender: &AccountId,
        token_a: &TokenId,
        token_b: &TokenId,
        amount_a_desired: u128,
        amount_b_desired: u128,
        amount_a_min: u128,
        amount_b_min: u128,
        to: &AccountId,
        deadline: u64,
    ) -> Result<AddLiquidityReceipt> {
        self.ensure_deadline(deadline)?;
        self.engine.add_liquidity(
            sender,
            token_a,
            token_b,
            amount_a_desired,
            amount_b_desired,
            amount_a_min,
            amount_b_min,
            to,
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn remove_liquidity(
        &self,
        sender: &AccountId,
        token_a: &TokenId,
        token_b: &TokenId,
        shares: u128,
        amount_a_min: u128,
        amount_b_min: u128,
        to: &AccountId,
        deadline: u64,
    ) -> Result<RemoveLiquidityReceipt> {
        self.ensure_deadline(deadline)?;
        self.engine.remove_liquidity(
            sender,
            token_a,
            token_b,
            shares,
            amount_a_min,
            amount_b_min,
            to,
        )
    }

    pub fn swap_exact_tokens_for_tokens(
        &self,
        sender: &AccountId,
        amount_in: u128,
        amount_out_min: u128,
        path: &[TokenId],
        to: &AccountId,
        deadline: u64,
    ) -> Result<SwapReceipt> {
        self.ensure_deadline(deadline)?;
        self.engine
            .swap_exact_in(sender, path, amount_in, amount_out_min, to)
    }

    pub fn swap_tokens_for_exact_tokens(
        &self,
        sender: &AccountId,
        amount_out: u128,
        amount_in_max: u128,
        path: &[TokenId],
        to: &AccountId,
        deadline: u64,
    ) -> Result<SwapReceipt> {
        self.ensure_deadline(deadline)?;
        self.engine
            .swap_exact_out(sender, path, amount_out, amount_in_max, to)
    }

    pub fn get_amounts_out(&self, amount_in: u128, path: &[TokenId]) -> Result<Vec<u128>> {
        self.engine.get_amounts_out(amount_in, path)
    }

    pub fn get_amounts_in(&self, amount_out: u128, path: &[TokenId]) -> Result<Vec<u128>> {
        self.engine.get_amounts_in(amount_out, path)
    }

    /// Equivalent amount of the other token at the current reserve ratio
    pub fn quote(&self, amount_a: u128, token_a: &TokenId, token_b: &TokenId) -> Result<u128> {
        let pool_id = self.engine.registry().get(token_a, token_b)?;
        let pool = self.engine.registry().pool(&pool_id)?;
        let reserve_a = pool.reserve_of(token_a)?;
        let reserve_b = pool.reserve_of(token_b)?;
        Ok(V2Math::quote(amount_a, reserve_a, reserve_b)?)
    }
}
