//! Liquidity Engine
//!
//! Owns the registry, position ledger and treasury and is the only writer of
//! pool state. Each operation clones the locked pool(s), applies the change
//! to the copy and writes it back only when every step succeeded, so reserves,
//! total shares and positions commit or roll back together.
//!
//! Multi-pool paths lock every touched pool in ascending id order.
//!
//! Two-phase settlements use [`LiquidityEngine::plan`] (read only) and
//! [`LiquidityEngine::commit`]; the commit re-checks the plan against the
//! pool as it is at that moment. A commit is keyed by its transaction id and
//! applies at most once, even when replayed after a restart.
//!
//! When a [`StateCheckpointer`] is attached, every successful mutation is
//! written to the state file before it is reported to the caller.

use crate::error::{PoolError, Result};
use crate::events::PoolEvent;
use crate::persistence::StateCheckpointer;
use crate::pool::{MintOutcome, Pool};
use crate::positions::LiquidityLedger;
use crate::registry::PoolRegistry;
use crate::treasury::Treasury;
use kestrel_amm::arith::{bps_of, mul_div_ceil, BPS_DENOMINATOR};
use kestrel_amm::{AmmError, SwapDirection, V2Math};
use serde::{Deserialize, Serialize};
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use types::{
    share_token, AccountId, Clock, OperationParams, PairKey, PlannedAction, PoolId,
    SettlementPlan, TokenId, Transfer, TxId,
};

/// LP and protocol legs of the swap fee
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSchedule {
    /// Stays in reserves
    pub lp_fee_bps: u32,
    /// Taken from the input before it reaches the pool
    pub protocol_fee_bps: u32,
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self {
            lp_fee_bps: 25,
            protocol_fee_bps: 5,
        }
    }
}

impl FeeSchedule {
    pub fn new(lp_fee_bps: u32, protocol_fee_bps: u32) -> Result<Self> {
        let total = lp_fee_bps as u128 + protocol_fee_bps as u128;
        if total >= BPS_DENOMINATOR {
            return Err(AmmError::InvalidFee(lp_fee_bps.saturating_add(protocol_fee_bps)).into());
        }
        Ok(Self {
            lp_fee_bps,
            protocol_fee_bps,
        })
    }

    /// `(protocol_fee, net_in)`
    pub fn split(&self, amount_in: u128) -> Result<(u128, u128)> {
        let fee = bps_of(amount_in, self.protocol_fee_bps)?;
        Ok((fee, amount_in - fee))
    }

    /// Smallest gross input whose net covers `net_in`
    pub fn gross_up(&self, net_in: u128) -> Result<u128> {
        if self.protocol_fee_bps == 0 {
            return Ok(net_in);
        }
        Ok(mul_div_ceil(
            net_in,
            BPS_DENOMINATOR,
            BPS_DENOMINATOR - self.protocol_fee_bps as u128,
            "gross_up",
        )?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapReceipt {
    /// Gross input first, then the output of each hop
    pub amounts: Vec<u128>,
    pub protocol_fee: u128,
    pub pools: Vec<PoolId>,
}

impl SwapReceipt {
    pub fn amount_in(&self) -> u128 {
        self.amounts.first().copied().unwrap_or(0)
    }

    pub fn amount_out(&self) -> u128 {
        self.amounts.last().copied().unwrap_or(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddLiquidityReceipt {
    pub pool_id: PoolId,
    pub amount_a: u128,
    pub amount_b: u128,
    pub shares: u128,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoveLiquidityReceipt {
    pub pool_id: PoolId,
    pub amount_a: u128,
    pub amount_b: u128,
}

pub struct LiquidityEngine {
    registry: Arc<PoolRegistry>,
    positions: Arc<LiquidityLedger>,
    treasury: Arc<Treasury>,
    fees: FeeSchedule,
    clock: Arc<dyn Clock>,
    checkpoints: Option<Arc<StateCheckpointer>>,
    /// Settlements applied to a pool whose record is not yet complete
    applied: DashMap<TxId, PoolId>,
}

/// `(a, b)` in pool order
fn orient<T>(a_is_token0: bool, a: T, b: T) -> (T, T) {
    if a_is_token0 {
        (a, b)
    } else {
        (b, a)
    }
}

fn swap_event(
    pool: &Pool,
    direction: SwapDirection,
    amount_in: u128,
    amount_out: u128,
    sender: &AccountId,
    to: &AccountId,
) -> PoolEvent {
    let (amount0_in, amount1_in, amount0_out, amount1_out) = match direction {
        SwapDirection::ZeroForOne => (amount_in, 0, 0, amount_out),
        SwapDirection::OneForZero => (0, amount_in, amount_out, 0),
    };
    PoolEvent::Swap {
        pool_id: pool.id(),
        sender: sender.clone(),
        to: to.clone(),
        amount0_in,
        amount1_in,
        amount0_out,
        amount1_out,
    }
}

fn sync_event(pool: &Pool) -> PoolEvent {
    let (reserve0, reserve1) = pool.reserves();
    PoolEvent::Sync {
        pool_id: pool.id(),
        reserve0,
        reserve1,
    }
}

impl LiquidityEngine {
    pub fn new(
        registry: Arc<PoolRegistry>,
        positions: Arc<LiquidityLedger>,
        treasury: Arc<Treasury>,
        fees: FeeSchedule,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            registry,
            positions,
            treasury,
            fees,
            clock,
            checkpoints: None,
            applied: DashMap::new(),
        }
    }

    /// Write the state file after every successful mutation
    pub fn with_checkpoints(mut self, checkpoints: Arc<StateCheckpointer>) -> Self {
        self.checkpoints = Some(checkpoints);
        self
    }

    pub fn registry(&self) -> &Arc<PoolRegistry> {
        &self.registry
    }

    pub fn positions(&self) -> &Arc<LiquidityLedger> {
        &self.positions
    }

    pub fn treasury(&self) -> &Arc<Treasury> {
        &self.treasury
    }

    pub fn fees(&self) -> FeeSchedule {
        self.fees
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Save current state; a no-op without a checkpointer
    pub fn checkpoint(&self) -> Result<()> {
        let Some(checkpoints) = &self.checkpoints else {
            return Ok(());
        };
        checkpoints.save(self).map_err(|e| {
            error!(
                path = %checkpoints.store().path().display(),
                error = %e,
                "state checkpoint failed"
            );
            e
        })
    }

    /// True once `commit` has applied the settlement `id`
    pub fn is_applied(&self, id: &TxId) -> bool {
        self.applied.contains_key(id)
    }

    /// Forget an applied settlement once its record is complete
    pub fn release_applied(&self, id: &TxId) {
        self.applied.remove(id);
    }

    pub fn applied_ids(&self) -> Vec<TxId> {
        self.applied.iter().map(|entry| *entry.key()).collect()
    }

    /// Applied settlements of one pool; read under the pool's lock
    pub fn applied_in(&self, pool_id: &PoolId) -> Vec<TxId> {
        let mut ids: Vec<TxId> = self
            .applied
            .iter()
            .filter(|entry| entry.value() == pool_id)
            .map(|entry| *entry.key())
            .collect();
        ids.sort();
        ids
    }

    pub fn restore_applied(&self, applied: Vec<(TxId, PoolId)>) {
        self.applied.clear();
        for (id, pool_id) in applied {
            self.applied.insert(id, pool_id);
        }
    }

    /// `Expired` once the clock has passed `deadline`
    pub fn ensure_deadline(&self, deadline: u64) -> Result<()> {
        let now = self.clock.unix_seconds();
        if now > deadline {
            debug!(deadline, now, "rejecting expired operation");
            return Err(PoolError::Expired { deadline, now });
        }
        Ok(())
    }

    fn publish_all(&self, events: Vec<PoolEvent>) {
        for event in events {
            self.registry.events().publish(event);
        }
    }

    /// Run `f` against copies of the locked pools; write back only on success
    fn with_pools_mut<T>(
        &self,
        pool_ids: &[PoolId],
        f: impl FnOnce(&mut BTreeMap<PoolId, Pool>) -> Result<T>,
    ) -> Result<T> {
        let mut unique = pool_ids.to_vec();
        unique.sort();
        unique.dedup();

        let handles = unique
            .iter()
            .map(|id| self.registry.handle(id))
            .collect::<Result<Vec<_>>>()?;
        let mut guards: Vec<_> = handles.iter().map(|h| h.state.write()).collect();
        let mut working: BTreeMap<PoolId, Pool> =
            guards.iter().map(|g| (g.id(), (**g).clone())).collect();

        let out = f(&mut working)?;

        for guard in guards.iter_mut() {
            if let Some(pool) = working.remove(&guard.id()) {
                **guard = pool;
            }
        }
        Ok(out)
    }

    fn with_pool_mut<T>(
        &self,
        pool_id: &PoolId,
        f: impl FnOnce(&mut Pool) -> Result<T>,
    ) -> Result<T> {
        self.with_pools_mut(std::slice::from_ref(pool_id), |working| {
            let pool = working
                .get_mut(pool_id)
                .ok_or(PoolError::UnknownPool(*pool_id))?;
            f(pool)
        })
    }

    /// Pool ids along a token path
    pub fn resolve_path(&self, path: &[TokenId]) -> Result<Vec<PoolId>> {
        if path.len() < 2 {
            return Err(PoolError::InvalidPath("path needs at least two tokens"));
        }
        path.windows(2)
            .map(|hop| self.registry.get(&hop[0], &hop[1]))
            .collect()
    }

    /// Amounts along a path for an exact input, protocol fee included
    pub fn get_amounts_out(&self, amount_in: u128, path: &[TokenId]) -> Result<Vec<u128>> {
        let pool_ids = self.resolve_path(path)?;
        let (_, mut hop_in) = self.fees.split(amount_in)?;
        let mut amounts = Vec::with_capacity(path.len());
        amounts.push(amount_in);
        for (i, pool_id) in pool_ids.iter().enumerate() {
            let out = self.registry.pool(pool_id)?.quote_out(&path[i], hop_in)?;
            amounts.push(out);
            hop_in = out;
        }
        Ok(amounts)
    }

    /// Amounts along a path for an exact output; the first entry is the gross input
    pub fn get_amounts_in(&self, amount_out: u128, path: &[TokenId]) -> Result<Vec<u128>> {
        let pool_ids = self.resolve_path(path)?;
        let mut pools = BTreeMap::new();
        for id in &pool_ids {
            pools.insert(*id, self.registry.pool(id)?);
        }
        let mut amounts = Self::amounts_in(&pools, &pool_ids, path, amount_out)?;
        amounts[0] = self.fees.gross_up(amounts[0])?;
        Ok(amounts)
    }

    /// Net amounts backwards from the output
    fn amounts_in(
        pools: &BTreeMap<PoolId, Pool>,
        pool_ids: &[PoolId],
        path: &[TokenId],
        amount_out: u128,
    ) -> Result<Vec<u128>> {
        let mut amounts = vec![0u128; path.len()];
        amounts[path.len() - 1] = amount_out;
        for i in (0..pool_ids.len()).rev() {
            let pool = pools
                .get(&pool_ids[i])
                .ok_or(PoolError::UnknownPool(pool_ids[i]))?;
            amounts[i] = pool.quote_in(&path[i + 1], amounts[i + 1])?;
        }
        Ok(amounts)
    }

    /// Exact-input swap along `path`; every hop commits or none does
    pub fn swap_exact_in(
        &self,
        sender: &AccountId,
        path: &[TokenId],
        amount_in: u128,
        amount_out_min: u128,
        to: &AccountId,
    ) -> Result<SwapReceipt> {
        let pool_ids = self.resolve_path(path)?;
        let now = self.clock.unix_seconds();
        let (protocol_fee, net_in) = self.fees.split(amount_in)?;

        let (amounts, events) = self.with_pools_mut(&pool_ids, |working| {
            let mut amounts = vec![amount_in];
            let mut events = Vec::new();
            let mut hop_in = net_in;
            for (i, pool_id) in pool_ids.iter().enumerate() {
                let pool = working
                    .get_mut(pool_id)
                    .ok_or(PoolError::UnknownPool(*pool_id))?;
                let outcome = pool.swap(&path[i], hop_in, 0, now)?;
                events.push(swap_event(pool, outcome.direction, hop_in, outcome.amount_out, sender, to));
                events.push(sync_event(pool));
                amounts.push(outcome.amount_out);
                hop_in = outcome.amount_out;
            }

            let amount_out = hop_in;
            if amount_out < amount_out_min {
                return Err(AmmError::SlippageExceeded {
                    bound: "amount_out_min",
                    limit: amount_out_min,
                    actual: amount_out,
                }
                .into());
            }
            self.treasury.accrue(&path[0], protocol_fee)?;
            Ok((amounts, events))
        })?;

        info!(
            sender = %sender,
            hops = pool_ids.len(),
            amount_in,
            amount_out = amounts[amounts.len() - 1],
            protocol_fee,
            "swap executed"
        );
        self.publish_all(events);
        self.checkpoint()?;
        Ok(SwapReceipt {
            amounts,
            protocol_fee,
            pools: pool_ids,
        })
    }

    /// Exact-output swap along `path`; pays exactly `amount_out`
    pub fn swap_exact_out(
        &self,
        sender: &AccountId,
        path: &[TokenId],
        amount_out: u128,
        amount_in_max: u128,
        to: &AccountId,
    ) -> Result<SwapReceipt> {
        let pool_ids = self.resolve_path(path)?;
        let now = self.clock.unix_seconds();

        let (amounts, protocol_fee, events) = self.with_pools_mut(&pool_ids, |working| {
            let mut amounts = Self::amounts_in(working, &pool_ids, path, amount_out)?;
            let gross = self.fees.gross_up(amounts[0])?;
            if gross > amount_in_max {
                return Err(AmmError::SlippageExceeded {
                    bound: "amount_in_max",
                    limit: amount_in_max,
                    actual: gross,
                }
                .into());
            }
            let (protocol_fee, net_in) = self.fees.split(gross)?;

            let mut events = Vec::new();
            let mut hop_in = net_in;
            for (i, pool_id) in pool_ids.iter().enumerate() {
                let pool = working
                    .get_mut(pool_id)
                    .ok_or(PoolError::UnknownPool(*pool_id))?;
                let direction = pool.direction(&path[i])?;
                pool.settle_swap(direction, hop_in, amounts[i + 1], now)?;
                events.push(swap_event(pool, direction, hop_in, amounts[i + 1], sender, to));
                events.push(sync_event(pool));
                hop_in = amounts[i + 1];
            }

            amounts[0] = gross;
            self.treasury.accrue(&path[0], protocol_fee)?;
            Ok((amounts, protocol_fee, events))
        })?;

        info!(
            sender = %sender,
            hops = pool_ids.len(),
            amount_in = amounts[0],
            amount_out,
            protocol_fee,
            "exact-output swap executed"
        );
        self.publish_all(events);
        self.checkpoint()?;
        Ok(SwapReceipt {
            amounts,
            protocol_fee,
            pools: pool_ids,
        })
    }

    /// Deposit into the pool for `(token_a, token_b)`, creating it if needed.
    /// Shares are credited to `to`.
    #[allow(clippy::too_many_arguments)]
    pub fn add_liquidity(
        &self,
        provider: &AccountId,
        token_a: &TokenId,
        token_b: &TokenId,
        amount_a_desired: u128,
        amount_b_desired: u128,
        amount_a_min: u128,
        amount_b_min: u128,
        to: &AccountId,
    ) -> Result<AddLiquidityReceipt> {
        let pool_id = self.registry.get_or_create(token_a, token_b)?;
        let now = self.clock.unix_seconds();

        let (outcome, a_is_token0, events) = self.with_pool_mut(&pool_id, |pool| {
            let a_is_token0 = pool.pair().is_token0(token_a);
            let (desired0, desired1) = orient(a_is_token0, amount_a_desired, amount_b_desired);
            let (min0, min1) = orient(a_is_token0, amount_a_min, amount_b_min);

            let outcome = pool.mint(desired0, desired1, min0, min1, now)?;
            self.credit_mint(&pool_id, &outcome, to)?;
            let events = vec![
                PoolEvent::Mint {
                    pool_id,
                    provider: to.clone(),
                    amount0: outcome.amount0,
                    amount1: outcome.amount1,
                    shares: outcome.shares,
                },
                sync_event(pool),
            ];
            Ok((outcome, a_is_token0, events))
        })?;

        info!(
            pool = %pool_id,
            provider = %provider,
            to = %to,
            amount0 = outcome.amount0,
            amount1 = outcome.amount1,
            shares = outcome.shares,
            "liquidity added"
        );
        self.publish_all(events);
        self.checkpoint()?;
        let (amount_a, amount_b) = orient(a_is_token0, outcome.amount0, outcome.amount1);
        Ok(AddLiquidityReceipt {
            pool_id,
            amount_a,
            amount_b,
            shares: outcome.shares,
        })
    }

    /// Burn `shares` held by `provider` and release the tokens to `to`
    #[allow(clippy::too_many_arguments)]
    pub fn remove_liquidity(
        &self,
        provider: &AccountId,
        token_a: &TokenId,
        token_b: &TokenId,
        shares: u128,
        amount_a_min: u128,
        amount_b_min: u128,
        to: &AccountId,
    ) -> Result<RemoveLiquidityReceipt> {
        let pool_id = self.registry.get(token_a, token_b)?;
        let now = self.clock.unix_seconds();

        let (outcome, a_is_token0, events) = self.with_pool_mut(&pool_id, |pool| {
            self.positions.ensure_shares(&pool_id, provider, shares)?;
            let a_is_token0 = pool.pair().is_token0(token_a);
            let (min0, min1) = orient(a_is_token0, amount_a_min, amount_b_min);

            let outcome = pool.burn(shares, min0, min1, now)?;
            self.positions.debit(&pool_id, provider, shares)?;
            let events = vec![
                PoolEvent::Burn {
                    pool_id,
                    provider: provider.clone(),
                    to: to.clone(),
                    amount0: outcome.amount0,
                    amount1: outcome.amount1,
                    shares,
                },
                sync_event(pool),
            ];
            Ok((outcome, a_is_token0, events))
        })?;

        info!(
            pool = %pool_id,
            provider = %provider,
            shares,
            amount0 = outcome.amount0,
            amount1 = outcome.amount1,
            "liquidity removed"
        );
        self.publish_all(events);
        self.checkpoint()?;
        let (amount_a, amount_b) = orient(a_is_token0, outcome.amount0, outcome.amount1);
        Ok(RemoveLiquidityReceipt {
            pool_id,
            amount_a,
            amount_b,
        })
    }

    fn credit_mint(&self, pool_id: &PoolId, outcome: &MintOutcome, to: &AccountId) -> Result<()> {
        if outcome.locked > 0 {
            self.positions
                .credit(pool_id, &AccountId::locked(), outcome.locked)?;
        }
        self.positions.credit(pool_id, to, outcome.shares)?;
        Ok(())
    }

    /// Compute a two-phase settlement from current reserves without mutating
    /// anything; an operation past its deadline is never planned
    pub fn plan(
        &self,
        user: &AccountId,
        pool_id: &PoolId,
        params: &OperationParams,
    ) -> Result<SettlementPlan> {
        self.ensure_deadline(params.deadline())?;
        let pool = self.registry.pool(pool_id)?;
        if pool.is_paused() {
            return Err(PoolError::Paused(*pool_id));
        }
        let (token_a, token_b) = params.tokens();
        let pair = PairKey::new(token_a, token_b)?;
        if &pair != pool.pair() {
            return Err(PoolError::TokenNotInPool {
                token: token_a.clone(),
                pool_id: *pool_id,
            });
        }

        match params {
            OperationParams::Swap {
                token_in,
                token_out,
                amount_in,
                min_amount_out,
                recipient,
                ..
            } => {
                let (protocol_fee, net_in) = self.fees.split(*amount_in)?;
                let amount_out = pool.quote_out(token_in, net_in)?;
                if amount_out == 0 {
                    return Err(PoolError::InsufficientOutputAmount);
                }
                if amount_out < *min_amount_out {
                    return Err(AmmError::SlippageExceeded {
                        bound: "min_amount_out",
                        limit: *min_amount_out,
                        actual: amount_out,
                    }
                    .into());
                }

                let mut transfers = vec![Transfer {
                    token: token_out.clone(),
                    to: recipient.clone(),
                    amount: amount_out,
                }];
                if protocol_fee > 0 {
                    transfers.push(Transfer {
                        token: token_in.clone(),
                        to: self.treasury.account().clone(),
                        amount: protocol_fee,
                    });
                }

                Ok(SettlementPlan {
                    pool_id: *pool_id,
                    user: user.clone(),
                    recipient: recipient.clone(),
                    action: PlannedAction::Swap {
                        token_in: token_in.clone(),
                        amount_in: *amount_in,
                        protocol_fee,
                        net_in,
                        amount_out,
                    },
                    transfers,
                })
            }

            OperationParams::AddLiquidity {
                token_a,
                amount_a_desired,
                amount_b_desired,
                amount_a_min,
                amount_b_min,
                recipient,
                ..
            } => {
                let a_is_token0 = pool.pair().is_token0(token_a);
                let (desired0, desired1) = orient(a_is_token0, *amount_a_desired, *amount_b_desired);
                let (min0, min1) = orient(a_is_token0, *amount_a_min, *amount_b_min);
                let (amount0, amount1) = pool.optimal_amounts(desired0, desired1, min0, min1)?;
                let (shares, _) = pool.shares_for(amount0, amount1)?;

                let mut transfers = vec![Transfer {
                    token: share_token(pool_id),
                    to: recipient.clone(),
                    amount: shares,
                }];
                let refunds = [
                    (&pool.pair().token0, desired0 - amount0),
                    (&pool.pair().token1, desired1 - amount1),
                ];
                for (token, amount) in refunds {
                    if amount > 0 {
                        transfers.push(Transfer {
                            token: token.clone(),
                            to: user.clone(),
                            amount,
                        });
                    }
                }

                Ok(SettlementPlan {
                    pool_id: *pool_id,
                    user: user.clone(),
                    recipient: recipient.clone(),
                    action: PlannedAction::AddLiquidity {
                        amount0,
                        amount1,
                        shares,
                    },
                    transfers,
                })
            }

            OperationParams::RemoveLiquidity {
                token_a,
                shares,
                amount_a_min,
                amount_b_min,
                recipient,
                ..
            } => {
                self.positions.ensure_shares(pool_id, user, *shares)?;
                let (reserve0, reserve1) = pool.reserves();
                let (amount0, amount1) =
                    V2Math::burn_amounts(*shares, reserve0, reserve1, pool.total_shares())?;
                let a_is_token0 = pool.pair().is_token0(token_a);
                let (min0, min1) = orient(a_is_token0, *amount_a_min, *amount_b_min);
                if amount0 < min0 || amount1 < min1 {
                    let (limit, actual) = if amount0 < min0 {
                        (min0, amount0)
                    } else {
                        (min1, amount1)
                    };
                    return Err(AmmError::SlippageExceeded {
                        bound: "amount_min",
                        limit,
                        actual,
                    }
                    .into());
                }

                Ok(SettlementPlan {
                    pool_id: *pool_id,
                    user: user.clone(),
                    recipient: recipient.clone(),
                    action: PlannedAction::RemoveLiquidity {
                        shares: *shares,
                        amount0,
                        amount1,
                    },
                    transfers: vec![
                        Transfer {
                            token: pool.pair().token0.clone(),
                            to: recipient.clone(),
                            amount: amount0,
                        },
                        Transfer {
                            token: pool.pair().token1.clone(),
                            to: recipient.clone(),
                            amount: amount1,
                        },
                    ],
                })
            }
        }
    }

    /// Apply the plan of settlement `id` if the pool is no worse off than when
    /// it was planned. A settlement already applied is not applied again.
    pub fn commit(&self, id: &TxId, plan: &SettlementPlan) -> Result<()> {
        let pool_id = plan.pool_id;
        let now = self.clock.unix_seconds();

        let events = self.with_pool_mut(&pool_id, |pool| {
            if self.applied.contains_key(id) {
                return Ok(None);
            }
            let events = self.apply_plan(pool, plan, now)?;
            self.applied.insert(*id, pool_id);
            Ok(Some(events))
        });

        match events {
            Ok(Some(events)) => {
                debug!(tx = %id, pool = %pool_id, "settlement plan committed");
                self.publish_all(events);
                self.checkpoint()
            }
            Ok(None) => {
                info!(tx = %id, pool = %pool_id, "settlement plan already applied");
                Ok(())
            }
            Err(e) => {
                warn!(tx = %id, pool = %pool_id, error = %e, "settlement plan rejected at commit");
                Err(e)
            }
        }
    }

    fn apply_plan(&self, pool: &mut Pool, plan: &SettlementPlan, now: u64) -> Result<Vec<PoolEvent>> {
        let pool_id = plan.pool_id;
        let moved = |e: PoolError| match e {
            PoolError::Math(_) => PoolError::ReservesMoved(pool_id),
            other => other,
        };
        match &plan.action {
            PlannedAction::Swap {
                token_in,
                protocol_fee,
                net_in,
                amount_out,
                ..
            } => {
                let direction = pool.direction(token_in)?;
                pool.settle_swap(direction, *net_in, *amount_out, now)
                    .map_err(moved)?;
                self.treasury.accrue(token_in, *protocol_fee)?;
                Ok(vec![
                    swap_event(pool, direction, *net_in, *amount_out, &plan.user, &plan.recipient),
                    sync_event(pool),
                ])
            }

            PlannedAction::AddLiquidity {
                amount0,
                amount1,
                shares,
            } => {
                let (fresh, locked) = pool.shares_for(*amount0, *amount1).map_err(moved)?;
                if fresh < *shares {
                    return Err(PoolError::ReservesMoved(pool_id));
                }
                pool.apply_mint(*amount0, *amount1, *shares, locked, now)
                    .map_err(moved)?;
                let outcome = MintOutcome {
                    amount0: *amount0,
                    amount1: *amount1,
                    shares: *shares,
                    locked,
                };
                self.credit_mint(&pool_id, &outcome, &plan.recipient)?;
                Ok(vec![
                    PoolEvent::Mint {
                        pool_id,
                        provider: plan.recipient.clone(),
                        amount0: *amount0,
                        amount1: *amount1,
                        shares: *shares,
                    },
                    sync_event(pool),
                ])
            }

            PlannedAction::RemoveLiquidity {
                shares,
                amount0,
                amount1,
            } => {
                self.positions.ensure_shares(&pool_id, &plan.user, *shares)?;
                let (reserve0, reserve1) = pool.reserves();
                let (fresh0, fresh1) =
                    V2Math::burn_amounts(*shares, reserve0, reserve1, pool.total_shares())
                        .map_err(|e| moved(e.into()))?;
                if fresh0 < *amount0 || fresh1 < *amount1 {
                    return Err(PoolError::ReservesMoved(pool_id));
                }
                pool.apply_burn(*shares, *amount0, *amount1, now)
                    .map_err(moved)?;
                self.positions.debit(&pool_id, &plan.user, *shares)?;
                Ok(vec![
                    PoolEvent::Burn {
                        pool_id,
                        provider: plan.user.clone(),
                        to: plan.recipient.clone(),
                        amount0: *amount0,
                        amount1: *amount1,
                        shares: *shares,
                    },
                    sync_event(pool),
                ])
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use types::{ManualClock, PendingTransaction};

    fn token(s: &str) -> TokenId {
        TokenId::new(s).unwrap()
    }

    fn account(s: &str) -> AccountId {
        AccountId::new(s).unwrap()
    }

    fn engine_with(fees: FeeSchedule) -> LiquidityEngine {
        LiquidityEngine::new(
            Arc::new(PoolRegistry::new(fees.lp_fee_bps, EventBus::default())),
            Arc::new(LiquidityLedger::new()),
            Arc::new(Treasury::new(account("treasury"))),
            fees,
            Arc::new(ManualClock::at_unix(1_700_000_000)),
        )
    }

    fn seeded(fees: FeeSchedule) -> LiquidityEngine {
        let engine = engine_with(fees);
        engine
            .add_liquidity(
                &account("alice"),
                &token("AAA"),
                &token("BBB"),
                1_000_000,
                4_000_000,
                0,
                0,
                &account("alice"),
            )
            .unwrap();
        engine
    }

    #[test]
    fn test_fee_schedule_split_and_gross_up() {
        let fees = FeeSchedule::default();
        assert_eq!(fees.split(10_000).unwrap(), (5, 9_995));
        let gross = fees.gross_up(9_995).unwrap();
        assert_eq!(gross, 10_000);
        assert!(FeeSchedule::new(9_000, 1_000).is_err());
    }

    #[test]
    fn test_first_deposit_credits_locked_account() {
        let engine = seeded(FeeSchedule::default());
        let pool_id = engine.registry().get(&token("AAA"), &token("BBB")).unwrap();
        assert_eq!(
            engine.positions().shares_of(&pool_id, &account("alice")),
            1_999_000
        );
        assert_eq!(
            engine.positions().shares_of(&pool_id, &AccountId::locked()),
            1_000
        );
        let pool = engine.registry().pool(&pool_id).unwrap();
        assert_eq!(engine.positions().total_for(&pool_id), pool.total_shares());
    }

    #[test]
    fn test_deposit_in_reverse_token_order() {
        let engine = seeded(FeeSchedule::default());
        let receipt = engine
            .add_liquidity(
                &account("bob"),
                &token("BBB"),
                &token("AAA"),
                400,
                1_000,
                0,
                0,
                &account("bob"),
            )
            .unwrap();
        assert_eq!((receipt.amount_a, receipt.amount_b), (400, 100));
        assert_eq!(receipt.shares, 200);
    }

    #[test]
    fn test_swap_without_protocol_fee_matches_pool_math() {
        let engine = seeded(FeeSchedule::new(30, 0).unwrap());
        let receipt = engine
            .swap_exact_in(
                &account("bob"),
                &[token("AAA"), token("BBB")],
                10_000,
                0,
                &account("bob"),
            )
            .unwrap();
        assert_eq!(receipt.amount_out(), 39_486);
        assert_eq!(receipt.protocol_fee, 0);
    }

    #[test]
    fn test_protocol_fee_goes_to_treasury() {
        let engine = seeded(FeeSchedule::default());
        let receipt = engine
            .swap_exact_in(
                &account("bob"),
                &[token("AAA"), token("BBB")],
                10_000,
                0,
                &account("bob"),
            )
            .unwrap();
        assert_eq!(receipt.protocol_fee, 5);
        assert_eq!(engine.treasury().balance_of(&token("AAA")), 5);

        let pool_id = receipt.pools[0];
        let (reserve0, _) = engine.registry().pool(&pool_id).unwrap().reserves();
        assert_eq!(reserve0, 1_000_000 + 9_995);
    }

    #[test]
    fn test_slippage_rolls_back_everything() {
        let engine = seeded(FeeSchedule::default());
        let pool_id = engine.registry().get(&token("AAA"), &token("BBB")).unwrap();
        let before = engine.registry().pool(&pool_id).unwrap();

        let err = engine
            .swap_exact_in(
                &account("bob"),
                &[token("AAA"), token("BBB")],
                10_000,
                1_000_000,
                &account("bob"),
            )
            .unwrap_err();
        assert!(matches!(err, PoolError::Math(AmmError::SlippageExceeded { .. })));
        assert_eq!(engine.registry().pool(&pool_id).unwrap(), before);
        assert_eq!(engine.treasury().balance_of(&token("AAA")), 0);
    }

    #[test]
    fn test_exact_out_pays_exact_amount() {
        let engine = seeded(FeeSchedule::default());
        let path = [token("AAA"), token("BBB")];
        let quoted = engine.get_amounts_in(39_000, &path).unwrap();
        let receipt = engine
            .swap_exact_out(&account("bob"), &path, 39_000, quoted[0], &account("bob"))
            .unwrap();
        assert_eq!(receipt.amount_out(), 39_000);
        assert_eq!(receipt.amount_in(), quoted[0]);

        let err = engine
            .swap_exact_out(&account("bob"), &path, 39_000, 100, &account("bob"))
            .unwrap_err();
        assert!(matches!(
            err,
            PoolError::Math(AmmError::SlippageExceeded {
                bound: "amount_in_max",
                ..
            })
        ));
    }

    #[test]
    fn test_remove_requires_position() {
        let engine = seeded(FeeSchedule::default());
        let err = engine
            .remove_liquidity(
                &account("mallory"),
                &token("AAA"),
                &token("BBB"),
                10,
                0,
                0,
                &account("mallory"),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            PoolError::Math(AmmError::InsufficientShares { .. })
        ));
    }

    #[test]
    fn test_plan_then_commit_swap() {
        let engine = seeded(FeeSchedule::default());
        let pool_id = engine.registry().get(&token("AAA"), &token("BBB")).unwrap();
        let params = OperationParams::Swap {
            token_in: token("AAA"),
            token_out: token("BBB"),
            amount_in: 10_000,
            min_amount_out: 1,
            recipient: account("bob"),
            deadline: 1_700_000_060,
        };

        let before = engine.registry().pool(&pool_id).unwrap();
        let plan = engine
            .plan(&account("bob"), &pool_id, &params)
            .unwrap();
        assert_eq!(engine.registry().pool(&pool_id).unwrap(), before);
        assert_eq!(plan.transfers.len(), 2);
        assert_eq!(plan.transfers[1].amount, 5);

        let id = TxId::new();
        engine.commit(&id, &plan).unwrap();
        let after = engine.registry().pool(&pool_id).unwrap();
        assert_ne!(after, before);
        assert!(engine.is_applied(&id));

        // a replayed commit leaves the pool alone
        engine.commit(&id, &plan).unwrap();
        assert_eq!(engine.registry().pool(&pool_id).unwrap(), after);
        assert_eq!(engine.treasury().balance_of(&token("AAA")), 5);
        engine.release_applied(&id);
        assert!(!engine.is_applied(&id));
    }

    #[test]
    fn test_commit_rejects_plan_after_adverse_move() {
        let engine = seeded(FeeSchedule::default());
        let pool_id = engine.registry().get(&token("AAA"), &token("BBB")).unwrap();
        let params = OperationParams::Swap {
            token_in: token("AAA"),
            token_out: token("BBB"),
            amount_in: 10_000,
            min_amount_out: 1,
            recipient: account("bob"),
            deadline: 1_700_000_060,
        };
        let plan = engine
            .plan(&account("bob"), &pool_id, &params)
            .unwrap();

        // someone else sells AAA first, making BBB scarcer
        engine
            .swap_exact_in(
                &account("carol"),
                &[token("AAA"), token("BBB")],
                200_000,
                0,
                &account("carol"),
            )
            .unwrap();

        assert_eq!(
            engine.commit(&TxId::new(), &plan),
            Err(PoolError::ReservesMoved(pool_id))
        );
    }

    #[test]
    fn test_locked_shares_cannot_be_removed() {
        let engine = seeded(FeeSchedule::default());
        let pool_id = engine.registry().get(&token("AAA"), &token("BBB")).unwrap();
        let before = engine.registry().pool(&pool_id).unwrap();

        let err = engine
            .remove_liquidity(
                &AccountId::locked(),
                &token("AAA"),
                &token("BBB"),
                1_000,
                0,
                0,
                &account("mallory"),
            )
            .unwrap_err();
        assert_eq!(err, PoolError::LockedLiquidity(pool_id));
        assert_eq!(
            engine.positions().shares_of(&pool_id, &AccountId::locked()),
            1_000
        );
        assert_eq!(engine.registry().pool(&pool_id).unwrap(), before);

        let params = OperationParams::RemoveLiquidity {
            token_a: token("AAA"),
            token_b: token("BBB"),
            shares: 1_000,
            amount_a_min: 0,
            amount_b_min: 0,
            recipient: account("mallory"),
            deadline: 1_700_000_060,
        };
        assert_eq!(
            engine.plan(&AccountId::locked(), &pool_id, &params),
            Err(PoolError::LockedLiquidity(pool_id))
        );
    }

    #[test]
    fn test_plan_rejects_expired_operation() {
        let engine = seeded(FeeSchedule::default());
        let pool_id = engine.registry().get(&token("AAA"), &token("BBB")).unwrap();
        let params = OperationParams::Swap {
            token_in: token("AAA"),
            token_out: token("BBB"),
            amount_in: 10_000,
            min_amount_out: 1,
            recipient: account("bob"),
            deadline: 1_699_999_999,
        };
        assert_eq!(
            engine.plan(&account("bob"), &pool_id, &params),
            Err(PoolError::Expired {
                deadline: 1_699_999_999,
                now: 1_700_000_000
            })
        );
    }

    #[test]
    fn test_plan_from_stored_record_commits() {
        let engine = seeded(FeeSchedule::default());
        let pool_id = engine.registry().get(&token("AAA"), &token("BBB")).unwrap();
        let params = OperationParams::Swap {
            token_in: token("BBB"),
            token_out: token("AAA"),
            amount_in: 40_000,
            min_amount_out: 1,
            recipient: account("bob"),
            deadline: 1_700_000_060,
        };
        let plan = engine.plan(&account("bob"), &pool_id, &params).unwrap();

        // the plan goes to disk with the record and comes back unchanged
        let mut tx = PendingTransaction::new(
            account("bob"),
            pool_id,
            params,
            chrono::Utc::now(),
        );
        tx.plan = Some(plan.clone());
        let json = serde_json::to_string(&tx).unwrap();
        let back: PendingTransaction = serde_json::from_str(&json).unwrap();
        let stored = back.plan.unwrap();
        assert_eq!(stored, plan);

        let (reserve0, _) = engine.registry().pool(&pool_id).unwrap().reserves();
        engine.commit(&back.id, &stored).unwrap();
        assert_eq!(engine.applied_in(&pool_id), vec![back.id]);
        let PlannedAction::Swap { amount_out, .. } = stored.action else {
            panic!("swap plan expected");
        };
        let (after0, _) = engine.registry().pool(&pool_id).unwrap().reserves();
        assert_eq!(reserve0 - after0, amount_out);
    }
}
