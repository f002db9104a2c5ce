//! Two-phase transaction records
//!
//! ```text
//! PENDING_TX1 --(user signs & submits)--> TX1_COMPLETE
//! TX1_COMPLETE --(operator settles)-----> TX2_COMPLETE   [terminal]
//! TX1_COMPLETE --(settlement fails)-----> TX2_FAILED
//! TX2_FAILED --(recovery)---------------> RECOVERED      [terminal]
//! ```

use crate::errors::TypesError;
use crate::identifiers::{AccountId, PoolId, TokenId, TxId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of user operation carried by a pending transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxKind {
    Swap,
    AddLiquidity,
    RemoveLiquidity,
}

impl fmt::Display for TxKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TxKind::Swap => "swap",
            TxKind::AddLiquidity => "add_liquidity",
            TxKind::RemoveLiquidity => "remove_liquidity",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TxState {
    #[serde(rename = "PENDING_TX1")]
    PendingTx1,
    #[serde(rename = "TX1_COMPLETE")]
    Tx1Complete,
    #[serde(rename = "TX2_COMPLETE")]
    Tx2Complete,
    #[serde(rename = "TX2_FAILED")]
    Tx2Failed,
    Recovered,
}

impl TxState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TxState::Tx2Complete | TxState::Recovered)
    }

    pub fn can_transition_to(self, next: TxState) -> bool {
        matches!(
            (self, next),
            (TxState::PendingTx1, TxState::Tx1Complete)
                | (TxState::Tx1Complete, TxState::Tx2Complete)
                | (TxState::Tx1Complete, TxState::Tx2Failed)
                | (TxState::Tx2Failed, TxState::Recovered)
        )
    }
}

impl fmt::Display for TxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TxState::PendingTx1 => "PENDING_TX1",
            TxState::Tx1Complete => "TX1_COMPLETE",
            TxState::Tx2Complete => "TX2_COMPLETE",
            TxState::Tx2Failed => "TX2_FAILED",
            TxState::Recovered => "RECOVERED",
        };
        f.write_str(name)
    }
}

/// Full original request, kept so settlement can be replayed after a crash
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationParams {
    Swap {
        token_in: TokenId,
        token_out: TokenId,
        amount_in: u128,
        min_amount_out: u128,
        recipient: AccountId,
        deadline: u64,
    },
    AddLiquidity {
        token_a: TokenId,
        token_b: TokenId,
        amount_a_desired: u128,
        amount_b_desired: u128,
        amount_a_min: u128,
        amount_b_min: u128,
        recipient: AccountId,
        deadline: u64,
    },
    RemoveLiquidity {
        token_a: TokenId,
        token_b: TokenId,
        shares: u128,
        amount_a_min: u128,
        amount_b_min: u128,
        recipient: AccountId,
        deadline: u64,
    },
}

impl OperationParams {
    pub fn kind(&self) -> TxKind {
        match self {
            OperationParams::Swap { .. } => TxKind::Swap,
            OperationParams::AddLiquidity { .. } => TxKind::AddLiquidity,
            OperationParams::RemoveLiquidity { .. } => TxKind::RemoveLiquidity,
        }
    }

    /// Unix second after which the operation may no longer be settled
    pub fn deadline(&self) -> u64 {
        match self {
            OperationParams::Swap { deadline, .. }
            | OperationParams::AddLiquidity { deadline, .. }
            | OperationParams::RemoveLiquidity { deadline, .. } => *deadline,
        }
    }

    /// Both tokens of the pool the operation touches
    pub fn tokens(&self) -> (&TokenId, &TokenId) {
        match self {
            OperationParams::Swap {
                token_in, token_out, ..
            } => (token_in, token_out),
            OperationParams::AddLiquidity {
                token_a, token_b, ..
            }
            | OperationParams::RemoveLiquidity {
                token_a, token_b, ..
            } => (token_a, token_b),
        }
    }

    /// What the user moved into the intermediary account during TX1
    pub fn deposits(&self, pool_id: &PoolId) -> Vec<(TokenId, u128)> {
        match self {
            OperationParams::Swap {
                token_in, amount_in, ..
            } => vec![(token_in.clone(), *amount_in)],
            OperationParams::AddLiquidity {
                token_a,
                token_b,
                amount_a_desired,
                amount_b_desired,
                ..
            } => vec![
                (token_a.clone(), *amount_a_desired),
                (token_b.clone(), *amount_b_desired),
            ],
            OperationParams::RemoveLiquidity { shares, .. } => {
                vec![(share_token(pool_id), *shares)]
            }
        }
    }
}

/// On-ledger share token of a pool
pub fn share_token(pool_id: &PoolId) -> TokenId {
    TokenId::from_trusted(format!("lp:{pool_id}"))
}

/// One leg of an operator-signed settlement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub token: TokenId,
    pub to: AccountId,
    pub amount: u128,
}

/// Pool mutation fixed at planning time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlannedAction {
    Swap {
        token_in: TokenId,
        amount_in: u128,
        protocol_fee: u128,
        net_in: u128,
        amount_out: u128,
    },
    AddLiquidity {
        amount0: u128,
        amount1: u128,
        shares: u128,
    },
    RemoveLiquidity {
        shares: u128,
        amount0: u128,
        amount1: u128,
    },
}

/// Everything settlement needs: the pool change and the operator transfers.
///
/// Stored on the record before the first submission so a replay sends the
/// same transfers under the same idempotency key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementPlan {
    pub pool_id: PoolId,
    pub user: AccountId,
    pub recipient: AccountId,
    pub action: PlannedAction,
    pub transfers: Vec<Transfer>,
}

/// Persisted two-phase transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingTransaction {
    pub id: TxId,
    pub kind: TxKind,
    pub user: AccountId,
    pub pool_id: PoolId,
    pub params: OperationParams,
    pub state: TxState,
    pub tx1_ref: Option<String>,
    pub tx2_ref: Option<String>,
    pub recovery_ref: Option<String>,
    /// Plan fixed before the first settlement submission
    #[serde(default)]
    pub plan: Option<SettlementPlan>,
    /// Settlement submissions attempted so far
    pub attempts: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PendingTransaction {
    pub fn new(user: AccountId, pool_id: PoolId, params: OperationParams, now: DateTime<Utc>) -> Self {
        Self {
            id: TxId::new(),
            kind: params.kind(),
            user,
            pool_id,
            params,
            state: TxState::PendingTx1,
            tx1_ref: None,
            tx2_ref: None,
            recovery_ref: None,
            plan: None,
            attempts: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to `next`, enforcing the state machine
    pub fn transition(&mut self, next: TxState, now: DateTime<Utc>) -> Result<(), TypesError> {
        if !self.state.can_transition_to(next) {
            return Err(TypesError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        self.updated_at = now;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn swap_params() -> OperationParams {
        OperationParams::Swap {
            token_in: TokenId::new("USDC").unwrap(),
            token_out: TokenId::new("XLM").unwrap(),
            amount_in: 10_000,
            min_amount_out: 1,
            recipient: AccountId::new("GUSER").unwrap(),
            deadline: 1_700_000_600,
        }
    }

    #[test]
    fn test_state_machine_happy_path() {
        let now = Utc::now();
        let mut tx = PendingTransaction::new(
            AccountId::new("GUSER").unwrap(),
            PoolId::from_bytes([7u8; 20]),
            swap_params(),
            now,
        );
        assert_eq!(tx.kind, TxKind::Swap);
        tx.transition(TxState::Tx1Complete, now).unwrap();
        tx.transition(TxState::Tx2Complete, now).unwrap();
        assert!(tx.state.is_terminal());
    }

    #[test]
    fn test_state_machine_rejects_skips() {
        let now = Utc::now();
        let mut tx = PendingTransaction::new(
            AccountId::new("GUSER").unwrap(),
            PoolId::from_bytes([7u8; 20]),
            swap_params(),
            now,
        );
        let err = tx.transition(TxState::Tx2Complete, now).unwrap_err();
        assert_eq!(
            err,
            TypesError::InvalidTransition {
                from: TxState::PendingTx1,
                to: TxState::Tx2Complete
            }
        );
        tx.transition(TxState::Tx1Complete, now).unwrap();
        tx.transition(TxState::Tx2Failed, now).unwrap();
        assert!(tx.transition(TxState::Tx2Complete, now).is_err());
        tx.transition(TxState::Recovered, now).unwrap();
        assert!(tx.state.is_terminal());
    }

    #[test]
    fn test_record_serializes_with_wire_state_names() {
        let now = Utc::now();
        let tx = PendingTransaction::new(
            AccountId::new("GUSER").unwrap(),
            PoolId::from_bytes([1u8; 20]),
            swap_params(),
            now,
        );
        let json = serde_json::to_string(&tx).unwrap();
        assert!(json.contains("\"PENDING_TX1\""));
        assert!(json.contains("\"swap\""));
        let back: PendingTransaction = serde_json::from_str(&json).unwrap();
        assert_eq!(back, tx);
        assert_eq!(back.params.deadline(), 1_700_000_600);
    }

    #[test]
    fn test_stored_plan_survives_serialization() {
        let now = Utc::now();
        let mut tx = PendingTransaction::new(
            AccountId::new("GUSER").unwrap(),
            PoolId::from_bytes([1u8; 20]),
            swap_params(),
            now,
        );
        tx.plan = Some(SettlementPlan {
            pool_id: tx.pool_id,
            user: tx.user.clone(),
            recipient: tx.user.clone(),
            action: PlannedAction::Swap {
                token_in: TokenId::new("USDC").unwrap(),
                amount_in: 10_000,
                protocol_fee: 5,
                net_in: 9_995,
                amount_out: 39_466,
            },
            transfers: vec![Transfer {
                token: TokenId::new("XLM").unwrap(),
                to: tx.user.clone(),
                amount: 39_466,
            }],
        });
        let json = serde_json::to_string(&tx).unwrap();
        let back: PendingTransaction = serde_json::from_str(&json).unwrap();
        assert_eq!(back.plan, tx.plan);

        // records written before plans were stored still load
        let mut value: serde_json::Value = serde_json::from_str(&json).unwrap();
        value.as_object_mut().unwrap().remove("plan");
        let legacy: PendingTransaction = serde_json::from_value(value).unwrap();
        assert!(legacy.plan.is_none());
    }

    #[test]
    fn test_remove_liquidity_deposit_is_share_token() {
        let pool_id = PoolId::from_bytes([2u8; 20]);
        let params = OperationParams::RemoveLiquidity {
            token_a: TokenId::new("A").unwrap(),
            token_b: TokenId::new("B").unwrap(),
            shares: 500,
            amount_a_min: 0,
            amount_b_min: 0,
            recipient: AccountId::new("GUSER").unwrap(),
            deadline: 1_700_000_600,
        };
        let deposits = params.deposits(&pool_id);
        assert_eq!(deposits, vec![(share_token(&pool_id), 500)]);
    }
}
