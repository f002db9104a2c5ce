//! Pool events
//!
//! Every committed state change is published on a broadcast channel. Slow
//! subscribers lag and drop events; publishing never blocks a pool.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use types::{AccountId, PairKey, PoolId};

const DEFAULT_CAPACITY: usize = 1_024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolEvent {
    Created {
        pool_id: PoolId,
        pair: PairKey,
        fee_bps: u32,
    },
    Mint {
        pool_id: PoolId,
        provider: AccountId,
        amount0: u128,
        amount1: u128,
        shares: u128,
    },
    Burn {
        pool_id: PoolId,
        provider: AccountId,
        to: AccountId,
        amount0: u128,
        amount1: u128,
        shares: u128,
    },
    Swap {
        pool_id: PoolId,
        sender: AccountId,
        to: AccountId,
        amount0_in: u128,
        amount1_in: u128,
        amount0_out: u128,
        amount1_out: u128,
    },
    Sync {
        pool_id: PoolId,
        reserve0: u128,
        reserve1: u128,
    },
    Paused {
        pool_id: PoolId,
        paused: bool,
    },
}

impl PoolEvent {
    pub fn pool_id(&self) -> PoolId {
        match self {
            PoolEvent::Created { pool_id, .. }
            | PoolEvent::Mint { pool_id, .. }
            | PoolEvent::Burn { pool_id, .. }
            | PoolEvent::Swap { pool_id, .. }
            | PoolEvent::Sync { pool_id, .. }
            | PoolEvent::Paused { pool_id, .. } => *pool_id,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<PoolEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PoolEvent> {
        self.sender.subscribe()
    }

    /// Fire and forget; no subscribers is not an error
    pub fn publish(&self, event: PoolEvent) {
        let _ = self.sender.send(event);
    }
}
