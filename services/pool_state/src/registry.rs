//! Pool Registry
//!
//! One pool per unordered token pair. Pools are indexed by their derived id
//! and by canonical pair key; creation through the pair index entry is
//! atomic, so concurrent `get_or_create` calls for the same pair agree.

use crate::error::{PoolError, Result};
use crate::events::{EventBus, PoolEvent};
use crate::pool::{Pool, PoolStatus};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::info;
use types::{PairKey, PoolId, TokenId};

/// Namespace mixed into every derived pool id
pub const DEFAULT_NAMESPACE: &str = "kestrel";

/// Shared handle to one pool.
///
/// `state` is held only while computing and applying a mutation, never
/// across ledger or network I/O.
#[derive(Debug)]
pub struct PoolHandle {
    pub state: RwLock<Pool>,
}

impl PoolHandle {
    fn new(pool: Pool) -> Self {
        Self {
            state: RwLock::new(pool),
        }
    }
}

pub struct PoolRegistry {
    namespace: String,
    default_fee_bps: u32,

    /// All pools indexed by derived id
    pools: DashMap<PoolId, Arc<PoolHandle>>,

    /// Canonical pair -> pool id
    pair_index: DashMap<PairKey, PoolId>,

    events: EventBus,
}

impl PoolRegistry {
    pub fn new(default_fee_bps: u32, events: EventBus) -> Self {
        Self::with_namespace(DEFAULT_NAMESPACE, default_fee_bps, events)
    }

    pub fn with_namespace(namespace: &str, default_fee_bps: u32, events: EventBus) -> Self {
        Self {
            namespace: namespace.to_string(),
            default_fee_bps,
            pools: DashMap::new(),
            pair_index: DashMap::new(),
            events,
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Deterministic id of the pool for a pair, whether or not it exists yet
    pub fn pool_id_for(&self, token_a: &TokenId, token_b: &TokenId) -> Result<PoolId> {
        let pair = PairKey::new(token_a, token_b)?;
        Ok(PoolId::derive(&self.namespace, &pair))
    }

    /// Look up the pool for a pair, creating an empty one if absent
    pub fn get_or_create(&self, token_a: &TokenId, token_b: &TokenId) -> Result<PoolId> {
        let pair = PairKey::new(token_a, token_b)?;
        match self.pair_index.entry(pair) {
            Entry::Occupied(entry) => Ok(*entry.get()),
            Entry::Vacant(entry) => {
                let pool_id = self.insert_new(entry.key().clone())?;
                entry.insert(pool_id);
                Ok(pool_id)
            }
        }
    }

    /// Explicit creation; fails with `PairExists` on a duplicate
    pub fn create(&self, token_a: &TokenId, token_b: &TokenId) -> Result<PoolId> {
        let pair = PairKey::new(token_a, token_b)?;
        match self.pair_index.entry(pair) {
            Entry::Occupied(entry) => Err(PoolError::PairExists(entry.key().clone())),
            Entry::Vacant(entry) => {
                let pool_id = self.insert_new(entry.key().clone())?;
                entry.insert(pool_id);
                Ok(pool_id)
            }
        }
    }

    pub fn get(&self, token_a: &TokenId, token_b: &TokenId) -> Result<PoolId> {
        let pair = PairKey::new(token_a, token_b)?;
        self.pair_index
            .get(&pair)
            .map(|id| *id)
            .ok_or(PoolError::NotFound(pair))
    }

    pub fn handle(&self, pool_id: &PoolId) -> Result<Arc<PoolHandle>> {
        self.pools
            .get(pool_id)
            .map(|h| Arc::clone(h.value()))
            .ok_or(PoolError::UnknownPool(*pool_id))
    }

    /// Consistent copy of one pool
    pub fn pool(&self, pool_id: &PoolId) -> Result<Pool> {
        Ok(self.handle(pool_id)?.state.read().clone())
    }

    /// Copies of every pool, ordered by id
    pub fn pools(&self) -> Vec<Pool> {
        let mut pools: Vec<Pool> = self
            .pools
            .iter()
            .map(|entry| entry.value().state.read().clone())
            .collect();
        pools.sort_by_key(|p| p.id());
        pools
    }

    pub fn pool_ids(&self) -> Vec<PoolId> {
        let mut ids: Vec<PoolId> = self.pools.iter().map(|e| *e.key()).collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    /// Administrative pause; state is kept as is
    pub fn set_paused(&self, pool_id: &PoolId, paused: bool) -> Result<()> {
        let handle = self.handle(pool_id)?;
        let status = if paused {
            PoolStatus::Paused
        } else {
            PoolStatus::Active
        };
        handle.state.write().set_status(status);
        info!(pool = %pool_id, paused, "pool status changed");
        self.events.publish(PoolEvent::Paused {
            pool_id: *pool_id,
            paused,
        });
        Ok(())
    }

    /// Reinstate persisted pools, replacing any with the same id
    pub fn restore(&self, pools: Vec<Pool>) -> usize {
        let count = pools.len();
        for pool in pools {
            let pool_id = pool.id();
            self.pair_index.insert(pool.pair().clone(), pool_id);
            self.pools.insert(pool_id, Arc::new(PoolHandle::new(pool)));
        }
        info!("Restored {} pools, {} pairs indexed", count, self.pair_index.len());
        count
    }

    fn insert_new(&self, pair: PairKey) -> Result<PoolId> {
        let pool_id = PoolId::derive(&self.namespace, &pair);
        let pool = Pool::new(pool_id, pair.clone(), self.default_fee_bps)?;
        self.pools.insert(pool_id, Arc::new(PoolHandle::new(pool)));
        info!(
            pool = %pool_id,
            pair = %pair,
            fee_bps = self.default_fee_bps,
            total_pools = self.pools.len(),
            "Indexed new pool"
        );
        self.events.publish(PoolEvent::Created {
            pool_id,
            pair,
            fee_bps: self.default_fee_bps,
        });
        Ok(pool_id)
    }
}
