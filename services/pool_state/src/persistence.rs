//! JSON state file
//!
//! Pools, positions, snapshots and treasury balances are written as one
//! pretty-printed document. Writes go to a sibling temp file first and are
//! renamed into place, so a crash mid-write leaves the previous state intact.
//!
//! [`StateCheckpointer`] is attached to the engine and rewrites the file after
//! every committed mutation, so a crash loses nothing that was acknowledged.

use crate::engine::LiquidityEngine;
use crate::error::{PoolError, Result};
use crate::pool::Pool;
use crate::positions::LiquidityPosition;
use crate::snapshot::SnapshotBook;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};
use types::{PoolId, Snapshot, TokenId, TxId};

pub const STATE_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedState {
    pub version: u32,
    pub pools: Vec<Pool>,
    pub lp_positions: Vec<LiquidityPosition>,
    pub pool_snapshots: Vec<Snapshot>,
    #[serde(default)]
    pub treasury: Vec<(TokenId, u128)>,
    /// Settlements applied to a pool but not yet marked complete
    #[serde(default)]
    pub applied_settlements: Vec<(TxId, PoolId)>,
}

impl PersistedState {
    /// Copy of live state. Each pool and its positions are read under the
    /// pool's lock, so reserves, total shares and positions always agree.
    pub fn capture(engine: &LiquidityEngine, snapshots: &SnapshotBook) -> Self {
        let mut pools = Vec::new();
        let mut lp_positions = Vec::new();
        let mut applied_settlements = Vec::new();
        for pool_id in engine.registry().pool_ids() {
            let Ok(handle) = engine.registry().handle(&pool_id) else {
                continue;
            };
            let pool = handle.state.read();
            lp_positions.extend(engine.positions().all_positions(&pool_id));
            applied_settlements.extend(engine.applied_in(&pool_id).into_iter().map(|id| (id, pool_id)));
            pools.push(pool.clone());
        }
        Self {
            version: STATE_VERSION,
            pools,
            lp_positions,
            pool_snapshots: snapshots.export(),
            treasury: engine.treasury().balances(),
            applied_settlements,
        }
    }

    /// Load into empty components
    pub fn apply(self, engine: &LiquidityEngine, snapshots: &SnapshotBook) -> usize {
        let pools = engine.registry().restore(self.pools);
        engine.positions().restore(self.lp_positions);
        snapshots.restore(self.pool_snapshots);
        engine.treasury().restore(self.treasury);
        engine.restore_applied(self.applied_settlements);
        pools
    }
}

#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn save(&self, state: &PersistedState) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(state)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        debug!(
            path = %self.path.display(),
            pools = state.pools.len(),
            positions = state.lp_positions.len(),
            "state saved"
        );
        Ok(())
    }

    /// `None` when no state file exists yet
    pub fn load(&self) -> Result<Option<PersistedState>> {
        if !self.path.exists() {
            info!(path = %self.path.display(), "no state file, starting empty");
            return Ok(None);
        }
        let raw = fs::read_to_string(&self.path)?;
        let state: PersistedState = serde_json::from_str(&raw)?;
        if state.version != STATE_VERSION {
            return Err(PoolError::Persistence(format!(
                "unsupported state version {} in {}",
                state.version,
                self.path.display()
            )));
        }
        info!(
            path = %self.path.display(),
            pools = state.pools.len(),
            positions = state.lp_positions.len(),
            snapshots = state.pool_snapshots.len(),
            "state loaded"
        );
        Ok(Some(state))
    }
}

/// Writes the state file on behalf of the engine after each mutation
pub struct StateCheckpointer {
    store: StateStore,
    snapshots: Arc<SnapshotBook>,
    write: Mutex<()>,
}

impl StateCheckpointer {
    pub fn new(store: StateStore, snapshots: Arc<SnapshotBook>) -> Self {
        Self {
            store,
            snapshots,
            write: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Capture and write; concurrent saves are serialized so the last
    /// writer always holds the newest state
    pub fn save(&self, engine: &LiquidityEngine) -> Result<()> {
        let _write = self.write.lock();
        let state = PersistedState::capture(engine, &self.snapshots);
        self.store.save(&state)
    }
}
