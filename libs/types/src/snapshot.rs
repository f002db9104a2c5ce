//! Reserve snapshots for analytics

use crate::identifiers::PoolId;
use serde::{Deserialize, Serialize};

/// Point-in-time copy of a pool's reserves.
///
/// Used for trailing volume and APY estimates only, never for pricing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub pool_id: PoolId,
    pub reserve0: u128,
    pub reserve1: u128,
    /// Share supply at sampling time, lets growth be measured per share
    pub total_shares: u128,
    /// Unix seconds
    pub timestamp: u64,
}

impl Snapshot {
    /// Sampling bucket this snapshot falls into
    pub fn bucket(&self, interval_secs: u64) -> u64 {
        if interval_secs == 0 {
            self.timestamp
        } else {
            self.timestamp / interval_secs
        }
    }
}
