//! Pending transaction stores
//!
//! Every state change is a compare-and-set on the state the caller read, so
//! two coordinators racing on one record cannot both move it.

use crate::error::StoreError;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use types::{PendingTransaction, TxId, TxState};

pub type StoreResult<T> = std::result::Result<T, StoreError>;

pub trait TransactionStore: Send + Sync {
    fn insert(&self, tx: PendingTransaction) -> StoreResult<()>;

    fn get(&self, id: &TxId) -> StoreResult<PendingTransaction>;

    /// Replace the record only if it is still in `expected`
    fn compare_and_set(&self, expected: TxState, next: PendingTransaction) -> StoreResult<()>;

    /// All records, oldest first
    fn list(&self) -> Vec<PendingTransaction>;

    fn list_in_state(&self, state: TxState) -> Vec<PendingTransaction> {
        self.list().into_iter().filter(|tx| tx.state == state).collect()
    }
}

fn sorted(mut records: Vec<PendingTransaction>) -> Vec<PendingTransaction> {
    records.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
    records
}

#[derive(Debug, Default)]
pub struct MemoryTransactionStore {
    records: DashMap<TxId, PendingTransaction>,
}

impl MemoryTransactionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TransactionStore for MemoryTransactionStore {
    fn insert(&self, tx: PendingTransaction) -> StoreResult<()> {
        match self.records.entry(tx.id) {
            Entry::Occupied(_) => Err(StoreError::Duplicate(tx.id)),
            Entry::Vacant(entry) => {
                entry.insert(tx);
                Ok(())
            }
        }
    }

    fn get(&self, id: &TxId) -> StoreResult<PendingTransaction> {
        self.records
            .get(id)
            .map(|r| r.value().clone())
            .ok_or(StoreError::NotFound(*id))
    }

    fn compare_and_set(&self, expected: TxState, next: PendingTransaction) -> StoreResult<()> {
        let mut current = self
            .records
            .get_mut(&next.id)
            .ok_or(StoreError::NotFound(next.id))?;
        if current.state != expected {
            return Err(StoreError::Conflict {
                id: next.id,
                expected,
                actual: current.state,
            });
        }
        *current = next;
        Ok(())
    }

    fn list(&self) -> Vec<PendingTransaction> {
        sorted(self.records.iter().map(|r| r.value().clone()).collect())
    }
}

/// Whole-file JSON store; rewritten on every change
#[derive(Debug)]
pub struct JsonFileTransactionStore {
    path: PathBuf,
    records: Mutex<HashMap<TxId, PendingTransaction>>,
}

impl JsonFileTransactionStore {
    /// Open `path`, loading existing records if the file is there
    pub fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        let mut records = HashMap::new();
        if path.exists() {
            let raw = fs::read_to_string(&path)?;
            let loaded: Vec<PendingTransaction> = serde_json::from_str(&raw)?;
            for tx in loaded {
                records.insert(tx.id, tx);
            }
            info!(
                path = %path.display(),
                records = records.len(),
                "Loaded pending transactions"
            );
        }
        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self, records: &HashMap<TxId, PendingTransaction>) -> StoreResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let ordered = sorted(records.values().cloned().collect());
        let json = serde_json::to_string_pretty(&ordered)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        debug!(path = %self.path.display(), records = ordered.len(), "transactions flushed");
        Ok(())
    }
}

impl TransactionStore for JsonFileTransactionStore {
    fn insert(&self, tx: PendingTransaction) -> StoreResult<()> {
        let mut records = self.records.lock();
        if records.contains_key(&tx.id) {
            return Err(StoreError::Duplicate(tx.id));
        }
        let id = tx.id;
        records.insert(id, tx);
        if let Err(e) = self.flush(&records) {
            records.remove(&id);
            return Err(e);
        }
        Ok(())
    }

    fn get(&self, id: &TxId) -> StoreResult<PendingTransaction> {
        self.records
            .lock()
            .get(id)
            .cloned()
            .ok_or(StoreError::NotFound(*id))
    }

    fn compare_and_set(&self, expected: TxState, next: PendingTransaction) -> StoreResult<()> {
        let mut records = self.records.lock();
        let current = records
            .get(&next.id)
            .cloned()
            .ok_or(StoreError::NotFound(next.id))?;
        if current.state != expected {
            return Err(StoreError::Conflict {
                id: next.id,
                expected,
                actual: current.state,
            });
        }
        records.insert(next.id, next);
        if let Err(e) = self.flush(&records) {
            records.insert(current.id, current);
            return Err(e);
        }
        Ok(())
    }

    fn list(&self) -> Vec<PendingTransaction> {
        sorted(self.records.lock().values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::TempDir;
    use types::{AccountId, OperationParams, PoolId, TokenId};

    fn pending() -> PendingTransaction {
        PendingTransaction::new(
            AccountId::new("alice").unwrap(),
            PoolId::from_bytes([3u8; 20]),
            OperationParams::Swap {
                token_in: TokenId::new("USDC").unwrap(),
                token_out: TokenId::new("XLM").unwrap(),
                amount_in: 1_000,
                min_amount_out: 1,
                recipient: AccountId::new("alice").unwrap(),
                deadline: 1_700_000_600,
            },
            Utc::now(),
        )
    }

    fn exercise(store: &dyn TransactionStore) {
        let tx = pending();
        store.insert(tx.clone()).unwrap();
        assert_eq!(store.insert(tx.clone()), Err(StoreError::Duplicate(tx.id)));

        let mut next = tx.clone();
        next.transition(TxState::Tx1Complete, Utc::now()).unwrap();
        store
            .compare_and_set(TxState::PendingTx1, next.clone())
            .unwrap();

        // second writer read the old state
        let err = store
            .compare_and_set(TxState::PendingTx1, next.clone())
            .unwrap_err();
        assert_eq!(
            err,
            StoreError::Conflict {
                id: tx.id,
                expected: TxState::PendingTx1,
                actual: TxState::Tx1Complete
            }
        );

        assert_eq!(store.get(&tx.id).unwrap().state, TxState::Tx1Complete);
        assert_eq!(store.list_in_state(TxState::Tx1Complete).len(), 1);
        assert!(store.list_in_state(TxState::PendingTx1).is_empty());
    }

    #[test]
    fn test_memory_store_compare_and_set() {
        exercise(&MemoryTransactionStore::new());
    }

    #[test]
    fn test_file_store_compare_and_set() {
        let dir = TempDir::new().unwrap();
        exercise(&JsonFileTransactionStore::open(dir.path().join("tx.json")).unwrap());
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pending_transactions.json");
        let tx = pending();
        {
            let store = JsonFileTransactionStore::open(&path).unwrap();
            store.insert(tx.clone()).unwrap();
        }
        let reopened = JsonFileTransactionStore::open(&path).unwrap();
        assert_eq!(reopened.get(&tx.id).unwrap(), tx);
    }

    #[test]
    fn test_missing_record() {
        let store = MemoryTransactionStore::new();
        let id = TxId::new();
        assert_eq!(store.get(&id), Err(StoreError::NotFound(id)));
    }
}
