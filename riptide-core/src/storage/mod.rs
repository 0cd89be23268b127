//! Storage layer seams consumed by the replication manager.
//!
//! The engine behind a store (transactions, binlog encoding, snapshots) is
//! pluggable; the manager only needs the operations below. `SegmentMgr`
//! owns the per-store lock table and hands out stores under a chosen lock
//! mode, so engine calls never race administrative transitions.

use crate::{Error, Result};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::io::Write;
use std::sync::Arc;

/// Whether a store accepts client writes or only replicated ones
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreMode {
    /// Normal writable store (master or standalone)
    ReadWrite,
    /// Slave store; only the replication path may write
    ReplicateOnly,
}

/// Oldest record still present in a store's binlog
#[derive(Debug, Clone, Copy)]
pub struct MinBinlog {
    /// Binlog id of the oldest record
    pub binlog_id: u64,
    /// Timestamp (ms since epoch) of the oldest record
    pub timestamp: u64,
}

/// Result of one truncation pass
#[derive(Debug, Clone, Copy)]
pub struct TruncateResult {
    /// Lowest binlog id retained after truncation
    pub new_start: u64,
    /// Bytes written to the archive sink (0 without a sink)
    pub written: u64,
    /// Timestamp (ms since epoch) of the oldest retained record, 0 when
    /// nothing was truncated
    pub timestamp: u64,
}

/// An encoded run of binlog records for pushing to a slave
#[derive(Debug, Clone)]
pub struct BinlogChunk {
    /// First binlog id *after* the records in this chunk
    pub next_id: u64,
    /// Opaque encoded records
    pub bytes: Vec<u8>,
}

/// A storage transaction scoping binlog reads and truncation
pub trait Transaction: Send {
    /// Commit the transaction
    fn commit(self: Box<Self>) -> Result<()>;

    /// Downcast hook for engine implementations
    fn as_any(&mut self) -> &mut dyn std::any::Any;
}

/// One independent key-value shard
pub trait KVStore: Send + Sync {
    /// True when the store's files are open
    fn is_open(&self) -> bool;

    /// True when the store is serving requests
    fn is_running(&self) -> bool;

    /// True when the store holds no user data
    fn is_empty(&self) -> Result<bool>;

    /// Highest binlog id ever assigned (0 when the log is empty)
    fn highest_binlog_id(&self) -> u64;

    /// Oldest record still in the binlog; `Error::Exhausted` when empty
    fn min_binlog(&self) -> Result<MinBinlog>;

    /// Open a transaction for binlog operations
    fn create_transaction(&self) -> Result<Box<dyn Transaction>>;

    /// Truncate binlog records in `[start, end)`, clamped to the log tail;
    /// the newest record is always retained. Truncated records are encoded
    /// into `sink` when present.
    fn truncate_binlog(
        &self,
        start: u64,
        end: u64,
        txn: &mut dyn Transaction,
        sink: Option<&mut dyn Write>,
    ) -> Result<TruncateResult>;

    /// Read encoded records with id >= `from`, up to roughly `max_bytes`
    /// (always at least one record). `None` when the reader caught up.
    fn read_binlogs(&self, from: u64, max_bytes: usize) -> Result<Option<BinlogChunk>>;

    /// Switch between writable and replicate-only modes
    fn set_mode(&self, mode: StoreMode) -> Result<()>;

    /// Current store mode
    fn mode(&self) -> StoreMode;
}

/// Lock mode requested from the segment manager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// No store lock; status inspection only
    None,
    /// Shared intent lock; engine operations that tolerate concurrency
    IntentExclusive,
    /// Exclusive lock; administrative transitions
    Exclusive,
}

enum StoreLockGuard<'a> {
    Unlocked,
    Shared(#[allow(dead_code)] RwLockReadGuard<'a, ()>),
    Exclusive(#[allow(dead_code)] RwLockWriteGuard<'a, ()>),
}

/// A store handle held under the requested lock mode
pub struct DbGuard<'a> {
    store: Arc<dyn KVStore>,
    _lock: StoreLockGuard<'a>,
}

impl DbGuard<'_> {
    /// The locked store
    pub fn store(&self) -> &Arc<dyn KVStore> {
        &self.store
    }
}

struct StoreSlot {
    store: Arc<dyn KVStore>,
    lock: RwLock<()>,
}

/// Registry of every store in the server plus their lock table
pub struct SegmentMgr {
    slots: Vec<StoreSlot>,
}

impl SegmentMgr {
    /// Build a segment manager over a fixed set of stores
    pub fn new(stores: Vec<Arc<dyn KVStore>>) -> Self {
        let slots = stores
            .into_iter()
            .map(|store| StoreSlot {
                store,
                lock: RwLock::new(()),
            })
            .collect();
        Self { slots }
    }

    /// Number of stores in this server
    pub fn store_count(&self) -> u32 {
        self.slots.len() as u32
    }

    /// Fetch store `store_id` under `mode`.
    ///
    /// Closed stores are rejected unless `allow_closed` is set.
    pub fn get_db(&self, store_id: u32, mode: LockMode, allow_closed: bool) -> Result<DbGuard<'_>> {
        let slot = self
            .slots
            .get(store_id as usize)
            .ok_or_else(|| Error::internal(format!("invalid store id {}", store_id)))?;

        let lock = match mode {
            LockMode::None => StoreLockGuard::Unlocked,
            LockMode::IntentExclusive => StoreLockGuard::Shared(slot.lock.read()),
            LockMode::Exclusive => StoreLockGuard::Exclusive(slot.lock.write()),
        };

        if !allow_closed && !slot.store.is_open() {
            return Err(Error::storage(format!("store {} is not open", store_id)));
        }

        Ok(DbGuard {
            store: Arc::clone(&slot.store),
            _lock: lock,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemKvStore;

    fn mgr_with_one_store() -> (SegmentMgr, Arc<MemKvStore>) {
        let store = MemKvStore::new();
        let mgr = SegmentMgr::new(vec![store.clone() as Arc<dyn KVStore>]);
        (mgr, store)
    }

    #[test]
    fn test_invalid_store_id() {
        let (mgr, _store) = mgr_with_one_store();
        assert!(mgr.get_db(1, LockMode::None, true).is_err());
    }

    #[test]
    fn test_closed_store_rejected() {
        let (mgr, store) = mgr_with_one_store();
        store.set_open(false);
        assert!(mgr.get_db(0, LockMode::None, false).is_err());
        assert!(mgr.get_db(0, LockMode::None, true).is_ok());
    }

    #[test]
    fn test_guard_exposes_store() {
        let (mgr, store) = mgr_with_one_store();
        store.append_binlog(b"x".to_vec());
        let guard = mgr.get_db(0, LockMode::IntentExclusive, false).unwrap();
        assert_eq!(guard.store().highest_binlog_id(), 1);
    }

    #[test]
    fn test_shared_locks_coexist() {
        let (mgr, _store) = mgr_with_one_store();
        let g1 = mgr.get_db(0, LockMode::IntentExclusive, false).unwrap();
        let g2 = mgr.get_db(0, LockMode::IntentExclusive, false).unwrap();
        drop(g1);
        drop(g2);
    }
}
