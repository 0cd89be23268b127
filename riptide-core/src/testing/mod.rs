//! In-memory collaborators for exercising the replication manager without
//! a real storage engine or network. Used by unit tests and the
//! integration suites under `tests/`.

use crate::catalog::{Catalog, StoreMeta};
use crate::config::ReplConfig;
use crate::net::{BlockingClient, Network};
use crate::replication::{ReplManager, SyncProtocol, SyncStatus};
use crate::storage::{
    BinlogChunk, KVStore, MinBinlog, SegmentMgr, StoreMode, Transaction, TruncateResult,
};
use crate::{Error, Result};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tempfile::TempDir;

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// In-memory catalog
#[derive(Default)]
pub struct MemCatalog {
    metas: Mutex<HashMap<u32, StoreMeta>>,
}

impl MemCatalog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Insert a record under an arbitrary key, bypassing validation
    pub fn put_raw(&self, key: u32, meta: StoreMeta) {
        self.metas.lock().insert(key, meta);
    }
}

impl Catalog for MemCatalog {
    fn store_meta(&self, id: u32) -> Result<StoreMeta> {
        self.metas
            .lock()
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("store meta {}", id)))
    }

    fn set_store_meta(&self, meta: &StoreMeta) -> Result<()> {
        self.metas.lock().insert(meta.id, meta.clone());
        Ok(())
    }
}

struct BinlogRecord {
    bytes: Vec<u8>,
    ts: u64,
}

struct MemStoreInner {
    open: bool,
    running: bool,
    mode: StoreMode,
    has_data: bool,
    next_id: u64,
    binlog: BTreeMap<u64, BinlogRecord>,
}

/// In-memory store with a contiguous binlog
pub struct MemKvStore {
    inner: Mutex<MemStoreInner>,
}

impl MemKvStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(MemStoreInner {
                open: true,
                running: true,
                mode: StoreMode::ReadWrite,
                has_data: false,
                next_id: 1,
                binlog: BTreeMap::new(),
            }),
        })
    }

    /// Append one binlog record, returning its id
    pub fn append_binlog(&self, bytes: Vec<u8>) -> u64 {
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.binlog.insert(
            id,
            BinlogRecord {
                bytes,
                ts: now_ms(),
            },
        );
        id
    }

    pub fn set_open(&self, open: bool) {
        self.inner.lock().open = open;
    }

    pub fn set_running(&self, running: bool) {
        self.inner.lock().running = running;
    }

    pub fn set_has_data(&self, has_data: bool) {
        self.inner.lock().has_data = has_data;
    }

    /// Number of records still in the binlog
    pub fn binlog_len(&self) -> usize {
        self.inner.lock().binlog.len()
    }
}

struct MemTransaction;

impl Transaction for MemTransaction {
    fn commit(self: Box<Self>) -> Result<()> {
        Ok(())
    }

    fn as_any(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

impl KVStore for MemKvStore {
    fn is_open(&self) -> bool {
        self.inner.lock().open
    }

    fn is_running(&self) -> bool {
        self.inner.lock().running
    }

    fn is_empty(&self) -> Result<bool> {
        let inner = self.inner.lock();
        Ok(!inner.has_data && inner.binlog.is_empty())
    }

    fn highest_binlog_id(&self) -> u64 {
        self.inner.lock().next_id.saturating_sub(1)
    }

    fn min_binlog(&self) -> Result<MinBinlog> {
        let inner = self.inner.lock();
        match inner.binlog.iter().next() {
            Some((id, rec)) => Ok(MinBinlog {
                binlog_id: *id,
                timestamp: rec.ts,
            }),
            None => Err(Error::exhausted("binlog empty")),
        }
    }

    fn create_transaction(&self) -> Result<Box<dyn Transaction>> {
        Ok(Box::new(MemTransaction))
    }

    fn truncate_binlog(
        &self,
        start: u64,
        end: u64,
        _txn: &mut dyn Transaction,
        mut sink: Option<&mut dyn Write>,
    ) -> Result<TruncateResult> {
        let mut inner = self.inner.lock();
        let highest = inner.next_id.saturating_sub(1);
        let stop = end.min(highest);
        if stop <= start {
            return Ok(TruncateResult {
                new_start: start,
                written: 0,
                timestamp: 0,
            });
        }

        let ids: Vec<u64> = inner.binlog.range(start..stop).map(|(id, _)| *id).collect();
        let mut written = 0u64;
        for id in ids {
            if let Some(rec) = inner.binlog.remove(&id) {
                if let Some(w) = sink.as_mut() {
                    w.write_all(&rec.bytes)?;
                    written += rec.bytes.len() as u64;
                }
            }
        }
        let timestamp = inner.binlog.get(&stop).map(|rec| rec.ts).unwrap_or(0);
        Ok(TruncateResult {
            new_start: stop,
            written,
            timestamp,
        })
    }

    fn read_binlogs(&self, from: u64, max_bytes: usize) -> Result<Option<BinlogChunk>> {
        let inner = self.inner.lock();
        let mut bytes = Vec::new();
        let mut next_id = from;
        let mut any = false;
        for (id, rec) in inner.binlog.range(from..) {
            if any && bytes.len() + rec.bytes.len() > max_bytes {
                break;
            }
            bytes.extend_from_slice(&rec.bytes);
            next_id = id + 1;
            any = true;
            if bytes.len() >= max_bytes {
                break;
            }
        }
        if any {
            Ok(Some(BinlogChunk { next_id, bytes }))
        } else {
            Ok(None)
        }
    }

    fn set_mode(&self, mode: StoreMode) -> Result<()> {
        self.inner.lock().mode = mode;
        Ok(())
    }

    fn mode(&self) -> StoreMode {
        self.inner.lock().mode
    }
}

/// Shared script/recording state of a [`MemNetwork`]
#[derive(Default)]
struct MemNetState {
    responses: Mutex<VecDeque<String>>,
    sent_lines: Mutex<Vec<String>>,
    written_bytes: AtomicU64,
    refuse_connects: AtomicBool,
    canceled: Mutex<Vec<u64>>,
}

/// In-memory network whose clients record traffic and replay scripted
/// responses
#[derive(Default)]
pub struct MemNetwork {
    state: Arc<MemNetState>,
}

impl MemNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue a line for the next `read_line`
    pub fn script_response(&self, line: &str) {
        self.state.responses.lock().push_back(line.to_string());
    }

    /// Lines written by any client so far
    pub fn sent_lines(&self) -> Vec<String> {
        self.state.sent_lines.lock().clone()
    }

    /// Raw bytes written by any client so far
    pub fn written_bytes(&self) -> u64 {
        self.state.written_bytes.load(Ordering::SeqCst)
    }

    /// Make every subsequent connect fail
    pub fn refuse_connects(&self, refuse: bool) {
        self.state.refuse_connects.store(refuse, Ordering::SeqCst);
    }

    /// Session ids passed to `cancel_session`
    pub fn canceled_sessions(&self) -> Vec<u64> {
        self.state.canceled.lock().clone()
    }

    /// A fresh unconnected client sharing this network's recorders
    pub fn new_client(&self) -> Box<dyn BlockingClient> {
        Box::new(MemClient {
            state: Arc::clone(&self.state),
            remote: None,
        })
    }
}

impl Network for MemNetwork {
    fn create_blocking_client(&self, _buf_size: usize) -> Box<dyn BlockingClient> {
        self.new_client()
    }

    fn cancel_session(&self, session_id: u64) -> Result<()> {
        self.state.canceled.lock().push(session_id);
        Ok(())
    }
}

struct MemClient {
    state: Arc<MemNetState>,
    remote: Option<String>,
}

impl BlockingClient for MemClient {
    fn connect(&mut self, host: &str, port: u16, _timeout: Duration) -> Result<()> {
        if self.state.refuse_connects.load(Ordering::SeqCst) {
            return Err(Error::network(format!("connect {}:{} refused", host, port)));
        }
        self.remote = Some(format!("{}:{}", host, port));
        Ok(())
    }

    fn write_line(&mut self, line: &str) -> Result<()> {
        self.state.sent_lines.lock().push(line.to_string());
        Ok(())
    }

    fn read_line(&mut self, _timeout: Duration) -> Result<String> {
        self.state
            .responses
            .lock()
            .pop_front()
            .ok_or_else(|| Error::timeout("no scripted response"))
    }

    fn write_bytes(&mut self, buf: &[u8]) -> Result<()> {
        self.state
            .written_bytes
            .fetch_add(buf.len() as u64, Ordering::SeqCst);
        Ok(())
    }

    fn remote_repr(&self) -> String {
        self.remote.clone().unwrap_or_else(|| "???".to_string())
    }
}

/// Scriptable sync protocol
pub struct MockSyncProtocol {
    full_sync_handoff: AtomicU64,
    full_sync_delay: Mutex<Duration>,
    full_sync_fail: AtomicBool,
    full_sync_calls: AtomicU64,
    check_fail: AtomicBool,
    check_calls: AtomicU64,
    check_session: Mutex<Option<u64>>,
    supply_handoff: Mutex<Option<u64>>,
    supply_delay: Mutex<Duration>,
    supply_fail: AtomicBool,
}

impl Default for MockSyncProtocol {
    fn default() -> Self {
        Self {
            full_sync_handoff: AtomicU64::new(0),
            full_sync_delay: Mutex::new(Duration::ZERO),
            full_sync_fail: AtomicBool::new(false),
            full_sync_calls: AtomicU64::new(0),
            check_fail: AtomicBool::new(false),
            check_calls: AtomicU64::new(0),
            check_session: Mutex::new(None),
            supply_handoff: Mutex::new(None),
            supply_delay: Mutex::new(Duration::ZERO),
            supply_fail: AtomicBool::new(false),
        }
    }
}

impl MockSyncProtocol {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_full_sync_handoff(&self, handoff: u64) {
        self.full_sync_handoff.store(handoff, Ordering::SeqCst);
    }

    pub fn set_full_sync_delay(&self, delay: Duration) {
        *self.full_sync_delay.lock() = delay;
    }

    pub fn set_full_sync_fail(&self, fail: bool) {
        self.full_sync_fail.store(fail, Ordering::SeqCst);
    }

    pub fn full_sync_calls(&self) -> u64 {
        self.full_sync_calls.load(Ordering::SeqCst)
    }

    pub fn check_calls(&self) -> u64 {
        self.check_calls.load(Ordering::SeqCst)
    }

    pub fn set_check_fail(&self, fail: bool) {
        self.check_fail.store(fail, Ordering::SeqCst);
    }

    pub fn set_check_session(&self, session: Option<u64>) {
        *self.check_session.lock() = session;
    }

    pub fn set_supply_handoff(&self, handoff: u64) {
        *self.supply_handoff.lock() = Some(handoff);
    }

    pub fn set_supply_delay(&self, delay: Duration) {
        *self.supply_delay.lock() = delay;
    }

    pub fn set_supply_fail(&self, fail: bool) {
        self.supply_fail.store(fail, Ordering::SeqCst);
    }
}

impl SyncProtocol for MockSyncProtocol {
    fn full_sync(
        &self,
        _store_id: u32,
        _meta: &StoreMeta,
        _client: &mut dyn BlockingClient,
    ) -> Result<u64> {
        self.full_sync_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.full_sync_delay.lock();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        if self.full_sync_fail.load(Ordering::SeqCst) {
            return Err(Error::network("scripted full sync failure"));
        }
        Ok(self.full_sync_handoff.load(Ordering::SeqCst))
    }

    fn check_sync_status(&self, _store_id: u32, meta: &StoreMeta) -> Result<SyncStatus> {
        self.check_calls.fetch_add(1, Ordering::SeqCst);
        if self.check_fail.load(Ordering::SeqCst) {
            return Err(Error::network("scripted check failure"));
        }
        Ok(SyncStatus {
            binlog_id: meta.binlog_id,
            session_id: *self.check_session.lock(),
        })
    }

    fn supply_full_sync(
        &self,
        _store_id: u32,
        store: &Arc<dyn KVStore>,
        _client: &mut dyn BlockingClient,
        _dst_store_id: u32,
    ) -> Result<u64> {
        let delay = *self.supply_delay.lock();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        if self.supply_fail.load(Ordering::SeqCst) {
            return Err(Error::network("scripted supply failure"));
        }
        let handoff = (*self.supply_handoff.lock()).unwrap_or_else(|| store.highest_binlog_id());
        Ok(handoff)
    }
}

/// A manager wired to in-memory collaborators, dump files in a tempdir
pub struct TestHarness {
    pub manager: ReplManager,
    pub stores: Vec<Arc<MemKvStore>>,
    pub catalog: Arc<MemCatalog>,
    pub network: Arc<MemNetwork>,
    pub protocol: Arc<MockSyncProtocol>,
    pub dump_dir: TempDir,
}

impl TestHarness {
    /// Build `store_count` open stores and a manager over them; `startup`
    /// is left to the caller
    pub fn new(store_count: u32, mut cfg: ReplConfig) -> Self {
        let dump_dir = TempDir::new().expect("create dump tempdir");
        cfg.dump_path = dump_dir.path().to_path_buf();

        let stores: Vec<Arc<MemKvStore>> = (0..store_count).map(|_| MemKvStore::new()).collect();
        let segment_mgr = Arc::new(SegmentMgr::new(
            stores
                .iter()
                .map(|s| Arc::clone(s) as Arc<dyn KVStore>)
                .collect(),
        ));
        let catalog = MemCatalog::new();
        let network = MemNetwork::new();
        let protocol = MockSyncProtocol::new();

        let manager = ReplManager::new(
            cfg,
            Arc::clone(&catalog) as Arc<dyn Catalog>,
            segment_mgr,
            Arc::clone(&network) as Arc<dyn Network>,
            Arc::clone(&protocol) as Arc<dyn SyncProtocol>,
        )
        .expect("construct manager");

        Self {
            manager,
            stores,
            catalog,
            network,
            protocol,
            dump_dir,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mem_store_truncate_with_sink() {
        let store = MemKvStore::new();
        for i in 0..5u8 {
            store.append_binlog(vec![i; 10]);
        }

        let mut txn = store.create_transaction().unwrap();
        let mut sink: Vec<u8> = Vec::new();
        let result = store
            .truncate_binlog(1, 4, txn.as_mut(), Some(&mut sink))
            .unwrap();
        assert_eq!(result.new_start, 4);
        assert_eq!(result.written, 30);
        assert_eq!(sink.len(), 30);
        assert_eq!(store.binlog_len(), 2);
        assert_eq!(store.min_binlog().unwrap().binlog_id, 4);
    }

    #[test]
    fn test_mem_store_truncate_retains_newest() {
        let store = MemKvStore::new();
        for i in 0..3u8 {
            store.append_binlog(vec![i; 4]);
        }
        let mut txn = store.create_transaction().unwrap();
        let result = store
            .truncate_binlog(1, u64::MAX, txn.as_mut(), None)
            .unwrap();
        assert_eq!(result.new_start, 3);
        assert_eq!(store.binlog_len(), 1);
        assert_eq!(store.highest_binlog_id(), 3);
    }

    #[test]
    fn test_mem_store_truncate_noop() {
        let store = MemKvStore::new();
        store.append_binlog(vec![1, 2, 3]);
        let mut txn = store.create_transaction().unwrap();
        let result = store.truncate_binlog(1, 1, txn.as_mut(), None).unwrap();
        assert_eq!(result.new_start, 1);
        assert_eq!(result.written, 0);
        assert_eq!(store.binlog_len(), 1);
    }

    #[test]
    fn test_mem_store_read_binlogs() {
        let store = MemKvStore::new();
        for _ in 0..4 {
            store.append_binlog(vec![0u8; 100]);
        }

        let chunk = store.read_binlogs(1, 250).unwrap().unwrap();
        assert_eq!(chunk.next_id, 3);
        assert_eq!(chunk.bytes.len(), 200);

        let chunk = store.read_binlogs(3, 1000).unwrap().unwrap();
        assert_eq!(chunk.next_id, 5);
        assert!(store.read_binlogs(5, 1000).unwrap().is_none());
    }

    #[test]
    fn test_mem_store_oversized_record_still_served() {
        let store = MemKvStore::new();
        store.append_binlog(vec![0u8; 500]);
        let chunk = store.read_binlogs(1, 100).unwrap().unwrap();
        assert_eq!(chunk.bytes.len(), 500);
        assert_eq!(chunk.next_id, 2);
    }

    #[test]
    fn test_mem_catalog_roundtrip() {
        let catalog = MemCatalog::new();
        assert!(catalog.store_meta(0).unwrap_err().is_not_found());
        let meta = StoreMeta::new(0);
        catalog.set_store_meta(&meta).unwrap();
        assert_eq!(catalog.store_meta(0).unwrap(), meta);
    }

    #[test]
    fn test_mem_network_scripting() {
        let network = MemNetwork::new();
        network.script_response("+OK");

        let mut client = network.new_client();
        client.connect("h", 1, Duration::from_secs(1)).unwrap();
        client.write_line("PING").unwrap();
        assert_eq!(client.read_line(Duration::from_secs(1)).unwrap(), "+OK");
        assert!(client.read_line(Duration::from_secs(1)).is_err());
        assert_eq!(network.sent_lines(), vec!["PING".to_string()]);
        assert_eq!(client.remote_repr(), "h:1");
    }
}
