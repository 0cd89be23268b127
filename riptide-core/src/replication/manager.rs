//! The replication manager: process-wide control plane driving every
//! store's slave, master-push and binlog-recycle lifecycles.
//!
//! One dedicated control thread inspects per-store status under a single
//! manager mutex and dispatches due work onto five fixed-size pools. Each
//! routine clears its `is_running` flag and advances its schedule on exit,
//! so at most one routine per (store, role) is ever in flight.
//!
//! Lock ordering: segment-manager store lock → manager mutex → per-store
//! recycle mutex. The control loop and `on_flush` take only the manager
//! mutex.

use crate::catalog::{Catalog, ReplState, StoreMeta};
use crate::config::ReplConfig;
use crate::rate_limiter::RateLimiter;
use crate::replication::recycle::{self, DumpFileState};
use crate::replication::status::{
    FullPushState, MasterFullPushStatus, MasterPushStatus, RecycleStatus, SlaveStatus,
};
use crate::replication::{
    is_due, SyncProtocol, BINLOG_ID_UNINITED, MIN_VALID_BINLOG_ID, SESSION_ID_NONE,
};
use crate::storage::{LockMode, SegmentMgr, StoreMode};
use crate::worker::WorkerPool;
use crate::net::Network;
use crate::{Error, Result};
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime};

/// The incr-check pool size is fixed; there is intentionally no knob
const INCR_CHECK_THREADS: usize = 2;

/// Idle tick of the control loop
const CONTROL_IDLE: Duration = Duration::from_millis(10);

/// Everything guarded by the manager mutex
pub(crate) struct ManagerState {
    /// Per-store persisted metadata, mirrored from the catalog
    pub(crate) sync_meta: Vec<StoreMeta>,
    /// Per-store slave-role runtime state
    pub(crate) slave_status: Vec<SlaveStatus>,
    /// Per-store map of incremental subscribers, keyed by client id
    pub(crate) push_status: Vec<HashMap<u64, MasterPushStatus>>,
    /// Per-store map of full-sync pushes, keyed by peer identity
    pub(crate) full_push_status: Vec<HashMap<String, MasterFullPushStatus>>,
    /// Per-store recycle state
    pub(crate) recycle_status: Vec<RecycleStatus>,
    /// Connect timeout handed to slave routines; shrunk to fail fast on detach
    pub(crate) connect_master_timeout_ms: u64,
    /// When set, incremental pushes are suspended
    pub(crate) incr_paused: bool,
}

pub(crate) struct ReplInner {
    pub(crate) cfg: ReplConfig,
    pub(crate) catalog: Arc<dyn Catalog>,
    pub(crate) segment_mgr: Arc<SegmentMgr>,
    pub(crate) network: Arc<dyn Network>,
    pub(crate) protocol: Arc<dyn SyncProtocol>,
    pub(crate) rate_limiter: RateLimiter,
    pub(crate) running: AtomicBool,
    pub(crate) client_id_gen: AtomicU64,
    pub(crate) state: Mutex<ManagerState>,
    pub(crate) cv: Condvar,
    /// Per-store recycle mutex guarding the dump-file handle and sequence
    pub(crate) dump: Vec<Mutex<DumpFileState>>,
    pub(crate) full_pusher: WorkerPool,
    pub(crate) incr_pusher: WorkerPool,
    pub(crate) full_receiver: WorkerPool,
    pub(crate) incr_checker: WorkerPool,
    pub(crate) log_recycler: WorkerPool,
    pub(crate) controller: Mutex<Option<JoinHandle<()>>>,
}

/// Cloneable handle to the replication manager.
///
/// Worker closures capture clones of this handle; call [`ReplManager::stop`]
/// before letting the last handle go so the control thread and pools join.
#[derive(Clone)]
pub struct ReplManager {
    pub(crate) inner: Arc<ReplInner>,
}

impl ReplManager {
    /// Build a manager over the given collaborators. No threads run until
    /// [`startup`](Self::startup).
    pub fn new(
        cfg: ReplConfig,
        catalog: Arc<dyn Catalog>,
        segment_mgr: Arc<SegmentMgr>,
        network: Arc<dyn Network>,
        protocol: Arc<dyn SyncProtocol>,
    ) -> Result<Self> {
        cfg.validate()?;
        let store_count = segment_mgr.store_count() as usize;
        let rate_limiter = RateLimiter::new(cfg.binlog_rate_limit_mb * 1024 * 1024);
        let dump = (0..store_count)
            .map(|_| Mutex::new(DumpFileState::default()))
            .collect();

        Ok(Self {
            inner: Arc::new(ReplInner {
                cfg,
                catalog,
                segment_mgr,
                network,
                protocol,
                rate_limiter,
                running: AtomicBool::new(false),
                client_id_gen: AtomicU64::new(0),
                state: Mutex::new(ManagerState {
                    sync_meta: Vec::with_capacity(store_count),
                    slave_status: Vec::with_capacity(store_count),
                    push_status: Vec::with_capacity(store_count),
                    full_push_status: Vec::with_capacity(store_count),
                    recycle_status: Vec::with_capacity(store_count),
                    connect_master_timeout_ms: 1000,
                    incr_paused: false,
                }),
                cv: Condvar::new(),
                dump,
                full_pusher: WorkerPool::new("repl-mfull"),
                incr_pusher: WorkerPool::new("repl-minc"),
                full_receiver: WorkerPool::new("repl-sfull"),
                incr_checker: WorkerPool::new("repl-scheck"),
                log_recycler: WorkerPool::new("log-recyc"),
                controller: Mutex::new(None),
            }),
        })
    }

    /// Number of stores this manager drives
    pub fn store_count(&self) -> u32 {
        self.inner.segment_mgr.store_count()
    }

    /// True once `startup` succeeded and `stop` has not run
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Relaxed)
    }

    /// Load or seed per-store metadata, start the worker pools, seed the
    /// runtime status tables and launch the control thread.
    pub fn startup(&self) -> Result<()> {
        if self.inner.running.load(Ordering::Relaxed) {
            return Err(Error::internal("replication manager already running"));
        }
        let store_count = self.inner.segment_mgr.store_count();

        {
            let mut st = self.inner.state.lock();
            for i in 0..store_count {
                let meta = match self.inner.catalog.store_meta(i) {
                    Ok(meta) => meta,
                    Err(e) if e.is_not_found() => {
                        let meta = StoreMeta::new(i);
                        self.inner.catalog.set_store_meta(&meta)?;
                        meta
                    }
                    Err(e) => return Err(e),
                };
                if meta.id != i {
                    return Err(Error::internal(format!("meta:{} has id:{}", i, meta.id)));
                }
                st.sync_meta.push(meta);
            }
        }

        self.inner
            .incr_pusher
            .startup(self.inner.cfg.incr_push_threads)?;
        self.inner
            .full_pusher
            .startup(self.inner.cfg.full_push_threads)?;
        self.inner
            .full_receiver
            .startup(self.inner.cfg.full_receive_threads)?;
        self.inner.incr_checker.startup(INCR_CHECK_THREADS)?;
        self.inner
            .log_recycler
            .startup(self.inner.cfg.log_recycle_threads)?;

        for i in 0..store_count {
            // startup runs single-threaded; no store lock needed yet
            let guard = self.inner.segment_mgr.get_db(i, LockMode::None, true)?;
            let store = Arc::clone(guard.store());
            drop(guard);

            let open = store.is_open();
            let sched = if open { Some(Instant::now()) } else { None };
            if !open {
                tracing::info!("store:{} is not opened", i);
            }

            let mut file_seq = u32::MAX;
            let mut first_binlog_id = BINLOG_ID_UNINITED;
            let mut timestamp = 0u64;

            if open {
                let is_slave = {
                    let st = self.inner.state.lock();
                    st.sync_meta[i as usize].is_slave()
                };
                if is_slave {
                    store.set_mode(StoreMode::ReplicateOnly)?;
                    // a slave's binlog base is whatever it already applied
                    let high = store.highest_binlog_id();
                    self.inner.state.lock().sync_meta[i as usize].binlog_id = high;
                } else {
                    store.set_mode(StoreMode::ReadWrite)?;
                }

                file_seq = recycle::max_dump_file_seq(&self.inner.cfg.dump_path, i)?;

                match store.min_binlog() {
                    Ok(min) => {
                        first_binlog_id = min.binlog_id;
                        timestamp = min.timestamp;
                    }
                    Err(e) if e.is_exhausted() => {
                        first_binlog_id = MIN_VALID_BINLOG_ID;
                        timestamp = 0;
                    }
                    Err(e) => return Err(e),
                }
            }

            let mut st = self.inner.state.lock();
            st.slave_status.push(SlaveStatus {
                is_running: false,
                session_id: SESSION_ID_NONE,
                next_sched_time: sched,
                last_sync_time: SystemTime::now(),
            });
            st.push_status.push(HashMap::new());
            st.full_push_status.push(HashMap::new());
            st.recycle_status.push(RecycleStatus {
                is_running: false,
                first_binlog_id,
                last_flush_binlog_id: BINLOG_ID_UNINITED,
                timestamp,
                next_sched_time: sched,
            });
            drop(st);

            self.inner.dump[i as usize].lock().file_seq = file_seq;
            tracing::info!(
                "store:{} first_binlog_id:{} timestamp:{}",
                i,
                first_binlog_id,
                timestamp
            );
        }

        self.inner.running.store(true, Ordering::Relaxed);
        let mgr = self.clone();
        let handle = std::thread::Builder::new()
            .name("repl-controller".to_string())
            .spawn(move || mgr.control_routine())?;
        *self.inner.controller.lock() = Some(handle);

        Ok(())
    }

    /// Administratively stop one store: nothing for it is scheduled again,
    /// though in-flight routines are left to finish.
    pub fn stop_store(&self, store_id: u32) -> Result<()> {
        let mut st = self.inner.state.lock();
        let idx = store_id as usize;
        if idx >= st.slave_status.len() {
            return Err(Error::internal(format!("invalid store id {}", store_id)));
        }
        st.slave_status[idx].next_sched_time = None;
        st.recycle_status[idx].next_sched_time = None;
        for push in st.push_status[idx].values_mut() {
            push.next_sched_time = None;
        }
        st.full_push_status[idx].clear();
        Ok(())
    }

    /// Stop the control thread, then the pools in dispatch order. Workers
    /// drain their queues before joining.
    pub fn stop(&self) {
        tracing::warn!("repl manager begins stop...");
        self.inner.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.inner.controller.lock().take() {
            let _ = handle.join();
        }

        self.inner.full_pusher.stop();
        self.inner.incr_pusher.stop();
        self.inner.full_receiver.stop();
        self.inner.incr_checker.stop();
        self.inner.log_recycler.stop();
        tracing::warn!("repl manager stopped");
    }

    /// Record the binlog id at which a store flushed away its data; the
    /// recycler treats earlier records as already lost.
    pub fn on_flush(&self, store_id: u32, binlog_id: u64) {
        let mut st = self.inner.state.lock();
        if let Some(status) = st.recycle_status.get_mut(store_id as usize) {
            status.last_flush_binlog_id = binlog_id;
            tracing::info!("on_flush store:{} binlog_id:{}", store_id, binlog_id);
        }
    }

    /// Suspend or resume all incremental pushes
    pub fn pause_incr_sync(&self, paused: bool) {
        self.inner.state.lock().incr_paused = paused;
    }

    /// Snapshot of one store's persisted replication metadata
    pub fn sync_meta(&self, store_id: u32) -> Result<StoreMeta> {
        let st = self.inner.state.lock();
        st.sync_meta
            .get(store_id as usize)
            .cloned()
            .ok_or_else(|| Error::internal(format!("invalid store id {}", store_id)))
    }

    /// Lowest binlog id still retained for one store
    pub fn first_binlog_id(&self, store_id: u32) -> Result<u64> {
        let st = self.inner.state.lock();
        st.recycle_status
            .get(store_id as usize)
            .map(|r| r.first_binlog_id)
            .ok_or_else(|| Error::internal(format!("invalid store id {}", store_id)))
    }

    /// `(client_id, binlog_pos)` of every incremental subscriber of a store
    pub fn push_positions(&self, store_id: u32) -> Result<Vec<(u64, u64)>> {
        let st = self.inner.state.lock();
        let pushes = st
            .push_status
            .get(store_id as usize)
            .ok_or_else(|| Error::internal(format!("invalid store id {}", store_id)))?;
        Ok(pushes
            .values()
            .map(|p| (p.client_id, p.binlog_pos))
            .collect())
    }

    /// Operator-driven transition of one store to or from being a slave.
    ///
    /// An empty `host` detaches the store (back to writable master); a
    /// non-empty `host` attaches it as a slave of `host:port`/`source_store_id`,
    /// which requires the store to be empty.
    pub fn change_repl_source(
        &self,
        store_id: u32,
        host: &str,
        port: u16,
        source_store_id: u32,
    ) -> Result<()> {
        let guard = self
            .inner
            .segment_mgr
            .get_db(store_id, LockMode::Exclusive, true)?;
        if !guard.store().is_open() {
            return Ok(());
        }
        if !host.is_empty() && !guard.store().is_empty()? {
            return Err(Error::manual("store not empty"));
        }
        let store = Arc::clone(guard.store());
        self.change_repl_source_in_lock(store_id, host, port, source_store_id, &store)
    }

    fn change_repl_source_in_lock(
        &self,
        store_id: u32,
        host: &str,
        port: u16,
        source_store_id: u32,
        store: &Arc<dyn crate::storage::KVStore>,
    ) -> Result<()> {
        let idx = store_id as usize;
        let mut st = self.inner.state.lock();

        let old_timeout = st.connect_master_timeout_ms;
        // shrink the timeout on detach so an in-flight connect fails fast
        st.connect_master_timeout_ms = if host.is_empty() { 1 } else { 1000 };

        tracing::info!("wait for store:{} to yield work", store_id);
        let deadline = Instant::now() + Duration::from_millis(old_timeout + 2000);
        while st
            .slave_status
            .get(idx)
            .map(|s| s.is_running)
            .unwrap_or(false)
        {
            let timed_out = self.inner.cv.wait_until(&mut st, deadline).timed_out();
            if timed_out && st.slave_status[idx].is_running {
                return Err(Error::timeout("wait for store to yield"));
            }
        }
        tracing::info!("wait for store:{} to yield work succ", store_id);

        if idx >= st.sync_meta.len() {
            return Err(Error::internal(format!("invalid store id {}", store_id)));
        }

        let mut new_meta = st.sync_meta[idx].clone();
        if !host.is_empty() {
            if !st.sync_meta[idx].sync_from_host.is_empty() {
                return Err(Error::busy(
                    "explicit set sync source empty before change it",
                ));
            }
            st.connect_master_timeout_ms = 1000;

            store.set_mode(StoreMode::ReplicateOnly)?;
            new_meta.sync_from_host = host.to_string();
            new_meta.sync_from_port = port;
            new_meta.sync_from_id = source_store_id;
            new_meta.repl_state = ReplState::Connect;
            new_meta.binlog_id = BINLOG_ID_UNINITED;
            tracing::info!(
                "change store:{} syncSrc from no one to {}:{}:{}",
                store_id,
                host,
                port,
                source_store_id
            );
            self.change_repl_state_in_lock(&mut st, new_meta, true);
            Ok(())
        } else {
            if new_meta.sync_from_host.is_empty() {
                return Ok(());
            }
            tracing::info!(
                "change store:{} syncSrc:{} to no one",
                store_id,
                new_meta.sync_from_host
            );
            st.connect_master_timeout_ms = 1;

            // best effort; may race a routine that already opened a new
            // session, in which case that session dies on its own
            let session_id = st.slave_status[idx].session_id;
            if let Err(e) = self.inner.network.cancel_session(session_id) {
                tracing::warn!("cancel store:{} session failed:{}", store_id, e);
            }
            st.slave_status[idx].session_id = SESSION_ID_NONE;

            store.set_mode(StoreMode::ReadWrite)?;
            debug_assert!(port == 0 && source_store_id == 0);
            new_meta.sync_from_host = String::new();
            new_meta.sync_from_port = 0;
            new_meta.sync_from_id = 0;
            new_meta.repl_state = ReplState::None;
            new_meta.binlog_id = BINLOG_ID_UNINITED;
            self.change_repl_state_in_lock(&mut st, new_meta, true);
            Ok(())
        }
    }

    /// Persist `meta` (when asked) and swap the in-memory copy
    pub(crate) fn change_repl_state(&self, meta: StoreMeta, persist: bool) {
        let mut st = self.inner.state.lock();
        self.change_repl_state_in_lock(&mut st, meta, persist);
    }

    pub(crate) fn change_repl_state_in_lock(
        &self,
        st: &mut ManagerState,
        meta: StoreMeta,
        persist: bool,
    ) {
        if persist {
            if let Err(e) = self.inner.catalog.set_store_meta(&meta) {
                tracing::error!("set_store_meta failed:{}", e);
                panic!("catalog persistence failed for store {}: {}", meta.id, e);
            }
        }
        let meta_id = meta.id as usize;
        st.sync_meta[meta_id] = meta;
    }

    /// Re-seed recycle tracking after a store flush
    pub fn reset_recycle_state(&self, store_id: u32) {
        let mut st = self.inner.state.lock();
        if let Some(status) = st.recycle_status.get_mut(store_id as usize) {
            status.first_binlog_id = MIN_VALID_BINLOG_ID;
            status.timestamp = 0;
            status.last_flush_binlog_id = BINLOG_ID_UNINITED;
        }
    }

    fn control_routine(&self) {
        while self.inner.running.load(Ordering::Relaxed) {
            let now = Instant::now();
            let mut did_something = false;
            {
                let mut st = self.inner.state.lock();
                did_something |= self.sched_slave_in_lock(&mut st, now);
                did_something |= self.sched_master_in_lock(&mut st, now);
                did_something |= self.sched_recycle_in_lock(&mut st, now);
            }
            if did_something {
                std::thread::yield_now();
            } else {
                std::thread::sleep(CONTROL_IDLE);
            }
        }
        tracing::info!("repl controller exits");
    }

    fn sched_slave_in_lock(&self, st: &mut ManagerState, now: Instant) -> bool {
        let mut did_something = false;
        for i in 0..st.slave_status.len() {
            let repl_state = st.sync_meta[i].repl_state;
            let status = &mut st.slave_status[i];
            if status.is_running
                || !is_due(status.next_sched_time, now)
                || repl_state == ReplState::None
            {
                continue;
            }
            let store_id = i as u32;
            match repl_state {
                ReplState::Connect => {
                    status.is_running = true;
                    let mgr = self.clone();
                    self.inner
                        .full_receiver
                        .schedule(move || mgr.slave_sync_routine(store_id));
                }
                ReplState::Connected => {
                    status.is_running = true;
                    let mgr = self.clone();
                    self.inner
                        .incr_checker
                        .schedule(move || mgr.slave_sync_routine(store_id));
                }
                ReplState::Transfer => {
                    tracing::error!("sync store:{} transfer state should not be visible", i);
                    panic!("store {} dispatched while in transfer state", i);
                }
                ReplState::None => unreachable!(),
            }
            did_something = true;
        }
        did_something
    }

    fn sched_master_in_lock(&self, st: &mut ManagerState, now: Instant) -> bool {
        self.gc_full_push_in_lock(st, now);

        let mut did_something = false;
        for i in 0..st.push_status.len() {
            let due: Vec<u64> = st.push_status[i]
                .values()
                .filter(|p| !p.is_running && is_due(p.next_sched_time, now))
                .map(|p| p.client_id)
                .collect();
            for client_id in due {
                if let Some(push) = st.push_status[i].get_mut(&client_id) {
                    push.is_running = true;
                    let store_id = i as u32;
                    let mgr = self.clone();
                    self.inner
                        .incr_pusher
                        .schedule(move || mgr.master_push_routine(store_id, client_id));
                    did_something = true;
                }
            }
        }
        did_something
    }

    fn sched_recycle_in_lock(&self, st: &mut ManagerState, now: Instant) -> bool {
        let mut did_something = false;
        for i in 0..st.recycle_status.len() {
            let status = &mut st.recycle_status[i];
            if status.is_running || !is_due(status.next_sched_time, now) {
                continue;
            }
            status.is_running = true;
            let store_id = i as u32;
            let mgr = self.clone();
            self.inner
                .log_recycler
                .schedule(move || mgr.recycle_binlog(store_id));
            did_something = true;
        }
        did_something
    }

    /// Drop SUCCESS full-push entries past their retention window. RUNNING
    /// entries belong to an in-flight routine and ERR entries are cleaned
    /// by operator-driven paths.
    pub(crate) fn gc_full_push_in_lock(&self, st: &mut ManagerState, now: Instant) {
        let ttl = Duration::from_secs(self.inner.cfg.full_push_gc_secs);
        for (store_id, pushes) in st.full_push_status.iter_mut().enumerate() {
            pushes.retain(|peer_key, status| {
                let expired = status.state == FullPushState::Success
                    && matches!(status.end_time, Some(end) if now > end + ttl);
                if expired {
                    tracing::warn!(
                        "full push status expired, erase store:{} node:{} binlog_pos:{}",
                        store_id,
                        peer_key,
                        status.binlog_pos
                    );
                }
                !expired
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestHarness;

    #[test]
    fn test_startup_seeds_missing_meta() {
        let h = TestHarness::new(2, ReplConfig::default());
        h.manager.startup().unwrap();

        for i in 0..2 {
            let meta = h.manager.sync_meta(i).unwrap();
            assert_eq!(meta.id, i);
            assert_eq!(meta.repl_state, ReplState::None);
            // seeded meta is persisted
            assert_eq!(h.catalog.store_meta(i).unwrap(), meta);
        }
        h.manager.stop();
    }

    #[test]
    fn test_startup_rejects_mismatched_meta() {
        let h = TestHarness::new(1, ReplConfig::default());
        h.catalog.put_raw(0, StoreMeta::new(9));
        assert!(h.manager.startup().is_err());
    }

    #[test]
    fn test_stop_store_parks_schedules() {
        let h = TestHarness::new(1, ReplConfig::default());
        h.manager.startup().unwrap();
        h.manager.stop_store(0).unwrap();

        let st = h.manager.inner.state.lock();
        assert_eq!(st.slave_status[0].next_sched_time, None);
        assert_eq!(st.recycle_status[0].next_sched_time, None);
        assert!(st.full_push_status[0].is_empty());
        drop(st);
        h.manager.stop();
    }

    #[test]
    fn test_stop_store_invalid_id() {
        let h = TestHarness::new(1, ReplConfig::default());
        h.manager.startup().unwrap();
        assert!(h.manager.stop_store(5).is_err());
        h.manager.stop();
    }

    #[test]
    fn test_full_push_gc_window() {
        let mut cfg = ReplConfig::default();
        cfg.full_push_gc_secs = 0;
        let h = TestHarness::new(1, cfg);
        h.manager.startup().unwrap();

        let now = Instant::now();
        {
            let mut st = h.manager.inner.state.lock();
            st.full_push_status[0].insert(
                "10.0.0.9:7000".to_string(),
                MasterFullPushStatus {
                    peer_key: "10.0.0.9:7000".to_string(),
                    state: FullPushState::Success,
                    binlog_pos: 5,
                    start_time: now - Duration::from_secs(2),
                    end_time: Some(now - Duration::from_secs(1)),
                },
            );
            st.full_push_status[0].insert(
                "10.0.0.9:7001".to_string(),
                MasterFullPushStatus {
                    peer_key: "10.0.0.9:7001".to_string(),
                    state: FullPushState::Running,
                    binlog_pos: 0,
                    start_time: now,
                    end_time: None,
                },
            );
            h.manager.gc_full_push_in_lock(&mut st, now);
            // expired SUCCESS erased, RUNNING untouched
            assert!(!st.full_push_status[0].contains_key("10.0.0.9:7000"));
            assert!(st.full_push_status[0].contains_key("10.0.0.9:7001"));
        }
        h.manager.stop();
    }

    #[test]
    fn test_double_startup_rejected() {
        let h = TestHarness::new(1, ReplConfig::default());
        h.manager.startup().unwrap();
        assert!(h.manager.startup().is_err());
        h.manager.stop();
    }

    #[test]
    fn test_reset_recycle_state() {
        let h = TestHarness::new(1, ReplConfig::default());
        h.manager.startup().unwrap();
        h.manager.on_flush(0, 33);
        h.manager.reset_recycle_state(0);

        let st = h.manager.inner.state.lock();
        assert_eq!(st.recycle_status[0].first_binlog_id, MIN_VALID_BINLOG_ID);
        assert_eq!(st.recycle_status[0].timestamp, 0);
        assert_eq!(
            st.recycle_status[0].last_flush_binlog_id,
            BINLOG_ID_UNINITED
        );
        drop(st);
        h.manager.stop();
    }

    #[test]
    fn test_on_flush_records_binlog() {
        let h = TestHarness::new(1, ReplConfig::default());
        h.manager.startup().unwrap();
        h.manager.on_flush(0, 77);
        let st = h.manager.inner.state.lock();
        assert_eq!(st.recycle_status[0].last_flush_binlog_id, 77);
        drop(st);
        h.manager.stop();
    }
}
