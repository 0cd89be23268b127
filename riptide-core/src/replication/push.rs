//! Master-side push paths: incremental binlog streaming to registered
//! subscribers and full-sync snapshot pushes.
//!
//! Incremental subscribers are registered by the command layer when a slave
//! asks for the tail; each registration owns a transport handle. The push
//! routine streams encoded chunks under the global rate limiter and
//! advances `binlog_pos` monotonically under the manager mutex. A dead
//! client removes its registration; the slave re-registers on reconnect.

use crate::net::BlockingClient;
use crate::replication::manager::ReplManager;
use crate::replication::status::{FullPushState, FullPushSummary, MasterFullPushStatus, MasterPushStatus};
use crate::replication::{advance_sched, MAX_PUSH_BYTES_PER_ROUND, PUSH_CHUNK_BYTES};
use crate::storage::LockMode;
use crate::{Error, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Idle reschedule interval once a subscriber is caught up
const PUSH_IDLE_INTERVAL: Duration = Duration::from_millis(100);

impl ReplManager {
    /// Register an incremental subscriber for `store_id`.
    ///
    /// `binlog_pos` is the next binlog id the slave needs; registration is
    /// refused when that id has already been recycled, forcing the slave
    /// through a full sync first.
    pub fn register_incr_sync(
        &self,
        store_id: u32,
        dst_store_id: u32,
        binlog_pos: u64,
        client: Box<dyn BlockingClient>,
        slave_listen_ip: String,
        slave_listen_port: u16,
    ) -> Result<u64> {
        let guard = self
            .inner
            .segment_mgr
            .get_db(store_id, LockMode::None, true)?;
        if !guard.store().is_open() {
            return Err(Error::storage(format!("store {} is not open", store_id)));
        }
        drop(guard);

        let mut st = self.inner.state.lock();
        let idx = store_id as usize;
        if idx >= st.push_status.len() {
            return Err(Error::internal(format!("invalid store id {}", store_id)));
        }

        let first = st.recycle_status[idx].first_binlog_id;
        if first != crate::replication::BINLOG_ID_UNINITED && binlog_pos < first {
            return Err(Error::manual(format!(
                "binlog {} already recycled (first is {}), full sync required",
                binlog_pos, first
            )));
        }

        let client_id = self
            .inner
            .client_id_gen
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst)
            + 1;
        st.push_status[idx].insert(
            client_id,
            MasterPushStatus {
                client_id,
                dst_store_id,
                is_running: false,
                binlog_pos,
                next_sched_time: Some(Instant::now()),
                client: Arc::new(Mutex::new(client)),
                slave_listen_ip,
                slave_listen_port,
            },
        );
        tracing::info!(
            "register incr sync store:{} client:{} pos:{}",
            store_id,
            client_id,
            binlog_pos
        );
        Ok(client_id)
    }

    /// Drop an incremental subscriber; true when one was removed
    pub fn deregister_incr_sync(&self, store_id: u32, client_id: u64) -> bool {
        let mut st = self.inner.state.lock();
        let removed = st
            .push_status
            .get_mut(store_id as usize)
            .map(|pushes| pushes.remove(&client_id).is_some())
            .unwrap_or(false);
        if removed {
            tracing::info!("deregister incr sync store:{} client:{}", store_id, client_id);
        }
        removed
    }

    /// One incremental-push step for `(store_id, client_id)`, run on the
    /// incr-push pool with `is_running` already set.
    pub(crate) fn master_push_routine(&self, store_id: u32, client_id: u64) {
        let mut next_sched = Instant::now() + PUSH_IDLE_INTERVAL;
        let result = self.master_push_inner(store_id, client_id, &mut next_sched);

        let mut st = self.inner.state.lock();
        let idx = store_id as usize;
        if let Some(push) = st.push_status[idx].get_mut(&client_id) {
            push.is_running = false;
            advance_sched(&mut push.next_sched_time, next_sched);
        }
        if let Err(e) = result {
            tracing::warn!(
                "push store:{} client:{} failed:{}, dropping subscriber",
                store_id,
                client_id,
                e
            );
            st.push_status[idx].remove(&client_id);
        }
    }

    fn master_push_inner(
        &self,
        store_id: u32,
        client_id: u64,
        next_sched: &mut Instant,
    ) -> Result<()> {
        let (mut pos, client) = {
            let st = self.inner.state.lock();
            if st.incr_paused {
                *next_sched = Instant::now() + Duration::from_secs(1);
                return Ok(());
            }
            match st.push_status[store_id as usize].get(&client_id) {
                Some(push) => (push.binlog_pos, Arc::clone(&push.client)),
                None => return Ok(()),
            }
        };

        let guard = self
            .inner
            .segment_mgr
            .get_db(store_id, LockMode::IntentExclusive, false)?;
        let store = Arc::clone(guard.store());

        let mut sent: u64 = 0;
        loop {
            let chunk = match store.read_binlogs(pos, PUSH_CHUNK_BYTES)? {
                Some(chunk) => chunk,
                None => break,
            };
            if chunk.bytes.is_empty() {
                break;
            }

            self.inner.rate_limiter.acquire(chunk.bytes.len() as u64);
            client.lock().write_bytes(&chunk.bytes)?;

            {
                let mut st = self.inner.state.lock();
                match st.push_status[store_id as usize].get_mut(&client_id) {
                    Some(push) => {
                        push.binlog_pos = push.binlog_pos.max(chunk.next_id);
                    }
                    // deregistered mid-flight; stop quietly
                    None => return Ok(()),
                }
            }

            sent += chunk.bytes.len() as u64;
            pos = chunk.next_id;
            if sent >= MAX_PUSH_BYTES_PER_ROUND {
                // plenty more to send; come back immediately
                *next_sched = Instant::now();
                break;
            }
        }
        Ok(())
    }

    /// Admit and schedule a full-sync push toward `peer_key`.
    ///
    /// A RUNNING entry for the same peer rejects the request; finished
    /// leftovers are replaced. The entry is seeded with the store's highest
    /// binlog id at admission, so an in-flight transfer holds the recycle
    /// watermark at its snapshot point instead of freezing it.
    pub fn schedule_full_push(
        &self,
        store_id: u32,
        peer_key: String,
        dst_store_id: u32,
        client: Box<dyn BlockingClient>,
    ) -> Result<()> {
        let guard = self
            .inner
            .segment_mgr
            .get_db(store_id, LockMode::IntentExclusive, false)?;
        let snapshot_pos = guard.store().highest_binlog_id();
        {
            let mut st = self.inner.state.lock();
            let idx = store_id as usize;
            if idx >= st.full_push_status.len() {
                return Err(Error::internal(format!("invalid store id {}", store_id)));
            }
            if let Some(existing) = st.full_push_status[idx].get(&peer_key) {
                if existing.state == FullPushState::Running {
                    return Err(Error::busy(format!(
                        "full sync to {} already running",
                        peer_key
                    )));
                }
                st.full_push_status[idx].remove(&peer_key);
            }
            st.full_push_status[idx].insert(
                peer_key.clone(),
                MasterFullPushStatus {
                    peer_key: peer_key.clone(),
                    state: FullPushState::Running,
                    binlog_pos: snapshot_pos,
                    start_time: Instant::now(),
                    end_time: None,
                },
            );
        }
        drop(guard);

        let mgr = self.clone();
        self.inner.full_pusher.schedule(move || {
            mgr.full_push_routine(store_id, peer_key, dst_store_id, client)
        });
        Ok(())
    }

    fn full_push_routine(
        &self,
        store_id: u32,
        peer_key: String,
        dst_store_id: u32,
        mut client: Box<dyn BlockingClient>,
    ) {
        let result = self
            .inner
            .segment_mgr
            .get_db(store_id, LockMode::IntentExclusive, false)
            .and_then(|guard| {
                self.inner.protocol.supply_full_sync(
                    store_id,
                    guard.store(),
                    client.as_mut(),
                    dst_store_id,
                )
            });

        let mut st = self.inner.state.lock();
        let Some(status) = st.full_push_status[store_id as usize].get_mut(&peer_key) else {
            // store stopped while we were pushing
            return;
        };
        status.end_time = Some(Instant::now());
        match result {
            Ok(handoff) => {
                status.state = FullPushState::Success;
                // never move the watermark backwards from the admission seed
                status.binlog_pos = status.binlog_pos.max(handoff);
                tracing::info!(
                    "full push store:{} to {} done, handoff {}",
                    store_id,
                    peer_key,
                    handoff
                );
            }
            Err(e) => {
                status.state = FullPushState::Err;
                tracing::warn!("full push store:{} to {} failed:{}", store_id, peer_key, e);
            }
        }
    }

    /// Read-only view of a store's full-push map
    pub fn full_push_summaries(&self, store_id: u32) -> Result<Vec<FullPushSummary>> {
        let st = self.inner.state.lock();
        let pushes = st
            .full_push_status
            .get(store_id as usize)
            .ok_or_else(|| Error::internal(format!("invalid store id {}", store_id)))?;
        Ok(pushes
            .values()
            .map(|p| FullPushSummary {
                peer_key: p.peer_key.clone(),
                state: p.state,
                binlog_pos: p.binlog_pos,
            })
            .collect())
    }
}
