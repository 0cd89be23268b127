//! Slave-side sync lifecycle: connect → full-sync → incremental check.
//!
//! The control loop dispatches `slave_sync_routine` with `is_running`
//! already set; the routine does its work against a metadata snapshot and
//! on exit clears the flag, advances the schedule, refreshes
//! `last_sync_time` and notifies the condvar `change_repl_source` waits on.

use crate::catalog::{ReplState, StoreMeta};
use crate::net::BlockingClient;
use crate::replication::manager::ReplManager;
use crate::replication::{advance_sched, SyncStatus, REPL_CLIENT_BUF_BYTES};
use crate::{Error, Result};
use std::time::{Duration, Instant, SystemTime};

/// Cadence of slave retries and incremental checks
const SLAVE_RETRY_INTERVAL: Duration = Duration::from_secs(1);

impl ReplManager {
    /// One slave-side sync step for `store_id`. Runs on the full-receive
    /// pool for CONNECT stores and the incr-check pool for CONNECTED ones.
    pub(crate) fn slave_sync_routine(&self, store_id: u32) {
        let next_sched = Instant::now() + SLAVE_RETRY_INTERVAL;

        let (meta, timeout_ms) = {
            let st = self.inner.state.lock();
            (
                st.sync_meta[store_id as usize].clone(),
                st.connect_master_timeout_ms,
            )
        };

        let outcome = match meta.repl_state {
            ReplState::Connect => self.slave_start_full_sync(store_id, &meta, timeout_ms),
            ReplState::Connected => self.slave_check_sync_status(store_id, &meta),
            other => {
                tracing::error!(
                    "slave routine store:{} dispatched in state {:?}",
                    store_id,
                    other
                );
                Ok(None)
            }
        };

        let mut st = self.inner.state.lock();
        let status = &mut st.slave_status[store_id as usize];
        status.is_running = false;
        advance_sched(&mut status.next_sched_time, next_sched);
        match outcome {
            Ok(session_id) => {
                status.last_sync_time = SystemTime::now();
                if let Some(session_id) = session_id {
                    status.session_id = session_id;
                }
            }
            Err(e) => {
                tracing::warn!("slave sync store:{} failed:{}", store_id, e);
            }
        }
        drop(st);
        self.inner.cv.notify_all();
    }

    /// CONNECT: dial the source, run the full sync, land in CONNECTED
    fn slave_start_full_sync(
        &self,
        store_id: u32,
        meta: &StoreMeta,
        timeout_ms: u64,
    ) -> Result<Option<u64>> {
        let mut client = self.create_client(meta, timeout_ms)?;

        // transfer state is transient; a crash mid-transfer restarts at CONNECT
        let mut transfer = meta.clone();
        transfer.repl_state = ReplState::Transfer;
        self.change_repl_state(transfer, false);

        match self
            .inner
            .protocol
            .full_sync(store_id, meta, client.as_mut())
        {
            Ok(handoff) => {
                let mut connected = meta.clone();
                connected.repl_state = ReplState::Connected;
                connected.binlog_id = handoff;
                self.change_repl_state(connected, true);
                tracing::info!(
                    "store:{} full sync from {}:{} done, binlog handoff {}",
                    store_id,
                    meta.sync_from_host,
                    meta.sync_from_port,
                    handoff
                );
                Ok(None)
            }
            Err(e) => {
                let mut back = meta.clone();
                back.repl_state = ReplState::Connect;
                self.change_repl_state(back, false);
                Err(e)
            }
        }
    }

    /// CONNECTED: verify the incremental stream and persist progress
    fn slave_check_sync_status(&self, store_id: u32, meta: &StoreMeta) -> Result<Option<u64>> {
        match self.inner.protocol.check_sync_status(store_id, meta) {
            Ok(SyncStatus {
                binlog_id,
                session_id,
            }) => {
                if binlog_id != meta.binlog_id {
                    let mut advanced = meta.clone();
                    advanced.binlog_id = binlog_id;
                    self.change_repl_state(advanced, true);
                }
                Ok(session_id)
            }
            Err(e @ (Error::NotFound(_) | Error::Manual(_))) => {
                // the master no longer serves our position; start over
                tracing::warn!(
                    "store:{} incremental stream rejected ({}), falling back to connect",
                    store_id,
                    e
                );
                let mut back = meta.clone();
                back.repl_state = ReplState::Connect;
                self.change_repl_state(back, true);
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Dial `meta`'s source and run the auth exchange when configured
    pub(crate) fn create_client(
        &self,
        meta: &StoreMeta,
        timeout_ms: u64,
    ) -> Result<Box<dyn BlockingClient>> {
        let mut client = self
            .inner
            .network
            .create_blocking_client(REPL_CLIENT_BUF_BYTES);
        if let Err(e) = client.connect(
            &meta.sync_from_host,
            meta.sync_from_port,
            Duration::from_millis(timeout_ms),
        ) {
            tracing::warn!(
                "connect {}:{} failed:{} storeid:{}",
                meta.sync_from_host,
                meta.sync_from_port,
                e,
                meta.id
            );
            return Err(e);
        }

        if let Some(auth) = &self.inner.cfg.master_auth {
            client.write_line(&format!("AUTH {}", auth))?;
            let reply = client.read_line(Duration::from_secs(10))?;
            if reply.is_empty() || reply.starts_with('-') {
                tracing::info!("full sync auth failed:{}", reply);
                return Err(Error::network("auth rejected by master"));
            }
        }
        Ok(client)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReplConfig;
    use crate::testing::TestHarness;

    #[test]
    fn test_create_client_auth_ok() {
        let cfg = ReplConfig::default().with_master_auth("hunter2");
        let h = TestHarness::new(1, cfg);
        h.network.script_response("+OK");

        let mut meta = StoreMeta::new(0);
        meta.sync_from_host = "somewhere".to_string();
        meta.sync_from_port = 7000;

        let client = h.manager.create_client(&meta, 100).unwrap();
        drop(client);
        let sent = h.network.sent_lines();
        assert_eq!(sent, vec!["AUTH hunter2".to_string()]);
    }

    #[test]
    fn test_create_client_auth_rejected() {
        let cfg = ReplConfig::default().with_master_auth("hunter2");
        let h = TestHarness::new(1, cfg);
        h.network.script_response("-ERR invalid password");

        let mut meta = StoreMeta::new(0);
        meta.sync_from_host = "somewhere".to_string();
        meta.sync_from_port = 7000;

        assert!(h.manager.create_client(&meta, 100).is_err());
    }

    #[test]
    fn test_create_client_connect_refused() {
        let h = TestHarness::new(1, ReplConfig::default());
        h.network.refuse_connects(true);

        let mut meta = StoreMeta::new(0);
        meta.sync_from_host = "somewhere".to_string();
        meta.sync_from_port = 7000;

        assert!(h.manager.create_client(&meta, 100).is_err());
    }
}
