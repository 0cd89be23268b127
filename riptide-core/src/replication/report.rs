//! Operator-visible replication status: redis-style text info and a JSON
//! snapshot per store.

use crate::replication::manager::ReplManager;
use crate::replication::{ms_since_epoch, ms_since_epoch_of};
use crate::storage::LockMode;
use serde_json::{json, Map, Value};
use std::fmt::Write as _;

impl ReplManager {
    /// Aggregate info: the simple section followed by the detail section
    pub fn repl_info(&self, show_all: bool) -> String {
        let mut out = String::new();
        self.repl_info_simple(&mut out);
        self.repl_info_detail(&mut out, show_all);
        out
    }

    fn repl_info_simple(&self, out: &mut String) {
        let mut role = "master";
        let master_repl_offset = 0i32;
        let mut master_host = String::new();
        let mut master_port = 0u16;
        let master_link_status = "up";
        let mut master_last_io_seconds_ago = 0i64;
        let master_sync_in_progress = 0i32;
        let mut slave_repl_offset = -1i64;
        let slave_priority = -1i32;
        let slave_read_only = 1i32;

        let st = self.inner.state.lock();
        let now = ms_since_epoch();
        for i in 0..st.sync_meta.len() {
            let last_sync_time = ms_since_epoch_of(st.slave_status[i].last_sync_time);
            if st.sync_meta[i].is_slave() {
                role = "slave";
                master_host = st.sync_meta[i].sync_from_host.clone();
                master_port = st.sync_meta[i].sync_from_port;
                let sec_ago = (now.saturating_sub(last_sync_time) / 1000) as i64;
                if master_last_io_seconds_ago < sec_ago {
                    master_last_io_seconds_ago = sec_ago;
                }
            }
        }

        let mut connected_slaves = 0usize;
        for i in 0..st.sync_meta.len() {
            let guard = match self
                .inner
                .segment_mgr
                .get_db(i as u32, LockMode::None, true)
            {
                Ok(guard) => guard,
                Err(_) => return,
            };
            // compatibility: reflects only the last iterated store
            connected_slaves = st.push_status[i].len();

            let highest = guard.store().highest_binlog_id();
            for push in st.push_status[i].values() {
                let lag = highest.saturating_sub(push.binlog_pos) as i64;
                if lag > slave_repl_offset {
                    slave_repl_offset = lag;
                }
            }
        }

        let _ = write!(out, "role:{}\r\n", role);
        let _ = write!(out, "master_repl_offset:{}\r\n", master_repl_offset);
        let _ = write!(out, "connected_slaves:{}\r\n", connected_slaves);
        if role == "slave" {
            let _ = write!(out, "master_host:{}\r\n", master_host);
            let _ = write!(out, "master_port:{}\r\n", master_port);
            let _ = write!(out, "master_link_status:{}\r\n", master_link_status);
            let _ = write!(
                out,
                "master_last_io_seconds_ago:{}\r\n",
                master_last_io_seconds_ago
            );
            let _ = write!(
                out,
                "master_sync_in_progress:{}\r\n",
                master_sync_in_progress
            );
            let _ = write!(out, "slave_repl_offset:{}\r\n", slave_repl_offset);
            let _ = write!(out, "slave_priority:{}\r\n", slave_priority);
            let _ = write!(out, "slave_read_only:{}\r\n", slave_read_only);
        }
    }

    fn repl_info_detail(&self, out: &mut String, _show_all: bool) {
        // only the laggiest entries are reported
        let show_all = false;

        let st = self.inner.state.lock();

        let mut min_last_sync_time = u64::MAX;
        let mut master_info = String::new();
        for i in 0..st.sync_meta.len() {
            let last_sync_time = ms_since_epoch_of(st.slave_status[i].last_sync_time);
            let now = ms_since_epoch();
            if last_sync_time < min_last_sync_time || show_all {
                min_last_sync_time = last_sync_time;
                if !show_all {
                    master_info.clear();
                }
                let _ = write!(
                    master_info,
                    "master:ip={},port={},sync_from_id={},binlog_id={},repl_state={},last_sync_time={},sync_time_lag={}\r\n",
                    st.sync_meta[i].sync_from_host,
                    st.sync_meta[i].sync_from_port,
                    st.sync_meta[i].sync_from_id,
                    st.sync_meta[i].binlog_id,
                    st.sync_meta[i].repl_state.as_u8(),
                    last_sync_time,
                    now.saturating_sub(last_sync_time)
                );
            }
        }
        out.push_str(&master_info);

        let mut max_binlog_lag = i64::MIN;
        let mut slave_info = String::new();
        for i in 0..st.sync_meta.len() {
            let guard = match self
                .inner
                .segment_mgr
                .get_db(i as u32, LockMode::None, true)
            {
                Ok(guard) => guard,
                Err(_) => return,
            };
            let highest = guard.store().highest_binlog_id();

            let mut client_num = 0;
            for push in st.push_status[i].values() {
                let lag = highest.saturating_sub(push.binlog_pos) as i64;
                if lag > max_binlog_lag || show_all {
                    max_binlog_lag = lag;
                    if !show_all {
                        slave_info.clear();
                    }
                    let _ = write!(
                        slave_info,
                        "slave{}:clientid={},is_running={},dest_store_id={},binlog_pos={},binlog_lag={},remote_host={},remote_port={}\r\n",
                        client_num,
                        push.client_id,
                        u8::from(push.is_running),
                        push.dst_store_id,
                        push.binlog_pos,
                        lag,
                        push.slave_listen_ip,
                        push.slave_listen_port
                    );
                }
                client_num += 1;
            }
        }
        out.push_str(&slave_info);
    }

    /// JSON snapshot keyed by store-id string
    pub fn json_stat(&self) -> Value {
        let st = self.inner.state.lock();
        let mut stores = Map::new();
        for i in 0..st.sync_meta.len() {
            let mut sync_dest = Map::new();
            for push in st.push_status[i].values() {
                let remote_host = match push.client.try_lock() {
                    Some(client) => client.remote_repr(),
                    None => "???".to_string(),
                };
                sync_dest.insert(
                    format!("client_{}", push.client_id),
                    json!({
                        "is_running": u64::from(push.is_running),
                        "dest_store_id": push.dst_store_id,
                        "binlog_pos": push.binlog_pos,
                        "remote_host": remote_host,
                    }),
                );
            }

            let last_sync = chrono::DateTime::<chrono::Local>::from(st.slave_status[i].last_sync_time)
                .format("%Y-%m-%d %H:%M:%S")
                .to_string();

            stores.insert(
                i.to_string(),
                json!({
                    "first_binlog": st.recycle_status[i].first_binlog_id,
                    "timestamp": st.recycle_status[i].timestamp,
                    "incr_paused": u64::from(st.incr_paused),
                    "sync_dest": Value::Object(sync_dest),
                    "sync_source": format!(
                        "{}:{}:{}",
                        st.sync_meta[i].sync_from_host,
                        st.sync_meta[i].sync_from_port,
                        st.sync_meta[i].sync_from_id
                    ),
                    "binlog_id": st.sync_meta[i].binlog_id,
                    "repl_state": st.sync_meta[i].repl_state.as_u8() as u64,
                    "last_sync_time": last_sync,
                }),
            );
        }
        Value::Object(stores)
    }
}

#[cfg(test)]
mod tests {
    use crate::config::ReplConfig;
    use crate::testing::TestHarness;

    #[test]
    fn test_simple_info_master_shape() {
        let h = TestHarness::new(2, ReplConfig::default());
        h.manager.startup().unwrap();

        let info = h.manager.repl_info(false);
        assert!(info.contains("role:master\r\n"));
        assert!(info.contains("connected_slaves:0\r\n"));
        assert!(!info.contains("master_host:"));
        h.manager.stop();
    }

    #[test]
    fn test_simple_info_slave_shape() {
        let h = TestHarness::new(1, ReplConfig::default());
        h.manager.startup().unwrap();
        h.manager.change_repl_source(0, "10.9.9.9", 6379, 2).unwrap();

        let info = h.manager.repl_info(false);
        assert!(info.contains("role:slave\r\n"));
        assert!(info.contains("master_host:10.9.9.9\r\n"));
        assert!(info.contains("master_port:6379\r\n"));
        assert!(info.contains("master:ip=10.9.9.9,port=6379,sync_from_id=2"));
        h.manager.stop();
    }

    #[test]
    fn test_json_stat_shape() {
        let h = TestHarness::new(1, ReplConfig::default());
        h.manager.startup().unwrap();
        let id = h
            .manager
            .register_incr_sync(0, 3, 1, h.network.new_client(), "10.0.0.2".into(), 7001)
            .unwrap();

        let stat = h.manager.json_stat();
        let store = &stat["0"];
        assert!(store.get("first_binlog").is_some());
        assert_eq!(store["incr_paused"], 0);
        assert_eq!(store["sync_source"], ":0:0");
        let dest = &store["sync_dest"][format!("client_{}", id)];
        assert_eq!(dest["dest_store_id"], 3);
        assert_eq!(dest["binlog_pos"], 1);
        h.manager.stop();
    }

    #[test]
    fn test_json_stat_reports_pause() {
        let h = TestHarness::new(1, ReplConfig::default());
        h.manager.startup().unwrap();
        h.manager.pause_incr_sync(true);
        let stat = h.manager.json_stat();
        assert_eq!(stat["0"]["incr_paused"], 1);
        h.manager.stop();
    }
}
