//! Runtime status records for the three replication roles.
//!
//! All fields are guarded by the manager mutex except the dump-file handle
//! and sequence accounting, which live under the per-store recycle mutex
//! (see `recycle`).

use crate::net::BlockingClient;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Instant, SystemTime};

/// Transient slave-role state of one store
#[derive(Debug)]
pub struct SlaveStatus {
    /// A slave routine is in flight for this store
    pub is_running: bool,
    /// Transport session carrying the incremental stream, if any
    pub session_id: u64,
    /// Next time the control loop may dispatch; `None` means never
    pub next_sched_time: Option<Instant>,
    /// Last time a sync routine made progress
    pub last_sync_time: SystemTime,
}

/// Master-side bookkeeping for one registered incremental subscriber
pub struct MasterPushStatus {
    /// Process-unique subscriber id
    pub client_id: u64,
    /// Store id on the destination server
    pub dst_store_id: u32,
    /// An incremental-push routine is in flight for this subscriber
    pub is_running: bool,
    /// Next binlog id to send; advances monotonically
    pub binlog_pos: u64,
    /// Next time the control loop may dispatch; `None` means never
    pub next_sched_time: Option<Instant>,
    /// Transport to the slave; locked only outside the manager mutex
    pub client: Arc<Mutex<Box<dyn BlockingClient>>>,
    /// Address the slave listens on, for status output
    pub slave_listen_ip: String,
    /// Port the slave listens on
    pub slave_listen_port: u16,
}

impl std::fmt::Debug for MasterPushStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterPushStatus")
            .field("client_id", &self.client_id)
            .field("dst_store_id", &self.dst_store_id)
            .field("is_running", &self.is_running)
            .field("binlog_pos", &self.binlog_pos)
            .field("slave_listen_ip", &self.slave_listen_ip)
            .field("slave_listen_port", &self.slave_listen_port)
            .finish()
    }
}

/// Lifecycle of one full-sync push
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FullPushState {
    /// Snapshot transfer in progress
    Running,
    /// Transfer finished; entry retained to hold the recycle watermark
    Success,
    /// Transfer failed
    Err,
}

/// Master-side record of one in-progress or recent full-sync push
#[derive(Debug)]
pub struct MasterFullPushStatus {
    /// Identity of the requesting peer (`host:port`)
    pub peer_key: String,
    /// Transfer lifecycle state
    pub state: FullPushState,
    /// Recycle watermark held by this transfer: the snapshot position at
    /// admission, raised to the true handoff on SUCCESS
    pub binlog_pos: u64,
    /// When the transfer started
    pub start_time: Instant,
    /// When the transfer finished, either way
    pub end_time: Option<Instant>,
}

/// Read-only view of a full-push entry for operator inspection
#[derive(Debug, Clone)]
pub struct FullPushSummary {
    /// Identity of the requesting peer
    pub peer_key: String,
    /// Transfer lifecycle state
    pub state: FullPushState,
    /// Binlog handoff position
    pub binlog_pos: u64,
}

/// Per-store binlog recycle state
#[derive(Debug)]
pub struct RecycleStatus {
    /// A recycle routine is in flight for this store
    pub is_running: bool,
    /// Lowest binlog id still retained; `BINLOG_ID_UNINITED` after an error
    pub first_binlog_id: u64,
    /// Binlog id at which the store last flushed away its data
    pub last_flush_binlog_id: u64,
    /// Timestamp (ms since epoch) of the oldest retained record
    pub timestamp: u64,
    /// Next time the control loop may dispatch; `None` means never
    pub next_sched_time: Option<Instant>,
}
