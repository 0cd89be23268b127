//! Replication subsystem for the Riptide multi-store engine.
//!
//! Every store can independently act as master (producing a binlog that is
//! pushed to subscribed slaves) or slave (pulling a source store's binlog).
//! The pieces:
//!
//! - [`manager::ReplManager`] — the control plane: one scheduler thread
//!   dispatching per-store routines onto five worker pools
//! - slave lifecycle (connect → full-sync → incremental) in `slave`
//! - master-side incremental and full pushes in `push`
//! - binlog recycling (truncation + dump-file archival) in `recycle`
//! - operator-visible status in `report`
//!
//! # Scheduling model
//!
//! ```text
//! ┌────────────────────────────┐   schedule    ┌─────────────────────┐
//! │      control thread        │ ────────────► │  repl-mfull (pool)  │
//! │  slave / master / recycle  │               │  repl-minc  (pool)  │
//! │  passes under one mutex    │               │  repl-sfull (pool)  │
//! └────────────────────────────┘               │  repl-scheck (pool) │
//!                                              │  log-recyc  (pool)  │
//!                                              └─────────────────────┘
//! ```
//!
//! Each status entry carries an `is_running` flag and a `next_sched_time`;
//! the control loop flips the flag before dispatch and the routine clears
//! it on exit, so at most one routine per (store, role) is in flight.

pub mod manager;
pub mod push;
pub mod recycle;
pub mod report;
pub mod slave;
pub mod status;

pub use manager::ReplManager;
pub use status::{
    FullPushState, FullPushSummary, MasterFullPushStatus, MasterPushStatus, RecycleStatus,
    SlaveStatus,
};

use crate::catalog::StoreMeta;
use crate::net::BlockingClient;
use crate::storage::KVStore;
use crate::Result;
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Sentinel for "no binlog id yet"
pub const BINLOG_ID_UNINITED: u64 = u64::MAX;

/// Lowest binlog id a store ever assigns
pub const MIN_VALID_BINLOG_ID: u64 = 1;

/// Sentinel for "no transport session held"
pub const SESSION_ID_NONE: u64 = u64::MAX;

/// Read buffer for replication transports
pub(crate) const REPL_CLIENT_BUF_BYTES: usize = 64 * 1024 * 1024;

/// Preferred chunk size when reading binlogs for pushing
pub(crate) const PUSH_CHUNK_BYTES: usize = 64 * 1024;

/// Bytes one incremental-push invocation may send before rescheduling
pub(crate) const MAX_PUSH_BYTES_PER_ROUND: u64 = 4 * 1024 * 1024;

/// Outcome of one slave incremental check
#[derive(Debug, Clone, Copy)]
pub struct SyncStatus {
    /// Highest binlog id applied on this slave store
    pub binlog_id: u64,
    /// Transport session currently carrying the incremental stream
    pub session_id: Option<u64>,
}

/// Wire-level sync routines the control plane drives but does not define.
///
/// Record encoding, snapshot formats and their application are owned by the
/// storage/protocol layer; the manager only sequences these calls and does
/// the bookkeeping around them.
pub trait SyncProtocol: Send + Sync {
    /// Slave side: request and apply a full sync over `client`. Returns the
    /// binlog id at which incremental replication may resume.
    fn full_sync(
        &self,
        store_id: u32,
        meta: &StoreMeta,
        client: &mut dyn BlockingClient,
    ) -> Result<u64>;

    /// Slave side: verify (and if needed re-establish) the incremental
    /// stream for a connected store.
    fn check_sync_status(&self, store_id: u32, meta: &StoreMeta) -> Result<SyncStatus>;

    /// Master side: stream a snapshot of `store` to a requesting peer.
    /// Returns the binlog handoff position.
    fn supply_full_sync(
        &self,
        store_id: u32,
        store: &Arc<dyn KVStore>,
        client: &mut dyn BlockingClient,
        dst_store_id: u32,
    ) -> Result<u64>;
}

/// Milliseconds since the Unix epoch
pub(crate) fn ms_since_epoch() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Milliseconds since the Unix epoch for an arbitrary wall-clock time
pub(crate) fn ms_since_epoch_of(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// True when a schedule slot is due. `None` is the +∞ sentinel used for
/// administratively stopped or closed stores and never fires.
pub(crate) fn is_due(slot: Option<Instant>, now: Instant) -> bool {
    matches!(slot, Some(t) if t <= now)
}

/// Push a schedule slot forward to `t`, preserving the +∞ sentinel and any
/// later time already present.
pub(crate) fn advance_sched(slot: &mut Option<Instant>, t: Instant) {
    if let Some(cur) = *slot {
        if cur < t {
            *slot = Some(t);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_is_due() {
        let now = Instant::now();
        assert!(is_due(Some(now - Duration::from_millis(1)), now));
        assert!(is_due(Some(now), now));
        assert!(!is_due(Some(now + Duration::from_millis(1)), now));
        assert!(!is_due(None, now));
    }

    #[test]
    fn test_advance_sched_moves_forward_only() {
        let now = Instant::now();
        let later = now + Duration::from_secs(1);

        let mut slot = Some(now);
        advance_sched(&mut slot, later);
        assert_eq!(slot, Some(later));

        let mut slot = Some(later);
        advance_sched(&mut slot, now);
        assert_eq!(slot, Some(later));
    }

    #[test]
    fn test_advance_sched_preserves_infinity() {
        let mut slot = None;
        advance_sched(&mut slot, Instant::now());
        assert_eq!(slot, None);
    }
}
