//! Binlog recycling: truncate records every consumer has passed, optionally
//! archiving them into per-store dump files.
//!
//! Dump files live under `<dump_path>/<store_id>/` and are named
//! `binlog-<store>-<seq>-<created_ms>.log`; the field between the second
//! and third `-` is the rotation sequence. The open handle and sequence
//! counter sit under the store's dedicated recycle mutex so the manager
//! mutex is never held across file I/O.

use crate::replication::manager::ReplManager;
use crate::replication::{advance_sched, ms_since_epoch, BINLOG_ID_UNINITED, MIN_VALID_BINLOG_ID};
use crate::storage::{LockMode, TruncateResult};
use crate::{Error, Result};
use rand::Rng;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// An open dump file plus its rotation accounting
pub(crate) struct DumpFile {
    pub(crate) file: File,
    pub(crate) path: PathBuf,
    pub(crate) written: u64,
    pub(crate) created: Instant,
}

/// Per-store dump state; guarded by the store's recycle mutex
#[derive(Default)]
pub(crate) struct DumpFileState {
    /// Sequence of the newest file ever created for this store
    pub(crate) file_seq: u32,
    pub(crate) file: Option<DumpFile>,
}

/// Scan `<dump_path>/<store_id>/` and return the highest file sequence.
///
/// Missing directories are created. Non-regular entries and names not
/// beginning with `binlog` are skipped. An unparseable sequence field or
/// one that does not fit 32 bits is fatal for the store's startup.
pub(crate) fn max_dump_file_seq(dump_path: &Path, store_id: u32) -> Result<u32> {
    let subdir = dump_path.join(store_id.to_string());
    fs::create_dir_all(&subdir).map_err(|e| {
        tracing::error!("create dir {} failed:{}", subdir.display(), e);
        Error::internal(format!("create dump dir: {}", e))
    })?;

    let mut max_seq: u32 = 0;
    for entry in fs::read_dir(&subdir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            tracing::info!("max_dump_file_seq ignore:{}", entry.path().display());
            continue;
        }
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if !name.starts_with("binlog") {
            tracing::info!("max_dump_file_seq ignore:{}", name);
            continue;
        }

        let fields: Vec<&str> = name.split('-').collect();
        if fields.len() < 4 {
            tracing::error!("parse fileno:{} failed: not enough fields", name);
            return Err(Error::internal(format!("parse fileno: {}", name)));
        }
        let seq: u64 = fields[2].parse().map_err(|e| {
            tracing::error!("parse fileno:{} failed:{}", name, e);
            Error::internal(format!("parse fileno: {}", name))
        })?;
        if seq >= u32::MAX as u64 {
            tracing::error!("invalid fileno:{}", seq);
            return Err(Error::internal("invalid fileno"));
        }
        max_seq = max_seq.max(seq as u32);
    }
    Ok(max_seq)
}

/// Open the current dump file, creating the next-sequence file if none is
/// open. Caller holds the store's recycle mutex.
pub(crate) fn cur_binlog_fs<'a>(
    state: &'a mut DumpFileState,
    dump_path: &Path,
    store_id: u32,
) -> Result<&'a mut DumpFile> {
    if state.file.is_none() {
        let seq = state
            .file_seq
            .checked_add(1)
            .ok_or_else(|| Error::internal("dump file sequence overflow"))?;
        let subdir = dump_path.join(store_id.to_string());
        fs::create_dir_all(&subdir)?;
        let path = subdir.join(format!("binlog-{}-{}-{}.log", store_id, seq, ms_since_epoch()));
        let file = File::create(&path)?;
        tracing::info!("open dump file {}", path.display());
        state.file_seq = seq;
        state.file = Some(DumpFile {
            file,
            path,
            written: 0,
            created: Instant::now(),
        });
    }
    // populated just above when it was None
    state
        .file
        .as_mut()
        .ok_or_else(|| Error::internal("dump file vanished"))
}

/// Account `written` archived bytes and rotate the file once it exceeds the
/// size or age threshold. Caller holds the store's recycle mutex.
pub(crate) fn update_cur_binlog_fs(
    state: &mut DumpFileState,
    written: u64,
    flush: bool,
    max_bytes: u64,
    max_age: Duration,
) -> Result<()> {
    let rotate = match state.file.as_mut() {
        Some(dump) => {
            dump.written += written;
            if flush {
                dump.file.flush()?;
                dump.file.sync_data()?;
            }
            dump.written >= max_bytes || dump.created.elapsed() >= max_age
        }
        None => false,
    };
    if rotate {
        if let Some(mut dump) = state.file.take() {
            dump.file.flush()?;
            dump.file.sync_data()?;
            tracing::info!(
                "rotate dump file {} after {} bytes",
                dump.path.display(),
                dump.written
            );
        }
    }
    Ok(())
}

impl ReplManager {
    /// Force a flush (and rotation check) of a store's open dump file
    pub fn flush_cur_binlog_fs(&self, store_id: u32) -> Result<()> {
        let mut dump = self.inner.dump[store_id as usize].lock();
        update_cur_binlog_fs(
            &mut dump,
            0,
            true,
            self.inner.cfg.binlog_file_size_mb * 1024 * 1024,
            Duration::from_secs(self.inner.cfg.binlog_file_secs),
        )
    }

    /// One recycle step for `store_id`, run on the log-recycle pool with
    /// `is_running` already set.
    pub(crate) fn recycle_binlog(&self, store_id: u32) {
        // randomized interval spreads recycle storms across stores
        let ratio = rand::thread_rng().gen_range(0..40) as f64 / 100.0 + 0.80;
        let interval_ms = (self.inner.cfg.truncate_binlog_interval_ms as f64 * ratio) as u64;
        let mut next_sched = Instant::now() + Duration::from_millis(interval_ms);

        let outcome = self.recycle_binlog_inner(store_id, &mut next_sched);

        let mut st = self.inner.state.lock();
        let status = &mut st.recycle_status[store_id as usize];
        debug_assert!(status.is_running);
        status.is_running = false;
        advance_sched(&mut status.next_sched_time, next_sched);
        match outcome {
            Ok(Some(result)) => {
                status.first_binlog_id = result.new_start;
                if result.timestamp != 0 {
                    status.timestamp = result.timestamp;
                }
            }
            // store not running; floor unchanged
            Ok(None) => {}
            Err(e) => {
                tracing::error!("recycle binlog store:{} failed:{}", store_id, e);
                status.first_binlog_id = BINLOG_ID_UNINITED;
            }
        }
    }

    fn recycle_binlog_inner(
        &self,
        store_id: u32,
        next_sched: &mut Instant,
    ) -> Result<Option<TruncateResult>> {
        let guard = self
            .inner
            .segment_mgr
            .get_db(store_id, LockMode::IntentExclusive, false)?;
        let store = guard.store();

        if !store.is_running() {
            tracing::warn!("skip recycle, store:{} is not running", store_id);
            *next_sched = Instant::now() + Duration::from_secs(1);
            return Ok(None);
        }

        let (save_logs, mut start, end) = {
            let st = self.inner.state.lock();
            let idx = store_id as usize;
            // archive locally when no peer will drain the log: we are a
            // slave, or a standalone master with zero subscribers
            let is_slave = st.sync_meta[idx].is_slave();
            let save_logs = is_slave || st.push_status[idx].is_empty();

            let start = st.recycle_status[idx].first_binlog_id;
            let mut end = u64::MAX;
            for push in st.full_push_status[idx].values() {
                end = end.min(push.binlog_pos);
            }
            for push in st.push_status[idx].values() {
                end = end.min(push.binlog_pos);
            }
            (save_logs, start, end)
        };

        if start == BINLOG_ID_UNINITED {
            // floor was reset (error or flush); re-derive it from storage
            start = match store.min_binlog() {
                Ok(min) => min.binlog_id,
                Err(e) if e.is_exhausted() => MIN_VALID_BINLOG_ID,
                Err(e) => return Err(e),
            };
        }

        let mut txn = store.create_transaction()?;

        let result = {
            let mut dump = self.inner.dump[store_id as usize].lock();
            let result = if save_logs {
                let dump_path = self.inner.cfg.dump_path.clone();
                let file = cur_binlog_fs(&mut dump, &dump_path, store_id)?;
                store.truncate_binlog(start, end, txn.as_mut(), Some(&mut file.file))?
            } else {
                store.truncate_binlog(start, end, txn.as_mut(), None)?
            };
            update_cur_binlog_fs(
                &mut dump,
                result.written,
                false,
                self.inner.cfg.binlog_file_size_mb * 1024 * 1024,
                Duration::from_secs(self.inner.cfg.binlog_file_secs),
            )?;
            result
        };

        txn.commit()?;
        tracing::debug!(
            "store:{} truncate binlog from:{} to:{} written:{}",
            store_id,
            start,
            result.new_start,
            result.written
        );
        Ok(Some(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_max_seq_empty_dir_creates_and_returns_zero() {
        let dir = TempDir::new().unwrap();
        let seq = max_dump_file_seq(dir.path(), 3).unwrap();
        assert_eq!(seq, 0);
        assert!(dir.path().join("3").is_dir());
    }

    #[test]
    fn test_max_seq_parses_names() {
        let dir = TempDir::new().unwrap();
        let sub = dir.path().join("0");
        fs::create_dir_all(&sub).unwrap();
        fs::write(sub.join("binlog-0-7-1111.log"), b"x").unwrap();
        fs::write(sub.join("binlog-0-9-2222.log"), b"x").unwrap();
        fs::write(sub.join("binlog-0-8-3333.log"), b"x").unwrap();

        assert_eq!(max_dump_file_seq(dir.path(), 0).unwrap(), 9);
    }

    #[test]
    fn test_max_seq_skips_foreign_names_and_dirs() {
        let dir = TempDir::new().unwrap();
        let sub = dir.path().join("0");
        fs::create_dir_all(sub.join("nested")).unwrap();
        fs::write(sub.join("README"), b"not a dump").unwrap();
        fs::write(sub.join("binlog-0-4-1.log"), b"x").unwrap();

        assert_eq!(max_dump_file_seq(dir.path(), 0).unwrap(), 4);
    }

    #[test]
    fn test_max_seq_rejects_garbage_sequence() {
        let dir = TempDir::new().unwrap();
        let sub = dir.path().join("0");
        fs::create_dir_all(&sub).unwrap();
        fs::write(sub.join("binlog-0-notanumber-1.log"), b"x").unwrap();
        assert!(max_dump_file_seq(dir.path(), 0).is_err());
    }

    #[test]
    fn test_max_seq_rejects_oversized_sequence() {
        let dir = TempDir::new().unwrap();
        let sub = dir.path().join("0");
        fs::create_dir_all(&sub).unwrap();
        fs::write(sub.join(format!("binlog-0-{}-1.log", u64::from(u32::MAX))), b"x").unwrap();
        assert!(max_dump_file_seq(dir.path(), 0).is_err());
    }

    #[test]
    fn test_rotation_sequence() {
        let dir = TempDir::new().unwrap();
        let mut state = DumpFileState {
            file_seq: 7,
            file: None,
        };
        let max_bytes = 1024 * 1024;
        let max_age = Duration::from_secs(3600);

        // first open claims sequence 8
        {
            let f = cur_binlog_fs(&mut state, dir.path(), 0).unwrap();
            f.file.write_all(&vec![0u8; 600]).unwrap();
        }
        assert_eq!(state.file_seq, 8);
        update_cur_binlog_fs(&mut state, 1200 * 1024, false, max_bytes, max_age).unwrap();
        assert!(state.file.is_none());

        // second open claims sequence 9
        cur_binlog_fs(&mut state, dir.path(), 0).unwrap();
        assert_eq!(state.file_seq, 9);
        update_cur_binlog_fs(&mut state, 1200 * 1024, false, max_bytes, max_age).unwrap();
        assert!(state.file.is_none());

        // scan sees the newest sequence
        assert_eq!(max_dump_file_seq(dir.path(), 0).unwrap(), 9);
    }

    #[test]
    fn test_update_without_open_file_is_noop() {
        let mut state = DumpFileState::default();
        update_cur_binlog_fs(&mut state, 100, true, 1024, Duration::from_secs(1)).unwrap();
        assert!(state.file.is_none());
    }
}
