//! Catalog module - durable per-store replication metadata
//!
//! Each store persists one small record of replication intent: where it
//! syncs from, the last applied binlog id, and its replication state. The
//! manager writes the record *before* swapping its in-memory copy, so a
//! crash never observes memory ahead of disk.

use crate::replication::BINLOG_ID_UNINITED;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Replication state of one store's slave role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum ReplState {
    /// Not replicating; the store is writable
    None = 0,
    /// Slave is (re)establishing a connection to its source
    Connect = 1,
    /// Full-sync snapshot transfer in progress
    Transfer = 2,
    /// Incremental replication established
    Connected = 3,
}

impl ReplState {
    /// Numeric code used in status output
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Persistent per-store record of replication intent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreMeta {
    /// Store index, `0..store_count`
    pub id: u32,
    /// Source host; empty means master/standalone
    pub sync_from_host: String,
    /// Source port
    pub sync_from_port: u16,
    /// Store id on the source server
    pub sync_from_id: u32,
    /// Last applied binlog id
    pub binlog_id: u64,
    /// Replication state
    pub repl_state: ReplState,
}

impl StoreMeta {
    /// A fresh standalone meta for store `id`
    pub fn new(id: u32) -> Self {
        Self {
            id,
            sync_from_host: String::new(),
            sync_from_port: 0,
            sync_from_id: 0,
            binlog_id: BINLOG_ID_UNINITED,
            repl_state: ReplState::None,
        }
    }

    /// True when this store replicates from another store
    pub fn is_slave(&self) -> bool {
        !self.sync_from_host.is_empty()
    }
}

/// Durable store-metadata catalog consumed by the replication manager
pub trait Catalog: Send + Sync {
    /// Fetch the metadata of store `id`; `Error::NotFound` when absent
    fn store_meta(&self, id: u32) -> Result<StoreMeta>;

    /// Persist `meta` durably before returning
    fn set_store_meta(&self, meta: &StoreMeta) -> Result<()>;
}

/// File-backed catalog keeping one JSON document per store.
///
/// Writes go to a temporary file which is renamed into place, so a torn
/// write cannot corrupt an existing record.
pub struct FsCatalog {
    dir: PathBuf,
}

impl FsCatalog {
    /// Open (creating if needed) a catalog rooted at `dir`
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn meta_path(&self, id: u32) -> PathBuf {
        self.dir.join(format!("store-{}.json", id))
    }
}

impl Catalog for FsCatalog {
    fn store_meta(&self, id: u32) -> Result<StoreMeta> {
        let path = self.meta_path(id);
        let bytes = match fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::not_found(format!("store meta {}", id)));
            }
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&bytes)
            .map_err(|e| Error::catalog(format!("decode {}: {}", path.display(), e)))
    }

    fn set_store_meta(&self, meta: &StoreMeta) -> Result<()> {
        let path = self.meta_path(meta.id);
        let tmp = self.dir.join(format!("store-{}.json.tmp", meta.id));
        let bytes = serde_json::to_vec_pretty(meta)
            .map_err(|e| Error::catalog(format!("encode store meta {}: {}", meta.id, e)))?;
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_store_meta_defaults() {
        let meta = StoreMeta::new(3);
        assert_eq!(meta.id, 3);
        assert!(!meta.is_slave());
        assert_eq!(meta.repl_state, ReplState::None);
        assert_eq!(meta.binlog_id, BINLOG_ID_UNINITED);
    }

    #[test]
    fn test_fs_catalog_missing_is_not_found() {
        let dir = TempDir::new().unwrap();
        let catalog = FsCatalog::new(dir.path()).unwrap();
        let err = catalog.store_meta(0).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_fs_catalog_roundtrip() {
        let dir = TempDir::new().unwrap();
        let catalog = FsCatalog::new(dir.path()).unwrap();

        let mut meta = StoreMeta::new(1);
        meta.sync_from_host = "10.0.0.2".to_string();
        meta.sync_from_port = 6379;
        meta.sync_from_id = 7;
        meta.repl_state = ReplState::Connect;
        catalog.set_store_meta(&meta).unwrap();

        let loaded = catalog.store_meta(1).unwrap();
        assert_eq!(loaded, meta);
    }

    #[test]
    fn test_fs_catalog_overwrite() {
        let dir = TempDir::new().unwrap();
        let catalog = FsCatalog::new(dir.path()).unwrap();

        let mut meta = StoreMeta::new(0);
        catalog.set_store_meta(&meta).unwrap();
        meta.repl_state = ReplState::Connected;
        meta.binlog_id = 99;
        catalog.set_store_meta(&meta).unwrap();

        let loaded = catalog.store_meta(0).unwrap();
        assert_eq!(loaded.repl_state, ReplState::Connected);
        assert_eq!(loaded.binlog_id, 99);
    }

    #[test]
    fn test_repl_state_codes() {
        assert_eq!(ReplState::None.as_u8(), 0);
        assert_eq!(ReplState::Connect.as_u8(), 1);
        assert_eq!(ReplState::Transfer.as_u8(), 2);
        assert_eq!(ReplState::Connected.as_u8(), 3);
    }
}
