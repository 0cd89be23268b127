//! Replication manager configuration

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for the replication manager
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplConfig {
    /// Outbound binlog push bandwidth ceiling (MiB/s, aggregate)
    pub binlog_rate_limit_mb: u64,

    /// Worker threads for master-side incremental push
    pub incr_push_threads: usize,

    /// Worker threads for master-side full-sync push
    pub full_push_threads: usize,

    /// Worker threads for slave-side full-sync reception
    pub full_receive_threads: usize,

    /// Worker threads for binlog recycling
    pub log_recycle_threads: usize,

    /// Base period of the recycle scheduler in milliseconds (actual is ±20%)
    pub truncate_binlog_interval_ms: u64,

    /// Root of the per-store binlog dump directory
    pub dump_path: PathBuf,

    /// Rotate the open dump file once it holds this many MiB
    pub binlog_file_size_mb: u64,

    /// Rotate the open dump file once it is this many seconds old
    pub binlog_file_secs: u64,

    /// Password sent as a single `AUTH` line when connecting to a master
    pub master_auth: Option<String>,

    /// Seconds a completed full-push status is retained before collection
    pub full_push_gc_secs: u64,
}

impl Default for ReplConfig {
    fn default() -> Self {
        Self {
            binlog_rate_limit_mb: 64,
            incr_push_threads: 4,
            full_push_threads: 4,
            full_receive_threads: 4,
            log_recycle_threads: 4,
            truncate_binlog_interval_ms: 1000,
            dump_path: PathBuf::from("./dump"),
            binlog_file_size_mb: 64,
            binlog_file_secs: 20 * 60,
            master_auth: None,
            full_push_gc_secs: 600,
        }
    }
}

impl ReplConfig {
    /// Set the dump directory root
    pub fn with_dump_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.dump_path = path.into();
        self
    }

    /// Set the outbound bandwidth ceiling in MiB/s
    pub fn with_rate_limit_mb(mut self, mb: u64) -> Self {
        self.binlog_rate_limit_mb = mb;
        self
    }

    /// Set the base recycle interval in milliseconds
    pub fn with_truncate_interval_ms(mut self, ms: u64) -> Self {
        self.truncate_binlog_interval_ms = ms;
        self
    }

    /// Set the master auth password
    pub fn with_master_auth(mut self, auth: impl Into<String>) -> Self {
        self.master_auth = Some(auth.into());
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.binlog_rate_limit_mb == 0 {
            return Err(Error::internal("binlog_rate_limit_mb must be at least 1"));
        }
        if self.incr_push_threads == 0
            || self.full_push_threads == 0
            || self.full_receive_threads == 0
            || self.log_recycle_threads == 0
        {
            return Err(Error::internal("worker pool sizes must be at least 1"));
        }
        if self.truncate_binlog_interval_ms == 0 {
            return Err(Error::internal(
                "truncate_binlog_interval_ms must be at least 1",
            ));
        }
        if self.binlog_file_size_mb == 0 {
            return Err(Error::internal("binlog_file_size_mb must be at least 1"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_valid() {
        let config = ReplConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.full_push_gc_secs, 600);
        assert!(config.master_auth.is_none());
    }

    #[test]
    fn test_zero_pool_size_rejected() {
        let mut config = ReplConfig::default();
        config.incr_push_threads = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_interval_rejected() {
        let config = ReplConfig::default().with_truncate_interval_ms(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_builders() {
        let config = ReplConfig::default()
            .with_dump_path("/tmp/riptide-dump")
            .with_rate_limit_mb(8)
            .with_master_auth("sekrit");
        assert_eq!(config.dump_path, PathBuf::from("/tmp/riptide-dump"));
        assert_eq!(config.binlog_rate_limit_mb, 8);
        assert_eq!(config.master_auth.as_deref(), Some("sekrit"));
    }
}
