//! Riptide Core - Multi-Store Key-Value Engine
//!
//! This crate provides the engine-side subsystems of Riptide, a server
//! holding a fixed number of independent storage shards ("stores"). Each
//! store can act as master (accepting writes, producing a binlog) or slave
//! (pulling another store's binlog and applying it). The centerpiece here
//! is the replication manager:
//!
//! - slave lifecycle per store: connect → full-sync → incremental-sync
//! - master-side pushes to every registered subscriber
//! - binlog recycling behind the multi-consumer watermark, with optional
//!   dump-file archival
//! - operator-visible status (text info and JSON snapshot)
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │             Command Layer (external)          │
//! └──────────────┬───────────────────────────────┘
//!                │ register / changeReplSource
//! ┌──────────────┴───────────────────────────────┐
//! │             Replication Manager               │
//! │   control loop · slave sync · master push     │
//! │   binlog recycle · status reporting           │
//! └──────┬───────────────┬───────────────┬───────┘
//!        │               │               │
//! ┌──────┴─────┐  ┌──────┴──────┐  ┌─────┴──────┐
//! │  Catalog   │  │ SegmentMgr  │  │  Network   │
//! │ (metadata) │  │ + KVStores  │  │ (clients)  │
//! └────────────┘  └─────────────┘  └────────────┘
//! ```
//!
//! The storage engine, wire codec and command dispatch are collaborators
//! behind the traits in [`catalog`], [`storage`], [`net`] and
//! [`replication::SyncProtocol`].

#![warn(clippy::all)]

pub mod catalog;
pub mod config;
pub mod error;
pub mod net;
pub mod rate_limiter;
pub mod replication;
pub mod storage;
pub mod testing;
pub mod worker;

pub use catalog::{Catalog, FsCatalog, ReplState, StoreMeta};
pub use config::ReplConfig;
pub use error::{Error, Result};
pub use net::{BlockingClient, BlockingTcpClient, Network, TcpNetwork};
pub use rate_limiter::RateLimiter;
pub use replication::{
    FullPushState, FullPushSummary, ReplManager, SyncProtocol, SyncStatus, BINLOG_ID_UNINITED,
    MIN_VALID_BINLOG_ID,
};
pub use storage::{
    BinlogChunk, DbGuard, KVStore, LockMode, MinBinlog, SegmentMgr, StoreMode, Transaction,
    TruncateResult,
};
pub use worker::WorkerPool;
