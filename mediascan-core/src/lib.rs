//! # Mediascan Core
//!
//! Indexing engine for a watched media library: filesystem watching with
//! write stabilization, ffprobe/ffmpeg driven metadata and thumbnail
//! extraction, a revisioned document store, reconciliation against the real
//! filesystem and an end-to-end liveness watchdog.
//!
//! ## Feature Flags
//!
//! - `database`: PostgreSQL [`store::PostgresRecordStore`] via SQLx
//! - `scan-runtime`: native filesystem watchers via `notify`
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use mediascan_core::{
//!     MemoryRecordStore, ReconciliationSweeper, ScanContext, ScanOptions,
//! };
//!
//! async fn sweep_once() -> mediascan_core::Result<()> {
//!     let ctx = ScanContext::new(ScanOptions::default(), Arc::new(MemoryRecordStore::new()));
//!     let report = ReconciliationSweeper::from_context(&ctx).sweep().await?;
//!     println!("{} of {} records removed", report.deleted, report.scanned);
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(missing_docs)]

/// Runtime options consumed by every component
pub mod config;

/// Shared handles created once at startup
pub mod context;

/// Error types and error handling utilities
pub mod error;

/// Filesystem port and its real and in-memory implementations
pub mod fs;

/// ffprobe/ffmpeg driven media classification and scene analysis
pub mod metadata;

/// Watching, per-file scanning and reconciliation
pub mod scan;

/// Revisioned record store port and adapters
pub mod store;

/// Single-frame PNG extraction
pub mod thumbnail;

/// External process runner with timeouts
pub mod tools;

/// End-to-end liveness probe
pub mod watchdog;

pub use config::{
    MetadataOptions, ScanOptions, ScannerOptions, ThumbnailOptions, ToolOptions,
    WatchdogOptions,
};
pub use context::ScanContext;
pub use error::{MediaError, Result};
pub use fs::{FileSystem, InMemoryFs, RealFs};
pub use metadata::{MetadataExtractor, SceneAnalyzer};
pub use scan::{ReconciliationSweeper, ScanOutcome, ScanPipeline, SweepReport, WatchEvent};
pub use store::{ChangeEvent, ChangeStream, MemoryRecordStore, RecordStore};
#[cfg(feature = "database")]
pub use store::PostgresRecordStore;
pub use thumbnail::ThumbnailGenerator;
pub use tools::ToolRunner;
pub use watchdog::{ProbePhase, WatchDog, WatchdogError};
