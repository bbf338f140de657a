//! End-to-end liveness probe.
//!
//! A marked copy of the sentinel file is dropped into the media root and must
//! show up in the store's change feed, then be deleted again, each within the
//! phase timeout. A timeout means the indexer has stalled and the process
//! should be restarted by its supervisor.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use futures::StreamExt;
use mediascan_model::{MediaRecord, RecordId};
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::AbortOnDropHandle;
use tracing::{debug, error, info, warn};

use crate::config::WatchdogOptions;
use crate::context::ScanContext;
use crate::error::MediaError;
use crate::fs::{FileSystem, epoch_ms};
use crate::store::{ChangeStream, RecordStore};

/// Infix that marks probe copies so they can be told apart from real media.
pub const IGNORE_MARKER: &str = "_watchdogIgnore_";

static MARKED_COPY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)_watchdogIgnore_").expect("watchdog marker regex should compile")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbePhase {
    /// Waiting for the copy to be indexed.
    Inject,
    /// Waiting for the copy's record to be deleted.
    Retract,
}

impl fmt::Display for ProbePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbePhase::Inject => f.write_str("created file didn't appear in the store"),
            ProbePhase::Retract => f.write_str("removed file wasn't removed from the store"),
        }
    }
}

#[derive(Error, Debug)]
pub enum WatchdogError {
    #[error("Timeout: {phase} within {timeout:?}")]
    Timeout { phase: ProbePhase, timeout: Duration },

    #[error(transparent)]
    Media(#[from] MediaError),
}

impl WatchdogError {
    /// Only timeouts warrant taking the process down.
    pub fn is_fatal(&self) -> bool {
        matches!(self, WatchdogError::Timeout { .. })
    }
}

/// Name of the probe copy of `sentinel` made at `epoch_ms`.
///
/// `watchdog.mov` becomes `watchdog_watchdogIgnore_1700000000000.mov`.
pub fn copy_name(sentinel: &str, epoch_ms: i64) -> String {
    match sentinel.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => {
            format!("{stem}{IGNORE_MARKER}{epoch_ms}.{ext}")
        }
        _ => format!("{sentinel}{IGNORE_MARKER}{epoch_ms}"),
    }
}

pub struct WatchDog {
    store: Arc<dyn RecordStore>,
    fs: Arc<dyn FileSystem>,
    root: PathBuf,
    options: WatchdogOptions,
}

impl fmt::Debug for WatchDog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchDog")
            .field("root", &self.root)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl WatchDog {
    pub fn new(
        store: Arc<dyn RecordStore>,
        fs: Arc<dyn FileSystem>,
        root: PathBuf,
        options: WatchdogOptions,
    ) -> Self {
        Self {
            store,
            fs,
            root,
            options,
        }
    }

    pub fn from_context(ctx: &ScanContext) -> Self {
        Self::new(
            Arc::clone(&ctx.store),
            Arc::clone(&ctx.fs),
            ctx.options.scanner.media_root().to_path_buf(),
            ctx.options.watchdog.clone(),
        )
    }

    pub fn sentinel_path(&self) -> PathBuf {
        self.root.join(&self.options.sentinel)
    }

    /// Probe immediately, then every interval, until shutdown or a fatal
    /// failure. Returns `Ok` without arming when disabled or when the
    /// sentinel is missing.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), WatchdogError> {
        if !self.options.enabled {
            info!("Watchdog is disabled by configuration");
            return Ok(());
        }
        let sentinel = self.sentinel_path();
        if !self.fs.path_exists(&sentinel).await {
            warn!("Watchdog is disabled because {} wasn't found", sentinel.display());
            return Ok(());
        }

        let mut ticker = tokio::time::interval(self.options.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                _ = ticker.tick() => {}
            }

            let probe = tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                probe = self.probe() => probe,
            };
            match probe {
                Ok(()) => info!("Watchdog ok"),
                Err(err) if err.is_fatal() => {
                    error!(error = %err, "Watchdog failed, shutting down!");
                    return Err(err);
                }
                Err(err) => error!(error = %err, "Error in watchdog"),
            }
        }
    }

    /// One inject/retract round trip.
    pub async fn probe(&self) -> Result<(), WatchdogError> {
        let copy = copy_name(&self.options.sentinel, epoch_ms(SystemTime::now()));
        let source = self.sentinel_path();
        let target = self.root.join(&copy);
        info!(copy = %copy, "Watchdog check");

        self.cleanup().await;

        let changes = self.store.subscribe_changes().await?;
        let (created_tx, created_rx) = oneshot::channel();
        let (removed_tx, removed_rx) = oneshot::channel();
        let _listener = AbortOnDropHandle::new(tokio::spawn(listen(
            changes,
            copy.clone(),
            created_tx,
            removed_tx,
        )));

        info!(copy = %copy, "Watchdog: copy file");
        self.fs.copy_file(&source, &target).await?;
        debug!("Watchdog: wait for changes");
        self.await_phase(ProbePhase::Inject, created_rx).await?;

        info!(copy = %copy, "Watchdog: remove file");
        self.fs.remove_file(&target).await?;
        debug!("Watchdog: wait for changes");
        self.await_phase(ProbePhase::Retract, removed_rx).await?;

        Ok(())
    }

    async fn await_phase(
        &self,
        phase: ProbePhase,
        signal: oneshot::Receiver<()>,
    ) -> Result<(), WatchdogError> {
        let timeout = self.options.timeout();
        match tokio::time::timeout(timeout, signal).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(MediaError::Internal(format!(
                "change feed ended while waiting: {phase}"
            ))
            .into()),
            Err(_) => Err(WatchdogError::Timeout { phase, timeout }),
        }
    }

    /// Delete marked copies left behind by interrupted probes.
    pub async fn cleanup(&self) {
        let mut entries = match self.fs.read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(err) => {
                error!(root = %self.root.display(), error = %err, "Watchdog cleanup failed");
                return;
            }
        };

        loop {
            let path = match entries.next_entry().await {
                Ok(Some(path)) => path,
                Ok(None) => break,
                Err(err) => {
                    error!(error = %err, "Watchdog cleanup failed");
                    break;
                }
            };
            if !is_marked_copy(&path) {
                continue;
            }
            info!(path = %path.display(), "Watchdog: removing old file");
            if let Err(err) = self.fs.remove_file(&path).await {
                error!(path = %path.display(), error = %err, "Watchdog cleanup failed");
            }
        }
    }
}

fn is_marked_copy(path: &Path) -> bool {
    path.file_name()
        .is_some_and(|name| MARKED_COPY.is_match(&name.to_string_lossy()))
}

fn names_copy(doc: &MediaRecord, copy: &str) -> bool {
    doc.media_path
        .as_deref()
        .and_then(Path::file_name)
        .is_some_and(|name| name.to_string_lossy().eq_ignore_ascii_case(copy))
}

/// Resolve `created` when a record for `copy` is written, then `removed`
/// when that same record is deleted.
async fn listen(
    mut changes: ChangeStream,
    copy: String,
    created: oneshot::Sender<()>,
    removed: oneshot::Sender<()>,
) {
    let mut created = Some(created);
    let mut created_id: Option<RecordId> = None;

    while let Some(change) = changes.next().await {
        if change.deleted {
            if created_id.as_ref() == Some(&change.id) {
                let _ = removed.send(());
                return;
            }
        } else if change.doc.as_ref().is_some_and(|doc| names_copy(doc, &copy)) {
            created_id = Some(change.id);
            if let Some(tx) = created.take() {
                let _ = tx.send(());
            }
        }
    }
}
