//! Recursive directory watching with write stabilization.
//!
//! Raw `notify` events are reduced to two kinds of [`WatchEvent`]. Removals
//! go out immediately. Creates and modifications are parked until the file
//! size has stopped changing for the configured threshold, so half-copied
//! files are never scanned.

use std::collections::HashMap;
#[cfg(feature = "scan-runtime")]
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ScannerOptions;
use crate::fs::{FileSystem, walk_files};

/// Stat captured when a file was reported stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub size: u64,
    pub modified_ms: i64,
    pub is_dir: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// A file appeared or changed and has been stable long enough.
    Upsert { path: PathBuf, stat: FileStat },
    /// A file went away.
    Removed { path: PathBuf },
}

impl WatchEvent {
    pub fn path(&self) -> &Path {
        match self {
            WatchEvent::Upsert { path, .. } | WatchEvent::Removed { path } => path,
        }
    }
}

/// Normalized change fed into the stabilizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawChange {
    Touched(PathBuf),
    Removed(PathBuf),
}

#[derive(Debug)]
struct Pending {
    seq: u64,
    last_size: Option<u64>,
    stable_since: Instant,
}

/// Turns [`RawChange`]s into ordered [`WatchEvent`]s.
struct Stabilizer {
    fs: Arc<dyn FileSystem>,
    threshold: Duration,
    pending: HashMap<PathBuf, Pending>,
    next_seq: u64,
    out: mpsc::Sender<WatchEvent>,
}

impl Stabilizer {
    fn track(&mut self, path: PathBuf) {
        let seq = self.next_seq;
        self.next_seq += 1;
        // A new touch restarts the stability window.
        self.pending.insert(
            path,
            Pending {
                seq,
                last_size: None,
                stable_since: Instant::now(),
            },
        );
    }

    /// Returns false once the consumer is gone. Pending entries at or below
    /// `path` are dropped with it.
    async fn remove(&mut self, path: PathBuf) -> bool {
        self.pending.retain(|pending, _| !pending.starts_with(&path));
        self.out.send(WatchEvent::Removed { path }).await.is_ok()
    }

    /// Re-stat everything pending and emit what has settled, oldest first.
    async fn poll(&mut self) -> bool {
        let now = Instant::now();
        let mut ready = Vec::new();
        let mut vanished = Vec::new();
        let mut expanded = Vec::new();

        for (path, entry) in self.pending.iter_mut() {
            let md = match self.fs.metadata(path).await {
                Ok(md) => md,
                Err(_) => {
                    vanished.push((entry.seq, path.clone()));
                    continue;
                }
            };

            if md.is_dir {
                expanded.push(path.clone());
                continue;
            }

            if entry.last_size != Some(md.len) {
                entry.last_size = Some(md.len);
                entry.stable_since = now;
                continue;
            }

            if now.duration_since(entry.stable_since) >= self.threshold {
                ready.push((
                    entry.seq,
                    path.clone(),
                    FileStat {
                        size: md.len,
                        modified_ms: md.modified_ms(),
                        is_dir: false,
                    },
                ));
            }
        }

        for dir in expanded {
            self.pending.remove(&dir);
            match walk_files(self.fs.as_ref(), &dir).await {
                Ok(files) => files.into_iter().for_each(|file| self.track(file)),
                Err(err) => debug!(dir = %dir.display(), error = %err, "New directory vanished"),
            }
        }

        let mut out: Vec<(u64, WatchEvent)> = Vec::with_capacity(ready.len() + vanished.len());
        for (seq, path, stat) in ready {
            self.pending.remove(&path);
            out.push((seq, WatchEvent::Upsert { path, stat }));
        }
        for (seq, path) in vanished {
            self.pending.remove(&path);
            out.push((seq, WatchEvent::Removed { path }));
        }
        out.sort_by_key(|(seq, _)| *seq);

        for (_, event) in out {
            if self.out.send(event).await.is_err() {
                return false;
            }
        }
        true
    }
}

/// Walk `roots`, then stabilize live changes from `raw` until shutdown, the
/// raw feed closing, or the consumer going away.
pub fn spawn_stabilizer(
    fs: Arc<dyn FileSystem>,
    roots: Vec<PathBuf>,
    options: &ScannerOptions,
    mut raw: mpsc::Receiver<RawChange>,
    out: mpsc::Sender<WatchEvent>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    let poll_interval = options.poll_interval();
    let mut stabilizer = Stabilizer {
        fs,
        threshold: options.stability_threshold(),
        pending: HashMap::new(),
        next_seq: 0,
        out,
    };

    tokio::spawn(async move {
        for root in &roots {
            match walk_files(stabilizer.fs.as_ref(), root).await {
                Ok(files) => {
                    info!(root = %root.display(), files = files.len(), "Initial scan queued");
                    files.into_iter().for_each(|file| stabilizer.track(file));
                }
                Err(err) => warn!(root = %root.display(), error = %err, "Initial scan failed"),
            }
        }

        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                change = raw.recv() => {
                    let keep_going = match change {
                        Some(RawChange::Touched(path)) => {
                            stabilizer.track(path);
                            true
                        }
                        Some(RawChange::Removed(path)) => stabilizer.remove(path).await,
                        None => false,
                    };
                    if !keep_going {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if !stabilizer.pending.is_empty() && !stabilizer.poll().await {
                        break;
                    }
                }
            }
        }
        debug!("Watch stabilizer stopped");
    })
}

#[cfg(feature = "scan-runtime")]
mod native {
    use notify::event::{EventKind, ModifyKind, RenameMode};
    use notify::{Config as NotifyConfig, Event, RecommendedWatcher, RecursiveMode, Watcher};

    use super::*;
    use crate::error::{MediaError, Result};

    /// Map one notify event onto zero or more [`RawChange`]s.
    pub(super) fn classify(event: Event) -> Vec<RawChange> {
        let mut paths = event.paths.into_iter();
        match event.kind {
            EventKind::Modify(ModifyKind::Name(RenameMode::From)) | EventKind::Remove(_) => {
                paths.map(RawChange::Removed).collect()
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
                let mut changes = Vec::with_capacity(2);
                if let Some(from) = paths.next() {
                    changes.push(RawChange::Removed(from));
                }
                if let Some(to) = paths.next() {
                    changes.push(RawChange::Touched(to));
                }
                changes
            }
            EventKind::Create(_) | EventKind::Modify(_) => paths.map(RawChange::Touched).collect(),
            EventKind::Access(_) | EventKind::Any | EventKind::Other => Vec::new(),
        }
    }

    pub(super) fn init_watchers(
        roots: &[PathBuf],
        tx: mpsc::Sender<RawChange>,
    ) -> Result<Vec<RecommendedWatcher>> {
        let mut watchers = Vec::with_capacity(roots.len());
        for root in roots {
            let root_display = root.display().to_string();
            let tx_event = tx.clone();
            let mut watcher = RecommendedWatcher::new(
                move |res: std::result::Result<Event, notify::Error>| match res {
                    Ok(event) => {
                        for change in classify(event) {
                            if tx_event.blocking_send(change).is_err() {
                                return;
                            }
                        }
                    }
                    Err(err) => warn!(root = %root_display, error = %err, "Watcher error"),
                },
                NotifyConfig::default(),
            )
            .map_err(|err| {
                MediaError::Internal(format!(
                    "failed to create watcher for {}: {}",
                    root.display(),
                    err
                ))
            })?;

            watcher
                .watch(root, RecursiveMode::Recursive)
                .map_err(|err| {
                    MediaError::Internal(format!("failed to watch {}: {}", root.display(), err))
                })?;
            watchers.push(watcher);
        }
        Ok(watchers)
    }
}

/// Watches the configured roots and hands out the ordered event queue.
#[cfg(feature = "scan-runtime")]
pub struct FsWatchService {
    options: ScannerOptions,
    fs: Arc<dyn FileSystem>,
}

#[cfg(feature = "scan-runtime")]
impl fmt::Debug for FsWatchService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FsWatchService")
            .field("roots", &self.options.paths)
            .finish()
    }
}

/// Keeps the native watchers and the stabilizer task alive.
#[cfg(feature = "scan-runtime")]
pub struct WatchHandle {
    _watchers: Vec<notify::RecommendedWatcher>,
    task: JoinHandle<()>,
}

#[cfg(feature = "scan-runtime")]
impl fmt::Debug for WatchHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchHandle")
            .field("finished", &self.task.is_finished())
            .finish()
    }
}

#[cfg(feature = "scan-runtime")]
impl WatchHandle {
    pub fn shutdown(self) {
        self.task.abort();
    }
}

#[cfg(feature = "scan-runtime")]
impl FsWatchService {
    pub fn new(options: ScannerOptions, fs: Arc<dyn FileSystem>) -> Self {
        Self { options, fs }
    }

    /// Attach recursive watchers to every root and start emitting events.
    pub fn start(
        &self,
        shutdown: CancellationToken,
    ) -> crate::error::Result<(WatchHandle, mpsc::Receiver<WatchEvent>)> {
        let capacity = self.options.queue_capacity.max(1);
        let (raw_tx, raw_rx) = mpsc::channel(capacity);
        let (out_tx, out_rx) = mpsc::channel(capacity);

        let roots = resolve_roots(&self.options.paths);
        let watchers = native::init_watchers(&roots, raw_tx)?;
        let task = spawn_stabilizer(
            Arc::clone(&self.fs),
            roots,
            &self.options,
            raw_rx,
            out_tx,
            shutdown,
        );

        Ok((
            WatchHandle {
                _watchers: watchers,
                task,
            },
            out_rx,
        ))
    }
}

#[cfg(feature = "scan-runtime")]
fn resolve_roots(roots: &[PathBuf]) -> Vec<PathBuf> {
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    roots
        .iter()
        .map(|path| {
            if path.is_absolute() {
                path.clone()
            } else {
                cwd.join(path)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::InMemoryFs;
    use std::time::{SystemTime, UNIX_EPOCH};

    struct Harness {
        fs: Arc<InMemoryFs>,
        raw: mpsc::Sender<RawChange>,
        events: mpsc::Receiver<WatchEvent>,
        shutdown: CancellationToken,
    }

    fn options() -> ScannerOptions {
        ScannerOptions {
            paths: vec![PathBuf::from("/media")],
            stability_threshold_ms: 2_000,
            poll_interval_ms: 1_000,
            ..ScannerOptions::default()
        }
    }

    fn harness(fs: InMemoryFs) -> Harness {
        let fs = Arc::new(fs);
        let (raw, raw_rx) = mpsc::channel(16);
        let (out_tx, events) = mpsc::channel(16);
        let shutdown = CancellationToken::new();
        spawn_stabilizer(
            fs.clone(),
            vec![PathBuf::from("/media")],
            &options(),
            raw_rx,
            out_tx,
            shutdown.clone(),
        );
        Harness {
            fs,
            raw,
            events,
            shutdown,
        }
    }

    fn mtime(secs: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(secs)
    }

    #[tokio::test(start_paused = true)]
    async fn initial_walk_emits_every_existing_file() {
        let fs = InMemoryFs::new();
        fs.add_file_modified("/media/a.mov", 10, mtime(100));
        fs.add_file_modified("/media/show/b.mov", 20, mtime(200));
        let mut h = harness(fs);

        let first = h.events.recv().await.unwrap();
        let second = h.events.recv().await.unwrap();
        let mut paths = vec![first.path().to_path_buf(), second.path().to_path_buf()];
        paths.sort();
        assert_eq!(
            paths,
            vec![PathBuf::from("/media/a.mov"), PathBuf::from("/media/show/b.mov")]
        );
        assert!(matches!(
            first,
            WatchEvent::Upsert { stat: FileStat { is_dir: false, .. }, .. }
        ));
        h.shutdown.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn growing_file_waits_until_size_settles() {
        let fs = InMemoryFs::new();
        fs.add_dir("/media");
        let mut h = harness(fs);

        h.fs.add_file_modified("/media/copy.mov", 100, mtime(1));
        h.raw.send(RawChange::Touched("/media/copy.mov".into())).await.unwrap();

        // Keep growing for a few polls.
        for size in [200, 300, 400] {
            tokio::time::sleep(Duration::from_millis(1_000)).await;
            h.fs.add_file_modified("/media/copy.mov", size, mtime(2));
            assert!(h.events.try_recv().is_err());
        }

        let event = h.events.recv().await.unwrap();
        assert_eq!(
            event,
            WatchEvent::Upsert {
                path: "/media/copy.mov".into(),
                stat: FileStat {
                    size: 400,
                    modified_ms: 2_000,
                    is_dir: false
                },
            }
        );
        h.shutdown.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn removal_is_immediate_and_cancels_pending() {
        let fs = InMemoryFs::new();
        fs.add_dir("/media");
        let mut h = harness(fs);

        h.fs.add_file("/media/tmp.mov", 5);
        h.raw.send(RawChange::Touched("/media/tmp.mov".into())).await.unwrap();
        h.fs.remove(Path::new("/media/tmp.mov"));
        h.raw.send(RawChange::Removed("/media/tmp.mov".into())).await.unwrap();

        assert_eq!(
            h.events.recv().await.unwrap(),
            WatchEvent::Removed {
                path: "/media/tmp.mov".into()
            }
        );
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(h.events.try_recv().is_err());
        h.shutdown.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn directory_removal_drops_pending_children() {
        let fs = InMemoryFs::new();
        fs.add_dir("/media");
        let mut h = harness(fs);

        h.fs.add_file("/media/season/ep01.mov", 1);
        h.fs.add_file("/media/seasonal.mov", 2);
        h.raw.send(RawChange::Touched("/media/season/ep01.mov".into())).await.unwrap();
        h.raw.send(RawChange::Touched("/media/seasonal.mov".into())).await.unwrap();

        h.fs.remove(Path::new("/media/season/ep01.mov"));
        h.fs.remove(Path::new("/media/season"));
        h.raw.send(RawChange::Removed("/media/season".into())).await.unwrap();

        assert_eq!(
            h.events.recv().await.unwrap(),
            WatchEvent::Removed {
                path: "/media/season".into()
            }
        );
        assert_eq!(h.events.recv().await.unwrap().path(), Path::new("/media/seasonal.mov"));
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(h.events.try_recv().is_err());
        h.shutdown.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn new_directory_is_expanded_into_files() {
        let fs = InMemoryFs::new();
        fs.add_dir("/media");
        let mut h = harness(fs);

        h.fs.add_file("/media/season/ep01.mov", 1);
        h.fs.add_file("/media/season/ep02.mov", 2);
        h.raw.send(RawChange::Touched("/media/season".into())).await.unwrap();

        let mut paths = vec![
            h.events.recv().await.unwrap().path().to_path_buf(),
            h.events.recv().await.unwrap().path().to_path_buf(),
        ];
        paths.sort();
        assert_eq!(
            paths,
            vec![
                PathBuf::from("/media/season/ep01.mov"),
                PathBuf::from("/media/season/ep02.mov")
            ]
        );
        h.shutdown.cancel();
    }

    #[cfg(feature = "scan-runtime")]
    #[test]
    fn rename_both_splits_into_remove_and_touch() {
        use notify::event::{EventKind, ModifyKind, RenameMode};

        let event = notify::Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path("/media/old.mov".into())
            .add_path("/media/new.mov".into());
        assert_eq!(
            native::classify(event),
            vec![
                RawChange::Removed("/media/old.mov".into()),
                RawChange::Touched("/media/new.mov".into())
            ]
        );

        let access = notify::Event::new(EventKind::Access(notify::event::AccessKind::Any))
            .add_path("/media/a.mov".into());
        assert!(native::classify(access).is_empty());
    }
}
