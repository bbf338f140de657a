use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use mediascan_model::{MediaRecord, is_within_root};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::context::ScanContext;
use crate::error::Result;
use crate::fs::FileSystem;
use crate::store::RecordStore;

/// Records requested per listing round trip.
pub const SWEEP_PAGE_SIZE: usize = 256;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: usize,
    pub deleted: usize,
}

/// Deletes records whose source file is gone or lies outside the media root.
pub struct ReconciliationSweeper {
    store: Arc<dyn RecordStore>,
    fs: Arc<dyn FileSystem>,
    media_root: PathBuf,
    page_size: usize,
}

impl std::fmt::Debug for ReconciliationSweeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconciliationSweeper")
            .field("media_root", &self.media_root)
            .field("page_size", &self.page_size)
            .finish_non_exhaustive()
    }
}

impl ReconciliationSweeper {
    pub fn new(store: Arc<dyn RecordStore>, fs: Arc<dyn FileSystem>, media_root: PathBuf) -> Self {
        Self {
            store,
            fs,
            media_root,
            page_size: SWEEP_PAGE_SIZE,
        }
    }

    pub fn from_context(ctx: &ScanContext) -> Self {
        Self::new(
            Arc::clone(&ctx.store),
            Arc::clone(&ctx.fs),
            ctx.options.scanner.media_root().to_path_buf(),
        )
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// One full pass over the store in id order.
    pub async fn sweep(&self) -> Result<SweepReport> {
        info!("Checking for dead media");
        let mut report = SweepReport::default();
        let mut cursor = None;

        loop {
            let page = self.store.list_page(cursor.clone(), self.page_size).await?;
            let fetched = page.len();
            cursor = page.last().map(|record| record.id.clone());
            report.scanned += fetched;

            let alive = join_all(page.iter().map(|record| self.is_alive(record))).await;
            let dead: Vec<MediaRecord> = page
                .into_iter()
                .zip(alive)
                .filter_map(|(record, alive)| (!alive).then_some(record))
                .collect();

            if !dead.is_empty() {
                for record in &dead {
                    debug!(id = %record.id, "Dead media");
                }
                report.deleted += self.store.bulk_delete(dead).await?;
            }

            if fetched < self.page_size {
                break;
            }
        }

        info!(
            scanned = report.scanned,
            deleted = report.deleted,
            "Finished check for dead media"
        );
        Ok(report)
    }

    async fn is_alive(&self, record: &MediaRecord) -> bool {
        let Some(path) = record.media_path.as_deref() else {
            return false;
        };
        self.is_within_root(path) && self.fs.path_exists(path).await
    }

    fn is_within_root(&self, path: &Path) -> bool {
        is_within_root(&self.media_root, path)
    }

    /// Sweep every `interval` until `shutdown` fires. The first pass runs
    /// after one full interval.
    pub async fn run_periodic(&self, interval: Duration, shutdown: CancellationToken) {
        let start = tokio::time::Instant::now() + interval;
        let mut ticker = tokio::time::interval_at(start, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(err) = self.sweep().await {
                        error!(error = %err, "Sweep failed");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::InMemoryFs;
    use crate::store::{MemoryRecordStore, MockRecordStore};
    use mediascan_model::RecordId;

    async fn seed(store: &MemoryRecordStore, id: &str, path: Option<&str>) {
        let mut record = MediaRecord::new(RecordId::new(id));
        record.media_path = path.map(PathBuf::from);
        store.put(&record).await.unwrap();
    }

    #[tokio::test]
    async fn removes_missing_foreign_and_pathless_records() {
        let store = Arc::new(MemoryRecordStore::new());
        let fs = Arc::new(InMemoryFs::new());
        fs.add_file("/media/keep.mov", 1);
        fs.add_file("/other/outside.mov", 1);

        seed(&store, "KEEP", Some("/media/keep.mov")).await;
        seed(&store, "GONE", Some("/media/gone.mov")).await;
        seed(&store, "OUTSIDE", Some("/other/outside.mov")).await;
        seed(&store, "NOPATH", None).await;

        let sweeper = ReconciliationSweeper::new(store.clone(), fs, "/media".into());
        let report = sweeper.sweep().await.unwrap();

        assert_eq!(report, SweepReport { scanned: 4, deleted: 3 });
        assert_eq!(store.len().await, 1);
        assert!(store.get(&RecordId::new("KEEP")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn every_record_is_visited_across_pages() {
        let store = Arc::new(MemoryRecordStore::new());
        let fs = Arc::new(InMemoryFs::new());
        for i in 0..10 {
            let path = format!("/media/clip{i:02}.mov");
            if i % 2 == 0 {
                fs.add_file(path.as_str(), 1);
            }
            seed(&store, &format!("CLIP{i:02}"), Some(&path)).await;
        }

        let sweeper =
            ReconciliationSweeper::new(store.clone(), fs, "/media".into()).with_page_size(3);
        let report = sweeper.sweep().await.unwrap();
        assert_eq!(report, SweepReport { scanned: 10, deleted: 5 });

        let again = sweeper.sweep().await.unwrap();
        assert_eq!(again, SweepReport { scanned: 5, deleted: 0 });
    }

    #[tokio::test]
    async fn cursor_is_last_id_of_previous_page() {
        let mut store = MockRecordStore::new();
        let mut seq = mockall::Sequence::new();
        let page = |ids: &[&str]| {
            ids.iter()
                .map(|id| {
                    let mut record = MediaRecord::new(RecordId::new(*id));
                    record.media_path = Some(PathBuf::from(format!("/media/{id}.mov")));
                    record
                })
                .collect::<Vec<_>>()
        };
        let first = page(&["A", "B"]);
        let second = page(&["C"]);
        store
            .expect_list_page()
            .withf(|after, limit| after.is_none() && *limit == 2)
            .times(1)
            .in_sequence(&mut seq)
            .returning(move |_, _| Ok(first.clone()));
        store
            .expect_list_page()
            .withf(|after, _| after.as_ref().map(RecordId::as_str) == Some("B"))
            .times(1)
            .in_sequence(&mut seq)
            .returning(move |_, _| Ok(second.clone()));
        store.expect_bulk_delete().never();

        let fs = Arc::new(InMemoryFs::new());
        for name in ["A", "B", "C"] {
            fs.add_file(format!("/media/{name}.mov"), 1);
        }
        let sweeper =
            ReconciliationSweeper::new(Arc::new(store), fs, "/media".into()).with_page_size(2);
        assert_eq!(
            sweeper.sweep().await.unwrap(),
            SweepReport { scanned: 3, deleted: 0 }
        );
    }

    #[tokio::test]
    async fn empty_store_finishes_immediately() {
        let sweeper = ReconciliationSweeper::new(
            Arc::new(MemoryRecordStore::new()),
            Arc::new(InMemoryFs::new()),
            "/media".into(),
        );
        assert_eq!(sweeper.sweep().await.unwrap(), SweepReport::default());
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_sweep_stops_on_shutdown() {
        let store = Arc::new(MemoryRecordStore::new());
        seed(&store, "GONE", Some("/media/gone.mov")).await;
        let sweeper = Arc::new(ReconciliationSweeper::new(
            store.clone(),
            Arc::new(InMemoryFs::new()),
            "/media".into(),
        ));

        let shutdown = CancellationToken::new();
        let task = tokio::spawn({
            let sweeper = Arc::clone(&sweeper);
            let shutdown = shutdown.clone();
            async move { sweeper.run_periodic(Duration::from_secs(60), shutdown).await }
        });

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(store.len().await, 1);
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(store.is_empty().await);

        shutdown.cancel();
        task.await.unwrap();
    }
}
