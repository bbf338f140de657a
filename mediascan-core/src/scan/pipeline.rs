use std::path::Path;
use std::sync::Arc;

use mediascan_model::{
    MediaRecord, RecordId, encode_cinf, encode_tinf, is_within_root, local_time,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span};

use super::actors::{ExtractedInfo, ExtractedThumbnail, InfoActor, ScanJob, ThumbnailActor};
use super::fs_watch::{FileStat, WatchEvent};
use super::sweeper::SWEEP_PAGE_SIZE;
use crate::context::ScanContext;
use crate::error::Result;
use crate::metadata::MetadataExtractor;
use crate::thumbnail::ThumbnailGenerator;
use crate::tools::ToolRunner;

/// What handling one event amounted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
    /// Record written at this revision.
    Scanned { revision: u64 },
    /// Stored size and mtime already match.
    Unchanged,
    /// Id already belongs to a different source file.
    Collision,
    Directory,
    /// Path does not map to an id under the media root.
    Ignored,
    Removed,
    /// Removal for a path that has no record.
    AlreadyGone,
}

/// Single consumer of the watch queue. Events are handled strictly one at a
/// time, in arrival order.
pub struct ScanPipeline {
    ctx: ScanContext,
    info: Arc<dyn InfoActor>,
    thumbnails: Arc<dyn ThumbnailActor>,
}

impl std::fmt::Debug for ScanPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanPipeline")
            .field("media_root", &self.ctx.options.scanner.media_root())
            .finish_non_exhaustive()
    }
}

impl ScanPipeline {
    pub fn new(
        ctx: ScanContext,
        info: Arc<dyn InfoActor>,
        thumbnails: Arc<dyn ThumbnailActor>,
    ) -> Self {
        Self {
            ctx,
            info,
            thumbnails,
        }
    }

    /// Pipeline backed by ffprobe/ffmpeg as configured.
    pub fn with_tools(ctx: ScanContext) -> Self {
        let runner = ToolRunner::new(&ctx.options.tools);
        let info = MetadataExtractor::new(runner.clone(), ctx.options.metadata.clone());
        let thumbnails = ThumbnailGenerator::new(runner, ctx.options.thumbnails.clone());
        Self::new(ctx, Arc::new(info), Arc::new(thumbnails))
    }

    /// Drain `events` until the queue closes or `shutdown` fires.
    pub async fn run(&self, mut events: mpsc::Receiver<WatchEvent>, shutdown: CancellationToken) {
        loop {
            let event = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            let path = event.path().to_path_buf();
            if let Err(err) = self.handle(event).await {
                error!(path = %path.display(), error = %err, "Failed to process event");
            }
        }
        debug!("Scan pipeline stopped");
    }

    pub async fn handle(&self, event: WatchEvent) -> Result<ScanOutcome> {
        match event {
            WatchEvent::Removed { path } => self.remove(&path).await,
            WatchEvent::Upsert { path, stat } => self.scan(&path, stat).await,
        }
    }

    fn record_id(&self, path: &Path) -> Option<RecordId> {
        match RecordId::from_path(self.ctx.options.scanner.media_root(), path) {
            Ok(id) => Some(id),
            Err(err) => {
                debug!(path = %path.display(), error = %err, "Ignoring path outside media root");
                None
            }
        }
    }

    async fn remove(&self, path: &Path) -> Result<ScanOutcome> {
        let Some(id) = self.record_id(path) else {
            return Ok(ScanOutcome::Ignored);
        };
        if let Some(current) = self.ctx.store.get(&id).await?
            && !current.conflicts_with(path)
        {
            self.ctx.store.remove(&current).await?;
            info!(id = %id, path = %path.display(), "Removed");
            return Ok(ScanOutcome::Removed);
        }
        self.remove_nested(path).await
    }

    /// Tombstone every record whose source file lies below `dir`. The watcher
    /// reports a deleted directory once, not once per file inside it.
    async fn remove_nested(&self, dir: &Path) -> Result<ScanOutcome> {
        let prefix = RecordId::child_prefix(self.ctx.options.scanner.media_root(), dir)?;
        let mut cursor = Some(RecordId::new(prefix.clone()));
        let mut removed = 0;

        loop {
            let page = self.ctx.store.list_page(cursor.take(), SWEEP_PAGE_SIZE).await?;
            let fetched = page.len();
            let Some(last) = page.last().map(|record| record.id.clone()) else {
                break;
            };
            let past_prefix = !last.as_str().starts_with(&prefix);

            let nested: Vec<MediaRecord> = page
                .into_iter()
                .filter(|record| record.id.as_str().starts_with(&prefix))
                .filter(|record| {
                    record
                        .media_path
                        .as_deref()
                        .is_some_and(|source| is_within_root(dir, source))
                })
                .collect();
            if !nested.is_empty() {
                removed += self.ctx.store.bulk_delete(nested).await?;
            }

            if past_prefix || fetched < SWEEP_PAGE_SIZE {
                break;
            }
            cursor = Some(last);
        }

        if removed == 0 {
            return Ok(ScanOutcome::AlreadyGone);
        }
        info!(path = %dir.display(), records = removed, "Removed directory");
        Ok(ScanOutcome::Removed)
    }

    async fn scan(&self, path: &Path, stat: FileStat) -> Result<ScanOutcome> {
        let Some(id) = self.record_id(path) else {
            return Ok(ScanOutcome::Ignored);
        };
        if stat.is_dir {
            return Ok(ScanOutcome::Directory);
        }

        let span = info_span!(
            "scan",
            id = %id,
            path = %path.display(),
            size = stat.size,
            mtime = stat.modified_ms
        );
        self.scan_file(id, path, stat).instrument(span).await
    }

    async fn scan_file(&self, id: RecordId, path: &Path, stat: FileStat) -> Result<ScanOutcome> {
        let mut record = self
            .ctx
            .store
            .get(&id)
            .await?
            .unwrap_or_else(|| MediaRecord::new(id.clone()));

        if record.conflicts_with(path) {
            info!(
                stored = %record.media_path.as_deref().unwrap_or(path).display(),
                "Skipped"
            );
            return Ok(ScanOutcome::Collision);
        }

        if record.matches_stat(stat.size, stat.modified_ms) {
            return Ok(ScanOutcome::Unchanged);
        }

        record.media_path = Some(path.to_path_buf());
        record.media_size = Some(stat.size);
        record.media_time = Some(stat.modified_ms);

        let job = ScanJob {
            id,
            path: path.to_path_buf(),
            size: stat.size,
            modified_ms: stat.modified_ms,
        };
        let (info, thumbnail) = tokio::join!(self.info.extract(&job), self.thumbnails.generate(&job));

        let thumbnail = match thumbnail {
            Ok(thumbnail) => Some(thumbnail),
            Err(err) => {
                error!(error = %err, "Thumbnail Failed");
                None
            }
        };
        let info = match info {
            Ok(info) => Some(info),
            Err(err) => {
                error!(error = %err, "Info Failed");
                None
            }
        };
        apply_enrichment(&mut record, &job, info, thumbnail);

        let revision = self.ctx.store.put(&record).await?;
        info!(revision, "Scanned");
        Ok(ScanOutcome::Scanned { revision })
    }
}

/// Fold actor results into `record`. Fields of a failed actor keep their
/// previous values.
fn apply_enrichment(
    record: &mut MediaRecord,
    job: &ScanJob,
    info: Option<ExtractedInfo>,
    thumbnail: Option<ExtractedThumbnail>,
) {
    let thumb_time = thumbnail.as_ref().map(|t| t.modified_ms);

    if let Some(thumbnail) = thumbnail {
        let taken = local_time(thumbnail.modified_ms).unwrap_or_default();
        record.tinf = Some(encode_tinf(&job.id, taken, thumbnail.size));
        record.thumb_size = Some(thumbnail.size);
        record.thumb_time = Some(thumbnail.modified_ms);
        record.set_thumbnail(thumbnail.png);
    }

    if let Some(info) = info {
        let changed = local_time(thumb_time.unwrap_or(job.modified_ms)).unwrap_or_default();
        record.cinf = Some(encode_cinf(&job.id, &info.summary, job.size, changed));
        if let Some(mediainfo) = info.mediainfo {
            record.mediainfo = Some(mediainfo);
        }
    }
}
