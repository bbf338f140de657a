//! Filesystem watching, the per-file scan pipeline and reconciliation.

pub mod actors;
pub mod fs_watch;
pub mod pipeline;
pub mod sweeper;

pub use actors::{ExtractedInfo, ExtractedThumbnail, InfoActor, ScanJob, ThumbnailActor};
pub use fs_watch::{FileStat, RawChange, WatchEvent, spawn_stabilizer};
#[cfg(feature = "scan-runtime")]
pub use fs_watch::{FsWatchService, WatchHandle};
pub use pipeline::{ScanOutcome, ScanPipeline};
pub use sweeper::{ReconciliationSweeper, SWEEP_PAGE_SIZE, SweepReport};

#[cfg(feature = "scan-runtime")]
use tokio_util::sync::CancellationToken;

/// Reconcile once, then watch and scan until `shutdown` fires.
///
/// The sweep finishes before the first watch event is consumed. A failed
/// sweep is logged and watching starts anyway.
#[cfg(feature = "scan-runtime")]
pub async fn run_indexer(
    ctx: &crate::context::ScanContext,
    pipeline: &ScanPipeline,
    shutdown: CancellationToken,
) -> crate::error::Result<()> {
    if let Err(err) = ReconciliationSweeper::from_context(ctx).sweep().await {
        tracing::error!(error = %err, "Startup sweep failed");
    }

    let service = FsWatchService::new(ctx.options.scanner.clone(), std::sync::Arc::clone(&ctx.fs));
    let (handle, events) = service.start(shutdown.clone())?;
    pipeline.run(events, shutdown).await;
    handle.shutdown();
    Ok(())
}
