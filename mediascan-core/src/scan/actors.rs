//! Enrichment seams invoked by the pipeline for every changed file.

use std::path::PathBuf;

use async_trait::async_trait;
use mediascan_model::{ClipSummary, MediaInfo, RecordId};

use crate::error::Result;

/// A file that needs (re)computing, with the stat it was observed at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanJob {
    pub id: RecordId,
    pub path: PathBuf,
    pub size: u64,
    pub modified_ms: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedInfo {
    pub summary: ClipSummary,
    /// Extended report. `None` when disabled or when building it failed.
    pub mediainfo: Option<MediaInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedThumbnail {
    pub png: Vec<u8>,
    pub size: u64,
    pub modified_ms: i64,
}

#[async_trait]
pub trait InfoActor: Send + Sync {
    async fn extract(&self, job: &ScanJob) -> Result<ExtractedInfo>;
}

#[async_trait]
pub trait ThumbnailActor: Send + Sync {
    async fn generate(&self, job: &ScanJob) -> Result<ExtractedThumbnail>;
}
