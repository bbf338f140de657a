use std::fmt;
use std::sync::Arc;

use crate::config::ScanOptions;
use crate::fs::{FileSystem, RealFs};
use crate::store::RecordStore;

/// Process-wide handles shared by every component, created once at
/// startup.
#[derive(Clone)]
pub struct ScanContext {
    pub options: Arc<ScanOptions>,
    pub store: Arc<dyn RecordStore>,
    pub fs: Arc<dyn FileSystem>,
}

impl ScanContext {
    pub fn new(options: ScanOptions, store: Arc<dyn RecordStore>) -> Self {
        Self::with_fs(options, store, Arc::new(RealFs::new()))
    }

    pub fn with_fs(
        options: ScanOptions,
        store: Arc<dyn RecordStore>,
        fs: Arc<dyn FileSystem>,
    ) -> Self {
        Self {
            options: Arc::new(options),
            store,
            fs,
        }
    }
}

impl fmt::Debug for ScanContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanContext")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}
