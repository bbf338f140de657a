//! Document store port consumed by the pipeline, the sweeper and the
//! watchdog.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use mediascan_model::{MediaRecord, RecordId};

use crate::error::Result;

pub mod memory;
#[cfg(feature = "database")]
pub mod postgres;

pub use memory::MemoryRecordStore;
#[cfg(feature = "database")]
pub use postgres::PostgresRecordStore;

/// One committed change, in the store's commit order.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub id: RecordId,
    pub deleted: bool,
    /// Document as committed. Always `None` for deletions.
    pub doc: Option<MediaRecord>,
}

/// Live feed of [`ChangeEvent`]s starting at the moment of subscription.
pub type ChangeStream = Pin<Box<dyn Stream<Item = ChangeEvent> + Send>>;

/// Revisioned document store.
///
/// Revisions increase monotonically per id. Writes carry the revision they
/// were read at, so a stale writer gets [`MediaError::Conflict`] instead of
/// clobbering a newer document. Deleted documents are tombstones: invisible
/// to reads and listings, and recreatable without a revision.
///
/// [`MediaError::Conflict`]: crate::error::MediaError::Conflict
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn get(&self, id: &RecordId) -> Result<Option<MediaRecord>>;

    /// Create or update `record`, returning its new revision.
    async fn put(&self, record: &MediaRecord) -> Result<u64>;

    /// Tombstone `record` at the revision it was read at.
    async fn remove(&self, record: &MediaRecord) -> Result<()>;

    /// Live records with ids strictly greater than `after`, ordered by id.
    async fn list_page(
        &self,
        after: Option<RecordId>,
        limit: usize,
    ) -> Result<Vec<MediaRecord>>;

    /// Tombstone a batch in one round trip. Rows whose revision moved on are
    /// left alone. Returns the number of rows deleted.
    async fn bulk_delete(&self, records: Vec<MediaRecord>) -> Result<usize>;

    async fn subscribe_changes(&self) -> Result<ChangeStream>;
}
