use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use futures::StreamExt;
use mediascan_model::{MediaRecord, RecordId};
use tokio::sync::{RwLock, broadcast};
use tokio_stream::wrappers::BroadcastStream;
use tracing::warn;

use super::{ChangeEvent, ChangeStream, RecordStore};
use crate::error::{MediaError, Result};

const CHANGE_FEED_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
struct Slot {
    revision: u64,
    record: Option<MediaRecord>,
}

/// Process-local store backed by an ordered map.
///
/// Used when no database is configured and as the test double for every
/// component that talks to a [`RecordStore`].
pub struct MemoryRecordStore {
    slots: RwLock<BTreeMap<RecordId, Slot>>,
    changes: broadcast::Sender<ChangeEvent>,
}

impl Default for MemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MemoryRecordStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryRecordStore")
            .field("subscribers", &self.changes.receiver_count())
            .finish()
    }
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self {
            slots: RwLock::new(BTreeMap::new()),
            changes,
        }
    }

    /// Number of live records.
    pub async fn len(&self) -> usize {
        self.slots
            .read()
            .await
            .values()
            .filter(|slot| slot.record.is_some())
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Latest revision for `id`, tombstones included.
    pub async fn revision(&self, id: &RecordId) -> Option<u64> {
        self.slots.read().await.get(id).map(|slot| slot.revision)
    }

    fn publish(&self, event: ChangeEvent) {
        // No receivers is fine.
        let _ = self.changes.send(event);
    }

    fn tombstone(slots: &mut BTreeMap<RecordId, Slot>, record: &MediaRecord) -> Result<()> {
        let slot = slots
            .get_mut(&record.id)
            .filter(|slot| slot.record.is_some())
            .ok_or_else(|| MediaError::NotFound(record.id.clone()))?;
        if record.revision != Some(slot.revision) {
            return Err(MediaError::Conflict(record.id.clone()));
        }
        slot.revision += 1;
        slot.record = None;
        Ok(())
    }

    fn deleted_event(id: &RecordId) -> ChangeEvent {
        ChangeEvent {
            id: id.clone(),
            deleted: true,
            doc: None,
        }
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn get(&self, id: &RecordId) -> Result<Option<MediaRecord>> {
        Ok(self
            .slots
            .read()
            .await
            .get(id)
            .and_then(|slot| slot.record.clone()))
    }

    async fn put(&self, record: &MediaRecord) -> Result<u64> {
        let mut slots = self.slots.write().await;
        let current = slots.get(&record.id);

        let next = match (current, record.revision) {
            (Some(Slot { record: Some(_), revision }), Some(expected))
                if *revision == expected =>
            {
                revision + 1
            }
            (Some(Slot { record: None, revision }), None) => revision + 1,
            (None, None) => 1,
            _ => return Err(MediaError::Conflict(record.id.clone())),
        };

        let mut stored = record.clone();
        stored.revision = Some(next);
        slots.insert(
            record.id.clone(),
            Slot {
                revision: next,
                record: Some(stored.clone()),
            },
        );
        // Published under the write guard so the feed follows commit order.
        self.publish(ChangeEvent {
            id: record.id.clone(),
            deleted: false,
            doc: Some(stored),
        });
        drop(slots);
        Ok(next)
    }

    async fn remove(&self, record: &MediaRecord) -> Result<()> {
        let mut slots = self.slots.write().await;
        Self::tombstone(&mut slots, record)?;
        self.publish(Self::deleted_event(&record.id));
        drop(slots);
        Ok(())
    }

    async fn list_page(
        &self,
        after: Option<RecordId>,
        limit: usize,
    ) -> Result<Vec<MediaRecord>> {
        use std::ops::Bound;

        let lower = match after {
            Some(id) => Bound::Excluded(id),
            None => Bound::Unbounded,
        };
        let slots = self.slots.read().await;
        Ok(slots
            .range((lower, Bound::Unbounded))
            .filter_map(|(_, slot)| slot.record.clone())
            .take(limit)
            .collect())
    }

    async fn bulk_delete(&self, records: Vec<MediaRecord>) -> Result<usize> {
        let mut slots = self.slots.write().await;
        let mut deleted = Vec::with_capacity(records.len());
        for record in &records {
            match Self::tombstone(&mut slots, record) {
                Ok(()) => deleted.push(record.id.clone()),
                Err(err) => warn!(id = %record.id, error = %err, "Skipping bulk delete row"),
            }
        }
        let count = deleted.len();
        for id in deleted {
            self.publish(Self::deleted_event(&id));
        }
        drop(slots);
        Ok(count)
    }

    async fn subscribe_changes(&self) -> Result<ChangeStream> {
        let stream = BroadcastStream::new(self.changes.subscribe()).filter_map(
            |item| async move {
                match item {
                    Ok(event) => Some(event),
                    Err(err) => {
                        warn!(error = %err, "Change feed subscriber lagged");
                        None
                    }
                }
            },
        );
        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str) -> MediaRecord {
        MediaRecord::new(RecordId::new(id))
    }

    #[tokio::test]
    async fn put_assigns_increasing_revisions() {
        let store = MemoryRecordStore::new();
        let first = store.put(&record("A")).await.unwrap();
        assert_eq!(first, 1);

        let mut current = store.get(&RecordId::new("A")).await.unwrap().unwrap();
        assert_eq!(current.revision, Some(1));
        current.media_size = Some(10);
        assert_eq!(store.put(&current).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn stale_revision_conflicts() {
        let store = MemoryRecordStore::new();
        store.put(&record("A")).await.unwrap();
        let stale = store.get(&RecordId::new("A")).await.unwrap().unwrap();
        store.put(&stale).await.unwrap();

        assert!(matches!(
            store.put(&stale).await,
            Err(MediaError::Conflict(_))
        ));
        assert!(matches!(
            store.put(&record("A")).await,
            Err(MediaError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn tombstones_hide_and_allow_recreate() {
        let store = MemoryRecordStore::new();
        store.put(&record("A")).await.unwrap();
        let current = store.get(&RecordId::new("A")).await.unwrap().unwrap();
        store.remove(&current).await.unwrap();

        assert!(store.get(&RecordId::new("A")).await.unwrap().is_none());
        assert!(store.list_page(None, 10).await.unwrap().is_empty());
        assert!(matches!(
            store.remove(&current).await,
            Err(MediaError::NotFound(_))
        ));

        assert_eq!(store.put(&record("A")).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn list_page_is_ordered_and_exclusive() {
        let store = MemoryRecordStore::new();
        for id in ["C", "A", "B", "D"] {
            store.put(&record(id)).await.unwrap();
        }

        let page = store.list_page(None, 2).await.unwrap();
        let ids: Vec<_> = page.iter().map(|r| r.id.as_str().to_string()).collect();
        assert_eq!(ids, ["A", "B"]);

        let page = store.list_page(Some(RecordId::new("B")), 10).await.unwrap();
        let ids: Vec<_> = page.iter().map(|r| r.id.as_str().to_string()).collect();
        assert_eq!(ids, ["C", "D"]);
    }

    #[tokio::test]
    async fn bulk_delete_skips_stale_rows() {
        let store = MemoryRecordStore::new();
        store.put(&record("A")).await.unwrap();
        store.put(&record("B")).await.unwrap();
        let rows = store.list_page(None, 10).await.unwrap();

        let mut fresh_b = store.get(&RecordId::new("B")).await.unwrap().unwrap();
        fresh_b.media_size = Some(1);
        store.put(&fresh_b).await.unwrap();

        assert_eq!(store.bulk_delete(rows).await.unwrap(), 1);
        assert!(store.get(&RecordId::new("A")).await.unwrap().is_none());
        assert!(store.get(&RecordId::new("B")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn change_feed_reports_commits_in_order() {
        let store = MemoryRecordStore::new();
        let mut feed = store.subscribe_changes().await.unwrap();

        store.put(&record("A")).await.unwrap();
        let current = store.get(&RecordId::new("A")).await.unwrap().unwrap();
        store.remove(&current).await.unwrap();

        let added = feed.next().await.unwrap();
        assert_eq!(added.id, RecordId::new("A"));
        assert!(!added.deleted);
        assert_eq!(added.doc.and_then(|doc| doc.revision), Some(1));

        let removed = feed.next().await.unwrap();
        assert!(removed.deleted);
        assert!(removed.doc.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_writers_publish_in_revision_order() {
        let store = std::sync::Arc::new(MemoryRecordStore::new());
        let mut feed = store.subscribe_changes().await.unwrap();
        store.put(&record("A")).await.unwrap();

        let writers: Vec<_> = (0..16u64)
            .map(|size| {
                let store = store.clone();
                tokio::spawn(async move {
                    loop {
                        let mut current = store.get(&RecordId::new("A")).await.unwrap().unwrap();
                        current.media_size = Some(size);
                        match store.put(&current).await {
                            Ok(_) => return,
                            Err(MediaError::Conflict(_)) => tokio::task::yield_now().await,
                            Err(err) => panic!("unexpected error: {err}"),
                        }
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.await.unwrap();
        }

        let mut revisions = Vec::new();
        for _ in 0..17 {
            let event = feed.next().await.unwrap();
            revisions.push(event.doc.and_then(|doc| doc.revision).unwrap());
        }
        assert_eq!(revisions, (1..=17).collect::<Vec<u64>>());
    }
}
