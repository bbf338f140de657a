use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use mediascan_model::{MediaRecord, RecordId};
use serde::Deserialize;
use sqlx::postgres::{PgListener, PgPoolOptions};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use tracing::{debug, info, warn};

use super::{ChangeEvent, ChangeStream, RecordStore};
use crate::error::{MediaError, Result};

/// Channel the `media_records` trigger publishes on.
pub const CHANGE_CHANNEL: &str = "media_record_changes";

const RECONNECT_DELAY: Duration = Duration::from_secs(1);

pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// [`RecordStore`] backed by a PostgreSQL table with a `LISTEN/NOTIFY`
/// change feed.
#[derive(Clone)]
pub struct PostgresRecordStore {
    pool: PgPool,
}

impl fmt::Debug for PostgresRecordStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresRecordStore")
            .field("pool_size", &self.pool.size())
            .field("idle_connections", &self.pool.num_idle())
            .finish()
    }
}

#[derive(Debug, FromRow)]
struct RecordRow {
    revision: i64,
    doc: Option<Json<MediaRecord>>,
}

impl RecordRow {
    fn into_record(self) -> Option<MediaRecord> {
        let Json(mut record) = self.doc?;
        record.revision = Some(self.revision as u64);
        Some(record)
    }
}

#[derive(Debug, Deserialize)]
struct ChangeNotification {
    id: String,
    deleted: bool,
}

impl PostgresRecordStore {
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(2))
            .acquire_timeout(Duration::from_secs(30))
            .connect(url)
            .await?;
        info!(max_connections, "Connected to record database");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply embedded migrations.
    pub async fn initialize_schema(&self) -> Result<()> {
        MIGRATOR.run(&self.pool).await?;
        Ok(())
    }

    async fn fetch(pool: &PgPool, id: &str) -> Result<Option<MediaRecord>> {
        let row = sqlx::query_as::<_, RecordRow>(
            "SELECT revision, doc FROM media_records WHERE id = $1 AND NOT deleted",
        )
        .bind(id)
        .fetch_optional(pool)
        .await?;
        Ok(row.and_then(RecordRow::into_record))
    }
}

/// Strip the revision so it is never persisted inside the document itself.
fn document(record: &MediaRecord) -> Json<MediaRecord> {
    let mut doc = record.clone();
    doc.revision = None;
    Json(doc)
}

#[async_trait]
impl RecordStore for PostgresRecordStore {
    async fn get(&self, id: &RecordId) -> Result<Option<MediaRecord>> {
        Self::fetch(&self.pool, id.as_str()).await
    }

    async fn put(&self, record: &MediaRecord) -> Result<u64> {
        let revision = match record.revision {
            None => {
                sqlx::query_scalar::<_, i64>(
                    r#"
                    INSERT INTO media_records (id, revision, deleted, doc, updated_at)
                    VALUES ($1, 1, FALSE, $2, now())
                    ON CONFLICT (id) DO UPDATE
                        SET revision = media_records.revision + 1,
                            deleted = FALSE,
                            doc = EXCLUDED.doc,
                            updated_at = now()
                        WHERE media_records.deleted
                    RETURNING revision
                    "#,
                )
                .bind(record.id.as_str())
                .bind(document(record))
                .fetch_optional(&self.pool)
                .await?
            }
            Some(expected) => {
                sqlx::query_scalar::<_, i64>(
                    r#"
                    UPDATE media_records
                    SET revision = revision + 1, doc = $2, updated_at = now()
                    WHERE id = $1 AND revision = $3 AND NOT deleted
                    RETURNING revision
                    "#,
                )
                .bind(record.id.as_str())
                .bind(document(record))
                .bind(expected as i64)
                .fetch_optional(&self.pool)
                .await?
            }
        };

        revision
            .map(|rev| rev as u64)
            .ok_or_else(|| MediaError::Conflict(record.id.clone()))
    }

    async fn remove(&self, record: &MediaRecord) -> Result<()> {
        let expected = record
            .revision
            .ok_or_else(|| MediaError::Conflict(record.id.clone()))?;

        let result = sqlx::query(
            r#"
            UPDATE media_records
            SET deleted = TRUE, doc = NULL, revision = revision + 1, updated_at = now()
            WHERE id = $1 AND revision = $2 AND NOT deleted
            "#,
        )
        .bind(record.id.as_str())
        .bind(expected as i64)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(());
        }
        match Self::fetch(&self.pool, record.id.as_str()).await? {
            Some(_) => Err(MediaError::Conflict(record.id.clone())),
            None => Err(MediaError::NotFound(record.id.clone())),
        }
    }

    async fn list_page(
        &self,
        after: Option<RecordId>,
        limit: usize,
    ) -> Result<Vec<MediaRecord>> {
        let rows = sqlx::query_as::<_, RecordRow>(
            r#"
            SELECT revision, doc
            FROM media_records
            WHERE NOT deleted
              AND ($1::text IS NULL OR id COLLATE "C" > $1::text COLLATE "C")
            ORDER BY id COLLATE "C"
            LIMIT $2
            "#,
        )
        .bind(after.map(RecordId::into_inner))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().filter_map(RecordRow::into_record).collect())
    }

    async fn bulk_delete(&self, records: Vec<MediaRecord>) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }
        let (ids, revisions): (Vec<String>, Vec<i64>) = records
            .into_iter()
            .filter_map(|record| {
                let revision = record.revision? as i64;
                Some((record.id.into_inner(), revision))
            })
            .unzip();

        let result = sqlx::query(
            r#"
            UPDATE media_records AS m
            SET deleted = TRUE, doc = NULL, revision = m.revision + 1, updated_at = now()
            FROM UNNEST($1::text[], $2::bigint[]) AS t(id, revision)
            WHERE m.id = t.id AND m.revision = t.revision AND NOT m.deleted
            "#,
        )
        .bind(&ids)
        .bind(&revisions)
        .execute(&self.pool)
        .await?;

        let deleted = result.rows_affected() as usize;
        if deleted < ids.len() {
            debug!(
                requested = ids.len(),
                deleted, "Bulk delete skipped rows that changed concurrently"
            );
        }
        Ok(deleted)
    }

    async fn subscribe_changes(&self) -> Result<ChangeStream> {
        let mut listener = PgListener::connect_with(&self.pool).await?;
        listener.listen(CHANGE_CHANNEL).await?;
        let pool = self.pool.clone();

        let stream = async_stream::stream! {
            loop {
                let notification = match listener.recv().await {
                    Ok(notification) => notification,
                    Err(err) => {
                        warn!(error = %err, "Change feed connection lost, retrying");
                        tokio::time::sleep(RECONNECT_DELAY).await;
                        continue;
                    }
                };

                let change: ChangeNotification = match serde_json::from_str(notification.payload()) {
                    Ok(change) => change,
                    Err(err) => {
                        warn!(error = %err, payload = notification.payload(), "Ignoring malformed change notification");
                        continue;
                    }
                };

                let doc = if change.deleted {
                    None
                } else {
                    match Self::fetch(&pool, &change.id).await {
                        Ok(doc) => doc,
                        Err(err) => {
                            warn!(id = %change.id, error = %err, "Failed to load changed record");
                            None
                        }
                    }
                };

                yield ChangeEvent {
                    id: RecordId::new(change.id),
                    deleted: change.deleted,
                    doc,
                };
            }
        };

        Ok(Box::pin(stream))
    }
}
