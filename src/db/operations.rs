use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use super::{MetadataError, MetadataStore};
use crate::models::{FileId, FileRecord};

const SELECT_FILES: &str =
    "SELECT id, name, tag, size, mime_type, created_at, expires_at FROM files";

/// SQLite-backed metadata store. Timestamps are stored as microseconds
/// since the Unix epoch so ordering and expiry checks stay numeric.
#[derive(Clone)]
pub struct SqliteMetadataStore {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct FileRow {
    id: String,
    name: String,
    tag: Option<String>,
    size: i64,
    mime_type: String,
    created_at: i64,
    expires_at: i64,
}

impl TryFrom<FileRow> for FileRecord {
    type Error = MetadataError;

    fn try_from(row: FileRow) -> Result<Self, Self::Error> {
        let id = FileId::parse(&row.id)
            .ok_or_else(|| MetadataError::Corrupt(format!("malformed id {:?}", row.id)))?;
        let size = u64::try_from(row.size)
            .map_err(|_| MetadataError::Corrupt(format!("negative size for {}", id)))?;

        Ok(FileRecord {
            size,
            created_at: from_micros(&id, row.created_at)?,
            expires_at: from_micros(&id, row.expires_at)?,
            id,
            name: row.name,
            tag: row.tag,
            mime_type: row.mime_type,
        })
    }
}

fn from_micros(id: &FileId, micros: i64) -> Result<DateTime<Utc>, MetadataError> {
    DateTime::<Utc>::from_timestamp_micros(micros)
        .ok_or_else(|| MetadataError::Corrupt(format!("timestamp out of range for {}", id)))
}

fn into_records(rows: Vec<FileRow>) -> Result<Vec<FileRecord>, MetadataError> {
    rows.into_iter().map(FileRecord::try_from).collect()
}

impl SqliteMetadataStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Apply the embedded schema migrations.
    pub async fn migrate(&self) -> Result<(), MetadataError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl MetadataStore for SqliteMetadataStore {
    async fn insert(&self, record: &FileRecord) -> Result<(), MetadataError> {
        let size = i64::try_from(record.size)
            .map_err(|_| MetadataError::Corrupt(format!("size overflow for {}", record.id)))?;

        sqlx::query(
            r#"
            INSERT INTO files (id, name, tag, size, mime_type, created_at, expires_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.id.as_str())
        .bind(&record.name)
        .bind(record.tag.as_deref())
        .bind(size)
        .bind(&record.mime_type)
        .bind(record.created_at.timestamp_micros())
        .bind(record.expires_at.timestamp_micros())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_id(&self, id: &FileId) -> Result<FileRecord, MetadataError> {
        let row = sqlx::query_as::<_, FileRow>(&format!("{SELECT_FILES} WHERE id = ?"))
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.ok_or(MetadataError::NotFound)?.try_into()
    }

    async fn find_latest_by_tag(
        &self,
        tag: &str,
        now: DateTime<Utc>,
    ) -> Result<FileRecord, MetadataError> {
        let row = sqlx::query_as::<_, FileRow>(&format!(
            "{SELECT_FILES} WHERE tag = ? AND expires_at >= ? \
             ORDER BY created_at DESC, rowid DESC LIMIT 1"
        ))
        .bind(tag)
        .bind(now.timestamp_micros())
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or(MetadataError::NotFound)?.try_into()
    }

    async fn list_active(&self, now: DateTime<Utc>) -> Result<Vec<FileRecord>, MetadataError> {
        let rows = sqlx::query_as::<_, FileRow>(&format!(
            "{SELECT_FILES} WHERE expires_at >= ? ORDER BY created_at DESC, rowid DESC"
        ))
        .bind(now.timestamp_micros())
        .fetch_all(&self.pool)
        .await?;

        into_records(rows)
    }

    async fn list_expired(&self, now: DateTime<Utc>) -> Result<Vec<FileRecord>, MetadataError> {
        let rows = sqlx::query_as::<_, FileRow>(&format!(
            "{SELECT_FILES} WHERE expires_at < ? ORDER BY expires_at ASC"
        ))
        .bind(now.timestamp_micros())
        .fetch_all(&self.pool)
        .await?;

        into_records(rows)
    }

    async fn delete(&self, id: &FileId) -> Result<(), MetadataError> {
        let result = sqlx::query("DELETE FROM files WHERE id = ?")
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(MetadataError::NotFound);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;
    use crate::db::create_pool;
    use chrono::{Duration, SubsecRound};
    use tempfile::TempDir;

    async fn test_store() -> (SqliteMetadataStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let config = DatabaseConfig {
            path: temp_dir.path().join("files.db").to_string_lossy().to_string(),
            max_connections: 1,
        };
        let store = SqliteMetadataStore::new(create_pool(&config).await.unwrap());
        store.migrate().await.unwrap();
        (store, temp_dir)
    }

    fn record(tag: Option<&str>, created_at: DateTime<Utc>, ttl: Duration) -> FileRecord {
        FileRecord {
            id: FileId::generate(),
            name: "report.pdf".to_string(),
            tag: tag.map(str::to_string),
            size: 42,
            mime_type: "application/pdf".to_string(),
            created_at,
            expires_at: created_at + ttl,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc::now().trunc_subsecs(6)
    }

    #[tokio::test]
    async fn test_insert_and_find_by_id() {
        let (store, _dir) = test_store().await;
        let stored = record(Some("nightly"), now(), Duration::hours(1));

        store.insert(&stored).await.unwrap();

        assert_eq!(store.find_by_id(&stored.id).await.unwrap(), stored);
    }

    #[tokio::test]
    async fn test_find_missing_id() {
        let (store, _dir) = test_store().await;
        let result = store.find_by_id(&FileId::generate()).await;
        assert!(matches!(result, Err(MetadataError::NotFound)));
    }

    #[tokio::test]
    async fn test_duplicate_id_is_rejected() {
        let (store, _dir) = test_store().await;
        let stored = record(None, now(), Duration::hours(1));

        store.insert(&stored).await.unwrap();
        let result = store.insert(&stored).await;

        assert!(matches!(result, Err(MetadataError::Database(_))));
    }

    #[tokio::test]
    async fn test_latest_by_tag_picks_newest() {
        let (store, _dir) = test_store().await;
        let base = now();
        let older = record(Some("release"), base, Duration::hours(1));
        let newer = record(Some("release"), base + Duration::seconds(5), Duration::hours(1));
        let other = record(Some("other"), base + Duration::seconds(10), Duration::hours(1));

        // Insertion order must not matter when timestamps differ
        store.insert(&newer).await.unwrap();
        store.insert(&older).await.unwrap();
        store.insert(&other).await.unwrap();

        let latest = store.find_latest_by_tag("release", base).await.unwrap();
        assert_eq!(latest.id, newer.id);
    }

    #[tokio::test]
    async fn test_latest_by_tag_tie_goes_to_last_insert() {
        let (store, _dir) = test_store().await;
        let at = now();
        let first = record(Some("same"), at, Duration::hours(1));
        let second = record(Some("same"), at, Duration::hours(1));

        store.insert(&first).await.unwrap();
        store.insert(&second).await.unwrap();

        for _ in 0..3 {
            let latest = store.find_latest_by_tag("same", at).await.unwrap();
            assert_eq!(latest.id, second.id);
        }
    }

    #[tokio::test]
    async fn test_latest_by_unknown_tag() {
        let (store, _dir) = test_store().await;
        store.insert(&record(None, now(), Duration::hours(1))).await.unwrap();

        let result = store.find_latest_by_tag("missing", now()).await;
        assert!(matches!(result, Err(MetadataError::NotFound)));
    }

    #[tokio::test]
    async fn test_latest_by_tag_skips_expired_records() {
        let (store, _dir) = test_store().await;
        let at = now();
        let older_live = record(Some("t"), at - Duration::minutes(5), Duration::hours(10));
        let newer_expired = record(Some("t"), at - Duration::minutes(1), Duration::seconds(1));

        store.insert(&older_live).await.unwrap();
        store.insert(&newer_expired).await.unwrap();

        let latest = store.find_latest_by_tag("t", at).await.unwrap();
        assert_eq!(latest.id, older_live.id);

        let later = at + Duration::hours(11);
        assert!(matches!(
            store.find_latest_by_tag("t", later).await,
            Err(MetadataError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_list_active_and_expired_partition() {
        let (store, _dir) = test_store().await;
        let at = now();
        let expired = record(None, at - Duration::hours(2), Duration::hours(1));
        let live_old = record(None, at - Duration::minutes(10), Duration::hours(1));
        let live_new = record(None, at, Duration::hours(1));

        for r in [&expired, &live_old, &live_new] {
            store.insert(r).await.unwrap();
        }

        let active: Vec<_> = store
            .list_active(at)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(active, vec![live_new.id.clone(), live_old.id.clone()]);

        let stale = store.list_expired(at).await.unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].id, expired.id);
    }

    #[tokio::test]
    async fn test_record_expiring_exactly_now_is_active() {
        let (store, _dir) = test_store().await;
        let at = now();
        let boundary = record(None, at - Duration::hours(1), Duration::hours(1));
        store.insert(&boundary).await.unwrap();

        assert_eq!(store.list_active(at).await.unwrap().len(), 1);
        assert!(store.list_expired(at).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_reports_missing_records() {
        let (store, _dir) = test_store().await;
        let stored = record(None, now(), Duration::hours(1));
        store.insert(&stored).await.unwrap();

        store.delete(&stored.id).await.unwrap();

        assert!(matches!(store.delete(&stored.id).await, Err(MetadataError::NotFound)));
        assert!(matches!(
            store.find_by_id(&stored.id).await,
            Err(MetadataError::NotFound)
        ));
    }
}
