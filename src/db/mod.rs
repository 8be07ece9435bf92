use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use thiserror::Error;

use crate::config::DatabaseConfig;
use crate::models::{FileId, FileRecord};

pub use operations::*;
pub use pool::*;

pub mod operations;
pub mod pool;

#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("file record not found")]
    NotFound,

    #[error("corrupt file record: {0}")]
    Corrupt(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

/// Durable file records, queryable by id, by tag and by expiry.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn insert(&self, record: &FileRecord) -> Result<(), MetadataError>;

    async fn find_by_id(&self, id: &FileId) -> Result<FileRecord, MetadataError>;

    /// Live record (`expires_at >= now`) with the greatest `created_at`
    /// carrying `tag`. Ties go to the most recently inserted record.
    async fn find_latest_by_tag(
        &self,
        tag: &str,
        now: DateTime<Utc>,
    ) -> Result<FileRecord, MetadataError>;

    /// Records with `expires_at >= now`, newest first.
    async fn list_active(&self, now: DateTime<Utc>) -> Result<Vec<FileRecord>, MetadataError>;

    /// Records with `expires_at < now`, oldest expiry first.
    async fn list_expired(&self, now: DateTime<Utc>) -> Result<Vec<FileRecord>, MetadataError>;

    async fn delete(&self, id: &FileId) -> Result<(), MetadataError>;
}

pub async fn create_pool(config: &DatabaseConfig) -> Result<SqlitePool> {
    if let Some(parent) = Path::new(&config.path).parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }

    let options = SqliteConnectOptions::new()
        .filename(&config.path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .connect_with(options)
        .await?;

    // Test connection
    health_check(&pool).await?;

    Ok(pool)
}
