//! Background reclamation of expired files.
//!
//! Download and tag resolution already refuse expired files on their own;
//! the sweeper only frees the disk space and rows of files nobody asks for.

use std::time::Duration;

use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};

use super::FileService;

/// Run [`FileService::purge_expired`] every `period`, forever.
pub async fn run_sweeper(service: FileService, period: Duration) {
    info!(period_secs = period.as_secs(), "Expired file sweeper started");

    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        if let Err(e) = service.purge_expired().await {
            error!(error = %e, "Expired file sweep failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;
    use crate::db::{create_pool, MetadataStore, SqliteMetadataStore};
    use crate::files::{LinkSigner, UploadRequest};
    use crate::storage::DiskBlobStore;
    use bytes::Bytes;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_sweeper_purges_in_background() {
        let dir = TempDir::new().unwrap();
        let config = DatabaseConfig {
            path: dir.path().join("files.db").to_string_lossy().to_string(),
            max_connections: 1,
        };
        let metadata = Arc::new(SqliteMetadataStore::new(create_pool(&config).await.unwrap()));
        metadata.migrate().await.unwrap();
        let service = FileService::new(
            Arc::new(DiskBlobStore::new(dir.path().join("blobs"))),
            metadata.clone(),
            LinkSigner::new(b"key").unwrap(),
            chrono::Duration::seconds(-1),
        );

        service
            .upload(UploadRequest {
                name: "old.txt".to_string(),
                mime_type: "text/plain".to_string(),
                tag: None,
                content: Box::pin(futures::stream::iter(vec![Ok(Bytes::from_static(b"x"))])),
            })
            .await
            .unwrap();

        let handle = tokio::spawn(run_sweeper(service, Duration::from_millis(10)));

        let mut remaining = usize::MAX;
        for _ in 0..100 {
            remaining = metadata.list_expired(chrono::Utc::now()).await.unwrap().len();
            if remaining == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        handle.abort();

        assert_eq!(remaining, 0);
    }
}
