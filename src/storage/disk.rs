//! Filesystem blob store
//!
//! Each blob lives at `<root>/<id>`. Writes go to `<root>/<id>.partial` and
//! are renamed into place once complete, so a reader never observes a
//! half-written blob.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

use super::{BlobError, BlobStore, BlobStream};
use crate::models::FileId;

const PARTIAL_SUFFIX: &str = "partial";

pub struct DiskBlobStore {
    root: PathBuf,
    max_size: Option<u64>,
}

impl DiskBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            max_size: None,
        }
    }

    /// Reject writes larger than `limit` bytes while they stream in.
    pub fn with_max_size(mut self, limit: u64) -> Self {
        self.max_size = Some(limit);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn blob_path(&self, id: &FileId) -> PathBuf {
        self.root.join(id.as_str())
    }

    fn partial_path(&self, id: &FileId) -> PathBuf {
        self.root.join(format!("{}.{}", id, PARTIAL_SUFFIX))
    }

    async fn write_partial(
        &self,
        path: &Path,
        mut content: BlobStream<'_>,
    ) -> Result<u64, BlobError> {
        let mut file = fs::File::create(path).await?;
        let mut size = 0u64;

        while let Some(chunk) = content.next().await {
            let chunk = chunk?;
            size += chunk.len() as u64;
            if let Some(limit) = self.max_size {
                if size > limit {
                    return Err(BlobError::TooLarge { limit });
                }
            }
            file.write_all(&chunk).await?;
        }

        file.flush().await?;
        file.sync_all().await?;
        Ok(size)
    }
}

#[async_trait]
impl BlobStore for DiskBlobStore {
    async fn save(&self, id: &FileId, content: BlobStream<'_>) -> Result<u64, BlobError> {
        fs::create_dir_all(&self.root).await?;

        let partial = self.partial_path(id);
        let written = match self.write_partial(&partial, content).await {
            Ok(size) => fs::rename(&partial, self.blob_path(id))
                .await
                .map(|_| size)
                .map_err(BlobError::from),
            Err(e) => Err(e),
        };

        if written.is_err() {
            if let Err(cleanup) = fs::remove_file(&partial).await {
                if cleanup.kind() != std::io::ErrorKind::NotFound {
                    warn!(file_id = %id, error = %cleanup, "Failed to remove partial blob");
                }
            }
        }

        let size = written?;
        debug!(file_id = %id, size, "Blob saved");
        Ok(size)
    }

    async fn open_read(&self, id: &FileId) -> Result<BlobStream<'static>, BlobError> {
        let file = fs::File::open(self.blob_path(id))
            .await
            .map_err(BlobError::from_io)?;
        Ok(Box::pin(ReaderStream::new(file)))
    }

    async fn delete(&self, id: &FileId) -> Result<(), BlobError> {
        fs::remove_file(self.blob_path(id))
            .await
            .map_err(BlobError::from_io)
    }
}
