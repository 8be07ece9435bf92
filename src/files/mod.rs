//! File lifecycle engine
//!
//! Coordinates the blob store, the metadata store and the link signer so
//! that a file record exists exactly when its blob does. The two stores are
//! not transactional with each other, so every multi-store sequence here is
//! ordered to leave a retryable state and compensates on partial failure:
//!
//! - upload writes the blob first and removes it again if the record insert fails
//! - delete removes the blob first and only then the record
//! - downloads evict expired files and drop records whose blob has vanished

pub mod signer;
pub mod sweeper;

use std::sync::Arc;

use chrono::{DateTime, SubsecRound, Utc};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::db::{MetadataError, MetadataStore};
use crate::models::{FileId, FileRecord, UploadResult};
use crate::storage::{BlobError, BlobStore, BlobStream};

pub use signer::{LinkSigner, SignerError};
pub use sweeper::run_sweeper;

#[derive(Error, Debug)]
pub enum FileError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("file exceeds the maximum size of {limit} bytes")]
    TooLarge { limit: u64 },

    #[error("file not found")]
    NotFound,

    #[error("invalid signature")]
    Forbidden,

    #[error("blob store failure: {0}")]
    Blob(BlobError),

    #[error("metadata store failure: {0}")]
    Metadata(MetadataError),
}

impl From<BlobError> for FileError {
    fn from(e: BlobError) -> Self {
        match e {
            BlobError::TooLarge { limit } => FileError::TooLarge { limit },
            other => FileError::Blob(other),
        }
    }
}

impl From<MetadataError> for FileError {
    fn from(e: MetadataError) -> Self {
        match e {
            MetadataError::NotFound => FileError::NotFound,
            other => FileError::Metadata(other),
        }
    }
}

pub struct UploadRequest<'a> {
    pub name: String,
    pub mime_type: String,
    pub tag: Option<String>,
    pub content: BlobStream<'a>,
}

/// A live file and its open content stream. Dropping `content` closes the blob.
pub struct Download {
    pub record: FileRecord,
    pub content: BlobStream<'static>,
}

#[derive(Clone)]
pub struct FileService {
    blobs: Arc<dyn BlobStore>,
    metadata: Arc<dyn MetadataStore>,
    signer: LinkSigner,
    ttl: chrono::Duration,
}

impl FileService {
    pub fn new(
        blobs: Arc<dyn BlobStore>,
        metadata: Arc<dyn MetadataStore>,
        signer: LinkSigner,
        ttl: chrono::Duration,
    ) -> Self {
        Self {
            blobs,
            metadata,
            signer,
            ttl,
        }
    }

    /// Relative download link for `id`, e.g. `/v1/files/<id>?signature=<hex>`.
    pub fn signed_url(&self, id: &FileId) -> String {
        format!("/v1/files/{}?signature={}", id, self.signer.sign(id.as_str()))
    }

    /// Store a new file and return its record with a signed link.
    pub async fn upload(&self, request: UploadRequest<'_>) -> Result<UploadResult, FileError> {
        let UploadRequest {
            name,
            mime_type,
            tag,
            content,
        } = request;

        let name = name.trim();
        if name.is_empty() {
            return Err(FileError::Validation("file name is required".to_string()));
        }
        let tag = tag
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());
        let mime_type = normalize_mime(&mime_type);

        let id = FileId::generate();
        let size = self.blobs.save(&id, content).await.map_err(|e| {
            error!(file_id = %id, error = %e, "Failed to save blob");
            FileError::from(e)
        })?;

        let created_at = now();
        let record = FileRecord {
            id,
            name: name.to_string(),
            tag,
            size,
            mime_type,
            created_at,
            expires_at: created_at + self.ttl,
        };

        if let Err(e) = self.metadata.insert(&record).await {
            error!(file_id = %record.id, error = %e, "Failed to save file metadata");
            match self.blobs.delete(&record.id).await {
                Ok(()) | Err(BlobError::NotFound) => {}
                Err(cleanup) => warn!(
                    file_id = %record.id,
                    error = %cleanup,
                    "Failed to remove blob after metadata insert failure"
                ),
            }
            return Err(e.into());
        }

        info!(
            file_id = %record.id,
            size = record.size,
            tag = record.tag.as_deref().unwrap_or(""),
            "File uploaded"
        );

        let url = self.signed_url(&record.id);
        Ok(UploadResult { record, url })
    }

    /// Open a file for streaming after checking its signature and expiry.
    pub async fn download(&self, id: &str, signature: &str) -> Result<Download, FileError> {
        if !self.signer.verify(id, signature) {
            warn!(file_id = id, "Rejected download with invalid signature");
            return Err(FileError::Forbidden);
        }

        let id = FileId::parse(id).ok_or(FileError::NotFound)?;
        let record = self.metadata.find_by_id(&id).await?;
        let record = self.ensure_live(record).await?;

        match self.blobs.open_read(&record.id).await {
            Ok(content) => Ok(Download { record, content }),
            Err(BlobError::NotFound) => {
                warn!(file_id = %record.id, "Blob missing for existing record, removing record");
                match self.metadata.delete(&record.id).await {
                    Ok(()) | Err(MetadataError::NotFound) => {}
                    Err(e) => warn!(
                        file_id = %record.id,
                        error = %e,
                        "Failed to remove orphaned file record"
                    ),
                }
                Err(FileError::NotFound)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Remove a file. Deleting a file that is already gone succeeds.
    pub async fn delete(&self, id: &str) -> Result<(), FileError> {
        let id = FileId::parse(id)
            .ok_or_else(|| FileError::Validation(format!("malformed file id {:?}", id)))?;
        self.remove(&id).await?;
        info!(file_id = %id, "File deleted");
        Ok(())
    }

    /// Every non-expired record, newest first.
    pub async fn list(&self) -> Result<Vec<FileRecord>, FileError> {
        Ok(self.metadata.list_active(Utc::now()).await?)
    }

    /// Signed link to the newest live file carrying `tag`. Expired files are
    /// skipped here and reclaimed by download or the sweeper.
    pub async fn resolve_latest_by_tag(&self, tag: &str) -> Result<String, FileError> {
        let record = self.metadata.find_latest_by_tag(tag, Utc::now()).await?;
        Ok(self.signed_url(&record.id))
    }

    /// Delete every expired file. Failures on individual files are logged
    /// and left for the next pass. Returns how many files were removed.
    pub async fn purge_expired(&self) -> Result<usize, FileError> {
        let expired = self.metadata.list_expired(Utc::now()).await?;
        let mut removed = 0;

        for record in expired {
            match self.remove(&record.id).await {
                Ok(()) => removed += 1,
                Err(e) => warn!(file_id = %record.id, error = %e, "Failed to purge expired file"),
            }
        }

        if removed > 0 {
            info!(removed, "Purged expired files");
        }
        Ok(removed)
    }

    /// Blob first, then record. A blob failure other than "already absent"
    /// leaves the record untouched so the caller can retry.
    async fn remove(&self, id: &FileId) -> Result<(), FileError> {
        match self.blobs.delete(id).await {
            Ok(()) | Err(BlobError::NotFound) => {}
            Err(e) => return Err(e.into()),
        }
        match self.metadata.delete(id).await {
            Ok(()) | Err(MetadataError::NotFound) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Lazily evicts `record` if it has expired.
    async fn ensure_live(&self, record: FileRecord) -> Result<FileRecord, FileError> {
        if !record.is_expired_at(Utc::now()) {
            return Ok(record);
        }

        info!(file_id = %record.id, expires_at = %record.expires_at, "Evicting expired file");
        if let Err(e) = self.remove(&record.id).await {
            warn!(file_id = %record.id, error = %e, "Failed to evict expired file");
        }
        Err(FileError::NotFound)
    }
}

/// Timestamps are persisted with microsecond precision.
fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

fn normalize_mime(raw: &str) -> String {
    raw.trim()
        .parse::<mime::Mime>()
        .unwrap_or(mime::APPLICATION_OCTET_STREAM)
        .to_string()
}
