//! Blob storage layer
//!
//! Durable byte storage keyed by [`FileId`]. A blob store knows nothing
//! about metadata or expiry; the file lifecycle engine keeps it consistent
//! with the metadata store.

use std::io;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use thiserror::Error;

use crate::models::FileId;

pub mod disk;

pub use disk::DiskBlobStore;

/// Chunked blob content. Dropping the stream releases whatever handle backs it.
pub type BlobStream<'a> = BoxStream<'a, io::Result<Bytes>>;

#[derive(Error, Debug)]
pub enum BlobError {
    #[error("blob not found")]
    NotFound,

    #[error("blob exceeds the maximum size of {limit} bytes")]
    TooLarge { limit: u64 },

    #[error("blob I/O error: {0}")]
    Io(#[from] io::Error),
}

impl BlobError {
    /// Maps `ErrorKind::NotFound` onto [`BlobError::NotFound`].
    pub(crate) fn from_io(e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::NotFound {
            BlobError::NotFound
        } else {
            BlobError::Io(e)
        }
    }
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Persist `content` under `id` and return the number of bytes written.
    /// On error nothing is left behind under `id`.
    async fn save(&self, id: &FileId, content: BlobStream<'_>) -> Result<u64, BlobError>;

    /// Open a blob for streaming. Missing blobs yield [`BlobError::NotFound`].
    async fn open_read(&self, id: &FileId) -> Result<BlobStream<'static>, BlobError>;

    /// Remove a blob. Missing blobs yield [`BlobError::NotFound`].
    async fn delete(&self, id: &FileId) -> Result<(), BlobError>;
}
