//! Storage backend trait definitions

use crate::types::Checksum;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Blob not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Disk full: insufficient storage space")]
    DiskFull,

    #[error("{reason}")]
    SizeLimitExceeded { limit: u64, reason: String },

    #[error("File is {kind} than expected")]
    UnexpectedSize { kind: &'static str },

    #[error("Operation not supported by this backend: {0}")]
    Unsupported(&'static str),

    #[error("Storage error: {0}")]
    Other(String),
}

/// Stream of blob content chunks.
pub type ByteStream = BoxStream<'static, Result<Bytes, StorageError>>;

/// Half-open byte range within a blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub offset: u64,
    pub length: u64,
}

/// Result of initializing or saving a blob — the fields the catalog stamps
/// onto the owning FileInstance row.
#[derive(Debug, Clone)]
pub struct BlobInfo {
    pub uri: String,
    pub size: u64,
    pub checksum: Option<Checksum>,
    pub readable: bool,
    pub writable: bool,
}

/// Options for a streamed save.
#[derive(Default)]
pub struct SaveOptions {
    /// Hard cap with a human-readable reason (quota, max file size)
    pub size_limit: Option<crate::types::SizeLimit>,
    /// Declared size; readers fail when the stream over- or under-runs it
    pub size: Option<u64>,
    /// Progress callback receiving (bytes_read, total_so_far)
    pub progress: Option<Box<dyn FnMut(u64, u64) + Send>>,
}

impl std::fmt::Debug for SaveOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SaveOptions")
            .field("size_limit", &self.size_limit)
            .field("size", &self.size)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

/// Per-blob storage handle, built by the factory from `(uri, size)`.
///
/// This trait is object-safe and used as `Box<dyn StorageBackend>`.
///
/// Contract: `save` and `update` MUST remove any partially written data on
/// failure, and all failures surface as a `StorageError` variant — callers
/// never see raw backend errors.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// The URI this handle is bound to.
    fn uri(&self) -> &str;

    /// Whether `update()` can write at arbitrary offsets into one blob,
    /// allowing multipart merges to finalize in place.
    fn supports_in_place_merge(&self) -> bool {
        false
    }

    /// Open the blob for reading, optionally limited to a byte range.
    async fn open(&self, range: Option<ByteRange>) -> Result<ByteStream, StorageError>;

    /// Create the blob and truncate it to `size`. Idempotent for the same
    /// size.
    async fn initialize(&self, size: u64) -> Result<BlobInfo, StorageError>;

    /// Stream `stream` into the blob, computing its checksum on the way.
    async fn save(&self, stream: ByteStream, opts: SaveOptions) -> Result<BlobInfo, StorageError>;

    /// Write `stream` into the blob starting at byte `seek`. Returns the
    /// number of bytes written and the checksum of exactly those bytes.
    async fn update(
        &self,
        stream: ByteStream,
        seek: u64,
        size: Option<u64>,
    ) -> Result<(u64, Checksum), StorageError>;

    /// Remove the blob. Returns whether anything was deleted.
    async fn delete(&self) -> Result<bool, StorageError>;

    /// Re-read the whole blob and compute its checksum.
    async fn checksum(&self) -> Result<Checksum, StorageError>;
}

/// Generate the blanket `impl StorageBackend for Box<dyn StorageBackend>`
/// that forwards every method through dynamic dispatch.
macro_rules! impl_storage_backend_for_box {
    () => {
        #[async_trait]
        impl StorageBackend for Box<dyn StorageBackend> {
            fn uri(&self) -> &str { (**self).uri() }
            fn supports_in_place_merge(&self) -> bool { (**self).supports_in_place_merge() }
            async fn open(&self, range: Option<ByteRange>) -> Result<ByteStream, StorageError> { (**self).open(range).await }
            async fn initialize(&self, size: u64) -> Result<BlobInfo, StorageError> { (**self).initialize(size).await }
            async fn save(&self, stream: ByteStream, opts: SaveOptions) -> Result<BlobInfo, StorageError> { (**self).save(stream, opts).await }
            async fn update(&self, stream: ByteStream, seek: u64, size: Option<u64>) -> Result<(u64, Checksum), StorageError> { (**self).update(stream, seek, size).await }
            async fn delete(&self) -> Result<bool, StorageError> { (**self).delete().await }
            async fn checksum(&self) -> Result<Checksum, StorageError> { (**self).checksum().await }
        }
    };
}

impl_storage_backend_for_box!();
