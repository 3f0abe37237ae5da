//! Filesystem blob backend.
//!
//! One handle per blob, bound to its final path. Layout is decided by the
//! storage factory (`<location>/<id split>/data`); this module only reads
//! and writes the file it was given, cleaning up partial writes and pruning
//! emptied directories on failure and delete.

use super::checksum::ChecksumStream;
use super::traits::{BlobInfo, ByteRange, ByteStream, SaveOptions, StorageBackend, StorageError};
use crate::types::{Checksum, DigestAlgo};
use async_trait::async_trait;
use futures::StreamExt;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio_util::io::ReaderStream;
use tracing::{debug, instrument, warn};

/// Async-safe path existence check (avoids blocking the Tokio runtime)
async fn path_exists(path: &Path) -> bool {
    fs::try_exists(path).await.unwrap_or(false)
}

/// ENOSPC raw error code on Linux and macOS.
const ENOSPC: i32 = 28;

/// Convert an io::Error into StorageError, detecting disk-full (ENOSPC).
fn io_to_storage_error(e: std::io::Error) -> StorageError {
    if e.raw_os_error() == Some(ENOSPC) {
        StorageError::DiskFull
    } else {
        StorageError::Io(e)
    }
}

/// How many directory levels above the blob may be pruned when emptied.
/// Matches the deepest id-split layout the factory produces.
const PRUNE_DEPTH: usize = 4;

/// Filesystem storage backend bound to a single blob path.
pub struct FilesystemBackend {
    path: PathBuf,
    size: Option<u64>,
    algo: DigestAlgo,
}

impl FilesystemBackend {
    pub fn new(uri: &str, size: Option<u64>, algo: DigestAlgo) -> Self {
        Self {
            path: PathBuf::from(uri),
            size,
            algo,
        }
    }

    /// Blob size recorded in the catalog, when known.
    pub fn known_size(&self) -> Option<u64> {
        self.size
    }

    async fn ensure_parent(&self) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await.map_err(io_to_storage_error)?;
        }
        Ok(())
    }

    /// Remove the blob (if present) and prune directories it emptied.
    async fn remove_and_prune(&self) -> Result<bool, StorageError> {
        let existed = path_exists(&self.path).await;
        if existed {
            fs::remove_file(&self.path).await.map_err(io_to_storage_error)?;
        }
        let mut dir = self.path.parent();
        for _ in 0..PRUNE_DEPTH {
            match dir {
                // remove_dir fails on non-empty directories, which ends the
                // pruning walk.
                Some(d) => match fs::remove_dir(d).await {
                    Ok(()) => dir = d.parent(),
                    Err(_) => break,
                },
                None => break,
            }
        }
        Ok(existed)
    }

    /// Best-effort cleanup after a failed write.
    async fn cleanup_partial(&self) {
        if let Err(e) = self.remove_and_prune().await {
            warn!("Failed to clean up partial blob {:?}: {}", self.path, e);
        }
    }

    async fn write_stream_to(
        &self,
        file: &mut fs::File,
        mut stream: ChecksumStream,
    ) -> Result<(u64, Checksum), StorageError> {
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await.map_err(io_to_storage_error)?;
        }
        file.flush().await.map_err(io_to_storage_error)?;
        file.sync_all().await.map_err(io_to_storage_error)?;
        stream.finalize()
    }
}

#[async_trait]
impl StorageBackend for FilesystemBackend {
    fn uri(&self) -> &str {
        self.path.to_str().unwrap_or("")
    }

    fn supports_in_place_merge(&self) -> bool {
        true
    }

    #[instrument(skip(self))]
    async fn open(&self, range: Option<ByteRange>) -> Result<ByteStream, StorageError> {
        let mut file = match fs::File::open(&self.path).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(self.path.display().to_string()))
            }
            Err(e) => return Err(io_to_storage_error(e)),
        };

        let stream: ByteStream = match range {
            Some(ByteRange { offset, length }) => {
                file.seek(SeekFrom::Start(offset))
                    .await
                    .map_err(io_to_storage_error)?;
                let limited = file.take(length);
                Box::pin(ReaderStream::new(limited).map(|r| r.map_err(io_to_storage_error)))
            }
            None => Box::pin(ReaderStream::new(file).map(|r| r.map_err(io_to_storage_error))),
        };
        debug!("Opened blob stream for {:?}", self.path);
        Ok(stream)
    }

    #[instrument(skip(self))]
    async fn initialize(&self, size: u64) -> Result<BlobInfo, StorageError> {
        self.ensure_parent().await?;
        let file = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .open(&self.path)
            .await
            .map_err(io_to_storage_error)?;
        file.set_len(size).await.map_err(io_to_storage_error)?;
        file.sync_all().await.map_err(io_to_storage_error)?;
        debug!("Initialized blob {:?} ({} bytes)", self.path, size);
        Ok(BlobInfo {
            uri: self.uri().to_string(),
            size,
            checksum: None,
            readable: false,
            writable: true,
        })
    }

    #[instrument(skip(self, stream, opts))]
    async fn save(&self, stream: ByteStream, opts: SaveOptions) -> Result<BlobInfo, StorageError> {
        self.ensure_parent().await?;
        let checksummed = ChecksumStream::new(stream, self.algo)
            .with_size_limit(opts.size_limit)
            .with_expected_size(opts.size)
            .with_progress(opts.progress);

        let result = async {
            let mut file = fs::File::create(&self.path)
                .await
                .map_err(io_to_storage_error)?;
            self.write_stream_to(&mut file, checksummed).await
        }
        .await;

        match result {
            Ok((size, checksum)) => {
                debug!("Saved blob {:?} ({} bytes)", self.path, size);
                Ok(BlobInfo {
                    uri: self.uri().to_string(),
                    size,
                    checksum: Some(checksum),
                    readable: true,
                    writable: false,
                })
            }
            Err(e) => {
                self.cleanup_partial().await;
                Err(e)
            }
        }
    }

    #[instrument(skip(self, stream))]
    async fn update(
        &self,
        stream: ByteStream,
        seek: u64,
        size: Option<u64>,
    ) -> Result<(u64, Checksum), StorageError> {
        let mut file = match fs::OpenOptions::new().write(true).open(&self.path).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(self.path.display().to_string()))
            }
            Err(e) => return Err(io_to_storage_error(e)),
        };
        file.seek(SeekFrom::Start(seek))
            .await
            .map_err(io_to_storage_error)?;

        let checksummed = ChecksumStream::new(stream, self.algo)
            .with_expected_size(size)
            .with_offset(seek);

        let (written, checksum) = self.write_stream_to(&mut file, checksummed).await?;
        debug!(
            "Updated blob {:?} at offset {} ({} bytes)",
            self.path, seek, written
        );
        Ok((written, checksum))
    }

    #[instrument(skip(self))]
    async fn delete(&self) -> Result<bool, StorageError> {
        let existed = self.remove_and_prune().await?;
        debug!("Deleted blob {:?} (existed: {})", self.path, existed);
        Ok(existed)
    }

    #[instrument(skip(self))]
    async fn checksum(&self) -> Result<Checksum, StorageError> {
        let mut stream = self.open(None).await?;
        let mut digest = self.algo.hasher();
        while let Some(chunk) = stream.next().await {
            digest.update(&chunk?);
        }
        Ok(digest.finalize())
    }
}
