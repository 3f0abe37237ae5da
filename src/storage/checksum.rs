//! Passthrough stream that computes a digest while enforcing size bounds.

use super::traits::{ByteStream, StorageError};
use crate::types::{Checksum, DigestAlgo, DigestState, SizeLimit};
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Wraps an incoming byte stream and, per chunk:
///
/// 1. updates the running digest,
/// 2. accounts `bytes_read`,
/// 3. fails when a `size_limit` is exceeded (carrying the limit's reason),
/// 4. fails when more bytes arrive than the declared `size`,
/// 5. invokes the progress callback with `(bytes_read, bytes_read + offset)`.
///
/// After the stream is exhausted, [`ChecksumStream::finalize`] yields the
/// byte count and checksum, and fails if fewer bytes arrived than declared.
pub struct ChecksumStream {
    inner: ByteStream,
    digest: DigestState,
    bytes_read: u64,
    offset: u64,
    size_limit: Option<SizeLimit>,
    size: Option<u64>,
    progress: Option<Box<dyn FnMut(u64, u64) + Send>>,
    failed: bool,
}

impl ChecksumStream {
    pub fn new(inner: ByteStream, algo: DigestAlgo) -> Self {
        Self {
            inner,
            digest: algo.hasher(),
            bytes_read: 0,
            offset: 0,
            size_limit: None,
            size: None,
            progress: None,
            failed: false,
        }
    }

    /// Fail with `FileSize` semantics once more than `limit.limit` bytes
    /// have been read.
    pub fn with_size_limit(mut self, limit: Option<SizeLimit>) -> Self {
        self.size_limit = limit;
        self
    }

    /// Enforce the declared stream size in both directions.
    pub fn with_expected_size(mut self, size: Option<u64>) -> Self {
        self.size = size;
        self
    }

    /// Offset added to the second progress argument (used by offset writes).
    pub fn with_offset(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_progress(mut self, progress: Option<Box<dyn FnMut(u64, u64) + Send>>) -> Self {
        self.progress = progress;
        self
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Consume the streamer after EOF, returning `(bytes_read, checksum)`.
    pub fn finalize(self) -> Result<(u64, Checksum), StorageError> {
        if let Some(size) = self.size {
            if self.bytes_read < size {
                return Err(StorageError::UnexpectedSize { kind: "smaller" });
            }
        }
        Ok((self.bytes_read, self.digest.finalize()))
    }

    fn check_bounds(&self) -> Result<(), StorageError> {
        if let Some(limit) = &self.size_limit {
            if self.bytes_read > limit.limit {
                return Err(StorageError::SizeLimitExceeded {
                    limit: limit.limit,
                    reason: limit.reason.clone(),
                });
            }
        }
        if let Some(size) = self.size {
            if self.bytes_read > size {
                return Err(StorageError::UnexpectedSize { kind: "bigger" });
            }
        }
        Ok(())
    }
}

impl Stream for ChecksumStream {
    type Item = Result<Bytes, StorageError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.failed {
            return Poll::Ready(None);
        }
        match Pin::new(&mut this.inner).poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                this.bytes_read += chunk.len() as u64;
                if let Err(e) = this.check_bounds() {
                    this.failed = true;
                    return Poll::Ready(Some(Err(e)));
                }
                this.digest.update(&chunk);
                if let Some(progress) = &mut this.progress {
                    progress(this.bytes_read, this.bytes_read + this.offset);
                }
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(e))) => {
                this.failed = true;
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn stream_of(chunks: Vec<&'static [u8]>) -> ByteStream {
        Box::pin(futures::stream::iter(
            chunks.into_iter().map(|c| Ok(Bytes::from_static(c))),
        ))
    }

    async fn drain(mut cs: ChecksumStream) -> Result<(u64, Checksum), StorageError> {
        while let Some(chunk) = cs.next().await {
            chunk?;
        }
        cs.finalize()
    }

    #[tokio::test]
    async fn test_checksum_matches_known_digest() {
        let cs = ChecksumStream::new(stream_of(vec![b"hello", b"\n"]), DigestAlgo::Md5);
        let (n, checksum) = drain(cs).await.unwrap();
        assert_eq!(n, 6);
        assert_eq!(checksum.as_str(), "md5:b1946ac92492d2347c6235b4d2611184");
    }

    #[tokio::test]
    async fn test_size_limit_exceeded_carries_reason() {
        let cs = ChecksumStream::new(stream_of(vec![b"abc", b"def"]), DigestAlgo::Md5)
            .with_size_limit(Some(SizeLimit::new(4, "Bucket quota exceeded.")));
        let err = drain(cs).await.unwrap_err();
        match err {
            StorageError::SizeLimitExceeded { limit, reason } => {
                assert_eq!(limit, 4);
                assert!(reason.contains("quota"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_limit_boundary_is_inclusive() {
        // Exactly at the limit passes; one byte over fails.
        let cs = ChecksumStream::new(stream_of(vec![b"abcd"]), DigestAlgo::Md5)
            .with_size_limit(Some(SizeLimit::new(4, "limit")));
        assert!(drain(cs).await.is_ok());

        let cs = ChecksumStream::new(stream_of(vec![b"abcde"]), DigestAlgo::Md5)
            .with_size_limit(Some(SizeLimit::new(4, "limit")));
        assert!(drain(cs).await.is_err());
    }

    #[tokio::test]
    async fn test_bigger_than_declared() {
        let cs = ChecksumStream::new(stream_of(vec![b"abcdef"]), DigestAlgo::Md5)
            .with_expected_size(Some(3));
        let err = drain(cs).await.unwrap_err();
        assert!(matches!(err, StorageError::UnexpectedSize { kind: "bigger" }));
    }

    #[tokio::test]
    async fn test_smaller_than_declared() {
        let cs = ChecksumStream::new(stream_of(vec![b"ab"]), DigestAlgo::Md5)
            .with_expected_size(Some(10));
        let err = drain(cs).await.unwrap_err();
        assert!(matches!(err, StorageError::UnexpectedSize { kind: "smaller" }));
    }

    #[tokio::test]
    async fn test_progress_callback_reports_offset() {
        let (tx, rx) = std::sync::mpsc::channel();
        let cs = ChecksumStream::new(stream_of(vec![b"abc", b"de"]), DigestAlgo::Md5)
            .with_offset(100)
            .with_progress(Some(Box::new(move |read, total| {
                let _ = tx.send((read, total));
            })));
        drain(cs).await.unwrap();
        let calls: Vec<_> = rx.try_iter().collect();
        assert_eq!(calls, vec![(3, 103), (5, 105)]);
    }
}
