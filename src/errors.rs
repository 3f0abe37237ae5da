//! Core error types.
//!
//! Every fallible operation in the catalog, upload pipeline, and task layer
//! returns this `Error`; the REST layer maps it onto HTTP statuses in
//! `api::errors`. Storage-level failures travel as `StorageError` and are
//! lifted here at the orchestration boundary, so size violations detected
//! mid-stream still surface as client errors rather than 500s.

use crate::storage::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("File instance already set")]
    FileInstanceAlreadySet,

    #[error("{0}")]
    FileSize(String),

    #[error("Unexpected file size: file is {0} than expected")]
    UnexpectedFileSize(&'static str),

    #[error("Invalid part size: {0}")]
    MultipartInvalidChunkSize(String),

    #[error("Invalid part number: {0}")]
    MultipartInvalidPartNumber(String),

    #[error("Not all parts have been uploaded")]
    MultipartMissingParts,

    #[error("Multipart upload is already completed")]
    MultipartAlreadyCompleted,

    #[error("{0} does not exist")]
    NotFound(&'static str),

    #[error("Bucket is locked for modifications")]
    BucketLocked,

    #[error("Permission denied")]
    PermissionDenied {
        /// Hide the target's existence (404) instead of revealing 401/403.
        hidden: bool,
        /// Whether the caller presented a principal at all.
        authenticated: bool,
    },

    #[error("Storage error: {0}")]
    Storage(StorageError),

    #[error("Database error: {0}")]
    Database(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl From<StorageError> for Error {
    fn from(err: StorageError) -> Self {
        // Size violations are detected inside the storage stream but are
        // client errors, not backend failures.
        match err {
            StorageError::SizeLimitExceeded { reason, .. } => Error::FileSize(reason),
            StorageError::UnexpectedSize { kind } => Error::UnexpectedFileSize(kind),
            StorageError::NotFound(what) => {
                Error::Storage(StorageError::NotFound(what))
            }
            other => Error::Storage(other),
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::QueryReturnedNoRows => Error::NotFound("Record"),
            other => Error::Database(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_size_errors_become_client_errors() {
        let err: Error = StorageError::SizeLimitExceeded {
            limit: 4,
            reason: "Bucket quota exceeded.".to_string(),
        }
        .into();
        assert!(matches!(err, Error::FileSize(ref r) if r.contains("quota")));

        let err: Error = StorageError::UnexpectedSize { kind: "smaller" }.into();
        assert!(matches!(err, Error::UnexpectedFileSize("smaller")));
    }

    #[test]
    fn test_no_rows_becomes_not_found() {
        let err: Error = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
