//! HTTP mapping of core errors.

use crate::errors::Error;
use crate::storage::StorageError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::error;

/// JSON error payload: `{"status": 400, "message": "…"}`. The message never
/// carries internal paths or backend details.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub status: u16,
    pub message: String,
}

/// Wrapper implementing `IntoResponse` for the core error type.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError(err)
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        ApiError(Error::from(err))
    }
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match &self.0 {
            Error::InvalidOperation(_)
            | Error::FileSize(_)
            | Error::UnexpectedFileSize(_)
            | Error::MultipartInvalidChunkSize(_)
            | Error::MultipartInvalidPartNumber(_)
            | Error::MultipartMissingParts => StatusCode::BAD_REQUEST,
            Error::FileInstanceAlreadySet | Error::MultipartAlreadyCompleted => {
                StatusCode::CONFLICT
            }
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::BucketLocked => StatusCode::FORBIDDEN,
            Error::PermissionDenied {
                hidden,
                authenticated,
            } => {
                if *hidden {
                    StatusCode::NOT_FOUND
                } else if *authenticated {
                    StatusCode::FORBIDDEN
                } else {
                    StatusCode::UNAUTHORIZED
                }
            }
            Error::Storage(_) | Error::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Client-facing message. Internal failures are logged with their cause
    /// and surfaced as a generic message.
    fn message(&self) -> String {
        match &self.0 {
            Error::Storage(cause) => {
                error!("storage failure: {cause}");
                "Internal storage error.".to_string()
            }
            Error::Database(cause) => {
                error!("catalog failure: {cause}");
                "Internal error.".to_string()
            }
            Error::PermissionDenied { hidden: true, .. } => "Object does not exist.".to_string(),
            Error::PermissionDenied { .. } => {
                "You do not have permission for this action.".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorBody {
            status: status.as_u16(),
            message: self.message(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ApiError(Error::FileSize("Bucket quota exceeded.".into())).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError(Error::MultipartAlreadyCompleted).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError(Error::NotFound("Object")).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError(Error::Storage(StorageError::DiskFull)).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_permission_denied_mapping() {
        let hidden = ApiError(Error::PermissionDenied {
            hidden: true,
            authenticated: true,
        });
        assert_eq!(hidden.status_code(), StatusCode::NOT_FOUND);

        let anon = ApiError(Error::PermissionDenied {
            hidden: false,
            authenticated: false,
        });
        assert_eq!(anon.status_code(), StatusCode::UNAUTHORIZED);

        let authed = ApiError(Error::PermissionDenied {
            hidden: false,
            authenticated: true,
        });
        assert_eq!(authed.status_code(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_internal_messages_do_not_leak() {
        let err = ApiError(Error::Storage(StorageError::Other(
            "/var/lib/depot/blobs/ab/cd: permission denied".to_string(),
        )));
        assert!(!err.message().contains("/var/lib"));
    }
}
