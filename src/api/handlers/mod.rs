//! REST request handlers
//!
//! Split into submodules by domain:
//! - `bucket` — bucket creation, listing, existence, soft delete
//! - `object` — single-shot upload, download with range support, delete
//! - `multipart` — resumable upload lifecycle
//! - `status` — health check and Prometheus metrics

mod bucket;
mod multipart;
mod object;
mod status;

use super::auth::{check_permission, Action, AuthTarget, AuthorizationOracle, Principal};
use super::errors::ApiError;
use crate::config::Config;
use crate::db::Database;
use crate::errors::{Error, Result};
use crate::metrics::Metrics;
use crate::storage::{ByteStream, StorageError, StorageFactory};
use crate::tasks::TaskQueue;
use axum::body::Body;
use axum::http::HeaderMap;
use futures::StreamExt;
use std::sync::Arc;

// Re-export all public handlers so the router wires against one path.
pub use bucket::{
    create_bucket, delete_bucket, get_bucket, head_bucket, list_buckets, BucketQuery,
};
pub use multipart::post_object;
pub use object::{delete_object, get_object, head_object, put_object, ObjectQuery};
pub use status::{health_check, metrics_handler, HealthResponse};

/// Application state shared across handlers
pub struct AppState {
    pub db: Database,
    pub config: Arc<Config>,
    pub factory: Arc<StorageFactory>,
    pub tasks: TaskQueue,
    pub metrics: Arc<Metrics>,
    pub oracle: Arc<dyn AuthorizationOracle>,
}

impl AppState {
    /// Consult the authorization oracle for `action` on `target`.
    pub fn authorize(
        &self,
        principal: &Principal,
        action: Action,
        target: Option<&AuthTarget<'_>>,
        hidden: bool,
    ) -> Result<()> {
        check_permission(self.oracle.as_ref(), principal, action, target, hidden)
    }
}

// ---------------------------------------------------------------------------
// Shared utility functions used across handler submodules
// ---------------------------------------------------------------------------

/// Convert an HTTP request body into the storage layer's stream type.
fn body_stream(body: Body) -> ByteStream {
    Box::pin(
        body.into_data_stream()
            .map(|chunk| chunk.map_err(|e| StorageError::Other(format!("request body: {e}")))),
    )
}

/// Required Content-Length header, parsed.
fn content_length(headers: &HeaderMap) -> Result<u64> {
    headers
        .get(axum::http::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| Error::InvalidOperation("Content-Length header is required.".to_string()))
}

/// Decoded Content-MD5 header (base64 of the raw digest), as hex.
fn content_md5(headers: &HeaderMap) -> Option<String> {
    use base64::Engine;
    let raw = headers.get("content-md5")?.to_str().ok()?;
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(raw.trim())
        .ok()?;
    Some(hex::encode(decoded))
}

/// Request Content-Type, ignoring the generic default some clients send.
fn request_mimetype(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty() && *v != "application/octet-stream")
        .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
}

/// Object tags carried on upload as `x-depot-tag-<key>: <value>` headers.
fn extract_tags(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            let key = name.as_str().strip_prefix("x-depot-tag-")?;
            if key.is_empty() {
                return None;
            }
            let value = value.to_str().ok()?;
            Some((key.to_string(), value.to_string()))
        })
        .collect()
}

/// The filename presented in Content-Disposition: the last key segment.
fn filename_of(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

/// Convert any core error into the API wrapper (helper for `?` chains).
pub(crate) fn api<T>(result: Result<T>) -> std::result::Result<T, ApiError> {
    result.map_err(ApiError)
}
