//! Custom Axum extractors for request validation.
//!
//! These validate path parameters up front so handlers never see a
//! malformed bucket id or object key. An unparseable bucket UUID is
//! reported as 404 (indistinguishable from a missing bucket), matching the
//! hide-don't-reveal stance of the permission layer.

use super::errors::ApiError;
use super::handlers::AppState;
use crate::errors::Error;
use crate::types::validate_object_key;
use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts, Path},
    http::request::Parts,
};
use std::sync::Arc;
use uuid::Uuid;

use super::auth::Principal;

/// Bucket id extracted from `/files/{bucket}`.
#[derive(Debug, Clone)]
pub struct BucketPath(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for BucketPath
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(raw): Path<String> = Path::from_request_parts(parts, state)
            .await
            .map_err(|_| ApiError(Error::NotFound("Bucket")))?;
        let id = Uuid::parse_str(&raw).map_err(|_| ApiError(Error::NotFound("Bucket")))?;
        Ok(BucketPath(id))
    }
}

/// Bucket id + normalized object key from `/files/{bucket}/{key...}`.
#[derive(Debug, Clone)]
pub struct ObjectPath {
    pub bucket_id: Uuid,
    pub key: String,
}

#[async_trait]
impl<S> FromRequestParts<S> for ObjectPath
where
    S: Send + Sync,
    Arc<AppState>: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path((raw_bucket, key)): Path<(String, String)> =
            Path::from_request_parts(parts, state)
                .await
                .map_err(|_| ApiError(Error::NotFound("Bucket")))?;
        let bucket_id =
            Uuid::parse_str(&raw_bucket).map_err(|_| ApiError(Error::NotFound("Bucket")))?;

        let key = key.trim_start_matches('/').to_string();
        let app_state = Arc::<AppState>::from_ref(state);
        validate_object_key(&key, app_state.config.object_key_max_len)
            .map_err(|e| ApiError(Error::InvalidOperation(e.to_string())))?;

        Ok(ObjectPath { bucket_id, key })
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = parts
            .headers
            .get("x-depot-principal")
            .and_then(|v| v.to_str().ok())
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        Ok(Principal { id })
    }
}
