//! Bucket-level handlers: create, list, existence check, listings, soft
//! delete.

use super::{api, Action, AppState, AuthTarget, Principal};
use crate::api::errors::ApiError;
use crate::api::extractors::BucketPath;
use crate::api::serializer::{BucketRep, MultipartRep, ObjectVersionRep};
use crate::errors::Error;
use crate::models::{Bucket, MultipartObject, ObjectVersion};
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, instrument};

/// Listing caps mirror the catalog queries the views issue.
const LIST_LIMIT: u64 = 1000;

/// Body of `POST /files`.
#[derive(Debug, Deserialize, Default)]
pub struct CreateBucketRequest {
    pub location_name: Option<String>,
    pub storage_class: Option<String>,
}

/// Query parameters for bucket-level GET.
#[derive(Debug, Deserialize, Default)]
pub struct BucketQuery {
    /// List every version instead of heads only (`?versions`)
    pub versions: Option<String>,
    /// List in-progress multipart uploads (`?uploads`)
    pub uploads: Option<String>,
}

/// POST /files — create a bucket in the named (or default) location.
#[instrument(skip(state, body))]
pub async fn create_bucket(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    body: Bytes,
) -> Result<Response, ApiError> {
    api(state.authorize(&principal, Action::LocationUpdate, None, false))?;

    // The body is optional; an empty payload creates a bucket with all
    // defaults.
    let request: CreateBucketRequest = if body.is_empty() {
        CreateBucketRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError(Error::InvalidOperation(format!("Invalid request body: {e}"))))?
    };

    let config = state.config.clone();
    let bucket = state
        .db
        .call(move |conn| {
            Bucket::create(
                conn,
                &config,
                request.location_name.as_deref(),
                request.storage_class.as_deref(),
            )
        })
        .await
        .map_err(ApiError)?;

    info!("Created bucket {}", bucket.id);
    Ok(Json(BucketRep::new(&bucket)).into_response())
}

/// GET /files — list live buckets.
#[instrument(skip(state))]
pub async fn list_buckets(
    State(state): State<Arc<AppState>>,
    principal: Principal,
) -> Result<Response, ApiError> {
    api(state.authorize(&principal, Action::BucketRead, None, false))?;
    let buckets = state
        .db
        .call(|conn| Bucket::all(conn))
        .await
        .map_err(ApiError)?;
    let reps: Vec<BucketRep> = buckets.iter().map(BucketRep::new).collect();
    Ok(Json(reps).into_response())
}

/// HEAD /files/{bucket} — existence check.
#[instrument(skip(state))]
pub async fn head_bucket(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    BucketPath(bucket_id): BucketPath,
) -> Result<Response, ApiError> {
    let bucket = api(state
        .db
        .call(move |conn| Bucket::get(conn, &bucket_id))
        .await)?
    .ok_or(ApiError(Error::NotFound("Bucket")))?;
    api(state.authorize(
        &principal,
        Action::BucketRead,
        Some(&AuthTarget::Bucket(&bucket)),
        true,
    ))?;
    Ok(StatusCode::OK.into_response())
}

/// GET /files/{bucket} — list head versions, all versions (`?versions`), or
/// in-progress multipart uploads (`?uploads`).
#[instrument(skip(state))]
pub async fn get_bucket(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    BucketPath(bucket_id): BucketPath,
    Query(query): Query<BucketQuery>,
) -> Result<Response, ApiError> {
    let bucket = api(state
        .db
        .call(move |conn| Bucket::get(conn, &bucket_id))
        .await)?
    .ok_or(ApiError(Error::NotFound("Bucket")))?;

    if query.uploads.is_some() {
        return list_multipart_uploads(&state, &principal, &bucket).await;
    }

    api(state.authorize(
        &principal,
        Action::BucketRead,
        Some(&AuthTarget::Bucket(&bucket)),
        true,
    ))?;
    let versions = query.versions.is_some();
    if versions {
        api(state.authorize(
            &principal,
            Action::BucketReadVersions,
            Some(&AuthTarget::Bucket(&bucket)),
            false,
        ))?;
    }

    let reps = api(state
        .db
        .call(move |conn| {
            let rows = ObjectVersion::get_by_bucket(conn, &bucket_id, versions, Some(LIST_LIMIT))?;
            let mut reps = Vec::with_capacity(rows.len());
            for (version, file) in rows {
                let tags = version.tags(conn)?;
                reps.push(ObjectVersionRep::new(&version, file.as_ref(), tags));
            }
            Ok(reps)
        })
        .await)?;
    Ok(Json(reps).into_response())
}

/// GET /files/{bucket}?uploads — in-progress multipart uploads.
async fn list_multipart_uploads(
    state: &Arc<AppState>,
    principal: &Principal,
    bucket: &Bucket,
) -> Result<Response, ApiError> {
    api(state.authorize(
        principal,
        Action::BucketListMultiparts,
        Some(&AuthTarget::Bucket(bucket)),
        true,
    ))?;
    let bucket_id = bucket.id;
    let uploads = api(state
        .db
        .call(move |conn| MultipartObject::query_by_bucket(conn, &bucket_id, LIST_LIMIT))
        .await)?;
    let reps: Vec<MultipartRep> = uploads.iter().map(MultipartRep::new).collect();
    Ok(Json(reps).into_response())
}

/// DELETE /files/{bucket} — soft delete; all further object operations on
/// the bucket are refused.
#[instrument(skip(state))]
pub async fn delete_bucket(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    BucketPath(bucket_id): BucketPath,
) -> Result<Response, ApiError> {
    let bucket = api(state
        .db
        .call(move |conn| Bucket::get(conn, &bucket_id))
        .await)?
    .ok_or(ApiError(Error::NotFound("Bucket")))?;
    api(state.authorize(
        &principal,
        Action::BucketUpdate,
        Some(&AuthTarget::Bucket(&bucket)),
        true,
    ))?;
    api(bucket.ensure_mutable())?;

    api(state
        .db
        .call(move |conn| Bucket::soft_delete(conn, &bucket_id))
        .await)?;
    info!("Soft-deleted bucket {}", bucket_id);
    Ok(StatusCode::NO_CONTENT.into_response())
}
