//! Multipart upload handlers: initiate, upload-part, list parts, complete,
//! abort.

use super::{api, body_stream, content_length, Action, AppState, AuthTarget, Principal};
use super::object::ObjectQuery;
use crate::api::errors::ApiError;
use crate::api::extractors::ObjectPath;
use crate::api::serializer::{MultipartRep, PartRep};
use crate::errors::Error;
use crate::models::{Bucket, FileInstance, Location, MultipartObject, Part};
use crate::tasks::Task;
use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

const PARTS_LIST_LIMIT: u64 = 1000;

/// POST /files/{bucket}/{key} — dispatches on query parameters:
/// `?uploads&size=S&partSize=P` initiates, `?uploadId=U` completes.
#[instrument(skip(state))]
pub async fn post_object(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    path: ObjectPath,
    Query(query): Query<ObjectQuery>,
) -> Result<Response, ApiError> {
    if query.uploads.is_some() {
        initiate_upload(&state, &principal, path, &query).await
    } else if let Some(upload_id) = query.upload_id {
        complete_upload(&state, &principal, &path, upload_id).await
    } else {
        Err(ApiError(Error::InvalidOperation(
            "POST on an object requires ?uploads or ?uploadId".to_string(),
        )))
    }
}

/// POST …?uploads&size=S&partSize=P — validate the geometry, preallocate
/// the target blob, persist the upload.
async fn initiate_upload(
    state: &Arc<AppState>,
    principal: &Principal,
    path: ObjectPath,
    query: &ObjectQuery,
) -> Result<Response, ApiError> {
    let size = query.size.ok_or(ApiError(Error::InvalidOperation(
        "Multipart initiation requires ?size".to_string(),
    )))?;
    let chunk_size = query.part_size.ok_or(ApiError(Error::InvalidOperation(
        "Multipart initiation requires ?partSize".to_string(),
    )))?;

    let bucket_id = path.bucket_id;
    let (bucket, location) = api(state
        .db
        .call(move |conn| {
            let bucket = Bucket::get(conn, &bucket_id)?.ok_or(Error::NotFound("Bucket"))?;
            bucket.ensure_mutable()?;
            let location = Location::get_by_id(conn, bucket.default_location)?
                .ok_or(Error::NotFound("Location"))?;
            Ok((bucket, location))
        })
        .await)?;
    api(state.authorize(
        principal,
        Action::BucketUpdate,
        Some(&AuthTarget::Bucket(&bucket)),
        true,
    ))?;

    if size < state.config.min_file_size {
        return Err(ApiError(Error::FileSize(
            "File is smaller than the minimum allowed size.".to_string(),
        )));
    }
    if let Some(limit) = bucket.size_limit() {
        if size > limit.limit {
            return Err(ApiError(Error::FileSize(limit.reason)));
        }
    }

    // Preallocate the destination blob so parts can land at their offsets.
    let mut file = FileInstance::fresh(Some(&bucket.default_storage_class));
    let (_backend, _info) = api(state.factory.initialize(&mut file, size, &location).await)?;

    let key = path.key.clone();
    let config = state.config.clone();
    let file_clone = file.clone();
    let multipart = api(state
        .db
        .call(move |conn| {
            let tx = conn.transaction()?;
            file_clone.insert(&tx)?;
            let multipart = MultipartObject::create(
                &tx,
                &config,
                &bucket_id,
                &key,
                &file_clone.id,
                size,
                chunk_size,
            )?;
            tx.commit()?;
            Ok(multipart)
        })
        .await
        // The preallocated blob must not outlive a failed initiation.
        .map_err(|e| {
            let file_id = file.id;
            let factory = state.factory.clone();
            let file = file.clone();
            tokio::spawn(async move {
                if let Some(backend) = factory.for_file(&file) {
                    if let Err(cleanup) = backend.delete().await {
                        warn!("Failed to remove preallocated blob for {file_id}: {cleanup}");
                    }
                }
            });
            e
        }))?;

    info!(
        "Initiated multipart upload {} for {}/{} ({} bytes, {}-byte parts)",
        multipart.upload_id, path.bucket_id, path.key, size, chunk_size
    );
    Ok(Json(MultipartRep::new(&multipart)).into_response())
}

/// PUT …?uploadId=U&partNumber=n — stream one part to its offset.
pub async fn upload_part(
    state: &Arc<AppState>,
    principal: &Principal,
    path: &ObjectPath,
    upload_id: Uuid,
    query: &ObjectQuery,
    headers: &HeaderMap,
    body: Body,
) -> Result<Response, ApiError> {
    let part_number = query.part_number.ok_or(ApiError(
        Error::MultipartInvalidPartNumber("partNumber is required".to_string()),
    ))?;
    let declared_size = api(content_length(headers))?;

    let (multipart, bucket, file) = load_upload(state, path, upload_id, true).await?;
    if multipart.completed {
        return Err(ApiError(Error::MultipartAlreadyCompleted));
    }
    api(state.authorize(
        principal,
        Action::BucketUpdate,
        Some(&AuthTarget::Bucket(&bucket)),
        true,
    ))?;

    let expected = api(multipart.expected_part_size(part_number))?;
    if declared_size != expected {
        return Err(ApiError(Error::MultipartInvalidChunkSize(format!(
            "Part {part_number} must be exactly {expected} bytes"
        ))));
    }

    let backend = state
        .factory
        .for_file(&file)
        .ok_or(ApiError(Error::NotFound("Multipart upload")))?;

    let seek = multipart.part_offset(part_number);
    let written = backend
        .update(body_stream(body), seek, Some(expected))
        .await;

    match written {
        Ok((bytes_written, checksum)) => {
            let part = api(state
                .db
                .call(move |conn| {
                    let tx = conn.transaction()?;
                    let part = Part::replace(
                        &tx,
                        &upload_id,
                        part_number,
                        &checksum,
                        seek,
                        seek + bytes_written.saturating_sub(1),
                    )?;
                    MultipartObject::touch(&tx, &upload_id)?;
                    tx.commit()?;
                    Ok(part)
                })
                .await)?;
            state.metrics.bytes_ingested_total.inc_by(bytes_written);
            let etag = part
                .checksum
                .as_ref()
                .map(|c| format!("\"{}\"", c.as_str()))
                .unwrap_or_default();
            Ok((StatusCode::OK, [("ETag", etag)], Json(PartRep::new(&part))).into_response())
        }
        Err(e) => {
            // Incomplete bytes may sit in the part's region; drop the row so
            // the client has to re-upload this part.
            let _ = state
                .db
                .call(move |conn| Part::delete(conn, &upload_id, part_number))
                .await;
            Err(ApiError(Error::from(e)))
        }
    }
}

/// GET …?uploadId=U — list uploaded parts.
pub async fn list_parts(
    state: &Arc<AppState>,
    principal: &Principal,
    path: &ObjectPath,
    upload_id: Uuid,
) -> Result<Response, ApiError> {
    let (multipart, _bucket, _file) = load_upload(state, path, upload_id, true).await?;
    api(state.authorize(
        principal,
        Action::MultipartRead,
        Some(&AuthTarget::Multipart(&multipart)),
        true,
    ))?;

    let parts = api(state
        .db
        .call(move |conn| Part::query_by_multipart(conn, &upload_id, PARTS_LIST_LIMIT))
        .await)?;
    let reps: Vec<PartRep> = parts.iter().map(PartRep::new).collect();
    Ok(Json(reps).into_response())
}

/// POST …?uploadId=U — verify all parts are present, mark the upload
/// completed, and hand the merge to the background queue.
async fn complete_upload(
    state: &Arc<AppState>,
    principal: &Principal,
    path: &ObjectPath,
    upload_id: Uuid,
) -> Result<Response, ApiError> {
    let (multipart, bucket, _file) = load_upload(state, path, upload_id, true).await?;
    api(state.authorize(
        principal,
        Action::BucketUpdate,
        Some(&AuthTarget::Bucket(&bucket)),
        true,
    ))?;

    let completed = api(state
        .db
        .call(move |conn| {
            let tx = conn.transaction()?;
            let multipart = MultipartObject::get(&tx, &upload_id, true)?
                .ok_or(Error::NotFound("Multipart upload"))?;
            multipart.mark_completed(&tx)?;
            tx.commit()?;
            MultipartObject::get(conn, &upload_id, true)?
                .ok_or(Error::NotFound("Multipart upload"))
        })
        .await)?;

    state.tasks.enqueue(Task::MergeMultipart { upload_id });
    info!(
        "Completed multipart upload {} for {}/{}; merge scheduled",
        upload_id, multipart.bucket_id, multipart.key
    );
    Ok(Json(MultipartRep::new(&completed)).into_response())
}

/// DELETE …?uploadId=U — abort and schedule blob cleanup.
pub async fn abort_upload(
    state: &Arc<AppState>,
    principal: &Principal,
    path: &ObjectPath,
    upload_id: Uuid,
) -> Result<Response, ApiError> {
    // Completed uploads cannot be aborted; they are invisible here.
    let (multipart, _bucket, _file) = load_upload(state, path, upload_id, false).await?;
    api(state.authorize(
        principal,
        Action::MultipartDelete,
        Some(&AuthTarget::Multipart(&multipart)),
        true,
    ))?;

    api(state
        .db
        .call(move |conn| {
            let tx = conn.transaction()?;
            MultipartObject::delete(&tx, &upload_id)?;
            tx.commit()?;
            Ok(())
        })
        .await)?;
    state.tasks.enqueue(Task::RemoveFileData {
        file_id: multipart.file_id,
        force: true,
    });
    info!("Aborted multipart upload {upload_id}");
    Ok(StatusCode::NO_CONTENT.into_response())
}

/// Load a multipart upload with its bucket and preallocated file; 404 when
/// absent, addressed under a different (bucket, key), or completed (unless
/// `with_completed`).
async fn load_upload(
    state: &Arc<AppState>,
    path: &ObjectPath,
    upload_id: Uuid,
    with_completed: bool,
) -> Result<(MultipartObject, Bucket, FileInstance), ApiError> {
    let bucket_id = path.bucket_id;
    let key = path.key.clone();
    api(state
        .db
        .call(move |conn| {
            let multipart = MultipartObject::get(conn, &upload_id, with_completed)?
                .ok_or(Error::NotFound("Multipart upload"))?;
            if multipart.bucket_id != bucket_id || multipart.key != key {
                return Err(Error::NotFound("Multipart upload"));
            }
            let bucket = Bucket::get(conn, &multipart.bucket_id)?
                .ok_or(Error::NotFound("Bucket"))?;
            let file = FileInstance::get(conn, &multipart.file_id)?
                .ok_or(Error::NotFound("Multipart upload"))?;
            Ok((multipart, bucket, file))
        })
        .await)
}
