//! Object-level handlers: single-shot upload, download (range-aware),
//! metadata, delete markers, and hard version deletes.

use super::{
    api, body_stream, content_length, content_md5, extract_tags, filename_of, multipart,
    request_mimetype, Action, AppState, AuthTarget, Principal,
};
use crate::api::errors::ApiError;
use crate::api::extractors::ObjectPath;
use crate::api::send_file::{send_file, SendFileOptions};
use crate::api::serializer::ObjectVersionRep;
use crate::errors::Error;
use crate::models::{Bucket, FileInstance, FileSummary, Location, ObjectVersion};
use crate::storage::SaveOptions;
use crate::tasks::Task;
use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

/// Query parameters for object-level operations.
#[derive(Debug, Deserialize, Default)]
pub struct ObjectQuery {
    #[serde(rename = "versionId")]
    pub version_id: Option<Uuid>,
    #[serde(rename = "uploadId")]
    pub upload_id: Option<Uuid>,
    #[serde(rename = "partNumber")]
    pub part_number: Option<u64>,
    /// Initiate multipart (`?uploads`)
    pub uploads: Option<String>,
    /// Multipart total size (initiate)
    pub size: Option<u64>,
    /// Multipart part size (initiate)
    #[serde(rename = "partSize")]
    pub part_size: Option<u64>,
    /// Serve as attachment (`?download`)
    pub download: Option<String>,
}

/// Resolve bucket + object version + file, enforcing read permissions.
async fn fetch_object(
    state: &Arc<AppState>,
    principal: &Principal,
    bucket_id: Uuid,
    key: String,
    version_id: Option<Uuid>,
) -> Result<(Bucket, ObjectVersion, FileInstance, Vec<(String, String)>), ApiError> {
    let (bucket, version, file, tags) = api(state
        .db
        .call(move |conn| {
            let bucket = Bucket::get(conn, &bucket_id)?.ok_or(Error::NotFound("Bucket"))?;
            let version = ObjectVersion::get(conn, &bucket_id, &key, version_id.as_ref(), false)?
                .ok_or(Error::NotFound("Object"))?;
            let file_id = version.file_id.ok_or(Error::NotFound("Object"))?;
            let file =
                FileInstance::get(conn, &file_id)?.ok_or(Error::NotFound("Object"))?;
            let tags = version.tags(conn)?;
            Ok((bucket, version, file, tags))
        })
        .await)?;

    api(state.authorize(
        principal,
        Action::ObjectRead,
        Some(&AuthTarget::Object(&version)),
        true,
    ))?;
    if !version.is_head {
        api(state.authorize(
            principal,
            Action::ObjectReadVersion,
            Some(&AuthTarget::Object(&version)),
            false,
        ))?;
    }
    Ok((bucket, version, file, tags))
}

async fn serve_object(
    state: Arc<AppState>,
    principal: Principal,
    path: ObjectPath,
    query: ObjectQuery,
    headers: HeaderMap,
    head_only: bool,
) -> Result<Response, ApiError> {
    let (_bucket, version, file, _tags) = fetch_object(
        &state,
        &principal,
        path.bucket_id,
        path.key.clone(),
        query.version_id,
    )
    .await?;

    let backend = state
        .factory
        .for_file(&file)
        .ok_or(ApiError(Error::NotFound("Object")))?;

    let response = api(send_file(
        backend.as_ref(),
        &file,
        SendFileOptions {
            filename: filename_of(&path.key),
            mimetype: version.mimetype.as_deref(),
            restricted: true,
            as_attachment: query.download.is_some(),
            trusted: false,
            head_only,
        },
        &headers,
    )
    .await)?;

    if !head_only && response.status().is_success() {
        info!(
            target: "depot::events",
            event = "file_downloaded",
            bucket = %version.bucket_id,
            key = %version.key,
            version_id = %version.version_id,
        );
        state.metrics.files_downloaded_total.inc();
        state.metrics.bytes_served_total.inc_by(file.size);
    }
    Ok(response)
}

/// GET /files/{bucket}/{key} — download (Range supported), or list parts
/// with `?uploadId`.
#[instrument(skip(state, headers))]
pub async fn get_object(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    path: ObjectPath,
    Query(query): Query<ObjectQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    if let Some(upload_id) = query.upload_id {
        return multipart::list_parts(&state, &principal, &path, upload_id).await;
    }
    serve_object(state, principal, path, query, headers, false).await
}

/// HEAD /files/{bucket}/{key} — headers only.
#[instrument(skip(state, headers))]
pub async fn head_object(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    path: ObjectPath,
    Query(query): Query<ObjectQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    serve_object(state, principal, path, query, headers, true).await
}

/// PUT /files/{bucket}/{key} — upload a new version, or a multipart part
/// with `?uploadId&partNumber`.
#[instrument(skip(state, headers, body))]
pub async fn put_object(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    path: ObjectPath,
    Query(query): Query<ObjectQuery>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, ApiError> {
    if let Some(upload_id) = query.upload_id {
        return multipart::upload_part(&state, &principal, &path, upload_id, &query, &headers, body)
            .await;
    }
    create_object(&state, &principal, path, &headers, body).await
}

/// The single-shot upload pipeline: limits up front, stream through the
/// checksum reader into the backend, then commit the version in one
/// transaction.
async fn create_object(
    state: &Arc<AppState>,
    principal: &Principal,
    path: ObjectPath,
    headers: &HeaderMap,
    body: Body,
) -> Result<Response, ApiError> {
    let declared_size = api(content_length(headers))?;
    let min_size = state.config.min_file_size;
    if declared_size < min_size {
        return Err(ApiError(Error::FileSize(
            "File is smaller than the minimum allowed size.".to_string(),
        )));
    }

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

    // Content-Length is client-supplied; the checksum stream re-enforces the
    // limit while bytes actually flow.
    let size_limit = bucket.size_limit();
    if let Some(limit) = &size_limit {
        if declared_size > limit.limit {
            return Err(ApiError(Error::FileSize(limit.reason.clone())));
        }
    }

    let mut file = FileInstance::fresh(Some(&bucket.default_storage_class));
    let backend = api(state.factory.for_new_file(&mut file, &location))?;
    {
        let file = file.clone();
        api(state.db.call(move |conn| file.insert(conn)).await)?;
    }

    let saved = backend
        .save(
            body_stream(body),
            SaveOptions {
                size_limit,
                size: Some(declared_size),
                progress: None,
            },
        )
        .await;

    let info = match saved {
        Ok(info) => info,
        Err(e) => {
            // The backend already removed the partial blob; drop the
            // never-referenced file row as well.
            let file_id = file.id;
            let _ = state
                .db
                .call(move |conn| FileInstance::delete_row(conn, &file_id, false))
                .await;
            return Err(ApiError(Error::from(e)));
        }
    };

    // Verify Content-MD5 when the client sent one and md5 is our digest.
    if let (Some(expected), Some(checksum)) = (content_md5(headers), info.checksum.as_ref()) {
        if checksum.algo() == "md5" && checksum.hex_digest() != expected {
            let file_id = file.id;
            let _ = backend.delete().await;
            let _ = state
                .db
                .call(move |conn| FileInstance::delete_row(conn, &file_id, false))
                .await;
            return Err(ApiError(Error::InvalidOperation(
                "Content-MD5 mismatch.".to_string(),
            )));
        }
    }

    let key = path.key.clone();
    let file_id = file.id;
    let mimetype = request_mimetype(headers)
        .or_else(|| {
            mime_guess::from_path(&path.key)
                .first()
                .map(|m| m.essence_str().to_string())
        });
    let tags = extract_tags(headers);
    let blob_size = info.size;
    let etag = info
        .checksum
        .clone()
        .map(|c| c.as_str().to_string())
        .unwrap_or_default();

    let rep = api(state
        .db
        .call(move |conn| {
            let tx = conn.transaction()?;
            FileInstance::finalize(&tx, &file_id, &info)?;
            let version =
                ObjectVersion::create(&tx, &bucket_id, &key, Some(&file_id), mimetype.as_deref())?;
            for (tag_key, tag_value) in &tags {
                version.set_tag(&tx, tag_key, tag_value)?;
            }
            Bucket::add_size(&tx, &bucket_id, blob_size as i64)?;
            let summary = FileSummary {
                size: blob_size,
                checksum: info.checksum.clone(),
            };
            let tags = version.tags(&tx)?;
            let rep = ObjectVersionRep::new(&version, Some(&summary), tags);
            tx.commit()?;
            Ok(rep)
        })
        .await)?;

    info!(
        "PUT {}/{} ({} bytes)",
        path.bucket_id, path.key, blob_size
    );
    state.metrics.objects_created_total.inc();
    state.metrics.bytes_ingested_total.inc_by(blob_size);

    Ok((
        StatusCode::OK,
        [("ETag", format!("\"{etag}\""))],
        Json(rep),
    )
        .into_response())
}

/// DELETE /files/{bucket}/{key} — create a delete marker; with `?versionId`
/// permanently remove one version; with `?uploadId` abort a multipart
/// upload.
#[instrument(skip(state))]
pub async fn delete_object(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    path: ObjectPath,
    Query(query): Query<ObjectQuery>,
) -> Result<Response, ApiError> {
    if let Some(upload_id) = query.upload_id {
        return multipart::abort_upload(&state, &principal, &path, upload_id).await;
    }

    let bucket_id = path.bucket_id;
    let bucket = api(state
        .db
        .call(move |conn| Bucket::get(conn, &bucket_id))
        .await)?
    .ok_or(ApiError(Error::NotFound("Bucket")))?;
    api(bucket.ensure_mutable())?;

    match query.version_id {
        // Hard delete of one version.
        Some(version_id) => {
            let key = path.key.clone();
            let version = api(state
                .db
                .call(move |conn| {
                    ObjectVersion::get(conn, &bucket_id, &key, Some(&version_id), true)
                })
                .await)?
            .ok_or(ApiError(Error::NotFound("Object")))?;

            api(state.authorize(
                &principal,
                Action::ObjectDelete,
                Some(&AuthTarget::Object(&version)),
                false,
            ))?;
            api(state.authorize(
                &principal,
                Action::ObjectDeleteVersion,
                Some(&AuthTarget::Bucket(&bucket)),
                false,
            ))?;

            let file_id = version.file_id;
            let removed = version.clone();
            api(state
                .db
                .call(move |conn| {
                    let tx = conn.transaction()?;
                    if let Some(file_id) = &removed.file_id {
                        if let Some(file) = FileInstance::get(&tx, file_id)? {
                            Bucket::add_size(&tx, &bucket_id, -(file.size as i64))?;
                        }
                    }
                    removed.remove(&tx)?;
                    tx.commit()?;
                    Ok(())
                })
                .await)?;

            // Blob cleanup happens off the request path; the orphan sweep
            // repairs any race.
            if let Some(file_id) = file_id {
                state.tasks.enqueue(Task::RemoveFileData {
                    file_id,
                    force: false,
                });
            }
            info!(
                "Hard-deleted {}/{} version {}",
                path.bucket_id, path.key, version_id
            );
            Ok(StatusCode::NO_CONTENT.into_response())
        }
        // Logical delete: new head marker.
        None => {
            let key = path.key.clone();
            let head = api(state
                .db
                .call(move |conn| ObjectVersion::get(conn, &bucket_id, &key, None, false))
                .await)?
            .ok_or(ApiError(Error::NotFound("Object")))?;
            api(state.authorize(
                &principal,
                Action::ObjectDelete,
                Some(&AuthTarget::Object(&head)),
                false,
            ))?;

            let key = path.key.clone();
            api(state
                .db
                .call(move |conn| {
                    let tx = conn.transaction()?;
                    ObjectVersion::delete(&tx, &bucket_id, &key)?;
                    tx.commit()?;
                    Ok(())
                })
                .await)?;
            info!("Delete marker created for {}/{}", path.bucket_id, path.key);
            Ok(StatusCode::NO_CONTENT.into_response())
        }
    }
}
