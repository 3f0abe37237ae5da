//! Multipart merge: finalize a completed upload into an object version.

use super::TaskContext;
use crate::errors::{Error, Result};
use crate::models::{Bucket, FileInstance, MultipartObject, ObjectVersion};
use crate::storage::BlobInfo;
use tracing::{info, warn};
use uuid::Uuid;

/// Finalize a completed multipart upload.
///
/// Parts were written at their offsets into the preallocated blob, so the
/// merge computes the checksum over the assembled file, flips the
/// FileInstance to read-only, creates the new head ObjectVersion, and drops
/// the multipart rows — all in one transaction. On failure the upload stays
/// `completed = true` and the maintenance sweep retries; no half-visible
/// version is ever committed.
pub async fn merge_multipartobject(ctx: &TaskContext, upload_id: Uuid) -> Result<&'static str> {
    let loaded = ctx
        .db
        .call(move |conn| {
            let multipart = MultipartObject::get(conn, &upload_id, true)?;
            match multipart {
                None => Ok(None),
                Some(multipart) => {
                    let file = FileInstance::get(conn, &multipart.file_id)?
                        .ok_or(Error::NotFound("File"))?;
                    Ok(Some((multipart, file)))
                }
            }
        })
        .await?;
    let (multipart, file) = match loaded {
        Some(found) => found,
        // Already merged (or aborted) — idempotent success.
        None => return Ok("skipped"),
    };
    if !multipart.completed {
        warn!("merge requested for incomplete upload {}; skipping", upload_id);
        return Ok("skipped");
    }

    let backend = ctx
        .factory
        .for_file(&file)
        .ok_or_else(|| Error::InvalidOperation("Upload target has no backend".to_string()))?;
    let checksum = backend.checksum().await.map_err(Error::from)?;

    let info = BlobInfo {
        uri: file
            .uri
            .clone()
            .ok_or_else(|| Error::InvalidOperation("Upload target has no URI".to_string()))?,
        size: multipart.size,
        checksum: Some(checksum),
        readable: true,
        writable: false,
    };

    let file_id = file.id;
    let mimetype = mime_guess::from_path(&multipart.key)
        .first()
        .map(|m| m.essence_str().to_string());

    let result = ctx
        .db
        .call(move |conn| {
            let tx = conn.transaction()?;
            FileInstance::finalize(&tx, &file_id, &info)?;
            ObjectVersion::create(
                &tx,
                &multipart.bucket_id,
                &multipart.key,
                Some(&file_id),
                mimetype.as_deref(),
            )?;
            Bucket::add_size(&tx, &multipart.bucket_id, multipart.size as i64)?;
            MultipartObject::delete(&tx, &multipart.upload_id)?;
            tx.commit()?;
            Ok(())
        })
        .await;

    match result {
        Ok(()) => {
            ctx.metrics.objects_created_total.inc();
            ctx.metrics
                .multipart_merges_total
                .with_label_values(&["ok"])
                .inc();
            info!("merged multipart upload {}", upload_id);
            Ok("ok")
        }
        Err(e) => {
            ctx.metrics
                .multipart_merges_total
                .with_label_values(&["error"])
                .inc();
            Err(e)
        }
    }
}
