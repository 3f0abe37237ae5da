//! Removal of file data, orphan repair, and multipart expiration.

use super::{Task, TaskContext};
use crate::errors::{Error, Result};
use crate::models::{FileInstance, MultipartObject, ObjectVersion};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Remove a FileInstance row, then best-effort remove its blob.
///
/// Skips read-only rows unless `force` is set, and rows still referenced by
/// object versions. The row goes first: a crash after the row delete leaves
/// a dangling blob, which is the tolerated window `clear_orphaned_files`
/// repairs.
pub async fn remove_file_data(ctx: &TaskContext, file_id: Uuid, force: bool) -> Result<&'static str> {
    let file = match ctx
        .db
        .call(move |conn| FileInstance::get(conn, &file_id))
        .await?
    {
        Some(file) => file,
        None => return Ok("skipped"),
    };
    if !file.writable && !force {
        debug!("file {} is read-only and force not set; skipping", file_id);
        return Ok("skipped");
    }

    let still_referenced = ctx
        .db
        .call(move |conn| ObjectVersion::count_for_file(conn, &file_id))
        .await?
        > 0;
    if still_referenced {
        debug!("file {} still referenced by versions; skipping", file_id);
        return Ok("skipped");
    }

    let deleted = ctx
        .db
        .call(move |conn| FileInstance::delete_row(conn, &file_id, force))
        .await;
    match deleted {
        Ok(true) => {}
        Ok(false) => return Ok("skipped"),
        // A concurrent writer may have re-referenced the file between the
        // check and the delete; the FK keeps the row and we back off.
        Err(Error::Database(msg)) if msg.contains("FOREIGN KEY") => {
            debug!("file {} became referenced during removal; skipping", file_id);
            return Ok("skipped");
        }
        Err(e) => return Err(e),
    }

    if let Some(backend) = ctx.factory.for_file(&file) {
        if let Err(e) = backend.delete().await {
            warn!(
                "blob removal for {} failed (will be caught by orphan sweep): {}",
                file_id, e
            );
        }
    }
    info!("removed file data for {}", file_id);
    Ok("ok")
}

/// Scan for FileInstances no longer referenced by any object version or
/// multipart upload and schedule their removal.
pub async fn clear_orphaned_files(ctx: &TaskContext) -> Result<usize> {
    let orphans = ctx
        .db
        .call(move |conn| FileInstance::orphans(conn, 1000))
        .await?;
    let count = orphans.len();
    for file in orphans {
        ctx.queue.enqueue(Task::RemoveFileData {
            file_id: file.id,
            // Orphans are unreachable regardless of their read-only flag.
            force: true,
        });
    }
    Ok(count)
}

/// Delete every incomplete multipart upload whose last activity is older
/// than the configured expiry, cascading to parts and scheduling blob
/// cleanup.
pub async fn remove_expired_multipartobjects(ctx: &TaskContext) -> Result<usize> {
    let expires = ctx.config.multipart_expires();
    let expired = ctx
        .db
        .call(move |conn| MultipartObject::expired(conn, expires))
        .await?;

    let mut removed = 0;
    for multipart in expired {
        let upload_id = multipart.upload_id;
        ctx.db
            .call(move |conn| {
                let tx = conn.transaction()?;
                MultipartObject::delete(&tx, &upload_id)?;
                tx.commit()?;
                Ok(())
            })
            .await?;
        ctx.queue.enqueue(Task::RemoveFileData {
            file_id: multipart.file_id,
            force: true,
        });
        info!(
            "expired multipart upload {} for {}/{}",
            upload_id, multipart.bucket_id, multipart.key
        );
        removed += 1;
    }
    Ok(removed)
}
