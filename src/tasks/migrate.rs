//! File migration between storage locations.

use super::{Task, TaskContext};
use crate::errors::{Error, Result};
use crate::models::{FileInstance, Location, ObjectVersion};
use crate::storage::SaveOptions;
use tracing::{info, warn};
use uuid::Uuid;

/// Copy a file instance into `location_name`, relink every object version
/// to the copy, and optionally enqueue a fixity check on it.
///
/// The source instance is left in place (versions no longer reference it,
/// so the orphan sweep removes it). A failure at any step deletes the
/// half-built destination and surfaces the error.
pub async fn migrate_file(
    ctx: &TaskContext,
    file_id: Uuid,
    location_name: &str,
    post_fixity_check: bool,
) -> Result<&'static str> {
    let location_name = location_name.to_string();
    let (src, location) = ctx
        .db
        .call(move |conn| {
            let src = FileInstance::get(conn, &file_id)?.ok_or(Error::NotFound("File"))?;
            let location =
                Location::get_by_name(conn, &location_name)?.ok_or(Error::NotFound("Location"))?;
            Ok((src, location))
        })
        .await?;
    if !src.readable {
        return Ok("skipped");
    }
    let src_backend = ctx
        .factory
        .for_file(&src)
        .ok_or_else(|| Error::InvalidOperation("Source file has no backend".to_string()))?;

    let mut dst = FileInstance::fresh(src.storage_class.as_deref());
    let dst_backend = ctx.factory.for_new_file(&mut dst, &location)?;
    {
        let dst = dst.clone();
        ctx.db.call(move |conn| dst.insert(conn)).await?;
    }

    let dst_id = dst.id;
    let outcome: Result<()> = async {
        let stream = src_backend.open(None).await.map_err(Error::from)?;
        let info = dst_backend
            .save(
                stream,
                SaveOptions {
                    size_limit: None,
                    size: Some(src.size),
                    progress: None,
                },
            )
            .await
            .map_err(Error::from)?;

        // The copy must be byte-identical before any version is moved.
        if info.checksum != src.checksum {
            return Err(Error::InvalidOperation(
                "Checksum mismatch after copy; aborting migration.".to_string(),
            ));
        }

        ctx.db
            .call(move |conn| {
                let tx = conn.transaction()?;
                FileInstance::finalize(&tx, &dst_id, &info)?;
                ObjectVersion::relink_all(&tx, &file_id, &dst_id)?;
                tx.commit()?;
                Ok(())
            })
            .await
    }
    .await;

    if let Err(e) = outcome {
        warn!("migration of {} failed: {}; removing destination", file_id, e);
        if let Err(cleanup) = dst_backend.delete().await {
            warn!("failed to remove migration leftovers: {}", cleanup);
        }
        let _ = ctx
            .db
            .call(move |conn| FileInstance::delete_row(conn, &dst_id, true))
            .await;
        return Err(e);
    }

    info!(
        "migrated file {} to location {:?} as {}",
        file_id, location.name, dst_id
    );
    if post_fixity_check {
        ctx.queue.enqueue(Task::VerifyChecksum {
            file_id: dst_id,
            pessimistic: false,
        });
    }
    Ok("ok")
}
