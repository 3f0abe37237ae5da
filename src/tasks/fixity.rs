//! Fixity: scheduled checksum verification.

use super::{Task, TaskContext};
use crate::errors::{Error, Result};
use crate::models::FileInstance;
use crate::storage::StorageError;
use chrono::{Duration, Utc};
use tracing::warn;
use uuid::Uuid;

/// Recompute the checksum of one file and record the outcome.
///
/// `last_check` becomes `true` on a match, `false` on a mismatch, and
/// `NULL` when the blob is missing (with `pessimistic` the task also fails
/// in that case). Files that are not readable are skipped.
pub async fn verify_checksum(
    ctx: &TaskContext,
    file_id: Uuid,
    pessimistic: bool,
) -> Result<&'static str> {
    let file = match ctx
        .db
        .call(move |conn| FileInstance::get(conn, &file_id))
        .await?
    {
        Some(file) => file,
        None => return Ok("skipped"),
    };
    if !file.readable {
        return Ok("skipped");
    }
    let backend = match ctx.factory.for_file(&file) {
        Some(backend) => backend,
        None => {
            warn!("file {} has no resolvable backend; skipping fixity", file_id);
            return Ok("skipped");
        }
    };

    let loaded_updated = file.updated;
    match backend.checksum().await {
        Ok(computed) => {
            let matches = file.checksum.as_ref() == Some(&computed);
            let recorded = ctx
                .db
                .call(move |conn| {
                    FileInstance::record_fixity(conn, &file_id, &loaded_updated, Some(matches))
                })
                .await?;
            if !recorded {
                return Ok("stale");
            }
            if matches {
                Ok("ok")
            } else {
                warn!(
                    "fixity mismatch for file {}: stored {:?}, computed {}",
                    file_id, file.checksum, computed
                );
                ctx.metrics.fixity_mismatch_total.inc();
                Ok("mismatch")
            }
        }
        // Missing blob: verification aborted, not a mismatch.
        Err(StorageError::NotFound(what)) => {
            ctx.db
                .call(move |conn| {
                    FileInstance::record_fixity(conn, &file_id, &loaded_updated, None)
                })
                .await?;
            if pessimistic {
                return Err(Error::Storage(StorageError::NotFound(what)));
            }
            Ok("missing")
        }
        Err(e) => Err(e.into()),
    }
}

/// Enqueue a fair slice of fixity checks.
///
/// Sized so that every readable file is visited once per
/// `fixity_frequency_secs`: each batch covers
/// `total * batch_interval / frequency` files (at least one when any are
/// due), clamped by the optional count and byte caps.
pub async fn schedule_checksum_verification(ctx: &TaskContext) -> Result<usize> {
    let frequency = ctx.config.fixity_frequency_secs.max(1);
    let batch_interval = ctx.config.fixity_batch_interval_secs.max(1);
    let max_count = ctx.config.fixity_max_count;
    let max_size = ctx.config.fixity_max_size;

    let files = ctx
        .db
        .call(move |conn| {
            let total = FileInstance::count_readable(conn)?;
            let mut batch = (total * batch_interval).div_ceil(frequency).max(1);
            if let Some(cap) = max_count {
                batch = batch.min(cap);
            }
            let cutoff = Utc::now() - Duration::seconds(frequency as i64);
            FileInstance::due_for_check(conn, &cutoff, batch)
        })
        .await?;

    let mut scheduled = 0;
    let mut bytes = 0u64;
    for file in files {
        if let Some(cap) = max_size {
            bytes += file.size;
            if scheduled > 0 && bytes > cap {
                break;
            }
        }
        ctx.queue.enqueue(Task::VerifyChecksum {
            file_id: file.id,
            pessimistic: false,
        });
        scheduled += 1;
    }
    Ok(scheduled)
}
