//! Background maintenance: a queue-fed worker pool plus periodic sweeps.
//!
//! Tasks are idempotent and retry-safe. At most one task runs per file at a
//! time (an in-flight guard keyed by the target id), and fixity writes use
//! optimistic locking on the file row's `updated` column, so a concurrent
//! foreground mutation makes the background write a no-op.

mod cleanup;
mod fixity;
mod merge;
mod migrate;

pub use cleanup::{clear_orphaned_files, remove_expired_multipartobjects, remove_file_data};
pub use fixity::{schedule_checksum_verification, verify_checksum};
pub use merge::merge_multipartobject;
pub use migrate::migrate_file;

use crate::config::Config;
use crate::db::Database;
use crate::errors::Result;
use crate::metrics::Metrics;
use crate::models::MultipartObject;
use crate::storage::StorageFactory;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Semaphore;
use tracing::{debug, warn};
use uuid::Uuid;

/// A unit of background work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Task {
    VerifyChecksum {
        file_id: Uuid,
        pessimistic: bool,
    },
    MigrateFile {
        file_id: Uuid,
        location_name: String,
        post_fixity_check: bool,
    },
    RemoveFileData {
        file_id: Uuid,
        force: bool,
    },
    MergeMultipart {
        upload_id: Uuid,
    },
}

impl Task {
    fn name(&self) -> &'static str {
        match self {
            Task::VerifyChecksum { .. } => "verify_checksum",
            Task::MigrateFile { .. } => "migrate_file",
            Task::RemoveFileData { .. } => "remove_file_data",
            Task::MergeMultipart { .. } => "merge_multipartobject",
        }
    }

    /// Id the at-most-one-in-flight discipline keys on.
    fn guard_key(&self) -> Uuid {
        match self {
            Task::VerifyChecksum { file_id, .. }
            | Task::MigrateFile { file_id, .. }
            | Task::RemoveFileData { file_id, .. } => *file_id,
            Task::MergeMultipart { upload_id } => *upload_id,
        }
    }
}

/// Cloneable handle used by request handlers to hand work to the pool.
#[derive(Clone)]
pub struct TaskQueue {
    tx: UnboundedSender<Task>,
}

impl TaskQueue {
    pub fn new() -> (Self, UnboundedReceiver<Task>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn enqueue(&self, task: Task) {
        if self.tx.send(task).is_err() {
            warn!("task queue is closed; dropping task");
        }
    }
}

/// Everything a task needs to run.
pub struct TaskContext {
    pub db: Database,
    pub config: Arc<Config>,
    pub factory: Arc<StorageFactory>,
    pub metrics: Arc<Metrics>,
    pub queue: TaskQueue,
    in_flight: DashMap<Uuid, ()>,
}

impl TaskContext {
    pub fn new(
        db: Database,
        config: Arc<Config>,
        factory: Arc<StorageFactory>,
        metrics: Arc<Metrics>,
        queue: TaskQueue,
    ) -> Self {
        Self {
            db,
            config,
            factory,
            metrics,
            queue,
            in_flight: DashMap::new(),
        }
    }
}

/// Start the worker pool: a dispatcher that drains the queue and runs at
/// most `workers` tasks concurrently.
pub fn start_workers(ctx: Arc<TaskContext>, mut rx: UnboundedReceiver<Task>, workers: usize) {
    let semaphore = Arc::new(Semaphore::new(workers.max(1)));
    tokio::spawn(async move {
        while let Some(task) = rx.recv().await {
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(p) => p,
                Err(_) => break,
            };
            let ctx = ctx.clone();
            tokio::spawn(async move {
                let _permit = permit;
                run_task(&ctx, task).await;
            });
        }
        debug!("task dispatcher stopped");
    });
}

/// Execute a single task under the per-target guard, recording the outcome.
pub async fn run_task(ctx: &TaskContext, task: Task) {
    let name = task.name();
    let key = task.guard_key();

    match ctx.in_flight.entry(key) {
        dashmap::mapref::entry::Entry::Occupied(_) => {
            debug!("{} for {} already in flight; skipping", name, key);
            ctx.metrics.record_task(name, "in_flight");
            return;
        }
        dashmap::mapref::entry::Entry::Vacant(entry) => {
            entry.insert(());
        }
    }

    let result = match task {
        Task::VerifyChecksum {
            file_id,
            pessimistic,
        } => verify_checksum(ctx, file_id, pessimistic).await,
        Task::MigrateFile {
            file_id,
            location_name,
            post_fixity_check,
        } => migrate_file(ctx, file_id, &location_name, post_fixity_check).await,
        Task::RemoveFileData { file_id, force } => remove_file_data(ctx, file_id, force).await,
        Task::MergeMultipart { upload_id } => merge_multipartobject(ctx, upload_id).await,
    };
    ctx.in_flight.remove(&key);

    match result {
        Ok(outcome) => {
            debug!("{} for {}: {}", name, key, outcome);
            ctx.metrics.record_task(name, outcome);
        }
        Err(e) => {
            warn!("{} for {} failed: {}", name, key, e);
            ctx.metrics.record_task(name, "error");
        }
    }
}

/// Periodic maintenance sweep: expired multiparts, orphaned files, stuck
/// merges.
pub async fn run_maintenance(ctx: &TaskContext) -> Result<()> {
    let expired = remove_expired_multipartobjects(ctx).await?;
    if expired > 0 {
        debug!("expired {} multipart uploads", expired);
    }

    let orphans = clear_orphaned_files(ctx).await?;
    if orphans > 0 {
        debug!("scheduled cleanup for {} orphaned files", orphans);
    }

    // Re-enqueue merges that were interrupted (e.g. by a restart) — a
    // completed MultipartObject row with no merge is always retryable.
    let pending = ctx
        .db
        .call(|conn| MultipartObject::pending_merges(conn))
        .await?;
    for multipart in pending {
        ctx.queue.enqueue(Task::MergeMultipart {
            upload_id: multipart.upload_id,
        });
    }
    Ok(())
}

/// Spawn the periodic loops: maintenance sweep and fixity scheduling.
pub fn spawn_periodic(ctx: Arc<TaskContext>) {
    let maintenance_interval = Duration::from_secs(ctx.config.maintenance_interval_secs.max(1));
    let fixity_interval = Duration::from_secs(ctx.config.fixity_batch_interval_secs.max(1));

    {
        let ctx = ctx.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(maintenance_interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tick.tick().await;
                if let Err(e) = run_maintenance(&ctx).await {
                    warn!("maintenance sweep failed: {}", e);
                }
            }
        });
    }

    tokio::spawn(async move {
        let mut tick = tokio::time::interval(fixity_interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tick.tick().await;
            match schedule_checksum_verification(&ctx).await {
                Ok(scheduled) if scheduled > 0 => {
                    debug!("scheduled {} fixity checks", scheduled)
                }
                Ok(_) => {}
                Err(e) => warn!("fixity scheduling failed: {}", e),
            }
        }
    });
}
