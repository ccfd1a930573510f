//! In-process worker pool.
//!
//! Each worker claims one job at a time from the shared [`JobQueue`], rotates
//! the file on the blocking pool, writes `<output_dir>/rotated<file_name>`,
//! and records an audit line. Workers exit only once the queue is drained.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use imgrot_transform::{Angle, ImageCodec, rotate_bytes};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::{AuditLog, Job, JobError, JobQueue, OUTPUT_PREFIX, enqueue_directory};

/// Totals reported after the pool drains.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolReport {
    pub processed: u64,
    pub failed: u64,
}

impl PoolReport {
    fn merge(&mut self, other: PoolReport) {
        self.processed += other.processed;
        self.failed += other.failed;
    }
}

/// Where the local pool writes the rotated version of `file_name`.
pub fn output_path(output_dir: &Path, file_name: &str) -> PathBuf {
    output_dir.join(format!("{OUTPUT_PREFIX}{file_name}"))
}

/// Shared state handed to every worker.
struct WorkerContext {
    input_dir: PathBuf,
    output_dir: PathBuf,
    codec: Arc<dyn ImageCodec>,
    audit: Arc<dyn AuditLog>,
}

/// Fixed-size pool of local rotation workers.
pub struct LocalPool {
    workers: usize,
    ctx: Arc<WorkerContext>,
}

impl LocalPool {
    pub fn new(
        input_dir: PathBuf,
        output_dir: PathBuf,
        workers: usize,
        codec: Arc<dyn ImageCodec>,
        audit: Arc<dyn AuditLog>,
    ) -> Self {
        Self {
            workers,
            ctx: Arc::new(WorkerContext {
                input_dir,
                output_dir,
                codec,
                audit,
            }),
        }
    }

    /// Enumerates the input directory and rotates every file by `angle`.
    ///
    /// The producer runs concurrently with the workers. An unreadable input
    /// directory is returned as an error once the workers have exited.
    pub async fn rotate_directory(&self, angle: Angle) -> Result<PoolReport, JobError> {
        if self.workers == 0 {
            return Err(JobError::NoWorkers);
        }

        let queue = Arc::new(JobQueue::new());
        let producer = tokio::task::spawn_blocking({
            let queue = Arc::clone(&queue);
            let input_dir = self.ctx.input_dir.clone();
            move || enqueue_directory(&queue, &input_dir, angle)
        });

        let report = self.run(Arc::clone(&queue)).await;
        let enqueued = producer.await??;
        let report = report?;

        info!(
            enqueued,
            processed = report.processed,
            failed = report.failed,
            "local pool finished"
        );
        Ok(report)
    }

    /// Runs the workers until `queue` is drained.
    ///
    /// Someone else must feed the queue and eventually call
    /// [`JobQueue::mark_finished`].
    pub async fn run(&self, queue: Arc<JobQueue>) -> Result<PoolReport, JobError> {
        if self.workers == 0 {
            return Err(JobError::NoWorkers);
        }
        tokio::fs::create_dir_all(&self.ctx.output_dir).await?;

        let mut set = JoinSet::new();
        for worker_id in 0..self.workers {
            let queue = Arc::clone(&queue);
            let ctx = Arc::clone(&self.ctx);
            set.spawn(work(worker_id, queue, ctx));
        }

        let mut report = PoolReport::default();
        while let Some(result) = set.join_next().await {
            report.merge(result?);
        }
        Ok(report)
    }
}

async fn work(worker_id: usize, queue: Arc<JobQueue>, ctx: Arc<WorkerContext>) -> PoolReport {
    debug!(worker = worker_id, "worker started");
    let mut report = PoolReport::default();
    let mut sequence = 0u64;

    while let Some(job) = queue.next_job().await {
        match process(&ctx, &job).await {
            Ok(bytes) => {
                sequence += 1;
                report.processed += 1;
                debug!(worker = worker_id, file = %job.file_name, bytes, "job done");
                if let Err(e) = ctx.audit.record(worker_id, sequence, &job.file_name) {
                    warn!(worker = worker_id, "failed to write audit line: {e}");
                }
            }
            Err(e) => {
                report.failed += 1;
                warn!(worker = worker_id, file = %job.file_name, "job failed: {e}");
            }
        }
    }

    debug!(worker = worker_id, processed = report.processed, "worker exiting");
    report
}

/// Rotates one file. Returns the size of the written output.
async fn process(ctx: &Arc<WorkerContext>, job: &Job) -> Result<usize, JobError> {
    let input = ctx.input_dir.join(&job.file_name);
    let output = output_path(&ctx.output_dir, &job.file_name);
    let codec = Arc::clone(&ctx.codec);
    let angle = job.angle;

    tokio::task::spawn_blocking(move || -> Result<usize, JobError> {
        let bytes = std::fs::read(&input)?;
        let rotated = rotate_bytes(codec.as_ref(), &bytes, angle)?;
        std::fs::write(&output, &rotated)?;
        Ok(rotated.len())
    })
    .await?
}
