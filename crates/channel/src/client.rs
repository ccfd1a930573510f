//! Rotation client.
//!
//! [`ClientSession`] drives one connection: ROTATE requests one at a time,
//! then EXIT. [`RotationClient`] runs `workers` sessions concurrently over a
//! shared [`JobQueue`] and writes each result to `<output_dir>/<file_name>`.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use imgrot_jobs::{AuditLog, JobError, JobQueue, enqueue_directory};
use imgrot_transform::Angle;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::error::ChannelError;
use crate::packet::{Operation, Packet};
use crate::wire::{copy_payload, read_packet, with_deadline, write_packet};
use crate::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_IO_TIMEOUT, DEFAULT_PORT};

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server_addr: SocketAddr,
    /// Number of concurrent connections draining the queue.
    pub workers: usize,
    pub connect_timeout: Duration,
    /// Deadline for each header read and payload transfer.
    pub io_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_addr: ([127, 0, 0, 1], DEFAULT_PORT).into(),
            workers: 1,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            io_timeout: DEFAULT_IO_TIMEOUT,
        }
    }
}

/// One open connection to a rotation server.
pub struct ClientSession {
    stream: TcpStream,
    io_timeout: Duration,
}

impl ClientSession {
    pub async fn connect(config: &ClientConfig) -> Result<Self, ChannelError> {
        let stream = with_deadline(config.connect_timeout, async {
            TcpStream::connect(config.server_addr)
                .await
                .map_err(ChannelError::from)
        })
        .await?;
        stream.set_nodelay(true)?;
        debug!(server = %config.server_addr, "connected");

        Ok(Self {
            stream,
            io_timeout: config.io_timeout,
        })
    }

    /// Sends `input` for rotation and writes the result to `output`.
    ///
    /// Returns the number of bytes written. A NAK is
    /// [`ChannelError::Rejected`]; local file problems are
    /// [`ChannelError::LocalFile`]. Both leave the session usable.
    pub async fn rotate_file(
        &mut self,
        input: &Path,
        output: &Path,
        angle: Angle,
    ) -> Result<u64, ChannelError> {
        let mut file = tokio::fs::File::open(input).await.map_err(local_file(input))?;
        let len = file.metadata().await.map_err(local_file(input))?.len();
        let size = u32::try_from(len).map_err(|_| ChannelError::LocalFile {
            path: input.to_path_buf(),
            source: std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("{len} bytes exceeds the 4 GiB frame limit"),
            ),
        })?;

        with_deadline(self.io_timeout, async {
            write_packet(&mut self.stream, &Packet::rotate(angle, size)).await?;
            copy_payload(&mut file, &mut self.stream, len).await
        })
        .await?;

        let response = with_deadline(self.io_timeout, read_packet(&mut self.stream)).await?;
        match response.operation {
            Operation::Ack => {}
            Operation::Nak => return Err(ChannelError::Rejected),
            other => {
                return Err(ChannelError::Protocol(format!(
                    "unexpected response {other:?}"
                )));
            }
        }

        let result_len = u64::from(response.payload_size);
        let mut out = match tokio::fs::File::create(output).await {
            Ok(out) => out,
            Err(source) => {
                // Consume the result so the stream stays framed.
                with_deadline(
                    self.io_timeout,
                    copy_payload(&mut self.stream, &mut tokio::io::sink(), result_len),
                )
                .await?;
                return Err(ChannelError::LocalFile {
                    path: output.to_path_buf(),
                    source,
                });
            }
        };

        let received = with_deadline(
            self.io_timeout,
            copy_payload(&mut self.stream, &mut out, result_len),
        )
        .await;
        if received.is_err() {
            drop(out);
            if let Err(e) = tokio::fs::remove_file(output).await {
                warn!(path = %output.display(), "failed to remove partial output: {e}");
            }
        }
        received
    }

    /// Sends EXIT and closes the connection.
    pub async fn finish(mut self) -> Result<(), ChannelError> {
        with_deadline(self.io_timeout, write_packet(&mut self.stream, &Packet::exit())).await?;
        self.stream.shutdown().await?;
        Ok(())
    }
}

fn local_file(path: &Path) -> impl FnOnce(std::io::Error) -> ChannelError {
    let path = path.to_path_buf();
    move |source| ChannelError::LocalFile { path, source }
}

/// Totals reported after the client drains its queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientReport {
    pub rotated: u64,
    pub failed: u64,
    /// Jobs left in the queue because every connection was lost.
    pub unprocessed: u64,
}

impl ClientReport {
    fn merge(&mut self, other: ClientReport) {
        self.rotated += other.rotated;
        self.failed += other.failed;
        self.unprocessed += other.unprocessed;
    }

    pub fn is_clean(&self) -> bool {
        self.failed == 0 && self.unprocessed == 0
    }
}

struct WorkerContext {
    config: ClientConfig,
    input_dir: PathBuf,
    output_dir: PathBuf,
    audit: Arc<dyn AuditLog>,
}

/// Sends a directory of images to a rotation server.
pub struct RotationClient {
    ctx: Arc<WorkerContext>,
}

impl RotationClient {
    pub fn new(
        config: ClientConfig,
        input_dir: PathBuf,
        output_dir: PathBuf,
        audit: Arc<dyn AuditLog>,
    ) -> Self {
        Self {
            ctx: Arc::new(WorkerContext {
                config,
                input_dir,
                output_dir,
                audit,
            }),
        }
    }

    /// Enumerates the input directory and rotates every file remotely.
    pub async fn rotate_directory(&self, angle: Angle) -> Result<ClientReport, ChannelError> {
        let queue = Arc::new(JobQueue::new());
        let producer = tokio::task::spawn_blocking({
            let queue = Arc::clone(&queue);
            let input_dir = self.ctx.input_dir.clone();
            move || enqueue_directory(&queue, &input_dir, angle)
        });

        let report = self.run(Arc::clone(&queue)).await;
        let enqueued = producer.await??;
        let mut report = report?;
        // Jobs enqueued after every connection was lost.
        report.unprocessed += drain(&queue);

        info!(
            enqueued,
            rotated = report.rotated,
            failed = report.failed,
            unprocessed = report.unprocessed,
            "client finished"
        );
        Ok(report)
    }

    /// Runs the connection workers until `queue` is drained.
    ///
    /// Fails only if jobs were claimed but no worker managed to connect.
    pub async fn run(&self, queue: Arc<JobQueue>) -> Result<ClientReport, ChannelError> {
        let workers = self.ctx.config.workers;
        if workers == 0 {
            return Err(JobError::NoWorkers.into());
        }
        tokio::fs::create_dir_all(&self.ctx.output_dir).await?;

        let mut set = JoinSet::new();
        for worker_id in 0..workers {
            let queue = Arc::clone(&queue);
            let ctx = Arc::clone(&self.ctx);
            set.spawn(work(worker_id, queue, ctx));
        }

        let mut report = ClientReport::default();
        let mut connected = 0usize;
        let mut connect_error = None;
        while let Some(result) = set.join_next().await {
            match result? {
                Ok(worker_report) => {
                    connected += 1;
                    report.merge(worker_report);
                }
                Err(e) => {
                    warn!(server = %self.ctx.config.server_addr, "worker could not connect: {e}");
                    connect_error.get_or_insert(e);
                }
            }
        }

        if connected == 0
            && let Some(e) = connect_error
        {
            return Err(e);
        }

        report.unprocessed += drain(&queue);
        Ok(report)
    }
}

/// Pulls jobs over one connection. `Err` only if the connection never opened.
///
/// The connection is opened once the first job is claimed, so a slow feeder
/// never leaves an idle session for the server to time out.
async fn work(
    worker_id: usize,
    queue: Arc<JobQueue>,
    ctx: Arc<WorkerContext>,
) -> Result<ClientReport, ChannelError> {
    let mut report = ClientReport::default();
    let Some(first) = queue.next_job().await else {
        debug!(worker = worker_id, "no jobs, not connecting");
        return Ok(report);
    };

    let mut session = match ClientSession::connect(&ctx.config).await {
        Ok(session) => session,
        Err(e) => {
            // Hand the job back for another worker, or for the unprocessed count.
            queue.enqueue(first);
            return Err(e);
        }
    };
    let mut sequence = 0u64;
    let mut next = Some(first);

    while let Some(job) = next.take() {
        let input = ctx.input_dir.join(&job.file_name);
        let output = ctx.output_dir.join(&job.file_name);

        match session.rotate_file(&input, &output, job.angle).await {
            Ok(bytes) => {
                sequence += 1;
                report.rotated += 1;
                debug!(worker = worker_id, file = %job.file_name, bytes, "job done");
                if let Err(e) = ctx.audit.record(worker_id, sequence, &job.file_name) {
                    warn!(worker = worker_id, "failed to write audit line: {e}");
                }
            }
            Err(e) if !e.is_fatal() => {
                report.failed += 1;
                warn!(worker = worker_id, file = %job.file_name, "job failed: {e}");
            }
            Err(e) => {
                report.failed += 1;
                warn!(worker = worker_id, file = %job.file_name, "connection lost: {e}");
                return Ok(report);
            }
        }

        next = queue.next_job().await;
    }

    if let Err(e) = session.finish().await {
        debug!(worker = worker_id, "EXIT not delivered: {e}");
    }
    Ok(report)
}

fn drain(queue: &JobQueue) -> u64 {
    let mut left = 0;
    while let Some(job) = queue.try_dequeue() {
        warn!(file = %job.file_name, "job not processed");
        left += 1;
    }
    left
}
