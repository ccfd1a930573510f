//! Job processing error types.

use std::path::PathBuf;

/// Errors produced by the producer and the local worker pool.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot read input directory {}: {source}", path.display())]
    InputDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("worker pool needs at least one worker")]
    NoWorkers,

    #[error("transform error: {0}")]
    Transform(#[from] imgrot_transform::TransformError),

    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}
