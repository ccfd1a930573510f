//! Error types for the rotation channel.

use std::path::PathBuf;

/// Errors produced by the rotation client and server.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("timed out")]
    Timeout,

    #[error("connection closed by peer")]
    ConnectionClosed,

    #[error("request rejected by server")]
    Rejected,

    #[error("local file {}: {source}", path.display())]
    LocalFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("transform error: {0}")]
    Transform(#[from] imgrot_transform::TransformError),

    #[error(transparent)]
    Jobs(#[from] imgrot_jobs::JobError),

    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("no free worker slot")]
    SlotsExhausted,

    #[error("cancelled")]
    Cancelled,
}

impl ChannelError {
    /// Whether the error leaves the connection unusable.
    ///
    /// Rejections and local file problems only fail the current job; the
    /// stream is still correctly framed afterwards.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            ChannelError::Rejected | ChannelError::LocalFile { .. } | ChannelError::Transform(_)
        )
    }
}
