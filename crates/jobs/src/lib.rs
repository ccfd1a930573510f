//! Job queue and in-process worker pool.
//!
//! A single producer enumerates an input directory into a shared
//! [`JobQueue`]; N workers drain it concurrently. The queue carries a
//! monotonic "finished" latch so workers can tell "no jobs right now" apart
//! from "no jobs ever again".
//!
//! The queue is transport-agnostic: the networked client in `imgrot-channel`
//! drains the same queue over TCP instead of rotating locally.

pub mod audit;
pub mod error;
pub mod job;
pub mod producer;
pub mod queue;
pub mod worker;

pub use audit::{AuditLog, FileAuditLog, MemoryAuditLog};
pub use error::JobError;
pub use job::Job;
pub use producer::enqueue_directory;
pub use queue::JobQueue;
pub use worker::{LocalPool, PoolReport, output_path};

/// File name of the activity log written next to the working directory.
pub const DEFAULT_LOG_FILE: &str = "request_log";

/// Prefix the local pool prepends to output file names.
pub const OUTPUT_PREFIX: &str = "rotated";
