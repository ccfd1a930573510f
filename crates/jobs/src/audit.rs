//! Activity log: one line per completed job.
//!
//! Line format is `[worker_id][sequence][file_name]`, where `sequence` counts
//! the jobs a single worker has completed, starting at 1.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::{Mutex, PoisonError};

/// Sink for completed-job records.
pub trait AuditLog: Send + Sync {
    fn record(&self, worker_id: usize, sequence: u64, file_name: &str) -> io::Result<()>;
}

/// Formats one audit line, including the trailing newline.
pub fn format_line(worker_id: usize, sequence: u64, file_name: &str) -> String {
    format!("[{worker_id}][{sequence}][{file_name}]\n")
}

/// Appends audit lines to a file and echoes them to stdout.
pub struct FileAuditLog {
    writer: Mutex<BufWriter<File>>,
    echo: bool,
}

impl FileAuditLog {
    /// Creates (truncating) the log file at `path`.
    pub fn create(path: &Path) -> io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
            echo: true,
        })
    }

    /// Disables the stdout echo.
    pub fn quiet(mut self) -> Self {
        self.echo = false;
        self
    }
}

impl AuditLog for FileAuditLog {
    fn record(&self, worker_id: usize, sequence: u64, file_name: &str) -> io::Result<()> {
        let line = format_line(worker_id, sequence, file_name);
        {
            let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
            writer.write_all(line.as_bytes())?;
            writer.flush()?;
        }
        if self.echo {
            print!("{line}");
        }
        Ok(())
    }
}

/// In-memory sink, handy for tests.
#[derive(Default)]
pub struct MemoryAuditLog {
    lines: Mutex<Vec<String>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of recorded lines, without trailing newlines.
    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl AuditLog for MemoryAuditLog {
    fn record(&self, worker_id: usize, sequence: u64, file_name: &str) -> io::Result<()> {
        let line = format_line(worker_id, sequence, file_name);
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(line.trim_end().to_string());
        Ok(())
    }
}
