//! Directory producer.
//!
//! Walks one input directory (non-recursive) and enqueues a [`Job`] per
//! regular file as soon as it is seen, so workers start before enumeration
//! completes.

use std::path::Path;

use imgrot_transform::Angle;
use tracing::{debug, info, warn};

use crate::{Job, JobError, JobQueue};

/// Entries every directory listing reserves for itself.
const RESERVED_ENTRIES: [&str; 2] = [".", ".."];

/// Enqueues one job per regular file in `dir`, then marks the queue finished.
///
/// The queue is marked finished on every path, including errors, so workers
/// never wait on a producer that gave up. Returns the number of jobs
/// enqueued.
pub fn enqueue_directory(queue: &JobQueue, dir: &Path, angle: Angle) -> Result<usize, JobError> {
    let result = enqueue_entries(queue, dir, angle);
    queue.mark_finished();

    if let Ok(count) = result {
        info!(dir = %dir.display(), count, %angle, "all jobs enqueued");
    }
    result
}

fn enqueue_entries(queue: &JobQueue, dir: &Path, angle: Angle) -> Result<usize, JobError> {
    let entries = std::fs::read_dir(dir).map_err(|source| JobError::InputDir {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut count = 0;
    for entry in entries {
        let entry = entry?;
        let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
            warn!(path = %entry.path().display(), "skipping non UTF-8 file name");
            continue;
        };
        if RESERVED_ENTRIES.contains(&name.as_str()) {
            continue;
        }
        // Follows symlinks, unlike DirEntry::file_type.
        if !entry.path().is_file() {
            debug!(name, "skipping non-file entry");
            continue;
        }

        queue.enqueue(Job::new(name, angle));
        count += 1;
    }
    Ok(count)
}
