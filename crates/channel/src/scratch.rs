//! Per-slot scratch space on the server.
//!
//! Every job gets `<root>/slot-<id>/` holding the received upload and the
//! encoded result. The directory is removed when the [`ScratchDir`] drops, so
//! no exit path leaves files behind. Slot ids are exclusive while a
//! connection holds them, which keeps concurrent jobs apart.

use std::io;
use std::path::{Path, PathBuf};

use tracing::warn;

const INPUT_FILE: &str = "input";
const OUTPUT_FILE: &str = "output.png";

/// Scratch directory for the job currently running in one slot.
#[derive(Debug)]
pub struct ScratchDir {
    dir: PathBuf,
}

impl ScratchDir {
    /// Creates a fresh scratch directory for `slot` under `root`.
    ///
    /// Leftovers from an earlier crash in the same slot are wiped first.
    pub async fn create(root: &Path, slot: usize) -> io::Result<Self> {
        let dir = slot_dir(root, slot);
        if tokio::fs::try_exists(&dir).await? {
            tokio::fs::remove_dir_all(&dir).await?;
        }
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Where the received payload is stored.
    pub fn input(&self) -> PathBuf {
        self.dir.join(INPUT_FILE)
    }

    /// Where the rotated image is written.
    pub fn output(&self) -> PathBuf {
        self.dir.join(OUTPUT_FILE)
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.dir)
            && e.kind() != io::ErrorKind::NotFound
        {
            warn!(dir = %self.dir.display(), "failed to remove scratch dir: {e}");
        }
    }
}

/// Scratch directory path for `slot`.
pub fn slot_dir(root: &Path, slot: usize) -> PathBuf {
    root.join(format!("slot-{slot}"))
}
