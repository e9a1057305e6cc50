//! Recoverable deletion.
//!
//! Deleted items are never unlinked directly. They are moved into a
//! timestamped batch directory inside the recycle bin:
//!
//! ```text
//! <recycle>/
//! └── 20261019-142501-3f9a0c1d/
//!     ├── aaa/
//!     └── aaa.preview.png
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{NaiveDateTime, Utc};
use uuid::Uuid;

use super::fs_ops;

const BATCH_TIME_FORMAT: &str = "%Y%m%d-%H%M%S";

/// Moves paths somewhere they can be recovered from
pub trait Recycler: Send + Sync + 'static {
    /// Recycle every path that exists; missing paths are skipped
    fn recycle(&self, paths: &[PathBuf]) -> std::io::Result<()>;
}

/// Recycle bin backed by a plain directory
#[derive(Debug, Clone)]
pub struct RecycleBin {
    dir: PathBuf,
}

impl RecycleBin {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Batch directories, oldest first
    pub fn batches(&self) -> std::io::Result<Vec<PathBuf>> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut batches = Vec::new();
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                batches.push(entry.path());
            }
        }
        batches.sort();
        Ok(batches)
    }

    /// Delete batches older than `age`. Returns the number removed.
    pub fn purge_older_than(&self, age: Duration) -> std::io::Result<usize> {
        let cutoff = chrono::Duration::from_std(age)
            .ok()
            .and_then(|age| Utc::now().naive_utc().checked_sub_signed(age));
        let Some(cutoff) = cutoff else {
            return Ok(0);
        };
        let mut removed = 0;

        for batch in self.batches()? {
            let created = batch
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(batch_time);

            match created {
                Some(created) if created < cutoff => {
                    std::fs::remove_dir_all(&batch)?;
                    tracing::debug!("Purged recycled batch {}", batch.display());
                    removed += 1;
                }
                Some(_) => {}
                None => tracing::trace!("Skipping foreign entry {}", batch.display()),
            }
        }

        Ok(removed)
    }

    fn new_batch(&self) -> std::io::Result<PathBuf> {
        let suffix = Uuid::new_v4().simple().to_string();
        let name = format!("{}-{}", Utc::now().format(BATCH_TIME_FORMAT), &suffix[..8]);
        let batch = self.dir.join(name);
        std::fs::create_dir_all(&batch)?;
        Ok(batch)
    }
}

impl Recycler for RecycleBin {
    fn recycle(&self, paths: &[PathBuf]) -> std::io::Result<()> {
        let existing: Vec<&PathBuf> = paths.iter().filter(|p| p.exists()).collect();
        if existing.is_empty() {
            return Ok(());
        }

        let batch = self.new_batch()?;
        for path in existing {
            let name = path
                .file_name()
                .map(|n| n.to_os_string())
                .unwrap_or_else(|| "unnamed".into());

            let mut target = batch.join(&name);
            let mut n = 1;
            while target.exists() {
                target = batch.join(format!("{}.{}", name.to_string_lossy(), n));
                n += 1;
            }

            fs_ops::move_path(path, &target)?;
            tracing::debug!("Recycled {} to {}", path.display(), target.display());
        }

        Ok(())
    }
}

/// Parse the timestamp prefix of a batch directory name
fn batch_time(name: &str) -> Option<NaiveDateTime> {
    let stamp = name.get(..15)?;
    NaiveDateTime::parse_from_str(stamp, BATCH_TIME_FORMAT).ok()
}
