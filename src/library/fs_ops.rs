//! Blocking file helpers used by structural operations.
//!
//! Batches either complete or are rolled back as far as possible, so a
//! failed rename never leaves half an item in each place.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::core::{CatalogError, Result};

/// Move a file or directory, falling back to copy + delete when a plain
/// rename is not possible (different volumes)
pub fn move_path(from: &Path, to: &Path) -> io::Result<()> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)?;
    }

    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(rename_error) => {
            if !from.exists() || to.exists() {
                return Err(rename_error);
            }
            copy_path(from, to)?;
            remove_path(from)
        }
    }
}

/// Copy a file or a directory tree
pub fn copy_path(from: &Path, to: &Path) -> io::Result<()> {
    if from.is_dir() {
        fs::create_dir_all(to)?;
        for entry in fs::read_dir(from)? {
            let entry = entry?;
            copy_path(&entry.path(), &to.join(entry.file_name()))?;
        }
        Ok(())
    } else {
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(from, to).map(|_| ())
    }
}

/// Remove a file or a directory tree
pub fn remove_path(path: &Path) -> io::Result<()> {
    if path.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

/// Move every pair in order. The first pair is mandatory; later pairs are
/// skipped when their source does not exist. On failure, completed moves are
/// undone in reverse order.
pub fn move_all(pairs: &[(PathBuf, PathBuf)]) -> Result<()> {
    let mut done: Vec<&(PathBuf, PathBuf)> = Vec::new();

    for (index, pair) in pairs.iter().enumerate() {
        let (from, to) = pair;
        if index > 0 && !from.exists() {
            continue;
        }

        if let Err(e) = move_path(from, to) {
            for (undo_from, undo_to) in done.iter().rev() {
                if let Err(undo_error) = move_path(undo_to, undo_from) {
                    tracing::error!(
                        "Failed to roll back move of {}: {}",
                        undo_to.display(),
                        undo_error
                    );
                }
            }
            return Err(CatalogError::io(
                format!("Failed to move {} to {}", from.display(), to.display()),
                e,
            ));
        }
        done.push(pair);
    }

    Ok(())
}

/// Copy every pair in order, with the same rules as [`move_all`]. On
/// failure, copies made so far are removed.
pub fn copy_all(pairs: &[(PathBuf, PathBuf)]) -> Result<()> {
    let mut done: Vec<&PathBuf> = Vec::new();

    for (index, (from, to)) in pairs.iter().enumerate() {
        if index > 0 && !from.exists() {
            continue;
        }

        let copied = if to.exists() {
            Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "destination already exists",
            ))
        } else {
            copy_path(from, to)
        };

        if let Err(e) = copied {
            // A failed copy may have left a partial tree behind
            let partial = (e.kind() != io::ErrorKind::AlreadyExists && to.exists()).then_some(to);
            for created in done.iter().rev().copied().chain(partial) {
                if let Err(cleanup_error) = remove_path(created) {
                    tracing::error!(
                        "Failed to clean up {}: {}",
                        created.display(),
                        cleanup_error
                    );
                }
            }
            return Err(CatalogError::io(
                format!("Failed to copy {} to {}", from.display(), to.display()),
                e,
            ));
        }
        done.push(to);
    }

    Ok(())
}
