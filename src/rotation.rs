//! Retention-based artifact rotation
//!
//! Keeps the `keep` most recently modified files whose names match a
//! prefix/suffix pair and deletes the rest. Backups and archived site logs are
//! both pruned through [`rotate`].
//!
//! Ordering is by modification time, newest first. Files with identical
//! modification times are ordered by file name, ascending, so the outcome does
//! not depend on directory listing order.

use std::cmp::Reverse;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::error::{PanelError, Result};

/// A file matched by a rotation filter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub path: PathBuf,
    pub name: String,
    pub modified: SystemTime,
}

/// Matching files directly inside `dir`, newest first.
///
/// Entries that are not regular files, have non-UTF-8 names, or whose
/// metadata cannot be read are skipped.
pub fn matching_artifacts(dir: &Path, prefix: &str, suffix: &str) -> Result<Vec<Artifact>> {
    let mut artifacts = Vec::new();

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        if !name.starts_with(prefix) || !name.ends_with(suffix) {
            continue;
        }

        let metadata = match entry.metadata() {
            Ok(m) if m.is_file() => m,
            Ok(_) => continue,
            Err(e) => {
                tracing::warn!("Skipping {}: {}", entry.path().display(), e);
                continue;
            }
        };
        let Ok(modified) = metadata.modified() else {
            continue;
        };

        artifacts.push(Artifact {
            path: entry.path(),
            name,
            modified,
        });
    }

    artifacts.sort_by(|a, b| {
        Reverse(a.modified)
            .cmp(&Reverse(b.modified))
            .then_with(|| a.name.cmp(&b.name))
    });
    Ok(artifacts)
}

/// Delete all but the `keep` newest matching files in `dir`.
///
/// Returns the deleted paths in deletion order (newest of the pruned first).
/// The first deletion failure stops the sweep; files already deleted stay
/// deleted.
pub fn rotate(dir: &Path, prefix: &str, suffix: &str, keep: usize) -> Result<Vec<PathBuf>> {
    let artifacts = matching_artifacts(dir, prefix, suffix)?;
    let mut deleted = Vec::new();

    for artifact in artifacts.into_iter().skip(keep) {
        tracing::info!("Removing old artifact {}", artifact.path.display());
        fs::remove_file(&artifact.path).map_err(|source| PanelError::Rotation {
            path: artifact.path.clone(),
            source,
        })?;
        deleted.push(artifact.path);
    }

    Ok(deleted)
}

/// Parse a keep count as typed on the command line.
///
/// Non-numeric and negative input count as 0.
pub fn parse_keep_count(input: &str) -> usize {
    let trimmed = input.trim();
    match trimmed.parse::<i64>() {
        Ok(n) if n > 0 => usize::try_from(n).unwrap_or(usize::MAX),
        Ok(_) => 0,
        Err(_) => trimmed.parse::<usize>().unwrap_or(0),
    }
}
