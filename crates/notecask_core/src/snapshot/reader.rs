//! Snapshot loading and best-snapshot selection.

use std::path::{Path, PathBuf};

use crate::error::{NotecaskError, Result};

use super::format::decode_snapshot;
use super::legacy::decode_legacy_snapshot;
use super::{Snapshot, SnapshotFileInfo, parse_snapshot_filename};

/// zstd frame signature; compressed snapshots start with these bytes.
const ZSTD_MAGIC: [u8; 4] = [0x28, 0xB5, 0x2F, 0xFD];

/// The snapshot a loader should start from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BestSnapshot {
    /// Path to the snapshot file.
    pub path: PathBuf,

    /// Instance that wrote it.
    pub instance_id: String,

    /// Total number of updates the snapshot covers.
    pub total_changes: u64,
}

/// Read and decode a snapshot file (v2 or legacy v1, compressed or not).
///
/// Refuses incomplete snapshots with
/// [`NotecaskError::IncompleteSnapshot`] and newer-versioned ones with
/// [`NotecaskError::VersionTooNew`].
pub fn read_snapshot(path: &Path) -> Result<Snapshot> {
    Ok(read_snapshot_ranked(path)?.0)
}

/// As [`read_snapshot`], also returning the covered-update count used for
/// ranking (v2 derives it from the clock, v1 declares it).
fn read_snapshot_ranked(path: &Path) -> Result<(Snapshot, u64)> {
    let raw = std::fs::read(path).map_err(|e| NotecaskError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    let bytes = if raw.len() >= 4 && raw[0..4] == ZSTD_MAGIC {
        zstd::decode_all(raw.as_slice()).map_err(|e| NotecaskError::Corrupt {
            path: path.to_path_buf(),
            offset: 0,
            detail: format!("zstd decompression failed: {}", e),
        })?
    } else {
        raw
    };

    if bytes.starts_with(&super::SNAPSHOT_MAGIC) {
        let snapshot = decode_snapshot(&bytes, path)?;
        let total = snapshot.vector_clock.total_changes();
        Ok((snapshot, total))
    } else if bytes.first().is_some_and(|b| b.is_ascii_whitespace() || *b == b'{') {
        decode_legacy_snapshot(&bytes, path)
    } else {
        Err(NotecaskError::Corrupt {
            path: path.to_path_buf(),
            offset: 0,
            detail: "neither a v2 snapshot nor a legacy envelope".to_string(),
        })
    }
}

/// List recognizable snapshot files in a directory.
pub(crate) fn list_snapshot_files(dir: &Path) -> Result<Vec<SnapshotFileInfo>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(NotecaskError::FileRead {
                path: dir.to_path_buf(),
                source: e,
            });
        }
    };

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| NotecaskError::FileRead {
            path: dir.to_path_buf(),
            source: e,
        })?;
        let filename = entry.file_name().to_string_lossy().into_owned();
        if let Some((profile_id, instance_id, legacy)) = parse_snapshot_filename(&filename) {
            files.push(SnapshotFileInfo {
                path: entry.path(),
                filename,
                instance_id,
                profile_id,
                legacy,
            });
        }
    }
    files.sort_by(|a, b| a.filename.cmp(&b.filename));
    Ok(files)
}

/// Find the complete snapshot covering the most updates.
///
/// Both v2 and legacy v1 files are candidates; incomplete or unreadable
/// ones are skipped (logged, never fatal - a torn peer snapshot must not
/// block loading). Ties break toward the lexicographically smallest
/// instance id so every device picks the same winner.
pub fn find_best_snapshot(dir: &Path) -> Result<Option<BestSnapshot>> {
    let mut best: Option<BestSnapshot> = None;

    for info in list_snapshot_files(dir)? {
        let total_changes = match read_snapshot_ranked(&info.path) {
            Ok((_, total)) => total,
            Err(NotecaskError::IncompleteSnapshot(_)) => {
                log::debug!("skipping incomplete snapshot {}", info.filename);
                continue;
            }
            Err(e) => {
                log::warn!("skipping unreadable snapshot {}: {}", info.filename, e);
                continue;
            }
        };

        let candidate = BestSnapshot {
            path: info.path,
            instance_id: info.instance_id,
            total_changes,
        };
        best = Some(match best.take() {
            None => candidate,
            Some(current) => {
                if candidate.total_changes > current.total_changes
                    || (candidate.total_changes == current.total_changes
                        && candidate.instance_id < current.instance_id)
                {
                    candidate
                } else {
                    current
                }
            }
        });
    }

    Ok(best)
}
