//! Snapshot files: full CRDT state plus the vector clock it was captured at.
//!
//! Snapshots are a pure load optimization. The merged log files across all
//! devices always fully determine the CRDT state; a snapshot merely lets a
//! loader skip re-reading log bytes the snapshot already covers.
//!
//! Current format (v2, magic `NCSS`):
//!
//! 1. 4-byte magic `NCSS`
//! 2. 1-byte version (=1)
//! 3. 1-byte status (0x00 incomplete, 0x01 complete)
//! 4. u16 vector-clock entry count, then per entry: u16-length-prefixed
//!    instance id, sequence u32, offset u64, u16-length-prefixed filename
//! 5. u32 payload length
//! 6. payload bytes (encoded CRDT state)
//!
//! All integers little-endian. The status byte is the crash-safety boundary:
//! the writer emits the whole file with 0x00, syncs, then flips offset 5 to
//! 0x01. Readers ignore files still at 0x00.
//!
//! A zstd-compressed variant appends `.zst` and is detected by the zstd
//! frame signature; readers handle it transparently. The legacy v1 format
//! (a JSON envelope, optionally zstd-wrapped, named
//! `snapshot_<totalChanges>_<instanceId>.yjson[.zst]`) is accepted on read
//! only.

mod format;
mod legacy;
mod reader;
mod writer;

pub use format::{
    SNAPSHOT_MAGIC, SNAPSHOT_VERSION, STATUS_COMPLETE, STATUS_INCOMPLETE, STATUS_OFFSET,
};
pub use reader::{BestSnapshot, find_best_snapshot, read_snapshot};
pub use writer::{gc_snapshots, write_snapshot};

use std::path::PathBuf;

use crate::clock::VectorClock;

/// File extension for v2 snapshots.
pub const SNAPSHOT_EXTENSION: &str = "snapshot";

/// A decoded snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// The vector clock at which the state was captured.
    pub vector_clock: VectorClock,

    /// Encoded CRDT document state.
    pub document_state: Vec<u8>,
}

/// Build the filename for a snapshot created at `millis`.
pub fn format_snapshot_filename(profile_id: &str, instance_id: &str, millis: i64) -> String {
    format!(
        "{}_{}_{}.{}",
        profile_id, instance_id, millis, SNAPSHOT_EXTENSION
    )
}

/// A snapshot file recognized in a `snapshots/` directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SnapshotFileInfo {
    pub path: PathBuf,
    pub filename: String,
    pub instance_id: String,
    pub profile_id: Option<String>,
    pub legacy: bool,
}

/// Parse a snapshot filename (v2 `<p>_<i>_<ts>.snapshot[.zst]`, legacy
/// single-id `<i>_<ts>.snapshot[.zst]`, or v1
/// `snapshot_<totalChanges>_<instanceId>.yjson[.zst]`).
pub(crate) fn parse_snapshot_filename(filename: &str) -> Option<(Option<String>, String, bool)> {
    let stem = filename.strip_suffix(".zst").unwrap_or(filename);

    if let Some(stem) = stem.strip_suffix(".yjson") {
        // Legacy: snapshot_<totalChanges>_<instanceId>
        let rest = stem.strip_prefix("snapshot_")?;
        let (changes, instance) = rest.split_once('_')?;
        changes.parse::<u64>().ok()?;
        if instance.is_empty() {
            return None;
        }
        return Some((None, instance.to_string(), true));
    }

    let stem = stem.strip_suffix(&format!(".{}", SNAPSHOT_EXTENSION))?;
    let (creator, ts) = stem.rsplit_once('_')?;
    ts.parse::<i64>().ok()?;
    if creator.is_empty() {
        return None;
    }
    match creator.split_once('_') {
        Some((profile, instance)) if !profile.is_empty() && !instance.is_empty() => {
            Some((Some(profile.to_string()), instance.to_string(), false))
        }
        _ => Some((None, creator.to_string(), false)),
    }
}
