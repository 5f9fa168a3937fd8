//! Read-only support for the v1 snapshot format.
//!
//! Early releases stored snapshots as a JSON envelope, optionally wrapped
//! in a zstd frame, named `snapshot_<totalChanges>_<instanceId>.yjson[.zst]`:
//!
//! ```json
//! {
//!   "version": 1,
//!   "noteId": "…",
//!   "timestamp": 1700000000000,
//!   "totalChanges": 42,
//!   "documentState": [1, 2, 3],
//!   "maxSequences": { "instance-id": 42 }
//! }
//! ```
//!
//! `maxSequences` carries sequence knowledge only. Mapped into a vector
//! clock the entries get offset 0 and an empty filename, so a loader
//! re-reads peer logs from the start and relies on sequence filtering plus
//! idempotent CRDT apply to skip what the snapshot already contains.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use crate::clock::{ClockEntry, VectorClock};
use crate::error::{NotecaskError, Result};

use super::Snapshot;

/// Highest v1 envelope version this build understands.
const LEGACY_VERSION: u64 = 1;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyEnvelope {
    version: u64,
    #[allow(dead_code)]
    note_id: Option<String>,
    #[allow(dead_code)]
    timestamp: Option<i64>,
    total_changes: u64,
    document_state: Vec<u8>,
    #[serde(default)]
    max_sequences: BTreeMap<String, u32>,
}

/// Decode a v1 snapshot from raw (already decompressed) bytes.
///
/// Returns the snapshot plus its declared total-changes count (used for
/// best-snapshot ranking; v2 derives the same number from its clock).
pub(crate) fn decode_legacy_snapshot(bytes: &[u8], describe: &Path) -> Result<(Snapshot, u64)> {
    let envelope: LegacyEnvelope =
        serde_json::from_slice(bytes).map_err(|e| NotecaskError::Malformed {
            what: "legacy snapshot envelope",
            detail: format!("{}: {}", describe.display(), e),
        })?;

    if envelope.version > LEGACY_VERSION {
        return Err(NotecaskError::VersionTooNew {
            what: "snapshot",
            found: envelope.version as u32,
            supported: LEGACY_VERSION as u32,
        });
    }

    let mut clock = VectorClock::new();
    for (instance_id, sequence) in envelope.max_sequences {
        clock.set(
            instance_id,
            ClockEntry {
                sequence,
                offset: 0,
                filename: String::new(),
            },
        );
    }

    Ok((
        Snapshot {
            vector_clock: clock,
            document_state: envelope.document_state,
        },
        envelope.total_changes,
    ))
}
