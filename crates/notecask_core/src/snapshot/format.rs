//! Byte-level encoding of v2 snapshot files.

use crate::clock::{ClockEntry, VectorClock};
use crate::error::{NotecaskError, Result};
use crate::frame::{read_u16_str, write_u16_str};

use super::Snapshot;

/// Magic bytes at the start of every v2 snapshot.
pub const SNAPSHOT_MAGIC: [u8; 4] = *b"NCSS";

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u8 = 1;

/// Status byte: file is being written, ignore it.
pub const STATUS_INCOMPLETE: u8 = 0x00;

/// Status byte: file is complete and safe to read.
pub const STATUS_COMPLETE: u8 = 0x01;

/// Byte offset of the status byte within the file.
pub const STATUS_OFFSET: u64 = 5;

/// Encode a full snapshot file with the given status byte.
pub(crate) fn encode_snapshot(status: u8, clock: &VectorClock, document_state: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(64 + document_state.len());
    buf.extend_from_slice(&SNAPSHOT_MAGIC);
    buf.push(SNAPSHOT_VERSION);
    buf.push(status);

    debug_assert!(clock.len() <= u16::MAX as usize);
    buf.extend_from_slice(&(clock.len() as u16).to_le_bytes());
    for (instance_id, entry) in clock.iter() {
        write_u16_str(&mut buf, instance_id);
        buf.extend_from_slice(&entry.sequence.to_le_bytes());
        buf.extend_from_slice(&entry.offset.to_le_bytes());
        write_u16_str(&mut buf, &entry.filename);
    }

    buf.extend_from_slice(&(document_state.len() as u32).to_le_bytes());
    buf.extend_from_slice(document_state);
    buf
}

/// Decode a v2 snapshot from raw (already decompressed) bytes.
///
/// `describe` names the source for error messages.
pub(crate) fn decode_snapshot(bytes: &[u8], describe: &std::path::Path) -> Result<Snapshot> {
    let corrupt = |offset: u64, detail: &str| NotecaskError::Corrupt {
        path: describe.to_path_buf(),
        offset,
        detail: detail.to_string(),
    };

    if bytes.len() < 8 {
        return Err(corrupt(0, "snapshot shorter than its fixed header"));
    }
    if bytes[0..4] != SNAPSHOT_MAGIC {
        return Err(corrupt(0, "bad snapshot magic"));
    }
    let version = bytes[4];
    if version > SNAPSHOT_VERSION {
        return Err(NotecaskError::VersionTooNew {
            what: "snapshot",
            found: u32::from(version),
            supported: u32::from(SNAPSHOT_VERSION),
        });
    }
    let status = bytes[5];
    if status != STATUS_COMPLETE {
        return Err(NotecaskError::IncompleteSnapshot(describe.to_path_buf()));
    }

    let entry_count = u16::from_le_bytes([bytes[6], bytes[7]]) as usize;
    let mut pos = 8;
    let mut clock = VectorClock::new();
    for _ in 0..entry_count {
        let (instance_id, used) = read_u16_str(&bytes[pos..])
            .ok_or_else(|| corrupt(pos as u64, "truncated clock entry instance id"))?;
        pos += used;

        if bytes.len() < pos + 12 {
            return Err(corrupt(pos as u64, "truncated clock entry"));
        }
        let sequence = u32::from_le_bytes([bytes[pos], bytes[pos + 1], bytes[pos + 2], bytes[pos + 3]]);
        pos += 4;
        let offset = u64::from_le_bytes([
            bytes[pos],
            bytes[pos + 1],
            bytes[pos + 2],
            bytes[pos + 3],
            bytes[pos + 4],
            bytes[pos + 5],
            bytes[pos + 6],
            bytes[pos + 7],
        ]);
        pos += 8;

        let (filename, used) = read_u16_str(&bytes[pos..])
            .ok_or_else(|| corrupt(pos as u64, "truncated clock entry filename"))?;
        pos += used;

        clock.set(
            instance_id,
            ClockEntry {
                sequence,
                offset,
                filename,
            },
        );
    }

    if bytes.len() < pos + 4 {
        return Err(corrupt(pos as u64, "truncated payload length"));
    }
    let payload_len = u32::from_le_bytes([bytes[pos], bytes[pos + 1], bytes[pos + 2], bytes[pos + 3]])
        as usize;
    pos += 4;

    if bytes.len() < pos + payload_len {
        return Err(corrupt(pos as u64, "truncated payload"));
    }
    let document_state = bytes[pos..pos + payload_len].to_vec();

    Ok(Snapshot {
        vector_clock: clock,
        document_state,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn sample_clock() -> VectorClock {
        let mut clock = VectorClock::new();
        clock.set(
            "instance-a",
            ClockEntry {
                sequence: 12,
                offset: 4096,
                filename: "p_instance-a_100.crdtlog".to_string(),
            },
        );
        clock.set(
            "instance-b",
            ClockEntry {
                sequence: 3,
                offset: 512,
                filename: "p_instance-b_200.crdtlog".to_string(),
            },
        );
        clock
    }

    #[test]
    fn test_round_trip() {
        let clock = sample_clock();
        let state = b"encoded crdt state".to_vec();
        let bytes = encode_snapshot(STATUS_COMPLETE, &clock, &state);

        let snapshot = decode_snapshot(&bytes, Path::new("test.snapshot")).unwrap();
        assert_eq!(snapshot.vector_clock, clock);
        assert_eq!(snapshot.document_state, state);
    }

    #[test]
    fn test_empty_clock_round_trip() {
        let bytes = encode_snapshot(STATUS_COMPLETE, &VectorClock::new(), b"s");
        let snapshot = decode_snapshot(&bytes, Path::new("t.snapshot")).unwrap();
        assert!(snapshot.vector_clock.is_empty());
    }

    #[test]
    fn test_incomplete_is_refused() {
        let bytes = encode_snapshot(STATUS_INCOMPLETE, &sample_clock(), b"state");
        assert!(matches!(
            decode_snapshot(&bytes, Path::new("t.snapshot")),
            Err(NotecaskError::IncompleteSnapshot(_))
        ));
    }

    #[test]
    fn test_status_offset_points_at_status_byte() {
        let mut bytes = encode_snapshot(STATUS_INCOMPLETE, &sample_clock(), b"state");
        bytes[STATUS_OFFSET as usize] = STATUS_COMPLETE;
        assert!(decode_snapshot(&bytes, Path::new("t.snapshot")).is_ok());
    }

    #[test]
    fn test_bad_magic() {
        let mut bytes = encode_snapshot(STATUS_COMPLETE, &sample_clock(), b"state");
        bytes[0] = b'X';
        assert!(matches!(
            decode_snapshot(&bytes, Path::new("t.snapshot")),
            Err(NotecaskError::Corrupt { .. })
        ));
    }

    #[test]
    fn test_version_too_new() {
        let mut bytes = encode_snapshot(STATUS_COMPLETE, &sample_clock(), b"state");
        bytes[4] = SNAPSHOT_VERSION + 1;
        assert!(matches!(
            decode_snapshot(&bytes, Path::new("t.snapshot")),
            Err(NotecaskError::VersionTooNew { .. })
        ));
    }

    #[test]
    fn test_truncations_are_corrupt() {
        let bytes = encode_snapshot(STATUS_COMPLETE, &sample_clock(), b"state");
        for cut in [3, 7, 10, bytes.len() - 1] {
            assert!(
                matches!(
                    decode_snapshot(&bytes[..cut], Path::new("t.snapshot")),
                    Err(NotecaskError::Corrupt { .. })
                ),
                "cut at {}",
                cut
            );
        }
    }
}
