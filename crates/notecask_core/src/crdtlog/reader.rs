//! Forward log scanning with torn-tail tolerance.
//!
//! [`read_records`] parses frames from a byte offset until end-of-file, a
//! torn tail, or corruption. Torn tails are a normal outcome: the file
//! replicator may not have delivered the final bytes yet, and a later read
//! from the same offset re-exposes the record once they arrive. Corruption
//! (a bad frame with more data after it, or a non-record file head) is an
//! error and the scan does not advance past it.

use std::path::Path;

use crate::error::{NotecaskError, Result};
use crate::frame::{self, ParseOutcome, RECORD_VERSION};

/// One record as seen by the scanner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadRecord {
    /// Sequence number assigned by the writing device.
    pub sequence: u32,

    /// Byte offset at which the record's frame begins.
    pub offset: u64,

    /// Creation time, Unix milliseconds.
    pub timestamp_ms: i64,

    /// Opaque CRDT update bytes.
    pub data: Vec<u8>,

    /// Byte offset immediately after the frame. This is the value a vector
    /// clock stores once the record is incorporated.
    pub next_offset: u64,
}

/// How a scan ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanEnd {
    /// The file ended exactly on a frame boundary.
    Eof,

    /// The last frame was incomplete or CRC-bad at the tail. Its bytes may
    /// still arrive; re-scan from `end_offset` later.
    TornTail,
}

/// Result of scanning a log file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadOutcome {
    /// Complete, verified records in file order.
    pub records: Vec<ReadRecord>,

    /// Offset one past the last complete record (the resume point).
    pub end_offset: u64,

    /// Why the scan stopped.
    pub ended: ScanEnd,
}

/// Scan `path` from `start_offset`, which must sit on a frame boundary.
pub fn read_records(path: &Path, start_offset: u64) -> Result<ReadOutcome> {
    let bytes = std::fs::read(path).map_err(|e| NotecaskError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;
    scan(&bytes, start_offset, path)
}

/// Convenience: scan a whole file.
pub fn read_all_records(path: &Path) -> Result<ReadOutcome> {
    read_records(path, 0)
}

fn scan(bytes: &[u8], start_offset: u64, path: &Path) -> Result<ReadOutcome> {
    let len = bytes.len() as u64;
    if start_offset > len {
        // The replicator has not yet delivered up to our resume point.
        return Ok(ReadOutcome {
            records: Vec::new(),
            end_offset: start_offset,
            ended: ScanEnd::TornTail,
        });
    }

    let mut records = Vec::new();
    let mut offset = start_offset as usize;

    loop {
        if offset as u64 == len {
            return Ok(ReadOutcome {
                records,
                end_offset: offset as u64,
                ended: ScanEnd::Eof,
            });
        }

        match frame::parse_record(bytes, offset) {
            ParseOutcome::Record {
                record,
                next_offset,
            } => {
                records.push(ReadRecord {
                    sequence: record.sequence,
                    offset: offset as u64,
                    timestamp_ms: record.timestamp_ms,
                    data: record.payload,
                    next_offset: next_offset as u64,
                });
                offset = next_offset;
            }
            ParseOutcome::TornTail => {
                return Ok(ReadOutcome {
                    records,
                    end_offset: offset as u64,
                    ended: ScanEnd::TornTail,
                });
            }
            ParseOutcome::BadCrc { next_offset } => {
                if next_offset as u64 >= len {
                    // CRC-bad final record: a torn write, not corruption.
                    return Ok(ReadOutcome {
                        records,
                        end_offset: offset as u64,
                        ended: ScanEnd::TornTail,
                    });
                }
                return Err(NotecaskError::Corrupt {
                    path: path.to_path_buf(),
                    offset: offset as u64,
                    detail: "payload CRC mismatch on a non-tail record".to_string(),
                });
            }
            ParseOutcome::BadMagic => {
                let detail = if records.is_empty() && start_offset == 0 {
                    "file does not begin with a log record".to_string()
                } else {
                    "bad magic after a valid record".to_string()
                };
                return Err(NotecaskError::Corrupt {
                    path: path.to_path_buf(),
                    offset: offset as u64,
                    detail,
                });
            }
            ParseOutcome::VersionTooNew { found } => {
                return Err(NotecaskError::VersionTooNew {
                    what: "log record",
                    found: u32::from(found),
                    supported: u32::from(RECORD_VERSION),
                });
            }
            ParseOutcome::Inconsistent => {
                return Err(NotecaskError::Corrupt {
                    path: path.to_path_buf(),
                    offset: offset as u64,
                    detail: "record-length and payload-length disagree".to_string(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::encode_record;

    fn write_file(dir: &Path, name: &str, bytes: &[u8]) -> std::path::PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, bytes).unwrap();
        path
    }

    fn two_records() -> (Vec<u8>, usize) {
        let mut bytes = encode_record(10, 1, b"first payload");
        let first_len = bytes.len();
        bytes.extend_from_slice(&encode_record(20, 2, b"second payload"));
        (bytes, first_len)
    }

    #[test]
    fn test_read_all() {
        let tmp = tempfile::tempdir().unwrap();
        let (bytes, _) = two_records();
        let path = write_file(tmp.path(), "a.crdtlog", &bytes);

        let outcome = read_all_records(&path).unwrap();
        assert_eq!(outcome.ended, ScanEnd::Eof);
        assert_eq!(outcome.records.len(), 2);
        assert_eq!(outcome.records[0].data, b"first payload");
        assert_eq!(outcome.records[1].sequence, 2);
        assert_eq!(outcome.end_offset, bytes.len() as u64);
    }

    #[test]
    fn test_resume_from_offset() {
        let tmp = tempfile::tempdir().unwrap();
        let (bytes, first_len) = two_records();
        let path = write_file(tmp.path(), "a.crdtlog", &bytes);

        let outcome = read_records(&path, first_len as u64).unwrap();
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.records[0].sequence, 2);
    }

    #[test]
    fn test_restart_at_any_boundary_sees_same_records() {
        let tmp = tempfile::tempdir().unwrap();
        let mut bytes = Vec::new();
        for seq in 1..=5u32 {
            bytes.extend_from_slice(&encode_record(i64::from(seq) * 10, seq, b"pay"));
        }
        let path = write_file(tmp.path(), "a.crdtlog", &bytes);

        let all = read_all_records(&path).unwrap();
        let mut resumed = Vec::new();
        let mut offset = 0;
        loop {
            let step = read_records(&path, offset).unwrap();
            match step.records.first() {
                Some(first) => {
                    resumed.push(first.clone());
                    offset = first.next_offset;
                }
                None => break,
            }
        }
        assert_eq!(resumed, all.records);
    }

    #[test]
    fn test_truncated_tail_returns_prefix() {
        let tmp = tempfile::tempdir().unwrap();
        let (bytes, first_len) = two_records();
        // Cut into the middle of the second record's payload.
        let path = write_file(tmp.path(), "a.crdtlog", &bytes[..bytes.len() - 4]);

        let outcome = read_all_records(&path).unwrap();
        assert_eq!(outcome.ended, ScanEnd::TornTail);
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.end_offset, first_len as u64);
    }

    #[test]
    fn test_torn_record_reexposed_after_growth() {
        let tmp = tempfile::tempdir().unwrap();
        let (bytes, first_len) = two_records();
        let path = write_file(tmp.path(), "a.crdtlog", &bytes[..bytes.len() - 4]);

        let partial = read_all_records(&path).unwrap();
        assert_eq!(partial.records.len(), 1);

        // The replicator delivers the remaining bytes.
        std::fs::write(&path, &bytes).unwrap();
        let resumed = read_records(&path, partial.end_offset).unwrap();
        assert_eq!(resumed.records.len(), 1);
        assert_eq!(resumed.records[0].sequence, 2);
        assert_eq!(resumed.records[0].offset, first_len as u64);
    }

    #[test]
    fn test_crc_bad_tail_is_torn() {
        let tmp = tempfile::tempdir().unwrap();
        let (mut bytes, first_len) = two_records();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        let path = write_file(tmp.path(), "a.crdtlog", &bytes);

        let outcome = read_all_records(&path).unwrap();
        assert_eq!(outcome.ended, ScanEnd::TornTail);
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.end_offset, first_len as u64);
    }

    #[test]
    fn test_crc_bad_mid_file_is_corrupt() {
        let tmp = tempfile::tempdir().unwrap();
        let (mut bytes, first_len) = two_records();
        // Corrupt the FIRST record's payload; the second remains after it.
        bytes[first_len - 1] ^= 0xFF;
        let path = write_file(tmp.path(), "a.crdtlog", &bytes);

        match read_all_records(&path) {
            Err(NotecaskError::Corrupt { offset, .. }) => assert_eq!(offset, 0),
            other => panic!("expected corrupt, got {:?}", other),
        }
    }

    #[test]
    fn test_non_log_file_is_corrupt() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_file(tmp.path(), "a.crdtlog", b"this is not a log file at all");

        assert!(matches!(
            read_all_records(&path),
            Err(NotecaskError::Corrupt { .. })
        ));
    }

    #[test]
    fn test_garbage_after_valid_record_is_corrupt() {
        let tmp = tempfile::tempdir().unwrap();
        let mut bytes = encode_record(1, 1, b"ok");
        bytes.extend_from_slice(b"GARBAGE BYTES THAT ARE NOT A FRAME HEADER");
        let path = write_file(tmp.path(), "a.crdtlog", &bytes);

        assert!(matches!(
            read_all_records(&path),
            Err(NotecaskError::Corrupt { .. })
        ));
    }

    #[test]
    fn test_empty_file_is_clean_eof() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_file(tmp.path(), "a.crdtlog", b"");

        let outcome = read_all_records(&path).unwrap();
        assert_eq!(outcome.ended, ScanEnd::Eof);
        assert!(outcome.records.is_empty());
    }

    #[test]
    fn test_start_beyond_eof_is_torn() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_file(tmp.path(), "a.crdtlog", b"");

        let outcome = read_records(&path, 500).unwrap();
        assert_eq!(outcome.ended, ScanEnd::TornTail);
        assert_eq!(outcome.end_offset, 500);
    }

    #[test]
    fn test_version_too_new() {
        let tmp = tempfile::tempdir().unwrap();
        let mut bytes = encode_record(1, 1, b"x");
        bytes[4] = 9;
        let path = write_file(tmp.path(), "a.crdtlog", &bytes);

        assert!(matches!(
            read_all_records(&path),
            Err(NotecaskError::VersionTooNew { .. })
        ));
    }
}
