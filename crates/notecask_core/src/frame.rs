//! Binary framing for log records.
//!
//! Every CRDT update written to a `.crdtlog` file is wrapped in a
//! self-verifying frame. Layout (all integers little-endian):
//!
//! | offset | size | field |
//! |---|---|---|
//! | 0 | 4 | magic `NCLR` |
//! | 4 | 1 | version (=1) |
//! | 5 | 4 | record-length (bytes following this field) |
//! | 9 | 8 | timestamp-millis |
//! | 17 | 4 | sequence |
//! | 21 | 4 | payload-length |
//! | 25 | 4 | crc32 of payload |
//! | 29 | n | payload |
//!
//! The frame is the crash-safety boundary: a reader trusts a record iff the
//! whole frame is present and the CRC verifies. Missing tail bytes are a
//! [`ParseOutcome::TornTail`], never corruption - a file replicator may
//! deliver a file's head long before its tail.

/// Magic bytes at the start of every log record.
pub const RECORD_MAGIC: [u8; 4] = *b"NCLR";

/// Current record format version.
pub const RECORD_VERSION: u8 = 1;

/// Fixed bytes before the payload.
pub const RECORD_HEADER_LEN: usize = 29;

/// Bytes of header counted by the record-length field (everything after it).
const LENGTH_COVERED_HEADER: u32 = 20;

/// Total framed length for a payload of `payload_len` bytes.
pub fn framed_len(payload_len: usize) -> usize {
    RECORD_HEADER_LEN + payload_len
}

/// A decoded log record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// Creation time in Unix milliseconds.
    pub timestamp_ms: i64,

    /// Per-(device, document) sequence number, 1-based.
    pub sequence: u32,

    /// Opaque CRDT update bytes.
    pub payload: Vec<u8>,
}

/// Result of attempting to parse one frame at a given offset.
#[derive(Debug, PartialEq, Eq)]
pub enum ParseOutcome {
    /// A complete, CRC-verified record.
    Record {
        /// The decoded record.
        record: LogRecord,
        /// Offset immediately after this frame.
        next_offset: usize,
    },

    /// The buffer ends before the frame does. The bytes may still be in
    /// flight; re-reading after the file grows must re-expose this frame.
    TornTail,

    /// The four bytes at the offset are not `NCLR`.
    ///
    /// At the very start of a scan this means the file is not a log file;
    /// after at least one successful record it means mid-file corruption.
    /// The caller knows which.
    BadMagic,

    /// The frame is structurally complete but its payload CRC mismatched.
    ///
    /// At the tail of a file this is a torn write ("not yet replicated");
    /// with more bytes after `next_offset` it is corruption. The caller
    /// decides by position.
    BadCrc {
        /// Offset immediately after the bad frame.
        next_offset: usize,
    },

    /// The frame declares a version newer than this build understands.
    VersionTooNew {
        /// Version byte found in the frame.
        found: u8,
    },

    /// The header fields contradict each other (record-length does not
    /// match payload-length). Always corruption.
    Inconsistent,
}

/// Encode one record frame.
pub fn encode_record(timestamp_ms: i64, sequence: u32, payload: &[u8]) -> Vec<u8> {
    let payload_len = payload.len() as u32;
    let record_len = LENGTH_COVERED_HEADER + payload_len;
    let crc = crc32fast::hash(payload);

    let mut buf = Vec::with_capacity(framed_len(payload.len()));
    buf.extend_from_slice(&RECORD_MAGIC);
    buf.push(RECORD_VERSION);
    buf.extend_from_slice(&record_len.to_le_bytes());
    buf.extend_from_slice(&(timestamp_ms as u64).to_le_bytes());
    buf.extend_from_slice(&sequence.to_le_bytes());
    buf.extend_from_slice(&payload_len.to_le_bytes());
    buf.extend_from_slice(&crc.to_le_bytes());
    buf.extend_from_slice(payload);
    buf
}

/// Parse one frame from `bytes` starting at `offset`.
pub fn parse_record(bytes: &[u8], offset: usize) -> ParseOutcome {
    let buf = match bytes.get(offset..) {
        Some(b) => b,
        None => return ParseOutcome::TornTail,
    };

    if buf.len() < RECORD_HEADER_LEN {
        // Not even a full header. If what we do have disagrees with the
        // magic, the bytes are not a record prefix at all.
        let have = buf.len().min(4);
        if buf[..have] != RECORD_MAGIC[..have] {
            return ParseOutcome::BadMagic;
        }
        return ParseOutcome::TornTail;
    }

    if buf[0..4] != RECORD_MAGIC {
        return ParseOutcome::BadMagic;
    }

    let version = buf[4];
    if version > RECORD_VERSION {
        return ParseOutcome::VersionTooNew { found: version };
    }

    let record_len = u32::from_le_bytes([buf[5], buf[6], buf[7], buf[8]]);
    let timestamp_ms = u64::from_le_bytes([
        buf[9], buf[10], buf[11], buf[12], buf[13], buf[14], buf[15], buf[16],
    ]) as i64;
    let sequence = u32::from_le_bytes([buf[17], buf[18], buf[19], buf[20]]);
    let payload_len = u32::from_le_bytes([buf[21], buf[22], buf[23], buf[24]]);
    let expected_crc = u32::from_le_bytes([buf[25], buf[26], buf[27], buf[28]]);

    if record_len != LENGTH_COVERED_HEADER + payload_len {
        return ParseOutcome::Inconsistent;
    }

    let frame_end = RECORD_HEADER_LEN + payload_len as usize;
    if buf.len() < frame_end {
        return ParseOutcome::TornTail;
    }

    let payload = &buf[RECORD_HEADER_LEN..frame_end];
    if crc32fast::hash(payload) != expected_crc {
        return ParseOutcome::BadCrc {
            next_offset: offset + frame_end,
        };
    }

    ParseOutcome::Record {
        record: LogRecord {
            timestamp_ms,
            sequence,
            payload: payload.to_vec(),
        },
        next_offset: offset + frame_end,
    }
}

// ===========================================================================
// Shared little-endian string primitives (used by the snapshot codec)
// ===========================================================================

/// Append a u16-length-prefixed UTF-8 string.
pub(crate) fn write_u16_str(buf: &mut Vec<u8>, s: &str) {
    let bytes = s.as_bytes();
    debug_assert!(bytes.len() <= u16::MAX as usize);
    buf.extend_from_slice(&(bytes.len() as u16).to_le_bytes());
    buf.extend_from_slice(bytes);
}

/// Read a u16-length-prefixed UTF-8 string. Returns (string, bytes consumed).
pub(crate) fn read_u16_str(buf: &[u8]) -> Option<(String, usize)> {
    if buf.len() < 2 {
        return None;
    }
    let len = u16::from_le_bytes([buf[0], buf[1]]) as usize;
    let end = 2 + len;
    if buf.len() < end {
        return None;
    }
    let s = std::str::from_utf8(&buf[2..end]).ok()?;
    Some((s.to_string(), end))
}
