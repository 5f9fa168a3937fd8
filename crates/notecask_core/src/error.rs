use std::path::PathBuf;

use thiserror::Error;

/// Unified error type for Notecask storage operations
///
/// The storage engine distinguishes between fatal errors (own writes, schema
/// problems) and recoverable conditions. Torn log tails and missing cache rows
/// are *not* errors: readers report them as ordinary outcomes.
#[derive(Debug, Error)]
pub enum NotecaskError {
    /// General error for any kind of I/O issue not otherwise documented here.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A failed read of a specific file.
    ///
    /// For peer-owned files (other devices' logs, snapshots, deletion logs)
    /// this is recoverable: callers log it and continue. For our own files it
    /// bubbles up.
    #[error("Failed to read file '{path}': {source}")]
    FileRead {
        /// Path to the file that failed to be read
        path: PathBuf,
        /// std::io error that caused this error
        source: std::io::Error,
    },

    /// A failed write to one of our own files. Always fatal for the
    /// operation that attempted it.
    #[error("Failed to write file '{path}': {source}")]
    FileWrite {
        /// Path to file that failed to be written
        path: PathBuf,
        /// std::io error that caused this error
        source: std::io::Error,
    },

    /// A log writer could not create its next file during rollover.
    #[error("Failed to roll over to a new log file in '{dir}': {source}")]
    RolloverFailed {
        /// Directory in which the new log file could not be created
        dir: PathBuf,
        /// std::io error that caused this error
        source: std::io::Error,
    },

    /// A non-tail frame failed validation (bad magic or bad CRC with more
    /// data after it). The file needs operator attention; readers must not
    /// advance a vector clock past the bad frame.
    #[error("Corrupt data in '{path}' at offset {offset}: {detail}")]
    Corrupt {
        /// File containing the bad frame
        path: PathBuf,
        /// Byte offset of the frame that failed validation
        offset: u64,
        /// What failed (magic, CRC, structure)
        detail: String,
    },

    /// A structured value (vector clock JSON, legacy snapshot envelope,
    /// app_state entry) failed to decode.
    #[error("Malformed {what}: {detail}")]
    Malformed {
        /// Which value was malformed
        what: &'static str,
        /// Decoder error text
        detail: String,
    },

    /// A snapshot file's status byte is still 0x00. The snapshot is skipped
    /// during selection; reading it directly is an error.
    #[error("Snapshot '{0}' is incomplete (status byte not flipped)")]
    IncompleteSnapshot(PathBuf),

    /// A file or database schema was produced by a newer build.
    #[error("{what} version {found} is newer than supported version {supported}")]
    VersionTooNew {
        /// What carried the version (log record, snapshot, cache schema)
        what: &'static str,
        /// Version found on disk
        found: u32,
        /// Highest version this build understands
        supported: u32,
    },

    /// An attempted write with a sequence number at or below the last
    /// persisted sequence for this device and document. Indicates another
    /// process of the same device owns the log; further writes to the
    /// document are forbidden.
    #[error(
        "Sequence regression for document '{doc_id}': attempted {attempted}, last persisted {persisted}"
    )]
    SequenceRegression {
        /// Document whose log detected the regression
        doc_id: String,
        /// Sequence number the writer attempted to use
        attempted: u32,
        /// Highest sequence already persisted
        persisted: u32,
    },

    /// Error from the local cache database.
    ///
    /// Inherited from `rusqlite::Error`.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// JSON encode/decode error for structured cache values.
    ///
    /// Inherited from `serde_json::Error`.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Error that occurs when deserializing an engine config file.
    ///
    /// Inherited from `toml::de::Error`.
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Config failed to serialize.
    ///
    /// Inherited from `toml::ser::Error`.
    #[error("Config serialize error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    /// A storage directory id that no coordinator knows about.
    #[error("Storage directory '{0}' is not registered")]
    SdNotRegistered(String),

    /// The CRDT library rejected an update payload.
    #[error("Failed to apply CRDT update to '{doc_id}': {detail}")]
    CrdtApply {
        /// Document the update was destined for
        doc_id: String,
        /// yrs error text
        detail: String,
    },
}

/// Result type alias for Notecask storage operations
pub type Result<T> = std::result::Result<T, NotecaskError>;

impl NotecaskError {
    /// Whether this error came from reading a peer-owned file and may be
    /// logged and skipped rather than aborting the surrounding operation.
    pub fn is_peer_recoverable(&self) -> bool {
        matches!(
            self,
            NotecaskError::FileRead { .. }
                | NotecaskError::Corrupt { .. }
                | NotecaskError::IncompleteSnapshot(_)
                | NotecaskError::Malformed { .. }
        )
    }
}
