//! Single-writer log append.
//!
//! One `LogWriter` exists per (device, document) in the whole system. It
//! appends framed records to the active log file, fsyncing each append, and
//! rolls over to a fresh file once the active one crosses the configured
//! threshold. Sequence numbers are assigned by the document manager and
//! continue monotonically across rollovers.
//!
//! Every process run starts a fresh log file on its first append. Files
//! from earlier runs are never reopened for writing: if the previous run
//! crashed mid-append, its torn tail stays where it is and readers skip it.
//! Rolled-over files are immutable from that point on.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{NotecaskError, Result};
use crate::frame;
use crate::identity::DeviceIdentity;

use super::files::format_log_filename;

/// Where an appended record landed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendResult {
    /// Filename of the log file containing the record.
    pub file: String,

    /// Byte offset at which the record's frame begins.
    pub offset: u64,

    /// Total framed length of the record.
    pub framed_len: u64,
}

struct ActiveFile {
    file: File,
    filename: String,
    len: u64,
}

/// Appender for one (device, document) log.
pub struct LogWriter {
    dir: PathBuf,
    identity: DeviceIdentity,
    rollover_threshold: u64,
    active: Option<ActiveFile>,
}

impl LogWriter {
    /// Create a writer for the given `logs/` directory.
    ///
    /// Nothing touches the filesystem until the first append; documents
    /// that are only read never create directories.
    pub fn new(dir: impl Into<PathBuf>, identity: DeviceIdentity, rollover_threshold: u64) -> Self {
        Self {
            dir: dir.into(),
            identity,
            rollover_threshold,
            active: None,
        }
    }

    /// Directory this writer appends into.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Filename of the active log file, if one has been created.
    pub fn current_file(&self) -> Option<&str> {
        self.active.as_ref().map(|a| a.filename.as_str())
    }

    /// Append one record. Returns where it landed.
    ///
    /// Crash safety: the frame is written with a single `write_all` and
    /// synced before returning. A crash mid-write leaves a torn tail that
    /// readers discard; a crash after return leaves a complete record.
    pub fn append_record(
        &mut self,
        timestamp_ms: i64,
        sequence: u32,
        payload: &[u8],
    ) -> Result<AppendResult> {
        let encoded = frame::encode_record(timestamp_ms, sequence, payload);
        let framed_len = encoded.len() as u64;

        self.ensure_active_file(framed_len)?;
        let dir = self.dir.clone();
        let Some(active) = self.active.as_mut() else {
            return Err(NotecaskError::FileWrite {
                path: dir,
                source: std::io::Error::other("no active log file after rollover"),
            });
        };

        let offset = active.len;
        let path = dir.join(&active.filename);
        active
            .file
            .write_all(&encoded)
            .and_then(|()| active.file.sync_data())
            .map_err(|e| NotecaskError::FileWrite {
                path: path.clone(),
                source: e,
            })?;
        active.len += framed_len;

        Ok(AppendResult {
            file: active.filename.clone(),
            offset,
            framed_len,
        })
    }

    /// Flush and release the OS handle. Idempotent.
    pub fn finalize(&mut self) -> Result<()> {
        if let Some(active) = self.active.take() {
            active
                .file
                .sync_all()
                .map_err(|e| NotecaskError::FileWrite {
                    path: self.dir.join(&active.filename),
                    source: e,
                })?;
        }
        Ok(())
    }

    /// Make sure an active file exists with room for `incoming` more bytes.
    fn ensure_active_file(&mut self, incoming: u64) -> Result<()> {
        let needs_rollover = match &self.active {
            Some(active) => active.len > 0 && active.len + incoming > self.rollover_threshold,
            None => false,
        };

        if needs_rollover {
            log::debug!(
                "rolling over log in {} at {} bytes",
                self.dir.display(),
                self.active.as_ref().map_or(0, |a| a.len)
            );
            self.finalize()?;
        }

        if self.active.is_none() {
            let was_rollover = needs_rollover;
            let active = self.create_file().map_err(|e| {
                if was_rollover {
                    NotecaskError::RolloverFailed {
                        dir: self.dir.clone(),
                        source: e,
                    }
                } else {
                    NotecaskError::FileWrite {
                        path: self.dir.clone(),
                        source: e,
                    }
                }
            })?;
            self.active = Some(active);
        }
        Ok(())
    }

    /// Create a fresh log file, bumping the timestamp on collision.
    fn create_file(&self) -> std::io::Result<ActiveFile> {
        std::fs::create_dir_all(&self.dir)?;

        let mut millis = chrono::Utc::now().timestamp_millis();
        loop {
            let filename =
                format_log_filename(&self.identity.profile_id, &self.identity.instance_id, millis);
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(self.dir.join(&filename))
            {
                Ok(file) => {
                    return Ok(ActiveFile {
                        file,
                        filename,
                        len: 0,
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    millis += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl std::fmt::Debug for LogWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogWriter")
            .field("dir", &self.dir)
            .field("current_file", &self.current_file())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crdtlog::{ScanEnd, list_log_files, read_all_records};

    fn writer_in(dir: &Path) -> LogWriter {
        LogWriter::new(
            dir.join("logs"),
            DeviceIdentity::new("profile-a", "instance-1"),
            8 * 1024 * 1024,
        )
    }

    #[test]
    fn test_append_creates_dir_and_file() {
        let tmp = tempfile::tempdir().unwrap();
        let mut writer = writer_in(tmp.path());

        let result = writer.append_record(1_700_000_000_000, 1, b"first").unwrap();
        assert_eq!(result.offset, 0);
        assert!(result.file.starts_with("profile-a_instance-1_"));
        assert!(tmp.path().join("logs").join(&result.file).exists());
    }

    #[test]
    fn test_appends_are_contiguous() {
        let tmp = tempfile::tempdir().unwrap();
        let mut writer = writer_in(tmp.path());

        let a = writer.append_record(1, 1, b"aaaa").unwrap();
        let b = writer.append_record(2, 2, b"bb").unwrap();
        assert_eq!(a.file, b.file);
        assert_eq!(b.offset, a.offset + a.framed_len);
    }

    #[test]
    fn test_written_records_read_back() {
        let tmp = tempfile::tempdir().unwrap();
        let mut writer = writer_in(tmp.path());

        writer.append_record(10, 1, b"one").unwrap();
        writer.append_record(20, 2, b"two").unwrap();
        let file = writer.current_file().unwrap().to_string();
        writer.finalize().unwrap();

        let outcome = read_all_records(&tmp.path().join("logs").join(&file)).unwrap();
        assert_eq!(outcome.ended, ScanEnd::Eof);
        assert_eq!(outcome.records.len(), 2);
        assert_eq!(outcome.records[0].sequence, 1);
        assert_eq!(outcome.records[0].data, b"one");
        assert_eq!(outcome.records[1].timestamp_ms, 20);
    }

    #[test]
    fn test_rollover_at_threshold() {
        let tmp = tempfile::tempdir().unwrap();
        let mut writer = LogWriter::new(
            tmp.path().join("logs"),
            DeviceIdentity::new("p", "i"),
            128, // tiny threshold to force rollover
        );

        let first = writer.append_record(1, 1, &[0u8; 64]).unwrap();
        let second = writer.append_record(2, 2, &[0u8; 64]).unwrap();
        assert_ne!(first.file, second.file);
        assert_eq!(second.offset, 0);

        let files = list_log_files(&tmp.path().join("logs")).unwrap();
        assert_eq!(files.len(), 2);
    }

    #[test]
    fn test_finalize_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let mut writer = writer_in(tmp.path());
        writer.append_record(1, 1, b"x").unwrap();
        writer.finalize().unwrap();
        writer.finalize().unwrap();
    }

    #[test]
    fn test_new_file_per_writer_instance() {
        let tmp = tempfile::tempdir().unwrap();

        let mut first = writer_in(tmp.path());
        first.append_record(1, 1, b"run one").unwrap();
        first.finalize().unwrap();

        // A second writer (fresh process run) never reopens the old file.
        let mut second = writer_in(tmp.path());
        second.append_record(2, 2, b"run two").unwrap();

        let files = list_log_files(&tmp.path().join("logs")).unwrap();
        assert_eq!(files.len(), 2);
    }
}
