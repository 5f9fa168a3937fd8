//! Log filename conventions and directory listing.
//!
//! Current form: `<profileId>_<instanceId>_<createMillis>.crdtlog`.
//! Legacy single-id form `<instanceId>_<createMillis>.crdtlog` is accepted
//! on read. Profile ids must not contain `_`; instance ids may (the parser
//! splits the creator prefix at its first underscore).

use std::path::{Path, PathBuf};

use crate::error::{NotecaskError, Result};

/// File extension for CRDT update logs.
pub const LOG_EXTENSION: &str = "crdtlog";

/// A log file found in a document's `logs/` directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFileInfo {
    /// Full path to the file.
    pub path: PathBuf,

    /// Bare filename.
    pub filename: String,

    /// Creator instance id.
    pub instance_id: String,

    /// Creator profile id; absent for legacy single-id filenames.
    pub profile_id: Option<String>,

    /// File creation time from the filename, Unix milliseconds.
    pub create_millis: i64,
}

/// Build the filename this device uses for a log created at `millis`.
pub fn format_log_filename(profile_id: &str, instance_id: &str, millis: i64) -> String {
    format!("{}_{}_{}.{}", profile_id, instance_id, millis, LOG_EXTENSION)
}

/// Parse a log filename into its creator identity and creation time.
///
/// Returns `None` for files that are not logs (wrong extension, no
/// parseable timestamp).
pub fn parse_log_filename(filename: &str) -> Option<(Option<String>, String, i64)> {
    let stem = filename.strip_suffix(&format!(".{}", LOG_EXTENSION))?;

    // Timestamp is always the last `_`-separated token.
    let (creator, ts) = stem.rsplit_once('_')?;
    let create_millis: i64 = ts.parse().ok()?;
    if creator.is_empty() {
        return None;
    }

    match creator.split_once('_') {
        Some((profile, instance)) if !profile.is_empty() && !instance.is_empty() => {
            Some((Some(profile.to_string()), instance.to_string(), create_millis))
        }
        _ => Some((None, creator.to_string(), create_millis)),
    }
}

/// List log files in a directory, oldest first by filename timestamp.
///
/// A missing directory is an empty list (the document may simply never have
/// been written on any device yet). Unrecognized filenames are skipped.
pub fn list_log_files(dir: &Path) -> Result<Vec<LogFileInfo>> {
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
        if let Some((profile_id, instance_id, create_millis)) = parse_log_filename(&filename) {
            files.push(LogFileInfo {
                path: entry.path(),
                filename,
                instance_id,
                profile_id,
                create_millis,
            });
        }
    }

    // Oldest first so replay applies records in creation order per device.
    files.sort_by(|a, b| {
        a.create_millis
            .cmp(&b.create_millis)
            .then_with(|| a.filename.cmp(&b.filename))
    });
    Ok(files)
}
