//! Cross-device deletion propagation.
//!
//! CRDT deletes inside a document travel in-band, but removing a document
//! itself must be observable across devices: under file replication the
//! absence of files is ambiguous (not yet synced? deleted?). Each device
//! appends tombstones to its own plain-text log in `deleted/`:
//!
//! ```text
//! <DocumentId>|<timestampMillis>\n
//! ```
//!
//! A line is trusted only once its terminating newline is present; a
//! trailing unterminated line is a partial sync and is picked up on a
//! later pass. Tombstones are never rewritten or deleted.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::cache::CacheDb;
use crate::error::{NotecaskError, Result};
use crate::identity::DeviceIdentity;

/// Name of the tombstone directory inside an SD.
const DELETED_DIR: &str = "deleted";

/// Parse a deletion log filename: `<profile>_<instance>.log`, or legacy
/// `<instance>.log`.
///
/// The two forms are told apart at the first `_` in the stem, so profile
/// ids must not contain `_` (generated ids are UUIDs and never do).
/// Instance ids may. A legacy single id that itself contains `_` is
/// indistinguishable from the current form and parses as
/// profile + instance.
fn parse_deletion_filename(filename: &str) -> Option<(Option<String>, String)> {
    let stem = filename.strip_suffix(".log")?;
    if stem.is_empty() {
        return None;
    }
    match stem.split_once('_') {
        Some((profile, instance)) if !profile.is_empty() && !instance.is_empty() => {
            Some((Some(profile.to_string()), instance.to_string()))
        }
        _ => Some((None, stem.to_string())),
    }
}

/// A parsed tombstone line.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Tombstone {
    doc_id: String,
    timestamp_ms: i64,
}

/// Parse the newline-terminated prefix of a deletion log. Returns the
/// tombstones plus how many bytes of the buffer they span.
fn parse_complete_lines(bytes: &[u8]) -> (Vec<Tombstone>, u64) {
    // Everything after the last newline is a line still in flight.
    let complete = match bytes.iter().rposition(|b| *b == b'\n') {
        Some(pos) => &bytes[..=pos],
        None => return (Vec::new(), 0),
    };
    let consumed = complete.len() as u64;

    let text = String::from_utf8_lossy(complete);
    let mut tombstones = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match line.split_once('|') {
            Some((doc_id, ts)) if !doc_id.is_empty() => match ts.trim().parse::<i64>() {
                Ok(timestamp_ms) => tombstones.push(Tombstone {
                    doc_id: doc_id.to_string(),
                    timestamp_ms,
                }),
                Err(_) => log::warn!("deletion log line with bad timestamp: {:?}", line),
            },
            _ => log::warn!("malformed deletion log line: {:?}", line),
        }
    }
    (tombstones, consumed)
}

/// The per-SD tombstone log.
pub struct DeletionLog {
    dir: PathBuf,
    identity: DeviceIdentity,
    /// Tombstones already handled this process run, per peer instance.
    processed: Mutex<HashMap<String, HashSet<String>>>,
    /// Optional persisted read positions (the activity-log-state rows).
    state_store: Option<(Arc<CacheDb>, String)>,
}

impl DeletionLog {
    /// Create the deletion log for one storage directory.
    pub fn new(sd_path: &Path, identity: DeviceIdentity) -> Self {
        Self {
            dir: sd_path.join(DELETED_DIR),
            identity,
            processed: Mutex::new(HashMap::new()),
            state_store: None,
        }
    }

    /// Persist per-peer read positions in the cache database, so later
    /// process runs skip the already-consumed prefix of each peer file.
    ///
    /// Purely an optimization: a run without the store re-reads from byte
    /// zero and relies on the caller's existence check for idempotence.
    pub fn with_state_store(mut self, db: Arc<CacheDb>, sd_id: impl Into<String>) -> Self {
        self.state_store = Some((db, sd_id.into()));
        self
    }

    fn own_file(&self) -> PathBuf {
        self.dir.join(format!("{}.log", self.identity.file_prefix()))
    }

    /// Append a tombstone for `doc_id` to our own file.
    pub fn record_deletion(&self, doc_id: &str) -> Result<()> {
        std::fs::create_dir_all(&self.dir).map_err(|e| NotecaskError::FileWrite {
            path: self.dir.clone(),
            source: e,
        })?;
        let path = self.own_file();
        let line = format!("{}|{}\n", doc_id, chrono::Utc::now().timestamp_millis());

        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(&path)
            .map_err(|e| NotecaskError::FileWrite {
                path: path.clone(),
                source: e,
            })?;
        file.write_all(line.as_bytes())
            .and_then(|()| file.sync_data())
            .map_err(|e| NotecaskError::FileWrite { path, source: e })?;
        Ok(())
    }

    /// Read every peer's deletion log and hand new tombstones to the
    /// application.
    ///
    /// `still_exists` lets the caller skip documents already gone locally;
    /// `process` performs the actual deletion. A tombstone is marked
    /// processed once handled (or once known to be moot), so repeated
    /// calls in one process run are no-ops. Per-file errors are logged and
    /// do not abort the sweep.
    ///
    /// Returns the set of document ids deleted by this pass.
    pub fn sync_from_other_instances(
        &self,
        still_exists: &dyn Fn(&str) -> bool,
        process: &mut dyn FnMut(&str) -> Result<()>,
    ) -> Result<BTreeSet<String>> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeSet::new()),
            Err(e) => {
                return Err(NotecaskError::FileRead {
                    path: self.dir.clone(),
                    source: e,
                });
            }
        };

        let mut deleted = BTreeSet::new();
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    log::warn!("deletion sync: unreadable directory entry: {}", e);
                    continue;
                }
            };
            let filename = entry.file_name().to_string_lossy().into_owned();
            let Some((profile_id, instance_id)) = parse_deletion_filename(&filename) else {
                continue;
            };
            // Our own tombstones were applied when they were recorded.
            if self.identity.matches(&instance_id, profile_id.as_deref()) {
                continue;
            }

            let bytes = match std::fs::read(entry.path()) {
                Ok(bytes) => bytes,
                Err(e) => {
                    log::warn!("deletion sync: cannot read {}: {}", filename, e);
                    continue;
                }
            };

            let start = self.resume_offset(&instance_id, &filename);
            let start = if start as usize > bytes.len() { 0 } else { start };
            let (tombstones, consumed) = parse_complete_lines(&bytes[start as usize..]);

            let mut all_handled = true;
            for tombstone in tombstones {
                let mut processed = self.processed.lock().unwrap();
                let seen = processed.entry(instance_id.clone()).or_default();
                if seen.contains(&tombstone.doc_id) {
                    continue;
                }
                if !still_exists(&tombstone.doc_id) {
                    seen.insert(tombstone.doc_id);
                    continue;
                }
                drop(processed);

                match process(&tombstone.doc_id) {
                    Ok(()) => {
                        log::debug!(
                            "processed tombstone {} (recorded at {})",
                            tombstone.doc_id,
                            tombstone.timestamp_ms
                        );
                        self.processed
                            .lock()
                            .unwrap()
                            .entry(instance_id.clone())
                            .or_default()
                            .insert(tombstone.doc_id.clone());
                        deleted.insert(tombstone.doc_id);
                    }
                    Err(e) => {
                        // Left unmarked: retried on the next pass.
                        all_handled = false;
                        log::warn!(
                            "deletion sync: processing {} from {} failed: {}",
                            tombstone.doc_id,
                            filename,
                            e
                        );
                    }
                }
            }

            // Advance the persisted position only past fully handled
            // batches; a failure keeps the whole batch in scope for the
            // next pass.
            if all_handled && consumed > 0 {
                self.save_resume_offset(&instance_id, &filename, start + consumed);
            }
        }
        Ok(deleted)
    }

    /// Persisted read position for a peer file, or 0.
    fn resume_offset(&self, instance_id: &str, filename: &str) -> u64 {
        let Some((db, sd_id)) = &self.state_store else {
            return 0;
        };
        match db.get_activity_log_state(sd_id, instance_id) {
            Ok((offset, file)) if file == filename => offset,
            Ok(_) => 0,
            Err(e) => {
                log::warn!("deletion sync: cannot read activity state: {}", e);
                0
            }
        }
    }

    fn save_resume_offset(&self, instance_id: &str, filename: &str, offset: u64) {
        let Some((db, sd_id)) = &self.state_store else {
            return;
        };
        if let Err(e) = db.save_activity_log_state(sd_id, instance_id, offset, filename) {
            log::warn!("deletion sync: cannot save activity state: {}", e);
        }
    }
}

impl std::fmt::Debug for DeletionLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeletionLog")
            .field("dir", &self.dir)
            .finish_non_exhaustive()
    }
}
