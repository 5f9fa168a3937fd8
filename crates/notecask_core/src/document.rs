//! Per-document orchestration.
//!
//! A [`DocumentManager`] exists per (storage directory, document). It
//! exclusively owns the in-memory CRDT handle, the log writer, and the
//! per-document vector clock, and it is the only component that moves any
//! of them. All mutation funnels through it, serialized by an internal
//! mutex.
//!
//! Loading prefers the cache fast path (sync-state row plus a log tail
//! filtered by the stored clock) and falls back to the full file path
//! (best snapshot plus every log file from the clock's offsets). Either
//! way the merged log files remain authoritative; cache rows and snapshot
//! files are optimizations only.
//!
//! # Document lifecycle
//!
//! ```text
//! NotLoaded → Loading → Loaded ↔ Dirty (has unsaved updates)
//!                         ↓
//!                       Snapshotting → Loaded
//! Loaded → Unloaded (on shutdown / eviction)
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use crate::cache::{CacheDb, SequenceState};
use crate::clock::{ClockEntry, VectorClock};
use crate::config::EngineConfig;
use crate::crdtlog::{LogFileInfo, LogWriter, ReadRecord, list_log_files, read_records};
use crate::error::{NotecaskError, Result};
use crate::folder_doc::FolderTreeDoc;
use crate::identity::DeviceIdentity;
use crate::note_doc::NoteDoc;
use crate::snapshot;

/// Which kind of document a manager handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocKind {
    /// A single note (one per NoteId).
    Note,

    /// The folder tree (one per storage directory).
    FolderTree,
}

impl DocKind {
    /// Subdirectory of the SD holding this kind's documents.
    pub fn dir_name(self) -> &'static str {
        match self {
            DocKind::Note => "notes",
            DocKind::FolderTree => "folders",
        }
    }
}

/// A loaded CRDT document of either kind.
#[derive(Debug)]
pub enum DocHandle {
    /// A note document.
    Note(NoteDoc),
    /// A folder-tree document.
    FolderTree(FolderTreeDoc),
}

impl DocHandle {
    /// Create an empty document of the given kind.
    pub fn new(kind: DocKind) -> Self {
        match kind {
            DocKind::Note => DocHandle::Note(NoteDoc::new()),
            DocKind::FolderTree => DocHandle::FolderTree(FolderTreeDoc::new()),
        }
    }

    /// The kind of this document.
    pub fn kind(&self) -> DocKind {
        match self {
            DocHandle::Note(_) => DocKind::Note,
            DocHandle::FolderTree(_) => DocKind::FolderTree,
        }
    }

    /// Apply an opaque update payload.
    pub fn apply_update(&self, update: &[u8]) -> Result<()> {
        match self {
            DocHandle::Note(doc) => doc.apply_update(update),
            DocHandle::FolderTree(doc) => doc.apply_update(update),
        }
    }

    /// Encode the full state as a single update.
    pub fn encode_state_as_update(&self) -> Vec<u8> {
        match self {
            DocHandle::Note(doc) => doc.encode_state_as_update(),
            DocHandle::FolderTree(doc) => doc.encode_state_as_update(),
        }
    }

    /// Encode the state vector for diff computation.
    pub fn encode_state_vector(&self) -> Vec<u8> {
        match self {
            DocHandle::Note(doc) => doc.encode_state_vector(),
            DocHandle::FolderTree(doc) => doc.encode_state_vector(),
        }
    }

    /// Encode the updates a peer with `remote_state_vector` is missing.
    pub fn encode_diff(&self, remote_state_vector: &[u8]) -> Result<Vec<u8>> {
        match self {
            DocHandle::Note(doc) => doc.encode_diff(remote_state_vector),
            DocHandle::FolderTree(doc) => doc.encode_diff(remote_state_vector),
        }
    }

    /// The note view, if this is a note.
    pub fn as_note(&self) -> Option<&NoteDoc> {
        match self {
            DocHandle::Note(doc) => Some(doc),
            DocHandle::FolderTree(_) => None,
        }
    }

    /// The folder-tree view, if this is a folder tree.
    pub fn as_folder_tree(&self) -> Option<&FolderTreeDoc> {
        match self {
            DocHandle::FolderTree(doc) => Some(doc),
            DocHandle::Note(_) => None,
        }
    }
}

/// Cooperative cancellation handle for long loads and syncs.
///
/// Cancellation aborts further reads; it never rolls back already-applied
/// updates, so the vector clock keeps every advance made before the flag
/// was raised.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// Create a flag in the not-cancelled state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Where a saved update landed in the device's log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedUpdate {
    /// Sequence number assigned to the update.
    pub sequence: u32,

    /// Byte offset of the record's frame in `file`.
    pub offset: u64,

    /// Log filename containing the record.
    pub file: String,
}

/// Snapshot of a document handed to the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedDocument {
    /// Encoded CRDT state.
    pub crdt_state: Vec<u8>,

    /// Vector clock at which the state was assembled.
    pub vector_clock: VectorClock,
}

/// Lifecycle state of a managed document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocState {
    /// No in-memory document yet.
    NotLoaded,
    /// A load is in progress.
    Loading,
    /// Loaded and clean.
    Loaded,
    /// Loaded with updates not yet covered by a file snapshot.
    Dirty,
    /// A file snapshot is being written.
    Snapshotting,
    /// Finalized; the manager no longer accepts work.
    Unloaded,
}

/// Event emitted after every applied change (local save or remote apply).
///
/// Subscribers receive events in apply order per document. The cache
/// projector is the primary subscriber; anything else (UI refresh hooks,
/// tests) uses the same stream.
#[derive(Debug, Clone)]
pub struct DocumentEvent {
    /// Storage directory id.
    pub sd_id: String,

    /// Document id (note id, or the sd id for the folder tree).
    pub doc_id: String,

    /// Document kind.
    pub kind: DocKind,

    /// Clock after the change.
    pub vector_clock: VectorClock,

    /// Full encoded CRDT state after the change.
    pub new_state: Vec<u8>,

    /// When the change was applied, Unix milliseconds.
    pub timestamp_ms: i64,
}

/// Callback invoked for each [`DocumentEvent`].
pub type EventCallback = Arc<dyn Fn(&DocumentEvent) + Send + Sync>;

struct Inner {
    doc: Option<DocHandle>,
    clock: VectorClock,
    writer: LogWriter,
    /// Sequence the next local update will carry; 0 until initialized.
    next_sequence: u32,
    updates_since_snapshot: u32,
    last_snapshot_ms: i64,
    /// Set after a detected sequence regression; all further writes refuse.
    poisoned: bool,
    state: DocState,
}

/// Owner and orchestrator of one document.
pub struct DocumentManager {
    sd_id: String,
    doc_id: String,
    kind: DocKind,
    doc_dir: PathBuf,
    identity: DeviceIdentity,
    config: EngineConfig,
    db: Arc<CacheDb>,
    inner: Mutex<Inner>,
    callbacks: RwLock<Vec<EventCallback>>,
}

impl DocumentManager {
    /// Create a manager for one document. Nothing is loaded yet.
    pub fn new(
        sd_id: impl Into<String>,
        sd_path: &std::path::Path,
        kind: DocKind,
        doc_id: impl Into<String>,
        identity: DeviceIdentity,
        config: EngineConfig,
        db: Arc<CacheDb>,
    ) -> Self {
        let sd_id = sd_id.into();
        let doc_id = doc_id.into();
        let doc_dir = match kind {
            DocKind::Note => sd_path.join(kind.dir_name()).join(&doc_id),
            DocKind::FolderTree => sd_path.join(kind.dir_name()),
        };
        let writer = LogWriter::new(
            doc_dir.join("logs"),
            identity.clone(),
            config.rollover_threshold,
        );
        Self {
            sd_id,
            doc_id,
            kind,
            doc_dir,
            identity,
            config,
            db,
            inner: Mutex::new(Inner {
                doc: None,
                clock: VectorClock::new(),
                writer,
                next_sequence: 0,
                updates_since_snapshot: 0,
                last_snapshot_ms: 0,
                poisoned: false,
                state: DocState::NotLoaded,
            }),
            callbacks: RwLock::new(Vec::new()),
        }
    }

    /// Document id this manager owns.
    pub fn doc_id(&self) -> &str {
        &self.doc_id
    }

    /// Document kind this manager owns.
    pub fn kind(&self) -> DocKind {
        self.kind
    }

    /// Current lifecycle state.
    pub fn state(&self) -> DocState {
        self.inner.lock().unwrap().state
    }

    /// Subscribe to the ordered event stream of this document.
    pub fn subscribe(&self, callback: EventCallback) {
        self.callbacks.write().unwrap().push(callback);
    }

    fn logs_dir(&self) -> PathBuf {
        self.doc_dir.join("logs")
    }

    fn snapshots_dir(&self) -> PathBuf {
        self.doc_dir.join("snapshots")
    }

    // ==================== Loading ====================

    /// Load via the cache fast path. Returns `None` when no cache row
    /// exists (the caller then takes the full file path).
    pub fn load_from_cache(&self, cancel: &CancelFlag) -> Result<Option<LoadedDocument>> {
        let mut inner = self.inner.lock().unwrap();
        if inner.doc.is_some() {
            return Ok(Some(Self::loaded_view(&inner)));
        }

        let row = match self.kind {
            DocKind::Note => self.db.get_note_sync_state(&self.doc_id, &self.sd_id)?,
            DocKind::FolderTree => self.db.get_folder_sync_state(&self.sd_id)?,
        };
        let Some(row) = row else {
            return Ok(None);
        };

        inner.state = DocState::Loading;
        let doc = DocHandle::new(self.kind);
        if !row.document_state.is_empty() {
            doc.apply_update(&row.document_state)?;
        }
        inner.doc = Some(doc);
        inner.clock = VectorClock::from_json(&row.vector_clock)?;

        // Newer records may have arrived since the row was written.
        self.tail_logs(&mut inner, cancel);
        self.init_sequence(&mut inner)?;
        inner.state = DocState::Loaded;

        log::debug!(
            "loaded {} {} from cache (clock: {} instances)",
            self.kind_label(),
            self.doc_id,
            inner.clock.len()
        );
        Ok(Some(Self::loaded_view(&inner)))
    }

    /// Full load: best snapshot plus every log file.
    pub fn load_from_files(&self, cancel: &CancelFlag) -> Result<LoadedDocument> {
        let mut inner = self.inner.lock().unwrap();
        if inner.doc.is_some() {
            return Ok(Self::loaded_view(&inner));
        }
        inner.state = DocState::Loading;

        let doc = DocHandle::new(self.kind);
        let mut clock = VectorClock::new();

        if let Some(best) = snapshot::find_best_snapshot(&self.snapshots_dir())? {
            match snapshot::read_snapshot(&best.path) {
                Ok(snap) => {
                    if let Err(e) = doc.apply_update(&snap.document_state) {
                        log::warn!(
                            "snapshot state for {} failed to apply, replaying logs from scratch: {}",
                            self.doc_id,
                            e
                        );
                    } else {
                        clock = snap.vector_clock;
                    }
                }
                Err(e) => {
                    log::warn!(
                        "best snapshot {} unreadable, replaying logs from scratch: {}",
                        best.path.display(),
                        e
                    );
                }
            }
        }

        inner.doc = Some(doc);
        inner.clock = clock;
        self.tail_logs(&mut inner, cancel);
        self.init_sequence(&mut inner)?;
        inner.state = DocState::Loaded;

        log::debug!(
            "loaded {} {} from files (clock: {} instances, {} total changes)",
            self.kind_label(),
            self.doc_id,
            inner.clock.len(),
            inner.clock.total_changes()
        );
        // A full load means the cache row was stale or missing; refresh it.
        self.persist_db_snapshot(&inner)?;
        Ok(Self::loaded_view(&inner))
    }

    /// Load cache-first, falling back to the file path.
    pub fn load(&self, cancel: &CancelFlag) -> Result<LoadedDocument> {
        match self.load_from_cache(cancel)? {
            Some(loaded) => Ok(loaded),
            None => self.load_from_files(cancel),
        }
    }

    /// Advance the document over every log file, per the vector clock.
    ///
    /// Per-file read errors are logged and skipped (peer files arrive in
    /// arbitrary states of partial sync); every advance made before an
    /// error or cancellation is kept.
    fn tail_logs(&self, inner: &mut Inner, cancel: &CancelFlag) {
        let files = match list_log_files(&self.logs_dir()) {
            Ok(files) => files,
            Err(e) => {
                log::warn!("cannot list logs for {}: {}", self.doc_id, e);
                return;
            }
        };

        for file in files {
            if cancel.is_cancelled() {
                log::debug!("load of {} cancelled", self.doc_id);
                return;
            }
            if let Err(e) = Self::tail_one_log(inner, &file, cancel) {
                if e.is_peer_recoverable() {
                    log::warn!("partial sync of {}: {}", file.filename, e);
                } else {
                    log::error!("failed reading {}: {}", file.filename, e);
                }
            }
        }
    }

    /// Apply the unseen suffix of one log file.
    fn tail_one_log(inner: &mut Inner, file: &LogFileInfo, cancel: &CancelFlag) -> Result<()> {
        let existing = inner.clock.get(&file.instance_id).cloned();
        let known_sequence = existing.as_ref().map_or(0, |e| e.sequence);

        let start = match &existing {
            Some(e) if e.filename == file.filename => e.offset,
            // An earlier file than the clock already points at: covered.
            Some(e) if !e.filename.is_empty() && file.filename.as_str() <= e.filename.as_str() => {
                return Ok(());
            }
            _ => 0,
        };

        let outcome = read_records(&file.path, start)?;

        let Inner { doc, clock, .. } = inner;
        let Some(doc) = doc.as_ref() else {
            return Ok(());
        };

        let mut last: Option<(u32, u64)> = None;
        for record in &outcome.records {
            if cancel.is_cancelled() {
                break;
            }
            if record.sequence <= known_sequence {
                continue;
            }
            if let Err(e) = doc.apply_update(&record.data) {
                // Do not advance the clock past a payload the CRDT refuses.
                log::error!(
                    "update seq {} in {} rejected: {}",
                    record.sequence,
                    file.filename,
                    e
                );
                break;
            }
            last = Some((record.sequence, record.next_offset));
        }

        if let Some((sequence, offset)) = last {
            clock.advance(
                &file.instance_id,
                ClockEntry {
                    sequence,
                    offset,
                    filename: file.filename.clone(),
                },
            );
        }
        Ok(())
    }

    /// Seed the writer's sequence from everything known about our own
    /// instance: the clock built from files and the persisted row.
    fn init_sequence(&self, inner: &mut Inner) -> Result<()> {
        let from_clock = inner.clock.sequence_for(&self.identity.instance_id);
        let persisted = self
            .db
            .get_sequence_state(&self.sd_id, &self.doc_id)?
            .current_sequence;
        inner.next_sequence = from_clock.max(persisted) + 1;
        Ok(())
    }

    // ==================== Writing ====================

    /// Append one local update: assign the next sequence, frame it into the
    /// log, advance our own clock entry, refresh the cache row.
    pub fn save_update(&self, payload: &[u8]) -> Result<SavedUpdate> {
        let (saved, event) = {
            let mut inner = self.inner.lock().unwrap();
            self.ensure_writable(&inner)?;

            let sequence = inner.next_sequence;
            // Another process of this device may have advanced the
            // persisted row since we loaded. Writing a stale sequence
            // would fork the log; refuse and poison.
            let persisted = self
                .db
                .get_sequence_state(&self.sd_id, &self.doc_id)?
                .current_sequence;
            if sequence <= persisted {
                inner.poisoned = true;
                return Err(NotecaskError::SequenceRegression {
                    doc_id: self.doc_id.clone(),
                    attempted: sequence,
                    persisted,
                });
            }

            if let Some(doc) = inner.doc.as_ref() {
                doc.apply_update(payload)?;
            }

            let now = chrono::Utc::now().timestamp_millis();
            let appended = inner.writer.append_record(now, sequence, payload)?;
            let end_offset = appended.offset + appended.framed_len;

            inner.clock.advance(
                &self.identity.instance_id,
                ClockEntry {
                    sequence,
                    offset: end_offset,
                    filename: appended.file.clone(),
                },
            );
            inner.next_sequence = sequence + 1;
            inner.updates_since_snapshot += 1;
            inner.state = DocState::Dirty;

            self.db.save_sequence_state(
                &self.sd_id,
                &self.doc_id,
                &SequenceState {
                    current_sequence: sequence,
                    current_file: appended.file.clone(),
                    current_offset: end_offset,
                },
            )?;
            self.persist_db_snapshot(&inner)?;

            (
                SavedUpdate {
                    sequence,
                    offset: appended.offset,
                    file: appended.file,
                },
                self.event_from(&inner, now),
            )
        };

        self.emit(event);
        Ok(saved)
    }

    /// Apply one record read from a peer's log and advance that peer's
    /// clock entry. Used by the sync loop.
    pub fn apply_remote_record(
        &self,
        instance_id: &str,
        filename: &str,
        record: &ReadRecord,
    ) -> Result<()> {
        let event = {
            let mut inner = self.inner.lock().unwrap();
            if record.sequence <= inner.clock.sequence_for(instance_id) {
                return Ok(());
            }
            let Some(doc) = inner.doc.as_ref() else {
                return Ok(());
            };
            doc.apply_update(&record.data)?;
            inner.clock.advance(
                instance_id,
                ClockEntry {
                    sequence: record.sequence,
                    offset: record.next_offset,
                    filename: filename.to_string(),
                },
            );
            self.persist_db_snapshot(&inner)?;
            self.event_from(&inner, chrono::Utc::now().timestamp_millis())
        };

        self.emit(event);
        Ok(())
    }

    /// Pull every unseen peer record into the document. Returns how many
    /// records were applied. Interruptible between records.
    pub fn sync_peer_logs(&self, cancel: &CancelFlag) -> Result<usize> {
        // Gather catch-up work under the lock, read files outside it.
        let plan: Vec<(LogFileInfo, u64, u32)> = {
            let inner = self.inner.lock().unwrap();
            if inner.doc.is_none() {
                return Ok(0);
            }
            let files = list_log_files(&self.logs_dir())?;
            files
                .into_iter()
                .filter(|f| !self.identity.matches(&f.instance_id, f.profile_id.as_deref()))
                .filter_map(|f| {
                    let existing = inner.clock.get(&f.instance_id);
                    let start = match existing {
                        Some(e) if e.filename == f.filename => e.offset,
                        Some(e)
                            if !e.filename.is_empty()
                                && f.filename.as_str() <= e.filename.as_str() =>
                        {
                            return None;
                        }
                        _ => 0,
                    };
                    let known = existing.map_or(0, |e| e.sequence);
                    Some((f, start, known))
                })
                .collect()
        };

        let mut applied = 0;
        for (file, start, known_sequence) in plan {
            if cancel.is_cancelled() {
                break;
            }
            let outcome = match read_records(&file.path, start) {
                Ok(outcome) => outcome,
                Err(e) => {
                    log::warn!("sync: skipping {}: {}", file.filename, e);
                    continue;
                }
            };
            for record in &outcome.records {
                if record.sequence <= known_sequence {
                    continue;
                }
                self.apply_remote_record(&file.instance_id, &file.filename, record)?;
                applied += 1;
                if applied % self.config.sync_batch_size == 0 && cancel.is_cancelled() {
                    return Ok(applied);
                }
            }
        }
        Ok(applied)
    }

    // ==================== Snapshots ====================

    /// Store the current state and clock as the DB fast-path row.
    pub fn save_db_snapshot(&self) -> Result<()> {
        let inner = self.inner.lock().unwrap();
        self.persist_db_snapshot(&inner)
    }

    /// Write a complete snapshot file, then garbage-collect the snapshots
    /// it supersedes and the own log files it fully covers.
    pub fn save_file_snapshot(&self) -> Result<PathBuf> {
        let mut inner = self.inner.lock().unwrap();
        self.ensure_writable(&inner)?;
        inner.state = DocState::Snapshotting;

        let state = inner
            .doc
            .as_ref()
            .map(|doc| doc.encode_state_as_update())
            .unwrap_or_default();
        let path = snapshot::write_snapshot(
            &self.snapshots_dir(),
            &self.identity,
            &inner.clock,
            &state,
            self.config.compress_snapshots,
        )?;

        if let Err(e) = snapshot::gc_snapshots(&self.snapshots_dir(), &self.identity, &path) {
            log::warn!("snapshot gc failed for {}: {}", self.doc_id, e);
        }
        self.compact_own_logs(&inner);

        inner.updates_since_snapshot = 0;
        inner.last_snapshot_ms = chrono::Utc::now().timestamp_millis();
        inner.state = DocState::Loaded;
        Ok(path)
    }

    /// Whether snapshot cadence thresholds have been crossed.
    pub fn should_snapshot(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        if inner.doc.is_none() || inner.updates_since_snapshot == 0 {
            return false;
        }
        if inner.updates_since_snapshot >= self.config.snapshot_every_updates {
            return true;
        }
        let age = chrono::Utc::now().timestamp_millis() - inner.last_snapshot_ms;
        inner.last_snapshot_ms > 0 && age >= self.config.snapshot_min_age_ms
    }

    /// Delete own rolled-over log files the current clock fully covers.
    ///
    /// Peer files belong to their writers and are never touched.
    fn compact_own_logs(&self, inner: &Inner) {
        let Some(own) = inner.clock.get(&self.identity.instance_id) else {
            return;
        };
        let active = inner.writer.current_file().map(str::to_string);
        let files = match list_log_files(&self.logs_dir()) {
            Ok(files) => files,
            Err(_) => return,
        };
        let covered_millis = files
            .iter()
            .find(|f| f.filename == own.filename)
            .map(|f| f.create_millis);

        for file in &files {
            if !self
                .identity
                .matches(&file.instance_id, file.profile_id.as_deref())
            {
                continue;
            }
            if Some(&file.filename) == active.as_ref() {
                continue;
            }
            let covered = if file.filename == own.filename {
                std::fs::metadata(&file.path).is_ok_and(|m| m.len() <= own.offset)
            } else {
                covered_millis.is_some_and(|m| file.create_millis < m)
            };
            if covered {
                match std::fs::remove_file(&file.path) {
                    Ok(()) => log::debug!("compacted log {}", file.filename),
                    Err(e) => log::warn!("could not compact {}: {}", file.filename, e),
                }
            }
        }
    }

    // ==================== Shutdown ====================

    /// Flush the writer and drop the in-memory document. Idempotent.
    pub fn finalize(&self) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.writer.finalize()?;
        inner.doc = None;
        inner.state = DocState::Unloaded;
        Ok(())
    }

    // ==================== Internals ====================

    fn ensure_writable(&self, inner: &Inner) -> Result<()> {
        if inner.poisoned {
            return Err(NotecaskError::SequenceRegression {
                doc_id: self.doc_id.clone(),
                attempted: inner.next_sequence,
                persisted: inner.next_sequence,
            });
        }
        if inner.doc.is_none() {
            return Err(NotecaskError::Malformed {
                what: "document manager state",
                detail: format!("document {} is not loaded", self.doc_id),
            });
        }
        Ok(())
    }

    fn loaded_view(inner: &Inner) -> LoadedDocument {
        LoadedDocument {
            crdt_state: inner
                .doc
                .as_ref()
                .map(|doc| doc.encode_state_as_update())
                .unwrap_or_default(),
            vector_clock: inner.clock.clone(),
        }
    }

    fn persist_db_snapshot(&self, inner: &Inner) -> Result<()> {
        let Some(doc) = inner.doc.as_ref() else {
            return Ok(());
        };
        let clock_json = inner.clock.to_json()?;
        let state = doc.encode_state_as_update();
        match self.kind {
            DocKind::Note => {
                self.db
                    .save_note_sync_state(&self.doc_id, &self.sd_id, &clock_json, &state)
            }
            DocKind::FolderTree => {
                self.db
                    .save_folder_sync_state(&self.sd_id, &clock_json, &state)
            }
        }
    }

    fn event_from(&self, inner: &Inner, timestamp_ms: i64) -> Option<DocumentEvent> {
        let doc = inner.doc.as_ref()?;
        Some(DocumentEvent {
            sd_id: self.sd_id.clone(),
            doc_id: self.doc_id.clone(),
            kind: self.kind,
            vector_clock: inner.clock.clone(),
            new_state: doc.encode_state_as_update(),
            timestamp_ms,
        })
    }

    fn emit(&self, event: Option<DocumentEvent>) {
        let Some(event) = event else { return };
        let callbacks = self.callbacks.read().unwrap();
        for callback in callbacks.iter() {
            callback(&event);
        }
    }

    fn kind_label(&self) -> &'static str {
        match self.kind {
            DocKind::Note => "note",
            DocKind::FolderTree => "folder tree",
        }
    }
}

impl std::fmt::Debug for DocumentManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentManager")
            .field("sd_id", &self.sd_id)
            .field("doc_id", &self.doc_id)
            .field("kind", &self.kind)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
