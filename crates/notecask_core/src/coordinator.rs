//! The append-log coordinator.
//!
//! One [`StorageCoordinator`] per process owns the device identity, the
//! registry of storage directories, and the per-document managers. All
//! application-facing operations go through it: writes, cache-first loads,
//! snapshots, tombstones, shutdown.
//!
//! Every new manager is wired to the cache projector so derived tables
//! follow each applied change. The coordinator holds no document state of
//! its own; it only routes.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use crate::cache::{CacheDb, CacheProjector, StorageDirRow};
use crate::config::EngineConfig;
use crate::deletion::DeletionLog;
use crate::document::{
    CancelFlag, DocKind, DocumentManager, EventCallback, LoadedDocument, SavedUpdate,
};
use crate::error::{NotecaskError, Result};
use crate::identity::DeviceIdentity;

/// Key for the manager map: (sd id, document id).
type DocKey = (String, String);

struct RegisteredSd {
    path: PathBuf,
    deletion_log: Arc<DeletionLog>,
}

/// Routes application operations to per-document managers.
pub struct StorageCoordinator {
    identity: DeviceIdentity,
    config: EngineConfig,
    db: Arc<CacheDb>,
    projector: Arc<CacheProjector>,
    sds: RwLock<HashMap<String, RegisteredSd>>,
    managers: RwLock<HashMap<DocKey, Arc<DocumentManager>>>,
    /// Extra subscribers propagated to every manager created after
    /// registration (UI refresh hooks, tests).
    extra_callbacks: RwLock<Vec<EventCallback>>,
}

impl StorageCoordinator {
    /// Create a coordinator for this device.
    pub fn new(identity: DeviceIdentity, config: EngineConfig, db: Arc<CacheDb>) -> Self {
        let projector = Arc::new(CacheProjector::new(Arc::clone(&db)));
        Self {
            identity,
            config,
            db,
            projector,
            sds: RwLock::new(HashMap::new()),
            managers: RwLock::new(HashMap::new()),
            extra_callbacks: RwLock::new(Vec::new()),
        }
    }

    /// This device's identity.
    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    /// The cache database shared by all documents.
    pub fn db(&self) -> &Arc<CacheDb> {
        &self.db
    }

    /// Subscribe to document events across all SDs and documents.
    ///
    /// Only managers created after the call see the subscription.
    pub fn subscribe(&self, callback: EventCallback) {
        self.extra_callbacks.write().unwrap().push(callback);
    }

    // ==================== SD registry ====================

    /// Register a storage directory under an id.
    pub fn register_sd(&self, sd_id: &str, path: &Path) -> Result<()> {
        let deletion_log = DeletionLog::new(path, self.identity.clone())
            .with_state_store(Arc::clone(&self.db), sd_id);
        let mut sds = self.sds.write().unwrap();
        sds.insert(
            sd_id.to_string(),
            RegisteredSd {
                path: path.to_path_buf(),
                deletion_log: Arc::new(deletion_log),
            },
        );
        drop(sds);

        self.db.upsert_storage_dir(&StorageDirRow {
            id: sd_id.to_string(),
            name: sd_id.to_string(),
            path: path.to_string_lossy().into_owned(),
            uuid: None,
            created: chrono::Utc::now().timestamp_millis(),
            is_active: true,
        })?;
        log::info!("registered storage directory {} at {}", sd_id, path.display());
        Ok(())
    }

    /// Unregister a storage directory, finalizing its documents.
    pub fn unregister_sd(&self, sd_id: &str) -> Result<()> {
        let removed: Vec<Arc<DocumentManager>> = {
            let mut managers = self.managers.write().unwrap();
            let keys: Vec<DocKey> = managers
                .keys()
                .filter(|(sd, _)| sd == sd_id)
                .cloned()
                .collect();
            keys.into_iter().filter_map(|k| managers.remove(&k)).collect()
        };
        for manager in removed {
            manager.finalize()?;
        }
        self.sds.write().unwrap().remove(sd_id);
        Ok(())
    }

    /// Ids of all registered storage directories.
    pub fn registered_sds(&self) -> Vec<String> {
        let sds = self.sds.read().unwrap();
        sds.keys().cloned().collect()
    }

    fn sd_path(&self, sd_id: &str) -> Result<PathBuf> {
        let sds = self.sds.read().unwrap();
        sds.get(sd_id)
            .map(|sd| sd.path.clone())
            .ok_or_else(|| NotecaskError::SdNotRegistered(sd_id.to_string()))
    }

    fn deletion_log(&self, sd_id: &str) -> Result<Arc<DeletionLog>> {
        let sds = self.sds.read().unwrap();
        sds.get(sd_id)
            .map(|sd| Arc::clone(&sd.deletion_log))
            .ok_or_else(|| NotecaskError::SdNotRegistered(sd_id.to_string()))
    }

    // ==================== Manager plumbing ====================

    /// Get or create the manager for a document.
    ///
    /// Uses double-checked locking: the fast path is a read lock.
    pub fn manager_for(
        &self,
        sd_id: &str,
        kind: DocKind,
        doc_id: &str,
    ) -> Result<Arc<DocumentManager>> {
        let key = (sd_id.to_string(), doc_id.to_string());
        {
            let managers = self.managers.read().unwrap();
            if let Some(manager) = managers.get(&key) {
                return Ok(Arc::clone(manager));
            }
        }

        let sd_path = self.sd_path(sd_id)?;
        let mut managers = self.managers.write().unwrap();
        if let Some(manager) = managers.get(&key) {
            return Ok(Arc::clone(manager));
        }

        let manager = Arc::new(DocumentManager::new(
            sd_id,
            &sd_path,
            kind,
            doc_id,
            self.identity.clone(),
            self.config.clone(),
            Arc::clone(&self.db),
        ));

        let projector = Arc::clone(&self.projector);
        manager.subscribe(Arc::new(move |event: &crate::document::DocumentEvent| {
            if let Err(e) = projector.project(event) {
                log::warn!("cache projection for {} failed: {}", event.doc_id, e);
            }
        }));
        for callback in self.extra_callbacks.read().unwrap().iter() {
            manager.subscribe(Arc::clone(callback));
        }

        managers.insert(key, Arc::clone(&manager));
        Ok(manager)
    }

    /// Managers for every currently loaded document.
    pub fn loaded_managers(&self) -> Vec<Arc<DocumentManager>> {
        let managers = self.managers.read().unwrap();
        managers.values().cloned().collect()
    }

    // ==================== Write path ====================

    /// Append an update to a note's log. The note is loaded on demand.
    pub fn write_note_update(
        &self,
        sd_id: &str,
        note_id: &str,
        payload: &[u8],
    ) -> Result<SavedUpdate> {
        self.write_document_update(sd_id, DocKind::Note, note_id, payload)
    }

    /// Append an update to the SD's folder tree log.
    pub fn write_folder_update(&self, sd_id: &str, payload: &[u8]) -> Result<SavedUpdate> {
        self.write_document_update(sd_id, DocKind::FolderTree, sd_id, payload)
    }

    /// Generic write path (`save_document_update` in the public surface).
    pub fn write_document_update(
        &self,
        sd_id: &str,
        kind: DocKind,
        doc_id: &str,
        payload: &[u8],
    ) -> Result<SavedUpdate> {
        let manager = self.manager_for(sd_id, kind, doc_id)?;
        manager.load(&CancelFlag::new())?;
        let saved = manager.save_update(payload)?;

        if manager.should_snapshot() {
            if let Err(e) = manager.save_file_snapshot() {
                log::warn!("scheduled snapshot for {} failed: {}", doc_id, e);
            }
        }
        Ok(saved)
    }

    // ==================== Read path ====================

    /// Load a note, cache-first.
    pub fn load_note(&self, sd_id: &str, note_id: &str) -> Result<LoadedDocument> {
        self.load_document(sd_id, DocKind::Note, note_id)
    }

    /// Load the SD's folder tree, cache-first.
    pub fn load_folder_tree(&self, sd_id: &str) -> Result<LoadedDocument> {
        self.load_document(sd_id, DocKind::FolderTree, sd_id)
    }

    /// Generic read path.
    pub fn load_document(
        &self,
        sd_id: &str,
        kind: DocKind,
        doc_id: &str,
    ) -> Result<LoadedDocument> {
        let manager = self.manager_for(sd_id, kind, doc_id)?;
        manager.load(&CancelFlag::new())
    }

    // ==================== Snapshots ====================

    /// Write a file snapshot of a note.
    pub fn save_note_snapshot(&self, sd_id: &str, note_id: &str) -> Result<PathBuf> {
        self.save_document_file_snapshot(sd_id, DocKind::Note, note_id)
    }

    /// Write a file snapshot of the folder tree.
    pub fn save_folder_snapshot(&self, sd_id: &str) -> Result<PathBuf> {
        self.save_document_file_snapshot(sd_id, DocKind::FolderTree, sd_id)
    }

    /// Generic snapshot path.
    pub fn save_document_file_snapshot(
        &self,
        sd_id: &str,
        kind: DocKind,
        doc_id: &str,
    ) -> Result<PathBuf> {
        let manager = self.manager_for(sd_id, kind, doc_id)?;
        manager.load(&CancelFlag::new())?;
        manager.save_file_snapshot()
    }

    // ==================== Tombstones ====================

    /// Record a permanent deletion of a note and drop its local state.
    pub fn record_tombstone(&self, sd_id: &str, note_id: &str) -> Result<()> {
        self.deletion_log(sd_id)?.record_deletion(note_id)?;
        self.drop_note_locally(sd_id, note_id)?;
        Ok(())
    }

    /// Process tombstones recorded by other devices. Returns the note ids
    /// deleted by this pass.
    pub fn sync_tombstones(&self, sd_id: &str) -> Result<std::collections::BTreeSet<String>> {
        let deletion_log = self.deletion_log(sd_id)?;
        let db = Arc::clone(&self.db);

        let still_exists = |note_id: &str| -> bool {
            matches!(db.get_note(note_id), Ok(Some(_)))
                || matches!(db.get_note_sync_state(note_id, sd_id), Ok(Some(_)))
        };
        let mut process = |note_id: &str| self.drop_note_locally(sd_id, note_id);

        deletion_log.sync_from_other_instances(&still_exists, &mut process)
    }

    /// Remove a note's local presence: manager, cache rows, sync state.
    fn drop_note_locally(&self, sd_id: &str, note_id: &str) -> Result<()> {
        let key = (sd_id.to_string(), note_id.to_string());
        let manager = self.managers.write().unwrap().remove(&key);
        if let Some(manager) = manager {
            manager.finalize()?;
        }
        self.db.delete_note(note_id)?;
        self.db.delete_note_sync_state(note_id, sd_id)?;
        log::info!("dropped note {} from {}", note_id, sd_id);
        Ok(())
    }

    // ==================== Shutdown ====================

    /// Finalize every writer in every document. Acknowledged saves are
    /// already durable; this releases handles and flushes metadata.
    pub fn shutdown(&self) -> Result<()> {
        let managers: Vec<Arc<DocumentManager>> = {
            let mut map = self.managers.write().unwrap();
            map.drain().map(|(_, m)| m).collect()
        };
        for manager in managers {
            if let Err(e) = manager.finalize() {
                log::error!("finalize of {} failed: {}", manager.doc_id(), e);
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for StorageCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageCoordinator")
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}
