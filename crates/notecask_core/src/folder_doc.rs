//! Folder-tree CRDT document.
//!
//! One folder tree exists per storage directory. It is a yrs [`Doc`] with a
//! single Y.Map `"folders"` keyed by folder id; each value is the folder's
//! metadata serialized as JSON:
//!
//! ```text
//! Y.Doc
//! └── Y.Map "folders"
//!     ├── "folder-1" → FolderMeta { name: "Work", parent_id: None, ... }
//!     └── "folder-2" → FolderMeta { name: "Personal", parent_id: None, ... }
//! ```
//!
//! Folder removal is a soft delete (the `deleted` flag) so the tombstone
//! merges deterministically against concurrent edits.

use serde::{Deserialize, Serialize};
use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::{Doc, Map, MapRef, ReadTxn, StateVector, Transact, Update};

use crate::error::{NotecaskError, Result};

/// Name of the Y.Map containing folder metadata.
const FOLDERS_MAP_NAME: &str = "folders";

/// Metadata for one folder in the tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FolderMeta {
    /// Display name.
    pub name: String,

    /// Parent folder id, or None for root folders.
    pub parent_id: Option<String>,

    /// Sort position among siblings.
    #[serde(default)]
    pub order: i64,

    /// Soft deletion tombstone.
    #[serde(default)]
    pub deleted: bool,

    /// Unix timestamp of last modification (milliseconds).
    #[serde(default)]
    pub modified_at: i64,
}

impl FolderMeta {
    /// Create metadata for a new root-level folder.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            modified_at: chrono::Utc::now().timestamp_millis(),
            ..Default::default()
        }
    }
}

/// A CRDT document for a storage directory's folder tree.
pub struct FolderTreeDoc {
    doc: Doc,
    folders: MapRef,
}

impl FolderTreeDoc {
    /// Create a new empty folder tree.
    pub fn new() -> Self {
        let doc = Doc::new();
        let folders = doc.get_or_insert_map(FOLDERS_MAP_NAME);
        Self { doc, folders }
    }

    /// Reconstruct a folder tree from an encoded state update.
    pub fn from_state(state: &[u8]) -> Result<Self> {
        let tree = Self::new();
        if !state.is_empty() {
            tree.apply_update(state)?;
        }
        Ok(tree)
    }

    // ==================== Folder Operations ====================

    /// Insert or replace a folder. Returns the incremental update.
    pub fn upsert_folder(&self, folder_id: &str, meta: &FolderMeta) -> Result<Vec<u8>> {
        let json = serde_json::to_string(meta)?;
        Ok(self.mutate(|txn| {
            self.folders.insert(txn, folder_id, json);
        }))
    }

    /// Soft-delete a folder. Returns the update, or None if absent.
    pub fn remove_folder(&self, folder_id: &str) -> Result<Option<Vec<u8>>> {
        let Some(mut meta) = self.get_folder(folder_id) else {
            return Ok(None);
        };
        meta.deleted = true;
        meta.modified_at = chrono::Utc::now().timestamp_millis();
        self.upsert_folder(folder_id, &meta).map(Some)
    }

    /// Look up one folder.
    pub fn get_folder(&self, folder_id: &str) -> Option<FolderMeta> {
        let txn = self.doc.transact();
        self.folders.get(&txn, folder_id).and_then(|value| {
            let json = value.to_string(&txn);
            serde_json::from_str(&json).ok()
        })
    }

    /// All folders, deleted ones included, in map order.
    pub fn all_folders(&self) -> Vec<(String, FolderMeta)> {
        let txn = self.doc.transact();
        let mut folders: Vec<(String, FolderMeta)> = self
            .folders
            .iter(&txn)
            .filter_map(|(id, value)| {
                let json = value.to_string(&txn);
                serde_json::from_str(&json)
                    .ok()
                    .map(|meta| (id.to_string(), meta))
            })
            .collect();
        folders.sort_by(|a, b| a.0.cmp(&b.0));
        folders
    }

    /// Folders that are not soft-deleted.
    pub fn active_folders(&self) -> Vec<(String, FolderMeta)> {
        self.all_folders()
            .into_iter()
            .filter(|(_, meta)| !meta.deleted)
            .collect()
    }

    // ==================== Sync Operations ====================

    /// Apply an opaque update payload.
    pub fn apply_update(&self, update: &[u8]) -> Result<()> {
        let decoded = Update::decode_v1(update).map_err(|e| NotecaskError::CrdtApply {
            doc_id: "folder-tree".to_string(),
            detail: format!("decode: {}", e),
        })?;
        let mut txn = self.doc.transact_mut();
        txn.apply_update(decoded)
            .map_err(|e| NotecaskError::CrdtApply {
                doc_id: "folder-tree".to_string(),
                detail: e.to_string(),
            })
    }

    /// Encode the full state as a single update.
    pub fn encode_state_as_update(&self) -> Vec<u8> {
        let txn = self.doc.transact();
        txn.encode_state_as_update_v1(&StateVector::default())
    }

    /// Encode the state vector for sync handshakes.
    pub fn encode_state_vector(&self) -> Vec<u8> {
        let txn = self.doc.transact();
        txn.state_vector().encode_v1()
    }

    /// Encode the updates a peer with `remote_state_vector` is missing.
    pub fn encode_diff(&self, remote_state_vector: &[u8]) -> Result<Vec<u8>> {
        let sv = StateVector::decode_v1(remote_state_vector).map_err(|e| {
            NotecaskError::Malformed {
                what: "state vector",
                detail: e.to_string(),
            }
        })?;
        let txn = self.doc.transact();
        Ok(txn.encode_state_as_update_v1(&sv))
    }

    fn mutate(&self, f: impl FnOnce(&mut yrs::TransactionMut)) -> Vec<u8> {
        let sv_before = {
            let txn = self.doc.transact();
            txn.state_vector()
        };
        {
            let mut txn = self.doc.transact_mut();
            f(&mut txn);
        }
        let txn = self.doc.transact();
        txn.encode_state_as_update_v1(&sv_before)
    }
}

impl Default for FolderTreeDoc {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FolderTreeDoc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FolderTreeDoc")
            .field("folders", &self.all_folders().len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upsert_and_get() {
        let tree = FolderTreeDoc::new();
        let update = tree
            .upsert_folder("folder-1", &FolderMeta::new("Work"))
            .unwrap();
        assert!(!update.is_empty());

        let meta = tree.get_folder("folder-1").unwrap();
        assert_eq!(meta.name, "Work");
        assert!(!meta.deleted);
    }

    #[test]
    fn test_updates_replay_on_replica() {
        let tree = FolderTreeDoc::new();
        let u1 = tree
            .upsert_folder("folder-1", &FolderMeta::new("Work"))
            .unwrap();
        let u2 = tree
            .upsert_folder("folder-2", &FolderMeta::new("Personal"))
            .unwrap();

        let replica = FolderTreeDoc::new();
        replica.apply_update(&u1).unwrap();
        replica.apply_update(&u2).unwrap();

        let folders = replica.active_folders();
        assert_eq!(folders.len(), 2);
        assert_eq!(folders[0].1.name, "Work");
        assert_eq!(folders[1].1.name, "Personal");
    }

    #[test]
    fn test_remove_is_soft_delete() {
        let tree = FolderTreeDoc::new();
        tree.upsert_folder("folder-1", &FolderMeta::new("Work"))
            .unwrap();
        let update = tree.remove_folder("folder-1").unwrap();
        assert!(update.is_some());

        assert!(tree.active_folders().is_empty());
        assert!(tree.get_folder("folder-1").unwrap().deleted);
    }

    #[test]
    fn test_remove_missing_is_none() {
        let tree = FolderTreeDoc::new();
        assert!(tree.remove_folder("nope").unwrap().is_none());
    }

    #[test]
    fn test_nested_folders() {
        let tree = FolderTreeDoc::new();
        tree.upsert_folder("root", &FolderMeta::new("Root")).unwrap();
        let child = FolderMeta {
            parent_id: Some("root".to_string()),
            ..FolderMeta::new("Child")
        };
        tree.upsert_folder("child", &child).unwrap();

        assert_eq!(
            tree.get_folder("child").unwrap().parent_id.as_deref(),
            Some("root")
        );
    }

    #[test]
    fn test_concurrent_upserts_merge() {
        let a = FolderTreeDoc::new();
        let b = FolderTreeDoc::new();

        let ua = a.upsert_folder("folder-a", &FolderMeta::new("A")).unwrap();
        let ub = b.upsert_folder("folder-b", &FolderMeta::new("B")).unwrap();

        a.apply_update(&ub).unwrap();
        b.apply_update(&ua).unwrap();
        assert_eq!(a.active_folders().len(), 2);
        assert_eq!(a.all_folders(), b.all_folders());
    }

    #[test]
    fn test_full_state_round_trip() {
        let tree = FolderTreeDoc::new();
        tree.upsert_folder("folder-1", &FolderMeta::new("Work"))
            .unwrap();

        let replica = FolderTreeDoc::from_state(&tree.encode_state_as_update()).unwrap();
        assert_eq!(replica.get_folder("folder-1").unwrap().name, "Work");
    }
}
