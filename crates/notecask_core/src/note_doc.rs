//! Per-note CRDT document.
//!
//! Each note is a yrs [`Doc`] with:
//! - a Y.Text `"content"` holding the note body,
//! - a Y.Map `"props"` holding scalar properties (title, pinned, timestamps).
//!
//! Mutations compute the state vector before the change and return the
//! incremental update covering exactly that change, which the document
//! manager frames into the log.

use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::{Doc, GetString, Map, MapRef, ReadTxn, StateVector, Text, TextRef, Transact, Update};

use crate::error::{NotecaskError, Result};

/// Name of the Y.Text holding the note body.
const CONTENT_TEXT_NAME: &str = "content";

/// Name of the Y.Map holding note properties.
const PROPS_MAP_NAME: &str = "props";

/// Property key for the note title.
const PROP_TITLE: &str = "title";

/// Property key for the pinned flag.
const PROP_PINNED: &str = "pinned";

/// A CRDT document for a single note.
pub struct NoteDoc {
    doc: Doc,
    content: TextRef,
    props: MapRef,
}

impl NoteDoc {
    /// Create a new empty note document.
    pub fn new() -> Self {
        let doc = Doc::new();
        let content = doc.get_or_insert_text(CONTENT_TEXT_NAME);
        let props = doc.get_or_insert_map(PROPS_MAP_NAME);
        Self {
            doc,
            content,
            props,
        }
    }

    /// Reconstruct a note document from an encoded state update.
    pub fn from_state(state: &[u8]) -> Result<Self> {
        let note = Self::new();
        if !state.is_empty() {
            note.apply_update(state)?;
        }
        Ok(note)
    }

    // ==================== Content Operations ====================

    /// Full body text.
    pub fn text(&self) -> String {
        let txn = self.doc.transact();
        self.content.get_string(&txn)
    }

    /// Insert text at a character index. Returns the incremental update.
    pub fn insert_text(&self, index: u32, text: &str) -> Vec<u8> {
        self.mutate(|txn| {
            self.content.insert(txn, index, text);
        })
    }

    /// Append text at the end. Returns the incremental update.
    pub fn append_text(&self, text: &str) -> Vec<u8> {
        let len = {
            let txn = self.doc.transact();
            self.content.len(&txn)
        };
        self.insert_text(len, text)
    }

    /// Delete `len` characters starting at `index`. Returns the update.
    pub fn delete_text(&self, index: u32, len: u32) -> Vec<u8> {
        self.mutate(|txn| {
            self.content.remove_range(txn, index, len);
        })
    }

    /// Replace the whole body using minimal diff operations.
    ///
    /// Delete-all + insert-all would make every concurrent edit conflict
    /// with the rewrite; trimming the common prefix and suffix first keeps
    /// unrelated concurrent edits mergeable.
    pub fn set_text(&self, new_text: &str) -> Vec<u8> {
        let current = self.text();
        if current == new_text {
            return Vec::new();
        }

        let old: Vec<char> = current.chars().collect();
        let new: Vec<char> = new_text.chars().collect();

        let mut prefix = 0;
        while prefix < old.len() && prefix < new.len() && old[prefix] == new[prefix] {
            prefix += 1;
        }
        let mut suffix = 0;
        while suffix < old.len() - prefix
            && suffix < new.len() - prefix
            && old[old.len() - 1 - suffix] == new[new.len() - 1 - suffix]
        {
            suffix += 1;
        }

        let remove_len = (old.len() - prefix - suffix) as u32;
        let insert: String = new[prefix..new.len() - suffix].iter().collect();

        self.mutate(|txn| {
            if remove_len > 0 {
                self.content.remove_range(txn, prefix as u32, remove_len);
            }
            if !insert.is_empty() {
                self.content.insert(txn, prefix as u32, &insert);
            }
        })
    }

    // ==================== Property Operations ====================

    /// The note title, if set.
    pub fn title(&self) -> Option<String> {
        let txn = self.doc.transact();
        self.props
            .get(&txn, PROP_TITLE)
            .and_then(|v| v.cast::<String>().ok())
            .filter(|s| !s.is_empty())
    }

    /// Set the title. Returns the incremental update.
    pub fn set_title(&self, title: &str) -> Vec<u8> {
        self.mutate(|txn| {
            self.props.insert(txn, PROP_TITLE, title);
        })
    }

    /// Whether the note is pinned.
    pub fn pinned(&self) -> bool {
        let txn = self.doc.transact();
        self.props
            .get(&txn, PROP_PINNED)
            .and_then(|v| v.cast::<bool>().ok())
            .unwrap_or(false)
    }

    /// Set the pinned flag. Returns the incremental update.
    pub fn set_pinned(&self, pinned: bool) -> Vec<u8> {
        self.mutate(|txn| {
            self.props.insert(txn, PROP_PINNED, pinned);
        })
    }

    // ==================== Sync Operations ====================

    /// Apply an opaque update payload.
    pub fn apply_update(&self, update: &[u8]) -> Result<()> {
        let decoded = Update::decode_v1(update).map_err(|e| NotecaskError::CrdtApply {
            doc_id: "note".to_string(),
            detail: format!("decode: {}", e),
        })?;
        let mut txn = self.doc.transact_mut();
        txn.apply_update(decoded)
            .map_err(|e| NotecaskError::CrdtApply {
                doc_id: "note".to_string(),
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

    /// Run a mutation and return the incremental update it produced.
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

impl Default for NoteDoc {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for NoteDoc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NoteDoc")
            .field("len", &self.text().len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_read() {
        let note = NoteDoc::new();
        let update = note.insert_text(0, "Hello world");
        assert!(!update.is_empty());
        assert_eq!(note.text(), "Hello world");
    }

    #[test]
    fn test_append() {
        let note = NoteDoc::new();
        note.insert_text(0, "Initial content");
        note.append_text(" - edited");
        assert_eq!(note.text(), "Initial content - edited");
    }

    #[test]
    fn test_updates_replay_on_fresh_doc() {
        let note = NoteDoc::new();
        let u1 = note.insert_text(0, "Initial content");
        let u2 = note.append_text(" - edited");

        let replica = NoteDoc::new();
        replica.apply_update(&u1).unwrap();
        replica.apply_update(&u2).unwrap();
        assert_eq!(replica.text(), "Initial content - edited");
    }

    #[test]
    fn test_full_state_round_trip() {
        let note = NoteDoc::new();
        note.insert_text(0, "body");
        note.set_title("My Note");
        note.set_pinned(true);

        let replica = NoteDoc::from_state(&note.encode_state_as_update()).unwrap();
        assert_eq!(replica.text(), "body");
        assert_eq!(replica.title().as_deref(), Some("My Note"));
        assert!(replica.pinned());
    }

    #[test]
    fn test_concurrent_edits_merge() {
        let a = NoteDoc::new();
        let base = a.insert_text(0, "shared");

        let b = NoteDoc::new();
        b.apply_update(&base).unwrap();

        let ua = a.insert_text(0, "AAA ");
        let ub = b.append_text("BBB");

        a.apply_update(&ub).unwrap();
        b.apply_update(&ua).unwrap();
        assert_eq!(a.text(), b.text());
        assert!(a.text().contains("AAA"));
        assert!(a.text().contains("BBB"));
    }

    #[test]
    fn test_set_text_minimal_diff_preserves_concurrent_edit() {
        let a = NoteDoc::new();
        let base = a.insert_text(0, "one two three");
        let b = NoteDoc::new();
        b.apply_update(&base).unwrap();

        // a rewrites the middle word; b appends concurrently.
        let ua = a.set_text("one 2 three");
        let ub = b.append_text(" four");

        a.apply_update(&ub).unwrap();
        b.apply_update(&ua).unwrap();
        assert_eq!(a.text(), b.text());
        assert_eq!(a.text(), "one 2 three four");
    }

    #[test]
    fn test_set_text_noop_returns_empty() {
        let note = NoteDoc::new();
        note.insert_text(0, "same");
        assert!(note.set_text("same").is_empty());
    }

    #[test]
    fn test_encode_diff() {
        let a = NoteDoc::new();
        a.insert_text(0, "everything");

        let b = NoteDoc::new();
        let diff = a.encode_diff(&b.encode_state_vector()).unwrap();
        b.apply_update(&diff).unwrap();
        assert_eq!(b.text(), "everything");
    }

    #[test]
    fn test_apply_garbage_is_error() {
        let note = NoteDoc::new();
        assert!(note.apply_update(b"definitely not an update").is_err());
    }
}
