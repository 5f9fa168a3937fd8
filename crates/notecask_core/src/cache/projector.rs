//! Projection of document events into cache tables.
//!
//! The [`CacheProjector`] subscribes to a document manager's event stream.
//! For every local save and remote apply it receives the document's new
//! state and rewrites the derived rows: the note list entry (with preview
//! and full text for the FTS index) or the folder tree, plus tag and link
//! associations extracted from the note body (`#tag`, `[[note-id]]`).

use std::sync::Arc;

use crate::document::{DocKind, DocumentEvent};
use crate::error::Result;
use crate::folder_doc::FolderTreeDoc;
use crate::note_doc::NoteDoc;

use super::notes::preview_of;
use super::{CacheDb, FolderRow, NoteRow};

/// Applies document events to the cache database.
pub struct CacheProjector {
    db: Arc<CacheDb>,
}

impl CacheProjector {
    /// Create a projector over a cache database.
    pub fn new(db: Arc<CacheDb>) -> Self {
        Self { db }
    }

    /// Apply one event. Errors are surfaced so callers can decide whether
    /// to log or abort; the manager's fan-out logs them.
    pub fn project(&self, event: &DocumentEvent) -> Result<()> {
        match event.kind {
            DocKind::Note => self.project_note(event),
            DocKind::FolderTree => self.project_folder_tree(event),
        }
    }

    fn project_note(&self, event: &DocumentEvent) -> Result<()> {
        let note = NoteDoc::from_state(&event.new_state)?;
        let text = note.text();
        let title = note
            .title()
            .unwrap_or_else(|| derive_title(&text));

        // First sighting fixes the creation time; later events only move
        // the modification time.
        let created = self
            .db
            .get_note(&event.doc_id)?
            .map(|row| row.created)
            .unwrap_or(event.timestamp_ms);

        self.db.upsert_note(&NoteRow {
            id: event.doc_id.clone(),
            title,
            sd_id: event.sd_id.clone(),
            folder_id: None,
            created,
            modified: event.timestamp_ms,
            deleted: false,
            pinned: note.pinned(),
            content_preview: preview_of(&text),
            content_text: text.clone(),
        })?;

        self.db
            .set_note_tags(&event.doc_id, &extract_hashtags(&text))?;
        self.db
            .set_note_links(&event.doc_id, &extract_wiki_links(&text))?;
        Ok(())
    }

    fn project_folder_tree(&self, event: &DocumentEvent) -> Result<()> {
        let tree = FolderTreeDoc::from_state(&event.new_state)?;
        for (folder_id, meta) in tree.all_folders() {
            self.db.upsert_folder(&FolderRow {
                id: folder_id,
                name: meta.name,
                parent_id: meta.parent_id,
                sd_id: event.sd_id.clone(),
                order: meta.order,
                deleted: meta.deleted,
            })?;
        }
        Ok(())
    }
}

/// First non-empty line of the body, stripped of leading markdown heading
/// markers, as a title fallback.
fn derive_title(text: &str) -> String {
    text.lines()
        .map(|line| line.trim().trim_start_matches('#').trim())
        .find(|line| !line.is_empty())
        .unwrap_or("")
        .chars()
        .take(120)
        .collect()
}

/// `#tag` occurrences in the body. Tags are word characters and hyphens;
/// a `#` inside a word (e.g. "c#5") does not start a tag.
fn extract_hashtags(text: &str) -> Vec<String> {
    let mut tags = Vec::new();
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'#'
            && (i == 0 || bytes[i - 1].is_ascii_whitespace())
            && i + 1 < bytes.len()
        {
            let rest = &text[i + 1..];
            let tag: String = rest
                .chars()
                .take_while(|c| c.is_alphanumeric() || *c == '-' || *c == '_')
                .collect();
            if !tag.is_empty() && tag.chars().any(char::is_alphabetic) {
                if !tags.iter().any(|t: &String| t.eq_ignore_ascii_case(&tag)) {
                    tags.push(tag.clone());
                }
                i += 1 + tag.len();
                continue;
            }
        }
        i += 1;
    }
    tags
}

/// `[[target]]` occurrences in the body.
fn extract_wiki_links(text: &str) -> Vec<String> {
    let mut links = Vec::new();
    let mut rest = text;
    while let Some(start) = rest.find("[[") {
        let after = &rest[start + 2..];
        match after.find("]]") {
            Some(end) => {
                let target = after[..end].trim();
                if !target.is_empty() && !links.iter().any(|l| l == target) {
                    links.push(target.to_string());
                }
                rest = &after[end + 2..];
            }
            None => break,
        }
    }
    links
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::VectorClock;

    fn note_event(doc_id: &str, state: Vec<u8>) -> DocumentEvent {
        DocumentEvent {
            sd_id: "sd-1".to_string(),
            doc_id: doc_id.to_string(),
            kind: DocKind::Note,
            vector_clock: VectorClock::new(),
            new_state: state,
            timestamp_ms: 5000,
        }
    }

    #[test]
    fn test_note_projection() {
        let db = Arc::new(CacheDb::in_memory().unwrap());
        let projector = CacheProjector::new(Arc::clone(&db));

        let note = NoteDoc::new();
        note.insert_text(0, "# Shopping\nmilk #errands\nsee [[note-2]]");
        note.set_title("Shopping");
        projector
            .project(&note_event("n1", note.encode_state_as_update()))
            .unwrap();

        let row = db.get_note("n1").unwrap().unwrap();
        assert_eq!(row.title, "Shopping");
        assert!(row.content_text.contains("milk"));
        assert_eq!(row.created, 5000);

        assert_eq!(db.tags_for_note("n1").unwrap(), vec!["errands"]);
        assert_eq!(db.links_from_note("n1").unwrap(), vec!["note-2"]);
        assert_eq!(db.search_notes("sd-1", "milk").unwrap(), vec!["n1"]);
    }

    #[test]
    fn test_title_falls_back_to_first_line() {
        let db = Arc::new(CacheDb::in_memory().unwrap());
        let projector = CacheProjector::new(Arc::clone(&db));

        let note = NoteDoc::new();
        note.insert_text(0, "## First heading\nbody");
        projector
            .project(&note_event("n1", note.encode_state_as_update()))
            .unwrap();

        assert_eq!(db.get_note("n1").unwrap().unwrap().title, "First heading");
    }

    #[test]
    fn test_created_is_stable_across_events() {
        let db = Arc::new(CacheDb::in_memory().unwrap());
        let projector = CacheProjector::new(Arc::clone(&db));

        let note = NoteDoc::new();
        note.insert_text(0, "v1");
        projector
            .project(&note_event("n1", note.encode_state_as_update()))
            .unwrap();

        note.append_text(" v2");
        let mut second = note_event("n1", note.encode_state_as_update());
        second.timestamp_ms = 9000;
        projector.project(&second).unwrap();

        let row = db.get_note("n1").unwrap().unwrap();
        assert_eq!(row.created, 5000);
        assert_eq!(row.modified, 9000);
    }

    #[test]
    fn test_folder_projection() {
        let db = Arc::new(CacheDb::in_memory().unwrap());
        let projector = CacheProjector::new(Arc::clone(&db));

        let tree = FolderTreeDoc::new();
        tree.upsert_folder("f1", &crate::folder_doc::FolderMeta::new("Work"))
            .unwrap();
        let event = DocumentEvent {
            sd_id: "sd-1".to_string(),
            doc_id: "sd-1".to_string(),
            kind: DocKind::FolderTree,
            vector_clock: VectorClock::new(),
            new_state: tree.encode_state_as_update(),
            timestamp_ms: 0,
        };
        projector.project(&event).unwrap();

        let rows = db.list_folders("sd-1").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, "Work");
    }

    #[test]
    fn test_extract_hashtags() {
        assert_eq!(extract_hashtags("a #one b #two"), vec!["one", "two"]);
        assert_eq!(extract_hashtags("#dup #DUP"), vec!["dup"]);
        assert!(extract_hashtags("c#5 and # alone").is_empty());
        assert!(extract_hashtags("#123").is_empty());
        assert_eq!(extract_hashtags("#multi-word_tag"), vec!["multi-word_tag"]);
    }

    #[test]
    fn test_extract_wiki_links() {
        assert_eq!(
            extract_wiki_links("see [[a]] and [[b]] and [[a]]"),
            vec!["a", "b"]
        );
        assert!(extract_wiki_links("no links [[").is_empty());
        assert!(extract_wiki_links("empty [[ ]]").is_empty());
    }
}
