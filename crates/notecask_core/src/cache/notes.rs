//! Note list cache and full-text search.

use rusqlite::{Row, params};

use crate::error::Result;

use super::CacheDb;

/// Length of the plain-text preview stored per note.
const PREVIEW_LEN: usize = 200;

/// One row of the cached note list.
#[derive(Debug, Clone, PartialEq)]
pub struct NoteRow {
    /// Note id.
    pub id: String,
    /// Display title.
    pub title: String,
    /// Storage directory the note lives in.
    pub sd_id: String,
    /// Containing folder, if any.
    pub folder_id: Option<String>,
    /// Creation time, Unix milliseconds.
    pub created: i64,
    /// Last modification time, Unix milliseconds.
    pub modified: i64,
    /// Soft-deletion flag.
    pub deleted: bool,
    /// Pinned flag.
    pub pinned: bool,
    /// First characters of the body, for list rendering.
    pub content_preview: String,
    /// Full plain-text body, for search.
    pub content_text: String,
}

impl NoteRow {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            title: row.get(1)?,
            sd_id: row.get(2)?,
            folder_id: row.get(3)?,
            created: row.get(4)?,
            modified: row.get(5)?,
            deleted: row.get::<_, i64>(6)? != 0,
            pinned: row.get::<_, i64>(7)? != 0,
            content_preview: row.get(8)?,
            content_text: row.get(9)?,
        })
    }
}

const NOTE_COLUMNS: &str = "id, title, sd_id, folder_id, created, modified, deleted, pinned, \
                            content_preview, content_text";

/// Build the preview string stored alongside a note's text.
pub(crate) fn preview_of(text: &str) -> String {
    text.chars().take(PREVIEW_LEN).collect()
}

impl CacheDb {
    /// Insert or update a note row. The FTS index follows via triggers.
    pub fn upsert_note(&self, note: &NoteRow) -> Result<()> {
        self.with_tx(|tx| {
            tx.execute(
                "INSERT INTO notes (id, title, sd_id, folder_id, created, modified, deleted,
                                    pinned, content_preview, content_text)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                 ON CONFLICT(id) DO UPDATE SET
                    title = excluded.title,
                    sd_id = excluded.sd_id,
                    folder_id = excluded.folder_id,
                    modified = excluded.modified,
                    deleted = excluded.deleted,
                    pinned = excluded.pinned,
                    content_preview = excluded.content_preview,
                    content_text = excluded.content_text",
                params![
                    note.id,
                    note.title,
                    note.sd_id,
                    note.folder_id,
                    note.created,
                    note.modified,
                    note.deleted as i64,
                    note.pinned as i64,
                    note.content_preview,
                    note.content_text,
                ],
            )?;
            Ok(())
        })
    }

    /// Look up one note row.
    pub fn get_note(&self, note_id: &str) -> Result<Option<NoteRow>> {
        self.with_conn(|conn| {
            let result = conn.query_row(
                &format!("SELECT {} FROM notes WHERE id = ?", NOTE_COLUMNS),
                params![note_id],
                NoteRow::from_row,
            );
            match result {
                Ok(row) => Ok(Some(row)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
    }

    /// Non-deleted notes of a storage directory, pinned first, newest first.
    pub fn list_notes(&self, sd_id: &str) -> Result<Vec<NoteRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM notes WHERE sd_id = ? AND deleted = 0
                 ORDER BY pinned DESC, modified DESC",
                NOTE_COLUMNS
            ))?;
            let rows = stmt
                .query_map(params![sd_id], NoteRow::from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }

    /// Full-text search over title and body. Returns matching note ids,
    /// best match first.
    pub fn search_notes(&self, sd_id: &str, query: &str) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT notes.id FROM notes_fts
                 JOIN notes ON notes.rowid = notes_fts.rowid
                 WHERE notes_fts MATCH ?1 AND notes.sd_id = ?2 AND notes.deleted = 0
                 ORDER BY rank",
            )?;
            let ids = stmt
                .query_map(params![query, sd_id], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<String>>>()?;
            Ok(ids)
        })
    }

    /// Remove a note row entirely (permanent deletion).
    ///
    /// The cascade trigger clears note_tags and note_links.
    pub fn delete_note(&self, note_id: &str) -> Result<()> {
        self.with_tx(|tx| {
            tx.execute("DELETE FROM notes WHERE id = ?", params![note_id])?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(id: &str, title: &str, text: &str) -> NoteRow {
        NoteRow {
            id: id.to_string(),
            title: title.to_string(),
            sd_id: "sd-1".to_string(),
            folder_id: None,
            created: 1000,
            modified: 2000,
            deleted: false,
            pinned: false,
            content_preview: preview_of(text),
            content_text: text.to_string(),
        }
    }

    #[test]
    fn test_upsert_and_get() {
        let db = CacheDb::in_memory().unwrap();
        db.upsert_note(&note("n1", "Groceries", "milk and eggs"))
            .unwrap();

        let row = db.get_note("n1").unwrap().unwrap();
        assert_eq!(row.title, "Groceries");
        assert_eq!(row.content_text, "milk and eggs");
    }

    #[test]
    fn test_upsert_updates_in_place() {
        let db = CacheDb::in_memory().unwrap();
        db.upsert_note(&note("n1", "Old", "old text")).unwrap();
        db.upsert_note(&note("n1", "New", "new text")).unwrap();

        let row = db.get_note("n1").unwrap().unwrap();
        assert_eq!(row.title, "New");
        assert_eq!(db.list_notes("sd-1").unwrap().len(), 1);
    }

    #[test]
    fn test_list_excludes_deleted_and_orders_pinned_first() {
        let db = CacheDb::in_memory().unwrap();
        let mut gone = note("gone", "Gone", "");
        gone.deleted = true;
        db.upsert_note(&gone).unwrap();

        let mut pinned = note("pinned", "Pinned", "");
        pinned.pinned = true;
        pinned.modified = 1;
        db.upsert_note(&pinned).unwrap();
        db.upsert_note(&note("recent", "Recent", "")).unwrap();

        let rows = db.list_notes("sd-1").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].id, "pinned");
        assert_eq!(rows[1].id, "recent");
    }

    #[test]
    fn test_search_matches_title_and_body() {
        let db = CacheDb::in_memory().unwrap();
        db.upsert_note(&note("n1", "Meeting notes", "discuss roadmap"))
            .unwrap();
        db.upsert_note(&note("n2", "Groceries", "milk and roadmap stickers"))
            .unwrap();
        db.upsert_note(&note("n3", "Other", "nothing relevant"))
            .unwrap();

        let hits = db.search_notes("sd-1", "roadmap").unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits.contains(&"n1".to_string()));
        assert!(hits.contains(&"n2".to_string()));
    }

    #[test]
    fn test_search_follows_updates() {
        let db = CacheDb::in_memory().unwrap();
        db.upsert_note(&note("n1", "Title", "about ferrets")).unwrap();
        db.upsert_note(&note("n1", "Title", "about badgers")).unwrap();

        assert!(db.search_notes("sd-1", "ferrets").unwrap().is_empty());
        assert_eq!(db.search_notes("sd-1", "badgers").unwrap(), vec!["n1"]);
    }

    #[test]
    fn test_delete_cascades_to_tags_and_links() {
        let db = CacheDb::in_memory().unwrap();
        db.upsert_note(&note("n1", "A", "")).unwrap();
        db.upsert_note(&note("n2", "B", "")).unwrap();
        db.set_note_tags("n1", &["todo".to_string()]).unwrap();
        db.set_note_links("n1", &["n2".to_string()]).unwrap();

        db.delete_note("n1").unwrap();

        assert!(db.tags_for_note("n1").unwrap().is_empty());
        assert!(db.links_from_note("n1").unwrap().is_empty());
        // The tag itself survives; only the association is gone.
        assert!(db.all_tags().unwrap().iter().any(|t| t == "todo"));
    }

    #[test]
    fn test_preview_truncates() {
        let long = "x".repeat(500);
        assert_eq!(preview_of(&long).len(), 200);
        assert_eq!(preview_of("short"), "short");
    }
}
