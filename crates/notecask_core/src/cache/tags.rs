//! User-authored tags and note links.
//!
//! These tables are the only copy of their data (they cannot be rebuilt
//! from CRDT documents alone once a user has curated them), so migrations
//! carry them forward in place. Tag names are unique case-insensitively;
//! `ensure_tag("Todo")` and `ensure_tag("todo")` yield the same tag.

use rusqlite::{OptionalExtension, params};

use crate::error::Result;

use super::CacheDb;

impl CacheDb {
    /// Get or create the tag with this name. Returns its id.
    pub fn ensure_tag(&self, name: &str) -> Result<i64> {
        self.with_tx(|tx| {
            let existing: Option<i64> = tx
                .query_row(
                    "SELECT id FROM tags WHERE name = ? COLLATE NOCASE",
                    params![name],
                    |row| row.get(0),
                )
                .optional()?;
            match existing {
                Some(id) => Ok(id),
                None => {
                    tx.execute("INSERT INTO tags (name) VALUES (?)", params![name])?;
                    Ok(tx.last_insert_rowid())
                }
            }
        })
    }

    /// Replace the set of tags attached to a note.
    pub fn set_note_tags(&self, note_id: &str, tags: &[String]) -> Result<()> {
        // Resolve ids first; ensure_tag takes its own transaction.
        let mut tag_ids = Vec::with_capacity(tags.len());
        for tag in tags {
            tag_ids.push(self.ensure_tag(tag)?);
        }

        self.with_tx(|tx| {
            tx.execute("DELETE FROM note_tags WHERE note_id = ?", params![note_id])?;
            let mut stmt =
                tx.prepare("INSERT OR IGNORE INTO note_tags (note_id, tag_id) VALUES (?, ?)")?;
            for tag_id in &tag_ids {
                stmt.execute(params![note_id, tag_id])?;
            }
            Ok(())
        })
    }

    /// Tag names attached to a note, alphabetically.
    pub fn tags_for_note(&self, note_id: &str) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT tags.name FROM tags
                 JOIN note_tags ON note_tags.tag_id = tags.id
                 WHERE note_tags.note_id = ?
                 ORDER BY tags.name COLLATE NOCASE",
            )?;
            let names = stmt
                .query_map(params![note_id], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<String>>>()?;
            Ok(names)
        })
    }

    /// Note ids carrying a tag.
    pub fn notes_with_tag(&self, tag_name: &str) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT note_tags.note_id FROM note_tags
                 JOIN tags ON tags.id = note_tags.tag_id
                 WHERE tags.name = ? COLLATE NOCASE
                 ORDER BY note_tags.note_id",
            )?;
            let ids = stmt
                .query_map(params![tag_name], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<String>>>()?;
            Ok(ids)
        })
    }

    /// All tag names, alphabetically.
    pub fn all_tags(&self) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT name FROM tags ORDER BY name COLLATE NOCASE")?;
            let names = stmt
                .query_map([], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<String>>>()?;
            Ok(names)
        })
    }

    /// Replace the outgoing links of a note.
    pub fn set_note_links(&self, source_note_id: &str, targets: &[String]) -> Result<()> {
        self.with_tx(|tx| {
            tx.execute(
                "DELETE FROM note_links WHERE source_note_id = ?",
                params![source_note_id],
            )?;
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO note_links (source_note_id, target_note_id) VALUES (?, ?)",
            )?;
            for target in targets {
                if target != source_note_id {
                    stmt.execute(params![source_note_id, target])?;
                }
            }
            Ok(())
        })
    }

    /// Note ids this note links to.
    pub fn links_from_note(&self, note_id: &str) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT target_note_id FROM note_links WHERE source_note_id = ?
                 ORDER BY target_note_id",
            )?;
            let ids = stmt
                .query_map(params![note_id], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<String>>>()?;
            Ok(ids)
        })
    }

    /// Note ids linking to this note (backlinks).
    pub fn links_to_note(&self, note_id: &str) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT source_note_id FROM note_links WHERE target_note_id = ?
                 ORDER BY source_note_id",
            )?;
            let ids = stmt
                .query_map(params![note_id], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<String>>>()?;
            Ok(ids)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_tag_case_insensitive() {
        let db = CacheDb::in_memory().unwrap();
        let a = db.ensure_tag("Todo").unwrap();
        let b = db.ensure_tag("todo").unwrap();
        let c = db.ensure_tag("TODO").unwrap();
        assert_eq!(a, b);
        assert_eq!(b, c);
        assert_eq!(db.all_tags().unwrap(), vec!["Todo"]);
    }

    #[test]
    fn test_set_note_tags_replaces() {
        let db = CacheDb::in_memory().unwrap();
        db.set_note_tags("n1", &["one".into(), "two".into()]).unwrap();
        db.set_note_tags("n1", &["two".into(), "three".into()])
            .unwrap();

        assert_eq!(db.tags_for_note("n1").unwrap(), vec!["three", "two"]);
    }

    #[test]
    fn test_notes_with_tag() {
        let db = CacheDb::in_memory().unwrap();
        db.set_note_tags("n1", &["shared".into()]).unwrap();
        db.set_note_tags("n2", &["shared".into(), "own".into()])
            .unwrap();

        assert_eq!(db.notes_with_tag("SHARED").unwrap(), vec!["n1", "n2"]);
        assert_eq!(db.notes_with_tag("own").unwrap(), vec!["n2"]);
    }

    #[test]
    fn test_links_and_backlinks() {
        let db = CacheDb::in_memory().unwrap();
        db.set_note_links("n1", &["n2".into(), "n3".into()]).unwrap();
        db.set_note_links("n4", &["n2".into()]).unwrap();

        assert_eq!(db.links_from_note("n1").unwrap(), vec!["n2", "n3"]);
        assert_eq!(db.links_to_note("n2").unwrap(), vec!["n1", "n4"]);
    }

    #[test]
    fn test_self_link_is_skipped() {
        let db = CacheDb::in_memory().unwrap();
        db.set_note_links("n1", &["n1".into(), "n2".into()]).unwrap();
        assert_eq!(db.links_from_note("n1").unwrap(), vec!["n2"]);
    }

    #[test]
    fn test_deleting_tag_cascades_to_note_tags() {
        let db = CacheDb::in_memory().unwrap();
        db.set_note_tags("n1", &["doomed".into()]).unwrap();
        db.with_conn(|conn| {
            conn.execute("DELETE FROM tags WHERE name = 'doomed'", [])?;
            Ok(())
        })
        .unwrap();
        assert!(db.tags_for_note("n1").unwrap().is_empty());
    }
}
