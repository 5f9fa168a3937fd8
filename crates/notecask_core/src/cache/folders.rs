//! Folder tree cache.

use rusqlite::{Row, params};

use crate::error::Result;

use super::CacheDb;

/// One row of the cached folder tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderRow {
    /// Folder id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Parent folder, or None for root folders.
    pub parent_id: Option<String>,
    /// Storage directory the folder belongs to.
    pub sd_id: String,
    /// Sort position among siblings.
    pub order: i64,
    /// Soft-deletion flag.
    pub deleted: bool,
}

impl FolderRow {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            parent_id: row.get(2)?,
            sd_id: row.get(3)?,
            order: row.get(4)?,
            deleted: row.get::<_, i64>(5)? != 0,
        })
    }
}

impl CacheDb {
    /// Insert or update a folder row.
    pub fn upsert_folder(&self, folder: &FolderRow) -> Result<()> {
        self.with_tx(|tx| {
            tx.execute(
                "INSERT INTO folders (id, name, parent_id, sd_id, \"order\", deleted)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    parent_id = excluded.parent_id,
                    sd_id = excluded.sd_id,
                    \"order\" = excluded.\"order\",
                    deleted = excluded.deleted",
                params![
                    folder.id,
                    folder.name,
                    folder.parent_id,
                    folder.sd_id,
                    folder.order,
                    folder.deleted as i64,
                ],
            )?;
            Ok(())
        })
    }

    /// Non-deleted folders of a storage directory, by sort order then name.
    pub fn list_folders(&self, sd_id: &str) -> Result<Vec<FolderRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, parent_id, sd_id, \"order\", deleted FROM folders
                 WHERE sd_id = ? AND deleted = 0
                 ORDER BY \"order\", name",
            )?;
            let rows = stmt
                .query_map(params![sd_id], FolderRow::from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }

    /// Look up one folder row.
    pub fn get_folder(&self, folder_id: &str) -> Result<Option<FolderRow>> {
        self.with_conn(|conn| {
            let result = conn.query_row(
                "SELECT id, name, parent_id, sd_id, \"order\", deleted FROM folders WHERE id = ?",
                params![folder_id],
                FolderRow::from_row,
            );
            match result {
                Ok(row) => Ok(Some(row)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn folder(id: &str, name: &str, order: i64) -> FolderRow {
        FolderRow {
            id: id.to_string(),
            name: name.to_string(),
            parent_id: None,
            sd_id: "sd-1".to_string(),
            order,
            deleted: false,
        }
    }

    #[test]
    fn test_upsert_and_list() {
        let db = CacheDb::in_memory().unwrap();
        db.upsert_folder(&folder("f2", "Personal", 2)).unwrap();
        db.upsert_folder(&folder("f1", "Work", 1)).unwrap();

        let rows = db.list_folders("sd-1").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].name, "Work");
        assert_eq!(rows[1].name, "Personal");
    }

    #[test]
    fn test_deleted_folders_hidden() {
        let db = CacheDb::in_memory().unwrap();
        let mut gone = folder("f1", "Gone", 0);
        gone.deleted = true;
        db.upsert_folder(&gone).unwrap();

        assert!(db.list_folders("sd-1").unwrap().is_empty());
        assert!(db.get_folder("f1").unwrap().unwrap().deleted);
    }

    #[test]
    fn test_nested_folder_round_trip() {
        let db = CacheDb::in_memory().unwrap();
        db.upsert_folder(&folder("root", "Root", 0)).unwrap();
        let mut child = folder("child", "Child", 0);
        child.parent_id = Some("root".to_string());
        db.upsert_folder(&child).unwrap();

        let row = db.get_folder("child").unwrap().unwrap();
        assert_eq!(row.parent_id.as_deref(), Some("root"));
    }
}
