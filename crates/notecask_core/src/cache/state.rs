//! Sync bookkeeping rows and small key/value state.
//!
//! - `note_sync_state` / `folder_sync_state`: the DB fast path for loads -
//!   a serialized vector clock plus the encoded CRDT state at that clock.
//!   Never authoritative; log files always win.
//! - `sequence_state`: the writer's persisted position per document.
//! - `activity_log_state`: how far each peer's deletion log has been read.
//! - `app_state`: arbitrary JSON values keyed by string.
//! - `storage_dirs`: the user's registered storage directories.

use rusqlite::{OptionalExtension, Row, params};

use crate::error::Result;

use super::CacheDb;

/// A cached (vector clock, document state) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncStateRow {
    /// Vector clock serialized as JSON.
    pub vector_clock: String,

    /// Encoded CRDT document state at that clock.
    pub document_state: Vec<u8>,

    /// When the row was written, Unix milliseconds.
    pub updated_at: i64,
}

impl SyncStateRow {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            vector_clock: row.get(0)?,
            document_state: row.get(1)?,
            updated_at: row.get(2)?,
        })
    }
}

/// The writer's persisted position for one document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SequenceState {
    /// Highest sequence number written.
    pub current_sequence: u32,

    /// Log file the last record went to.
    pub current_file: String,

    /// Byte offset one past the last record.
    pub current_offset: u64,
}

/// A registered storage directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageDirRow {
    /// Storage directory id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Filesystem path.
    pub path: String,
    /// Optional stable uuid from the directory itself.
    pub uuid: Option<String>,
    /// Registration time, Unix milliseconds.
    pub created: i64,
    /// Whether the SD is currently active.
    pub is_active: bool,
}

impl CacheDb {
    // ==================== note / folder sync state ====================

    /// Cached state for a note, if any.
    pub fn get_note_sync_state(&self, note_id: &str, sd_id: &str) -> Result<Option<SyncStateRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT vector_clock, document_state, updated_at FROM note_sync_state
                     WHERE note_id = ? AND sd_id = ?",
                    params![note_id, sd_id],
                    SyncStateRow::from_row,
                )
                .optional()?;
            Ok(row)
        })
    }

    /// Store the cached state for a note.
    pub fn save_note_sync_state(
        &self,
        note_id: &str,
        sd_id: &str,
        vector_clock: &str,
        document_state: &[u8],
    ) -> Result<()> {
        self.with_tx(|tx| {
            tx.execute(
                "INSERT INTO note_sync_state (note_id, sd_id, vector_clock, document_state, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(note_id, sd_id) DO UPDATE SET
                    vector_clock = excluded.vector_clock,
                    document_state = excluded.document_state,
                    updated_at = excluded.updated_at",
                params![
                    note_id,
                    sd_id,
                    vector_clock,
                    document_state,
                    chrono::Utc::now().timestamp_millis()
                ],
            )?;
            Ok(())
        })
    }

    /// Drop a note's cached state (on remote deletion).
    pub fn delete_note_sync_state(&self, note_id: &str, sd_id: &str) -> Result<()> {
        self.with_tx(|tx| {
            tx.execute(
                "DELETE FROM note_sync_state WHERE note_id = ? AND sd_id = ?",
                params![note_id, sd_id],
            )?;
            Ok(())
        })
    }

    /// Cached state for an SD's folder tree, if any.
    pub fn get_folder_sync_state(&self, sd_id: &str) -> Result<Option<SyncStateRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT vector_clock, document_state, updated_at FROM folder_sync_state
                     WHERE sd_id = ?",
                    params![sd_id],
                    SyncStateRow::from_row,
                )
                .optional()?;
            Ok(row)
        })
    }

    /// Store the cached state for an SD's folder tree.
    pub fn save_folder_sync_state(
        &self,
        sd_id: &str,
        vector_clock: &str,
        document_state: &[u8],
    ) -> Result<()> {
        self.with_tx(|tx| {
            tx.execute(
                "INSERT INTO folder_sync_state (sd_id, vector_clock, document_state, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(sd_id) DO UPDATE SET
                    vector_clock = excluded.vector_clock,
                    document_state = excluded.document_state,
                    updated_at = excluded.updated_at",
                params![
                    sd_id,
                    vector_clock,
                    document_state,
                    chrono::Utc::now().timestamp_millis()
                ],
            )?;
            Ok(())
        })
    }

    // ==================== sequence state ====================

    /// The writer's persisted position for a document.
    pub fn get_sequence_state(&self, sd_id: &str, document_id: &str) -> Result<SequenceState> {
        self.with_conn(|conn| {
            let state = conn
                .query_row(
                    "SELECT current_sequence, current_file, current_offset FROM sequence_state
                     WHERE sd_id = ? AND document_id = ?",
                    params![sd_id, document_id],
                    |row| {
                        Ok(SequenceState {
                            current_sequence: row.get::<_, i64>(0)? as u32,
                            current_file: row.get(1)?,
                            current_offset: row.get::<_, i64>(2)? as u64,
                        })
                    },
                )
                .optional()?;
            Ok(state.unwrap_or_default())
        })
    }

    /// Persist the writer's position for a document.
    pub fn save_sequence_state(
        &self,
        sd_id: &str,
        document_id: &str,
        state: &SequenceState,
    ) -> Result<()> {
        self.with_tx(|tx| {
            tx.execute(
                "INSERT INTO sequence_state (sd_id, document_id, current_sequence, current_file, current_offset)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(sd_id, document_id) DO UPDATE SET
                    current_sequence = excluded.current_sequence,
                    current_file = excluded.current_file,
                    current_offset = excluded.current_offset",
                params![
                    sd_id,
                    document_id,
                    i64::from(state.current_sequence),
                    state.current_file,
                    state.current_offset as i64,
                ],
            )?;
            Ok(())
        })
    }

    // ==================== activity log state ====================

    /// How far a peer's deletion log has been read.
    pub fn get_activity_log_state(&self, sd_id: &str, instance_id: &str) -> Result<(u64, String)> {
        self.with_conn(|conn| {
            let state = conn
                .query_row(
                    "SELECT last_offset, log_file FROM activity_log_state
                     WHERE sd_id = ? AND instance_id = ?",
                    params![sd_id, instance_id],
                    |row| Ok((row.get::<_, i64>(0)? as u64, row.get::<_, String>(1)?)),
                )
                .optional()?;
            Ok(state.unwrap_or((0, String::new())))
        })
    }

    /// Record how far a peer's deletion log has been read.
    pub fn save_activity_log_state(
        &self,
        sd_id: &str,
        instance_id: &str,
        last_offset: u64,
        log_file: &str,
    ) -> Result<()> {
        self.with_tx(|tx| {
            tx.execute(
                "INSERT INTO activity_log_state (sd_id, instance_id, last_offset, log_file)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(sd_id, instance_id) DO UPDATE SET
                    last_offset = excluded.last_offset,
                    log_file = excluded.log_file",
                params![sd_id, instance_id, last_offset as i64, log_file],
            )?;
            Ok(())
        })
    }

    // ==================== app state ====================

    /// Store an arbitrary JSON value under a key.
    pub fn set_app_state(&self, key: &str, value: &serde_json::Value) -> Result<()> {
        let text = serde_json::to_string(value)?;
        self.with_tx(|tx| {
            tx.execute(
                "INSERT INTO app_state (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, text],
            )?;
            Ok(())
        })
    }

    /// Fetch a JSON value by key.
    pub fn get_app_state(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let text: Option<String> = self.with_conn(|conn| {
            let value = conn
                .query_row(
                    "SELECT value FROM app_state WHERE key = ?",
                    params![key],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(value)
        })?;
        match text {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }

    // ==================== storage dirs ====================

    /// Register or update a storage directory.
    pub fn upsert_storage_dir(&self, sd: &StorageDirRow) -> Result<()> {
        self.with_tx(|tx| {
            tx.execute(
                "INSERT INTO storage_dirs (id, name, path, uuid, created, is_active)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    path = excluded.path,
                    uuid = excluded.uuid,
                    is_active = excluded.is_active",
                params![
                    sd.id,
                    sd.name,
                    sd.path,
                    sd.uuid,
                    sd.created,
                    sd.is_active as i64
                ],
            )?;
            Ok(())
        })
    }

    /// All registered storage directories, by name.
    pub fn list_storage_dirs(&self) -> Result<Vec<StorageDirRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, path, uuid, created, is_active FROM storage_dirs ORDER BY name",
            )?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(StorageDirRow {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        path: row.get(2)?,
                        uuid: row.get(3)?,
                        created: row.get(4)?,
                        is_active: row.get::<_, i64>(5)? != 0,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_note_sync_state_round_trip() {
        let db = CacheDb::in_memory().unwrap();
        assert!(db.get_note_sync_state("n1", "sd").unwrap().is_none());

        db.save_note_sync_state("n1", "sd", "{\"i\":{\"sequence\":1,\"offset\":29,\"filename\":\"f\"}}", b"state")
            .unwrap();
        let row = db.get_note_sync_state("n1", "sd").unwrap().unwrap();
        assert_eq!(row.document_state, b"state");
        assert!(row.updated_at > 0);

        db.delete_note_sync_state("n1", "sd").unwrap();
        assert!(db.get_note_sync_state("n1", "sd").unwrap().is_none());
    }

    #[test]
    fn test_folder_sync_state_round_trip() {
        let db = CacheDb::in_memory().unwrap();
        db.save_folder_sync_state("sd", "{}", b"tree").unwrap();
        db.save_folder_sync_state("sd", "{}", b"tree2").unwrap();

        let row = db.get_folder_sync_state("sd").unwrap().unwrap();
        assert_eq!(row.document_state, b"tree2");
    }

    #[test]
    fn test_sequence_state_defaults_to_zero() {
        let db = CacheDb::in_memory().unwrap();
        let state = db.get_sequence_state("sd", "n1").unwrap();
        assert_eq!(state.current_sequence, 0);
        assert!(state.current_file.is_empty());
    }

    #[test]
    fn test_sequence_state_round_trip() {
        let db = CacheDb::in_memory().unwrap();
        let state = SequenceState {
            current_sequence: 41,
            current_file: "p_i_100.crdtlog".to_string(),
            current_offset: 4096,
        };
        db.save_sequence_state("sd", "n1", &state).unwrap();
        assert_eq!(db.get_sequence_state("sd", "n1").unwrap(), state);
    }

    #[test]
    fn test_activity_log_state_round_trip() {
        let db = CacheDb::in_memory().unwrap();
        assert_eq!(
            db.get_activity_log_state("sd", "peer").unwrap(),
            (0, String::new())
        );
        db.save_activity_log_state("sd", "peer", 120, "peer.log")
            .unwrap();
        assert_eq!(
            db.get_activity_log_state("sd", "peer").unwrap(),
            (120, "peer.log".to_string())
        );
    }

    #[test]
    fn test_app_state_round_trip() {
        let db = CacheDb::in_memory().unwrap();
        let value = serde_json::json!({"window": {"width": 1280, "height": 800}});
        db.set_app_state("window_state", &value).unwrap();
        assert_eq!(db.get_app_state("window_state").unwrap(), Some(value));
        assert_eq!(db.get_app_state("missing").unwrap(), None);
    }

    #[test]
    fn test_storage_dirs() {
        let db = CacheDb::in_memory().unwrap();
        db.upsert_storage_dir(&StorageDirRow {
            id: "sd-1".into(),
            name: "Notes".into(),
            path: "/sync/notes".into(),
            uuid: None,
            created: 100,
            is_active: true,
        })
        .unwrap();

        let dirs = db.list_storage_dirs().unwrap();
        assert_eq!(dirs.len(), 1);
        assert_eq!(dirs[0].name, "Notes");
        assert!(dirs[0].is_active);
    }
}
