//! Schema versioning and migrations.
//!
//! The schema version is a monotonically increasing integer recorded in
//! `schema_version`. On startup every migration above the stored version
//! runs inside one transaction and is recorded with a timestamp and
//! description. A database whose stored version exceeds
//! [`SCHEMA_VERSION`] was written by a newer build and is refused.
//!
//! Migration rules: cache tables may be dropped and rebuilt (their content
//! is derived from CRDT documents); user tables must be migrated in place.

use rusqlite::{Transaction, params};

use crate::error::{NotecaskError, Result};

use super::CacheDb;

/// Schema version this build writes.
pub const SCHEMA_VERSION: i64 = 1;

struct Migration {
    version: i64,
    description: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    description: "initial schema",
    sql: r#"
    -- ==================== user tables ====================

    CREATE TABLE IF NOT EXISTS tags (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE COLLATE NOCASE
    );

    CREATE TABLE IF NOT EXISTS note_tags (
        note_id TEXT NOT NULL,
        tag_id INTEGER NOT NULL REFERENCES tags(id) ON DELETE CASCADE,
        PRIMARY KEY (note_id, tag_id)
    );

    CREATE TABLE IF NOT EXISTS note_links (
        source_note_id TEXT NOT NULL,
        target_note_id TEXT NOT NULL,
        PRIMARY KEY (source_note_id, target_note_id)
    );

    CREATE TABLE IF NOT EXISTS storage_dirs (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL UNIQUE,
        path TEXT NOT NULL UNIQUE,
        uuid TEXT,
        created INTEGER NOT NULL,
        is_active INTEGER NOT NULL DEFAULT 1
    );

    CREATE TABLE IF NOT EXISTS app_state (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );

    -- ==================== cache tables ====================

    CREATE TABLE IF NOT EXISTS notes (
        id TEXT PRIMARY KEY,
        title TEXT NOT NULL DEFAULT '',
        sd_id TEXT NOT NULL,
        folder_id TEXT,
        created INTEGER NOT NULL,
        modified INTEGER NOT NULL,
        deleted INTEGER NOT NULL DEFAULT 0,
        pinned INTEGER NOT NULL DEFAULT 0,
        content_preview TEXT NOT NULL DEFAULT '',
        content_text TEXT NOT NULL DEFAULT ''
    );

    CREATE INDEX IF NOT EXISTS idx_notes_sd ON notes(sd_id, deleted);
    CREATE INDEX IF NOT EXISTS idx_notes_folder ON notes(folder_id);

    CREATE VIRTUAL TABLE IF NOT EXISTS notes_fts USING fts5(
        title,
        content_text,
        content='notes',
        content_rowid='rowid'
    );

    CREATE TRIGGER IF NOT EXISTS notes_fts_insert AFTER INSERT ON notes BEGIN
        INSERT INTO notes_fts(rowid, title, content_text)
        VALUES (new.rowid, new.title, new.content_text);
    END;

    CREATE TRIGGER IF NOT EXISTS notes_fts_delete AFTER DELETE ON notes BEGIN
        INSERT INTO notes_fts(notes_fts, rowid, title, content_text)
        VALUES ('delete', old.rowid, old.title, old.content_text);
    END;

    CREATE TRIGGER IF NOT EXISTS notes_fts_update AFTER UPDATE ON notes BEGIN
        INSERT INTO notes_fts(notes_fts, rowid, title, content_text)
        VALUES ('delete', old.rowid, old.title, old.content_text);
        INSERT INTO notes_fts(rowid, title, content_text)
        VALUES (new.rowid, new.title, new.content_text);
    END;

    -- Deleting a note clears its user-authored associations.
    CREATE TRIGGER IF NOT EXISTS notes_cascade_delete AFTER DELETE ON notes BEGIN
        DELETE FROM note_tags WHERE note_id = old.id;
        DELETE FROM note_links WHERE source_note_id = old.id OR target_note_id = old.id;
    END;

    CREATE TABLE IF NOT EXISTS folders (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        parent_id TEXT,
        sd_id TEXT NOT NULL,
        "order" INTEGER NOT NULL DEFAULT 0,
        deleted INTEGER NOT NULL DEFAULT 0
    );

    CREATE INDEX IF NOT EXISTS idx_folders_sd ON folders(sd_id, deleted);

    CREATE TABLE IF NOT EXISTS note_sync_state (
        note_id TEXT NOT NULL,
        sd_id TEXT NOT NULL,
        vector_clock TEXT NOT NULL,
        document_state BLOB NOT NULL,
        updated_at INTEGER NOT NULL,
        PRIMARY KEY (note_id, sd_id)
    );

    CREATE TABLE IF NOT EXISTS folder_sync_state (
        sd_id TEXT PRIMARY KEY,
        vector_clock TEXT NOT NULL,
        document_state BLOB NOT NULL,
        updated_at INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS activity_log_state (
        sd_id TEXT NOT NULL,
        instance_id TEXT NOT NULL,
        last_offset INTEGER NOT NULL DEFAULT 0,
        log_file TEXT NOT NULL DEFAULT '',
        PRIMARY KEY (sd_id, instance_id)
    );

    CREATE TABLE IF NOT EXISTS sequence_state (
        sd_id TEXT NOT NULL,
        document_id TEXT NOT NULL,
        current_sequence INTEGER NOT NULL DEFAULT 0,
        current_file TEXT NOT NULL DEFAULT '',
        current_offset INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (sd_id, document_id)
    );
    "#,
}];

/// Cache tables dropped and recreated by [`CacheDb::rebuild_caches`].
const CACHE_TABLES: &[&str] = &[
    "notes_fts",
    "notes",
    "folders",
    "note_sync_state",
    "folder_sync_state",
    "activity_log_state",
    "sequence_state",
];

impl CacheDb {
    /// Bring the schema up to [`SCHEMA_VERSION`].
    pub(super) fn migrate(&self) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS schema_version (
                    version INTEGER PRIMARY KEY,
                    applied_at INTEGER NOT NULL,
                    description TEXT NOT NULL
                );",
            )?;
            Ok(())
        })?;

        let stored = self.schema_version()?;
        if stored > SCHEMA_VERSION {
            return Err(NotecaskError::VersionTooNew {
                what: "cache schema",
                found: stored as u32,
                supported: SCHEMA_VERSION as u32,
            });
        }

        for migration in MIGRATIONS.iter().filter(|m| m.version > stored) {
            log::info!(
                "migrating cache schema to v{}: {}",
                migration.version,
                migration.description
            );
            self.with_tx(|tx| {
                tx.execute_batch(migration.sql)?;
                record_version(tx, migration.version, migration.description)?;
                Ok(())
            })?;
        }
        Ok(())
    }

    /// The highest applied schema version, or 0 for a fresh database.
    pub fn schema_version(&self) -> Result<i64> {
        self.with_conn(|conn| {
            let version = conn
                .query_row("SELECT MAX(version) FROM schema_version", [], |row| {
                    row.get::<_, Option<i64>>(0)
                })?
                .unwrap_or(0);
            Ok(version)
        })
    }

    /// Drop and recreate every cache table, leaving user tables untouched.
    ///
    /// Used when the derived views must be rebuilt from CRDT state (repair,
    /// or a migration that restructures a cache table).
    pub fn rebuild_caches(&self) -> Result<()> {
        self.with_tx(|tx| {
            for table in CACHE_TABLES {
                tx.execute_batch(&format!("DROP TABLE IF EXISTS {};", table))?;
            }
            Ok(())
        })?;
        // Re-running the initial migration recreates the dropped tables;
        // user tables all use IF NOT EXISTS and are untouched.
        self.with_tx(|tx| {
            tx.execute_batch(MIGRATIONS[0].sql)?;
            Ok(())
        })
    }
}

fn record_version(tx: &Transaction, version: i64, description: &str) -> Result<()> {
    tx.execute(
        "INSERT INTO schema_version (version, applied_at, description) VALUES (?, ?, ?)",
        params![version, chrono::Utc::now().timestamp_millis(), description],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::params;

    #[test]
    fn test_fresh_db_is_current() {
        let db = CacheDb::in_memory().unwrap();
        assert_eq!(db.schema_version().unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn test_migrate_is_idempotent() {
        let db = CacheDb::in_memory().unwrap();
        db.migrate().unwrap();
        assert_eq!(db.schema_version().unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn test_newer_db_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.db");
        {
            let db = CacheDb::open(&path).unwrap();
            db.with_conn(|conn| {
                conn.execute(
                    "INSERT INTO schema_version (version, applied_at, description)
                     VALUES (?, 0, 'from the future')",
                    params![SCHEMA_VERSION + 1],
                )?;
                Ok(())
            })
            .unwrap();
        }
        assert!(matches!(
            CacheDb::open(&path),
            Err(NotecaskError::VersionTooNew { .. })
        ));
    }

    #[test]
    fn test_rebuild_preserves_user_tables() {
        let db = CacheDb::in_memory().unwrap();
        db.with_conn(|conn| {
            conn.execute("INSERT INTO tags (name) VALUES ('important')", [])?;
            conn.execute(
                "INSERT INTO notes (id, sd_id, created, modified) VALUES ('n1', 'sd', 0, 0)",
                [],
            )?;
            Ok(())
        })
        .unwrap();

        db.rebuild_caches().unwrap();

        db.with_conn(|conn| {
            let tags: i64 = conn.query_row("SELECT COUNT(*) FROM tags", [], |r| r.get(0))?;
            assert_eq!(tags, 1);
            let notes: i64 = conn.query_row("SELECT COUNT(*) FROM notes", [], |r| r.get(0))?;
            assert_eq!(notes, 0);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_schema_version_recorded_with_description() {
        let db = CacheDb::in_memory().unwrap();
        db.with_conn(|conn| {
            let (applied_at, description): (i64, String) = conn.query_row(
                "SELECT applied_at, description FROM schema_version WHERE version = 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            assert!(applied_at > 0);
            assert!(!description.is_empty());
            Ok(())
        })
        .unwrap();
    }
}
