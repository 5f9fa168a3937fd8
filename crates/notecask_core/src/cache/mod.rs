//! Local cache database.
//!
//! A single SQLite database per device indexes the authoritative CRDT state
//! for fast queries: the note list, the folder tree, the full-text index,
//! and the per-document sync bookkeeping. Two categories of tables exist:
//!
//! - **Derived / cache tables** (notes, notes_fts, folders, sync-state,
//!   sequence-state, activity-log-state): rebuildable from CRDT documents
//!   at any time. A schema migration may drop and recreate them.
//! - **User-authored tables** (tags, note_tags, note_links, storage_dirs,
//!   app_state): the only copy of that data. Migrations must carry them
//!   forward in place.
//!
//! # Thread Safety
//!
//! The connection is wrapped in a `Mutex` for thread-safe access. SQLite
//! itself runs in serialized threading mode. Each logical operation runs in
//! its own transaction.

mod folders;
mod migrations;
mod notes;
mod projector;
mod state;
mod tags;

pub use folders::FolderRow;
pub use migrations::SCHEMA_VERSION;
pub use notes::NoteRow;
pub use projector::CacheProjector;
pub use state::{SequenceState, StorageDirRow, SyncStateRow};

use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;

use crate::error::Result;

/// SQLite-backed cache of derived views and sync bookkeeping.
pub struct CacheDb {
    conn: Mutex<Connection>,
}

impl CacheDb {
    /// Open or create a cache database at the given path.
    ///
    /// Runs pending migrations; refuses to open a database written by a
    /// newer build.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// Create an in-memory cache database for testing.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", true)?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    /// Run a closure with the locked connection.
    pub(crate) fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.conn.lock().unwrap();
        f(&conn)
    }

    /// Run a closure inside a transaction; commits on Ok, rolls back on Err.
    pub(crate) fn with_tx<T>(&self, f: impl FnOnce(&rusqlite::Transaction) -> Result<T>) -> Result<T> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }
}

impl std::fmt::Debug for CacheDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheDb").finish_non_exhaustive()
    }
}
