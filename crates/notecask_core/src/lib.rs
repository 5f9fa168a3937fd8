#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

/// Error (common error types)
pub mod error;
pub use error::{NotecaskError, Result};

/// Device identity (profile + instance ids)
pub mod identity;
pub use identity::DeviceIdentity;

/// Engine configuration (rollover, snapshot cadence, sync interval)
pub mod config;
pub use config::EngineConfig;

/// Per-document vector clocks
pub mod clock;
pub use clock::{ClockEntry, VectorClock};

/// Binary framing for log records
pub mod frame;

/// Append-only CRDT update logs (writer, reader, filename conventions)
pub mod crdtlog;

/// Snapshot files (two-phase writer, best-snapshot selection, legacy v1)
pub mod snapshot;

/// Per-note CRDT document (body text + properties)
pub mod note_doc;
pub use note_doc::NoteDoc;

/// Folder-tree CRDT document (one per storage directory)
pub mod folder_doc;
pub use folder_doc::{FolderMeta, FolderTreeDoc};

/// Per-document orchestration (load, save, snapshots, events)
pub mod document;
pub use document::{
    CancelFlag, DocHandle, DocKind, DocState, DocumentEvent, DocumentManager, EventCallback,
    LoadedDocument, SavedUpdate,
};

/// The append-log coordinator (SD registry, dispatch, shutdown)
pub mod coordinator;
pub use coordinator::StorageCoordinator;

/// The incremental sync loop tailing peer logs
pub mod sync;
pub use sync::{LogSync, SyncHandle, SyncStats};

/// Cross-device deletion propagation (tombstone log)
pub mod deletion;
pub use deletion::DeletionLog;

/// Local cache database (derived views, migrations, FTS)
pub mod cache;
pub use cache::CacheDb;
