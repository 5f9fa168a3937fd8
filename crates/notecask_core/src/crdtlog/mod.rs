//! Append-only CRDT update logs.
//!
//! Each (device, document) pair owns exactly one writer appending framed
//! records to `logs/<profile>_<instance>_<millis>.crdtlog`. All other
//! devices only ever read these files. The reader tolerates torn tails
//! (bytes still in flight through the file replicator) and distinguishes
//! them from real corruption.

mod files;
mod reader;
mod writer;

pub use files::{LogFileInfo, format_log_filename, list_log_files, parse_log_filename};
pub use reader::{ReadOutcome, ReadRecord, ScanEnd, read_all_records, read_records};
pub use writer::{AppendResult, LogWriter};
