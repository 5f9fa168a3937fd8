//! Snapshot writing with the two-phase status flip, plus garbage collection
//! of superseded snapshots.

use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::clock::VectorClock;
use crate::error::{NotecaskError, Result};
use crate::identity::DeviceIdentity;

use super::format::{STATUS_COMPLETE, STATUS_INCOMPLETE, STATUS_OFFSET, encode_snapshot};
use super::reader::list_snapshot_files;
use super::{format_snapshot_filename, read_snapshot};

/// Write a snapshot of `document_state` captured at `clock`.
///
/// Uncompressed files use the in-place status flip: the whole file is
/// written with status 0x00 and synced, then offset 5 is overwritten with
/// 0x01 and synced again. A crash between the two phases leaves an
/// incomplete file that readers skip. If the in-place overwrite fails, a
/// fresh complete file is emitted and the incomplete one removed.
///
/// Compressed snapshots cannot flip a byte inside the zstd stream, so they
/// are written complete to a temporary name readers do not recognize and
/// renamed into place.
pub fn write_snapshot(
    dir: &Path,
    identity: &DeviceIdentity,
    clock: &VectorClock,
    document_state: &[u8],
    compress: bool,
) -> Result<PathBuf> {
    std::fs::create_dir_all(dir).map_err(|e| NotecaskError::FileWrite {
        path: dir.to_path_buf(),
        source: e,
    })?;

    if compress {
        write_compressed(dir, identity, clock, document_state)
    } else {
        write_with_flip(dir, identity, clock, document_state)
    }
}

fn write_with_flip(
    dir: &Path,
    identity: &DeviceIdentity,
    clock: &VectorClock,
    document_state: &[u8],
) -> Result<PathBuf> {
    let bytes = encode_snapshot(STATUS_INCOMPLETE, clock, document_state);
    let (path, mut file) = create_fresh(dir, identity, "")?;

    file.write_all(&bytes)
        .and_then(|()| file.sync_data())
        .map_err(|e| NotecaskError::FileWrite {
            path: path.clone(),
            source: e,
        })?;

    // Completion flip: the snapshot becomes visible to readers here.
    let flip = file
        .seek(SeekFrom::Start(STATUS_OFFSET))
        .and_then(|_| file.write_all(&[STATUS_COMPLETE]))
        .and_then(|()| file.sync_data());

    match flip {
        Ok(()) => Ok(path),
        Err(flip_err) => {
            log::warn!(
                "in-place status flip failed for {}: {}; rewriting complete file",
                path.display(),
                flip_err
            );
            drop(file);
            let complete = encode_snapshot(STATUS_COMPLETE, clock, document_state);
            let (new_path, mut new_file) = create_fresh(dir, identity, "")?;
            new_file
                .write_all(&complete)
                .and_then(|()| new_file.sync_data())
                .map_err(|e| NotecaskError::FileWrite {
                    path: new_path.clone(),
                    source: e,
                })?;
            if let Err(e) = std::fs::remove_file(&path) {
                log::warn!(
                    "could not remove incomplete snapshot {}: {}",
                    path.display(),
                    e
                );
            }
            Ok(new_path)
        }
    }
}

fn write_compressed(
    dir: &Path,
    identity: &DeviceIdentity,
    clock: &VectorClock,
    document_state: &[u8],
) -> Result<PathBuf> {
    let bytes = encode_snapshot(STATUS_COMPLETE, clock, document_state);
    let compressed = zstd::encode_all(bytes.as_slice(), 0).map_err(|e| NotecaskError::FileWrite {
        path: dir.to_path_buf(),
        source: e,
    })?;

    let (path, mut file) = create_fresh(dir, identity, ".zst.tmp")?;
    file.write_all(&compressed)
        .and_then(|()| file.sync_data())
        .map_err(|e| NotecaskError::FileWrite {
            path: path.clone(),
            source: e,
        })?;
    drop(file);

    // `<name>.snapshot.zst.tmp` -> `<name>.snapshot.zst`
    let final_path = path.with_extension("");
    std::fs::rename(&path, &final_path).map_err(|e| NotecaskError::FileWrite {
        path: final_path.clone(),
        source: e,
    })?;
    Ok(final_path)
}

/// Create a uniquely named snapshot file, bumping the timestamp on collision.
fn create_fresh(
    dir: &Path,
    identity: &DeviceIdentity,
    suffix: &str,
) -> Result<(PathBuf, std::fs::File)> {
    let mut millis = chrono::Utc::now().timestamp_millis();
    loop {
        let filename = format!(
            "{}{}",
            format_snapshot_filename(&identity.profile_id, &identity.instance_id, millis),
            suffix
        );
        let path = dir.join(filename);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((path, file)),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => millis += 1,
            Err(e) => {
                return Err(NotecaskError::FileWrite { path, source: e });
            }
        }
    }
}

/// Remove this device's snapshots that a newer complete one supersedes.
///
/// `keep` is the snapshot that must survive (normally the one just
/// written). Only files owned by `identity` are touched: peer snapshot
/// directories belong to their writers. A snapshot is superseded when every
/// one of its clock entries is at or below the kept snapshot's entry for
/// the same instance; incomplete own files are crash leftovers and are
/// always removed. Returns the number of files deleted.
pub fn gc_snapshots(dir: &Path, identity: &DeviceIdentity, keep: &Path) -> Result<usize> {
    let kept = read_snapshot(keep)?;
    let mut removed = 0;

    for info in list_snapshot_files(dir)? {
        if info.path == keep {
            continue;
        }
        if !identity.matches(&info.instance_id, info.profile_id.as_deref()) {
            continue;
        }

        let superseded = match read_snapshot(&info.path) {
            Ok(old) => old
                .vector_clock
                .iter()
                .all(|(instance, entry)| kept.vector_clock.sequence_for(instance) >= entry.sequence),
            Err(NotecaskError::IncompleteSnapshot(_)) => true,
            Err(e) => {
                log::warn!("gc: leaving unreadable snapshot {}: {}", info.filename, e);
                false
            }
        };

        if superseded {
            match std::fs::remove_file(&info.path) {
                Ok(()) => {
                    log::debug!("gc: removed superseded snapshot {}", info.filename);
                    removed += 1;
                }
                Err(e) => log::warn!("gc: could not remove {}: {}", info.filename, e),
            }
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ClockEntry;
    use crate::snapshot::find_best_snapshot;

    fn identity() -> DeviceIdentity {
        DeviceIdentity::new("profile-a", "instance-1")
    }

    fn clock(sequence: u32) -> VectorClock {
        let mut c = VectorClock::new();
        c.set(
            "instance-1",
            ClockEntry {
                sequence,
                offset: u64::from(sequence) * 100,
                filename: "profile-a_instance-1_1.crdtlog".to_string(),
            },
        );
        c
    }

    #[test]
    fn test_write_and_read_back() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_snapshot(tmp.path(), &identity(), &clock(4), b"the state", false).unwrap();

        let snapshot = read_snapshot(&path).unwrap();
        assert_eq!(snapshot.document_state, b"the state");
        assert_eq!(snapshot.vector_clock.sequence_for("instance-1"), 4);
    }

    #[test]
    fn test_written_snapshot_is_complete() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_snapshot(tmp.path(), &identity(), &clock(1), b"s", false).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes[STATUS_OFFSET as usize], STATUS_COMPLETE);
    }

    #[test]
    fn test_collision_bumps_timestamp() {
        let tmp = tempfile::tempdir().unwrap();
        let a = write_snapshot(tmp.path(), &identity(), &clock(1), b"a", false).unwrap();
        let b = write_snapshot(tmp.path(), &identity(), &clock(2), b"b", false).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_compressed_write_read() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_snapshot(tmp.path(), &identity(), &clock(3), b"zzz", true).unwrap();
        assert!(path.to_string_lossy().ends_with(".snapshot.zst"));

        let snapshot = read_snapshot(&path).unwrap();
        assert_eq!(snapshot.document_state, b"zzz");
    }

    #[test]
    fn test_compressed_leaves_no_temp_file() {
        let tmp = tempfile::tempdir().unwrap();
        write_snapshot(tmp.path(), &identity(), &clock(1), b"s", true).unwrap();

        let leftovers: Vec<_> = std::fs::read_dir(tmp.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_gc_removes_superseded_own_snapshots() {
        let tmp = tempfile::tempdir().unwrap();
        let old = write_snapshot(tmp.path(), &identity(), &clock(2), b"old", false).unwrap();
        let new = write_snapshot(tmp.path(), &identity(), &clock(5), b"new", false).unwrap();

        let removed = gc_snapshots(tmp.path(), &identity(), &new).unwrap();
        assert_eq!(removed, 1);
        assert!(!old.exists());
        assert!(new.exists());
    }

    #[test]
    fn test_gc_keeps_peer_snapshots() {
        let tmp = tempfile::tempdir().unwrap();
        let peer = DeviceIdentity::new("profile-b", "instance-9");
        let peer_snap = write_snapshot(tmp.path(), &peer, &clock(1), b"peer", false).unwrap();
        let ours = write_snapshot(tmp.path(), &identity(), &clock(9), b"ours", false).unwrap();

        gc_snapshots(tmp.path(), &identity(), &ours).unwrap();
        assert!(peer_snap.exists());
    }

    #[test]
    fn test_gc_keeps_snapshot_with_newer_entries() {
        let tmp = tempfile::tempdir().unwrap();
        // Older file knows about an instance the kept one does not cover.
        let mut wide = clock(2);
        wide.set(
            "instance-other",
            ClockEntry {
                sequence: 7,
                offset: 0,
                filename: String::new(),
            },
        );
        let wide_path = write_snapshot(tmp.path(), &identity(), &wide, b"wide", false).unwrap();
        let narrow_path = write_snapshot(tmp.path(), &identity(), &clock(5), b"narrow", false).unwrap();

        gc_snapshots(tmp.path(), &identity(), &narrow_path).unwrap();
        assert!(wide_path.exists());
    }

    #[test]
    fn test_best_snapshot_after_writes() {
        let tmp = tempfile::tempdir().unwrap();
        write_snapshot(tmp.path(), &identity(), &clock(2), b"old", false).unwrap();
        let newest = write_snapshot(tmp.path(), &identity(), &clock(6), b"new", false).unwrap();

        let best = find_best_snapshot(tmp.path()).unwrap().unwrap();
        assert_eq!(best.path, newest);
        assert_eq!(best.total_changes, 6);
    }
}
