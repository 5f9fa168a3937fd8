//! The incremental sync loop.
//!
//! [`LogSync`] periodically tails other devices' log files for every
//! loaded document, applies their records through the document managers,
//! and sweeps peer deletion logs. The file replicator delivers bytes; this
//! loop notices them.
//!
//! Sync never blocks user writes for long: the pass yields between peer
//! files and checks its cancellation flag between record batches, and the
//! managers keep every clock advance made before an interruption.

use std::sync::Arc;
use std::time::Duration;

use crate::coordinator::StorageCoordinator;
use crate::document::CancelFlag;
use crate::error::Result;

/// What one sync pass accomplished.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStats {
    /// Peer log records applied across all documents.
    pub records_applied: usize,

    /// Documents deleted by tombstone processing.
    pub tombstones_processed: usize,
}

/// Periodic peer-log tailing over a coordinator's loaded documents.
pub struct LogSync {
    coordinator: Arc<StorageCoordinator>,
    cancel: CancelFlag,
}

impl LogSync {
    /// Create a sync driver over a coordinator.
    pub fn new(coordinator: Arc<StorageCoordinator>) -> Self {
        Self {
            coordinator,
            cancel: CancelFlag::new(),
        }
    }

    /// The flag that interrupts a running pass (and stops the loop).
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Run one full pass: peer logs for every loaded document, then peer
    /// deletion logs for every registered SD.
    ///
    /// Per-document and per-SD failures are logged and skipped; one
    /// misbehaving peer file must not starve the rest.
    pub fn sync_once(&self) -> Result<SyncStats> {
        let mut stats = SyncStats::default();

        for manager in self.coordinator.loaded_managers() {
            if self.cancel.is_cancelled() {
                return Ok(stats);
            }
            match manager.sync_peer_logs(&self.cancel) {
                Ok(applied) => stats.records_applied += applied,
                Err(e) => {
                    log::warn!("sync of {} failed: {}", manager.doc_id(), e);
                }
            }
        }

        for sd_id in self.coordinator.registered_sds() {
            if self.cancel.is_cancelled() {
                return Ok(stats);
            }
            match self.coordinator.sync_tombstones(&sd_id) {
                Ok(deleted) => stats.tombstones_processed += deleted.len(),
                Err(e) => {
                    log::warn!("tombstone sync of {} failed: {}", sd_id, e);
                }
            }
        }

        if stats != SyncStats::default() {
            log::debug!(
                "sync pass applied {} records, processed {} tombstones",
                stats.records_applied,
                stats.tombstones_processed
            );
        }
        Ok(stats)
    }

    /// Run passes on the configured interval until cancelled.
    ///
    /// Spawns a background thread; drop the returned handle (or call
    /// [`SyncHandle::stop`]) to stop it.
    pub fn start(self, interval: Duration) -> Result<SyncHandle> {
        let cancel = self.cancel.clone();
        let thread = std::thread::Builder::new()
            .name("notecask-sync".to_string())
            .spawn(move || {
                // Sleep in short slices so cancellation lands promptly.
                let slice = Duration::from_millis(100).min(interval);
                loop {
                    if self.cancel.is_cancelled() {
                        break;
                    }
                    if let Err(e) = self.sync_once() {
                        log::error!("sync pass failed: {}", e);
                    }
                    let mut slept = Duration::ZERO;
                    while slept < interval {
                        if self.cancel.is_cancelled() {
                            return;
                        }
                        std::thread::sleep(slice);
                        slept += slice;
                    }
                }
            })?;

        Ok(SyncHandle {
            cancel,
            thread: Some(thread),
        })
    }
}

/// Handle to a running sync loop.
pub struct SyncHandle {
    cancel: CancelFlag,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl SyncHandle {
    /// Stop the loop and wait for the in-flight pass to yield.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.cancel.cancel();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for SyncHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
