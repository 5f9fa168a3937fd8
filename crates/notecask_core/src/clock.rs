//! Per-document vector clocks.
//!
//! A [`VectorClock`] records, for each peer instance, how far this process
//! has consumed that instance's log: "we have incorporated every record in
//! `filename` up to byte `offset`, the last of which was `sequence`".
//!
//! Clocks only move forward. [`VectorClock::advance`] refuses to lower a
//! sequence or offset for a known instance; repeated loads therefore observe
//! non-decreasing values for every entry.
//!
//! Clocks are serialized as JSON for the cache database and in binary form
//! inside snapshot files (see the snapshot module for the byte layout).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{NotecaskError, Result};

/// How far one instance's log has been consumed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockEntry {
    /// Last incorporated sequence number.
    pub sequence: u32,

    /// Byte offset one past the last incorporated record in `filename`.
    pub offset: u64,

    /// Log filename the offset refers to.
    pub filename: String,
}

/// Mapping from instance id to consumption state.
///
/// Backed by a `BTreeMap` so iteration (and thus snapshot encoding and JSON
/// output) is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VectorClock {
    entries: BTreeMap<String, ClockEntry>,
}

impl VectorClock {
    /// Create an empty clock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the entry for an instance.
    pub fn get(&self, instance_id: &str) -> Option<&ClockEntry> {
        self.entries.get(instance_id)
    }

    /// Last incorporated sequence for an instance, or 0 if unknown.
    pub fn sequence_for(&self, instance_id: &str) -> u32 {
        self.entries.get(instance_id).map_or(0, |e| e.sequence)
    }

    /// Number of instances with an entry.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the clock has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate entries in instance-id order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &ClockEntry)> {
        self.entries.iter()
    }

    /// Sum of sequences across all entries.
    ///
    /// Used to rank snapshots: the snapshot covering the largest total
    /// number of updates wins.
    pub fn total_changes(&self) -> u64 {
        self.entries.values().map(|e| u64::from(e.sequence)).sum()
    }

    /// Advance the entry for `instance_id`, enforcing forward-only motion.
    ///
    /// A new filename resets the offset baseline (rollover moved the
    /// instance to a fresh file), but the sequence must still be
    /// non-decreasing. Within the same file both sequence and offset must be
    /// non-decreasing. A regressing advance is silently ignored and returns
    /// `false`; callers that must treat regression as a fault check the
    /// return value.
    pub fn advance(&mut self, instance_id: &str, entry: ClockEntry) -> bool {
        match self.entries.get(instance_id) {
            Some(existing) => {
                if entry.sequence < existing.sequence {
                    return false;
                }
                if entry.filename == existing.filename && entry.offset < existing.offset {
                    return false;
                }
                self.entries.insert(instance_id.to_string(), entry);
                true
            }
            None => {
                self.entries.insert(instance_id.to_string(), entry);
                true
            }
        }
    }

    /// Insert an entry without the forward-only check.
    ///
    /// Only for reconstructing a clock from trusted storage (snapshot
    /// headers, cache rows).
    pub fn set(&mut self, instance_id: impl Into<String>, entry: ClockEntry) {
        self.entries.insert(instance_id.into(), entry);
    }

    /// Take the element-wise maximum with another clock.
    ///
    /// For each instance, the entry with the higher sequence wins (ties keep
    /// ours). Used when folding a snapshot's clock into a partially loaded
    /// document.
    pub fn merge_max(&mut self, other: &VectorClock) {
        for (instance, entry) in other.iter() {
            match self.entries.get(instance) {
                Some(existing) if existing.sequence >= entry.sequence => {}
                _ => {
                    self.entries.insert(instance.clone(), entry.clone());
                }
            }
        }
    }

    /// Serialize to the JSON form stored in sync-state rows.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize from the JSON form stored in sync-state rows.
    ///
    /// `null` and the empty string decode to an empty clock; anything else
    /// malformed is rejected.
    pub fn from_json(json: &str) -> Result<Self> {
        let trimmed = json.trim();
        if trimmed.is_empty() || trimmed == "null" {
            return Ok(Self::new());
        }
        serde_json::from_str(trimmed).map_err(|e| NotecaskError::Malformed {
            what: "vector clock JSON",
            detail: e.to_string(),
        })
    }
}
