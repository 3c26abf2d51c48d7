//! Persisted processing state of one source.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::source::HourFolder;

/// Current schema version of [`CheckpointState`].
pub const SCHEMA_VERSION: u32 = 1;

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

/// The folder boundary before which every file is assumed enumerated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    #[serde(default)]
    pub frontier: Option<HourFolder>,
}

/// Cursor plus the completed file names of each hour folder.
///
/// # Example
///
/// ```json
/// {
///   "schema_version": 1,
///   "cursor": { "frontier": "2018-02-14 10:00:00" },
///   "completed": { "2018-02-14 10:00:00": ["a.json", "b.json"] },
///   "last_update_ts": 1518603982
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointState {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    #[serde(default)]
    pub cursor: Cursor,
    #[serde(default)]
    pub completed: BTreeMap<HourFolder, BTreeSet<String>>,
    /// Unix timestamp of the last save.
    #[serde(default)]
    pub last_update_ts: i64,
}

impl Default for CheckpointState {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            cursor: Cursor::default(),
            completed: BTreeMap::new(),
            last_update_ts: 0,
        }
    }
}

impl CheckpointState {
    pub fn is_complete(&self, folder: &HourFolder, file: &str) -> bool {
        self.completed
            .get(folder)
            .is_some_and(|files| files.contains(file))
    }

    /// Record `file` as done. Returns `false` if it already was.
    pub fn mark_complete(&mut self, folder: HourFolder, file: &str) -> bool {
        let files = self.completed.entry(folder).or_default();
        if files.contains(file) {
            return false;
        }
        files.insert(file.to_string())
    }

    pub fn completed_in(&self, folder: &HourFolder) -> usize {
        self.completed.get(folder).map_or(0, BTreeSet::len)
    }

    /// Drop completion sets of folders strictly before `frontier`.
    ///
    /// Returns the number of folders removed.
    pub fn prune_before(&mut self, frontier: &HourFolder) -> usize {
        let before = self.completed.len();
        self.completed = self.completed.split_off(frontier);
        before - self.completed.len()
    }
}
