//! Checkpoint persistence for per-source processing state.
//!
//! Each source keeps one JSON document at `{source}_checkpoint.json` under the
//! state storage.
//!
//! # Atomic Writes
//!
//! Updates use the atomic write pattern:
//! 1. Write to temp file: `{source}_checkpoint.json.tmp`
//! 2. Rename to final path: `{source}_checkpoint.json`
//!
//! A reader therefore sees either the previous or the new document. A stale
//! `.tmp` left by an interrupted write is never read and is overwritten by the
//! next save.

pub mod state;

pub use state::{CheckpointState, Cursor, SCHEMA_VERSION};

use chrono::Utc;
use object_store::path::Path;
use snafu::prelude::*;
use tracing::{debug, info};

use crate::emit;
use crate::error::{
    CheckpointError, CheckpointParseSnafu, CheckpointSerializeSnafu, CheckpointStorageSnafu,
};
use crate::metrics::events::CheckpointSaved;
use crate::storage::StorageProviderRef;

/// Loads and saves the [`CheckpointState`] of one source.
pub struct CheckpointManager {
    storage: StorageProviderRef,
    source: String,
    state: CheckpointState,
}

impl CheckpointManager {
    pub fn new(storage: StorageProviderRef, source: impl Into<String>) -> Self {
        Self {
            storage,
            source: source.into(),
            state: CheckpointState::default(),
        }
    }

    pub fn checkpoint_path(&self) -> Path {
        Path::from(format!("{}_checkpoint.json", self.source))
    }

    /// Load the checkpoint from storage.
    ///
    /// Returns `Ok(true)` if a checkpoint was loaded and `Ok(false)` if none
    /// exists yet. A checkpoint that exists but does not parse is an error:
    /// starting fresh would reprocess every file of the source.
    pub async fn load(&mut self) -> Result<bool, CheckpointError> {
        let path = self.checkpoint_path();

        let bytes = match self.storage.get(path.clone()).await {
            Ok(bytes) => bytes,
            Err(e) if e.is_not_found() => {
                debug!(source = %self.source, "No checkpoint found, starting fresh");
                return Ok(false);
            }
            Err(e) => return Err(e).context(CheckpointStorageSnafu),
        };

        let state: CheckpointState =
            serde_json::from_slice(&bytes).context(CheckpointParseSnafu {
                path: path.to_string(),
            })?;
        info!(
            source = %self.source,
            frontier = ?state.cursor.frontier.map(|f| f.name()),
            folders = state.completed.len(),
            last_update_ts = state.last_update_ts,
            "Loaded checkpoint"
        );
        self.state = state;
        Ok(true)
    }

    /// Save the checkpoint using an atomic write.
    pub async fn save(&mut self) -> Result<(), CheckpointError> {
        self.state.last_update_ts = Utc::now().timestamp();
        let json = serde_json::to_vec_pretty(&self.state).context(CheckpointSerializeSnafu)?;

        let path = self.checkpoint_path();
        self.storage
            .atomic_write(&path, json)
            .await
            .context(CheckpointStorageSnafu)?;

        emit!(CheckpointSaved {
            source: &self.source
        });
        debug!(
            source = %self.source,
            frontier = ?self.state.cursor.frontier.map(|f| f.name()),
            "Saved checkpoint"
        );
        Ok(())
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn state(&self) -> &CheckpointState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut CheckpointState {
        &mut self.state
    }
}
