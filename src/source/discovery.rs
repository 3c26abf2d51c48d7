//! Cursor-based discovery of unprocessed files.
//!
//! A source is a set of hour folders. The frontier is the folder currently
//! being listed; it moves to the next existing folder once its hour is over
//! and every file in it is complete.

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use super::{FileDescriptor, HourFolder};
use crate::checkpoint::CheckpointManager;
use crate::emit;
use crate::error::{CheckpointError, StorageError};
use crate::metrics::events::{FrontierAdvanced, PendingFiles};
use crate::storage::StorageProviderRef;

/// Suffix of log file objects; anything else in a folder is ignored.
const LOG_FILE_SUFFIX: &str = ".json";

/// Tracks the frontier and the completed files of one source.
///
/// Owned by the orchestrator, which is its only writer.
pub struct DiscoveryManager {
    name: String,
    storage: StorageProviderRef,
    checkpoint: CheckpointManager,
    dirty: bool,
}

impl DiscoveryManager {
    /// `storage` holds the source's hour folders; `checkpoint` persists its state.
    pub fn new(
        name: impl Into<String>,
        storage: StorageProviderRef,
        checkpoint: CheckpointManager,
    ) -> Self {
        Self {
            name: name.into(),
            storage,
            checkpoint,
            dirty: false,
        }
    }

    /// Load persisted state. Returns `true` if a checkpoint existed.
    pub async fn init(&mut self) -> Result<bool, CheckpointError> {
        let loaded = self.checkpoint.load().await?;
        if loaded {
            info!(
                source = %self.name,
                frontier = ?self.frontier().map(|f| f.name()),
                "Restored discovery state"
            );
        }
        Ok(loaded)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn frontier(&self) -> Option<HourFolder> {
        self.checkpoint.state().cursor.frontier
    }

    /// Whether there are completions that have not been persisted.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn is_complete(&self, file: &FileDescriptor) -> bool {
        self.checkpoint
            .state()
            .is_complete(&file.folder, file.file_name())
    }

    /// Files of the frontier folder that are not complete, sorted by path.
    pub async fn discover(&mut self) -> Result<Vec<FileDescriptor>, StorageError> {
        self.discover_at(Utc::now()).await
    }

    /// [`DiscoveryManager::discover`] with an explicit wall-clock time.
    pub async fn discover_at(
        &mut self,
        now: DateTime<Utc>,
    ) -> Result<Vec<FileDescriptor>, StorageError> {
        let folders = self.list_hour_folders().await?;

        let mut frontier = match self.frontier() {
            Some(frontier) => frontier,
            None => match folders.first() {
                Some(&earliest) => {
                    info!(source = %self.name, frontier = %earliest, "Initialized frontier");
                    self.set_frontier(earliest);
                    earliest
                }
                None => {
                    debug!(source = %self.name, "No hour folders yet");
                    return Ok(Vec::new());
                }
            },
        };

        loop {
            let pending = self.pending_in(frontier).await?;
            let next = folders.iter().copied().find(|folder| *folder > frontier);

            match next {
                Some(next) if pending.is_empty() && now >= frontier.end() => {
                    info!(
                        source = %self.name,
                        from = %frontier,
                        to = %next,
                        "Advancing frontier"
                    );
                    emit!(FrontierAdvanced { source: &self.name });
                    self.set_frontier(next);
                    frontier = next;
                }
                _ => {
                    emit!(PendingFiles {
                        source: &self.name,
                        count: pending.len(),
                    });
                    return Ok(pending);
                }
            }
        }
    }

    /// Record `file` as complete. Returns `false` if it already was.
    pub fn mark_complete(&mut self, file: &FileDescriptor) -> bool {
        let newly = self
            .checkpoint
            .state_mut()
            .mark_complete(file.folder, file.file_name());
        self.dirty |= newly;
        newly
    }

    /// Write the full state atomically.
    pub async fn persist(&mut self) -> Result<(), CheckpointError> {
        self.checkpoint.save().await?;
        self.dirty = false;
        Ok(())
    }

    /// Forget completion sets of folders behind the frontier.
    ///
    /// Returns the number of folders dropped.
    pub fn prune_before_frontier(&mut self) -> usize {
        let Some(frontier) = self.frontier() else {
            return 0;
        };
        let pruned = self.checkpoint.state_mut().prune_before(&frontier);
        self.dirty |= pruned > 0;
        pruned
    }

    fn set_frontier(&mut self, folder: HourFolder) {
        self.checkpoint.state_mut().cursor.frontier = Some(folder);
        self.dirty = true;
    }

    async fn list_hour_folders(&self) -> Result<Vec<HourFolder>, StorageError> {
        let mut folders: Vec<HourFolder> = self
            .storage
            .list_folders(None)
            .await?
            .iter()
            .filter_map(|name| HourFolder::parse(name).ok())
            .collect();
        folders.sort();
        Ok(folders)
    }

    async fn pending_in(&self, folder: HourFolder) -> Result<Vec<FileDescriptor>, StorageError> {
        let state = self.checkpoint.state();
        let entries = self.storage.list_entries(&folder.name()).await?;
        Ok(entries
            .into_iter()
            .filter(|entry| entry.path.ends_with(LOG_FILE_SUFFIX))
            .map(|entry| FileDescriptor::new(&self.name, folder, entry.path))
            .filter(|file| !state.is_complete(&file.folder, file.file_name()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StorageProvider;
    use chrono::TimeZone;
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::Arc;
    use tempfile::TempDir;

    struct Fixture {
        source_dir: TempDir,
        state_dir: TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                source_dir: TempDir::new().unwrap(),
                state_dir: TempDir::new().unwrap(),
            }
        }

        fn add(&self, folder: &str, file: &str) {
            let dir = self.source_dir.path().join(folder);
            std::fs::create_dir_all(&dir).unwrap();
            std::fs::write(dir.join(file), b"{}\n").unwrap();
        }

        async fn manager(&self) -> DiscoveryManager {
            let source = storage(self.source_dir.path()).await;
            let state = storage(self.state_dir.path()).await;
            DiscoveryManager::new("rogerthat", source, CheckpointManager::new(state, "rogerthat"))
        }
    }

    async fn storage(path: &Path) -> StorageProviderRef {
        Arc::new(
            StorageProvider::for_url_with_options(path.to_str().unwrap(), HashMap::new())
                .await
                .unwrap(),
        )
    }

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2018, 2, 14, hour, minute, 0).unwrap()
    }

    fn names(files: &[FileDescriptor]) -> Vec<&str> {
        files.iter().map(|f| f.path.as_str()).collect()
    }

    #[tokio::test]
    async fn test_empty_source() {
        let fixture = Fixture::new();
        let mut manager = fixture.manager().await;
        assert!(manager.discover_at(at(12, 0)).await.unwrap().is_empty());
        assert_eq!(manager.frontier(), None);
    }

    #[tokio::test]
    async fn test_frontier_starts_at_earliest_folder() {
        let fixture = Fixture::new();
        fixture.add("2018-02-14 11:00:00", "c.json");
        fixture.add("2018-02-14 10:00:00", "b.json");
        fixture.add("2018-02-14 10:00:00", "a.json");
        fixture.add("not-an-hour", "x.json");

        let mut manager = fixture.manager().await;
        let files = manager.discover_at(at(10, 30)).await.unwrap();

        assert_eq!(
            names(&files),
            ["2018-02-14 10:00:00/a.json", "2018-02-14 10:00:00/b.json"]
        );
        assert_eq!(manager.frontier().unwrap().name(), "2018-02-14 10:00:00");
        assert!(manager.is_dirty());
    }

    #[tokio::test]
    async fn test_only_json_files_discovered() {
        let fixture = Fixture::new();
        fixture.add("2018-02-14 10:00:00", "a.json");
        fixture.add("2018-02-14 10:00:00", "_SUCCESS");
        fixture.add("2018-02-14 10:00:00", "b.json.gstmp");

        let mut manager = fixture.manager().await;
        let files = manager.discover_at(at(10, 30)).await.unwrap();
        assert_eq!(names(&files), ["2018-02-14 10:00:00/a.json"]);

        // Stray objects never hold the frontier back.
        manager.mark_complete(&files[0]);
        fixture.add("2018-02-14 11:00:00", "c.json");
        let files = manager.discover_at(at(11, 0)).await.unwrap();
        assert_eq!(names(&files), ["2018-02-14 11:00:00/c.json"]);
    }

    #[tokio::test]
    async fn test_completed_file_not_rediscovered() {
        let fixture = Fixture::new();
        fixture.add("2018-02-14 10:00:00", "a.json");
        fixture.add("2018-02-14 10:00:00", "b.json");

        let mut manager = fixture.manager().await;
        let files = manager.discover_at(at(10, 30)).await.unwrap();
        assert!(manager.mark_complete(&files[0]));
        assert!(!manager.mark_complete(&files[0]));

        let again = manager.discover_at(at(10, 31)).await.unwrap();
        assert_eq!(names(&again), ["2018-02-14 10:00:00/b.json"]);
    }

    #[tokio::test]
    async fn test_frontier_waits_for_hour_to_pass() {
        let fixture = Fixture::new();
        fixture.add("2018-02-14 10:00:00", "a.json");
        fixture.add("2018-02-14 11:00:00", "b.json");

        let mut manager = fixture.manager().await;
        let files = manager.discover_at(at(10, 59)).await.unwrap();
        manager.mark_complete(&files[0]);

        // The hour is not over yet.
        assert!(manager.discover_at(at(10, 59)).await.unwrap().is_empty());
        assert_eq!(manager.frontier().unwrap().name(), "2018-02-14 10:00:00");

        let files = manager.discover_at(at(11, 0)).await.unwrap();
        assert_eq!(names(&files), ["2018-02-14 11:00:00/b.json"]);
        assert_eq!(manager.frontier().unwrap().name(), "2018-02-14 11:00:00");
    }

    #[tokio::test]
    async fn test_frontier_stays_without_later_folder() {
        let fixture = Fixture::new();
        fixture.add("2018-02-14 10:00:00", "a.json");

        let mut manager = fixture.manager().await;
        let files = manager.discover_at(at(10, 0)).await.unwrap();
        manager.mark_complete(&files[0]);

        assert!(manager.discover_at(at(15, 0)).await.unwrap().is_empty());
        assert_eq!(manager.frontier().unwrap().name(), "2018-02-14 10:00:00");
    }

    #[tokio::test]
    async fn test_frontier_holds_while_files_outstanding() {
        let fixture = Fixture::new();
        fixture.add("2018-02-14 10:00:00", "a.json");
        fixture.add("2018-02-14 12:00:00", "b.json");

        let mut manager = fixture.manager().await;
        let files = manager.discover_at(at(13, 0)).await.unwrap();
        assert_eq!(names(&files), ["2018-02-14 10:00:00/a.json"]);
        assert_eq!(manager.frontier().unwrap().name(), "2018-02-14 10:00:00");
    }

    #[tokio::test]
    async fn test_frontier_skips_missing_hours() {
        let fixture = Fixture::new();
        fixture.add("2018-02-14 10:00:00", "a.json");
        fixture.add("2018-02-14 13:00:00", "b.json");

        let mut manager = fixture.manager().await;
        let files = manager.discover_at(at(10, 5)).await.unwrap();
        manager.mark_complete(&files[0]);

        let files = manager.discover_at(at(11, 5)).await.unwrap();
        assert_eq!(names(&files), ["2018-02-14 13:00:00/b.json"]);
    }

    #[tokio::test]
    async fn test_persisted_state_survives_restart() {
        let fixture = Fixture::new();
        fixture.add("2018-02-14 10:00:00", "a.json");
        fixture.add("2018-02-14 10:00:00", "b.json");

        let mut manager = fixture.manager().await;
        let files = manager.discover_at(at(10, 30)).await.unwrap();
        manager.mark_complete(&files[0]);
        manager.persist().await.unwrap();
        assert!(!manager.is_dirty());

        let mut restarted = fixture.manager().await;
        assert!(restarted.init().await.unwrap());
        let files = restarted.discover_at(at(10, 30)).await.unwrap();
        assert_eq!(names(&files), ["2018-02-14 10:00:00/b.json"]);
    }

    #[tokio::test]
    async fn test_prune_before_frontier() {
        let fixture = Fixture::new();
        fixture.add("2018-02-14 10:00:00", "a.json");
        fixture.add("2018-02-14 11:00:00", "b.json");

        let mut manager = fixture.manager().await;
        let first = manager.discover_at(at(10, 0)).await.unwrap();
        manager.mark_complete(&first[0]);
        let second = manager.discover_at(at(11, 0)).await.unwrap();
        manager.mark_complete(&second[0]);
        manager.persist().await.unwrap();

        assert_eq!(manager.prune_before_frontier(), 1);
        assert!(manager.is_dirty());
        assert!(!manager.is_complete(&first[0]));
        assert!(manager.is_complete(&second[0]));
    }
}
