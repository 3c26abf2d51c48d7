//! Log sources: hour folders of JSON log files in an object store.

pub mod discovery;
pub mod folder;

pub use discovery::DiscoveryManager;
pub use folder::{FOLDER_FORMAT, HourFolder};

use chrono::{DateTime, Utc};

/// One remote log file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDescriptor {
    /// Name of the configured source.
    pub source: String,
    pub folder: HourFolder,
    /// Path relative to the source root, `<hour-folder>/<file>`.
    pub path: String,
    /// Set once the file's records are written.
    pub processed_at: Option<DateTime<Utc>>,
}

impl FileDescriptor {
    pub fn new(source: impl Into<String>, folder: HourFolder, path: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            folder,
            path: path.into(),
            processed_at: None,
        }
    }

    /// Last path segment.
    pub fn file_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    /// Key used to track in-flight work across sources.
    pub fn key(&self) -> (String, String) {
        (self.source.clone(), self.path.clone())
    }
}
