//! Multi-cloud storage abstraction.
//!
//! Provides a unified interface for working with S3, GCS, and the local
//! filesystem. All paths handed to and returned from a provider are relative
//! to the key prefix of its URL.

mod gcs;
mod local;
mod s3;

use bytes::Bytes;
use object_store::path::Path;
use object_store::{ObjectStore, PutPayload};
use regex::Regex;
use snafu::prelude::*;
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::Instant;
use tracing::debug;

use crate::emit;
use crate::error::{InvalidUrlSnafu, ObjectStoreSnafu, StorageError};
use crate::metrics::events::{RequestStatus, StorageOperation, StorageRequest};

pub use gcs::GcsConfig;
pub use local::LocalConfig;
pub use s3::S3Config;

/// A reference-counted storage provider.
pub type StorageProviderRef = Arc<StorageProvider>;

/// Storage provider that abstracts over different cloud storage backends.
#[derive(Clone)]
pub struct StorageProvider {
    pub(crate) config: BackendConfig,
    pub(crate) object_store: Arc<dyn ObjectStore>,
    pub(crate) canonical_url: String,
}

impl std::fmt::Debug for StorageProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "StorageProvider<{}>", self.canonical_url)
    }
}

/// One object found by a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectEntry {
    /// Path relative to the provider's key prefix.
    pub path: String,
    pub size: u64,
}

// URL patterns for different storage backends
const S3_PATH: &str =
    r"^https://s3\.(?P<region>[\w\-]+)\.amazonaws\.com/(?P<bucket>[a-z0-9\-\.]+)(/(?P<key>.+))?$";
const S3_VIRTUAL: &str =
    r"^https://(?P<bucket>[a-z0-9\-\.]+)\.s3\.(?P<region>[\w\-]+)\.amazonaws\.com(/(?P<key>.+))?$";
const S3_URL: &str = r"^[sS]3[aA]?://(?P<bucket>[a-z0-9\-\.]+)(/(?P<key>.+))?$";
const S3_ENDPOINT_URL: &str = r"^[sS]3[aA]?::(?<protocol>https?)://(?P<endpoint>[^:/]+):(?<port>\d+)/(?P<bucket>[a-z0-9\-\.]+)(/(?P<key>.+))?$";

const FILE_URI: &str = r"^file://(?P<path>.*)$";
const FILE_URL: &str = r"^file:(?P<path>.*)$";
const FILE_PATH: &str = r"^(?P<path>/.*)$";
const RELATIVE_PATH: &str = r"^(?P<path>\.{1,2}(/.*)?)$";

const GCS_VIRTUAL: &str =
    r"^https://(?P<bucket>[a-z0-9\-_\.]+)\.storage\.googleapis\.com(/(?P<key>.+))?$";
const GCS_PATH: &str =
    r"^https://storage\.googleapis\.com/(?P<bucket>[a-z0-9\-_\.]+)(/(?P<key>.+))?$";
const GCS_URL: &str = r"^[gG][sS]://(?P<bucket>[a-z0-9\-\._]+)(/(?P<key>.+))?$";

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
enum Backend {
    S3,
    Gcs,
    Local,
}

fn matchers() -> &'static [(Backend, Vec<Regex>)] {
    static MATCHERS: OnceLock<Vec<(Backend, Vec<Regex>)>> = OnceLock::new();
    MATCHERS.get_or_init(|| {
        let compile = |patterns: &[&str]| -> Vec<Regex> {
            patterns
                .iter()
                .map(|p| Regex::new(p).expect("storage URL pattern is valid"))
                .collect()
        };
        vec![
            (
                Backend::S3,
                compile(&[S3_PATH, S3_VIRTUAL, S3_ENDPOINT_URL, S3_URL]),
            ),
            (Backend::Gcs, compile(&[GCS_PATH, GCS_VIRTUAL, GCS_URL])),
            (
                Backend::Local,
                compile(&[FILE_URI, FILE_URL, FILE_PATH, RELATIVE_PATH]),
            ),
        ]
    })
}

/// Backend configuration enum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendConfig {
    S3(S3Config),
    Gcs(GcsConfig),
    Local(LocalConfig),
}

impl BackendConfig {
    /// Parse a URL into a backend configuration.
    pub fn parse_url(url: &str) -> Result<Self, StorageError> {
        for (backend, patterns) in matchers() {
            if let Some(matches) = patterns.iter().find_map(|r| r.captures(url)) {
                return Ok(match backend {
                    Backend::S3 => Self::parse_s3(&matches),
                    Backend::Gcs => Self::parse_gcs(&matches),
                    Backend::Local => Self::parse_local(&matches),
                });
            }
        }

        InvalidUrlSnafu {
            url: url.to_string(),
        }
        .fail()
    }

    fn parse_s3(matches: &regex::Captures) -> Self {
        let bucket = matches
            .name("bucket")
            .map(|m| m.as_str().to_string())
            .unwrap_or_default();

        let region = std::env::var("AWS_DEFAULT_REGION")
            .ok()
            .or_else(|| matches.name("region").map(|m| m.as_str().to_string()));

        let endpoint = std::env::var("AWS_ENDPOINT").ok().or_else(|| {
            matches.name("endpoint").map(|endpoint| {
                let port = matches
                    .name("port")
                    .and_then(|p| p.as_str().parse::<u16>().ok())
                    .unwrap_or(443);
                let protocol = matches
                    .name("protocol")
                    .map(|p| p.as_str())
                    .unwrap_or("https");
                format!("{}://{}:{}", protocol, endpoint.as_str(), port)
            })
        });

        let key = matches.name("key").map(|m| m.as_str().into());

        BackendConfig::S3(S3Config {
            endpoint,
            region,
            bucket,
            key,
        })
    }

    fn parse_gcs(matches: &regex::Captures) -> Self {
        let bucket = matches
            .name("bucket")
            .map(|m| m.as_str().to_string())
            .unwrap_or_default();
        let key = matches.name("key").map(|r| r.as_str().into());

        BackendConfig::Gcs(GcsConfig { bucket, key })
    }

    fn parse_local(matches: &regex::Captures) -> Self {
        let path = matches.name("path").map(|m| m.as_str()).unwrap_or("/");
        let path = if path.is_empty() { "/" } else { path };

        BackendConfig::Local(LocalConfig {
            path: path.to_string(),
        })
    }

    pub(crate) fn key(&self) -> Option<&Path> {
        match self {
            BackendConfig::S3(s3) => s3.key.as_ref(),
            BackendConfig::Gcs(gcs) => gcs.key.as_ref(),
            BackendConfig::Local(_) => None,
        }
    }
}

impl StorageProvider {
    /// Create a storage provider for the given URL with storage options.
    pub async fn for_url_with_options(
        url: &str,
        options: HashMap<String, String>,
    ) -> Result<Self, StorageError> {
        match BackendConfig::parse_url(url)? {
            BackendConfig::S3(config) => Self::construct_s3(config, options),
            BackendConfig::Gcs(config) => Self::construct_gcs(config, options),
            BackendConfig::Local(config) => Self::construct_local(config).await,
        }
    }

    /// Canonical URL of the storage location, for logging.
    pub fn canonical_url(&self) -> &str {
        &self.canonical_url
    }

    /// Qualify a path with the configured key prefix.
    pub fn qualify_path<'a>(&self, path: &'a Path) -> Cow<'a, Path> {
        match self.config.key() {
            Some(prefix) => Cow::Owned(prefix.parts().chain(path.parts()).collect()),
            None => Cow::Borrowed(path),
        }
    }

    fn key_part_count(&self) -> usize {
        self.config
            .key()
            .map(|key| key.parts().count())
            .unwrap_or_default()
    }

    /// Qualified listing prefix, or `None` for the provider root.
    fn listing_prefix(&self, prefix: Option<&str>) -> Option<Path> {
        let relative = prefix.map(Path::from);
        match (self.config.key(), relative) {
            (Some(key), Some(rel)) => Some(key.parts().chain(rel.parts()).collect()),
            (Some(key), None) => Some(key.clone()),
            (None, rel) => rel,
        }
    }

    async fn list_one_level(
        &self,
        prefix: Option<&str>,
    ) -> Result<object_store::ListResult, StorageError> {
        let qualified = self.listing_prefix(prefix);
        let start = Instant::now();
        let result = self.object_store.list_with_delimiter(qualified.as_ref()).await;
        emit!(StorageRequest {
            operation: StorageOperation::List,
            status: RequestStatus::of(&result),
            duration: start.elapsed(),
        });

        match result {
            Ok(listing) => Ok(listing),
            // A prefix with no objects under it is an empty folder, not an error.
            Err(object_store::Error::NotFound { .. }) => Ok(object_store::ListResult {
                common_prefixes: Vec::new(),
                objects: Vec::new(),
            }),
            Err(source) => Err(StorageError::ObjectStore { source }),
        }
    }

    /// List the immediate sub-folders under `prefix` (or the provider root).
    ///
    /// Returns folder names (the last path segment only), sorted.
    pub async fn list_folders(&self, prefix: Option<&str>) -> Result<Vec<String>, StorageError> {
        let listing = self.list_one_level(prefix).await?;
        let mut folders: Vec<String> = listing
            .common_prefixes
            .iter()
            .filter_map(|p| p.filename().map(str::to_string))
            .collect();
        folders.sort();
        debug!(
            url = %self.canonical_url,
            prefix = prefix.unwrap_or(""),
            folders = folders.len(),
            "Listed folders"
        );
        Ok(folders)
    }

    /// List the objects directly under `prefix`, sorted by path.
    ///
    /// Returned paths are relative to the provider's key prefix and can be
    /// passed straight back to [`StorageProvider::get`].
    pub async fn list_entries(&self, prefix: &str) -> Result<Vec<ObjectEntry>, StorageError> {
        let listing = self.list_one_level(Some(prefix)).await?;
        let skip = self.key_part_count();
        let mut entries: Vec<ObjectEntry> = listing
            .objects
            .into_iter()
            .map(|meta| {
                let relative: Path = meta.location.parts().skip(skip).collect();
                ObjectEntry {
                    path: relative.to_string(),
                    size: meta.size as u64,
                }
            })
            .collect();
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }

    /// Get the contents of a file.
    pub async fn get(&self, path: impl Into<Path>) -> Result<Bytes, StorageError> {
        let path = path.into();
        let start = Instant::now();
        let result = self.object_store.get(&self.qualify_path(&path)).await;
        emit!(StorageRequest {
            operation: StorageOperation::Get,
            status: RequestStatus::of(&result),
            duration: start.elapsed(),
        });

        let bytes = result
            .context(ObjectStoreSnafu)?
            .bytes()
            .await
            .context(ObjectStoreSnafu)?;
        Ok(bytes)
    }

    /// Put a payload to a path.
    pub async fn put_payload(&self, path: &Path, payload: PutPayload) -> Result<(), StorageError> {
        let path = self.qualify_path(path);
        let start = Instant::now();
        let result = self.object_store.put(&path, payload).await;
        emit!(StorageRequest {
            operation: StorageOperation::Put,
            status: RequestStatus::of(&result),
            duration: start.elapsed(),
        });

        result.context(ObjectStoreSnafu)?;
        Ok(())
    }

    /// Atomically write content to a path using temp file + rename.
    ///
    /// This ensures the target file is never partially written:
    /// 1. Write to `{path}.tmp`
    /// 2. Rename `{path}.tmp` to `{path}`
    ///
    /// If the write or rename fails, the original file (if any) is unchanged.
    pub async fn atomic_write(&self, path: &Path, content: Vec<u8>) -> Result<(), StorageError> {
        let temp_path = Path::from(format!("{path}.tmp"));
        self.put_payload(&temp_path, PutPayload::from(Bytes::from(content)))
            .await?;
        self.rename(&temp_path, path).await
    }

    /// Server-side rename (move) operation.
    ///
    /// - **GCS**: `rewriteObject`, no egress
    /// - **S3**: `CopyObject` + `DeleteObject`
    /// - **Local**: `std::fs::rename`
    pub async fn rename(&self, from: &Path, to: &Path) -> Result<(), StorageError> {
        let from_qualified = self.qualify_path(from);
        let to_qualified = self.qualify_path(to);
        let start = Instant::now();
        let result = self
            .object_store
            .rename(&from_qualified, &to_qualified)
            .await;
        emit!(StorageRequest {
            operation: StorageOperation::Rename,
            status: RequestStatus::of(&result),
            duration: start.elapsed(),
        });

        result.context(ObjectStoreSnafu)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_s3_url_parsing() {
        let config = BackendConfig::parse_url("s3://mybucket/path/to/logs").unwrap();
        match config {
            BackendConfig::S3(s3) => {
                assert_eq!(s3.bucket, "mybucket");
                assert_eq!(s3.key, Some(Path::from("path/to/logs")));
            }
            _ => panic!("Expected S3 config"),
        }
    }

    #[test]
    fn test_gcs_url_parsing() {
        let config = BackendConfig::parse_url("gs://rogerthat-logs").unwrap();
        match config {
            BackendConfig::Gcs(gcs) => {
                assert_eq!(gcs.bucket, "rogerthat-logs");
                assert_eq!(gcs.key, None);
            }
            _ => panic!("Expected Gcs config"),
        }
    }

    #[test]
    fn test_local_url_parsing() {
        for (url, expected) in [
            ("/var/lib/flurry", "/var/lib/flurry"),
            ("file:///var/lib/flurry", "/var/lib/flurry"),
            ("./data", "./data"),
        ] {
            match BackendConfig::parse_url(url).unwrap() {
                BackendConfig::Local(local) => assert_eq!(local.path, expected),
                other => panic!("Expected Local config for {url}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_invalid_url() {
        let err = BackendConfig::parse_url("ftp://example.com/logs").unwrap_err();
        assert!(matches!(err, StorageError::InvalidUrl { .. }));
    }

    #[tokio::test]
    async fn test_list_folders_and_entries() {
        let temp_dir = TempDir::new().unwrap();
        let base = temp_dir.path();
        for folder in ["2018-02-14 10:00:00", "2018-02-14 11:00:00"] {
            std::fs::create_dir_all(base.join(folder)).unwrap();
        }
        std::fs::write(base.join("2018-02-14 10:00:00/b.json"), b"{}\n").unwrap();
        std::fs::write(base.join("2018-02-14 10:00:00/a.json"), b"{}").unwrap();

        let storage =
            StorageProvider::for_url_with_options(base.to_str().unwrap(), HashMap::new())
                .await
                .unwrap();

        let folders = storage.list_folders(None).await.unwrap();
        assert_eq!(folders, vec!["2018-02-14 10:00:00", "2018-02-14 11:00:00"]);

        let entries = storage.list_entries("2018-02-14 10:00:00").await.unwrap();
        let paths: Vec<_> = entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(
            paths,
            vec!["2018-02-14 10:00:00/a.json", "2018-02-14 10:00:00/b.json"]
        );
        assert_eq!(entries[1].size, 3);

        // Listed paths round-trip through get()
        let content = storage.get(entries[0].path.as_str()).await.unwrap();
        assert_eq!(content.as_ref(), b"{}");
    }

    #[tokio::test]
    async fn test_list_entries_missing_folder_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let storage = StorageProvider::for_url_with_options(
            temp_dir.path().to_str().unwrap(),
            HashMap::new(),
        )
        .await
        .unwrap();

        let entries = storage.list_entries("2030-01-01 00:00:00").await.unwrap();
        assert!(entries.is_empty());
    }

    #[tokio::test]
    async fn test_atomic_write_replaces_content() {
        let temp_dir = TempDir::new().unwrap();
        let storage = StorageProvider::for_url_with_options(
            temp_dir.path().to_str().unwrap(),
            HashMap::new(),
        )
        .await
        .unwrap();

        let path = Path::from("state.json");
        storage.atomic_write(&path, b"first".to_vec()).await.unwrap();
        storage.atomic_write(&path, b"second".to_vec()).await.unwrap();

        let content = storage.get(path.clone()).await.unwrap();
        assert_eq!(content.as_ref(), b"second");
        assert!(!temp_dir.path().join("state.json.tmp").exists());
    }
}
