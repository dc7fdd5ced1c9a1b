//! Tag cache store
//!
//! Remembers, per repository path, the commit that was checked out and the
//! tags its playbook declared at that commit. The whole document is one JSON
//! object:
//!
//! ```json
//! {
//!   "/srv/git/saltbox": { "commit": "3f2c…", "tags": ["plex", "sonarr"] }
//! }
//! ```
//!
//! The file may be hand edited, so it is sanitized once on load: entries
//! without a string `commit` are dropped and non-string tags discarded.

use crate::tags::TagSet;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Cached state of one repository
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RepoCacheRecord {
    pub commit: String,
    pub tags: TagSet,
}

impl RepoCacheRecord {
    pub fn new<I, S>(commit: impl Into<String>, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            commit: commit.into(),
            tags: tags.into_iter().map(Into::into).collect(),
        }
    }

    /// A record without tags never counts as a cache hit
    pub fn is_usable(&self) -> bool {
        !self.tags.is_empty()
    }
}

/// The full persisted mapping, keyed by repository path
pub type CacheDocument = BTreeMap<String, RepoCacheRecord>;

/// Error type for cache operations
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("failed to access cache file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cache file {path} is corrupt: {message}")]
    Corrupt { path: PathBuf, message: String },

    #[error("failed to serialize cache: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CacheError>;

/// In-memory cache backed by a single JSON file
#[derive(Debug)]
pub struct CacheStore {
    path: PathBuf,
    records: CacheDocument,
}

impl CacheStore {
    /// Empty store that will flush to `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            records: CacheDocument::new(),
        }
    }

    /// Load the cache. A missing file yields an empty store.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let contents = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no cache file yet");
                return Ok(Self::new(path));
            }
            Err(source) => return Err(CacheError::Io { path, source }),
        };

        let records = parse_document(&path, &contents)?;
        tracing::debug!(path = %path.display(), repos = records.len(), "loaded cache");
        Ok(Self { path, records })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Raw lookup, including records whose tag list is empty
    pub fn get(&self, repo_path: &str) -> Option<&RepoCacheRecord> {
        self.records.get(repo_path)
    }

    /// Lookup that only returns records eligible as a cache hit
    pub fn usable(&self, repo_path: &str) -> Option<&RepoCacheRecord> {
        self.get(repo_path).filter(|r| r.is_usable())
    }

    /// Replace a record. In-memory only until [`CacheStore::flush`].
    pub fn set(&mut self, repo_path: impl Into<String>, record: RepoCacheRecord) {
        self.records.insert(repo_path.into(), record);
    }

    /// Drop a record. In-memory only until [`CacheStore::flush`].
    pub fn remove(&mut self, repo_path: &str) -> Option<RepoCacheRecord> {
        self.records.remove(repo_path)
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn document(&self) -> &CacheDocument {
        &self.records
    }

    /// Rewrite the whole document. The new content goes to a temporary
    /// file in the same directory which is then renamed over the old one,
    /// so readers see either the previous or the new document.
    pub fn flush(&self) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.records)?;

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir).map_err(|source| self.io_error(source))?;

        let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(|source| self.io_error(source))?;
        tmp.write_all(json.as_bytes())
            .and_then(|_| tmp.write_all(b"\n"))
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|source| self.io_error(source))?;

        // temp files are created 0600; keep the mode of the file being replaced
        match std::fs::metadata(&self.path) {
            Ok(existing) => tmp
                .as_file()
                .set_permissions(existing.permissions())
                .map_err(|source| self.io_error(source))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(source) => return Err(self.io_error(source)),
        }

        tmp.persist(&self.path)
            .map_err(|e| self.io_error(e.error))?;

        tracing::debug!(path = %self.path.display(), repos = self.records.len(), "flushed cache");
        Ok(())
    }

    fn io_error(&self, source: std::io::Error) -> CacheError {
        CacheError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

/// Parse and sanitize a cache document
fn parse_document(path: &Path, contents: &str) -> Result<CacheDocument> {
    if contents.trim().is_empty() {
        return Ok(CacheDocument::new());
    }

    let value: Value = serde_json::from_str(contents).map_err(|e| CacheError::Corrupt {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    let Value::Object(entries) = value else {
        return Err(CacheError::Corrupt {
            path: path.to_path_buf(),
            message: "top-level value is not an object".to_string(),
        });
    };

    let mut records = CacheDocument::new();
    for (repo_path, entry) in entries {
        match sanitize_record(&entry) {
            Some(record) => {
                records.insert(repo_path, record);
            }
            None => {
                tracing::warn!(repo = %repo_path, "dropping malformed cache entry");
            }
        }
    }
    Ok(records)
}

fn sanitize_record(entry: &Value) -> Option<RepoCacheRecord> {
    let entry = entry.as_object()?;
    let commit = entry.get("commit")?.as_str()?.to_string();
    let tags = entry
        .get("tags")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    Some(RepoCacheRecord { commit, tags })
}
