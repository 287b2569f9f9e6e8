//! # Artifact Storage
//!
//! Steps may declare artifact paths; once a step exits the executor copies
//! the matching files out of its container and hands them to an
//! [`ArtifactStore`].
//!
//! ## Storage Model
//!
//! [`DirectoryStore`] keeps artifacts on the local filesystem, keyed by
//! `<org>/<repo>/<build>/<step>/<file path>`:
//!
//! ```text
//! ~/.local/share/vela-artifacts/
//! └── github/
//!     └── octocat/
//!         └── 42/
//!             └── test/
//!                 └── reports/junit.xml
//! ```
//!
//! ## Path Traversal Protection
//!
//! Keys come from container file listings and must never escape the store
//! root. Keys are rejected when they contain `..`, `.` or empty components;
//! leading `/` is stripped.
//!
//! ## Atomic Writes
//!
//! Artifacts are written via a temp file + rename so a crash never leaves a
//! partially written file under its final name. Writes run on tokio's
//! blocking pool.

use crate::constants::ARTIFACT_STORE_DIR;
use crate::error::{Error, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

/// Destination for collected artifacts.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Stores `data` under `key` and returns its `sha256:` digest.
    async fn upload(&self, key: &str, data: &[u8]) -> Result<String>;
}

/// Filesystem-backed artifact store.
pub struct DirectoryStore {
    /// Base directory for artifact storage.
    base_dir: PathBuf,
    /// Disambiguates temp files of concurrent writers.
    sequence: AtomicU64,
}

impl DirectoryStore {
    /// Creates a store at the default location.
    pub fn new() -> Result<Self> {
        Self::with_path(Self::default_path())
    }

    /// Creates a store at the specified path.
    pub fn with_path(base_dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&base_dir).map_err(|e| Error::StorageInitFailed {
            path: base_dir.clone(),
            reason: e.to_string(),
        })?;

        info!("Artifact store initialized at: {}", base_dir.display());

        Ok(Self {
            base_dir,
            sequence: AtomicU64::new(0),
        })
    }

    fn default_path() -> PathBuf {
        dirs::data_local_dir()
            .map(|d| d.join(ARTIFACT_STORE_DIR))
            .unwrap_or_else(|| PathBuf::from(ARTIFACT_STORE_DIR))
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Resolves a key to a path inside the store.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArtifactKey`] for keys that would escape the
    /// store root or are empty.
    pub fn artifact_path(&self, key: &str) -> Result<PathBuf> {
        let trimmed = key.trim_start_matches('/');
        if trimmed.is_empty() {
            return Err(Error::InvalidArtifactKey {
                key: key.to_string(),
                reason: "empty key".to_string(),
            });
        }

        let mut path = self.base_dir.clone();
        for part in trimmed.split('/') {
            match Path::new(part).components().next() {
                Some(Component::Normal(_)) if part != "." && part != ".." => path.push(part),
                _ => {
                    return Err(Error::InvalidArtifactKey {
                        key: key.to_string(),
                        reason: format!("illegal path component {part:?}"),
                    });
                }
            }
        }
        Ok(path)
    }

    pub fn has_artifact(&self, key: &str) -> bool {
        self.artifact_path(key).map(|p| p.exists()).unwrap_or(false)
    }

    pub fn get_artifact(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.artifact_path(key)?;
        Ok(fs::read(path)?)
    }

    fn temp_path(&self, path: &Path) -> PathBuf {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        path.with_extension(format!("tmp.{}.{seq}", std::process::id()))
    }
}

fn write_atomic(path: &Path, temp_path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::StorageWriteFailed(e.to_string()))?;
    }

    fs::write(temp_path, data).map_err(|e| Error::StorageWriteFailed(e.to_string()))?;
    fs::rename(temp_path, path).map_err(|e| {
        let _ = fs::remove_file(temp_path);
        Error::StorageWriteFailed(e.to_string())
    })
}

#[async_trait]
impl ArtifactStore for DirectoryStore {
    async fn upload(&self, key: &str, data: &[u8]) -> Result<String> {
        let path = self.artifact_path(key)?;
        let temp_path = self.temp_path(&path);
        let digest = format!("sha256:{}", hex::encode(Sha256::digest(data)));

        let owned = data.to_vec();
        tokio::task::spawn_blocking(move || write_atomic(&path, &temp_path, &owned))
            .await
            .map_err(|e| Error::StorageWriteFailed(format!("write task failed: {e}")))??;

        debug!("Stored artifact {} ({} bytes, {})", key, data.len(), digest);
        Ok(digest)
    }
}

/// Builds the storage key for an artifact collected from a step.
pub fn artifact_key(repo: &str, build: i32, step: &str, file: &str) -> String {
    format!("{repo}/{build}/{step}/{}", file.trim_start_matches('/'))
}
