//! Blob storage backends
//!
//! Whole-object get/put keyed by name, with an etag on every object so
//! writers can make a put conditional on what they read.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::sync::{Mutex, RwLock};

/// A stored object and the etag of its current contents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    pub data: Vec<u8>,
    pub etag: String,
}

/// Condition a put must satisfy against the object's current state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Precondition {
    /// Unconditional overwrite (last writer wins)
    Any,
    /// Object must not exist yet
    Absent,
    /// Object must still carry this etag
    Matches(String),
}

impl Precondition {
    fn holds(&self, current: Option<&str>) -> bool {
        match (self, current) {
            (Precondition::Any, _) => true,
            (Precondition::Absent, None) => true,
            (Precondition::Matches(expected), Some(etag)) => expected == etag,
            _ => false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BlobError {
    #[error("Blob store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Precondition failed for blob {0}")]
    PreconditionFailed(String),

    #[error("Invalid blob key: {0}")]
    InvalidKey(String),
}

/// Object storage seen as a flat key space
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Fetch an object, `None` when no object exists under `key`
    async fn get(&self, key: &str) -> Result<Option<Blob>, BlobError>;

    /// Write a whole object, returning its new etag
    async fn put(&self, key: &str, data: Vec<u8>, precondition: Precondition)
        -> Result<String, BlobError>;

    /// Keys ending with `suffix`, sorted
    async fn list(&self, suffix: &str) -> Result<Vec<String>, BlobError>;
}

/// Content etag: hex-encoded SHA-256 of the object bytes
pub fn etag_of(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

// =========================================================================
// In-memory backend
// =========================================================================

/// HashMap-backed blob store for tests and local runs
#[derive(Debug, Default)]
pub struct InMemoryBlobStore {
    objects: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite an object directly, bypassing the event log
    pub async fn insert_raw(&self, key: &str, data: impl Into<Vec<u8>>) {
        self.objects.write().await.insert(key.to_string(), data.into());
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn get(&self, key: &str) -> Result<Option<Blob>, BlobError> {
        let objects = self.objects.read().await;
        Ok(objects.get(key).map(|data| Blob {
            etag: etag_of(data),
            data: data.clone(),
        }))
    }

    async fn put(
        &self,
        key: &str,
        data: Vec<u8>,
        precondition: Precondition,
    ) -> Result<String, BlobError> {
        let mut objects = self.objects.write().await;
        let current = objects.get(key).map(|d| etag_of(d));

        if !precondition.holds(current.as_deref()) {
            return Err(BlobError::PreconditionFailed(key.to_string()));
        }

        let etag = etag_of(&data);
        objects.insert(key.to_string(), data);
        Ok(etag)
    }

    async fn list(&self, suffix: &str) -> Result<Vec<String>, BlobError> {
        let objects = self.objects.read().await;
        let mut keys: Vec<String> = objects
            .keys()
            .filter(|k| k.ends_with(suffix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }
}

// =========================================================================
// Filesystem backend
// =========================================================================

/// Directory-backed blob store: one file per key.
///
/// Writes go to a temp file that is renamed over the target, so readers
/// never see a half-written object. Conditional puts are atomic within
/// this process only.
#[derive(Debug)]
pub struct FsBlobStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl FsBlobStore {
    /// Open (and create if missing) a blob directory
    pub async fn open(root: impl AsRef<Path>) -> Result<Self, BlobError> {
        let root = root.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&root).await?;
        tracing::info!(root = %root.display(), "Blob store opened");

        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, BlobError> {
        if key.is_empty()
            || key.starts_with('.')
            || key.contains('/')
            || key.contains('\\')
        {
            return Err(BlobError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(key))
    }

    async fn read(path: &Path) -> Result<Option<Vec<u8>>, BlobError> {
        match tokio::fs::read(path).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn get(&self, key: &str) -> Result<Option<Blob>, BlobError> {
        let path = self.path_for(key)?;
        Ok(Self::read(&path).await?.map(|data| Blob {
            etag: etag_of(&data),
            data,
        }))
    }

    async fn put(
        &self,
        key: &str,
        data: Vec<u8>,
        precondition: Precondition,
    ) -> Result<String, BlobError> {
        let path = self.path_for(key)?;
        let _guard = self.write_lock.lock().await;

        let current = Self::read(&path).await?.map(|d| etag_of(&d));
        if !precondition.holds(current.as_deref()) {
            return Err(BlobError::PreconditionFailed(key.to_string()));
        }

        let tmp = self
            .root
            .join(format!(".{key}.{}.tmp", uuid::Uuid::new_v4().simple()));
        let etag = etag_of(&data);

        tokio::fs::write(&tmp, &data).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        Ok(etag)
    }

    async fn list(&self, suffix: &str) -> Result<Vec<String>, BlobError> {
        let mut keys = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.root).await?;

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if !name.starts_with('.') && name.ends_with(suffix) {
                    keys.push(name.to_string());
                }
            }
        }

        keys.sort();
        Ok(keys)
    }
}
