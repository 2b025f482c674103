//! Baseline blob persistence.
//!
//! A [`Storage`] backend holds the last merged coverage profile of each
//! default branch, keyed by `{org}/{repo}/{branch}`. Backends are
//! interchangeable; the worker only sees this trait.

pub mod memory;
pub mod object;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncRead;

pub use memory::InMemoryStorage;
pub use object::ObjectStorage;

/// Identifies one baseline blob.
///
/// Blob path layout: `{org}/{repo}/{branch}/coverage.out`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CoverageKey {
    pub org: String,
    pub repo: String,
    pub branch: String,
}

impl CoverageKey {
    pub fn new(
        org: impl Into<String>,
        repo: impl Into<String>,
        branch: impl Into<String>,
    ) -> Self {
        CoverageKey {
            org: org.into(),
            repo: repo.into(),
            branch: branch.into(),
        }
    }

    /// The object path this key maps to.
    pub fn object_path(&self) -> String {
        format!("{}/{}/{}/coverage.out", self.org, self.repo, self.branch)
    }

    /// All key fields must be non-empty.
    pub fn validate(&self) -> Result<(), StorageError> {
        if self.org.is_empty() {
            return Err(StorageError::InvalidKey("org is required"));
        }
        if self.repo.is_empty() {
            return Err(StorageError::InvalidKey("repo is required"));
        }
        if self.branch.is_empty() {
            return Err(StorageError::InvalidKey("branch is required"));
        }
        Ok(())
    }
}

/// Errors produced by storage backends.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid coverage key: {0}")]
    InvalidKey(&'static str),

    #[error("storage backend error: {0}")]
    Backend(#[from] object_store::Error),

    #[error("failed to read stream: {0}")]
    Io(#[from] std::io::Error),
}

/// A pluggable blob store for baseline coverage profiles.
///
/// `put` is last-writer-wins and assumed atomic at the object level. `get`
/// returns `None` (not an error) when the blob is absent; the worker reads
/// that as "first run on this branch".
#[async_trait]
pub trait Storage: Send + Sync {
    /// Stores `data` under `key`, replacing any previous blob.
    async fn put(&self, key: &CoverageKey, data: &[u8]) -> Result<(), StorageError>;

    /// Fetches the blob under `key`, or `None` if absent.
    async fn get(&self, key: &CoverageKey) -> Result<Option<Vec<u8>>, StorageError>;

    /// Stores the contents of `reader` under `key`. `size_hint` is the
    /// expected byte count, used for buffer sizing only.
    async fn put_stream(
        &self,
        key: &CoverageKey,
        reader: &mut (dyn AsyncRead + Send + Unpin),
        size_hint: u64,
    ) -> Result<(), StorageError>;

    /// Releases backend resources. The store must not be used afterwards.
    async fn close(&self) -> Result<(), StorageError>;
}
