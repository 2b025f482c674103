//! In-process storage backend.
//!
//! Backs the all-in-one development deployment and the test suite. Keeps
//! blobs in a map behind a read/write lock; the contract is identical to
//! the object-store backends.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::RwLock;

use super::{CoverageKey, Storage, StorageError};

/// A `Storage` backend holding blobs in memory.
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored blobs.
    pub async fn len(&self) -> usize {
        self.blobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.blobs.read().await.is_empty()
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn put(&self, key: &CoverageKey, data: &[u8]) -> Result<(), StorageError> {
        key.validate()?;
        self.blobs
            .write()
            .await
            .insert(key.object_path(), data.to_vec());
        Ok(())
    }

    async fn get(&self, key: &CoverageKey) -> Result<Option<Vec<u8>>, StorageError> {
        key.validate()?;
        Ok(self.blobs.read().await.get(&key.object_path()).cloned())
    }

    async fn put_stream(
        &self,
        key: &CoverageKey,
        reader: &mut (dyn AsyncRead + Send + Unpin),
        size_hint: u64,
    ) -> Result<(), StorageError> {
        key.validate()?;
        let mut data = Vec::with_capacity(size_hint as usize);
        reader.read_to_end(&mut data).await?;
        self.blobs.write().await.insert(key.object_path(), data);
        Ok(())
    }

    async fn close(&self) -> Result<(), StorageError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> CoverageKey {
        CoverageKey::new("grafana", "repo", "main")
    }

    #[tokio::test]
    async fn get_absent_returns_none() {
        let store = InMemoryStorage::new();
        assert_eq!(store.get(&key()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn put_then_get_returns_exact_bytes() {
        let store = InMemoryStorage::new();
        let data = b"mode: set\nf.go:1.1,3.2 1 1\n";

        store.put(&key(), data).await.unwrap();

        assert_eq!(store.get(&key()).await.unwrap(), Some(data.to_vec()));
    }

    #[tokio::test]
    async fn put_is_last_writer_wins() {
        let store = InMemoryStorage::new();

        store.put(&key(), b"first").await.unwrap();
        store.put(&key(), b"second").await.unwrap();

        assert_eq!(store.get(&key()).await.unwrap(), Some(b"second".to_vec()));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn keys_are_isolated_per_branch() {
        let store = InMemoryStorage::new();
        let main = CoverageKey::new("o", "r", "main");
        let dev = CoverageKey::new("o", "r", "dev");

        store.put(&main, b"m").await.unwrap();
        store.put(&dev, b"d").await.unwrap();

        assert_eq!(store.get(&main).await.unwrap(), Some(b"m".to_vec()));
        assert_eq!(store.get(&dev).await.unwrap(), Some(b"d".to_vec()));
    }

    #[tokio::test]
    async fn put_stream_reads_to_end() {
        let store = InMemoryStorage::new();
        let data = b"mode: set\nf.go:1.1,3.2 1 1\n".to_vec();

        store
            .put_stream(&key(), &mut data.as_slice(), data.len() as u64)
            .await
            .unwrap();

        assert_eq!(store.get(&key()).await.unwrap(), Some(data));
    }

    #[tokio::test]
    async fn invalid_key_is_rejected() {
        let store = InMemoryStorage::new();
        let bad = CoverageKey::new("", "r", "b");

        assert!(matches!(
            store.put(&bad, b"x").await,
            Err(StorageError::InvalidKey(_))
        ));
        assert!(matches!(
            store.get(&bad).await,
            Err(StorageError::InvalidKey(_))
        ));
    }
}
