//! Object-store backends for the baseline blob.
//!
//! Two deployments share this implementation: a cloud object store bucket
//! (`cloud`) and a self-hosted S3-compatible service (`s3compat`). Both are
//! built through `object_store` so the worker never links against a
//! specific vendor SDK.

use std::sync::Arc;

use async_trait::async_trait;
use object_store::ObjectStore;
use object_store::aws::AmazonS3Builder;
use object_store::gcp::GoogleCloudStorageBuilder;
use object_store::path::Path;
use tokio::io::{AsyncRead, AsyncReadExt};

use super::{CoverageKey, Storage, StorageError};

/// A `Storage` backend over any `object_store` implementation.
pub struct ObjectStorage {
    store: Arc<dyn ObjectStore>,
}

impl ObjectStorage {
    /// Wraps an already-built object store. Useful for tests with the
    /// in-memory `object_store` implementation.
    pub fn from_store(store: Arc<dyn ObjectStore>) -> Self {
        ObjectStorage { store }
    }

    /// Builds a backend against the cloud object store.
    ///
    /// Credentials come from the ambient service account, as is conventional
    /// for workload identity.
    pub fn cloud(bucket: &str) -> Result<Self, StorageError> {
        let store = GoogleCloudStorageBuilder::from_env()
            .with_bucket_name(bucket)
            .build()?;
        Ok(ObjectStorage {
            store: Arc::new(store),
        })
    }

    /// Builds a backend against a self-hosted S3-compatible service.
    pub fn s3_compatible(
        endpoint: &str,
        access_key: &str,
        secret_key: &str,
        bucket: &str,
        use_ssl: bool,
    ) -> Result<Self, StorageError> {
        let scheme = if use_ssl { "https" } else { "http" };
        let store = AmazonS3Builder::new()
            .with_bucket_name(bucket)
            .with_endpoint(format!("{scheme}://{endpoint}"))
            .with_access_key_id(access_key)
            .with_secret_access_key(secret_key)
            .with_allow_http(!use_ssl)
            // S3-compatible services ignore the region but the client
            // requires one.
            .with_region("us-east-1")
            .build()?;
        Ok(ObjectStorage {
            store: Arc::new(store),
        })
    }
}

impl std::fmt::Debug for ObjectStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStorage").finish_non_exhaustive()
    }
}

#[async_trait]
impl Storage for ObjectStorage {
    async fn put(&self, key: &CoverageKey, data: &[u8]) -> Result<(), StorageError> {
        key.validate()?;
        let path = Path::from(key.object_path());
        self.store.put(&path, data.to_vec().into()).await?;
        Ok(())
    }

    async fn get(&self, key: &CoverageKey) -> Result<Option<Vec<u8>>, StorageError> {
        key.validate()?;
        let path = Path::from(key.object_path());
        match self.store.get(&path).await {
            Ok(result) => Ok(Some(result.bytes().await?.to_vec())),
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(err) => Err(err.into()),
        }
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
        let path = Path::from(key.object_path());
        self.store.put(&path, data.into()).await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), StorageError> {
        // object_store clients hold no long-lived connections of their own.
        Ok(())
    }
}
