//! S3-compatible [`LogStore`] built on the `object_store` crate.
//!
//! Works with AWS, MinIO, Garage, R2, and other path-style endpoints.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use logvault_core::codec::{self, BlobMetadata};
use object_store::aws::AmazonS3Builder;
use object_store::path::Path as ObjectPath;
use object_store::{ClientOptions, ObjectStore};
use serde::Deserialize;
use uuid::Uuid;

use crate::{LogStore, StorageError};

/// Per-operation deadline, independent of the caller's context. Uploads in
/// flight during a shutdown still get this long to land.
const OP_TIMEOUT: Duration = Duration::from_secs(60);

/// Credentials and addressing for one S3-compatible provider.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct S3Config {
    /// Provider label recorded on job rows (e.g. `"garage"`, `"hetzner"`).
    #[serde(default)]
    pub name: String,
    /// Custom endpoint URL; empty selects AWS proper.
    #[serde(default)]
    pub endpoint: String,
    pub region: String,
    pub bucket: String,
    pub access_key_id: String,
    pub secret_access_key: String,
}

/// A remote object-store backend.
pub struct RemoteStore {
    store: Arc<dyn ObjectStore>,
    provider: String,
}

impl RemoteStore {
    /// Build a backend for an S3-compatible provider.
    pub fn s3_compatible(cfg: &S3Config, label: &str) -> Result<Self, StorageError> {
        if cfg.bucket.is_empty() {
            return Err(StorageError::Config("bucket must not be empty".into()));
        }

        let mut builder = AmazonS3Builder::new()
            .with_region(cfg.region.clone())
            .with_bucket_name(cfg.bucket.clone())
            .with_access_key_id(cfg.access_key_id.clone())
            .with_secret_access_key(cfg.secret_access_key.clone())
            .with_client_options(ClientOptions::default().with_timeout(OP_TIMEOUT));

        if !cfg.endpoint.is_empty() {
            // Path-style addressing for self-hosted providers (MinIO,
            // Garage) which rarely support virtual-hosted buckets.
            builder = builder
                .with_endpoint(cfg.endpoint.clone())
                .with_virtual_hosted_style_request(false)
                .with_allow_http(true);
        }

        let store = builder
            .build()
            .map_err(|e| StorageError::Config(e.to_string()))?;

        Ok(Self {
            store: Arc::new(store),
            provider: label.to_string(),
        })
    }

    /// Wrap an already-built object store (used by the export worker for
    /// customer-supplied destinations).
    pub fn from_object_store(store: Arc<dyn ObjectStore>, label: &str) -> Self {
        Self {
            store,
            provider: label.to_string(),
        }
    }

    /// Write pre-built bytes at an explicit key, bypassing the codec. The
    /// export worker copies archives byte-for-byte with this.
    pub async fn put_raw(&self, key: &str, data: Vec<u8>) -> Result<(), StorageError> {
        self.store
            .put(&ObjectPath::from(key), bytes::Bytes::from(data).into())
            .await
            .map_err(|source| StorageError::Remote {
                provider: self.provider.clone(),
                source,
            })?;
        Ok(())
    }
}

#[async_trait]
impl LogStore for RemoteStore {
    async fn put_logs(
        &self,
        customer_id: Uuid,
        zone_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        raw: &[u8],
        log_type: &str,
    ) -> Result<BlobMetadata, StorageError> {
        let (compressed, meta) =
            codec::prepare_blob(raw, customer_id, zone_id, from, to, log_type)?;
        self.put_raw(&meta.key, compressed).await?;
        Ok(meta)
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let result = self.store.get(&ObjectPath::from(key)).await;
        let bytes = match result {
            Ok(r) => r.bytes().await,
            Err(e) => Err(e),
        };
        match bytes {
            Ok(b) => Ok(b.to_vec()),
            Err(object_store::Error::NotFound { .. }) => {
                Err(StorageError::NotFound(key.to_string()))
            }
            Err(source) => Err(StorageError::Remote {
                provider: self.provider.clone(),
                source,
            }),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        match self.store.delete(&ObjectPath::from(key)).await {
            Ok(()) => Ok(()),
            Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(source) => Err(StorageError::Remote {
                provider: self.provider.clone(),
                source,
            }),
        }
    }

    fn provider(&self) -> &str {
        &self.provider
    }
}
