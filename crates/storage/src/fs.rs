//! Filesystem-backed [`LogStore`] for single-node and development
//! deployments.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use logvault_core::codec::{self, BlobMetadata};
use uuid::Uuid;

use crate::{LogStore, StorageError};

/// Stores archives under a root directory, mirroring the object key as a
/// relative path.
pub struct FsStore {
    root: PathBuf,
    provider: String,
}

impl FsStore {
    /// Create the store, ensuring the root directory exists.
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|source| StorageError::Io {
                op: "create root",
                path: root.display().to_string(),
                source,
            })?;
        Ok(Self {
            root,
            provider: "filesystem".to_string(),
        })
    }

    fn full_path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

async fn write_atomic(path: &Path, data: &[u8]) -> Result<(), StorageError> {
    let io_err = |op: &'static str, source| StorageError::Io {
        op,
        path: path.display().to_string(),
        source,
    };

    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| io_err("mkdir", e))?;
    }

    // Write to a sibling temp file, then rename: the final key is never
    // visible half-written, and replaying the same put is a no-op overwrite.
    let tmp = path.with_extension(format!("tmp-{}", Uuid::new_v4()));
    tokio::fs::write(&tmp, data)
        .await
        .map_err(|e| io_err("write temp", e))?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(io_err("rename", e));
    }
    Ok(())
}

#[async_trait]
impl LogStore for FsStore {
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
        write_atomic(&self.full_path(&meta.key), &compressed).await?;
        Ok(meta)
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.full_path(key);
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(key.to_string()))
            }
            Err(source) => Err(StorageError::Io {
                op: "read",
                path: path.display().to_string(),
                source,
            }),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let path = self.full_path(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            // Idempotent: a retried expiry run must not fail on keys the
            // previous run already removed.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StorageError::Io {
                op: "delete",
                path: path.display().to_string(),
                source,
            }),
        }
    }

    fn provider(&self) -> &str {
        &self.provider
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use logvault_core::codec::decompress;
    use logvault_core::worm::sha256_hex;

    use super::*;

    fn window() -> (DateTime<Utc>, DateTime<Utc>) {
        let from = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2024, 3, 1, 11, 0, 0).unwrap();
        (from, to)
    }

    #[tokio::test]
    async fn put_get_round_trip_returns_stored_compressed_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path()).await.unwrap();
        let raw = b"{\"a\":1}\n{\"b\":2}\n";
        let (from, to) = window();

        let meta = store
            .put_logs(Uuid::new_v4(), Uuid::new_v4(), from, to, raw, "logs")
            .await
            .unwrap();

        let stored = store.get(&meta.key).await.unwrap();
        assert_eq!(sha256_hex(&stored), meta.sha256);
        assert_eq!(decompress(&stored[..]).unwrap(), raw);
    }

    #[tokio::test]
    async fn duplicate_put_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path()).await.unwrap();
        let customer = Uuid::new_v4();
        let zone = Uuid::new_v4();
        let (from, to) = window();

        let m1 = store
            .put_logs(customer, zone, from, to, b"x\n", "logs")
            .await
            .unwrap();
        let m2 = store
            .put_logs(customer, zone, from, to, b"x\n", "logs")
            .await
            .unwrap();

        assert_eq!(m1.key, m2.key);
        assert!(store.get(&m1.key).await.is_ok());
    }

    #[tokio::test]
    async fn get_missing_key_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path()).await.unwrap();

        assert!(matches!(
            store.get("logs/nope.ndjson.gz").await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn delete_is_idempotent_on_missing_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path()).await.unwrap();
        let (from, to) = window();

        let meta = store
            .put_logs(Uuid::new_v4(), Uuid::new_v4(), from, to, b"x\n", "logs")
            .await
            .unwrap();

        store.delete(&meta.key).await.unwrap();
        // Second delete of the same key must also succeed.
        store.delete(&meta.key).await.unwrap();
        assert!(matches!(
            store.get(&meta.key).await,
            Err(StorageError::NotFound(_))
        ));
    }
}
