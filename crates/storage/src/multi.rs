//! Ordered-failover fan-out over multiple [`LogStore`] backends.
//!
//! Three distinct semantics coexist and must not be generalized:
//! primary-wins on put, first-hit on get, all-best-effort on delete.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use logvault_core::codec::BlobMetadata;
use uuid::Uuid;

use crate::{LogStore, StorageError};

/// Result of a fan-out put: the blob metadata plus the label of the backend
/// that accepted the write.
#[derive(Debug, Clone)]
pub struct ArchivedObject {
    pub key: String,
    pub sha256: String,
    pub size: i64,
    pub lines: i64,
    pub provider: String,
}

impl ArchivedObject {
    fn new(meta: BlobMetadata, provider: &str) -> Self {
        Self {
            key: meta.key,
            sha256: meta.sha256,
            size: meta.size,
            lines: meta.lines,
            provider: provider.to_string(),
        }
    }
}

/// Fan-out store; backends are consulted in construction order, primary
/// first.
pub struct MultiStore {
    backends: Vec<Arc<dyn LogStore>>,
}

impl MultiStore {
    /// `backends` must not be empty.
    pub fn new(backends: Vec<Arc<dyn LogStore>>) -> Self {
        assert!(!backends.is_empty(), "MultiStore requires at least one backend");
        Self { backends }
    }

    /// Upload to the first backend that accepts the write.
    ///
    /// Secondaries are only used on primary failure; there is no replication
    /// fan-in. The winning provider's label ends up on the job row.
    pub async fn put_logs(
        &self,
        customer_id: Uuid,
        zone_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        raw: &[u8],
        log_type: &str,
    ) -> Result<ArchivedObject, StorageError> {
        let mut last_err = None;
        for backend in &self.backends {
            match backend
                .put_logs(customer_id, zone_id, from, to, raw, log_type)
                .await
            {
                Ok(meta) => return Ok(ArchivedObject::new(meta, backend.provider())),
                Err(e) => {
                    tracing::warn!(
                        provider = backend.provider(),
                        error = %e,
                        "storage put failed, trying next backend",
                    );
                    last_err = Some(e);
                }
            }
        }
        // new() guarantees at least one backend, so last_err is set here.
        Err(StorageError::AllProvidersFailed(Box::new(
            last_err.expect("no backends configured"),
        )))
    }

    /// Fetch from the first backend that has the object.
    pub async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let mut last_err = None;
        for backend in &self.backends {
            match backend.get(key).await {
                Ok(data) => return Ok(data),
                Err(e) => last_err = Some(e),
            }
        }
        Err(StorageError::AllProvidersFailed(Box::new(
            last_err.expect("no backends configured"),
        )))
    }

    /// Attempt the delete on every backend regardless of earlier failures;
    /// report the last error seen, `Ok` if none.
    pub async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let mut last_err = None;
        for backend in &self.backends {
            if let Err(e) = backend.delete(key).await {
                tracing::warn!(
                    provider = backend.provider(),
                    key,
                    error = %e,
                    "storage delete failed",
                );
                last_err = Some(e);
            }
        }
        match last_err {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::TimeZone;
    use logvault_core::codec::prepare_blob;

    use super::*;

    /// In-memory backend with switchable failure modes.
    struct MockStore {
        label: String,
        fail_puts: bool,
        fail_deletes: bool,
        objects: Mutex<std::collections::HashMap<String, Vec<u8>>>,
        delete_calls: AtomicUsize,
    }

    impl MockStore {
        fn new(label: &str) -> Self {
            Self {
                label: label.to_string(),
                fail_puts: false,
                fail_deletes: false,
                objects: Mutex::new(Default::default()),
                delete_calls: AtomicUsize::new(0),
            }
        }

        fn failing_puts(label: &str) -> Self {
            Self {
                fail_puts: true,
                ..Self::new(label)
            }
        }

        fn failing_deletes(label: &str) -> Self {
            Self {
                fail_deletes: true,
                ..Self::new(label)
            }
        }

        fn insert(&self, key: &str, data: &[u8]) {
            self.objects
                .lock()
                .unwrap()
                .insert(key.to_string(), data.to_vec());
        }
    }

    #[async_trait]
    impl LogStore for MockStore {
        async fn put_logs(
            &self,
            customer_id: Uuid,
            zone_id: Uuid,
            from: DateTime<Utc>,
            to: DateTime<Utc>,
            raw: &[u8],
            log_type: &str,
        ) -> Result<BlobMetadata, StorageError> {
            if self.fail_puts {
                return Err(StorageError::Config(format!("{} is down", self.label)));
            }
            let (compressed, meta) =
                prepare_blob(raw, customer_id, zone_id, from, to, log_type).unwrap();
            self.insert(&meta.key, &compressed);
            Ok(meta)
        }

        async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
            self.objects
                .lock()
                .unwrap()
                .get(key)
                .cloned()
                .ok_or_else(|| StorageError::NotFound(key.to_string()))
        }

        async fn delete(&self, key: &str) -> Result<(), StorageError> {
            self.delete_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_deletes {
                return Err(StorageError::Config(format!("{} is down", self.label)));
            }
            self.objects.lock().unwrap().remove(key);
            Ok(())
        }

        fn provider(&self) -> &str {
            &self.label
        }
    }

    fn window() -> (DateTime<Utc>, DateTime<Utc>) {
        let from = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2024, 3, 1, 11, 0, 0).unwrap();
        (from, to)
    }

    async fn put(store: &MultiStore) -> ArchivedObject {
        let (from, to) = window();
        store
            .put_logs(Uuid::new_v4(), Uuid::new_v4(), from, to, b"x\n", "logs")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn put_primary_wins() {
        let primary = Arc::new(MockStore::new("primary"));
        let secondary = Arc::new(MockStore::new("secondary"));
        let store = MultiStore::new(vec![
            primary.clone() as Arc<dyn LogStore>,
            secondary.clone() as Arc<dyn LogStore>,
        ]);

        let archived = put(&store).await;

        assert_eq!(archived.provider, "primary");
        assert!(primary.get(&archived.key).await.is_ok());
        // Primary-wins semantics: nothing is written to the secondary.
        assert!(secondary.get(&archived.key).await.is_err());
    }

    #[tokio::test]
    async fn put_fails_over_and_reports_winning_provider() {
        let primary = Arc::new(MockStore::failing_puts("primary"));
        let secondary = Arc::new(MockStore::new("secondary"));
        let store = MultiStore::new(vec![
            primary as Arc<dyn LogStore>,
            secondary.clone() as Arc<dyn LogStore>,
        ]);

        let archived = put(&store).await;

        assert_eq!(archived.provider, "secondary");
        assert!(secondary.get(&archived.key).await.is_ok());
    }

    #[tokio::test]
    async fn put_returns_last_error_when_all_fail() {
        let store = MultiStore::new(vec![
            Arc::new(MockStore::failing_puts("a")) as Arc<dyn LogStore>,
            Arc::new(MockStore::failing_puts("b")),
        ]);
        let (from, to) = window();

        let err = store
            .put_logs(Uuid::new_v4(), Uuid::new_v4(), from, to, b"x\n", "logs")
            .await
            .unwrap_err();

        match err {
            StorageError::AllProvidersFailed(inner) => {
                assert!(inner.to_string().contains("b is down"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn get_returns_first_hit() {
        let primary = Arc::new(MockStore::new("primary"));
        let secondary = Arc::new(MockStore::new("secondary"));
        secondary.insert("k", b"from-secondary");
        let store = MultiStore::new(vec![
            primary as Arc<dyn LogStore>,
            secondary as Arc<dyn LogStore>,
        ]);

        assert_eq!(store.get("k").await.unwrap(), b"from-secondary");
    }

    #[tokio::test]
    async fn delete_attempts_every_backend_and_keeps_last_error() {
        let a = Arc::new(MockStore::failing_deletes("a"));
        let b = Arc::new(MockStore::new("b"));
        b.insert("k", b"data");
        let store = MultiStore::new(vec![
            a.clone() as Arc<dyn LogStore>,
            b.clone() as Arc<dyn LogStore>,
        ]);

        let err = store.delete("k").await.unwrap_err();

        assert!(err.to_string().contains("a is down"));
        // The failure on `a` did not stop the attempt on `b`.
        assert_eq!(a.delete_calls.load(Ordering::SeqCst), 1);
        assert_eq!(b.delete_calls.load(Ordering::SeqCst), 1);
        assert!(b.get("k").await.is_err());
    }

    #[tokio::test]
    async fn delete_succeeds_when_all_backends_succeed() {
        let a = Arc::new(MockStore::new("a"));
        let b = Arc::new(MockStore::new("b"));
        let store = MultiStore::new(vec![a as Arc<dyn LogStore>, b as Arc<dyn LogStore>]);

        store.delete("missing-key").await.unwrap();
    }
}
