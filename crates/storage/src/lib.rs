//! Object-storage layer for archived log blobs.
//!
//! Backends implement [`LogStore`]; [`MultiStore`] fans out across an
//! ordered list of them with primary-wins put semantics, first-hit gets,
//! and best-effort deletes. Works with any S3-compatible provider via
//! [`RemoteStore`] or a local directory via [`FsStore`].

pub mod fs;
pub mod multi;
pub mod remote;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use logvault_core::codec::{BlobMetadata, CodecError};
use uuid::Uuid;

pub use fs::FsStore;
pub use multi::{ArchivedObject, MultiStore};
pub use remote::{RemoteStore, S3Config};

/// Storage failures.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage: {0}")]
    Codec(#[from] CodecError),

    #[error("storage: {op} {path}: {source}")]
    Io {
        op: &'static str,
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("storage: key not found: {0}")]
    NotFound(String),

    #[error("storage: {provider}: {source}")]
    Remote {
        provider: String,
        #[source]
        source: object_store::Error,
    },

    #[error("storage: invalid backend config: {0}")]
    Config(String),

    #[error("storage: all providers failed, last error: {0}")]
    AllProvidersFailed(#[source] Box<StorageError>),
}

/// A single object-storage backend.
///
/// `put_logs` owns compression/hashing/keying (via the blob codec) so that
/// every backend stores byte-identical archives under identical keys.
/// `get` returns the stored bytes as written; verification operates on the
/// gzip bytes, never on decompressed plaintext.
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Compress, key, and store raw NDJSON for the given window.
    async fn put_logs(
        &self,
        customer_id: Uuid,
        zone_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        raw: &[u8],
        log_type: &str,
    ) -> Result<BlobMetadata, StorageError>;

    /// Fetch the stored (compressed) bytes of an archive.
    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError>;

    /// Remove an archive. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// Human-readable backend label recorded on the job row.
    fn provider(&self) -> &str;
}
