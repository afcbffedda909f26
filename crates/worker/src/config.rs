//! Worker configuration loaded from environment variables.
//!
//! All knobs carry defaults suitable for local development; production
//! overrides them via `LOGVAULT_*` variables (`.env` files are honored by
//! the binary).

use std::collections::HashMap;
use std::time::Duration;

use logvault_storage::S3Config;

/// Configuration failures, reported once at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config: DATABASE_URL must be set")]
    MissingDatabaseUrl,

    #[error("config: {var} must be a number: {value}")]
    InvalidNumber { var: &'static str, value: String },

    #[error("config: LOGVAULT_KMS_KEYS must be a JSON object of key id -> hex key: {0}")]
    InvalidKmsKeys(String),

    #[error("config: no KMS key configured (set LOGVAULT_KMS_MASTER_KEY or LOGVAULT_KMS_KEYS)")]
    MissingKmsKey,

    #[error("config: unknown storage backend '{0}' (expected 'fs' or 's3')")]
    UnknownStorageBackend(String),
}

/// Upstream edge-platform settings shared by all workers.
#[derive(Debug, Clone)]
pub struct EdgeConfig {
    pub base_url: String,
    pub request_timeout: Duration,
    /// Upstream API requests per second across this process; `0` disables
    /// the limiter.
    pub rate_limit: f64,
}

/// Storage backend selection.
#[derive(Debug, Clone)]
pub enum StorageConfig {
    Fs {
        root: String,
    },
    S3 {
        primary: S3Config,
        secondary: Option<S3Config>,
    },
}

/// Full worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub database_url: String,
    pub storage: StorageConfig,
    pub edge: EdgeConfig,
    /// Scheduler tick interval.
    pub scheduler_interval: Duration,
    /// Total concurrent tasks across all queues.
    pub concurrency: usize,
    /// KMS key ring: key id -> 64-char hex key.
    pub kms_keys: HashMap<String, String>,
    pub kms_active_key: String,
    /// Empty disables Slack alerting (console fallback).
    pub slack_webhook_url: String,
    /// Bind address of the health endpoint.
    pub health_addr: String,
}

fn env_or(var: &str, default: &str) -> String {
    std::env::var(var).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T: std::str::FromStr>(var: &'static str, default: &str) -> Result<T, ConfigError> {
    let value = env_or(var, default);
    value.parse().map_err(|_| ConfigError::InvalidNumber {
        var,
        value,
    })
}

fn s3_from_env(prefix: &str, default_name: &str) -> S3Config {
    let var = |suffix: &str| format!("{prefix}_{suffix}");
    let mut name = env_or(&var("NAME"), "");
    if name.is_empty() {
        name = default_name.to_string();
    }
    S3Config {
        name,
        endpoint: env_or(&var("ENDPOINT"), ""),
        region: env_or(&var("REGION"), "us-east-1"),
        bucket: env_or(&var("BUCKET"), ""),
        access_key_id: env_or(&var("ACCESS_KEY_ID"), ""),
        secret_access_key: env_or(&var("SECRET_ACCESS_KEY"), ""),
    }
}

impl WorkerConfig {
    /// Load configuration from the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url =
            std::env::var("DATABASE_URL").map_err(|_| ConfigError::MissingDatabaseUrl)?;

        let storage = match env_or("LOGVAULT_STORAGE_BACKEND", "s3").as_str() {
            "fs" => StorageConfig::Fs {
                root: env_or("LOGVAULT_STORAGE_FS_ROOT", "./data/logs"),
            },
            "s3" => {
                let primary = s3_from_env("LOGVAULT_S3", "s3-primary");
                let secondary = s3_from_env("LOGVAULT_S3_SECONDARY", "s3-secondary");
                StorageConfig::S3 {
                    primary,
                    secondary: (!secondary.bucket.is_empty()).then_some(secondary),
                }
            }
            other => return Err(ConfigError::UnknownStorageBackend(other.to_string())),
        };

        let edge = EdgeConfig {
            base_url: env_or("LOGVAULT_EDGE_BASE_URL", logvault_edge::DEFAULT_BASE_URL),
            request_timeout: Duration::from_secs(parse_env(
                "LOGVAULT_EDGE_REQUEST_TIMEOUT_SECS",
                "30",
            )?),
            rate_limit: parse_env("LOGVAULT_EDGE_RATE_LIMIT", "0")?,
        };

        let kms_keys = Self::kms_keys_from_env()?;
        let kms_active_key = env_or("LOGVAULT_KMS_ACTIVE_KEY", logvault_kms::LEGACY_KEY_ID);

        Ok(Self {
            database_url,
            storage,
            edge,
            scheduler_interval: Duration::from_secs(parse_env(
                "LOGVAULT_SCHEDULER_INTERVAL_SECS",
                "60",
            )?),
            concurrency: parse_env("LOGVAULT_WORKER_CONCURRENCY", "10")?,
            kms_keys,
            kms_active_key,
            slack_webhook_url: env_or("LOGVAULT_SLACK_WEBHOOK_URL", ""),
            health_addr: env_or("LOGVAULT_HEALTH_ADDR", "0.0.0.0:8081"),
        })
    }

    /// Assemble the key ring map: `LOGVAULT_KMS_KEYS` is a JSON object of
    /// `key_id -> hex key`; the legacy single-key variable maps to `v1`
    /// when that id is not already present.
    fn kms_keys_from_env() -> Result<HashMap<String, String>, ConfigError> {
        let mut keys: HashMap<String, String> = match std::env::var("LOGVAULT_KMS_KEYS") {
            Ok(raw) if !raw.is_empty() => {
                serde_json::from_str(&raw).map_err(|e| ConfigError::InvalidKmsKeys(e.to_string()))?
            }
            _ => HashMap::new(),
        };

        if let Ok(legacy) = std::env::var("LOGVAULT_KMS_MASTER_KEY") {
            if !legacy.is_empty() {
                keys.entry(logvault_kms::LEGACY_KEY_ID.to_string())
                    .or_insert(legacy);
            }
        }

        if keys.is_empty() {
            return Err(ConfigError::MissingKmsKey);
        }
        Ok(keys)
    }
}
