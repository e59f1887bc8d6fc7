//! Blob store seam for archived logs.
//!
//! Keys are `/`-separated relative paths (see [`crate::key::DestinationKey`]).
//! Backends must tolerate concurrent calls on distinct keys; concurrent writes
//! to one key are last-writer-wins.

mod local;
mod s3;

pub use local::LocalStore;
pub use s3::S3Store;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by blob store backends.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("S3 error on {key}: {message}")]
    S3 { key: String, message: String },

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),
}

/// Key-addressed storage for archived logs.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Whether an object exists at exactly `key`.
    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// When the object at `key` was last written.
    async fn last_modified(&self, key: &str) -> Result<DateTime<Utc>, StoreError>;

    /// Remove `key`. Absent keys are not an error.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Create or overwrite `key`.
    async fn put(&self, key: &str, data: Bytes) -> Result<(), StoreError>;

    /// Prepare whatever hierarchy `key` lives under.
    async fn ensure_parent(&self, _key: &str) -> Result<(), StoreError> {
        Ok(())
    }

    /// All keys starting with `prefix` (empty prefix lists everything).
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    /// Human-readable location, for logs.
    fn describe(&self) -> String;
}

/// Errors parsing a destination argument.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DestinationError {
    #[error("Destination is empty")]
    Empty,

    #[error("S3 destination has no bucket: {0}")]
    MissingBucket(String),
}

/// Where archived logs are written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    /// A local folder
    Local(PathBuf),
    /// An S3 bucket with an optional key prefix
    S3 {
        bucket: String,
        prefix: Option<String>,
    },
}

impl Destination {
    /// Parse `s3://bucket[/prefix]` or a local folder path.
    pub fn parse(raw: &str) -> Result<Self, DestinationError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(DestinationError::Empty);
        }

        let Some(rest) = raw.strip_prefix("s3://") else {
            return Ok(Destination::Local(PathBuf::from(raw)));
        };

        let (bucket, prefix) = match rest.split_once('/') {
            Some((bucket, prefix)) => (bucket, prefix.trim_matches('/')),
            None => (rest, ""),
        };
        if bucket.is_empty() {
            return Err(DestinationError::MissingBucket(raw.to_string()));
        }

        Ok(Destination::S3 {
            bucket: bucket.to_string(),
            prefix: (!prefix.is_empty()).then(|| prefix.to_string()),
        })
    }

    /// Default directory for the run log: next to the archives for local
    /// destinations, `./logs` otherwise.
    pub fn default_log_dir(&self, date: &str) -> PathBuf {
        match self {
            Destination::Local(root) => root.join(date).join("logs"),
            Destination::S3 { .. } => PathBuf::from("logs"),
        }
    }
}
