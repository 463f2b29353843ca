//! Object store sink.
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::PathBuf;
use tracing::debug;

use reportgen_core::{ReportError, Result};

const SINK: &str = "object_store";

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `bytes` under `bucket/key`; returns the object's location.
    async fn put(&self, bucket: &str, key: &str, bytes: &[u8], mime: &str) -> Result<String>;
}

/// Bucket names: 1-63 of `a-z 0-9 . - _`, starting with a letter or digit.
pub fn validate_bucket(bucket: &str) -> Result<()> {
    let valid = (1..=63).contains(&bucket.len())
        && bucket
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '-' | '_'))
        && bucket.starts_with(|c: char| c.is_ascii_alphanumeric());
    if valid {
        Ok(())
    } else {
        Err(ReportError::config(format!("invalid bucket name '{}'", bucket)))
    }
}

/// Keys are relative `/`-separated paths without `.` or `..` segments.
pub fn validate_key(key: &str) -> Result<()> {
    let bad = key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key.chars().any(char::is_control)
        || key.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..");
    if bad {
        Err(ReportError::config(format!("invalid object key '{}'", key)))
    } else {
        Ok(())
    }
}

/// Filesystem store: objects live at `<root>/<bucket>/<key>`.
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path_for(&self, bucket: &str, key: &str) -> PathBuf {
        key.split('/')
            .fold(self.root.join(bucket), |path, segment| path.join(segment))
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put(&self, bucket: &str, key: &str, bytes: &[u8], mime: &str) -> Result<String> {
        validate_bucket(bucket)?;
        validate_key(key)?;
        let path = self.path_for(bucket, key);

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_error)?;
        }
        // Readers never observe a partially written object.
        let partial = path.with_extension("partial");
        tokio::fs::write(&partial, bytes).await.map_err(io_error)?;
        tokio::fs::rename(&partial, &path).await.map_err(io_error)?;

        debug!(path = %path.display(), mime = %mime, bytes = bytes.len(), "object stored");
        Ok(format!("file://{}", path.display()))
    }
}

fn io_error(e: std::io::Error) -> ReportError {
    let transient = !matches!(e.kind(), ErrorKind::PermissionDenied | ErrorKind::InvalidInput);
    ReportError::delivery(SINK, e.to_string(), transient)
}
