//! The object-store capability the gateway depends on.
//!
//! Both backends store flat, path-like keys inside a single container and
//! report `StoredObject` properties. The gateway only ever holds an
//! `Arc<dyn ObjectStore>` created once at startup.

use crate::models::stored_object::StoredObject;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use std::io;
use thiserror::Error;

/// Streaming payload going into or coming out of the store.
pub type ByteStream<'a> = BoxStream<'a, io::Result<Bytes>>;

const MAX_OBJECT_KEY_LEN: usize = 1024;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid object key `{0}`")]
    InvalidKey(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Create or overwrite `key` with the streamed payload.
    async fn put(&self, key: &str, content_type: &str, body: ByteStream<'_>) -> StoreResult<()>;

    /// Current properties of `key`, `None` when absent.
    async fn properties(&self, key: &str) -> StoreResult<Option<StoredObject>>;

    /// Open `key` for streaming reads.
    async fn get(&self, key: &str) -> StoreResult<Option<(StoredObject, ByteStream<'static>)>>;

    /// Remove `key`. Returns whether anything was deleted.
    async fn delete(&self, key: &str) -> StoreResult<bool>;

    /// Objects ordered by key, optionally restricted to a prefix and capped.
    async fn list(&self, prefix: Option<&str>, limit: Option<usize>)
        -> StoreResult<Vec<StoredObject>>;

    /// Cheap readiness probe.
    async fn ping(&self) -> StoreResult<()>;
}

/// Reject keys that could escape the container layout.
///
/// Keys must be non-empty, relative, free of control characters and
/// backslashes, and every `/`-separated segment must be a real name
/// (no empty, `.` or `..` segments).
pub fn ensure_key_safe(key: &str) -> StoreResult<()> {
    let invalid = || StoreError::InvalidKey(key.to_string());
    if key.is_empty() || key.len() > MAX_OBJECT_KEY_LEN {
        return Err(invalid());
    }
    if key
        .bytes()
        .any(|b| b.is_ascii_control() || b == b'\\')
    {
        return Err(invalid());
    }
    if key
        .split('/')
        .any(|segment| segment.is_empty() || segment == "." || segment == "..")
    {
        return Err(invalid());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_nested_keys() {
        assert!(ensure_key_safe("Amauri/Images/photo.JPG").is_ok());
        assert!(ensure_key_safe("notes..v2.pdf").is_ok());
    }

    #[test]
    fn rejects_traversal_and_odd_keys() {
        for key in [
            "",
            "/abs.png",
            "a//b.png",
            "a/../b.png",
            "./a.png",
            "a\\b.png",
            "a\nb.png",
            "dir/",
        ] {
            assert!(ensure_key_safe(key).is_err(), "{key:?} should be rejected");
        }
        assert!(ensure_key_safe(&"k".repeat(MAX_OBJECT_KEY_LEN + 1)).is_err());
    }
}
