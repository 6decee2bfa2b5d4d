//! Properties of a blob as reported by the object store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A single blob within the configured container.
///
/// The gateway never caches these; every read goes back to the store.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq, Eq)]
pub struct StoredObject {
    /// Full key (path-like, unique within the container).
    pub key: String,

    /// Content type recorded at upload time.
    pub content_type: String,

    /// Payload length in bytes.
    pub size_bytes: i64,

    /// Opaque version tag, changes on every overwrite.
    pub etag: String,

    /// When the blob was last written.
    pub last_modified: DateTime<Utc>,
}

impl StoredObject {
    /// Last path segment of the key, used as the download file name.
    pub fn file_name(&self) -> &str {
        self.key.rsplit('/').next().unwrap_or(&self.key)
    }

    /// Entity tag in its quoted HTTP form.
    pub fn quoted_etag(&self) -> String {
        format!("\"{}\"", self.etag)
    }
}
