//! UploadGateway — validates uploads, derives their keys and delegates every
//! operation to the configured `ObjectStore`.
//!
//! The gateway keeps no state of its own between requests. Each operation is
//! at most two sequential store calls (upload, then property fetch).

use crate::{
    models::{
        dto::{BlobEntry, UploadResponse},
        stored_object::StoredObject,
    },
    services::{
        classification::{self, Folder},
        object_store::{ByteStream, ObjectStore, StoreError},
    },
};
use bytes::Bytes;
use chrono::SecondsFormat;
use futures::{StreamExt, future, stream};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use std::{io, sync::Arc};
use thiserror::Error;
use tracing::{info, warn};

/// Characters left as-is in blob URIs (RFC 3986 unreserved).
const KEY_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("no file was sent")]
    MissingFile,
    #[error("the uploaded file is empty")]
    EmptyFile,
    #[error("file type not allowed: `{0}`")]
    ExtensionNotAllowed(String),
    #[error("invalid file name `{0}`")]
    InvalidFileName(String),
    #[error("object `{0}` not found")]
    NotFound(String),
    /// Reading the request body failed before the store was involved.
    #[error("failed to read upload: {0}")]
    Payload(io::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Optional narrowing of a listing.
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub prefix: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Clone)]
pub struct UploadGateway {
    store: Arc<dyn ObjectStore>,
    root_prefix: String,
    container: String,
    blob_endpoint: String,
}

impl UploadGateway {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        root_prefix: impl Into<String>,
        container: impl Into<String>,
        blob_endpoint: impl Into<String>,
    ) -> Self {
        Self {
            store,
            root_prefix: root_prefix.into(),
            container: container.into(),
            blob_endpoint: blob_endpoint.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    /// `{root}/{folder}` — the folder path a classified upload lands in.
    pub fn folder_path(&self, folder: Folder) -> String {
        format!("{}/{}", self.root_prefix, folder)
    }

    /// Public URI of `key`, each path segment percent-encoded.
    pub fn blob_uri(&self, key: &str) -> String {
        let encoded = key
            .split('/')
            .map(|segment| utf8_percent_encode(segment, KEY_SEGMENT).to_string())
            .collect::<Vec<_>>()
            .join("/");
        format!("{}/{}/{}", self.blob_endpoint, self.container, encoded)
    }

    /// Validate, classify and store one uploaded file.
    ///
    /// The body is never buffered whole: the first non-empty chunk is read to
    /// reject empty uploads, then the stream is handed to the store intact.
    pub async fn upload_file(
        &self,
        file_name: &str,
        content_type: Option<&str>,
        body: ByteStream<'_>,
    ) -> GatewayResult<UploadResponse> {
        let mut body = body;
        let first = loop {
            match body.next().await {
                Some(Ok(chunk)) if chunk.is_empty() => continue,
                Some(Ok(chunk)) => break chunk,
                Some(Err(err)) => return Err(GatewayError::Payload(err)),
                None => {
                    warn!(file_name, "rejected empty upload");
                    return Err(GatewayError::EmptyFile);
                }
            }
        };

        let Some(folder) = classification::classify(file_name) else {
            warn!(file_name, "rejected upload with disallowed extension");
            return Err(GatewayError::ExtensionNotAllowed(
                classification::extension_of(file_name).unwrap_or_default(),
            ));
        };

        if file_name.contains(['/', '\\']) {
            return Err(GatewayError::InvalidFileName(file_name.to_string()));
        }

        let folder_path = self.folder_path(folder);
        let key = format!("{}/{}", folder_path, file_name);
        let content_type = content_type
            .filter(|ct| !ct.trim().is_empty())
            .unwrap_or(DEFAULT_CONTENT_TYPE);

        let body: ByteStream<'_> = stream::once(future::ready(Ok::<Bytes, io::Error>(first)))
            .chain(body)
            .boxed();
        match self.store.put(&key, content_type, body).await {
            Ok(()) => {}
            Err(StoreError::InvalidKey(_)) => {
                return Err(GatewayError::InvalidFileName(file_name.to_string()));
            }
            Err(err) => return Err(err.into()),
        }

        let props = self
            .store
            .properties(&key)
            .await?
            .ok_or_else(|| GatewayError::NotFound(key.clone()))?;

        info!(
            key = %props.key,
            size_bytes = props.size_bytes,
            etag = %props.etag,
            "stored upload"
        );

        Ok(UploadResponse {
            pasta_destino: folder_path,
            tipo_arquivo: content_type.to_string(),
            uri: self.blob_uri(&props.key),
            etag: props.quoted_etag(),
            last_modified: props
                .last_modified
                .to_rfc3339_opts(SecondsFormat::AutoSi, true),
            nome_blob: props.key,
        })
    }

    /// Open `key` for download. Absent objects are `NotFound`.
    pub async fn download_file(
        &self,
        key: &str,
    ) -> GatewayResult<(StoredObject, ByteStream<'static>)> {
        match self.store.get(key).await {
            Ok(Some(found)) => Ok(found),
            Ok(None) | Err(StoreError::InvalidKey(_)) => Err(GatewayError::NotFound(key.to_string())),
            Err(err) => Err(err.into()),
        }
    }

    /// Delete `key`; absence is not an error.
    pub async fn delete_file(&self, key: &str) -> GatewayResult<()> {
        match self.store.delete(key).await {
            Ok(existed) => {
                info!(key, existed, "delete requested");
                Ok(())
            }
            Err(StoreError::InvalidKey(_)) => {
                info!(key, existed = false, "delete requested");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Every object in the container (ordered by key), optionally narrowed.
    pub async fn list_files(&self, filter: &ListFilter) -> GatewayResult<Vec<BlobEntry>> {
        let objects = self
            .store
            .list(filter.prefix.as_deref(), filter.limit)
            .await?;

        Ok(objects
            .into_iter()
            .map(|object| BlobEntry {
                uri: self.blob_uri(&object.key),
                nome: object.key,
                tipo: object.content_type,
            })
            .collect())
    }
}
