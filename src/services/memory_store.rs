//! In-process object store. Used by tests and by `Backend=memory`
//! deployments where nothing needs to outlive the process.

use crate::{
    models::stored_object::StoredObject,
    services::object_store::{ByteStream, ObjectStore, StoreResult, ensure_key_safe},
};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::Utc;
use futures::{StreamExt, future, stream};
use std::{collections::BTreeMap, io};
use tokio::sync::RwLock;

struct MemoryBlob {
    object: StoredObject,
    data: Bytes,
}

#[derive(Default)]
struct Inner {
    blobs: BTreeMap<String, MemoryBlob>,
    generation: u64,
}

#[derive(Default)]
pub struct MemoryObjectStore {
    inner: RwLock<Inner>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, key: &str, content_type: &str, body: ByteStream<'_>) -> StoreResult<()> {
        ensure_key_safe(key)?;

        // Drain the stream before taking the lock so a slow client never
        // blocks readers.
        let mut buf = BytesMut::new();
        let mut body = body;
        while let Some(chunk) = body.next().await {
            buf.extend_from_slice(&chunk?);
        }
        let data = buf.freeze();

        let mut inner = self.inner.write().await;
        inner.generation += 1;
        let object = StoredObject {
            key: key.to_string(),
            content_type: content_type.to_string(),
            size_bytes: data.len() as i64,
            etag: format!("0x{:016X}", inner.generation),
            last_modified: Utc::now(),
        };
        inner
            .blobs
            .insert(key.to_string(), MemoryBlob { object, data });
        Ok(())
    }

    async fn properties(&self, key: &str) -> StoreResult<Option<StoredObject>> {
        ensure_key_safe(key)?;
        let inner = self.inner.read().await;
        Ok(inner.blobs.get(key).map(|blob| blob.object.clone()))
    }

    async fn get(&self, key: &str) -> StoreResult<Option<(StoredObject, ByteStream<'static>)>> {
        ensure_key_safe(key)?;
        let inner = self.inner.read().await;
        Ok(inner.blobs.get(key).map(|blob| {
            let data = blob.data.clone();
            let body: ByteStream<'static> =
                stream::once(future::ready(Ok::<_, io::Error>(data))).boxed();
            (blob.object.clone(), body)
        }))
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        ensure_key_safe(key)?;
        let mut inner = self.inner.write().await;
        Ok(inner.blobs.remove(key).is_some())
    }

    async fn list(
        &self,
        prefix: Option<&str>,
        limit: Option<usize>,
    ) -> StoreResult<Vec<StoredObject>> {
        let inner = self.inner.read().await;
        let prefix = prefix.unwrap_or("");
        Ok(inner
            .blobs
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .take(limit.unwrap_or(usize::MAX))
            .map(|(_, blob)| blob.object.clone())
            .collect())
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}
