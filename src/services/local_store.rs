//! LocalObjectStore — a blob container backed by SQLite for metadata and
//! local disk for payloads sharded beneath
//! `base_path/{container}/{shard}/{shard}/{key}`.

use crate::{
    config::StoreConnection,
    models::stored_object::StoredObject,
    services::object_store::{ByteStream, ObjectStore, StoreError, StoreResult, ensure_key_safe},
};
use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use md5::Context;
use sqlx::{
    QueryBuilder, SqlitePool,
    sqlite::{Sqlite, SqliteConnectOptions, SqlitePoolOptions},
};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
    sync::{Mutex, MutexGuard},
};
use tokio_util::io::ReaderStream;
use tracing::debug;
use uuid::Uuid;

const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");

/// Number of per-key lock stripes. Keys hash onto a stripe, so unrelated
/// keys occasionally share one.
const LOCK_STRIPES: usize = 64;

/// Attempts at creating the temp file when a concurrent delete prunes the
/// shard directory between `create_dir_all` and `File::create`.
const CREATE_ATTEMPTS: usize = 3;

/// Durable object store for a single container.
///
/// Overwrites are last-writer-wins: the payload is written to a temp file and
/// fsynced, then renamed over the previous one and the metadata row upserted
/// while the key's stripe lock is held. Readers take the same lock between
/// reading the row and opening the payload, so size and tag always describe
/// the bytes served.
#[derive(Clone)]
pub struct LocalObjectStore {
    /// Shared SQLite connection pool used for metadata operations.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where payloads are stored.
    pub base_path: PathBuf,

    container: String,

    locks: Arc<[Mutex<()>]>,
}

impl LocalObjectStore {
    pub fn new(db: Arc<SqlitePool>, base_path: impl Into<PathBuf>, container: &str) -> Self {
        Self {
            db,
            base_path: base_path.into(),
            container: container.to_string(),
            locks: (0..LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
        }
    }

    /// Open (creating when missing) the metadata database and storage
    /// directory named by `conn`, then apply the schema.
    pub async fn connect(conn: &StoreConnection, container: &str) -> StoreResult<Self> {
        fs::create_dir_all(&conn.storage_dir).await?;

        let options = SqliteConnectOptions::from_str(&conn.database_url)?.create_if_missing(true);
        if let Some(parent) = options.get_filename().parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).await?;
                debug!("created metadata directory {}", parent.display());
            }
        }

        let db = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self::new(Arc::new(db), conn.storage_dir.clone(), container);
        store.migrate().await?;
        Ok(store)
    }

    /// Apply the embedded schema. Every statement is idempotent.
    pub async fn migrate(&self) -> StoreResult<()> {
        let statements = SCHEMA
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        for stmt in statements {
            debug!("executing migration SQL: {}", stmt);
            sqlx::query(stmt).execute(&*self.db).await?;
        }
        Ok(())
    }

    fn container_root(&self) -> PathBuf {
        self.base_path.join(&self.container)
    }

    /// Two shard levels from MD5(container/key), keeping directories small.
    fn object_shards(container: &str, key: &str) -> (String, String) {
        let digest = md5::compute(format!("{}/{}", container, key));
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    fn object_path(&self, key: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::object_shards(&self.container, key);
        let mut path = self.container_root();
        path.push(shard_a);
        path.push(shard_b);
        path.push(key);
        path
    }

    /// Serialise metadata and payload changes for `key`.
    async fn lock_key(&self, key: &str) -> MutexGuard<'_, ()> {
        let digest = md5::compute(format!("{}/{}", self.container, key));
        let stripe = u16::from_be_bytes([digest[2], digest[3]]) as usize % self.locks.len();
        self.locks[stripe].lock().await
    }

    /// Create a fresh temp file in `parent`, recreating the directory if a
    /// concurrent delete pruned it.
    async fn create_temp_file(parent: &Path) -> StoreResult<(PathBuf, File)> {
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut attempt = 0;
        loop {
            fs::create_dir_all(parent).await?;
            match File::create(&tmp_path).await {
                Ok(file) => return Ok((tmp_path, file)),
                Err(err) if err.kind() == ErrorKind::NotFound && attempt + 1 < CREATE_ATTEMPTS => {
                    attempt += 1;
                    debug!("{} vanished while creating temp file, retrying", parent.display());
                }
                Err(err) => return Err(StoreError::Io(err)),
            }
        }
    }

    async fn fetch_object(&self, key: &str) -> StoreResult<Option<StoredObject>> {
        let row = sqlx::query_as::<_, StoredObject>(
            "SELECT key, content_type, size_bytes, etag, last_modified
             FROM blobs WHERE container = ? AND key = ?",
        )
        .bind(&self.container)
        .bind(key)
        .fetch_optional(&*self.db)
        .await?;
        Ok(row)
    }

    /// Remove empty directories from `start` up to (not including) `stop`.
    async fn prune_empty_dirs(&self, start: &Path, stop: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => match current.parent() {
                    Some(parent) => current = parent.to_path_buf(),
                    None => break,
                },
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put(&self, key: &str, content_type: &str, body: ByteStream<'_>) -> StoreResult<()> {
        ensure_key_safe(key)?;

        let file_path = self.object_path(key);
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            StoreError::Io(io::Error::other("object path missing parent directory"))
        })?;
        let (tmp_path, mut file) = Self::create_temp_file(&parent).await?;

        let mut size_bytes: i64 = 0;
        let mut digest = Context::new();
        let mut body = body;
        while let Some(chunk_res) = body.next().await {
            let chunk = match chunk_res {
                Ok(chunk) => chunk,
                Err(err) => {
                    let _ = fs::remove_file(&tmp_path).await;
                    return Err(StoreError::Io(err));
                }
            };
            size_bytes += chunk.len() as i64;
            digest.consume(&chunk);
            if let Err(err) = file.write_all(&chunk).await {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StoreError::Io(err));
            }
        }
        if let Err(err) = file.flush().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StoreError::Io(err));
        }
        if let Err(err) = file.sync_all().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StoreError::Io(err));
        }
        drop(file);

        // The temp file keeps `parent` non-empty, so pruning cannot remove it
        // from here on.
        let _guard = self.lock_key(key).await;
        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            if err.kind() == ErrorKind::AlreadyExists {
                fs::remove_file(&file_path).await?;
                fs::rename(&tmp_path, &file_path).await?;
            } else {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StoreError::Io(err));
            }
        }

        // The write time is folded into the tag so identical re-uploads
        // still produce a new version.
        let last_modified = Utc::now();
        digest.consume(last_modified.to_rfc3339().as_bytes());
        let etag = format!("{:x}", digest.compute());

        sqlx::query(
            r#"
            INSERT INTO blobs (container, key, content_type, size_bytes, etag, last_modified)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(container, key) DO UPDATE SET
                content_type = excluded.content_type,
                size_bytes = excluded.size_bytes,
                etag = excluded.etag,
                last_modified = excluded.last_modified
            "#,
        )
        .bind(&self.container)
        .bind(key)
        .bind(content_type)
        .bind(size_bytes)
        .bind(&etag)
        .bind(last_modified)
        .execute(&*self.db)
        .await?;

        debug!(key, size_bytes, etag = %etag, "stored payload");
        Ok(())
    }

    async fn properties(&self, key: &str) -> StoreResult<Option<StoredObject>> {
        ensure_key_safe(key)?;
        self.fetch_object(key).await
    }

    async fn get(&self, key: &str) -> StoreResult<Option<(StoredObject, ByteStream<'static>)>> {
        ensure_key_safe(key)?;
        let _guard = self.lock_key(key).await;
        let Some(object) = self.fetch_object(key).await? else {
            return Ok(None);
        };

        let file = match File::open(self.object_path(key)).await {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(key, "metadata present but payload missing");
                return Ok(None);
            }
            Err(err) => return Err(StoreError::Io(err)),
        };

        Ok(Some((object, ReaderStream::new(file).boxed())))
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        ensure_key_safe(key)?;
        let _guard = self.lock_key(key).await;

        let result = sqlx::query("DELETE FROM blobs WHERE container = ? AND key = ?")
            .bind(&self.container)
            .bind(key)
            .execute(&*self.db)
            .await?;

        let file_path = self.object_path(key);
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed physical file {}", file_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("file {} already missing", file_path.display());
            }
            Err(err) => return Err(StoreError::Io(err)),
        }

        if let Some(parent) = file_path.parent() {
            self.prune_empty_dirs(parent, &self.container_root()).await;
        }

        Ok(result.rows_affected() > 0)
    }

    async fn list(
        &self,
        prefix: Option<&str>,
        limit: Option<usize>,
    ) -> StoreResult<Vec<StoredObject>> {
        let mut builder = QueryBuilder::<Sqlite>::new(
            "SELECT key, content_type, size_bytes, etag, last_modified \
             FROM blobs WHERE container = ",
        );
        builder.push_bind(self.container.as_str());

        // substr instead of LIKE so `%` and `_` in prefixes match literally.
        if let Some(prefix) = prefix.filter(|p| !p.is_empty()) {
            builder.push(" AND substr(key, 1, ");
            builder.push_bind(prefix.chars().count() as i64);
            builder.push(") = ");
            builder.push_bind(prefix);
        }

        builder.push(" ORDER BY key ASC");
        if let Some(limit) = limit {
            builder.push(" LIMIT ");
            builder.push_bind(limit as i64);
        }

        let rows: Vec<StoredObject> = builder.build_query_as().fetch_all(&*self.db).await?;
        Ok(rows)
    }

    async fn ping(&self) -> StoreResult<()> {
        let value = sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&*self.db)
            .await?;
        if value != 1 {
            return Err(StoreError::Io(io::Error::other(format!(
                "unexpected probe result: {}",
                value
            ))));
        }

        let tmp_path = self.base_path.join(format!(".readyz-{}", Uuid::new_v4()));
        fs::write(&tmp_path, b"readyz").await?;
        let read_back = fs::read(&tmp_path).await;
        let _ = fs::remove_file(&tmp_path).await;
        if read_back? != b"readyz" {
            return Err(StoreError::Io(io::Error::other("probe file content mismatch")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendKind;
    use bytes::Bytes;
    use futures::stream;
    use tempfile::TempDir;

    fn body(parts: &[&'static [u8]]) -> ByteStream<'static> {
        stream::iter(
            parts
                .iter()
                .map(|p| Ok(Bytes::from_static(*p)))
                .collect::<Vec<_>>(),
        )
        .boxed()
    }

    async fn collect(mut stream: ByteStream<'static>) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(chunk) = stream.next().await {
            out.extend_from_slice(&chunk.unwrap());
        }
        out
    }

    fn connection(dir: &TempDir) -> StoreConnection {
        StoreConnection {
            backend: BackendKind::Local,
            storage_dir: dir.path().join("blobs"),
            database_url: format!("sqlite://{}", dir.path().join("meta/gateway.db").display()),
            blob_endpoint: "http://localhost/blobs".into(),
        }
    }

    async fn open(dir: &TempDir) -> LocalObjectStore {
        LocalObjectStore::connect(&connection(dir), "uploads")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn put_then_get_streams_payload_back() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;

        store
            .put("Amauri/Images/a.png", "image/png", body(&[b"he", b"llo"]))
            .await
            .unwrap();

        let props = store.properties("Amauri/Images/a.png").await.unwrap().unwrap();
        assert_eq!(props.size_bytes, 5);
        assert_eq!(props.content_type, "image/png");

        let (meta, stream) = store.get("Amauri/Images/a.png").await.unwrap().unwrap();
        assert_eq!(meta, props);
        assert_eq!(collect(stream).await, b"hello");
    }

    #[tokio::test]
    async fn overwrite_replaces_payload_and_etag() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;

        store.put("k/a.pdf", "application/pdf", body(&[b"one"])).await.unwrap();
        let first = store.properties("k/a.pdf").await.unwrap().unwrap();
        store.put("k/a.pdf", "application/pdf", body(&[b"two!"])).await.unwrap();
        let second = store.properties("k/a.pdf").await.unwrap().unwrap();

        assert_ne!(first.etag, second.etag);
        let (_, stream) = store.get("k/a.pdf").await.unwrap().unwrap();
        assert_eq!(collect(stream).await, b"two!");
        assert_eq!(store.list(None, None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn delete_is_idempotent_and_prunes_directories() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;

        store.put("k/a.zip", "application/zip", body(&[b"x"])).await.unwrap();
        let path = store.object_path("k/a.zip");
        assert!(path.exists());

        assert!(store.delete("k/a.zip").await.unwrap());
        assert!(!store.delete("k/a.zip").await.unwrap());
        assert!(!path.exists());
        assert!(!path.parent().unwrap().exists());
        assert!(store.get("k/a.zip").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_orders_by_key_and_filters_prefix_literally() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;

        for key in ["b/2.png", "a_/1.png", "ab/3.png", "b/1.png"] {
            store.put(key, "image/png", body(&[b"x"])).await.unwrap();
        }

        let all: Vec<_> = store
            .list(None, None)
            .await
            .unwrap()
            .into_iter()
            .map(|o| o.key)
            .collect();
        assert_eq!(all, ["a_/1.png", "ab/3.png", "b/1.png", "b/2.png"]);

        let under: Vec<_> = store
            .list(Some("a_"), None)
            .await
            .unwrap()
            .into_iter()
            .map(|o| o.key)
            .collect();
        assert_eq!(under, ["a_/1.png"]);

        assert_eq!(store.list(Some("b/"), Some(1)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn metadata_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = open(&dir).await;
            store.put("k/a.mov", "video/quicktime", body(&[b"abc"])).await.unwrap();
        }
        let reopened = open(&dir).await;
        let props = reopened.properties("k/a.mov").await.unwrap().unwrap();
        assert_eq!(props.size_bytes, 3);
    }

    #[tokio::test]
    async fn failed_stream_leaves_no_object() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;

        let failing: ByteStream<'static> = stream::iter(vec![
            Ok(Bytes::from_static(b"partial")),
            Err(io::Error::other("client went away")),
        ])
        .boxed();
        assert!(store.put("k/a.gif", "image/gif", failing).await.is_err());
        assert!(store.properties("k/a.gif").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unsafe_keys_are_rejected() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;
        let err = store
            .put("../escape.png", "image/png", body(&[b"x"]))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidKey(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_overwrites_keep_metadata_and_payload_in_step() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;
        let small: &'static [u8] = &[b's'; 10];
        let large: &'static [u8] = &[b'L'; 2000];

        for _ in 0..100 {
            let writers = [small, large].map(|payload| {
                let store = store.clone();
                tokio::spawn(async move {
                    store.put("k/a.png", "image/png", body(&[payload])).await
                })
            });
            for writer in writers {
                writer.await.unwrap().unwrap();
            }

            let props = store.properties("k/a.png").await.unwrap().unwrap();
            let on_disk = fs::metadata(store.object_path("k/a.png")).await.unwrap().len();
            assert_eq!(props.size_bytes as u64, on_disk);

            let (meta, stream) = store.get("k/a.png").await.unwrap().unwrap();
            assert_eq!(collect(stream).await.len() as i64, meta.size_bytes);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn delete_racing_put_leaves_row_and_payload_consistent() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;

        for _ in 0..100 {
            store.put("k/a.pdf", "application/pdf", body(&[b"old"])).await.unwrap();
            let deleter = {
                let store = store.clone();
                tokio::spawn(async move { store.delete("k/a.pdf").await })
            };
            let writer = {
                let store = store.clone();
                tokio::spawn(async move {
                    store.put("k/a.pdf", "application/pdf", body(&[b"newer"])).await
                })
            };
            deleter.await.unwrap().unwrap();
            writer.await.unwrap().unwrap();

            let path = store.object_path("k/a.pdf");
            match store.properties("k/a.pdf").await.unwrap() {
                Some(props) => {
                    assert_eq!(props.size_bytes, 5);
                    assert_eq!(fs::metadata(&path).await.unwrap().len(), 5);
                }
                None => assert!(!path.exists()),
            }
        }
    }

    #[tokio::test]
    async fn ping_checks_database_and_disk() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;
        store.ping().await.unwrap();
    }
}
