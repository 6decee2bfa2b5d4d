use crate::routes::routes::BLOB_PREFIX;
use anyhow::{Context, Result, bail};
use clap::Parser;
use std::{env, path::PathBuf, time::Duration};

const DEFAULT_MAX_UPLOAD_BYTES: usize = 100 * 1024 * 1024;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub store: StoreConnection,
    pub container: String,
    pub root_prefix: String,
    pub jwt_secret: String,
    pub max_upload_bytes: usize,
    pub request_timeout: Duration,
}

/// Which object store backend the gateway talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Local,
    Memory,
}

/// Parsed object-store connection string.
///
/// Format: `Backend=local;StorageDir=./data/blobs;DatabaseUrl=sqlite://...;BlobEndpoint=http://...`.
/// Every key is optional; keys are case-insensitive and unknown keys are ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConnection {
    pub backend: BackendKind,
    pub storage_dir: PathBuf,
    pub database_url: String,
    pub blob_endpoint: String,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Upload gateway in front of a blob storage container")]
pub struct Args {
    /// Host to bind to (overrides UPLOAD_GATEWAY_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides UPLOAD_GATEWAY_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Object store connection string (overrides UPLOAD_GATEWAY_CONNECTION_STRING)
    #[arg(long)]
    pub connection_string: Option<String>,

    /// Container name (overrides UPLOAD_GATEWAY_CONTAINER)
    #[arg(long)]
    pub container: Option<String>,

    /// Top-level key prefix for uploads (overrides UPLOAD_GATEWAY_ROOT_PREFIX)
    #[arg(long)]
    pub root_prefix: Option<String>,

    /// HS256 secret used to verify bearer tokens (overrides UPLOAD_GATEWAY_JWT_SECRET)
    #[arg(long)]
    pub jwt_secret: Option<String>,

    /// Create the metadata schema and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();

        let env_host = env::var("UPLOAD_GATEWAY_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = parse_env("UPLOAD_GATEWAY_PORT", 3000u16)?;
        let port = args.port.unwrap_or(env_port);

        let connection_string = match args.connection_string {
            Some(value) => value,
            None => env::var("UPLOAD_GATEWAY_CONNECTION_STRING").unwrap_or_default(),
        };
        let store = StoreConnection::parse(&connection_string, port)
            .context("parsing object store connection string")?;

        let container = args
            .container
            .or_else(|| env::var("UPLOAD_GATEWAY_CONTAINER").ok())
            .unwrap_or_else(|| "uploads".into());
        validate_container_name(&container)?;

        let root_prefix = args
            .root_prefix
            .or_else(|| env::var("UPLOAD_GATEWAY_ROOT_PREFIX").ok())
            .unwrap_or_else(|| "Amauri".into());
        if root_prefix.is_empty() || root_prefix.contains('/') {
            bail!("root prefix `{}` must be a single non-empty path segment", root_prefix);
        }

        let jwt_secret = args
            .jwt_secret
            .or_else(|| env::var("UPLOAD_GATEWAY_JWT_SECRET").ok())
            .context("UPLOAD_GATEWAY_JWT_SECRET (or --jwt-secret) must be set")?;

        let max_upload_bytes =
            parse_env("UPLOAD_GATEWAY_MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES)?;
        let timeout_secs = parse_env(
            "UPLOAD_GATEWAY_REQUEST_TIMEOUT_SECS",
            DEFAULT_REQUEST_TIMEOUT_SECS,
        )?;

        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port,
            store,
            container,
            root_prefix,
            jwt_secret,
            max_upload_bytes,
            request_timeout: Duration::from_secs(timeout_secs),
        };

        Ok((cfg, args.migrate))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl StoreConnection {
    pub fn parse(raw: &str, port: u16) -> Result<Self> {
        let mut conn = Self {
            backend: BackendKind::Local,
            storage_dir: PathBuf::from("./data/blobs"),
            database_url: "sqlite://./data/meta/gateway.db".into(),
            blob_endpoint: format!("http://127.0.0.1:{}{}", port, BLOB_PREFIX),
        };

        for pair in raw.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .with_context(|| format!("expected `Key=Value`, got `{}`", pair))?;
            let value = value.trim();
            match key.trim().to_ascii_lowercase().as_str() {
                "backend" => {
                    conn.backend = match value.to_ascii_lowercase().as_str() {
                        "local" => BackendKind::Local,
                        "memory" => BackendKind::Memory,
                        other => bail!("unknown backend `{}`", other),
                    }
                }
                "storagedir" => conn.storage_dir = PathBuf::from(value),
                "databaseurl" => conn.database_url = value.to_string(),
                "blobendpoint" => conn.blob_endpoint = value.trim_end_matches('/').to_string(),
                other => tracing::debug!("ignoring connection string key `{}`", other),
            }
        }

        Ok(conn)
    }
}

fn parse_env<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}

/// Container names follow the blob-storage rules: 3-63 characters,
/// lowercase letters, digits and single hyphens, no leading/trailing hyphen.
pub fn validate_container_name(name: &str) -> Result<()> {
    if name.len() < 3 || name.len() > 63 {
        bail!("container `{}` must be between 3 and 63 characters", name);
    }
    if !name
        .chars()
        .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '-'))
    {
        bail!(
            "container `{}` may only contain lowercase letters, digits and hyphens",
            name
        );
    }
    if name.starts_with('-') || name.ends_with('-') || name.contains("--") {
        bail!("container `{}` has a misplaced hyphen", name);
    }
    Ok(())
}
