//! Startup helpers: database connection with migrations and the blob store.

use std::path::Path;

use anyhow::Result;

use crate::config::Config;
use crate::services::blobstore::FsBlobStore;

/// Strip credentials from a database URL before logging it.
pub fn redact_db_url(db_url: &str) -> String {
    match url::Url::parse(db_url) {
        // `user:secret@host` parses as scheme `user` with an opaque path
        Ok(url) if !url.cannot_be_a_base() => {
            let host = url.host_str().unwrap_or("");
            let port_part = url.port().map(|p| format!(":{}", p)).unwrap_or_default();
            format!("{}://{}{}{}", url.scheme(), host, port_part, url.path())
        }
        _ => match db_url.rfind('@') {
            Some(at_pos) => format!("(redacted){}", &db_url[at_pos + 1..]),
            None => "(redacted)".to_string(),
        },
    }
}

/// Open the SQLite pool (creating the file and its directory) and run migrations.
pub async fn init_db(config: &Config) -> Result<sqlx::SqlitePool> {
    let db_url = &config.database.url;
    tracing::info!("Connecting to database: {}", redact_db_url(db_url));

    let db_path = db_url
        .strip_prefix("sqlite://")
        .or_else(|| db_url.strip_prefix("sqlite:"))
        .unwrap_or(db_url);

    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| {
                anyhow::anyhow!(
                    "Failed to create database directory {}: {}",
                    parent.display(),
                    e
                )
            })?;
        }
    }

    let connect_options = sqlx::sqlite::SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .foreign_keys(true);

    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect_with(connect_options)
        .await?;

    tracing::info!("Running database migrations");
    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}

/// Open the filesystem blob store configured by `BLOB_DIR`.
pub async fn init_blob_store(config: &Config, db: sqlx::SqlitePool) -> Result<FsBlobStore> {
    FsBlobStore::open(&config.blobs.dir, db)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to open blob store: {}", e))
}
