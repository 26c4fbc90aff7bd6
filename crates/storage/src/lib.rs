//! Storage layer: SQLite pool setup, migrations and row models for the tag database.

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use tracing::debug;

pub mod models;

/// Turns a bare file path into a sqlite URL; URLs pass through untouched.
pub fn database_url(database: &str) -> String {
    if database.starts_with("sqlite:") {
        return database.to_string();
    }
    let path = std::path::PathBuf::from(database);
    let norm = path.to_string_lossy().replace('\\', "/");
    if path.is_absolute() {
        format!("sqlite:///{}", norm.trim_start_matches('/'))
    } else {
        format!("sqlite://{}", norm)
    }
}

pub async fn connect(database: &str) -> anyhow::Result<SqlitePool> {
    if !database.starts_with("sqlite:") {
        if let Some(parent) = std::path::Path::new(database).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
    }
    let url = database_url(database);
    let options = SqliteConnectOptions::from_str(&url)?.create_if_missing(true);
    // In-memory databases are per-connection, so they must stay on a single one.
    let max_connections = if url.contains("memory") { 1 } else { 5 };
    debug!(%url, max_connections, "opening tag database");
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;
    Ok(pool)
}

/// Applies the migrations in crates/storage/migrations; idempotent.
pub async fn migrate(pool: &SqlitePool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn connect_and_migrate(database: &str) -> anyhow::Result<SqlitePool> {
    let pool = connect(database).await?;
    migrate(&pool).await?;
    Ok(pool)
}
