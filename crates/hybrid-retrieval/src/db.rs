//! SQLite connection pool setup shared by the vector and graph store
//! adapters.

use std::str::FromStr;

use hybrid_retrieval_core::error::{EngineError, EngineResult};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

use crate::config::DbConfig;

pub async fn connect(config: &DbConfig) -> EngineResult<SqlitePool> {
    if let Some(parent) = config.path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", config.path.display()))
        .map_err(|e| EngineError::backend("sqlite", e.to_string()))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(20)
        .connect_with(options)
        .await
        .map_err(|e| EngineError::NotConnected {
            backend: format!("sqlite: {e}"),
        })?;

    Ok(pool)
}
