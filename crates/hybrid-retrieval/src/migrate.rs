//! Idempotent schema setup for the vector store and graph store tables.
//!
//! `CREATE TABLE IF NOT EXISTS` throughout, matching the migration style
//! this engine's SQLite layer was adapted from: missing indices are
//! created unconditionally since `CREATE INDEX IF NOT EXISTS` is safe to
//! repeat, but a failure to create them is a non-fatal warning per §4.3
//! ("missing constraints at startup are a recoverable warning").

use hybrid_retrieval_core::error::{EngineError, EngineResult};
use sqlx::SqlitePool;
use tracing::warn;

pub async fn run_migrations(pool: &SqlitePool) -> EngineResult<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS document_chunks (
            id TEXT PRIMARY KEY,
            document_id TEXT NOT NULL,
            source TEXT NOT NULL,
            source_url TEXT,
            title TEXT,
            text TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            total_chunks INTEGER NOT NULL,
            quality_score REAL NOT NULL,
            topic_tags TEXT NOT NULL,
            vector BLOB NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(sqlx_err)?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            source TEXT NOT NULL,
            url TEXT,
            title TEXT,
            content_hash TEXT NOT NULL,
            chunk_count INTEGER NOT NULL,
            quality_score REAL NOT NULL,
            topic_tags TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(sqlx_err)?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS concepts (
            name TEXT PRIMARY KEY,
            category TEXT NOT NULL,
            description TEXT NOT NULL,
            frequency INTEGER NOT NULL,
            confidence REAL NOT NULL,
            related_tags TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(sqlx_err)?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS edges (
            from_id TEXT NOT NULL,
            label TEXT NOT NULL,
            to_id TEXT NOT NULL,
            strength REAL NOT NULL,
            properties TEXT NOT NULL,
            PRIMARY KEY (from_id, label, to_id)
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(sqlx_err)?;

    let index_statements = [
        "CREATE INDEX IF NOT EXISTS idx_chunks_document ON document_chunks(document_id)",
        "CREATE INDEX IF NOT EXISTS idx_chunks_source ON document_chunks(source)",
        "CREATE INDEX IF NOT EXISTS idx_chunks_quality ON document_chunks(quality_score)",
        "CREATE INDEX IF NOT EXISTS idx_documents_source ON documents(source)",
        "CREATE INDEX IF NOT EXISTS idx_documents_quality ON documents(quality_score)",
        "CREATE INDEX IF NOT EXISTS idx_concepts_category ON concepts(category)",
        "CREATE INDEX IF NOT EXISTS idx_concepts_frequency ON concepts(frequency)",
        "CREATE INDEX IF NOT EXISTS idx_edges_strength ON edges(strength)",
    ];
    for stmt in index_statements {
        if let Err(e) = sqlx::query(stmt).execute(pool).await {
            warn!(statement = stmt, error = %e, "index creation failed; continuing with existing schema");
        }
    }

    Ok(())
}

fn sqlx_err(e: sqlx::Error) -> EngineError {
    EngineError::backend("sqlite", e.to_string())
}
