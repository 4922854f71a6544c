//! SQLite-backed [`VectorStoreAdapter`] (C2).
//!
//! No backend in this workspace's dependency stack has a native cosine
//! operator, so similarity is emulated: chunks are scanned in full and
//! scored in-process (§6, "the adapter MAY emulate cosine if the backend
//! lacks a native operator"). This is adequate at the corpus sizes this
//! engine targets; a production deployment swapping in a vector-capable
//! backend would implement the same trait without changing call sites.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use hybrid_retrieval_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use hybrid_retrieval_core::error::{EngineError, EngineResult};
use hybrid_retrieval_core::models::{Chunk, VectorStoreStats};
use hybrid_retrieval_core::traits::VectorStoreAdapter;
use sqlx::{Row, SqlitePool};

pub struct SqliteVectorStore {
    pool: SqlitePool,
    dims: usize,
    batch_size: usize,
}

impl SqliteVectorStore {
    pub fn new(pool: SqlitePool, dims: usize, batch_size: usize) -> Self {
        Self {
            pool,
            dims,
            batch_size,
        }
    }

    fn row_to_chunk(row: &sqlx::sqlite::SqliteRow) -> Chunk {
        let tags_json: String = row.get("topic_tags");
        let topic_tags: BTreeSet<String> = serde_json::from_str(&tags_json).unwrap_or_default();
        let vector_blob: Vec<u8> = row.get("vector");
        Chunk {
            id: row.get("id"),
            document_id: row.get("document_id"),
            source: row.get("source"),
            source_url: row.get("source_url"),
            title: row.get("title"),
            text: row.get("text"),
            chunk_index: row.get::<i64, _>("chunk_index") as usize,
            total_chunks: row.get::<i64, _>("total_chunks") as usize,
            quality_score: row.get("quality_score"),
            topic_tags,
            vector: blob_to_vec(&vector_blob),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }
}

#[async_trait::async_trait]
impl VectorStoreAdapter for SqliteVectorStore {
    async fn upsert_chunks(&self, chunks: &[Chunk]) -> EngineResult<()> {
        for batch in chunks.chunks(self.batch_size.max(1)) {
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| EngineError::backend("sqlite", e.to_string()))?;

            for chunk in batch {
                if chunk.vector.len() != self.dims {
                    return Err(EngineError::SchemaMismatch {
                        message: format!(
                            "chunk {} has a {}-dim vector, expected {}",
                            chunk.id,
                            chunk.vector.len(),
                            self.dims
                        ),
                    });
                }
                let tags_json = serde_json::to_string(&chunk.topic_tags)?;
                sqlx::query(
                    r#"
                    INSERT INTO document_chunks
                        (id, document_id, source, source_url, title, text, chunk_index,
                         total_chunks, quality_score, topic_tags, vector, created_at, updated_at)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    ON CONFLICT(id) DO UPDATE SET
                        document_id = excluded.document_id,
                        source = excluded.source,
                        source_url = excluded.source_url,
                        title = excluded.title,
                        text = excluded.text,
                        chunk_index = excluded.chunk_index,
                        total_chunks = excluded.total_chunks,
                        quality_score = excluded.quality_score,
                        topic_tags = excluded.topic_tags,
                        vector = excluded.vector,
                        updated_at = excluded.updated_at
                    "#,
                )
                .bind(&chunk.id)
                .bind(&chunk.document_id)
                .bind(&chunk.source)
                .bind(&chunk.source_url)
                .bind(&chunk.title)
                .bind(&chunk.text)
                .bind(chunk.chunk_index as i64)
                .bind(chunk.total_chunks as i64)
                .bind(chunk.quality_score)
                .bind(tags_json)
                .bind(vec_to_blob(&chunk.vector))
                .bind(chunk.created_at)
                .bind(chunk.updated_at)
                .execute(&mut *tx)
                .await
                .map_err(|e| EngineError::backend("sqlite", e.to_string()))?;
            }

            tx.commit()
                .await
                .map_err(|e| EngineError::backend("sqlite", e.to_string()))?;
        }
        Ok(())
    }

    async fn semantic_search(
        &self,
        query_vector: &[f32],
        limit: usize,
        source_filter: Option<&str>,
        quality_threshold: f32,
    ) -> EngineResult<Vec<(Chunk, f32)>> {
        if query_vector.len() != self.dims {
            return Err(EngineError::SchemaMismatch {
                message: format!(
                    "query vector has {} dims, expected {}",
                    query_vector.len(),
                    self.dims
                ),
            });
        }

        let rows = match source_filter {
            Some(source) => {
                sqlx::query("SELECT * FROM document_chunks WHERE source = ?")
                    .bind(source)
                    .fetch_all(&self.pool)
                    .await
            }
            None => sqlx::query("SELECT * FROM document_chunks").fetch_all(&self.pool).await,
        }
        .map_err(|e| EngineError::backend("sqlite", e.to_string()))?;

        let mut hits: Vec<(Chunk, f32)> = rows
            .iter()
            .map(Self::row_to_chunk)
            .map(|c| {
                let score = cosine_similarity(query_vector, &c.vector);
                (c, score)
            })
            .filter(|(_, score)| *score >= quality_threshold)
            .collect();

        hits.sort_by(|(ca, sa), (cb, sb)| {
            sb.partial_cmp(sa)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    cb.quality_score
                        .partial_cmp(&ca.quality_score)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| ca.id.cmp(&cb.id))
        });
        hits.truncate(limit);
        Ok(hits)
    }

    async fn get_chunks(
        &self,
        source: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> EngineResult<Vec<Chunk>> {
        let rows = match source {
            Some(source) => {
                sqlx::query(
                    "SELECT * FROM document_chunks WHERE source = ? ORDER BY id LIMIT ? OFFSET ?",
                )
                .bind(source)
                .bind(limit as i64)
                .bind(offset as i64)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query("SELECT * FROM document_chunks ORDER BY id LIMIT ? OFFSET ?")
                    .bind(limit as i64)
                    .bind(offset as i64)
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .map_err(|e| EngineError::backend("sqlite", e.to_string()))?;

        Ok(rows.iter().map(Self::row_to_chunk).collect())
    }

    async fn stats(&self) -> EngineResult<VectorStoreStats> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM document_chunks")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| EngineError::backend("sqlite", e.to_string()))?;

        let mut by_source: std::collections::BTreeMap<String, u64> = Default::default();
        let source_rows = sqlx::query("SELECT source, COUNT(*) as n FROM document_chunks GROUP BY source")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| EngineError::backend("sqlite", e.to_string()))?;
        for row in source_rows {
            let source: String = row.get("source");
            let n: i64 = row.get("n");
            by_source.insert(source, n as u64);
        }

        let avg_quality: Option<f64> = sqlx::query_scalar("SELECT AVG(quality_score) FROM document_chunks")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| EngineError::backend("sqlite", e.to_string()))?;

        let range: Option<(DateTime<Utc>, DateTime<Utc>)> = sqlx::query(
            "SELECT MIN(created_at) as lo, MAX(created_at) as hi FROM document_chunks",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| EngineError::backend("sqlite", e.to_string()))?
        .and_then(|row| {
            let lo: Option<DateTime<Utc>> = row.get("lo");
            let hi: Option<DateTime<Utc>> = row.get("hi");
            lo.zip(hi)
        });

        Ok(VectorStoreStats {
            total: total as u64,
            by_source,
            avg_quality: avg_quality.unwrap_or(0.0) as f32,
            date_range: range,
        })
    }
}
