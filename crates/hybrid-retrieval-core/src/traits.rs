//! Capability-bound adapter traits for C2 (vector store), C3 (graph
//! store), and C4 (cache). The engine depends only on these traits, not
//! on any specific backend, so in-memory fakes (see [`crate::fakes`]) can
//! stand in for tests (§9 design note).

use async_trait::async_trait;

use crate::error::EngineResult;
use crate::models::{
    CacheMetrics, Chunk, DocumentNode, Edge, GraphSearchMode, GraphSearchResult, GraphStoreStats,
    VectorStoreStats,
};

/// C2: persists chunks with embeddings and answers cosine top-k queries.
#[async_trait]
pub trait VectorStoreAdapter: Send + Sync {
    /// Persists `chunks`, idempotent on chunk id. Callers are expected to
    /// pass at most `B` chunks per call; batching across a larger set is
    /// the caller's responsibility.
    async fn upsert_chunks(&self, chunks: &[Chunk]) -> EngineResult<()>;

    /// Returns up to `limit` chunks with cosine similarity to
    /// `query_vector` at or above `quality_threshold`, sorted descending,
    /// ties broken by descending quality then ascending chunk id.
    async fn semantic_search(
        &self,
        query_vector: &[f32],
        limit: usize,
        source_filter: Option<&str>,
        quality_threshold: f32,
    ) -> EngineResult<Vec<(Chunk, f32)>>;

    async fn get_chunks(
        &self,
        source: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> EngineResult<Vec<Chunk>>;

    async fn stats(&self) -> EngineResult<VectorStoreStats>;
}

/// C3: persists the document/concept graph and answers typed traversals.
#[async_trait]
pub trait GraphStoreAdapter: Send + Sync {
    async fn upsert_document(&self, document: &DocumentNode) -> EngineResult<()>;
    async fn upsert_concept(&self, concept: &crate::models::ConceptNode) -> EngineResult<()>;
    async fn upsert_edge(&self, edge: &Edge) -> EngineResult<()>;

    async fn search(
        &self,
        query: &str,
        mode: GraphSearchMode,
        max_depth: usize,
        limit: usize,
    ) -> EngineResult<GraphSearchResult>;

    async fn stats(&self) -> EngineResult<GraphStoreStats>;
}

/// C4: namespaced, TTL-bounded key/value storage with local and remote
/// tiers and a circuit breaker guarding the remote tier.
#[async_trait]
pub trait CacheProvider: Send + Sync {
    /// Returns `(value, found)`. A miss is not an error.
    async fn get(&self, key: &str, namespace: &str) -> EngineResult<(Option<Vec<u8>>, bool)>;

    async fn set(
        &self,
        key: &str,
        value: &[u8],
        namespace: &str,
        ttl_seconds: Option<u64>,
    ) -> EngineResult<()>;

    async fn delete(&self, key: &str, namespace: &str) -> EngineResult<()>;

    async fn exists(&self, key: &str, namespace: &str) -> EngineResult<bool>;

    /// Clears every key in `namespace`, returning the number removed.
    async fn clear_namespace(&self, namespace: &str) -> EngineResult<u64>;

    fn metrics(&self) -> CacheMetrics;
}
