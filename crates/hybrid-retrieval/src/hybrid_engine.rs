//! Hybrid Engine (C10): the public entry point. Owns analyzer
//! memoization (§3 ownership note), consults the cache before running a
//! strategy, fuses raw hits into [`HybridSearchResult`]s, and degrades a
//! mixed strategy to a single-sided one when the chosen strategy fails
//! outright.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

use hybrid_retrieval_core::analyzer::analyze;
use hybrid_retrieval_core::error::EngineResult;
use hybrid_retrieval_core::fuse::fuse;
use hybrid_retrieval_core::models::{
    GraphSearchMode, HybridSearchResult, QueryAnalysis, SearchMetrics, Strategy,
};
use hybrid_retrieval_core::traits::CacheProvider;
use sha2::{Digest, Sha256};
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::config::FusionConfig;
use crate::executor::{ExecutionOutcome, RetrievalExecutor};

const CACHE_NAMESPACE: &str = "hybrid_search";

/// Static query-assistance terms merged into [`HybridEngine::suggest`],
/// independent of anything in the graph store.
const COMMON_SUGGESTION_TERMS: &[&str] = &[
    "documentation",
    "tutorial",
    "example",
    "reference",
    "guide",
    "configuration",
    "troubleshooting",
    "api",
];

pub struct HybridEngine {
    executor: RetrievalExecutor,
    cache: Option<Arc<dyn CacheProvider>>,
    fusion: FusionConfig,
    analyzer_memo: RwLock<HashMap<String, QueryAnalysis>>,
}

impl HybridEngine {
    pub fn new(executor: RetrievalExecutor, cache: Option<Arc<dyn CacheProvider>>, fusion: FusionConfig) -> Self {
        Self {
            executor,
            cache,
            fusion,
            analyzer_memo: RwLock::new(HashMap::new()),
        }
    }

    fn analyze_memoized(&self, query: &str) -> QueryAnalysis {
        if let Some(cached) = self.analyzer_memo.read().unwrap().get(query) {
            return cached.clone();
        }
        let analysis = analyze(query);
        self.analyzer_memo
            .write()
            .unwrap()
            .insert(query.to_string(), analysis.clone());
        analysis
    }

    fn cache_key(query: &str, strategy: Strategy, source_filter: Option<&str>, limit: usize) -> String {
        let mut hasher = Sha256::new();
        hasher.update(query.as_bytes());
        hasher.update(format!("{strategy:?}").as_bytes());
        hasher.update(source_filter.unwrap_or("").as_bytes());
        hasher.update(limit.to_le_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Runs a single query end to end, returning ranked results and
    /// per-query metrics. `limit` bounds both the per-adapter fan-out and
    /// the final fused result count.
    pub async fn search(
        &self,
        query: &str,
        strategy: Strategy,
        source_filter: Option<&str>,
        limit: usize,
    ) -> EngineResult<(Vec<HybridSearchResult>, SearchMetrics)> {
        let start = Instant::now();
        let key = Self::cache_key(query, strategy, source_filter, limit);

        if let Some(cache) = &self.cache {
            if let Ok((Some(bytes), true)) = cache.get(&key, CACHE_NAMESPACE).await {
                if let Ok(results) = serde_json::from_slice::<Vec<HybridSearchResult>>(&bytes) {
                    let mut metrics = SearchMetrics::default();
                    metrics.from_cache = true;
                    metrics.total_ms = start.elapsed().as_millis() as u64;
                    return Ok((results, metrics));
                }
            }
        }

        let analysis = self.analyze_memoized(query);
        let (outcome, degraded_from) = self
            .execute_with_fallback(strategy, &analysis, source_filter, limit)
            .await;

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(query, strategy = ?strategy, error = %e, "both adapters unavailable for this query");
                let mut metrics = SearchMetrics::default();
                metrics.total_ms = start.elapsed().as_millis() as u64;
                metrics.error = Some(e.to_string());
                return Ok((Vec::new(), metrics));
            }
        };

        let max_results = limit.min(self.fusion.max_results).max(1);
        let fusion_outcome = fuse(
            &outcome.semantic_hits,
            &outcome.graph_hits,
            self.fusion.vector_weight,
            self.fusion.graph_weight,
            self.fusion.ranking_strategy,
            max_results,
        );

        if let Some(cache) = &self.cache {
            if let Ok(bytes) = serde_json::to_vec(&fusion_outcome.results) {
                let _ = cache.set(&key, &bytes, CACHE_NAMESPACE, None).await;
            }
        }

        let mut metrics = SearchMetrics::default();
        metrics.semantic_ms = outcome.semantic_ms;
        metrics.graph_ms = outcome.graph_ms;
        metrics.total_ms = start.elapsed().as_millis() as u64;
        metrics.overlap_count = fusion_outcome.overlap_count;
        metrics.sub_query_count = outcome.sub_query_count;
        metrics.degraded_from = degraded_from;

        info!(query, strategy = ?strategy, results = fusion_outcome.results.len(), total_ms = metrics.total_ms, "search complete");
        Ok((fusion_outcome.results, metrics))
    }

    /// Runs `queries` concurrently, bounded by the executor's configured
    /// batch concurrency, and returns one outcome per query in order.
    pub async fn batch_search(
        &self,
        queries: &[String],
        strategy: Strategy,
        source_filter: Option<&str>,
        limit: usize,
    ) -> Vec<EngineResult<(Vec<HybridSearchResult>, SearchMetrics)>> {
        let semaphore = Semaphore::new(self.executor.batch_concurrency().max(1));
        let futures = queries.iter().map(|query| {
            let semaphore = &semaphore;
            async move {
                let _permit = semaphore.acquire().await.expect("semaphore is never closed");
                self.search(query, strategy, source_filter, limit).await
            }
        });
        futures::future::join_all(futures).await
    }

    /// Query assistance: a graph-store concept lookup over `partial_query`
    /// merged with the analyzer's detected concepts and suggested
    /// expansions and a small static term list, deduplicated and capped
    /// at 10.
    pub async fn suggest(&self, partial_query: &str) -> Vec<String> {
        let analysis = self.analyze_memoized(partial_query);
        let mut suggestions: Vec<String> = Vec::new();
        for concept in &analysis.detected_concepts {
            if !suggestions.contains(concept) {
                suggestions.push(concept.clone());
            }
        }
        for expansion in &analysis.suggested_expansions {
            if !suggestions.contains(expansion) {
                suggestions.push(expansion.clone());
            }
        }

        if let Ok((graph_hits, _ms)) = self
            .executor
            .graph_search(&analysis, GraphSearchMode::Concept, 1, 10)
            .await
        {
            for hit in graph_hits {
                if !suggestions.contains(&hit.name) {
                    suggestions.push(hit.name);
                }
            }
        }

        for term in COMMON_SUGGESTION_TERMS {
            if suggestions.len() >= 10 {
                break;
            }
            if !suggestions.iter().any(|s| s == term) {
                suggestions.push(term.to_string());
            }
        }

        suggestions.truncate(10);
        suggestions
    }

    /// Runs `strategy`; if it fails and is not already single-sided,
    /// retries semantic-only then graph-only before giving up.
    async fn execute_with_fallback(
        &self,
        strategy: Strategy,
        analysis: &QueryAnalysis,
        source_filter: Option<&str>,
        limit: usize,
    ) -> (EngineResult<ExecutionOutcome>, Option<String>) {
        let primary = self.executor.execute(strategy, analysis, source_filter, limit).await;
        match primary {
            Ok(outcome) => (Ok(outcome), None),
            Err(primary_err) if matches!(strategy, Strategy::SemanticOnly | Strategy::GraphOnly) => {
                (Err(primary_err), None)
            }
            Err(primary_err) => {
                if let Ok((semantic_hits, semantic_ms)) =
                    self.executor.semantic_search(analysis, source_filter, limit).await
                {
                    let outcome = ExecutionOutcome {
                        semantic_hits,
                        graph_hits: Vec::new(),
                        semantic_ms: Some(semantic_ms),
                        graph_ms: None,
                        sub_query_count: 1,
                    };
                    return (
                        Ok(outcome),
                        Some(format!("{strategy:?} failed ({primary_err}); degraded to semantic_only")),
                    );
                }
                match self.executor.execute(Strategy::GraphOnly, analysis, source_filter, limit).await {
                    Ok(outcome) => (
                        Ok(outcome),
                        Some(format!("{strategy:?} failed ({primary_err}); degraded to graph_only")),
                    ),
                    Err(_) => (Err(primary_err), None),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    use chrono::Utc;
    use hybrid_retrieval_core::fakes::{InMemoryCache, InMemoryGraphStore, InMemoryVectorStore};
    use hybrid_retrieval_core::models::{DocumentNode, Edge, EdgeLabel};
    use hybrid_retrieval_core::traits::GraphStoreAdapter;

    use crate::config::{ExecutorConfig, VectorStoreConfig};

    fn test_executor_config() -> ExecutorConfig {
        ExecutorConfig {
            top_k: 10,
            expansion_count: 2,
            batch_concurrency: 2,
            adapter_timeout_secs: 5,
            query_timeout_secs: 5,
        }
    }

    fn test_fusion_config() -> FusionConfig {
        FusionConfig {
            vector_weight: 0.6,
            graph_weight: 0.4,
            ranking_strategy: Default::default(),
            max_results: 20,
            enable_result_fusion: true,
            enable_concept_expansion: true,
        }
    }

    async fn seeded_engine() -> HybridEngine {
        let vector_store = Arc::new(InMemoryVectorStore::new());
        let graph_store = Arc::new(InMemoryGraphStore::new());
        let now = Utc::now();
        graph_store
            .upsert_document(&DocumentNode {
                id: "doc-1".into(),
                source: "docs".into(),
                url: None,
                title: Some("onboarding guide".into()),
                content_hash: "h".into(),
                chunk_count: 1,
                quality_score: 0.9,
                topic_tags: BTreeSet::new(),
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();
        graph_store
            .upsert_document(&DocumentNode {
                id: "doc-2".into(),
                source: "docs".into(),
                url: None,
                title: Some("onboarding checklist".into()),
                content_hash: "h".into(),
                chunk_count: 1,
                quality_score: 0.8,
                topic_tags: BTreeSet::new(),
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();
        graph_store
            .upsert_edge(&Edge {
                from_id: "doc-1".into(),
                label: EdgeLabel::RelatedTo,
                to_id: "doc-2".into(),
                strength: 0.5,
                properties: serde_json::json!({}),
            })
            .await
            .unwrap();

        let executor = RetrievalExecutor::new(
            vector_store,
            graph_store,
            None,
            test_executor_config(),
            VectorStoreConfig::default(),
        );
        HybridEngine::new(executor, Some(Arc::new(InMemoryCache::new())), test_fusion_config())
    }

    #[tokio::test]
    async fn graph_only_search_returns_results_and_populates_cache() {
        let engine = seeded_engine().await;
        let (results, metrics) = engine.search("onboarding", Strategy::GraphOnly, None, 10).await.unwrap();
        assert!(!results.is_empty());
        assert!(!metrics.from_cache);

        let (_, metrics_cached) = engine.search("onboarding", Strategy::GraphOnly, None, 10).await.unwrap();
        assert!(metrics_cached.from_cache);
    }

    #[tokio::test]
    async fn hybrid_balanced_is_not_degraded_when_embedding_is_simply_disabled() {
        let engine = seeded_engine().await;
        let (results, metrics) = engine
            .search("onboarding", Strategy::HybridBalanced, None, 10)
            .await
            .unwrap();
        // No embedding gateway is configured, so the semantic side returns
        // no hits rather than erroring; the graph side still contributes.
        assert!(!results.is_empty());
        assert!(metrics.degraded_from.is_none());
    }

    #[tokio::test]
    async fn suggest_merges_graph_concepts_with_common_terms_and_caps_at_ten() {
        let engine = seeded_engine().await;
        let suggestions = engine.suggest("how do I configure authentication").await;
        assert!(suggestions.len() <= 10);
        assert!(suggestions.iter().all(|s| !s.is_empty()));
        let unique: BTreeSet<&String> = suggestions.iter().collect();
        assert_eq!(unique.len(), suggestions.len());
    }

    #[tokio::test]
    async fn batch_search_returns_one_outcome_per_query_in_order() {
        let engine = seeded_engine().await;
        let queries = vec!["onboarding".to_string(), "checklist".to_string()];
        let outcomes = engine.batch_search(&queries, Strategy::GraphOnly, None, 10).await;
        assert_eq!(outcomes.len(), 2);
        for outcome in outcomes {
            assert!(outcome.is_ok());
        }
    }

    #[tokio::test]
    async fn path_mode_graph_search_is_exposed_for_direct_use() {
        let vector_store = Arc::new(InMemoryVectorStore::new());
        let graph_store = Arc::new(InMemoryGraphStore::new());
        let executor = RetrievalExecutor::new(
            vector_store,
            graph_store,
            None,
            test_executor_config(),
            VectorStoreConfig::default(),
        );
        let analysis = hybrid_retrieval_core::analyzer::analyze("anything");
        let (hits, _ms) = executor
            .graph_search(&analysis, GraphSearchMode::Document, 1, 10)
            .await
            .unwrap();
        assert!(hits.is_empty());
    }
}
