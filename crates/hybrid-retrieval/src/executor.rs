//! Retrieval Executor (C8): runs one of the six strategies against the
//! vector and graph adapters and hands the raw hit lists to the fuser.
//!
//! Each strategy is a different wiring of the same two calls
//! (`semantic_search`, `graph_search`) — sequential with feedback for the
//! `*_then_*` strategies, parallel for the balanced one, single-sided for
//! the `*_only` ones, and fan-out-then-accumulate for concept expansion.

use std::sync::Arc;
use std::time::Instant;

use hybrid_retrieval_core::error::EngineResult;
use hybrid_retrieval_core::models::{
    GraphNodeHit, GraphSearchMode, QueryAnalysis, SemanticHit, Strategy,
};
use hybrid_retrieval_core::traits::{GraphStoreAdapter, VectorStoreAdapter};

use crate::config::{ExecutorConfig, VectorStoreConfig};
use crate::embed_gateway::EmbeddingGateway;

/// Raw hits gathered for one query, before fusion.
pub struct ExecutionOutcome {
    pub semantic_hits: Vec<SemanticHit>,
    pub graph_hits: Vec<GraphNodeHit>,
    pub semantic_ms: Option<u64>,
    pub graph_ms: Option<u64>,
    /// Number of independent sub-queries issued (1 outside of
    /// `concept_expansion`, up to `expansion_count` within it).
    pub sub_query_count: usize,
}

pub struct RetrievalExecutor {
    vector_store: Arc<dyn VectorStoreAdapter>,
    graph_store: Arc<dyn GraphStoreAdapter>,
    embedding: Option<Arc<EmbeddingGateway>>,
    config: ExecutorConfig,
    vector_config: VectorStoreConfig,
}

impl RetrievalExecutor {
    pub fn new(
        vector_store: Arc<dyn VectorStoreAdapter>,
        graph_store: Arc<dyn GraphStoreAdapter>,
        embedding: Option<Arc<EmbeddingGateway>>,
        config: ExecutorConfig,
        vector_config: VectorStoreConfig,
    ) -> Self {
        Self {
            vector_store,
            graph_store,
            embedding,
            config,
            vector_config,
        }
    }

    pub fn batch_concurrency(&self) -> usize {
        self.config.batch_concurrency
    }

    pub async fn execute(
        &self,
        strategy: Strategy,
        analysis: &QueryAnalysis,
        source_filter: Option<&str>,
        limit: usize,
    ) -> EngineResult<ExecutionOutcome> {
        match strategy {
            Strategy::SemanticOnly => self.semantic_only(analysis, source_filter, limit).await,
            Strategy::GraphOnly => self.graph_only(analysis, limit).await,
            Strategy::HybridBalanced => self.hybrid_balanced(analysis, source_filter, limit).await,
            Strategy::SemanticThenGraph => self.semantic_then_graph(analysis, source_filter, limit).await,
            Strategy::GraphThenSemantic => self.graph_then_semantic(analysis, source_filter, limit).await,
            Strategy::ConceptExpansion => self.concept_expansion(analysis, source_filter, limit).await,
        }
    }

    /// Exposed so the engine can retry a single side after a mixed
    /// strategy fails, without re-deriving which adapter caused it.
    pub async fn semantic_search(
        &self,
        analysis: &QueryAnalysis,
        source_filter: Option<&str>,
        limit: usize,
    ) -> EngineResult<(Vec<SemanticHit>, u64)> {
        let start = Instant::now();
        let hits = match &self.embedding {
            Some(gateway) => {
                let embedded = gateway.embed(&[analysis.query.clone()]).await?;
                let query_vector = embedded.vectors.into_iter().next().unwrap_or_default();
                self.vector_store
                    .semantic_search(&query_vector, limit, source_filter, self.vector_config.similarity_threshold)
                    .await?
            }
            None => Vec::new(),
        };
        let semantic_hits = hits
            .into_iter()
            .map(|(chunk, score)| SemanticHit { chunk, score })
            .collect();
        Ok((semantic_hits, start.elapsed().as_millis() as u64))
    }

    /// Exposed for the same reason as [`Self::semantic_search`].
    pub async fn graph_search(
        &self,
        analysis: &QueryAnalysis,
        mode: GraphSearchMode,
        max_depth: usize,
        limit: usize,
    ) -> EngineResult<(Vec<GraphNodeHit>, u64)> {
        let start = Instant::now();
        let result = self.graph_store.search(&analysis.query, mode, max_depth, limit).await?;
        Ok((result.nodes, start.elapsed().as_millis() as u64))
    }

    async fn semantic_only(
        &self,
        analysis: &QueryAnalysis,
        source_filter: Option<&str>,
        limit: usize,
    ) -> EngineResult<ExecutionOutcome> {
        let (semantic_hits, semantic_ms) = self.semantic_search(analysis, source_filter, limit).await?;
        Ok(ExecutionOutcome {
            semantic_hits,
            graph_hits: Vec::new(),
            semantic_ms: Some(semantic_ms),
            graph_ms: None,
            sub_query_count: 1,
        })
    }

    async fn graph_only(&self, analysis: &QueryAnalysis, limit: usize) -> EngineResult<ExecutionOutcome> {
        let (graph_hits, graph_ms) = self.graph_search(analysis, GraphSearchMode::Document, 1, limit).await?;
        Ok(ExecutionOutcome {
            semantic_hits: Vec::new(),
            graph_hits,
            semantic_ms: None,
            graph_ms: Some(graph_ms),
            sub_query_count: 1,
        })
    }

    async fn hybrid_balanced(
        &self,
        analysis: &QueryAnalysis,
        source_filter: Option<&str>,
        limit: usize,
    ) -> EngineResult<ExecutionOutcome> {
        let (semantic_result, graph_result) = tokio::join!(
            self.semantic_search(analysis, source_filter, limit),
            self.graph_search(analysis, GraphSearchMode::Document, 1, limit),
        );
        let (semantic_hits, semantic_ms) = semantic_result?;
        let (graph_hits, graph_ms) = graph_result?;
        Ok(ExecutionOutcome {
            semantic_hits,
            graph_hits,
            semantic_ms: Some(semantic_ms),
            graph_ms: Some(graph_ms),
            sub_query_count: 1,
        })
    }

    /// Runs the semantic side once, then issues one concept-mode graph
    /// call per returned chunk over that chunk's own topic tags,
    /// accumulating every call's hits.
    async fn semantic_then_graph(
        &self,
        analysis: &QueryAnalysis,
        source_filter: Option<&str>,
        limit: usize,
    ) -> EngineResult<ExecutionOutcome> {
        let (semantic_hits, semantic_ms) = self.semantic_search(analysis, source_filter, limit).await?;

        let mut graph_hits: Vec<GraphNodeHit> = Vec::new();
        let mut graph_ms_total = 0u64;
        for hit in &semantic_hits {
            if hit.chunk.topic_tags.is_empty() {
                continue;
            }
            let tag_query = hit.chunk.topic_tags.iter().cloned().collect::<Vec<_>>().join(" ");
            let tag_analysis = QueryAnalysis {
                query: tag_query,
                ..analysis.clone()
            };
            let (hits, ms) = self
                .graph_search(&tag_analysis, GraphSearchMode::Concept, self.config.expansion_count, limit)
                .await?;
            graph_hits.extend(hits);
            graph_ms_total += ms;
        }

        Ok(ExecutionOutcome {
            semantic_hits,
            graph_hits: dedupe_graph_hits(graph_hits),
            semantic_ms: Some(semantic_ms),
            graph_ms: Some(graph_ms_total),
            sub_query_count: 1,
        })
    }

    /// Runs the graph side once, then issues one semantic call per
    /// returned node name, accumulating every call's hits.
    async fn graph_then_semantic(
        &self,
        analysis: &QueryAnalysis,
        source_filter: Option<&str>,
        limit: usize,
    ) -> EngineResult<ExecutionOutcome> {
        let (graph_hits, graph_ms) = self
            .graph_search(analysis, GraphSearchMode::Concept, self.config.expansion_count, limit)
            .await?;

        let mut semantic_hits: Vec<SemanticHit> = Vec::new();
        let mut semantic_ms_total = 0u64;
        for node in &graph_hits {
            let node_analysis = QueryAnalysis {
                query: node.name.clone(),
                ..analysis.clone()
            };
            let (hits, ms) = self.semantic_search(&node_analysis, source_filter, limit).await?;
            semantic_hits.extend(hits);
            semantic_ms_total += ms;
        }

        Ok(ExecutionOutcome {
            semantic_hits: dedupe_semantic_hits(semantic_hits),
            graph_hits,
            semantic_ms: Some(semantic_ms_total),
            graph_ms: Some(graph_ms),
            sub_query_count: 1,
        })
    }

    /// Runs up to `expansion_count` independent sub-queries — the
    /// original query plus concept/expansion enrichments — each against
    /// both adapters with a `limit / sub_query_count` budget, and
    /// accumulates every sub-query's hits.
    async fn concept_expansion(
        &self,
        analysis: &QueryAnalysis,
        source_filter: Option<&str>,
        limit: usize,
    ) -> EngineResult<ExecutionOutcome> {
        let m = self.config.expansion_count.max(1);
        let mut sub_queries: Vec<String> = vec![analysis.query.clone()];
        for concept in &analysis.detected_concepts {
            if sub_queries.len() >= m {
                break;
            }
            if !sub_queries.contains(concept) {
                sub_queries.push(concept.clone());
            }
        }
        for expansion in &analysis.suggested_expansions {
            if sub_queries.len() >= m {
                break;
            }
            if !sub_queries.contains(expansion) {
                sub_queries.push(expansion.clone());
            }
        }

        let per_query_limit = ((limit as f32) / (sub_queries.len() as f32)).ceil() as usize;
        let per_query_limit = per_query_limit.max(1);

        let mut semantic_hits: Vec<SemanticHit> = Vec::new();
        let mut graph_hits: Vec<GraphNodeHit> = Vec::new();
        let mut semantic_ms_total = 0u64;
        let mut graph_ms_total = 0u64;

        for query in &sub_queries {
            let sub_analysis = QueryAnalysis {
                query: query.clone(),
                ..analysis.clone()
            };
            let (s_result, g_result) = tokio::join!(
                self.semantic_search(&sub_analysis, source_filter, per_query_limit),
                self.graph_search(&sub_analysis, GraphSearchMode::Document, 1, per_query_limit),
            );
            let (s_hits, s_ms) = s_result?;
            let (g_hits, g_ms) = g_result?;
            semantic_hits.extend(s_hits);
            graph_hits.extend(g_hits);
            semantic_ms_total += s_ms;
            graph_ms_total += g_ms;
        }

        Ok(ExecutionOutcome {
            semantic_hits: dedupe_semantic_hits(semantic_hits),
            graph_hits: dedupe_graph_hits(graph_hits),
            semantic_ms: Some(semantic_ms_total),
            graph_ms: Some(graph_ms_total),
            sub_query_count: sub_queries.len(),
        })
    }
}

/// Merges hits for the same chunk id across multiple sub-query calls,
/// keeping the highest score seen.
fn dedupe_semantic_hits(hits: Vec<SemanticHit>) -> Vec<SemanticHit> {
    let mut by_id: std::collections::BTreeMap<String, SemanticHit> = std::collections::BTreeMap::new();
    for hit in hits {
        by_id
            .entry(hit.chunk.id.clone())
            .and_modify(|existing| {
                if hit.score > existing.score {
                    existing.score = hit.score;
                }
            })
            .or_insert(hit);
    }
    by_id.into_values().collect()
}

/// Merges hits for the same node id across multiple sub-query calls,
/// keeping the highest score seen.
fn dedupe_graph_hits(hits: Vec<GraphNodeHit>) -> Vec<GraphNodeHit> {
    let mut by_id: std::collections::BTreeMap<String, GraphNodeHit> = std::collections::BTreeMap::new();
    for hit in hits {
        by_id
            .entry(hit.id.clone())
            .and_modify(|existing| {
                if hit.score > existing.score {
                    existing.score = hit.score;
                }
            })
            .or_insert(hit);
    }
    by_id.into_values().collect()
}
