//! Data model shared by every component: chunks, graph nodes and edges,
//! query analysis, and the unified search result record.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default embedding dimension when a deployment does not override it.
pub const DEFAULT_DIMENSIONS: usize = 1536;

/// A bounded slice of a document's text with its attached embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub source: String,
    pub source_url: Option<String>,
    pub title: Option<String>,
    pub text: String,
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub quality_score: f32,
    pub topic_tags: BTreeSet<String>,
    pub vector: Vec<f32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Chunk {
    /// `true` when the vector has exactly `dims` finite components.
    pub fn has_valid_vector(&self, dims: usize) -> bool {
        self.vector.len() == dims && self.vector.iter().all(|v| v.is_finite())
    }
}

/// A document in the knowledge graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentNode {
    pub id: String,
    pub source: String,
    pub url: Option<String>,
    pub title: Option<String>,
    pub content_hash: String,
    pub chunk_count: usize,
    pub quality_score: f32,
    pub topic_tags: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A canonical concept extracted from document text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConceptNode {
    /// Case-folded canonical name; the identity of the node.
    pub name: String,
    pub category: ConceptCategory,
    pub description: String,
    pub frequency: u64,
    pub confidence: f32,
    pub related_tags: BTreeSet<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConceptCategory {
    Technical,
    Framework,
    Topic,
}

/// The closed set of edge labels in the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EdgeLabel {
    RelatedTo,
    PartOfSameSource,
    ContainsConcept,
}

impl EdgeLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeLabel::RelatedTo => "RELATED_TO",
            EdgeLabel::PartOfSameSource => "PART_OF_SAME_SOURCE",
            EdgeLabel::ContainsConcept => "CONTAINS_CONCEPT",
        }
    }
}

/// A directed edge `(from_id, label, to_id)` with a strength and
/// label-specific properties.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub from_id: String,
    pub label: EdgeLabel,
    pub to_id: String,
    pub strength: f32,
    /// Label-specific properties (e.g. `shared_topics`, `topic_overlap`, `occurrences`).
    pub properties: serde_json::Value,
}

/// Metadata companion stored alongside every cache value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntryMeta {
    pub compressed: bool,
    pub size: usize,
    pub created_at: DateTime<Utc>,
    pub ttl_seconds: u64,
}

/// Cache behavior modes (§4.4).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheMode {
    #[default]
    LocalOnly,
    RemoteOnly,
    Hybrid,
    WriteThrough,
    WriteBack,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SerializationFormat {
    #[default]
    Json,
    Binary,
}

/// Query classification produced by the analyzer (§4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    General,
    Semantic,
    Relational,
    Exact,
}

/// Pure value object produced by `analyze(query)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryAnalysis {
    pub query: String,
    pub query_type: QueryType,
    pub detected_concepts: Vec<String>,
    pub suggested_expansions: Vec<String>,
    pub complexity: f32,
    pub semantic_weight: f32,
    pub graph_weight: f32,
}

/// Retrieval strategies accepted by the executor (§4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    SemanticOnly,
    GraphOnly,
    HybridBalanced,
    SemanticThenGraph,
    GraphThenSemantic,
    ConceptExpansion,
}

/// Fusion ranking strategies (§4.9).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankingStrategy {
    #[default]
    WeightedAverage,
    MaxScore,
    HarmonicMean,
    BordaCount,
    ReciprocalRank,
}

/// Graph search modes (§4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GraphSearchMode {
    Concept,
    Document,
    Path,
}

/// A single semantic hit before fusion: a chunk plus its cosine score.
#[derive(Debug, Clone)]
pub struct SemanticHit {
    pub chunk: Chunk,
    pub score: f32,
}

/// A single graph node hit before fusion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNodeHit {
    pub id: String,
    pub label: String,
    pub name: String,
    pub snippet: Option<String>,
    pub topic_tags: BTreeSet<String>,
    pub score: f32,
}

/// Result of a graph store `search` call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphSearchResult {
    pub nodes: Vec<GraphNodeHit>,
    pub edges: Vec<Edge>,
    /// Shortest paths found in `path` mode; each path is a sequence of node ids.
    pub paths: Vec<Vec<String>>,
}

/// One unified record per surfaced chunk or graph node (§3, §4.9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HybridSearchResult {
    pub id: String,
    pub title: Option<String>,
    pub source: String,
    pub snippet: String,
    pub semantic_score: f32,
    pub graph_score: f32,
    pub combined_score: f32,
    pub rank: usize,
    pub found_via: BTreeSet<String>,
}

/// Stats reported by the vector store adapter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VectorStoreStats {
    pub total: u64,
    pub by_source: std::collections::BTreeMap<String, u64>,
    pub avg_quality: f32,
    pub date_range: Option<(DateTime<Utc>, DateTime<Utc>)>,
}

/// Stats reported by the graph store adapter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphStoreStats {
    pub document_count: u64,
    pub concept_count: u64,
    pub edge_count: u64,
    pub avg_quality: f32,
    pub avg_strength: f32,
}

/// Metrics reported alongside every cache operation batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
    pub errors: u64,
    pub timeouts: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub avg_read_ms: f64,
    pub avg_write_ms: f64,
    pub circuit_trips: u64,
    pub effective_compression_ratio: f32,
}

impl CacheMetrics {
    pub fn hit_rate(&self) -> f32 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f32 / total as f32
        }
    }

    pub fn error_rate(&self) -> f32 {
        let total = self.hits + self.misses + self.errors;
        if total == 0 {
            0.0
        } else {
            self.errors as f32 / total as f32
        }
    }
}

/// A raw page record as handed to the ingestion pipeline (§4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageRecord {
    pub source: String,
    pub url: Option<String>,
    pub title: Option<String>,
    pub text: String,
    pub quality_score: f32,
    pub topic_tags: BTreeSet<String>,
}

/// Per-query metrics surfaced by the Hybrid Engine (§4.10, §7).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchMetrics {
    pub from_cache: bool,
    pub semantic_ms: Option<u64>,
    pub graph_ms: Option<u64>,
    pub total_ms: u64,
    pub overlap_count: usize,
    pub sub_query_count: usize,
    /// Populated when an adapter failed but the engine degraded instead of raising.
    pub degraded_from: Option<String>,
    /// Populated when both adapters failed; carries the tagged error kind.
    pub error: Option<String>,
}
