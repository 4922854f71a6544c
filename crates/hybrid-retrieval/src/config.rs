//! Engine configuration: one immutable value, loaded once from a TOML
//! file, threaded explicitly through every component's constructor.
//!
//! Mirrors the nested-table layout (`[db]`, `[chunking]`, `[retrieval]`,
//! `[embedding]`) this engine's chunker and query pipeline were adapted
//! from, extended with `[vector_store]`, `[graph_store]`, `[cache]`, and
//! `[fusion]` tables for the components this crate adds.

use std::path::{Path, PathBuf};

use hybrid_retrieval_core::error::{EngineError, EngineResult};
use hybrid_retrieval_core::models::{CacheMode, RankingStrategy, SerializationFormat};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub vector_store: VectorStoreConfig,
    #[serde(default)]
    pub graph_store: GraphStoreConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub fusion: FusionConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbConfig {
    pub path: PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("hybrid-retrieval.db"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
}

fn default_max_tokens() -> usize {
    512
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorStoreConfig {
    #[serde(default = "default_batch_size")]
    pub upsert_batch_size: usize,
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
    #[serde(default = "default_semantic_limit")]
    pub semantic_limit: usize,
}

fn default_batch_size() -> usize {
    100
}
fn default_similarity_threshold() -> f32 {
    0.5
}
fn default_semantic_limit() -> usize {
    20
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            upsert_batch_size: default_batch_size(),
            similarity_threshold: default_similarity_threshold(),
            semantic_limit: default_semantic_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphStoreConfig {
    #[serde(default = "default_graph_depth")]
    pub max_depth: usize,
    #[serde(default = "default_graph_limit")]
    pub graph_limit: usize,
    #[serde(default = "default_related_to_threshold")]
    pub related_to_threshold: f32,
    #[serde(default = "default_part_of_source_strength")]
    pub part_of_same_source_strength: f32,
}

fn default_graph_depth() -> usize {
    3
}
fn default_graph_limit() -> usize {
    20
}
fn default_related_to_threshold() -> f32 {
    0.3
}
fn default_part_of_source_strength() -> f32 {
    0.5
}

impl Default for GraphStoreConfig {
    fn default() -> Self {
        Self {
            max_depth: default_graph_depth(),
            graph_limit: default_graph_limit(),
            related_to_threshold: default_related_to_threshold(),
            part_of_same_source_strength: default_part_of_source_strength(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub mode: CacheMode,
    #[serde(default)]
    pub serialization_format: SerializationFormat,
    #[serde(default = "default_ttl")]
    pub default_ttl_seconds: u64,
    #[serde(default = "default_compression_threshold")]
    pub compression_threshold_bytes: usize,
    #[serde(default = "default_max_value_size_mb")]
    pub max_value_size_mb: usize,
    #[serde(default = "default_local_capacity")]
    pub local_capacity_entries: u64,
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    #[serde(default = "default_max_key_len")]
    pub max_key_len: usize,
    #[serde(default = "default_circuit_threshold")]
    pub circuit_breaker_threshold: u32,
    #[serde(default = "default_circuit_timeout")]
    pub circuit_breaker_timeout_seconds: u64,
    pub redis_url: Option<String>,
}

fn default_ttl() -> u64 {
    3600
}
fn default_compression_threshold() -> usize {
    8 * 1024
}
fn default_max_value_size_mb() -> usize {
    16
}
fn default_local_capacity() -> u64 {
    10_000
}
fn default_key_prefix() -> String {
    "hre".to_string()
}
fn default_max_key_len() -> usize {
    200
}
fn default_circuit_threshold() -> u32 {
    3
}
fn default_circuit_timeout() -> u64 {
    60
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            mode: CacheMode::LocalOnly,
            serialization_format: SerializationFormat::Json,
            default_ttl_seconds: default_ttl(),
            compression_threshold_bytes: default_compression_threshold(),
            max_value_size_mb: default_max_value_size_mb(),
            local_capacity_entries: default_local_capacity(),
            key_prefix: default_key_prefix(),
            max_key_len: default_max_key_len(),
            circuit_breaker_threshold: default_circuit_threshold(),
            circuit_breaker_timeout_seconds: default_circuit_timeout(),
            redis_url: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    pub model: Option<String>,
    #[serde(default = "default_dimensions")]
    pub dimensions: usize,
    #[serde(default = "default_embed_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_concurrency")]
    pub max_concurrent_batches: usize,
    #[serde(default)]
    pub allow_degraded: bool,
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_dimensions() -> usize {
    hybrid_retrieval_core::models::DEFAULT_DIMENSIONS
}
fn default_embed_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_concurrency() -> usize {
    4
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dimensions: default_dimensions(),
            batch_size: default_embed_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            max_concurrent_batches: default_concurrency(),
            allow_degraded: false,
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusionConfig {
    #[serde(default = "default_semantic_weight")]
    pub vector_weight: f32,
    #[serde(default = "default_graph_weight")]
    pub graph_weight: f32,
    #[serde(default)]
    pub ranking_strategy: RankingStrategy,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    #[serde(default = "default_true")]
    pub enable_result_fusion: bool,
    #[serde(default = "default_true")]
    pub enable_concept_expansion: bool,
}

fn default_semantic_weight() -> f32 {
    0.6
}
fn default_graph_weight() -> f32 {
    0.4
}
fn default_max_results() -> usize {
    12
}
fn default_true() -> bool {
    true
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            vector_weight: default_semantic_weight(),
            graph_weight: default_graph_weight(),
            ranking_strategy: RankingStrategy::WeightedAverage,
            max_results: default_max_results(),
            enable_result_fusion: true,
            enable_concept_expansion: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_expansion_count")]
    pub expansion_count: usize,
    #[serde(default = "default_batch_concurrency")]
    pub batch_concurrency: usize,
    #[serde(default = "default_adapter_timeout")]
    pub adapter_timeout_secs: u64,
    #[serde(default = "default_query_timeout")]
    pub query_timeout_secs: u64,
}

fn default_top_k() -> usize {
    5
}
fn default_expansion_count() -> usize {
    5
}
fn default_batch_concurrency() -> usize {
    8
}
fn default_adapter_timeout() -> u64 {
    30
}
fn default_query_timeout() -> u64 {
    60
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            expansion_count: default_expansion_count(),
            batch_concurrency: default_batch_concurrency(),
            adapter_timeout_secs: default_adapter_timeout(),
            query_timeout_secs: default_query_timeout(),
        }
    }
}

/// Loads and validates configuration from a TOML file.
pub fn load_config(path: impl AsRef<Path>) -> EngineResult<Config> {
    let text = std::fs::read_to_string(path.as_ref()).map_err(|e| {
        EngineError::configuration(format!("reading {}: {e}", path.as_ref().display()))
    })?;
    let config: Config = toml::from_str(&text)
        .map_err(|e| EngineError::configuration(format!("parsing config: {e}")))?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> EngineResult<()> {
    if config.chunking.max_tokens == 0 {
        return Err(EngineError::configuration("chunking.max_tokens must be > 0"));
    }
    if config.fusion.max_results == 0 {
        return Err(EngineError::configuration("fusion.max_results must be >= 1"));
    }
    let weight_sum = config.fusion.vector_weight + config.fusion.graph_weight;
    if (weight_sum - 1.0).abs() > 1e-3 {
        return Err(EngineError::configuration(
            "fusion.vector_weight + fusion.graph_weight must sum to 1",
        ));
    }
    if config.embedding.is_enabled() {
        if config.embedding.model.is_none() {
            return Err(EngineError::configuration(
                "embedding.model is required when embedding.provider is not \"disabled\"",
            ));
        }
        if !["openai", "ollama", "local"].contains(&config.embedding.provider.as_str()) {
            return Err(EngineError::configuration(format!(
                "unknown embedding.provider: {}",
                config.embedding.provider
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = Config {
            db: DbConfig::default(),
            chunking: ChunkingConfig::default(),
            vector_store: VectorStoreConfig::default(),
            graph_store: GraphStoreConfig::default(),
            cache: CacheConfig::default(),
            embedding: EmbeddingConfig::default(),
            fusion: FusionConfig::default(),
            executor: ExecutorConfig::default(),
        };
        validate(&config).unwrap();
    }

    #[test]
    fn weights_must_sum_to_one() {
        let mut config_fusion = FusionConfig::default();
        config_fusion.graph_weight = 0.9;
        let config = Config {
            db: DbConfig::default(),
            chunking: ChunkingConfig::default(),
            vector_store: VectorStoreConfig::default(),
            graph_store: GraphStoreConfig::default(),
            cache: CacheConfig::default(),
            embedding: EmbeddingConfig::default(),
            fusion: config_fusion,
            executor: ExecutorConfig::default(),
        };
        assert!(validate(&config).is_err());
    }

    #[test]
    fn enabled_embedding_requires_model() {
        let mut embedding = EmbeddingConfig::default();
        embedding.provider = "openai".to_string();
        let config = Config {
            db: DbConfig::default(),
            chunking: ChunkingConfig::default(),
            vector_store: VectorStoreConfig::default(),
            graph_store: GraphStoreConfig::default(),
            cache: CacheConfig::default(),
            embedding,
            fusion: FusionConfig::default(),
            executor: ExecutorConfig::default(),
        };
        assert!(validate(&config).is_err());
    }
}
