//! Concrete [`EmbeddingProvider`] implementations: OpenAI, Ollama, a
//! disabled stub, and (behind feature flags) local inference via
//! fastembed or tract. Retry and batching policy live in
//! [`crate::embed_gateway`]; providers make one call per `embed`
//! invocation and surface whatever the backend returned.

use async_trait::async_trait;
use hybrid_retrieval_core::embedding::{EmbedBatchResult, EmbeddingProvider};
use hybrid_retrieval_core::error::{EngineError, EngineResult};

use crate::config::EmbeddingConfig;

/// Returns an error on every call; selected when `embedding.provider = "disabled"`.
pub struct DisabledProvider;

#[async_trait]
impl EmbeddingProvider for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }

    fn dims(&self) -> usize {
        0
    }

    async fn embed(&self, _texts: &[String]) -> EngineResult<EmbedBatchResult> {
        Err(EngineError::EmbeddingUnavailable {
            message: "embedding provider is disabled".to_string(),
        })
    }
}

/// Calls `POST /v1/embeddings` on the OpenAI API.
pub struct OpenAiProvider {
    model: String,
    dims: usize,
    client: reqwest::Client,
    api_key: String,
}

impl OpenAiProvider {
    pub fn new(config: &EmbeddingConfig) -> EngineResult<Self> {
        let model = config.model.clone().ok_or_else(|| {
            EngineError::configuration("embedding.model is required for the openai provider")
        })?;
        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| {
            EngineError::configuration("OPENAI_API_KEY is not set")
        })?;
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| EngineError::configuration(format!("building http client: {e}")))?;
        Ok(Self {
            model,
            dims: config.dimensions,
            client,
            api_key,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> EngineResult<EmbedBatchResult> {
        let body = serde_json::json!({ "model": self.model, "input": texts });
        let response = self
            .client
            .post("https://api.openai.com/v1/embeddings")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| EngineError::backend("openai", e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(EngineError::backend(
                "openai",
                format!("HTTP {status}: {text}"),
            ));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| EngineError::backend("openai", e.to_string()))?;
        let vectors = parse_embedding_array(&json, "data", "embedding")?;
        Ok(EmbedBatchResult {
            vectors,
            degraded: false,
        })
    }
}

/// Calls `POST /api/embed` on a local Ollama instance.
pub struct OllamaProvider {
    model: String,
    dims: usize,
    url: String,
    client: reqwest::Client,
}

impl OllamaProvider {
    pub fn new(config: &EmbeddingConfig, url: Option<String>) -> EngineResult<Self> {
        let model = config.model.clone().ok_or_else(|| {
            EngineError::configuration("embedding.model is required for the ollama provider")
        })?;
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| EngineError::configuration(format!("building http client: {e}")))?;
        Ok(Self {
            model,
            dims: config.dimensions,
            url: url.unwrap_or_else(|| "http://localhost:11434".to_string()),
            client,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> EngineResult<EmbedBatchResult> {
        let body = serde_json::json!({ "model": self.model, "input": texts });
        let response = self
            .client
            .post(format!("{}/api/embed", self.url))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                EngineError::backend("ollama", format!("connecting to {}: {e}", self.url))
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(EngineError::backend(
                "ollama",
                format!("HTTP {status}: {text}"),
            ));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| EngineError::backend("ollama", e.to_string()))?;
        let vectors = parse_embedding_array(&json, "embeddings", "")?;
        Ok(EmbedBatchResult {
            vectors,
            degraded: false,
        })
    }
}

/// Shared response-parsing helper: both OpenAI's `data[].embedding` and
/// Ollama's flat `embeddings[]` shapes reduce to "array of number arrays".
fn parse_embedding_array(
    json: &serde_json::Value,
    array_key: &str,
    nested_key: &str,
) -> EngineResult<Vec<Vec<f32>>> {
    let array = json
        .get(array_key)
        .and_then(|v| v.as_array())
        .ok_or_else(|| EngineError::SchemaMismatch {
            message: format!("response missing `{array_key}` array"),
        })?;

    array
        .iter()
        .map(|item| {
            let values = if nested_key.is_empty() {
                item.as_array()
            } else {
                item.get(nested_key).and_then(|v| v.as_array())
            }
            .ok_or_else(|| EngineError::SchemaMismatch {
                message: "embedding entry was not a numeric array".to_string(),
            })?;
            Ok(values.iter().map(|v| v.as_f64().unwrap_or(0.0) as f32).collect())
        })
        .collect()
}

#[cfg(feature = "local-embeddings-fastembed")]
pub struct LocalFastembedProvider {
    model_name: String,
    dims: usize,
    model: tokio::sync::Mutex<fastembed::TextEmbedding>,
}

#[cfg(feature = "local-embeddings-fastembed")]
impl LocalFastembedProvider {
    pub fn new(config: &EmbeddingConfig) -> EngineResult<Self> {
        let model_name = config.model.clone().unwrap_or_else(|| "all-minilm-l6-v2".to_string());
        let fastembed_model = match model_name.as_str() {
            "all-minilm-l6-v2" => fastembed::EmbeddingModel::AllMiniLML6V2,
            "bge-small-en-v1.5" => fastembed::EmbeddingModel::BGESmallENV15,
            "bge-base-en-v1.5" => fastembed::EmbeddingModel::BGEBaseENV15,
            other => {
                return Err(EngineError::configuration(format!(
                    "unknown local embedding model: {other}"
                )))
            }
        };
        let model = fastembed::TextEmbedding::try_new(fastembed::InitOptions::new(fastembed_model))
            .map_err(|e| EngineError::backend("fastembed", e.to_string()))?;
        Ok(Self {
            model_name,
            dims: config.dimensions,
            model: tokio::sync::Mutex::new(model),
        })
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
#[async_trait]
impl EmbeddingProvider for LocalFastembedProvider {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> EngineResult<EmbedBatchResult> {
        let mut model = self.model.lock().await;
        let owned: Vec<String> = texts.to_vec();
        let vectors = model
            .embed(owned, None)
            .map_err(|e| EngineError::backend("fastembed", e.to_string()))?;
        Ok(EmbedBatchResult {
            vectors,
            degraded: false,
        })
    }
}

/// Pure-Rust ONNX inference via `tract-onnx`, used when the `ort`-backed
/// fastembed path isn't available for the target platform. Downloads
/// and caches its model/tokenizer on first use.
#[cfg(feature = "local-embeddings-tract")]
pub struct LocalTractProvider {
    model_name: String,
    dims: usize,
    client: reqwest::Client,
    batch_size: usize,
}

#[cfg(feature = "local-embeddings-tract")]
impl LocalTractProvider {
    pub fn new(config: &EmbeddingConfig) -> EngineResult<Self> {
        let model_name = config.model.clone().unwrap_or_else(|| "all-minilm-l6-v2".to_string());
        crate::local_tract::model_manifest(&model_name)?;
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| EngineError::configuration(format!("building http client: {e}")))?;
        Ok(Self {
            model_name,
            dims: config.dimensions,
            client,
            batch_size: config.batch_size,
        })
    }
}

#[cfg(feature = "local-embeddings-tract")]
#[async_trait]
impl EmbeddingProvider for LocalTractProvider {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> EngineResult<EmbedBatchResult> {
        let (onnx_path, tokenizer_path) = crate::local_tract::ensure_cached(&self.client, &self.model_name).await?;
        let texts = texts.to_vec();
        let dims = self.dims;
        let batch_size = self.batch_size;
        let vectors = tokio::task::spawn_blocking(move || {
            crate::local_tract::run_tract_embed(&onnx_path, &tokenizer_path, dims, batch_size, &texts)
        })
        .await
        .map_err(|e| EngineError::backend("tract", format!("blocking task panicked: {e}")))??;
        Ok(EmbedBatchResult {
            vectors,
            degraded: false,
        })
    }
}

/// Instantiates the provider named by `config.provider`. When both local
/// backends are compiled in, fastembed (backed by `ort`) takes priority
/// and tract is the fallback for platforms where `ort` doesn't build.
pub fn create_provider(config: &EmbeddingConfig) -> EngineResult<Box<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledProvider)),
        "openai" => Ok(Box::new(OpenAiProvider::new(config)?)),
        "ollama" => Ok(Box::new(OllamaProvider::new(config, None)?)),
        #[cfg(feature = "local-embeddings-fastembed")]
        "local" => Ok(Box::new(LocalFastembedProvider::new(config)?)),
        #[cfg(all(feature = "local-embeddings-tract", not(feature = "local-embeddings-fastembed")))]
        "local" => Ok(Box::new(LocalTractProvider::new(config)?)),
        #[cfg(not(any(feature = "local-embeddings-fastembed", feature = "local-embeddings-tract")))]
        "local" => Err(EngineError::configuration(
            "the local embedding provider requires building with --features local-embeddings-fastembed or local-embeddings-tract",
        )),
        other => Err(EngineError::configuration(format!(
            "unknown embedding.provider: {other}"
        ))),
    }
}
