//! Embedding gateway (C1): batches texts, bounds concurrent in-flight
//! batches with a semaphore, retries transient provider failures with
//! exponential backoff, and — when `allow_degraded` is set — falls back
//! to zero vectors instead of failing the whole call.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use hybrid_retrieval_core::embedding::{zero_vector, EmbedBatchResult, EmbeddingProvider};
use hybrid_retrieval_core::error::{EngineError, EngineResult};
use tokio::sync::Semaphore;
use tracing::warn;

use crate::config::EmbeddingConfig;

pub struct EmbeddingGateway {
    provider: Arc<dyn EmbeddingProvider>,
    config: EmbeddingConfig,
    semaphore: Arc<Semaphore>,
}

impl EmbeddingGateway {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, config: EmbeddingConfig) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_batches.max(1)));
        Self {
            provider,
            config,
            semaphore,
        }
    }

    pub fn dims(&self) -> usize {
        self.provider.dims()
    }

    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    /// Embeds `texts`, internally sub-batched to `config.batch_size` and
    /// run with at most `config.max_concurrent_batches` batches in flight.
    pub async fn embed(&self, texts: &[String]) -> EngineResult<EmbedBatchResult> {
        if texts.is_empty() {
            return Ok(EmbedBatchResult {
                vectors: Vec::new(),
                degraded: false,
            });
        }

        let batches: Vec<&[String]> = texts.chunks(self.config.batch_size.max(1)).collect();
        let futures = batches.into_iter().map(|batch| self.embed_one_batch(batch));
        let results = join_all(futures).await;

        let mut vectors = Vec::with_capacity(texts.len());
        let mut degraded = false;
        for result in results {
            let batch_result = result?;
            degraded |= batch_result.degraded;
            vectors.extend(batch_result.vectors);
        }

        Ok(EmbedBatchResult { vectors, degraded })
    }

    async fn embed_one_batch(&self, batch: &[String]) -> EngineResult<EmbedBatchResult> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .expect("semaphore is never closed");

        let owned: Vec<String> = batch.to_vec();
        let mut attempt = 0u32;
        loop {
            match self.provider.embed(&owned).await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    let delay = Duration::from_secs(1 << attempt.min(5));
                    warn!(attempt, error = %e, delay_secs = delay.as_secs(), "embedding batch failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) if self.config.allow_degraded => {
                    warn!(error = %e, "embedding provider unavailable, degrading to zero vectors");
                    return Ok(EmbedBatchResult {
                        vectors: owned.iter().map(|_| zero_vector(self.dims())).collect(),
                        degraded: true,
                    });
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl std::fmt::Debug for EmbeddingGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingGateway")
            .field("model", &self.provider.model_name())
            .field("dims", &self.provider.dims())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyProvider {
        fail_times: AtomicU32,
    }

    #[async_trait]
    impl EmbeddingProvider for FlakyProvider {
        fn model_name(&self) -> &str {
            "flaky"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed(&self, texts: &[String]) -> EngineResult<EmbedBatchResult> {
            if self.fail_times.fetch_sub(1, Ordering::SeqCst) > 0 {
                return Err(EngineError::Timeout { elapsed_ms: 1 });
            }
            Ok(EmbedBatchResult {
                vectors: texts.iter().map(|_| vec![1.0, 0.0]).collect(),
                degraded: false,
            })
        }
    }

    struct AlwaysFailsProvider;

    #[async_trait]
    impl EmbeddingProvider for AlwaysFailsProvider {
        fn model_name(&self) -> &str {
            "always-fails"
        }
        fn dims(&self) -> usize {
            3
        }
        async fn embed(&self, _texts: &[String]) -> EngineResult<EmbedBatchResult> {
            Err(EngineError::EmbeddingUnavailable {
                message: "down".to_string(),
            })
        }
    }

    fn test_config(max_retries: u32, allow_degraded: bool) -> EmbeddingConfig {
        EmbeddingConfig {
            provider: "test".to_string(),
            model: Some("test-model".to_string()),
            dimensions: 2,
            batch_size: 8,
            max_retries,
            timeout_secs: 5,
            max_concurrent_batches: 2,
            allow_degraded,
        }
    }

    #[tokio::test]
    async fn retries_transient_failures_until_success() {
        let provider = Arc::new(FlakyProvider {
            fail_times: AtomicU32::new(2),
        });
        let gateway = EmbeddingGateway::new(provider, test_config(5, false));
        let result = gateway.embed(&["a".to_string(), "b".to_string()]).await.unwrap();
        assert_eq!(result.vectors.len(), 2);
        assert!(!result.degraded);
    }

    #[tokio::test]
    async fn degrades_to_zero_vectors_when_allowed() {
        let gateway = EmbeddingGateway::new(Arc::new(AlwaysFailsProvider), test_config(1, true));
        let result = gateway.embed(&["a".to_string()]).await.unwrap();
        assert!(result.degraded);
        assert_eq!(result.vectors, vec![vec![0.0, 0.0, 0.0]]);
    }

    #[tokio::test]
    async fn propagates_error_when_degraded_mode_disallowed() {
        let gateway = EmbeddingGateway::new(Arc::new(AlwaysFailsProvider), test_config(0, false));
        let err = gateway.embed(&["a".to_string()]).await.unwrap_err();
        assert!(matches!(err, EngineError::EmbeddingUnavailable { .. }));
    }

    #[tokio::test]
    async fn empty_input_returns_empty_output_without_calling_provider() {
        let gateway = EmbeddingGateway::new(Arc::new(AlwaysFailsProvider), test_config(0, false));
        let result = gateway.embed(&[]).await.unwrap();
        assert!(result.vectors.is_empty());
        assert!(!result.degraded);
    }
}
