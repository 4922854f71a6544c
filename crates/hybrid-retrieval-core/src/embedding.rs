//! The embedding provider contract (C1) and the pure vector helpers used
//! everywhere a cosine similarity or a BLOB encoding is needed.
//!
//! The provider trait itself is defined here so both the core crate's
//! in-memory fakes and the native engine's real providers (OpenAI,
//! Ollama, local ONNX) can share one contract; batching, retry, and
//! degraded-mode policy live in the engine crate's embedding gateway,
//! which wraps whatever implements this trait.

use async_trait::async_trait;

use crate::error::EngineResult;

/// Result of a batched `embed` call.
#[derive(Debug, Clone)]
pub struct EmbedBatchResult {
    /// One vector per input text, same order, each of length [`EmbeddingProvider::dims`].
    pub vectors: Vec<Vec<f32>>,
    /// Set when the provider could not be reached and degraded mode was
    /// permitted: every vector is a zero vector and callers must treat
    /// this batch as unindexable rather than silently persisting it.
    pub degraded: bool,
}

/// `embed(texts) -> vectors`, batched internally by the caller.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn model_name(&self) -> &str;
    fn dims(&self) -> usize;

    /// Embeds a single already-batched group of texts. Implementations
    /// are not expected to sub-batch further; the gateway does that.
    async fn embed(&self, texts: &[String]) -> EngineResult<EmbedBatchResult>;
}

/// Cosine similarity between two vectors of equal length.
///
/// Returns `0.0` for empty vectors, mismatched lengths, or when either
/// vector has zero magnitude, rather than producing `NaN`.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || b.is_empty() || a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// Encodes a vector as little-endian `f32` bytes for BLOB storage.
pub fn vec_to_blob(v: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(v.len() * 4);
    for f in v {
        out.extend_from_slice(&f.to_le_bytes());
    }
    out
}

/// Decodes a little-endian `f32` BLOB back into a vector.
pub fn blob_to_vec(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// A zero vector of the given dimension, used for degraded-mode batches.
pub fn zero_vector(dims: usize) -> Vec<f32> {
    vec![0.0; dims]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_roundtrip() {
        let v = vec![0.1, -0.2, 3.5, 0.0];
        assert_eq!(blob_to_vec(&vec_to_blob(&v)), v);
    }

    #[test]
    fn cosine_identical_vectors_is_one() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_orthogonal_vectors_is_zero() {
        assert!((cosine_similarity(&[1.0, 0.0], &[0.0, 1.0])).abs() < 1e-6);
    }

    #[test]
    fn cosine_opposite_vectors_is_minus_one() {
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_empty_vectors_is_zero() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn cosine_different_lengths_is_zero() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0, 0.0, 0.0]), 0.0);
    }
}
