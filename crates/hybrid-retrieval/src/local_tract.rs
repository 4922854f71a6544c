//! Pure-Rust local embedding inference via `tract-onnx` (fallback for
//! platforms where the `fastembed`/`ort` path is unavailable, e.g. musl
//! or Intel Mac). Tokenizes with `tokenizers`, runs inference with
//! `tract-onnx` inside `spawn_blocking`; no ONNX Runtime or system deps.

use std::path::{Path, PathBuf};

use hybrid_retrieval_core::error::{EngineError, EngineResult};
use tract_onnx::prelude::*;

const ALL_MINILM_REPO: &str = "sentence-transformers/all-MiniLM-L6-v2";
const ALL_MINILM_DIMS: usize = 384;
const DEFAULT_MAX_LEN: usize = 256;

/// Model manifest: name -> (onnx path in repo, tokenizer path in repo, dims).
pub fn model_manifest(model_name: &str) -> EngineResult<(&'static str, &'static str, usize)> {
    match model_name {
        "all-minilm-l6-v2" => Ok(("onnx/model.onnx", "tokenizer.json", ALL_MINILM_DIMS)),
        other => Err(EngineError::configuration(format!(
            "the tract backend supports only all-minilm-l6-v2, got: {other}"
        ))),
    }
}

fn cache_dir() -> EngineResult<PathBuf> {
    let base = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    let dir = PathBuf::from(base).join(".cache").join("hybrid-retrieval").join("models");
    std::fs::create_dir_all(&dir).map_err(|e| EngineError::backend("tract", format!("creating cache dir: {e}")))?;
    Ok(dir)
}

async fn download_to_cache(client: &reqwest::Client, repo: &str, path: &str, cache_path: &Path) -> EngineResult<()> {
    if cache_path.exists() {
        return Ok(());
    }
    let url = format!("https://huggingface.co/{repo}/resolve/main/{}", path.replace(' ', "%20"));
    let response = client
        .get(&url)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| EngineError::backend("tract", format!("downloading {url}: {e}")))?;
    let bytes = response
        .bytes()
        .await
        .map_err(|e| EngineError::backend("tract", format!("reading response body: {e}")))?;
    if let Some(parent) = cache_path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| EngineError::backend("tract", format!("creating cache dir: {e}")))?;
    }
    std::fs::write(cache_path, &bytes).map_err(|e| EngineError::backend("tract", format!("writing cache file: {e}")))?;
    Ok(())
}

/// Ensures the model and tokenizer are cached on disk, downloading them
/// on first use, and returns their local paths.
pub async fn ensure_cached(client: &reqwest::Client, model_name: &str) -> EngineResult<(PathBuf, PathBuf)> {
    let (onnx_rel, tokenizer_rel, _) = model_manifest(model_name)?;
    let dir = cache_dir()?;
    let model_dir = dir.join(model_name);
    let onnx_path = model_dir.join(onnx_rel);
    let tokenizer_path = model_dir.join(tokenizer_rel);
    download_to_cache(client, ALL_MINILM_REPO, onnx_rel, &onnx_path).await?;
    download_to_cache(client, ALL_MINILM_REPO, tokenizer_rel, &tokenizer_path).await?;
    Ok((onnx_path, tokenizer_path))
}

/// Runs tokenization and tract inference for one batch of texts. Blocking;
/// callers run this inside `spawn_blocking`.
pub fn run_tract_embed(
    onnx_path: &Path,
    tokenizer_path: &Path,
    dims: usize,
    batch_size: usize,
    texts: &[String],
) -> EngineResult<Vec<Vec<f32>>> {
    let tokenizer = tokenizers::Tokenizer::from_file(tokenizer_path)
        .map_err(|e| EngineError::backend("tract", format!("loading tokenizer: {e}")))?;

    let model = tract_onnx::onnx()
        .model_for_path(onnx_path)
        .map_err(|e| EngineError::backend("tract", format!("loading onnx model: {e}")))?
        .into_optimized()
        .map_err(|e| EngineError::backend("tract", format!("optimizing model: {e}")))?
        .into_runnable()
        .map_err(|e| EngineError::backend("tract", format!("building runnable graph: {e}")))?;

    let mut all_embeddings = Vec::with_capacity(texts.len());

    for chunk in texts.chunks(batch_size.max(1)) {
        let encodings: Vec<_> = chunk
            .iter()
            .map(|s| {
                tokenizer
                    .encode(s.as_str(), true)
                    .map_err(|e| EngineError::backend("tract", format!("tokenizing: {e}")))
            })
            .collect::<EngineResult<Vec<_>>>()?;

        let max_len = encodings.iter().map(|e| e.get_ids().len()).max().unwrap_or(1).min(DEFAULT_MAX_LEN);
        let batch_len = encodings.len();
        let mut input_ids = vec![0i64; batch_len * max_len];
        let mut attention_mask = vec![0i64; batch_len * max_len];

        for (i, enc) in encodings.iter().enumerate() {
            let ids = enc.get_ids();
            let len = ids.len().min(max_len);
            for (j, &id) in ids.iter().take(len).enumerate() {
                input_ids[i * max_len + j] = id as i64;
                attention_mask[i * max_len + j] = 1;
            }
        }

        let input_ids_tensor = ndarray::Array2::from_shape_vec((batch_len, max_len), input_ids)
            .map_err(|e| EngineError::backend("tract", format!("shaping input_ids: {e}")))?;
        let attention_mask_tensor = ndarray::Array2::from_shape_vec((batch_len, max_len), attention_mask)
            .map_err(|e| EngineError::backend("tract", format!("shaping attention_mask: {e}")))?;

        let input_ids_t: Tensor = input_ids_tensor.into();
        let attention_mask_t: Tensor = attention_mask_tensor.into();
        let outputs = model
            .run(tvec!(input_ids_t.into(), attention_mask_t.into()))
            .map_err(|e| EngineError::backend("tract", format!("running inference: {e}")))?;

        let output = outputs
            .into_iter()
            .next()
            .ok_or_else(|| EngineError::backend("tract", "model produced no output tensor".to_string()))?;
        let view = output
            .to_array_view::<f32>()
            .map_err(|e| EngineError::backend("tract", format!("reading output tensor: {e}")))?;

        // Output is either [batch, dims] (sentence embedding) or
        // [batch, seq_len, dims] (last_hidden_state, mean-pooled here).
        let shape = view.shape();
        if shape.len() == 2 {
            for i in 0..shape[0] {
                let row: Vec<f32> = view.slice(ndarray::s![i, ..]).iter().copied().collect();
                all_embeddings.push(normalize_l2(row));
            }
        } else if shape.len() == 3 {
            let seq_len = shape[1];
            for (i, enc) in encodings.iter().enumerate() {
                let valid_len = enc.get_ids().len().min(seq_len).min(max_len);
                let mut sum = vec![0f32; dims];
                let mut count = 0f32;
                for j in 0..valid_len {
                    for (k, &v) in view.slice(ndarray::s![i, j, ..]).iter().enumerate() {
                        if k < dims {
                            sum[k] += v;
                        }
                    }
                    count += 1.0;
                }
                if count > 0.0 {
                    for x in &mut sum {
                        *x /= count;
                    }
                }
                all_embeddings.push(normalize_l2(sum));
            }
        } else {
            return Err(EngineError::backend("tract", format!("unexpected output shape: {shape:?}")));
        }
    }

    Ok(all_embeddings)
}

fn normalize_l2(mut v: Vec<f32>) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 1e-9 {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}
