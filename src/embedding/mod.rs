//! Embedding backends and vector utilities.
//!
//! Defines the [`Embedder`] trait and concrete implementations:
//! - **[`OpenAIProvider`]**: calls the OpenAI embeddings API with batching and retry.
//! - **[`OllamaProvider`]**: calls a local Ollama instance's `/api/embed` endpoint.
//! - **`LocalProvider`**: runs MiniLM locally via fastembed; no network calls after model download.
//!
//! Every vector handed to the rest of the pipeline goes through
//! [`embed_texts`], which L2-normalizes it. Similarity is then plain
//! [`cosine_similarity`], identical in ranking to a dot product.
//!
//! # Provider Selection
//!
//! | Config Value | Provider |
//! |-------------|----------|
//! | `"local"` | `LocalProvider` (default, needs `local-embeddings-fastembed`) |
//! | `"openai"` | [`OpenAIProvider`] |
//! | `"ollama"` | [`OllamaProvider`] |

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::retry::{read_json, with_retry, CallError, RetryPolicy};

/// Text → fixed-length vector. Identical input must give identical output.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Returns the model identifier (e.g. `"all-minilm-l6-v2"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `384`).
    fn dims(&self) -> usize;
    /// Embed a batch, one vector per input, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Embed a batch and L2-normalize every vector.
pub async fn embed_texts(embedder: &dyn Embedder, texts: &[String]) -> Result<Vec<Vec<f32>>> {
    if texts.is_empty() {
        return Ok(Vec::new());
    }
    let mut vectors = embedder.embed(texts).await?;
    if vectors.len() != texts.len() {
        bail!(
            "Embedding backend returned {} vectors for {} inputs",
            vectors.len(),
            texts.len()
        );
    }
    for v in vectors.iter_mut() {
        normalize(v);
    }
    Ok(vectors)
}

/// Embed a single query text (normalized).
pub async fn embed_query(embedder: &dyn Embedder, text: &str) -> Result<Vec<f32>> {
    let results = embed_texts(embedder, &[text.to_string()]).await?;
    results
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("Empty embedding response"))
}

// ============ OpenAI Provider ============

/// Embedding provider using the OpenAI API.
///
/// Calls `POST /v1/embeddings`. Requires `OPENAI_API_KEY`.
pub struct OpenAIProvider {
    model: String,
    dims: usize,
    api_key: String,
    batch_size: usize,
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl OpenAIProvider {
    pub fn new(config: &EmbeddingConfig, retry: RetryPolicy) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for OpenAI provider"))?;
        let dims = config.dims.unwrap_or(1536);
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            model,
            dims,
            api_key,
            batch_size: config.batch_size.max(1),
            client,
            retry,
        })
    }
}

#[async_trait]
impl Embedder for OpenAIProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let body = serde_json::json!({
                "model": self.model,
                "input": batch,
            });
            let body = &body;
            let client = &self.client;
            let api_key = self.api_key.as_str();
            let json = with_retry(&self.retry, "OpenAI embeddings", move || async move {
                let response = client
                    .post("https://api.openai.com/v1/embeddings")
                    .bearer_auth(api_key)
                    .json(body)
                    .send()
                    .await
                    .map_err(CallError::from)?;
                read_json("OpenAI", response).await
            })
            .await?;
            out.extend(parse_openai_response(&json)?);
        }
        Ok(out)
    }
}

/// Extracts `data[].embedding`, ordered by `data[].index`.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (pos, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing embedding"))?;
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(pos);
        let vec: Vec<f32> = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        indexed.push((index, vec));
    }
    indexed.sort_by_key(|(i, _)| *i);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Ollama Provider ============

/// Embedding provider using a local Ollama instance.
///
/// Calls `POST /api/embed` on the configured URL (default: `http://localhost:11434`).
pub struct OllamaProvider {
    model: String,
    dims: usize,
    url: String,
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl OllamaProvider {
    pub fn new(config: &EmbeddingConfig, retry: RetryPolicy) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for Ollama provider"))?;
        let dims = config.dims.unwrap_or(768);
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            model,
            dims,
            url,
            client,
            retry,
        })
    }
}

#[async_trait]
impl Embedder for OllamaProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let body = &body;
        let client = &self.client;
        let url = format!("{}/api/embed", self.url.trim_end_matches('/'));
        let url = url.as_str();
        let json = with_retry(&self.retry, "Ollama embeddings", move || async move {
            let response = client
                .post(url)
                .json(body)
                .send()
                .await
                .map_err(|e| {
                    CallError::Transient(anyhow::anyhow!(
                        "Ollama connection error (is Ollama running at {}?): {}",
                        url,
                        e
                    ))
                })?;
            read_json("Ollama", response).await
        })
        .await?;
        parse_ollama_response(&json)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing embeddings array"))?;

    let mut result = Vec::with_capacity(embeddings.len());

    for embedding in embeddings {
        let vec: Vec<f32> = embedding
            .as_array()
            .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: embedding is not an array"))?
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        result.push(vec);
    }

    Ok(result)
}

// ============ Local Provider (fastembed) ============

/// Local MiniLM inference through fastembed.
///
/// The model is downloaded from Hugging Face on first use and cached. It is
/// loaded once and reused for every batch of the run.
#[cfg(feature = "local-embeddings-fastembed")]
pub struct LocalProvider {
    model_name: String,
    dims: usize,
    batch_size: usize,
    model: std::sync::Arc<std::sync::Mutex<Option<fastembed::TextEmbedding>>>,
}

#[cfg(feature = "local-embeddings-fastembed")]
impl LocalProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let (model_name, dims) = resolve_local_model(config);
        // Fail early on unsupported names instead of on the first batch.
        config_to_fastembed_model(&model_name)?;
        Ok(Self {
            model_name,
            dims,
            batch_size: config.batch_size.max(1),
            model: Default::default(),
        })
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
#[async_trait]
impl Embedder for LocalProvider {
    fn model_name(&self) -> &str {
        &self.model_name
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let fastembed_model = config_to_fastembed_model(&self.model_name)?;
        let batch_size = self.batch_size;
        let texts = texts.to_vec();
        let cache = self.model.clone();

        tokio::task::spawn_blocking(move || {
            let mut guard = cache
                .lock()
                .map_err(|_| anyhow::anyhow!("Local embedding model lock poisoned"))?;
            if guard.is_none() {
                let model = fastembed::TextEmbedding::try_new(
                    fastembed::InitOptions::new(fastembed_model).with_show_download_progress(true),
                )
                .map_err(|e| anyhow::anyhow!("Failed to initialize local embedding model: {}", e))?;
                *guard = Some(model);
            }
            let model = guard
                .as_mut()
                .ok_or_else(|| anyhow::anyhow!("Local embedding model unavailable"))?;
            model
                .embed(texts, Some(batch_size))
                .map_err(|e| anyhow::anyhow!("Local embedding failed: {}", e))
        })
        .await?
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
fn resolve_local_model(config: &EmbeddingConfig) -> (String, usize) {
    let model_name = config
        .model
        .clone()
        .unwrap_or_else(|| "all-minilm-l6-v2".to_string());

    let dims = config.dims.unwrap_or(match model_name.as_str() {
        "all-minilm-l6-v2" | "bge-small-en-v1.5" => 384,
        "bge-base-en-v1.5" | "nomic-embed-text-v1.5" => 768,
        _ => 384,
    });

    (model_name, dims)
}

#[cfg(feature = "local-embeddings-fastembed")]
fn config_to_fastembed_model(name: &str) -> Result<fastembed::EmbeddingModel> {
    match name {
        "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
        "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
        "nomic-embed-text-v1.5" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV15),
        other => bail!(
            "Unknown local embedding model: '{}'. Supported models: \
             all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, nomic-embed-text-v1.5",
            other
        ),
    }
}

/// Create the configured [`Embedder`].
pub fn create_embedder(config: &EmbeddingConfig, retry: RetryPolicy) -> Result<Box<dyn Embedder>> {
    match config.provider.as_str() {
        "openai" => Ok(Box::new(OpenAIProvider::new(config, retry)?)),
        "ollama" => Ok(Box::new(OllamaProvider::new(config, retry)?)),
        #[cfg(feature = "local-embeddings-fastembed")]
        "local" => Ok(Box::new(LocalProvider::new(config)?)),
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        "local" => bail!("Local embedding provider requires --features local-embeddings-fastembed"),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

/// Scale a vector to unit length in place. Zero vectors are left as is.
pub fn normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm < f32::EPSILON {
        return;
    }
    for x in v.iter_mut() {
        *x /= norm;
    }
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`, or `0.0` for empty vectors or vectors
/// of different lengths.
///
/// ```text
///            a · b
/// cos(θ) = ─────────
///          ‖a‖ × ‖b‖
/// ```
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}
