//! Embedding providers.
//!
//! Three backends behind the [`EmbeddingClient`] trait:
//!
//! - **`ngram`** — a deterministic local embedder (hashed character
//!   trigrams, L2-normalized). No network, no model files; lexically
//!   overlapping texts land close together, which is what the index
//!   smoke tests and offline setups need.
//! - **`openai`** — the OpenAI-compatible `POST /v1/embeddings` API.
//! - **`disabled`** — always errors; semantic retrieval degrades to the
//!   keyword slice selector.
//!
//! Providers make a single attempt per call. Retry policy lives solely
//! in the chunked-review orchestrator; an embedding failure here
//! surfaces to the caller (index build or query), which keeps any
//! previous index intact.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use coauthor_core::clients::EmbeddingClient;

use crate::config::EmbeddingConfig;

/// Instantiate the provider named by the configuration.
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingClient>> {
    match config.provider.as_str() {
        "ngram" => Ok(Arc::new(NgramEmbedder::new(config.dims.unwrap_or(256)))),
        "openai" => Ok(Arc::new(OpenAiEmbedder::new(config)?)),
        "disabled" => Ok(Arc::new(DisabledEmbedder)),
        other => bail!("Unknown embedding provider: {other}"),
    }
}

// ============ Disabled ============

pub struct DisabledEmbedder;

#[async_trait]
impl EmbeddingClient for DisabledEmbedder {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    async fn embed_many(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        bail!("Embedding provider is disabled")
    }
}

// ============ Hashed n-gram ============

/// Bag-of-trigrams embedding: each character trigram of the lowercased
/// text is hashed into one of `dims` buckets, then the vector is
/// L2-normalized. Deterministic across runs and processes.
pub struct NgramEmbedder {
    dims: usize,
}

impl NgramEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(8) }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        if chars.len() < 3 {
            if !chars.is_empty() {
                let mut hasher = DefaultHasher::new();
                lowered.hash(&mut hasher);
                v[(hasher.finish() as usize) % self.dims] = 1.0;
            }
            return v;
        }

        for gram in chars.windows(3) {
            let mut hasher = DefaultHasher::new();
            gram.hash(&mut hasher);
            v[(hasher.finish() as usize) % self.dims] += 1.0;
        }

        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for x in &mut v {
                *x /= norm;
            }
        }
        v
    }
}

#[async_trait]
impl EmbeddingClient for NgramEmbedder {
    fn model_name(&self) -> &str {
        "ngram-v1"
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

// ============ OpenAI-compatible HTTP ============

/// Calls `POST /v1/embeddings`. Requires the `OPENAI_API_KEY`
/// environment variable.
pub struct OpenAiEmbedder {
    model: String,
    dims: usize,
    timeout: Duration,
}

impl OpenAiEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for the openai provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for the openai provider"))?;

        if std::env::var("OPENAI_API_KEY").is_err() {
            bail!("OPENAI_API_KEY environment variable not set");
        }

        Ok(Self {
            model,
            dims,
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }
}

#[async_trait]
impl EmbeddingClient for OpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY not set"))?;

        let client = reqwest::Client::builder().timeout(self.timeout).build()?;

        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let response = client
            .post("https://api.openai.com/v1/embeddings")
            .header("Authorization", format!("Bearer {api_key}"))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("Embedding API error {status}: {body_text}");
        }

        let json: serde_json::Value = response.json().await?;
        parse_embedding_response(&json)
    }
}

fn parse_embedding_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid embedding response: missing data array"))?;

    let mut embeddings = Vec::with_capacity(data.len());
    for item in data {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow::anyhow!("Invalid embedding response: missing embedding"))?;
        embeddings.push(
            embedding
                .iter()
                .map(|v| v.as_f64().unwrap_or(0.0) as f32)
                .collect(),
        );
    }

    Ok(embeddings)
}
