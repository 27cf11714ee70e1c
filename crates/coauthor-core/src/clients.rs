//! Collaborator traits for the generative backends.
//!
//! The application owns concrete providers (HTTP, local, disabled) and
//! passes them in wherever the pipeline needs a model call — there is no
//! global client handle. Tests substitute stubs.

use anyhow::{bail, Result};
use async_trait::async_trait;

/// What a generation call produced.
///
/// The prompt builder is agnostic to whether its output feeds a text or
/// an image call; the tagged result keeps the rest of the pipeline away
/// from any SDK's response shape. Failures are ordinary `Err` values.
#[derive(Debug, Clone)]
pub enum ModelOutput {
    Text(String),
    Image(Vec<u8>),
}

impl ModelOutput {
    /// Unwrap a text result; an image where text was expected is an error.
    pub fn into_text(self) -> Result<String> {
        match self {
            ModelOutput::Text(t) => Ok(t),
            ModelOutput::Image(_) => bail!("expected text output, got image data"),
        }
    }
}

/// Per-call generation parameters.
#[derive(Debug, Clone)]
pub struct GenerationParams {
    pub temperature: f32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self { temperature: 0.7 }
    }
}

/// A generative text/image backend.
///
/// Single-shot: implementations do not retry. The chunked-review
/// orchestrator is the only component with a retry policy; layering
/// retries here as well would compound into retry storms.
#[async_trait]
pub trait GenerationClient: Send + Sync {
    async fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<ModelOutput>;
}

/// An embedding backend with fixed dimensionality per model.
///
/// Also single-shot — a failed `embed_many` surfaces to the caller, which
/// decides whether the surrounding operation (index build, query) fails.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Model identifier recorded inside persisted indexes.
    fn model_name(&self) -> &str;
    /// Vector dimensionality.
    fn dims(&self) -> usize;
    /// Embed a batch of texts, one vector per input, in input order.
    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns `0.0` for empty vectors or vectors of different lengths.
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_text() {
        assert_eq!(ModelOutput::Text("hi".into()).into_text().unwrap(), "hi");
        assert!(ModelOutput::Image(vec![1, 2]).into_text().is_err());
    }

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_mismatched_lengths() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }
}
