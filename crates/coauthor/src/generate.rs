//! Generation providers.
//!
//! The pipeline talks to a [`GenerationClient`] and never to an SDK
//! response shape: a call produces [`ModelOutput::Text`],
//! [`ModelOutput::Image`], or an error. The Gemini provider walks the
//! REST response's candidate parts and returns the first inline image it
//! finds, otherwise the accumulated text.
//!
//! Single attempt per call — the chunked-review orchestrator is the one
//! place that retries.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use std::sync::Arc;
use std::time::Duration;

use coauthor_core::clients::{GenerationClient, GenerationParams, ModelOutput};

use crate::config::GenerationConfig;

const DEFAULT_GEMINI_MODEL: &str = "gemini-1.5-flash";

/// Instantiate the provider named by the configuration.
pub fn create_generator(config: &GenerationConfig) -> Result<Arc<dyn GenerationClient>> {
    match config.provider.as_str() {
        "gemini" => Ok(Arc::new(GeminiGenerator::new(config)?)),
        "disabled" => Ok(Arc::new(DisabledGenerator)),
        other => bail!("Unknown generation provider: {other}"),
    }
}

// ============ Disabled ============

pub struct DisabledGenerator;

#[async_trait]
impl GenerationClient for DisabledGenerator {
    async fn generate(&self, _prompt: &str, _params: &GenerationParams) -> Result<ModelOutput> {
        bail!("Generation provider is disabled")
    }
}

// ============ Gemini REST ============

/// Calls `POST /v1beta/models/{model}:generateContent`. Requires the
/// `GEMINI_API_KEY` (or legacy `GOOGLE_API_KEY`) environment variable.
pub struct GeminiGenerator {
    model: String,
    timeout: Duration,
}

impl GeminiGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        if api_key().is_none() {
            bail!("GEMINI_API_KEY (or GOOGLE_API_KEY) environment variable not set");
        }

        Ok(Self {
            model: config
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string()),
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }
}

fn api_key() -> Option<String> {
    std::env::var("GEMINI_API_KEY")
        .or_else(|_| std::env::var("GOOGLE_API_KEY"))
        .ok()
}

#[async_trait]
impl GenerationClient for GeminiGenerator {
    async fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<ModelOutput> {
        let key = api_key().context("GEMINI_API_KEY not set")?;

        let client = reqwest::Client::builder().timeout(self.timeout).build()?;

        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent?key={}",
            self.model, key
        );

        let body = serde_json::json!({
            "contents": [{ "parts": [{ "text": prompt }] }],
            "generationConfig": { "temperature": params.temperature },
        });

        let response = client.post(&url).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("Generation API error {status}: {body_text}");
        }

        let json: serde_json::Value = response.json().await?;
        parse_generation_response(&json)
    }
}

/// Reduce a `generateContent` response to a tagged output: the first
/// inline image wins, otherwise all text parts are concatenated.
fn parse_generation_response(json: &serde_json::Value) -> Result<ModelOutput> {
    if let Some(reason) = json
        .pointer("/promptFeedback/blockReason")
        .and_then(|r| r.as_str())
    {
        bail!("Generation request blocked: {reason}");
    }

    let parts = json
        .pointer("/candidates/0/content/parts")
        .and_then(|p| p.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid generation response: no candidate parts"))?;

    let mut text = String::new();
    for part in parts {
        if let Some(data) = part.pointer("/inlineData/data").and_then(|d| d.as_str()) {
            let bytes = BASE64
                .decode(data)
                .context("Invalid base64 in inline image data")?;
            return Ok(ModelOutput::Image(bytes));
        }
        if let Some(t) = part.get("text").and_then(|t| t.as_str()) {
            text.push_str(t);
        }
    }

    if text.is_empty() {
        bail!("Generation response contained neither text nor image data");
    }
    Ok(ModelOutput::Text(text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_text_response() {
        let json = serde_json::json!({
            "candidates": [{
                "content": { "parts": [{ "text": "שלום " }, { "text": "עולם" }] }
            }]
        });
        match parse_generation_response(&json).unwrap() {
            ModelOutput::Text(t) => assert_eq!(t, "שלום עולם"),
            _ => panic!("expected text"),
        }
    }

    #[test]
    fn test_parse_inline_image_response() {
        let data = BASE64.encode(b"pngbytes");
        let json = serde_json::json!({
            "candidates": [{
                "content": { "parts": [{ "inlineData": { "mimeType": "image/png", "data": data } }] }
            }]
        });
        match parse_generation_response(&json).unwrap() {
            ModelOutput::Image(bytes) => assert_eq!(bytes, b"pngbytes"),
            _ => panic!("expected image"),
        }
    }

    #[test]
    fn test_parse_blocked_response_is_error() {
        let json = serde_json::json!({
            "promptFeedback": { "blockReason": "SAFETY" }
        });
        let err = parse_generation_response(&json).unwrap_err();
        assert!(err.to_string().contains("SAFETY"));
    }

    #[test]
    fn test_parse_empty_response_is_error() {
        let json = serde_json::json!({ "candidates": [] });
        assert!(parse_generation_response(&json).is_err());
    }
}
