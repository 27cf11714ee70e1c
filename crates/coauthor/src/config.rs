use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub storage: StorageConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub review: ReviewConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub db_path: PathBuf,
    pub index_root: PathBuf,
    pub upload_root: PathBuf,
}

/// One chunking window/overlap pair, in bytes.
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct ChunkProfile {
    pub window: usize,
    pub overlap: usize,
}

/// Three independent chunking profiles. Retrieval slices, index builds,
/// and review chunking serve different purposes and are tuned apart.
#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_retrieval_profile")]
    pub retrieval: ChunkProfile,
    #[serde(default = "default_index_profile")]
    pub index: ChunkProfile,
    #[serde(default = "default_review_profile")]
    pub review: ChunkProfile,
}

fn default_retrieval_profile() -> ChunkProfile {
    ChunkProfile {
        window: 1200,
        overlap: 200,
    }
}
fn default_index_profile() -> ChunkProfile {
    ChunkProfile {
        window: 1000,
        overlap: 100,
    }
}
fn default_review_profile() -> ChunkProfile {
    ChunkProfile {
        window: 12000,
        overlap: 800,
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            retrieval: default_retrieval_profile(),
            index: default_index_profile(),
            review: default_review_profile(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_notes_k")]
    pub notes_k: usize,
    #[serde(default = "default_file_k")]
    pub file_k: usize,
    #[serde(default = "default_slice_k")]
    pub slice_k: usize,
    #[serde(default = "default_history_turns")]
    pub history_turns: usize,
}

fn default_notes_k() -> usize {
    4
}
fn default_file_k() -> usize {
    4
}
fn default_slice_k() -> usize {
    8
}
fn default_history_turns() -> usize {
    10
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            notes_k: 4,
            file_k: 4,
            slice_k: 8,
            history_turns: 10,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReviewConfig {
    /// Inputs at or below this many bytes run as one generation call.
    #[serde(default = "default_single_call_ceiling")]
    pub single_call_ceiling: usize,
    /// Simultaneous generation calls during a chunked review.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Backoff grows linearly: `backoff_base_ms * attempts_so_far`.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
}

fn default_single_call_ceiling() -> usize {
    24000
}
fn default_concurrency() -> usize {
    4
}
fn default_call_timeout_ms() -> u64 {
    90_000
}
fn default_max_attempts() -> u32 {
    3
}
fn default_backoff_base_ms() -> u64 {
    1200
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            single_call_ceiling: 24000,
            concurrency: 4,
            call_timeout_ms: 90_000,
            max_attempts: 3,
            backoff_base_ms: 1200,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `ngram` (local, deterministic), `openai` (HTTP), or `disabled`.
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_embedding_provider() -> String {
    "ngram".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    /// Disabled embeddings skip index builds entirely; retrieval falls
    /// back to keyword slices over the raw blobs.
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "ngram".to_string(),
            model: None,
            dims: None,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    /// `gemini` (HTTP) or `disabled`.
    #[serde(default = "default_generation_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_generation_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_generation_provider() -> String {
    "disabled".to_string()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_generation_timeout_secs() -> u64 {
    120
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            temperature: 0.7,
            timeout_secs: 120,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

impl Config {
    /// Minimal config for tests and tooling that never touches disk paths.
    pub fn minimal() -> Self {
        Self {
            storage: StorageConfig {
                db_path: PathBuf::from("data/coauthor.sqlite"),
                index_root: PathBuf::from("data/indexes"),
                upload_root: PathBuf::from("data/uploads"),
            },
            chunking: ChunkingConfig::default(),
            retrieval: RetrievalConfig::default(),
            review: ReviewConfig::default(),
            embedding: EmbeddingConfig::default(),
            generation: GenerationConfig::default(),
            server: ServerConfig {
                bind: "127.0.0.1:7878".to_string(),
            },
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    for (name, profile) in [
        ("chunking.retrieval", &config.chunking.retrieval),
        ("chunking.index", &config.chunking.index),
        ("chunking.review", &config.chunking.review),
    ] {
        if profile.window == 0 {
            anyhow::bail!("{name}.window must be > 0");
        }
        if profile.overlap >= profile.window {
            anyhow::bail!("{name}.overlap must be smaller than its window");
        }
    }

    if config.review.single_call_ceiling == 0 {
        anyhow::bail!("review.single_call_ceiling must be > 0");
    }
    if config.review.concurrency == 0 {
        anyhow::bail!("review.concurrency must be >= 1");
    }
    if config.review.max_attempts == 0 {
        anyhow::bail!("review.max_attempts must be >= 1");
    }

    match config.embedding.provider.as_str() {
        "ngram" | "disabled" => {}
        "openai" => {
            if config.embedding.model.is_none() {
                anyhow::bail!("embedding.model must be set for the openai provider");
            }
            if config.embedding.dims.unwrap_or(0) == 0 {
                anyhow::bail!("embedding.dims must be > 0 for the openai provider");
            }
        }
        other => anyhow::bail!(
            "Unknown embedding provider: '{other}'. Must be ngram, openai, or disabled."
        ),
    }

    match config.generation.provider.as_str() {
        "gemini" | "disabled" => {}
        other => anyhow::bail!("Unknown generation provider: '{other}'. Must be gemini or disabled."),
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(content: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("coauthor.toml");
        std::fs::write(&path, content).unwrap();
        (dir, path)
    }

    const BASE: &str = r#"
[storage]
db_path = "data/coauthor.sqlite"
index_root = "data/indexes"
upload_root = "data/uploads"

[server]
bind = "127.0.0.1:7878"
"#;

    #[test]
    fn test_defaults_fill_in() {
        let (_dir, path) = write_config(BASE);
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.chunking.retrieval.window, 1200);
        assert_eq!(cfg.chunking.index.window, 1000);
        assert_eq!(cfg.chunking.review.window, 12000);
        assert_eq!(cfg.review.concurrency, 4);
        assert_eq!(cfg.retrieval.history_turns, 10);
        assert_eq!(cfg.embedding.provider, "ngram");
        assert_eq!(cfg.generation.provider, "disabled");
    }

    #[test]
    fn test_rejects_overlap_ge_window() {
        let (_dir, path) = write_config(&format!(
            "{BASE}\n[chunking.review]\nwindow = 100\noverlap = 100\n"
        ));
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn test_rejects_unknown_embedding_provider() {
        let (_dir, path) = write_config(&format!("{BASE}\n[embedding]\nprovider = \"magic\"\n"));
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn test_openai_provider_requires_model_and_dims() {
        let (_dir, path) = write_config(&format!("{BASE}\n[embedding]\nprovider = \"openai\"\n"));
        assert!(load_config(&path).is_err());

        let (_dir, path) = write_config(&format!(
            "{BASE}\n[embedding]\nprovider = \"openai\"\nmodel = \"text-embedding-3-small\"\ndims = 1536\n"
        ));
        assert!(load_config(&path).is_ok());
    }
}
