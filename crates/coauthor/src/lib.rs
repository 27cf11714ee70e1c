//! Coauthor — an LLM-assisted writing workbench.
//!
//! Projects store their text (general notes, synopsis, chat history,
//! uploaded files) in SQLite; each text blob owns an on-disk embedding
//! index that is rebuilt synchronously on every save and self-healed at
//! startup. Requests assemble context from those indexes (with exact
//! chapter extraction taking priority over semantic search), render a
//! task-specific prompt, and dispatch it to a generative backend. Long
//! review inputs run through a chunked orchestrator with bounded
//! concurrency, retry, and cancellation.

pub mod ask;
pub mod assemble;
pub mod config;
pub mod db;
pub mod embedding;
pub mod extract;
pub mod generate;
pub mod index;
pub mod migrate;
pub mod review;
pub mod server;
pub mod stores;

use std::sync::Arc;

use anyhow::Result;

use coauthor_core::clients::{EmbeddingClient, GenerationClient};

use crate::config::Config;
use crate::index::IndexManager;
use crate::stores::SqliteStores;

/// Everything a request handler needs, wired once at startup.
pub struct AppContext {
    pub config: Config,
    pub stores: SqliteStores,
    pub index: IndexManager,
    pub embedder: Arc<dyn EmbeddingClient>,
    pub generator: Arc<dyn GenerationClient>,
}

impl AppContext {
    pub async fn from_config(config: Config) -> Result<Self> {
        let pool = db::connect(&config).await?;
        let stores = SqliteStores::new(pool);
        let index = IndexManager::new(&config.storage.index_root, config.chunking.index);
        let embedder = embedding::create_embedder(&config.embedding)?;
        let generator = generate::create_generator(&config.generation)?;

        Ok(Self {
            config,
            stores,
            index,
            embedder,
            generator,
        })
    }

    /// Run the startup index consistency check: any blob whose index is
    /// missing, corrupt, or stale gets rebuilt from the stored text.
    /// A no-op when embeddings are disabled.
    pub async fn verify_indexes(&self) -> Result<usize> {
        if !self.config.embedding.is_enabled() {
            return Ok(0);
        }
        self.index
            .verify(&self.stores, self.embedder.as_ref())
            .await
    }
}
