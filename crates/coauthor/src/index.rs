//! Per-blob vector indexes on disk.
//!
//! Every indexed text blob (general notes, each uploaded file) owns one
//! index file under the index root: `project_{id}/{key}.json`, holding
//! the embedding model name, dimensionality, a SHA-256 of the source
//! text, and the chunk texts with their vectors. Indexes are never
//! merged; a query runs against exactly one blob's index.
//!
//! # Write discipline
//!
//! `build` replaces the whole index: serialize to a sibling `.tmp` file,
//! then rename over the target. Readers see either the old or the new
//! index, never a partial one, and an embedding failure mid-build leaves
//! the previous index untouched. Builds on the same handle serialize
//! through a handle-scoped async lock (last write wins); queries don't
//! take the lock.
//!
//! # Read discipline
//!
//! A missing index is a normal miss (`Ok(empty)`) — many blobs start
//! empty. An unreadable or mismatched index (external deletion, model
//! change, truncated write) is also a miss, logged at `warn`; the
//! startup [`IndexManager::verify`] pass rebuilds those from the source
//! blobs.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

use coauthor_core::chunk::chunk_text;
use coauthor_core::clients::{cosine_similarity, EmbeddingClient};
use coauthor_core::store::BlobStore;

use crate::config::ChunkProfile;

/// Opaque reference to one blob's persisted index.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IndexHandle {
    path: PathBuf,
}

impl IndexHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl From<PathBuf> for IndexHandle {
    fn from(path: PathBuf) -> Self {
        Self { path }
    }
}

/// On-disk index format.
#[derive(Debug, Serialize, Deserialize)]
struct StoredIndex {
    model: String,
    dims: usize,
    source_sha256: String,
    chunks: Vec<String>,
    vectors: Vec<Vec<f32>>,
}

pub struct IndexManager {
    root: PathBuf,
    profile: ChunkProfile,
    locks: Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>,
}

impl IndexManager {
    pub fn new(root: impl Into<PathBuf>, profile: ChunkProfile) -> Self {
        Self {
            root: root.into(),
            profile,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// The handle owning `key` for `project_id`.
    pub fn handle(&self, project_id: i64, key: &str) -> IndexHandle {
        let safe_key: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();

        IndexHandle {
            path: self
                .root
                .join(format!("project_{project_id}"))
                .join(format!("{safe_key}.json")),
        }
    }

    fn lock_for(&self, handle: &IndexHandle) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap();
        locks
            .entry(handle.path.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Build (or fully replace) the index for `text` at `handle`.
    ///
    /// Empty text removes the index — an empty blob has nothing to
    /// retrieve and must not serve stale chunks.
    pub async fn build(
        &self,
        embedder: &dyn EmbeddingClient,
        text: &str,
        handle: &IndexHandle,
    ) -> Result<()> {
        let lock = self.lock_for(handle);
        let _guard = lock.lock().await;

        if text.trim().is_empty() {
            if handle.path.exists() {
                std::fs::remove_file(&handle.path)
                    .with_context(|| format!("removing index {}", handle.path.display()))?;
            }
            return Ok(());
        }

        let chunks: Vec<String> = chunk_text(text, self.profile.window, self.profile.overlap)
            .into_iter()
            .map(|c| c.content)
            .collect();

        let vectors = embedder.embed_many(&chunks).await?;
        if vectors.len() != chunks.len() {
            bail!(
                "embedding returned {} vectors for {} chunks",
                vectors.len(),
                chunks.len()
            );
        }

        let stored = StoredIndex {
            model: embedder.model_name().to_string(),
            dims: embedder.dims(),
            source_sha256: sha256_hex(text),
            chunks,
            vectors,
        };

        if let Some(parent) = handle.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let tmp = handle.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec(&stored)?)
            .with_context(|| format!("writing index {}", tmp.display()))?;
        std::fs::rename(&tmp, &handle.path)
            .with_context(|| format!("replacing index {}", handle.path.display()))?;

        info!(
            index = %handle.path.display(),
            chunks = stored.chunks.len(),
            "index built"
        );
        Ok(())
    }

    /// Top-`k` chunk texts nearest to `query_text`, most similar first.
    ///
    /// Missing, unreadable, or model-mismatched indexes are all normal
    /// misses and return an empty result. Embedding the query is the one
    /// thing that can fail here.
    pub async fn query(
        &self,
        embedder: &dyn EmbeddingClient,
        handle: &IndexHandle,
        query_text: &str,
        k: usize,
    ) -> Result<Vec<String>> {
        let stored = match self.load(handle) {
            Some(s) => s,
            None => return Ok(Vec::new()),
        };

        if stored.model != embedder.model_name() || stored.dims != embedder.dims() {
            warn!(
                index = %handle.path.display(),
                stored_model = %stored.model,
                "index was built with a different embedding model; treating as missing"
            );
            return Ok(Vec::new());
        }

        let query_vec = embedder
            .embed_many(&[query_text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("empty embedding response for query"))?;

        let mut scored: Vec<(f32, &String)> = stored
            .chunks
            .iter()
            .zip(stored.vectors.iter())
            .map(|(chunk, vec)| (cosine_similarity(&query_vec, vec), chunk))
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        Ok(scored.into_iter().take(k).map(|(_, c)| c.clone()).collect())
    }

    /// Whether any persisted index exists at `handle`. Callers use this
    /// to choose between semantic retrieval and the index-free keyword
    /// fallback — a missing index is a mode, not an error.
    pub fn exists(&self, handle: &IndexHandle) -> bool {
        handle.path.exists()
    }

    /// Remove the index at `handle`, if any.
    pub async fn remove(&self, handle: &IndexHandle) -> Result<()> {
        let lock = self.lock_for(handle);
        let _guard = lock.lock().await;
        if handle.path.exists() {
            std::fs::remove_file(&handle.path)?;
        }
        Ok(())
    }

    /// Whether the index at `handle` exists, parses, and was built from
    /// exactly `source_text` with the given embedder.
    pub fn is_current(
        &self,
        handle: &IndexHandle,
        embedder: &dyn EmbeddingClient,
        source_text: &str,
    ) -> bool {
        match self.load(handle) {
            Some(stored) => {
                stored.model == embedder.model_name()
                    && stored.dims == embedder.dims()
                    && stored.source_sha256 == sha256_hex(source_text)
            }
            None => false,
        }
    }

    /// Startup consistency check: rebuild every blob index that is
    /// missing, unreadable, or stale relative to its source text.
    /// Returns the number of rebuilt indexes. Per-blob failures are
    /// logged and skipped so one bad blob cannot block startup.
    pub async fn verify(
        &self,
        blobs: &dyn BlobStore,
        embedder: &dyn EmbeddingClient,
    ) -> Result<usize> {
        let mut rebuilt = 0usize;

        for blob in blobs.list().await? {
            let text = match blobs.read(blob.project_id, &blob.key).await? {
                Some(t) => t,
                None => continue,
            };
            if text.trim().is_empty() {
                continue;
            }

            let handle = self.handle(blob.project_id, &blob.key);
            if self.is_current(&handle, embedder, &text) {
                continue;
            }

            info!(
                project_id = blob.project_id,
                key = %blob.key,
                "rebuilding missing or stale index"
            );
            match self.build(embedder, &text, &handle).await {
                Ok(()) => rebuilt += 1,
                Err(e) => warn!(
                    project_id = blob.project_id,
                    key = %blob.key,
                    error = %e,
                    "index rebuild failed; leaving blob unindexed"
                ),
            }
        }

        Ok(rebuilt)
    }

    fn load(&self, handle: &IndexHandle) -> Option<StoredIndex> {
        if !handle.path.exists() {
            return None;
        }
        let bytes = match std::fs::read(&handle.path) {
            Ok(b) => b,
            Err(e) => {
                warn!(index = %handle.path.display(), error = %e, "index unreadable");
                return None;
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(stored) => Some(stored),
            Err(e) => {
                warn!(index = %handle.path.display(), error = %e, "index corrupt");
                None
            }
        }
    }
}

fn sha256_hex(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
