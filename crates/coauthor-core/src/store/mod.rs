//! Storage collaborator traits.
//!
//! The retrieval pipeline reads history, rules, and text blobs through
//! these traits; the application crate provides the SQLite
//! implementations and the route layer does the writing. All
//! implementations must be `Send + Sync`.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{HistoryTurn, Rule};

/// Identifies one text blob for the index consistency check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobRef {
    pub project_id: i64,
    pub key: String,
}

/// Append-only chat history per project, queryable newest-first.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Record a completed question/answer turn.
    async fn append(&self, project_id: i64, question: &str, answer: &str) -> Result<()>;

    /// The most recent `limit` turns, newest first.
    async fn recent(&self, project_id: i64, limit: usize) -> Result<Vec<HistoryTurn>>;

    /// Drop all turns for a project.
    async fn clear(&self, project_id: i64) -> Result<()>;
}

/// Two-tier rule storage: global rules (`project_id = NULL`) plus
/// project-scoped rules.
#[async_trait]
pub trait RuleStore: Send + Sync {
    /// Global rules plus the given project's rules, all modes included —
    /// the prompt builder filters to enforce-mode.
    async fn rules_for(&self, project_id: i64) -> Result<Vec<Rule>>;
}

/// Named text blobs per project (general notes, synopsis, extracted
/// upload text). Writers are responsible for rebuilding the blob's
/// vector index after every write.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn read(&self, project_id: i64, key: &str) -> Result<Option<String>>;

    async fn write(&self, project_id: i64, key: &str, text: &str) -> Result<()>;

    /// Every stored blob, for the startup index consistency check.
    async fn list(&self) -> Result<Vec<BlobRef>>;
}
