//! In-memory store implementations for tests and embedding-free setups.
//!
//! `HashMap`/`Vec` behind `std::sync::RwLock`; async methods return
//! immediately-ready futures.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;

use crate::models::{HistoryTurn, Rule, RuleMode};

use super::{BlobRef, BlobStore, HistoryStore, RuleStore};

/// In-memory history log. Turns are stored oldest-first and served
/// newest-first, matching the SQLite implementation's query order.
#[derive(Default)]
pub struct InMemoryHistory {
    turns: RwLock<HashMap<i64, Vec<HistoryTurn>>>,
}

impl InMemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistory {
    async fn append(&self, project_id: i64, question: &str, answer: &str) -> Result<()> {
        let mut turns = self.turns.write().unwrap();
        turns.entry(project_id).or_default().push(HistoryTurn {
            question: question.to_string(),
            answer: answer.to_string(),
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn recent(&self, project_id: i64, limit: usize) -> Result<Vec<HistoryTurn>> {
        let turns = self.turns.read().unwrap();
        Ok(turns
            .get(&project_id)
            .map(|v| v.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn clear(&self, project_id: i64) -> Result<()> {
        self.turns.write().unwrap().remove(&project_id);
        Ok(())
    }
}

/// In-memory rule list.
#[derive(Default)]
pub struct InMemoryRules {
    rules: RwLock<Vec<Rule>>,
}

impl InMemoryRules {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, project_id: Option<i64>, text: &str, mode: RuleMode) {
        let mut rules = self.rules.write().unwrap();
        let id = rules.len() as i64 + 1;
        rules.push(Rule {
            id,
            project_id,
            text: text.to_string(),
            mode,
        });
    }
}

#[async_trait]
impl RuleStore for InMemoryRules {
    async fn rules_for(&self, project_id: i64) -> Result<Vec<Rule>> {
        let rules = self.rules.read().unwrap();
        Ok(rules
            .iter()
            .filter(|r| r.project_id.is_none() || r.project_id == Some(project_id))
            .cloned()
            .collect())
    }
}

/// In-memory blob map keyed by `(project_id, key)`.
#[derive(Default)]
pub struct InMemoryBlobs {
    blobs: RwLock<HashMap<(i64, String), String>>,
}

impl InMemoryBlobs {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobs {
    async fn read(&self, project_id: i64, key: &str) -> Result<Option<String>> {
        let blobs = self.blobs.read().unwrap();
        Ok(blobs.get(&(project_id, key.to_string())).cloned())
    }

    async fn write(&self, project_id: i64, key: &str, text: &str) -> Result<()> {
        let mut blobs = self.blobs.write().unwrap();
        blobs.insert((project_id, key.to_string()), text.to_string());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<BlobRef>> {
        let blobs = self.blobs.read().unwrap();
        let mut refs: Vec<BlobRef> = blobs
            .keys()
            .map(|(project_id, key)| BlobRef {
                project_id: *project_id,
                key: key.clone(),
            })
            .collect();
        refs.sort_by(|a, b| (a.project_id, &a.key).cmp(&(b.project_id, &b.key)));
        Ok(refs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_history_recent_is_newest_first() {
        let store = InMemoryHistory::new();
        store.append(1, "q1", "a1").await.unwrap();
        store.append(1, "q2", "a2").await.unwrap();
        store.append(1, "q3", "a3").await.unwrap();

        let recent = store.recent(1, 2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].question, "q3");
        assert_eq!(recent[1].question, "q2");
    }

    #[tokio::test]
    async fn test_history_is_per_project() {
        let store = InMemoryHistory::new();
        store.append(1, "q1", "a1").await.unwrap();
        assert!(store.recent(2, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rules_merge_global_and_project() {
        let store = InMemoryRules::new();
        store.add(None, "global rule", RuleMode::Enforce);
        store.add(Some(1), "project rule", RuleMode::Warn);
        store.add(Some(2), "other project", RuleMode::Enforce);

        let rules = store.rules_for(1).await.unwrap();
        assert_eq!(rules.len(), 2);
    }

    #[tokio::test]
    async fn test_blobs_roundtrip_and_list() {
        let store = InMemoryBlobs::new();
        assert!(store.read(1, "notes").await.unwrap().is_none());

        store.write(1, "notes", "text").await.unwrap();
        assert_eq!(store.read(1, "notes").await.unwrap().as_deref(), Some("text"));

        store.write(2, "synopsis", "other").await.unwrap();
        let refs = store.list().await.unwrap();
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].project_id, 1);
    }
}
