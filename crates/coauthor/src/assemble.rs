//! Context assembly for generation requests.
//!
//! Given a free-text query and the caller's source toggles, the
//! assembler fills a [`ContextBundle`] from four places: the notes
//! index (or an exact chapter extraction), the chat history, and the
//! per-file indexes of any referenced uploads. Section labeling is the
//! prompt builder's job; only the per-file labels are applied here,
//! since only the assembler knows which file produced which excerpt.
//!
//! # Chapter priority
//!
//! A query that names a chapter (`תן לי את פרק 2`) gets that chapter's
//! full text, not semantically similar fragments — exact extraction
//! beats the index whenever the reference pattern matches and notes are
//! enabled. When the chapter cannot be found the bundle carries a short
//! explanation instead of silently falling back to semantic search;
//! retrieval failure stays visible in the assembled context.

use anyhow::Result;

use coauthor_core::chapters;
use coauthor_core::clients::EmbeddingClient;
use coauthor_core::models::ContextBundle;
use coauthor_core::score::{select_slices, SliceParams};
use coauthor_core::store::{BlobStore, HistoryStore};

use crate::config::{ChunkProfile, RetrievalConfig};
use crate::index::IndexManager;
use crate::stores::{file_key, NOTES_KEY};

/// One referenced upload.
#[derive(Debug, Clone)]
pub struct FileRef {
    pub id: String,
    pub filename: String,
}

/// Which sources feed the context of a request.
#[derive(Debug, Clone)]
pub struct RequestSources {
    pub use_notes: bool,
    pub use_history: bool,
    pub history_turns: usize,
    pub temp_files: Vec<FileRef>,
    pub library_files: Vec<FileRef>,
}

impl Default for RequestSources {
    fn default() -> Self {
        Self {
            use_notes: true,
            use_history: true,
            history_turns: 10,
            temp_files: Vec::new(),
            library_files: Vec::new(),
        }
    }
}

pub struct Assembler<'a> {
    pub index: &'a IndexManager,
    pub embedder: &'a dyn EmbeddingClient,
    pub history: &'a dyn HistoryStore,
    pub blobs: &'a dyn BlobStore,
    pub retrieval: &'a RetrievalConfig,
    /// Chunking profile for the keyword-slice fallback.
    pub slice_profile: ChunkProfile,
}

impl Assembler<'_> {
    pub async fn assemble(
        &self,
        project_id: i64,
        query: &str,
        sources: &RequestSources,
    ) -> Result<ContextBundle> {
        let mut bundle = ContextBundle::default();

        if sources.use_notes && !query.trim().is_empty() {
            match chapters::find_chapter_reference(query) {
                Some(chapter_id) => {
                    let notes = self
                        .blobs
                        .read(project_id, NOTES_KEY)
                        .await?
                        .unwrap_or_default();
                    bundle.chapter_focus =
                        Some(match chapters::extract_chapter(&notes, &chapter_id) {
                            Some(content) => content.trim().to_string(),
                            None => format!(
                                "ניסיתי למצוא את פרק {chapter_id} ב'קובץ כללי' אך לא מצאתי אותו."
                            ),
                        });
                }
                None => {
                    let hits = self
                        .retrieve(project_id, NOTES_KEY, query, self.retrieval.notes_k)
                        .await?;
                    bundle.notes_context = hits.join("\n---\n");
                }
            }
        }

        bundle.file_context = self.file_context(project_id, query, sources).await?;

        if sources.use_history {
            let turns = self
                .history
                .recent(project_id, sources.history_turns)
                .await?;
            // Stored newest-first; the prompt reads oldest-to-newest.
            bundle.history_context = turns
                .iter()
                .rev()
                .map(|t| format!("ש: {}\nת: {}", t.question, t.answer))
                .collect::<Vec<_>>()
                .join("\n");
        }

        Ok(bundle)
    }

    /// Query each referenced file's own index. Indexes are never merged;
    /// results are grouped per file and labeled with its filename.
    async fn file_context(
        &self,
        project_id: i64,
        query: &str,
        sources: &RequestSources,
    ) -> Result<String> {
        let mut out = String::new();

        for (files, header) in [
            (
                &sources.temp_files,
                "ההקשר הבא מבוסס על קבצים זמניים שהמשתמש העלה:",
            ),
            (
                &sources.library_files,
                "ההקשר הבא מבוסס על קבצים מהספרייה:",
            ),
        ] {
            if files.is_empty() {
                continue;
            }

            let mut section = String::new();
            for file in files.iter() {
                let hits = self
                    .retrieve(project_id, &file_key(&file.id), query, self.retrieval.file_k)
                    .await?;
                if hits.is_empty() {
                    continue;
                }
                section.push_str(&format!("[{}]\n{}\n", file.filename, hits.join("\n---\n")));
            }

            if !section.is_empty() {
                out.push_str(header);
                out.push('\n');
                out.push_str(&section);
            }
        }

        Ok(out.trim_end().to_string())
    }

    /// Retrieve top-`k` excerpts for one blob: semantic search when the
    /// blob has a persisted index, index-free keyword slices otherwise
    /// (embeddings disabled, or transient material never indexed).
    async fn retrieve(
        &self,
        project_id: i64,
        key: &str,
        query: &str,
        k: usize,
    ) -> Result<Vec<String>> {
        let handle = self.index.handle(project_id, key);
        if self.index.exists(&handle) {
            return self.index.query(self.embedder, &handle, query, k).await;
        }

        let text = match self.blobs.read(project_id, key).await? {
            Some(t) => t,
            None => return Ok(Vec::new()),
        };

        let params = SliceParams {
            window: self.slice_profile.window,
            overlap: self.slice_profile.overlap,
            top_k: self.retrieval.slice_k,
        };
        Ok(select_slices(&text, query, &params))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChunkProfile;
    use crate::embedding::NgramEmbedder;
    use crate::index::IndexManager;
    use coauthor_core::store::memory::{InMemoryBlobs, InMemoryHistory};

    struct Fixture {
        _dir: tempfile::TempDir,
        index: IndexManager,
        embedder: NgramEmbedder,
        history: InMemoryHistory,
        blobs: InMemoryBlobs,
        retrieval: RetrievalConfig,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let index = IndexManager::new(
                dir.path(),
                ChunkProfile {
                    window: 200,
                    overlap: 40,
                },
            );
            Self {
                _dir: dir,
                index,
                embedder: NgramEmbedder::new(128),
                history: InMemoryHistory::new(),
                blobs: InMemoryBlobs::new(),
                retrieval: RetrievalConfig::default(),
            }
        }

        fn assembler(&self) -> Assembler<'_> {
            Assembler {
                index: &self.index,
                embedder: &self.embedder,
                history: &self.history,
                blobs: &self.blobs,
                retrieval: &self.retrieval,
                slice_profile: ChunkProfile {
                    window: 120,
                    overlap: 20,
                },
            }
        }
    }

    #[tokio::test]
    async fn test_explicit_chapter_reference_returns_full_chapter() {
        let fx = Fixture::new();
        let notes = "פרק 1: פתיחה\nתוכן א\nפרק 2: סיבוך\nתוכן ב";
        fx.blobs.write(1, NOTES_KEY, notes).await.unwrap();
        let handle = fx.index.handle(1, NOTES_KEY);
        fx.index.build(&fx.embedder, notes, &handle).await.unwrap();

        let bundle = fx
            .assembler()
            .assemble(1, "תן לי את פרק 2", &RequestSources::default())
            .await
            .unwrap();

        assert_eq!(bundle.chapter_focus.as_deref(), Some("תוכן ב"));
        // Exact extraction replaces semantic retrieval for the notes.
        assert!(bundle.notes_context.is_empty());
    }

    #[tokio::test]
    async fn test_missing_chapter_yields_explanation_not_silence() {
        let fx = Fixture::new();
        fx.blobs
            .write(1, NOTES_KEY, "פרק 1: פתיחה\nתוכן א")
            .await
            .unwrap();

        let bundle = fx
            .assembler()
            .assemble(1, "תן לי את פרק 7", &RequestSources::default())
            .await
            .unwrap();

        let focus = bundle.chapter_focus.unwrap();
        assert!(focus.contains("פרק 7"));
        assert!(focus.contains("לא מצאתי"));
        assert!(bundle.notes_context.is_empty());
    }

    #[tokio::test]
    async fn test_semantic_notes_retrieval_without_chapter_reference() {
        let fx = Fixture::new();
        let notes = "הדרקון שומר על שער ההר הגבוה מעל העיר. \
                     מיכל הנערה מהעיר התחתית חולמת לטפס אל הפסגה כל חייה. \
                     בשוק המקומי מוכרים תפוחים ודבש לקראת החג.";
        fx.blobs.write(1, NOTES_KEY, notes).await.unwrap();
        let handle = fx.index.handle(1, NOTES_KEY);
        fx.index.build(&fx.embedder, notes, &handle).await.unwrap();

        let bundle = fx
            .assembler()
            .assemble(1, "ספר לי על הדרקון ששומר על השער", &RequestSources::default())
            .await
            .unwrap();

        assert!(bundle.chapter_focus.is_none());
        assert!(bundle.notes_context.contains("דרקון"));
    }

    #[tokio::test]
    async fn test_notes_disabled_skips_both_paths() {
        let fx = Fixture::new();
        fx.blobs
            .write(1, NOTES_KEY, "פרק 2: סיבוך\nתוכן ב")
            .await
            .unwrap();

        let sources = RequestSources {
            use_notes: false,
            ..Default::default()
        };
        let bundle = fx
            .assembler()
            .assemble(1, "תן לי את פרק 2", &sources)
            .await
            .unwrap();

        assert!(bundle.chapter_focus.is_none());
        assert!(bundle.notes_context.is_empty());
    }

    #[tokio::test]
    async fn test_history_rendered_oldest_to_newest() {
        let fx = Fixture::new();
        fx.history.append(1, "שאלה ראשונה", "תשובה ראשונה").await.unwrap();
        fx.history.append(1, "שאלה שניה", "תשובה שניה").await.unwrap();

        let bundle = fx
            .assembler()
            .assemble(1, "שאלה חדשה", &RequestSources::default())
            .await
            .unwrap();

        let first = bundle.history_context.find("שאלה ראשונה").unwrap();
        let second = bundle.history_context.find("שאלה שניה").unwrap();
        assert!(first < second);
    }

    #[tokio::test]
    async fn test_history_window_is_bounded() {
        let fx = Fixture::new();
        for i in 0..15 {
            fx.history
                .append(1, &format!("שאלה-{i}"), &format!("תשובה-{i}"))
                .await
                .unwrap();
        }

        let sources = RequestSources {
            history_turns: 3,
            ..Default::default()
        };
        let bundle = fx.assembler().assemble(1, "עוד", &sources).await.unwrap();

        assert!(bundle.history_context.contains("שאלה-14"));
        assert!(bundle.history_context.contains("שאלה-12"));
        assert!(!bundle.history_context.contains("שאלה-11"));
    }

    #[tokio::test]
    async fn test_file_context_labeled_per_file() {
        let fx = Fixture::new();
        let background = "ממלכת צפון שוכנת בין הרים מושלגים, ובה שבטים של ציידי דרקונים.";
        let key = file_key("f1");
        fx.blobs.write(1, &key, background).await.unwrap();
        let handle = fx.index.handle(1, &key);
        fx.index
            .build(&fx.embedder, background, &handle)
            .await
            .unwrap();

        let sources = RequestSources {
            temp_files: vec![FileRef {
                id: "f1".to_string(),
                filename: "רקע.txt".to_string(),
            }],
            ..Default::default()
        };
        let bundle = fx
            .assembler()
            .assemble(1, "ציידי דרקונים", &sources)
            .await
            .unwrap();

        assert!(bundle.file_context.contains("[רקע.txt]"));
        assert!(bundle.file_context.contains("קבצים זמניים"));
        assert!(bundle.file_context.contains("ממלכת צפון"));
    }

    #[tokio::test]
    async fn test_unindexed_file_contributes_nothing() {
        let fx = Fixture::new();
        let sources = RequestSources {
            library_files: vec![FileRef {
                id: "missing".to_string(),
                filename: "אין.txt".to_string(),
            }],
            ..Default::default()
        };
        let bundle = fx.assembler().assemble(1, "שאלה", &sources).await.unwrap();
        assert!(bundle.file_context.is_empty());
    }

    #[tokio::test]
    async fn test_keyword_slice_fallback_without_index() {
        let fx = Fixture::new();
        // Notes exist but no index was ever built for them.
        let notes = format!(
            "{}הדרקון שומר על שער ההר. {}",
            "משפט רקע שאינו קשור. ".repeat(20),
            "עוד משפט רקע שאינו קשור. ".repeat(20),
        );
        fx.blobs.write(1, NOTES_KEY, &notes).await.unwrap();

        let bundle = fx
            .assembler()
            .assemble(1, "איפה הדרקון", &RequestSources::default())
            .await
            .unwrap();

        assert!(!bundle.notes_context.is_empty());
        assert!(bundle.notes_context.contains("הדרקון"));
    }

    #[tokio::test]
    async fn test_slice_fallback_never_empty_for_nonempty_notes() {
        let fx = Fixture::new();
        fx.blobs
            .write(1, NOTES_KEY, "טקסט שאין לו שום קשר לשאלה")
            .await
            .unwrap();

        let bundle = fx
            .assembler()
            .assemble(1, "query with zero overlap", &RequestSources::default())
            .await
            .unwrap();

        // Zero-relevance source still yields leading slices, not nothing.
        assert!(!bundle.notes_context.is_empty());
    }
}

