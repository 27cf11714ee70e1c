//! SQLite-backed implementations of the storage collaborator traits,
//! plus the project and uploaded-file records that only exist at the
//! application layer.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{Row, SqlitePool};

use coauthor_core::models::{ComicLayout, HistoryTurn, Project, ProjectKind, Rule, RuleMode};
use coauthor_core::store::{BlobRef, BlobStore, HistoryStore, RuleStore};

/// Blob key of a project's general notes.
pub const NOTES_KEY: &str = "notes";
/// Blob key of a project's synopsis.
pub const SYNOPSIS_KEY: &str = "synopsis";

/// Blob key for an uploaded file's extracted text.
pub fn file_key(file_id: &str) -> String {
    format!("file_{file_id}")
}

/// An uploaded file record. The extracted text lives in the blob store
/// under [`file_key`]; each file gets its own vector index.
#[derive(Debug, Clone, Serialize)]
pub struct StoredFile {
    pub id: String,
    pub project_id: i64,
    pub filename: String,
    pub kind: String,
    pub size: i64,
    pub created_at: DateTime<Utc>,
}

pub struct SqliteStores {
    pool: SqlitePool,
}

impl SqliteStores {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn create_project(
        &self,
        name: &str,
        kind: ProjectKind,
        comic: Option<ComicLayout>,
    ) -> Result<Project> {
        let now = Utc::now().timestamp();
        let result = sqlx::query(
            r#"
            INSERT INTO projects (name, kind, chapters, total_pages, frames_per_page, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(name)
        .bind(kind.as_str())
        .bind(comic.map(|c| c.chapters as i64))
        .bind(comic.map(|c| c.total_pages as i64))
        .bind(comic.map(|c| c.frames_per_page as i64))
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(Project {
            id: result.last_insert_rowid(),
            name: name.to_string(),
            kind,
            comic,
            words_per_chapter_min: None,
            words_per_chapter_max: None,
        })
    }

    pub async fn get_project(&self, id: i64) -> Result<Option<Project>> {
        let row = sqlx::query(
            r#"
            SELECT id, name, kind, chapters, total_pages, frames_per_page,
                   words_per_chapter_min, words_per_chapter_max
            FROM projects WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(row_to_project))
    }

    pub async fn list_projects(&self) -> Result<Vec<Project>> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, kind, chapters, total_pages, frames_per_page,
                   words_per_chapter_min, words_per_chapter_max
            FROM projects ORDER BY id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(row_to_project).collect())
    }

    pub async fn set_chapter_words(&self, project_id: i64, min: u32, max: u32) -> Result<()> {
        sqlx::query(
            "UPDATE projects SET words_per_chapter_min = ?, words_per_chapter_max = ? WHERE id = ?",
        )
        .bind(min as i64)
        .bind(max as i64)
        .bind(project_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn add_rule(
        &self,
        project_id: Option<i64>,
        text: &str,
        mode: RuleMode,
    ) -> Result<i64> {
        let now = Utc::now().timestamp();
        let result = sqlx::query(
            "INSERT INTO rules (project_id, text, mode, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(project_id)
        .bind(text)
        .bind(mode.as_str())
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn update_rule(&self, id: i64, text: &str, mode: RuleMode) -> Result<()> {
        sqlx::query("UPDATE rules SET text = ?, mode = ? WHERE id = ?")
            .bind(text)
            .bind(mode.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn delete_rule(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM rules WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn register_file(
        &self,
        id: &str,
        project_id: i64,
        filename: &str,
        kind: &str,
        size: i64,
    ) -> Result<()> {
        let now = Utc::now().timestamp();
        sqlx::query(
            "INSERT INTO files (id, project_id, filename, kind, size, created_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(project_id)
        .bind(filename)
        .bind(kind)
        .bind(size)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list_files(&self, project_id: i64) -> Result<Vec<StoredFile>> {
        let rows = sqlx::query(
            "SELECT id, project_id, filename, kind, size, created_at FROM files WHERE project_id = ? ORDER BY created_at DESC",
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| StoredFile {
                id: r.get("id"),
                project_id: r.get("project_id"),
                filename: r.get("filename"),
                kind: r.get("kind"),
                size: r.get("size"),
                created_at: ts_to_datetime(r.get("created_at")),
            })
            .collect())
    }

    pub async fn delete_file(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM files WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn delete_blob(&self, project_id: i64, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM blobs WHERE project_id = ? AND key = ?")
            .bind(project_id)
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get_file(&self, id: &str) -> Result<Option<StoredFile>> {
        let row = sqlx::query(
            "SELECT id, project_id, filename, kind, size, created_at FROM files WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| StoredFile {
            id: r.get("id"),
            project_id: r.get("project_id"),
            filename: r.get("filename"),
            kind: r.get("kind"),
            size: r.get("size"),
            created_at: ts_to_datetime(r.get("created_at")),
        }))
    }
}

fn row_to_project(row: sqlx::sqlite::SqliteRow) -> Project {
    let kind_str: String = row.get("kind");
    let chapters: Option<i64> = row.get("chapters");
    let total_pages: Option<i64> = row.get("total_pages");
    let frames_per_page: Option<i64> = row.get("frames_per_page");

    let comic = match (chapters, total_pages, frames_per_page) {
        (Some(c), Some(p), Some(f)) => Some(ComicLayout {
            chapters: c as u32,
            total_pages: p as u32,
            frames_per_page: f as u32,
        }),
        _ => None,
    };

    let min: Option<i64> = row.get("words_per_chapter_min");
    let max: Option<i64> = row.get("words_per_chapter_max");

    Project {
        id: row.get("id"),
        name: row.get("name"),
        kind: ProjectKind::parse(&kind_str).unwrap_or(ProjectKind::Prose),
        comic,
        words_per_chapter_min: min.map(|v| v as u32),
        words_per_chapter_max: max.map(|v| v as u32),
    }
}

fn ts_to_datetime(ts: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(ts, 0).unwrap_or_default()
}

#[async_trait]
impl HistoryStore for SqliteStores {
    async fn append(&self, project_id: i64, question: &str, answer: &str) -> Result<()> {
        let now = Utc::now().timestamp();
        sqlx::query(
            "INSERT INTO history (project_id, question, answer, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(project_id)
        .bind(question)
        .bind(answer)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn recent(&self, project_id: i64, limit: usize) -> Result<Vec<HistoryTurn>> {
        let rows = sqlx::query(
            r#"
            SELECT question, answer, created_at FROM history
            WHERE project_id = ?
            ORDER BY created_at DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(project_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| HistoryTurn {
                question: r.get("question"),
                answer: r.get("answer"),
                created_at: ts_to_datetime(r.get("created_at")),
            })
            .collect())
    }

    async fn clear(&self, project_id: i64) -> Result<()> {
        sqlx::query("DELETE FROM history WHERE project_id = ?")
            .bind(project_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl RuleStore for SqliteStores {
    async fn rules_for(&self, project_id: i64) -> Result<Vec<Rule>> {
        let rows = sqlx::query(
            "SELECT id, project_id, text, mode FROM rules WHERE project_id IS NULL OR project_id = ? ORDER BY id ASC",
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| {
                let mode_str: String = r.get("mode");
                Rule {
                    id: r.get("id"),
                    project_id: r.get("project_id"),
                    text: r.get("text"),
                    mode: RuleMode::parse(&mode_str).unwrap_or(RuleMode::Enforce),
                }
            })
            .collect())
    }
}

#[async_trait]
impl BlobStore for SqliteStores {
    async fn read(&self, project_id: i64, key: &str) -> Result<Option<String>> {
        let text: Option<String> =
            sqlx::query_scalar("SELECT text FROM blobs WHERE project_id = ? AND key = ?")
                .bind(project_id)
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;
        Ok(text)
    }

    async fn write(&self, project_id: i64, key: &str, text: &str) -> Result<()> {
        let now = Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO blobs (project_id, key, text, updated_at) VALUES (?, ?, ?, ?)
            ON CONFLICT(project_id, key) DO UPDATE SET
                text = excluded.text,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(project_id)
        .bind(key)
        .bind(text)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<BlobRef>> {
        let rows = sqlx::query("SELECT project_id, key FROM blobs ORDER BY project_id, key")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|r| BlobRef {
                project_id: r.get("project_id"),
                key: r.get("key"),
            })
            .collect())
    }
}
