//! Core data models shared by the retrieval and prompting pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A window of the original text produced by the chunker.
///
/// Offsets are byte positions into the source string and always fall on
/// UTF-8 character boundaries. Windows may overlap; they are produced in
/// left-to-right order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    pub content: String,
    pub start_offset: usize,
    pub end_offset: usize,
}

/// A chunk paired with its keyword-relevance score.
///
/// Scores are non-negative; ties keep original text order (stable sort).
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: TextChunk,
    pub score: f64,
}

/// One chapter of a synopsis or notes blob.
///
/// `title` is the raw matched heading line; `content` is the raw span up
/// to (not including) the next heading. Concatenating `title` + `content`
/// for every segment reproduces the source text from the first heading on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChapterSegment {
    pub title: String,
    pub content: String,
}

/// Assembled-but-not-yet-rendered context for one generation request.
///
/// The assembler fills the four sub-contexts independently; concatenation
/// order and section labels belong to the prompt builder. Per-file labels
/// inside `file_context` are the exception — only the assembler knows the
/// source filenames.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ContextBundle {
    pub notes_context: String,
    pub history_context: String,
    pub file_context: String,
    pub chapter_focus: Option<String>,
}

impl ContextBundle {
    pub fn is_empty(&self) -> bool {
        self.notes_context.is_empty()
            && self.history_context.is_empty()
            && self.file_context.is_empty()
            && self.chapter_focus.is_none()
    }
}

/// Project kind. Prose projects get the literary master preamble that
/// bans visual-media vocabulary; comic projects get page/frame layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectKind {
    Prose,
    Comic,
}

impl ProjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectKind::Prose => "prose",
            ProjectKind::Comic => "comic",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "prose" => Some(ProjectKind::Prose),
            "comic" => Some(ProjectKind::Comic),
            _ => None,
        }
    }
}

/// Assistant persona for brainstorm/write calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Persona {
    #[default]
    Partner,
    Assistant,
}

/// Page/frame layout for comic chapter breakdowns.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ComicLayout {
    pub chapters: u32,
    pub total_pages: u32,
    pub frames_per_page: u32,
}

impl Default for ComicLayout {
    fn default() -> Self {
        Self {
            chapters: 18,
            total_pages: 54,
            frames_per_page: 6,
        }
    }
}

impl ComicLayout {
    pub fn pages_per_chapter(&self) -> u32 {
        if self.chapters == 0 {
            1
        } else {
            (self.total_pages / self.chapters).max(1)
        }
    }
}

/// A writing project.
#[derive(Debug, Clone, Serialize)]
pub struct Project {
    pub id: i64,
    pub name: String,
    pub kind: ProjectKind,
    pub comic: Option<ComicLayout>,
    pub words_per_chapter_min: Option<u32>,
    pub words_per_chapter_max: Option<u32>,
}

/// Chapter-division targets for `divide_synopsis`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DivisionSpec {
    /// Prose: aim for chapters of this written length, narrative flow first.
    Prose { min_words: u32, max_words: u32 },
    /// Comic: divide into exactly this many chapters.
    Comic { num_chapters: u32 },
}

/// Kind of a plain `write` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteKind {
    Outline,
    Draft,
    Rewrite,
}

/// Review flavor, for both chunk calls and synthesis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewKind {
    General,
    Proofread,
}

impl ReviewKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewKind::General => "general",
            ReviewKind::Proofread => "proofread",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "general" => Some(ReviewKind::General),
            "proofread" => Some(ReviewKind::Proofread),
            _ => None,
        }
    }
}

/// Discussion-driven rewrite flavors. These tasks replace retrieval
/// context with a `{prior content, discussion transcript}` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscussKind {
    SynopsisUpdate,
    DivisionUpdate,
    ChapterSummary,
    SceneUpdate,
    DraftUpdate,
}

/// Payload of a discussion task: what is being revised and the transcript
/// that drives the revision. `surrounding` carries the wider document the
/// revised piece must stay consistent with (full synopsis, chapter
/// outline, or scene description, depending on the kind).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscussTask {
    pub kind: DiscussKind,
    pub prior: String,
    pub transcript: String,
    pub surrounding: Option<String>,
}

/// What the caller is asking the model to do.
#[derive(Debug, Clone)]
pub enum TaskKind {
    Brainstorm,
    Write(WriteKind),
    /// Insert chapter headings into the synopsis without altering its text.
    DivideSynopsis {
        spec: DivisionSpec,
        synopsis: String,
    },
    /// Two-step task: the chapter's synopsis is extracted first (separate
    /// generation call), then the breakdown prompt is rendered over it.
    BreakdownChapter {
        chapter: String,
        chapter_synopsis: String,
    },
    Discuss(DiscussTask),
}

/// A fully-specified generation request, ready for prompt rendering.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub task: TaskKind,
    pub free_text: String,
    pub context: ContextBundle,
    pub project_kind: ProjectKind,
    pub comic_layout: Option<ComicLayout>,
    pub persona: Persona,
    pub temperature: f32,
}

/// One question/answer turn of a project's chat history.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryTurn {
    pub question: String,
    pub answer: String,
    pub created_at: DateTime<Utc>,
}

/// Enforcement mode of a rule. Only `Enforce` rules reach the prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleMode {
    Enforce,
    Warn,
    Off,
}

impl RuleMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleMode::Enforce => "enforce",
            RuleMode::Warn => "warn",
            RuleMode::Off => "off",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "enforce" => Some(RuleMode::Enforce),
            "warn" => Some(RuleMode::Warn),
            "off" => Some(RuleMode::Off),
            _ => None,
        }
    }
}

/// A writing rule. `project_id == None` means the rule is global.
#[derive(Debug, Clone, Serialize)]
pub struct Rule {
    pub id: i64,
    pub project_id: Option<i64>,
    pub text: String,
    pub mode: RuleMode,
}
