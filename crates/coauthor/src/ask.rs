//! The ask pipeline: assemble context, render the prompt, call the
//! model, post-process, and record history.
//!
//! Discussion tasks skip assembly entirely (their context is the prior
//! content plus the transcript). `breakdown_chapter` is a two-call task:
//! the chapter's synopsis is extracted from the full synopsis by a
//! dedicated generation call before the breakdown prompt is rendered.
//! Division and breakdown answers are working material, not chat turns,
//! so they are not appended to history.

use anyhow::{bail, Result};

use coauthor_core::chapters::clean_division_output;
use coauthor_core::clients::{GenerationClient, GenerationParams};
use coauthor_core::models::{
    DiscussTask, DivisionSpec, GenerationRequest, Persona, Project, TaskKind, WriteKind,
};
use coauthor_core::prompt::{build_prompt, chapter_extraction_prompt};
use coauthor_core::store::{BlobStore, HistoryStore, RuleStore};

use crate::assemble::{Assembler, RequestSources};
use crate::stores::SYNOPSIS_KEY;

/// What the caller is asking for.
#[derive(Debug, Clone)]
pub enum AskMode {
    Brainstorm,
    Write(WriteTask),
    Discuss(DiscussTask),
}

#[derive(Debug, Clone)]
pub enum WriteTask {
    Plain(WriteKind),
    /// `synopsis: None` reads the project's stored synopsis blob.
    DivideSynopsis {
        spec: DivisionSpec,
        synopsis: Option<String>,
    },
    BreakdownChapter {
        chapter: String,
    },
}

#[derive(Debug, Clone)]
pub struct AskInput {
    pub project: Project,
    pub text: String,
    pub mode: AskMode,
    pub sources: RequestSources,
    pub persona: Persona,
    pub temperature: f32,
}

pub struct AskDeps<'a> {
    pub assembler: Assembler<'a>,
    pub rules: &'a dyn RuleStore,
    pub history: &'a dyn HistoryStore,
    pub blobs: &'a dyn BlobStore,
    pub generator: &'a dyn GenerationClient,
}

/// Run one ask call end to end and return the answer text.
pub async fn run_ask(deps: &AskDeps<'_>, input: AskInput) -> Result<String> {
    let project = &input.project;
    let rules = deps.rules.rules_for(project.id).await?;
    let params = GenerationParams {
        temperature: input.temperature,
    };

    // Discussion tasks never consult retrieval.
    let context = match &input.mode {
        AskMode::Discuss(_) => Default::default(),
        _ => {
            deps.assembler
                .assemble(project.id, &input.text, &input.sources)
                .await?
        }
    };

    let task = match &input.mode {
        AskMode::Brainstorm => TaskKind::Brainstorm,
        AskMode::Discuss(task) => TaskKind::Discuss(task.clone()),
        AskMode::Write(WriteTask::Plain(kind)) => TaskKind::Write(*kind),
        AskMode::Write(WriteTask::DivideSynopsis { spec, synopsis }) => {
            let synopsis_text = match synopsis {
                Some(t) => t.clone(),
                None => deps
                    .blobs
                    .read(project.id, SYNOPSIS_KEY)
                    .await?
                    .unwrap_or_default(),
            };
            if synopsis_text.trim().is_empty() {
                bail!("Synopsis is empty, nothing to divide");
            }
            TaskKind::DivideSynopsis {
                spec: spec.clone(),
                synopsis: synopsis_text,
            }
        }
        AskMode::Write(WriteTask::BreakdownChapter { chapter }) => {
            let full_synopsis = deps
                .blobs
                .read(project.id, SYNOPSIS_KEY)
                .await?
                .unwrap_or_default();
            if full_synopsis.trim().is_empty() {
                bail!("Synopsis is empty, divide it into chapters first");
            }

            // First call: narrow the synopsis down to the one chapter.
            let extraction = chapter_extraction_prompt(chapter, &full_synopsis);
            let chapter_synopsis = deps
                .generator
                .generate(&extraction, &params)
                .await?
                .into_text()?;

            TaskKind::BreakdownChapter {
                chapter: chapter.clone(),
                chapter_synopsis,
            }
        }
    };

    let is_divide = matches!(task, TaskKind::DivideSynopsis { .. });

    let request = GenerationRequest {
        task,
        free_text: input.text.clone(),
        context,
        project_kind: project.kind,
        comic_layout: project.comic,
        persona: input.persona,
        temperature: input.temperature,
    };

    let prompt = build_prompt(&request, &rules);
    let answer = deps.generator.generate(&prompt, &params).await?.into_text()?;

    let answer = if is_divide {
        clean_division_output(&answer)
    } else {
        answer
    };

    if let Some(tag) = history_tag(&input.mode) {
        deps.history
            .append(project.id, &format!("{tag} {}", input.text), &answer)
            .await?;
    }

    Ok(answer)
}

/// History tag for the turn, or `None` when the call is working material
/// (division, breakdown, discussions) rather than a chat turn.
fn history_tag(mode: &AskMode) -> Option<String> {
    match mode {
        AskMode::Brainstorm => Some("【brainstorm】".to_string()),
        AskMode::Write(WriteTask::Plain(kind)) => {
            let kind = match kind {
                WriteKind::Outline => "outline",
                WriteKind::Draft => "draft",
                WriteKind::Rewrite => "rewrite",
            };
            Some(format!("【write:{kind}】"))
        }
        AskMode::Write(WriteTask::DivideSynopsis { .. })
        | AskMode::Write(WriteTask::BreakdownChapter { .. })
        | AskMode::Discuss(_) => None,
    }
}
