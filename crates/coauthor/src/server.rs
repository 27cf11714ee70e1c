//! JSON HTTP API.
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check |
//! | `GET`  | `/projects` | List projects |
//! | `POST` | `/projects` | Create a project |
//! | `GET`  | `/projects/{id}/blobs/{key}` | Read notes/synopsis text |
//! | `PUT`  | `/projects/{id}/blobs/{key}` | Save text (notes rebuild their index before returning) |
//! | `GET`  | `/projects/{id}/history` | Recent chat turns |
//! | `POST` | `/projects/{id}/history/clear` | Clear chat history |
//! | `GET`  | `/projects/{id}/rules` | List rules (global + project) |
//! | `POST` | `/projects/{id}/rules` | Add a rule |
//! | `PUT`  | `/rules/{rule_id}` | Update a rule |
//! | `DELETE` | `/rules/{rule_id}` | Delete a rule |
//! | `POST` | `/projects/{id}/files` | Upload a file (base64), extract text, index it |
//! | `GET`  | `/projects/{id}/files` | List uploaded files |
//! | `DELETE` | `/files/{file_id}` | Delete an upload, its text, and its index |
//! | `POST` | `/projects/{id}/ask` | Run the ask pipeline |
//! | `POST` | `/projects/{id}/review` | Start a review job |
//! | `POST` | `/projects/{id}/review/discuss` | Follow-up question on a review report |
//! | `GET`  | `/review/{job_id}` | Job status, progress, result |
//! | `POST` | `/review/{job_id}/cancel` | Request cancellation |
//!
//! Errors follow `{ "error": { "code": ..., "message": ... } }`.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use uuid::Uuid;

use coauthor_core::models::{
    ComicLayout, DiscussTask, DivisionSpec, Persona, ProjectKind, ReviewKind, RuleMode, WriteKind,
};
use coauthor_core::prompt::{review_followup_prompt, rules_preamble};
use coauthor_core::store::{BlobStore, HistoryStore, RuleStore};

use crate::ask::{run_ask, AskDeps, AskInput, AskMode, WriteTask};
use crate::assemble::{Assembler, FileRef, RequestSources};
use crate::extract::extract_text;
use crate::review::{run_review, ReviewJob};
use crate::stores::{file_key, NOTES_KEY};
use crate::AppContext;

#[derive(Clone)]
struct AppState {
    ctx: Arc<AppContext>,
    jobs: Arc<Mutex<HashMap<String, ReviewJob>>>,
}

/// Start serving on the configured bind address. Runs until the process
/// is terminated.
pub async fn run_server(ctx: Arc<AppContext>) -> anyhow::Result<()> {
    let bind_addr = ctx.config.server.bind.clone();
    let state = AppState {
        ctx,
        jobs: Arc::new(Mutex::new(HashMap::new())),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/health", get(handle_health))
        .route("/projects", get(handle_list_projects).post(handle_create_project))
        .route(
            "/projects/{id}/blobs/{key}",
            get(handle_get_blob).put(handle_put_blob),
        )
        .route("/projects/{id}/history", get(handle_history))
        .route("/projects/{id}/history/clear", post(handle_history_clear))
        .route(
            "/projects/{id}/rules",
            get(handle_list_rules).post(handle_add_rule),
        )
        .route("/rules/{rule_id}", put(handle_update_rule).delete(handle_delete_rule))
        .route(
            "/projects/{id}/files",
            get(handle_list_files).post(handle_upload_file),
        )
        .route("/files/{file_id}", axum::routing::delete(handle_delete_file))
        .route("/projects/{id}/ask", post(handle_ask))
        .route("/projects/{id}/review", post(handle_start_review))
        .route("/projects/{id}/review/discuss", post(handle_review_discuss))
        .route("/review/{job_id}", get(handle_review_status))
        .route("/review/{job_id}/cancel", post(handle_review_cancel))
        .layer(cors)
        .with_state(state);

    info!(bind = %bind_addr, "server listening");
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

// ============ Errors ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn internal(err: anyhow::Error) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: err.to_string(),
    }
}

// ============ Health & projects ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[derive(Deserialize)]
struct CreateProjectBody {
    name: String,
    kind: ProjectKind,
    #[serde(default)]
    comic: Option<ComicLayout>,
}

async fn handle_create_project(
    State(state): State<AppState>,
    Json(body): Json<CreateProjectBody>,
) -> Result<Json<serde_json::Value>, AppError> {
    if body.name.trim().is_empty() {
        return Err(bad_request("project name must not be empty"));
    }
    let project = state
        .ctx
        .stores
        .create_project(&body.name, body.kind, body.comic)
        .await
        .map_err(internal)?;
    Ok(Json(serde_json::json!({ "project": project })))
}

async fn handle_list_projects(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    let projects = state.ctx.stores.list_projects().await.map_err(internal)?;
    Ok(Json(serde_json::json!({ "projects": projects })))
}

// ============ Blobs (notes / synopsis) ============

async fn handle_get_blob(
    State(state): State<AppState>,
    Path((id, key)): Path<(i64, String)>,
) -> Result<Json<serde_json::Value>, AppError> {
    let text = state
        .ctx
        .stores
        .read(id, &key)
        .await
        .map_err(internal)?
        .unwrap_or_default();
    Ok(Json(serde_json::json!({ "text": text })))
}

#[derive(Deserialize)]
struct PutBlobBody {
    #[serde(default)]
    text: String,
}

/// Save a blob. The general notes rebuild their index synchronously
/// before the save is acknowledged, so retrieval always reflects the
/// latest saved text.
async fn handle_put_blob(
    State(state): State<AppState>,
    Path((id, key)): Path<(i64, String)>,
    Json(body): Json<PutBlobBody>,
) -> Result<Json<serde_json::Value>, AppError> {
    let ctx = &state.ctx;
    ctx.stores.write(id, &key, &body.text).await.map_err(internal)?;

    if key == NOTES_KEY && ctx.config.embedding.is_enabled() {
        let handle = ctx.index.handle(id, &key);
        ctx.index
            .build(ctx.embedder.as_ref(), &body.text, &handle)
            .await
            .map_err(internal)?;
    }

    Ok(Json(serde_json::json!({ "ok": true })))
}

// ============ History ============

async fn handle_history(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, AppError> {
    let turns = state.ctx.stores.recent(id, 100).await.map_err(internal)?;
    Ok(Json(serde_json::json!({ "items": turns })))
}

async fn handle_history_clear(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.ctx.stores.clear(id).await.map_err(internal)?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

// ============ Rules ============

async fn handle_list_rules(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, AppError> {
    let rules = state.ctx.stores.rules_for(id).await.map_err(internal)?;
    let (global, project): (Vec<_>, Vec<_>) =
        rules.into_iter().partition(|r| r.project_id.is_none());
    Ok(Json(serde_json::json!({ "global": global, "project": project })))
}

#[derive(Deserialize)]
struct AddRuleBody {
    scope: String,
    text: String,
    mode: RuleMode,
}

async fn handle_add_rule(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<AddRuleBody>,
) -> Result<Json<serde_json::Value>, AppError> {
    if body.text.trim().is_empty() {
        return Err(bad_request("rule text must not be empty"));
    }
    let project_id = match body.scope.as_str() {
        "global" => None,
        "project" => Some(id),
        other => return Err(bad_request(format!("unknown rule scope: {other}"))),
    };
    let rule_id = state
        .ctx
        .stores
        .add_rule(project_id, &body.text, body.mode)
        .await
        .map_err(internal)?;
    Ok(Json(serde_json::json!({ "id": rule_id })))
}

#[derive(Deserialize)]
struct UpdateRuleBody {
    text: String,
    mode: RuleMode,
}

async fn handle_update_rule(
    State(state): State<AppState>,
    Path(rule_id): Path<i64>,
    Json(body): Json<UpdateRuleBody>,
) -> Result<Json<serde_json::Value>, AppError> {
    state
        .ctx
        .stores
        .update_rule(rule_id, &body.text, body.mode)
        .await
        .map_err(internal)?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

async fn handle_delete_rule(
    State(state): State<AppState>,
    Path(rule_id): Path<i64>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.ctx.stores.delete_rule(rule_id).await.map_err(internal)?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

// ============ Files ============

#[derive(Deserialize)]
struct UploadBody {
    filename: String,
    /// Base64-encoded file bytes.
    data: String,
    /// `temp` or `library`.
    #[serde(default = "default_file_kind")]
    kind: String,
}

fn default_file_kind() -> String {
    "library".to_string()
}

async fn handle_upload_file(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<UploadBody>,
) -> Result<Json<serde_json::Value>, AppError> {
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine as _;

    let bytes = BASE64
        .decode(&body.data)
        .map_err(|e| bad_request(format!("invalid base64 payload: {e}")))?;

    let text = extract_text(&bytes, &body.filename)
        .map_err(|e| bad_request(format!("{e:#}")))?;

    let file_id = Uuid::new_v4().simple().to_string();
    let ctx = &state.ctx;

    ctx.stores
        .register_file(&file_id, id, &body.filename, &body.kind, bytes.len() as i64)
        .await
        .map_err(internal)?;

    let key = file_key(&file_id);
    ctx.stores.write(id, &key, &text).await.map_err(internal)?;

    if ctx.config.embedding.is_enabled() {
        let handle = ctx.index.handle(id, &key);
        ctx.index
            .build(ctx.embedder.as_ref(), &text, &handle)
            .await
            .map_err(internal)?;
    }

    Ok(Json(serde_json::json!({ "id": file_id, "filename": body.filename })))
}

async fn handle_list_files(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, AppError> {
    let files = state.ctx.stores.list_files(id).await.map_err(internal)?;
    Ok(Json(serde_json::json!({ "items": files })))
}

/// Delete an upload: its record, its extracted text, and its index.
async fn handle_delete_file(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let ctx = &state.ctx;
    let file = ctx
        .stores
        .get_file(&file_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| not_found(format!("no file with id {file_id}")))?;

    let key = file_key(&file.id);
    let handle = ctx.index.handle(file.project_id, &key);
    ctx.index.remove(&handle).await.map_err(internal)?;
    ctx.stores
        .delete_blob(file.project_id, &key)
        .await
        .map_err(internal)?;
    ctx.stores.delete_file(&file.id).await.map_err(internal)?;

    Ok(Json(serde_json::json!({ "ok": true })))
}

// ============ Ask ============

#[derive(Deserialize)]
struct AskBody {
    #[serde(default)]
    text: String,
    /// `brainstorm` or `write`.
    #[serde(default = "default_mode")]
    mode: String,
    /// For `write`: `outline`, `draft`, `rewrite`, `divide_synopsis`,
    /// `breakdown_chapter`.
    #[serde(default)]
    write_kind: Option<String>,
    #[serde(default = "default_true")]
    use_notes: bool,
    #[serde(default = "default_true")]
    use_history: bool,
    #[serde(default)]
    persona: Persona,
    #[serde(default)]
    temperature: Option<f32>,
    #[serde(default)]
    temp_file_ids: Vec<String>,
    #[serde(default)]
    library_file_ids: Vec<String>,
    /// Division inputs.
    #[serde(default)]
    synopsis_text: Option<String>,
    #[serde(default)]
    words_per_chapter_min: Option<u32>,
    #[serde(default)]
    words_per_chapter_max: Option<u32>,
    /// Discussion inputs.
    #[serde(default)]
    discussion: Option<DiscussTask>,
}

fn default_mode() -> String {
    "brainstorm".to_string()
}
fn default_true() -> bool {
    true
}

async fn handle_ask(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<AskBody>,
) -> Result<Json<serde_json::Value>, AppError> {
    let ctx = &state.ctx;
    let project = ctx
        .stores
        .get_project(id)
        .await
        .map_err(internal)?
        .ok_or_else(|| not_found(format!("no project with id {id}")))?;

    let mode = parse_mode(&body, &project).map_err(bad_request)?;

    // Division calls carry updated per-chapter word targets.
    if matches!(
        &mode,
        AskMode::Write(WriteTask::DivideSynopsis { .. })
    ) && project.kind == ProjectKind::Prose
    {
        if let (Some(min), Some(max)) = (body.words_per_chapter_min, body.words_per_chapter_max) {
            ctx.stores
                .set_chapter_words(id, min, max)
                .await
                .map_err(internal)?;
        }
    }

    let mut temp_files = Vec::new();
    for file_id in &body.temp_file_ids {
        if let Some(f) = ctx.stores.get_file(file_id).await.map_err(internal)? {
            temp_files.push(FileRef {
                id: f.id,
                filename: f.filename,
            });
        }
    }
    let mut library_files = Vec::new();
    for file_id in &body.library_file_ids {
        if let Some(f) = ctx.stores.get_file(file_id).await.map_err(internal)? {
            library_files.push(FileRef {
                id: f.id,
                filename: f.filename,
            });
        }
    }

    let input = AskInput {
        project,
        text: body.text.clone(),
        mode,
        sources: RequestSources {
            use_notes: body.use_notes,
            use_history: body.use_history,
            history_turns: ctx.config.retrieval.history_turns,
            temp_files,
            library_files,
        },
        persona: body.persona,
        temperature: body.temperature.unwrap_or(ctx.config.generation.temperature),
    };

    let deps = AskDeps {
        assembler: Assembler {
            index: &ctx.index,
            embedder: ctx.embedder.as_ref(),
            history: &ctx.stores,
            blobs: &ctx.stores,
            retrieval: &ctx.config.retrieval,
            slice_profile: ctx.config.chunking.retrieval,
        },
        rules: &ctx.stores,
        history: &ctx.stores,
        blobs: &ctx.stores,
        generator: ctx.generator.as_ref(),
    };

    let answer = run_ask(&deps, input).await.map_err(internal)?;
    Ok(Json(serde_json::json!({ "answer": answer })))
}

fn parse_mode(
    body: &AskBody,
    project: &coauthor_core::models::Project,
) -> Result<AskMode, String> {
    if let Some(discussion) = &body.discussion {
        return Ok(AskMode::Discuss(discussion.clone()));
    }

    match body.mode.as_str() {
        "brainstorm" => Ok(AskMode::Brainstorm),
        "write" => {
            let task = match body.write_kind.as_deref() {
                Some("outline") | None => WriteTask::Plain(WriteKind::Outline),
                Some("draft") => WriteTask::Plain(WriteKind::Draft),
                Some("rewrite") => WriteTask::Plain(WriteKind::Rewrite),
                Some("divide_synopsis") => {
                    let spec = match project.kind {
                        ProjectKind::Prose => DivisionSpec::Prose {
                            min_words: body
                                .words_per_chapter_min
                                .or(project.words_per_chapter_min)
                                .unwrap_or(1500),
                            max_words: body
                                .words_per_chapter_max
                                .or(project.words_per_chapter_max)
                                .unwrap_or(3000),
                        },
                        ProjectKind::Comic => DivisionSpec::Comic {
                            num_chapters: project.comic.map(|c| c.chapters).unwrap_or(18),
                        },
                    };
                    WriteTask::DivideSynopsis {
                        spec,
                        synopsis: body.synopsis_text.clone(),
                    }
                }
                Some("breakdown_chapter") => WriteTask::BreakdownChapter {
                    chapter: body.text.clone(),
                },
                Some(other) => return Err(format!("unknown write_kind: {other}")),
            };
            Ok(AskMode::Write(task))
        }
        other => Err(format!("unknown mode: {other}")),
    }
}

// ============ Review ============

#[derive(Deserialize)]
struct StartReviewBody {
    /// `general` or `proofread`.
    kind: String,
    /// Text to review; empty falls back to the project's general notes.
    #[serde(default)]
    text: String,
    #[serde(default)]
    temperature: Option<f32>,
}

async fn handle_start_review(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<StartReviewBody>,
) -> Result<Json<serde_json::Value>, AppError> {
    let ctx = &state.ctx;
    let kind = ReviewKind::parse(&body.kind)
        .ok_or_else(|| bad_request(format!("unknown review kind: {}", body.kind)))?;

    let text = if body.text.trim().is_empty() {
        ctx.stores
            .read(id, NOTES_KEY)
            .await
            .map_err(internal)?
            .unwrap_or_default()
    } else {
        body.text.clone()
    };
    if text.trim().is_empty() {
        return Err(bad_request("nothing to review: no text and empty notes"));
    }

    let preamble = match kind {
        ReviewKind::General => {
            rules_preamble(&ctx.stores.rules_for(id).await.map_err(internal)?)
        }
        ReviewKind::Proofread => String::new(),
    };

    let job = ReviewJob::new(kind);
    let job_id = Uuid::new_v4().simple().to_string();
    state.jobs.lock().unwrap().insert(job_id.clone(), job.clone());

    let generator = ctx.generator.clone();
    let review_config = ctx.config.review.clone();
    let profile = ctx.config.chunking.review;
    let temperature = body.temperature.unwrap_or(ctx.config.generation.temperature);
    let spawn_job = job.clone();
    let spawn_id = job_id.clone();

    tokio::spawn(async move {
        let status = run_review(
            &spawn_job,
            generator,
            &review_config,
            &profile,
            &preamble,
            &text,
            temperature,
        )
        .await;
        info!(job_id = %spawn_id, status = ?status, "review job finished");
    });

    Ok(Json(serde_json::json!({ "job_id": job_id })))
}

#[derive(Deserialize)]
struct ReviewDiscussBody {
    /// The text the review was run on.
    input_text: String,
    /// The review report being discussed.
    report: String,
    question: String,
}

/// Follow-up question against an existing review report. Stateless:
/// the caller supplies the reviewed text and the report.
async fn handle_review_discuss(
    State(state): State<AppState>,
    Path(_id): Path<i64>,
    Json(body): Json<ReviewDiscussBody>,
) -> Result<Json<serde_json::Value>, AppError> {
    if body.question.trim().is_empty() {
        return Err(bad_request("question must not be empty"));
    }

    let ctx = &state.ctx;
    let prompt = review_followup_prompt(&body.input_text, &body.report, &body.question);
    let answer = ctx
        .generator
        .generate(
            &prompt,
            &coauthor_core::clients::GenerationParams {
                temperature: ctx.config.generation.temperature,
            },
        )
        .await
        .map_err(internal)?
        .into_text()
        .map_err(internal)?;

    Ok(Json(serde_json::json!({ "answer": answer })))
}

async fn handle_review_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let job = state
        .jobs
        .lock()
        .unwrap()
        .get(&job_id)
        .cloned()
        .ok_or_else(|| not_found(format!("no review job with id {job_id}")))?;

    let (completed, total) = job.progress();
    Ok(Json(serde_json::json!({
        "status": job.status(),
        "completed": completed,
        "total": total,
        "result": job.result(),
        "error": job.error(),
    })))
}

async fn handle_review_cancel(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let job = state
        .jobs
        .lock()
        .unwrap()
        .get(&job_id)
        .cloned()
        .ok_or_else(|| not_found(format!("no review job with id {job_id}")))?;

    job.cancel();
    Ok(Json(serde_json::json!({ "ok": true })))
}
