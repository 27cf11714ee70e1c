//! # Coauthor CLI
//!
//! ```bash
//! coauthor --config ./coauthor.toml <command>
//! ```
//!
//! | Command | Description |
//! |---------|-------------|
//! | `coauthor init` | Create the SQLite database and schema |
//! | `coauthor serve` | Run the startup index check, then serve the JSON API |
//! | `coauthor ask <project> "<text>"` | One-shot question against a project |
//! | `coauthor index verify` | Rebuild missing or stale blob indexes |

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use coauthor::ask::{run_ask, AskDeps, AskInput, AskMode};
use coauthor::assemble::{Assembler, RequestSources};
use coauthor::{config, db, migrate, server, AppContext};
use coauthor_core::models::Persona;

/// Coauthor — an LLM-assisted writing workbench for prose and comic
/// projects.
#[derive(Parser)]
#[command(
    name = "coauthor",
    about = "Coauthor — an LLM-assisted writing workbench",
    version
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, global = true, default_value = "./coauthor.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Idempotent.
    Init,

    /// Run the startup index consistency check, then serve the JSON API.
    Serve,

    /// Ask a one-shot question against a project's context.
    Ask {
        /// Project id.
        project: i64,
        /// The question or request text.
        text: String,
        /// Skip the general-notes context.
        #[arg(long)]
        no_notes: bool,
        /// Skip the chat-history context.
        #[arg(long)]
        no_history: bool,
        /// Sampling temperature override.
        #[arg(long)]
        temperature: Option<f32>,
    },

    /// Manage the per-blob vector indexes.
    Index {
        #[command(subcommand)]
        action: IndexAction,
    },
}

#[derive(Subcommand)]
enum IndexAction {
    /// Rebuild every index that is missing or stale relative to its blob.
    Verify,
    /// Force-rebuild indexes from the stored blobs, stale or not.
    Rebuild {
        /// Limit the rebuild to one project.
        #[arg(long)]
        project: Option<i64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg).await?;
            migrate::run_migrations(&pool).await?;
            pool.close().await;
            println!("Database initialized successfully.");
        }
        Commands::Serve => {
            let ctx = Arc::new(AppContext::from_config(cfg).await?);
            let rebuilt = ctx.verify_indexes().await?;
            if rebuilt > 0 {
                println!("Rebuilt {rebuilt} stale or missing indexes.");
            }
            server::run_server(ctx).await?;
        }
        Commands::Ask {
            project,
            text,
            no_notes,
            no_history,
            temperature,
        } => {
            let ctx = AppContext::from_config(cfg).await?;
            let project = ctx
                .stores
                .get_project(project)
                .await?
                .ok_or_else(|| anyhow::anyhow!("no project with id {project}"))?;

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

            let answer = run_ask(
                &deps,
                AskInput {
                    project,
                    text,
                    mode: AskMode::Brainstorm,
                    sources: RequestSources {
                        use_notes: !no_notes,
                        use_history: !no_history,
                        history_turns: ctx.config.retrieval.history_turns,
                        temp_files: Vec::new(),
                        library_files: Vec::new(),
                    },
                    persona: Persona::Partner,
                    temperature: temperature.unwrap_or(ctx.config.generation.temperature),
                },
            )
            .await?;

            println!("{answer}");
        }
        Commands::Index { action } => match action {
            IndexAction::Verify => {
                let ctx = AppContext::from_config(cfg).await?;
                let rebuilt = ctx.verify_indexes().await?;
                println!("Rebuilt {rebuilt} indexes.");
            }
            IndexAction::Rebuild { project } => {
                use coauthor_core::store::BlobStore;

                let ctx = AppContext::from_config(cfg).await?;
                if !ctx.config.embedding.is_enabled() {
                    anyhow::bail!("embedding provider is disabled; nothing to rebuild");
                }

                let mut rebuilt = 0usize;
                for blob in ctx.stores.list().await? {
                    if project.is_some_and(|p| p != blob.project_id) {
                        continue;
                    }
                    let text = ctx
                        .stores
                        .read(blob.project_id, &blob.key)
                        .await?
                        .unwrap_or_default();
                    let handle = ctx.index.handle(blob.project_id, &blob.key);
                    ctx.index
                        .build(ctx.embedder.as_ref(), &text, &handle)
                        .await?;
                    rebuilt += 1;
                }
                println!("Rebuilt {rebuilt} indexes.");
            }
        },
    }

    Ok(())
}
