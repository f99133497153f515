//! Binary entry point for substrate-pipeline.
//!
//! Runs pipeline workers and exposes basket operations on the command line.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(missing_docs)]
// Allow print_stderr in main binary for CLI output
#![allow(clippy::print_stderr)]
#![allow(clippy::print_stdout)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::multiple_crate_versions)]

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use substrate_pipeline::models::ProposalId;
use substrate_pipeline::observability;
use substrate_pipeline::services::ComposeRequest;
use substrate_pipeline::{
    BasketId, DumpId, PipelineConfig, PipelineServices, ProposalStatus, SubstrateId, WorkspaceId,
};

/// Governed ingestion pipeline: dumps in, substrate, graph, reflections and
/// documents out.
#[derive(Parser)]
#[command(name = "substrate-pipeline")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to configuration file.
    #[arg(short, long, global = true, env = "PIPELINE_CONFIG_PATH")]
    config: Option<PathBuf>,

    /// SQLite database shared by workers (overrides config).
    #[arg(long, global = true, env = "PIPELINE_SQLITE_PATH")]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Basket and workspace scope shared by most commands.
#[derive(clap::Args)]
struct Scope {
    /// Basket id.
    #[arg(short, long)]
    basket: String,

    /// Workspace id.
    #[arg(short, long)]
    workspace: String,
}

impl Scope {
    fn ids(&self) -> (BasketId, WorkspaceId) {
        (
            BasketId::new(self.basket.as_str()),
            WorkspaceId::new(self.workspace.as_str()),
        )
    }
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Run a pipeline worker until interrupted.
    Worker {
        /// Worker identity recorded on claims.
        #[arg(long)]
        worker_id: Option<String>,

        /// Drain the queue once and exit instead of polling.
        #[arg(long)]
        once: bool,
    },

    /// Ingest a dump and enqueue substrate extraction.
    Ingest {
        #[command(flatten)]
        scope: Scope,

        /// Dump text; read from stdin when omitted.
        text: Option<String>,

        /// Read the dump from a file.
        #[arg(short, long, conflicts_with = "text")]
        file: Option<PathBuf>,
    },

    /// Exclude a dump from reflection and composition.
    Tombstone {
        /// Dump id.
        dump_id: String,

        /// Workspace id.
        #[arg(short, long)]
        workspace: String,

        /// Reason recorded with the tombstone.
        #[arg(long)]
        reason: String,
    },

    /// Review governance proposals.
    Proposals {
        /// Proposal subcommand.
        #[command(subcommand)]
        action: ProposalAction,
    },

    /// Compose a document from basket substrate.
    Compose {
        #[command(flatten)]
        scope: Scope,

        /// What the document should accomplish.
        intent: String,

        /// Document title.
        #[arg(short, long)]
        title: Option<String>,

        /// Recency window in days.
        #[arg(long)]
        window_days: Option<u32>,

        /// Substrate ids that must be included.
        #[arg(long = "pin")]
        pinned: Vec<String>,

        /// Enqueue for a worker instead of composing now.
        #[arg(long)]
        queue: bool,
    },

    /// Compute a reflection for a basket now.
    Reflect {
        #[command(flatten)]
        scope: Scope,
    },

    /// Show queue counts.
    Status,
}

/// Proposal subcommands.
#[derive(Subcommand)]
enum ProposalAction {
    /// List proposals in a basket.
    List {
        /// Basket id.
        #[arg(short, long)]
        basket: String,

        /// Filter by status (PROPOSED, APPROVED, REJECTED).
        #[arg(short, long)]
        status: Option<String>,
    },

    /// Approve and execute a proposal.
    Approve {
        /// Proposal id.
        id: String,

        /// Workspace id.
        #[arg(short, long)]
        workspace: String,

        /// Reviewer identity.
        #[arg(short, long, default_value = "cli")]
        reviewer: String,
    },

    /// Reject a proposal.
    Reject {
        /// Proposal id.
        id: String,

        /// Workspace id.
        #[arg(short, long)]
        workspace: String,

        /// Reviewer identity.
        #[arg(short, long, default_value = "cli")]
        reviewer: String,

        /// Reason recorded on the proposal.
        #[arg(long)]
        reason: String,
    },

    /// Retry execution of an approved proposal that failed.
    Retry {
        /// Proposal id.
        id: String,

        /// Workspace id.
        #[arg(short, long)]
        workspace: String,
    },
}

/// Main entry point.
#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match PipelineConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        },
    };
    let config = match &cli.db {
        Some(path) => config.with_sqlite_path(path.clone()),
        None => config,
    };

    let _observability = match observability::init(&config.observability, cli.verbose) {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("Failed to initialize observability: {e}");
            return ExitCode::FAILURE;
        },
    };

    match run_command(cli.command, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        },
    }
}

/// Runs the selected command.
///
/// Services wrap a blocking HTTP client, so they are built, used and dropped
/// on blocking threads; only the worker loop itself stays on the runtime.
async fn run_command(command: Commands, config: PipelineConfig) -> anyhow::Result<()> {
    let services = tokio::task::spawn_blocking(move || PipelineServices::from_config(config))
        .await
        .context("store setup panicked")?
        .context("failed to open store")?;

    match command {
        Commands::Worker { worker_id, once } => cmd_worker(services, worker_id, once).await,
        command => tokio::task::spawn_blocking(move || run_blocking_command(command, &services))
            .await
            .context("command panicked")?,
    }
}

/// Runs a one-shot command on the current (blocking) thread.
fn run_blocking_command(command: Commands, services: &PipelineServices) -> anyhow::Result<()> {
    match command {
        Commands::Worker { .. } => bail!("the worker runs on the async runtime"),
        Commands::Ingest { scope, text, file } => cmd_ingest(services, &scope, text, file),
        Commands::Tombstone {
            dump_id,
            workspace,
            reason,
        } => {
            services.tombstone_dump(&DumpId::new(dump_id), &WorkspaceId::new(workspace), &reason)?;
            println!("tombstoned");
            Ok(())
        },
        Commands::Proposals { action } => cmd_proposals(services, action),
        Commands::Compose {
            scope,
            intent,
            title,
            window_days,
            pinned,
            queue,
        } => cmd_compose(services, &scope, &intent, title, window_days, pinned, queue),
        Commands::Reflect { scope } => cmd_reflect(services, &scope),
        Commands::Status => cmd_status(services),
    }
}

/// Runs a worker, stopping on Ctrl-C.
async fn cmd_worker(
    services: PipelineServices,
    worker_id: Option<String>,
    once: bool,
) -> anyhow::Result<()> {
    let mut orchestrator = services.orchestrator();
    if let Some(id) = worker_id {
        orchestrator = orchestrator.with_worker_id(id);
    }

    if once {
        let summary = tokio::task::spawn_blocking(move || {
            let summary = orchestrator.drain(usize::MAX);
            drop(services);
            summary
        })
        .await
        .context("worker panicked")?;
        println!(
            "claimed {} completed {} failed {} released {}",
            summary.claimed, summary.completed, summary.failed, summary.released
        );
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown requested");
            let _ = shutdown_tx.send(true);
        }
    });

    let orchestrator = Arc::new(orchestrator);
    let summary = Arc::clone(&orchestrator).run(shutdown_rx).await;
    tokio::task::spawn_blocking(move || drop((orchestrator, services)))
        .await
        .context("worker teardown panicked")?;
    println!(
        "completed {} failed {} released {}",
        summary.completed, summary.failed, summary.released
    );
    Ok(())
}

/// Ingests a dump from an argument, a file or stdin.
fn cmd_ingest(
    services: &PipelineServices,
    scope: &Scope,
    text: Option<String>,
    file: Option<PathBuf>,
) -> anyhow::Result<()> {
    let text = match (text, file) {
        (Some(text), _) => text,
        (None, Some(path)) => std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?,
        (None, None) => {
            let mut buffer = String::new();
            std::io::stdin()
                .read_to_string(&mut buffer)
                .context("failed to read stdin")?;
            buffer
        },
    };

    let (basket_id, workspace_id) = scope.ids();
    let (dump_id, entry_id) = services.ingest(&basket_id, &workspace_id, &text)?;
    println!("dump {dump_id} queued as {entry_id}");
    Ok(())
}

/// Handles proposal review commands.
fn cmd_proposals(services: &PipelineServices, action: ProposalAction) -> anyhow::Result<()> {
    let governance = services.governance();
    match action {
        ProposalAction::List { basket, status } => {
            let status = match status {
                Some(s) => match ProposalStatus::parse(&s) {
                    Some(status) => Some(status),
                    None => bail!("unknown proposal status: {s}"),
                },
                None => None,
            };
            let proposals = governance.list_proposals(&BasketId::new(basket), status)?;
            if proposals.is_empty() {
                println!("No proposals.");
            }
            for proposal in proposals {
                println!(
                    "{}  {:<9}  ops={:<3} confidence={:.2} executed={}",
                    proposal.id,
                    proposal.status,
                    proposal.ops.len(),
                    proposal.validator_report.confidence,
                    proposal.is_executed
                );
            }
        },
        ProposalAction::Approve {
            id,
            workspace,
            reviewer,
        } => {
            let outcome = governance.approve_proposal(
                &ProposalId::new(id),
                &WorkspaceId::new(workspace),
                &reviewer,
            )?;
            println!(
                "approved, {} substrate changes",
                outcome.substrate_changes()
            );
        },
        ProposalAction::Reject {
            id,
            workspace,
            reviewer,
            reason,
        } => {
            governance.reject_proposal(
                &ProposalId::new(id),
                &WorkspaceId::new(workspace),
                &reviewer,
                &reason,
            )?;
            println!("rejected");
        },
        ProposalAction::Retry { id, workspace } => {
            let outcome =
                governance.retry_execution(&ProposalId::new(id), &WorkspaceId::new(workspace))?;
            println!(
                "executed={} substrate changes {}",
                outcome.executed,
                outcome.substrate_changes()
            );
        },
    }
    Ok(())
}

/// Composes a document now, or enqueues it for a worker.
fn cmd_compose(
    services: &PipelineServices,
    scope: &Scope,
    intent: &str,
    title: Option<String>,
    window_days: Option<u32>,
    pinned: Vec<String>,
    queue: bool,
) -> anyhow::Result<()> {
    let (basket_id, workspace_id) = scope.ids();
    let pinned: Vec<SubstrateId> = pinned.into_iter().map(SubstrateId::new).collect();

    if queue {
        let entry_id = services.request_composition(
            &basket_id,
            &workspace_id,
            intent,
            title.as_deref(),
            window_days,
            pinned,
        )?;
        println!("composition queued as {entry_id}");
        return Ok(());
    }

    let composition = services.composition();
    let placeholder =
        composition.create_placeholder(&basket_id, &workspace_id, title.as_deref(), intent)?;
    let request = ComposeRequest::new(placeholder.id, basket_id, workspace_id, intent)
        .with_window_days(window_days)
        .with_pinned(pinned);
    let document = composition.compose(&request)?;
    println!("{}", document.content);
    Ok(())
}

/// Computes and prints a reflection.
fn cmd_reflect(services: &PipelineServices, scope: &Scope) -> anyhow::Result<()> {
    let (basket_id, workspace_id) = scope.ids();
    let outcome = services
        .reflection()
        .compute_reflection(&basket_id, &workspace_id, None)?;
    println!("{}", outcome.artifact.reflection_text);
    Ok(())
}

/// Prints queue counts.
fn cmd_status(services: &PipelineServices) -> anyhow::Result<()> {
    let stats = services.queue().stats()?;
    println!("Backend:    {}", services.store().backend_name());
    println!("Pending:    {}", stats.pending);
    println!("Processing: {}", stats.processing);
    println!("Completed:  {}", stats.completed);
    println!("Failed:     {}", stats.failed);
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use tempfile::TempDir;

    /// Configures a real (unreachable) Anthropic client so every command
    /// builds and drops the blocking HTTP client.
    fn config(dir: &TempDir) -> PipelineConfig {
        let mut config = PipelineConfig::default().with_sqlite_path(dir.path().join("cli.db"));
        config.llm.api_key = Some("sk-ant-REDACTED".to_string());
        config.llm.base_url = Some("http://127.0.0.1:1".to_string());
        config.llm.max_attempts = 1;
        config
    }

    #[tokio::test]
    async fn test_commands_run_inside_async_main() {
        let dir = TempDir::new().unwrap();
        for args in [
            vec!["substrate-pipeline", "ingest", "-b", "b1", "-w", "w1", "We should implement rate limiting."],
            vec!["substrate-pipeline", "status"],
            vec!["substrate-pipeline", "worker", "--once"],
            vec!["substrate-pipeline", "proposals", "list", "-b", "b1"],
        ] {
            let cli = Cli::try_parse_from(&args).unwrap();
            run_command(cli.command, config(&dir)).await.unwrap();
        }
    }
}
