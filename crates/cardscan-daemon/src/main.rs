mod app;

use std::path::PathBuf;

use anyhow::Context;
use cardscan::worker::{ItemSelection, JobQuery, JobStatus, TaskKind, WorkerService};
use cardscan::{load_config, Game, Language};
use clap::{Parser, Subcommand};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::app::{read_scan, App};

#[derive(Parser)]
#[command(name = "cardscan-daemon")]
#[command(about = "Identify imported trading card scans in the background")]
#[command(version)]
struct Cli {
    /// JSON configuration file
    #[arg(short, long, env = "CARDSCAN_CONFIG")]
    config: PathBuf,

    /// Emit logs as JSON lines
    #[arg(long, env = "CARDSCAN_LOG_JSON")]
    json_logs: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the poll and cleanup loops until interrupted (default)
    Run,
    /// Run one processing pass as a task and print its record
    Process,
    /// Delete expired jobs and cache entries
    Cleanup,
    /// Print the service status
    Status,
    /// Create an import job from OCR text files or images
    Import {
        #[arg(long, value_parser = parse_game)]
        game: Game,
        #[arg(long, default_value = "ja")]
        language: String,
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// List import jobs
    Jobs {
        #[arg(long, value_parser = parse_status)]
        status: Option<JobStatus>,
        #[arg(long, default_value_t = 20)]
        limit: u64,
    },
    /// Show a job with its items
    Show { job_id: String },
    /// Pick the card for an item by catalog id
    Select {
        item_id: String,
        card_id: String,
        #[arg(long)]
        foil: bool,
    },
    /// Hand identified items to the collection (all of them when none are given)
    Confirm {
        job_id: String,
        item_ids: Vec<String>,
    },
    /// Delete a job and its images
    Delete { job_id: String },
}

fn parse_game(s: &str) -> Result<Game, String> {
    Game::parse(s).ok_or_else(|| format!("unknown game: {}", s))
}

fn parse_status(s: &str) -> Result<JobStatus, String> {
    JobStatus::parse(s).ok_or_else(|| format!("unknown job status: {}", s))
}

fn init_tracing(json: bool) -> anyhow::Result<()> {
    tracing_log::LogTracer::init().context("installing log bridge")?;
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "cardscan=info,cardscan_daemon=info".into());
    let registry = tracing_subscriber::registry().with(filter);
    let installed = if json {
        tracing::subscriber::set_global_default(registry.with(fmt::layer().json()))
    } else {
        tracing::subscriber::set_global_default(registry.with(fmt::layer()))
    };
    installed.context("installing tracing subscriber")
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            log::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                log::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => log::info!("Received Ctrl+C, shutting down"),
        () = terminate => log::info!("Received SIGTERM, shutting down"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs)?;

    let config = load_config(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    let cancel = CancellationToken::new();
    let app = App::build(&config, cancel.clone())?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => {
            let worker = WorkerService::start(app.processor.clone(), app.scheduler);
            shutdown_signal().await;
            worker.shutdown().await?;
        }
        Command::Process => print_json(&app.run_task(TaskKind::ProcessNow).await?)?,
        Command::Cleanup => print_json(&app.run_task(TaskKind::CleanupNow).await?)?,
        Command::Status => print_json(&app.service.status()?)?,
        Command::Import {
            game,
            language,
            files,
        } => {
            let language = Language::from_code(&language);
            let scans = files
                .iter()
                .map(|path| read_scan(path, game, language))
                .collect::<anyhow::Result<Vec<_>>>()?;
            let detail = app.service.create_job(game, language, scans).await?;
            print_json(&detail)?;
        }
        Command::Jobs { status, limit } => {
            let page = app.service.list_jobs(&JobQuery {
                status,
                limit: Some(limit),
                offset: None,
            })?;
            print_json(&page)?;
        }
        Command::Show { job_id } => print_json(&app.service.get_job(&job_id)?)?,
        Command::Select {
            item_id,
            card_id,
            foil,
        } => {
            let item = app
                .service
                .update_item_selection(
                    &item_id,
                    ItemSelection {
                        card_id,
                        is_foil: foil,
                        ..Default::default()
                    },
                )
                .await?;
            print_json(&item)?;
        }
        Command::Confirm { job_id, item_ids } => {
            print_json(&app.service.confirm_items(&job_id, &item_ids).await?)?
        }
        Command::Delete { job_id } => {
            app.service.delete_job(&job_id).await?;
            log::info!("Deleted job {}", job_id);
        }
    }

    Ok(())
}
