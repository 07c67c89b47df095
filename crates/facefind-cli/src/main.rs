//! facefind CLI
//!
//! Command-line surface over the facefind core: upload videos, search faces,
//! browse and maintain the record store. Results are printed as JSON on stdout;
//! logs go to stderr and to a daily log file under `<root>/logs`.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::OnceLock;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::error;

use facefind_core::ingest::UploadRequest;
use facefind_core::library::VideoQuery;
use facefind_core::models::{Location, VideoStatus};
use facefind_core::settings::{default_root, SettingsManager};
use facefind_core::{AppContext, CoreError};

static LOG_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();

#[derive(Parser, Debug)]
#[command(name = "facefind", version, about = "Index faces in videos and search them by photo")]
struct Cli {
    /// Data root holding settings, storage and logs
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload a video and detect the faces in it
    Upload {
        file: PathBuf,
        /// Name to record instead of the file name
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        location_name: Option<String>,
        #[arg(long, allow_hyphen_values = true)]
        latitude: Option<f64>,
        #[arg(long, allow_hyphen_values = true)]
        longitude: Option<f64>,
    },
    /// Find videos containing the face in an image
    Search {
        image: PathBuf,
        /// Also compare against archived videos
        #[arg(long)]
        include_archived: bool,
        /// Engine processes to run at once
        #[arg(long)]
        max_concurrency: Option<usize>,
    },
    /// List video records
    List {
        #[arg(long, value_enum, default_value_t = ListFilter::All)]
        filter: ListFilter,
    },
    /// Filter video records
    Query {
        /// Substring over file name, status and id
        #[arg(long)]
        text: Option<String>,
        #[arg(long)]
        status: Option<VideoStatus>,
        #[arg(long)]
        archived: Option<bool>,
    },
    /// Show one video record
    Get { id: String },
    /// Archive a video (files are kept)
    Delete { id: String },
    /// Restore an archived video
    Restore { id: String },
    /// Show library statistics
    Stats,
    /// Show a video record and its media file
    Preview { id: String },
    /// Remove archived videos not accessed for a number of days
    Cleanup {
        #[arg(long, default_value_t = 30, allow_hyphen_values = true)]
        days: i64,
    },
    /// Delete every record, video and face image
    Reset {
        /// Required to actually reset
        #[arg(long)]
        confirm: bool,
    },
    /// List past searches, newest first
    History,
    /// Show search statistics
    HistoryStats,
    /// Print the effective settings
    Settings {
        /// Write the normalized settings back to disk
        #[arg(long)]
        save: bool,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum ListFilter {
    All,
    Active,
    Archived,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let root = cli.root.clone().unwrap_or_else(default_root);
    init_logging(&root);

    match run(cli.command, &root).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{:#}", err);
            report_error(&err);
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command, root: &Path) -> anyhow::Result<()> {
    let manager = SettingsManager::new(root);
    let mut settings = manager.load();

    if let Command::Search {
        include_archived,
        max_concurrency,
        ..
    } = &command
    {
        settings.search.include_archived |= *include_archived;
        if let Some(n) = max_concurrency {
            settings.search.max_concurrency = *n;
        }
        settings.normalize();
    }

    let ctx = AppContext::open(root, settings)
        .with_context(|| format!("Failed to open data under {}", root.display()))?;

    match command {
        Command::Upload {
            file,
            name,
            location_name,
            latitude,
            longitude,
        } => {
            let outcome = ctx
                .ingest()
                .upload(UploadRequest {
                    source_path: file,
                    original_filename: name,
                    location: Location {
                        name: location_name,
                        latitude,
                        longitude,
                    },
                })
                .await?;
            print_json(&outcome)
        }
        Command::Search { image, .. } => print_json(&ctx.search().search(&image).await?),
        Command::List { filter } => {
            let records = match filter {
                ListFilter::All => ctx.library().list_all()?,
                ListFilter::Active => ctx.library().list_active()?,
                ListFilter::Archived => ctx.library().list_archived()?,
            };
            print_json(&records)
        }
        Command::Query {
            text,
            status,
            archived,
        } => print_json(&ctx.library().query(&VideoQuery {
            text,
            status,
            archived,
        })?),
        Command::Get { id } => print_json(&ctx.library().get(&id)?),
        Command::Delete { id } => print_json(&ctx.library().archive(&id)?),
        Command::Restore { id } => print_json(&ctx.library().restore(&id)?),
        Command::Stats => print_json(&ctx.library().stats()?),
        Command::Preview { id } => print_json(&ctx.library().preview(&id)?),
        Command::Cleanup { days } => {
            let removed = ctx.maintenance().cleanup_older_than(days)?;
            print_json(&serde_json::json!({
                "removed": removed,
                "message": format!("Removed {} archived video(s) older than {} days", removed, days),
            }))
        }
        Command::Reset { confirm } => {
            if !confirm {
                return Err(CoreError::Validation(
                    "Reset deletes all videos and faces; pass --confirm".to_string(),
                )
                .into());
            }
            print_json(&ctx.maintenance().reset_all()?)
        }
        Command::History => print_json(&ctx.history().list()?),
        Command::HistoryStats => print_json(&ctx.history().stats()?),
        Command::Settings { save } => {
            if save {
                print_json(&manager.save(ctx.settings())?)
            } else {
                print_json(ctx.settings())
            }
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let out = serde_json::to_string_pretty(value).context("Failed to encode output")?;
    println!("{}", out);
    Ok(())
}

/// Prints the caller-facing form of an error on stdout
fn report_error(err: &anyhow::Error) {
    let response = match err.chain().find_map(|e| e.downcast_ref::<CoreError>()) {
        Some(core) => serde_json::to_value(core.to_response()),
        None => Ok(serde_json::json!({ "kind": "internal", "message": err.to_string() })),
    };
    match response.and_then(|v| serde_json::to_string_pretty(&serde_json::json!({ "error": v }))) {
        Ok(out) => println!("{}", out),
        Err(_) => eprintln!("{:#}", err),
    }
}

fn init_logging(root: &Path) {
    let log_dir = root.join("logs");
    let _ = std::fs::create_dir_all(&log_dir);

    let file_appender = tracing_appender::rolling::daily(&log_dir, "facefind.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let _ = LOG_GUARD.set(guard);

    use tracing_subscriber::prelude::*;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    // stdout carries command output, so console logs go to stderr.
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(cfg!(debug_assertions));

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false);

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .with(file_layer);

    let _ = tracing::subscriber::set_global_default(subscriber);
}
