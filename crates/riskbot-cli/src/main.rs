//! riskbot command-line front end.
//!
//! `riskbot analyze <files>` runs each spreadsheet through the pipeline
//! concurrently and prints the messages a chat user would receive. With
//! `--report-dir` the risk analysis workbooks are written there too.
//! `riskbot sweep` removes staged files left behind by a crash.

mod config;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use riskbot_core::{defaults, AnalysisRequest};
use riskbot_inference::OpenAIBackend;
use riskbot_pipeline::{Pipeline, SpreadsheetExtractor, TempFileStore, RECEIVED_ACK};

use crate::config::Settings;

#[derive(Debug, Parser)]
#[command(name = "riskbot", version, about = "Spreadsheet risk analysis pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Analyse one or more spreadsheets
    Analyze {
        /// Spreadsheet files (.xlsx, .xlsm, .csv)
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Print each outcome as JSON instead of user messages
        #[arg(long)]
        json: bool,
        /// Directory to write report workbooks into
        #[arg(long)]
        report_dir: Option<PathBuf>,
    },
    /// Remove orphaned files from the staging directory
    Sweep {
        /// Only remove files older than this many seconds
        #[arg(long, default_value_t = defaults::ORPHAN_GRACE_SECS)]
        grace_secs: u64,
    },
}

fn init_tracing() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    // Environment variables:
    //   LOG_FORMAT  - "json" or "text" (default: "text")
    //   LOG_FILE    - path to log file (optional, enables file logging)
    //   LOG_ANSI    - "true"/"false" override ANSI colors
    //   RUST_LOG    - standard env filter (default: "riskbot=info")
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();
    let log_ansi = std::env::var("LOG_ANSI")
        .ok()
        .map(|v| v == "true" || v == "1");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "riskbot=info,riskbot_cli=info,riskbot_pipeline=info,riskbot_inference=info".into()
    });
    let registry = tracing_subscriber::registry().with(env_filter);

    let guard = if let Some(ref path) = log_file {
        let path = Path::new(path);
        let file_dir = path.parent().unwrap_or(Path::new("."));
        let file_name = path
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("riskbot.log");
        let file_appender = tracing_appender::rolling::daily(file_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .init();
        } else {
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(log_ansi.unwrap_or(false));
            registry.with(layer).init();
        }
        Some(guard)
    } else {
        // stdout carries user messages, so console logs go to stderr.
        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(std::io::stderr),
                )
                .init();
        } else {
            let mut layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
            if let Some(ansi) = log_ansi {
                layer = layer.with_ansi(ansi);
            }
            registry.with(layer).init();
        }
        None
    };

    info!(
        log_format = %log_format,
        log_file = log_file.as_deref().unwrap_or("(stderr)"),
        "Logging initialized"
    );
    guard
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let _log_guard = init_tracing();

    let cli = Cli::parse();
    let settings = Settings::from_env().context("Failed to load settings")?;

    match cli.command {
        Command::Analyze {
            files,
            json,
            report_dir,
        } => analyze(settings, files, json, report_dir).await,
        Command::Sweep { grace_secs } => sweep(settings, grace_secs).await,
    }
}

async fn analyze(
    settings: Settings,
    files: Vec<PathBuf>,
    json: bool,
    report_dir: Option<PathBuf>,
) -> anyhow::Result<()> {
    settings.validate().context("Invalid AI configuration")?;
    if let Some(dir) = &report_dir {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }

    let store = TempFileStore::new(settings.staging_config());
    store
        .ensure_ready()
        .await
        .context("Staging directory is not usable")?;
    let removed = store
        .sweep_orphans(store.config().orphan_grace)
        .await
        .context("Startup orphan sweep failed")?;
    if removed > 0 {
        info!(removed, "Removed orphaned staged files");
    }

    let backend = OpenAIBackend::new(settings.openai_config())
        .context("Failed to create analysis backend")?;
    info!(
        model = %backend.config().model,
        endpoint = %backend.config().endpoint_url,
        "Analysis backend ready"
    );

    let pipeline = Pipeline::new(
        store,
        SpreadsheetExtractor::new(settings.extraction_limits()),
        Arc::new(backend),
        settings.pipeline_config(),
    );

    let mut tasks = JoinSet::new();
    for path in files {
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(path = %path.display(), error = %e, "Failed to read input file");
                anyhow::bail!("Failed to read {}: {}", path.display(), e);
            }
        };
        let filename = path
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_default();
        let request = AnalysisRequest::new(filename.clone(), bytes);
        if !json {
            println!("[{}] {}", filename, RECEIVED_ACK);
        }
        let pipeline = pipeline.clone();
        tasks.spawn(async move { (filename, pipeline.run(request).await) });
    }

    let mut failed = 0usize;
    while let Some(joined) = tasks.join_next().await {
        let (filename, outcome) = match joined {
            Ok(pair) => pair,
            Err(e) => {
                error!(error = %e, "Pipeline task aborted");
                failed += 1;
                continue;
            }
        };
        if !outcome.is_delivered() {
            failed += 1;
        }
        if let (Some(dir), Some(report)) = (&report_dir, &outcome.report) {
            let path = dir.join(&report.filename);
            tokio::fs::write(&path, &report.bytes)
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!(path = %path.display(), bytes = report.bytes.len(), "Report workbook written");
        }
        if json {
            println!("{}", serde_json::to_string(&outcome)?);
        } else {
            for message in &outcome.messages {
                println!("[{}] {}\n", filename, message);
            }
        }
    }

    if failed > 0 {
        warn!(failed, "Some files were not analysed");
        anyhow::bail!("{} file(s) could not be analysed", failed);
    }
    Ok(())
}

async fn sweep(settings: Settings, grace_secs: u64) -> anyhow::Result<()> {
    let store = TempFileStore::new(settings.staging_config());
    let removed = store
        .sweep_orphans(Duration::from_secs(grace_secs))
        .await
        .context("Orphan sweep failed")?;
    println!("Removed {} orphaned file(s) from {}", removed, store.root().display());
    Ok(())
}
