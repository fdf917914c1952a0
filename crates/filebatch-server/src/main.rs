//! Filebatch Server - Main entry point

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use filebatch_common::logging::{init_logging, LogConfig, LogLevel};
use std::path::PathBuf;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;

use filebatch_server::{
    api::{self, AppState},
    batch::{BatchPipeline, JobStatus},
    config::Config,
    db,
    relay::{consumer, Broker},
};

#[derive(Parser, Debug)]
#[command(name = "filebatch-server", version, about = "Load delimited files into a SQL sink in chunks")]
struct Cli {
    /// Directory to watch for input files
    #[arg(long)]
    input_dir: Option<PathBuf>,

    /// Records per chunk transaction
    #[arg(long)]
    chunk_size: Option<usize>,

    /// Sink database URL
    #[arg(long)]
    database_url: Option<String>,

    /// Do not start the HTTP server
    #[arg(long)]
    no_http: bool,

    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load a single file, print the completion report and exit
    RunFile {
        /// Input file
        path: PathBuf,
    },
}

impl Cli {
    fn apply(&self, config: &mut Config) {
        if let Some(dir) = &self.input_dir {
            config.batch.input_dir = dir.clone();
        }
        if let Some(chunk_size) = self.chunk_size {
            config.batch.chunk_size = chunk_size;
        }
        if let Some(url) = &self.database_url {
            config.database.url = url.clone();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();

    let log_config = LogConfig::builder()
        .log_file_prefix("filebatch-server")
        .filter_directives("sqlx=warn,tower_http=info")
        .build();
    // Environment variables take precedence
    let mut log_config = log_config.merge_env()?;
    if cli.verbose {
        log_config.level = LogLevel::Debug;
    }
    init_logging(&log_config)?;

    info!("Starting Filebatch Server");

    let mut config = Config::from_env()?;
    cli.apply(&mut config);
    config.validate()?;
    info!(
        input_dir = %config.batch.input_dir.display(),
        chunk_size = config.batch.chunk_size,
        "Configuration loaded"
    );

    let pool = db::connect(&config.database).await?;
    info!("Database connection pool established");

    db::migrate(&pool).await?;
    info!("Database migrations completed");

    let pipeline = BatchPipeline::new(pool.clone(), &config.batch)
        .context("Invalid input line format")?;

    if let Some(Command::RunFile { path }) = &cli.command {
        let (completion, report) = pipeline.run_file(path).await?;
        println!("{report}");
        if completion.status() != JobStatus::Completed {
            anyhow::bail!(
                "Job {} failed: {}",
                completion.execution_id(),
                completion.failure().unwrap_or("unknown cause")
            );
        }
        return Ok(());
    }

    let shutdown = CancellationToken::new();
    let pipeline = pipeline.start(shutdown.clone()).await?;

    let broker = Broker::default();
    let consumer = consumer::spawn(broker.subscribe(), shutdown.clone());

    let server = if cli.no_http {
        info!("HTTP server disabled");
        None
    } else {
        let state = AppState::new(pool.clone(), broker).with_coordinator(pipeline.coordinator());
        let server_config = config.server.clone();
        let server_shutdown = shutdown.clone();
        Some(tokio::spawn(async move {
            api::serve(&server_config, state, server_shutdown).await
        }))
    };

    shutdown_signal().await;
    shutdown.cancel();

    let grace = Duration::from_secs(config.server.shutdown_timeout_secs);
    info!("Waiting up to {} seconds for running jobs to finish", grace.as_secs());
    if tokio::time::timeout(grace, pipeline.join()).await.is_err() {
        tracing::warn!("Shutdown timeout elapsed with jobs still running");
    }

    if let Some(server) = server {
        server.await.context("HTTP server task failed")??;
    }
    consumer.await.ok();
    pool.close().await;

    info!("Filebatch Server stopped");
    Ok(())
}

/// Resolve on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        },
    }
}
