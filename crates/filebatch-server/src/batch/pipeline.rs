//! Wiring of the file pipeline
//!
//! ```text
//! DirectoryWatcher --mpsc<FileArrived>--> dispatcher --> JobLaunchCoordinator
//!                                                          | (job tasks)
//! JobExecutionListener <--mpsc<JobCompletion>--------------+
//! ```

use anyhow::Context;
use sqlx::SqlitePool;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::coordinator::JobLaunchCoordinator;
use super::error::{FormatError, WatchError};
use super::listener::JobExecutionListener;
use super::parser::RecordLineParser;
use super::repository::JobRepository;
use super::step::ChunkOrientedStep;
use super::types::JobCompletion;
use super::watcher::DirectoryWatcher;
use super::writer::{SinkReader, SqlSinkWriter};
use crate::config::BatchConfig;

const ARRIVAL_CHANNEL_CAPACITY: usize = 256;

/// The assembled, not yet running, pipeline
pub struct BatchPipeline {
    coordinator: Arc<JobLaunchCoordinator>,
    listener: JobExecutionListener,
    watcher: DirectoryWatcher,
}

impl BatchPipeline {
    pub fn new(pool: SqlitePool, config: &BatchConfig) -> Result<Self, FormatError> {
        let parser = RecordLineParser::new(&config.line_format())?;
        let writer = SqlSinkWriter::new(pool.clone(), config.write_mode);
        let step = ChunkOrientedStep::new(Arc::new(parser), Arc::new(writer), config.step_config());

        let coordinator = JobLaunchCoordinator::new(
            JobRepository::new(pool.clone()),
            step,
            config.launch_config(),
        );

        Ok(Self {
            coordinator: Arc::new(coordinator),
            listener: JobExecutionListener::new(SinkReader::new(pool)),
            watcher: DirectoryWatcher::new(&config.input_dir, config.poll_interval()),
        })
    }

    pub fn coordinator(&self) -> Arc<JobLaunchCoordinator> {
        self.coordinator.clone()
    }

    pub fn listener(&self) -> &JobExecutionListener {
        &self.listener
    }

    /// Recover abandoned executions, then start the watcher, dispatcher and listener
    pub async fn start(self, shutdown: CancellationToken) -> anyhow::Result<PipelineHandle> {
        self.coordinator
            .recover_abandoned()
            .await
            .context("Failed to recover abandoned executions")?;
        self.watcher
            .ensure_dir()
            .await
            .context("Failed to prepare input directory")?;

        let (arrivals_tx, arrivals_rx) = mpsc::channel(ARRIVAL_CHANNEL_CAPACITY);
        let listener_shutdown = CancellationToken::new();

        let listener = self
            .listener
            .spawn(self.coordinator.completion_queue(), listener_shutdown.clone());

        let dispatcher = {
            let coordinator = self.coordinator.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { coordinator.dispatch(arrivals_rx, shutdown).await })
        };

        let watcher = tokio::spawn(self.watcher.run(arrivals_tx, shutdown));

        info!("Batch pipeline started");

        Ok(PipelineHandle {
            coordinator: self.coordinator,
            watcher,
            dispatcher,
            listener,
            listener_shutdown,
        })
    }

    /// Launch one file, wait for it and return the completion with its report
    pub async fn run_file(&self, path: &Path) -> anyhow::Result<(JobCompletion, String)> {
        self.coordinator
            .recover_abandoned()
            .await
            .context("Failed to recover abandoned executions")?;

        let job = self.coordinator.launch(path).await?;
        let completion = job.wait().await.context("Job task panicked")?;
        let report = self
            .listener
            .on_completion(&completion)
            .await
            .context("Failed to read sink")?;

        Ok((completion, report))
    }
}

/// Handles of a running pipeline
pub struct PipelineHandle {
    coordinator: Arc<JobLaunchCoordinator>,
    watcher: JoinHandle<Result<(), WatchError>>,
    dispatcher: JoinHandle<()>,
    listener: JoinHandle<u64>,
    listener_shutdown: CancellationToken,
}

impl PipelineHandle {
    pub fn coordinator(&self) -> Arc<JobLaunchCoordinator> {
        self.coordinator.clone()
    }

    /// Wait for the watcher and dispatcher to stop, let running jobs finish and stop the
    /// listener once their completions are reported
    pub async fn join(self) -> anyhow::Result<()> {
        match self.watcher.await {
            Ok(Ok(())) => {},
            Ok(Err(e)) => warn!(error = %e, "Watcher exited with error"),
            Err(e) => warn!(error = %e, "Watcher task failed"),
        }
        if let Err(e) = self.dispatcher.await {
            warn!(error = %e, "Dispatcher task failed");
        }

        self.coordinator.drain().await;

        self.listener_shutdown.cancel();
        let reported = self.listener.await.context("Listener task failed")?;

        info!(reported, "Batch pipeline stopped");
        Ok(())
    }
}
