//! Job launch coordinator
//!
//! Turns file arrivals into job executions:
//! 1. Derive the job key of the file (see [`KeyPolicy`])
//! 2. Atomically check the job table and register a PENDING execution
//! 3. Run the chunk step on a background task, bounded by a semaphore
//! 4. Record the terminal status and publish a [`JobCompletion`]
//!
//! At most one execution per key is ever PENDING or RUNNING. A key whose execution
//! COMPLETED is never run again; a FAILED one is restarted from its checkpoint.

use std::path::Path;
use std::sync::{Arc, RwLock};
use tokio::sync::{broadcast, mpsc, Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::error::LaunchRejected;
use super::repository::JobRepository;
use super::step::ChunkOrientedStep;
use super::types::{FileArrived, JobCompletion, JobExecution, JobStatus, KeyPolicy, StepReport};

pub const DEFAULT_MAX_CONCURRENT_JOBS: usize = 4;
const COMPLETION_CHANNEL_CAPACITY: usize = 64;

/// Coordinator tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchConfig {
    pub key_policy: KeyPolicy,
    pub max_concurrent_jobs: usize,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            key_policy: KeyPolicy::default(),
            max_concurrent_jobs: DEFAULT_MAX_CONCURRENT_JOBS,
        }
    }
}

/// An execution that was accepted and handed to a background task
#[derive(Debug)]
pub struct LaunchedJob {
    pub execution: JobExecution,
    handle: JoinHandle<JobCompletion>,
}

impl LaunchedJob {
    pub fn id(&self) -> Uuid {
        self.execution.id
    }

    /// Wait for the execution to reach a terminal status
    pub async fn wait(self) -> Result<JobCompletion, tokio::task::JoinError> {
        self.handle.await
    }
}

/// Accepts launch requests and runs them at most once per job key
pub struct JobLaunchCoordinator {
    repository: JobRepository,
    step: Arc<ChunkOrientedStep>,
    config: LaunchConfig,
    /// Serializes check-and-register so two arrivals of one key cannot both pass
    registry: Mutex<()>,
    permits: Arc<Semaphore>,
    completions: broadcast::Sender<JobCompletion>,
    queues: CompletionQueues,
    tasks: TaskTracker,
}

impl JobLaunchCoordinator {
    pub fn new(repository: JobRepository, step: ChunkOrientedStep, config: LaunchConfig) -> Self {
        let (completions, _) = broadcast::channel(COMPLETION_CHANNEL_CAPACITY);
        Self {
            repository,
            step: Arc::new(step),
            permits: Arc::new(Semaphore::new(config.max_concurrent_jobs.max(1))),
            config,
            registry: Mutex::new(()),
            completions,
            queues: CompletionQueues::default(),
            tasks: TaskTracker::new(),
        }
    }

    pub fn repository(&self) -> &JobRepository {
        &self.repository
    }

    /// Receive a [`JobCompletion`] for every execution that finishes after this call
    ///
    /// A slow receiver lags and loses the oldest events. Use [`Self::completion_queue`]
    /// when every completion must be seen.
    pub fn subscribe(&self) -> broadcast::Receiver<JobCompletion> {
        self.completions.subscribe()
    }

    /// An unbounded queue that receives every completion after this call, in finish order
    pub fn completion_queue(&self) -> mpsc::UnboundedReceiver<JobCompletion> {
        self.queues.register()
    }

    /// Fail executions a previous process left unfinished
    pub async fn recover_abandoned(&self) -> Result<Vec<Uuid>, LaunchRejected> {
        let _guard = self.registry.lock().await;
        let recovered = self.repository.recover_abandoned().await?;
        for id in &recovered {
            warn!(execution_id = %id, "Marked abandoned execution as FAILED");
        }
        Ok(recovered)
    }

    /// Launch a job for the file at `path`
    ///
    /// Rejects with [`LaunchRejected::Duplicate`] when the file's key already has a
    /// PENDING, RUNNING or COMPLETED execution. A FAILED execution is restarted instead.
    pub async fn launch(&self, path: &Path) -> Result<LaunchedJob, LaunchRejected> {
        let invalid = |reason: String| LaunchRejected::InvalidInput {
            path: path.to_path_buf(),
            reason,
        };

        let input_file = tokio::fs::canonicalize(path)
            .await
            .map_err(|e| invalid(e.to_string()))?;
        let metadata = tokio::fs::metadata(&input_file)
            .await
            .map_err(|e| invalid(e.to_string()))?;
        if !metadata.is_file() {
            return Err(invalid("not a regular file".to_string()));
        }
        let job_key = self.config.key_policy.key_for(&input_file, &metadata);

        let execution = {
            let _guard = self.registry.lock().await;

            match self.repository.find_by_key(&job_key).await? {
                Some(existing) if existing.status == JobStatus::Failed => {
                    self.reset(existing.id).await?
                },
                Some(existing) => {
                    return Err(LaunchRejected::Duplicate {
                        job_key,
                        execution_id: existing.id,
                        status: existing.status,
                    })
                },
                None => {
                    let execution = JobExecution::new(job_key, input_file);
                    self.repository.create(&execution).await?;
                    execution
                },
            }
        };

        info!(
            execution_id = %execution.id,
            job_key = %execution.job_key,
            attempt = execution.attempt,
            "Job launched"
        );

        Ok(self.spawn(execution))
    }

    /// Restart a FAILED execution from its last committed chunk
    pub async fn restart(&self, id: Uuid) -> Result<LaunchedJob, LaunchRejected> {
        let execution = {
            let _guard = self.registry.lock().await;

            let existing = self.repository.get(id).await?;
            if existing.status != JobStatus::Failed {
                return Err(LaunchRejected::NotRestartable {
                    execution_id: id,
                    status: existing.status,
                });
            }
            self.reset(id).await?
        };

        info!(
            execution_id = %execution.id,
            attempt = execution.attempt,
            lines_consumed = execution.checkpoint.lines_consumed,
            "Job restarted"
        );

        Ok(self.spawn(execution))
    }

    async fn reset(&self, id: Uuid) -> Result<JobExecution, LaunchRejected> {
        if !self.repository.reset_for_restart(id).await? {
            let current = self.repository.get(id).await?;
            return Err(LaunchRejected::NotRestartable {
                execution_id: id,
                status: current.status,
            });
        }
        Ok(self.repository.get(id).await?)
    }

    fn spawn(&self, execution: JobExecution) -> LaunchedJob {
        let runner = JobRunner {
            repository: self.repository.clone(),
            step: self.step.clone(),
            permits: self.permits.clone(),
            completions: self.completions.clone(),
            queues: self.queues.clone(),
        };

        let handle = self.tasks.spawn(runner.run(execution.clone()));
        LaunchedJob { execution, handle }
    }

    /// Launch a job for every arrival until the channel closes or `shutdown` fires
    pub async fn dispatch(
        &self,
        mut arrivals: mpsc::Receiver<FileArrived>,
        shutdown: CancellationToken,
    ) {
        loop {
            let arrival = tokio::select! {
                _ = shutdown.cancelled() => break,
                arrival = arrivals.recv() => match arrival {
                    Some(arrival) => arrival,
                    None => break,
                },
            };

            match self.launch(&arrival.path).await {
                Ok(_) => {},
                Err(rejected) if rejected.is_duplicate() => {
                    info!(file = %arrival.path.display(), reason = %rejected, "Launch skipped");
                },
                Err(rejected) => {
                    warn!(file = %arrival.path.display(), error = %rejected, "Launch rejected");
                },
            }
        }

        info!("Dispatcher stopped");
    }

    /// Stop accepting tracked work and wait for running executions to finish
    pub async fn drain(&self) {
        self.tasks.close();
        self.tasks.wait().await;
    }
}

/// Lossless completion subscribers
#[derive(Clone, Default)]
struct CompletionQueues {
    senders: Arc<RwLock<Vec<mpsc::UnboundedSender<JobCompletion>>>>,
}

impl CompletionQueues {
    fn register(&self) -> mpsc::UnboundedReceiver<JobCompletion> {
        let (tx, rx) = mpsc::unbounded_channel();
        match self.senders.write() {
            Ok(mut senders) => senders.push(tx),
            Err(poisoned) => poisoned.into_inner().push(tx),
        }
        rx
    }

    fn publish(&self, completion: &JobCompletion) {
        let mut senders = match self.senders.write() {
            Ok(senders) => senders,
            Err(poisoned) => poisoned.into_inner(),
        };
        // Receivers that were dropped are forgotten.
        senders.retain(|tx| tx.send(completion.clone()).is_ok());
    }
}

/// Everything a background execution needs, detached from the coordinator's lifetime
struct JobRunner {
    repository: JobRepository,
    step: Arc<ChunkOrientedStep>,
    permits: Arc<Semaphore>,
    completions: broadcast::Sender<JobCompletion>,
    queues: CompletionQueues,
}

impl JobRunner {
    async fn run(self, mut execution: JobExecution) -> JobCompletion {
        let report = match self.execute(&execution).await {
            Ok(report) => {
                execution.status = JobStatus::Completed;
                execution.checkpoint = report.checkpoint;
                info!(
                    execution_id = %execution.id,
                    records_written = report.records_written,
                    chunks_written = report.chunks_written,
                    records_skipped = report.records_skipped,
                    "Job completed"
                );
                report
            },
            Err((cause, report)) => {
                execution.status = JobStatus::Failed;
                execution.checkpoint = report.checkpoint;
                execution.failure = Some(cause.clone());
                error!(
                    execution_id = %execution.id,
                    records_written = report.checkpoint.records_written,
                    error = %cause,
                    "Job failed"
                );
                if let Err(e) = self.repository.mark_failed(execution.id, &cause).await {
                    error!(execution_id = %execution.id, error = %e, "Failed to record job failure");
                }
                report
            },
        };

        // Prefer the stored row so timestamps match what the job table holds, unless a
        // status update was lost and the row is still active.
        match self.repository.get(execution.id).await {
            Ok(stored) if stored.status.is_terminal() => execution = stored,
            Ok(stored) => warn!(
                execution_id = %execution.id,
                stored_status = %stored.status,
                reported_status = %execution.status,
                "Job table still shows an active status"
            ),
            Err(e) => warn!(execution_id = %execution.id, error = %e, "Failed to reload execution"),
        }

        let completion = JobCompletion { execution, report };
        self.queues.publish(&completion);
        // No subscriber is not an error.
        let _ = self.completions.send(completion.clone());
        completion
    }

    async fn execute(&self, execution: &JobExecution) -> Result<StepReport, (String, StepReport)> {
        let empty = |cause: String| {
            let report = StepReport {
                checkpoint: execution.checkpoint,
                ..StepReport::default()
            };
            (cause, report)
        };

        let _permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| empty(format!("job slots unavailable: {e}")))?;

        self.repository
            .mark_running(execution.id)
            .await
            .map_err(|e| empty(e.to_string()))?;

        let report = self
            .step
            .execute(execution)
            .await
            .map_err(|failure| (failure.to_string(), failure.report))?;

        self.repository
            .mark_completed(execution.id, &report.checkpoint)
            .await
            .map_err(|e| (e.to_string(), report.clone()))?;

        Ok(report)
    }
}
