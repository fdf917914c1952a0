//! Completion listener
//!
//! Reacts to every [`JobCompletion`], whatever the terminal status: it reads the sink back and
//! logs a header with the outcome, every row as `ID, NAME`, then `done!`.

use std::fmt::Write as _;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::types::{JobCompletion, JobStatus};
use super::writer::SinkReader;

pub const REPORT_TRAILER: &str = "done!";

#[derive(Debug, Clone)]
pub struct JobExecutionListener {
    sink: SinkReader,
}

impl JobExecutionListener {
    pub fn new(sink: SinkReader) -> Self {
        Self { sink }
    }

    /// Handle one completion and return the report that was logged
    pub async fn on_completion(&self, completion: &JobCompletion) -> Result<String, sqlx::Error> {
        let execution = &completion.execution;
        let rows = self.sink.rows().await?;

        let mut report = format!(
            "Job {} for {} {} ({} records written, {} skipped)",
            execution.id,
            execution.input_file.display(),
            execution.status,
            completion.report.records_written,
            completion.report.records_skipped
        );
        if execution.status == JobStatus::Failed {
            let cause = execution.failure.as_deref().unwrap_or("no cause recorded");
            // Writing to a String cannot fail.
            let _ = write!(report, ": {cause}");
        }
        for row in &rows {
            let _ = write!(report, "\n{}, {}", row.id, row.name);
        }
        let _ = write!(report, "\n{REPORT_TRAILER}");

        if execution.status == JobStatus::Completed {
            info!(execution_id = %execution.id, rows = rows.len(), "{report}");
        } else {
            warn!(execution_id = %execution.id, rows = rows.len(), "{report}");
        }
        Ok(report)
    }

    /// Consume completions on a background task until `shutdown` fires
    ///
    /// Resolves to the number of completions handled.
    pub fn spawn(
        self,
        mut completions: mpsc::UnboundedReceiver<JobCompletion>,
        shutdown: CancellationToken,
    ) -> JoinHandle<u64> {
        tokio::spawn(async move {
            let mut handled = 0;
            loop {
                // Queued completions are reported before shutdown is honoured.
                let completion = tokio::select! {
                    biased;
                    received = completions.recv() => match received {
                        Some(completion) => completion,
                        None => break,
                    },
                    _ = shutdown.cancelled() => break,
                };

                handled += 1;
                if let Err(e) = self.on_completion(&completion).await {
                    error!(
                        execution_id = %completion.execution_id(),
                        error = %e,
                        "Failed to read sink for completion report"
                    );
                }
            }
            handled
        })
    }
}
