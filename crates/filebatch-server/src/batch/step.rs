//! Chunk-oriented ETL step
//!
//! Reads an input file line by line, parses each line into a [`Record`], groups records
//! into chunks of `chunk_size` and hands each chunk to an [`ItemWriter`]. A chunk and its
//! checkpoint commit together, so a failed run can resume right after the last committed
//! chunk.
//!
//! State progression: `OPEN_READER -> READING <-> WRITING -> CLOSING -> DONE`.

use std::sync::Arc;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

use super::error::StepError;
use super::parser::RecordLineParser;
use super::types::{
    Checkpoint, Chunk, ChunkCheckpoint, JobExecution, Record, SkipPolicy, StepReport, StepState,
};
use super::writer::ItemWriter;

pub const DEFAULT_CHUNK_SIZE: usize = 5;

/// Step tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepConfig {
    /// Records per transaction
    pub chunk_size: usize,
    pub skip_policy: SkipPolicy,
    /// Leading lines (headers) that never carry records
    pub lines_to_skip: i64,
}

impl Default for StepConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            skip_policy: SkipPolicy::default(),
            lines_to_skip: 0,
        }
    }
}

/// A step run that stopped early, with the progress committed before the failure
#[derive(Debug)]
pub struct StepFailure {
    pub error: StepError,
    pub report: StepReport,
}

impl std::fmt::Display for StepFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "step failed in {}: {}",
            self.error.state(),
            self.error
        )
    }
}

impl std::error::Error for StepFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Read, parse and write one input file in chunks
pub struct ChunkOrientedStep {
    parser: Arc<RecordLineParser>,
    writer: Arc<dyn ItemWriter>,
    config: StepConfig,
}

impl ChunkOrientedStep {
    pub fn new(
        parser: Arc<RecordLineParser>,
        writer: Arc<dyn ItemWriter>,
        config: StepConfig,
    ) -> Self {
        Self {
            parser,
            writer,
            config: StepConfig {
                chunk_size: config.chunk_size.max(1),
                ..config
            },
        }
    }

    pub fn config(&self) -> &StepConfig {
        &self.config
    }

    /// Run the step for `execution`, resuming from its committed checkpoint
    pub async fn execute(&self, execution: &JobExecution) -> Result<StepReport, StepFailure> {
        let mut run = StepRun::new(execution, self.config);

        debug!(execution_id = %execution.id, state = %StepState::OpenReader, "Step state");
        let file = match File::open(&execution.input_file).await {
            Ok(file) => file,
            Err(source) => {
                return Err(run.fail(StepError::Open {
                    path: execution.input_file.clone(),
                    source,
                }))
            },
        };

        let skip_until = run.committed.lines_consumed.max(self.config.lines_to_skip);
        if run.committed.lines_consumed > 0 {
            info!(
                execution_id = %execution.id,
                lines_consumed = run.committed.lines_consumed,
                records_written = run.committed.records_written,
                "Resuming from checkpoint"
            );
        }

        debug!(execution_id = %execution.id, state = %StepState::Reading, "Step state");
        let mut lines = BufReader::new(file).lines();
        let mut line_number: i64 = 0;

        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(source) => {
                    return Err(run.fail(StepError::Read {
                        line: line_number,
                        source,
                    }))
                },
            };
            line_number += 1;

            if line_number <= skip_until || self.parser.is_ignorable(&line) {
                continue;
            }

            match self.parser.parse(&line, line_number) {
                Ok(record) => run.push(record, line_number),
                Err(error) => match self.config.skip_policy {
                    SkipPolicy::Fatal => return Err(run.fail(error.into())),
                    SkipPolicy::Skip => {
                        warn!(
                            execution_id = %execution.id,
                            line = line_number,
                            error = %error,
                            "Skipping malformed line"
                        );
                        run.skip();
                    },
                },
            }

            if run.buffer.len() >= self.config.chunk_size {
                self.flush(&mut run, line_number).await?;
            }
        }

        if !run.buffer.is_empty() {
            self.flush(&mut run, line_number).await?;
        }

        debug!(execution_id = %execution.id, state = %StepState::Closing, "Step state");
        Ok(run.finish(line_number))
    }

    async fn flush(&self, run: &mut StepRun, lines_consumed: i64) -> Result<(), StepFailure> {
        debug!(execution_id = %run.execution_id, state = %StepState::Writing, "Step state");

        let next = run.next_checkpoint(lines_consumed);
        let chunk = Chunk {
            records: std::mem::take(&mut run.buffer),
            first_line: run.first_line,
            last_line: run.last_line,
            checkpoint: Some(ChunkCheckpoint {
                execution_id: run.execution_id,
                checkpoint: next,
            }),
        };

        if let Err(source) = self.writer.write(&chunk).await {
            return Err(run.fail(StepError::Write {
                chunk: next.chunks_written,
                first_line: chunk.first_line,
                last_line: chunk.last_line,
                source,
            }));
        }

        run.commit(next, chunk.len());
        Ok(())
    }
}

/// Mutable bookkeeping of a single `execute` call
struct StepRun {
    execution_id: uuid::Uuid,
    /// Progress that is durable in the job table
    committed: Checkpoint,
    report: StepReport,
    buffer: Vec<Record>,
    first_line: i64,
    last_line: i64,
    /// Lines skipped since the last commit
    pending_skipped: i64,
}

impl StepRun {
    fn new(execution: &JobExecution, config: StepConfig) -> Self {
        Self {
            execution_id: execution.id,
            committed: execution.checkpoint,
            report: StepReport {
                checkpoint: execution.checkpoint,
                ..StepReport::default()
            },
            buffer: Vec::with_capacity(config.chunk_size),
            first_line: 0,
            last_line: 0,
            pending_skipped: 0,
        }
    }

    fn push(&mut self, record: Record, line_number: i64) {
        if self.buffer.is_empty() {
            self.first_line = line_number;
        }
        self.last_line = line_number;
        self.buffer.push(record);
    }

    fn skip(&mut self) {
        self.pending_skipped += 1;
        self.report.records_skipped += 1;
    }

    fn next_checkpoint(&self, lines_consumed: i64) -> Checkpoint {
        Checkpoint {
            lines_consumed,
            records_written: self.committed.records_written + self.buffer.len() as i64,
            chunks_written: self.committed.chunks_written + 1,
            records_skipped: self.committed.records_skipped + self.pending_skipped,
        }
    }

    fn commit(&mut self, checkpoint: Checkpoint, records: usize) {
        self.committed = checkpoint;
        self.pending_skipped = 0;
        self.report.chunks_written += 1;
        self.report.records_written += records as i64;
        self.report.checkpoint = checkpoint;
    }

    fn fail(&mut self, error: StepError) -> StepFailure {
        warn!(
            execution_id = %self.execution_id,
            state = %error.state(),
            chunks_written = self.report.chunks_written,
            error = %error,
            "Step failed"
        );
        StepFailure {
            error,
            report: std::mem::take(&mut self.report),
        }
    }

    fn finish(mut self, total_lines: i64) -> StepReport {
        self.report.checkpoint = Checkpoint {
            lines_consumed: total_lines.max(self.committed.lines_consumed),
            records_skipped: self.committed.records_skipped + self.pending_skipped,
            ..self.committed
        };
        debug!(execution_id = %self.execution_id, state = %StepState::Done, "Step state");
        self.report
    }
}
