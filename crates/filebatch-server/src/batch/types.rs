//! Core types for the file-to-sink batch pipeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use uuid::Uuid;

/// One parsed input line, the unit moved from reader to writer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Record {
    pub id: i64,
    pub name: String,
}

impl Record {
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

/// Ordered batch of records committed in one transaction
#[derive(Debug, Clone, Default)]
pub struct Chunk {
    pub records: Vec<Record>,
    /// 1-based input line of the first record
    pub first_line: i64,
    /// 1-based input line of the last record
    pub last_line: i64,
    /// Progress to persist together with the records
    pub checkpoint: Option<ChunkCheckpoint>,
}

impl Chunk {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Checkpoint update carried by a chunk so the writer can commit it atomically
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkCheckpoint {
    pub execution_id: Uuid,
    pub checkpoint: Checkpoint,
}

/// Committed progress of one job execution
///
/// `lines_consumed` counts raw input lines (headers, comments and blanks included) up to
/// and including the last committed chunk; a restart skips exactly that many lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub lines_consumed: i64,
    pub records_written: i64,
    pub chunks_written: i64,
    pub records_skipped: i64,
}

/// Job execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Running => "RUNNING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Ok(JobStatus::Pending),
            "RUNNING" => Ok(JobStatus::Running),
            "COMPLETED" => Ok(JobStatus::Completed),
            "FAILED" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// One run of the chunk step for one input file (maps to BATCH_JOB_EXECUTION)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobExecution {
    pub id: Uuid,
    pub job_key: String,
    pub input_file: PathBuf,
    pub status: JobStatus,
    /// 1 for the first run, incremented on every restart
    pub attempt: i64,
    pub checkpoint: Checkpoint,
    pub failure: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobExecution {
    pub fn new(job_key: impl Into<String>, input_file: impl Into<PathBuf>) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_key: job_key.into(),
            input_file: input_file.into(),
            status: JobStatus::Pending,
            attempt: 1,
            checkpoint: Checkpoint::default(),
            failure: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }
}

/// Per-run counters returned by the chunk step
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepReport {
    /// Chunks committed during this run
    pub chunks_written: i64,
    /// Records committed during this run
    pub records_written: i64,
    /// Malformed lines skipped during this run
    pub records_skipped: i64,
    /// Cumulative progress after this run
    pub checkpoint: Checkpoint,
}

/// Terminal notification published once per finished execution
#[derive(Debug, Clone)]
pub struct JobCompletion {
    pub execution: JobExecution,
    pub report: StepReport,
}

impl JobCompletion {
    pub fn execution_id(&self) -> Uuid {
        self.execution.id
    }

    pub fn status(&self) -> JobStatus {
        self.execution.status
    }

    pub fn failure(&self) -> Option<&str> {
        self.execution.failure.as_deref()
    }
}

/// Emitted by the directory watcher for every newly seen file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileArrived {
    pub path: PathBuf,
}

/// What to do with a line that cannot be parsed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SkipPolicy {
    /// Fail the job on the first malformed line
    #[default]
    Fatal,
    /// Log the line, count it and keep going
    Skip,
}

impl std::str::FromStr for SkipPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fatal" | "fail" => Ok(SkipPolicy::Fatal),
            "skip" => Ok(SkipPolicy::Skip),
            other => Err(format!("expected fatal or skip, got {other}")),
        }
    }
}

/// SQL statement used for each record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    /// Plain insert; a duplicate id fails the chunk
    #[default]
    Insert,
    /// Insert or replace the name of an existing id
    Upsert,
}

impl std::str::FromStr for WriteMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "insert" => Ok(WriteMode::Insert),
            "upsert" => Ok(WriteMode::Upsert),
            other => Err(format!("expected insert or upsert, got {other}")),
        }
    }
}

/// How the idempotency key of an input file is derived
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum KeyPolicy {
    /// Absolute path plus modification time; an edited file is a new job
    #[default]
    PathAndModified,
    /// Absolute path only; a path is processed at most once
    Path,
}

impl KeyPolicy {
    pub fn key_for(&self, path: &Path, metadata: &Metadata) -> String {
        match self {
            KeyPolicy::Path => path.display().to_string(),
            KeyPolicy::PathAndModified => {
                let modified = metadata
                    .modified()
                    .ok()
                    .and_then(|t| t.duration_since(UNIX_EPOCH).ok());
                match modified {
                    Some(d) => format!("{}@{}", path.display(), d.as_nanos()),
                    None => path.display().to_string(),
                }
            },
        }
    }
}

impl std::str::FromStr for KeyPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "path_and_modified" | "path+mtime" => Ok(KeyPolicy::PathAndModified),
            "path" => Ok(KeyPolicy::Path),
            other => Err(format!("expected path_and_modified or path, got {other}")),
        }
    }
}

/// Phases of the chunk step, used in logs and failure reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepState {
    OpenReader,
    Reading,
    Writing,
    Closing,
    Done,
}

impl std::fmt::Display for StepState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            StepState::OpenReader => "OPEN_READER",
            StepState::Reading => "READING",
            StepState::Writing => "WRITING",
            StepState::Closing => "CLOSING",
            StepState::Done => "DONE",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_status_round_trips_through_str() {
        for status in [
            JobStatus::Pending,
            JobStatus::Running,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert!("cancelled".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_only_completed_and_failed_are_terminal() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
    }

    #[test]
    fn test_new_execution_starts_pending_at_zero() {
        let execution = JobExecution::new("/in/data.csv", "/in/data.csv");
        assert_eq!(execution.status, JobStatus::Pending);
        assert_eq!(execution.attempt, 1);
        assert_eq!(execution.checkpoint, Checkpoint::default());
        assert!(execution.started_at.is_none());
    }

    #[test]
    fn test_key_policy_includes_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.csv");
        std::fs::write(&path, "1,Room-A\n").unwrap();
        let metadata = std::fs::metadata(&path).unwrap();

        let plain = KeyPolicy::Path.key_for(&path, &metadata);
        let stamped = KeyPolicy::PathAndModified.key_for(&path, &metadata);

        assert_eq!(plain, path.display().to_string());
        assert!(stamped.starts_with(&plain));
        assert!(stamped.len() > plain.len());
    }

    #[test]
    fn test_policies_parse() {
        assert_eq!("SKIP".parse::<SkipPolicy>().unwrap(), SkipPolicy::Skip);
        assert_eq!("upsert".parse::<WriteMode>().unwrap(), WriteMode::Upsert);
        assert_eq!("path".parse::<KeyPolicy>().unwrap(), KeyPolicy::Path);
        assert!("sometimes".parse::<SkipPolicy>().is_err());
    }
}
