//! Error taxonomy of the batch pipeline
//!
//! Row and chunk errors never escape the job runner: they end up as the failure cause of
//! a FAILED execution. `LaunchRejected` is a normal control outcome of the coordinator.

use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

use super::types::{JobStatus, StepState};

/// A single input line could not be turned into a record
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("line {line}: field count mismatch (expected {expected}, found {found})")]
    FieldCountMismatch {
        line: i64,
        expected: usize,
        found: usize,
    },

    #[error("line {line}: type coercion failure for field '{field}' (value {value:?})")]
    TypeCoercion {
        line: i64,
        field: String,
        value: String,
    },

    #[error("line {line}: malformed delimited text: {reason}")]
    Malformed { line: i64, reason: String },
}

impl ParseError {
    pub fn line(&self) -> i64 {
        match self {
            ParseError::FieldCountMismatch { line, .. }
            | ParseError::TypeCoercion { line, .. }
            | ParseError::Malformed { line, .. } => *line,
        }
    }
}

/// The line format configuration is unusable
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    #[error("field list must name '{0}'")]
    MissingField(&'static str),

    #[error("field '{0}' listed more than once")]
    DuplicateField(String),

    #[error("delimiter must be a single ASCII character, got {0:?}")]
    Delimiter(String),
}

/// A chunk transaction did not commit; nothing from the chunk is visible
#[derive(Error, Debug)]
pub enum WriteError {
    #[error("failed to open sink transaction: {0}")]
    Begin(#[source] sqlx::Error),

    #[error("failed to write record id {id}: {source}")]
    Record {
        id: i64,
        #[source]
        source: sqlx::Error,
    },

    #[error("failed to store checkpoint: {0}")]
    Checkpoint(#[source] sqlx::Error),

    #[error("failed to commit chunk: {0}")]
    Commit(#[source] sqlx::Error),
}

impl WriteError {
    fn sqlx(&self) -> &sqlx::Error {
        match self {
            WriteError::Begin(e)
            | WriteError::Checkpoint(e)
            | WriteError::Commit(e)
            | WriteError::Record { source: e, .. } => e,
        }
    }

    /// True when the sink rejected a record because its id already exists
    pub fn is_duplicate_key(&self) -> bool {
        self.sqlx()
            .as_database_error()
            .map(|e| e.is_unique_violation())
            .unwrap_or(false)
    }
}

/// Why a chunk step stopped before reaching DONE
#[derive(Error, Debug)]
pub enum StepError {
    #[error("cannot open input {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("read error after line {line}: {source}")]
    Read {
        line: i64,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("chunk {chunk} (lines {first_line}-{last_line}) rolled back: {source}")]
    Write {
        chunk: i64,
        first_line: i64,
        last_line: i64,
        #[source]
        source: WriteError,
    },
}

impl StepError {
    /// State the step was in when it failed
    pub fn state(&self) -> StepState {
        match self {
            StepError::Open { .. } => StepState::OpenReader,
            StepError::Read { .. } | StepError::Parse(_) => StepState::Reading,
            StepError::Write { .. } => StepState::Writing,
        }
    }
}

/// The job table could not be read or updated
#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("corrupt job execution row {id}: {reason}")]
    Corrupt { id: String, reason: String },

    #[error("job execution {0} not found")]
    NotFound(Uuid),

    #[error("job execution {id} is no longer {expected} and cannot become {to}")]
    StaleStatus {
        id: Uuid,
        expected: &'static str,
        to: JobStatus,
    },
}

/// The coordinator declined to start an execution
#[derive(Error, Debug)]
pub enum LaunchRejected {
    #[error("duplicate launch for {job_key}: execution {execution_id} is {status}")]
    Duplicate {
        job_key: String,
        execution_id: Uuid,
        status: JobStatus,
    },

    #[error("execution {execution_id} is {status} and cannot be restarted")]
    NotRestartable {
        execution_id: Uuid,
        status: JobStatus,
    },

    #[error("invalid input {path}: {reason}")]
    InvalidInput { path: PathBuf, reason: String },

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl LaunchRejected {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, LaunchRejected::Duplicate { .. })
    }
}

/// The watched directory could not be listed or created
#[derive(Error, Debug)]
pub enum WatchError {
    #[error("cannot create input directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot list input directory {path}: {source}")]
    List {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_messages_name_the_reason() {
        let mismatch = ParseError::FieldCountMismatch {
            line: 3,
            expected: 2,
            found: 1,
        };
        assert_eq!(mismatch.line(), 3);
        assert!(mismatch.to_string().contains("field count mismatch"));

        let coercion = ParseError::TypeCoercion {
            line: 7,
            field: "id".to_string(),
            value: "x1".to_string(),
        };
        assert!(coercion.to_string().contains("type coercion failure"));
        assert!(coercion.to_string().contains("'id'"));
    }

    #[test]
    fn test_step_error_state() {
        let parse = StepError::from(ParseError::Malformed {
            line: 1,
            reason: "bad quote".to_string(),
        });
        assert_eq!(parse.state(), StepState::Reading);

        let write = StepError::Write {
            chunk: 2,
            first_line: 6,
            last_line: 10,
            source: WriteError::Commit(sqlx::Error::PoolTimedOut),
        };
        assert_eq!(write.state(), StepState::Writing);
        assert!(write.to_string().contains("lines 6-10"));
    }

    #[test]
    fn test_pool_timeout_is_not_duplicate_key() {
        let err = WriteError::Record {
            id: 1,
            source: sqlx::Error::PoolTimedOut,
        };
        assert!(!err.is_duplicate_key());
    }
}
