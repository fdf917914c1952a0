//! Job execution repository
//!
//! Persists [`JobExecution`] rows in `BATCH_JOB_EXECUTION`. `JOB_KEY` is unique, so a
//! job instance has exactly one row; restarts reuse it and bump `ATTEMPT`.

use chrono::{DateTime, Utc};
use sqlx::{Executor, FromRow, Sqlite, SqlitePool};
use std::path::PathBuf;
use uuid::Uuid;

use super::error::RepositoryError;
use super::types::{Checkpoint, JobExecution, JobStatus};

pub type RepositoryResult<T> = std::result::Result<T, RepositoryError>;

/// Failure cause recorded for executions found unfinished at startup
pub const ABANDONED_CAUSE: &str = "abandoned: process stopped before the job finished";

const SELECT_EXECUTION: &str = r#"
    SELECT ID AS id, JOB_KEY AS job_key, INPUT_FILE AS input_file, STATUS AS status,
           ATTEMPT AS attempt, LINES_CONSUMED AS lines_consumed,
           RECORDS_WRITTEN AS records_written, CHUNKS_WRITTEN AS chunks_written,
           RECORDS_SKIPPED AS records_skipped, FAILURE AS failure,
           CREATED_AT AS created_at, STARTED_AT AS started_at, FINISHED_AT AS finished_at
    FROM BATCH_JOB_EXECUTION
"#;

#[derive(Debug, FromRow)]
struct ExecutionRow {
    id: String,
    job_key: String,
    input_file: String,
    status: String,
    attempt: i64,
    lines_consumed: i64,
    records_written: i64,
    chunks_written: i64,
    records_skipped: i64,
    failure: Option<String>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

impl TryFrom<ExecutionRow> for JobExecution {
    type Error = RepositoryError;

    fn try_from(row: ExecutionRow) -> Result<Self, Self::Error> {
        let id = Uuid::parse_str(&row.id).map_err(|e| RepositoryError::Corrupt {
            id: row.id.clone(),
            reason: e.to_string(),
        })?;
        let status = row
            .status
            .parse::<JobStatus>()
            .map_err(|reason| RepositoryError::Corrupt {
                id: row.id.clone(),
                reason,
            })?;

        Ok(JobExecution {
            id,
            job_key: row.job_key,
            input_file: PathBuf::from(row.input_file),
            status,
            attempt: row.attempt,
            checkpoint: Checkpoint {
                lines_consumed: row.lines_consumed,
                records_written: row.records_written,
                chunks_written: row.chunks_written,
                records_skipped: row.records_skipped,
            },
            failure: row.failure,
            created_at: row.created_at,
            started_at: row.started_at,
            finished_at: row.finished_at,
        })
    }
}

/// Store the committed progress of an execution
///
/// Generic over the executor so the sink writer can run it inside the chunk transaction.
pub(crate) async fn store_checkpoint<'e, E>(
    executor: E,
    execution_id: Uuid,
    checkpoint: &Checkpoint,
) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        UPDATE BATCH_JOB_EXECUTION
        SET LINES_CONSUMED = ?, RECORDS_WRITTEN = ?, CHUNKS_WRITTEN = ?, RECORDS_SKIPPED = ?
        WHERE ID = ?
        "#,
    )
    .bind(checkpoint.lines_consumed)
    .bind(checkpoint.records_written)
    .bind(checkpoint.chunks_written)
    .bind(checkpoint.records_skipped)
    .bind(execution_id.to_string())
    .execute(executor)
    .await?;

    Ok(())
}

/// Durable store of job executions
#[derive(Debug, Clone)]
pub struct JobRepository {
    pool: SqlitePool,
}

impl JobRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert a new PENDING execution
    pub async fn create(&self, execution: &JobExecution) -> RepositoryResult<()> {
        sqlx::query(
            r#"
            INSERT INTO BATCH_JOB_EXECUTION (
                ID, JOB_KEY, INPUT_FILE, STATUS, ATTEMPT, LINES_CONSUMED,
                RECORDS_WRITTEN, CHUNKS_WRITTEN, RECORDS_SKIPPED, CREATED_AT
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(execution.id.to_string())
        .bind(&execution.job_key)
        .bind(execution.input_file.display().to_string())
        .bind(execution.status.as_str())
        .bind(execution.attempt)
        .bind(execution.checkpoint.lines_consumed)
        .bind(execution.checkpoint.records_written)
        .bind(execution.checkpoint.chunks_written)
        .bind(execution.checkpoint.records_skipped)
        .bind(execution.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn find_by_key(&self, job_key: &str) -> RepositoryResult<Option<JobExecution>> {
        let row = sqlx::query_as::<_, ExecutionRow>(&format!("{SELECT_EXECUTION} WHERE JOB_KEY = ?"))
            .bind(job_key)
            .fetch_optional(&self.pool)
            .await?;

        row.map(JobExecution::try_from).transpose()
    }

    pub async fn find(&self, id: Uuid) -> RepositoryResult<Option<JobExecution>> {
        let row = sqlx::query_as::<_, ExecutionRow>(&format!("{SELECT_EXECUTION} WHERE ID = ?"))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(JobExecution::try_from).transpose()
    }

    pub async fn get(&self, id: Uuid) -> RepositoryResult<JobExecution> {
        self.find(id).await?.ok_or(RepositoryError::NotFound(id))
    }

    /// All executions, newest first
    pub async fn list(&self) -> RepositoryResult<Vec<JobExecution>> {
        let rows = sqlx::query_as::<_, ExecutionRow>(&format!(
            "{SELECT_EXECUTION} ORDER BY CREATED_AT DESC"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(JobExecution::try_from).collect()
    }

    /// Move a FAILED execution back to PENDING for another attempt
    ///
    /// Returns `false` when the row is not FAILED. The checkpoint is kept.
    pub async fn reset_for_restart(&self, id: Uuid) -> RepositoryResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE BATCH_JOB_EXECUTION
            SET STATUS = ?, ATTEMPT = ATTEMPT + 1, FAILURE = NULL,
                STARTED_AT = NULL, FINISHED_AT = NULL
            WHERE ID = ? AND STATUS = ?
            "#,
        )
        .bind(JobStatus::Pending.as_str())
        .bind(id.to_string())
        .bind(JobStatus::Failed.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn mark_running(&self, id: Uuid) -> RepositoryResult<()> {
        self.transition(id, JobStatus::Pending, JobStatus::Running)
            .await
    }

    /// Record success together with the final progress counters
    pub async fn mark_completed(&self, id: Uuid, checkpoint: &Checkpoint) -> RepositoryResult<()> {
        let mut tx = self.pool.begin().await?;
        store_checkpoint(&mut *tx, id, checkpoint).await?;
        let result = sqlx::query(
            r#"
            UPDATE BATCH_JOB_EXECUTION
            SET STATUS = ?, FINISHED_AT = ?
            WHERE ID = ? AND STATUS = ?
            "#,
        )
        .bind(JobStatus::Completed.as_str())
        .bind(Utc::now())
        .bind(id.to_string())
        .bind(JobStatus::Running.as_str())
        .execute(&mut *tx)
        .await?;

        // Dropping the transaction discards the checkpoint as well.
        if result.rows_affected() == 0 {
            return Err(RepositoryError::StaleStatus {
                id,
                expected: JobStatus::Running.as_str(),
                to: JobStatus::Completed,
            });
        }
        tx.commit().await?;

        Ok(())
    }

    /// Record failure of a PENDING or RUNNING execution
    ///
    /// The committed checkpoint stays as the last chunk left it.
    pub async fn mark_failed(&self, id: Uuid, cause: &str) -> RepositoryResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE BATCH_JOB_EXECUTION
            SET STATUS = ?, FAILURE = ?, FINISHED_AT = ?
            WHERE ID = ? AND STATUS IN (?, ?)
            "#,
        )
        .bind(JobStatus::Failed.as_str())
        .bind(cause)
        .bind(Utc::now())
        .bind(id.to_string())
        .bind(JobStatus::Pending.as_str())
        .bind(JobStatus::Running.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::StaleStatus {
                id,
                expected: "PENDING or RUNNING",
                to: JobStatus::Failed,
            });
        }

        Ok(())
    }

    async fn transition(&self, id: Uuid, from: JobStatus, to: JobStatus) -> RepositoryResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE BATCH_JOB_EXECUTION
            SET STATUS = ?, STARTED_AT = ?
            WHERE ID = ? AND STATUS = ?
            "#,
        )
        .bind(to.as_str())
        .bind(Utc::now())
        .bind(id.to_string())
        .bind(from.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::StaleStatus {
                id,
                expected: from.as_str(),
                to,
            });
        }

        Ok(())
    }

    /// Fail every execution left PENDING or RUNNING by a previous process
    ///
    /// Call before accepting new launches. Returns the ids that were recovered.
    pub async fn recover_abandoned(&self) -> RepositoryResult<Vec<Uuid>> {
        let ids: Vec<(String,)> = sqlx::query_as(
            r#"
            UPDATE BATCH_JOB_EXECUTION
            SET STATUS = ?, FAILURE = ?, FINISHED_AT = ?
            WHERE STATUS IN (?, ?)
            RETURNING ID
            "#,
        )
        .bind(JobStatus::Failed.as_str())
        .bind(ABANDONED_CAUSE)
        .bind(Utc::now())
        .bind(JobStatus::Pending.as_str())
        .bind(JobStatus::Running.as_str())
        .fetch_all(&self.pool)
        .await?;

        ids.into_iter()
            .map(|(id,)| {
                Uuid::parse_str(&id).map_err(|e| RepositoryError::Corrupt {
                    id,
                    reason: e.to_string(),
                })
            })
            .collect()
    }
}
