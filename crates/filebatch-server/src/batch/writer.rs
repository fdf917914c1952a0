//! Relational sink for parsed records
//!
//! Each call to [`ItemWriter::write`] is one transaction: every record of the chunk and
//! the chunk's checkpoint commit together or not at all.

use async_trait::async_trait;
use sqlx::SqlitePool;

use super::error::WriteError;
use super::repository::store_checkpoint;
use super::types::{Chunk, Record, WriteMode};

const INSERT_RESERVATION: &str = r#"
    INSERT INTO RESERVATION (ID, RESERVATION_NAME)
    VALUES (?, ?)
"#;

const UPSERT_RESERVATION: &str = r#"
    INSERT INTO RESERVATION (ID, RESERVATION_NAME)
    VALUES (?, ?)
    ON CONFLICT(ID) DO UPDATE SET RESERVATION_NAME = excluded.RESERVATION_NAME
"#;

/// Destination of committed chunks
#[async_trait]
pub trait ItemWriter: Send + Sync {
    /// Persist every record of `chunk` atomically
    async fn write(&self, chunk: &Chunk) -> Result<(), WriteError>;
}

/// Writes records into the `RESERVATION` table
#[derive(Debug, Clone)]
pub struct SqlSinkWriter {
    pool: SqlitePool,
    mode: WriteMode,
}

impl SqlSinkWriter {
    pub fn new(pool: SqlitePool, mode: WriteMode) -> Self {
        Self { pool, mode }
    }

    pub fn mode(&self) -> WriteMode {
        self.mode
    }

    fn statement(&self) -> &'static str {
        match self.mode {
            WriteMode::Insert => INSERT_RESERVATION,
            WriteMode::Upsert => UPSERT_RESERVATION,
        }
    }
}

#[async_trait]
impl ItemWriter for SqlSinkWriter {
    async fn write(&self, chunk: &Chunk) -> Result<(), WriteError> {
        let mut tx = self.pool.begin().await.map_err(WriteError::Begin)?;

        for record in &chunk.records {
            sqlx::query(self.statement())
                .bind(record.id)
                .bind(&record.name)
                .execute(&mut *tx)
                .await
                .map_err(|source| WriteError::Record {
                    id: record.id,
                    source,
                })?;
        }

        if let Some(progress) = &chunk.checkpoint {
            store_checkpoint(&mut *tx, progress.execution_id, &progress.checkpoint)
                .await
                .map_err(WriteError::Checkpoint)?;
        }

        // Dropping `tx` on any early return above rolls the chunk back.
        tx.commit().await.map_err(WriteError::Commit)?;

        tracing::debug!(
            records = chunk.len(),
            first_line = chunk.first_line,
            last_line = chunk.last_line,
            "Chunk committed"
        );

        Ok(())
    }
}

/// Read side of the sink, used by the completion listener and the HTTP API
#[derive(Debug, Clone)]
pub struct SinkReader {
    pool: SqlitePool,
}

impl SinkReader {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// All rows ordered by id
    pub async fn rows(&self) -> Result<Vec<Record>, sqlx::Error> {
        sqlx::query_as::<_, Record>(
            r#"
            SELECT ID AS id, RESERVATION_NAME AS name
            FROM RESERVATION
            ORDER BY ID
            "#,
        )
        .fetch_all(&self.pool)
        .await
    }

    pub async fn count(&self) -> Result<i64, sqlx::Error> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM RESERVATION")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}
