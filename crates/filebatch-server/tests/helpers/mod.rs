//! Test helpers for filebatch server integration tests
//!
//! This module provides utilities for:
//! - A migrated SQLite sink in a temporary directory
//! - Input file fixtures
//! - Coordinator assembly with custom writers
//! - Waiting on completion events

#![allow(dead_code)]

use async_trait::async_trait;
use filebatch_server::batch::{
    Chunk, ChunkOrientedStep, ItemWriter, JobCompletion, JobLaunchCoordinator, JobRepository,
    LaunchConfig, LineFormat, RecordLineParser, SqlSinkWriter, StepConfig, WriteError, WriteMode,
};
use filebatch_server::config::{BatchConfig, DatabaseConfig};
use filebatch_server::db;
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::{broadcast, Semaphore};

/// Initialize tracing for tests
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,filebatch_server=debug")),
        )
        .with_test_writer()
        .try_init();
}

/// A migrated sink database plus an input directory, removed on drop
pub struct TestDb {
    pool: SqlitePool,
    input_dir: PathBuf,
    _dir: TempDir,
}

impl TestDb {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let database = DatabaseConfig {
            url: format!("sqlite://{}", dir.path().join("sink.db").display()),
            max_connections: 5,
            connect_timeout_secs: 5,
        };

        let pool = db::connect(&database)
            .await
            .expect("Failed to open test database");
        db::migrate(&pool).await.expect("Failed to run migrations");

        let input_dir = dir.path().join("in");
        std::fs::create_dir_all(&input_dir).expect("Failed to create input dir");

        Self {
            pool,
            input_dir,
            _dir: dir,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn input_dir(&self) -> &Path {
        &self.input_dir
    }

    pub fn repository(&self) -> JobRepository {
        JobRepository::new(self.pool.clone())
    }

    /// Write `content` to `name` inside the input directory
    pub fn write_input(&self, name: &str, content: &str) -> PathBuf {
        let path = self.input_dir.join(name);
        std::fs::write(&path, content).expect("Failed to write input file");
        path
    }

    /// Write under a hidden name and rename, so a watcher never sees a partial file
    pub fn drop_input(&self, name: &str, content: &str) -> PathBuf {
        let staging = self.input_dir.join(format!(".{name}.tmp"));
        std::fs::write(&staging, content).expect("Failed to stage input file");
        let path = self.input_dir.join(name);
        std::fs::rename(&staging, &path).expect("Failed to publish input file");
        path
    }

    pub async fn reservation_ids(&self) -> Vec<i64> {
        sqlx::query_scalar("SELECT ID FROM RESERVATION ORDER BY ID")
            .fetch_all(&self.pool)
            .await
            .expect("Failed to read RESERVATION")
    }

    pub async fn reservation_count(&self) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM RESERVATION")
            .fetch_one(&self.pool)
            .await
            .expect("Failed to count RESERVATION")
    }

    pub async fn insert_reservation(&self, id: i64, name: &str) {
        sqlx::query("INSERT INTO RESERVATION (ID, RESERVATION_NAME) VALUES (?, ?)")
            .bind(id)
            .bind(name)
            .execute(&self.pool)
            .await
            .expect("Failed to seed RESERVATION");
    }

    pub async fn delete_reservation(&self, id: i64) {
        sqlx::query("DELETE FROM RESERVATION WHERE ID = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .expect("Failed to delete from RESERVATION");
    }

    /// Coordinator writing straight into the sink
    pub fn coordinator(&self, step: StepConfig, launch: LaunchConfig) -> JobLaunchCoordinator {
        let writer = SqlSinkWriter::new(self.pool.clone(), WriteMode::Insert);
        self.coordinator_with_writer(Arc::new(writer), step, launch)
    }

    pub fn coordinator_with_writer(
        &self,
        writer: Arc<dyn ItemWriter>,
        step: StepConfig,
        launch: LaunchConfig,
    ) -> JobLaunchCoordinator {
        let parser = RecordLineParser::new(&LineFormat::default()).expect("Default format");
        let step = ChunkOrientedStep::new(Arc::new(parser), writer, step);
        JobLaunchCoordinator::new(self.repository(), step, launch)
    }

    /// Pipeline configuration watching this database's input directory
    pub fn batch_config(&self) -> BatchConfig {
        BatchConfig {
            input_dir: self.input_dir.clone(),
            poll_interval_ms: 20,
            ..BatchConfig::default()
        }
    }
}

/// `id,Room-id` lines for every id in `ids`
pub fn room_lines(ids: impl IntoIterator<Item = i64>) -> String {
    ids.into_iter().map(|i| format!("{i},Room-{i}\n")).collect()
}

/// Sink writer that blocks every chunk until the gate is opened
pub struct GatedWriter {
    inner: SqlSinkWriter,
    gate: Arc<Semaphore>,
}

impl GatedWriter {
    pub fn new(pool: SqlitePool) -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        let writer = Self {
            inner: SqlSinkWriter::new(pool, WriteMode::Insert),
            gate: gate.clone(),
        };
        (writer, gate)
    }
}

#[async_trait]
impl ItemWriter for GatedWriter {
    async fn write(&self, chunk: &Chunk) -> Result<(), WriteError> {
        let _open = self
            .gate
            .acquire()
            .await
            .map_err(|_| WriteError::Begin(sqlx::Error::PoolClosed))?;
        self.inner.write(chunk).await
    }
}

/// Receive the next completion or panic after `timeout`
pub async fn next_completion(
    completions: &mut broadcast::Receiver<JobCompletion>,
    timeout: Duration,
) -> JobCompletion {
    tokio::time::timeout(timeout, completions.recv())
        .await
        .expect("Timed out waiting for job completion")
        .expect("Completion channel closed")
}
