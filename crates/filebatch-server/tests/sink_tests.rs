//! Sink writer and job repository tests against a real SQLite database

mod helpers;

use anyhow::Result;
use filebatch_server::batch::{
    Checkpoint, Chunk, ChunkCheckpoint, ItemWriter, JobExecution, JobStatus, Record,
    RepositoryError, SinkReader, SqlSinkWriter, WriteMode,
};
use helpers::{init_tracing, TestDb};

fn chunk(records: Vec<Record>) -> Chunk {
    let last_line = records.len() as i64;
    Chunk {
        records,
        first_line: 1,
        last_line,
        checkpoint: None,
    }
}

#[tokio::test]
async fn test_chunk_commits_records_and_checkpoint_together() -> Result<()> {
    init_tracing();
    let db = TestDb::new().await;
    let repository = db.repository();
    let execution = JobExecution::new("/in/data.csv", "/in/data.csv");
    repository.create(&execution).await?;

    let progress = Checkpoint {
        lines_consumed: 2,
        records_written: 2,
        chunks_written: 1,
        records_skipped: 0,
    };
    let mut batch = chunk(vec![Record::new(1, "Room-A"), Record::new(2, "Room-B")]);
    batch.checkpoint = Some(ChunkCheckpoint {
        execution_id: execution.id,
        checkpoint: progress,
    });

    SqlSinkWriter::new(db.pool().clone(), WriteMode::Insert)
        .write(&batch)
        .await?;

    assert_eq!(db.reservation_ids().await, vec![1, 2]);
    assert_eq!(repository.get(execution.id).await?.checkpoint, progress);
    Ok(())
}

#[tokio::test]
async fn test_duplicate_id_rolls_back_whole_chunk_and_checkpoint() -> Result<()> {
    init_tracing();
    let db = TestDb::new().await;
    let repository = db.repository();
    let execution = JobExecution::new("/in/data.csv", "/in/data.csv");
    repository.create(&execution).await?;
    db.insert_reservation(3, "Taken").await;

    let mut batch = chunk(vec![
        Record::new(1, "Room-A"),
        Record::new(2, "Room-B"),
        Record::new(3, "Room-C"),
    ]);
    batch.checkpoint = Some(ChunkCheckpoint {
        execution_id: execution.id,
        checkpoint: Checkpoint {
            lines_consumed: 3,
            records_written: 3,
            chunks_written: 1,
            records_skipped: 0,
        },
    });

    let err = SqlSinkWriter::new(db.pool().clone(), WriteMode::Insert)
        .write(&batch)
        .await
        .unwrap_err();

    assert!(err.is_duplicate_key());
    assert_eq!(db.reservation_ids().await, vec![3]);
    assert_eq!(
        repository.get(execution.id).await?.checkpoint,
        Checkpoint::default()
    );
    Ok(())
}

#[tokio::test]
async fn test_upsert_mode_replaces_existing_names() -> Result<()> {
    init_tracing();
    let db = TestDb::new().await;
    db.insert_reservation(1, "Old").await;

    SqlSinkWriter::new(db.pool().clone(), WriteMode::Upsert)
        .write(&chunk(vec![Record::new(1, "New"), Record::new(2, "Fresh")]))
        .await?;

    let rows = SinkReader::new(db.pool().clone()).rows().await?;
    assert_eq!(rows, vec![Record::new(1, "New"), Record::new(2, "Fresh")]);
    Ok(())
}

#[tokio::test]
async fn test_repository_round_trip_and_key_lookup() -> Result<()> {
    init_tracing();
    let db = TestDb::new().await;
    let repository = db.repository();
    let execution = JobExecution::new("/in/data.csv@1", "/in/data.csv");
    repository.create(&execution).await?;

    let found = repository
        .find_by_key("/in/data.csv@1")
        .await?
        .expect("execution by key");
    assert_eq!(found.id, execution.id);
    assert_eq!(found.status, JobStatus::Pending);
    assert_eq!(found.input_file, execution.input_file);
    assert!(repository.find_by_key("/in/other.csv").await?.is_none());

    // JOB_KEY is unique.
    let clash = JobExecution::new("/in/data.csv@1", "/in/data.csv");
    assert!(repository.create(&clash).await.is_err());
    Ok(())
}

#[tokio::test]
async fn test_status_transitions() -> Result<()> {
    init_tracing();
    let db = TestDb::new().await;
    let repository = db.repository();
    let execution = JobExecution::new("key", "/in/data.csv");
    repository.create(&execution).await?;

    repository.mark_running(execution.id).await?;
    let running = repository.get(execution.id).await?;
    assert_eq!(running.status, JobStatus::Running);
    assert!(running.started_at.is_some());

    repository.mark_failed(execution.id, "boom").await?;
    let failed = repository.get(execution.id).await?;
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.failure.as_deref(), Some("boom"));

    // Only FAILED executions can be reset.
    assert!(repository.reset_for_restart(execution.id).await?);
    assert!(!repository.reset_for_restart(execution.id).await?);
    let pending = repository.get(execution.id).await?;
    assert_eq!(pending.status, JobStatus::Pending);
    assert_eq!(pending.attempt, 2);
    assert!(pending.failure.is_none());

    let final_progress = Checkpoint {
        lines_consumed: 9,
        records_written: 8,
        chunks_written: 2,
        records_skipped: 1,
    };
    repository.mark_running(execution.id).await?;
    repository.mark_completed(execution.id, &final_progress).await?;
    let completed = repository.get(execution.id).await?;
    assert_eq!(completed.status, JobStatus::Completed);
    assert_eq!(completed.checkpoint, final_progress);
    assert!(completed.finished_at.is_some());

    assert!(repository.recover_abandoned().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_transitions_from_the_wrong_status_are_errors() -> Result<()> {
    init_tracing();
    let db = TestDb::new().await;
    let repository = db.repository();
    let execution = JobExecution::new("key", "/in/data.csv");
    repository.create(&execution).await?;

    // Completing a job that never started is refused and stores nothing.
    let progress = Checkpoint {
        lines_consumed: 3,
        records_written: 3,
        chunks_written: 1,
        records_skipped: 0,
    };
    let err = repository
        .mark_completed(execution.id, &progress)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RepositoryError::StaleStatus {
            to: JobStatus::Completed,
            ..
        }
    ));
    let stored = repository.get(execution.id).await?;
    assert_eq!(stored.status, JobStatus::Pending);
    assert_eq!(stored.checkpoint, Checkpoint::default());

    repository.mark_running(execution.id).await?;
    assert!(repository.mark_running(execution.id).await.is_err());

    repository.mark_completed(execution.id, &progress).await?;
    let err = repository.mark_failed(execution.id, "late").await.unwrap_err();
    assert!(matches!(
        err,
        RepositoryError::StaleStatus {
            to: JobStatus::Failed,
            ..
        }
    ));
    assert_eq!(
        repository.get(execution.id).await?.status,
        JobStatus::Completed
    );
    Ok(())
}
