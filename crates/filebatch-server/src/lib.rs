//! Filebatch Server Library
//!
//! File-triggered batch loading of delimited text into a relational sink.
//!
//! # Overview
//!
//! - **Batch pipeline**: a directory watcher detects new files, a coordinator launches one
//!   job per file at most once, and a chunk-oriented step parses lines into records and
//!   writes them in transactional chunks with a resumable checkpoint
//! - **Job repository**: job executions and their progress live in `BATCH_JOB_EXECUTION`,
//!   so restarts resume after the last committed chunk
//! - **Message relay**: `POST /write/:name` publishes a name that a consumer greets
//! - **Configuration**: environment-based, with command-line overrides in the binary
//!
//! # Example
//!
//! ```no_run
//! use filebatch_server::{batch::BatchPipeline, config::Config, db};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     let pool = db::connect(&config.database).await?;
//!     db::migrate(&pool).await?;
//!
//!     let shutdown = CancellationToken::new();
//!     let pipeline = BatchPipeline::new(pool, &config.batch)?;
//!     pipeline.start(shutdown).await?.join().await
//! }
//! ```

pub mod api;
pub mod batch;
pub mod config;
pub mod db;
pub mod error;
pub mod relay;

pub use error::AppError;
