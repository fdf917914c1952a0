//! File-triggered, chunk-oriented batch pipeline
//!
//! - [`parser`]: one delimited line to one [`Record`]
//! - [`writer`]: transactional chunk writes into the relational sink
//! - [`step`]: read, parse and write a file in chunks with a resumable checkpoint
//! - [`repository`]: durable job execution state
//! - [`coordinator`]: at-most-once launch per job key, bounded concurrency
//! - [`watcher`]: fixed-rate directory polling
//! - [`listener`]: completion reports
//! - [`pipeline`]: wiring of all of the above

pub mod coordinator;
pub mod error;
pub mod listener;
pub mod parser;
pub mod pipeline;
pub mod repository;
pub mod step;
pub mod types;
pub mod watcher;
pub mod writer;

pub use coordinator::{JobLaunchCoordinator, LaunchConfig, LaunchedJob};
pub use error::{
    FormatError, LaunchRejected, ParseError, RepositoryError, StepError, WatchError, WriteError,
};
pub use listener::JobExecutionListener;
pub use parser::{LineFormat, RecordLineParser};
pub use pipeline::{BatchPipeline, PipelineHandle};
pub use repository::JobRepository;
pub use step::{ChunkOrientedStep, StepConfig, StepFailure};
pub use types::{
    Checkpoint, Chunk, ChunkCheckpoint, FileArrived, JobCompletion, JobExecution, JobStatus,
    KeyPolicy, Record, SkipPolicy, StepReport, StepState, WriteMode,
};
pub use watcher::DirectoryWatcher;
pub use writer::{ItemWriter, SinkReader, SqlSinkWriter};
