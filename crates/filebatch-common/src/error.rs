//! Error types shared by filebatch binaries

use thiserror::Error;

/// Result type alias for common operations
pub type Result<T> = std::result::Result<T, FilebatchError>;

/// Main error type for the shared crate
#[derive(Error, Debug)]
pub enum FilebatchError {
    #[error("Invalid value for {key}: {value:?} ({reason})")]
    InvalidEnv {
        key: String,
        value: String,
        reason: String,
    },
}
