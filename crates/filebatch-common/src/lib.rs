//! Filebatch Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared error handling, environment parsing and logging setup for the filebatch
//! workspace members.
//!
//! # Example
//!
//! ```no_run
//! use filebatch_common::{env, Result};
//!
//! fn chunk_size() -> Result<usize> {
//!     env::var_or("FILEBATCH_CHUNK_SIZE", 5)
//! }
//! ```

pub mod env;
pub mod error;
pub mod logging;

pub use error::{FilebatchError, Result};
