//! Harness errors
//!
//! Test outcomes (pass, fail, timeout) are never errors; they are reported
//! through [`crate::RunOutcome`]. This enum covers misuse of the harness and
//! infrastructure failures.

use thiserror::Error;

use motelab_core::MotelabError;

/// Harness errors
#[derive(Error, Debug)]
pub enum HarnessError {
    #[error(transparent)]
    Core(#[from] MotelabError),

    #[error("Invalid run config: {0}")]
    Config(String),

    #[error("Log line {line}: {source}")]
    Replay { line: usize, source: MotelabError },

    #[error("Config parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Run already started")]
    AlreadyStarted,

    #[error("Run not started")]
    NotStarted,

    #[error("Event feed closed")]
    FeedClosed,
}

/// Result type for harness operations
pub type HarnessResult<T> = Result<T, HarnessError>;
