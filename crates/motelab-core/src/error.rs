//! Error types shared by the MOTELAB crates

use thiserror::Error;

use crate::SimTime;

/// Core errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MotelabError {
    #[error("Invalid log line: {0}")]
    InvalidLogLine(String),

    #[error("Event out of order: {got} arrived after {previous}")]
    OutOfOrder { previous: SimTime, got: SimTime },
}

/// Result type for core operations
pub type MotelabResult<T> = Result<T, MotelabError>;
