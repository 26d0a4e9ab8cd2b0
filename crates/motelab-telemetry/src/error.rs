//! Telemetry errors

use thiserror::Error;

use motelab_core::NodeId;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TelemetryError {
    /// A node delivered more reports than the run allows
    #[error("node {node} received {count} reports, ceiling is {ceiling}")]
    CeilingExceeded { node: NodeId, count: u64, ceiling: u64 },
}

pub type TelemetryResult<T> = Result<T, TelemetryError>;
