//! MOTELAB Telemetry - network statistics over node data reports
//!
//! This crate provides:
//! - Report parsing (data and power lines, silent skip of malformed ones)
//! - Per-source sequence tracking (loss, duplicates, restarts)
//! - Power duty-cycle accumulation
//! - The aggregator and its serializable summary

pub mod error;
pub mod report;
pub mod sequence;
pub mod power;
pub mod aggregator;

pub use error::*;
pub use report::*;
pub use sequence::*;
pub use power::*;
pub use aggregator::*;
