//! MOTELAB Core - Fundamental types shared by the harness crates
//!
//! This crate defines:
//! - Node identifiers (NodeId)
//! - Event time (SimTime)
//! - Log events and the log-line format used for replay
//! - Core error type

pub mod id;
pub mod time;
pub mod event;
pub mod error;

pub use id::*;
pub use time::*;
pub use event::*;
pub use error::*;
