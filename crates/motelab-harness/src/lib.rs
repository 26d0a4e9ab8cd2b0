//! MOTELAB Harness - scripted tests over simulated node networks
//!
//! This crate provides:
//! - Event predicates and the predicate-waiting scheduler
//! - Per-node state store and rendezvous readiness
//! - Test runs driven by step-function scripts
//! - Verdict reporting (pass, fail, timeout)
//! - TOML run configs and declarative step scripts
//! - Live event feeds (tokio) and offline log replay
//! - Synthetic report streams with ground truth

pub mod error;
pub mod predicate;
pub mod state;
pub mod scheduler;
pub mod command;
pub mod verdict;
pub mod run;
pub mod scripts;
pub mod config;
pub mod feed;
pub mod replay;
pub mod synthetic;

pub use error::*;
pub use predicate::*;
pub use state::*;
pub use scheduler::*;
pub use command::*;
pub use verdict::*;
pub use run::*;
pub use scripts::*;
pub use config::*;
pub use feed::*;
pub use replay::*;
pub use synthetic::*;
