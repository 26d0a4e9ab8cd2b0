//! Run outcome and verdict reporting
//!
//! `Pending -> {Passed, Failed, TimedOut}`; the first terminal transition
//! wins and every later attempt is ignored.

use serde::Serialize;
use tracing::{debug, info};

use motelab_core::{Event, SimTime};
use motelab_telemetry::TelemetrySummary;

/// Outcome of one run
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    Pending,
    Passed,
    Failed { reason: String },
    TimedOut { last_message: Option<String> },
}

impl RunOutcome {
    pub fn failed(reason: impl Into<String>) -> Self {
        RunOutcome::Failed {
            reason: reason.into(),
        }
    }

    /// Timeout outcome carrying the last observed event for diagnosis
    pub fn timed_out(last: Option<&Event>) -> Self {
        RunOutcome::TimedOut {
            last_message: last.map(|e| e.to_string()),
        }
    }

    #[inline]
    pub fn is_pending(&self) -> bool {
        matches!(self, RunOutcome::Pending)
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        !self.is_pending()
    }

    pub fn status(&self) -> VerdictStatus {
        match self {
            RunOutcome::Pending => VerdictStatus::Incomplete,
            RunOutcome::Passed => VerdictStatus::Pass,
            RunOutcome::Failed { .. } => VerdictStatus::Fail,
            RunOutcome::TimedOut { .. } => VerdictStatus::Timeout,
        }
    }

    /// Human-readable diagnostic
    pub fn diagnostic(&self) -> String {
        match self {
            RunOutcome::Pending => "run ended without a verdict".to_string(),
            RunOutcome::Passed => "passed".to_string(),
            RunOutcome::Failed { reason } => format!("failed: {reason}"),
            RunOutcome::TimedOut {
                last_message: Some(last),
            } => format!("timed out; last event: {last}"),
            RunOutcome::TimedOut { last_message: None } => {
                "timed out before any event arrived".to_string()
            }
        }
    }
}

/// Coarse status a host acts on
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictStatus {
    Pass,
    Fail,
    Timeout,
    /// The event source ended while the run was still pending
    Incomplete,
}

impl VerdictStatus {
    /// Process exit code for command-line hosts
    pub fn exit_code(self) -> i32 {
        match self {
            VerdictStatus::Pass => 0,
            VerdictStatus::Fail => 1,
            VerdictStatus::Timeout => 2,
            VerdictStatus::Incomplete => 3,
        }
    }
}

/// Holds the outcome and enforces the single terminal transition
#[derive(Clone, Debug)]
pub struct VerdictReporter {
    outcome: RunOutcome,
    concluded_at: Option<SimTime>,
}

impl Default for VerdictReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl VerdictReporter {
    pub fn new() -> Self {
        VerdictReporter {
            outcome: RunOutcome::Pending,
            concluded_at: None,
        }
    }

    pub fn outcome(&self) -> &RunOutcome {
        &self.outcome
    }

    pub fn concluded_at(&self) -> Option<SimTime> {
        self.concluded_at
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        self.outcome.is_terminal()
    }

    /// Move to a terminal outcome. Returns false (and changes nothing) if the
    /// run already concluded or `outcome` is `Pending`.
    pub fn conclude(&mut self, outcome: RunOutcome, at: SimTime) -> bool {
        if outcome.is_pending() {
            return false;
        }
        if self.outcome.is_terminal() {
            debug!(current = ?self.outcome, ignored = ?outcome, "run already concluded");
            return false;
        }
        info!(at = %at, outcome = %outcome.diagnostic(), "run concluded");
        self.outcome = outcome;
        self.concluded_at = Some(at);
        true
    }
}

/// Final result handed to the host
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Verdict {
    /// Run name
    pub name: String,
    pub status: VerdictStatus,
    #[serde(flatten)]
    pub outcome: RunOutcome,
    pub diagnostic: String,
    /// Event time of the terminal transition (or of the last event)
    pub ended_at: SimTime,
    pub events_processed: u64,
    pub telemetry: Option<TelemetrySummary>,
}

impl Verdict {
    #[inline]
    pub fn passed(&self) -> bool {
        self.status == VerdictStatus::Pass
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
