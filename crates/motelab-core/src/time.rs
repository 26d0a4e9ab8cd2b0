//! Event time for harness runs
//!
//! Simulated nodes stamp every log line with the simulator clock. The harness
//! never reads the wall clock while evaluating a run: timeouts and delayed
//! events are expressed against this event time.

use std::ops::{Add, Sub};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Event time - monotonic, microseconds since simulation start
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SimTime(pub u64);

impl SimTime {
    pub const ZERO: SimTime = SimTime(0);
    pub const MAX: SimTime = SimTime(u64::MAX);

    #[inline]
    pub fn from_micros(micros: u64) -> Self {
        SimTime(micros)
    }

    #[inline]
    pub fn from_millis(millis: u64) -> Self {
        SimTime(millis.saturating_mul(1000))
    }

    #[inline]
    pub fn from_duration(duration: Duration) -> Self {
        SimTime(duration.as_micros().min(u64::MAX as u128) as u64)
    }

    #[inline]
    pub fn as_micros(self) -> u64 {
        self.0
    }

    #[inline]
    pub fn as_millis(self) -> u64 {
        self.0 / 1000
    }

    #[inline]
    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / 1_000_000.0
    }

    /// Elapsed time since simulation start
    #[inline]
    pub fn as_duration(self) -> Duration {
        Duration::from_micros(self.0)
    }

    #[inline]
    pub fn saturating_add(self, duration: Duration) -> Self {
        let micros = duration.as_micros().min(u64::MAX as u128) as u64;
        SimTime(self.0.saturating_add(micros))
    }
}

impl Add<Duration> for SimTime {
    type Output = SimTime;

    #[inline]
    fn add(self, rhs: Duration) -> Self::Output {
        self.saturating_add(rhs)
    }
}

impl Sub<SimTime> for SimTime {
    type Output = Duration;

    #[inline]
    fn sub(self, rhs: SimTime) -> Self::Output {
        Duration::from_micros(self.0.saturating_sub(rhs.0))
    }
}

impl std::fmt::Debug for SimTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "t({:.3}ms)", self.0 as f64 / 1000.0)
    }
}

impl std::fmt::Display for SimTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{:03}ms", self.0 / 1000, self.0 % 1000)
    }
}
