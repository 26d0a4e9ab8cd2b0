//! Radio and CPU duty-cycle accounting
//!
//! Power reports carry cumulative tick counters since boot. The tracker
//! accumulates the deltas between consecutive reports so that a node reboot
//! (counters dropping back towards zero) does not erase earlier time.

use serde::Serialize;

use crate::PowerReport;

/// Accumulated power counters for one node
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PowerTracker {
    /// Sum of counter deltas
    pub total: PowerTotals,
    /// Number of power reports seen
    pub samples: u64,
    #[serde(skip)]
    last: Option<PowerReport>,
}

/// Tick totals per state
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PowerTotals {
    pub cpu: u64,
    pub lpm: u64,
    pub listen: u64,
    pub transmit: u64,
}

impl PowerTotals {
    /// Ticks the node was measured for
    #[inline]
    pub fn measured(&self) -> u64 {
        self.cpu.saturating_add(self.lpm)
    }

    /// Fraction of measured time the radio was listening
    pub fn listen_duty(&self) -> f64 {
        ratio(self.listen, self.measured())
    }

    /// Fraction of measured time the radio was transmitting
    pub fn transmit_duty(&self) -> f64 {
        ratio(self.transmit, self.measured())
    }

    /// Radio on (listen + transmit) fraction
    pub fn radio_on_duty(&self) -> f64 {
        ratio(self.listen.saturating_add(self.transmit), self.measured())
    }
}

fn ratio(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

fn delta(current: u64, previous: u64) -> u64 {
    // Counter went backwards: node rebooted, count from zero
    if current >= previous {
        current - previous
    } else {
        current
    }
}

impl PowerTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one cumulative report into the totals
    pub fn observe(&mut self, report: PowerReport) {
        let previous = self.last.unwrap_or_default();
        let total = &mut self.total;
        total.cpu = total.cpu.saturating_add(delta(report.cpu, previous.cpu));
        total.lpm = total.lpm.saturating_add(delta(report.lpm, previous.lpm));
        total.listen = total.listen.saturating_add(delta(report.listen, previous.listen));
        total.transmit = total
            .transmit
            .saturating_add(delta(report.transmit, previous.transmit));
        self.last = Some(report);
        self.samples += 1;
    }
}
