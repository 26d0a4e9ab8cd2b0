//! Per-source sequence tracking
//!
//! Loss and duplicate accounting follows a narrow heuristic: a gap of exactly
//! two between consecutive sequence numbers is one lost packet, a gap of zero
//! is a duplicate. Every other gap is accepted as-is without touching the
//! loss or duplicate counters. A sequence number below the previous one is
//! additionally counted as an estimated node restart.

use serde::Serialize;

/// How a reception was classified against the previous sequence number
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GapClass {
    /// No previous sequence number recorded
    First,
    /// Gap of exactly one
    InOrder,
    /// Gap of exactly two: one packet lost
    Lost,
    /// Gap of zero
    Duplicate,
    /// Sequence number went backwards
    Restart,
    /// Any other forward gap, accepted without loss accounting
    Unclassified(u64),
}

impl GapClass {
    /// Classify `seqno` against the previously recorded value
    pub fn classify(last: Option<u32>, seqno: u32) -> Self {
        let Some(last) = last else {
            return GapClass::First;
        };
        let gap = i64::from(seqno) - i64::from(last);
        match gap {
            0 => GapClass::Duplicate,
            1 => GapClass::InOrder,
            2 => GapClass::Lost,
            g if g < 0 => GapClass::Restart,
            g => GapClass::Unclassified(g as u64),
        }
    }
}

/// Sequence state for one source node
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SequenceTracker {
    /// Last sequence number seen (`None` until the first report)
    pub last_seqno: Option<u32>,
    /// Every reception, duplicates included
    pub received_count: u64,
    pub lost_count: u64,
    pub duplicate_count: u64,
    /// Hop count carried by the latest report
    pub hop_count: u32,
    /// Backwards jumps in the sequence
    pub estimated_restarts: u64,
}

impl SequenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one reception and return its classification
    pub fn observe(&mut self, seqno: u32, hops: u32) -> GapClass {
        let class = GapClass::classify(self.last_seqno, seqno);
        match class {
            GapClass::Lost => self.lost_count += 1,
            GapClass::Duplicate => self.duplicate_count += 1,
            GapClass::Restart => self.estimated_restarts += 1,
            GapClass::First | GapClass::InOrder | GapClass::Unclassified(_) => {}
        }

        self.last_seqno = Some(seqno);
        self.received_count += 1;
        self.hop_count = hops;
        class
    }
}
