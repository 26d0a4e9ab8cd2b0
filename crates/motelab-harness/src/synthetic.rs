//! Synthetic report streams
//!
//! Generates `DATA` report lines for a set of source nodes with seeded loss,
//! duplication, jitter and latency, and records the ground truth the
//! telemetry aggregator should arrive at. Drops are never consecutive and
//! never hit the first or last report of a node, so every loss shows up as
//! a sequence gap of exactly two.

use std::collections::BTreeMap;
use std::time::Duration;

use rand::distributions::{Distribution, Uniform};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use motelab_core::{Event, NodeId, SimTime};

/// Generator configuration
#[derive(Clone, Debug)]
pub struct SyntheticConfig {
    /// Source nodes are `1..=nodes`
    pub nodes: u32,
    pub reports_per_node: u32,
    /// Nominal time between two reports of one node
    pub period: Duration,
    /// Probability a report is dropped (0.0 - 1.0)
    pub loss_rate: f64,
    /// Probability a delivered report is delivered twice
    pub duplicate_prob: f64,
    pub max_hops: u32,
    /// Upper bound of the per-report latency field, `None` to omit it
    pub max_latency_ms: Option<u64>,
    /// Node that prints the report lines
    pub sink: NodeId,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        SyntheticConfig {
            nodes: 5,
            reports_per_node: 20,
            period: Duration::from_secs(1),
            loss_rate: 0.05,
            duplicate_prob: 0.02,
            max_hops: 4,
            max_latency_ms: Some(100),
            sink: NodeId::new(1),
        }
    }
}

impl SyntheticConfig {
    /// Lossless, duplicate-free stream
    pub fn clean() -> Self {
        SyntheticConfig {
            loss_rate: 0.0,
            duplicate_prob: 0.0,
            ..Default::default()
        }
    }

    /// Heavy loss and duplication
    pub fn lossy() -> Self {
        SyntheticConfig {
            loss_rate: 0.3,
            duplicate_prob: 0.1,
            ..Default::default()
        }
    }
}

/// Expected statistics for one source
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NodeTruth {
    /// Reports the source produced (including dropped ones)
    pub sent: u64,
    pub received: u64,
    pub lost: u64,
    pub duplicates: u64,
    pub hops_total: u64,
    pub last_seqno: Option<u32>,
}

/// Expected statistics for a generated stream
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GroundTruth {
    pub nodes: BTreeMap<NodeId, NodeTruth>,
}

impl GroundTruth {
    pub fn received(&self) -> u64 {
        self.nodes.values().map(|n| n.received).sum()
    }

    pub fn lost(&self) -> u64 {
        self.nodes.values().map(|n| n.lost).sum()
    }

    pub fn duplicates(&self) -> u64 {
        self.nodes.values().map(|n| n.duplicates).sum()
    }

    pub fn hops(&self) -> u64 {
        self.nodes.values().map(|n| n.hops_total).sum()
    }
}

/// Seeded report stream generator
pub struct ReportGenerator {
    config: SyntheticConfig,
    rng: StdRng,
}

impl ReportGenerator {
    pub fn new(config: SyntheticConfig, seed: u64) -> Self {
        ReportGenerator {
            config,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn config(&self) -> &SyntheticConfig {
        &self.config
    }

    /// Produce a time-ordered event stream and its ground truth
    pub fn generate(&mut self) -> (Vec<Event>, GroundTruth) {
        let period_us = self.config.period.as_micros().max(2) as u64;
        let offset = Uniform::new(0, period_us);
        let jitter = Uniform::new(0, period_us / 2);
        let hops = Uniform::new_inclusive(1, self.config.max_hops.max(1));

        let mut timed: Vec<(SimTime, Event)> = Vec::new();
        let mut truth = GroundTruth::default();

        for source in NodeId::range(self.config.nodes) {
            let start = offset.sample(&mut self.rng);
            let node = truth.nodes.entry(source).or_default();
            let last = self.config.reports_per_node;
            let mut previous_dropped = false;

            for seqno in 1..=last {
                node.sent += 1;
                let droppable = seqno != 1 && seqno != last && !previous_dropped;
                if droppable && self.rng.gen::<f64>() < self.config.loss_rate {
                    node.lost += 1;
                    previous_dropped = true;
                    continue;
                }
                previous_dropped = false;

                let at = SimTime::from_micros(
                    start + u64::from(seqno - 1) * period_us + jitter.sample(&mut self.rng),
                );
                let hop = hops.sample(&mut self.rng);
                let mut text = format!("DATA source={} seqno={seqno} hops={hop}", source.raw());
                if let Some(max) = self.config.max_latency_ms {
                    let latency = self.rng.gen_range(0..=max);
                    text.push_str(&format!(" latency={latency}"));
                }

                let copies = if self.rng.gen::<f64>() < self.config.duplicate_prob {
                    2
                } else {
                    1
                };
                node.received += copies;
                node.duplicates += copies - 1;
                node.hops_total += u64::from(hop) * copies;
                node.last_seqno = Some(seqno);
                for _ in 0..copies {
                    timed.push((at, Event::new(at, self.config.sink, text.clone())));
                }
            }
        }

        // Stable: per-source order and duplicate adjacency survive
        timed.sort_by_key(|(at, _)| *at);
        let events = timed.into_iter().map(|(_, e)| e).collect();
        (events, truth)
    }
}

/// Render events as a replayable log
pub fn to_log(events: &[Event]) -> String {
    let mut out = String::new();
    for event in events {
        out.push_str(&event.to_log_line());
        out.push('\n');
    }
    out
}
