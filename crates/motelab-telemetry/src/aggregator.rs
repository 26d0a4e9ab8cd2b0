//! Telemetry aggregator
//!
//! Converts report events into per-node and network-wide statistics. One
//! aggregator belongs to exactly one run; nothing here is shared.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use motelab_core::{Event, NodeId, SimTime};

use crate::{
    DataReport, GapClass, ParsedLine, PowerReport, PowerTracker, ReportFormat, SequenceTracker,
    TelemetryError, TelemetryResult,
};

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Aggregator configuration
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Report marker words
    #[serde(flatten)]
    pub format: ReportFormat,
    /// Per-node reception ceiling; exceeding it fails the run
    pub max_received_per_node: Option<u64>,
}

impl TelemetryConfig {
    pub fn with_ceiling(mut self, ceiling: u64) -> Self {
        self.max_received_per_node = Some(ceiling);
        self
    }
}

// ============================================================================
// PER-NODE STATE
// ============================================================================

/// Everything accumulated for one source node
#[derive(Clone, Debug, Default)]
pub struct NodeTelemetry {
    pub sequence: SequenceTracker,
    /// Sum of hop counts over every report
    pub hops_total: u64,
    pub latency_total: Duration,
    pub latency_samples: u64,
    pub power: PowerTracker,
    last_report_at: Option<SimTime>,
    period_min: Option<Duration>,
    period_max: Option<Duration>,
    period_total: Duration,
    period_samples: u64,
}

impl NodeTelemetry {
    fn observe_period(&mut self, at: SimTime) {
        if let Some(previous) = self.last_report_at {
            let period = at - previous;
            self.period_min = Some(self.period_min.map_or(period, |m| m.min(period)));
            self.period_max = Some(self.period_max.map_or(period, |m| m.max(period)));
            self.period_total = self.period_total.saturating_add(period);
            self.period_samples += 1;
        }
        self.last_report_at = Some(at);
    }

    /// Shortest, average and longest time between consecutive reports
    pub fn inter_packet(&self) -> Option<(Duration, Duration, Duration)> {
        let (min, max) = (self.period_min?, self.period_max?);
        let avg = mean(self.period_total, self.period_samples)?;
        Some((min, avg, max))
    }

    pub fn average_latency(&self) -> Option<Duration> {
        mean(self.latency_total, self.latency_samples)
    }

    pub fn average_hops(&self) -> f64 {
        if self.sequence.received_count == 0 {
            0.0
        } else {
            self.hops_total as f64 / self.sequence.received_count as f64
        }
    }
}

/// Network-wide running totals
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TelemetryTotals {
    pub received: u64,
    pub lost: u64,
    pub duplicates: u64,
    pub hops: u64,
    #[serde(skip)]
    pub latency: Duration,
    pub latency_samples: u64,
}

/// What `ingest` did with an event
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Ingested {
    /// Not a report line
    Ignored,
    /// Report marker present but fields unusable; nothing aggregated
    Skipped(String),
    Data { source: NodeId, class: GapClass },
    Power { node: NodeId },
}

// ============================================================================
// AGGREGATOR
// ============================================================================

/// Telemetry aggregator for one run
#[derive(Clone, Debug, Default)]
pub struct TelemetryAggregator {
    config: TelemetryConfig,
    nodes: BTreeMap<NodeId, NodeTelemetry>,
    totals: TelemetryTotals,
    skipped_reports: u64,
    /// Known node count for per-node averages
    node_count: Option<usize>,
}

impl TelemetryAggregator {
    pub fn new(config: TelemetryConfig) -> Self {
        TelemetryAggregator {
            config,
            ..Default::default()
        }
    }

    /// Fix the node count used for `avg_messages_per_node`. Without it the
    /// number of distinct sources seen so far is used.
    pub fn with_node_count(mut self, count: usize) -> Self {
        self.node_count = Some(count);
        self
    }

    pub fn config(&self) -> &TelemetryConfig {
        &self.config
    }

    /// Classify an event and aggregate it if it is a report.
    ///
    /// Malformed reports are skipped, never an error. The only error is a
    /// ceiling breach, returned after the report has been counted.
    pub fn ingest(&mut self, event: &Event) -> TelemetryResult<Ingested> {
        if event.is_synthetic() {
            return Ok(Ingested::Ignored);
        }
        match self.config.format.parse(event) {
            ParsedLine::NotReport => Ok(Ingested::Ignored),
            ParsedLine::Malformed(reason) => {
                self.skipped_reports += 1;
                debug!(node = %event.node, %reason, text = %event.text, "skipping malformed report");
                Ok(Ingested::Skipped(reason))
            }
            ParsedLine::Data(report) => {
                let class = self.record(report, event.time)?;
                Ok(Ingested::Data {
                    source: report.source,
                    class,
                })
            }
            ParsedLine::Power(report) => {
                self.record_power(event.node, report);
                Ok(Ingested::Power { node: event.node })
            }
        }
    }

    /// Aggregate one data report received at `at`
    pub fn record(&mut self, report: DataReport, at: SimTime) -> TelemetryResult<GapClass> {
        let node = self.nodes.entry(report.source).or_default();
        let class = node.sequence.observe(report.seqno, report.hops);

        match class {
            GapClass::Lost => self.totals.lost += 1,
            GapClass::Duplicate => self.totals.duplicates += 1,
            _ => {}
        }

        node.hops_total = node.hops_total.saturating_add(u64::from(report.hops));
        node.observe_period(at);
        self.totals.received += 1;
        self.totals.hops = self.totals.hops.saturating_add(u64::from(report.hops));

        // Latency comes straight from node output; saturate instead of trusting it
        if let Some(latency) = report.latency {
            node.latency_total = node.latency_total.saturating_add(latency);
            node.latency_samples += 1;
            self.totals.latency = self.totals.latency.saturating_add(latency);
            self.totals.latency_samples += 1;
        }

        let count = node.sequence.received_count;
        if let Some(ceiling) = self.config.max_received_per_node {
            if count > ceiling {
                warn!(node = %report.source, count, ceiling, "reception ceiling exceeded");
                return Err(TelemetryError::CeilingExceeded {
                    node: report.source,
                    count,
                    ceiling,
                });
            }
        }

        Ok(class)
    }

    /// Aggregate one power report from `node`
    pub fn record_power(&mut self, node: NodeId, report: PowerReport) {
        self.nodes.entry(node).or_default().power.observe(report);
    }

    pub fn node(&self, id: NodeId) -> Option<&NodeTelemetry> {
        self.nodes.get(&id)
    }

    /// Reports received from `id` so far (0 if never heard from)
    pub fn received(&self, id: NodeId) -> u64 {
        self.nodes
            .get(&id)
            .map_or(0, |n| n.sequence.received_count)
    }

    pub fn totals(&self) -> &TelemetryTotals {
        &self.totals
    }

    pub fn skipped_reports(&self) -> u64 {
        self.skipped_reports
    }

    /// Node count used for per-node averages
    pub fn node_count(&self) -> usize {
        self.node_count.unwrap_or_else(|| {
            self.nodes
                .values()
                .filter(|n| n.sequence.received_count > 0)
                .count()
        })
    }

    pub fn avg_messages_per_node(&self) -> f64 {
        match self.node_count() {
            0 => 0.0,
            n => self.totals.received as f64 / n as f64,
        }
    }

    pub fn avg_hops_per_message(&self) -> f64 {
        if self.totals.received == 0 {
            0.0
        } else {
            self.totals.hops as f64 / self.totals.received as f64
        }
    }

    pub fn avg_latency(&self) -> Option<Duration> {
        mean(self.totals.latency, self.totals.latency_samples)
    }

    /// Snapshot of everything aggregated so far
    pub fn summary(&self) -> TelemetrySummary {
        let nodes: Vec<NodeSummary> = self
            .nodes
            .iter()
            .map(|(id, n)| NodeSummary::from_node(*id, n))
            .collect();

        let powered: Vec<&NodeSummary> = nodes.iter().filter(|n| n.power_samples > 0).collect();
        let avg_listen_duty = if powered.is_empty() {
            0.0
        } else {
            powered.iter().map(|n| n.listen_duty).sum::<f64>() / powered.len() as f64
        };

        TelemetrySummary {
            totals: self.totals,
            node_count: self.node_count(),
            avg_messages_per_node: self.avg_messages_per_node(),
            avg_hops_per_message: self.avg_hops_per_message(),
            avg_latency_ms: self.avg_latency().map(millis),
            avg_listen_duty,
            skipped_reports: self.skipped_reports,
            nodes,
        }
    }
}

/// Mean of `samples` durations summing to `total`, `None` without samples
fn mean(total: Duration, samples: u64) -> Option<Duration> {
    if samples == 0 {
        None
    } else {
        Some(total.div_f64(samples as f64))
    }
}

fn millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

// ============================================================================
// SUMMARY
// ============================================================================

/// Per-node line of the summary
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct NodeSummary {
    pub node: NodeId,
    pub received: u64,
    pub lost: u64,
    pub duplicates: u64,
    /// Hop count of the latest report
    pub hops: u32,
    pub avg_hops: f64,
    pub last_seqno: Option<u32>,
    pub estimated_restarts: u64,
    pub avg_latency_ms: Option<f64>,
    pub min_period_ms: Option<f64>,
    pub avg_period_ms: Option<f64>,
    pub max_period_ms: Option<f64>,
    pub power_samples: u64,
    pub listen_duty: f64,
    pub transmit_duty: f64,
}

impl NodeSummary {
    fn from_node(node: NodeId, n: &NodeTelemetry) -> Self {
        let periods = n.inter_packet();
        NodeSummary {
            node,
            received: n.sequence.received_count,
            lost: n.sequence.lost_count,
            duplicates: n.sequence.duplicate_count,
            hops: n.sequence.hop_count,
            avg_hops: n.average_hops(),
            last_seqno: n.sequence.last_seqno,
            estimated_restarts: n.sequence.estimated_restarts,
            avg_latency_ms: n.average_latency().map(millis),
            min_period_ms: periods.map(|p| millis(p.0)),
            avg_period_ms: periods.map(|p| millis(p.1)),
            max_period_ms: periods.map(|p| millis(p.2)),
            power_samples: n.power.samples,
            listen_duty: n.power.total.listen_duty(),
            transmit_duty: n.power.total.transmit_duty(),
        }
    }
}

/// Serializable statistics snapshot
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TelemetrySummary {
    pub totals: TelemetryTotals,
    pub node_count: usize,
    pub avg_messages_per_node: f64,
    pub avg_hops_per_message: f64,
    pub avg_latency_ms: Option<f64>,
    /// Mean listen duty over nodes that sent power reports
    pub avg_listen_duty: f64,
    pub skipped_reports: u64,
    pub nodes: Vec<NodeSummary>,
}

impl TelemetrySummary {
    pub fn node(&self, id: NodeId) -> Option<&NodeSummary> {
        self.nodes.iter().find(|n| n.node == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn report(source: u32, seqno: u32, hops: u32) -> DataReport {
        DataReport::new(NodeId::new(source), seqno, hops)
    }

    fn data_event(ms: u64, sink: u32, text: &str) -> Event {
        Event::new(SimTime::from_millis(ms), NodeId::new(sink), text)
    }

    #[test]
    fn test_sequence_scenario() {
        let mut agg = TelemetryAggregator::default();
        for (i, seqno) in [1, 2, 4, 4, 5].into_iter().enumerate() {
            agg.record(report(1, seqno, 2), SimTime::from_millis(i as u64 * 100))
                .unwrap();
        }

        let node = agg.node(NodeId::new(1)).unwrap();
        assert_eq!(node.sequence.received_count, 5);
        assert_eq!(node.sequence.lost_count, 1);
        assert_eq!(node.sequence.duplicate_count, 1);
        assert_eq!(node.sequence.last_seqno, Some(5));
        assert_eq!(agg.totals().lost, 1);
        assert_eq!(agg.totals().duplicates, 1);
        assert_eq!(agg.totals().received, 5);
    }

    #[test]
    fn test_loss_increments_once() {
        let mut agg = TelemetryAggregator::default();
        agg.record(report(2, 10, 1), SimTime::ZERO).unwrap();
        let class = agg.record(report(2, 12, 1), SimTime::ZERO).unwrap();

        assert_eq!(class, GapClass::Lost);
        assert_eq!(agg.received(NodeId::new(2)), 2);
        assert_eq!(agg.totals().lost, 1);
    }

    #[test]
    fn test_duplicate_leaves_loss_alone() {
        let mut agg = TelemetryAggregator::default();
        agg.record(report(2, 10, 1), SimTime::ZERO).unwrap();
        agg.record(report(2, 10, 1), SimTime::ZERO).unwrap();

        assert_eq!(agg.totals().duplicates, 1);
        assert_eq!(agg.totals().lost, 0);
    }

    #[test]
    fn test_averages() {
        let mut agg = TelemetryAggregator::default().with_node_count(4);
        assert_eq!(agg.avg_hops_per_message(), 0.0);
        assert_eq!(agg.avg_messages_per_node(), 0.0);

        agg.record(report(1, 1, 1), SimTime::ZERO).unwrap();
        agg.record(report(2, 1, 3), SimTime::ZERO).unwrap();

        assert_eq!(agg.avg_hops_per_message(), 2.0);
        assert_eq!(agg.avg_messages_per_node(), 0.5);
    }

    #[test]
    fn test_node_count_defaults_to_sources_seen() {
        let mut agg = TelemetryAggregator::default();
        agg.record(report(1, 1, 1), SimTime::ZERO).unwrap();
        agg.record(report(1, 2, 1), SimTime::ZERO).unwrap();
        agg.record(report(3, 1, 1), SimTime::ZERO).unwrap();

        assert_eq!(agg.node_count(), 2);
        assert_eq!(agg.avg_messages_per_node(), 1.5);
    }

    #[test]
    fn test_latency_accumulates() {
        let mut agg = TelemetryAggregator::default();
        agg.record(
            report(1, 1, 1).with_latency(Duration::from_millis(10)),
            SimTime::ZERO,
        )
        .unwrap();
        agg.record(report(1, 2, 1), SimTime::ZERO).unwrap();
        agg.record(
            report(1, 3, 1).with_latency(Duration::from_millis(30)),
            SimTime::ZERO,
        )
        .unwrap();

        assert_eq!(agg.totals().latency, Duration::from_millis(40));
        assert_eq!(agg.avg_latency(), Some(Duration::from_millis(20)));
    }

    #[test]
    fn test_ceiling_breach() {
        let config = TelemetryConfig::default().with_ceiling(2);
        let mut agg = TelemetryAggregator::new(config);

        agg.record(report(5, 1, 1), SimTime::ZERO).unwrap();
        agg.record(report(5, 2, 1), SimTime::ZERO).unwrap();
        let err = agg.record(report(5, 3, 1), SimTime::ZERO).unwrap_err();

        assert_eq!(
            err,
            TelemetryError::CeilingExceeded {
                node: NodeId::new(5),
                count: 3,
                ceiling: 2
            }
        );
        // The breaching report is still counted
        assert_eq!(agg.received(NodeId::new(5)), 3);
    }

    #[test]
    fn test_ingest_classifies_lines() {
        let mut agg = TelemetryAggregator::default();

        assert_eq!(agg.ingest(&data_event(0, 1, "Booted")).unwrap(), Ingested::Ignored);
        assert!(matches!(
            agg.ingest(&data_event(10, 1, "DATA source=4 seqno=1 hops=2")).unwrap(),
            Ingested::Data { source, class: GapClass::First } if source == NodeId::new(4)
        ));
        assert!(matches!(
            agg.ingest(&data_event(20, 1, "DATA source=4 seqno=zz hops=2")).unwrap(),
            Ingested::Skipped(_)
        ));
        assert_eq!(
            agg.ingest(&data_event(30, 4, "POWER cpu=1 lpm=9 listen=1 transmit=0")).unwrap(),
            Ingested::Power { node: NodeId::new(4) }
        );

        assert_eq!(agg.skipped_reports(), 1);
        assert_eq!(agg.totals().received, 1);
    }

    #[test]
    fn test_synthetic_events_are_ignored() {
        let mut agg = TelemetryAggregator::default();
        let event = Event::synthetic(SimTime::ZERO, "DATA seqno=1 hops=1");
        assert_eq!(agg.ingest(&event).unwrap(), Ingested::Ignored);
        assert_eq!(agg.totals().received, 0);
    }

    #[test]
    fn test_summary() {
        let mut agg = TelemetryAggregator::default();
        for (ms, seqno) in [(0u64, 1u32), (100, 2), (300, 3)] {
            agg.ingest(&data_event(ms, 1, &format!("DATA source=2 seqno={seqno} hops=2")))
                .unwrap();
        }
        agg.ingest(&data_event(400, 2, "POWER cpu=10 lpm=90 listen=20 transmit=5"))
            .unwrap();

        let summary = agg.summary();
        let node = summary.node(NodeId::new(2)).unwrap();
        assert_eq!(node.received, 3);
        assert_eq!(node.min_period_ms, Some(100.0));
        assert_eq!(node.max_period_ms, Some(200.0));
        assert_eq!(node.avg_period_ms, Some(150.0));
        assert!((node.listen_duty - 0.2).abs() < 1e-9);
        assert!((summary.avg_listen_duty - 0.2).abs() < 1e-9);
        assert_eq!(summary.avg_hops_per_message, 2.0);
    }

    #[test]
    fn test_extreme_latency_saturates() {
        let mut agg = TelemetryAggregator::default();
        for seqno in 1..=1000u32 {
            let text = format!("DATA source=1 seqno={seqno} hops=1 latency={}", u64::MAX);
            agg.ingest(&data_event(u64::from(seqno), 1, &text)).unwrap();
        }

        assert_eq!(agg.totals().latency_samples, 1000);
        assert!(agg.avg_latency().unwrap() > Duration::from_secs(1 << 40));
        assert!(agg.summary().avg_latency_ms.unwrap().is_finite());
    }

    #[test]
    fn test_extreme_power_counters() {
        let mut agg = TelemetryAggregator::default();
        let text = format!("POWER cpu={} lpm=1 listen={} transmit=1", u64::MAX, u64::MAX);
        agg.ingest(&data_event(0, 3, &text)).unwrap();

        let summary = agg.summary();
        let node = summary.node(NodeId::new(3)).unwrap();
        assert_eq!(node.power_samples, 1);
        assert!(node.listen_duty <= 1.0);
    }

    #[test]
    fn test_average_over_many_samples() {
        assert_eq!(mean(Duration::from_secs(10), 0), None);
        assert_eq!(
            mean(Duration::from_secs(1 << 33), 1 << 32),
            Some(Duration::from_secs(2))
        );
    }

    proptest! {
        #[test]
        fn prop_extreme_reports_never_panic(
            reports in proptest::collection::vec(
                (any::<u32>(), any::<u32>(), any::<u32>(), any::<u64>()),
                0..50,
            ),
            power in proptest::collection::vec(any::<[u64; 4]>(), 0..10),
        ) {
            let mut agg = TelemetryAggregator::default();
            for (i, (source, seqno, hops, latency)) in reports.into_iter().enumerate() {
                let text = format!("DATA source={source} seqno={seqno} hops={hops} latency={latency}");
                let _ = agg.ingest(&data_event(i as u64, 1, &text));
            }
            for [cpu, lpm, listen, transmit] in power {
                let text = format!("POWER cpu={cpu} lpm={lpm} listen={listen} transmit={transmit}");
                let _ = agg.ingest(&data_event(0, 2, &text));
            }

            let summary = agg.summary();
            prop_assert!(summary.avg_hops_per_message.is_finite());
            prop_assert!(summary.totals.lost + summary.totals.duplicates <= summary.totals.received);
        }
    }
}
