//! Report line parsing
//!
//! Nodes print telemetry as ordinary log lines: a marker word followed by
//! `key=value` fields, for example
//!
//! ```text
//! DATA source=3 seqno=17 hops=2 latency=41
//! POWER cpu=1200 lpm=98800 listen=900 transmit=120
//! ```
//!
//! Parsing is deliberately lenient about everything but the required fields.
//! A line that carries a marker but lacks a usable required field is reported
//! as [`ParsedLine::Malformed`]; the aggregator skips such lines rather than
//! failing the run.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use motelab_core::{Event, NodeId};

/// A classified data report
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DataReport {
    /// Node the data originated from
    pub source: NodeId,
    /// Source sequence number
    pub seqno: u32,
    /// Hops travelled to the sink
    pub hops: u32,
    /// End-to-end latency, when the sink measured it
    pub latency: Option<Duration>,
}

impl DataReport {
    pub fn new(source: NodeId, seqno: u32, hops: u32) -> Self {
        DataReport {
            source,
            seqno,
            hops,
            latency: None,
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }
}

/// Energest-style power counters (ticks spent per state since boot)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PowerReport {
    pub cpu: u64,
    pub lpm: u64,
    pub listen: u64,
    pub transmit: u64,
}

/// Result of looking at one line
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParsedLine {
    /// No report marker present
    NotReport,
    Data(DataReport),
    Power(PowerReport),
    /// Marker present, fields unusable
    Malformed(String),
}

/// Marker words the parser looks for
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportFormat {
    /// Word introducing a data report
    pub data_marker: String,
    /// Word introducing a power report
    pub power_marker: String,
}

impl Default for ReportFormat {
    fn default() -> Self {
        ReportFormat {
            data_marker: "DATA".to_string(),
            power_marker: "POWER".to_string(),
        }
    }
}

impl ReportFormat {
    /// Classify an event's text
    pub fn parse(&self, event: &Event) -> ParsedLine {
        if let Some(fields) = after_marker(&event.text, &self.data_marker) {
            return parse_data(event.node, fields);
        }
        if let Some(fields) = after_marker(&event.text, &self.power_marker) {
            return parse_power(fields);
        }
        ParsedLine::NotReport
    }
}

/// Text following the first whole-word occurrence of `marker`
fn after_marker<'a>(text: &'a str, marker: &str) -> Option<&'a str> {
    if marker.is_empty() {
        return None;
    }
    let mut offset = 0;
    while let Some(pos) = text[offset..].find(marker) {
        let start = offset + pos;
        let end = start + marker.len();
        let before_ok = text[..start]
            .chars()
            .next_back()
            .map_or(true, char::is_whitespace);
        let after_ok = text[end..].chars().next().map_or(true, char::is_whitespace);
        if before_ok && after_ok {
            return Some(&text[end..]);
        }
        offset = end;
    }
    None
}

fn field<'a>(fields: &'a str, key: &str) -> Option<&'a str> {
    fields
        .split_whitespace()
        .filter_map(|token| token.split_once('='))
        .find(|(k, _)| *k == key)
        .map(|(_, v)| v)
}

fn parse_data(emitter: NodeId, fields: &str) -> ParsedLine {
    let source = match field(fields, "source") {
        Some(raw) => match raw.parse::<u32>() {
            Ok(id) => NodeId::new(id),
            Err(_) => return ParsedLine::Malformed(format!("bad source {raw:?}")),
        },
        // Nodes reporting their own traffic leave the source implicit
        None => emitter,
    };

    let seqno = match field(fields, "seqno").map(str::parse::<u32>) {
        Some(Ok(seqno)) => seqno,
        Some(Err(_)) => return ParsedLine::Malformed("bad seqno".to_string()),
        None => return ParsedLine::Malformed("missing seqno".to_string()),
    };

    let hops = match field(fields, "hops").map(str::parse::<u32>) {
        Some(Ok(hops)) => hops,
        Some(Err(_)) => return ParsedLine::Malformed("bad hops".to_string()),
        None => return ParsedLine::Malformed("missing hops".to_string()),
    };

    let latency = match field(fields, "latency").map(str::parse::<u64>) {
        Some(Ok(ms)) => Some(Duration::from_millis(ms)),
        Some(Err(_)) => return ParsedLine::Malformed("bad latency".to_string()),
        None => None,
    };

    ParsedLine::Data(DataReport {
        source,
        seqno,
        hops,
        latency,
    })
}

fn parse_power(fields: &str) -> ParsedLine {
    let mut values = [0u64; 4];
    for (slot, key) in values.iter_mut().zip(["cpu", "lpm", "listen", "transmit"]) {
        match field(fields, key).map(str::parse::<u64>) {
            Some(Ok(v)) => *slot = v,
            Some(Err(_)) => return ParsedLine::Malformed(format!("bad {key}")),
            None => return ParsedLine::Malformed(format!("missing {key}")),
        }
    }
    let [cpu, lpm, listen, transmit] = values;
    ParsedLine::Power(PowerReport {
        cpu,
        lpm,
        listen,
        transmit,
    })
}
