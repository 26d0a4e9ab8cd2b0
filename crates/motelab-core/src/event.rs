//! Log events
//!
//! An event is one timestamped line printed by a simulated node. The text is
//! opaque to the core: scripts match on it with substring predicates, and the
//! telemetry crate pulls key/value fields out of report lines.

use serde::{Deserialize, Serialize};

use crate::{MotelabError, MotelabResult, NodeId, SimTime};

/// One timestamped log line from a node (or from the harness itself)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Arrival order within a run, assigned by the scheduler
    pub seq: u64,
    /// Simulator time the line was printed at
    pub time: SimTime,
    /// Emitting node
    pub node: NodeId,
    /// Raw line
    pub text: String,
}

impl Event {
    pub fn new(time: SimTime, node: NodeId, text: impl Into<String>) -> Self {
        Event {
            seq: 0,
            time,
            node,
            text: text.into(),
        }
    }

    /// Event generated by the harness rather than a node
    pub fn synthetic(time: SimTime, text: impl Into<String>) -> Self {
        Self::new(time, NodeId::HARNESS, text)
    }

    #[inline]
    pub fn with_seq(mut self, seq: u64) -> Self {
        self.seq = seq;
        self
    }

    #[inline]
    pub fn is_synthetic(&self) -> bool {
        self.node.is_harness()
    }

    /// Render as a replayable log line (`<ms> <node> <text>`)
    pub fn to_log_line(&self) -> String {
        format!("{}\t{}\t{}", self.time.as_millis(), self.node, self.text)
    }
}

impl std::fmt::Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}: {}", self.time, self.node, self.text)
    }
}

// ============================================================================
// LOG LINE FORMAT
// ============================================================================

/// Parse one exported log line into an event.
///
/// Accepted layout: `<time> <node> <text...>` separated by tabs or spaces.
/// `time` is either integer milliseconds or `MM:SS.mmm`; `node` is either a
/// bare integer or `ID:<n>`. The text keeps its inner whitespace.
pub fn parse_log_line(line: &str) -> MotelabResult<Event> {
    let line = line.trim_end_matches(['\r', '\n']);
    let (time_field, rest) = split_field(line)
        .ok_or_else(|| MotelabError::InvalidLogLine(format!("missing time field: {line:?}")))?;
    let (node_field, text) = split_field(rest)
        .ok_or_else(|| MotelabError::InvalidLogLine(format!("missing node field: {line:?}")))?;

    let time = parse_time(time_field)?;
    let node = parse_node(node_field)?;

    Ok(Event::new(time, node, text))
}

fn split_field(s: &str) -> Option<(&str, &str)> {
    let s = s.trim_start_matches([' ', '\t']);
    if s.is_empty() {
        return None;
    }
    match s.find([' ', '\t']) {
        Some(pos) => {
            let rest = &s[pos + 1..];
            // A single separator is consumed; tabs around the text are trimmed
            Some((&s[..pos], rest.trim_start_matches('\t')))
        }
        None => Some((s, "")),
    }
}

fn parse_time(field: &str) -> MotelabResult<SimTime> {
    if let Ok(ms) = field.parse::<u64>() {
        return Ok(SimTime::from_millis(ms));
    }

    // MM:SS.mmm
    let invalid = || MotelabError::InvalidLogLine(format!("invalid time field: {field:?}"));
    let (minutes, seconds) = field.split_once(':').ok_or_else(invalid)?;
    let minutes: u64 = minutes.parse().map_err(|_| invalid())?;
    let (secs, millis) = match seconds.split_once('.') {
        Some((s, ms)) => (s, ms),
        None => (seconds, "0"),
    };
    let secs: u64 = secs.parse().map_err(|_| invalid())?;
    if secs >= 60 || millis.is_empty() || millis.len() > 3 {
        return Err(invalid());
    }
    let millis: u64 = format!("{millis:0<3}").parse().map_err(|_| invalid())?;

    let total = minutes
        .checked_mul(60)
        .and_then(|s| s.checked_add(secs))
        .and_then(|s| s.checked_mul(1000))
        .and_then(|ms| ms.checked_add(millis))
        .ok_or_else(invalid)?;
    Ok(SimTime::from_millis(total))
}

fn parse_node(field: &str) -> MotelabResult<NodeId> {
    let digits = field.strip_prefix("ID:").unwrap_or(field);
    digits
        .parse::<u32>()
        .map(NodeId::new)
        .map_err(|_| MotelabError::InvalidLogLine(format!("invalid node field: {field:?}")))
}
