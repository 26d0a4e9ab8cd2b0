//! Ready-made scripts
//!
//! - [`StepScript`]: an ordered list of declarative steps, what run configs
//!   compile to
//! - [`RendezvousScript`]: count matching events per node until every node
//!   reaches a floor

use std::time::Duration;

use tracing::debug;

use motelab_core::{Event, NodeId};

use crate::predicate::Predicate;
use crate::run::{RunContext, Script, Step};
use crate::state::Rendezvous;

/// Text prefix of the synthetic events that end a pause
pub const PAUSE_MARKER: &str = "motelab:pause";

/// One declarative step
#[derive(Clone, Debug)]
pub enum ScriptStep {
    /// Block until an event matches
    Wait(Predicate),
    /// Send a command and continue
    Send { node: NodeId, text: String },
    /// Let event time pass
    Pause(Duration),
    /// Count events matching `on` per node under `key` until every run node
    /// reaches `floor`
    Rendezvous { on: Predicate, key: String, floor: i64 },
    /// Block until telemetry has at least `floor` reports from every run node
    ReportQuota { floor: u64 },
    Pass,
    Fail(String),
}

/// Runs [`ScriptStep`]s in order
#[derive(Clone, Debug)]
pub struct StepScript {
    name: String,
    steps: Vec<ScriptStep>,
    cursor: usize,
}

impl StepScript {
    pub fn new(name: impl Into<String>, steps: Vec<ScriptStep>) -> Self {
        StepScript {
            name: name.into(),
            steps,
            cursor: 0,
        }
    }

    pub fn steps(&self) -> &[ScriptStep] {
        &self.steps
    }

    /// Index of the step currently executing
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Execute non-blocking steps until one blocks or concludes
    fn run_from(&mut self, cx: &mut RunContext<'_>) -> Step {
        loop {
            let Some(step) = self.steps.get(self.cursor) else {
                return Step::fail(format!(
                    "script {:?} ran out of steps without a verdict",
                    self.name
                ));
            };
            debug!(script = %self.name, index = self.cursor, ?step, "step");
            match step {
                ScriptStep::Wait(predicate) => return Step::WaitUntil(predicate.clone()),
                ScriptStep::Send { node, text } => {
                    cx.send(*node, text.clone());
                    self.cursor += 1;
                }
                ScriptStep::Pause(duration) => {
                    let marker = format!("{PAUSE_MARKER} {}", self.cursor);
                    cx.generate_delayed_event(*duration, marker.clone());
                    return Step::WaitUntil(Predicate::synthetic().and(Predicate::equals(marker)));
                }
                ScriptStep::Rendezvous { on, key, floor } => {
                    if cx.state().all_at_least(cx.nodes(), key, *floor) {
                        self.cursor += 1;
                        continue;
                    }
                    return Step::WaitUntil(on.clone().and(Predicate::synthetic().negate()));
                }
                ScriptStep::ReportQuota { floor } => {
                    let Some(telemetry) = cx.telemetry() else {
                        return Step::fail("report quota needs telemetry enabled");
                    };
                    let nodes = cx.nodes();
                    let met = !nodes.is_empty()
                        && nodes.iter().all(|&node| telemetry.received(node) >= *floor);
                    if met {
                        self.cursor += 1;
                        continue;
                    }
                    return Step::Yield;
                }
                ScriptStep::Pass => return Step::Pass,
                ScriptStep::Fail(reason) => return Step::Fail(reason.clone()),
            }
        }
    }
}

impl Script for StepScript {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&mut self, cx: &mut RunContext<'_>) -> Step {
        self.cursor = 0;
        self.run_from(cx)
    }

    fn resume(&mut self, event: &Event, cx: &mut RunContext<'_>) -> Step {
        match self.steps.get(self.cursor) {
            Some(ScriptStep::Wait(_)) | Some(ScriptStep::Pause(_)) => self.cursor += 1,
            Some(ScriptStep::Rendezvous { key, .. }) => {
                cx.state_mut().increment(event.node, key);
            }
            // Quota is re-checked against the updated telemetry
            _ => {}
        }
        self.run_from(cx)
    }
}

// ============================================================================
// RENDEZVOUS SCRIPT
// ============================================================================

/// Passes once every node has produced `floor` events matching `on`
#[derive(Clone, Debug)]
pub struct RendezvousScript {
    on: Predicate,
    rendezvous: Rendezvous,
}

impl RendezvousScript {
    /// Counter key used in the state store
    pub const KEY: &'static str = "rendezvous";

    pub fn new(nodes: Vec<NodeId>, on: Predicate, floor: i64) -> Self {
        RendezvousScript {
            on: on.and(Predicate::synthetic().negate()),
            rendezvous: Rendezvous::new(nodes, Self::KEY, floor),
        }
    }

    pub fn rendezvous(&self) -> &Rendezvous {
        &self.rendezvous
    }

    fn check(&self, cx: &RunContext<'_>) -> Step {
        if self.rendezvous.is_ready(cx.state()) {
            Step::Pass
        } else {
            Step::WaitUntil(self.on.clone())
        }
    }
}

impl Script for RendezvousScript {
    fn name(&self) -> &str {
        "rendezvous"
    }

    fn start(&mut self, cx: &mut RunContext<'_>) -> Step {
        self.check(cx)
    }

    fn resume(&mut self, event: &Event, cx: &mut RunContext<'_>) -> Step {
        let count = cx.state_mut().increment(event.node, &self.rendezvous.key);
        debug!(node = %event.node, count, "rendezvous progress");
        self.check(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::RecordingSink;
    use crate::run::TestRun;
    use crate::scheduler::TimeoutAction;
    use crate::verdict::RunOutcome;
    use motelab_core::SimTime;
    use motelab_telemetry::{TelemetryAggregator, TelemetryConfig};

    fn ms(v: u64) -> SimTime {
        SimTime::from_millis(v)
    }

    fn node(id: u32) -> NodeId {
        NodeId::new(id)
    }

    #[test]
    fn test_steps_in_order() {
        let sink = RecordingSink::new();
        let script = StepScript::new(
            "boot",
            vec![
                ScriptStep::Wait(Predicate::contains("Booted")),
                ScriptStep::Send {
                    node: node(1),
                    text: "start".to_string(),
                },
                ScriptStep::Pause(Duration::from_millis(100)),
                ScriptStep::Wait(Predicate::contains("done")),
                ScriptStep::Pass,
            ],
        );
        let mut run = TestRun::new(script).with_commands(sink.clone());
        run.start().unwrap();

        run.push(ms(10), node(1), "Booted").unwrap();
        assert_eq!(sink.len(), 1);

        // "done" during the pause is consumed by the pause wait
        run.push(ms(50), node(1), "done").unwrap();
        run.push(ms(120), node(1), "done").unwrap();
        assert_eq!(run.outcome(), &RunOutcome::Passed);
    }

    #[test]
    fn test_running_out_of_steps_fails() {
        let mut run = TestRun::new(StepScript::new(
            "short",
            vec![ScriptStep::Wait(Predicate::always())],
        ));
        run.start().unwrap();
        run.push(ms(1), node(1), "x").unwrap();

        match run.outcome() {
            RunOutcome::Failed { reason } => assert!(reason.contains("ran out of steps")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_fail_step() {
        let mut run = TestRun::new(StepScript::new(
            "fail",
            vec![ScriptStep::Fail("route never formed".to_string())],
        ));
        run.start().unwrap();
        assert_eq!(run.outcome(), &RunOutcome::failed("route never formed"));
    }

    #[test]
    fn test_rendezvous_step() {
        let script = StepScript::new(
            "sync",
            vec![
                ScriptStep::Rendezvous {
                    on: Predicate::contains("ready"),
                    key: "ready".to_string(),
                    floor: 2,
                },
                ScriptStep::Pass,
            ],
        );
        let mut run = TestRun::new(script).with_nodes(NodeId::range(2));
        run.start().unwrap();

        run.push(ms(1), node(1), "ready").unwrap();
        run.push(ms(2), node(1), "ready").unwrap();
        run.push(ms(3), node(2), "ready").unwrap();
        assert!(run.outcome().is_pending());
        run.push(ms(4), node(2), "ready").unwrap();
        assert_eq!(run.outcome(), &RunOutcome::Passed);
    }

    #[test]
    fn test_report_quota_step() {
        let script = StepScript::new(
            "quota",
            vec![ScriptStep::ReportQuota { floor: 2 }, ScriptStep::Pass],
        );
        let mut run = TestRun::new(script)
            .with_nodes(NodeId::range(2))
            .with_telemetry(TelemetryAggregator::new(TelemetryConfig::default()));
        run.start().unwrap();

        run.push(ms(1), node(1), "DATA seqno=1 hops=1").unwrap();
        run.push(ms(2), node(1), "DATA seqno=2 hops=1").unwrap();
        run.push(ms(3), node(2), "DATA seqno=1 hops=2").unwrap();
        assert!(run.outcome().is_pending());
        run.push(ms(4), node(2), "DATA seqno=2 hops=2").unwrap();
        assert_eq!(run.outcome(), &RunOutcome::Passed);
    }

    #[test]
    fn test_report_quota_without_telemetry_fails() {
        let mut run = TestRun::new(StepScript::new(
            "quota",
            vec![ScriptStep::ReportQuota { floor: 1 }],
        ))
        .with_nodes(NodeId::range(1));
        run.start().unwrap();
        assert!(matches!(run.outcome(), RunOutcome::Failed { .. }));
    }

    #[test]
    fn test_rendezvous_script_times_out_when_a_node_lags() {
        let mut run = TestRun::new(RendezvousScript::new(
            NodeId::range(3),
            Predicate::contains("DATA"),
            1,
        ))
        .with_timeout(Duration::from_secs(1), TimeoutAction::TimedOut);
        run.start().unwrap();

        run.push(ms(10), node(1), "DATA seqno=1 hops=1").unwrap();
        run.push(ms(20), node(2), "DATA seqno=1 hops=1").unwrap();
        let verdict = run.finish().unwrap();

        assert!(matches!(verdict.outcome, RunOutcome::TimedOut { .. }));
        assert_eq!(run.state().int(node(3), RendezvousScript::KEY), None);
    }

    #[test]
    fn test_rendezvous_script_passes() {
        let mut run = TestRun::new(RendezvousScript::new(
            NodeId::range(2),
            Predicate::contains("hello"),
            1,
        ));
        run.start().unwrap();
        run.push(ms(1), node(2), "hello").unwrap();
        run.push(ms(2), node(1), "hello").unwrap();
        assert_eq!(run.outcome(), &RunOutcome::Passed);
    }
}
