//! Test runs
//!
//! A [`TestRun`] owns everything one scenario needs: the scheduler, the
//! per-node state, the optional telemetry aggregator, the command sink and
//! the verdict. Scripts are step functions: they return a [`Step`] telling
//! the run what to wait for, and are resumed with the matching event.
//!
//! Events are fed one at a time (`push`/`feed`), idle time is signalled with
//! `advance_to`, and `finish` drains remaining timers once the source ends.

use std::time::Duration;

use tracing::{debug, info, trace, warn};

use motelab_core::{Event, NodeId, SimTime};
use motelab_telemetry::TelemetryAggregator;

use crate::command::{Command, CommandSink, NullSink};
use crate::error::{HarnessError, HarnessResult};
use crate::predicate::Predicate;
use crate::scheduler::{Due, Scheduler, TimeoutAction};
use crate::state::NodeStateStore;
use crate::verdict::{RunOutcome, Verdict, VerdictReporter};

/// Upper bound on timer releases in [`TestRun::finish`]
const MAX_DRAIN_RELEASES: usize = 100_000;

/// What a script wants next
#[derive(Clone, Debug)]
pub enum Step {
    /// Resume with the first event matching the predicate
    WaitUntil(Predicate),
    /// Resume with the next event, whatever it is
    Yield,
    /// Conclude `Passed`
    Pass,
    /// Conclude `Failed` with the reason
    Fail(String),
}

impl Step {
    pub fn fail(reason: impl Into<String>) -> Self {
        Step::Fail(reason.into())
    }
}

/// A test scenario, written as a step function
pub trait Script: Send {
    fn name(&self) -> &str {
        "run"
    }

    /// Called once when the run starts
    fn start(&mut self, cx: &mut RunContext<'_>) -> Step;

    /// Called with the event that satisfied the last `WaitUntil`/`Yield`
    fn resume(&mut self, event: &Event, cx: &mut RunContext<'_>) -> Step;
}

/// What a script can see and do while handling a step
pub struct RunContext<'a> {
    scheduler: &'a mut Scheduler,
    state: &'a mut NodeStateStore,
    telemetry: Option<&'a TelemetryAggregator>,
    commands: &'a mut dyn CommandSink,
    nodes: &'a [NodeId],
}

impl<'a> RunContext<'a> {
    /// Current event time
    pub fn now(&self) -> SimTime {
        self.scheduler.now()
    }

    pub fn start_time(&self) -> SimTime {
        self.scheduler.start_time()
    }

    pub fn state(&self) -> &NodeStateStore {
        &*self.state
    }

    pub fn state_mut(&mut self) -> &mut NodeStateStore {
        &mut *self.state
    }

    pub fn telemetry(&self) -> Option<&TelemetryAggregator> {
        self.telemetry
    }

    /// Nodes the run was configured with
    pub fn nodes(&self) -> &[NodeId] {
        self.nodes
    }

    /// Arm the run timeout at start + `duration`, replacing any earlier one
    pub fn arm_timeout(&mut self, duration: Duration, action: TimeoutAction) -> SimTime {
        let deadline = self.scheduler.arm_timeout(duration, action);
        info!(%deadline, "timeout armed");
        deadline
    }

    pub fn disarm_timeout(&mut self) {
        self.scheduler.disarm_timeout();
    }

    /// Inject a harness event `delay` from now
    pub fn generate_delayed_event(&mut self, delay: Duration, text: impl Into<String>) -> SimTime {
        self.scheduler.schedule_delayed(delay, text)
    }

    /// Send a command to a node (fire-and-forget)
    pub fn send(&mut self, node: NodeId, text: impl Into<String>) {
        let command = Command {
            at: self.scheduler.now(),
            node,
            text: text.into(),
        };
        debug!(node = %command.node, text = %command.text, "sending command");
        self.commands.send(command);
    }
}

// ============================================================================
// TEST RUN
// ============================================================================

/// One scenario execution
pub struct TestRun {
    name: String,
    script: Box<dyn Script>,
    scheduler: Scheduler,
    state: NodeStateStore,
    telemetry: Option<TelemetryAggregator>,
    commands: Box<dyn CommandSink>,
    nodes: Vec<NodeId>,
    initial_timeout: Option<(Duration, TimeoutAction)>,
    reporter: VerdictReporter,
    started: bool,
    /// Last node event, reported when the run times out
    last_event: Option<Event>,
    events_processed: u64,
}

impl TestRun {
    pub fn new(script: impl Script + 'static) -> Self {
        TestRun {
            name: script.name().to_string(),
            script: Box::new(script),
            scheduler: Scheduler::new(),
            state: NodeStateStore::new(),
            telemetry: None,
            commands: Box::new(NullSink),
            nodes: Vec::new(),
            initial_timeout: None,
            reporter: VerdictReporter::new(),
            started: false,
            last_event: None,
            events_processed: 0,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Known node set (rendezvous targets, telemetry node count)
    pub fn with_nodes(mut self, nodes: Vec<NodeId>) -> Self {
        if let Some(telemetry) = self.telemetry.take() {
            self.telemetry = Some(telemetry.with_node_count(nodes.len()));
        }
        self.nodes = nodes;
        self
    }

    pub fn with_telemetry(mut self, telemetry: TelemetryAggregator) -> Self {
        self.telemetry = Some(if self.nodes.is_empty() {
            telemetry
        } else {
            telemetry.with_node_count(self.nodes.len())
        });
        self
    }

    pub fn with_commands(mut self, sink: impl CommandSink + 'static) -> Self {
        self.commands = Box::new(sink);
        self
    }

    /// Timeout armed when the run starts
    pub fn with_timeout(mut self, duration: Duration, action: TimeoutAction) -> Self {
        self.initial_timeout = Some((duration, action));
        self
    }

    // ------------------------------------------------------------------
    // Driving
    // ------------------------------------------------------------------

    /// Start at event time zero
    pub fn start(&mut self) -> HarnessResult<()> {
        self.start_at(SimTime::ZERO)
    }

    /// Start the script. Events pushed earlier stay buffered and are
    /// matched against the script's first wait.
    pub fn start_at(&mut self, at: SimTime) -> HarnessResult<()> {
        if self.started {
            return Err(HarnessError::AlreadyStarted);
        }
        self.started = true;
        self.scheduler.start(at);
        info!(run = %self.name, %at, nodes = self.nodes.len(), "run started");

        if let Some((duration, action)) = self.initial_timeout.take() {
            let deadline = self.scheduler.arm_timeout(duration, action);
            info!(%deadline, "timeout armed");
        }

        let step = self.step_script(None);
        self.apply(step);
        let horizon = self.scheduler.watermark().max(at);
        self.pump(horizon);
        Ok(())
    }

    /// Feed one node event
    pub fn push(&mut self, time: SimTime, node: NodeId, text: impl Into<String>) -> HarnessResult<()> {
        if self.reporter.is_terminal() {
            trace!(%time, %node, "run concluded, event discarded");
            return Ok(());
        }
        self.scheduler.push(time, node, text)?;
        if self.started {
            self.pump(time);
        }
        Ok(())
    }

    /// Feed a parsed event (its `seq` is reassigned)
    pub fn feed(&mut self, event: Event) -> HarnessResult<()> {
        self.push(event.time, event.node, event.text)
    }

    /// Signal that event time reached `time` with no node event
    pub fn advance_to(&mut self, time: SimTime) -> HarnessResult<()> {
        if !self.started {
            return Err(HarnessError::NotStarted);
        }
        if self.reporter.is_terminal() {
            return Ok(());
        }
        self.scheduler.advance_watermark(time);
        self.pump(self.scheduler.watermark());
        Ok(())
    }

    /// End of the event source: release pending timers in order, then
    /// report. A run still pending afterwards is `Incomplete`.
    pub fn finish(&mut self) -> HarnessResult<Verdict> {
        if !self.started {
            return Err(HarnessError::NotStarted);
        }
        let mut releases = 0;
        while !self.reporter.is_terminal() {
            let Some(wakeup) = self.scheduler.next_wakeup() else {
                break;
            };
            if releases >= MAX_DRAIN_RELEASES {
                warn!(releases, "timer drain limit reached, leaving run pending");
                break;
            }
            releases += 1;
            self.advance_to(wakeup)?;
        }
        Ok(self.verdict())
    }

    // ------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn outcome(&self) -> &RunOutcome {
        self.reporter.outcome()
    }

    pub fn is_terminal(&self) -> bool {
        self.reporter.is_terminal()
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn state(&self) -> &NodeStateStore {
        &self.state
    }

    pub fn telemetry(&self) -> Option<&TelemetryAggregator> {
        self.telemetry.as_ref()
    }

    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    pub fn now(&self) -> SimTime {
        self.scheduler.now()
    }

    pub fn timeout_deadline(&self) -> Option<SimTime> {
        self.scheduler.timeout_deadline()
    }

    /// Earliest timer the host must wake the run for
    pub fn next_wakeup(&self) -> Option<SimTime> {
        if self.reporter.is_terminal() {
            return None;
        }
        self.scheduler.next_wakeup()
    }

    pub fn last_event(&self) -> Option<&Event> {
        self.last_event.as_ref()
    }

    pub fn events_processed(&self) -> u64 {
        self.events_processed
    }

    /// Snapshot of the result so far
    pub fn verdict(&self) -> Verdict {
        let outcome = self.reporter.outcome().clone();
        Verdict {
            name: self.name.clone(),
            status: outcome.status(),
            diagnostic: outcome.diagnostic(),
            outcome,
            ended_at: self
                .reporter
                .concluded_at()
                .unwrap_or_else(|| self.scheduler.now()),
            events_processed: self.events_processed,
            telemetry: self.telemetry.as_ref().map(TelemetryAggregator::summary),
        }
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn pump(&mut self, horizon: SimTime) {
        while !self.reporter.is_terminal() {
            let Some(due) = self.scheduler.pop_due(horizon) else {
                break;
            };
            match due {
                Due::Timeout(action) => self.on_timeout(action),
                Due::Event(event) => self.deliver(event),
            }
        }
        if !self.reporter.is_terminal() {
            self.scheduler.advance_clock(horizon);
        }
    }

    fn deliver(&mut self, event: Event) {
        self.events_processed += 1;
        if !event.is_synthetic() {
            self.last_event = Some(event.clone());
        }

        // Telemetry sees every event before the script does
        if let Some(telemetry) = self.telemetry.as_mut() {
            if let Err(err) = telemetry.ingest(&event) {
                self.conclude(RunOutcome::failed(err.to_string()));
                return;
            }
        }

        let matched = self
            .scheduler
            .waiting()
            .map_or(false, |p| p.matches(&event, &self.state));
        if !matched {
            trace!(seq = event.seq, node = %event.node, "event consumed without match");
            return;
        }

        self.scheduler.take_wait();
        let step = self.step_script(Some(&event));
        self.apply(step);
    }

    fn step_script(&mut self, event: Option<&Event>) -> Step {
        let TestRun {
            script,
            scheduler,
            state,
            telemetry,
            commands,
            nodes,
            ..
        } = self;
        let mut cx = RunContext {
            scheduler,
            state,
            telemetry: telemetry.as_ref(),
            commands: commands.as_mut(),
            nodes: nodes.as_slice(),
        };
        match event {
            Some(event) => script.resume(event, &mut cx),
            None => script.start(&mut cx),
        }
    }

    fn apply(&mut self, step: Step) {
        match step {
            Step::WaitUntil(predicate) => self.scheduler.wait(predicate),
            Step::Yield => self.scheduler.wait(Predicate::always()),
            Step::Pass => self.conclude(RunOutcome::Passed),
            Step::Fail(reason) => self.conclude(RunOutcome::Failed { reason }),
        }
    }

    fn on_timeout(&mut self, action: TimeoutAction) {
        info!(at = %self.scheduler.now(), ?action, "timeout fired");
        let outcome = match action {
            TimeoutAction::TimedOut => RunOutcome::timed_out(self.last_event.as_ref()),
            TimeoutAction::Fail(reason) => RunOutcome::Failed { reason },
        };
        self.conclude(outcome);
    }

    fn conclude(&mut self, outcome: RunOutcome) {
        if self.reporter.conclude(outcome, self.scheduler.now()) {
            self.scheduler.clear();
        }
    }
}

impl std::fmt::Debug for TestRun {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestRun")
            .field("name", &self.name)
            .field("outcome", self.reporter.outcome())
            .field("now", &self.scheduler.now())
            .field("events_processed", &self.events_processed)
            .finish()
    }
}

// ============================================================================
// CLOSURE SCRIPTS
// ============================================================================

/// Script built from a single handler closure.
///
/// The handler gets `None` on start and `Some(event)` on every resume.
pub struct HandlerScript<F> {
    name: String,
    handler: F,
}

impl<F> HandlerScript<F>
where
    F: FnMut(Option<&Event>, &mut RunContext<'_>) -> Step + Send,
{
    pub fn new(name: impl Into<String>, handler: F) -> Self {
        HandlerScript {
            name: name.into(),
            handler,
        }
    }
}

impl<F> Script for HandlerScript<F>
where
    F: FnMut(Option<&Event>, &mut RunContext<'_>) -> Step + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&mut self, cx: &mut RunContext<'_>) -> Step {
        (self.handler)(None, cx)
    }

    fn resume(&mut self, event: &Event, cx: &mut RunContext<'_>) -> Step {
        (self.handler)(Some(event), cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::RecordingSink;
    use crate::state::Rendezvous;
    use crate::verdict::VerdictStatus;
    use motelab_telemetry::TelemetryConfig;
    use parking_lot::Mutex;
    use proptest::prelude::*;
    use std::sync::Arc;

    fn ms(v: u64) -> SimTime {
        SimTime::from_millis(v)
    }

    fn node(id: u32) -> NodeId {
        NodeId::new(id)
    }

    /// Script that waits for `predicate` forever and records what it saw
    fn collector(predicate: Predicate, seen: Arc<Mutex<Vec<Event>>>) -> impl Script {
        HandlerScript::new("collector", move |event, _cx| {
            if let Some(event) = event {
                seen.lock().push(event.clone());
            }
            Step::WaitUntil(predicate.clone())
        })
    }

    #[test]
    fn test_wait_until_returns_earliest_buffered_match() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut run = TestRun::new(collector(Predicate::contains("B"), seen.clone()));

        run.push(ms(1), node(1), "x").unwrap();
        run.push(ms(2), node(1), "B1").unwrap();
        run.push(ms(3), node(2), "y").unwrap();
        run.push(ms(4), node(2), "B2").unwrap();
        assert!(seen.lock().is_empty());

        run.start().unwrap();
        let texts: Vec<String> = seen.lock().iter().map(|e| e.text.clone()).collect();
        assert_eq!(texts, vec!["B1", "B2"]);
    }

    #[test]
    fn test_non_matching_events_are_consumed() {
        let mut stage = 0;
        let script = HandlerScript::new("two-waits", move |event, _cx| {
            stage += 1;
            match (stage, event) {
                (1, None) => Step::WaitUntil(Predicate::equals("A")),
                (2, Some(_)) => Step::WaitUntil(Predicate::starts_with("B")),
                (3, Some(e)) if e.text == "B2" => Step::Pass,
                _ => Step::fail("unexpected event"),
            }
        });
        let mut run = TestRun::new(script);
        run.start().unwrap();

        // B1 arrives before A and is dropped, not kept for the second wait
        run.push(ms(1), node(1), "B1").unwrap();
        run.push(ms(2), node(1), "A").unwrap();
        run.push(ms(3), node(1), "B2").unwrap();
        assert_eq!(run.outcome(), &RunOutcome::Passed);
    }

    #[test]
    fn test_timeout_fires_once_with_last_event() {
        let mut run = TestRun::new(HandlerScript::new("never", |_, _| {
            Step::WaitUntil(Predicate::never())
        }))
        .with_timeout(Duration::from_millis(50), TimeoutAction::TimedOut);
        run.start().unwrap();
        assert_eq!(run.timeout_deadline(), Some(ms(50)));

        run.push(ms(10), node(1), "Booting").unwrap();
        run.push(ms(20), node(2), "Waiting for parent").unwrap();
        assert!(run.outcome().is_pending());

        run.push(ms(60), node(1), "late").unwrap();
        match run.outcome() {
            RunOutcome::TimedOut {
                last_message: Some(last),
            } => assert!(last.contains("Waiting for parent")),
            other => panic!("unexpected {other:?}"),
        }

        // Later input is discarded and cannot change the outcome
        run.push(ms(70), node(1), "more").unwrap();
        let verdict = run.finish().unwrap();
        assert_eq!(verdict.status, VerdictStatus::Timeout);
        assert_eq!(verdict.ended_at, ms(50));
        assert_eq!(verdict.events_processed, 2);
    }

    #[test]
    fn test_timeout_with_fail_action() {
        let mut run = TestRun::new(HandlerScript::new("never", |_, _| Step::Yield))
            .with_timeout(Duration::from_secs(1), TimeoutAction::Fail("too slow".into()));
        run.start_at(ms(500)).unwrap();
        assert_eq!(run.timeout_deadline(), Some(ms(1500)));

        run.advance_to(ms(1500)).unwrap();
        assert_eq!(run.outcome(), &RunOutcome::failed("too slow"));
    }

    #[test]
    fn test_delayed_event_resumes_script() {
        let script = HandlerScript::new("delay", |event, cx| match event {
            None => {
                cx.generate_delayed_event(Duration::from_millis(100), "tick");
                Step::WaitUntil(Predicate::synthetic())
            }
            Some(e) if e.text == "tick" => Step::Pass,
            Some(_) => Step::fail("wrong event"),
        });
        let mut run = TestRun::new(script);
        run.start().unwrap();

        run.push(ms(50), node(1), "noise").unwrap();
        assert!(run.outcome().is_pending());
        assert_eq!(run.next_wakeup(), Some(ms(100)));

        run.advance_to(ms(100)).unwrap();
        assert_eq!(run.outcome(), &RunOutcome::Passed);
        assert_eq!(run.verdict().ended_at, ms(100));
    }

    #[test]
    fn test_rendezvous_two_nodes_floor_five() {
        let nodes = NodeId::range(2);
        let rendezvous = Rendezvous::new(nodes.clone(), "recv", 5);
        let script = HandlerScript::new("rendezvous", move |event, cx| {
            if let Some(event) = event {
                cx.state_mut().increment(event.node, "recv");
                if rendezvous.is_ready(cx.state()) {
                    return Step::Pass;
                }
            }
            Step::WaitUntil(Predicate::contains("DATA"))
        });
        let mut run = TestRun::new(script).with_nodes(nodes);
        run.start().unwrap();

        let mut t = 0;
        let mut report = |run: &mut TestRun, id: u32| {
            t += 1;
            run.push(ms(t), node(id), format!("DATA seqno={t} hops=1")).unwrap();
        };
        for _ in 0..4 {
            report(&mut run, 1);
        }
        for _ in 0..5 {
            report(&mut run, 2);
        }
        assert!(run.outcome().is_pending());

        report(&mut run, 1);
        assert_eq!(run.outcome(), &RunOutcome::Passed);
        assert_eq!(run.state().int(node(1), "recv"), Some(5));
    }

    #[test]
    fn test_ceiling_breach_fails_run() {
        let telemetry = TelemetryAggregator::new(TelemetryConfig::default().with_ceiling(2));
        let mut run = TestRun::new(HandlerScript::new("count", |_, _| Step::Yield))
            .with_telemetry(telemetry);
        run.start().unwrap();

        for seqno in 1u32..=3 {
            run.push(ms(u64::from(seqno)), node(4), format!("DATA seqno={seqno} hops=1"))
                .unwrap();
        }
        match run.outcome() {
            RunOutcome::Failed { reason } => {
                assert!(reason.contains('4'));
                assert!(reason.contains('3'));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_finish_without_timeout_is_incomplete() {
        let mut run = TestRun::new(HandlerScript::new("idle", |_, _| Step::Yield));
        run.start().unwrap();
        run.push(ms(5), node(1), "hello").unwrap();

        let verdict = run.finish().unwrap();
        assert_eq!(verdict.status, VerdictStatus::Incomplete);
    }

    #[test]
    fn test_finish_fires_pending_timeout() {
        let mut run = TestRun::new(HandlerScript::new("idle", |_, _| Step::Yield))
            .with_timeout(Duration::from_secs(30), TimeoutAction::TimedOut);
        run.start().unwrap();

        let verdict = run.finish().unwrap();
        assert_eq!(verdict.status, VerdictStatus::Timeout);
        assert_eq!(verdict.ended_at, SimTime::from_millis(30_000));
    }

    #[test]
    fn test_start_twice_rejected() {
        let mut run = TestRun::new(HandlerScript::new("idle", |_, _| Step::Yield));
        run.start().unwrap();
        assert!(matches!(run.start(), Err(HarnessError::AlreadyStarted)));
    }

    #[test]
    fn test_out_of_order_push_rejected() {
        let mut run = TestRun::new(HandlerScript::new("idle", |_, _| Step::Yield));
        run.start().unwrap();
        run.push(ms(10), node(1), "a").unwrap();
        assert!(matches!(
            run.push(ms(5), node(1), "b"),
            Err(HarnessError::Core(_))
        ));
    }

    #[test]
    fn test_commands_reach_sink() {
        let sink = RecordingSink::new();
        let script = HandlerScript::new("cmd", |event, cx| {
            if let Some(event) = event {
                cx.send(event.node, "reboot");
                return Step::Pass;
            }
            Step::WaitUntil(Predicate::contains("Booted"))
        });
        let mut run = TestRun::new(script).with_commands(sink.clone());
        run.start().unwrap();
        run.push(ms(7), node(3), "Booted").unwrap();

        let commands = sink.commands();
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].node, node(3));
        assert_eq!(commands[0].at, ms(7));
    }

    #[test]
    fn test_pass_then_fail_keeps_pass() {
        let mut run = TestRun::new(HandlerScript::new("pass", |event, _| match event {
            None => Step::Yield,
            Some(_) => Step::Pass,
        }))
        .with_timeout(Duration::from_millis(10), TimeoutAction::TimedOut);
        run.start().unwrap();
        run.push(ms(1), node(1), "x").unwrap();
        run.advance_to(ms(100)).unwrap();

        assert_eq!(run.outcome(), &RunOutcome::Passed);
        assert_eq!(run.next_wakeup(), None);
    }

    proptest! {
        #[test]
        fn prop_wait_until_only_sees_matches(texts in prop::collection::vec("[abx]{1,4}", 0..40)) {
            let seen = Arc::new(Mutex::new(Vec::new()));
            let mut run = TestRun::new(collector(Predicate::contains("x"), seen.clone()));
            run.start().unwrap();
            for (i, text) in texts.iter().enumerate() {
                run.push(ms(i as u64), node(1), text.clone()).unwrap();
            }

            let got: Vec<String> = seen.lock().iter().map(|e| e.text.clone()).collect();
            let expected: Vec<String> = texts.into_iter().filter(|t| t.contains('x')).collect();
            prop_assert_eq!(got, expected);
        }
    }
}
