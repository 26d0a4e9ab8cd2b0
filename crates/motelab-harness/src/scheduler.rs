//! Predicate scheduler
//!
//! Holds everything that decides *which* event a script sees next: the FIFO
//! of node events that arrived but were not processed yet, the timer heap of
//! harness-generated (delayed) events, the single run timeout and the active
//! wait condition.
//!
//! Ordering rules, all in event time:
//! - node events are released strictly in arrival order;
//! - a delayed event due at or before the next node event is released first;
//! - the timeout fires before any event (node or delayed) stamped at or after
//!   its deadline.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};
use std::time::Duration;

use tracing::{debug, trace};

use motelab_core::{Event, MotelabError, MotelabResult, NodeId, SimTime};

use crate::predicate::Predicate;

/// What happens when the run timeout fires
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TimeoutAction {
    /// Conclude `TimedOut` with the last observed event
    TimedOut,
    /// Conclude `Failed` with this reason
    Fail(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct ArmedTimeout {
    deadline: SimTime,
    action: TimeoutAction,
}

/// A harness-generated event waiting for its due time
#[derive(Clone, Debug, PartialEq, Eq)]
struct DelayedEvent {
    due: SimTime,
    order: u64,
    text: String,
}

/// Reversed so `BinaryHeap` pops the earliest `(due, order)` first
impl Ord for DelayedEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.order.cmp(&self.order))
    }
}

impl PartialOrd for DelayedEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Next thing the run has to handle
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Due {
    Event(Event),
    Timeout(TimeoutAction),
}

/// Event queue, timers and wait condition for one run
#[derive(Debug, Default)]
pub struct Scheduler {
    /// Node events not yet processed, in arrival order
    queue: VecDeque<Event>,
    /// Delayed harness events (min-heap via reversed `Ord`)
    timers: BinaryHeap<DelayedEvent>,
    timeout: Option<ArmedTimeout>,
    waiting: Option<Predicate>,
    start: SimTime,
    now: SimTime,
    /// Latest time accepted from the event source
    watermark: SimTime,
    next_seq: u64,
    next_timer: u64,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fix the run start; timeouts are measured from here
    pub fn start(&mut self, at: SimTime) {
        self.start = at;
        self.now = self.now.max(at);
        self.watermark = self.watermark.max(at);
    }

    pub fn start_time(&self) -> SimTime {
        self.start
    }

    /// Time of the last released event or clock advance
    pub fn now(&self) -> SimTime {
        self.now
    }

    pub fn watermark(&self) -> SimTime {
        self.watermark
    }

    // ------------------------------------------------------------------
    // Event intake
    // ------------------------------------------------------------------

    /// Queue a node event. Times must not go backwards.
    pub fn push(&mut self, time: SimTime, node: NodeId, text: impl Into<String>) -> MotelabResult<u64> {
        if time < self.watermark {
            return Err(MotelabError::OutOfOrder {
                previous: self.watermark,
                got: time,
            });
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.watermark = time;
        self.queue.push_back(Event::new(time, node, text).with_seq(seq));
        Ok(seq)
    }

    /// Let event time pass without a node event (idle source, wall-clock tick)
    pub fn advance_watermark(&mut self, to: SimTime) {
        self.watermark = self.watermark.max(to);
    }

    /// Move the clock forward after everything up to `to` was released
    pub fn advance_clock(&mut self, to: SimTime) {
        if self.queue.is_empty() {
            self.now = self.now.max(to);
        }
    }

    pub fn pending_events(&self) -> usize {
        self.queue.len()
    }

    pub fn pending_timers(&self) -> usize {
        self.timers.len()
    }

    // ------------------------------------------------------------------
    // Timers
    // ------------------------------------------------------------------

    /// Arm (or re-arm) the run timeout at `start + duration`
    pub fn arm_timeout(&mut self, duration: Duration, action: TimeoutAction) -> SimTime {
        let deadline = self.start + duration;
        if let Some(previous) = &self.timeout {
            debug!(previous = %previous.deadline, %deadline, "re-arming timeout");
        }
        self.timeout = Some(ArmedTimeout { deadline, action });
        deadline
    }

    pub fn disarm_timeout(&mut self) {
        self.timeout = None;
    }

    pub fn timeout_deadline(&self) -> Option<SimTime> {
        self.timeout.as_ref().map(|t| t.deadline)
    }

    /// Schedule a harness event `delay` after the current time
    pub fn schedule_delayed(&mut self, delay: Duration, text: impl Into<String>) -> SimTime {
        let due = self.now + delay;
        let order = self.next_timer;
        self.next_timer += 1;
        self.timers.push(DelayedEvent {
            due,
            order,
            text: text.into(),
        });
        due
    }

    /// Earliest pending timer (timeout or delayed event)
    pub fn next_wakeup(&self) -> Option<SimTime> {
        let delayed = self.timers.peek().map(|t| t.due);
        match (self.timeout_deadline(), delayed) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    // ------------------------------------------------------------------
    // Wait condition
    // ------------------------------------------------------------------

    pub fn wait(&mut self, predicate: Predicate) {
        trace!(?predicate, "waiting");
        self.waiting = Some(predicate);
    }

    pub fn waiting(&self) -> Option<&Predicate> {
        self.waiting.as_ref()
    }

    pub fn take_wait(&mut self) -> Option<Predicate> {
        self.waiting.take()
    }

    // ------------------------------------------------------------------
    // Release
    // ------------------------------------------------------------------

    /// Release the next due item.
    ///
    /// With node events queued, timers due up to the front event's time are
    /// released first. With the queue empty, timers due up to `horizon` are.
    pub fn pop_due(&mut self, horizon: SimTime) -> Option<Due> {
        let bound = self.queue.front().map_or(horizon, |e| e.time);
        let next_delayed = self.timers.peek().map(|t| t.due);

        if let Some(deadline) = self.timeout_deadline() {
            if deadline <= bound && next_delayed.map_or(true, |due| deadline <= due) {
                let timeout = self.timeout.take()?;
                self.now = self.now.max(deadline);
                return Some(Due::Timeout(timeout.action));
            }
        }

        if next_delayed.map_or(false, |due| due <= bound) {
            let delayed = self.timers.pop()?;
            self.now = self.now.max(delayed.due);
            let seq = self.next_seq;
            self.next_seq += 1;
            return Some(Due::Event(
                Event::synthetic(delayed.due, delayed.text).with_seq(seq),
            ));
        }

        let event = self.queue.pop_front()?;
        self.now = self.now.max(event.time);
        Some(Due::Event(event))
    }

    /// Drop every pending event, timer and wait condition
    pub fn clear(&mut self) {
        let dropped = self.queue.len() + self.timers.len();
        if dropped > 0 {
            debug!(dropped, "discarding pending events and timers");
        }
        self.queue.clear();
        self.timers.clear();
        self.timeout = None;
        self.waiting = None;
    }
}
