//! Live event feed
//!
//! Producers on any thread push node output into an [`EventFeed`]; a single
//! task runs [`drive`], which owns the [`TestRun`] and races the next event
//! against the next timer wakeup. Event time is measured from the feed's
//! creation instant.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::{self, Instant};
use tracing::{debug, trace};

use motelab_core::{Event, NodeId, SimTime};

use crate::error::{HarnessError, HarnessResult};
use crate::run::TestRun;
use crate::verdict::Verdict;

/// Sending half, cheap to clone across producer threads
#[derive(Clone, Debug)]
pub struct EventFeed {
    tx: mpsc::UnboundedSender<Event>,
    origin: Instant,
    /// Serializes stamping and sending so arrival order matches time order
    order: Arc<Mutex<()>>,
}

/// Receiving half, consumed by [`drive`]
#[derive(Debug)]
pub struct FeedReceiver {
    rx: mpsc::UnboundedReceiver<Event>,
    origin: Instant,
}

impl EventFeed {
    pub fn channel() -> (EventFeed, FeedReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let origin = Instant::now();
        (
            EventFeed {
                tx,
                origin,
                order: Arc::new(Mutex::new(())),
            },
            FeedReceiver { rx, origin },
        )
    }

    /// Event time right now
    pub fn now(&self) -> SimTime {
        SimTime::from_duration(self.origin.elapsed())
    }

    /// Push an event stamped with the current event time
    pub fn send_now(&self, node: NodeId, text: impl Into<String>) -> HarnessResult<()> {
        let _guard = self.order.lock();
        let event = Event::new(self.now(), node, text);
        self.tx.send(event).map_err(|_| HarnessError::FeedClosed)
    }

    /// Push an event with its own timestamp
    pub fn send(&self, event: Event) -> HarnessResult<()> {
        let _guard = self.order.lock();
        self.tx.send(event).map_err(|_| HarnessError::FeedClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl FeedReceiver {
    /// Wall-clock instant of an event time (`None` if unrepresentable)
    fn deadline(&self, at: SimTime) -> Option<Instant> {
        self.origin.checked_add(at.as_duration())
    }

    /// Feed everything already queued, stopping once the run concludes
    fn drain_into(&mut self, run: &mut TestRun) -> HarnessResult<()> {
        while !run.is_terminal() {
            match self.rx.try_recv() {
                Ok(event) => {
                    trace!(node = %event.node, "queued event received");
                    run.feed(event)?;
                }
                Err(_) => break,
            }
        }
        Ok(())
    }
}

/// Run until the outcome is terminal or every producer is gone.
///
/// Starts the run at event time zero if the caller has not. When the feed
/// closes while the run is pending, remaining timers are released
/// immediately (see [`TestRun::finish`]).
pub async fn drive(run: &mut TestRun, mut feed: FeedReceiver) -> HarnessResult<Verdict> {
    if !run.is_started() {
        run.start()?;
    }

    while !run.is_terminal() {
        let wakeup = run.next_wakeup();
        let deadline = wakeup.and_then(|at| feed.deadline(at));
        let sleep = async move {
            match deadline {
                Some(at) => time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        // Queued events go before any timer; `feed` releases timers due
        // ahead of each event itself
        tokio::select! {
            biased;
            received = feed.rx.recv() => match received {
                Some(event) => {
                    trace!(node = %event.node, "event received");
                    run.feed(event)?;
                }
                None => {
                    debug!("event feed closed");
                    break;
                }
            },
            _ = sleep => {
                if let Some(at) = wakeup {
                    feed.drain_into(run)?;
                    run.advance_to(at)?;
                }
            }
        }
    }

    run.finish()
}
