//! Command injection
//!
//! Scripts send text to a node's input (serial line, shell) through a
//! [`CommandSink`]. Sending is fire-and-forget: the sink never reports back
//! and the script observes effects only through later events.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use motelab_core::{NodeId, SimTime};

/// One command sent to a node
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Command {
    /// Event time the script issued it at
    pub at: SimTime,
    pub node: NodeId,
    pub text: String,
}

/// Destination for commands
pub trait CommandSink: Send {
    fn send(&mut self, command: Command);
}

/// Discards every command
#[derive(Clone, Copy, Debug, Default)]
pub struct NullSink;

impl CommandSink for NullSink {
    fn send(&mut self, command: Command) {
        trace!(node = %command.node, text = %command.text, "command dropped");
    }
}

/// Keeps every command in a shared log, for assertions and replay reports
#[derive(Clone, Debug, Default)]
pub struct RecordingSink {
    log: Arc<Mutex<Vec<Command>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything sent so far
    pub fn commands(&self) -> Vec<Command> {
        self.log.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.log.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.log.lock().is_empty()
    }
}

impl CommandSink for RecordingSink {
    fn send(&mut self, command: Command) {
        self.log.lock().push(command);
    }
}

/// Forwards commands to a live host over a tokio channel
#[derive(Clone, Debug)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Command>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<Command>) -> Self {
        ChannelSink { tx }
    }

    /// Sink plus the receiving end for the host
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Command>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ChannelSink { tx }, rx)
    }
}

impl CommandSink for ChannelSink {
    fn send(&mut self, command: Command) {
        if let Err(err) = self.tx.send(command) {
            debug!(node = %err.0.node, "command receiver gone");
        }
    }
}
