//! Identity types for simulated nodes

use std::fmt;

use serde::{Deserialize, Serialize};

/// Node identity as printed by the simulator (mote id)
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u32);

impl NodeId {
    /// Reserved id carried by events the harness generates itself
    pub const HARNESS: NodeId = NodeId(0);

    #[inline]
    pub fn new(id: u32) -> Self {
        NodeId(id)
    }

    #[inline]
    pub fn raw(self) -> u32 {
        self.0
    }

    /// True for the reserved harness id
    #[inline]
    pub fn is_harness(self) -> bool {
        self == Self::HARNESS
    }

    /// Node set `{1..=count}`, the numbering simulators hand out by default
    pub fn range(count: u32) -> Vec<NodeId> {
        (1..=count).map(NodeId).collect()
    }
}

impl From<u32> for NodeId {
    fn from(id: u32) -> Self {
        NodeId(id)
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_harness() {
            write!(f, "Node(harness)")
        } else {
            write!(f, "Node({})", self.0)
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
