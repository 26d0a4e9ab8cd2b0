//! Event predicates
//!
//! A small combinator library over [`Event`]s. Text matching is substring,
//! prefix or exact comparison only; predicates never parse the line.

use std::fmt;
use std::sync::Arc;

use motelab_core::{Event, NodeId};

use crate::state::NodeStateStore;

type CustomFn = dyn Fn(&Event, &NodeStateStore) -> bool + Send + Sync;

/// Boolean condition over the current event and the run's per-node state
#[derive(Clone)]
pub enum Predicate {
    Always,
    Never,
    /// Text contains the substring
    Contains(String),
    /// Text starts with the prefix
    StartsWith(String),
    /// Text equals exactly
    Equals(String),
    /// Event came from this node
    FromNode(NodeId),
    /// Event was generated by the harness
    Synthetic,
    And(Box<Predicate>, Box<Predicate>),
    Or(Box<Predicate>, Box<Predicate>),
    Not(Box<Predicate>),
    Custom(Arc<CustomFn>),
}

impl Predicate {
    pub fn always() -> Self {
        Predicate::Always
    }

    pub fn never() -> Self {
        Predicate::Never
    }

    pub fn contains(needle: impl Into<String>) -> Self {
        Predicate::Contains(needle.into())
    }

    pub fn starts_with(prefix: impl Into<String>) -> Self {
        Predicate::StartsWith(prefix.into())
    }

    pub fn equals(text: impl Into<String>) -> Self {
        Predicate::Equals(text.into())
    }

    pub fn from_node(node: NodeId) -> Self {
        Predicate::FromNode(node)
    }

    pub fn synthetic() -> Self {
        Predicate::Synthetic
    }

    /// Arbitrary condition, may consult per-node state
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&Event, &NodeStateStore) -> bool + Send + Sync + 'static,
    {
        Predicate::Custom(Arc::new(f))
    }

    pub fn and(self, other: Predicate) -> Self {
        Predicate::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: Predicate) -> Self {
        Predicate::Or(Box::new(self), Box::new(other))
    }

    pub fn negate(self) -> Self {
        Predicate::Not(Box::new(self))
    }

    /// Conjunction of all predicates (`Always` when empty)
    pub fn all_of(predicates: impl IntoIterator<Item = Predicate>) -> Self {
        predicates
            .into_iter()
            .reduce(Predicate::and)
            .unwrap_or(Predicate::Always)
    }

    /// Disjunction of all predicates (`Never` when empty)
    pub fn any_of(predicates: impl IntoIterator<Item = Predicate>) -> Self {
        predicates
            .into_iter()
            .reduce(Predicate::or)
            .unwrap_or(Predicate::Never)
    }

    /// Evaluate against an event
    pub fn matches(&self, event: &Event, state: &NodeStateStore) -> bool {
        match self {
            Predicate::Always => true,
            Predicate::Never => false,
            Predicate::Contains(needle) => event.text.contains(needle.as_str()),
            Predicate::StartsWith(prefix) => event.text.starts_with(prefix.as_str()),
            Predicate::Equals(text) => event.text == *text,
            Predicate::FromNode(node) => event.node == *node,
            Predicate::Synthetic => event.is_synthetic(),
            Predicate::And(a, b) => a.matches(event, state) && b.matches(event, state),
            Predicate::Or(a, b) => a.matches(event, state) || b.matches(event, state),
            Predicate::Not(p) => !p.matches(event, state),
            Predicate::Custom(f) => f(event, state),
        }
    }
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Always => write!(f, "always"),
            Predicate::Never => write!(f, "never"),
            Predicate::Contains(s) => write!(f, "contains({s:?})"),
            Predicate::StartsWith(s) => write!(f, "starts_with({s:?})"),
            Predicate::Equals(s) => write!(f, "equals({s:?})"),
            Predicate::FromNode(n) => write!(f, "from_node({n})"),
            Predicate::Synthetic => write!(f, "synthetic"),
            Predicate::And(a, b) => write!(f, "({a:?} && {b:?})"),
            Predicate::Or(a, b) => write!(f, "({a:?} || {b:?})"),
            Predicate::Not(p) => write!(f, "!{p:?}"),
            Predicate::Custom(_) => write!(f, "custom"),
        }
    }
}
