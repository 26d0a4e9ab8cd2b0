//! Run configuration
//!
//! Scenarios can be described in TOML and compiled into a [`StepScript`]:
//!
//! ```toml
//! name = "collect"
//! nodes = 3
//! timeout_ms = 60000
//! on_timeout = "timed_out"
//!
//! [telemetry]
//! data_marker = "DATA"
//! max_received_per_node = 100
//!
//! [[steps]]
//! action = "wait"
//! when = { contains = "Booted" }
//!
//! [[steps]]
//! action = "report_quota"
//! floor = 5
//!
//! [[steps]]
//! action = "pass"
//! ```

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use motelab_core::NodeId;
use motelab_telemetry::{TelemetryAggregator, TelemetryConfig};

use crate::error::{HarnessError, HarnessResult};
use crate::predicate::Predicate;
use crate::run::TestRun;
use crate::scheduler::TimeoutAction;
use crate::scripts::{ScriptStep, StepScript};

/// Environment variable overriding `timeout_ms`
pub const TIMEOUT_ENV: &str = "MOTELAB_TIMEOUT_MS";

/// What the run timeout does
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutSpec {
    #[default]
    TimedOut,
    Fail(String),
}

impl From<TimeoutSpec> for TimeoutAction {
    fn from(spec: TimeoutSpec) -> Self {
        match spec {
            TimeoutSpec::TimedOut => TimeoutAction::TimedOut,
            TimeoutSpec::Fail(reason) => TimeoutAction::Fail(reason),
        }
    }
}

/// Serializable predicate description
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredicateSpec {
    Always,
    Contains(String),
    StartsWith(String),
    Equals(String),
    FromNode(u32),
    AllOf(Vec<PredicateSpec>),
    AnyOf(Vec<PredicateSpec>),
    Not(Box<PredicateSpec>),
}

impl PredicateSpec {
    pub fn build(&self) -> Predicate {
        match self {
            PredicateSpec::Always => Predicate::always(),
            PredicateSpec::Contains(s) => Predicate::contains(s.clone()),
            PredicateSpec::StartsWith(s) => Predicate::starts_with(s.clone()),
            PredicateSpec::Equals(s) => Predicate::equals(s.clone()),
            PredicateSpec::FromNode(id) => Predicate::from_node(NodeId::new(*id)),
            PredicateSpec::AllOf(specs) => Predicate::all_of(specs.iter().map(Self::build)),
            PredicateSpec::AnyOf(specs) => Predicate::any_of(specs.iter().map(Self::build)),
            PredicateSpec::Not(spec) => spec.build().negate(),
        }
    }

    fn for_each_node(&self, f: &mut impl FnMut(u32)) {
        match self {
            PredicateSpec::FromNode(id) => f(*id),
            PredicateSpec::AllOf(specs) | PredicateSpec::AnyOf(specs) => {
                for spec in specs {
                    spec.for_each_node(f);
                }
            }
            PredicateSpec::Not(spec) => spec.for_each_node(f),
            _ => {}
        }
    }
}

/// Serializable step description
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum StepSpec {
    Wait {
        when: PredicateSpec,
    },
    Send {
        node: u32,
        text: String,
    },
    Pause {
        ms: u64,
    },
    Rendezvous {
        when: PredicateSpec,
        #[serde(default)]
        key: Option<String>,
        floor: i64,
    },
    ReportQuota {
        floor: u64,
    },
    Pass,
    Fail {
        reason: String,
    },
}

impl StepSpec {
    pub fn build(&self) -> ScriptStep {
        match self {
            StepSpec::Wait { when } => ScriptStep::Wait(when.build()),
            StepSpec::Send { node, text } => ScriptStep::Send {
                node: NodeId::new(*node),
                text: text.clone(),
            },
            StepSpec::Pause { ms } => ScriptStep::Pause(Duration::from_millis(*ms)),
            StepSpec::Rendezvous { when, key, floor } => ScriptStep::Rendezvous {
                on: when.build(),
                key: key.clone().unwrap_or_else(|| "rendezvous".to_string()),
                floor: *floor,
            },
            StepSpec::ReportQuota { floor } => ScriptStep::ReportQuota { floor: *floor },
            StepSpec::Pass => ScriptStep::Pass,
            StepSpec::Fail { reason } => ScriptStep::Fail(reason.clone()),
        }
    }
}

/// One scenario
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub name: String,
    /// Node count; the run's nodes are `1..=nodes`
    pub nodes: u32,
    /// Run timeout in milliseconds of event time
    pub timeout_ms: Option<u64>,
    pub on_timeout: TimeoutSpec,
    /// Telemetry aggregation, off when absent
    pub telemetry: Option<TelemetryConfig>,
    pub steps: Vec<StepSpec>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            name: "run".into(),
            nodes: 0,
            timeout_ms: None,
            on_timeout: TimeoutSpec::TimedOut,
            telemetry: None,
            steps: Vec::new(),
        }
    }
}

impl RunConfig {
    pub fn load_from_file(path: impl AsRef<Path>) -> HarnessResult<Self> {
        let data = fs::read_to_string(path)?;
        Self::from_toml_str(&data)
    }

    pub fn from_toml_str(data: &str) -> HarnessResult<Self> {
        let cfg: Self = toml::from_str(data)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Apply overrides from the environment
    pub fn apply_env(&mut self) -> HarnessResult<()> {
        if let Ok(raw) = std::env::var(TIMEOUT_ENV) {
            self.override_timeout(&raw)?;
        }
        Ok(())
    }

    fn override_timeout(&mut self, raw: &str) -> HarnessResult<()> {
        let ms = raw
            .trim()
            .parse::<u64>()
            .map_err(|_| HarnessError::Config(format!("invalid {TIMEOUT_ENV}: {raw:?}")))?;
        self.timeout_ms = Some(ms);
        self.validate()
    }

    pub fn validate(&self) -> HarnessResult<()> {
        if self.name.trim().is_empty() {
            return Err(HarnessError::Config("name must not be empty".into()));
        }
        if self.steps.is_empty() {
            return Err(HarnessError::Config("at least one step is required".into()));
        }
        if self.timeout_ms == Some(0) {
            return Err(HarnessError::Config("timeout_ms must be positive".into()));
        }

        let node_known = |id: u32| id > 0 && (self.nodes == 0 || id <= self.nodes);

        for (index, step) in self.steps.iter().enumerate() {
            let mut referenced = Vec::new();
            match step {
                StepSpec::Wait { when } => when.for_each_node(&mut |id| referenced.push(id)),
                StepSpec::Send { node, .. } => referenced.push(*node),
                StepSpec::Rendezvous { when, .. } => {
                    if self.nodes == 0 {
                        return Err(HarnessError::Config(format!(
                            "step {index}: rendezvous needs nodes > 0"
                        )));
                    }
                    when.for_each_node(&mut |id| referenced.push(id));
                }
                StepSpec::ReportQuota { .. } => {
                    if self.nodes == 0 || self.telemetry.is_none() {
                        return Err(HarnessError::Config(format!(
                            "step {index}: report_quota needs nodes > 0 and a [telemetry] section"
                        )));
                    }
                }
                StepSpec::Pause { .. } | StepSpec::Pass | StepSpec::Fail { .. } => {}
            }
            if let Some(id) = referenced.into_iter().find(|&id| !node_known(id)) {
                return Err(HarnessError::Config(format!(
                    "step {index}: node {id} outside 1..={}",
                    self.nodes
                )));
            }
        }
        Ok(())
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        NodeId::range(self.nodes)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    pub fn script(&self) -> StepScript {
        StepScript::new(
            self.name.clone(),
            self.steps.iter().map(StepSpec::build).collect(),
        )
    }
}

impl TestRun {
    /// Build a run (not yet started) from a validated config
    pub fn from_config(config: &RunConfig) -> HarnessResult<Self> {
        config.validate()?;
        let mut run = TestRun::new(config.script()).with_nodes(config.node_ids());
        if let Some(telemetry) = &config.telemetry {
            run = run.with_telemetry(TelemetryAggregator::new(telemetry.clone()));
        }
        if let Some(timeout) = config.timeout() {
            run = run.with_timeout(timeout, config.on_timeout.clone().into());
        }
        Ok(run)
    }
}
