//! Hierarchical event addressing and the payloads routed over the event bus.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::{ExecutionId, SafetyState, StateName};

// ────────────────────────────────────────────────────────────────────────────
// EventPath
// ────────────────────────────────────────────────────────────────────────────

/// A hierarchical bus address, e.g. `command/move_to/<execution-id>`.
///
/// A subscriber to a path receives every event published to that path or to
/// any path below it.  The empty path is the root and matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventPath(Vec<String>);

impl EventPath {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    /// Parse a `/`-separated path.  Empty segments are ignored, so `"/a//b/"`
    /// and `"a/b"` are the same path.
    pub fn parse(raw: &str) -> Self {
        Self::new(raw.split('/').filter(|s| !s.is_empty()))
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Return a new path with `segment` appended.
    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment.into());
        Self(segments)
    }

    /// Return a new path with every segment of `other` appended.
    pub fn join(&self, other: &EventPath) -> Self {
        let mut segments = self.0.clone();
        segments.extend(other.0.iter().cloned());
        Self(segments)
    }

    /// `true` when `prefix` is this path or one of its ancestors.
    pub fn starts_with(&self, prefix: &EventPath) -> bool {
        self.0.starts_with(&prefix.0)
    }

    /// Every prefix of this path, from the root down to the path itself.
    pub fn prefixes(&self) -> impl Iterator<Item = EventPath> + '_ {
        (0..=self.0.len()).map(|n| EventPath(self.0[..n].to_vec()))
    }

    // ── Well-known paths ───────────────────────────────────────────────────

    /// Operational-state transitions published by the runtime controller.
    pub fn state_machine() -> Self {
        Self::new(["state_machine"])
    }

    pub fn safety() -> Self {
        Self::new(["safety"])
    }

    /// Safety-state transitions published by the safety controller.
    pub fn safety_state() -> Self {
        Self::new(["safety", "state"])
    }

    /// Hardware faults ingested through `report_error`.
    pub fn hardware_error() -> Self {
        Self::new(["safety", "hardware_error"])
    }

    pub fn commands() -> Self {
        Self::new(["command"])
    }

    pub fn command(name: &str) -> Self {
        Self::new(["command", name])
    }

    /// Lifecycle events of a single execution.
    pub fn execution(command: &str, id: ExecutionId) -> Self {
        Self::command(command).child(id.to_string())
    }

    pub fn joint_positions() -> Self {
        Self::new(["sensor", "joint_positions"])
    }

    /// Change notifications for the parameter at `path`.
    pub fn parameter(path: &EventPath) -> Self {
        Self::new(["param"]).join(path)
    }
}

impl fmt::Display for EventPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.0.join("/"))
    }
}

impl From<&str> for EventPath {
    fn from(raw: &str) -> Self {
        Self::parse(raw)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Event
// ────────────────────────────────────────────────────────────────────────────

/// Unified event wrapper for the hierarchical event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// The path this event was published to.
    pub path: EventPath,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(path: EventPath, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            path,
            payload,
        }
    }
}

/// Variants of data that can be routed over the event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum EventPayload {
    /// The runtime controller changed the reported operational state.
    StateTransition { from: StateName, to: StateName },
    /// The safety controller changed the safety state.
    SafetyTransition { from: SafetyState, to: SafetyState },
    /// A command lifecycle transition.
    Command(CommandEvent),
    /// A hardware fault reported by a component.
    HardwareError { path: EventPath, message: String },
    /// Fresh joint positions written to the state store.
    JointPositions(BTreeMap<String, f64>),
    ParameterChanged { path: EventPath, value: Value },
    /// Free-form sensor or telemetry message.
    Message(Value),
}

/// One lifecycle transition of one execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandEvent {
    pub command: String,
    pub execution_id: ExecutionId,
    pub status: CommandStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CommandStatus {
    Started,
    Succeeded { result: Value },
    Failed { reason: String },
    Cancelled { result: Value },
}

impl CommandStatus {
    /// `true` for every status after which no further lifecycle event follows.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, CommandStatus::Started)
    }
}
