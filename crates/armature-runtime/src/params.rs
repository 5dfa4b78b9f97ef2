//! Runtime parameters and the descriptor slots they patch.
//!
//! A parameter is a JSON value stored under a hierarchical [`EventPath`] in
//! the [`StateStore`][crate::store::StateStore].  Some parameters are *bound*
//! to a live setting of the descriptor:
//!
//! | Binding | Value shape | Effect |
//! |---|---|---|
//! | [`ParameterBinding::CategoryLimit`] | non-negative integer | concurrency limit of the category |
//! | [`ParameterBinding::CommandTimeout`] | milliseconds, `0` or `null` disables | execution timeout of the command |
//!
//! Changing a bound parameter patches the setting in place; executions that
//! are already running keep the timeout they were admitted with.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use armature_types::{CategoryName, EventPath};
use async_trait::async_trait;
use serde_json::Value;

use crate::descriptor::RobotDescriptor;

/// A descriptor slot patched live when its parameter changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParameterBinding {
    CategoryLimit(CategoryName),
    CommandTimeout(String),
}

/// Optional collaborator that stores parameter changes somewhere durable.
///
/// Called from a detached task after the change has been applied, so a slow
/// or failing backend never delays the controller.
#[async_trait]
pub trait ParameterPersistence: Send + Sync + 'static {
    async fn persist(&self, path: &EventPath, value: &Value) -> Result<(), String>;
}

/// Keeps persisted parameters in memory.  Useful for tests and for robots
/// that only need the last values within one process.
#[derive(Debug, Clone, Default)]
pub struct MemoryPersistence {
    values: Arc<RwLock<HashMap<EventPath, Value>>>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &EventPath) -> Option<Value> {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .cloned()
    }
}

#[async_trait]
impl ParameterPersistence for MemoryPersistence {
    async fn persist(&self, path: &EventPath, value: &Value) -> Result<(), String> {
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.clone(), value.clone());
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Value shapes
// ────────────────────────────────────────────────────────────────────────────

pub(crate) fn limit_from(value: &Value) -> Result<usize, String> {
    value
        .as_u64()
        .and_then(|n| usize::try_from(n).ok())
        .ok_or_else(|| format!("expected a non-negative integer limit, got {value}"))
}

pub(crate) fn timeout_from(value: &Value) -> Result<Option<Duration>, String> {
    match value {
        Value::Null => Ok(None),
        other => match other.as_u64() {
            Some(0) => Ok(None),
            Some(ms) => Ok(Some(Duration::from_millis(ms))),
            None => Err(format!("expected a timeout in milliseconds, got {other}")),
        },
    }
}

pub(crate) fn timeout_to_value(timeout: Option<Duration>) -> Value {
    match timeout {
        Some(d) => Value::from(u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
        None => Value::Null,
    }
}

/// `true` when `value` may replace `current` without changing its JSON kind.
/// A `null` default accepts anything.
pub(crate) fn same_shape(current: &Value, value: &Value) -> bool {
    matches!(
        (current, value),
        (Value::Null, _)
            | (Value::Bool(_), Value::Bool(_))
            | (Value::Number(_), Value::Number(_))
            | (Value::String(_), Value::String(_))
            | (Value::Array(_), Value::Array(_))
            | (Value::Object(_), Value::Object(_))
    )
}

// ────────────────────────────────────────────────────────────────────────────
// Live settings
// ────────────────────────────────────────────────────────────────────────────

pub(crate) enum SlotUpdate {
    Limit(CategoryName, usize),
    Timeout(String, Option<Duration>),
}

/// The patchable copy of the descriptor's limits and timeouts, owned by the
/// runtime controller.
#[derive(Debug, Clone)]
pub(crate) struct LiveSettings {
    limits: HashMap<CategoryName, usize>,
    timeouts: HashMap<String, Option<Duration>>,
}

impl LiveSettings {
    pub(crate) fn from_descriptor(descriptor: &RobotDescriptor) -> Self {
        Self {
            limits: descriptor
                .categories()
                .map(|c| (c.name.clone(), c.limit))
                .collect(),
            timeouts: descriptor
                .commands()
                .map(|c| (c.name.clone(), c.timeout))
                .collect(),
        }
    }

    pub(crate) fn limit(&self, category: &CategoryName) -> usize {
        self.limits.get(category).copied().unwrap_or(0)
    }

    pub(crate) fn timeout(&self, command: &str) -> Option<Duration> {
        self.timeouts.get(command).copied().flatten()
    }

    /// Validate `value` for `binding` without applying it.
    ///
    /// A limit below the category's current occupancy is refused: running
    /// executions are never evicted by a parameter change.
    pub(crate) fn stage(
        &self,
        binding: &ParameterBinding,
        value: &Value,
        occupancy: usize,
    ) -> Result<SlotUpdate, String> {
        match binding {
            ParameterBinding::CategoryLimit(category) => {
                let limit = limit_from(value)?;
                if limit < occupancy {
                    return Err(format!(
                        "limit {limit} is below the {occupancy} running execution(s) of {category}"
                    ));
                }
                Ok(SlotUpdate::Limit(category.clone(), limit))
            }
            ParameterBinding::CommandTimeout(command) => {
                Ok(SlotUpdate::Timeout(command.clone(), timeout_from(value)?))
            }
        }
    }

    pub(crate) fn apply(&mut self, update: SlotUpdate) {
        match update {
            SlotUpdate::Limit(category, limit) => {
                self.limits.insert(category, limit);
            }
            SlotUpdate::Timeout(command, timeout) => {
                self.timeouts.insert(command, timeout);
            }
        }
    }
}
