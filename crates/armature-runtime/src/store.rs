//! Shared, read-mostly robot state.
//!
//! Any task may read the store concurrently; only the runtime controller
//! writes it.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use armature_types::{EventPath, StateName};
use serde_json::Value;

use crate::descriptor::RobotDescriptor;

#[derive(Debug)]
struct StoreInner {
    operational_state: StateName,
    base_state: StateName,
    joint_positions: BTreeMap<String, f64>,
    parameters: BTreeMap<EventPath, Value>,
}

#[derive(Debug, Clone)]
pub struct StateStore {
    inner: Arc<RwLock<StoreInner>>,
}

impl StateStore {
    /// Seed the store with the descriptor's initial state and parameter
    /// defaults.
    pub fn new(descriptor: &RobotDescriptor) -> Self {
        let initial = descriptor.initial_state().clone();
        Self {
            inner: Arc::new(RwLock::new(StoreInner {
                operational_state: initial.clone(),
                base_state: initial,
                joint_positions: BTreeMap::new(),
                parameters: descriptor.parameters().clone(),
            })),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, StoreInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// The reported state: `executing` while anything runs.
    pub fn operational_state(&self) -> StateName {
        self.read().operational_state.clone()
    }

    pub fn base_state(&self) -> StateName {
        self.read().base_state.clone()
    }

    pub fn joint_positions(&self) -> BTreeMap<String, f64> {
        self.read().joint_positions.clone()
    }

    pub fn joint_position(&self, joint: &str) -> Option<f64> {
        self.read().joint_positions.get(joint).copied()
    }

    pub fn parameter(&self, path: &EventPath) -> Option<Value> {
        self.read().parameters.get(path).cloned()
    }

    /// Every parameter at or below `prefix`.
    pub fn parameters_under(&self, prefix: &EventPath) -> BTreeMap<EventPath, Value> {
        self.read()
            .parameters
            .iter()
            .filter(|(path, _)| path.starts_with(prefix))
            .map(|(path, value)| (path.clone(), value.clone()))
            .collect()
    }

    pub(crate) fn set_states(&self, operational: StateName, base: StateName) {
        let mut inner = self.write();
        inner.operational_state = operational;
        inner.base_state = base;
    }

    /// Merge `positions` into the stored joint positions.
    pub(crate) fn set_joint_positions(&self, positions: &BTreeMap<String, f64>) {
        let mut inner = self.write();
        inner
            .joint_positions
            .extend(positions.iter().map(|(joint, pos)| (joint.clone(), *pos)));
    }

    pub(crate) fn set_parameter(&self, path: EventPath, value: Value) {
        self.write().parameters.insert(path, value);
    }
}
