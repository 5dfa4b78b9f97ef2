//! Caller-facing handles: [`RuntimeHandle`] for the controller and
//! [`ExecutionHandle`] for one admitted execution.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use armature_kernel::SafetySignal;
use armature_middleware::{EventBus, Subscription};
use armature_types::{
    CategoryName, CommandEvent, CommandStatus, EventPath, EventPayload, ExecutionId,
    RuntimeError, SafetyState, StateName,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};

use crate::config::RuntimeConfig;
use crate::controller::{self, CancelTarget, ControlMsg};
use crate::descriptor::RobotDescriptor;
use crate::params::ParameterPersistence;
use crate::store::StateStore;

// ────────────────────────────────────────────────────────────────────────────
// Introspection types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionInfo {
    pub id: ExecutionId,
    pub command: String,
    pub category: CategoryName,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryAvailability {
    pub limit: usize,
    pub running: usize,
    pub available: usize,
}

/// A consistent view of the controller, taken between two inbox messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeSnapshot {
    /// `executing` while anything runs, else the base state.
    pub operational_state: StateName,
    pub base_state: StateName,
    pub safety_state: SafetyState,
    /// Running executions, oldest first.
    pub executions: Vec<ExecutionInfo>,
    pub availability: BTreeMap<CategoryName, CategoryAvailability>,
}

// ────────────────────────────────────────────────────────────────────────────
// RuntimeHandle
// ────────────────────────────────────────────────────────────────────────────

/// Cloneable handle to the runtime controller.  The controller stops, and
/// aborts whatever still runs, once every handle is dropped.
#[derive(Clone)]
pub struct RuntimeHandle {
    tx: mpsc::Sender<ControlMsg>,
    store: StateStore,
    descriptor: Arc<RobotDescriptor>,
}

impl RuntimeHandle {
    /// Spawn the controller on the current Tokio runtime.
    ///
    /// `safety` is the safety controller's signal channel; the runtime follows
    /// it (arming lifts `disarmed` to `idle`, anything else or any new disarm
    /// cancels every execution and returns to `disarmed`).
    pub fn spawn(
        descriptor: Arc<RobotDescriptor>,
        bus: EventBus,
        store: StateStore,
        safety: watch::Receiver<SafetySignal>,
        config: &RuntimeConfig,
        persistence: Option<Arc<dyn ParameterPersistence>>,
    ) -> Self {
        let tx = controller::spawn(
            descriptor.clone(),
            bus,
            store.clone(),
            safety,
            config,
            persistence,
        );
        Self {
            tx,
            store,
            descriptor,
        }
    }

    pub fn descriptor(&self) -> &Arc<RobotDescriptor> {
        &self.descriptor
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Ask the controller to admit `command` with `goal`.
    ///
    /// # Errors
    ///
    /// Admission errors (`SafetyLocked`, `UnknownCommand`, `StateNotAllowed`,
    /// `CategoryFull`) are returned here and leave the controller unchanged.
    /// Execution failures only surface through the returned handle.
    pub async fn execute(
        &self,
        command: impl Into<String>,
        goal: Value,
    ) -> Result<ExecutionHandle, RuntimeError> {
        let command = command.into();
        self.request(|reply| ControlMsg::Execute {
            command,
            goal,
            reply,
        })
        .await?
    }

    /// Cancel every running execution.  Returns how many were cancelled.
    pub async fn cancel(&self) -> Result<usize, RuntimeError> {
        self.request(|reply| ControlMsg::Cancel {
            target: CancelTarget::All,
            reply,
        })
        .await
    }

    pub async fn cancel_execution(&self, id: ExecutionId) -> Result<(), RuntimeError> {
        let cancelled = self
            .request(|reply| ControlMsg::Cancel {
                target: CancelTarget::Execution(id),
                reply,
            })
            .await?;
        if cancelled == 0 {
            return Err(RuntimeError::UnknownExecution(id));
        }
        Ok(())
    }

    pub async fn cancel_category(
        &self,
        category: impl Into<CategoryName>,
    ) -> Result<usize, RuntimeError> {
        let category = category.into();
        self.request(|reply| ControlMsg::Cancel {
            target: CancelTarget::Category(category),
            reply,
        })
        .await
    }

    pub async fn snapshot(&self) -> Result<RuntimeSnapshot, RuntimeError> {
        self.request(|reply| ControlMsg::Snapshot { reply }).await
    }

    /// The reported state: `executing` while anything runs.
    pub async fn operational_state(&self) -> Result<StateName, RuntimeError> {
        Ok(self.snapshot().await?.operational_state)
    }

    pub async fn base_state(&self) -> Result<StateName, RuntimeError> {
        Ok(self.snapshot().await?.base_state)
    }

    pub async fn executing(&self) -> Result<bool, RuntimeError> {
        Ok(!self.snapshot().await?.executions.is_empty())
    }

    pub async fn executing_category(&self, category: &CategoryName) -> Result<bool, RuntimeError> {
        Ok(self
            .snapshot()
            .await?
            .executions
            .iter()
            .any(|e| &e.category == category))
    }

    pub async fn executions(&self) -> Result<Vec<ExecutionInfo>, RuntimeError> {
        Ok(self.snapshot().await?.executions)
    }

    pub async fn category_availability(
        &self,
    ) -> Result<BTreeMap<CategoryName, CategoryAvailability>, RuntimeError> {
        Ok(self.snapshot().await?.availability)
    }

    /// Merge `positions` into the state store and publish them at
    /// `sensor/joint_positions`.
    pub async fn set_joint_positions(
        &self,
        positions: BTreeMap<String, f64>,
    ) -> Result<(), RuntimeError> {
        self.request(|reply| ControlMsg::SetJointPositions { positions, reply })
            .await
    }

    /// Write a parameter and patch any live setting bound to it.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::ParameterRejected`] when the value has the wrong shape
    /// or would lower a limit below the category's current occupancy.
    pub async fn set_parameter(
        &self,
        path: impl Into<EventPath>,
        value: Value,
    ) -> Result<(), RuntimeError> {
        let path = path.into();
        self.request(|reply| ControlMsg::SetParameter { path, value, reply })
            .await?
    }

    /// Deliver `message` to the handler of a running execution.
    pub async fn send_info(&self, id: ExecutionId, message: Value) -> Result<(), RuntimeError> {
        let sender = self
            .request(|reply| ControlMsg::InfoSender { id, reply })
            .await??;
        sender
            .send(message)
            .await
            .map_err(|_| RuntimeError::UnknownExecution(id))
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> ControlMsg,
    ) -> Result<T, RuntimeError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| RuntimeError::Unavailable)?;
        rx.await.map_err(|_| RuntimeError::Unavailable)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// ExecutionHandle
// ────────────────────────────────────────────────────────────────────────────

/// Handle to one admitted execution.
///
/// Subscribed to the execution's lifecycle path before the executor was
/// spawned, so no lifecycle event can be missed.
pub struct ExecutionHandle {
    id: ExecutionId,
    command: String,
    events: Subscription,
    messages: mpsc::Sender<Value>,
    await_timeout: Duration,
    outcome: Option<Result<Value, RuntimeError>>,
}

impl ExecutionHandle {
    pub(crate) fn new(
        id: ExecutionId,
        command: String,
        events: Subscription,
        messages: mpsc::Sender<Value>,
        await_timeout: Duration,
    ) -> Self {
        Self {
            id,
            command,
            events,
            messages,
            await_timeout,
            outcome: None,
        }
    }

    pub fn id(&self) -> ExecutionId {
        self.id
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    /// Wait up to `timeout` for the terminal outcome.
    ///
    /// `succeeded` maps to `Ok(result)`, `aborted` to
    /// [`RuntimeError::HandlerError`] and `canceled` to
    /// [`RuntimeError::Cancelled`].  Once known, the outcome is cached and
    /// returned by every later call.
    pub async fn wait(&mut self, timeout: Duration) -> Result<Value, RuntimeError> {
        if let Some(outcome) = &self.outcome {
            return outcome.clone();
        }
        let id = self.id;
        let events = &mut self.events;
        let outcome = tokio::time::timeout(timeout, async move {
            while let Some(event) = events.recv().await {
                let EventPayload::Command(CommandEvent {
                    execution_id,
                    status,
                    ..
                }) = event.payload
                else {
                    continue;
                };
                if execution_id != id {
                    continue;
                }
                match status {
                    CommandStatus::Started => {}
                    CommandStatus::Succeeded { result } => return Ok(result),
                    CommandStatus::Failed { reason } => {
                        return Err(RuntimeError::HandlerError { reason });
                    }
                    CommandStatus::Cancelled { .. } => return Err(RuntimeError::Cancelled),
                }
            }
            Err(RuntimeError::Unavailable)
        })
        .await;

        match outcome {
            Ok(outcome) => {
                self.outcome = Some(outcome.clone());
                outcome
            }
            Err(_) => Err(RuntimeError::AwaitTimeout(timeout)),
        }
    }

    /// [`wait`][Self::wait] with the configured default await timeout.
    pub async fn join(&mut self) -> Result<Value, RuntimeError> {
        self.wait(self.await_timeout).await
    }

    /// Deliver `message` to the running handler's `handle_info`.
    pub async fn send(&self, message: Value) -> Result<(), RuntimeError> {
        self.messages
            .send(message)
            .await
            .map_err(|_| RuntimeError::UnknownExecution(self.id))
    }
}

impl fmt::Debug for ExecutionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionHandle")
            .field("id", &self.id)
            .field("command", &self.command)
            .field("outcome", &self.outcome)
            .finish_non_exhaustive()
    }
}
