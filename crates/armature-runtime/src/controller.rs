//! Runtime controller – admission control and the operational-state machine.
//!
//! One actor task owns every piece of mutable runtime state: the base state,
//! the execution table and per-category occupancy.  Requests arrive through a
//! bounded inbox and are handled one at a time, so admission is totally
//! ordered and `occupancy <= limit` holds between any two messages.
//!
//! # Admission
//!
//! | Step | Check | Rejection |
//! |---|---|---|
//! | 0 | safety is not `disarming` / `error` | `SafetyLocked` |
//! | 1 | command is declared | `UnknownCommand` |
//! | 2 | reported state is allowed | `StateNotAllowed` |
//! | 3 | category has room, or the command pre-empts its own category | `CategoryFull` |
//!
//! A rejected request changes nothing.
//!
//! # Lifecycle events
//!
//! The executor publishes `started`.  Every terminal event is published by
//! the controller while it still tracks the execution, which makes it exactly
//! once: a completion arriving after a cancellation finds nothing to do.
//! Cancellation publishes the `cancelled` event *before* aborting the task.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use armature_kernel::SafetySignal;
use armature_middleware::EventBus;
use armature_types::{
    CategoryName, CommandStatus, EventPath, EventPayload, ExecutionId, RuntimeError, SafetyState,
    StateName,
};
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use crate::config::RuntimeConfig;
use crate::descriptor::{CommandSpec, RobotDescriptor};
use crate::executor::{self, CommandContext, Terminal, publish_status};
use crate::handle::{CategoryAvailability, ExecutionHandle, ExecutionInfo, RuntimeSnapshot};
use crate::params::{LiveSettings, ParameterBinding, ParameterPersistence, same_shape};
use crate::store::StateStore;

pub(crate) enum CancelTarget {
    All,
    Execution(ExecutionId),
    Category(CategoryName),
}

pub(crate) enum ControlMsg {
    Execute {
        command: String,
        goal: Value,
        reply: oneshot::Sender<Result<ExecutionHandle, RuntimeError>>,
    },
    Cancel {
        target: CancelTarget,
        reply: oneshot::Sender<usize>,
    },
    /// Sent by an executor task when its handler finished.
    Completed {
        id: ExecutionId,
        terminal: Terminal,
        next_state: Option<StateName>,
    },
    /// Sent by a monitor task when an executor crashed.
    ExecutorDown { id: ExecutionId },
    Snapshot {
        reply: oneshot::Sender<RuntimeSnapshot>,
    },
    SetJointPositions {
        positions: BTreeMap<String, f64>,
        reply: oneshot::Sender<()>,
    },
    SetParameter {
        path: EventPath,
        value: Value,
        reply: oneshot::Sender<Result<(), RuntimeError>>,
    },
    InfoSender {
        id: ExecutionId,
        reply: oneshot::Sender<Result<mpsc::Sender<Value>, RuntimeError>>,
    },
}

struct Execution {
    command: String,
    category: CategoryName,
    started_at: DateTime<Utc>,
    /// Admission order; lower is older.
    seq: u64,
    abort: AbortHandle,
    messages: mpsc::Sender<Value>,
    fallback_state: Option<StateName>,
    cancel_result: Value,
}

struct RuntimeController {
    descriptor: Arc<RobotDescriptor>,
    bus: EventBus,
    store: StateStore,
    safety: watch::Receiver<SafetySignal>,
    safety_state: SafetyState,
    /// Last seen [`SafetySignal::disarms`].
    disarms_seen: u64,
    safety_alive: bool,
    base_state: StateName,
    reported: StateName,
    executions: HashMap<ExecutionId, Execution>,
    occupancy: HashMap<CategoryName, usize>,
    settings: LiveSettings,
    persistence: Option<Arc<dyn ParameterPersistence>>,
    self_tx: mpsc::WeakSender<ControlMsg>,
    next_seq: u64,
    info_capacity: usize,
    await_timeout: Duration,
}

/// Spawn the controller and return its inbox.
pub(crate) fn spawn(
    descriptor: Arc<RobotDescriptor>,
    bus: EventBus,
    store: StateStore,
    safety: watch::Receiver<SafetySignal>,
    config: &RuntimeConfig,
    persistence: Option<Arc<dyn ParameterPersistence>>,
) -> mpsc::Sender<ControlMsg> {
    let (tx, inbox) = mpsc::channel(config.inbox_capacity.max(1));
    let initial = descriptor.initial_state().clone();
    store.set_states(initial.clone(), initial.clone());
    let disarms_seen = safety.borrow().disarms;

    let controller = RuntimeController {
        settings: LiveSettings::from_descriptor(&descriptor),
        descriptor,
        bus,
        store,
        safety,
        safety_state: SafetyState::Disarmed,
        disarms_seen,
        safety_alive: true,
        base_state: initial.clone(),
        reported: initial,
        executions: HashMap::new(),
        occupancy: HashMap::new(),
        persistence,
        self_tx: tx.downgrade(),
        next_seq: 0,
        info_capacity: config.info_capacity.max(1),
        await_timeout: config.await_timeout(),
    };
    tokio::spawn(controller.run(inbox));
    tx
}

impl RuntimeController {
    async fn run(mut self, mut inbox: mpsc::Receiver<ControlMsg>) {
        info!(state = %self.base_state, commands = self.descriptor.commands().count(), "runtime controller started");
        self.sync_safety();

        loop {
            tokio::select! {
                biased;
                changed = self.safety.changed(), if self.safety_alive => {
                    if changed.is_err() {
                        warn!("safety controller gone; keeping last known safety state");
                        self.safety_alive = false;
                    }
                    self.sync_safety();
                }
                msg = inbox.recv() => {
                    let Some(msg) = msg else { break };
                    self.sync_safety();
                    self.handle(msg);
                }
            }
        }

        let remaining = self.cancel_where(|_| true);
        self.refresh_state();
        info!(cancelled = remaining, "runtime controller stopped");
    }

    fn handle(&mut self, msg: ControlMsg) {
        match msg {
            ControlMsg::Execute {
                command,
                goal,
                reply,
            } => {
                let _ = reply.send(self.execute(&command, goal));
            }
            ControlMsg::Cancel { target, reply } => {
                let cancelled = match target {
                    CancelTarget::All => self.cancel_where(|_| true),
                    CancelTarget::Execution(id) => self.cancel_where(|(eid, _)| *eid == id),
                    CancelTarget::Category(category) => {
                        self.cancel_where(|(_, e)| e.category == category)
                    }
                };
                self.refresh_state();
                let _ = reply.send(cancelled);
            }
            ControlMsg::Completed {
                id,
                terminal,
                next_state,
            } => self.on_completed(id, terminal, next_state),
            ControlMsg::ExecutorDown { id } => self.on_executor_down(id),
            ControlMsg::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            ControlMsg::SetJointPositions { positions, reply } => {
                self.store.set_joint_positions(&positions);
                self.bus.publish(
                    EventPath::joint_positions(),
                    EventPayload::JointPositions(positions),
                );
                let _ = reply.send(());
            }
            ControlMsg::SetParameter { path, value, reply } => {
                let _ = reply.send(self.set_parameter(path, value));
            }
            ControlMsg::InfoSender { id, reply } => {
                let sender = self
                    .executions
                    .get(&id)
                    .map(|e| e.messages.clone())
                    .ok_or(RuntimeError::UnknownExecution(id));
                let _ = reply.send(sender);
            }
        }
    }

    // ── Admission ──────────────────────────────────────────────────────────

    fn execute(&mut self, command: &str, goal: Value) -> Result<ExecutionHandle, RuntimeError> {
        if matches!(self.safety_state, SafetyState::Disarming | SafetyState::Error) {
            return Err(RuntimeError::SafetyLocked {
                state: self.safety_state,
            });
        }
        let descriptor = Arc::clone(&self.descriptor);
        let spec = descriptor
            .command(command)
            .ok_or_else(|| RuntimeError::UnknownCommand(command.to_string()))?;

        if !spec.allowed_states.contains(&self.reported) {
            return Err(RuntimeError::StateNotAllowed {
                current: self.reported.clone(),
                allowed: spec.allowed_states_sorted(),
            });
        }

        let limit = self.settings.limit(&spec.category);
        let running = self.running(&spec.category);
        if running >= limit {
            let victim = if limit > 0 && spec.cancels.contains(&spec.category) {
                self.oldest_in(&spec.category)
            } else {
                None
            };
            match victim {
                Some(id) => {
                    info!(command, pre_empted = %id, category = %spec.category, "pre-empting execution");
                    self.cancel_one(id);
                }
                None => {
                    return Err(RuntimeError::CategoryFull {
                        category: spec.category.clone(),
                        limit,
                        current: running,
                    });
                }
            }
        }

        let handle = self.spawn_execution(spec, goal);
        self.refresh_state();
        Ok(handle)
    }

    fn spawn_execution(&mut self, spec: &CommandSpec, goal: Value) -> ExecutionHandle {
        let id = ExecutionId::new();
        let events = self.bus.subscribe(EventPath::execution(&spec.name, id));
        let (messages, messages_rx) = mpsc::channel(self.info_capacity);
        let ctx = CommandContext::new(
            id,
            spec.name.clone(),
            self.bus.clone(),
            self.store.clone(),
            Arc::clone(&self.descriptor),
            messages_rx,
        );
        let handler = spec.new_handler();
        let timeout = self.settings.timeout(&spec.name);

        let inbox = self.self_tx.clone();
        let bus = self.bus.clone();
        let command = spec.name.clone();
        let task = tokio::spawn(async move {
            let completion = executor::run(handler, goal, ctx, timeout).await;
            report_completion(inbox, &bus, &command, id, completion.terminal, completion.next_state).await;
        });
        let abort = task.abort_handle();

        let monitor_inbox = self.self_tx.clone();
        tokio::spawn(async move {
            // Aborted tasks were already finalised by whoever aborted them.
            if let Err(err) = task.await
                && err.is_panic()
                && let Some(tx) = monitor_inbox.upgrade()
            {
                let _ = tx.send(ControlMsg::ExecutorDown { id }).await;
            }
        });

        *self.occupancy.entry(spec.category.clone()).or_insert(0) += 1;
        self.executions.insert(
            id,
            Execution {
                command: spec.name.clone(),
                category: spec.category.clone(),
                started_at: Utc::now(),
                seq: self.next_seq,
                abort,
                messages: messages.clone(),
                fallback_state: spec.fallback_state.clone(),
                cancel_result: spec.cancel_result.clone(),
            },
        );
        self.next_seq += 1;
        debug!(command = %spec.name, execution = %id, ?timeout, "execution admitted");

        ExecutionHandle::new(id, spec.name.clone(), events, messages, self.await_timeout)
    }

    // ── Completion and cancellation ────────────────────────────────────────

    fn on_completed(&mut self, id: ExecutionId, terminal: Terminal, next_state: Option<StateName>) {
        let Some(execution) = self.executions.get(&id) else {
            debug!(execution = %id, "completion for untracked execution ignored");
            return;
        };
        publish_status(&self.bus, &execution.command, id, terminal.status());
        self.finalize(id, next_state.unwrap_or_else(StateName::idle));
        self.refresh_state();
    }

    fn on_executor_down(&mut self, id: ExecutionId) {
        let Some(execution) = self.executions.get(&id) else {
            return;
        };
        warn!(command = %execution.command, execution = %id, "executor crashed");
        publish_status(
            &self.bus,
            &execution.command,
            id,
            CommandStatus::Failed {
                reason: "executor crashed".to_string(),
            },
        );
        self.finalize(id, StateName::idle());
        self.refresh_state();
    }

    /// Publish-then-kill every execution matching `select`, oldest first.
    /// The caller refreshes the reported state.
    fn cancel_where(&mut self, select: impl Fn((&ExecutionId, &Execution)) -> bool) -> usize {
        let mut victims: Vec<(u64, ExecutionId)> = self
            .executions
            .iter()
            .filter(|(id, e)| select((*id, *e)))
            .map(|(id, e)| (e.seq, *id))
            .collect();
        victims.sort();
        for (_, id) in &victims {
            self.cancel_one(*id);
        }
        victims.len()
    }

    fn cancel_one(&mut self, id: ExecutionId) {
        let Some(execution) = self.executions.get(&id) else {
            return;
        };
        publish_status(
            &self.bus,
            &execution.command,
            id,
            CommandStatus::Cancelled {
                result: execution.cancel_result.clone(),
            },
        );
        execution.abort.abort();
        info!(command = %execution.command, execution = %id, "execution cancelled");
        let fallback = execution
            .fallback_state
            .clone()
            .unwrap_or_else(StateName::idle);
        self.finalize(id, fallback);
    }

    /// Drop the bookkeeping of `id` and move the base state to `requested`.
    fn finalize(&mut self, id: ExecutionId, requested: StateName) {
        let Some(execution) = self.executions.remove(&id) else {
            return;
        };
        if let Some(count) = self.occupancy.get_mut(&execution.category) {
            *count = count.saturating_sub(1);
        }
        self.base_state = self.resolve_base(requested);
    }

    fn resolve_base(&self, requested: StateName) -> StateName {
        if !self.safety_state.is_armed() {
            return StateName::disarmed();
        }
        if requested.is_executing() || requested.is_disarmed() || !self.descriptor.has_state(&requested) {
            warn!(state = %requested, "requested state cannot be entered; falling back to idle");
            return StateName::idle();
        }
        requested
    }

    /// Recompute the reported state, mirror it into the store and publish a
    /// transition when it changed.
    fn refresh_state(&mut self) {
        let next = if self.executions.is_empty() {
            self.base_state.clone()
        } else {
            StateName::executing()
        };
        self.store.set_states(next.clone(), self.base_state.clone());
        if next != self.reported {
            let from = std::mem::replace(&mut self.reported, next.clone());
            info!(%from, to = %next, "operational state changed");
            self.bus.publish(
                EventPath::state_machine(),
                EventPayload::StateTransition { from, to: next },
            );
        }
    }

    // ── Safety following ───────────────────────────────────────────────────

    /// Follow the latest safety signal.
    ///
    /// The watch may have skipped a whole disarm-then-arm cycle; a moved
    /// `disarms` counter still cancels everything that was running.
    fn sync_safety(&mut self) {
        let SafetySignal { state, disarms } = *self.safety.borrow_and_update();
        let disarmed_since = disarms != self.disarms_seen;
        if state == self.safety_state && !disarmed_since {
            return;
        }
        debug!(from = %self.safety_state, to = %state, disarms, "following safety state");
        self.safety_state = state;
        self.disarms_seen = disarms;

        if disarmed_since || !state.is_armed() {
            let cancelled = self.cancel_where(|_| true);
            if cancelled > 0 {
                warn!(cancelled, safety = %state, "executions cancelled by safety");
            }
            self.base_state = StateName::disarmed();
        }
        if state.is_armed() && self.base_state.is_disarmed() {
            self.base_state = StateName::idle();
        }
        self.refresh_state();
    }

    // ── Parameters ─────────────────────────────────────────────────────────

    fn set_parameter(&mut self, path: EventPath, value: Value) -> Result<(), RuntimeError> {
        let reject = |reason: String| RuntimeError::ParameterRejected {
            path: path.clone(),
            reason,
        };
        if let Some(current) = self.descriptor.parameters().get(&path)
            && !same_shape(current, &value)
        {
            return Err(reject(format!("expected a value shaped like {current}")));
        }

        let mut updates = Vec::new();
        for binding in self.descriptor.bindings(&path) {
            let occupancy = match binding {
                ParameterBinding::CategoryLimit(category) => self.running(category),
                ParameterBinding::CommandTimeout(_) => 0,
            };
            updates.push(self.settings.stage(binding, &value, occupancy).map_err(reject)?);
        }
        for update in updates {
            self.settings.apply(update);
        }

        self.store.set_parameter(path.clone(), value.clone());
        if let Some(persistence) = &self.persistence {
            let persistence = Arc::clone(persistence);
            let (path, value) = (path.clone(), value.clone());
            tokio::spawn(async move {
                if let Err(reason) = persistence.persist(&path, &value).await {
                    warn!(%path, %reason, "parameter persistence failed");
                }
            });
        }
        info!(%path, %value, "parameter changed");
        self.bus.publish(
            EventPath::parameter(&path),
            EventPayload::ParameterChanged { path, value },
        );
        Ok(())
    }

    // ── Introspection ──────────────────────────────────────────────────────

    fn running(&self, category: &CategoryName) -> usize {
        self.occupancy.get(category).copied().unwrap_or(0)
    }

    fn oldest_in(&self, category: &CategoryName) -> Option<ExecutionId> {
        self.executions
            .iter()
            .filter(|(_, e)| &e.category == category)
            .min_by_key(|(_, e)| e.seq)
            .map(|(id, _)| *id)
    }

    fn snapshot(&self) -> RuntimeSnapshot {
        let mut running: Vec<(&ExecutionId, &Execution)> = self.executions.iter().collect();
        running.sort_by_key(|(_, e)| e.seq);
        let executions = running
            .into_iter()
            .map(|(id, e)| ExecutionInfo {
                id: *id,
                command: e.command.clone(),
                category: e.category.clone(),
                started_at: e.started_at,
            })
            .collect();

        let availability = self
            .descriptor
            .categories()
            .map(|c| {
                let limit = self.settings.limit(&c.name);
                let running = self.running(&c.name);
                (
                    c.name.clone(),
                    CategoryAvailability {
                        limit,
                        running,
                        available: limit.saturating_sub(running),
                    },
                )
            })
            .collect();

        RuntimeSnapshot {
            operational_state: self.reported.clone(),
            base_state: self.base_state.clone(),
            safety_state: self.safety_state,
            executions,
            availability,
        }
    }
}

/// Hand the outcome to the controller, or publish it directly when the
/// controller is gone so awaiting callers still resolve.
async fn report_completion(
    inbox: mpsc::WeakSender<ControlMsg>,
    bus: &EventBus,
    command: &str,
    id: ExecutionId,
    terminal: Terminal,
    next_state: Option<StateName>,
) {
    let unsent = match inbox.upgrade() {
        Some(tx) => match tx
            .send(ControlMsg::Completed {
                id,
                terminal,
                next_state,
            })
            .await
        {
            Ok(()) => return,
            Err(mpsc::error::SendError(ControlMsg::Completed { terminal, .. })) => terminal,
            Err(_) => return,
        },
        None => terminal,
    };
    warn!(command, execution = %id, "runtime controller gone; publishing outcome directly");
    publish_status(bus, command, id, unsent.status());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{CategoryDef, CategorySelector, CommandDef, StateSelector};
    use crate::handle::RuntimeHandle;
    use crate::params::MemoryPersistence;
    use crate::robot::Robot;
    use crate::testing::{Forever, Immediate, Panicking, Rejecting, WAIT, WaitForInfo, armed_robot};
    use armature_kernel::disarm_fn;
    use armature_middleware::Subscription;
    use serde_json::json;

    fn transitions(sub: &mut Subscription) -> Vec<(String, String)> {
        let mut out = Vec::new();
        while let Some(event) = sub.try_recv() {
            if let EventPayload::StateTransition { from, to } = event.payload {
                out.push((from.to_string(), to.to_string()));
            }
        }
        out
    }

    fn pair(from: &str, to: &str) -> (String, String) {
        (from.to_string(), to.to_string())
    }

    #[tokio::test]
    async fn commands_wait_for_the_robot_to_be_armed() {
        let descriptor = RobotDescriptor::builder()
            .command(CommandDef::new("beep", || Immediate::new(json!("beep"))))
            .build()
            .unwrap();
        let robot = Robot::start(descriptor, &crate::config::Config::default());
        let runtime = robot.runtime();

        assert_eq!(
            runtime.execute("beep", Value::Null).await.unwrap_err(),
            RuntimeError::StateNotAllowed {
                current: StateName::disarmed(),
                allowed: vec![StateName::idle()],
            }
        );

        robot.safety().arm().await.unwrap();
        assert_eq!(runtime.base_state().await, Ok(StateName::idle()));
        let mut handle = runtime.execute("beep", Value::Null).await.unwrap();
        assert_eq!(handle.wait(WAIT).await, Ok(json!("beep")));
    }

    #[tokio::test]
    async fn unknown_command_is_rejected() {
        let robot = armed_robot(RobotDescriptor::builder().build().unwrap()).await;
        assert_eq!(
            robot.runtime().execute("fly", Value::Null).await.unwrap_err(),
            RuntimeError::UnknownCommand("fly".into())
        );
    }

    #[tokio::test]
    async fn busy_robot_rejects_idle_only_commands() {
        let descriptor = RobotDescriptor::builder()
            .command(CommandDef::new("a", || WaitForInfo))
            .command(CommandDef::new("b", || Immediate::new(json!("b"))))
            .build()
            .unwrap();
        let robot = armed_robot(descriptor).await;
        let runtime = robot.runtime();

        let mut a = runtime.execute("a", Value::Null).await.unwrap();
        assert_eq!(runtime.operational_state().await, Ok(StateName::executing()));

        let rejected = runtime.execute("b", Value::Null).await.unwrap_err();
        assert_eq!(
            rejected,
            RuntimeError::StateNotAllowed {
                current: StateName::executing(),
                allowed: vec![StateName::idle()],
            }
        );
        assert_eq!(runtime.executions().await.unwrap().len(), 1, "rejection must not mutate");

        a.send(json!("done")).await.unwrap();
        assert_eq!(a.wait(WAIT).await, Ok(json!("done")));
        assert_eq!(runtime.operational_state().await, Ok(StateName::idle()));

        let mut b = runtime.execute("b", Value::Null).await.unwrap();
        assert_eq!(b.wait(WAIT).await, Ok(json!("b")));
    }

    #[tokio::test]
    async fn category_limit_bounds_concurrency() {
        let descriptor = RobotDescriptor::builder()
            .category(CategoryDef::new("motion", 2))
            .command(
                CommandDef::new("move", || Forever)
                    .category("motion")
                    .allowed_states(StateSelector::only(["idle", "executing"])),
            )
            .build()
            .unwrap();
        let robot = armed_robot(descriptor).await;
        let runtime = robot.runtime();

        runtime.execute("move", Value::Null).await.unwrap();
        runtime.execute("move", Value::Null).await.unwrap();
        assert_eq!(
            runtime.execute("move", Value::Null).await.unwrap_err(),
            RuntimeError::CategoryFull {
                category: CategoryName::from("motion"),
                limit: 2,
                current: 2,
            }
        );

        let availability = runtime.category_availability().await.unwrap();
        let motion = availability[&CategoryName::from("motion")];
        assert_eq!((motion.limit, motion.running, motion.available), (2, 2, 0));
        assert!(runtime.executing_category(&CategoryName::from("motion")).await.unwrap());
        assert!(!runtime.executing_category(&CategoryName::default_category()).await.unwrap());
    }

    #[tokio::test]
    async fn pre_emption_cancels_the_running_execution() {
        let descriptor = RobotDescriptor::builder()
            .command(
                CommandDef::new("a", || Forever).cancels(CategorySelector::only(["default"])),
            )
            .command(
                CommandDef::new("b", || Forever)
                    .allowed_states(StateSelector::only(["idle", "executing"]))
                    .cancels(CategorySelector::only(["default"])),
            )
            .build()
            .unwrap();
        let robot = armed_robot(descriptor).await;
        let runtime = robot.runtime();
        let mut states = robot.bus().subscribe(EventPath::state_machine());

        let mut a = runtime.execute("a", Value::Null).await.unwrap();
        let b = runtime.execute("b", Value::Null).await.unwrap();

        assert_eq!(a.wait(WAIT).await, Err(RuntimeError::Cancelled));
        let running = runtime.executions().await.unwrap();
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].id, b.id());
        assert_eq!(running[0].command, "b");
        // The swap happens inside one admission: no trip through idle.
        assert_eq!(transitions(&mut states), vec![pair("idle", "executing")]);
    }

    #[tokio::test]
    async fn full_category_without_cancel_rule_is_not_pre_empted() {
        let descriptor = RobotDescriptor::builder()
            .command(CommandDef::new("a", || Forever))
            .command(
                CommandDef::new("b", || Forever).allowed_states(StateSelector::All),
            )
            .build()
            .unwrap();
        let robot = armed_robot(descriptor).await;
        let runtime = robot.runtime();

        runtime.execute("a", Value::Null).await.unwrap();
        assert!(matches!(
            runtime.execute("b", Value::Null).await,
            Err(RuntimeError::CategoryFull { limit: 1, current: 1, .. })
        ));
    }

    #[tokio::test]
    async fn crashed_executor_folds_into_idle() {
        let descriptor = RobotDescriptor::builder()
            .command(CommandDef::new("crash", || Panicking))
            .build()
            .unwrap();
        let robot = armed_robot(descriptor).await;
        let runtime = robot.runtime();

        let mut handle = runtime.execute("crash", Value::Null).await.unwrap();
        assert_eq!(
            handle.wait(WAIT).await,
            Err(RuntimeError::HandlerError {
                reason: "executor crashed".into()
            })
        );
        assert_eq!(runtime.operational_state().await, Ok(StateName::idle()));
        let availability = runtime.category_availability().await.unwrap();
        assert_eq!(availability[&CategoryName::default_category()].available, 1);
    }

    #[tokio::test]
    async fn rejected_goal_fails_the_execution() {
        let descriptor = RobotDescriptor::builder()
            .command(CommandDef::new("picky", || Rejecting))
            .build()
            .unwrap();
        let robot = armed_robot(descriptor).await;

        let mut handle = robot.runtime().execute("picky", Value::Null).await.unwrap();
        assert_eq!(
            handle.wait(WAIT).await,
            Err(RuntimeError::HandlerError {
                reason: "goal rejected".into()
            })
        );
        assert_eq!(robot.runtime().executing().await, Ok(false));
    }

    #[tokio::test]
    async fn command_timeout_aborts_the_execution() {
        let descriptor = RobotDescriptor::builder()
            .command(CommandDef::new("stall", || Forever).timeout(Duration::from_millis(50)))
            .build()
            .unwrap();
        let robot = armed_robot(descriptor).await;

        let mut handle = robot.runtime().execute("stall", Value::Null).await.unwrap();
        match handle.wait(WAIT).await {
            Err(RuntimeError::HandlerError { reason }) => assert!(reason.contains("timed out")),
            other => panic!("expected a timeout failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancel_publishes_before_killing_and_lands_on_fallback() {
        let descriptor = RobotDescriptor::builder()
            .state("parked")
            .command(
                CommandDef::new("park", || Forever)
                    .fallback_state("parked")
                    .cancel_result(json!({"parked": false})),
            )
            .build()
            .unwrap();
        let robot = armed_robot(descriptor).await;
        let runtime = robot.runtime();

        let mut handle = runtime.execute("park", Value::Null).await.unwrap();
        let mut lifecycle = robot.bus().subscribe(EventPath::execution("park", handle.id()));
        runtime.cancel_execution(handle.id()).await.unwrap();

        assert_eq!(handle.wait(WAIT).await, Err(RuntimeError::Cancelled));
        let mut terminals = Vec::new();
        while let Some(event) = lifecycle.try_recv() {
            if let EventPayload::Command(cmd) = event.payload
                && cmd.status.is_terminal()
            {
                terminals.push(cmd.status);
            }
        }
        assert_eq!(
            terminals,
            vec![CommandStatus::Cancelled {
                result: json!({"parked": false})
            }],
            "exactly one terminal event"
        );
        assert_eq!(runtime.base_state().await, Ok(StateName::from("parked")));
        assert_eq!(
            runtime.cancel_execution(handle.id()).await,
            Err(RuntimeError::UnknownExecution(handle.id()))
        );
    }

    #[tokio::test]
    async fn cancel_category_and_cancel_all_count_their_victims() {
        let descriptor = RobotDescriptor::builder()
            .category(CategoryDef::new("motion", 2))
            .category(CategoryDef::new("vision", 1))
            .command(
                CommandDef::new("move", || Forever)
                    .category("motion")
                    .allowed_states(StateSelector::All),
            )
            .command(
                CommandDef::new("look", || Forever)
                    .category("vision")
                    .allowed_states(StateSelector::All),
            )
            .build()
            .unwrap();
        let robot = armed_robot(descriptor).await;
        let runtime = robot.runtime();

        runtime.execute("move", Value::Null).await.unwrap();
        runtime.execute("move", Value::Null).await.unwrap();
        runtime.execute("look", Value::Null).await.unwrap();

        assert_eq!(runtime.cancel_category("motion").await, Ok(2));
        assert_eq!(runtime.executions().await.unwrap().len(), 1);
        assert_eq!(runtime.cancel().await, Ok(1));
        assert_eq!(runtime.operational_state().await, Ok(StateName::idle()));
    }

    #[tokio::test]
    async fn next_state_is_honoured_and_transitions_are_published() {
        let descriptor = RobotDescriptor::builder()
            .state("parked")
            .command(CommandDef::new("park", || Immediate::new(json!("ok")).then("parked")))
            .command(
                CommandDef::new("confused", || Immediate::new(json!("ok")).then("nowhere"))
                    .allowed_states(StateSelector::All),
            )
            .build()
            .unwrap();
        let robot = armed_robot(descriptor).await;
        let runtime = robot.runtime();
        let mut states = robot.bus().subscribe(EventPath::state_machine());

        runtime.execute("park", Value::Null).await.unwrap().wait(WAIT).await.unwrap();
        assert_eq!(runtime.base_state().await, Ok(StateName::from("parked")));
        assert_eq!(
            transitions(&mut states),
            vec![pair("idle", "executing"), pair("executing", "parked")]
        );

        runtime.execute("confused", Value::Null).await.unwrap().wait(WAIT).await.unwrap();
        assert_eq!(runtime.base_state().await, Ok(StateName::idle()));
    }

    #[tokio::test]
    async fn disarming_cancels_executions_and_locks_admission() {
        let descriptor = RobotDescriptor::builder()
            .command(CommandDef::new("spin", || Forever).allowed_states(StateSelector::All))
            .build()
            .unwrap();
        let robot = armed_robot(descriptor).await;
        let runtime = robot.runtime();
        let safety = robot.safety();
        safety
            .register(
                "motor",
                EventPath::parse("base/motor"),
                Value::Null,
                disarm_fn(|_| async {
                    tokio::time::sleep(Duration::from_millis(150)).await;
                    Ok::<(), String>(())
                }),
            )
            .unwrap();

        let mut spin = runtime.execute("spin", Value::Null).await.unwrap();
        let disarm = {
            let safety = safety.clone();
            tokio::spawn(async move { safety.disarm().await })
        };

        assert_eq!(spin.wait(WAIT).await, Err(RuntimeError::Cancelled));
        // The motor callback is still running, so the robot is mid-disarm.
        assert_eq!(
            runtime.execute("spin", Value::Null).await.unwrap_err(),
            RuntimeError::SafetyLocked {
                state: SafetyState::Disarming
            }
        );

        disarm.await.unwrap().unwrap();
        assert_eq!(runtime.base_state().await, Ok(StateName::disarmed()));
        assert_eq!(runtime.executing().await, Ok(false));
    }

    #[tokio::test]
    async fn error_state_locks_admission_until_force_disarm() {
        let descriptor = RobotDescriptor::builder()
            .command(CommandDef::new("spin", || Forever).allowed_states(StateSelector::All))
            .build()
            .unwrap();
        let robot = armed_robot(descriptor).await;
        let safety = robot.safety();
        safety
            .register(
                "brake",
                EventPath::parse("base/brake"),
                Value::Null,
                disarm_fn(|_| async { Err::<(), String>("brake stuck".into()) }),
            )
            .unwrap();

        assert!(safety.disarm().await.is_err());
        assert_eq!(
            robot.runtime().execute("spin", Value::Null).await.unwrap_err(),
            RuntimeError::SafetyLocked {
                state: SafetyState::Error
            }
        );

        safety.force_disarm().await.unwrap();
        assert!(robot.runtime().execute("spin", Value::Null).await.is_ok());
    }

    #[tokio::test]
    async fn disarm_hidden_by_a_rearm_still_cancels() {
        let descriptor = RobotDescriptor::builder()
            .command(CommandDef::new("spin", || Forever).allowed_states(StateSelector::All))
            .build()
            .unwrap();
        let (signal, safety) = watch::channel(SafetySignal {
            state: SafetyState::Armed,
            disarms: 0,
        });
        let runtime = RuntimeHandle::spawn(
            Arc::clone(&descriptor),
            EventBus::default(),
            StateStore::new(&descriptor),
            safety,
            &RuntimeConfig::default(),
            None,
        );
        let mut spin = runtime.execute("spin", Value::Null).await.unwrap();

        // The runtime only ever sees the end of a disarm-then-arm cycle.
        signal.send_replace(SafetySignal {
            state: SafetyState::Armed,
            disarms: 1,
        });

        assert_eq!(spin.wait(WAIT).await, Err(RuntimeError::Cancelled));
        assert_eq!(runtime.executing().await, Ok(false));
        assert_eq!(runtime.base_state().await, Ok(StateName::idle()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn back_to_back_disarm_and_arm_never_leaves_an_execution_running() {
        let descriptor = RobotDescriptor::builder()
            .command(CommandDef::new("spin", || Forever).allowed_states(StateSelector::All))
            .build()
            .unwrap();
        let robot = armed_robot(descriptor).await;
        let runtime = robot.runtime();
        let safety = robot.safety();

        for round in 0..200 {
            let mut spin = runtime.execute("spin", Value::Null).await.unwrap();
            safety.disarm().await.unwrap();
            safety.arm().await.unwrap();
            assert_eq!(spin.wait(WAIT).await, Err(RuntimeError::Cancelled), "round {round}");
        }
        assert_eq!(runtime.executing().await, Ok(false));
    }

    #[tokio::test]
    async fn finished_executions_leave_no_bus_channels_behind() {
        let descriptor = RobotDescriptor::builder()
            .command(CommandDef::new("beep", || Immediate::new(json!("beep"))))
            .build()
            .unwrap();
        let robot = armed_robot(descriptor).await;
        let baseline = robot.bus().channel_count();

        for _ in 0..100 {
            let mut beep = robot.runtime().execute("beep", Value::Null).await.unwrap();
            assert_eq!(beep.wait(WAIT).await, Ok(json!("beep")));
        }
        assert_eq!(robot.bus().channel_count(), baseline);
    }

    #[tokio::test]
    async fn bound_parameters_patch_limits_and_timeouts() {
        let persistence = MemoryPersistence::new();
        let descriptor = RobotDescriptor::builder()
            .category(CategoryDef::new("motion", 1).limit_param("limits/motion"))
            .command(
                CommandDef::new("move", || Forever)
                    .category("motion")
                    .allowed_states(StateSelector::All),
            )
            .command(
                CommandDef::new("stall", || Forever)
                    .allowed_states(StateSelector::All)
                    .timeout_param("timeouts/stall"),
            )
            .parameter("motion/max_speed", json!(0.5))
            .build()
            .unwrap();
        let robot = Robot::start_with(
            descriptor,
            &crate::config::Config::default(),
            Some(Arc::new(persistence.clone())),
        );
        robot.safety().arm().await.unwrap();
        let runtime = robot.runtime();
        let mut changes = robot.bus().subscribe(EventPath::new(["param"]));

        runtime.execute("move", Value::Null).await.unwrap();
        assert!(matches!(
            runtime.execute("move", Value::Null).await,
            Err(RuntimeError::CategoryFull { .. })
        ));

        runtime.set_parameter("limits/motion", json!(2)).await.unwrap();
        runtime.execute("move", Value::Null).await.unwrap();
        assert_eq!(
            robot.store().parameter(&EventPath::parse("limits/motion")),
            Some(json!(2))
        );

        let below = runtime.set_parameter("limits/motion", json!(1)).await;
        assert!(matches!(below, Err(RuntimeError::ParameterRejected { .. })));
        let wrong_shape = runtime.set_parameter("motion/max_speed", json!("fast")).await;
        assert!(matches!(wrong_shape, Err(RuntimeError::ParameterRejected { .. })));
        assert_eq!(
            robot.store().parameter(&EventPath::parse("motion/max_speed")),
            Some(json!(0.5))
        );

        runtime.set_parameter("timeouts/stall", json!(40)).await.unwrap();
        let mut stall = runtime.execute("stall", Value::Null).await.unwrap();
        assert!(matches!(stall.wait(WAIT).await, Err(RuntimeError::HandlerError { .. })));

        match changes.recv().await.map(|e| e.payload) {
            Some(EventPayload::ParameterChanged { path, value }) => {
                assert_eq!(path, EventPath::parse("limits/motion"));
                assert_eq!(value, json!(2));
            }
            other => panic!("expected a parameter change, got {other:?}"),
        }
        for _ in 0..50 {
            if persistence.get(&EventPath::parse("timeouts/stall")).is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(persistence.get(&EventPath::parse("limits/motion")), Some(json!(2)));
        assert_eq!(persistence.get(&EventPath::parse("timeouts/stall")), Some(json!(40)));
    }

    #[tokio::test]
    async fn joint_positions_are_stored_and_published() {
        let robot = armed_robot(RobotDescriptor::builder().build().unwrap()).await;
        let mut sensor = robot.bus().subscribe(EventPath::joint_positions());

        robot
            .runtime()
            .set_joint_positions(BTreeMap::from([("elbow".to_string(), 1.25)]))
            .await
            .unwrap();

        assert_eq!(robot.store().joint_position("elbow"), Some(1.25));
        match sensor.recv().await.map(|e| e.payload) {
            Some(EventPayload::JointPositions(positions)) => assert_eq!(positions["elbow"], 1.25),
            other => panic!("expected joint positions, got {other:?}"),
        }
    }
}
