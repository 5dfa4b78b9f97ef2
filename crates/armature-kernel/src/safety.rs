//! Safety controller – the arm/disarm state machine.
//!
//! A single actor task owns the [`SafetyState`] and serializes every arm,
//! disarm, force-disarm and hardware-error request through its inbox.  The
//! current state is mirrored into a [`watch`] channel as a [`SafetySignal`]
//! so that readers (including the runtime controller) never have to queue
//! behind a disarm.  A watch only keeps the latest value, so the signal also
//! counts how many times the controller has left `armed`: a reader that
//! misses a whole disarm-then-arm cycle still sees the counter move.
//!
//! ```text
//!            arm                disarm / hardware error
//! disarmed ───────► armed ────────────────────────────► disarming
//!    ▲                                                    │    │
//!    │              all callbacks succeeded               │    │ any failure
//!    └────────────────────────────────────────────────────┘    ▼
//!    ▲                                                        error
//!    └──────────────────────── force_disarm ───────────────────┘
//! ```
//!
//! The disarm fan-out runs in its own task and reports back through the
//! inbox, so state reads and concurrent registrations stay responsive while
//! callbacks are in flight.

use std::time::Duration;

use armature_middleware::EventBus;
use armature_types::{
    ComponentId, DisarmCallbackFailure, EventPath, EventPayload, SafetyError, SafetyState,
};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

use crate::config::{HardwareErrorPolicy, SafetyConfig};
use crate::disarm::{DisarmCallback, DisarmRegistry, disarm_all};

type Reply = oneshot::Sender<Result<(), SafetyError>>;

/// The value published on the safety watch channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SafetySignal {
    pub state: SafetyState,
    /// Incremented every time the state leaves `armed`.
    pub disarms: u64,
}

impl SafetySignal {
    fn initial() -> Self {
        Self {
            state: SafetyState::Disarmed,
            disarms: 0,
        }
    }
}

enum SafetyMsg {
    Arm { reply: Reply },
    /// `reply` is `None` when the disarm was triggered internally.
    Disarm { reply: Option<Reply> },
    ForceDisarm { reply: Reply },
    ReportError { path: EventPath, message: String },
    DisarmFinished { failures: Vec<DisarmCallbackFailure> },
    Shutdown { reply: oneshot::Sender<()> },
}

// ────────────────────────────────────────────────────────────────────────────
// Actor
// ────────────────────────────────────────────────────────────────────────────

struct SafetyController {
    state: SafetyState,
    state_tx: watch::Sender<SafetySignal>,
    bus: EventBus,
    registry: DisarmRegistry,
    config: SafetyConfig,
    self_tx: mpsc::WeakSender<SafetyMsg>,
    disarm_waiters: Vec<Reply>,
    shutdown_waiters: Vec<oneshot::Sender<()>>,
}

impl SafetyController {
    async fn run(mut self, mut inbox: mpsc::Receiver<SafetyMsg>) {
        info!(disarm_timeout_ms = self.config.disarm_timeout_ms, "safety controller started");

        while let Some(msg) = inbox.recv().await {
            match msg {
                SafetyMsg::Arm { reply } => {
                    let _ = reply.send(self.arm());
                }
                SafetyMsg::Disarm { reply } => self.disarm(reply).await,
                SafetyMsg::ForceDisarm { reply } => {
                    let _ = reply.send(self.force_disarm());
                }
                SafetyMsg::ReportError { path, message } => {
                    self.report_error(path, message).await;
                }
                SafetyMsg::DisarmFinished { failures } => self.finish_disarm(failures),
                SafetyMsg::Shutdown { reply } => {
                    if self.state.is_armed() {
                        self.start_disarm().await;
                    }
                    self.shutdown_waiters.push(reply);
                }
            }

            if !self.shutdown_waiters.is_empty() && self.state != SafetyState::Disarming {
                for reply in self.shutdown_waiters.drain(..) {
                    let _ = reply.send(());
                }
                info!(state = %self.state, "safety controller shut down");
                return;
            }
        }

        if self.state.is_armed() && self.config.disarm_on_shutdown {
            warn!("safety inbox closed while armed; disarming");
            self.transition(SafetyState::Disarming);
            let failures = disarm_all(self.registry.snapshot(), self.config.disarm_timeout()).await;
            self.finish_disarm(failures);
        }
        debug!(state = %self.state, "safety controller stopped");
    }

    fn arm(&mut self) -> Result<(), SafetyError> {
        match self.state {
            SafetyState::Disarmed => {
                self.transition(SafetyState::Armed);
                Ok(())
            }
            SafetyState::Armed => Err(SafetyError::AlreadyArmed),
            SafetyState::Disarming => Err(SafetyError::Disarming),
            SafetyState::Error => Err(SafetyError::Faulted),
        }
    }

    async fn disarm(&mut self, reply: Option<Reply>) {
        let refusal = match self.state {
            SafetyState::Armed => None,
            SafetyState::Disarmed => Some(SafetyError::NotArmed),
            SafetyState::Disarming => Some(SafetyError::Disarming),
            SafetyState::Error => Some(SafetyError::Faulted),
        };
        match (refusal, reply) {
            (None, reply) => {
                self.disarm_waiters.extend(reply);
                self.start_disarm().await;
            }
            (Some(err), Some(reply)) => {
                let _ = reply.send(Err(err));
            }
            (Some(err), None) => debug!(error = %err, "internal disarm skipped"),
        }
    }

    fn force_disarm(&mut self) -> Result<(), SafetyError> {
        if self.state != SafetyState::Error {
            return Err(SafetyError::NotInErrorState);
        }
        warn!("force disarm acknowledged; hardware state must be verified by the operator");
        self.transition(SafetyState::Disarmed);
        Ok(())
    }

    async fn report_error(&mut self, path: EventPath, message: String) {
        warn!(component = %path, error = %message, policy = %self.config.on_hardware_error, "hardware error reported");
        self.bus.publish(
            EventPath::hardware_error(),
            EventPayload::HardwareError {
                path,
                message,
            },
        );
        if self.config.on_hardware_error == HardwareErrorPolicy::Disarm && self.state.is_armed() {
            self.start_disarm().await;
        }
    }

    /// Enter `disarming` and launch the callback fan-out.
    ///
    /// The fan-out reports back through the inbox.  When no sender is left to
    /// report with, it runs inline instead.
    async fn start_disarm(&mut self) {
        self.transition(SafetyState::Disarming);
        let registrations = self.registry.snapshot();
        let timeout = self.config.disarm_timeout();
        info!(components = registrations.len(), ?timeout, "disarming");

        match self.self_tx.upgrade() {
            Some(tx) => {
                tokio::spawn(async move {
                    let failures = disarm_all(registrations, timeout).await;
                    if tx.send(SafetyMsg::DisarmFinished { failures }).await.is_err() {
                        error!("safety controller gone before disarm finished");
                    }
                });
            }
            None => {
                let failures = disarm_all(registrations, timeout).await;
                self.finish_disarm(failures);
            }
        }
    }

    fn finish_disarm(&mut self, failures: Vec<DisarmCallbackFailure>) {
        let outcome = if failures.is_empty() {
            self.transition(SafetyState::Disarmed);
            Ok(())
        } else {
            error!(failed = failures.len(), "disarm failed; entering error state");
            self.transition(SafetyState::Error);
            Err(SafetyError::DisarmFailed { failures })
        };
        for waiter in self.disarm_waiters.drain(..) {
            let _ = waiter.send(outcome.clone());
        }
    }

    fn transition(&mut self, to: SafetyState) {
        let from = self.state;
        if from == to {
            return;
        }
        self.state = to;
        self.state_tx.send_modify(|signal| {
            if from.is_armed() {
                signal.disarms += 1;
            }
            signal.state = to;
        });
        info!(%from, %to, "safety state changed");
        self.bus
            .publish(EventPath::safety_state(), EventPayload::SafetyTransition { from, to });
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Handle
// ────────────────────────────────────────────────────────────────────────────

/// Cloneable handle to the safety controller.
///
/// Dropping every handle closes the controller's inbox; when that happens
/// while armed and `disarm_on_shutdown` is set, a last disarm is attempted.
#[derive(Clone)]
pub struct SafetyHandle {
    tx: mpsc::Sender<SafetyMsg>,
    state_rx: watch::Receiver<SafetySignal>,
    registry: DisarmRegistry,
}

impl SafetyHandle {
    /// Spawn the controller on the current Tokio runtime, starting `disarmed`.
    pub fn spawn(bus: EventBus, config: SafetyConfig) -> Self {
        let (tx, inbox) = mpsc::channel(config.inbox_capacity.max(1));
        let (state_tx, state_rx) = watch::channel(SafetySignal::initial());
        let registry = DisarmRegistry::new();

        let controller = SafetyController {
            state: SafetyState::Disarmed,
            state_tx,
            bus,
            registry: registry.clone(),
            config,
            self_tx: tx.downgrade(),
            disarm_waiters: Vec::new(),
            shutdown_waiters: Vec::new(),
        };
        tokio::spawn(controller.run(inbox));

        Self {
            tx,
            state_rx,
            registry,
        }
    }

    /// Register (or replace) the disarm callback of one component.
    ///
    /// Goes straight to the registry, so it never waits behind an in-flight
    /// arm or disarm.
    pub fn register(
        &self,
        component_id: impl Into<ComponentId>,
        path: EventPath,
        options: Value,
        callback: impl DisarmCallback,
    ) -> Result<(), SafetyError> {
        self.registry.register(component_id, path, options, callback)
    }

    pub fn unregister(&self, component_id: &ComponentId) -> bool {
        self.registry.unregister(component_id)
    }

    /// Ids of every registered component, sorted.
    pub fn registrations(&self) -> Vec<ComponentId> {
        self.registry.component_ids()
    }

    pub fn registry(&self) -> &DisarmRegistry {
        &self.registry
    }

    pub async fn arm(&self) -> Result<(), SafetyError> {
        self.request(|reply| SafetyMsg::Arm { reply }).await
    }

    /// Disarm and wait for every callback to settle.
    ///
    /// # Errors
    ///
    /// [`SafetyError::DisarmFailed`] lists each callback that failed, timed
    /// out or crashed; the controller is then in the error state.
    pub async fn disarm(&self) -> Result<(), SafetyError> {
        self.request(|reply| SafetyMsg::Disarm { reply: Some(reply) })
            .await
    }

    /// Acknowledge a failed disarm and return to `disarmed`.
    pub async fn force_disarm(&self) -> Result<(), SafetyError> {
        self.request(|reply| SafetyMsg::ForceDisarm { reply }).await
    }

    /// Report a hardware fault from the component at `path`.
    pub async fn report_error(
        &self,
        path: EventPath,
        error: impl Into<String>,
    ) -> Result<(), SafetyError> {
        self.tx
            .send(SafetyMsg::ReportError {
                path,
                message: error.into(),
            })
            .await
            .map_err(|_| SafetyError::Unavailable)
    }

    /// Disarm if armed, then stop the controller.
    pub async fn shutdown(&self) -> Result<(), SafetyError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(SafetyMsg::Shutdown { reply })
            .await
            .map_err(|_| SafetyError::Unavailable)?;
        rx.await.map_err(|_| SafetyError::Unavailable)
    }

    /// Current safety state, read without queueing behind the controller.
    pub fn state(&self) -> SafetyState {
        self.state_rx.borrow().state
    }

    pub fn armed(&self) -> bool {
        self.state().is_armed()
    }

    /// A receiver that observes the latest [`SafetySignal`].
    ///
    /// Intermediate states may be skipped; compare
    /// [`disarms`](SafetySignal::disarms) to detect a missed disarm.
    pub fn subscribe_state(&self) -> watch::Receiver<SafetySignal> {
        self.state_rx.clone()
    }

    /// Wait until the controller reaches `target` or `timeout` expires.
    pub async fn wait_for_state(&self, target: SafetyState, timeout: Duration) -> bool {
        let mut rx = self.state_rx.clone();
        matches!(
            tokio::time::timeout(timeout, rx.wait_for(|signal| signal.state == target)).await,
            Ok(Ok(_))
        )
    }

    async fn request(
        &self,
        make: impl FnOnce(Reply) -> SafetyMsg,
    ) -> Result<(), SafetyError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| SafetyError::Unavailable)?;
        rx.await.map_err(|_| SafetyError::Unavailable)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disarm_fn;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    fn counting(counter: &Arc<AtomicUsize>) -> impl DisarmCallback {
        let counter = counter.clone();
        disarm_fn(move |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<(), String>(())
            }
        })
    }

    fn failing(reason: &'static str) -> impl DisarmCallback {
        disarm_fn(move |_| async move { Err::<(), String>(reason.to_string()) })
    }

    fn slow(delay: Duration) -> impl DisarmCallback {
        disarm_fn(move |_| async move {
            tokio::time::sleep(delay).await;
            Ok::<(), String>(())
        })
    }

    struct Crashes;

    #[async_trait::async_trait]
    impl DisarmCallback for Crashes {
        async fn disarm(&self, _options: &Value) -> Result<(), String> {
            panic!("servo driver fault")
        }
    }

    fn spawn_with(config: SafetyConfig) -> (EventBus, SafetyHandle) {
        let bus = EventBus::default();
        let safety = SafetyHandle::spawn(bus.clone(), config);
        (bus, safety)
    }

    fn spawn() -> (EventBus, SafetyHandle) {
        spawn_with(SafetyConfig::default())
    }

    #[tokio::test]
    async fn arm_then_disarm_runs_every_callback() {
        let (_bus, safety) = spawn();
        let a = Arc::new(AtomicUsize::new(0));
        let b = Arc::new(AtomicUsize::new(0));
        safety.register("base", EventPath::parse("base"), Value::Null, counting(&a)).unwrap();
        safety.register("arm", EventPath::parse("arm"), Value::Null, counting(&b)).unwrap();

        assert_eq!(safety.state(), SafetyState::Disarmed);
        safety.arm().await.unwrap();
        assert!(safety.armed());

        safety.disarm().await.unwrap();
        assert_eq!(safety.state(), SafetyState::Disarmed);
        assert_eq!(a.load(Ordering::SeqCst), 1);
        assert_eq!(b.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn arm_and_disarm_refuse_from_wrong_state() {
        let (_bus, safety) = spawn();
        assert_eq!(safety.disarm().await, Err(SafetyError::NotArmed));
        safety.arm().await.unwrap();
        assert_eq!(safety.arm().await, Err(SafetyError::AlreadyArmed));
        assert_eq!(safety.force_disarm().await, Err(SafetyError::NotInErrorState));
    }

    #[tokio::test]
    async fn failed_callback_enters_error_until_force_disarm() {
        let (_bus, safety) = spawn();
        let ok = Arc::new(AtomicUsize::new(0));
        safety.register("comp1", EventPath::parse("comp1"), Value::Null, counting(&ok)).unwrap();
        safety
            .register("comp2", EventPath::parse("comp2"), Value::Null, failing("brake stuck"))
            .unwrap();

        safety.arm().await.unwrap();
        match safety.disarm().await {
            Err(SafetyError::DisarmFailed { failures }) => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].component, ComponentId::from("comp2"));
                assert_eq!(failures[0].reason, "brake stuck");
            }
            other => panic!("expected DisarmFailed, got {other:?}"),
        }
        assert_eq!(safety.state(), SafetyState::Error);
        assert_eq!(ok.load(Ordering::SeqCst), 1, "healthy callback still ran");

        assert_eq!(safety.arm().await, Err(SafetyError::Faulted));
        safety.force_disarm().await.unwrap();
        assert_eq!(safety.state(), SafetyState::Disarmed);
        assert_eq!(safety.force_disarm().await, Err(SafetyError::NotInErrorState));
    }

    #[tokio::test]
    async fn hung_callback_is_bounded_by_the_timeout() {
        let (_bus, safety) = spawn_with(SafetyConfig {
            disarm_timeout_ms: 100,
            ..SafetyConfig::default()
        });
        let healthy = Arc::new(AtomicUsize::new(0));
        safety.register("wheels", EventPath::parse("base/wheels"), Value::Null, counting(&healthy)).unwrap();
        safety.register("lift", EventPath::parse("base/lift"), Value::Null, counting(&healthy)).unwrap();
        safety
            .register(
                "hangs",
                EventPath::root(),
                Value::Null,
                disarm_fn(|_| async {
                    std::future::pending::<()>().await;
                    Ok::<(), String>(())
                }),
            )
            .unwrap();
        safety.arm().await.unwrap();

        let started = Instant::now();
        let result = safety.disarm().await;
        assert!(started.elapsed() < Duration::from_secs(1));
        match result {
            Err(SafetyError::DisarmFailed { failures }) => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].component, ComponentId::from("hangs"));
            }
            other => panic!("expected DisarmFailed, got {other:?}"),
        }
        assert_eq!(healthy.load(Ordering::SeqCst), 2);
        assert_eq!(safety.state(), SafetyState::Error);
    }

    #[tokio::test]
    async fn crashing_callback_counts_as_failure() {
        let (_bus, safety) = spawn();
        safety.register("crashes", EventPath::root(), Value::Null, Crashes).unwrap();
        safety.arm().await.unwrap();

        match safety.disarm().await {
            Err(SafetyError::DisarmFailed { failures }) => {
                assert_eq!(failures[0].reason, "callback crashed");
            }
            other => panic!("expected DisarmFailed, got {other:?}"),
        }
        assert_eq!(safety.state(), SafetyState::Error);
    }

    #[tokio::test]
    async fn requests_during_disarm_see_disarming() {
        let (_bus, safety) = spawn();
        safety
            .register("slow", EventPath::root(), Value::Null, slow(Duration::from_millis(200)))
            .unwrap();
        safety.arm().await.unwrap();

        let background = safety.clone();
        let disarm = tokio::spawn(async move { background.disarm().await });
        assert!(safety.wait_for_state(SafetyState::Disarming, Duration::from_secs(1)).await);

        assert_eq!(safety.arm().await, Err(SafetyError::Disarming));
        assert_eq!(safety.disarm().await, Err(SafetyError::Disarming));
        // Registration bypasses the inbox entirely.
        safety.register("late", EventPath::root(), Value::Null, slow(Duration::ZERO)).unwrap();

        disarm.await.unwrap().unwrap();
        assert_eq!(safety.state(), SafetyState::Disarmed);
        assert_eq!(safety.registrations().len(), 2);
    }

    #[tokio::test]
    async fn hardware_error_disarms_under_default_policy() {
        let (bus, safety) = spawn();
        let mut faults = bus.subscribe(EventPath::hardware_error());
        let ran = Arc::new(AtomicUsize::new(0));
        safety.register("gripper", EventPath::parse("arm/gripper"), Value::Null, counting(&ran)).unwrap();
        safety.arm().await.unwrap();

        safety
            .report_error(EventPath::parse("arm/gripper"), "overcurrent")
            .await
            .unwrap();

        assert!(safety.wait_for_state(SafetyState::Disarmed, Duration::from_secs(1)).await);
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        match faults.recv().await.map(|e| e.payload) {
            Some(EventPayload::HardwareError { path, message }) => {
                assert_eq!(path, EventPath::parse("arm/gripper"));
                assert_eq!(message, "overcurrent");
            }
            other => panic!("expected hardware error event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn hardware_error_is_only_logged_under_ignore_policy() {
        let (_bus, safety) = spawn_with(SafetyConfig {
            on_hardware_error: HardwareErrorPolicy::Ignore,
            ..SafetyConfig::default()
        });
        safety.arm().await.unwrap();
        safety.report_error(EventPath::parse("base"), "wheel slip").await.unwrap();

        // A follow-up request is processed after the report, so the state is settled.
        assert_eq!(safety.arm().await, Err(SafetyError::AlreadyArmed));
        assert_eq!(safety.state(), SafetyState::Armed);
    }

    #[tokio::test]
    async fn transitions_are_published_on_the_bus() {
        let (bus, safety) = spawn();
        let mut sub = bus.subscribe(EventPath::safety());

        safety.arm().await.unwrap();
        safety.disarm().await.unwrap();

        let mut seen = Vec::new();
        while let Some(event) = sub.try_recv() {
            if let EventPayload::SafetyTransition { from, to } = event.payload {
                seen.push((from, to));
            }
        }
        assert_eq!(
            seen,
            vec![
                (SafetyState::Disarmed, SafetyState::Armed),
                (SafetyState::Armed, SafetyState::Disarming),
                (SafetyState::Disarming, SafetyState::Disarmed),
            ]
        );
    }

    #[tokio::test]
    async fn shutdown_disarms_then_stops() {
        let (_bus, safety) = spawn();
        let ran = Arc::new(AtomicUsize::new(0));
        safety.register("base", EventPath::root(), Value::Null, counting(&ran)).unwrap();
        safety.arm().await.unwrap();

        safety.shutdown().await.unwrap();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert_eq!(safety.state(), SafetyState::Disarmed);
        assert_eq!(safety.arm().await, Err(SafetyError::Unavailable));
    }

    #[tokio::test]
    async fn concurrent_shutdowns_are_all_acknowledged() {
        let (_bus, safety) = spawn();
        safety
            .register("slow", EventPath::root(), Value::Null, slow(Duration::from_millis(200)))
            .unwrap();
        safety.arm().await.unwrap();

        let first = safety.clone();
        let first = tokio::spawn(async move { first.shutdown().await });
        assert!(safety.wait_for_state(SafetyState::Disarming, Duration::from_secs(1)).await);

        assert_eq!(safety.shutdown().await, Ok(()));
        assert_eq!(first.await.unwrap(), Ok(()));
        assert_eq!(safety.state(), SafetyState::Disarmed);
    }

    #[tokio::test]
    async fn dropping_every_handle_while_armed_disarms() {
        let (_bus, safety) = spawn();
        let ran = Arc::new(AtomicUsize::new(0));
        safety.register("base", EventPath::root(), Value::Null, counting(&ran)).unwrap();
        safety.arm().await.unwrap();

        let mut signal = safety.subscribe_state();
        drop(safety);

        // The watch closes once the controller task has finished.
        tokio::time::timeout(Duration::from_secs(1), async {
            while signal.changed().await.is_ok() {}
        })
        .await
        .unwrap();
        assert_eq!(signal.borrow().state, SafetyState::Disarmed);
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dropping_every_handle_skips_disarm_when_configured() {
        let (_bus, safety) = spawn_with(SafetyConfig {
            disarm_on_shutdown: false,
            ..SafetyConfig::default()
        });
        let ran = Arc::new(AtomicUsize::new(0));
        safety.register("base", EventPath::root(), Value::Null, counting(&ran)).unwrap();
        safety.arm().await.unwrap();

        let mut signal = safety.subscribe_state();
        drop(safety);

        tokio::time::timeout(Duration::from_secs(1), async {
            while signal.changed().await.is_ok() {}
        })
        .await
        .unwrap();
        assert_eq!(signal.borrow().state, SafetyState::Armed);
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn signal_counts_every_departure_from_armed() {
        let (_bus, safety) = spawn();
        safety.register("comp", EventPath::root(), Value::Null, failing("stuck")).unwrap();
        let signal = safety.subscribe_state();
        assert_eq!(signal.borrow().disarms, 0);

        safety.arm().await.unwrap();
        assert!(safety.disarm().await.is_err());
        safety.force_disarm().await.unwrap();
        assert_eq!(signal.borrow().disarms, 1);

        safety.unregister(&ComponentId::from("comp"));
        safety.arm().await.unwrap();
        safety.disarm().await.unwrap();
        safety.arm().await.unwrap();

        // A reader that only looks now sees `armed` again, but one more disarm.
        assert_eq!(
            *signal.borrow(),
            SafetySignal {
                state: SafetyState::Armed,
                disarms: 2,
            }
        );
    }
}
