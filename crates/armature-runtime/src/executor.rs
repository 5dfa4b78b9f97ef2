//! Command executor protocol.
//!
//! Every admitted invocation runs in its own Tokio task, driving one fresh
//! [`CommandHandler`] through a fixed lifecycle:
//!
//! 1. [`handle_goal`][CommandHandler::handle_goal] accepts or rejects the
//!    goal.  A rejection ends the execution as `aborted(reason)` and no
//!    `started` event is published.
//! 2. `started` is published and
//!    [`handle_execute`][CommandHandler::handle_execute] runs.
//! 3. Until the handler returns [`Step::Done`], every [`Info`] it receives
//!    (direct messages from the caller and events from bus subscriptions made
//!    through [`CommandContext::subscribe`]) is fed to
//!    [`handle_info`][CommandHandler::handle_info].
//!
//! The handler never touches the controller directly; its [`Completion`]
//! travels back through the controller's inbox.

use std::sync::Arc;
use std::time::Duration;

use armature_middleware::EventBus;
use armature_types::{
    CommandEvent, CommandStatus, Event, EventPath, EventPayload, ExecutionId, StateName,
};
use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream::{self, BoxStream, SelectAll};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

use crate::descriptor::RobotDescriptor;
use crate::store::StateStore;

// ────────────────────────────────────────────────────────────────────────────
// Outcomes
// ────────────────────────────────────────────────────────────────────────────

/// How an execution ended.  Produced exactly once per execution.
#[derive(Debug, Clone, PartialEq)]
pub enum Terminal {
    Succeeded(Value),
    Aborted(String),
    Canceled(Value),
}

impl Terminal {
    pub fn status(&self) -> CommandStatus {
        match self {
            Terminal::Succeeded(result) => CommandStatus::Succeeded {
                result: result.clone(),
            },
            Terminal::Aborted(reason) => CommandStatus::Failed {
                reason: reason.clone(),
            },
            Terminal::Canceled(result) => CommandStatus::Cancelled {
                result: result.clone(),
            },
        }
    }
}

/// A terminal outcome plus the operational state the robot should land in.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub terminal: Terminal,
    /// `None` lands on `idle`.
    pub next_state: Option<StateName>,
}

impl Completion {
    pub fn succeeded(result: Value) -> Self {
        Self {
            terminal: Terminal::Succeeded(result),
            next_state: None,
        }
    }

    pub fn aborted(reason: impl Into<String>) -> Self {
        Self {
            terminal: Terminal::Aborted(reason.into()),
            next_state: None,
        }
    }

    pub fn canceled(result: Value) -> Self {
        Self {
            terminal: Terminal::Canceled(result),
            next_state: None,
        }
    }

    /// Request a transition to `state` once the execution is over.
    pub fn then(mut self, state: impl Into<StateName>) -> Self {
        self.next_state = Some(state.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GoalResponse {
    Accept,
    Reject(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Continue,
    Done(Completion),
}

/// Input delivered to a running handler.
#[derive(Debug, Clone)]
pub enum Info {
    /// Sent through `ExecutionHandle::send` or `RuntimeHandle::send_info`.
    Message(Value),
    /// Published on a bus path the handler subscribed to.
    Event(Event),
}

// ────────────────────────────────────────────────────────────────────────────
// Handler traits
// ────────────────────────────────────────────────────────────────────────────

#[async_trait]
pub trait CommandHandler: Send + 'static {
    async fn handle_goal(&mut self, goal: Value, ctx: &mut CommandContext) -> GoalResponse;

    async fn handle_execute(&mut self, ctx: &mut CommandContext) -> Step;

    async fn handle_info(&mut self, _info: Info, _ctx: &mut CommandContext) -> Step {
        Step::Continue
    }
}

/// Creates one handler per execution.  Implemented for every
/// `Fn() -> impl CommandHandler`.
pub trait CommandFactory: Send + Sync + 'static {
    fn create(&self) -> Box<dyn CommandHandler>;
}

impl<F, C> CommandFactory for F
where
    F: Fn() -> C + Send + Sync + 'static,
    C: CommandHandler,
{
    fn create(&self) -> Box<dyn CommandHandler> {
        Box::new(self())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Context
// ────────────────────────────────────────────────────────────────────────────

/// What a handler can see and do while it runs.
pub struct CommandContext {
    execution_id: ExecutionId,
    command: String,
    bus: EventBus,
    store: StateStore,
    descriptor: Arc<RobotDescriptor>,
    infos: SelectAll<BoxStream<'static, Info>>,
}

impl CommandContext {
    pub(crate) fn new(
        execution_id: ExecutionId,
        command: String,
        bus: EventBus,
        store: StateStore,
        descriptor: Arc<RobotDescriptor>,
        messages: mpsc::Receiver<Value>,
    ) -> Self {
        let direct = stream::unfold(messages, |mut rx| async move {
            rx.recv().await.map(|msg| (Info::Message(msg), rx))
        })
        .boxed();
        let mut infos = SelectAll::new();
        infos.push(direct);
        Self {
            execution_id,
            command,
            bus,
            store,
            descriptor,
            infos,
        }
    }

    pub fn execution_id(&self) -> ExecutionId {
        self.execution_id
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn descriptor(&self) -> &RobotDescriptor {
        &self.descriptor
    }

    /// Deliver every event published at or below `path` to `handle_info`.
    pub fn subscribe(&mut self, path: impl Into<EventPath>) {
        let events = self.bus.subscribe(path).into_stream().map(Info::Event).boxed();
        self.infos.push(events);
    }

    /// Publish progress below this execution's lifecycle path.
    pub fn feedback(&self, feedback: Value) {
        self.bus.publish(
            EventPath::execution(&self.command, self.execution_id).child("feedback"),
            EventPayload::Message(feedback),
        );
    }

    fn publish_status(&self, status: CommandStatus) {
        publish_status(&self.bus, &self.command, self.execution_id, status);
    }

    async fn next_info(&mut self) -> Option<Info> {
        self.infos.next().await
    }
}

/// Publish one lifecycle event at `command/<name>/<id>`.
pub(crate) fn publish_status(bus: &EventBus, command: &str, id: ExecutionId, status: CommandStatus) {
    bus.publish(
        EventPath::execution(command, id),
        EventPayload::Command(CommandEvent {
            command: command.to_string(),
            execution_id: id,
            status,
        }),
    );
}

// ────────────────────────────────────────────────────────────────────────────
// Driver
// ────────────────────────────────────────────────────────────────────────────

/// Run `handler` to completion, bounded by `timeout` when set.
pub(crate) async fn run(
    mut handler: Box<dyn CommandHandler>,
    goal: Value,
    mut ctx: CommandContext,
    timeout: Option<Duration>,
) -> Completion {
    let completion = match timeout {
        Some(limit) => tokio::time::timeout(limit, drive(handler.as_mut(), goal, &mut ctx))
            .await
            .unwrap_or_else(|_| Completion::aborted(format!("timed out after {limit:?}"))),
        None => drive(handler.as_mut(), goal, &mut ctx).await,
    };
    debug!(
        command = %ctx.command,
        execution = %ctx.execution_id,
        terminal = ?completion.terminal,
        "execution finished"
    );
    completion
}

async fn drive(handler: &mut dyn CommandHandler, goal: Value, ctx: &mut CommandContext) -> Completion {
    if let GoalResponse::Reject(reason) = handler.handle_goal(goal, ctx).await {
        return Completion::aborted(reason);
    }
    ctx.publish_status(CommandStatus::Started);

    if let Step::Done(completion) = handler.handle_execute(ctx).await {
        return completion;
    }
    loop {
        let Some(info) = ctx.next_info().await else {
            return Completion::aborted("no further input can reach the handler");
        };
        if let Step::Done(completion) = handler.handle_info(info, ctx).await {
            return completion;
        }
    }
}
