//! Command handlers and fixtures shared by the unit tests.

use std::time::Duration;

use armature_kernel::SafetyConfig;
use armature_types::{EventPayload, StateName};
use async_trait::async_trait;
use serde_json::Value;

use crate::config::Config;
use crate::descriptor::RobotDescriptor;
use crate::executor::{CommandContext, CommandHandler, Completion, GoalResponse, Info, Step};
use crate::robot::Robot;

pub(crate) const WAIT: Duration = Duration::from_secs(2);

/// Completes as soon as it starts.
pub(crate) struct Immediate {
    result: Value,
    next_state: Option<StateName>,
}

impl Immediate {
    pub(crate) fn new(result: Value) -> Self {
        Self {
            result,
            next_state: None,
        }
    }

    pub(crate) fn then(mut self, state: &str) -> Self {
        self.next_state = Some(StateName::from(state));
        self
    }
}

#[async_trait]
impl CommandHandler for Immediate {
    async fn handle_goal(&mut self, _goal: Value, _ctx: &mut CommandContext) -> GoalResponse {
        GoalResponse::Accept
    }

    async fn handle_execute(&mut self, _ctx: &mut CommandContext) -> Step {
        let mut completion = Completion::succeeded(self.result.clone());
        completion.next_state = self.next_state.clone();
        Step::Done(completion)
    }
}

/// Finishes with the first info it receives: `"abort"` aborts, `"cancel"`
/// cancels itself, anything else succeeds with that value.
pub(crate) struct WaitForInfo;

#[async_trait]
impl CommandHandler for WaitForInfo {
    async fn handle_goal(&mut self, _goal: Value, _ctx: &mut CommandContext) -> GoalResponse {
        GoalResponse::Accept
    }

    async fn handle_execute(&mut self, _ctx: &mut CommandContext) -> Step {
        Step::Continue
    }

    async fn handle_info(&mut self, info: Info, _ctx: &mut CommandContext) -> Step {
        let value = match info {
            Info::Message(value) => value,
            Info::Event(event) => match event.payload {
                EventPayload::Message(value) => value,
                _ => return Step::Continue,
            },
        };
        Step::Done(match value.as_str() {
            Some("abort") => Completion::aborted("asked to abort"),
            Some("cancel") => Completion::canceled(Value::from("self-cancelled")),
            _ => Completion::succeeded(value),
        })
    }
}

/// Never finishes on its own.
pub(crate) struct Forever;

#[async_trait]
impl CommandHandler for Forever {
    async fn handle_goal(&mut self, _goal: Value, _ctx: &mut CommandContext) -> GoalResponse {
        GoalResponse::Accept
    }

    async fn handle_execute(&mut self, _ctx: &mut CommandContext) -> Step {
        Step::Continue
    }
}

/// Crashes right after it starts.
pub(crate) struct Panicking;

#[async_trait]
impl CommandHandler for Panicking {
    async fn handle_goal(&mut self, _goal: Value, _ctx: &mut CommandContext) -> GoalResponse {
        GoalResponse::Accept
    }

    async fn handle_execute(&mut self, _ctx: &mut CommandContext) -> Step {
        panic!("handler bug")
    }
}

pub(crate) struct Rejecting;

#[async_trait]
impl CommandHandler for Rejecting {
    async fn handle_goal(&mut self, _goal: Value, _ctx: &mut CommandContext) -> GoalResponse {
        GoalResponse::Reject("goal rejected".to_string())
    }

    async fn handle_execute(&mut self, _ctx: &mut CommandContext) -> Step {
        Step::Done(Completion::succeeded(Value::Null))
    }
}

/// Start `descriptor` with a short disarm timeout and arm it.
pub(crate) async fn armed_robot(descriptor: std::sync::Arc<RobotDescriptor>) -> Robot {
    let config = Config {
        safety: SafetyConfig {
            disarm_timeout_ms: 200,
            ..SafetyConfig::default()
        },
        ..Config::default()
    };
    let robot = Robot::start(descriptor, &config);
    robot.safety().arm().await.expect("arm");
    // Any request makes the controller catch up with the safety state.
    robot.runtime().snapshot().await.expect("snapshot");
    robot
}
