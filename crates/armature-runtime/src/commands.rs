//! Built-in commands.

use armature_types::StateName;
use async_trait::async_trait;
use serde_json::{Value, json};

use crate::descriptor::{CommandDef, StateSelector};
use crate::executor::{CommandContext, CommandHandler, Completion, GoalResponse, Step};

/// Moves the robot to a named operational state.
///
/// Goal: `{"state": "<name>"}`.  The target must be a declared state other
/// than `disarmed` (only the safety controller disarms) and `executing`.
#[derive(Debug, Default)]
pub struct SetStateCommand {
    target: Option<StateName>,
}

impl SetStateCommand {
    /// Definition under `name`, admitted in every stable state except
    /// `disarmed`.
    pub fn definition(name: impl Into<String>) -> CommandDef {
        CommandDef::new(name, SetStateCommand::default).allowed_states(StateSelector::all_except([
            StateName::DISARMED,
            StateName::EXECUTING,
        ]))
    }
}

#[async_trait]
impl CommandHandler for SetStateCommand {
    async fn handle_goal(&mut self, goal: Value, ctx: &mut CommandContext) -> GoalResponse {
        let Some(state) = goal.get("state").and_then(Value::as_str) else {
            return GoalResponse::Reject("goal must be {\"state\": \"<name>\"}".to_string());
        };
        let state = StateName::from(state);
        if state.is_disarmed() || state.is_executing() {
            return GoalResponse::Reject(format!("state {state} cannot be set directly"));
        }
        if !ctx.descriptor().has_state(&state) {
            return GoalResponse::Reject(format!("unknown state {state}"));
        }
        self.target = Some(state);
        GoalResponse::Accept
    }

    async fn handle_execute(&mut self, _ctx: &mut CommandContext) -> Step {
        let Some(target) = self.target.take() else {
            return Step::Done(Completion::aborted("no target state"));
        };
        Step::Done(Completion::succeeded(json!({ "state": target })).then(target))
    }
}
