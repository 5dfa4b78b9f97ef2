//! [`RobotDescriptor`] – the immutable description of what a robot can do.
//!
//! Built once through [`RobotDescriptorBuilder`], validated, and then shared
//! read-only (`Arc`) by the runtime controller and every executor.
//!
//! All cross references are checked at build time: a command's category,
//! allowed states, cancel categories, fallback state and parameter bindings
//! must exist.  Wildcard selectors ([`StateSelector::All`],
//! [`CategorySelector::AllExcept`], ...) are expanded into concrete sets here,
//! so admission never interprets a wildcard.
//!
//! # Example
//!
//! ```
//! use armature_runtime::descriptor::{CategoryDef, CommandDef, RobotDescriptor, StateSelector};
//! # use armature_runtime::executor::{CommandContext, CommandHandler, Completion, GoalResponse, Step};
//! # use serde_json::Value;
//! # struct Home;
//! # #[async_trait::async_trait]
//! # impl CommandHandler for Home {
//! #     async fn handle_goal(&mut self, _: Value, _: &mut CommandContext) -> GoalResponse { GoalResponse::Accept }
//! #     async fn handle_execute(&mut self, _: &mut CommandContext) -> Step { Step::Done(Completion::succeeded(Value::Null)) }
//! # }
//!
//! let descriptor = RobotDescriptor::builder()
//!     .state("parked")
//!     .category(CategoryDef::new("motion", 1).limit_param("limits/motion"))
//!     .command(
//!         CommandDef::new("home", || Home)
//!             .category("motion")
//!             .allowed_states(StateSelector::only(["idle", "parked"])),
//!     )
//!     .set_state_command("set_state")
//!     .build()
//!     .unwrap();
//!
//! assert!(descriptor.command("home").is_some());
//! ```

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use armature_types::{CategoryName, EventPath, StateName};
use serde_json::Value;
use thiserror::Error;

use crate::commands::SetStateCommand;
use crate::executor::{CommandFactory, CommandHandler};
use crate::params::{ParameterBinding, limit_from, timeout_from, timeout_to_value};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DescriptorError {
    #[error("Names must not be empty")]
    EmptyName,

    #[error("Command {0} is declared twice")]
    DuplicateCommand(String),

    #[error("Category {0} is declared twice")]
    DuplicateCategory(CategoryName),

    #[error("{owner} references unknown category {category}")]
    UnknownCategory { owner: String, category: CategoryName },

    #[error("{owner} references unknown state {state}")]
    UnknownState { owner: String, state: StateName },

    #[error("State {0} is built in and cannot be declared or used here")]
    ReservedState(StateName),

    #[error("Parameter {path} has an invalid value: {reason}")]
    InvalidParameter { path: EventPath, reason: String },
}

// ────────────────────────────────────────────────────────────────────────────
// Selectors
// ────────────────────────────────────────────────────────────────────────────

/// Which operational states a command may be admitted in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateSelector {
    Only(Vec<StateName>),
    /// Every declared state plus `executing`.
    All,
    AllExcept(Vec<StateName>),
}

impl StateSelector {
    pub fn only<I, S>(states: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<StateName>,
    {
        Self::Only(states.into_iter().map(Into::into).collect())
    }

    pub fn all_except<I, S>(states: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<StateName>,
    {
        Self::AllExcept(states.into_iter().map(Into::into).collect())
    }
}

impl Default for StateSelector {
    fn default() -> Self {
        Self::Only(vec![StateName::idle()])
    }
}

/// Which categories a command pre-empts when its own category is full.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CategorySelector {
    Only(Vec<CategoryName>),
    All,
    AllExcept(Vec<CategoryName>),
}

impl CategorySelector {
    pub fn none() -> Self {
        Self::Only(Vec::new())
    }

    pub fn only<I, S>(categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<CategoryName>,
    {
        Self::Only(categories.into_iter().map(Into::into).collect())
    }
}

impl Default for CategorySelector {
    fn default() -> Self {
        Self::none()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Definitions (builder input)
// ────────────────────────────────────────────────────────────────────────────

/// Declaration of one command.  Unset fields take these defaults:
/// allowed in `idle`, category `default`, pre-empts nothing, no timeout,
/// falls back to `idle` when cancelled, cancel result `"cancelled"`.
pub struct CommandDef {
    name: String,
    factory: Arc<dyn CommandFactory>,
    allowed_states: StateSelector,
    category: CategoryName,
    cancels: CategorySelector,
    timeout: Option<Duration>,
    timeout_param: Option<EventPath>,
    fallback_state: Option<StateName>,
    cancel_result: Value,
}

impl CommandDef {
    pub fn new(name: impl Into<String>, factory: impl CommandFactory) -> Self {
        Self {
            name: name.into(),
            factory: Arc::new(factory),
            allowed_states: StateSelector::default(),
            category: CategoryName::default_category(),
            cancels: CategorySelector::default(),
            timeout: None,
            timeout_param: None,
            fallback_state: None,
            cancel_result: Value::from("cancelled"),
        }
    }

    pub fn allowed_states(mut self, selector: StateSelector) -> Self {
        self.allowed_states = selector;
        self
    }

    pub fn category(mut self, category: impl Into<CategoryName>) -> Self {
        self.category = category.into();
        self
    }

    pub fn cancels(mut self, selector: CategorySelector) -> Self {
        self.cancels = selector;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Bind the timeout to a parameter so it can be changed at run time.
    pub fn timeout_param(mut self, path: impl Into<EventPath>) -> Self {
        self.timeout_param = Some(path.into());
        self
    }

    pub fn fallback_state(mut self, state: impl Into<StateName>) -> Self {
        self.fallback_state = Some(state.into());
        self
    }

    /// Result published when the execution is cancelled from outside.
    pub fn cancel_result(mut self, result: Value) -> Self {
        self.cancel_result = result;
        self
    }
}

impl fmt::Debug for CommandDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandDef")
            .field("name", &self.name)
            .field("category", &self.category)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct CategoryDef {
    name: CategoryName,
    limit: usize,
    limit_param: Option<EventPath>,
}

impl CategoryDef {
    pub fn new(name: impl Into<CategoryName>, limit: usize) -> Self {
        Self {
            name: name.into(),
            limit,
            limit_param: None,
        }
    }

    /// Bind the limit to a parameter so it can be changed at run time.
    pub fn limit_param(mut self, path: impl Into<EventPath>) -> Self {
        self.limit_param = Some(path.into());
        self
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Resolved descriptor
// ────────────────────────────────────────────────────────────────────────────

/// A validated command with every selector expanded.
pub struct CommandSpec {
    pub name: String,
    pub allowed_states: HashSet<StateName>,
    pub category: CategoryName,
    pub cancels: HashSet<CategoryName>,
    pub timeout: Option<Duration>,
    pub fallback_state: Option<StateName>,
    pub cancel_result: Value,
    factory: Arc<dyn CommandFactory>,
}

impl CommandSpec {
    /// A fresh handler instance for one execution.
    pub fn new_handler(&self) -> Box<dyn CommandHandler> {
        self.factory.create()
    }

    /// Allowed states in a stable order, for error messages.
    pub fn allowed_states_sorted(&self) -> Vec<StateName> {
        let mut states: Vec<_> = self.allowed_states.iter().cloned().collect();
        states.sort();
        states
    }
}

impl fmt::Debug for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandSpec")
            .field("name", &self.name)
            .field("allowed_states", &self.allowed_states)
            .field("category", &self.category)
            .field("cancels", &self.cancels)
            .field("timeout", &self.timeout)
            .field("fallback_state", &self.fallback_state)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategorySpec {
    pub name: CategoryName,
    pub limit: usize,
}

#[derive(Debug)]
pub struct RobotDescriptor {
    commands: HashMap<String, CommandSpec>,
    categories: BTreeMap<CategoryName, CategorySpec>,
    states: BTreeSet<StateName>,
    initial_state: StateName,
    parameters: BTreeMap<EventPath, Value>,
    bindings: HashMap<EventPath, Vec<ParameterBinding>>,
}

impl RobotDescriptor {
    pub fn builder() -> RobotDescriptorBuilder {
        RobotDescriptorBuilder::default()
    }

    pub fn command(&self, name: &str) -> Option<&CommandSpec> {
        self.commands.get(name)
    }

    pub fn commands(&self) -> impl Iterator<Item = &CommandSpec> {
        self.commands.values()
    }

    pub fn category(&self, name: &CategoryName) -> Option<&CategorySpec> {
        self.categories.get(name)
    }

    pub fn categories(&self) -> impl Iterator<Item = &CategorySpec> {
        self.categories.values()
    }

    /// Declared stable states, built-ins included.  `executing` is not one.
    pub fn states(&self) -> &BTreeSet<StateName> {
        &self.states
    }

    pub fn has_state(&self, state: &StateName) -> bool {
        self.states.contains(state)
    }

    pub fn initial_state(&self) -> &StateName {
        &self.initial_state
    }

    /// Declared parameters with their default values.
    pub fn parameters(&self) -> &BTreeMap<EventPath, Value> {
        &self.parameters
    }

    /// Live settings patched when the parameter at `path` changes.
    pub fn bindings(&self, path: &EventPath) -> &[ParameterBinding] {
        self.bindings.get(path).map(Vec::as_slice).unwrap_or(&[])
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Builder
// ────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct RobotDescriptorBuilder {
    commands: Vec<CommandDef>,
    categories: Vec<CategoryDef>,
    states: Vec<StateName>,
    initial_state: Option<StateName>,
    parameters: Vec<(EventPath, Value)>,
}

impl RobotDescriptorBuilder {
    pub fn command(mut self, command: CommandDef) -> Self {
        self.commands.push(command);
        self
    }

    /// Declaring `default` overrides its limit of 1.
    pub fn category(mut self, category: CategoryDef) -> Self {
        self.categories.push(category);
        self
    }

    /// Declare a user-defined operational state.
    pub fn state(mut self, state: impl Into<StateName>) -> Self {
        self.states.push(state.into());
        self
    }

    /// Defaults to `disarmed`.
    pub fn initial_state(mut self, state: impl Into<StateName>) -> Self {
        self.initial_state = Some(state.into());
        self
    }

    pub fn parameter(mut self, path: impl Into<EventPath>, default: Value) -> Self {
        self.parameters.push((path.into(), default));
        self
    }

    /// Register the built-in command that moves the robot to a named state.
    pub fn set_state_command(self, name: impl Into<String>) -> Self {
        self.command(SetStateCommand::definition(name))
    }

    pub fn build(self) -> Result<Arc<RobotDescriptor>, DescriptorError> {
        let states = self.resolve_states()?;
        let initial_state = self.initial_state.clone().unwrap_or_else(StateName::disarmed);
        check_stable_state("initial state", &initial_state, &states)?;

        let mut parameters: BTreeMap<EventPath, Value> = BTreeMap::new();
        for (path, default) in &self.parameters {
            parameters.insert(path.clone(), default.clone());
        }
        let mut bindings: HashMap<EventPath, Vec<ParameterBinding>> = HashMap::new();

        let mut categories = BTreeMap::new();
        categories.insert(
            CategoryName::default_category(),
            CategorySpec {
                name: CategoryName::default_category(),
                limit: 1,
            },
        );
        let mut declared = HashSet::new();
        for def in &self.categories {
            if def.name.as_str().trim().is_empty() {
                return Err(DescriptorError::EmptyName);
            }
            if !declared.insert(def.name.clone()) {
                return Err(DescriptorError::DuplicateCategory(def.name.clone()));
            }
            let mut limit = def.limit;
            if let Some(path) = &def.limit_param {
                limit = bind(
                    &mut parameters,
                    &mut bindings,
                    path,
                    Value::from(def.limit),
                    ParameterBinding::CategoryLimit(def.name.clone()),
                    limit_from,
                )?;
            }
            categories.insert(
                def.name.clone(),
                CategorySpec {
                    name: def.name.clone(),
                    limit,
                },
            );
        }

        let mut commands = HashMap::new();
        for def in self.commands {
            if def.name.trim().is_empty() {
                return Err(DescriptorError::EmptyName);
            }
            if commands.contains_key(&def.name) {
                return Err(DescriptorError::DuplicateCommand(def.name));
            }
            let owner = format!("command {}", def.name);

            let allowed_states = expand_states(&owner, &def.allowed_states, &states)?;
            if !categories.contains_key(&def.category) {
                return Err(DescriptorError::UnknownCategory {
                    owner,
                    category: def.category,
                });
            }
            let cancels = expand_categories(&owner, &def.cancels, &categories)?;
            if let Some(fallback) = &def.fallback_state {
                check_stable_state(&owner, fallback, &states)?;
            }

            let mut timeout = def.timeout;
            if let Some(path) = &def.timeout_param {
                timeout = bind(
                    &mut parameters,
                    &mut bindings,
                    path,
                    timeout_to_value(def.timeout),
                    ParameterBinding::CommandTimeout(def.name.clone()),
                    timeout_from,
                )?;
            }

            commands.insert(
                def.name.clone(),
                CommandSpec {
                    name: def.name,
                    allowed_states,
                    category: def.category,
                    cancels,
                    timeout,
                    fallback_state: def.fallback_state,
                    cancel_result: def.cancel_result,
                    factory: def.factory,
                },
            );
        }

        Ok(Arc::new(RobotDescriptor {
            commands,
            categories,
            states,
            initial_state,
            parameters,
            bindings,
        }))
    }

    fn resolve_states(&self) -> Result<BTreeSet<StateName>, DescriptorError> {
        let mut states = BTreeSet::from([StateName::disarmed(), StateName::idle()]);
        for state in &self.states {
            if state.as_str().trim().is_empty() {
                return Err(DescriptorError::EmptyName);
            }
            if is_builtin(state) {
                return Err(DescriptorError::ReservedState(state.clone()));
            }
            states.insert(state.clone());
        }
        Ok(states)
    }
}

fn is_builtin(state: &StateName) -> bool {
    state.is_disarmed() || state.is_executing() || state.as_str() == StateName::IDLE
}

/// A state a robot can rest in: declared and not the `executing` overlay.
fn check_stable_state(
    owner: &str,
    state: &StateName,
    states: &BTreeSet<StateName>,
) -> Result<(), DescriptorError> {
    if state.is_executing() {
        return Err(DescriptorError::ReservedState(state.clone()));
    }
    if !states.contains(state) {
        return Err(DescriptorError::UnknownState {
            owner: owner.to_string(),
            state: state.clone(),
        });
    }
    Ok(())
}

fn expand_states(
    owner: &str,
    selector: &StateSelector,
    states: &BTreeSet<StateName>,
) -> Result<HashSet<StateName>, DescriptorError> {
    let check = |state: &StateName| {
        if state.is_executing() || states.contains(state) {
            Ok(())
        } else {
            Err(DescriptorError::UnknownState {
                owner: owner.to_string(),
                state: state.clone(),
            })
        }
    };
    let everything = || {
        states
            .iter()
            .cloned()
            .chain(std::iter::once(StateName::executing()))
    };
    match selector {
        StateSelector::Only(list) => {
            list.iter().try_for_each(check)?;
            Ok(list.iter().cloned().collect())
        }
        StateSelector::All => Ok(everything().collect()),
        StateSelector::AllExcept(excluded) => {
            excluded.iter().try_for_each(check)?;
            Ok(everything().filter(|s| !excluded.contains(s)).collect())
        }
    }
}

fn expand_categories(
    owner: &str,
    selector: &CategorySelector,
    categories: &BTreeMap<CategoryName, CategorySpec>,
) -> Result<HashSet<CategoryName>, DescriptorError> {
    let check = |category: &CategoryName| {
        if categories.contains_key(category) {
            Ok(())
        } else {
            Err(DescriptorError::UnknownCategory {
                owner: owner.to_string(),
                category: category.clone(),
            })
        }
    };
    match selector {
        CategorySelector::Only(list) => {
            list.iter().try_for_each(check)?;
            Ok(list.iter().cloned().collect())
        }
        CategorySelector::All => Ok(categories.keys().cloned().collect()),
        CategorySelector::AllExcept(excluded) => {
            excluded.iter().try_for_each(check)?;
            Ok(categories
                .keys()
                .filter(|c| !excluded.contains(c))
                .cloned()
                .collect())
        }
    }
}

/// Record `binding` for the parameter at `path` and return the slot value.
///
/// An undeclared parameter is declared with `slot_default`; a declared one
/// must parse, and its default then wins over the slot's own value.
fn bind<T>(
    parameters: &mut BTreeMap<EventPath, Value>,
    bindings: &mut HashMap<EventPath, Vec<ParameterBinding>>,
    path: &EventPath,
    slot_default: Value,
    binding: ParameterBinding,
    parse: impl Fn(&Value) -> Result<T, String>,
) -> Result<T, DescriptorError> {
    let value = parameters.entry(path.clone()).or_insert(slot_default);
    let parsed = parse(value).map_err(|reason| DescriptorError::InvalidParameter {
        path: path.clone(),
        reason,
    })?;
    bindings.entry(path.clone()).or_default().push(binding);
    Ok(parsed)
}
