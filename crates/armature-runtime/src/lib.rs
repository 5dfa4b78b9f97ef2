//! `armature-runtime` – Command admission and execution
//!
//! Decides which commands may run, how many at once, and what the robot's
//! operational state is while they do.
//!
//! # Modules
//!
//! - [`descriptor`] – [`RobotDescriptor`][descriptor::RobotDescriptor]: the
//!   validated, immutable set of commands, categories, states and parameters.
//! - `controller` – the runtime controller actor: admission, concurrency
//!   limits, pre-emption, cancellation and the operational-state machine.
//! - [`handle`] – [`RuntimeHandle`][handle::RuntimeHandle] and
//!   [`ExecutionHandle`][handle::ExecutionHandle]: the caller-facing API.
//! - [`executor`] – the [`CommandHandler`][executor::CommandHandler] protocol
//!   every command implements, and the per-execution task that drives it.
//! - [`commands`] – built-in commands such as
//!   [`SetStateCommand`][commands::SetStateCommand].
//! - [`store`] – [`StateStore`][store::StateStore]: operational state, joint
//!   positions and parameters, readable from anywhere.
//! - [`params`] – parameter bindings and the
//!   [`ParameterPersistence`][params::ParameterPersistence] trait.
//! - [`robot`] – [`Robot`][robot::Robot]: starts everything for one
//!   descriptor.
//! - [`config`] – the `armature.toml` file and `ARMATURE_*` overrides.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: the global
//!   `tracing` subscriber with an optional OTLP span exporter.

pub mod commands;
mod controller;
pub mod config;
pub mod descriptor;
pub mod executor;
pub mod handle;
pub mod params;
pub mod robot;
pub mod store;
pub mod telemetry;

#[cfg(test)]
mod testing;

pub use commands::SetStateCommand;
pub use config::{Config, ConfigError, LogConfig, LogFormat, RuntimeConfig};
pub use descriptor::{
    CategoryDef, CategorySelector, CommandDef, DescriptorError, RobotDescriptor, StateSelector,
};
pub use executor::{CommandContext, CommandHandler, Completion, GoalResponse, Info, Step, Terminal};
pub use handle::{CategoryAvailability, ExecutionHandle, ExecutionInfo, RuntimeHandle, RuntimeSnapshot};
pub use params::{MemoryPersistence, ParameterBinding, ParameterPersistence};
pub use robot::Robot;
pub use store::StateStore;
pub use telemetry::{TracerProviderGuard, init_tracing};

// Re-exported so robot code can depend on this crate alone.
pub use armature_kernel::{
    DisarmCallback, HardwareErrorPolicy, SafetyConfig, SafetyHandle, SafetySignal, disarm_fn,
};
pub use armature_middleware::{EventBus, Subscription};
pub use armature_types::{
    CategoryName, CommandStatus, ComponentId, Event, EventPath, EventPayload, ExecutionId,
    RuntimeError, SafetyError, SafetyState, StateName,
};
