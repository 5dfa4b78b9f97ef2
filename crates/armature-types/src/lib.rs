//! `armature-types` – shared vocabulary of the Armature control core.
//!
//! Every other crate in the workspace speaks in terms of these types:
//!
//! - [`StateName`], [`CategoryName`], [`ComponentId`] – string newtypes for the
//!   names declared in a robot descriptor.
//! - [`ExecutionId`] – unique id of one in-flight command invocation.
//! - [`SafetyState`] – the arm/disarm lifecycle owned by the safety controller.
//! - [`EventPath`], [`Event`], [`EventPayload`] – hierarchical event bus
//!   addressing and the messages routed over it.
//! - [`RuntimeError`], [`SafetyError`], [`DisarmCallbackFailure`] – the error
//!   taxonomy returned to callers.

mod error;
mod event;

use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use error::{DisarmCallbackFailure, RuntimeError, SafetyError};
pub use event::{CommandEvent, CommandStatus, Event, EventPath, EventPayload};

macro_rules! name_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(name: impl Into<String>) -> Self {
                Self(name.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(name: &str) -> Self {
                Self(name.to_string())
            }
        }

        impl From<String> for $name {
            fn from(name: String) -> Self {
                Self(name)
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }
    };
}

name_type!(
    /// Name of an operational state: one of the built-ins (`disarmed`, `idle`),
    /// the `executing` overlay, or a user-defined state.
    StateName
);

name_type!(
    /// Name of a command category sharing one concurrency budget.
    CategoryName
);

name_type!(
    /// Identifier of a hardware component that registered a disarm callback.
    ComponentId
);

impl StateName {
    pub const DISARMED: &'static str = "disarmed";
    pub const IDLE: &'static str = "idle";
    pub const EXECUTING: &'static str = "executing";

    pub fn disarmed() -> Self {
        Self::new(Self::DISARMED)
    }

    pub fn idle() -> Self {
        Self::new(Self::IDLE)
    }

    /// The transient overlay reported while any execution is running.
    pub fn executing() -> Self {
        Self::new(Self::EXECUTING)
    }

    pub fn is_disarmed(&self) -> bool {
        self.0 == Self::DISARMED
    }

    pub fn is_executing(&self) -> bool {
        self.0 == Self::EXECUTING
    }
}

impl CategoryName {
    pub const DEFAULT: &'static str = "default";

    /// The category every command lands in unless told otherwise.
    pub fn default_category() -> Self {
        Self::new(Self::DEFAULT)
    }
}

/// Unique identifier of one command invocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionId(pub Uuid);

impl ExecutionId {
    pub fn new() -> Self {
        ExecutionId(Uuid::new_v4())
    }
}

impl Default for ExecutionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Arm/disarm lifecycle of the robot's hardware.
///
/// ```text
/// Disarmed --arm--> Armed --disarm--> Disarming --(all ok)--> Disarmed
///                                          |
///                                          +--(any failure)--> Error --force_disarm--> Disarmed
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SafetyState {
    #[default]
    Disarmed,
    Armed,
    Disarming,
    Error,
}

impl SafetyState {
    pub fn is_armed(&self) -> bool {
        matches!(self, SafetyState::Armed)
    }
}

impl fmt::Display for SafetyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SafetyState::Disarmed => write!(f, "disarmed"),
            SafetyState::Armed => write!(f, "armed"),
            SafetyState::Disarming => write!(f, "disarming"),
            SafetyState::Error => write!(f, "error"),
        }
    }
}
