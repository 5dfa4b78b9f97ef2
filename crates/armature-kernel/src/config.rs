//! [`SafetyConfig`] – tunables of the safety controller.
//!
//! Deserialised from the `[safety]` table of the Armature config file; every
//! field has a default so an empty table is valid.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Per-callback bound applied to every disarm callback.
pub const DEFAULT_DISARM_TIMEOUT_MS: u64 = 5_000;

/// What the safety controller does when a component reports a hardware fault.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HardwareErrorPolicy {
    /// Disarm the robot if it is armed.
    #[default]
    Disarm,
    /// Log and publish the fault only; recovery is left to the caller.
    Ignore,
}

impl fmt::Display for HardwareErrorPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HardwareErrorPolicy::Disarm => write!(f, "disarm"),
            HardwareErrorPolicy::Ignore => write!(f, "ignore"),
        }
    }
}

impl FromStr for HardwareErrorPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "disarm" => Ok(HardwareErrorPolicy::Disarm),
            "ignore" => Ok(HardwareErrorPolicy::Ignore),
            other => Err(format!("unknown hardware error policy '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyConfig {
    /// Timeout applied independently to each disarm callback.
    #[serde(default = "default_disarm_timeout_ms")]
    pub disarm_timeout_ms: u64,

    #[serde(default)]
    pub on_hardware_error: HardwareErrorPolicy,

    /// Attempt a disarm when the controller shuts down while armed.
    #[serde(default = "default_disarm_on_shutdown")]
    pub disarm_on_shutdown: bool,

    /// Capacity of the controller's request inbox.
    #[serde(default = "default_inbox_capacity")]
    pub inbox_capacity: usize,
}

fn default_disarm_timeout_ms() -> u64 {
    DEFAULT_DISARM_TIMEOUT_MS
}
fn default_disarm_on_shutdown() -> bool {
    true
}
fn default_inbox_capacity() -> usize {
    32
}

impl SafetyConfig {
    pub fn disarm_timeout(&self) -> Duration {
        Duration::from_millis(self.disarm_timeout_ms)
    }
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            disarm_timeout_ms: default_disarm_timeout_ms(),
            on_hardware_error: HardwareErrorPolicy::default(),
            disarm_on_shutdown: default_disarm_on_shutdown(),
            inbox_capacity: default_inbox_capacity(),
        }
    }
}
