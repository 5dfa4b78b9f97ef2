//! Armature configuration file (`armature.toml`).
//!
//! ```toml
//! [runtime]
//! inbox_capacity = 64
//! await_timeout_ms = 30000
//!
//! [safety]
//! disarm_timeout_ms = 5000
//! on_hardware_error = "disarm"
//!
//! [logging]
//! filter = "info,armature_runtime=debug"
//! format = "json"
//! ```
//!
//! Every field has a default, so a missing file or an empty table is valid.
//! `ARMATURE_*` environment variables override the file (see
//! [`apply_env_overrides`]).

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use armature_kernel::{HardwareErrorPolicy, SafetyConfig};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config at {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write config at {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

// ────────────────────────────────────────────────────────────────────────────
// Sections
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Capacity of the runtime controller's request inbox.
    #[serde(default = "default_inbox_capacity")]
    pub inbox_capacity: usize,

    /// Buffered events per bus path before slow subscribers start lagging.
    #[serde(default = "default_bus_capacity")]
    pub bus_capacity: usize,

    /// Buffered info messages per execution.
    #[serde(default = "default_info_capacity")]
    pub info_capacity: usize,

    /// Timeout used by `ExecutionHandle::join`.
    #[serde(default = "default_await_timeout_ms")]
    pub await_timeout_ms: u64,
}

fn default_inbox_capacity() -> usize {
    64
}
fn default_bus_capacity() -> usize {
    256
}
fn default_info_capacity() -> usize {
    32
}
fn default_await_timeout_ms() -> u64 {
    30_000
}

impl RuntimeConfig {
    pub fn await_timeout(&self) -> Duration {
        Duration::from_millis(self.await_timeout_ms)
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            inbox_capacity: default_inbox_capacity(),
            bus_capacity: default_bus_capacity(),
            info_capacity: default_info_capacity(),
            await_timeout_ms: default_await_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Compact => write!(f, "compact"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// `EnvFilter` directive; `RUST_LOG` wins when set.
    #[serde(default = "default_filter")]
    pub filter: String,

    #[serde(default)]
    pub format: LogFormat,

    /// Service name reported to the OpenTelemetry collector.
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

fn default_filter() -> String {
    "info".to_string()
}
fn default_service_name() -> String {
    "armature".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
            format: LogFormat::default(),
            service_name: default_service_name(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub safety: SafetyConfig,
    #[serde(default)]
    pub logging: LogConfig,
}

// ────────────────────────────────────────────────────────────────────────────
// Loading
// ────────────────────────────────────────────────────────────────────────────

/// Parse a config document.  Environment overrides are not applied.
pub fn from_toml_str(raw: &str) -> Result<Config, ConfigError> {
    Ok(toml::from_str(raw)?)
}

/// Load `path` and apply environment overrides.
pub fn load_from(path: &Path) -> Result<Config, ConfigError> {
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let mut config = from_toml_str(&raw)?;
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Like [`load_from`], but a missing file yields the defaults.
pub fn load_or_default(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        let mut config = Config::default();
        apply_env_overrides(&mut config);
        return Ok(config);
    }
    load_from(path)
}

pub fn save_to(config: &Config, path: &Path) -> Result<(), ConfigError> {
    let write_err = |source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(write_err)?;
    }
    let raw = toml::to_string_pretty(config)?;
    fs::write(path, raw).map_err(write_err)
}

/// Apply `ARMATURE_*` environment variable overrides to `config`.
///
/// | Variable | Config field |
/// |---|---|
/// | `ARMATURE_INBOX_CAPACITY` | `runtime.inbox_capacity` |
/// | `ARMATURE_BUS_CAPACITY` | `runtime.bus_capacity` |
/// | `ARMATURE_AWAIT_TIMEOUT_MS` | `runtime.await_timeout_ms` |
/// | `ARMATURE_DISARM_TIMEOUT_MS` | `safety.disarm_timeout_ms` |
/// | `ARMATURE_HARDWARE_ERROR_POLICY` | `safety.on_hardware_error` |
/// | `ARMATURE_LOG_FORMAT` | `logging.format` |
///
/// Unparseable values are logged and ignored.
pub fn apply_env_overrides(config: &mut Config) {
    override_from_env("ARMATURE_INBOX_CAPACITY", &mut config.runtime.inbox_capacity);
    override_from_env("ARMATURE_BUS_CAPACITY", &mut config.runtime.bus_capacity);
    override_from_env("ARMATURE_AWAIT_TIMEOUT_MS", &mut config.runtime.await_timeout_ms);
    override_from_env("ARMATURE_DISARM_TIMEOUT_MS", &mut config.safety.disarm_timeout_ms);
    override_from_env::<HardwareErrorPolicy>(
        "ARMATURE_HARDWARE_ERROR_POLICY",
        &mut config.safety.on_hardware_error,
    );
    override_from_env::<LogFormat>("ARMATURE_LOG_FORMAT", &mut config.logging.format);
}

fn override_from_env<T>(var: &str, field: &mut T)
where
    T: FromStr,
    T::Err: fmt::Display,
{
    let Ok(raw) = std::env::var(var) else {
        return;
    };
    match raw.parse() {
        Ok(value) => *field = value,
        Err(err) => warn!(var, value = %raw, error = %err, "ignoring invalid environment override"),
    }
}
