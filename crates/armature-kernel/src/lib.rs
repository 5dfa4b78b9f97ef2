//! `armature-kernel` – Safety
//!
//! The brainstem of Armature.  It does not decide what the robot does; it
//! decides whether the robot's hardware may be powered at all, and it makes
//! the hardware safe when asked to, even after the component that drove it
//! has crashed.
//!
//! # Modules
//!
//! - [`disarm`] – [`DisarmRegistry`][disarm::DisarmRegistry]: the concurrent
//!   directory of stateless [`DisarmCallback`][disarm::DisarmCallback]s
//!   captured at component start, plus the concurrent, per-callback-timeout
//!   disarm fan-out.
//! - [`safety`] – [`SafetyHandle`][safety::SafetyHandle]: the serialized
//!   arm/disarm state machine (`disarmed → armed → disarming → disarmed |
//!   error`) and its caller-facing handle.
//! - [`config`] – [`SafetyConfig`][config::SafetyConfig]: disarm timeout,
//!   hardware-error policy and shutdown behaviour.

pub mod config;
pub mod disarm;
pub mod safety;

pub use config::{HardwareErrorPolicy, SafetyConfig};
pub use disarm::{DisarmCallback, DisarmFn, DisarmRegistration, DisarmRegistry, disarm_fn};
pub use safety::{SafetyHandle, SafetySignal};
