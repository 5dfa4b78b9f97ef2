//! `armature-middleware` – The Nervous System
//!
//! Routes lifecycle and telemetry events between the runtime controller, the
//! safety controller, command executors and external observers without caring
//! about the events' meaning.
//!
//! # Modules
//!
//! - [`bus`] – Hierarchical publish/subscribe event bus built on Tokio
//!   broadcast channels.  A subscriber to a path receives every event
//!   published to that path or below it.

pub mod bus;

pub use bus::{EventBus, Subscription};
