//! [`Robot`] – wires the bus, state store, safety controller and runtime
//! controller together for one descriptor.

use std::sync::Arc;

use armature_kernel::SafetyHandle;
use armature_middleware::EventBus;
use armature_types::{RuntimeError, SafetyError};
use tracing::{info, warn};

use crate::config::Config;
use crate::descriptor::RobotDescriptor;
use crate::handle::RuntimeHandle;
use crate::params::ParameterPersistence;
use crate::store::StateStore;

/// A running control core.  Must be started inside a Tokio runtime.
pub struct Robot {
    descriptor: Arc<RobotDescriptor>,
    bus: EventBus,
    store: StateStore,
    safety: SafetyHandle,
    runtime: RuntimeHandle,
}

impl Robot {
    pub fn start(descriptor: Arc<RobotDescriptor>, config: &Config) -> Self {
        Self::start_with(descriptor, config, None)
    }

    /// Start with a collaborator that persists parameter changes.
    pub fn start_with(
        descriptor: Arc<RobotDescriptor>,
        config: &Config,
        persistence: Option<Arc<dyn ParameterPersistence>>,
    ) -> Self {
        let bus = EventBus::new(config.runtime.bus_capacity);
        let store = StateStore::new(&descriptor);
        let safety = SafetyHandle::spawn(bus.clone(), config.safety.clone());
        let runtime = RuntimeHandle::spawn(
            Arc::clone(&descriptor),
            bus.clone(),
            store.clone(),
            safety.subscribe_state(),
            &config.runtime,
            persistence,
        );
        info!(
            commands = descriptor.commands().count(),
            categories = descriptor.categories().count(),
            "robot started"
        );
        Self {
            descriptor,
            bus,
            store,
            safety,
            runtime,
        }
    }

    pub fn runtime(&self) -> &RuntimeHandle {
        &self.runtime
    }

    pub fn safety(&self) -> &SafetyHandle {
        &self.safety
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn descriptor(&self) -> &Arc<RobotDescriptor> {
        &self.descriptor
    }

    /// Cancel every execution, disarm if armed, and stop both controllers.
    ///
    /// The safety shutdown runs even when the runtime controller is gone.
    pub async fn shutdown(self) -> Result<(), SafetyError> {
        log_shutdown_cancel(self.runtime.cancel().await);
        self.safety.shutdown().await
    }
}

fn log_shutdown_cancel(cancelled: Result<usize, RuntimeError>) -> usize {
    match cancelled {
        Ok(cancelled) => {
            info!(cancelled, "robot shutting down");
            cancelled
        }
        Err(err) => {
            warn!(error = %err, "runtime controller unavailable during shutdown");
            0
        }
    }
}
