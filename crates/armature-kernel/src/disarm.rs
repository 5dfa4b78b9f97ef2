//! [`DisarmRegistry`] – the directory of hardware shutdown callbacks.
//!
//! Every component that drives hardware registers a [`DisarmCallback`] when it
//! starts.  The registration captures everything needed to make that hardware
//! safe – a stateless callback plus plain JSON options – and never a handle to
//! the live component, so the callback still works after the component has
//! crashed.
//!
//! Registration goes straight into a `RwLock`-guarded map and never touches
//! the safety controller's request queue, so many components can register
//! concurrently while an arm or disarm request is being processed.
//!
//! [`disarm_all`] runs every callback in its own task under its own timeout.
//! A hung callback costs at most its own timeout and cannot delay or poison
//! the outcome of the others.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use armature_types::{ComponentId, DisarmCallbackFailure, EventPath, SafetyError};
use async_trait::async_trait;
use futures_util::future::join_all;
use serde_json::Value;
use tracing::{debug, warn};

// ────────────────────────────────────────────────────────────────────────────
// Callback trait
// ────────────────────────────────────────────────────────────────────────────

/// Makes one hardware component safe.
///
/// Implementations must be stateless: everything they need arrives through
/// `options`, which were captured when the component registered.
#[async_trait]
pub trait DisarmCallback: Send + Sync + 'static {
    /// Return `Ok(())` once the hardware is safe, or a reason on failure.
    async fn disarm(&self, options: &Value) -> Result<(), String>;
}

/// Adapter that turns an async closure into a [`DisarmCallback`].
///
/// Obtained via [`disarm_fn`].
pub struct DisarmFn<F>(F);

/// Wrap `f` so it can be registered as a [`DisarmCallback`].
///
/// ```
/// use armature_kernel::disarm_fn;
///
/// let cb = disarm_fn(|options| async move {
///     let _bus = options["bus"].as_str();
///     Ok::<(), String>(())
/// });
/// # let _ = cb;
/// ```
pub fn disarm_fn<F, Fut>(f: F) -> DisarmFn<F>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), String>> + Send + 'static,
{
    DisarmFn(f)
}

#[async_trait]
impl<F, Fut> DisarmCallback for DisarmFn<F>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), String>> + Send + 'static,
{
    async fn disarm(&self, options: &Value) -> Result<(), String> {
        (self.0)(options.clone()).await
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Registration
// ────────────────────────────────────────────────────────────────────────────

/// Everything needed to make one component safe without the component itself.
#[derive(Clone)]
pub struct DisarmRegistration {
    pub component_id: ComponentId,
    /// Where the component lives in the robot topology.
    pub path: EventPath,
    /// Options captured at registration time.
    pub options: Value,
    callback: Arc<dyn DisarmCallback>,
}

impl fmt::Debug for DisarmRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DisarmRegistration")
            .field("component_id", &self.component_id)
            .field("path", &self.path)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// DisarmRegistry
// ────────────────────────────────────────────────────────────────────────────

/// Concurrent directory of [`DisarmRegistration`]s keyed by component id.
///
/// Clone it cheaply – all clones share the same directory.
#[derive(Clone, Default)]
pub struct DisarmRegistry {
    entries: Arc<RwLock<HashMap<ComponentId, DisarmRegistration>>>,
}

impl DisarmRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the registration for `component_id`.
    ///
    /// # Errors
    ///
    /// [`SafetyError::InvalidRegistration`] when `component_id` is empty.
    pub fn register(
        &self,
        component_id: impl Into<ComponentId>,
        path: EventPath,
        options: Value,
        callback: impl DisarmCallback,
    ) -> Result<(), SafetyError> {
        let component_id = component_id.into();
        if component_id.as_str().trim().is_empty() {
            return Err(SafetyError::InvalidRegistration(
                "component id must not be empty".to_string(),
            ));
        }
        let registration = DisarmRegistration {
            component_id: component_id.clone(),
            path,
            options,
            callback: Arc::new(callback),
        };
        let previous = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(component_id.clone(), registration);
        debug!(component = %component_id, replaced = previous.is_some(), "disarm callback registered");
        Ok(())
    }

    /// Remove the registration for `component_id`.  Returns `false` when it
    /// was not registered.
    pub fn unregister(&self, component_id: &ComponentId) -> bool {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(component_id)
            .is_some()
    }

    pub fn contains(&self, component_id: &ComponentId) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(component_id)
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registered component ids in sorted order.
    pub fn component_ids(&self) -> Vec<ComponentId> {
        let mut ids: Vec<ComponentId> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    /// Copy of every registration, taken fresh at disarm time.
    pub fn snapshot(&self) -> Vec<DisarmRegistration> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Fan-out
// ────────────────────────────────────────────────────────────────────────────

/// Invoke every registration's callback concurrently, each in its own task
/// bounded by `timeout`, and return the failures.
///
/// A callback fails when it returns an error, exceeds `timeout`, or panics.
/// An empty result means every component is safe.
pub async fn disarm_all(
    registrations: Vec<DisarmRegistration>,
    timeout: Duration,
) -> Vec<DisarmCallbackFailure> {
    let tasks = registrations.into_iter().map(|registration| {
        let component = registration.component_id.clone();
        let task = tokio::spawn(async move {
            tokio::time::timeout(
                timeout,
                registration.callback.disarm(&registration.options),
            )
            .await
        });
        async move { (component, task.await) }
    });

    join_all(tasks)
        .await
        .into_iter()
        .filter_map(|(component, outcome)| {
            let reason = match outcome {
                Ok(Ok(Ok(()))) => return None,
                Ok(Ok(Err(reason))) => reason,
                Ok(Err(_elapsed)) => format!("timed out after {timeout:?}"),
                Err(join_error) if join_error.is_panic() => "callback crashed".to_string(),
                Err(_) => "callback task was cancelled".to_string(),
            };
            warn!(component = %component, reason = %reason, "disarm callback failed");
            Some(DisarmCallbackFailure { component, reason })
        })
        .collect()
}
