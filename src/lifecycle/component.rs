//! State-machine contract shared by every long-running component.
//!
//! Implementors embed a [`LifecycleState`] and override only the hooks they
//! need; the provided `initialize`/`start`/`stop`/`health` methods enforce the
//! legal transitions and reject everything else with
//! [`LifecycleError::InvalidState`].

use crate::error::LifecycleError;
use anyhow::{Context, Result};
use futures::future::BoxFuture;
use std::fmt;
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

pub type ComponentFuture<'a> = BoxFuture<'a, Result<()>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentState {
    Uninitialized,
    Initialized,
    Starting,
    Running,
    Stopping,
    Stopped,
    Failed,
}

impl ComponentState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ComponentState::Stopped | ComponentState::Failed)
    }
}

impl fmt::Display for ComponentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Name and current state of one component, mutated under a single lock.
#[derive(Debug)]
pub struct LifecycleState {
    name: String,
    state: Mutex<ComponentState>,
}

impl LifecycleState {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(ComponentState::Uninitialized),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn current(&self) -> ComponentState {
        *self.state.lock().expect("lifecycle state mutex poisoned")
    }

    /// Moves to `next` if the current state is `expected`, otherwise reports
    /// the misuse without touching the state.
    pub(crate) fn transition(
        &self,
        operation: &'static str,
        expected: ComponentState,
        next: ComponentState,
    ) -> Result<(), LifecycleError> {
        let mut state = self.state.lock().expect("lifecycle state mutex poisoned");
        if *state != expected {
            return Err(self.invalid(operation, *state));
        }
        let from = *state;
        tracing::debug!(component = %self.name, %from, to = %next, "component state transition");
        *state = next;
        Ok(())
    }

    pub(crate) fn ensure(
        &self,
        operation: &'static str,
        expected: ComponentState,
    ) -> Result<(), LifecycleError> {
        let state = self.current();
        if state != expected {
            return Err(self.invalid(operation, state));
        }
        Ok(())
    }

    /// Failed is reachable from any state that is not already terminal.
    pub(crate) fn fail(&self) {
        let mut state = self.state.lock().expect("lifecycle state mutex poisoned");
        if !state.is_terminal() {
            let from = *state;
            tracing::warn!(component = %self.name, %from, "component failed");
            *state = ComponentState::Failed;
        }
    }

    fn invalid(&self, operation: &'static str, state: ComponentState) -> LifecycleError {
        LifecycleError::InvalidState {
            component: self.name.clone(),
            operation,
            state,
        }
    }

    fn cancelled(&self, operation: &'static str) -> LifecycleError {
        LifecycleError::Cancelled {
            component: self.name.clone(),
            operation,
        }
    }
}

fn ready<'a>() -> ComponentFuture<'a> {
    Box::pin(async { Ok(()) })
}

/// Contract implemented by every long-running worker.
pub trait LifecycleComponent: Send + Sync {
    fn lifecycle(&self) -> &LifecycleState;

    fn name(&self) -> &str {
        self.lifecycle().name()
    }

    fn state(&self) -> ComponentState {
        self.lifecycle().current()
    }

    /// Loads whatever the component needs before it can start.
    fn on_initialize<'a>(&'a self, _cancel: &'a CancellationToken) -> ComponentFuture<'a> {
        ready()
    }

    /// Acquires resources and spawns background work.
    fn on_start<'a>(&'a self, _cancel: &'a CancellationToken) -> ComponentFuture<'a> {
        ready()
    }

    /// Stops background work and flushes state.
    fn on_stop<'a>(&'a self, _cancel: &'a CancellationToken) -> ComponentFuture<'a> {
        ready()
    }

    /// Component-specific health probe, only called while Running.
    fn check_health<'a>(&'a self, _cancel: &'a CancellationToken) -> ComponentFuture<'a> {
        ready()
    }

    /// Releases closable resources. Runs after `on_stop` and after a failed `on_start`.
    fn cleanup(&self) -> ComponentFuture<'_> {
        ready()
    }

    fn initialize<'a>(&'a self, cancel: &'a CancellationToken) -> ComponentFuture<'a> {
        Box::pin(async move {
            let lifecycle = self.lifecycle();
            if cancel.is_cancelled() {
                return Err(lifecycle.cancelled("initialize").into());
            }
            lifecycle.ensure("initialize", ComponentState::Uninitialized)?;

            if let Err(err) = self.on_initialize(cancel).await {
                lifecycle.fail();
                return Err(err)
                    .with_context(|| format!("failed to initialize component {}", self.name()));
            }

            lifecycle.transition(
                "initialize",
                ComponentState::Uninitialized,
                ComponentState::Initialized,
            )?;
            Ok(())
        })
    }

    fn start<'a>(&'a self, cancel: &'a CancellationToken) -> ComponentFuture<'a> {
        Box::pin(async move {
            let lifecycle = self.lifecycle();
            if cancel.is_cancelled() {
                return Err(lifecycle.cancelled("start").into());
            }
            lifecycle.transition("start", ComponentState::Initialized, ComponentState::Starting)?;

            if let Err(err) = self.on_start(cancel).await {
                lifecycle.fail();
                if let Err(cleanup_err) = self.cleanup().await {
                    tracing::warn!(
                        component = self.name(),
                        error = %cleanup_err,
                        "cleanup after failed start also failed"
                    );
                }
                return Err(err)
                    .with_context(|| format!("failed to start component {}", self.name()));
            }

            lifecycle.transition("start", ComponentState::Starting, ComponentState::Running)?;
            tracing::info!(component = self.name(), "component running");
            Ok(())
        })
    }

    fn stop<'a>(&'a self, cancel: &'a CancellationToken) -> ComponentFuture<'a> {
        Box::pin(async move {
            let lifecycle = self.lifecycle();
            lifecycle.transition("stop", ComponentState::Running, ComponentState::Stopping)?;

            let stopped = self.on_stop(cancel).await;
            let cleaned = self.cleanup().await;

            if let Err(err) = stopped.and(cleaned) {
                lifecycle.fail();
                return Err(err)
                    .with_context(|| format!("failed to stop component {}", self.name()));
            }

            lifecycle.transition("stop", ComponentState::Stopping, ComponentState::Stopped)?;
            tracing::info!(component = self.name(), "component stopped");
            Ok(())
        })
    }

    /// Reports why the component is unhealthy; never changes its state.
    fn health<'a>(&'a self, cancel: &'a CancellationToken) -> ComponentFuture<'a> {
        Box::pin(async move {
            self.lifecycle().ensure("health", ComponentState::Running)?;
            self.check_health(cancel)
                .await
                .with_context(|| format!("component {} is unhealthy", self.name()))
        })
    }
}
