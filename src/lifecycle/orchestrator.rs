//! Startup/shutdown sequencing and aggregate health over a fixed, ordered set
//! of lifecycle components.

use crate::error::{classify, ErrorKind, LifecycleError};
use crate::lifecycle::component::{ComponentState, LifecycleComponent};
use crate::runtime::backoff::sleep_with_cancellation;
use crate::runtime::config::WatchConfig;
use anyhow::{Context, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout_at, Instant};
use tokio_util::sync::CancellationToken;

const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_HEALTH_POLL_INTERVAL: Duration = Duration::from_millis(500);

pub struct Orchestrator {
    components: Vec<Arc<dyn LifecycleComponent>>,
    startup_timeout: Duration,
    shutdown_timeout: Duration,
    health_poll_interval: Duration,
}

impl Orchestrator {
    /// Registration order is start order; stop runs in reverse.
    pub fn new(components: Vec<Arc<dyn LifecycleComponent>>) -> Self {
        Self {
            components,
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            health_poll_interval: DEFAULT_HEALTH_POLL_INTERVAL,
        }
    }

    pub fn from_config(components: Vec<Arc<dyn LifecycleComponent>>, config: &WatchConfig) -> Self {
        Self::new(components).with_timeouts(
            config.startup_timeout(),
            config.shutdown_timeout(),
            config.health_poll_interval(),
        )
    }

    pub fn with_timeouts(
        mut self,
        startup_timeout: Duration,
        shutdown_timeout: Duration,
        health_poll_interval: Duration,
    ) -> Self {
        self.startup_timeout = startup_timeout;
        self.shutdown_timeout = shutdown_timeout;
        self.health_poll_interval = health_poll_interval;
        self
    }

    pub fn components(&self) -> &[Arc<dyn LifecycleComponent>] {
        &self.components
    }

    pub fn states(&self) -> Vec<(String, ComponentState)> {
        self.components
            .iter()
            .map(|component| (component.name().to_owned(), component.state()))
            .collect()
    }

    /// Starts every component in order and waits for each to report healthy
    /// before moving on. The first failure aborts the sequence; components that
    /// already started are left running for the caller to stop.
    pub async fn start(&self, cancel: &CancellationToken) -> Result<()> {
        for component in &self.components {
            let name = component.name().to_owned();
            tracing::info!(component = %name, "starting component");
            self.start_component(component.as_ref(), cancel)
                .await
                .with_context(|| format!("startup aborted at component {name}"))?;
        }

        tracing::info!(components = self.components.len(), "all components running");
        Ok(())
    }

    /// Stops components in reverse registration order, waiting for each to
    /// reach Stopped before moving to the previous one. Components that never
    /// started or already finished are skipped. A component caught mid-start or
    /// mid-stop is reported after the others have been stopped.
    pub async fn stop(&self, cancel: &CancellationToken) -> Result<()> {
        let mut stranded = None;

        for component in self.components.iter().rev() {
            let name = component.name().to_owned();
            let state = component.state();
            match state {
                ComponentState::Running => {}
                ComponentState::Starting | ComponentState::Stopping => {
                    tracing::warn!(component = %name, %state, "component is mid-transition; cannot stop it");
                    if stranded.is_none() {
                        stranded = Some(LifecycleError::InvalidState {
                            component: name,
                            operation: "stop",
                            state,
                        });
                    }
                    continue;
                }
                _ => {
                    tracing::debug!(component = %name, %state, "skipping stop of non-running component");
                    continue;
                }
            }

            tracing::info!(component = %name, "stopping component");
            let deadline = Instant::now() + self.shutdown_timeout;
            let stopped = bounded(
                deadline,
                &name,
                "stop",
                self.shutdown_timeout,
                component.stop(cancel),
            )
            .await;
            self.abandon_on_timeout(component.as_ref(), stopped)
                .await
                .with_context(|| format!("shutdown aborted at component {name}"))?;

            let state = component.state();
            if state != ComponentState::Stopped {
                return Err(LifecycleError::InvalidState {
                    component: name.clone(),
                    operation: "stop",
                    state,
                })
                .with_context(|| format!("shutdown aborted at component {name}"));
            }
        }

        if let Some(err) = stranded {
            return Err(err).context("shutdown left components mid-transition");
        }

        tracing::info!("all components stopped");
        Ok(())
    }

    /// Healthy iff every component is healthy; returns the first failure.
    pub async fn health(&self, cancel: &CancellationToken) -> Result<()> {
        for component in &self.components {
            component.health(cancel).await?;
        }
        Ok(())
    }

    async fn start_component(
        &self,
        component: &dyn LifecycleComponent,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let name = component.name().to_owned();
        let deadline = Instant::now() + self.startup_timeout;

        if component.state() == ComponentState::Uninitialized {
            let initialized = bounded(
                deadline,
                &name,
                "initialize",
                self.startup_timeout,
                component.initialize(cancel),
            )
            .await;
            self.abandon_on_timeout(component, initialized).await?;
        }

        let started = bounded(
            deadline,
            &name,
            "start",
            self.startup_timeout,
            component.start(cancel),
        )
        .await;
        self.abandon_on_timeout(component, started).await?;

        let mut last_error: Option<anyhow::Error> = None;
        loop {
            let err = match timeout_at(deadline, component.health(cancel)).await {
                Ok(Ok(())) => {
                    tracing::info!(component = %name, "component healthy");
                    return Ok(());
                }
                Ok(Err(err)) if ends_health_wait(&err) => return Err(err),
                Ok(Err(err)) => err,
                Err(_) => return Err(self.health_timeout(&name, last_error)),
            };

            let now = Instant::now();
            if now >= deadline {
                return Err(self.health_timeout(&name, Some(err)));
            }

            tracing::debug!(
                component = %name,
                error = %err,
                "component not healthy yet"
            );
            last_error = Some(err);
            let wait = self.health_poll_interval.min(deadline - now);
            if sleep_with_cancellation(wait, cancel).await.is_err() {
                return Err(LifecycleError::Cancelled {
                    component: name,
                    operation: "health",
                }
                .into());
            }
        }
    }

    /// The startup deadline passed before the component reported healthy. The
    /// most recent health failure, if any, stays in the chain.
    fn health_timeout(&self, component: &str, last_error: Option<anyhow::Error>) -> anyhow::Error {
        let timeout = LifecycleError::Timeout {
            component: component.to_owned(),
            operation: "health",
            after: self.startup_timeout,
        };
        match last_error {
            Some(err) => err.context(timeout),
            None => timeout.into(),
        }
    }

    /// A transition cut off by its deadline leaves the component in an
    /// intermediate state. Mark it Failed and release its resources.
    async fn abandon_on_timeout(
        &self,
        component: &dyn LifecycleComponent,
        outcome: Result<()>,
    ) -> Result<()> {
        let Err(err) = outcome else {
            return Ok(());
        };
        let timed_out = matches!(
            err.downcast_ref::<LifecycleError>(),
            Some(LifecycleError::Timeout { .. })
        );
        if !timed_out || component.state().is_terminal() {
            return Err(err);
        }

        let from = component.state();
        component.lifecycle().fail();
        tracing::warn!(
            component = component.name(),
            %from,
            "lifecycle transition timed out; running cleanup"
        );
        match timeout_at(Instant::now() + self.shutdown_timeout, component.cleanup()).await {
            Ok(Ok(())) => {}
            Ok(Err(cleanup_err)) => tracing::warn!(
                component = component.name(),
                error = %cleanup_err,
                "cleanup after timed out transition failed"
            ),
            Err(_) => tracing::warn!(
                component = component.name(),
                "cleanup after timed out transition did not finish"
            ),
        }
        Err(err)
    }
}

async fn bounded<F>(
    deadline: Instant,
    component: &str,
    operation: &'static str,
    after: Duration,
    future: F,
) -> Result<()>
where
    F: Future<Output = Result<()>>,
{
    match timeout_at(deadline, future).await {
        Ok(result) => result,
        Err(_) => Err(LifecycleError::Timeout {
            component: component.to_owned(),
            operation,
            after,
        }
        .into()),
    }
}

/// Unhealthy reports keep the wait going. Misuse, timeouts, cancellation, and
/// failures no retry can fix (rejected credentials, bad input) end it.
fn ends_health_wait(err: &anyhow::Error) -> bool {
    let lifecycle_stop = matches!(
        err.downcast_ref::<LifecycleError>(),
        Some(
            LifecycleError::Timeout { .. }
                | LifecycleError::InvalidState { .. }
                | LifecycleError::Cancelled { .. }
        )
    );
    lifecycle_stop || classify(err).is_some_and(ErrorKind::is_permanent)
}
