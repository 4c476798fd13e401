//! Lifecycle wrappers around the external collaborators so the orchestrator
//! can start, probe, and close them in dependency order.

use crate::lifecycle::collaborators::{ChangeReporter, ChangeStore};
use crate::lifecycle::component::{ComponentFuture, LifecycleComponent, LifecycleState};
use anyhow::Context;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub const PERSISTENCE_COMPONENT: &str = "persistence";
pub const REPORTING_COMPONENT: &str = "reporting";

pub struct PersistenceWorker {
    lifecycle: LifecycleState,
    store: Arc<dyn ChangeStore>,
}

impl PersistenceWorker {
    pub fn new(store: Arc<dyn ChangeStore>) -> Self {
        Self {
            lifecycle: LifecycleState::new(PERSISTENCE_COMPONENT),
            store,
        }
    }

    pub fn store(&self) -> Arc<dyn ChangeStore> {
        self.store.clone()
    }
}

impl LifecycleComponent for PersistenceWorker {
    fn lifecycle(&self) -> &LifecycleState {
        &self.lifecycle
    }

    fn check_health<'a>(&'a self, _cancel: &'a CancellationToken) -> ComponentFuture<'a> {
        Box::pin(async move { self.store.health().await.context("change store health check failed") })
    }

    fn cleanup(&self) -> ComponentFuture<'_> {
        Box::pin(async move {
            self.store.close().await.context("failed to close change store")
        })
    }
}

pub struct ReportingWorker {
    lifecycle: LifecycleState,
    reporter: Arc<dyn ChangeReporter>,
}

impl ReportingWorker {
    pub fn new(reporter: Arc<dyn ChangeReporter>) -> Self {
        Self {
            lifecycle: LifecycleState::new(REPORTING_COMPONENT),
            reporter,
        }
    }

    pub fn reporter(&self) -> Arc<dyn ChangeReporter> {
        self.reporter.clone()
    }
}

impl LifecycleComponent for ReportingWorker {
    fn lifecycle(&self) -> &LifecycleState {
        &self.lifecycle
    }

    fn check_health<'a>(&'a self, _cancel: &'a CancellationToken) -> ComponentFuture<'a> {
        Box::pin(async move {
            self.reporter
                .health()
                .await
                .context("change reporter health check failed")
        })
    }
}
