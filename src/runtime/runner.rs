use crate::lifecycle::collaborators::{ChangeReporter, ChangeStore};
use crate::lifecycle::component::LifecycleComponent;
use crate::lifecycle::orchestrator::Orchestrator;
use crate::lifecycle::poller::SyncPoller;
use crate::lifecycle::workers::{PersistenceWorker, ReportingWorker};
use crate::remote::client::RemoteSyncClient;
use crate::runtime::config::WatchConfig;
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Drives one start/stop cycle of the component registry and handles OS
/// signals for graceful shutdowns.
pub struct Runner {
    orchestrator: Orchestrator,
    shutdown: CancellationToken,
    started: bool,
}

impl Runner {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self {
            orchestrator,
            shutdown: CancellationToken::new(),
            started: false,
        }
    }

    /// Wires the standard registry: persistence, then reporting, then the sync poller.
    pub fn from_config(
        config: &WatchConfig,
        store: Arc<dyn ChangeStore>,
        reporter: Arc<dyn ChangeReporter>,
    ) -> Result<Self> {
        let client = RemoteSyncClient::from_config(config).context("failed to build sync client")?;
        let poller = SyncPoller::new(
            client,
            store.clone(),
            reporter.clone(),
            config.poll_interval(),
        )
        .with_metrics_interval(config.metrics_interval());

        let components: Vec<Arc<dyn LifecycleComponent>> = vec![
            Arc::new(PersistenceWorker::new(store)),
            Arc::new(ReportingWorker::new(reporter)),
            Arc::new(poller),
        ];
        Ok(Self::new(Orchestrator::from_config(components, config)))
    }

    /// Returns a clone of the root shutdown token so external callers can integrate
    /// with their own signal handlers or cancellation strategies.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    /// Starts every component. A startup failure is fatal: whatever already
    /// started is stopped before the error is returned.
    pub async fn start(&mut self) -> Result<()> {
        if self.started {
            return Ok(());
        }

        if let Err(err) = self.orchestrator.start(&self.shutdown).await {
            tracing::error!(error = ?err, "startup failed; stopping started components");
            self.shutdown.cancel();
            if let Err(stop_err) = self.orchestrator.stop(&CancellationToken::new()).await {
                tracing::warn!(error = ?stop_err, "failed to stop components after startup failure");
            }
            return Err(err);
        }

        self.started = true;
        Ok(())
    }

    /// Aggregate health of the registry.
    pub async fn health(&self) -> Result<()> {
        self.orchestrator.health(&self.shutdown).await
    }

    /// Cancels background work and stops components in reverse order.
    pub async fn stop(&mut self) -> Result<()> {
        if !self.started {
            return Ok(());
        }

        self.shutdown.cancel();
        self.started = false;
        self.orchestrator.stop(&CancellationToken::new()).await
    }

    /// Runs until a Ctrl-C (SIGINT) is received or the shutdown token is cancelled elsewhere.
    pub async fn run_until_ctrl_c(&mut self) -> Result<()> {
        self.start().await?;
        tracing::info!("runner started; waiting for Ctrl-C (SIGINT) to initiate shutdown");

        tokio::select! {
            _ = signal::ctrl_c() => {
                tracing::info!("Ctrl-C received; shutting down runner");
            }
            _ = self.shutdown.cancelled() => {
                tracing::info!("runner shutdown token cancelled");
            }
        }

        self.stop().await
    }
}
