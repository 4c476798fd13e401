//! Timer-driven sync loop: fetch changes since the persisted cursor, hand them
//! to the store and the reporter, then advance the cursor.

use crate::error::{classify, ErrorKind, LifecycleError};
use crate::lifecycle::collaborators::{ChangeReporter, ChangeStore};
use crate::lifecycle::component::{ComponentFuture, LifecycleComponent, LifecycleState};
use crate::remote::client::{ChangeSet, PaginationInterrupted, RemoteSyncClient};
use crate::remote::listing::SyncCursor;
use crate::runtime::telemetry::{self, Telemetry};
use anyhow::{Context, Result};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

pub const POLLER_COMPONENT: &str = "sync-poller";

/// What a single tick accomplished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub changes: usize,
    pub deletions: usize,
    pub skipped: usize,
    pub cursor: SyncCursor,
}

pub struct SyncPoller {
    lifecycle: LifecycleState,
    pipeline: Arc<SyncPipeline>,
    poll_interval: Duration,
    metrics_interval: Duration,
    run: Mutex<Option<PollerRun>>,
}

struct PollerRun {
    token: CancellationToken,
    loop_handle: JoinHandle<()>,
    metrics_handle: JoinHandle<()>,
}

/// Shared state of the loop. The cursor is only written by the tick that owns it.
struct SyncPipeline {
    client: RemoteSyncClient,
    store: Arc<dyn ChangeStore>,
    reporter: Arc<dyn ChangeReporter>,
    telemetry: Arc<Telemetry>,
    cursor: Mutex<SyncCursor>,
    tick_lock: tokio::sync::Mutex<()>,
}

impl SyncPoller {
    pub fn new(
        client: RemoteSyncClient,
        store: Arc<dyn ChangeStore>,
        reporter: Arc<dyn ChangeReporter>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            lifecycle: LifecycleState::new(POLLER_COMPONENT),
            pipeline: Arc::new(SyncPipeline {
                client,
                store,
                reporter,
                telemetry: Arc::new(Telemetry::default()),
                cursor: Mutex::new(SyncCursor::default()),
                tick_lock: tokio::sync::Mutex::new(()),
            }),
            poll_interval,
            metrics_interval: telemetry::DEFAULT_METRICS_INTERVAL,
            run: Mutex::new(None),
        }
    }

    pub fn with_metrics_interval(mut self, interval: Duration) -> Self {
        self.metrics_interval = interval;
        self
    }

    pub fn telemetry(&self) -> Arc<Telemetry> {
        self.pipeline.telemetry.clone()
    }

    pub fn client(&self) -> &RemoteSyncClient {
        &self.pipeline.client
    }

    pub fn cursor(&self) -> SyncCursor {
        self.pipeline.current_cursor()
    }

    /// Runs one tick outside the timer. Serialized with the background loop.
    pub async fn poll_once(&self, cancel: &CancellationToken) -> Result<TickReport> {
        self.pipeline.tick(cancel).await
    }
}

impl LifecycleComponent for SyncPoller {
    fn lifecycle(&self) -> &LifecycleState {
        &self.lifecycle
    }

    fn on_initialize<'a>(&'a self, _cancel: &'a CancellationToken) -> ComponentFuture<'a> {
        Box::pin(async move {
            let cursor = self
                .pipeline
                .store
                .load_cursor()
                .await
                .context("failed to load sync cursor")?
                .unwrap_or_default();

            if cursor.is_empty() {
                tracing::info!("no persisted cursor; first tick performs a full listing");
            } else {
                tracing::info!(cursor = %cursor, "resuming from persisted cursor");
            }
            *self.pipeline.cursor.lock().expect("cursor mutex poisoned") = cursor;
            Ok(())
        })
    }

    fn on_start<'a>(&'a self, cancel: &'a CancellationToken) -> ComponentFuture<'a> {
        Box::pin(async move {
            let token = cancel.child_token();
            let loop_handle = tokio::spawn(poll_loop(
                self.pipeline.clone(),
                self.poll_interval,
                token.clone(),
            ));
            let metrics_handle = telemetry::spawn_metrics_reporter(
                self.pipeline.telemetry.clone(),
                self.pipeline.client.clone(),
                token.clone(),
                self.metrics_interval,
            );

            tracing::info!(
                interval_secs = self.poll_interval.as_secs_f64(),
                root = self.pipeline.client.root_path(),
                "sync poller started"
            );
            *self.run.lock().expect("poller run mutex poisoned") = Some(PollerRun {
                token,
                loop_handle,
                metrics_handle,
            });
            Ok(())
        })
    }

    fn on_stop<'a>(&'a self, _cancel: &'a CancellationToken) -> ComponentFuture<'a> {
        Box::pin(async move {
            let run = self.run.lock().expect("poller run mutex poisoned").take();
            let Some(run) = run else {
                return Ok(());
            };

            run.token.cancel();
            if let Err(err) = run.loop_handle.await {
                tracing::warn!(error = %err, "sync poll loop task panicked");
            }
            if let Err(err) = run.metrics_handle.await {
                tracing::warn!(error = %err, "metrics reporter task panicked");
            }
            Ok(())
        })
    }

    fn check_health<'a>(&'a self, cancel: &'a CancellationToken) -> ComponentFuture<'a> {
        Box::pin(async move {
            let loop_alive = self
                .run
                .lock()
                .expect("poller run mutex poisoned")
                .as_ref()
                .is_some_and(|run| !run.loop_handle.is_finished());
            if !loop_alive {
                return Err(LifecycleError::Unhealthy {
                    component: self.name().to_owned(),
                    reason: "poll loop is not running".into(),
                }
                .into());
            }

            self.pipeline.client.check(cancel).await
        })
    }
}

async fn poll_loop(pipeline: Arc<SyncPipeline>, interval: Duration, token: CancellationToken) {
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        match pipeline.tick(&token).await {
            Ok(report) => {
                tracing::info!(
                    changes = report.changes,
                    deletions = report.deletions,
                    skipped = report.skipped,
                    cursor = %report.cursor,
                    "sync tick complete"
                );
            }
            Err(_) if token.is_cancelled() => break,
            Err(err) => log_tick_failure(&err),
        }
    }

    tracing::debug!("sync poll loop exited");
}

fn log_tick_failure(err: &anyhow::Error) {
    match classify(err) {
        Some(ErrorKind::AuthFailure) => {
            tracing::error!(error = ?err, "remote API rejected credentials; sync cannot proceed until fixed")
        }
        Some(ErrorKind::CircuitOpen) => {
            tracing::warn!(error = %err, "remote circuit open; skipping tick")
        }
        kind => tracing::warn!(error = ?err, ?kind, "sync tick failed; retrying on next tick"),
    }
}

impl SyncPipeline {
    fn current_cursor(&self) -> SyncCursor {
        self.cursor.lock().expect("cursor mutex poisoned").clone()
    }

    async fn tick(&self, cancel: &CancellationToken) -> Result<TickReport> {
        let _serialized = self.tick_lock.lock().await;
        self.telemetry.record_tick();

        let since = self.current_cursor();
        let result = match self.client.get_changes(Some(&since), cancel).await {
            Ok(set) => self.deliver(set).await,
            Err(err) => {
                if let Some(interrupted) = err.downcast_ref::<PaginationInterrupted>() {
                    self.telemetry.record_interrupted_listing();
                    match self.deliver(interrupted.progress.clone()).await {
                        Ok(report) => tracing::info!(
                            changes = report.changes,
                            cursor = %report.cursor,
                            "kept progress from interrupted listing"
                        ),
                        Err(deliver_err) => tracing::warn!(
                            error = %deliver_err,
                            "failed to keep progress from interrupted listing"
                        ),
                    }
                }
                Err(err)
            }
        };

        if result.is_err() {
            self.telemetry.record_failed_tick();
        }
        result
    }

    /// Persists, reports, then advances the cursor. A failure before the cursor
    /// is saved leaves it untouched so the next tick fetches the batch again.
    async fn deliver(&self, set: ChangeSet) -> Result<TickReport> {
        let ChangeSet {
            changes,
            cursor,
            skipped,
            ..
        } = set;
        let deletions = changes.iter().filter(|change| change.is_deleted).count();

        if !changes.is_empty() {
            self.store
                .store_changes(&changes)
                .await
                .context("failed to persist changes")?;
            self.reporter
                .generate_and_send(&changes)
                .await
                .context("failed to send change report")?;
        }

        if !cursor.is_empty() && cursor != self.current_cursor() {
            self.store
                .save_cursor(&cursor)
                .await
                .context("failed to persist sync cursor")?;
            *self.cursor.lock().expect("cursor mutex poisoned") = cursor.clone();
        }

        self.telemetry
            .record_changes(changes.len() as u64, deletions as u64);
        self.telemetry.record_skipped(skipped as u64);

        Ok(TickReport {
            changes: changes.len(),
            deletions,
            skipped,
            cursor,
        })
    }
}
