use crate::remote::client::RemoteSyncClient;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio::{select, time};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Default interval used by the metrics reporter task.
pub const DEFAULT_METRICS_INTERVAL: Duration = Duration::from_secs(60);

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Installs a basic tracing subscriber (if one is not already active).
///
/// The subscriber honours `RUST_LOG` if it is present, otherwise it falls back to `info`.
/// Calling this function multiple times is harmless.
pub fn init_tracing() {
    if TRACING_INIT.get().is_some() {
        return;
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .try_init();

    let _ = TRACING_INIT.set(());
}

/// Rolling counters for the sync pipeline.
#[derive(Default, Debug)]
pub struct Telemetry {
    ticks: AtomicU64,
    failed_ticks: AtomicU64,
    changes: AtomicU64,
    deletions: AtomicU64,
    skipped_entries: AtomicU64,
    interrupted_listings: AtomicU64,
}

impl Telemetry {
    pub fn record_tick(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed_tick(&self) {
        self.failed_ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_changes(&self, changes: u64, deletions: u64) {
        if changes == 0 {
            return;
        }
        self.changes.fetch_add(changes, Ordering::Relaxed);
        self.deletions.fetch_add(deletions, Ordering::Relaxed);
    }

    pub fn record_skipped(&self, skipped: u64) {
        if skipped == 0 {
            return;
        }
        self.skipped_entries.fetch_add(skipped, Ordering::Relaxed);
    }

    pub fn record_interrupted_listing(&self) {
        self.interrupted_listings.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            ticks: self.ticks.load(Ordering::Relaxed),
            failed_ticks: self.failed_ticks.load(Ordering::Relaxed),
            changes: self.changes.load(Ordering::Relaxed),
            deletions: self.deletions.load(Ordering::Relaxed),
            skipped_entries: self.skipped_entries.load(Ordering::Relaxed),
            interrupted_listings: self.interrupted_listings.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct TelemetrySnapshot {
    pub ticks: u64,
    pub failed_ticks: u64,
    pub changes: u64,
    pub deletions: u64,
    pub skipped_entries: u64,
    pub interrupted_listings: u64,
}

/// Spawns a background task that periodically logs pipeline counters and remote call health.
pub fn spawn_metrics_reporter(
    telemetry: Arc<Telemetry>,
    client: RemoteSyncClient,
    shutdown: CancellationToken,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut last_snapshot = telemetry.snapshot();
        let mut last_tick = Instant::now();

        loop {
            select! {
                _ = shutdown.cancelled() => {
                    tracing::info!(target: "dropwatch::metrics", "metrics reporter shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let current = telemetry.snapshot();
                    let change_delta = current.changes.saturating_sub(last_snapshot.changes);
                    let elapsed = last_tick.elapsed().as_secs_f64();
                    let changes_per_min = if elapsed <= f64::EPSILON {
                        0.0
                    } else {
                        change_delta as f64 * 60.0 / elapsed
                    };
                    let remote = client.metrics();

                    tracing::info!(
                        target: "dropwatch::metrics",
                        changes_per_min = format!("{changes_per_min:.2}"),
                        ticks = current.ticks,
                        failed_ticks = current.failed_ticks,
                        changes = current.changes,
                        deletions = current.deletions,
                        skipped = current.skipped_entries,
                        interrupted = current.interrupted_listings,
                        requests = remote.total_requests,
                        errors = remote.total_errors,
                        error_rate = format!("{:.3}", remote.error_rate),
                        avg_latency_ms = format!("{:.1}", remote.average_latency_ms),
                        rate_limited = remote.total_rate_limited,
                        permanent = remote.total_permanent,
                        rejected = remote.total_rejected,
                        breaker = ?remote.breaker_state,
                        "runtime metrics snapshot"
                    );

                    last_snapshot = current;
                    last_tick = Instant::now();
                }
            }
        }
    })
}
