use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Mutex,
    },
    time::{Duration, Instant},
};

use anyhow::{anyhow, bail, Result};
use dropwatch::lifecycle::CollaboratorFuture;
use dropwatch::{
    ChangeReporter, ChangeStore, NormalizedChange, SyncCursor, WatchConfig, WatchConfigBuilder,
};
use once_cell::sync::Lazy;
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

static TRACING_SUBSCRIBER: Lazy<()> = Lazy::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
});

pub fn init_tracing() {
    Lazy::force(&TRACING_SUBSCRIBER);
}

/// Configuration with short timings against a local server.
pub fn fast_config(url: &str) -> WatchConfigBuilder {
    WatchConfig::builder()
        .api_url(url)
        .access_token("sl.test-token")
        .poll_interval(Duration::from_millis(50))
        .request_timeout(Duration::from_secs(2))
        .max_retries(2)
        .initial_backoff(Duration::from_millis(5))
        .max_backoff(Duration::from_millis(20))
        .breaker_failure_threshold(50)
        .breaker_reset_timeout(Duration::from_millis(200))
        .startup_timeout(Duration::from_millis(500))
        .shutdown_timeout(Duration::from_secs(2))
        .health_poll_interval(Duration::from_millis(20))
        .metrics_interval(Duration::from_millis(100))
}

#[derive(Default)]
pub struct RecordingStore {
    cursor: Mutex<Option<SyncCursor>>,
    saved_cursors: Mutex<Vec<SyncCursor>>,
    batches: Mutex<Vec<Vec<NormalizedChange>>>,
    closed: AtomicUsize,
    reject_writes: AtomicBool,
}

impl RecordingStore {
    pub fn with_cursor(cursor: &str) -> Self {
        let store = Self::default();
        *store.cursor.lock().expect("store poisoned") = Some(SyncCursor::new(cursor));
        store
    }

    pub fn cursor(&self) -> Option<SyncCursor> {
        self.cursor.lock().expect("store poisoned").clone()
    }

    pub fn saved_cursors(&self) -> Vec<SyncCursor> {
        self.saved_cursors.lock().expect("store poisoned").clone()
    }

    pub fn changes(&self) -> Vec<NormalizedChange> {
        self.batches
            .lock()
            .expect("store poisoned")
            .iter()
            .flatten()
            .cloned()
            .collect()
    }

    pub fn batch_count(&self) -> usize {
        self.batches.lock().expect("store poisoned").len()
    }

    pub fn close_count(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn reject_writes(&self, reject: bool) {
        self.reject_writes.store(reject, Ordering::SeqCst);
    }
}

impl ChangeStore for RecordingStore {
    fn load_cursor(&self) -> CollaboratorFuture<'_, Option<SyncCursor>> {
        Box::pin(async move { Ok(self.cursor()) })
    }

    fn save_cursor<'a>(&'a self, cursor: &'a SyncCursor) -> CollaboratorFuture<'a> {
        Box::pin(async move {
            *self.cursor.lock().expect("store poisoned") = Some(cursor.clone());
            self.saved_cursors
                .lock()
                .expect("store poisoned")
                .push(cursor.clone());
            Ok(())
        })
    }

    fn store_changes<'a>(&'a self, changes: &'a [NormalizedChange]) -> CollaboratorFuture<'a> {
        Box::pin(async move {
            if self.reject_writes.load(Ordering::SeqCst) {
                return Err(anyhow!("disk full"));
            }
            self.batches
                .lock()
                .expect("store poisoned")
                .push(changes.to_vec());
            Ok(())
        })
    }

    fn close(&self) -> CollaboratorFuture<'_> {
        Box::pin(async move {
            self.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }
}

#[derive(Default)]
pub struct RecordingReporter {
    reports: Mutex<Vec<usize>>,
}

impl RecordingReporter {
    pub fn reports(&self) -> Vec<usize> {
        self.reports.lock().expect("reporter poisoned").clone()
    }
}

impl ChangeReporter for RecordingReporter {
    fn generate_and_send<'a>(&'a self, changes: &'a [NormalizedChange]) -> CollaboratorFuture<'a> {
        Box::pin(async move {
            self.reports
                .lock()
                .expect("reporter poisoned")
                .push(changes.len());
            Ok(())
        })
    }
}

/// Polls `condition` until it holds or `timeout` elapses.
pub async fn wait_until<F>(description: &str, timeout: Duration, mut condition: F) -> Result<()>
where
    F: FnMut() -> bool,
{
    let start = Instant::now();
    loop {
        if condition() {
            return Ok(());
        }
        if start.elapsed() > timeout {
            bail!("{description} did not happen within {:?}", timeout);
        }
        sleep(Duration::from_millis(10)).await;
    }
}
