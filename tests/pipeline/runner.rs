use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::support::{
    helpers::{fast_config, init_tracing, wait_until, RecordingReporter, RecordingStore},
    mock_api::{
        deleted_entry, file_entry, folder_entry, page, MockListing, MockListingServer, Scripted,
    },
};
use anyhow::{Context, Result};
use dropwatch::{classify, ComponentState, ErrorKind, Runner, SyncCursor};
use tokio::time::timeout;

const LIST: &str = "/2/files/list_folder";
const CONTINUE: &str = "/2/files/list_folder/continue";
const CHECK: &str = "/2/check/user";

fn assert_all_stopped(runner: &Runner) {
    for (name, state) in runner.orchestrator().states() {
        assert_eq!(state, ComponentState::Stopped, "component {name} not stopped");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn runner_syncs_changes_and_persists_cursor() -> Result<()> {
    init_tracing();
    let listing = MockListing::new();
    listing.script_list(Scripted::Page(page(
        vec![
            file_entry("/inbox/a.csv", 10, "2024-02-02T12:00:00Z"),
            folder_entry("/inbox/archive"),
        ],
        "cursor-1",
        true,
    )));
    listing.script_continue(Scripted::Page(page(
        vec![
            file_entry("/inbox/b.csv", 20, "2024-02-02T12:05:00+01:00"),
            deleted_entry("/inbox/old.csv"),
        ],
        "cursor-2",
        false,
    )));
    let server = MockListingServer::start(listing.clone()).await?;

    let store = Arc::new(RecordingStore::default());
    let reporter = Arc::new(RecordingReporter::default());
    let config = fast_config(server.url()).root_path("/inbox").build()?;
    let mut runner = Runner::from_config(&config, store.clone(), reporter.clone())?;

    runner.start().await?;
    wait_until("cursor persisted", Duration::from_secs(5), || {
        store.cursor() == Some(SyncCursor::new("cursor-2"))
    })
    .await?;
    runner.health().await?;

    let changes = store.changes();
    assert_eq!(changes.len(), 3);
    assert_eq!(store.batch_count(), 1);
    assert_eq!(reporter.reports(), vec![3]);
    assert!(changes.iter().any(|change| change.is_deleted));

    // Idle ticks continue from the saved cursor without rewriting it.
    wait_until("idle tick", Duration::from_secs(5), || {
        listing.count(CONTINUE) >= 2
    })
    .await?;
    assert_eq!(listing.count(LIST), 1);
    assert_eq!(store.saved_cursors(), vec![SyncCursor::new("cursor-2")]);

    runner.stop().await?;
    assert_all_stopped(&runner);
    assert_eq!(store.close_count(), 1);

    server.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn runner_resumes_from_stored_cursor() -> Result<()> {
    init_tracing();
    let listing = MockListing::new();
    listing.script_continue(Scripted::Page(page(
        vec![file_entry("/c.txt", 3, "2024-06-01T00:00:00Z")],
        "cursor-next",
        false,
    )));
    let server = MockListingServer::start(listing.clone()).await?;

    let store = Arc::new(RecordingStore::with_cursor("cursor-saved"));
    let reporter = Arc::new(RecordingReporter::default());
    let config = fast_config(server.url()).build()?;
    let mut runner = Runner::from_config(&config, store.clone(), reporter.clone())?;

    runner.start().await?;
    wait_until("cursor advanced", Duration::from_secs(5), || {
        store.cursor() == Some(SyncCursor::new("cursor-next"))
    })
    .await?;
    runner.stop().await?;

    let first_continue = listing
        .requests()
        .into_iter()
        .find(|request| request.endpoint == CONTINUE)
        .context("continue request expected")?;
    assert_eq!(first_continue.body["cursor"], "cursor-saved");
    assert_eq!(listing.count(LIST), 0);
    assert_eq!(reporter.reports(), vec![1]);

    server.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn store_failure_keeps_cursor_for_redelivery() -> Result<()> {
    init_tracing();
    let listing = MockListing::new();
    // Every full listing returns the same batch until one is delivered.
    for _ in 0..200 {
        listing.script_list(Scripted::Page(page(
            vec![file_entry("/retry.txt", 5, "2024-07-07T07:07:07Z")],
            "cursor-pending",
            false,
        )));
    }
    let server = MockListingServer::start(listing.clone()).await?;

    let store = Arc::new(RecordingStore::default());
    store.reject_writes(true);
    let reporter = Arc::new(RecordingReporter::default());
    let config = fast_config(server.url()).build()?;
    let mut runner = Runner::from_config(&config, store.clone(), reporter.clone())?;

    runner.start().await?;
    wait_until("first listing", Duration::from_secs(5), || {
        listing.count(LIST) >= 1
    })
    .await?;
    assert_eq!(store.cursor(), None);
    assert!(reporter.reports().is_empty());

    store.reject_writes(false);
    wait_until("redelivery", Duration::from_secs(5), || {
        store.cursor() == Some(SyncCursor::new("cursor-pending"))
    })
    .await?;
    assert_eq!(store.changes().len(), 1);
    assert_eq!(reporter.reports(), vec![1]);

    runner.stop().await?;
    server.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn rejected_credentials_abort_startup_immediately() -> Result<()> {
    init_tracing();
    let listing = MockListing::new();
    for _ in 0..20 {
        listing.script_check(Scripted::status(401));
    }
    let server = MockListingServer::start(listing.clone()).await?;

    let store = Arc::new(RecordingStore::default());
    let reporter = Arc::new(RecordingReporter::default());
    let config = fast_config(server.url())
        .breaker_failure_threshold(5)
        .startup_timeout(Duration::from_secs(2))
        .build()?;
    let mut runner = Runner::from_config(&config, store.clone(), reporter)?;

    let started = Instant::now();
    let err = timeout(Duration::from_secs(5), runner.start())
        .await
        .context("startup should not hang")?
        .expect_err("a rejected health probe must abort startup");

    assert!(
        started.elapsed() < Duration::from_secs(1),
        "auth failure waited {:?} for the startup deadline",
        started.elapsed()
    );
    assert_eq!(classify(&err), Some(ErrorKind::AuthFailure));
    let message = format!("{err:#}");
    assert!(
        message.contains("sync-poller"),
        "startup error should name the component, got {message}"
    );
    assert_eq!(listing.count(CHECK), 1);
    assert_all_stopped(&runner);
    assert_eq!(store.close_count(), 1);

    server.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn flapping_remote_times_out_with_last_health_error() -> Result<()> {
    init_tracing();
    let listing = MockListing::new();
    for _ in 0..200 {
        listing.script_check(Scripted::status(503));
    }
    let server = MockListingServer::start(listing.clone()).await?;

    let store = Arc::new(RecordingStore::default());
    let config = fast_config(server.url())
        .startup_timeout(Duration::from_millis(300))
        .build()?;
    let mut runner = Runner::from_config(
        &config,
        store.clone(),
        Arc::new(RecordingReporter::default()),
    )?;

    let err = timeout(Duration::from_secs(5), runner.start())
        .await
        .context("startup should give up at its deadline")?
        .expect_err("an unavailable remote must abort startup");

    assert_eq!(classify(&err), Some(ErrorKind::Timeout));
    let message = format!("{err:#}");
    assert!(
        message.contains("503"),
        "timeout should keep the last health error, got {message}"
    );
    assert_all_stopped(&runner);
    assert_eq!(store.close_count(), 1);

    server.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancelled_token_ends_run_loop() -> Result<()> {
    init_tracing();
    let listing = MockListing::new();
    let server = MockListingServer::start(listing.clone()).await?;

    let store = Arc::new(RecordingStore::default());
    let config = fast_config(server.url()).build()?;
    let mut runner = Runner::from_config(
        &config,
        store.clone(),
        Arc::new(RecordingReporter::default()),
    )?;
    let token = runner.cancellation_token();
    runner.start().await?;

    let handle = tokio::spawn(async move {
        let outcome = runner.run_until_ctrl_c().await;
        (runner, outcome)
    });

    wait_until("first tick", Duration::from_secs(5), || {
        store.cursor().is_some()
    })
    .await?;
    token.cancel();

    let (runner, outcome) = timeout(Duration::from_secs(5), handle)
        .await
        .context("runner should exit after cancellation")??;
    outcome?;
    assert_all_stopped(&runner);
    assert_eq!(store.cursor(), Some(SyncCursor::new("cursor-idle")));
    assert_eq!(store.close_count(), 1);

    server.shutdown().await;
    Ok(())
}
