use std::time::{Duration, Instant};

use crate::support::{
    helpers::{fast_config, init_tracing},
    mock_api::{
        deleted_entry, file_entry, folder_entry, page, MockListing, MockListingServer, Scripted,
    },
};
use anyhow::Result;
use dropwatch::{classify, CircuitState, ErrorKind, RemoteSyncClient, SyncCursor};
use tokio_util::sync::CancellationToken;

const LIST: &str = "/2/files/list_folder";
const CONTINUE: &str = "/2/files/list_folder/continue";

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn full_listing_follows_pages_with_bearer_token() -> Result<()> {
    init_tracing();
    let listing = MockListing::new();
    listing.script_list(Scripted::Page(page(
        vec![
            file_entry("/Reports/q1.pdf", 2048, "2024-03-01T10:00:00Z"),
            folder_entry("/Reports"),
        ],
        "cursor-1",
        true,
    )));
    listing.script_continue(Scripted::Page(page(
        vec![deleted_entry("/Reports/draft.txt")],
        "cursor-2",
        false,
    )));
    let server = MockListingServer::start(listing.clone()).await?;

    let config = fast_config(server.url()).root_path("/Reports/").build()?;
    let client = RemoteSyncClient::from_config(&config)?;
    let set = client.get_changes(None, &CancellationToken::new()).await?;

    assert_eq!(set.pages, 2);
    assert_eq!(set.skipped, 0);
    assert_eq!(set.cursor, SyncCursor::new("cursor-2"));
    let paths: Vec<_> = set.changes.iter().map(|c| c.path.as_str()).collect();
    assert_eq!(paths, vec!["/Reports/q1.pdf", "/Reports/draft.txt"]);
    assert!(set.changes[1].is_deleted);
    assert!(set.changes[1].modified_at.is_none());

    let requests = listing.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].endpoint, LIST);
    assert_eq!(requests[0].body["path"], "/Reports");
    assert_eq!(requests[0].body["recursive"], true);
    assert_eq!(requests[1].endpoint, CONTINUE);
    assert_eq!(requests[1].body["cursor"], "cursor-1");
    for request in &requests {
        assert_eq!(
            request.authorization.as_deref(),
            Some("Bearer sl.test-token")
        );
    }

    server.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rejected_credentials_fail_after_one_request() -> Result<()> {
    init_tracing();
    let listing = MockListing::new();
    listing.script_list(Scripted::status(401));
    let server = MockListingServer::start(listing.clone()).await?;

    let client = RemoteSyncClient::from_config(&fast_config(server.url()).build()?)?;
    let err = client
        .get_changes(None, &CancellationToken::new())
        .await
        .expect_err("401 must fail the listing");

    assert_eq!(classify(&err), Some(ErrorKind::AuthFailure));
    assert_eq!(listing.count(LIST), 1);

    server.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn server_errors_are_retried_until_success() -> Result<()> {
    init_tracing();
    let listing = MockListing::new();
    listing
        .script_list(Scripted::status(503))
        .script_list(Scripted::status(502))
        .script_list(Scripted::Page(page(
            vec![file_entry("/a.txt", 1, "2024-01-01T00:00:00Z")],
            "cursor-a",
            false,
        )));
    let server = MockListingServer::start(listing.clone()).await?;

    let client = RemoteSyncClient::from_config(&fast_config(server.url()).build()?)?;
    let set = client.get_changes(None, &CancellationToken::new()).await?;

    assert_eq!(set.changes.len(), 1);
    assert_eq!(listing.count(LIST), 3);
    let metrics = client.metrics();
    assert_eq!(metrics.total_requests, 3);
    assert_eq!(metrics.total_errors, 2);
    assert_eq!(metrics.breaker_state, CircuitState::Closed);

    server.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn retry_after_hint_is_capped_by_max_backoff() -> Result<()> {
    init_tracing();
    let listing = MockListing::new();
    listing
        .script_list(Scripted::rate_limited(30))
        .script_list(Scripted::Page(page(Vec::new(), "cursor-after-limit", false)));
    let server = MockListingServer::start(listing.clone()).await?;

    let client = RemoteSyncClient::from_config(&fast_config(server.url()).build()?)?;
    let started = Instant::now();
    let set = client.get_changes(None, &CancellationToken::new()).await?;

    assert!(
        started.elapsed() < Duration::from_secs(5),
        "retry waited {:?}; the hint should be capped",
        started.elapsed()
    );
    assert_eq!(set.cursor, SyncCursor::new("cursor-after-limit"));
    assert_eq!(client.metrics().total_rate_limited, 1);

    server.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reset_cursor_falls_back_to_full_listing() -> Result<()> {
    init_tracing();
    let listing = MockListing::new();
    listing
        .script_continue(Scripted::cursor_reset())
        .script_list(Scripted::Page(page(
            vec![file_entry("/fresh.txt", 9, "2024-05-05T05:05:05Z")],
            "cursor-fresh",
            false,
        )));
    let server = MockListingServer::start(listing.clone()).await?;

    let client = RemoteSyncClient::from_config(&fast_config(server.url()).build()?)?;
    let stale = SyncCursor::new("cursor-stale");
    let set = client
        .get_changes(Some(&stale), &CancellationToken::new())
        .await?;

    assert_eq!(listing.endpoints(), vec![CONTINUE, LIST]);
    assert_eq!(set.cursor, SyncCursor::new("cursor-fresh"));
    assert_eq!(set.changes.len(), 1);
    assert_eq!(client.breaker().state(), CircuitState::Closed);

    server.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn open_circuit_rejects_without_touching_the_network() -> Result<()> {
    init_tracing();
    let listing = MockListing::new();
    listing
        .script_list(Scripted::status(500))
        .script_list(Scripted::status(500));
    let server = MockListingServer::start(listing.clone()).await?;

    let config = fast_config(server.url())
        .max_retries(0)
        .breaker_failure_threshold(2)
        .breaker_reset_timeout(Duration::from_secs(60))
        .build()?;
    let client = RemoteSyncClient::from_config(&config)?;
    let cancel = CancellationToken::new();

    for _ in 0..2 {
        let err = client
            .get_changes(None, &cancel)
            .await
            .expect_err("server error should fail");
        assert_eq!(classify(&err), Some(ErrorKind::ServerError));
    }
    assert_eq!(client.breaker().state(), CircuitState::Open);

    let err = client
        .get_changes(None, &cancel)
        .await
        .expect_err("open circuit should reject");
    assert_eq!(classify(&err), Some(ErrorKind::CircuitOpen));
    assert_eq!(listing.count(LIST), 2);
    assert_eq!(client.metrics().total_rejected, 1);

    server.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn health_probe_hits_check_endpoint() -> Result<()> {
    init_tracing();
    let listing = MockListing::new();
    listing.script_check(Scripted::status(401));
    let server = MockListingServer::start(listing.clone()).await?;

    let client = RemoteSyncClient::from_config(&fast_config(server.url()).build()?)?;
    let cancel = CancellationToken::new();

    let err = client
        .check(&cancel)
        .await
        .expect_err("rejected token fails the probe");
    assert_eq!(classify(&err), Some(ErrorKind::AuthFailure));
    client.check(&cancel).await?;
    assert_eq!(listing.count("/2/check/user"), 2);

    server.shutdown().await;
    Ok(())
}
