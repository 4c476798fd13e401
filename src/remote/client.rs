//! Incremental change retrieval against the remote listing API. Houses the
//! `RemoteSyncClient`, its result types, and the pagination loop that drives
//! every call through the `ResilientExecutor`.

use crate::error::RemoteError;
use crate::remote::api::{HttpListingApi, ListingApi};
use crate::remote::circuit_breaker::CircuitBreaker;
use crate::remote::executor::ResilientExecutor;
use crate::remote::listing::{normalize_entries, ListFolderPage, NormalizedChange, SyncCursor};
use crate::remote::metrics::RemoteMetricsSnapshot;
use crate::remote::options::RemoteClientOptions;
use crate::remote::retry::{RetryContext, CHECK_RETRY, LIST_CONTINUE_RETRY, LIST_FOLDER_RETRY};
use crate::runtime::config::WatchConfig;
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Changes gathered by one `get_changes` call and the cursor to resume from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSet {
    pub changes: Vec<NormalizedChange>,
    pub cursor: SyncCursor,
    pub pages: usize,
    /// Entries dropped because they could not be normalized.
    pub skipped: usize,
}

/// A page after the first failed. `progress` holds everything from the pages
/// that completed, including the cursor that resumes right after them.
#[derive(Debug, thiserror::Error)]
#[error("listing interrupted after {} completed page(s)", progress.pages)]
pub struct PaginationInterrupted {
    pub progress: ChangeSet,
    #[source]
    pub source: RemoteError,
}

enum ListingStart<'a> {
    Full,
    Continue(&'a SyncCursor),
}

#[derive(Clone)]
pub struct RemoteSyncClient {
    api: Arc<dyn ListingApi>,
    executor: ResilientExecutor,
    root_path: Arc<String>,
}

impl std::fmt::Debug for RemoteSyncClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteSyncClient")
            .field("root_path", &self.root_path)
            .field("executor", &self.executor)
            .finish_non_exhaustive()
    }
}

impl RemoteSyncClient {
    pub fn new(
        api: Arc<dyn ListingApi>,
        root_path: impl Into<String>,
        options: RemoteClientOptions,
        breaker: Arc<CircuitBreaker>,
    ) -> Result<Self> {
        Ok(Self {
            api,
            executor: ResilientExecutor::new(options, breaker)?,
            root_path: Arc::new(normalize_root(root_path.into())),
        })
    }

    pub fn from_config(config: &WatchConfig) -> Result<Self> {
        config.validate()?;
        let api = HttpListingApi::new(
            config.api_url(),
            config.access_token(),
            config.request_timeout(),
        )
        .context("failed to build listing API client")?;
        let breaker = Arc::new(CircuitBreaker::new(
            config.breaker_failure_threshold(),
            config.breaker_reset_timeout(),
            config.breaker_half_open_max_tries(),
        ));
        Self::new(
            Arc::new(api),
            config.root_path(),
            config.remote_options(),
            breaker,
        )
    }

    pub fn root_path(&self) -> &str {
        &self.root_path
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        self.executor.breaker()
    }

    pub fn metrics(&self) -> RemoteMetricsSnapshot {
        self.executor.metrics()
    }

    /// Fetches everything since `since`, or a full listing when no cursor is
    /// given. Pagination continues until the API reports no more results.
    ///
    /// A failure on a page after the first surfaces as
    /// [`PaginationInterrupted`] carrying the completed pages.
    pub async fn get_changes(
        &self,
        since: Option<&SyncCursor>,
        cancel: &CancellationToken,
    ) -> Result<ChangeSet> {
        match since.filter(|cursor| !cursor.is_empty()) {
            None => self.paginate(ListingStart::Full, cancel).await,
            Some(cursor) => match self.paginate(ListingStart::Continue(cursor), cancel).await {
                Err(err) if is_cursor_reset(&err) => {
                    tracing::warn!(
                        cursor = %cursor,
                        "remote API reset the sync cursor; falling back to a full listing"
                    );
                    self.paginate(ListingStart::Full, cancel).await
                }
                other => other,
            },
        }
    }

    /// Single-attempt authenticated probe, gated by the circuit breaker.
    pub async fn check(&self, cancel: &CancellationToken) -> Result<()> {
        let api = &self.api;
        self.executor
            .execute_with_context(RetryContext::new(&CHECK_RETRY), 0, cancel, move || {
                api.check()
            })
            .await
            .context("remote health probe failed")
    }

    async fn paginate(&self, start: ListingStart<'_>, cancel: &CancellationToken) -> Result<ChangeSet> {
        let max_retries = self.executor.options().max_retries;
        let api = &self.api;

        let first = match start {
            ListingStart::Full => {
                let root = self.root_path.as_str();
                tracing::info!(root, "starting full listing");
                self.executor
                    .execute_with_context(
                        RetryContext::with_page(&LIST_FOLDER_RETRY, 1),
                        max_retries,
                        cancel,
                        move || api.list_folder(root),
                    )
                    .await
                    .context("list_folder failed")?
            }
            ListingStart::Continue(cursor) => {
                tracing::debug!(cursor = %cursor, "continuing listing from cursor");
                self.executor
                    .execute_with_context(
                        RetryContext::with_page(&LIST_CONTINUE_RETRY, 1),
                        max_retries,
                        cancel,
                        move || api.list_folder_continue(cursor),
                    )
                    .await
                    .context("list_folder_continue failed")?
            }
        };

        let mut set = ChangeSet {
            changes: Vec::new(),
            cursor: SyncCursor::default(),
            pages: 0,
            skipped: 0,
        };
        let mut has_more = absorb_page(&mut set, first);

        while has_more {
            let page_number = set.pages + 1;
            let cursor = set.cursor.clone();
            let cursor_ref = &cursor;
            let page = self
                .executor
                .execute_with_context(
                    RetryContext::with_page(&LIST_CONTINUE_RETRY, page_number),
                    max_retries,
                    cancel,
                    move || api.list_folder_continue(cursor_ref),
                )
                .await;

            match page {
                Ok(page) => has_more = absorb_page(&mut set, page),
                Err(source) => {
                    tracing::warn!(
                        completed_pages = set.pages,
                        changes = set.changes.len(),
                        error = %source,
                        "listing interrupted; keeping progress from completed pages"
                    );
                    return Err(PaginationInterrupted {
                        progress: set,
                        source,
                    }
                    .into());
                }
            }
        }

        tracing::info!(
            pages = set.pages,
            changes = set.changes.len(),
            skipped = set.skipped,
            "listing complete"
        );
        Ok(set)
    }
}

fn absorb_page(set: &mut ChangeSet, page: ListFolderPage) -> bool {
    let normalized = normalize_entries(&page.entries);
    set.pages += 1;
    set.skipped += normalized.skipped;
    set.changes.extend(normalized.changes);
    set.cursor = page.cursor;

    tracing::debug!(
        page = set.pages,
        entries = page.entries.len(),
        has_more = page.has_more,
        "listing page received"
    );
    page.has_more
}

fn is_cursor_reset(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<RemoteError>(),
            Some(RemoteError::CursorReset)
        )
    }) && err.downcast_ref::<PaginationInterrupted>().is_none()
}

fn normalize_root(path: String) -> String {
    let trimmed = path.trim().trim_end_matches('/');
    trimmed.to_owned()
}
