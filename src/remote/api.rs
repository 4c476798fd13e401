//! Transport for the remote listing API and the trait the sync client consumes,
//! so tests and alternative backends can stand in for the HTTP service.

use crate::error::RemoteError;
use crate::remote::auth::build_auth_headers;
use crate::remote::listing::{ListFolderPage, SyncCursor};
use anyhow::{anyhow, Result};
use futures::future::BoxFuture;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const LIST_FOLDER_ENDPOINT: &str = "/2/files/list_folder";
const LIST_FOLDER_CONTINUE_ENDPOINT: &str = "/2/files/list_folder/continue";
const CHECK_ENDPOINT: &str = "/2/check/user";
const MAX_ERROR_BODY_CHARS: usize = 512;

/// Remote listing operations. Each call performs exactly one request.
pub trait ListingApi: Send + Sync {
    fn list_folder<'a>(
        &'a self,
        path: &'a str,
    ) -> BoxFuture<'a, Result<ListFolderPage, RemoteError>>;

    fn list_folder_continue<'a>(
        &'a self,
        cursor: &'a SyncCursor,
    ) -> BoxFuture<'a, Result<ListFolderPage, RemoteError>>;

    /// Cheap authenticated round trip used for health probes.
    fn check(&self) -> BoxFuture<'_, Result<(), RemoteError>>;
}

#[derive(Debug, Clone)]
pub struct HttpListingApi {
    base_url: Arc<String>,
    client: Client,
}

impl ListingApi for HttpListingApi {
    fn list_folder<'a>(
        &'a self,
        path: &'a str,
    ) -> BoxFuture<'a, Result<ListFolderPage, RemoteError>> {
        Box::pin(async move {
            let body = json!({
                "path": path,
                "recursive": true,
                "include_deleted": true,
            });
            self.post_json(LIST_FOLDER_ENDPOINT, &body).await
        })
    }

    fn list_folder_continue<'a>(
        &'a self,
        cursor: &'a SyncCursor,
    ) -> BoxFuture<'a, Result<ListFolderPage, RemoteError>> {
        Box::pin(async move {
            let body = json!({ "cursor": cursor.as_str() });
            self.post_json(LIST_FOLDER_CONTINUE_ENDPOINT, &body).await
        })
    }

    fn check(&self) -> BoxFuture<'_, Result<(), RemoteError>> {
        Box::pin(async move {
            let body = json!({ "query": "dropwatch" });
            let _: serde_json::Value = self.post_json(CHECK_ENDPOINT, &body).await?;
            Ok(())
        })
    }
}

impl HttpListingApi {
    pub fn new(
        base_url: impl Into<String>,
        access_token: &str,
        request_timeout: Duration,
    ) -> Result<Self> {
        let base_url = base_url.into().trim().trim_end_matches('/').to_owned();
        let headers = build_auth_headers(access_token)?;
        let client = Client::builder()
            .default_headers(headers)
            .timeout(request_timeout)
            .build()
            .map_err(|err| anyhow!("failed to build HTTP client: {err}"))?;

        Ok(Self {
            base_url: Arc::new(base_url),
            client,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.base_url
    }

    async fn post_json<B, R>(&self, endpoint: &'static str, body: &B) -> Result<R, RemoteError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, endpoint);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|err| map_transport_error(endpoint, err))?;

        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response
            .bytes()
            .await
            .map_err(|err| map_transport_error(endpoint, err))?;

        if !status.is_success() {
            let text = String::from_utf8_lossy(&bytes);
            return Err(map_status(status, &headers, &text));
        }

        serde_json::from_slice(&bytes).map_err(|err| RemoteError::Unexpected {
            status: status.as_u16(),
            message: format!("invalid {endpoint} payload: {err}"),
        })
    }
}

fn map_transport_error(endpoint: &'static str, err: reqwest::Error) -> RemoteError {
    if err.is_timeout() {
        RemoteError::Timeout {
            operation: endpoint,
        }
    } else {
        RemoteError::Network(format!("{endpoint}: {err}"))
    }
}

/// Classifies a non-2xx response.
pub(crate) fn map_status(status: StatusCode, headers: &HeaderMap, body: &str) -> RemoteError {
    let message = truncate(body);
    match status.as_u16() {
        400 => RemoteError::InvalidInput(message),
        401 | 403 => RemoteError::AuthFailure {
            status: status.as_u16(),
            message,
        },
        409 if is_cursor_reset(body) => RemoteError::CursorReset,
        409 => RemoteError::InvalidInput(message),
        429 => RemoteError::RateLimited {
            retry_after: parse_retry_after(headers),
        },
        code @ 500..=599 => RemoteError::ServerError { status: code },
        code => RemoteError::Unexpected {
            status: code,
            message,
        },
    }
}

fn is_cursor_reset(body: &str) -> bool {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| {
            value
                .pointer("/error/.tag")
                .and_then(|tag| tag.as_str())
                .map(|tag| tag == "reset")
        })
        .unwrap_or_else(|| body.contains("reset/"))
}

fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn truncate(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.chars().count() <= MAX_ERROR_BODY_CHARS {
        trimmed.to_owned()
    } else {
        trimmed.chars().take(MAX_ERROR_BODY_CHARS).collect()
    }
}
