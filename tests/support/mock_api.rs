use std::{
    collections::VecDeque,
    convert::Infallible,
    sync::{Arc, Mutex},
};

use anyhow::{Context, Result};
use hyper::service::{make_service_fn, service_fn};
use hyper::{body, Body, Method, Request, Response, Server, StatusCode};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

const LIST_FOLDER: &str = "/2/files/list_folder";
const LIST_FOLDER_CONTINUE: &str = "/2/files/list_folder/continue";
const CHECK_USER: &str = "/2/check/user";

/// One canned reply for a listing endpoint.
#[derive(Clone, Debug)]
pub enum Scripted {
    Page(Value),
    Status {
        status: u16,
        body: Value,
        retry_after: Option<u64>,
    },
}

impl Scripted {
    pub fn status(status: u16) -> Self {
        Scripted::Status {
            status,
            body: json!({ "error_summary": format!("status {status}") }),
            retry_after: None,
        }
    }

    pub fn rate_limited(retry_after: u64) -> Self {
        Scripted::Status {
            status: 429,
            body: json!({ "error_summary": "too_many_requests/" }),
            retry_after: Some(retry_after),
        }
    }

    pub fn cursor_reset() -> Self {
        Scripted::Status {
            status: 409,
            body: json!({ "error_summary": "reset/..", "error": { ".tag": "reset" } }),
            retry_after: None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct RecordedRequest {
    pub endpoint: String,
    pub body: Value,
    pub authorization: Option<String>,
}

/// Scripted state of the fake listing service. Unscripted listing calls get an
/// empty page that keeps the caller's cursor.
#[derive(Clone, Default)]
pub struct MockListing {
    inner: Arc<Mutex<MockListingInner>>,
}

#[derive(Default)]
struct MockListingInner {
    list: VecDeque<Scripted>,
    continues: VecDeque<Scripted>,
    checks: VecDeque<Scripted>,
    requests: Vec<RecordedRequest>,
}

impl MockListing {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script_list(&self, reply: Scripted) -> &Self {
        self.inner
            .lock()
            .expect("mock listing poisoned")
            .list
            .push_back(reply);
        self
    }

    pub fn script_continue(&self, reply: Scripted) -> &Self {
        self.inner
            .lock()
            .expect("mock listing poisoned")
            .continues
            .push_back(reply);
        self
    }

    pub fn script_check(&self, reply: Scripted) -> &Self {
        self.inner
            .lock()
            .expect("mock listing poisoned")
            .checks
            .push_back(reply);
        self
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.inner
            .lock()
            .expect("mock listing poisoned")
            .requests
            .clone()
    }

    pub fn endpoints(&self) -> Vec<String> {
        self.requests()
            .into_iter()
            .map(|request| request.endpoint)
            .collect()
    }

    pub fn count(&self, endpoint: &str) -> usize {
        self.requests()
            .iter()
            .filter(|request| request.endpoint == endpoint)
            .count()
    }

    fn next_reply(&self, request: RecordedRequest) -> Option<Scripted> {
        let mut inner = self.inner.lock().expect("mock listing poisoned");
        let reply = match request.endpoint.as_str() {
            LIST_FOLDER => Some(inner.list.pop_front().unwrap_or_else(|| {
                Scripted::Page(page(Vec::new(), "cursor-idle", false))
            })),
            LIST_FOLDER_CONTINUE => {
                let cursor = request
                    .body
                    .get("cursor")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_owned();
                Some(
                    inner
                        .continues
                        .pop_front()
                        .unwrap_or_else(|| Scripted::Page(page(Vec::new(), &cursor, false))),
                )
            }
            CHECK_USER => Some(
                inner
                    .checks
                    .pop_front()
                    .unwrap_or_else(|| Scripted::Page(json!({ "result": "dropwatch" }))),
            ),
            _ => None,
        };
        inner.requests.push(request);
        reply
    }
}

pub fn file_entry(path: &str, size: u64, modified: &str) -> Value {
    json!({
        ".tag": "file",
        "name": path.rsplit('/').next().unwrap_or(path),
        "path_display": path,
        "size": size,
        "server_modified": modified,
    })
}

pub fn deleted_entry(path: &str) -> Value {
    json!({
        ".tag": "deleted",
        "name": path.rsplit('/').next().unwrap_or(path),
        "path_display": path,
    })
}

pub fn folder_entry(path: &str) -> Value {
    json!({
        ".tag": "folder",
        "name": path.rsplit('/').next().unwrap_or(path),
        "path_display": path,
    })
}

pub fn page(entries: Vec<Value>, cursor: &str, has_more: bool) -> Value {
    json!({
        "entries": entries,
        "cursor": cursor,
        "has_more": has_more,
    })
}

pub struct MockListingServer {
    url: String,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl MockListingServer {
    pub async fn start(listing: MockListing) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .context("failed to bind mock listing listener")?;
        let addr = listener
            .local_addr()
            .context("failed to read mock listener address")?;
        let std_listener = listener
            .into_std()
            .context("failed to convert mock listener")?;
        std_listener
            .set_nonblocking(true)
            .context("failed to set mock listener non-blocking")?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let make_service = make_service_fn(move |_| {
            let listing = listing.clone();
            async move {
                Ok::<_, Infallible>(service_fn(move |req| serve_request(listing.clone(), req)))
            }
        });

        let server = Server::from_tcp(std_listener)
            .context("failed to build mock HTTP server")?
            .serve(make_service);
        let graceful = server.with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        });

        let handle = tokio::spawn(async move {
            if let Err(err) = graceful.await {
                eprintln!("mock listing server stopped: {err}");
            }
        });

        Ok(Self {
            url: format!("http://{}", addr),
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

async fn serve_request(
    listing: MockListing,
    req: Request<Body>,
) -> Result<Response<Body>, Infallible> {
    if req.method() != Method::POST {
        return Ok(respond(StatusCode::METHOD_NOT_ALLOWED, json!("unsupported method"), None));
    }

    let endpoint = req.uri().path().to_owned();
    let authorization = req
        .headers()
        .get(hyper::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);

    let bytes = match body::to_bytes(req.into_body()).await {
        Ok(bytes) => bytes,
        Err(err) => {
            return Ok(respond(
                StatusCode::BAD_REQUEST,
                json!(format!("failed to read body: {err}")),
                None,
            ))
        }
    };
    let body: Value = match serde_json::from_slice(&bytes) {
        Ok(value) => value,
        Err(err) => {
            return Ok(respond(
                StatusCode::BAD_REQUEST,
                json!(format!("invalid JSON payload: {err}")),
                None,
            ))
        }
    };

    let reply = listing.next_reply(RecordedRequest {
        endpoint,
        body,
        authorization,
    });

    Ok(match reply {
        Some(Scripted::Page(value)) => respond(StatusCode::OK, value, None),
        Some(Scripted::Status {
            status,
            body,
            retry_after,
        }) => respond(
            StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            body,
            retry_after,
        ),
        None => respond(StatusCode::NOT_FOUND, json!("unknown endpoint"), None),
    })
}

fn respond(status: StatusCode, value: Value, retry_after: Option<u64>) -> Response<Body> {
    let mut response = Response::new(Body::from(value.to_string()));
    *response.status_mut() = status;
    response.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        hyper::header::HeaderValue::from_static("application/json"),
    );
    if let Some(seconds) = retry_after {
        response.headers_mut().insert(
            hyper::header::RETRY_AFTER,
            hyper::header::HeaderValue::from(seconds),
        );
    }
    response
}
