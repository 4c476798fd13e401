//! Remote listing plumbing: authentication, circuit breaker, resilient
//! execution, metrics, retry logging, and the sync client built on top.

pub mod api;
pub mod auth;
pub mod circuit_breaker;
pub mod client;
pub mod executor;
pub mod listing;
pub mod metrics;
pub mod options;
pub mod retry;

pub use api::{HttpListingApi, ListingApi};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerSnapshot, CircuitState};
pub use client::{ChangeSet, PaginationInterrupted, RemoteSyncClient};
pub use executor::ResilientExecutor;
pub use listing::{ListFolderPage, NormalizedChange, RawEntry, SyncCursor};
pub use metrics::RemoteMetricsSnapshot;
pub use options::RemoteClientOptions;
