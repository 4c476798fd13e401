pub mod error;
pub mod lifecycle;
pub mod remote;
pub mod runtime;

pub use error::{classify, ErrorKind, LifecycleError, RemoteError};
pub use lifecycle::{
    ChangeReporter, ChangeStore, ComponentState, LifecycleComponent, LifecycleState, Orchestrator,
    SyncPoller,
};
pub use remote::{
    ChangeSet, CircuitBreaker, CircuitState, ListingApi, NormalizedChange, PaginationInterrupted,
    RemoteSyncClient, ResilientExecutor, SyncCursor,
};
pub use runtime::config::{WatchConfig, WatchConfigBuilder, WatchConfigParams};
pub use runtime::runner::Runner;
pub use runtime::telemetry::{init_tracing, Telemetry, TelemetrySnapshot};
