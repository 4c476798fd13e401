//! Boundaries to the persistence and reporting services the sync pipeline
//! feeds. Both are consumed through narrow object-safe traits so the core never
//! depends on a storage schema or a delivery channel.

use crate::remote::listing::{NormalizedChange, SyncCursor};
use anyhow::Result;
use futures::future::BoxFuture;

pub type CollaboratorFuture<'a, T = ()> = BoxFuture<'a, Result<T>>;

/// Durable home for normalized changes and the resumable sync cursor.
pub trait ChangeStore: Send + Sync {
    /// Last persisted cursor, or `None` before the first successful sync.
    fn load_cursor(&self) -> CollaboratorFuture<'_, Option<SyncCursor>>;

    fn save_cursor<'a>(&'a self, cursor: &'a SyncCursor) -> CollaboratorFuture<'a>;

    fn store_changes<'a>(&'a self, changes: &'a [NormalizedChange]) -> CollaboratorFuture<'a>;

    fn health(&self) -> CollaboratorFuture<'_> {
        Box::pin(async { Ok(()) })
    }

    fn close(&self) -> CollaboratorFuture<'_> {
        Box::pin(async { Ok(()) })
    }
}

/// Turns a batch of changes into a human-readable report and delivers it.
pub trait ChangeReporter: Send + Sync {
    fn generate_and_send<'a>(&'a self, changes: &'a [NormalizedChange]) -> CollaboratorFuture<'a>;

    fn health(&self) -> CollaboratorFuture<'_> {
        Box::pin(async { Ok(()) })
    }
}
