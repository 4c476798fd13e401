//! Component lifecycle contract, the orchestrator that sequences it, and the
//! long-running workers of the sync pipeline.

pub mod collaborators;
pub mod component;
pub mod orchestrator;
pub mod poller;
pub mod workers;

pub use collaborators::{ChangeReporter, ChangeStore, CollaboratorFuture};
pub use component::{ComponentFuture, ComponentState, LifecycleComponent, LifecycleState};
pub use orchestrator::Orchestrator;
pub use poller::{SyncPoller, TickReport};
pub use workers::{PersistenceWorker, ReportingWorker};
