//! Storage backend traits.
//!
//! Each concern of the substrate store is its own trait so backends and test
//! doubles can be composed. [`SubstrateStore`] bundles all of them.
//!
//! # Implementor Notes
//!
//! - Methods use `&self` to enable sharing via `Arc<dyn SubstrateStore>`
//! - Use interior mutability (e.g., `Mutex<Connection>`) for mutable state
//! - Update methods return the number of affected rows; `0` must mean
//!   "nothing matched" so callers can raise on silent no-ops
//! - Workspace-scoped reads return `None` for records outside the workspace

mod artifacts;
mod governance;
mod graph;
mod queue;
mod substrate;

pub use artifacts::{DocumentBackend, ReflectionBackend, TimelineBackend};
pub use governance::{PolicyProvider, ProposalBackend};
pub use graph::GraphBackend;
pub use queue::QueueBackend;
pub use substrate::{BlockBackend, DumpBackend};

/// Full substrate store: every storage concern the pipeline touches.
pub trait SubstrateStore:
    DumpBackend
    + BlockBackend
    + ProposalBackend
    + PolicyProvider
    + GraphBackend
    + ReflectionBackend
    + DocumentBackend
    + TimelineBackend
    + QueueBackend
    + Send
    + Sync
{
    /// Backend name for logs and metrics.
    fn backend_name(&self) -> &'static str;
}
