//! # Substrate Pipeline
//!
//! A governed ingestion pipeline that turns raw text "dumps" into a typed
//! knowledge substrate, links it, reflects on it, and composes documents
//! from it.
//!
//! The canonical stages are:
//!
//! | Stage | Engine | Writes substrate? |
//! |-------|--------|-------------------|
//! | P0/P1 | [`GovernanceEngine`] | Only through approved proposals |
//! | P2 | [`RelationshipEngine`] | Relationships only |
//! | P3 | [`ReflectionEngine`] | Never (read-only artifacts) |
//! | P4 | [`CompositionEngine`] | Never (documents only, on demand) |
//!
//! Work is coordinated through a claimable queue ([`QueueCoordinator`]) and
//! driven by the [`PipelineOrchestrator`] worker loop. Stages cascade
//! P1 → P2 → P3 automatically; P4 is only ever requested explicitly.
//!
//! ## Example
//!
//! ```rust,ignore
//! use substrate_pipeline::{BasketId, PipelineConfig, PipelineServices, WorkspaceId};
//!
//! let services = PipelineServices::in_memory(PipelineConfig::default());
//! let basket = BasketId::new("basket-1");
//! let workspace = WorkspaceId::new("workspace-1");
//! services.ingest(&basket, &workspace, "Our API is vulnerable to spam attacks.")?;
//! let summary = services.orchestrator().drain(10);
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
#![allow(clippy::multiple_crate_versions)]

use thiserror::Error as ThisError;

pub mod config;
pub mod llm;
pub mod models;
pub mod observability;
pub mod queue;
pub mod services;
pub mod storage;

pub use config::{FeatureFlags, PipelineConfig};
pub use llm::LlmProvider;
pub use models::{
    BasketId, Document, DumpId, Operation, Proposal, ProposalStatus, QueueEntry, RawDump,
    Relationship, SemanticType, SubstrateId, SubstrateState, SubstrateUnit, WorkItem, WorkType,
    WorkspaceId,
};
pub use queue::QueueCoordinator;
pub use services::{
    CascadeTrigger, CompositionEngine, GovernanceEngine, PipelineOrchestrator, PipelineServices,
    ReflectionEngine, RelationshipEngine,
};
pub use storage::{InMemoryStore, SqliteStore, SubstrateStore};

/// Error type for pipeline operations.
///
/// # Error Variant Triggers
///
/// | Variant | Raised When |
/// |---------|-------------|
/// | `NotFound` | Dump, basket, proposal or document missing or outside the workspace |
/// | `Validation` | Proposal operations fail schema/business validation |
/// | `Execution` | A proposal operation failed or affected zero rows |
/// | `InvalidInput` | Caller passed malformed or empty input |
/// | `OperationFailed` | Storage, LLM transport or parse failures |
#[derive(Debug, ThisError)]
pub enum Error {
    /// A referenced record does not exist or is out of scope.
    ///
    /// Raised when:
    /// - A dump id is unknown, or belongs to another basket/workspace
    /// - A proposal or document is looked up under the wrong workspace
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Kind of record (dump, proposal, document, ...).
        kind: &'static str,
        /// The identifier that was looked up.
        id: String,
    },

    /// Proposal or stage input failed validation.
    ///
    /// The proposal involved stays `PROPOSED`; it is never discarded.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A governed operation failed during proposal execution.
    ///
    /// Raised when:
    /// - A store write reports zero affected rows
    /// - A referenced substrate unit vanished between proposal and execution
    #[error("execution of '{operation}' failed: {cause}")]
    Execution {
        /// The operation that failed (e.g. `ReviseBlock#2`).
        operation: String,
        /// The underlying cause.
        cause: String,
    },

    /// Invalid input was provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An operation failed.
    ///
    /// Raised when:
    /// - `SQLite` operations fail
    /// - LLM transport fails or returns unparseable output
    /// - Locks are poisoned beyond recovery
    #[error("operation '{operation}' failed: {cause}")]
    OperationFailed {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },
}

impl Error {
    /// Shorthand for [`Error::NotFound`].
    #[must_use]
    pub fn not_found(kind: &'static str, id: impl std::fmt::Display) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// Shorthand for [`Error::OperationFailed`].
    #[must_use]
    pub fn operation(operation: &str, cause: impl std::fmt::Display) -> Self {
        Self::OperationFailed {
            operation: operation.to_string(),
            cause: cause.to_string(),
        }
    }
}

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Returns the current Unix timestamp in seconds.
///
/// ```rust
/// use substrate_pipeline::current_timestamp;
///
/// assert!(current_timestamp() > 0);
/// ```
#[must_use]
pub fn current_timestamp() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
