//! Data models for the substrate pipeline.
//!
//! This module contains all the core data structures used throughout the system.

mod document;
mod dump;
mod events;
mod ids;
mod policy;
mod proposal;
mod queue;
mod reflection;
mod relationship;
mod substrate;

pub use document::{
    CompositionMetrics, Document, DocumentMetadata, DocumentSection, DocumentStatus,
    DocumentVersion, SubstrateReference,
};
pub use dump::{BATCH_ID_KEY, DumpTombstone, RawDump};
pub use events::{EventMeta, PipelineEvent, TimelineEventKind};
pub use ids::{
    BasketId, DocumentId, DumpId, ProposalId, QueueEntryId, ReflectionId, RelationshipId,
    SubstrateId, WorkId, WorkspaceId,
};
pub use policy::{EntryPointPolicy, GovernanceFlags};
pub use proposal::{
    ExecutionLogEntry, ExecutionSummary, Operation, Proposal, ProposalKind, ProposalOrigin,
    ProposalStatus, ProposalUpdate, ValidatorReport,
};
pub use queue::{QueueEntry, QueueState, QueueStats, WorkItem, WorkType};
pub use reflection::{BasketSignature, ReflectionArtifact, ReflectionCategory, ReflectionEntry};
pub use relationship::{ConflictKey, NodeRef, Relationship, RelationshipType};
pub use substrate::{
    AnchorRole, Provenance, SECONDS_PER_DAY, SemanticType, SubstrateKind, SubstrateState,
    SubstrateUnit, SubstrateUpdate,
};
