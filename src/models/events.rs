//! Pipeline timeline events.

use super::{BasketId, DocumentId, DumpId, ExecutionSummary, ProposalId, WorkspaceId};
use crate::current_timestamp;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Shared event metadata required for observability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMeta {
    /// Unique identifier for this event.
    pub event_id: String,
    /// Optional correlation identifier (queue entry or work id).
    pub correlation_id: Option<String>,
    /// Event source component.
    pub source: String,
    /// Timestamp (Unix epoch seconds).
    pub timestamp: u64,
}

impl EventMeta {
    /// Creates new event metadata using the current timestamp.
    #[must_use]
    pub fn new(source: &str, correlation_id: Option<String>) -> Self {
        Self::with_timestamp(source, correlation_id, current_timestamp())
    }

    /// Creates new event metadata with a specified timestamp.
    #[must_use]
    pub fn with_timestamp(source: &str, correlation_id: Option<String>, timestamp: u64) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            correlation_id,
            source: source.to_string(),
            timestamp,
        }
    }
}

/// What happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TimelineEventKind {
    /// A dump was ingested.
    DumpCreated {
        /// The dump.
        dump_id: DumpId,
    },
    /// A proposal awaits review.
    ProposalSubmitted {
        /// The proposal.
        proposal_id: ProposalId,
        /// Number of operations.
        ops_count: usize,
        /// Validator confidence.
        confidence: f32,
    },
    /// A proposal was approved by policy or a reviewer.
    ProposalApproved {
        /// The proposal.
        proposal_id: ProposalId,
        /// Number of operations.
        ops_count: usize,
        /// True when approved by workspace policy.
        auto: bool,
    },
    /// A proposal was rejected.
    ProposalRejected {
        /// The proposal.
        proposal_id: ProposalId,
        /// Reviewer reason.
        reason: String,
    },
    /// Execution failed and the proposal went back to review.
    ProposalReverted {
        /// The proposal.
        proposal_id: ProposalId,
        /// Failure text.
        error: String,
    },
    /// Approved operations were applied.
    SubstrateCommitted {
        /// The proposal.
        proposal_id: ProposalId,
        /// Counts by type.
        summary: ExecutionSummary,
    },
    /// Relationship mapping stored new edges.
    RelationshipsMapped {
        /// New edges.
        created: usize,
    },
    /// A reflection artifact was written.
    ReflectionComputed {
        /// Idempotency key.
        substrate_hash: String,
        /// Whether the heuristic path ran.
        used_fallback: bool,
    },
    /// A document was composed.
    DocumentComposed {
        /// The document.
        document_id: DocumentId,
        /// New version number.
        version_no: u32,
        /// Whether heuristic selection ran.
        used_fallback_selection: bool,
    },
    /// Composition failed.
    DocumentFailed {
        /// The document.
        document_id: DocumentId,
        /// Failure text.
        error: String,
    },
}

impl TimelineEventKind {
    /// Returns the event type name.
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::DumpCreated { .. } => "dump.created",
            Self::ProposalSubmitted { .. } => "proposal.submitted",
            Self::ProposalApproved { .. } => "proposal.approved",
            Self::ProposalRejected { .. } => "proposal.rejected",
            Self::ProposalReverted { .. } => "proposal.reverted",
            Self::SubstrateCommitted { .. } => "substrate.committed",
            Self::RelationshipsMapped { .. } => "relationships.mapped",
            Self::ReflectionComputed { .. } => "reflection.computed",
            Self::DocumentComposed { .. } => "document.composed",
            Self::DocumentFailed { .. } => "document.failed",
        }
    }
}

/// A timeline event scoped to a basket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineEvent {
    /// Event metadata.
    pub meta: EventMeta,
    /// Basket the event belongs to.
    pub basket_id: BasketId,
    /// Owning workspace.
    pub workspace_id: WorkspaceId,
    /// Acting agent or user.
    pub actor_id: Option<String>,
    /// Payload.
    pub kind: TimelineEventKind,
}

impl PipelineEvent {
    /// Creates an event stamped now.
    #[must_use]
    pub fn new(
        source: &str,
        basket_id: BasketId,
        workspace_id: WorkspaceId,
        kind: TimelineEventKind,
    ) -> Self {
        Self {
            meta: EventMeta::new(source, None),
            basket_id,
            workspace_id,
            actor_id: None,
            kind,
        }
    }

    /// Sets the actor.
    #[must_use]
    pub fn with_actor(mut self, actor_id: impl Into<String>) -> Self {
        self.actor_id = Some(actor_id.into());
        self
    }

    /// Sets the correlation id.
    #[must_use]
    pub fn with_correlation(mut self, correlation_id: impl Into<String>) -> Self {
        self.meta.correlation_id = Some(correlation_id.into());
        self
    }

    /// Returns the event type name.
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        self.kind.event_type()
    }

    /// Returns the timestamp of the event.
    #[must_use]
    pub const fn timestamp(&self) -> u64 {
        self.meta.timestamp
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_names() {
        let event = PipelineEvent::new(
            "governance",
            BasketId::new("b"),
            WorkspaceId::new("w"),
            TimelineEventKind::ProposalSubmitted {
                proposal_id: ProposalId::new("p"),
                ops_count: 2,
                confidence: 0.7,
            },
        )
        .with_actor("agent:p1");
        assert_eq!(event.event_type(), "proposal.submitted");
        assert_eq!(event.actor_id.as_deref(), Some("agent:p1"));
    }

    #[test]
    fn test_kind_serializes_with_tag() {
        let kind = TimelineEventKind::RelationshipsMapped { created: 3 };
        let json = serde_json::to_value(&kind).unwrap();
        assert_eq!(json["event"], "relationships_mapped");
        assert_eq!(json["created"], 3);
    }
}
