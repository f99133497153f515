//! Governance proposal types.

use super::{AnchorRole, BasketId, DumpId, ProposalId, SemanticType, SubstrateId, WorkspaceId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A typed substrate mutation carried by a proposal.
///
/// Operations are immutable once the proposal exists and always execute in
/// list order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Operation {
    /// Insert a new block.
    CreateBlock {
        /// Block title.
        title: String,
        /// Block body.
        content: String,
        /// Semantic classification.
        semantic_type: SemanticType,
        /// Extraction confidence.
        confidence: f32,
        /// Inferred anchor role.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        anchor_role: Option<AnchorRole>,
    },
    /// Insert a new entity-style context item.
    CreateContextItem {
        /// Normalized label.
        label: String,
        /// Entity kind.
        kind: SemanticType,
        /// Short semantic meaning.
        #[serde(default)]
        semantic_meaning: String,
        /// Alternative labels.
        #[serde(default)]
        synonyms: Vec<String>,
        /// Extraction confidence.
        confidence: f32,
    },
    /// Replace the content of an existing block.
    ReviseBlock {
        /// Target block.
        block_id: SubstrateId,
        /// Replacement content.
        content: String,
        /// Replacement confidence.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        confidence: Option<f32>,
    },
    /// Update an existing context item.
    UpdateContextItem {
        /// Target context item.
        context_item_id: SubstrateId,
        /// Synonyms to add.
        #[serde(default)]
        add_synonyms: Vec<String>,
        /// Replacement semantic meaning.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        semantic_meaning: Option<String>,
        /// Replacement confidence.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        confidence: Option<f32>,
    },
    /// Fold near-duplicate context items into a canonical one.
    MergeContextItems {
        /// Items to mark as merged.
        from_ids: Vec<SubstrateId>,
        /// Surviving item.
        canonical_id: SubstrateId,
        /// Synonyms collected from the merged items.
        #[serde(default)]
        merged_synonyms: Vec<String>,
    },
}

impl Operation {
    /// Returns the operation name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::CreateBlock { .. } => "CreateBlock",
            Self::CreateContextItem { .. } => "CreateContextItem",
            Self::ReviseBlock { .. } => "ReviseBlock",
            Self::UpdateContextItem { .. } => "UpdateContextItem",
            Self::MergeContextItems { .. } => "MergeContextItems",
        }
    }

    /// Returns the confidence attached to the operation, if any.
    #[must_use]
    pub const fn confidence(&self) -> Option<f32> {
        match self {
            Self::CreateBlock { confidence, .. } | Self::CreateContextItem { confidence, .. } => {
                Some(*confidence)
            },
            Self::ReviseBlock { confidence, .. } | Self::UpdateContextItem { confidence, .. } => {
                *confidence
            },
            Self::MergeContextItems { .. } => None,
        }
    }

    /// Returns true if the operation inserts a new row.
    #[must_use]
    pub const fn is_create(&self) -> bool {
        matches!(
            self,
            Self::CreateBlock { .. } | Self::CreateContextItem { .. }
        )
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Proposal review state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProposalStatus {
    /// Awaiting a decision (also the state after failed execution).
    #[default]
    Proposed,
    /// Approved by policy or a reviewer.
    Approved,
    /// Rejected by a reviewer. Terminal.
    Rejected,
}

impl ProposalStatus {
    /// Returns the status as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Proposed => "PROPOSED",
            Self::Approved => "APPROVED",
            Self::Rejected => "REJECTED",
        }
    }

    /// Parses a status from a string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "PROPOSED" => Some(Self::Proposed),
            "APPROVED" => Some(Self::Approved),
            "REJECTED" => Some(Self::Rejected),
            _ => None,
        }
    }
}

impl fmt::Display for ProposalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What produced the proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalKind {
    /// Automated extraction from dumps.
    #[default]
    Extraction,
    /// Manual substrate edit.
    Edit,
}

/// Who submitted the proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalOrigin {
    /// A pipeline agent.
    #[default]
    Agent,
    /// A human user.
    User,
}

/// Output of the pluggable validator.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ValidatorReport {
    /// Overall confidence in `[0, 1]`.
    pub confidence: f32,
    /// Non-blocking warnings.
    pub warnings: Vec<String>,
    /// Issues that prevent automatic approval.
    #[serde(default)]
    pub blocking_issues: Vec<String>,
}

impl ValidatorReport {
    /// Returns true if any blocking issue was reported.
    #[must_use]
    pub fn is_blocked(&self) -> bool {
        !self.blocking_issues.is_empty()
    }
}

/// Outcome of one executed operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionLogEntry {
    /// Position in the operation list.
    pub index: usize,
    /// Operation name.
    pub operation: String,
    /// Whether the operation took effect.
    pub success: bool,
    /// Affected or created substrate id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_id: Option<SubstrateId>,
    /// Error text on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Counts of substrate changes from one execution, by type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExecutionSummary {
    /// Blocks inserted.
    pub blocks_created: usize,
    /// Context items inserted.
    pub context_items_created: usize,
    /// Revisions, updates, and merges.
    pub updates: usize,
}

impl ExecutionSummary {
    /// Total substrate units created or modified.
    #[must_use]
    pub const fn substrate_changes(&self) -> usize {
        self.blocks_created + self.context_items_created + self.updates
    }

    /// Records one executed operation.
    pub const fn record(&mut self, op: &Operation) {
        match op {
            Operation::CreateBlock { .. } => self.blocks_created += 1,
            Operation::CreateContextItem { .. } => self.context_items_created += 1,
            Operation::ReviseBlock { .. }
            | Operation::UpdateContextItem { .. }
            | Operation::MergeContextItems { .. } => self.updates += 1,
        }
    }
}

/// The unit of governed change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    /// Unique identifier.
    pub id: ProposalId,
    /// Owning basket.
    pub basket_id: BasketId,
    /// Owning workspace.
    pub workspace_id: WorkspaceId,
    /// What produced it.
    pub kind: ProposalKind,
    /// Who submitted it.
    pub origin: ProposalOrigin,
    /// Source dumps.
    pub provenance: Vec<DumpId>,
    /// Ordered operations.
    pub ops: Vec<Operation>,
    /// Validator output.
    pub validator_report: ValidatorReport,
    /// Review state.
    pub status: ProposalStatus,
    /// Set once every operation has been applied.
    pub is_executed: bool,
    /// Per-operation execution results.
    pub execution_log: Vec<ExecutionLogEntry>,
    /// Reviewer or failure notes.
    pub review_notes: Option<String>,
    /// Who approved or rejected it.
    pub reviewed_by: Option<String>,
    /// Creation timestamp (Unix epoch seconds).
    pub created_at: u64,
    /// Last update timestamp (Unix epoch seconds).
    pub updated_at: u64,
    /// Execution timestamp.
    pub executed_at: Option<u64>,
}

impl Proposal {
    /// Creates a new `PROPOSED` extraction proposal.
    #[must_use]
    pub fn new(
        basket_id: BasketId,
        workspace_id: WorkspaceId,
        provenance: Vec<DumpId>,
        ops: Vec<Operation>,
        validator_report: ValidatorReport,
    ) -> Self {
        let now = crate::current_timestamp();
        Self {
            id: ProposalId::generate(),
            basket_id,
            workspace_id,
            kind: ProposalKind::Extraction,
            origin: ProposalOrigin::Agent,
            provenance,
            ops,
            validator_report,
            status: ProposalStatus::Proposed,
            is_executed: false,
            execution_log: Vec::new(),
            review_notes: None,
            reviewed_by: None,
            created_at: now,
            updated_at: now,
            executed_at: None,
        }
    }

    /// Sets the initial status.
    #[must_use]
    pub const fn with_status(mut self, status: ProposalStatus) -> Self {
        self.status = status;
        self
    }

    /// Returns true if the proposal references the dump.
    #[must_use]
    pub fn references_dump(&self, dump_id: &DumpId) -> bool {
        self.provenance.contains(dump_id)
    }

    /// Returns true if the proposal is approved but not yet applied.
    #[must_use]
    pub const fn is_pending_execution(&self) -> bool {
        matches!(self.status, ProposalStatus::Approved) && !self.is_executed
    }
}

/// Mutable proposal fields. Operations are deliberately absent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProposalUpdate {
    /// New status.
    pub status: Option<ProposalStatus>,
    /// New executed flag.
    pub is_executed: Option<bool>,
    /// Replacement execution log.
    pub execution_log: Option<Vec<ExecutionLogEntry>>,
    /// Replacement review notes.
    pub review_notes: Option<String>,
    /// Reviewer id.
    pub reviewed_by: Option<String>,
    /// Execution timestamp.
    pub executed_at: Option<u64>,
}

impl ProposalUpdate {
    /// Applies the update to a proposal in place.
    pub fn apply_to(&self, proposal: &mut Proposal, now: u64) {
        if let Some(status) = self.status {
            proposal.status = status;
        }
        if let Some(executed) = self.is_executed {
            proposal.is_executed = executed;
        }
        if let Some(log) = &self.execution_log {
            proposal.execution_log.clone_from(log);
        }
        if let Some(notes) = &self.review_notes {
            proposal.review_notes = Some(notes.clone());
        }
        if let Some(reviewer) = &self.reviewed_by {
            proposal.reviewed_by = Some(reviewer.clone());
        }
        if let Some(at) = self.executed_at {
            proposal.executed_at = Some(at);
        }
        proposal.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_serde_tagged() {
        let op = Operation::ReviseBlock {
            block_id: SubstrateId::new("b1"),
            content: "new".to_string(),
            confidence: None,
        };
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(json["type"], "ReviseBlock");
        let back: Operation = serde_json::from_value(json).unwrap();
        assert_eq!(back, op);
    }

    #[test]
    fn test_summary_counts() {
        let mut summary = ExecutionSummary::default();
        summary.record(&Operation::CreateBlock {
            title: "t".to_string(),
            content: "c".to_string(),
            semantic_type: SemanticType::Fact,
            confidence: 0.8,
            anchor_role: None,
        });
        summary.record(&Operation::MergeContextItems {
            from_ids: vec![],
            canonical_id: SubstrateId::new("c"),
            merged_synonyms: vec![],
        });
        assert_eq!(summary.blocks_created, 1);
        assert_eq!(summary.updates, 1);
        assert_eq!(summary.substrate_changes(), 2);
    }

    #[test]
    fn test_pending_execution() {
        let proposal = Proposal::new(
            BasketId::new("b"),
            WorkspaceId::new("w"),
            vec![],
            vec![],
            ValidatorReport::default(),
        )
        .with_status(ProposalStatus::Approved);
        assert!(proposal.is_pending_execution());
    }
}
