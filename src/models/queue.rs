//! Queue entry and work item types.

use super::{BasketId, DocumentId, DumpId, QueueEntryId, SubstrateId, WorkId, WorkspaceId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Pipeline work type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkType {
    /// Dump capture validation.
    #[serde(rename = "P0_CAPTURE")]
    P0Capture,
    /// Substrate extraction and governance.
    #[serde(rename = "P1_SUBSTRATE")]
    P1Substrate,
    /// Relationship mapping.
    #[serde(rename = "P2_GRAPH")]
    P2Graph,
    /// Reflection.
    #[serde(rename = "P3_REFLECTION")]
    P3Reflection,
    /// New document composition.
    #[serde(rename = "P4_COMPOSE_NEW")]
    P4ComposeNew,
    /// Recomposition of an existing document.
    #[serde(rename = "P4_RECOMPOSE")]
    P4Recompose,
    /// Governance-only manual edit; never run by the pipeline loop.
    #[serde(rename = "MANUAL_EDIT")]
    ManualEdit,
}

impl WorkType {
    /// Returns the work type as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::P0Capture => "P0_CAPTURE",
            Self::P1Substrate => "P1_SUBSTRATE",
            Self::P2Graph => "P2_GRAPH",
            Self::P3Reflection => "P3_REFLECTION",
            Self::P4ComposeNew => "P4_COMPOSE_NEW",
            Self::P4Recompose => "P4_RECOMPOSE",
            Self::ManualEdit => "MANUAL_EDIT",
        }
    }

    /// Parses a work type from a string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Self::all().iter().copied().find(|t| t.as_str() == s)
    }

    /// Returns all work types.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::P0Capture,
            Self::P1Substrate,
            Self::P2Graph,
            Self::P3Reflection,
            Self::P4ComposeNew,
            Self::P4Recompose,
            Self::ManualEdit,
        ]
    }

    /// Work types the pipeline orchestrator runs.
    #[must_use]
    pub const fn canonical() -> &'static [Self] {
        &[
            Self::P0Capture,
            Self::P1Substrate,
            Self::P2Graph,
            Self::P3Reflection,
            Self::P4ComposeNew,
            Self::P4Recompose,
        ]
    }

    /// Returns true if the pipeline orchestrator runs this type.
    #[must_use]
    pub const fn is_canonical(&self) -> bool {
        !matches!(self, Self::ManualEdit)
    }
}

impl fmt::Display for WorkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Work payload, one variant per work type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "work_type")]
pub enum WorkItem {
    /// Validate a captured dump.
    #[serde(rename = "P0_CAPTURE")]
    Capture {
        /// The dump.
        dump_id: DumpId,
    },
    /// Extract substrate from a dump.
    #[serde(rename = "P1_SUBSTRATE")]
    Substrate {
        /// The dump.
        dump_id: DumpId,
    },
    /// Map relationships in the basket.
    #[serde(rename = "P2_GRAPH")]
    Graph {
        /// Restrict analysis to these units (empty means whole basket).
        #[serde(default)]
        substrate_ids: Vec<SubstrateId>,
    },
    /// Reflect on the basket window.
    #[serde(rename = "P3_REFLECTION")]
    Reflection,
    /// Compose a new document.
    #[serde(rename = "P4_COMPOSE_NEW")]
    ComposeNew {
        /// What the document should accomplish.
        intent: String,
        /// Optional title.
        #[serde(default)]
        title: Option<String>,
        /// Recency window override in days.
        #[serde(default)]
        window_days: Option<u32>,
        /// Units that must be included.
        #[serde(default)]
        pinned_ids: Vec<SubstrateId>,
    },
    /// Recompose an existing document.
    #[serde(rename = "P4_RECOMPOSE")]
    Recompose {
        /// The document.
        document_id: DocumentId,
        /// What the document should accomplish.
        intent: String,
        /// Recency window override in days.
        #[serde(default)]
        window_days: Option<u32>,
        /// Units that must be included.
        #[serde(default)]
        pinned_ids: Vec<SubstrateId>,
    },
    /// Manual substrate edit for the governance executor.
    #[serde(rename = "MANUAL_EDIT")]
    ManualEdit {
        /// Edit payload.
        payload: serde_json::Value,
    },
}

impl WorkItem {
    /// Returns the work type of the payload.
    #[must_use]
    pub const fn work_type(&self) -> WorkType {
        match self {
            Self::Capture { .. } => WorkType::P0Capture,
            Self::Substrate { .. } => WorkType::P1Substrate,
            Self::Graph { .. } => WorkType::P2Graph,
            Self::Reflection => WorkType::P3Reflection,
            Self::ComposeNew { .. } => WorkType::P4ComposeNew,
            Self::Recompose { .. } => WorkType::P4Recompose,
            Self::ManualEdit { .. } => WorkType::ManualEdit,
        }
    }

    /// Returns the dump the work refers to, if any.
    #[must_use]
    pub const fn dump_id(&self) -> Option<&DumpId> {
        match self {
            Self::Capture { dump_id } | Self::Substrate { dump_id } => Some(dump_id),
            _ => None,
        }
    }
}

/// Queue entry processing state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueState {
    /// Waiting to be claimed.
    #[default]
    Pending,
    /// Claimed by a worker.
    Processing,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
}

impl QueueState {
    /// Returns the state as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Parses a state from a string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "processing" | "claimed" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for QueueState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A claimable unit of pipeline work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    /// Unique identifier.
    pub id: QueueEntryId,
    /// Work payload.
    pub work: WorkItem,
    /// Target basket.
    pub basket_id: BasketId,
    /// Owning workspace.
    pub workspace_id: WorkspaceId,
    /// Processing state.
    pub status: QueueState,
    /// Claim priority; higher is claimed first.
    pub priority: i32,
    /// Worker holding the claim.
    pub worker_id: Option<String>,
    /// When the claim was taken (Unix epoch seconds).
    pub claimed_at: Option<u64>,
    /// Number of times the entry has been claimed.
    pub attempts: u32,
    /// Error recorded on failure.
    pub error_details: Option<String>,
    /// Higher-level work record.
    pub work_id: Option<WorkId>,
    /// Creation timestamp (Unix epoch seconds).
    pub created_at: u64,
    /// Last update timestamp (Unix epoch seconds).
    pub updated_at: u64,
}

impl QueueEntry {
    /// Creates a pending entry with default priority.
    #[must_use]
    pub fn new(work: WorkItem, basket_id: BasketId, workspace_id: WorkspaceId) -> Self {
        let now = crate::current_timestamp();
        Self {
            id: QueueEntryId::generate(),
            work,
            basket_id,
            workspace_id,
            status: QueueState::Pending,
            priority: 0,
            worker_id: None,
            claimed_at: None,
            attempts: 0,
            error_details: None,
            work_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Sets the claim priority.
    #[must_use]
    pub const fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Links the entry to a work record.
    #[must_use]
    pub fn with_work_id(mut self, work_id: WorkId) -> Self {
        self.work_id = Some(work_id);
        self
    }

    /// Overrides the creation timestamp.
    #[must_use]
    pub const fn with_created_at(mut self, created_at: u64) -> Self {
        self.created_at = created_at;
        self.updated_at = created_at;
        self
    }

    /// Returns the work type.
    #[must_use]
    pub const fn work_type(&self) -> WorkType {
        self.work.work_type()
    }

    /// Returns true if the entry may be claimed at `now`.
    ///
    /// Pending entries are always claimable; processing entries become
    /// claimable once their claim is older than `stale_after_secs`.
    #[must_use]
    pub fn is_claimable(&self, now: u64, stale_after_secs: u64) -> bool {
        match self.status {
            QueueState::Pending => true,
            QueueState::Processing => self
                .claimed_at
                .is_none_or(|at| now.saturating_sub(at) > stale_after_secs),
            QueueState::Completed | QueueState::Failed => false,
        }
    }

    /// Marks the entry claimed by `worker_id` at `now`.
    pub fn claim(&mut self, worker_id: &str, now: u64) {
        self.status = QueueState::Processing;
        self.worker_id = Some(worker_id.to_string());
        self.claimed_at = Some(now);
        self.attempts = self.attempts.saturating_add(1);
        self.updated_at = now;
    }
}

/// Queue entry counts by state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QueueStats {
    /// Pending entries.
    pub pending: usize,
    /// Processing entries.
    pub processing: usize,
    /// Completed entries.
    pub completed: usize,
    /// Failed entries.
    pub failed: usize,
}

impl QueueStats {
    /// Adds one entry in `state`.
    pub const fn count(&mut self, state: QueueState) {
        match state {
            QueueState::Pending => self.pending += 1,
            QueueState::Processing => self.processing += 1,
            QueueState::Completed => self.completed += 1,
            QueueState::Failed => self.failed += 1,
        }
    }

    /// Total entries.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.pending + self.processing + self.completed + self.failed
    }
}
