//! Composed document types.

use super::{BasketId, DocumentId, SemanticType, SubstrateId, SubstrateKind, WorkspaceId};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Composition status of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    /// Placeholder created, composition in progress.
    #[default]
    Composing,
    /// Content written.
    Composed,
    /// Composition failed; see `metadata.error`.
    Failed,
}

impl DocumentStatus {
    /// Returns the status as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Composing => "composing",
            Self::Composed => "composed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Retrieval and selection metrics recorded on each composition.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CompositionMetrics {
    /// Share of requested substrate types covered by the selection.
    pub coverage_pct: f32,
    /// Mean freshness of selected substrate.
    pub freshness_score: f32,
    /// Share of selected units carrying dump provenance.
    pub provenance_pct: f32,
    /// Candidates retrieved.
    pub candidates_found: usize,
    /// Candidates selected.
    pub candidates_selected: usize,
    /// Wall time of the composition.
    pub processing_time_ms: u64,
    /// Whether raw gap-fill snippets were used.
    pub raw_gap_used: bool,
}

/// One composed section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentSection {
    /// Section title.
    pub title: String,
    /// Generated prose.
    pub content: String,
    /// Display order.
    pub order: usize,
}

/// Structured document metadata.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DocumentMetadata {
    /// Request intent.
    pub intent: String,
    /// Detected document type.
    pub document_type: String,
    /// Organization style used.
    pub organization: String,
    /// Intent analysis confidence.
    pub confidence: f32,
    /// Composition metrics.
    pub metrics: Option<CompositionMetrics>,
    /// Whether heuristic selection replaced the scoring step.
    pub used_fallback_selection: bool,
    /// Section layout.
    pub sections: Vec<DocumentSection>,
    /// Failure message when status is `failed`.
    pub error: Option<String>,
}

/// A composed narrative document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Unique identifier.
    pub id: DocumentId,
    /// Owning basket.
    pub basket_id: BasketId,
    /// Owning workspace.
    pub workspace_id: WorkspaceId,
    /// Title.
    pub title: String,
    /// Current content.
    pub content: String,
    /// Composition status.
    pub status: DocumentStatus,
    /// Structured metadata.
    pub metadata: DocumentMetadata,
    /// Latest version number (0 before the first composition).
    pub current_version: u32,
    /// Creation timestamp (Unix epoch seconds).
    pub created_at: u64,
    /// Last update timestamp (Unix epoch seconds).
    pub updated_at: u64,
}

impl Document {
    /// Creates an empty placeholder in `composing` state.
    #[must_use]
    pub fn placeholder(
        basket_id: BasketId,
        workspace_id: WorkspaceId,
        title: impl Into<String>,
        intent: impl Into<String>,
    ) -> Self {
        let now = crate::current_timestamp();
        Self {
            id: DocumentId::generate(),
            basket_id,
            workspace_id,
            title: title.into(),
            content: String::new(),
            status: DocumentStatus::Composing,
            metadata: DocumentMetadata {
                intent: intent.into(),
                ..DocumentMetadata::default()
            },
            current_version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns true if content has been written.
    #[must_use]
    pub fn is_composed(&self) -> bool {
        self.status == DocumentStatus::Composed && !self.content.is_empty()
    }
}

/// Immutable content snapshot written on each composition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentVersion {
    /// Document versioned.
    pub document_id: DocumentId,
    /// Monotonic version number starting at 1.
    pub version_no: u32,
    /// Content snapshot.
    pub content: String,
    /// SHA-256 of the content.
    pub content_hash: String,
    /// Creation timestamp.
    pub created_at: u64,
}

impl DocumentVersion {
    /// Creates a version, hashing the content.
    #[must_use]
    pub fn new(document_id: DocumentId, version_no: u32, content: impl Into<String>) -> Self {
        let content = content.into();
        let content_hash = hex::encode(Sha256::digest(content.as_bytes()));
        Self {
            document_id,
            version_no,
            content,
            content_hash,
            created_at: crate::current_timestamp(),
        }
    }
}

/// Join row linking a document to a substrate unit it draws on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubstrateReference {
    /// Referencing document.
    pub document_id: DocumentId,
    /// Referenced unit.
    pub substrate_id: SubstrateId,
    /// Kind of the referenced unit.
    pub kind: SubstrateKind,
    /// Semantic type of the referenced unit.
    pub semantic_type: SemanticType,
    /// Selection rank.
    pub rank: usize,
    /// Selection score.
    pub score: f32,
}

impl SubstrateReference {
    /// Kinds that may be attached to documents.
    pub const ATTACHABLE_KINDS: &'static [SubstrateKind] =
        &[SubstrateKind::Block, SubstrateKind::ContextItem];

    /// Returns true if `kind` may be attached.
    #[must_use]
    pub fn is_attachable(kind: SubstrateKind) -> bool {
        Self::ATTACHABLE_KINDS.contains(&kind)
    }
}
