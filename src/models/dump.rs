//! Raw dump types.

use super::{BasketId, DumpId, WorkspaceId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Source metadata key used to group dumps submitted together.
pub const BATCH_ID_KEY: &str = "batch_id";

/// Immutable ingested text or file content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDump {
    /// Unique identifier.
    pub id: DumpId,
    /// Owning basket.
    pub basket_id: BasketId,
    /// Owning workspace.
    pub workspace_id: WorkspaceId,
    /// Text content (may be empty for file-only dumps).
    pub text: String,
    /// Optional reference to an uploaded file.
    pub file_url: Option<String>,
    /// Free-form source metadata (client, batch id, ...).
    pub source_meta: serde_json::Map<String, serde_json::Value>,
    /// Creation timestamp (Unix epoch seconds).
    pub created_at: u64,
}

impl RawDump {
    /// Creates a new text dump stamped with the current time.
    #[must_use]
    pub fn new(basket_id: BasketId, workspace_id: WorkspaceId, text: impl Into<String>) -> Self {
        Self {
            id: DumpId::generate(),
            basket_id,
            workspace_id,
            text: text.into(),
            file_url: None,
            source_meta: serde_json::Map::new(),
            created_at: crate::current_timestamp(),
        }
    }

    /// Sets the batch id in source metadata.
    #[must_use]
    pub fn with_batch_id(mut self, batch_id: impl Into<String>) -> Self {
        self.source_meta.insert(
            BATCH_ID_KEY.to_string(),
            serde_json::Value::String(batch_id.into()),
        );
        self
    }

    /// Overrides the creation timestamp.
    #[must_use]
    pub const fn with_created_at(mut self, created_at: u64) -> Self {
        self.created_at = created_at;
        self
    }

    /// Returns the batch id recorded in source metadata, if any.
    #[must_use]
    pub fn batch_id(&self) -> Option<&str> {
        self.source_meta
            .get(BATCH_ID_KEY)
            .and_then(serde_json::Value::as_str)
            .filter(|s| !s.is_empty())
    }

    /// Returns true if the dump carries usable text.
    #[must_use]
    pub fn has_content(&self) -> bool {
        !self.text.trim().is_empty()
    }
}

/// Soft-exclusion record for a dump.
///
/// Tombstoned dumps are skipped by reflection windows and raw retrieval;
/// the dump row itself is never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DumpTombstone {
    /// The excluded dump.
    pub dump_id: DumpId,
    /// Why it was excluded.
    pub reason: String,
    /// When it was excluded.
    pub tombstoned_at: DateTime<Utc>,
}

impl DumpTombstone {
    /// Creates a tombstone stamped now.
    #[must_use]
    pub fn new(dump_id: DumpId, reason: impl Into<String>) -> Self {
        Self {
            dump_id,
            reason: reason.into(),
            tombstoned_at: Utc::now(),
        }
    }
}
