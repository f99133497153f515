//! Derived artifact storage: reflections, documents, and the timeline.

use crate::Result;
use crate::models::{
    BasketId, BasketSignature, Document, DocumentId, DocumentVersion, PipelineEvent,
    ReflectionArtifact, SubstrateReference, WorkspaceId,
};

/// Reflection artifact and basket signature storage.
pub trait ReflectionBackend: Send + Sync {
    /// Inserts or updates an artifact keyed by `(basket_id, substrate_hash)`.
    ///
    /// Returns `true` if a new row was inserted.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn upsert_reflection(&self, artifact: &ReflectionArtifact) -> Result<bool>;

    /// Lists artifacts of a basket, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn list_reflections(&self, basket_id: &BasketId) -> Result<Vec<ReflectionArtifact>>;

    /// Inserts or replaces the signature of a basket.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn upsert_signature(&self, signature: &BasketSignature) -> Result<()>;

    /// Fetches the signature of a basket.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    fn get_signature(&self, basket_id: &BasketId) -> Result<Option<BasketSignature>>;
}

/// Document, version, and reference storage.
pub trait DocumentBackend: Send + Sync {
    /// Persists a new document.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn create_document(&self, document: &Document) -> Result<()>;

    /// Fetches a document scoped to a workspace.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    fn get_document(&self, id: &DocumentId, workspace_id: &WorkspaceId)
    -> Result<Option<Document>>;

    /// Overwrites the mutable fields of a document. Returns affected rows.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn save_document(&self, document: &Document) -> Result<usize>;

    /// Appends a content version.
    ///
    /// # Errors
    ///
    /// Returns an error if the version number already exists.
    fn append_version(&self, version: &DocumentVersion) -> Result<()>;

    /// Lists versions of a document, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn list_versions(&self, document_id: &DocumentId) -> Result<Vec<DocumentVersion>>;

    /// Replaces the substrate references of a document. Returns rows written.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn replace_references(
        &self,
        document_id: &DocumentId,
        references: &[SubstrateReference],
    ) -> Result<usize>;

    /// Lists the substrate references of a document by rank.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn list_references(&self, document_id: &DocumentId) -> Result<Vec<SubstrateReference>>;
}

/// Append-only basket timeline.
pub trait TimelineBackend: Send + Sync {
    /// Appends an event.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn append_event(&self, event: &PipelineEvent) -> Result<()>;

    /// Lists the newest events of a basket, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn list_events(&self, basket_id: &BasketId, limit: usize) -> Result<Vec<PipelineEvent>>;
}
