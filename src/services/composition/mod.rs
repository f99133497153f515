//! P4 document composition.
//!
//! Composition is on demand only and never part of the automatic cascade.
//! A run goes through these steps:
//!
//! 1. Analyze the intent.
//! 2. Retrieve substrate under a budget.
//! 3. Select candidates. Scoring falls back to confidence order.
//! 4. Optionally fill coverage gaps from raw dumps.
//! 5. Plan the narrative and write each section.
//! 6. Persist a new content version with its substrate references.
//!
//! Any unrecoverable failure marks the document `failed` with the error
//! instead of leaving it in `composing`.

pub mod intent;
pub mod narrative;
pub mod retrieval;
pub mod selection;

pub use intent::{DocumentType, IntentAnalysis, Organization, Tone, analyze_intent};
pub use narrative::ComposedNarrative;
pub use retrieval::{CompositionCandidate, GapFill, GapSnippet, RetrievalBudget, freshness};
pub use selection::{SelectedItem, Selection, heuristic_selection};

use crate::config::{CompositionConfig, FeatureFlags, PipelineConfig};
use crate::llm::LlmProvider;
use crate::models::{
    BasketId, CompositionMetrics, Document, DocumentId, DocumentStatus, DocumentVersion,
    SemanticType, SubstrateId, SubstrateReference, TimelineEventKind, WorkspaceId,
};
use crate::services::timeline::TimelineEmitter;
use crate::storage::SubstrateStore;
use crate::{Error, Result, current_timestamp};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::instrument;

/// Title used when neither the caller nor the plan supplies one.
const DEFAULT_TITLE: &str = "Untitled document";

/// A composition request for an existing document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposeRequest {
    /// Document to compose into.
    pub document_id: DocumentId,
    /// Basket to draw substrate from.
    pub basket_id: BasketId,
    /// Workspace scope.
    pub workspace_id: WorkspaceId,
    /// What the document should accomplish.
    pub intent: String,
    /// Recency window override in days.
    pub window_days: Option<u32>,
    /// Units that must be included.
    pub pinned_ids: Vec<SubstrateId>,
}

impl ComposeRequest {
    /// Creates a request without window override or pins.
    #[must_use]
    pub fn new(
        document_id: DocumentId,
        basket_id: BasketId,
        workspace_id: WorkspaceId,
        intent: impl Into<String>,
    ) -> Self {
        Self {
            document_id,
            basket_id,
            workspace_id,
            intent: intent.into(),
            window_days: None,
            pinned_ids: Vec::new(),
        }
    }

    /// Sets the recency window in days.
    #[must_use]
    pub const fn with_window_days(mut self, days: Option<u32>) -> Self {
        self.window_days = days;
        self
    }

    /// Sets the pinned units.
    #[must_use]
    pub fn with_pinned(mut self, pinned_ids: Vec<SubstrateId>) -> Self {
        self.pinned_ids = pinned_ids;
        self
    }
}

/// Composes narrative documents from basket substrate.
pub struct CompositionEngine {
    store: Arc<dyn SubstrateStore>,
    llm: Option<Arc<dyn LlmProvider>>,
    config: CompositionConfig,
    features: FeatureFlags,
    timeline: TimelineEmitter,
}

impl CompositionEngine {
    /// Creates an engine; `None` for `llm` uses heuristic selection and
    /// planning throughout.
    #[must_use]
    pub fn new(
        store: Arc<dyn SubstrateStore>,
        llm: Option<Arc<dyn LlmProvider>>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            timeline: TimelineEmitter::new(Arc::clone(&store), "composition"),
            store,
            llm,
            config: config.composition,
            features: config.features,
        }
    }

    /// Replaces the timeline emitter.
    #[must_use]
    pub fn with_timeline(mut self, timeline: TimelineEmitter) -> Self {
        self.timeline = timeline;
        self
    }

    /// Creates an empty `composing` document.
    ///
    /// # Errors
    ///
    /// Returns storage errors.
    pub fn create_placeholder(
        &self,
        basket_id: &BasketId,
        workspace_id: &WorkspaceId,
        title: Option<&str>,
        intent: &str,
    ) -> Result<Document> {
        let document = Document::placeholder(
            basket_id.clone(),
            workspace_id.clone(),
            title.unwrap_or(DEFAULT_TITLE),
            intent,
        );
        self.store.create_document(&document)?;
        tracing::debug!(document_id = %document.id, basket_id = %basket_id, "Document placeholder created");
        Ok(document)
    }

    /// Composes `request.document_id` and returns the updated document.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] if the document is missing or in another
    ///   workspace.
    /// - [`Error::InvalidInput`] if the basket has no substrate to compose
    ///   from. The document is marked `failed`.
    /// - Storage errors. The document is marked `failed` when possible.
    #[instrument(skip(self, request), fields(operation = "composition.compose", document_id = %request.document_id, basket_id = %request.basket_id))]
    pub fn compose(&self, request: &ComposeRequest) -> Result<Document> {
        let start = Instant::now();
        let document = self
            .store
            .get_document(&request.document_id, &request.workspace_id)?
            .ok_or_else(|| Error::not_found("document", &request.document_id))?;

        let result = self.compose_into(document.clone(), request, start);
        let status = if result.is_ok() { "success" } else { "error" };
        metrics::counter!("compositions_total", "status" => status).increment(1);
        metrics::histogram!("composition_duration_ms").record(start.elapsed().as_secs_f64() * 1000.0);

        match result {
            Ok(composed) => Ok(composed),
            Err(error) => {
                self.mark_failed(document, &error);
                Err(error)
            },
        }
    }

    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    fn compose_into(
        &self,
        mut document: Document,
        request: &ComposeRequest,
        start: Instant,
    ) -> Result<Document> {
        let now = current_timestamp();
        if document.status != DocumentStatus::Composing {
            document.status = DocumentStatus::Composing;
            document.updated_at = now;
            if self.store.save_document(&document)? == 0 {
                return Err(Error::not_found("document", &document.id));
            }
        }
        let analysis = analyze_intent(&request.intent);
        let budget = RetrievalBudget::for_request(&analysis, &self.config, &self.features, request.window_days);

        let candidates = retrieval::retrieve(
            self.store.as_ref(),
            &request.basket_id,
            &request.workspace_id,
            &analysis,
            &budget,
            &request.pinned_ids,
            now,
        )?;
        if candidates.is_empty() {
            return Err(Error::InvalidInput(format!(
                "basket {} has no substrate to compose from",
                request.basket_id
            )));
        }

        let llm = self.llm.as_deref();
        let selection = selection::select(
            llm,
            &request.intent,
            &analysis,
            &candidates,
            self.config.fallback_count,
        );

        let selected_types: HashSet<SemanticType> = selection
            .items
            .iter()
            .map(|i| i.candidate.semantic_type)
            .collect();
        let gaps = if self.features.gap_fill {
            let cutoff = now.saturating_sub(budget.recency_days.saturating_mul(86_400));
            retrieval::gap_fill(
                self.store.as_ref(),
                &request.basket_id,
                &request.workspace_id,
                &analysis.priorities,
                &selected_types,
                &self.config,
                cutoff,
            )?
        } else {
            GapFill {
                snippets: Vec::new(),
                coverage: retrieval::coverage(&analysis.priorities, &selected_types),
            }
        };

        let narrative = narrative::compose_narrative(
            llm,
            &request.intent,
            &analysis,
            &selection.items,
            &gaps.snippets,
        );

        if document.title == DEFAULT_TITLE {
            if let Some(title) = &narrative.title {
                document.title.clone_from(title);
            }
        }
        let content = narrative.render(&document.title);
        let version_no = document.current_version + 1;
        self.store
            .append_version(&DocumentVersion::new(document.id.clone(), version_no, content.clone()))?;

        let selected = selection.items.len();
        let metrics = CompositionMetrics {
            coverage_pct: gaps.coverage,
            freshness_score: if selected == 0 {
                0.0
            } else {
                selection.items.iter().map(|i| i.candidate.freshness).sum::<f32>() / selected as f32
            },
            provenance_pct: if selected == 0 {
                0.0
            } else {
                selection.items.iter().filter(|i| i.candidate.has_provenance).count() as f32
                    / selected as f32
            },
            candidates_found: candidates.len(),
            candidates_selected: selected,
            processing_time_ms: start.elapsed().as_millis() as u64,
            raw_gap_used: !gaps.snippets.is_empty(),
        };

        document.content = content;
        document.status = DocumentStatus::Composed;
        document.current_version = version_no;
        document.updated_at = current_timestamp();
        document.metadata.intent.clone_from(&request.intent);
        document.metadata.document_type = analysis.document_type.as_str().to_string();
        document.metadata.organization = analysis.organization.as_str().to_string();
        document.metadata.confidence = analysis.confidence;
        document.metadata.used_fallback_selection = selection.used_fallback;
        document.metadata.sections = narrative.sections;
        document.metadata.metrics = Some(metrics);
        document.metadata.error = None;
        if self.store.save_document(&document)? == 0 {
            return Err(Error::not_found("document", &document.id));
        }

        let references: Vec<SubstrateReference> = selection
            .items
            .iter()
            .filter(|i| SubstrateReference::is_attachable(i.candidate.kind))
            .enumerate()
            .map(|(rank, i)| SubstrateReference {
                document_id: document.id.clone(),
                substrate_id: i.candidate.id.clone(),
                kind: i.candidate.kind,
                semantic_type: i.candidate.semantic_type,
                rank,
                score: i.score,
            })
            .collect();
        self.store.replace_references(&document.id, &references)?;

        tracing::info!(
            document_id = %document.id,
            version = version_no,
            candidates = candidates.len(),
            selected = selected,
            references = references.len(),
            used_fallback_selection = selection.used_fallback,
            fallback_plan = narrative.used_fallback_plan,
            fallback_sections = narrative.fallback_sections,
            raw_gap_used = !gaps.snippets.is_empty(),
            "Document composed"
        );
        self.timeline.emit(
            &document.basket_id,
            &document.workspace_id,
            TimelineEventKind::DocumentComposed {
                document_id: document.id.clone(),
                version_no,
                used_fallback_selection: selection.used_fallback,
            },
            Some("composition"),
        );
        Ok(document)
    }

    fn mark_failed(&self, mut document: Document, error: &Error) {
        tracing::warn!(document_id = %document.id, error = %error, "Composition failed");
        document.status = DocumentStatus::Failed;
        document.metadata.error = Some(error.to_string());
        document.updated_at = current_timestamp();
        if let Err(e) = self.store.save_document(&document) {
            tracing::error!(document_id = %document.id, error = %e, "Failed to record composition failure");
        }
        self.timeline.emit(
            &document.basket_id,
            &document.workspace_id,
            TimelineEventKind::DocumentFailed {
                document_id: document.id.clone(),
                error: error.to_string(),
            },
            Some("composition"),
        );
    }
}

impl std::fmt::Debug for CompositionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositionEngine")
            .field("config", &self.config)
            .field("features", &self.features)
            .field("llm", &self.llm.as_ref().map(|l| l.name()))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::CandidateSelection;
    use crate::models::{DumpId, Provenance, SubstrateKind, SubstrateState, SubstrateUnit};
    use crate::storage::{BlockBackend, DocumentBackend, InMemoryStore};
    use std::sync::Mutex;

    /// Records the document's stored status when selection runs.
    struct StatusWatcher {
        store: Arc<InMemoryStore>,
        document_id: DocumentId,
        seen: Mutex<Option<DocumentStatus>>,
    }

    impl LlmProvider for StatusWatcher {
        fn name(&self) -> &'static str {
            "watcher"
        }
        fn complete(&self, _prompt: &str) -> Result<String> {
            Err(Error::operation("complete", "unused"))
        }
        fn score_candidates(&self, _: &str, _: &[String], _: &str) -> Result<CandidateSelection> {
            let stored = self
                .store
                .get_document(&self.document_id, &WorkspaceId::new("w1"))
                .unwrap()
                .unwrap();
            *self.seen.lock().unwrap() = Some(stored.status);
            Err(Error::operation("score_candidates", "declined"))
        }
    }

    fn seed(store: &InMemoryStore, n: usize) {
        let types = [
            SemanticType::Insight,
            SemanticType::Problem,
            SemanticType::Solution,
            SemanticType::Rationale,
        ];
        for i in 0..n {
            let unit = SubstrateUnit::new(
                BasketId::new("b1"),
                WorkspaceId::new("w1"),
                SubstrateKind::Block,
                types[i % types.len()],
                format!("Decision {i}"),
                format!("We chose option {i} for the storage layer."),
            )
            .with_state(SubstrateState::Accepted)
            .with_provenance(Provenance {
                dump_ids: vec![DumpId::new("d1")],
                method: "test".to_string(),
                confidence: 0.7,
            });
            store.insert_substrate(&unit).unwrap();
        }
    }

    fn engine(store: &Arc<InMemoryStore>) -> CompositionEngine {
        CompositionEngine::new(store.clone(), None, &PipelineConfig::default())
    }

    #[test]
    fn test_compose_writes_version_and_references() {
        let store = Arc::new(InMemoryStore::new());
        seed(&store, 8);
        let engine = engine(&store);
        let doc = engine
            .create_placeholder(&BasketId::new("b1"), &WorkspaceId::new("w1"), Some("Arch"), "summarize architecture decisions")
            .unwrap();
        let request = ComposeRequest::new(
            doc.id.clone(),
            BasketId::new("b1"),
            WorkspaceId::new("w1"),
            "summarize architecture decisions",
        );

        let composed = engine.compose(&request).unwrap();
        assert_eq!(composed.status, DocumentStatus::Composed);
        assert_eq!(composed.current_version, 1);
        assert!(composed.content.starts_with("# Arch"));
        assert!(!composed.metadata.sections.is_empty());
        assert!(composed.metadata.used_fallback_selection);
        let metrics = composed.metadata.metrics.unwrap();
        assert_eq!(metrics.candidates_found, 8);
        assert!((metrics.provenance_pct - 1.0).abs() < f32::EPSILON);

        let references = store.list_references(&doc.id).unwrap();
        assert_eq!(references.len(), metrics.candidates_selected);

        let again = engine.compose(&request).unwrap();
        assert_eq!(again.current_version, 2);
        assert_eq!(store.list_versions(&doc.id).unwrap().len(), 2);
    }

    #[test]
    fn test_empty_basket_marks_document_failed() {
        let store = Arc::new(InMemoryStore::new());
        let engine = engine(&store);
        let doc = engine
            .create_placeholder(&BasketId::new("b1"), &WorkspaceId::new("w1"), None, "summarize")
            .unwrap();
        let err = engine
            .compose(&ComposeRequest::new(
                doc.id.clone(),
                BasketId::new("b1"),
                WorkspaceId::new("w1"),
                "summarize",
            ))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));

        let stored = store.get_document(&doc.id, &WorkspaceId::new("w1")).unwrap().unwrap();
        assert_eq!(stored.status, DocumentStatus::Failed);
        assert!(stored.metadata.error.is_some());
    }

    #[test]
    fn test_recompose_marks_document_composing_while_running() {
        let store = Arc::new(InMemoryStore::new());
        seed(&store, 4);
        let doc = engine(&store)
            .create_placeholder(&BasketId::new("b1"), &WorkspaceId::new("w1"), Some("Arch"), "summarize")
            .unwrap();
        let request = ComposeRequest::new(
            doc.id.clone(),
            BasketId::new("b1"),
            WorkspaceId::new("w1"),
            "summarize",
        );
        engine(&store).compose(&request).unwrap();

        let watcher = Arc::new(StatusWatcher {
            store: Arc::clone(&store),
            document_id: doc.id.clone(),
            seen: Mutex::new(None),
        });
        let llm: Arc<dyn LlmProvider> = watcher.clone();
        let recomposed = CompositionEngine::new(store.clone(), Some(llm), &PipelineConfig::default())
            .compose(&request)
            .unwrap();

        assert_eq!(*watcher.seen.lock().unwrap(), Some(DocumentStatus::Composing));
        assert_eq!(recomposed.status, DocumentStatus::Composed);
        assert_eq!(recomposed.current_version, 2);
    }

    #[test]
    fn test_missing_document_is_not_found() {
        let store = Arc::new(InMemoryStore::new());
        let err = engine(&store)
            .compose(&ComposeRequest::new(
                DocumentId::new("nope"),
                BasketId::new("b1"),
                WorkspaceId::new("w1"),
                "summarize",
            ))
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { kind: "document", .. }));
    }
}
