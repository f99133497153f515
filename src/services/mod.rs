//! Business logic services.
//!
//! Each pipeline stage is an engine over the shared [`SubstrateStore`]:
//!
//! - [`GovernanceEngine`]: P1 extraction, proposals and execution
//! - [`RelationshipEngine`]: P2 relationship mapping
//! - [`ReflectionEngine`]: P3 read-only reflections
//! - [`CompositionEngine`]: P4 document composition
//!
//! [`PipelineServices`] wires the engines to one store and queue, and
//! [`PipelineOrchestrator`] drives them from queue entries.

pub mod cascade;
pub mod composition;
pub mod governance;
pub mod pipeline;
pub mod reflection;
pub mod relationships;
pub mod text;
pub mod timeline;

pub use cascade::{CascadeContext, CascadeTrigger, StageOutcome};
pub use composition::{ComposeRequest, CompositionEngine};
pub use governance::{GovernanceEngine, ProcessOutcome};
pub use pipeline::{PipelineOrchestrator, RunSummary, StageResult};
pub use reflection::{ReflectionEngine, ReflectionOutcome, ReflectionWindow};
pub use relationships::{MappingOutcome, RelationshipEngine};
pub use timeline::TimelineEmitter;

use crate::config::PipelineConfig;
use crate::llm::{self, LlmProvider};
use crate::models::{
    BasketId, DocumentId, DumpId, DumpTombstone, QueueEntry, QueueEntryId, RawDump, SubstrateId,
    TimelineEventKind, WorkItem, WorkspaceId,
};
use crate::queue::QueueCoordinator;
use crate::storage::{self, QueueBackend, SubstrateStore};
use crate::{Error, Result};
use std::sync::Arc;

/// The stage engines wired to one store and queue.
pub struct PipelineServices {
    config: PipelineConfig,
    store: Arc<dyn SubstrateStore>,
    queue: QueueCoordinator,
    timeline: TimelineEmitter,
    governance: Arc<GovernanceEngine>,
    relationships: Arc<RelationshipEngine>,
    reflection: Arc<ReflectionEngine>,
    composition: Arc<CompositionEngine>,
}

impl PipelineServices {
    /// Wires engines over `store`. `None` for `llm` runs every stage on
    /// its heuristic path.
    #[must_use]
    pub fn new(
        store: Arc<dyn SubstrateStore>,
        llm: Option<Arc<dyn LlmProvider>>,
        config: PipelineConfig,
    ) -> Self {
        let backend: Arc<dyn QueueBackend> = store.clone();
        let queue = QueueCoordinator::new(backend);
        let cascade = CascadeTrigger::new(queue.clone());

        let governance = GovernanceEngine::new(Arc::clone(&store), llm.clone(), &config)
            .with_cascade(cascade.clone());
        let relationships =
            RelationshipEngine::new(Arc::clone(&store), &config).with_cascade(cascade.clone());
        let reflection =
            ReflectionEngine::new(Arc::clone(&store), llm.clone(), &config).with_cascade(cascade);
        let composition = CompositionEngine::new(Arc::clone(&store), llm, &config);

        Self {
            timeline: TimelineEmitter::new(Arc::clone(&store), "ingest"),
            governance: Arc::new(governance),
            relationships: Arc::new(relationships),
            reflection: Arc::new(reflection),
            composition: Arc::new(composition),
            store,
            queue,
            config,
        }
    }

    /// Heuristic-only services over an in-memory store.
    #[must_use]
    pub fn in_memory(config: PipelineConfig) -> Self {
        Self::new(Arc::new(storage::InMemoryStore::new()), None, config)
    }

    /// Opens the configured store and LLM provider.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be opened.
    pub fn from_config(config: PipelineConfig) -> Result<Self> {
        let store = storage::open_store(&config.storage)?;
        let llm = llm::build_provider(&config.llm);
        Ok(Self::new(store, llm, config))
    }

    /// Stores a dump and enqueues substrate extraction for it.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidInput`] if `text` is blank.
    /// - Storage or queue errors.
    pub fn ingest(
        &self,
        basket_id: &BasketId,
        workspace_id: &WorkspaceId,
        text: &str,
    ) -> Result<(DumpId, QueueEntryId)> {
        let dump = RawDump::new(basket_id.clone(), workspace_id.clone(), text);
        self.ingest_dump(dump)
    }

    /// Stores several dumps as one batch. A single extraction entry is
    /// enqueued; the worker governs the whole batch as one proposal.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidInput`] if `texts` is empty or any text is blank.
    /// - Storage or queue errors.
    pub fn ingest_batch(
        &self,
        basket_id: &BasketId,
        workspace_id: &WorkspaceId,
        texts: &[&str],
    ) -> Result<(Vec<DumpId>, QueueEntryId)> {
        if texts.is_empty() || texts.iter().any(|t| t.trim().is_empty()) {
            return Err(Error::InvalidInput(
                "batch must contain only non-empty dumps".to_string(),
            ));
        }
        let batch_id = uuid::Uuid::now_v7().to_string();
        let mut ids = Vec::with_capacity(texts.len());
        for text in texts {
            let dump = RawDump::new(basket_id.clone(), workspace_id.clone(), *text)
                .with_batch_id(batch_id.clone());
            self.store.insert_dump(&dump)?;
            self.timeline.emit(
                basket_id,
                workspace_id,
                TimelineEventKind::DumpCreated {
                    dump_id: dump.id.clone(),
                },
                None,
            );
            ids.push(dump.id);
        }
        let entry = QueueEntry::new(
            WorkItem::Substrate {
                dump_id: ids[0].clone(),
            },
            basket_id.clone(),
            workspace_id.clone(),
        );
        let entry_id = self.queue.enqueue(&entry)?;
        tracing::info!(basket_id = %basket_id, batch_id = %batch_id, dumps = ids.len(), "Batch ingested");
        Ok((ids, entry_id))
    }

    /// Stores a prepared dump and enqueues substrate extraction for it.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidInput`] if the dump has neither text nor a file.
    /// - Storage or queue errors.
    pub fn ingest_dump(&self, dump: RawDump) -> Result<(DumpId, QueueEntryId)> {
        if !dump.has_content() && dump.file_url.is_none() {
            return Err(Error::InvalidInput("dump has no content".to_string()));
        }
        self.store.insert_dump(&dump)?;
        self.timeline.emit(
            &dump.basket_id,
            &dump.workspace_id,
            TimelineEventKind::DumpCreated {
                dump_id: dump.id.clone(),
            },
            None,
        );
        let entry = QueueEntry::new(
            WorkItem::Substrate {
                dump_id: dump.id.clone(),
            },
            dump.basket_id.clone(),
            dump.workspace_id.clone(),
        );
        let entry_id = self.queue.enqueue(&entry)?;
        metrics::counter!("dumps_ingested_total").increment(1);
        tracing::info!(dump_id = %dump.id, basket_id = %dump.basket_id, "Dump ingested");
        Ok((dump.id, entry_id))
    }

    /// Excludes a dump from reflection windows and raw composition material.
    ///
    /// Substrate already extracted from the dump is left alone.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] if the dump is not in `workspace_id`.
    /// - Storage errors.
    pub fn tombstone_dump(
        &self,
        dump_id: &DumpId,
        workspace_id: &WorkspaceId,
        reason: &str,
    ) -> Result<()> {
        if self.store.get_dump(dump_id, workspace_id)?.is_none() {
            return Err(Error::not_found("dump", dump_id));
        }
        match self.store.tombstone_dump(&DumpTombstone::new(dump_id.clone(), reason))? {
            0 => Err(Error::not_found("dump", dump_id)),
            _ => {
                tracing::info!(dump_id = %dump_id, reason, "Dump tombstoned");
                Ok(())
            },
        }
    }

    /// Enqueues composition of a new document.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidInput`] if `intent` is blank.
    /// - Queue errors.
    pub fn request_composition(
        &self,
        basket_id: &BasketId,
        workspace_id: &WorkspaceId,
        intent: &str,
        title: Option<&str>,
        window_days: Option<u32>,
        pinned_ids: Vec<SubstrateId>,
    ) -> Result<QueueEntryId> {
        if intent.trim().is_empty() {
            return Err(Error::InvalidInput("intent is required".to_string()));
        }
        let entry = QueueEntry::new(
            WorkItem::ComposeNew {
                intent: intent.to_string(),
                title: title.map(str::to_string),
                window_days,
                pinned_ids,
            },
            basket_id.clone(),
            workspace_id.clone(),
        );
        self.queue.enqueue(&entry)
    }

    /// Enqueues recomposition of an existing document.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] if the document is missing.
    /// - Queue errors.
    pub fn request_recomposition(
        &self,
        document_id: &DocumentId,
        workspace_id: &WorkspaceId,
        intent: Option<&str>,
    ) -> Result<QueueEntryId> {
        let document = self
            .store
            .get_document(document_id, workspace_id)?
            .ok_or_else(|| Error::not_found("document", document_id))?;
        let entry = QueueEntry::new(
            WorkItem::Recompose {
                document_id: document.id.clone(),
                intent: intent.map_or_else(|| document.metadata.intent.clone(), str::to_string),
                window_days: None,
                pinned_ids: Vec::new(),
            },
            document.basket_id,
            workspace_id.clone(),
        );
        self.queue.enqueue(&entry)
    }

    /// Creates a worker over these services.
    #[must_use]
    pub fn orchestrator(&self) -> PipelineOrchestrator {
        PipelineOrchestrator::new(self)
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Returns the shared store.
    #[must_use]
    pub const fn store(&self) -> &Arc<dyn SubstrateStore> {
        &self.store
    }

    /// Returns the queue coordinator.
    #[must_use]
    pub const fn queue(&self) -> &QueueCoordinator {
        &self.queue
    }

    /// Returns the P1 governance engine.
    #[must_use]
    pub const fn governance(&self) -> &Arc<GovernanceEngine> {
        &self.governance
    }

    /// Returns the P2 relationship engine.
    #[must_use]
    pub const fn relationships(&self) -> &Arc<RelationshipEngine> {
        &self.relationships
    }

    /// Returns the P3 reflection engine.
    #[must_use]
    pub const fn reflection(&self) -> &Arc<ReflectionEngine> {
        &self.reflection
    }

    /// Returns the P4 composition engine.
    #[must_use]
    pub const fn composition(&self) -> &Arc<CompositionEngine> {
        &self.composition
    }
}

impl std::fmt::Debug for PipelineServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineServices")
            .field("backend", &self.store.backend_name())
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}
