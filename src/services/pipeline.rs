//! Queue-driven pipeline worker.
//!
//! A worker claims entries from the shared queue, dispatches each to the
//! engine for its stage and records the terminal state. Stage engines
//! enqueue follow-up work themselves through the cascade, so the worker
//! never calls one stage from another.

use super::PipelineServices;
use super::composition::{ComposeRequest, CompositionEngine};
use super::governance::GovernanceEngine;
use super::reflection::ReflectionEngine;
use super::relationships::RelationshipEngine;
use crate::config::WorkerConfig;
use crate::models::{DocumentId, DumpId, QueueEntry, QueueState, SubstrateId, WorkItem};
use crate::queue::QueueCoordinator;
use crate::storage::SubstrateStore;
use crate::{Error, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::instrument;

/// What processing a single entry produced.
#[derive(Debug, Clone, PartialEq)]
pub enum StageResult {
    /// P0/P1 governance ran.
    Governed {
        /// Proposal covering the dump, if any.
        proposal_id: Option<crate::models::ProposalId>,
        /// Whether the proposal was executed.
        executed: bool,
    },
    /// P2 relationship mapping ran.
    Mapped {
        /// Relationships newly created.
        relationships_created: usize,
    },
    /// P3 reflection ran.
    Reflected {
        /// Whether a new artifact was stored.
        created: bool,
    },
    /// P4 composition ran.
    Composed {
        /// The composed document.
        document_id: DocumentId,
    },
    /// The entry was handed back to the queue unprocessed.
    Released,
}

/// Counts from one or more worker iterations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunSummary {
    /// Entries claimed.
    pub claimed: usize,
    /// Entries marked completed.
    pub completed: usize,
    /// Entries marked failed.
    pub failed: usize,
    /// Entries released back to pending.
    pub released: usize,
}

impl RunSummary {
    /// Adds another summary into this one.
    pub const fn absorb(&mut self, other: Self) {
        self.claimed += other.claimed;
        self.completed += other.completed;
        self.failed += other.failed;
        self.released += other.released;
    }
}

/// Claims queue work and dispatches it to the stage engines.
pub struct PipelineOrchestrator {
    store: Arc<dyn SubstrateStore>,
    queue: QueueCoordinator,
    governance: Arc<GovernanceEngine>,
    relationships: Arc<RelationshipEngine>,
    reflection: Arc<ReflectionEngine>,
    composition: Arc<CompositionEngine>,
    worker: WorkerConfig,
}

impl PipelineOrchestrator {
    /// Creates a worker over the engines of `services`.
    #[must_use]
    pub fn new(services: &PipelineServices) -> Self {
        Self {
            store: Arc::clone(services.store()),
            queue: services.queue().clone(),
            governance: Arc::clone(services.governance()),
            relationships: Arc::clone(services.relationships()),
            reflection: Arc::clone(services.reflection()),
            composition: Arc::clone(services.composition()),
            worker: services.config().worker.clone(),
        }
    }

    /// Overrides the worker identity.
    #[must_use]
    pub fn with_worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker.worker_id = worker_id.into();
        self
    }

    /// Returns the worker identity.
    #[must_use]
    pub fn worker_id(&self) -> &str {
        &self.worker.worker_id
    }

    /// Claims one batch and processes it to completion.
    ///
    /// Entry failures are recorded on the entry and never abort the batch.
    #[instrument(skip(self), fields(operation = "pipeline.run_once", worker_id = %self.worker.worker_id))]
    pub fn run_once(&self) -> RunSummary {
        let entries = self.queue.claim_work(
            &self.worker.worker_id,
            self.worker.claim_limit,
            Duration::from_secs(self.worker.stale_after_secs),
        );
        let mut summary = RunSummary {
            claimed: entries.len(),
            ..RunSummary::default()
        };

        for entry in &entries {
            let start = Instant::now();
            let work_type = entry.work.work_type().as_str();
            match self.process_entry(entry) {
                Ok(StageResult::Released) => {
                    self.queue.release(&entry.id, &self.worker.worker_id);
                    summary.released += 1;
                },
                Ok(result) => {
                    self.queue.update_state(
                        &entry.id,
                        &self.worker.worker_id,
                        QueueState::Completed,
                        None,
                    );
                    summary.completed += 1;
                    metrics::counter!("pipeline_entries_total", "work_type" => work_type, "status" => "success")
                        .increment(1);
                    tracing::info!(entry_id = %entry.id, work_type = work_type, result = ?result, "Queue entry completed");
                },
                Err(e) => {
                    let message = e.to_string();
                    self.queue.update_state(
                        &entry.id,
                        &self.worker.worker_id,
                        QueueState::Failed,
                        Some(&message),
                    );
                    summary.failed += 1;
                    metrics::counter!("pipeline_entries_total", "work_type" => work_type, "status" => "error")
                        .increment(1);
                    tracing::error!(entry_id = %entry.id, work_type = work_type, error = %message, "Queue entry failed");
                },
            }
            metrics::histogram!("pipeline_entry_duration_ms", "work_type" => work_type)
                .record(start.elapsed().as_secs_f64() * 1000.0);
        }
        summary
    }

    /// Dispatches one claimed entry to its stage engine.
    ///
    /// # Errors
    ///
    /// Returns the stage engine's error.
    pub fn process_entry(&self, entry: &QueueEntry) -> Result<StageResult> {
        let basket_id = &entry.basket_id;
        let workspace_id = &entry.workspace_id;
        match &entry.work {
            WorkItem::Capture { dump_id } | WorkItem::Substrate { dump_id } => {
                self.govern(dump_id, entry)
            },
            WorkItem::Graph { substrate_ids } => self.map(substrate_ids, entry),
            WorkItem::Reflection => {
                let outcome = self.reflection.compute_reflection(
                    basket_id,
                    workspace_id,
                    entry.work_id.as_ref(),
                )?;
                Ok(StageResult::Reflected {
                    created: outcome.created,
                })
            },
            WorkItem::ComposeNew {
                intent,
                title,
                window_days,
                pinned_ids,
            } => {
                let document = self.composition.create_placeholder(
                    basket_id,
                    workspace_id,
                    title.as_deref(),
                    intent,
                )?;
                self.compose(document.id, entry, intent, *window_days, pinned_ids)
            },
            WorkItem::Recompose {
                document_id,
                intent,
                window_days,
                pinned_ids,
            } => self.compose(document_id.clone(), entry, intent, *window_days, pinned_ids),
            WorkItem::ManualEdit { .. } => {
                tracing::warn!(entry_id = %entry.id, "Manual edits are applied by the governance executor, releasing");
                Ok(StageResult::Released)
            },
        }
    }

    fn govern(&self, dump_id: &DumpId, entry: &QueueEntry) -> Result<StageResult> {
        let basket_id = &entry.basket_id;
        let workspace_id = &entry.workspace_id;
        let work_id = entry.work_id.as_ref();
        let dump = self
            .store
            .get_dump(dump_id, workspace_id)?
            .filter(|d| &d.basket_id == basket_id)
            .ok_or_else(|| Error::not_found("dump", dump_id))?;
        if !dump.has_content() && dump.file_url.is_none() {
            return Err(Error::InvalidInput(format!("dump {dump_id} has no content")));
        }

        let batch = match dump.batch_id() {
            Some(batch_id) => self.store.dumps_in_batch(basket_id, batch_id)?,
            None => Vec::new(),
        };
        let outcome = if batch.len() > 1 {
            let ids: Vec<DumpId> = batch.into_iter().map(|d| d.id).collect();
            self.governance
                .process_batch_dumps(&ids, basket_id, workspace_id, work_id)?
        } else {
            self.governance
                .process_dump(dump_id, basket_id, workspace_id, work_id)?
        };
        Ok(StageResult::Governed {
            proposal_id: outcome.proposal_id,
            executed: outcome.executed,
        })
    }

    fn map(&self, focus: &[SubstrateId], entry: &QueueEntry) -> Result<StageResult> {
        let outcome = self.relationships.map_relationships(
            &entry.workspace_id,
            &entry.basket_id,
            focus,
            Some(&self.worker.worker_id),
            entry.work_id.as_ref(),
        )?;
        Ok(StageResult::Mapped {
            relationships_created: outcome.relationships_created,
        })
    }

    fn compose(
        &self,
        document_id: DocumentId,
        entry: &QueueEntry,
        intent: &str,
        window_days: Option<u32>,
        pinned_ids: &[SubstrateId],
    ) -> Result<StageResult> {
        let request = ComposeRequest::new(
            document_id,
            entry.basket_id.clone(),
            entry.workspace_id.clone(),
            intent,
        )
        .with_window_days(window_days)
        .with_pinned(pinned_ids.to_vec());
        let document = self.composition.compose(&request)?;
        Ok(StageResult::Composed {
            document_id: document.id,
        })
    }

    /// Processes batches until no work remains, bounded by `max_iterations`.
    pub fn drain(&self, max_iterations: usize) -> RunSummary {
        let mut total = RunSummary::default();
        for _ in 0..max_iterations {
            let summary = self.run_once();
            if summary.claimed == 0 {
                break;
            }
            total.absorb(summary);
        }
        total
    }

    /// Polls the queue until `shutdown` turns `true` or its sender drops.
    ///
    /// Each batch runs on the blocking pool; the worker sleeps for the poll
    /// interval only after an empty claim.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> RunSummary {
        let poll = Duration::from_millis(self.worker.poll_interval_ms);
        let mut total = RunSummary::default();
        tracing::info!(worker_id = %self.worker.worker_id, poll_ms = self.worker.poll_interval_ms, "Pipeline worker started");

        while !*shutdown.borrow() {
            let worker = Arc::clone(&self);
            let summary = match tokio::task::spawn_blocking(move || worker.run_once()).await {
                Ok(summary) => summary,
                Err(e) => {
                    tracing::error!(error = %e, "Worker iteration panicked");
                    RunSummary::default()
                },
            };
            total.absorb(summary);

            if summary.claimed == 0 {
                tokio::select! {
                    () = tokio::time::sleep(poll) => {},
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    },
                }
            }
        }

        tracing::info!(
            worker_id = %self.worker.worker_id,
            completed = total.completed,
            failed = total.failed,
            "Pipeline worker stopped"
        );
        total
    }
}

impl std::fmt::Debug for PipelineOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineOrchestrator")
            .field("worker_id", &self.worker.worker_id)
            .field("claim_limit", &self.worker.claim_limit)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::models::{
        BasketId, EntryPointPolicy, GovernanceFlags, Provenance, RawDump, SemanticType,
        SubstrateKind, SubstrateState, SubstrateUnit, WorkId, WorkType, WorkspaceId,
    };
    use crate::storage::{BlockBackend, DumpBackend, InMemoryStore, QueueBackend};

    fn services(store: &Arc<InMemoryStore>, ws: &WorkspaceId) -> PipelineServices {
        store
            .set_governance_flags(
                ws,
                GovernanceFlags {
                    ep_manual_edit: EntryPointPolicy::Hybrid,
                    ..GovernanceFlags::default()
                },
            )
            .unwrap();
        let dyn_store: Arc<dyn SubstrateStore> = store.clone();
        PipelineServices::new(dyn_store, None, PipelineConfig::default())
    }

    #[test]
    fn test_ingest_runs_through_to_reflection() {
        let store = Arc::new(InMemoryStore::new());
        let basket = BasketId::new("b1");
        let ws = WorkspaceId::new("w1");
        let services = services(&store, &ws);
        services
            .ingest(
                &basket,
                &ws,
                "Our goal is to reduce onboarding time. The problem is that setup takes \
                 three days. We decided to ship a setup script to reduce onboarding time.",
            )
            .unwrap();

        let summary = services.orchestrator().drain(10);
        assert_eq!(summary.failed, 0);
        assert!(summary.completed >= 2);
        assert!(store.substrate_count() > 0);
        assert_eq!(services.queue().stats().unwrap().pending, 0);
    }

    #[test]
    fn test_missing_dump_marks_entry_failed() {
        let store = Arc::new(InMemoryStore::new());
        let basket = BasketId::new("b1");
        let ws = WorkspaceId::new("w1");
        let services = services(&store, &ws);
        let entry = QueueEntry::new(
            WorkItem::Substrate {
                dump_id: DumpId::new("ghost"),
            },
            basket,
            ws,
        );
        let id = services.queue().enqueue(&entry).unwrap();

        let summary = services.orchestrator().run_once();
        assert_eq!(summary.failed, 1);
        let stored = services.queue().get(&id).unwrap().unwrap();
        assert_eq!(stored.status, QueueState::Failed);
        assert!(stored.error_details.unwrap().contains("ghost"));
    }

    #[test]
    fn test_empty_dump_is_rejected() {
        let store = Arc::new(InMemoryStore::new());
        let basket = BasketId::new("b1");
        let ws = WorkspaceId::new("w1");
        let services = services(&store, &ws);
        let dump = RawDump::new(basket.clone(), ws.clone(), "   ");
        store.insert_dump(&dump).unwrap();
        let entry = QueueEntry::new(WorkItem::Capture { dump_id: dump.id }, basket, ws);

        let result = services.orchestrator().process_entry(&entry);
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_manual_edit_is_released() {
        let store = Arc::new(InMemoryStore::new());
        let basket = BasketId::new("b1");
        let ws = WorkspaceId::new("w1");
        let services = services(&store, &ws);
        let entry = QueueEntry::new(
            WorkItem::ManualEdit {
                payload: serde_json::json!({"op": "noop"}),
            },
            basket,
            ws,
        );

        let result = services.orchestrator().process_entry(&entry).unwrap();
        assert_eq!(result, StageResult::Released);
    }

    #[test]
    fn test_substrate_cascade_carries_work_id() {
        let store = Arc::new(InMemoryStore::new());
        let basket = BasketId::new("b1");
        let ws = WorkspaceId::new("w1");
        let services = services(&store, &ws);
        let dump = RawDump::new(
            basket.clone(),
            ws.clone(),
            "Our API is vulnerable to spam attacks. We should implement rate limiting.",
        );
        store.insert_dump(&dump).unwrap();
        let entry = QueueEntry::new(WorkItem::Substrate { dump_id: dump.id }, basket.clone(), ws)
            .with_work_id(WorkId::new("work-7"));

        let result = services.orchestrator().process_entry(&entry).unwrap();
        assert!(matches!(result, StageResult::Governed { executed: true, .. }));

        let graph = store
            .find_pending(&basket, WorkType::P2Graph)
            .unwrap()
            .unwrap();
        assert_eq!(graph.work_id, Some(WorkId::new("work-7")));
    }

    #[test]
    fn test_graph_cascade_carries_work_id() {
        let store = Arc::new(InMemoryStore::new());
        let basket = BasketId::new("b1");
        let ws = WorkspaceId::new("w1");
        let services = services(&store, &ws);
        for (semantic_type, content) in [
            (SemanticType::Problem, "Our API is vulnerable to spam attacks."),
            (SemanticType::Solution, "We should implement rate limiting."),
        ] {
            let unit = SubstrateUnit::new(
                basket.clone(),
                ws.clone(),
                SubstrateKind::Block,
                semantic_type,
                content,
                content,
            )
            .with_state(SubstrateState::Accepted)
            .with_provenance(Provenance {
                dump_ids: vec![DumpId::new("d1")],
                method: "test".to_string(),
                confidence: 0.7,
            });
            store.insert_substrate(&unit).unwrap();
        }
        let entry = QueueEntry::new(
            WorkItem::Graph {
                substrate_ids: Vec::new(),
            },
            basket.clone(),
            ws,
        )
        .with_work_id(WorkId::new("work-7"));

        let result = services.orchestrator().process_entry(&entry).unwrap();
        assert!(matches!(result, StageResult::Mapped { relationships_created: 1 }));

        let reflection = store
            .find_pending(&basket, WorkType::P3Reflection)
            .unwrap()
            .unwrap();
        assert_eq!(reflection.work_id, Some(WorkId::new("work-7")));
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let store = Arc::new(InMemoryStore::new());
        let ws = WorkspaceId::new("w1");
        let services = services(&store, &ws);
        let worker = Arc::new(services.orchestrator());
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(Arc::clone(&worker).run(rx));
        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send(true).unwrap();

        let summary = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(summary.claimed, 0);
    }
}
