//! Stage-to-stage cascade.
//!
//! A completed stage enqueues the next stage's work instead of calling its
//! engine. Cascade failures are logged and never change the outcome of the
//! stage that triggered them.
//!
//! | Completed stage | Next stage | Condition |
//! |-----------------|------------|-----------|
//! | P1 substrate | P2 graph | at least one substrate change |
//! | P2 graph | P3 reflection | at least one relationship created |
//! | P3 reflection | none | terminal |

use crate::models::{
    BasketId, ExecutionSummary, QueueEntry, QueueEntryId, SubstrateId, WorkId, WorkItem,
    WorkspaceId,
};
use crate::queue::QueueCoordinator;

/// What a stage produced, as far as the cascade cares.
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome {
    /// P1 governance execution finished.
    Substrate {
        /// Successful operation counts.
        summary: ExecutionSummary,
        /// Substrate created or changed.
        substrate_ids: Vec<SubstrateId>,
    },
    /// P2 relationship mapping finished.
    Graph {
        /// Relationships newly created.
        relationships_created: usize,
    },
    /// P3 reflection finished.
    Reflection,
}

/// Where the completed stage ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CascadeContext {
    /// Basket the stage ran in.
    pub basket_id: BasketId,
    /// Workspace of the basket.
    pub workspace_id: WorkspaceId,
    /// Higher-level work record carried along the chain.
    pub work_id: Option<WorkId>,
}

impl CascadeContext {
    /// Creates a context without a work id.
    #[must_use]
    pub const fn new(basket_id: BasketId, workspace_id: WorkspaceId) -> Self {
        Self {
            basket_id,
            workspace_id,
            work_id: None,
        }
    }

    /// Carries `work_id` into downstream entries.
    #[must_use]
    pub fn with_work_id(mut self, work_id: Option<&WorkId>) -> Self {
        self.work_id = work_id.cloned();
        self
    }
}

/// Enqueues downstream work after a successful stage.
#[derive(Debug, Clone)]
pub struct CascadeTrigger {
    queue: QueueCoordinator,
}

impl CascadeTrigger {
    /// Creates a trigger enqueueing through `queue`.
    #[must_use]
    pub const fn new(queue: QueueCoordinator) -> Self {
        Self { queue }
    }

    /// Enqueues the next stage's work, or returns `None` when no downstream
    /// work is warranted or enqueueing failed.
    ///
    /// Reflection work coalesces with a pending reflection for the basket.
    pub fn trigger_next_stage(
        &self,
        context: &CascadeContext,
        outcome: &StageOutcome,
    ) -> Option<QueueEntryId> {
        let (from, work) = match outcome {
            StageOutcome::Substrate {
                summary,
                substrate_ids,
            } => {
                if summary.substrate_changes() == 0 {
                    tracing::debug!(basket_id = %context.basket_id, "No substrate changes, cascade stops");
                    return None;
                }
                (
                    "P1_SUBSTRATE",
                    WorkItem::Graph {
                        substrate_ids: substrate_ids.clone(),
                    },
                )
            },
            StageOutcome::Graph {
                relationships_created,
            } => {
                if *relationships_created == 0 {
                    tracing::debug!(basket_id = %context.basket_id, "No relationships created, cascade stops");
                    return None;
                }
                ("P2_GRAPH", WorkItem::Reflection)
            },
            StageOutcome::Reflection => return None,
        };

        let mut entry = QueueEntry::new(
            work,
            context.basket_id.clone(),
            context.workspace_id.clone(),
        );
        if let Some(work_id) = &context.work_id {
            entry = entry.with_work_id(work_id.clone());
        }
        let next = entry.work_type();

        let result = if matches!(entry.work, WorkItem::Reflection) {
            self.queue.enqueue_coalesced(&entry).map(|(id, _)| id)
        } else {
            self.queue.enqueue(&entry)
        };

        match result {
            Ok(id) => {
                metrics::counter!("cascade_triggered_total", "from" => from, "to" => next.as_str())
                    .increment(1);
                tracing::info!(
                    basket_id = %context.basket_id,
                    from = from,
                    to = next.as_str(),
                    entry_id = %id,
                    "Cascade triggered"
                );
                Some(id)
            },
            Err(e) => {
                metrics::counter!("cascade_failures_total", "from" => from).increment(1);
                tracing::warn!(
                    basket_id = %context.basket_id,
                    from = from,
                    error = %e,
                    "Cascade enqueue failed"
                );
                None
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::WorkType;
    use crate::storage::InMemoryStore;
    use std::sync::Arc;

    fn trigger() -> (CascadeTrigger, QueueCoordinator) {
        let queue = QueueCoordinator::new(Arc::new(InMemoryStore::new()));
        (CascadeTrigger::new(queue.clone()), queue)
    }

    fn context() -> CascadeContext {
        CascadeContext::new(BasketId::new("b1"), WorkspaceId::new("w1"))
    }

    #[test]
    fn test_zero_substrate_changes_stop() {
        let (trigger, queue) = trigger();
        let outcome = StageOutcome::Substrate {
            summary: ExecutionSummary::default(),
            substrate_ids: Vec::new(),
        };
        assert!(trigger.trigger_next_stage(&context(), &outcome).is_none());
        assert_eq!(queue.stats().unwrap().total(), 0);
    }

    #[test]
    fn test_substrate_changes_enqueue_graph() {
        let (trigger, queue) = trigger();
        let outcome = StageOutcome::Substrate {
            summary: ExecutionSummary {
                blocks_created: 2,
                ..ExecutionSummary::default()
            },
            substrate_ids: vec![SubstrateId::new("s1"), SubstrateId::new("s2")],
        };
        let id = trigger.trigger_next_stage(&context(), &outcome).unwrap();
        let entry = queue.get(&id).unwrap().unwrap();
        assert_eq!(entry.work_type(), WorkType::P2Graph);
    }

    #[test]
    fn test_graph_cascade_gated_and_coalesced() {
        let (trigger, queue) = trigger();
        assert!(trigger
            .trigger_next_stage(&context(), &StageOutcome::Graph { relationships_created: 0 })
            .is_none());

        let graph = StageOutcome::Graph {
            relationships_created: 3,
        };
        let first = trigger.trigger_next_stage(&context(), &graph).unwrap();
        let second = trigger.trigger_next_stage(&context(), &graph).unwrap();
        assert_eq!(first, second);
        assert_eq!(queue.stats().unwrap().pending, 1);
    }

    #[test]
    fn test_reflection_is_terminal() {
        let (trigger, queue) = trigger();
        assert!(trigger
            .trigger_next_stage(&context(), &StageOutcome::Reflection)
            .is_none());
        assert_eq!(queue.stats().unwrap().total(), 0);
    }
}
