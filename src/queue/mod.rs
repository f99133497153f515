//! Queue coordination.
//!
//! [`QueueCoordinator`] wraps the store's atomic claim primitive with the
//! pipeline's failure semantics: claim failures yield an empty batch and
//! state updates are best-effort.
//!
//! Claims are ordered by priority, highest first, then by creation time.
//! A steady stream of high-priority work can starve low-priority entries;
//! callers that need fairness should keep priorities within a small range.

use crate::Result;
use crate::models::{QueueEntry, QueueEntryId, QueueState, QueueStats, WorkType};
use crate::storage::QueueBackend;
use std::sync::Arc;
use std::time::Duration;

/// Coordinates work claiming across workers.
#[derive(Clone)]
pub struct QueueCoordinator {
    backend: Arc<dyn QueueBackend>,
    work_types: Vec<WorkType>,
}

impl QueueCoordinator {
    /// Creates a coordinator that claims the canonical pipeline work types.
    #[must_use]
    pub fn new(backend: Arc<dyn QueueBackend>) -> Self {
        Self {
            backend,
            work_types: WorkType::canonical().to_vec(),
        }
    }

    /// Restricts claims to the given work types.
    #[must_use]
    pub fn with_work_types(mut self, work_types: &[WorkType]) -> Self {
        self.work_types = work_types.to_vec();
        self
    }

    /// Work types this coordinator claims.
    #[must_use]
    pub fn work_types(&self) -> &[WorkType] {
        &self.work_types
    }

    /// Adds an entry to the queue.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn enqueue(&self, entry: &QueueEntry) -> Result<QueueEntryId> {
        self.backend.enqueue(entry)?;
        metrics::counter!("queue_enqueued_total", "work_type" => entry.work_type().as_str())
            .increment(1);
        tracing::debug!(
            entry_id = %entry.id,
            work_type = entry.work_type().as_str(),
            basket_id = %entry.basket_id,
            priority = entry.priority,
            "Enqueued work"
        );
        Ok(entry.id.clone())
    }

    /// Enqueues `entry` unless a pending entry of the same type already
    /// exists for its basket. Returns the id of the entry that will do the
    /// work and whether it was newly created.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup or write fails.
    pub fn enqueue_coalesced(&self, entry: &QueueEntry) -> Result<(QueueEntryId, bool)> {
        if let Some(existing) = self
            .backend
            .find_pending(&entry.basket_id, entry.work_type())?
        {
            tracing::debug!(
                entry_id = %existing.id,
                work_type = entry.work_type().as_str(),
                "Coalesced with pending work"
            );
            return Ok((existing.id, false));
        }
        Ok((self.enqueue(entry)?, true))
    }

    /// Claims up to `limit` pending or stale entries for `worker_id`.
    ///
    /// Never fails: storage errors are logged and yield an empty batch so
    /// the caller simply polls again.
    #[must_use]
    pub fn claim_work(&self, worker_id: &str, limit: usize, stale_after: Duration) -> Vec<QueueEntry> {
        self.claim_work_at(worker_id, limit, stale_after, crate::current_timestamp())
    }

    /// [`claim_work`](Self::claim_work) with an explicit clock.
    #[must_use]
    pub fn claim_work_at(
        &self,
        worker_id: &str,
        limit: usize,
        stale_after: Duration,
        now: u64,
    ) -> Vec<QueueEntry> {
        match self
            .backend
            .claim(worker_id, limit, stale_after.as_secs(), &self.work_types, now)
        {
            Ok(entries) => {
                if !entries.is_empty() {
                    metrics::counter!("queue_claimed_total").increment(entries.len() as u64);
                    let reclaimed = entries.iter().filter(|e| e.attempts > 1).count();
                    if reclaimed > 0 {
                        metrics::counter!("queue_reclaimed_total").increment(reclaimed as u64);
                    }
                    tracing::debug!(
                        worker_id = worker_id,
                        claimed = entries.len(),
                        reclaimed = reclaimed,
                        "Claimed work"
                    );
                }
                entries
            },
            Err(e) => {
                metrics::counter!("queue_claim_failures_total").increment(1);
                tracing::warn!(worker_id = worker_id, error = %e, "Queue claim failed");
                Vec::new()
            },
        }
    }

    /// Transitions an entry claimed by `worker_id`, storing `error` for
    /// diagnosis.
    ///
    /// The write is rejected when the entry is gone or its claim now belongs
    /// to another worker. Best-effort: failures are logged and reported as
    /// `false` but never abort the caller's work.
    pub fn update_state(
        &self,
        id: &QueueEntryId,
        worker_id: &str,
        state: QueueState,
        error: Option<&str>,
    ) -> bool {
        match self.backend.set_state(id, Some(worker_id), state, error) {
            Ok(0) => {
                metrics::counter!("queue_lost_claims_total").increment(1);
                tracing::warn!(
                    entry_id = %id,
                    worker_id = worker_id,
                    state = state.as_str(),
                    "Queue entry missing or no longer claimed by this worker"
                );
                false
            },
            Ok(_) => {
                metrics::counter!("queue_transitions_total", "state" => state.as_str())
                    .increment(1);
                true
            },
            Err(e) => {
                tracing::warn!(entry_id = %id, state = state.as_str(), error = %e, "Queue update failed");
                false
            },
        }
    }

    /// Returns an entry held by `worker_id` to `pending`, releasing its claim.
    pub fn release(&self, id: &QueueEntryId, worker_id: &str) -> bool {
        self.update_state(id, worker_id, QueueState::Pending, None)
    }

    /// Fetches an entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    pub fn get(&self, id: &QueueEntryId) -> Result<Option<QueueEntry>> {
        self.backend.get_entry(id)
    }

    /// Counts entries by state.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn stats(&self) -> Result<QueueStats> {
        self.backend.queue_stats()
    }
}

impl std::fmt::Debug for QueueCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueCoordinator")
            .field("work_types", &self.work_types)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BasketId, DumpId, WorkItem, WorkspaceId};
    use crate::storage::InMemoryStore;

    fn coordinator() -> QueueCoordinator {
        QueueCoordinator::new(Arc::new(InMemoryStore::new()))
    }

    fn entry(work: WorkItem, created_at: u64) -> QueueEntry {
        QueueEntry::new(work, BasketId::new("b1"), WorkspaceId::new("w1")).with_created_at(created_at)
    }

    #[test]
    fn test_claim_then_complete() {
        let queue = coordinator();
        let id = queue
            .enqueue(&entry(
                WorkItem::Substrate {
                    dump_id: DumpId::new("d1"),
                },
                10,
            ))
            .unwrap();

        let claimed = queue.claim_work_at("w-a", 5, Duration::from_secs(300), 100);
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].worker_id.as_deref(), Some("w-a"));

        assert!(queue.update_state(&id, "w-a", QueueState::Completed, None));
        assert!(queue.claim_work_at("w-b", 5, Duration::from_secs(300), 100).is_empty());
        assert_eq!(queue.stats().unwrap().completed, 1);
    }

    #[test]
    fn test_stale_claim_reclaimed() {
        let queue = coordinator();
        queue.enqueue(&entry(WorkItem::Reflection, 10)).unwrap();

        assert_eq!(queue.claim_work_at("w-a", 1, Duration::from_secs(60), 100).len(), 1);
        assert!(queue.claim_work_at("w-b", 1, Duration::from_secs(60), 150).is_empty());

        let reclaimed = queue.claim_work_at("w-b", 1, Duration::from_secs(60), 161);
        assert_eq!(reclaimed.len(), 1);
        assert_eq!(reclaimed[0].worker_id.as_deref(), Some("w-b"));
        assert_eq!(reclaimed[0].attempts, 2);
    }

    #[test]
    fn test_reclaimed_entry_rejects_previous_owner() {
        let queue = coordinator();
        let id = queue.enqueue(&entry(WorkItem::Reflection, 10)).unwrap();

        queue.claim_work_at("w-a", 1, Duration::from_secs(60), 100);
        queue.claim_work_at("w-b", 1, Duration::from_secs(60), 161);

        assert!(!queue.update_state(&id, "w-a", QueueState::Completed, None));
        assert!(!queue.release(&id, "w-a"));
        let held = queue.get(&id).unwrap().unwrap();
        assert_eq!(held.status, QueueState::Processing);
        assert_eq!(held.worker_id.as_deref(), Some("w-b"));

        assert!(queue.update_state(&id, "w-b", QueueState::Completed, None));
    }

    #[test]
    fn test_manual_edit_not_claimed() {
        let queue = coordinator();
        queue
            .enqueue(&entry(
                WorkItem::ManualEdit {
                    payload: serde_json::json!({"op": "noop"}),
                },
                10,
            ))
            .unwrap();
        assert!(queue.claim_work_at("w-a", 5, Duration::from_secs(60), 100).is_empty());
        assert_eq!(queue.stats().unwrap().pending, 1);
    }

    #[test]
    fn test_enqueue_coalesced() {
        let queue = coordinator();
        let (first, created) = queue.enqueue_coalesced(&entry(WorkItem::Reflection, 10)).unwrap();
        assert!(created);
        let (second, created) = queue.enqueue_coalesced(&entry(WorkItem::Reflection, 11)).unwrap();
        assert!(!created);
        assert_eq!(first, second);
        assert_eq!(queue.stats().unwrap().total(), 1);
    }

    #[test]
    fn test_update_missing_entry_is_not_fatal() {
        let queue = coordinator();
        assert!(!queue.update_state(
            &QueueEntryId::new("missing"),
            "w-a",
            QueueState::Failed,
            Some("x")
        ));
    }
}
