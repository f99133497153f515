//! Work queue storage.

use crate::Result;
use crate::models::{BasketId, QueueEntry, QueueEntryId, QueueState, QueueStats, WorkType};

/// Claimable work queue.
///
/// `claim` must be atomic against concurrent callers: no entry may be
/// returned to two callers unless its earlier claim went stale.
pub trait QueueBackend: Send + Sync {
    /// Adds an entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn enqueue(&self, entry: &QueueEntry) -> Result<()>;

    /// Atomically claims up to `limit` pending or stale entries of the given
    /// work types for `worker_id`.
    ///
    /// Entries are taken by priority (highest first), then creation time.
    ///
    /// # Errors
    ///
    /// Returns an error if the claim transaction fails.
    fn claim(
        &self,
        worker_id: &str,
        limit: usize,
        stale_after_secs: u64,
        work_types: &[WorkType],
        now: u64,
    ) -> Result<Vec<QueueEntry>>;

    /// Transitions an entry. Returning to `pending` releases the claim.
    ///
    /// With `worker_id`, the write only applies while that worker holds the
    /// entry in `processing`; a claim that went stale and was taken by
    /// another worker is left untouched. `None` transitions regardless of
    /// owner. Returns affected rows.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn set_state(
        &self,
        id: &QueueEntryId,
        worker_id: Option<&str>,
        state: QueueState,
        error: Option<&str>,
    ) -> Result<usize>;

    /// Fetches an entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    fn get_entry(&self, id: &QueueEntryId) -> Result<Option<QueueEntry>>;

    /// Finds a pending entry of `work_type` for a basket.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn find_pending(&self, basket_id: &BasketId, work_type: WorkType)
    -> Result<Option<QueueEntry>>;

    /// Counts entries by state.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn queue_stats(&self) -> Result<QueueStats>;
}
