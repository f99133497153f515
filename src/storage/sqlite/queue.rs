//! Work queue table with atomic claims.

use super::SqliteStore;
use super::rows::{QUEUE_COLUMNS, queue_entry_from_row, sql_err, to_json, ts};
use crate::Result;
use crate::models::{BasketId, QueueEntry, QueueEntryId, QueueState, QueueStats, WorkType};
use crate::storage::traits::QueueBackend;
use rusqlite::{OptionalExtension, TransactionBehavior, params};

impl QueueBackend for SqliteStore {
    fn enqueue(&self, entry: &QueueEntry) -> Result<()> {
        let work = to_json("enqueue", &entry.work)?;
        self.with_conn("enqueue", |conn| {
            conn.execute(
                "INSERT INTO work_queue
                    (id, work_type, work, basket_id, workspace_id, status, priority, worker_id,
                     claimed_at, attempts, error_details, work_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                params![
                    entry.id.as_str(),
                    entry.work_type().as_str(),
                    work,
                    entry.basket_id.as_str(),
                    entry.workspace_id.as_str(),
                    entry.status.as_str(),
                    entry.priority,
                    entry.worker_id,
                    entry.claimed_at.map(ts),
                    i64::from(entry.attempts),
                    entry.error_details,
                    entry.work_id.as_ref().map(|w| w.as_str()),
                    ts(entry.created_at),
                    ts(entry.updated_at),
                ],
            )
            .map_err(sql_err("enqueue"))?;
            Ok(())
        })
    }

    /// Claims inside `BEGIN IMMEDIATE`: the write lock is taken before the
    /// candidate select, so concurrent processes serialize on it.
    fn claim(
        &self,
        worker_id: &str,
        limit: usize,
        stale_after_secs: u64,
        work_types: &[WorkType],
        now: u64,
    ) -> Result<Vec<QueueEntry>> {
        if limit == 0 || work_types.is_empty() {
            return Ok(Vec::new());
        }
        let types: String = work_types
            .iter()
            .map(|t| format!(",{}", t.as_str()))
            .collect::<String>()
            + ",";
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        self.with_conn("claim", |conn| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(sql_err("claim"))?;
            let mut claimed: Vec<QueueEntry> = {
                let mut stmt = tx
                    .prepare(&format!(
                        "UPDATE work_queue
                         SET status = 'processing', worker_id = ?1, claimed_at = ?2,
                             attempts = attempts + 1, updated_at = ?2
                         WHERE id IN (
                             SELECT id FROM work_queue
                             WHERE instr(?3, ',' || work_type || ',') > 0
                               AND (status = 'pending'
                                    OR (status = 'processing'
                                        AND (claimed_at IS NULL OR ?2 - claimed_at > ?4)))
                             ORDER BY priority DESC, created_at ASC, id ASC
                             LIMIT ?5
                         )
                         RETURNING {QUEUE_COLUMNS}"
                    ))
                    .map_err(sql_err("claim"))?;
                stmt.query_map(
                    params![worker_id, ts(now), types, ts(stale_after_secs), limit],
                    queue_entry_from_row,
                )
                .and_then(Iterator::collect)
                .map_err(sql_err("claim"))?
            };
            tx.commit().map_err(sql_err("claim"))?;
            claimed.sort_by(|a, b| {
                b.priority
                    .cmp(&a.priority)
                    .then(a.created_at.cmp(&b.created_at))
                    .then(a.id.cmp(&b.id))
            });
            Ok(claimed)
        })
    }

    fn set_state(
        &self,
        id: &QueueEntryId,
        worker_id: Option<&str>,
        state: QueueState,
        error: Option<&str>,
    ) -> Result<usize> {
        let now = ts(crate::current_timestamp());
        let release = if state == QueueState::Pending {
            ", worker_id = NULL, claimed_at = NULL"
        } else {
            ""
        };
        // The owner check and the write are one statement, so a reclaim
        // cannot slip in between them.
        let sql = format!(
            "UPDATE work_queue
             SET status = ?2, error_details = COALESCE(?3, error_details), updated_at = ?4{release}
             WHERE id = ?1
               AND (?5 IS NULL OR (worker_id = ?5 AND status = 'processing'))"
        );
        self.with_conn("set_state", |conn| {
            conn.execute(&sql, params![id.as_str(), state.as_str(), error, now, worker_id])
                .map_err(sql_err("set_state"))
        })
    }

    fn get_entry(&self, id: &QueueEntryId) -> Result<Option<QueueEntry>> {
        self.with_conn("get_entry", |conn| {
            conn.query_row(
                &format!("SELECT {QUEUE_COLUMNS} FROM work_queue WHERE id = ?1"),
                params![id.as_str()],
                queue_entry_from_row,
            )
            .optional()
            .map_err(sql_err("get_entry"))
        })
    }

    fn find_pending(
        &self,
        basket_id: &BasketId,
        work_type: WorkType,
    ) -> Result<Option<QueueEntry>> {
        self.with_conn("find_pending", |conn| {
            conn.query_row(
                &format!(
                    "SELECT {QUEUE_COLUMNS} FROM work_queue
                     WHERE basket_id = ?1 AND work_type = ?2 AND status = 'pending'
                     ORDER BY created_at ASC LIMIT 1"
                ),
                params![basket_id.as_str(), work_type.as_str()],
                queue_entry_from_row,
            )
            .optional()
            .map_err(sql_err("find_pending"))
        })
    }

    fn queue_stats(&self) -> Result<QueueStats> {
        let rows: Vec<(String, i64)> = self.with_conn("queue_stats", |conn| {
            let mut stmt = conn
                .prepare("SELECT status, COUNT(*) FROM work_queue GROUP BY status")
                .map_err(sql_err("queue_stats"))?;
            stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
                .and_then(Iterator::collect)
                .map_err(sql_err("queue_stats"))
        })?;
        let mut stats = QueueStats::default();
        for (status, count) in rows {
            let count = usize::try_from(count).unwrap_or(0);
            match QueueState::parse(&status) {
                Some(QueueState::Pending) => stats.pending += count,
                Some(QueueState::Processing) => stats.processing += count,
                Some(QueueState::Completed) => stats.completed += count,
                Some(QueueState::Failed) => stats.failed += count,
                None => tracing::warn!(status = %status, "Unknown queue status"),
            }
        }
        Ok(stats)
    }
}
