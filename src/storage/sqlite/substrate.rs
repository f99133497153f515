//! Dump and substrate unit tables.

use super::SqliteStore;
use super::rows::{
    DUMP_COLUMNS, SUBSTRATE_COLUMNS, dump_from_row, sql_err, substrate_from_row, to_json, ts,
};
use crate::Result;
use crate::models::{
    BasketId, DumpId, DumpTombstone, RawDump, SubstrateId, SubstrateState, SubstrateUnit,
    SubstrateUpdate, WorkspaceId,
};
use crate::storage::traits::{BlockBackend, DumpBackend};
use rusqlite::{Connection, OptionalExtension, params};

impl DumpBackend for SqliteStore {
    fn insert_dump(&self, dump: &RawDump) -> Result<()> {
        let source_meta = to_json("insert_dump", &dump.source_meta)?;
        self.with_conn("insert_dump", |conn| {
            conn.execute(
                "INSERT INTO raw_dumps
                    (id, basket_id, workspace_id, body, file_url, source_meta, batch_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    dump.id.as_str(),
                    dump.basket_id.as_str(),
                    dump.workspace_id.as_str(),
                    dump.text,
                    dump.file_url,
                    source_meta,
                    dump.batch_id(),
                    ts(dump.created_at),
                ],
            )
            .map_err(sql_err("insert_dump"))?;
            Ok(())
        })
    }

    fn get_dump(&self, id: &DumpId, workspace_id: &WorkspaceId) -> Result<Option<RawDump>> {
        self.with_conn("get_dump", |conn| {
            conn.query_row(
                &format!(
                    "SELECT {DUMP_COLUMNS} FROM raw_dumps WHERE id = ?1 AND workspace_id = ?2"
                ),
                params![id.as_str(), workspace_id.as_str()],
                dump_from_row,
            )
            .optional()
            .map_err(sql_err("get_dump"))
        })
    }

    fn list_recent_dumps(
        &self,
        basket_id: &BasketId,
        since: Option<u64>,
        limit: usize,
    ) -> Result<Vec<RawDump>> {
        self.with_conn("list_recent_dumps", |conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {DUMP_COLUMNS} FROM raw_dumps d
                     WHERE basket_id = ?1
                       AND created_at >= ?2
                       AND NOT EXISTS (SELECT 1 FROM dump_tombstones t WHERE t.dump_id = d.id)
                     ORDER BY created_at DESC, id DESC
                     LIMIT ?3"
                ))
                .map_err(sql_err("list_recent_dumps"))?;
            let limit = i64::try_from(limit).unwrap_or(i64::MAX);
            stmt.query_map(
                params![basket_id.as_str(), ts(since.unwrap_or(0)), limit],
                dump_from_row,
            )
            .and_then(Iterator::collect)
            .map_err(sql_err("list_recent_dumps"))
        })
    }

    fn dumps_in_batch(&self, basket_id: &BasketId, batch_id: &str) -> Result<Vec<RawDump>> {
        self.with_conn("dumps_in_batch", |conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {DUMP_COLUMNS} FROM raw_dumps
                     WHERE basket_id = ?1 AND batch_id = ?2
                     ORDER BY created_at ASC, id ASC"
                ))
                .map_err(sql_err("dumps_in_batch"))?;
            stmt.query_map(params![basket_id.as_str(), batch_id], dump_from_row)
                .and_then(Iterator::collect)
                .map_err(sql_err("dumps_in_batch"))
        })
    }

    fn tombstone_dump(&self, tombstone: &DumpTombstone) -> Result<usize> {
        self.with_conn("tombstone_dump", |conn| {
            conn.execute(
                "INSERT INTO dump_tombstones (dump_id, reason, tombstoned_at)
                 SELECT id, ?2, ?3 FROM raw_dumps WHERE id = ?1
                 ON CONFLICT(dump_id) DO UPDATE SET reason = excluded.reason",
                params![
                    tombstone.dump_id.as_str(),
                    tombstone.reason,
                    tombstone.tombstoned_at.to_rfc3339(),
                ],
            )
            .map_err(sql_err("tombstone_dump"))
        })
    }

    fn is_tombstoned(&self, id: &DumpId) -> Result<bool> {
        self.with_conn("is_tombstoned", |conn| {
            conn.query_row(
                "SELECT EXISTS (SELECT 1 FROM dump_tombstones WHERE dump_id = ?1)",
                params![id.as_str()],
                |row| row.get(0),
            )
            .map_err(sql_err("is_tombstoned"))
        })
    }
}

fn fetch_substrate(
    conn: &Connection,
    id: &SubstrateId,
    workspace_id: &WorkspaceId,
) -> Result<Option<SubstrateUnit>> {
    conn.query_row(
        &format!("SELECT {SUBSTRATE_COLUMNS} FROM substrate_units WHERE id = ?1 AND workspace_id = ?2"),
        params![id.as_str(), workspace_id.as_str()],
        substrate_from_row,
    )
    .optional()
    .map_err(sql_err("get_substrate"))
}

impl BlockBackend for SqliteStore {
    fn insert_substrate(&self, unit: &SubstrateUnit) -> Result<()> {
        let provenance = to_json("insert_substrate", &unit.provenance)?;
        let synonyms = to_json("insert_substrate", &unit.synonyms)?;
        self.with_conn("insert_substrate", |conn| {
            conn.execute(
                "INSERT INTO substrate_units
                    (id, basket_id, workspace_id, kind, semantic_type, title, content, confidence,
                     state, anchor_role, provenance, synonyms, canonical_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
                params![
                    unit.id.as_str(),
                    unit.basket_id.as_str(),
                    unit.workspace_id.as_str(),
                    unit.kind.as_str(),
                    unit.semantic_type.as_str(),
                    unit.title,
                    unit.content,
                    f64::from(unit.confidence_score),
                    unit.state.as_str(),
                    unit.anchor_role.map(|r| r.as_str()),
                    provenance,
                    synonyms,
                    unit.canonical_id.as_ref().map(|c| c.as_str()),
                    ts(unit.created_at),
                    ts(unit.updated_at),
                ],
            )
            .map_err(sql_err("insert_substrate"))?;
            Ok(())
        })
    }

    fn get_substrate(
        &self,
        id: &SubstrateId,
        workspace_id: &WorkspaceId,
    ) -> Result<Option<SubstrateUnit>> {
        self.with_conn("get_substrate", |conn| fetch_substrate(conn, id, workspace_id))
    }

    fn list_substrate(
        &self,
        basket_id: &BasketId,
        exclude_states: &[SubstrateState],
    ) -> Result<Vec<SubstrateUnit>> {
        let excluded: String = exclude_states
            .iter()
            .map(|s| format!(",{}", s.as_str()))
            .collect::<String>()
            + ",";
        self.with_conn("list_substrate", |conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {SUBSTRATE_COLUMNS} FROM substrate_units
                     WHERE basket_id = ?1 AND instr(?2, ',' || state || ',') = 0
                     ORDER BY created_at ASC, id ASC"
                ))
                .map_err(sql_err("list_substrate"))?;
            stmt.query_map(params![basket_id.as_str(), excluded], substrate_from_row)
                .and_then(Iterator::collect)
                .map_err(sql_err("list_substrate"))
        })
    }

    fn update_substrate(
        &self,
        id: &SubstrateId,
        workspace_id: &WorkspaceId,
        update: &SubstrateUpdate,
    ) -> Result<usize> {
        self.with_conn("update_substrate", |conn| {
            let Some(mut unit) = fetch_substrate(conn, id, workspace_id)? else {
                return Ok(0);
            };
            update.apply_to(&mut unit, crate::current_timestamp());
            let synonyms = to_json("update_substrate", &unit.synonyms)?;
            conn.execute(
                "UPDATE substrate_units
                 SET title = ?3, content = ?4, confidence = ?5, state = ?6, synonyms = ?7,
                     canonical_id = ?8, updated_at = ?9
                 WHERE id = ?1 AND workspace_id = ?2",
                params![
                    id.as_str(),
                    workspace_id.as_str(),
                    unit.title,
                    unit.content,
                    f64::from(unit.confidence_score),
                    unit.state.as_str(),
                    synonyms,
                    unit.canonical_id.as_ref().map(|c| c.as_str()),
                    ts(unit.updated_at),
                ],
            )
            .map_err(sql_err("update_substrate"))
        })
    }
}
