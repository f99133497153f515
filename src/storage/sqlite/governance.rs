//! Proposal and workspace policy tables.

use super::SqliteStore;
use super::rows::{
    PROPOSAL_COLUMNS, kind_str, origin_str, proposal_from_row, sql_err, to_json, ts,
};
use crate::Result;
use crate::models::{
    BasketId, DumpId, EntryPointPolicy, GovernanceFlags, Proposal, ProposalId, ProposalStatus,
    ProposalUpdate, WorkspaceId,
};
use crate::storage::traits::{PolicyProvider, ProposalBackend};
use rusqlite::{OptionalExtension, params};

impl ProposalBackend for SqliteStore {
    fn create_proposal(&self, proposal: &Proposal) -> Result<()> {
        let provenance = to_json("create_proposal", &proposal.provenance)?;
        let ops = to_json("create_proposal", &proposal.ops)?;
        let report = to_json("create_proposal", &proposal.validator_report)?;
        let log = to_json("create_proposal", &proposal.execution_log)?;
        self.with_conn("create_proposal", |conn| {
            conn.execute(
                "INSERT INTO proposals
                    (id, basket_id, workspace_id, kind, origin, provenance, ops, validator_report,
                     status, is_executed, execution_log, review_notes, reviewed_by, created_at,
                     updated_at, executed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
                params![
                    proposal.id.as_str(),
                    proposal.basket_id.as_str(),
                    proposal.workspace_id.as_str(),
                    kind_str(proposal.kind),
                    origin_str(proposal.origin),
                    provenance,
                    ops,
                    report,
                    proposal.status.as_str(),
                    proposal.is_executed,
                    log,
                    proposal.review_notes,
                    proposal.reviewed_by,
                    ts(proposal.created_at),
                    ts(proposal.updated_at),
                    proposal.executed_at.map(ts),
                ],
            )
            .map_err(sql_err("create_proposal"))?;
            Ok(())
        })
    }

    fn get_proposal(
        &self,
        id: &ProposalId,
        workspace_id: &WorkspaceId,
    ) -> Result<Option<Proposal>> {
        self.with_conn("get_proposal", |conn| {
            conn.query_row(
                &format!(
                    "SELECT {PROPOSAL_COLUMNS} FROM proposals WHERE id = ?1 AND workspace_id = ?2"
                ),
                params![id.as_str(), workspace_id.as_str()],
                proposal_from_row,
            )
            .optional()
            .map_err(sql_err("get_proposal"))
        })
    }

    fn update_proposal(&self, id: &ProposalId, update: &ProposalUpdate) -> Result<usize> {
        self.with_conn("update_proposal", |conn| {
            let existing = conn
                .query_row(
                    &format!("SELECT {PROPOSAL_COLUMNS} FROM proposals WHERE id = ?1"),
                    params![id.as_str()],
                    proposal_from_row,
                )
                .optional()
                .map_err(sql_err("update_proposal"))?;
            let Some(mut proposal) = existing else {
                return Ok(0);
            };
            update.apply_to(&mut proposal, crate::current_timestamp());
            let log = to_json("update_proposal", &proposal.execution_log)?;
            conn.execute(
                "UPDATE proposals
                 SET status = ?2, is_executed = ?3, execution_log = ?4, review_notes = ?5,
                     reviewed_by = ?6, updated_at = ?7, executed_at = ?8
                 WHERE id = ?1",
                params![
                    id.as_str(),
                    proposal.status.as_str(),
                    proposal.is_executed,
                    log,
                    proposal.review_notes,
                    proposal.reviewed_by,
                    ts(proposal.updated_at),
                    proposal.executed_at.map(ts),
                ],
            )
            .map_err(sql_err("update_proposal"))
        })
    }

    fn list_proposals(
        &self,
        basket_id: &BasketId,
        status: Option<ProposalStatus>,
    ) -> Result<Vec<Proposal>> {
        self.with_conn("list_proposals", |conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {PROPOSAL_COLUMNS} FROM proposals
                     WHERE basket_id = ?1 AND (?2 IS NULL OR status = ?2)
                     ORDER BY created_at DESC, id DESC"
                ))
                .map_err(sql_err("list_proposals"))?;
            stmt.query_map(
                params![basket_id.as_str(), status.map(|s| s.as_str())],
                proposal_from_row,
            )
            .and_then(Iterator::collect)
            .map_err(sql_err("list_proposals"))
        })
    }

    fn proposal_for_dump(
        &self,
        basket_id: &BasketId,
        dump_id: &DumpId,
    ) -> Result<Option<Proposal>> {
        self.with_conn("proposal_for_dump", |conn| {
            conn.query_row(
                &format!(
                    "SELECT {PROPOSAL_COLUMNS} FROM proposals p
                     WHERE basket_id = ?1
                       AND EXISTS (SELECT 1 FROM json_each(p.provenance) WHERE value = ?2)
                     ORDER BY created_at DESC, id DESC
                     LIMIT 1"
                ),
                params![basket_id.as_str(), dump_id.as_str()],
                proposal_from_row,
            )
            .optional()
            .map_err(sql_err("proposal_for_dump"))
        })
    }
}

impl PolicyProvider for SqliteStore {
    fn get_governance_flags(&self, workspace_id: &WorkspaceId) -> Result<GovernanceFlags> {
        self.with_conn("get_governance_flags", |conn| {
            let row = conn
                .query_row(
                    "SELECT governance_enabled, validator_required, ep_manual_edit, ep_graph_action
                     FROM workspace_policies WHERE workspace_id = ?1",
                    params![workspace_id.as_str()],
                    |row| {
                        Ok((
                            row.get::<_, bool>(0)?,
                            row.get::<_, bool>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, String>(3)?,
                        ))
                    },
                )
                .optional()
                .map_err(sql_err("get_governance_flags"))?;
            Ok(row.map_or_else(GovernanceFlags::default, |(enabled, required, manual, graph)| {
                GovernanceFlags {
                    governance_enabled: enabled,
                    validator_required: required,
                    ep_manual_edit: EntryPointPolicy::parse(&manual).unwrap_or_default(),
                    ep_graph_action: EntryPointPolicy::parse(&graph).unwrap_or_default(),
                }
            }))
        })
    }
}
