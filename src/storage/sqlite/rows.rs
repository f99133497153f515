//! Row conversion helpers for the `SQLite` store.

// SQLite stores timestamps and counters as i64; values written by this crate
// are never negative.
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_possible_wrap)]

use crate::Error;
use crate::models::{
    AnchorRole, Document, DocumentStatus, DocumentVersion, NodeRef, Proposal,
    ProposalKind, ProposalOrigin, ProposalStatus, QueueEntry, QueueState, RawDump,
    ReflectionArtifact, Relationship, RelationshipType, SemanticType, SubstrateKind,
    SubstrateReference, SubstrateState, SubstrateUnit,
};
use rusqlite::Row;
use rusqlite::types::Type;
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Column list for `raw_dumps` selects.
pub const DUMP_COLUMNS: &str =
    "id, basket_id, workspace_id, body, file_url, source_meta, created_at";

/// Column list for `substrate_units` selects.
pub const SUBSTRATE_COLUMNS: &str = "id, basket_id, workspace_id, kind, semantic_type, title, \
     content, confidence, state, anchor_role, provenance, synonyms, canonical_id, created_at, \
     updated_at";

/// Column list for `proposals` selects.
pub const PROPOSAL_COLUMNS: &str = "id, basket_id, workspace_id, kind, origin, provenance, ops, \
     validator_report, status, is_executed, execution_log, review_notes, reviewed_by, \
     created_at, updated_at, executed_at";

/// Column list for `substrate_relationships` selects.
pub const RELATIONSHIP_COLUMNS: &str = "id, basket_id, from_kind, from_id, relationship_type, \
     to_kind, to_id, strength, description, created_at";

/// Column list for `reflection_artifacts` selects.
pub const REFLECTION_COLUMNS: &str = "id, basket_id, workspace_id, reflection_text, \
     reflection_target_type, substrate_window_start, substrate_window_end, substrate_hash, \
     entries, used_fallback, computed_at";

/// Column list for `documents` selects.
pub const DOCUMENT_COLUMNS: &str = "id, basket_id, workspace_id, title, content, status, \
     metadata, current_version, created_at, updated_at";

/// Column list for `work_queue` selects.
pub const QUEUE_COLUMNS: &str = "id, work, basket_id, workspace_id, status, priority, worker_id, \
     claimed_at, attempts, error_details, work_id, created_at, updated_at";

/// Maps a `rusqlite` error into the crate error.
pub fn sql_err(operation: &'static str) -> impl Fn(rusqlite::Error) -> Error {
    move |e| Error::OperationFailed {
        operation: operation.to_string(),
        cause: e.to_string(),
    }
}

/// Serializes a value for a JSON column.
pub fn to_json<T: Serialize>(operation: &'static str, value: &T) -> crate::Result<String> {
    serde_json::to_string(value).map_err(|e| Error::OperationFailed {
        operation: operation.to_string(),
        cause: e.to_string(),
    })
}

fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, message.into())
}

fn json_col<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| conversion_error(idx, e.to_string()))
}

fn parsed_col<T>(row: &Row<'_>, idx: usize, parse: impl Fn(&str) -> Option<T>) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    parse(&raw).ok_or_else(|| conversion_error(idx, format!("invalid value '{raw}'")))
}

fn ts_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<u64> {
    Ok(row.get::<_, i64>(idx)? as u64)
}

fn opt_ts_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<u64>> {
    Ok(row.get::<_, Option<i64>>(idx)?.map(|v| v as u64))
}

/// Converts a timestamp for binding.
pub const fn ts(value: u64) -> i64 {
    value as i64
}

/// Builds a [`RawDump`] from a row selected with [`DUMP_COLUMNS`].
pub fn dump_from_row(row: &Row<'_>) -> rusqlite::Result<RawDump> {
    Ok(RawDump {
        id: row.get::<_, String>(0)?.into(),
        basket_id: row.get::<_, String>(1)?.into(),
        workspace_id: row.get::<_, String>(2)?.into(),
        text: row.get(3)?,
        file_url: row.get(4)?,
        source_meta: json_col(row, 5)?,
        created_at: ts_col(row, 6)?,
    })
}

/// Builds a [`SubstrateUnit`] from a row selected with [`SUBSTRATE_COLUMNS`].
pub fn substrate_from_row(row: &Row<'_>) -> rusqlite::Result<SubstrateUnit> {
    let anchor: Option<String> = row.get(9)?;
    Ok(SubstrateUnit {
        id: row.get::<_, String>(0)?.into(),
        basket_id: row.get::<_, String>(1)?.into(),
        workspace_id: row.get::<_, String>(2)?.into(),
        kind: parsed_col(row, 3, SubstrateKind::parse)?,
        semantic_type: parsed_col(row, 4, SemanticType::parse)?,
        title: row.get(5)?,
        content: row.get(6)?,
        confidence_score: row.get::<_, f64>(7)? as f32,
        state: parsed_col(row, 8, SubstrateState::parse)?,
        anchor_role: anchor.as_deref().and_then(AnchorRole::parse),
        provenance: json_col(row, 10)?,
        synonyms: json_col(row, 11)?,
        canonical_id: row.get::<_, Option<String>>(12)?.map(Into::into),
        created_at: ts_col(row, 13)?,
        updated_at: ts_col(row, 14)?,
    })
}

fn parse_kind(s: &str) -> Option<ProposalKind> {
    match s {
        "extraction" => Some(ProposalKind::Extraction),
        "edit" => Some(ProposalKind::Edit),
        _ => None,
    }
}

fn parse_origin(s: &str) -> Option<ProposalOrigin> {
    match s {
        "agent" => Some(ProposalOrigin::Agent),
        "user" => Some(ProposalOrigin::User),
        _ => None,
    }
}

/// Returns the column value for a proposal kind.
pub const fn kind_str(kind: ProposalKind) -> &'static str {
    match kind {
        ProposalKind::Extraction => "extraction",
        ProposalKind::Edit => "edit",
    }
}

/// Returns the column value for a proposal origin.
pub const fn origin_str(origin: ProposalOrigin) -> &'static str {
    match origin {
        ProposalOrigin::Agent => "agent",
        ProposalOrigin::User => "user",
    }
}

/// Builds a [`Proposal`] from a row selected with [`PROPOSAL_COLUMNS`].
pub fn proposal_from_row(row: &Row<'_>) -> rusqlite::Result<Proposal> {
    Ok(Proposal {
        id: row.get::<_, String>(0)?.into(),
        basket_id: row.get::<_, String>(1)?.into(),
        workspace_id: row.get::<_, String>(2)?.into(),
        kind: parsed_col(row, 3, parse_kind)?,
        origin: parsed_col(row, 4, parse_origin)?,
        provenance: json_col(row, 5)?,
        ops: json_col(row, 6)?,
        validator_report: json_col(row, 7)?,
        status: parsed_col(row, 8, ProposalStatus::parse)?,
        is_executed: row.get(9)?,
        execution_log: json_col(row, 10)?,
        review_notes: row.get(11)?,
        reviewed_by: row.get(12)?,
        created_at: ts_col(row, 13)?,
        updated_at: ts_col(row, 14)?,
        executed_at: opt_ts_col(row, 15)?,
    })
}

/// Builds a [`Relationship`] from a row selected with [`RELATIONSHIP_COLUMNS`].
pub fn relationship_from_row(row: &Row<'_>) -> rusqlite::Result<Relationship> {
    Ok(Relationship {
        id: row.get::<_, String>(0)?.into(),
        basket_id: row.get::<_, String>(1)?.into(),
        from: NodeRef::new(
            parsed_col(row, 2, SubstrateKind::parse)?,
            row.get::<_, String>(3)?.into(),
        ),
        relationship_type: parsed_col(row, 4, RelationshipType::parse)?,
        to: NodeRef::new(
            parsed_col(row, 5, SubstrateKind::parse)?,
            row.get::<_, String>(6)?.into(),
        ),
        strength: row.get::<_, f64>(7)? as f32,
        description: row.get(8)?,
        created_at: ts_col(row, 9)?,
    })
}

/// Builds a [`ReflectionArtifact`] from a row selected with [`REFLECTION_COLUMNS`].
pub fn reflection_from_row(row: &Row<'_>) -> rusqlite::Result<ReflectionArtifact> {
    Ok(ReflectionArtifact {
        id: row.get::<_, String>(0)?.into(),
        basket_id: row.get::<_, String>(1)?.into(),
        workspace_id: row.get::<_, String>(2)?.into(),
        reflection_text: row.get(3)?,
        reflection_target_type: row.get(4)?,
        substrate_window_start: ts_col(row, 5)?,
        substrate_window_end: ts_col(row, 6)?,
        substrate_hash: row.get(7)?,
        entries: json_col(row, 8)?,
        used_fallback: row.get(9)?,
        computed_at: ts_col(row, 10)?,
    })
}

fn parse_document_status(s: &str) -> Option<DocumentStatus> {
    match s {
        "composing" => Some(DocumentStatus::Composing),
        "composed" => Some(DocumentStatus::Composed),
        "failed" => Some(DocumentStatus::Failed),
        _ => None,
    }
}

/// Builds a [`Document`] from a row selected with [`DOCUMENT_COLUMNS`].
pub fn document_from_row(row: &Row<'_>) -> rusqlite::Result<Document> {
    Ok(Document {
        id: row.get::<_, String>(0)?.into(),
        basket_id: row.get::<_, String>(1)?.into(),
        workspace_id: row.get::<_, String>(2)?.into(),
        title: row.get(3)?,
        content: row.get(4)?,
        status: parsed_col(row, 5, parse_document_status)?,
        metadata: json_col(row, 6)?,
        current_version: row.get::<_, i64>(7)? as u32,
        created_at: ts_col(row, 8)?,
        updated_at: ts_col(row, 9)?,
    })
}

/// Builds a [`DocumentVersion`] from
/// `(document_id, version_no, content, content_hash, created_at)`.
pub fn version_from_row(row: &Row<'_>) -> rusqlite::Result<DocumentVersion> {
    Ok(DocumentVersion {
        document_id: row.get::<_, String>(0)?.into(),
        version_no: row.get::<_, i64>(1)? as u32,
        content: row.get(2)?,
        content_hash: row.get(3)?,
        created_at: ts_col(row, 4)?,
    })
}

/// Builds a [`SubstrateReference`] from
/// `(document_id, substrate_id, kind, semantic_type, rank, score)`.
pub fn reference_from_row(row: &Row<'_>) -> rusqlite::Result<SubstrateReference> {
    Ok(SubstrateReference {
        document_id: row.get::<_, String>(0)?.into(),
        substrate_id: row.get::<_, String>(1)?.into(),
        kind: parsed_col(row, 2, SubstrateKind::parse)?,
        semantic_type: parsed_col(row, 3, SemanticType::parse)?,
        rank: row.get::<_, i64>(4)? as usize,
        score: row.get::<_, f64>(5)? as f32,
    })
}

/// Builds a [`QueueEntry`] from a row selected with [`QUEUE_COLUMNS`].
pub fn queue_entry_from_row(row: &Row<'_>) -> rusqlite::Result<QueueEntry> {
    Ok(QueueEntry {
        id: row.get::<_, String>(0)?.into(),
        work: json_col(row, 1)?,
        basket_id: row.get::<_, String>(2)?.into(),
        workspace_id: row.get::<_, String>(3)?.into(),
        status: parsed_col(row, 4, QueueState::parse)?,
        priority: row.get(5)?,
        worker_id: row.get(6)?,
        claimed_at: opt_ts_col(row, 7)?,
        attempts: row.get::<_, i64>(8)? as u32,
        error_details: row.get(9)?,
        work_id: row.get::<_, Option<String>>(10)?.map(Into::into),
        created_at: ts_col(row, 11)?,
        updated_at: ts_col(row, 12)?,
    })
}
