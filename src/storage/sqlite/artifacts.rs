//! Relationship, reflection, document, and timeline tables.

// usize ranks and u32 version numbers bind as i64.
#![allow(clippy::cast_possible_wrap)]

use super::SqliteStore;
use super::rows::{
    DOCUMENT_COLUMNS, REFLECTION_COLUMNS, RELATIONSHIP_COLUMNS, document_from_row,
    reference_from_row, reflection_from_row, relationship_from_row, sql_err, to_json, ts,
    version_from_row,
};
use crate::models::{
    BasketId, BasketSignature, Document, DocumentId, DocumentVersion, PipelineEvent,
    ReflectionArtifact, Relationship, SubstrateReference, WorkspaceId,
};
use crate::storage::traits::{DocumentBackend, GraphBackend, ReflectionBackend, TimelineBackend};
use crate::{Error, Result};
use rusqlite::{OptionalExtension, params};

impl GraphBackend for SqliteStore {
    fn upsert_relationship(&self, relationship: &Relationship) -> Result<bool> {
        self.with_conn("upsert_relationship", |conn| {
            let r = relationship;
            let existed: bool = conn
                .query_row(
                    "SELECT EXISTS (SELECT 1 FROM substrate_relationships
                     WHERE basket_id = ?1 AND from_kind = ?2 AND from_id = ?3
                       AND relationship_type = ?4 AND to_kind = ?5 AND to_id = ?6)",
                    params![
                        r.basket_id.as_str(),
                        r.from.kind.as_str(),
                        r.from.id.as_str(),
                        r.relationship_type.as_str(),
                        r.to.kind.as_str(),
                        r.to.id.as_str(),
                    ],
                    |row| row.get(0),
                )
                .map_err(sql_err("upsert_relationship"))?;
            conn.execute(
                "INSERT INTO substrate_relationships
                    (id, basket_id, from_kind, from_id, relationship_type, to_kind, to_id,
                     strength, description, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                 ON CONFLICT(basket_id, from_kind, from_id, relationship_type, to_kind, to_id)
                 DO UPDATE SET strength = excluded.strength, description = excluded.description",
                params![
                    r.id.as_str(),
                    r.basket_id.as_str(),
                    r.from.kind.as_str(),
                    r.from.id.as_str(),
                    r.relationship_type.as_str(),
                    r.to.kind.as_str(),
                    r.to.id.as_str(),
                    f64::from(r.strength),
                    r.description,
                    ts(r.created_at),
                ],
            )
            .map_err(sql_err("upsert_relationship"))?;
            Ok(!existed)
        })
    }

    fn list_relationships(&self, basket_id: &BasketId) -> Result<Vec<Relationship>> {
        self.with_conn("list_relationships", |conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {RELATIONSHIP_COLUMNS} FROM substrate_relationships
                     WHERE basket_id = ?1 ORDER BY strength DESC, id ASC"
                ))
                .map_err(sql_err("list_relationships"))?;
            stmt.query_map(params![basket_id.as_str()], relationship_from_row)
                .and_then(Iterator::collect)
                .map_err(sql_err("list_relationships"))
        })
    }
}

impl ReflectionBackend for SqliteStore {
    fn upsert_reflection(&self, artifact: &ReflectionArtifact) -> Result<bool> {
        let entries = to_json("upsert_reflection", &artifact.entries)?;
        self.with_conn("upsert_reflection", |conn| {
            let a = artifact;
            let existed: bool = conn
                .query_row(
                    "SELECT EXISTS (SELECT 1 FROM reflection_artifacts
                     WHERE basket_id = ?1 AND substrate_hash = ?2)",
                    params![a.basket_id.as_str(), a.substrate_hash],
                    |row| row.get(0),
                )
                .map_err(sql_err("upsert_reflection"))?;
            conn.execute(
                "INSERT INTO reflection_artifacts
                    (id, basket_id, workspace_id, reflection_text, reflection_target_type,
                     substrate_window_start, substrate_window_end, substrate_hash, entries,
                     used_fallback, computed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                 ON CONFLICT(basket_id, substrate_hash) DO UPDATE SET
                    reflection_text = excluded.reflection_text,
                    substrate_window_start = excluded.substrate_window_start,
                    substrate_window_end = excluded.substrate_window_end,
                    entries = excluded.entries,
                    used_fallback = excluded.used_fallback,
                    computed_at = excluded.computed_at",
                params![
                    a.id.as_str(),
                    a.basket_id.as_str(),
                    a.workspace_id.as_str(),
                    a.reflection_text,
                    a.reflection_target_type,
                    ts(a.substrate_window_start),
                    ts(a.substrate_window_end),
                    a.substrate_hash,
                    entries,
                    a.used_fallback,
                    ts(a.computed_at),
                ],
            )
            .map_err(sql_err("upsert_reflection"))?;
            Ok(!existed)
        })
    }

    fn list_reflections(&self, basket_id: &BasketId) -> Result<Vec<ReflectionArtifact>> {
        self.with_conn("list_reflections", |conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {REFLECTION_COLUMNS} FROM reflection_artifacts
                     WHERE basket_id = ?1 ORDER BY computed_at DESC, id DESC"
                ))
                .map_err(sql_err("list_reflections"))?;
            stmt.query_map(params![basket_id.as_str()], reflection_from_row)
                .and_then(Iterator::collect)
                .map_err(sql_err("list_reflections"))
        })
    }

    fn upsert_signature(&self, signature: &BasketSignature) -> Result<()> {
        let body = to_json("upsert_signature", signature)?;
        self.with_conn("upsert_signature", |conn| {
            conn.execute(
                "INSERT INTO basket_signatures (basket_id, workspace_id, body, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(basket_id) DO UPDATE SET
                    body = excluded.body, updated_at = excluded.updated_at",
                params![
                    signature.basket_id.as_str(),
                    signature.workspace_id.as_str(),
                    body,
                    ts(signature.updated_at),
                ],
            )
            .map_err(sql_err("upsert_signature"))?;
            Ok(())
        })
    }

    fn get_signature(&self, basket_id: &BasketId) -> Result<Option<BasketSignature>> {
        let body: Option<String> = self.with_conn("get_signature", |conn| {
            conn.query_row(
                "SELECT body FROM basket_signatures WHERE basket_id = ?1",
                params![basket_id.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(sql_err("get_signature"))
        })?;
        body.map(|b| {
            serde_json::from_str(&b).map_err(|e| Error::OperationFailed {
                operation: "get_signature".to_string(),
                cause: e.to_string(),
            })
        })
        .transpose()
    }
}

impl DocumentBackend for SqliteStore {
    fn create_document(&self, document: &Document) -> Result<()> {
        let metadata = to_json("create_document", &document.metadata)?;
        self.with_conn("create_document", |conn| {
            conn.execute(
                "INSERT INTO documents
                    (id, basket_id, workspace_id, title, content, status, metadata,
                     current_version, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    document.id.as_str(),
                    document.basket_id.as_str(),
                    document.workspace_id.as_str(),
                    document.title,
                    document.content,
                    document.status.as_str(),
                    metadata,
                    i64::from(document.current_version),
                    ts(document.created_at),
                    ts(document.updated_at),
                ],
            )
            .map_err(sql_err("create_document"))?;
            Ok(())
        })
    }

    fn get_document(
        &self,
        id: &DocumentId,
        workspace_id: &WorkspaceId,
    ) -> Result<Option<Document>> {
        self.with_conn("get_document", |conn| {
            conn.query_row(
                &format!(
                    "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = ?1 AND workspace_id = ?2"
                ),
                params![id.as_str(), workspace_id.as_str()],
                document_from_row,
            )
            .optional()
            .map_err(sql_err("get_document"))
        })
    }

    fn save_document(&self, document: &Document) -> Result<usize> {
        let metadata = to_json("save_document", &document.metadata)?;
        self.with_conn("save_document", |conn| {
            conn.execute(
                "UPDATE documents
                 SET title = ?2, content = ?3, status = ?4, metadata = ?5, current_version = ?6,
                     updated_at = ?7
                 WHERE id = ?1",
                params![
                    document.id.as_str(),
                    document.title,
                    document.content,
                    document.status.as_str(),
                    metadata,
                    i64::from(document.current_version),
                    ts(document.updated_at),
                ],
            )
            .map_err(sql_err("save_document"))
        })
    }

    fn append_version(&self, version: &DocumentVersion) -> Result<()> {
        self.with_conn("append_version", |conn| {
            conn.execute(
                "INSERT INTO document_versions
                    (document_id, version_no, content, content_hash, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    version.document_id.as_str(),
                    i64::from(version.version_no),
                    version.content,
                    version.content_hash,
                    ts(version.created_at),
                ],
            )
            .map_err(sql_err("append_version"))?;
            Ok(())
        })
    }

    fn list_versions(&self, document_id: &DocumentId) -> Result<Vec<DocumentVersion>> {
        self.with_conn("list_versions", |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT document_id, version_no, content, content_hash, created_at
                     FROM document_versions WHERE document_id = ?1 ORDER BY version_no ASC",
                )
                .map_err(sql_err("list_versions"))?;
            stmt.query_map(params![document_id.as_str()], version_from_row)
                .and_then(Iterator::collect)
                .map_err(sql_err("list_versions"))
        })
    }

    fn replace_references(
        &self,
        document_id: &DocumentId,
        references: &[SubstrateReference],
    ) -> Result<usize> {
        self.with_conn("replace_references", |conn| {
            let tx = conn.transaction().map_err(sql_err("replace_references"))?;
            tx.execute(
                "DELETE FROM substrate_references WHERE document_id = ?1",
                params![document_id.as_str()],
            )
            .map_err(sql_err("replace_references"))?;
            let mut written = 0;
            for r in references {
                written += tx
                    .execute(
                        "INSERT OR REPLACE INTO substrate_references
                            (document_id, substrate_id, kind, semantic_type, rank, score)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                        params![
                            document_id.as_str(),
                            r.substrate_id.as_str(),
                            r.kind.as_str(),
                            r.semantic_type.as_str(),
                            r.rank as i64,
                            f64::from(r.score),
                        ],
                    )
                    .map_err(sql_err("replace_references"))?;
            }
            tx.commit().map_err(sql_err("replace_references"))?;
            Ok(written)
        })
    }

    fn list_references(&self, document_id: &DocumentId) -> Result<Vec<SubstrateReference>> {
        self.with_conn("list_references", |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT document_id, substrate_id, kind, semantic_type, rank, score
                     FROM substrate_references WHERE document_id = ?1 ORDER BY rank ASC",
                )
                .map_err(sql_err("list_references"))?;
            stmt.query_map(params![document_id.as_str()], reference_from_row)
                .and_then(Iterator::collect)
                .map_err(sql_err("list_references"))
        })
    }
}

impl TimelineBackend for SqliteStore {
    fn append_event(&self, event: &PipelineEvent) -> Result<()> {
        let body = to_json("append_event", event)?;
        self.with_conn("append_event", |conn| {
            conn.execute(
                "INSERT INTO timeline_events
                    (event_id, basket_id, workspace_id, event_type, actor_id, body, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    event.meta.event_id,
                    event.basket_id.as_str(),
                    event.workspace_id.as_str(),
                    event.event_type(),
                    event.actor_id,
                    body,
                    ts(event.timestamp()),
                ],
            )
            .map_err(sql_err("append_event"))?;
            Ok(())
        })
    }

    fn list_events(&self, basket_id: &BasketId, limit: usize) -> Result<Vec<PipelineEvent>> {
        let bodies: Vec<String> = self.with_conn("list_events", |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT body FROM timeline_events WHERE basket_id = ?1
                     ORDER BY created_at DESC, rowid DESC LIMIT ?2",
                )
                .map_err(sql_err("list_events"))?;
            let limit = i64::try_from(limit).unwrap_or(i64::MAX);
            stmt.query_map(params![basket_id.as_str(), limit], |row| row.get(0))
                .and_then(Iterator::collect)
                .map_err(sql_err("list_events"))
        })?;
        bodies
            .iter()
            .map(|b| {
                serde_json::from_str(b).map_err(|e| Error::OperationFailed {
                    operation: "list_events".to_string(),
                    cause: e.to_string(),
                })
            })
            .collect()
    }
}
