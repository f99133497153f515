//! In-memory substrate store.
//!
//! Provides a fast, non-persistent implementation of [`SubstrateStore`] for
//! tests, embedded use, and the CLI when no database path is configured.

use crate::models::{
    BasketId, BasketSignature, Document, DocumentId, DocumentVersion, DumpId, DumpTombstone,
    GovernanceFlags, PipelineEvent, Proposal, ProposalId, ProposalStatus, ProposalUpdate,
    QueueEntry, QueueEntryId, QueueState, QueueStats, RawDump, ReflectionArtifact, Relationship,
    SubstrateId, SubstrateReference, SubstrateState, SubstrateUnit, SubstrateUpdate, WorkType,
    WorkspaceId,
};
use crate::storage::traits::{
    BlockBackend, DocumentBackend, DumpBackend, GraphBackend, PolicyProvider, ProposalBackend,
    QueueBackend, ReflectionBackend, SubstrateStore, TimelineBackend,
};
use crate::{Error, Result};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

fn read<'a, T>(lock: &'a RwLock<T>, operation: &str) -> Result<RwLockReadGuard<'a, T>> {
    lock.read().map_err(|_| Error::OperationFailed {
        operation: operation.to_string(),
        cause: "Lock poisoned".to_string(),
    })
}

fn write<'a, T>(lock: &'a RwLock<T>, operation: &str) -> Result<RwLockWriteGuard<'a, T>> {
    lock.write().map_err(|_| Error::OperationFailed {
        operation: operation.to_string(),
        cause: "Lock poisoned".to_string(),
    })
}

fn lock<'a, T>(mutex: &'a Mutex<T>, operation: &str) -> Result<MutexGuard<'a, T>> {
    mutex.lock().map_err(|_| Error::OperationFailed {
        operation: operation.to_string(),
        cause: "Lock poisoned".to_string(),
    })
}

/// In-memory substrate store.
///
/// Uses `RwLock` per table for reader-writer semantics; the queue sits behind
/// a single `Mutex` so claims are atomic. Data is not persisted between runs.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    dumps: RwLock<HashMap<DumpId, RawDump>>,
    tombstones: RwLock<HashMap<DumpId, DumpTombstone>>,
    substrate: RwLock<HashMap<SubstrateId, SubstrateUnit>>,
    proposals: RwLock<HashMap<ProposalId, Proposal>>,
    policies: RwLock<HashMap<WorkspaceId, GovernanceFlags>>,
    relationships: RwLock<Vec<Relationship>>,
    reflections: RwLock<Vec<ReflectionArtifact>>,
    signatures: RwLock<HashMap<BasketId, BasketSignature>>,
    documents: RwLock<HashMap<DocumentId, Document>>,
    versions: RwLock<Vec<DocumentVersion>>,
    references: RwLock<HashMap<DocumentId, Vec<SubstrateReference>>>,
    timeline: RwLock<Vec<PipelineEvent>>,
    queue: Mutex<Vec<QueueEntry>>,
}

impl InMemoryStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the governance flags of a workspace.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn set_governance_flags(
        &self,
        workspace_id: &WorkspaceId,
        flags: GovernanceFlags,
    ) -> Result<()> {
        write(&self.policies, "set_governance_flags")?.insert(workspace_id.clone(), flags);
        Ok(())
    }

    /// Returns the number of stored relationships.
    #[must_use]
    pub fn relationship_count(&self) -> usize {
        self.relationships.read().map(|r| r.len()).unwrap_or(0)
    }

    /// Returns the number of stored substrate units.
    #[must_use]
    pub fn substrate_count(&self) -> usize {
        self.substrate.read().map(|s| s.len()).unwrap_or(0)
    }
}

impl DumpBackend for InMemoryStore {
    fn insert_dump(&self, dump: &RawDump) -> Result<()> {
        let mut dumps = write(&self.dumps, "insert_dump")?;
        if dumps.contains_key(&dump.id) {
            return Err(Error::operation("insert_dump", format!("duplicate id {}", dump.id)));
        }
        dumps.insert(dump.id.clone(), dump.clone());
        Ok(())
    }

    fn get_dump(&self, id: &DumpId, workspace_id: &WorkspaceId) -> Result<Option<RawDump>> {
        Ok(read(&self.dumps, "get_dump")?
            .get(id)
            .filter(|d| &d.workspace_id == workspace_id)
            .cloned())
    }

    fn list_recent_dumps(
        &self,
        basket_id: &BasketId,
        since: Option<u64>,
        limit: usize,
    ) -> Result<Vec<RawDump>> {
        let tombstones = read(&self.tombstones, "list_recent_dumps")?;
        let mut dumps: Vec<RawDump> = read(&self.dumps, "list_recent_dumps")?
            .values()
            .filter(|d| &d.basket_id == basket_id)
            .filter(|d| since.is_none_or(|s| d.created_at >= s))
            .filter(|d| !tombstones.contains_key(&d.id))
            .cloned()
            .collect();
        dumps.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        dumps.truncate(limit);
        Ok(dumps)
    }

    fn dumps_in_batch(&self, basket_id: &BasketId, batch_id: &str) -> Result<Vec<RawDump>> {
        let mut dumps: Vec<RawDump> = read(&self.dumps, "dumps_in_batch")?
            .values()
            .filter(|d| &d.basket_id == basket_id && d.batch_id() == Some(batch_id))
            .cloned()
            .collect();
        dumps.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(dumps)
    }

    fn tombstone_dump(&self, tombstone: &DumpTombstone) -> Result<usize> {
        if !read(&self.dumps, "tombstone_dump")?.contains_key(&tombstone.dump_id) {
            return Ok(0);
        }
        write(&self.tombstones, "tombstone_dump")?
            .insert(tombstone.dump_id.clone(), tombstone.clone());
        Ok(1)
    }

    fn is_tombstoned(&self, id: &DumpId) -> Result<bool> {
        Ok(read(&self.tombstones, "is_tombstoned")?.contains_key(id))
    }
}

impl BlockBackend for InMemoryStore {
    fn insert_substrate(&self, unit: &SubstrateUnit) -> Result<()> {
        let mut substrate = write(&self.substrate, "insert_substrate")?;
        if substrate.contains_key(&unit.id) {
            return Err(Error::operation(
                "insert_substrate",
                format!("duplicate id {}", unit.id),
            ));
        }
        substrate.insert(unit.id.clone(), unit.clone());
        Ok(())
    }

    fn get_substrate(
        &self,
        id: &SubstrateId,
        workspace_id: &WorkspaceId,
    ) -> Result<Option<SubstrateUnit>> {
        Ok(read(&self.substrate, "get_substrate")?
            .get(id)
            .filter(|u| &u.workspace_id == workspace_id)
            .cloned())
    }

    fn list_substrate(
        &self,
        basket_id: &BasketId,
        exclude_states: &[SubstrateState],
    ) -> Result<Vec<SubstrateUnit>> {
        let mut units: Vec<SubstrateUnit> = read(&self.substrate, "list_substrate")?
            .values()
            .filter(|u| &u.basket_id == basket_id && !exclude_states.contains(&u.state))
            .cloned()
            .collect();
        units.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(units)
    }

    fn update_substrate(
        &self,
        id: &SubstrateId,
        workspace_id: &WorkspaceId,
        update: &SubstrateUpdate,
    ) -> Result<usize> {
        let mut substrate = write(&self.substrate, "update_substrate")?;
        match substrate
            .get_mut(id)
            .filter(|u| &u.workspace_id == workspace_id)
        {
            Some(unit) => {
                update.apply_to(unit, crate::current_timestamp());
                Ok(1)
            },
            None => Ok(0),
        }
    }
}

impl ProposalBackend for InMemoryStore {
    fn create_proposal(&self, proposal: &Proposal) -> Result<()> {
        write(&self.proposals, "create_proposal")?.insert(proposal.id.clone(), proposal.clone());
        Ok(())
    }

    fn get_proposal(
        &self,
        id: &ProposalId,
        workspace_id: &WorkspaceId,
    ) -> Result<Option<Proposal>> {
        Ok(read(&self.proposals, "get_proposal")?
            .get(id)
            .filter(|p| &p.workspace_id == workspace_id)
            .cloned())
    }

    fn update_proposal(&self, id: &ProposalId, update: &ProposalUpdate) -> Result<usize> {
        let mut proposals = write(&self.proposals, "update_proposal")?;
        match proposals.get_mut(id) {
            Some(proposal) => {
                update.apply_to(proposal, crate::current_timestamp());
                Ok(1)
            },
            None => Ok(0),
        }
    }

    fn list_proposals(
        &self,
        basket_id: &BasketId,
        status: Option<ProposalStatus>,
    ) -> Result<Vec<Proposal>> {
        let mut proposals: Vec<Proposal> = read(&self.proposals, "list_proposals")?
            .values()
            .filter(|p| &p.basket_id == basket_id)
            .filter(|p| status.is_none_or(|s| p.status == s))
            .cloned()
            .collect();
        proposals.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(proposals)
    }

    fn proposal_for_dump(
        &self,
        basket_id: &BasketId,
        dump_id: &DumpId,
    ) -> Result<Option<Proposal>> {
        Ok(self
            .list_proposals(basket_id, None)?
            .into_iter()
            .find(|p| p.references_dump(dump_id)))
    }
}

impl PolicyProvider for InMemoryStore {
    fn get_governance_flags(&self, workspace_id: &WorkspaceId) -> Result<GovernanceFlags> {
        Ok(read(&self.policies, "get_governance_flags")?
            .get(workspace_id)
            .copied()
            .unwrap_or_default())
    }
}

impl GraphBackend for InMemoryStore {
    fn upsert_relationship(&self, relationship: &Relationship) -> Result<bool> {
        let mut rels = write(&self.relationships, "upsert_relationship")?;
        let key = relationship.conflict_key();
        if let Some(existing) = rels.iter_mut().find(|r| r.conflict_key() == key) {
            existing.strength = relationship.strength;
            existing.description.clone_from(&relationship.description);
            Ok(false)
        } else {
            rels.push(relationship.clone());
            Ok(true)
        }
    }

    fn list_relationships(&self, basket_id: &BasketId) -> Result<Vec<Relationship>> {
        Ok(read(&self.relationships, "list_relationships")?
            .iter()
            .filter(|r| &r.basket_id == basket_id)
            .cloned()
            .collect())
    }
}

impl ReflectionBackend for InMemoryStore {
    fn upsert_reflection(&self, artifact: &ReflectionArtifact) -> Result<bool> {
        let mut reflections = write(&self.reflections, "upsert_reflection")?;
        if let Some(existing) = reflections.iter_mut().find(|r| {
            r.basket_id == artifact.basket_id && r.substrate_hash == artifact.substrate_hash
        }) {
            let id = existing.id.clone();
            *existing = artifact.clone();
            existing.id = id;
            Ok(false)
        } else {
            reflections.push(artifact.clone());
            Ok(true)
        }
    }

    fn list_reflections(&self, basket_id: &BasketId) -> Result<Vec<ReflectionArtifact>> {
        let mut out: Vec<ReflectionArtifact> = read(&self.reflections, "list_reflections")?
            .iter()
            .filter(|r| &r.basket_id == basket_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.computed_at.cmp(&a.computed_at));
        Ok(out)
    }

    fn upsert_signature(&self, signature: &BasketSignature) -> Result<()> {
        write(&self.signatures, "upsert_signature")?
            .insert(signature.basket_id.clone(), signature.clone());
        Ok(())
    }

    fn get_signature(&self, basket_id: &BasketId) -> Result<Option<BasketSignature>> {
        Ok(read(&self.signatures, "get_signature")?
            .get(basket_id)
            .cloned())
    }
}

impl DocumentBackend for InMemoryStore {
    fn create_document(&self, document: &Document) -> Result<()> {
        write(&self.documents, "create_document")?.insert(document.id.clone(), document.clone());
        Ok(())
    }

    fn get_document(
        &self,
        id: &DocumentId,
        workspace_id: &WorkspaceId,
    ) -> Result<Option<Document>> {
        Ok(read(&self.documents, "get_document")?
            .get(id)
            .filter(|d| &d.workspace_id == workspace_id)
            .cloned())
    }

    fn save_document(&self, document: &Document) -> Result<usize> {
        let mut documents = write(&self.documents, "save_document")?;
        match documents.get_mut(&document.id) {
            Some(existing) => {
                *existing = document.clone();
                Ok(1)
            },
            None => Ok(0),
        }
    }

    fn append_version(&self, version: &DocumentVersion) -> Result<()> {
        let mut versions = write(&self.versions, "append_version")?;
        if versions
            .iter()
            .any(|v| v.document_id == version.document_id && v.version_no == version.version_no)
        {
            return Err(Error::operation(
                "append_version",
                format!(
                    "version {} of {} already exists",
                    version.version_no, version.document_id
                ),
            ));
        }
        versions.push(version.clone());
        Ok(())
    }

    fn list_versions(&self, document_id: &DocumentId) -> Result<Vec<DocumentVersion>> {
        let mut out: Vec<DocumentVersion> = read(&self.versions, "list_versions")?
            .iter()
            .filter(|v| &v.document_id == document_id)
            .cloned()
            .collect();
        out.sort_by_key(|v| v.version_no);
        Ok(out)
    }

    fn replace_references(
        &self,
        document_id: &DocumentId,
        references: &[SubstrateReference],
    ) -> Result<usize> {
        write(&self.references, "replace_references")?
            .insert(document_id.clone(), references.to_vec());
        Ok(references.len())
    }

    fn list_references(&self, document_id: &DocumentId) -> Result<Vec<SubstrateReference>> {
        let mut refs = read(&self.references, "list_references")?
            .get(document_id)
            .cloned()
            .unwrap_or_default();
        refs.sort_by_key(|r| r.rank);
        Ok(refs)
    }
}

impl TimelineBackend for InMemoryStore {
    fn append_event(&self, event: &PipelineEvent) -> Result<()> {
        write(&self.timeline, "append_event")?.push(event.clone());
        Ok(())
    }

    fn list_events(&self, basket_id: &BasketId, limit: usize) -> Result<Vec<PipelineEvent>> {
        Ok(read(&self.timeline, "list_events")?
            .iter()
            .rev()
            .filter(|e| &e.basket_id == basket_id)
            .take(limit)
            .cloned()
            .collect())
    }
}

impl QueueBackend for InMemoryStore {
    fn enqueue(&self, entry: &QueueEntry) -> Result<()> {
        lock(&self.queue, "enqueue")?.push(entry.clone());
        Ok(())
    }

    fn claim(
        &self,
        worker_id: &str,
        limit: usize,
        stale_after_secs: u64,
        work_types: &[WorkType],
        now: u64,
    ) -> Result<Vec<QueueEntry>> {
        let mut queue = lock(&self.queue, "claim")?;
        let mut candidates: Vec<usize> = queue
            .iter()
            .enumerate()
            .filter(|(_, e)| work_types.contains(&e.work_type()))
            .filter(|(_, e)| e.is_claimable(now, stale_after_secs))
            .map(|(i, _)| i)
            .collect();
        candidates.sort_by(|&a, &b| {
            queue[b]
                .priority
                .cmp(&queue[a].priority)
                .then(queue[a].created_at.cmp(&queue[b].created_at))
                .then(queue[a].id.cmp(&queue[b].id))
        });
        candidates.truncate(limit);

        let mut claimed = Vec::with_capacity(candidates.len());
        for idx in candidates {
            let entry = &mut queue[idx];
            entry.claim(worker_id, now);
            claimed.push(entry.clone());
        }
        Ok(claimed)
    }

    fn set_state(
        &self,
        id: &QueueEntryId,
        worker_id: Option<&str>,
        state: QueueState,
        error: Option<&str>,
    ) -> Result<usize> {
        let mut queue = lock(&self.queue, "set_state")?;
        let Some(entry) = queue.iter_mut().find(|e| &e.id == id) else {
            return Ok(0);
        };
        if let Some(worker_id) = worker_id
            && (entry.status != QueueState::Processing || entry.worker_id.as_deref() != Some(worker_id))
        {
            return Ok(0);
        }
        entry.status = state;
        entry.updated_at = crate::current_timestamp();
        if state == QueueState::Pending {
            entry.worker_id = None;
            entry.claimed_at = None;
        }
        if let Some(error) = error {
            entry.error_details = Some(error.to_string());
        }
        Ok(1)
    }

    fn get_entry(&self, id: &QueueEntryId) -> Result<Option<QueueEntry>> {
        Ok(lock(&self.queue, "get_entry")?
            .iter()
            .find(|e| &e.id == id)
            .cloned())
    }

    fn find_pending(
        &self,
        basket_id: &BasketId,
        work_type: WorkType,
    ) -> Result<Option<QueueEntry>> {
        Ok(lock(&self.queue, "find_pending")?
            .iter()
            .find(|e| {
                &e.basket_id == basket_id
                    && e.work_type() == work_type
                    && e.status == QueueState::Pending
            })
            .cloned())
    }

    fn queue_stats(&self) -> Result<QueueStats> {
        let queue = lock(&self.queue, "queue_stats")?;
        let mut stats = QueueStats::default();
        for entry in queue.iter() {
            stats.count(entry.status);
        }
        Ok(stats)
    }
}

impl SubstrateStore for InMemoryStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
