//! Ordered execution of proposal operations.
//!
//! Operations run strictly in list order. The first failure stops the run;
//! operations after it never touch the store. Every write must report an
//! affected row, otherwise the operation fails with [`Error::Execution`].

use crate::models::{
    ExecutionLogEntry, ExecutionSummary, Operation, Proposal, Provenance, SubstrateId,
    SubstrateKind, SubstrateState, SubstrateUnit, SubstrateUpdate, WorkspaceId,
};
use crate::storage::SubstrateStore;
use crate::{Error, Result};
use std::collections::HashSet;

/// The operation at which execution stopped.
#[derive(Debug)]
pub struct ExecutionFailure {
    /// Index of the failed operation.
    pub index: usize,
    /// Name of the failed operation.
    pub operation: &'static str,
    /// What went wrong.
    pub error: Error,
}

/// Result of one execution attempt.
#[derive(Debug, Default)]
pub struct ExecutionReport {
    /// Per-operation log, including successes from earlier attempts.
    pub log: Vec<ExecutionLogEntry>,
    /// Counts of successful operations by type.
    pub summary: ExecutionSummary,
    /// Substrate created or changed by successful operations.
    pub touched_ids: Vec<SubstrateId>,
    /// Set when an operation failed.
    pub failure: Option<ExecutionFailure>,
}

impl ExecutionReport {
    /// Whether every operation succeeded.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.failure.is_none()
    }
}

/// Applies proposal operations to a store.
pub struct ProposalExecutor<'a> {
    store: &'a dyn SubstrateStore,
}

impl<'a> ProposalExecutor<'a> {
    /// Creates an executor over `store`.
    #[must_use]
    pub const fn new(store: &'a dyn SubstrateStore) -> Self {
        Self { store }
    }

    /// Executes `proposal`, resuming after the successful prefix recorded in
    /// its execution log so a retried proposal never repeats an operation.
    #[must_use]
    pub fn execute(&self, proposal: &Proposal) -> ExecutionReport {
        let mut report = ExecutionReport::default();

        let resume_at = proposal
            .execution_log
            .iter()
            .take_while(|entry| entry.success)
            .count()
            .min(proposal.ops.len());
        for (entry, op) in proposal.execution_log.iter().zip(&proposal.ops).take(resume_at) {
            report.log.push(entry.clone());
            report.summary.record(op);
            if let Some(id) = &entry.result_id {
                report.touched_ids.push(id.clone());
            }
        }
        if resume_at > 0 {
            tracing::debug!(
                proposal_id = %proposal.id,
                resume_at = resume_at,
                "Resuming proposal execution"
            );
        }

        for (index, op) in proposal.ops.iter().enumerate().skip(resume_at) {
            match self.apply(proposal, op) {
                Ok(result_id) => {
                    report.summary.record(op);
                    report.touched_ids.push(result_id.clone());
                    report.log.push(ExecutionLogEntry {
                        index,
                        operation: op.name().to_string(),
                        success: true,
                        result_id: Some(result_id),
                        error: None,
                    });
                },
                Err(error) => {
                    let error = match error {
                        Error::Execution { .. } => error,
                        other => Error::Execution {
                            operation: format!("{}#{index}", op.name()),
                            cause: other.to_string(),
                        },
                    };
                    tracing::warn!(
                        proposal_id = %proposal.id,
                        index = index,
                        operation = op.name(),
                        error = %error,
                        "Proposal operation failed, aborting remaining operations"
                    );
                    report.log.push(ExecutionLogEntry {
                        index,
                        operation: op.name().to_string(),
                        success: false,
                        result_id: None,
                        error: Some(error.to_string()),
                    });
                    report.failure = Some(ExecutionFailure {
                        index,
                        operation: op.name(),
                        error,
                    });
                    break;
                },
            }
        }

        report
    }

    fn apply(&self, proposal: &Proposal, op: &Operation) -> Result<SubstrateId> {
        let ws = &proposal.workspace_id;
        match op {
            Operation::CreateBlock {
                title,
                content,
                semantic_type,
                confidence,
                anchor_role,
            } => {
                let mut unit = SubstrateUnit::new(
                    proposal.basket_id.clone(),
                    ws.clone(),
                    SubstrateKind::Block,
                    *semantic_type,
                    title.clone(),
                    content.clone(),
                )
                .with_confidence(*confidence)
                .with_provenance(provenance(proposal, *confidence));
                unit.anchor_role = *anchor_role;
                self.insert_accepted(op, unit)
            },
            Operation::CreateContextItem {
                label,
                kind,
                semantic_meaning,
                synonyms,
                confidence,
            } => {
                let mut unit = SubstrateUnit::new(
                    proposal.basket_id.clone(),
                    ws.clone(),
                    SubstrateKind::ContextItem,
                    *kind,
                    label.clone(),
                    semantic_meaning.clone(),
                )
                .with_confidence(*confidence)
                .with_provenance(provenance(proposal, *confidence));
                unit.synonyms.clone_from(synonyms);
                self.insert_accepted(op, unit)
            },
            Operation::ReviseBlock {
                block_id,
                content,
                confidence,
            } => {
                let update = SubstrateUpdate {
                    content: Some(content.clone()),
                    confidence: *confidence,
                    ..SubstrateUpdate::default()
                };
                self.update(op, block_id, ws, &update)?;
                Ok(block_id.clone())
            },
            Operation::UpdateContextItem {
                context_item_id,
                add_synonyms,
                semantic_meaning,
                confidence,
            } => {
                let current = self.load(op, context_item_id, ws)?;
                let update = SubstrateUpdate {
                    content: semantic_meaning.clone(),
                    confidence: *confidence,
                    synonyms: (!add_synonyms.is_empty())
                        .then(|| union(&current.synonyms, add_synonyms)),
                    ..SubstrateUpdate::default()
                };
                if !update.is_empty() {
                    self.update(op, context_item_id, ws, &update)?;
                }
                Ok(context_item_id.clone())
            },
            Operation::MergeContextItems {
                from_ids,
                canonical_id,
                merged_synonyms,
            } => {
                let canonical = self.load(op, canonical_id, ws)?;
                for from_id in from_ids {
                    let update = SubstrateUpdate {
                        state: Some(SubstrateState::Merged),
                        canonical_id: Some(canonical_id.clone()),
                        ..SubstrateUpdate::default()
                    };
                    self.update(op, from_id, ws, &update)?;
                }
                if !merged_synonyms.is_empty() {
                    let update = SubstrateUpdate {
                        synonyms: Some(union(&canonical.synonyms, merged_synonyms)),
                        ..SubstrateUpdate::default()
                    };
                    self.update(op, canonical_id, ws, &update)?;
                }
                Ok(canonical_id.clone())
            },
        }
    }

    /// Inserts as `PROPOSED`, then promotes to `ACCEPTED`; both writes must
    /// land.
    fn insert_accepted(&self, op: &Operation, unit: SubstrateUnit) -> Result<SubstrateId> {
        self.store.insert_substrate(&unit)?;
        let accept = SubstrateUpdate {
            state: Some(SubstrateState::Accepted),
            ..SubstrateUpdate::default()
        };
        self.update(op, &unit.id, &unit.workspace_id, &accept)?;
        Ok(unit.id)
    }

    fn update(
        &self,
        op: &Operation,
        id: &SubstrateId,
        workspace_id: &WorkspaceId,
        update: &SubstrateUpdate,
    ) -> Result<()> {
        match self.store.update_substrate(id, workspace_id, update)? {
            0 => Err(Error::Execution {
                operation: op.name().to_string(),
                cause: format!("no rows affected for substrate {id}"),
            }),
            _ => Ok(()),
        }
    }

    fn load(&self, op: &Operation, id: &SubstrateId, workspace_id: &WorkspaceId) -> Result<SubstrateUnit> {
        self.store
            .get_substrate(id, workspace_id)?
            .ok_or_else(|| Error::Execution {
                operation: op.name().to_string(),
                cause: format!("substrate {id} not found"),
            })
    }
}

fn provenance(proposal: &Proposal, confidence: f32) -> Provenance {
    Provenance {
        dump_ids: proposal.provenance.clone(),
        method: format!("proposal:{}", proposal.id),
        confidence,
    }
}

fn union(current: &[String], extra: &[String]) -> Vec<String> {
    let mut seen: HashSet<String> = current.iter().map(|s| s.to_lowercase()).collect();
    current
        .iter()
        .cloned()
        .chain(extra.iter().filter(|s| seen.insert(s.to_lowercase())).cloned())
        .collect()
}
