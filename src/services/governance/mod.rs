//! Governance engine: the only path by which substrate is created or
//! changed.
//!
//! Raw dumps become a [`Proposal`] through five steps:
//!
//! 1. [`extraction`] turns dump text into candidates.
//! 2. [`evolution`] decides create, revise or merge against existing
//!    substrate.
//! 3. [`operations`] applies fairness filters to context item creations.
//! 4. A [`ProposalValidator`] scores the operation set.
//! 5. [`should_auto_approve`] decides from workspace flags whether the
//!    proposal executes immediately.
//!
//! Approved proposals run through the [`ProposalExecutor`]. A failed
//! operation stops execution and reverts the proposal to `PROPOSED` with a
//! review note. A successful run marks it executed and triggers the P1→P2
//! cascade.

pub mod evolution;
pub mod executor;
pub mod extraction;
pub mod operations;
mod policy;
pub mod validator;

pub use evolution::{EvolutionDecision, EvolutionPlanner};
pub use executor::{ExecutionFailure, ExecutionReport, ProposalExecutor};
pub use extraction::{Candidate, ContentType, ExtractionOutcome, Extractor};
pub use operations::{FairnessReport, apply_fairness};
pub use policy::should_auto_approve;
pub use validator::{DefaultValidator, ProposalValidator};

use crate::config::{GovernanceConfig, PipelineConfig};
use crate::llm::LlmProvider;
use crate::models::{
    BasketId, DumpId, ExecutionSummary, Proposal, ProposalId, ProposalStatus, ProposalUpdate,
    RawDump, SubstrateState, TimelineEventKind, WorkId, WorkspaceId,
};
use crate::services::cascade::{CascadeContext, CascadeTrigger, StageOutcome};
use crate::services::timeline::TimelineEmitter;
use crate::storage::SubstrateStore;
use crate::{Error, Result, current_timestamp};
use std::sync::Arc;
use std::time::Instant;
use tracing::instrument;

/// Result of governing one dump or batch.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessOutcome {
    /// Proposals persisted by this call (0 or 1).
    pub proposals_created: usize,
    /// The proposal covering the input, new or pre-existing.
    pub proposal_id: Option<ProposalId>,
    /// Status of that proposal after this call.
    pub status: Option<ProposalStatus>,
    /// Operations in the proposal.
    pub operations_count: usize,
    /// Validator confidence.
    pub confidence: f32,
    /// Whether the proposal has been executed.
    pub executed: bool,
    /// Successful operation counts when executed.
    pub summary: ExecutionSummary,
    /// Whether extraction fell back to heuristics.
    pub used_fallback: bool,
}

impl ProcessOutcome {
    const fn nothing_to_propose(used_fallback: bool) -> Self {
        Self {
            proposals_created: 0,
            proposal_id: None,
            status: None,
            operations_count: 0,
            confidence: 0.0,
            executed: false,
            summary: ExecutionSummary {
                blocks_created: 0,
                context_items_created: 0,
                updates: 0,
            },
            used_fallback,
        }
    }

    fn for_proposal(proposal: &Proposal, created: bool) -> Self {
        Self {
            proposals_created: usize::from(created),
            proposal_id: Some(proposal.id.clone()),
            status: Some(proposal.status),
            operations_count: proposal.ops.len(),
            confidence: proposal.validator_report.confidence,
            executed: proposal.is_executed,
            summary: ExecutionSummary::default(),
            used_fallback: false,
        }
    }

    /// Substrate units created or updated by this call.
    #[must_use]
    pub const fn substrate_changes(&self) -> usize {
        self.summary.substrate_changes()
    }
}

/// Converts dumps into governed proposals and executes approved ones.
pub struct GovernanceEngine {
    store: Arc<dyn SubstrateStore>,
    extractor: Extractor,
    planner: EvolutionPlanner,
    validator: Arc<dyn ProposalValidator>,
    config: GovernanceConfig,
    timeline: TimelineEmitter,
    cascade: Option<CascadeTrigger>,
}

impl GovernanceEngine {
    /// Creates an engine. The LLM is used for extraction only when
    /// `features.llm_extraction` is enabled.
    #[must_use]
    pub fn new(
        store: Arc<dyn SubstrateStore>,
        llm: Option<Arc<dyn LlmProvider>>,
        config: &PipelineConfig,
    ) -> Self {
        let llm = llm.filter(|_| config.features.llm_extraction);
        Self {
            timeline: TimelineEmitter::new(Arc::clone(&store), "governance"),
            store,
            extractor: Extractor::new(llm),
            planner: EvolutionPlanner::new(&config.governance),
            validator: Arc::new(DefaultValidator),
            config: config.governance,
            cascade: None,
        }
    }

    /// Enables the P1→P2 cascade after successful execution.
    #[must_use]
    pub fn with_cascade(mut self, cascade: CascadeTrigger) -> Self {
        self.cascade = Some(cascade);
        self
    }

    /// Replaces the proposal validator.
    #[must_use]
    pub fn with_validator(mut self, validator: Arc<dyn ProposalValidator>) -> Self {
        self.validator = validator;
        self
    }

    /// Replaces the timeline emitter.
    #[must_use]
    pub fn with_timeline(mut self, timeline: TimelineEmitter) -> Self {
        self.timeline = timeline;
        self
    }

    /// Governs a single dump.
    ///
    /// A dump already covered by a proposal is not extracted again: an
    /// approved-but-unexecuted proposal is resumed, anything else is
    /// reported as is. Downstream work inherits `work_id`.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] if the dump is missing or outside the basket
    ///   or workspace.
    /// - [`Error::Execution`] if auto-approved execution failed; the
    ///   proposal has been reverted to `PROPOSED`.
    /// - Storage errors.
    #[instrument(skip(self), fields(operation = "governance.process_dump", dump_id = %dump_id, basket_id = %basket_id))]
    pub fn process_dump(
        &self,
        dump_id: &DumpId,
        basket_id: &BasketId,
        workspace_id: &WorkspaceId,
        work_id: Option<&WorkId>,
    ) -> Result<ProcessOutcome> {
        let start = Instant::now();
        let result = (|| {
            let dump = self.load_dump(dump_id, basket_id, workspace_id)?;
            if let Some(existing) = self.store.proposal_for_dump(basket_id, dump_id)? {
                return self.resume_existing(existing, work_id);
            }
            let outcome = self.extractor.extract(&dump.text);
            self.govern(basket_id, workspace_id, vec![dump.id], &outcome, work_id)
        })();
        record_duration("single", &result, start);
        result
    }

    /// Governs several dumps jointly, producing one unified proposal.
    ///
    /// Dumps already covered by a proposal are left out; if all are
    /// covered, the first dump's proposal is reported.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidInput`] if `dump_ids` is empty.
    /// - Otherwise as [`process_dump`](Self::process_dump).
    #[instrument(skip(self), fields(operation = "governance.process_batch", basket_id = %basket_id, dumps = dump_ids.len()))]
    pub fn process_batch_dumps(
        &self,
        dump_ids: &[DumpId],
        basket_id: &BasketId,
        workspace_id: &WorkspaceId,
        work_id: Option<&WorkId>,
    ) -> Result<ProcessOutcome> {
        let start = Instant::now();
        let result = (|| {
            if dump_ids.is_empty() {
                return Err(Error::InvalidInput("batch has no dumps".to_string()));
            }
            let mut pending: Vec<RawDump> = Vec::with_capacity(dump_ids.len());
            let mut covered: Option<Proposal> = None;
            for dump_id in dump_ids {
                let dump = self.load_dump(dump_id, basket_id, workspace_id)?;
                match self.store.proposal_for_dump(basket_id, dump_id)? {
                    Some(proposal) => {
                        covered.get_or_insert(proposal);
                    },
                    None => pending.push(dump),
                }
            }

            if pending.is_empty() {
                return match covered {
                    Some(proposal) => self.resume_existing(proposal, work_id),
                    None => Ok(ProcessOutcome::nothing_to_propose(false)),
                };
            }

            let texts: Vec<&str> = pending.iter().map(|d| d.text.as_str()).collect();
            let outcome = self.extractor.extract_joint(&texts);
            let provenance = pending.into_iter().map(|d| d.id).collect();
            self.govern(basket_id, workspace_id, provenance, &outcome, work_id)
        })();
        record_duration("batch", &result, start);
        result
    }

    /// Approves a `PROPOSED` proposal and executes it.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] if the proposal is missing or in another
    ///   workspace.
    /// - [`Error::Validation`] if it is not `PROPOSED` or its validator
    ///   report has blocking issues.
    /// - [`Error::Execution`] if execution failed; the proposal is back in
    ///   `PROPOSED`.
    #[instrument(skip(self), fields(operation = "governance.approve", proposal_id = %proposal_id))]
    pub fn approve_proposal(
        &self,
        proposal_id: &ProposalId,
        workspace_id: &WorkspaceId,
        reviewer: &str,
    ) -> Result<ProcessOutcome> {
        let proposal = self.load_proposal(proposal_id, workspace_id)?;
        if proposal.status != ProposalStatus::Proposed || proposal.is_executed {
            return Err(Error::Validation(format!(
                "proposal {proposal_id} is {}; only unexecuted PROPOSED proposals can be approved",
                proposal.status
            )));
        }
        if proposal.validator_report.is_blocked() {
            return Err(Error::Validation(format!(
                "proposal {proposal_id} has blocking issues: {}",
                proposal.validator_report.blocking_issues.join("; ")
            )));
        }
        self.approve_and_execute(proposal, reviewer)
    }

    /// Rejects a `PROPOSED` proposal. Rejection is terminal.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] if the proposal is missing.
    /// - [`Error::Validation`] if it is not `PROPOSED`.
    #[instrument(skip(self, reason), fields(operation = "governance.reject", proposal_id = %proposal_id))]
    pub fn reject_proposal(
        &self,
        proposal_id: &ProposalId,
        workspace_id: &WorkspaceId,
        reviewer: &str,
        reason: &str,
    ) -> Result<()> {
        let proposal = self.load_proposal(proposal_id, workspace_id)?;
        if proposal.status != ProposalStatus::Proposed || proposal.is_executed {
            return Err(Error::Validation(format!(
                "proposal {proposal_id} is {}; only PROPOSED proposals can be rejected",
                proposal.status
            )));
        }
        self.update_proposal(
            &proposal.id,
            &ProposalUpdate {
                status: Some(ProposalStatus::Rejected),
                review_notes: Some(reason.to_string()),
                reviewed_by: Some(reviewer.to_string()),
                ..ProposalUpdate::default()
            },
        )?;
        metrics::counter!("proposals_reviewed_total", "decision" => "rejected").increment(1);
        tracing::info!(proposal_id = %proposal.id, reviewer = reviewer, "Proposal rejected");
        self.timeline.emit(
            &proposal.basket_id,
            &proposal.workspace_id,
            TimelineEventKind::ProposalRejected {
                proposal_id: proposal.id.clone(),
                reason: reason.to_string(),
            },
            Some(reviewer),
        );
        Ok(())
    }

    /// Re-executes a proposal whose earlier execution failed, resuming at
    /// the failed operation.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] if the proposal is missing.
    /// - [`Error::Validation`] if it was never approved, is rejected, or is
    ///   already executed.
    /// - [`Error::Execution`] if execution failed again.
    #[instrument(skip(self), fields(operation = "governance.retry", proposal_id = %proposal_id))]
    pub fn retry_execution(
        &self,
        proposal_id: &ProposalId,
        workspace_id: &WorkspaceId,
    ) -> Result<ProcessOutcome> {
        let proposal = self.load_proposal(proposal_id, workspace_id)?;
        let reverted = proposal.status == ProposalStatus::Proposed
            && proposal.execution_log.iter().any(|e| !e.success);
        if proposal.is_executed || !(reverted || proposal.is_pending_execution()) {
            return Err(Error::Validation(format!(
                "proposal {proposal_id} has no failed execution to retry"
            )));
        }
        self.approve_and_execute(proposal, "retry")
    }

    /// Lists proposals in a basket, optionally by status.
    ///
    /// # Errors
    ///
    /// Returns storage errors.
    pub fn list_proposals(
        &self,
        basket_id: &BasketId,
        status: Option<ProposalStatus>,
    ) -> Result<Vec<Proposal>> {
        self.store.list_proposals(basket_id, status)
    }

    fn govern(
        &self,
        basket_id: &BasketId,
        workspace_id: &WorkspaceId,
        provenance: Vec<DumpId>,
        extraction: &ExtractionOutcome,
        work_id: Option<&WorkId>,
    ) -> Result<ProcessOutcome> {
        let existing = self
            .store
            .list_substrate(basket_id, &[SubstrateState::Rejected, SubstrateState::Merged])?;
        let planned = self.planner.plan(&extraction.candidates, &existing);
        let (ops, fairness) = apply_fairness(planned, self.config.max_context_items);

        if ops.is_empty() {
            tracing::info!(
                basket_id = %basket_id,
                candidates = extraction.candidates.len(),
                filtered = fairness.removed(),
                "No operations to propose"
            );
            metrics::counter!("proposals_total", "status" => "empty").increment(1);
            return Ok(ProcessOutcome::nothing_to_propose(extraction.used_fallback));
        }

        let report = self.validator.validate(&ops, &existing);
        let flags = self.store.get_governance_flags(workspace_id)?;
        let auto = should_auto_approve(&flags) && !report.is_blocked();
        let status = if auto {
            ProposalStatus::Approved
        } else {
            ProposalStatus::Proposed
        };

        let proposal = Proposal::new(
            basket_id.clone(),
            workspace_id.clone(),
            provenance,
            ops,
            report,
        )
        .with_status(status);
        self.store.create_proposal(&proposal)?;
        metrics::counter!("proposals_total", "status" => status.as_str()).increment(1);
        tracing::info!(
            proposal_id = %proposal.id,
            basket_id = %basket_id,
            ops = proposal.ops.len(),
            confidence = proposal.validator_report.confidence,
            auto_approved = auto,
            method = extraction.method,
            "Proposal created"
        );

        let kind = if auto {
            TimelineEventKind::ProposalApproved {
                proposal_id: proposal.id.clone(),
                ops_count: proposal.ops.len(),
                auto: true,
            }
        } else {
            TimelineEventKind::ProposalSubmitted {
                proposal_id: proposal.id.clone(),
                ops_count: proposal.ops.len(),
                confidence: proposal.validator_report.confidence,
            }
        };
        self.timeline
            .emit(basket_id, workspace_id, kind, Some("governance"));

        let mut outcome = ProcessOutcome::for_proposal(&proposal, true);
        outcome.used_fallback = extraction.used_fallback;
        if auto {
            outcome.summary = self.execute_approved(&proposal, None, work_id)?;
            outcome.executed = true;
        }
        Ok(outcome)
    }

    fn resume_existing(&self, proposal: Proposal, work_id: Option<&WorkId>) -> Result<ProcessOutcome> {
        tracing::info!(
            proposal_id = %proposal.id,
            status = proposal.status.as_str(),
            executed = proposal.is_executed,
            "Dump already governed"
        );
        let mut outcome = ProcessOutcome::for_proposal(&proposal, false);
        if proposal.is_pending_execution() {
            outcome.summary = self.execute_approved(&proposal, None, work_id)?;
            outcome.executed = true;
        }
        Ok(outcome)
    }

    fn approve_and_execute(&self, mut proposal: Proposal, reviewer: &str) -> Result<ProcessOutcome> {
        self.update_proposal(
            &proposal.id,
            &ProposalUpdate {
                status: Some(ProposalStatus::Approved),
                reviewed_by: Some(reviewer.to_string()),
                ..ProposalUpdate::default()
            },
        )?;
        proposal.status = ProposalStatus::Approved;
        proposal.reviewed_by = Some(reviewer.to_string());
        metrics::counter!("proposals_reviewed_total", "decision" => "approved").increment(1);
        self.timeline.emit(
            &proposal.basket_id,
            &proposal.workspace_id,
            TimelineEventKind::ProposalApproved {
                proposal_id: proposal.id.clone(),
                ops_count: proposal.ops.len(),
                auto: false,
            },
            Some(reviewer),
        );

        let mut outcome = ProcessOutcome::for_proposal(&proposal, false);
        outcome.summary = self.execute_approved(&proposal, Some(reviewer), None)?;
        outcome.executed = true;
        Ok(outcome)
    }

    /// Executes an approved proposal, optionally reattempting once, and
    /// records the result.
    fn execute_approved(
        &self,
        proposal: &Proposal,
        actor: Option<&str>,
        work_id: Option<&WorkId>,
    ) -> Result<ExecutionSummary> {
        let executor = ProposalExecutor::new(self.store.as_ref());
        let mut report = executor.execute(proposal);

        if !report.is_success() && self.config.reattempt_on_failure {
            tracing::info!(proposal_id = %proposal.id, "Reattempting failed execution once");
            metrics::counter!("proposal_reattempts_total").increment(1);
            let mut retry = proposal.clone();
            retry.execution_log.clone_from(&report.log);
            report = executor.execute(&retry);
        }

        match report.failure.take() {
            None => {
                self.update_proposal(
                    &proposal.id,
                    &ProposalUpdate {
                        is_executed: Some(true),
                        execution_log: Some(report.log),
                        executed_at: Some(current_timestamp()),
                        ..ProposalUpdate::default()
                    },
                )?;
                metrics::counter!("proposal_executions_total", "result" => "success").increment(1);
                tracing::info!(
                    proposal_id = %proposal.id,
                    blocks = report.summary.blocks_created,
                    context_items = report.summary.context_items_created,
                    updates = report.summary.updates,
                    "Proposal executed"
                );
                self.timeline.emit(
                    &proposal.basket_id,
                    &proposal.workspace_id,
                    TimelineEventKind::SubstrateCommitted {
                        proposal_id: proposal.id.clone(),
                        summary: report.summary,
                    },
                    actor,
                );
                if let Some(cascade) = &self.cascade {
                    cascade.trigger_next_stage(
                        &CascadeContext::new(proposal.basket_id.clone(), proposal.workspace_id.clone())
                            .with_work_id(work_id),
                        &StageOutcome::Substrate {
                            summary: report.summary,
                            substrate_ids: report.touched_ids,
                        },
                    );
                }
                Ok(report.summary)
            },
            Some(failure) => {
                let note = format!(
                    "Execution failed at operation {} ({}): {}",
                    failure.index, failure.operation, failure.error
                );
                self.update_proposal(
                    &proposal.id,
                    &ProposalUpdate {
                        status: Some(ProposalStatus::Proposed),
                        is_executed: Some(false),
                        execution_log: Some(report.log),
                        review_notes: Some(note.clone()),
                        ..ProposalUpdate::default()
                    },
                )?;
                metrics::counter!("proposal_executions_total", "result" => "reverted").increment(1);
                self.timeline.emit(
                    &proposal.basket_id,
                    &proposal.workspace_id,
                    TimelineEventKind::ProposalReverted {
                        proposal_id: proposal.id.clone(),
                        error: note,
                    },
                    actor,
                );
                Err(failure.error)
            },
        }
    }

    fn load_dump(
        &self,
        dump_id: &DumpId,
        basket_id: &BasketId,
        workspace_id: &WorkspaceId,
    ) -> Result<RawDump> {
        self.store
            .get_dump(dump_id, workspace_id)?
            .filter(|d| &d.basket_id == basket_id)
            .ok_or_else(|| Error::not_found("dump", dump_id))
    }

    fn load_proposal(&self, id: &ProposalId, workspace_id: &WorkspaceId) -> Result<Proposal> {
        self.store
            .get_proposal(id, workspace_id)?
            .ok_or_else(|| Error::not_found("proposal", id))
    }

    fn update_proposal(&self, id: &ProposalId, update: &ProposalUpdate) -> Result<()> {
        match self.store.update_proposal(id, update)? {
            0 => Err(Error::not_found("proposal", id)),
            _ => Ok(()),
        }
    }
}

impl std::fmt::Debug for GovernanceEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GovernanceEngine")
            .field("extractor", &self.extractor)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn record_duration<T>(mode: &'static str, result: &Result<T>, start: Instant) {
    let status = if result.is_ok() { "success" } else { "error" };
    metrics::counter!("governance_runs_total", "mode" => mode, "status" => status).increment(1);
    metrics::histogram!("governance_duration_ms", "mode" => mode)
        .record(start.elapsed().as_secs_f64() * 1000.0);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{GovernanceFlags, Operation, ValidatorReport};
    use crate::storage::{BlockBackend, DumpBackend, InMemoryStore, ProposalBackend};

    fn store(flags: GovernanceFlags) -> Arc<InMemoryStore> {
        let store = InMemoryStore::new();
        store
            .set_governance_flags(&WorkspaceId::new("w1"), flags)
            .unwrap();
        Arc::new(store)
    }

    fn engine(store: &Arc<InMemoryStore>) -> GovernanceEngine {
        let shared: Arc<dyn SubstrateStore> = store.clone();
        GovernanceEngine::new(shared, None, &PipelineConfig::default())
    }

    fn dump(store: &InMemoryStore, text: &str) -> RawDump {
        let dump = RawDump::new(BasketId::new("b1"), WorkspaceId::new("w1"), text);
        store.insert_dump(&dump).unwrap();
        dump
    }

    const TEXT: &str = "Our API is vulnerable to spam attacks. We should implement rate limiting.";

    #[test]
    fn test_auto_approved_dump_executes() {
        let store = store(GovernanceFlags::auto_approving());
        let dump = dump(&store, TEXT);
        let outcome = engine(&store)
            .process_dump(&dump.id, &dump.basket_id, &dump.workspace_id, None)
            .unwrap();

        assert_eq!(outcome.proposals_created, 1);
        assert_eq!(outcome.status, Some(ProposalStatus::Approved));
        assert!(outcome.executed);
        assert!(outcome.summary.blocks_created >= 2);

        let proposal = store
            .get_proposal(outcome.proposal_id.as_ref().unwrap(), &dump.workspace_id)
            .unwrap()
            .unwrap();
        assert!(proposal.is_executed);
        assert!(proposal.execution_log.iter().all(|e| e.success));
    }

    #[test]
    fn test_default_flags_stay_proposed() {
        let store = store(GovernanceFlags::default());
        let dump = dump(&store, TEXT);
        let outcome = engine(&store)
            .process_dump(&dump.id, &dump.basket_id, &dump.workspace_id, None)
            .unwrap();

        assert_eq!(outcome.status, Some(ProposalStatus::Proposed));
        assert!(!outcome.executed);
        assert!(store.list_substrate(&dump.basket_id, &[]).unwrap().is_empty());
    }

    #[test]
    fn test_wrong_basket_is_not_found() {
        let store = store(GovernanceFlags::default());
        let dump = dump(&store, TEXT);
        let err = engine(&store)
            .process_dump(&dump.id, &BasketId::new("other"), &dump.workspace_id, None)
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { kind: "dump", .. }));
    }

    #[test]
    fn test_reprocessing_does_not_duplicate() {
        let store = store(GovernanceFlags::auto_approving());
        let dump = dump(&store, TEXT);
        let engine = engine(&store);
        let first = engine
            .process_dump(&dump.id, &dump.basket_id, &dump.workspace_id, None)
            .unwrap();
        let second = engine
            .process_dump(&dump.id, &dump.basket_id, &dump.workspace_id, None)
            .unwrap();

        assert_eq!(second.proposals_created, 0);
        assert_eq!(first.proposal_id, second.proposal_id);
        assert_eq!(
            store.list_proposals(&dump.basket_id, None).unwrap().len(),
            1
        );
    }

    #[test]
    fn test_empty_extraction_creates_no_proposal() {
        let store = store(GovernanceFlags::auto_approving());
        let dump = dump(&store, "ok. fine.");
        let outcome = engine(&store)
            .process_dump(&dump.id, &dump.basket_id, &dump.workspace_id, None)
            .unwrap();
        assert_eq!(outcome.proposals_created, 0);
        assert_eq!(outcome.substrate_changes(), 0);
    }

    #[test]
    fn test_approve_then_reject_rules() {
        let store = store(GovernanceFlags::default());
        let dump = dump(&store, TEXT);
        let engine = engine(&store);
        let outcome = engine
            .process_dump(&dump.id, &dump.basket_id, &dump.workspace_id, None)
            .unwrap();
        let id = outcome.proposal_id.unwrap();

        let approved = engine.approve_proposal(&id, &dump.workspace_id, "alex").unwrap();
        assert!(approved.executed);
        assert!(!store.list_substrate(&dump.basket_id, &[]).unwrap().is_empty());

        let err = engine
            .reject_proposal(&id, &dump.workspace_id, "alex", "too late")
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_reject_is_terminal() {
        let store = store(GovernanceFlags::default());
        let dump = dump(&store, TEXT);
        let engine = engine(&store);
        let id = engine
            .process_dump(&dump.id, &dump.basket_id, &dump.workspace_id, None)
            .unwrap()
            .proposal_id
            .unwrap();

        engine
            .reject_proposal(&id, &dump.workspace_id, "alex", "noise")
            .unwrap();
        let proposal = store.get_proposal(&id, &dump.workspace_id).unwrap().unwrap();
        assert_eq!(proposal.status, ProposalStatus::Rejected);
        assert_eq!(proposal.review_notes.as_deref(), Some("noise"));
        assert!(engine.approve_proposal(&id, &dump.workspace_id, "alex").is_err());
    }

    #[test]
    fn test_failed_execution_reverts_and_retry_resumes() {
        let store = store(GovernanceFlags::default());
        let engine = engine(&store);
        let missing = crate::models::SubstrateId::new("not-yet");
        let proposal = Proposal::new(
            BasketId::new("b1"),
            WorkspaceId::new("w1"),
            Vec::new(),
            vec![
                Operation::CreateBlock {
                    title: "first".to_string(),
                    content: "first block".to_string(),
                    semantic_type: crate::models::SemanticType::Fact,
                    confidence: 0.8,
                    anchor_role: None,
                },
                Operation::ReviseBlock {
                    block_id: missing.clone(),
                    content: "revised".to_string(),
                    confidence: None,
                },
            ],
            ValidatorReport::default(),
        );
        store.create_proposal(&proposal).unwrap();

        let err = engine
            .approve_proposal(&proposal.id, &proposal.workspace_id, "alex")
            .unwrap_err();
        assert!(matches!(err, Error::Execution { .. }));

        let reverted = store
            .get_proposal(&proposal.id, &proposal.workspace_id)
            .unwrap()
            .unwrap();
        assert_eq!(reverted.status, ProposalStatus::Proposed);
        assert!(!reverted.is_executed);
        assert!(reverted.review_notes.unwrap().contains("ReviseBlock"));
        assert_eq!(store.list_substrate(&proposal.basket_id, &[]).unwrap().len(), 1);

        store
            .insert_substrate(&crate::models::SubstrateUnit {
                id: missing,
                ..crate::models::SubstrateUnit::new(
                    BasketId::new("b1"),
                    WorkspaceId::new("w1"),
                    crate::models::SubstrateKind::Block,
                    crate::models::SemanticType::Fact,
                    "late",
                    "late block",
                )
            })
            .unwrap();

        let retried = engine
            .retry_execution(&proposal.id, &proposal.workspace_id)
            .unwrap();
        assert!(retried.executed);
        assert_eq!(retried.summary.blocks_created, 1);
        assert_eq!(retried.summary.updates, 1);
        assert_eq!(store.list_substrate(&proposal.basket_id, &[]).unwrap().len(), 2);
    }

    #[test]
    fn test_batch_creates_one_proposal() {
        let store = store(GovernanceFlags::auto_approving());
        let a = dump(&store, "Our API is vulnerable to spam attacks.");
        let b = dump(&store, "We should implement rate limiting.");
        let engine = engine(&store);
        let outcome = engine
            .process_batch_dumps(
                &[a.id.clone(), b.id.clone()],
                &a.basket_id,
                &a.workspace_id,
                None,
            )
            .unwrap();
        assert_eq!(outcome.proposals_created, 1);

        let proposals = store.list_proposals(&a.basket_id, None).unwrap();
        assert_eq!(proposals.len(), 1);
        assert!(proposals[0].references_dump(&a.id));
        assert!(proposals[0].references_dump(&b.id));

        let again = engine.process_dump(&b.id, &b.basket_id, &b.workspace_id, None).unwrap();
        assert_eq!(again.proposals_created, 0);
    }
}
