//! End-to-end pipeline scenarios.
//!
//! Each test drives the public API from ingestion (or a seeded basket)
//! through the worker and checks what landed in the store.

// Integration tests use expect/unwrap for simplicity - panics are acceptable in tests
#![allow(clippy::expect_used, clippy::unwrap_used)]

mod common;

use common::{ScriptedLlm, accepted_block, auto_approve_flags, basket, memory_store, services, workspace};
use std::sync::Arc;
use substrate_pipeline::models::{
    DocumentStatus, GovernanceFlags, Operation, QueueState, RelationshipType, ValidatorReport,
    WorkType,
};
use substrate_pipeline::services::ComposeRequest;
use substrate_pipeline::storage::{
    BlockBackend, DocumentBackend, GraphBackend, ProposalBackend, QueueBackend, ReflectionBackend,
};
use substrate_pipeline::{Error, LlmProvider, Proposal, ProposalStatus, SemanticType, WorkItem};

// ============================================================================
// Ingest → govern → map
// ============================================================================

#[test]
fn test_problem_and_solution_dump_links_blocks() {
    let store = memory_store(auto_approve_flags());
    let services = services(&store, None);
    services
        .ingest(
            &basket(),
            &workspace(),
            "Our API is vulnerable to spam attacks. We should implement rate limiting.",
        )
        .unwrap();

    let summary = services.orchestrator().drain(10);
    assert_eq!(summary.failed, 0);

    let proposals = store.list_proposals(&basket(), None).unwrap();
    assert_eq!(proposals.len(), 1);
    assert_eq!(proposals[0].status, ProposalStatus::Approved);
    assert!(proposals[0].is_executed);

    let units = store.list_substrate(&basket(), &[]).unwrap();
    let problem = units
        .iter()
        .find(|u| u.semantic_type == SemanticType::Problem)
        .expect("problem block");
    let solution = units
        .iter()
        .find(|u| u.semantic_type == SemanticType::Solution)
        .expect("solution block");

    let relationships = store.list_relationships(&basket()).unwrap();
    let link = relationships
        .iter()
        .find(|r| {
            matches!(
                r.relationship_type,
                RelationshipType::Addresses | RelationshipType::CausalRelationship
            ) && r.touches(&problem.id)
                && r.touches(&solution.id)
        })
        .expect("problem/solution edge");
    assert!(link.strength >= 0.6);
}

#[test]
fn test_default_flags_leave_proposal_for_review() {
    let store = memory_store(GovernanceFlags::default());
    let services = services(&store, None);
    services
        .ingest(&basket(), &workspace(), "The checkout page is slow on mobile.")
        .unwrap();

    services.orchestrator().drain(10);

    let proposals = store.list_proposals(&basket(), None).unwrap();
    assert_eq!(proposals[0].status, ProposalStatus::Proposed);
    assert!(store.list_substrate(&basket(), &[]).unwrap().is_empty());
    assert_eq!(store.queue_stats().unwrap().total(), 1);
}

// ============================================================================
// Proposal atomicity
// ============================================================================

#[test]
fn test_failing_operation_keeps_prefix_and_reverts() {
    let store = memory_store(GovernanceFlags::default());
    let services = services(&store, None);
    let proposal = Proposal::new(
        basket(),
        workspace(),
        Vec::new(),
        vec![
            Operation::CreateBlock {
                title: "Rate limits".to_string(),
                content: "Apply rate limits per API key.".to_string(),
                semantic_type: SemanticType::Solution,
                confidence: 0.8,
                anchor_role: None,
            },
            Operation::ReviseBlock {
                block_id: "missing-block".into(),
                content: "never applied".to_string(),
                confidence: None,
            },
            Operation::CreateBlock {
                title: "Captcha".to_string(),
                content: "Add a captcha to signup.".to_string(),
                semantic_type: SemanticType::Solution,
                confidence: 0.7,
                anchor_role: None,
            },
        ],
        ValidatorReport::default(),
    );
    store.create_proposal(&proposal).unwrap();

    let err = services
        .governance()
        .approve_proposal(&proposal.id, &workspace(), "reviewer-1")
        .unwrap_err();
    assert!(matches!(err, Error::Execution { .. }));

    let stored = store.get_proposal(&proposal.id, &workspace()).unwrap().unwrap();
    assert_eq!(stored.status, ProposalStatus::Proposed);
    assert!(!stored.is_executed);
    assert!(stored.review_notes.unwrap().contains("ReviseBlock"));

    let titles: Vec<String> = store
        .list_substrate(&basket(), &[])
        .unwrap()
        .into_iter()
        .map(|u| u.title)
        .collect();
    assert_eq!(titles, vec!["Rate limits".to_string()]);
}

// ============================================================================
// Reflection idempotence
// ============================================================================

#[test]
fn test_reflection_twice_over_same_window_stores_one_artifact() {
    let store = memory_store(auto_approve_flags());
    let services = services(&store, None);
    services
        .ingest(&basket(), &workspace(), "Churn rose after the pricing change. Users complain about cost.")
        .unwrap();
    services.orchestrator().drain(10);

    let reflection = services.reflection();
    let first = reflection.compute_reflection(&basket(), &workspace(), None).unwrap();
    let second = reflection.compute_reflection(&basket(), &workspace(), None).unwrap();
    assert_eq!(first.artifact.substrate_hash, second.artifact.substrate_hash);
    assert!(!second.created);

    let matching = store
        .list_reflections(&basket())
        .unwrap()
        .into_iter()
        .filter(|a| a.substrate_hash == first.artifact.substrate_hash)
        .count();
    assert_eq!(matching, 1);

    services
        .ingest(&basket(), &workspace(), "A new onboarding email reduced churn.")
        .unwrap();
    services.orchestrator().drain(10);
    let third = reflection.compute_reflection(&basket(), &workspace(), None).unwrap();
    assert_ne!(third.artifact.substrate_hash, first.artifact.substrate_hash);
}

// ============================================================================
// Composition fallback
// ============================================================================

#[test]
fn test_composition_survives_scoring_outage() {
    let store = memory_store(GovernanceFlags::default());
    let llm = Arc::new(ScriptedLlm::default());
    let provider: Arc<dyn LlmProvider> = llm.clone();
    let services = services(&store, Some(provider));

    let types = [
        SemanticType::Insight,
        SemanticType::Rationale,
        SemanticType::Solution,
        SemanticType::Problem,
        SemanticType::Constraint,
    ];
    let mut best = None;
    for i in 0..20u8 {
        let confidence = 0.5 + f32::from(i) / 50.0;
        let unit = accepted_block(
            store.as_ref(),
            types[usize::from(i) % types.len()],
            &format!("Architecture decision {i}"),
            &format!("We chose option {i} for the storage layer because it keeps writes simple."),
            confidence,
        );
        best = Some(unit.id);
    }

    let composition = services.composition();
    let placeholder = composition
        .create_placeholder(&basket(), &workspace(), None, "summarize architecture decisions")
        .unwrap();
    let request = ComposeRequest::new(
        placeholder.id,
        basket(),
        workspace(),
        "summarize architecture decisions",
    );
    let document = composition.compose(&request).unwrap();

    assert_eq!(llm.score_calls(), 1);
    assert_eq!(document.status, DocumentStatus::Composed);
    assert!(!document.content.trim().is_empty());
    assert!(!document.metadata.sections.is_empty());
    assert!(document.metadata.used_fallback_selection);

    let references = store.list_references(&document.id).unwrap();
    let best = best.unwrap();
    assert!(references.iter().any(|r| r.substrate_id == best));
}

#[test]
fn test_queued_composition_on_empty_basket_fails_document() {
    let store = memory_store(GovernanceFlags::default());
    let services = services(&store, None);
    let entry_id = services
        .request_composition(&basket(), &workspace(), "weekly status report", None, None, Vec::new())
        .unwrap();

    let summary = services.orchestrator().run_once();
    assert_eq!(summary.failed, 1);
    let entry = services.queue().get(&entry_id).unwrap().unwrap();
    assert_eq!(entry.status, QueueState::Failed);
}

// ============================================================================
// Auto-approval gating
// ============================================================================

#[test]
fn test_validator_required_blocks_auto_approval_despite_confidence() {
    let store = memory_store(GovernanceFlags {
        validator_required: true,
        ..auto_approve_flags()
    });
    let services = services(&store, None);
    let (dump_id, _) = services
        .ingest(&basket(), &workspace(), "Revenue grew 40% in March.")
        .unwrap();

    let outcome = services
        .governance()
        .process_dump(&dump_id, &basket(), &workspace(), None)
        .unwrap();
    assert!(outcome.operations_count >= 1);
    assert_eq!(outcome.status, Some(ProposalStatus::Proposed));
    assert!(!outcome.executed);
}

// ============================================================================
// Cascade gating
// ============================================================================

#[test]
fn test_cascade_stops_when_nothing_changes() {
    let store = memory_store(auto_approve_flags());
    let services = services(&store, None);
    services
        .ingest(&basket(), &workspace(), "Our API is vulnerable to spam attacks.")
        .unwrap();
    services.orchestrator().drain(10);
    let entries_before = store.queue_stats().unwrap().total();
    let relationships_before = store.list_relationships(&basket()).unwrap().len();

    services
        .ingest(&basket(), &workspace(), "Our API is vulnerable to spam attacks.")
        .unwrap();
    services.orchestrator().drain(10);

    // Only the new extraction entry: a repeat dump changes nothing downstream.
    assert_eq!(store.queue_stats().unwrap().total(), entries_before + 1);
    assert_eq!(store.list_relationships(&basket()).unwrap().len(), relationships_before);
}

#[test]
fn test_cascade_enqueues_graph_work_after_execution() {
    let store = memory_store(auto_approve_flags());
    let services = services(&store, None);
    let (dump_id, _) = services
        .ingest(
            &basket(),
            &workspace(),
            "Our API is vulnerable to spam attacks. We should implement rate limiting.",
        )
        .unwrap();

    let outcome = services
        .governance()
        .process_dump(&dump_id, &basket(), &workspace(), None)
        .unwrap();
    assert!(outcome.executed);

    let pending = store
        .claim("inspector", 10, 0, &[WorkType::P2Graph], substrate_pipeline::current_timestamp())
        .unwrap();
    assert_eq!(pending.len(), 1);
    assert!(matches!(pending[0].work, WorkItem::Graph { ref substrate_ids } if substrate_ids.len() == 2));
}
