//! Async worker loop against a shared `SQLite` database.

// Integration tests use expect/unwrap for simplicity - panics are acceptable in tests
#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;
use substrate_pipeline::models::{EntryPointPolicy, GovernanceFlags};
use substrate_pipeline::observability::global_event_bus;
use substrate_pipeline::storage::{
    BlockBackend, GraphBackend, ProposalBackend, QueueBackend, TimelineBackend,
};
use substrate_pipeline::{
    BasketId, PipelineConfig, PipelineServices, ProposalStatus, SqliteStore, SubstrateStore,
    WorkspaceId,
};
use tempfile::TempDir;
use tokio::sync::watch;
use test_case::test_case;

fn sqlite_services(dir: &TempDir, flags: GovernanceFlags) -> (Arc<SqliteStore>, PipelineServices) {
    let store = Arc::new(SqliteStore::new(dir.path().join("pipeline.db")).unwrap());
    store
        .set_governance_flags(&WorkspaceId::new("ws"), flags)
        .unwrap();
    let mut config = PipelineConfig::default();
    config.worker.poll_interval_ms = 10;
    let shared: Arc<dyn SubstrateStore> = store.clone();
    (store, PipelineServices::new(shared, None, config))
}

fn hybrid() -> GovernanceFlags {
    GovernanceFlags {
        ep_graph_action: EntryPointPolicy::Hybrid,
        ..GovernanceFlags::default()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_worker_processes_ingested_dump_until_shutdown() {
    let dir = TempDir::new().unwrap();
    let (store, services) = sqlite_services(&dir, hybrid());
    let basket = BasketId::new("worker-loop-basket");
    let watched = basket.clone();
    let mut committed = global_event_bus().subscribe_filtered(move |event| {
        event.basket_id == watched && event.event_type() == "substrate.committed"
    });

    let worker = Arc::new(services.orchestrator().with_worker_id("loop-worker"));
    let (tx, rx) = watch::channel(false);
    let handle = tokio::spawn(Arc::clone(&worker).run(rx));

    services
        .ingest(
            &basket,
            &WorkspaceId::new("ws"),
            "Our API is vulnerable to spam attacks. We should implement rate limiting.",
        )
        .unwrap();

    let event = tokio::time::timeout(Duration::from_secs(10), committed.recv())
        .await
        .expect("commit event within timeout")
        .unwrap();
    assert_eq!(event.basket_id, basket);

    // Let the cascade settle before stopping.
    for _ in 0..200 {
        let stats = store.queue_stats().unwrap();
        if stats.pending == 0 && stats.processing == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    tx.send(true).unwrap();
    let summary = tokio::time::timeout(Duration::from_secs(10), handle)
        .await
        .unwrap()
        .unwrap();

    assert!(summary.completed >= 2);
    assert_eq!(summary.failed, 0);
    assert_eq!(store.list_substrate(&basket, &[]).unwrap().len(), 2);
    assert!(!store.list_relationships(&basket).unwrap().is_empty());
    let events = store.list_events(&basket, 50).unwrap();
    assert!(events.iter().any(|e| e.event_type() == "relationships.mapped"));
}

#[tokio::test]
async fn test_worker_exits_when_sender_dropped() {
    let dir = TempDir::new().unwrap();
    let (_store, services) = sqlite_services(&dir, GovernanceFlags::default());
    let worker = Arc::new(services.orchestrator());
    let (tx, rx) = watch::channel(false);
    let handle = tokio::spawn(worker.run(rx));

    drop(tx);
    let summary = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(summary.claimed, 0);
}

#[test]
fn test_state_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let basket = BasketId::new("reopen-basket");
    {
        let (_store, services) = sqlite_services(&dir, GovernanceFlags::default());
        services
            .ingest(&basket, &WorkspaceId::new("ws"), "Release is blocked by a failing migration.")
            .unwrap();
        services.orchestrator().drain(5);
    }

    let reopened = SqliteStore::new(dir.path().join("pipeline.db")).unwrap();
    let proposals = reopened.list_proposals(&basket, Some(ProposalStatus::Proposed)).unwrap();
    assert_eq!(proposals.len(), 1);
    assert_eq!(reopened.queue_stats().unwrap().completed, 1);
}

#[test_case(true, false, EntryPointPolicy::Hybrid, EntryPointPolicy::ProposalOnly => true; "manual edit hybrid")]
#[test_case(true, false, EntryPointPolicy::ProposalOnly, EntryPointPolicy::Direct => true; "graph action direct")]
#[test_case(true, false, EntryPointPolicy::ProposalOnly, EntryPointPolicy::ProposalOnly => false; "proposal only")]
#[test_case(true, true, EntryPointPolicy::Direct, EntryPointPolicy::Direct => false; "validator required")]
#[test_case(false, false, EntryPointPolicy::Direct, EntryPointPolicy::Direct => false; "governance disabled")]
fn test_sqlite_policy_gates_execution(
    governance_enabled: bool,
    validator_required: bool,
    ep_manual_edit: EntryPointPolicy,
    ep_graph_action: EntryPointPolicy,
) -> bool {
    let dir = TempDir::new().unwrap();
    let flags = GovernanceFlags {
        governance_enabled,
        validator_required,
        ep_manual_edit,
        ep_graph_action,
    };
    let (_store, services) = sqlite_services(&dir, flags);
    let basket = BasketId::new("policy-basket");
    let (dump_id, _) = services
        .ingest(&basket, &WorkspaceId::new("ws"), "Revenue grew 40% in March.")
        .unwrap();
    services
        .governance()
        .process_dump(&dump_id, &basket, &WorkspaceId::new("ws"), None)
        .unwrap()
        .executed
}
