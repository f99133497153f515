//! Shared fixtures for integration tests.

#![allow(dead_code, clippy::unwrap_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use substrate_pipeline::llm::CandidateSelection;
use substrate_pipeline::models::{EntryPointPolicy, GovernanceFlags, SemanticType, SubstrateKind};
use substrate_pipeline::{
    BasketId, Error, InMemoryStore, LlmProvider, PipelineConfig, PipelineServices, Result,
    SubstrateState, SubstrateStore, SubstrateUnit, WorkspaceId,
};

/// LLM double whose every call fails, counting how often it was asked to
/// score candidates.
#[derive(Default)]
pub struct ScriptedLlm {
    pub score_calls: AtomicUsize,
}

impl ScriptedLlm {
    pub fn score_calls(&self) -> usize {
        self.score_calls.load(Ordering::SeqCst)
    }
}

impl LlmProvider for ScriptedLlm {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn complete(&self, _prompt: &str) -> Result<String> {
        Err(Error::operation("complete", "connection refused"))
    }

    fn score_candidates(
        &self,
        _intent: &str,
        _themes: &[String],
        _candidates: &str,
    ) -> Result<CandidateSelection> {
        self.score_calls.fetch_add(1, Ordering::SeqCst);
        Err(Error::operation("score_candidates", "network unreachable"))
    }
}

pub fn basket() -> BasketId {
    BasketId::new("basket-1")
}

pub fn workspace() -> WorkspaceId {
    WorkspaceId::new("workspace-1")
}

/// Flags under which proposals are approved and executed automatically.
pub fn auto_approve_flags() -> GovernanceFlags {
    GovernanceFlags {
        ep_manual_edit: EntryPointPolicy::Hybrid,
        ..GovernanceFlags::default()
    }
}

pub fn memory_store(flags: GovernanceFlags) -> Arc<InMemoryStore> {
    let store = InMemoryStore::new();
    store.set_governance_flags(&workspace(), flags).unwrap();
    Arc::new(store)
}

pub fn services(store: &Arc<InMemoryStore>, llm: Option<Arc<dyn LlmProvider>>) -> PipelineServices {
    let shared: Arc<dyn SubstrateStore> = store.clone();
    PipelineServices::new(shared, llm, PipelineConfig::default())
}

/// Inserts an accepted block.
pub fn accepted_block(
    store: &dyn SubstrateStore,
    semantic_type: SemanticType,
    title: &str,
    content: &str,
    confidence: f32,
) -> SubstrateUnit {
    let unit = SubstrateUnit::new(
        basket(),
        workspace(),
        SubstrateKind::Block,
        semantic_type,
        title,
        content,
    )
    .with_confidence(confidence)
    .with_state(SubstrateState::Accepted);
    store.insert_substrate(&unit).unwrap();
    unit
}
