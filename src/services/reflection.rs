//! P3 reflection over a bounded basket window.
//!
//! The engine never writes substrate. It reads the most recent dumps, the
//! substrate derived from them and the relationships touching that
//! substrate, then stores one [`ReflectionArtifact`] per distinct window.

use crate::config::{PipelineConfig, ReflectionConfig};
use crate::llm::{DraftClaim, LlmProvider, ReflectionDraft};
use crate::models::{
    AnchorRole, BasketId, BasketSignature, RawDump, ReflectionArtifact, ReflectionCategory,
    ReflectionEntry, ReflectionId, Relationship, SemanticType, SubstrateState, SubstrateUnit,
    TimelineEventKind, WorkId, WorkspaceId,
};
use crate::services::cascade::{CascadeContext, CascadeTrigger, StageOutcome};
use crate::services::text;
use crate::services::timeline::TimelineEmitter;
use crate::storage::SubstrateStore;
use crate::{Error, Result, current_timestamp};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Instant;
use tracing::instrument;

/// Word pairs whose co-occurrence in a window suggests a tension.
const TENSION_PAIRS: &[(&str, &str)] = &[
    ("fast", "slow"),
    ("increase", "decrease"),
    ("simple", "complex"),
    ("cost", "quality"),
    ("speed", "security"),
    ("growth", "stability"),
    ("build", "buy"),
    ("short-term", "long-term"),
];

/// Forward-looking language.
const TRAJECTORY_MARKERS: &[&str] = &[
    "will ", "plan to", "going to", "next quarter", "roadmap", "by q", "upcoming", "intend",
];

/// The window a reflection is computed over.
#[derive(Debug, Clone, Default)]
pub struct ReflectionWindow {
    /// Recent dumps, newest first.
    pub dumps: Vec<RawDump>,
    /// Substrate derived from those dumps.
    pub substrate: Vec<SubstrateUnit>,
    /// Relationships touching that substrate.
    pub relationships: Vec<Relationship>,
}

impl ReflectionWindow {
    /// Ids that may be cited as evidence: substrate first, then dumps.
    #[must_use]
    pub fn known_ids(&self) -> Vec<String> {
        self.substrate
            .iter()
            .map(|u| u.id.to_string())
            .chain(self.dumps.iter().map(|d| d.id.to_string()))
            .collect()
    }

    /// Stable idempotency key: sorted contributing ids plus a hash of the
    /// window content.
    #[must_use]
    pub fn substrate_hash(&self) -> String {
        let mut ids = self.known_ids();
        ids.sort_unstable();

        let mut content = Sha256::new();
        let mut dumps: Vec<&RawDump> = self.dumps.iter().collect();
        dumps.sort_by(|a, b| a.id.cmp(&b.id));
        for dump in dumps {
            content.update(dump.text.as_bytes());
            content.update([0]);
        }
        let mut units: Vec<&SubstrateUnit> = self.substrate.iter().collect();
        units.sort_by(|a, b| a.id.cmp(&b.id));
        for unit in units {
            content.update(unit.analyzable_text().as_bytes());
            content.update([0]);
        }
        let mut edges: Vec<String> = self
            .relationships
            .iter()
            .map(|r| format!("{}>{}>{}", r.from, r.relationship_type, r.to))
            .collect();
        edges.sort_unstable();
        for edge in edges {
            content.update(edge.as_bytes());
            content.update([0]);
        }

        let mut key = Sha256::new();
        key.update(ids.join(",").as_bytes());
        key.update(content.finalize());
        hex::encode(key.finalize())
    }

    /// Compact digest for the narrative prompt, bounded in items and
    /// characters per item.
    #[must_use]
    pub fn digest(&self, config: &ReflectionConfig) -> String {
        let mut lines: Vec<String> = Vec::new();
        for dump in &self.dumps {
            lines.push(format!(
                "[{}] dump: {}",
                dump.id,
                text::truncate(&dump.text, config.snippet_chars)
            ));
        }
        for unit in &self.substrate {
            let anchor = unit
                .anchor_role
                .map_or(String::new(), |role| format!(", anchor {}", role.as_str()));
            lines.push(format!(
                "[{}] {}{anchor}: {} | {}",
                unit.id,
                unit.semantic_type,
                text::truncate(&unit.title, config.snippet_chars),
                text::truncate(&unit.content, config.snippet_chars)
            ));
        }
        for edge in &self.relationships {
            lines.push(format!(
                "edge {} -{}-> {} ({:.2})",
                edge.from.id, edge.relationship_type, edge.to.id, edge.strength
            ));
        }
        lines.truncate(config.max_digest_items);
        lines.join("\n")
    }

    fn is_empty(&self) -> bool {
        self.dumps.is_empty()
    }
}

/// Result of one reflection run.
#[derive(Debug, Clone, PartialEq)]
pub struct ReflectionOutcome {
    /// The stored artifact.
    pub artifact: ReflectionArtifact,
    /// Whether a new artifact row was inserted.
    pub created: bool,
}

/// Computes read-only reflections for a basket.
pub struct ReflectionEngine {
    store: Arc<dyn SubstrateStore>,
    llm: Option<Arc<dyn LlmProvider>>,
    config: ReflectionConfig,
    update_signatures: bool,
    timeline: TimelineEmitter,
    cascade: Option<CascadeTrigger>,
}

impl ReflectionEngine {
    /// Creates an engine; `None` for `llm` always uses the heuristic path.
    #[must_use]
    pub fn new(
        store: Arc<dyn SubstrateStore>,
        llm: Option<Arc<dyn LlmProvider>>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            timeline: TimelineEmitter::new(Arc::clone(&store), "reflection"),
            store,
            llm,
            config: config.reflection,
            update_signatures: config.features.basket_signatures,
            cascade: None,
        }
    }

    /// Sets the cascade trigger. Reflection is terminal; the trigger only
    /// records that the chain ended.
    #[must_use]
    pub fn with_cascade(mut self, cascade: CascadeTrigger) -> Self {
        self.cascade = Some(cascade);
        self
    }

    /// Replaces the timeline emitter.
    #[must_use]
    pub fn with_timeline(mut self, timeline: TimelineEmitter) -> Self {
        self.timeline = timeline;
        self
    }

    /// Loads the text and graph window of a basket.
    ///
    /// # Errors
    ///
    /// Returns storage errors.
    pub fn load_window(
        &self,
        basket_id: &BasketId,
        workspace_id: &WorkspaceId,
    ) -> Result<ReflectionWindow> {
        let since = self
            .config
            .recency_hours
            .map(|hours| current_timestamp().saturating_sub(hours * 3600));
        let dumps: Vec<RawDump> = self
            .store
            .list_recent_dumps(basket_id, since, self.config.max_dumps)?
            .into_iter()
            .filter(|d| &d.workspace_id == workspace_id)
            .collect();

        let substrate: Vec<SubstrateUnit> = self
            .store
            .list_substrate(basket_id, &[SubstrateState::Rejected, SubstrateState::Merged])?
            .into_iter()
            .filter(|u| &u.workspace_id == workspace_id)
            .filter(|u| dumps.iter().any(|d| u.derived_from(&d.id)))
            .collect();

        let node_ids: HashSet<&str> = substrate
            .iter()
            .map(|u| u.id.as_str())
            .chain(dumps.iter().map(|d| d.id.as_str()))
            .collect();
        let relationships = self
            .store
            .list_relationships(basket_id)?
            .into_iter()
            .filter(|r| node_ids.contains(r.from.id.as_str()) || node_ids.contains(r.to.id.as_str()))
            .collect();

        Ok(ReflectionWindow {
            dumps,
            substrate,
            relationships,
        })
    }

    /// Computes and stores the reflection for the basket's current window.
    ///
    /// An unchanged window maps to the same artifact row.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidInput`] if the basket has no dumps in the window.
    /// - Storage errors.
    #[instrument(skip(self), fields(operation = "reflection.compute", basket_id = %basket_id))]
    pub fn compute_reflection(
        &self,
        basket_id: &BasketId,
        workspace_id: &WorkspaceId,
        work_id: Option<&WorkId>,
    ) -> Result<ReflectionOutcome> {
        let start = Instant::now();
        let result = (|| {
            let window = self.load_window(basket_id, workspace_id)?;
            if window.is_empty() {
                return Err(Error::InvalidInput(format!(
                    "basket {basket_id} has no dumps to reflect on"
                )));
            }

            let (entries, used_fallback) = self.entries_for(&window);
            let artifact = build_artifact(basket_id, workspace_id, &window, entries, used_fallback);
            let created = self.store.upsert_reflection(&artifact)?;
            tracing::info!(
                basket_id = %basket_id,
                dumps = window.dumps.len(),
                substrate = window.substrate.len(),
                relationships = window.relationships.len(),
                entries = artifact.entries.len(),
                used_fallback = used_fallback,
                created = created,
                "Reflection computed"
            );

            if self.update_signatures {
                self.update_signature(&window, &artifact);
            }
            Ok(ReflectionOutcome { artifact, created })
        })();

        let status = if result.is_ok() { "success" } else { "error" };
        metrics::counter!("reflection_runs_total", "status" => status).increment(1);
        metrics::histogram!("reflection_duration_ms").record(start.elapsed().as_secs_f64() * 1000.0);

        let outcome = result?;
        self.timeline.emit(
            basket_id,
            workspace_id,
            TimelineEventKind::ReflectionComputed {
                substrate_hash: outcome.artifact.substrate_hash.clone(),
                used_fallback: outcome.artifact.used_fallback,
            },
            Some("reflection"),
        );
        if let Some(cascade) = &self.cascade {
            cascade.trigger_next_stage(
                &CascadeContext::new(basket_id.clone(), workspace_id.clone()).with_work_id(work_id),
                &StageOutcome::Reflection,
            );
        }
        Ok(outcome)
    }

    /// Returns the entries and whether the heuristic path produced them.
    fn entries_for(&self, window: &ReflectionWindow) -> (Vec<ReflectionEntry>, bool) {
        let known = window.known_ids();
        if let Some(llm) = &self.llm {
            let digest = window.digest(&self.config);
            match llm.generate_reflection(&digest) {
                Ok(draft) => {
                    let entries = entries_from_draft(draft, &known, self.config.max_entries);
                    if !entries.is_empty() {
                        return (entries, false);
                    }
                    tracing::warn!("Reflection draft was empty, using heuristic reflection");
                },
                Err(e) => {
                    tracing::warn!(error = %e, "Reflection generation failed, using heuristic reflection");
                },
            }
            metrics::counter!("reflection_fallbacks_total").increment(1);
        }
        (heuristic_entries(window, self.config.max_entries), true)
    }

    fn update_signature(&self, window: &ReflectionWindow, artifact: &ReflectionArtifact) {
        let corpus: String = window
            .substrate
            .iter()
            .map(SubstrateUnit::analyzable_text)
            .chain(window.dumps.iter().map(|d| d.text.clone()))
            .collect::<Vec<_>>()
            .join(" ");

        let mut roles: BTreeMap<AnchorRole, usize> = BTreeMap::new();
        for role in window.substrate.iter().filter_map(|u| u.anchor_role) {
            *roles.entry(role).or_default() += 1;
        }
        let mut ranked: Vec<(AnchorRole, usize)> = roles.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1));

        let signature = BasketSignature {
            basket_id: artifact.basket_id.clone(),
            workspace_id: artifact.workspace_id.clone(),
            keywords: text::keywords(&corpus, 12),
            anchor_roles: ranked.into_iter().take(4).map(|(role, _)| role).collect(),
            substrate_count: window.substrate.len(),
            source_hash: artifact.substrate_hash.clone(),
            updated_at: current_timestamp(),
        };
        if let Err(e) = self.store.upsert_signature(&signature) {
            metrics::counter!("basket_signature_failures_total").increment(1);
            tracing::warn!(basket_id = %signature.basket_id, error = %e, "Failed to update basket signature");
        }
    }
}

impl std::fmt::Debug for ReflectionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReflectionEngine")
            .field("config", &self.config)
            .field("llm", &self.llm.as_ref().map(|l| l.name()))
            .field("update_signatures", &self.update_signatures)
            .finish_non_exhaustive()
    }
}

fn build_artifact(
    basket_id: &BasketId,
    workspace_id: &WorkspaceId,
    window: &ReflectionWindow,
    entries: Vec<ReflectionEntry>,
    used_fallback: bool,
) -> ReflectionArtifact {
    let start = window.dumps.iter().map(|d| d.created_at).min().unwrap_or(0);
    let end = window.dumps.iter().map(|d| d.created_at).max().unwrap_or(0);
    ReflectionArtifact {
        id: ReflectionId::generate(),
        basket_id: basket_id.clone(),
        workspace_id: workspace_id.clone(),
        reflection_text: render(&entries),
        reflection_target_type: "basket".to_string(),
        substrate_window_start: start,
        substrate_window_end: end,
        substrate_hash: window.substrate_hash(),
        entries,
        used_fallback,
        computed_at: current_timestamp(),
    }
}

fn render(entries: &[ReflectionEntry]) -> String {
    let mut out = String::new();
    for entry in entries {
        let _ = writeln!(
            out,
            "{}: {} [{}]",
            entry.category.as_str(),
            entry.text,
            entry.evidence_ids.join(", ")
        );
    }
    out.trim_end().to_string()
}

/// Restricts evidence to known ids; an entry left uncited cites the first
/// known id instead.
fn cite(claim: DraftClaim, category: ReflectionCategory, known: &[String]) -> Option<ReflectionEntry> {
    let text = claim.text.trim().to_string();
    if text.is_empty() {
        return None;
    }
    let mut evidence_ids: Vec<String> = claim
        .evidence_ids
        .into_iter()
        .filter(|id| known.contains(id))
        .collect();
    evidence_ids.dedup();
    if evidence_ids.is_empty() {
        evidence_ids.extend(known.first().cloned());
    }
    Some(ReflectionEntry {
        category,
        text,
        evidence_ids,
    })
}

/// Converts a narrative draft into at most `max_entries` cited entries.
///
/// The summary comes first, then categories are interleaved so that a cap
/// keeps breadth rather than the first category's full list.
fn entries_from_draft(
    draft: ReflectionDraft,
    known: &[String],
    max_entries: usize,
) -> Vec<ReflectionEntry> {
    let mut entries = Vec::new();
    if let Some(summary) = cite(
        DraftClaim {
            text: draft.summary,
            evidence_ids: Vec::new(),
        },
        ReflectionCategory::Summary,
        known,
    ) {
        entries.push(summary);
    }

    let mut columns: Vec<std::vec::IntoIter<ReflectionEntry>> = [
        (ReflectionCategory::Pattern, draft.patterns),
        (ReflectionCategory::Tension, draft.tensions),
        (ReflectionCategory::Opportunity, draft.opportunities),
        (ReflectionCategory::Question, draft.questions),
        (ReflectionCategory::Recommendation, draft.recommendations),
    ]
    .into_iter()
    .map(|(category, claims)| {
        claims
            .into_iter()
            .filter_map(|c| cite(c, category, known))
            .collect::<Vec<_>>()
            .into_iter()
    })
    .collect();

    loop {
        let before = entries.len();
        for column in &mut columns {
            if let Some(entry) = column.next() {
                entries.push(entry);
            }
        }
        if entries.len() == before {
            break;
        }
    }
    entries.truncate(max_entries);
    entries
}

/// Statistical reflection used when no narrative is available.
fn heuristic_entries(window: &ReflectionWindow, max_entries: usize) -> Vec<ReflectionEntry> {
    let known = window.known_ids();
    let first = || known.first().cloned().into_iter().collect::<Vec<_>>();
    let corpus: String = window
        .dumps
        .iter()
        .map(|d| d.text.to_lowercase())
        .chain(window.substrate.iter().map(|u| u.analyzable_text().to_lowercase()))
        .collect::<Vec<_>>()
        .join("\n");

    let mut entries = Vec::new();
    let themes = text::keywords(&corpus, 3);
    let mut summary = format!(
        "{} recent dumps produced {} substrate units and {} relationships",
        window.dumps.len(),
        window.substrate.len(),
        window.relationships.len()
    );
    if !themes.is_empty() {
        let _ = write!(summary, "; dominant themes: {}", themes.join(", "));
    }
    entries.push(ReflectionEntry {
        category: ReflectionCategory::Summary,
        text: summary,
        evidence_ids: first(),
    });

    // Pattern density: the most frequent semantic type.
    let mut by_type: BTreeMap<SemanticType, Vec<String>> = BTreeMap::new();
    for unit in &window.substrate {
        by_type
            .entry(unit.semantic_type)
            .or_default()
            .push(unit.id.to_string());
    }
    if let Some((semantic_type, ids)) = by_type
        .iter()
        .filter(|(_, ids)| ids.len() >= 2)
        .max_by_key(|(_, ids)| ids.len())
    {
        entries.push(ReflectionEntry {
            category: ReflectionCategory::Pattern,
            text: format!("{} {semantic_type} items recur in this window", ids.len()),
            evidence_ids: ids.clone(),
        });
    }

    for (left, right) in TENSION_PAIRS {
        if corpus.contains(left) && corpus.contains(right) {
            let evidence: Vec<String> = window
                .dumps
                .iter()
                .filter(|d| {
                    let lower = d.text.to_lowercase();
                    lower.contains(left) || lower.contains(right)
                })
                .map(|d| d.id.to_string())
                .collect();
            entries.push(ReflectionEntry {
                category: ReflectionCategory::Tension,
                text: format!("Both '{left}' and '{right}' come up; the trade-off may need a decision"),
                evidence_ids: if evidence.is_empty() { first() } else { evidence },
            });
            break;
        }
    }

    let forward: Vec<String> = window
        .dumps
        .iter()
        .filter(|d| text::contains_any(&d.text.to_lowercase(), TRAJECTORY_MARKERS))
        .map(|d| d.id.to_string())
        .collect();
    if !forward.is_empty() {
        entries.push(ReflectionEntry {
            category: ReflectionCategory::Opportunity,
            text: format!("{} dumps describe planned or upcoming work", forward.len()),
            evidence_ids: forward,
        });
    }

    // Gaps: problems with no edge to anything, questions left open.
    let linked: HashSet<&str> = window
        .relationships
        .iter()
        .flat_map(|r| [r.from.id.as_str(), r.to.id.as_str()])
        .collect();
    for unit in &window.substrate {
        match unit.semantic_type {
            SemanticType::Problem if !linked.contains(unit.id.as_str()) => {
                entries.push(ReflectionEntry {
                    category: ReflectionCategory::Gap,
                    text: format!("'{}' has no linked response yet", unit.title),
                    evidence_ids: vec![unit.id.to_string()],
                });
            },
            SemanticType::Question => entries.push(ReflectionEntry {
                category: ReflectionCategory::Question,
                text: unit.title.clone(),
                evidence_ids: vec![unit.id.to_string()],
            }),
            _ => {},
        }
    }

    entries.truncate(max_entries);
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DumpId, Provenance, SubstrateKind};
    use crate::storage::{BlockBackend, DumpBackend, InMemoryStore, ReflectionBackend};

    struct DraftLlm(Result<ReflectionDraft>);

    impl LlmProvider for DraftLlm {
        fn name(&self) -> &'static str {
            "draft"
        }
        fn complete(&self, _prompt: &str) -> Result<String> {
            Err(Error::operation("complete", "unused"))
        }
        fn generate_reflection(&self, _digest: &str) -> Result<ReflectionDraft> {
            match &self.0 {
                Ok(draft) => Ok(draft.clone()),
                Err(e) => Err(Error::operation("reflect", e)),
            }
        }
    }

    fn seeded_store() -> (Arc<InMemoryStore>, DumpId) {
        let store = Arc::new(InMemoryStore::new());
        let dump = RawDump::new(
            BasketId::new("b1"),
            WorkspaceId::new("w1"),
            "Our API is vulnerable to spam attacks. We will plan to add rate limiting.",
        );
        store.insert_dump(&dump).unwrap();
        let unit = SubstrateUnit::new(
            BasketId::new("b1"),
            WorkspaceId::new("w1"),
            SubstrateKind::Block,
            SemanticType::Problem,
            "API is vulnerable to spam",
            "Our API is vulnerable to spam attacks.",
        )
        .with_state(SubstrateState::Accepted)
        .with_provenance(Provenance {
            dump_ids: vec![dump.id.clone()],
            method: "test".to_string(),
            confidence: 0.7,
        });
        store.insert_substrate(&unit).unwrap();
        (store, dump.id)
    }

    fn engine(store: &Arc<InMemoryStore>, llm: Option<Arc<dyn LlmProvider>>) -> ReflectionEngine {
        ReflectionEngine::new(store.clone(), llm, &PipelineConfig::default())
    }

    #[test]
    fn test_rerun_on_same_window_keeps_one_artifact() {
        let (store, _) = seeded_store();
        let engine = engine(&store, None);
        let first = engine
            .compute_reflection(&BasketId::new("b1"), &WorkspaceId::new("w1"), None)
            .unwrap();
        let second = engine
            .compute_reflection(&BasketId::new("b1"), &WorkspaceId::new("w1"), None)
            .unwrap();

        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.artifact.substrate_hash, second.artifact.substrate_hash);
        assert_eq!(store.list_reflections(&BasketId::new("b1")).unwrap().len(), 1);
    }

    #[test]
    fn test_new_dump_changes_hash() {
        let (store, _) = seeded_store();
        let engine = engine(&store, None);
        let first = engine
            .compute_reflection(&BasketId::new("b1"), &WorkspaceId::new("w1"), None)
            .unwrap();
        store
            .insert_dump(&RawDump::new(
                BasketId::new("b1"),
                WorkspaceId::new("w1"),
                "Customers complain that onboarding is slow.",
            ))
            .unwrap();
        let second = engine
            .compute_reflection(&BasketId::new("b1"), &WorkspaceId::new("w1"), None)
            .unwrap();
        assert_ne!(first.artifact.substrate_hash, second.artifact.substrate_hash);
        assert_eq!(store.list_reflections(&BasketId::new("b1")).unwrap().len(), 2);
    }

    #[test]
    fn test_signature_follows_reflection_when_enabled() {
        let (store, _) = seeded_store();
        let mut config = PipelineConfig::default();
        config.features.basket_signatures = true;
        let outcome = ReflectionEngine::new(store.clone(), None, &config)
            .compute_reflection(&BasketId::new("b1"), &WorkspaceId::new("w1"), None)
            .unwrap();

        let signature = store.get_signature(&BasketId::new("b1")).unwrap().unwrap();
        assert_eq!(signature.substrate_count, 1);
        assert_eq!(signature.source_hash, outcome.artifact.substrate_hash);
        assert!(signature.keywords.iter().any(|k| k == "spam"));
    }

    #[test]
    fn test_empty_basket_is_an_error() {
        let store = Arc::new(InMemoryStore::new());
        let err = engine(&store, None)
            .compute_reflection(&BasketId::new("empty"), &WorkspaceId::new("w1"), None)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_heuristic_reflection_flags_gap_and_trajectory() {
        let (store, _) = seeded_store();
        let outcome = engine(&store, None)
            .compute_reflection(&BasketId::new("b1"), &WorkspaceId::new("w1"), None)
            .unwrap();
        let artifact = outcome.artifact;
        assert!(artifact.used_fallback);
        let categories: Vec<ReflectionCategory> = artifact.entries.iter().map(|e| e.category).collect();
        assert_eq!(categories[0], ReflectionCategory::Summary);
        assert!(categories.contains(&ReflectionCategory::Gap));
        assert!(categories.contains(&ReflectionCategory::Opportunity));
        assert!(artifact.entries.iter().all(|e| !e.evidence_ids.is_empty()));
    }

    #[test]
    fn test_draft_evidence_is_restricted_to_window() {
        let (store, dump_id) = seeded_store();
        let draft = ReflectionDraft {
            summary: "Spam risk dominates".to_string(),
            patterns: vec![DraftClaim {
                text: "Security keeps coming up".to_string(),
                evidence_ids: vec!["ghost".to_string(), dump_id.to_string()],
            }],
            tensions: vec![DraftClaim {
                text: "Only invented citations".to_string(),
                evidence_ids: vec!["ghost".to_string()],
            }],
            ..ReflectionDraft::default()
        };
        let llm: Arc<dyn LlmProvider> = Arc::new(DraftLlm(Ok(draft)));
        let outcome = engine(&store, Some(llm))
            .compute_reflection(&BasketId::new("b1"), &WorkspaceId::new("w1"), None)
            .unwrap();
        let artifact = outcome.artifact;

        assert!(!artifact.used_fallback);
        assert_eq!(artifact.entries.len(), 3);
        assert_eq!(artifact.entries[1].evidence_ids, vec![dump_id.to_string()]);
        let unit_id = store.list_substrate(&BasketId::new("b1"), &[]).unwrap()[0].id.to_string();
        assert_eq!(artifact.entries[2].evidence_ids, vec![unit_id]);
    }

    #[test]
    fn test_llm_failure_falls_back() {
        let (store, _) = seeded_store();
        let llm: Arc<dyn LlmProvider> =
            Arc::new(DraftLlm(Err(Error::operation("reflect", "timeout"))));
        let outcome = engine(&store, Some(llm))
            .compute_reflection(&BasketId::new("b1"), &WorkspaceId::new("w1"), None)
            .unwrap();
        assert!(outcome.artifact.used_fallback);
        assert!(!outcome.artifact.entries.is_empty());
    }

    #[test]
    fn test_entries_capped_with_breadth() {
        let claims = |n: usize| {
            (0..n)
                .map(|i| DraftClaim {
                    text: format!("claim {i}"),
                    evidence_ids: vec!["a".to_string()],
                })
                .collect::<Vec<_>>()
        };
        let draft = ReflectionDraft {
            summary: "s".to_string(),
            patterns: claims(5),
            tensions: claims(1),
            recommendations: claims(2),
            ..ReflectionDraft::default()
        };
        let entries = entries_from_draft(draft, &["a".to_string()], 6);
        assert_eq!(entries.len(), 6);
        let categories: HashSet<ReflectionCategory> = entries.iter().map(|e| e.category).collect();
        assert!(categories.contains(&ReflectionCategory::Tension));
        assert!(categories.contains(&ReflectionCategory::Recommendation));
    }
}
