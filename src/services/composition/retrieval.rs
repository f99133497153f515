//! Budgeted substrate retrieval and coverage gap filling.

use super::intent::IntentAnalysis;
use crate::Result;
use crate::config::{CompositionConfig, FeatureFlags};
use crate::models::{
    BasketId, RawDump, SECONDS_PER_DAY, SemanticType, SubstrateId, SubstrateKind, SubstrateState,
    SubstrateUnit, WorkspaceId,
};
use crate::services::governance::extraction::classify_segment;
use crate::services::text;
use crate::storage::SubstrateStore;
use std::collections::{BTreeMap, HashSet};

/// Half-life-like constant of the freshness decay, in days.
const FRESHNESS_DECAY_DAYS: f64 = 30.0;

/// Freshness of an item `age_days` old: `exp(-age/30)`.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn freshness(age_days: f64) -> f32 {
    (-age_days.max(0.0) / FRESHNESS_DECAY_DAYS).exp() as f32
}

/// A retrievable unit with its composition scores.
#[derive(Debug, Clone, PartialEq)]
pub struct CompositionCandidate {
    /// Substrate or dump id.
    pub id: SubstrateId,
    /// Node kind; raw dumps use [`SubstrateKind::Dump`].
    pub kind: SubstrateKind,
    /// Semantic type.
    pub semantic_type: SemanticType,
    /// Title.
    pub title: String,
    /// Body.
    pub content: String,
    /// Extraction confidence.
    pub confidence: f32,
    /// Creation timestamp.
    pub created_at: u64,
    /// Freshness in `(0, 1]`.
    pub freshness: f32,
    /// Whether the unit traces back to a dump.
    pub has_provenance: bool,
    /// Whether the caller pinned it.
    pub pinned: bool,
}

impl CompositionCandidate {
    fn from_unit(unit: &SubstrateUnit, now: u64, pinned: bool) -> Self {
        Self {
            id: unit.id.clone(),
            kind: unit.kind,
            semantic_type: unit.semantic_type,
            title: unit.title.clone(),
            content: unit.content.clone(),
            confidence: unit.confidence_score,
            created_at: unit.created_at,
            freshness: freshness(unit.age_days(now)),
            has_provenance: !unit.provenance.dump_ids.is_empty(),
            pinned,
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn from_dump(dump: &RawDump, now: u64) -> Self {
        let age_days = now.saturating_sub(dump.created_at) as f64 / SECONDS_PER_DAY;
        Self {
            id: SubstrateId::new(dump.id.as_str()),
            kind: SubstrateKind::Dump,
            semantic_type: SemanticType::Quote,
            title: text::truncate(&dump.text, 60),
            content: dump.text.clone(),
            confidence: 0.5,
            created_at: dump.created_at,
            freshness: freshness(age_days),
            has_provenance: true,
            pinned: false,
        }
    }
}

/// Retrieval limits for one composition.
#[derive(Debug, Clone, Copy)]
pub struct RetrievalBudget {
    /// Only items newer than this many days, unless pinned.
    pub recency_days: u64,
    /// Maximum items per semantic type.
    pub per_type_cap: usize,
    /// Whether raw dumps are retrieved directly.
    pub include_raw_dumps: bool,
}

impl RetrievalBudget {
    /// Budget for a request. Raw dumps are only retrieved when the request
    /// asks for them and the feature flags allow direct raw retrieval.
    #[must_use]
    pub fn for_request(
        analysis: &IntentAnalysis,
        config: &CompositionConfig,
        features: &FeatureFlags,
        window_days: Option<u32>,
    ) -> Self {
        Self {
            recency_days: window_days.map_or(config.recency_days, u64::from),
            per_type_cap: config.per_type_cap,
            include_raw_dumps: analysis.wants_raw_dumps && features.direct_raw_retrieval(),
        }
    }

    fn cutoff(&self, now: u64) -> u64 {
        now.saturating_sub(self.recency_days.saturating_mul(86_400))
    }
}

/// Retrieves settled substrate under the budget.
///
/// Priority types from the analysis come first. Within each type, items are
/// ordered by confidence then recency and capped. Pinned units bypass the
/// recency cutoff and the caps.
///
/// # Errors
///
/// Returns storage errors.
pub fn retrieve(
    store: &dyn SubstrateStore,
    basket_id: &BasketId,
    workspace_id: &WorkspaceId,
    analysis: &IntentAnalysis,
    budget: &RetrievalBudget,
    pinned: &[SubstrateId],
    now: u64,
) -> Result<Vec<CompositionCandidate>> {
    let cutoff = budget.cutoff(now);
    let pinned: HashSet<&SubstrateId> = pinned.iter().collect();

    let mut by_type: BTreeMap<SemanticType, Vec<CompositionCandidate>> = BTreeMap::new();
    let mut result: Vec<CompositionCandidate> = Vec::new();
    for unit in store.list_substrate(basket_id, &[SubstrateState::Rejected, SubstrateState::Merged])? {
        if &unit.workspace_id != workspace_id || !unit.state.is_settled() {
            continue;
        }
        if pinned.contains(&unit.id) {
            result.push(CompositionCandidate::from_unit(&unit, now, true));
        } else if unit.created_at >= cutoff {
            by_type
                .entry(unit.semantic_type)
                .or_default()
                .push(CompositionCandidate::from_unit(&unit, now, false));
        }
    }

    let rank = |t: &SemanticType| {
        analysis
            .priorities
            .iter()
            .position(|p| p == t)
            .unwrap_or(usize::MAX)
    };
    let mut groups: Vec<(SemanticType, Vec<CompositionCandidate>)> = by_type.into_iter().collect();
    groups.sort_by_key(|(t, _)| rank(t));
    for (_, mut items) in groups {
        items.sort_by(|a, b| {
            b.confidence
                .total_cmp(&a.confidence)
                .then_with(|| b.created_at.cmp(&a.created_at))
        });
        items.truncate(budget.per_type_cap);
        result.extend(items);
    }

    if budget.include_raw_dumps {
        result.extend(
            store
                .list_recent_dumps(basket_id, Some(cutoff), budget.per_type_cap)?
                .iter()
                .filter(|d| &d.workspace_id == workspace_id)
                .map(|d| CompositionCandidate::from_dump(d, now)),
        );
    }
    Ok(result)
}

/// Share of `priorities` present among `covered` types.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn coverage(priorities: &[SemanticType], covered: &HashSet<SemanticType>) -> f32 {
    if priorities.is_empty() {
        return 1.0;
    }
    let hits = priorities.iter().filter(|t| covered.contains(t)).count();
    hits as f32 / priorities.len() as f32
}

/// A raw dump excerpt added to close a coverage gap.
#[derive(Debug, Clone, PartialEq)]
pub struct GapSnippet {
    /// Source dump id.
    pub dump_id: String,
    /// Excerpt text.
    pub text: String,
    /// Why the snippet was pulled.
    pub reason: String,
}

/// Outcome of gap filling.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GapFill {
    /// Snippets added.
    pub snippets: Vec<GapSnippet>,
    /// Coverage after filling.
    pub coverage: f32,
}

/// Pulls a bounded number of raw dump snippets when selected coverage is
/// below `config.coverage_target`.
///
/// Only dumps of `workspace_id` are used. Snippets are capped by count and
/// by estimated tokens. A missing type counts as covered afterwards when a
/// snippet classifies as that type.
///
/// # Errors
///
/// Returns storage errors.
pub fn gap_fill(
    store: &dyn SubstrateStore,
    basket_id: &BasketId,
    workspace_id: &WorkspaceId,
    priorities: &[SemanticType],
    selected_types: &HashSet<SemanticType>,
    config: &CompositionConfig,
    cutoff: u64,
) -> Result<GapFill> {
    let before = coverage(priorities, selected_types);
    if before >= config.coverage_target {
        return Ok(GapFill {
            snippets: Vec::new(),
            coverage: before,
        });
    }
    let missing: Vec<SemanticType> = priorities
        .iter()
        .copied()
        .filter(|t| !selected_types.contains(t))
        .collect();
    let reason = format!(
        "gap_fill: missing {}",
        missing
            .iter()
            .map(SemanticType::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    );

    let per_snippet_chars = (config.gap_fill_token_cap * 4)
        .checked_div(config.gap_fill_max_snippets)
        .unwrap_or(0);
    let mut tokens_left = config.gap_fill_token_cap;
    let mut covered = selected_types.clone();
    let mut snippets = Vec::new();
    let dumps = store
        .list_recent_dumps(basket_id, Some(cutoff), config.gap_fill_max_snippets)?
        .into_iter()
        .filter(|d| &d.workspace_id == workspace_id);
    for dump in dumps {
        if snippets.len() >= config.gap_fill_max_snippets || tokens_left == 0 {
            break;
        }
        let excerpt = text::truncate(&dump.text, per_snippet_chars.min(tokens_left * 4));
        let cost = text::estimate_tokens(&excerpt);
        if excerpt.is_empty() || cost > tokens_left {
            continue;
        }
        tokens_left -= cost;
        let (semantic_type, _) = classify_segment(&excerpt);
        if missing.contains(&semantic_type) {
            covered.insert(semantic_type);
        }
        snippets.push(GapSnippet {
            dump_id: dump.id.to_string(),
            text: excerpt,
            reason: reason.clone(),
        });
    }
    Ok(GapFill {
        coverage: coverage(priorities, &covered),
        snippets,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::composition::intent::analyze_intent;
    use crate::storage::{BlockBackend, DumpBackend, InMemoryStore};

    const DAY: u64 = 86_400;

    fn unit(semantic_type: SemanticType, confidence: f32, created_at: u64) -> SubstrateUnit {
        SubstrateUnit::new(
            BasketId::new("b1"),
            WorkspaceId::new("w1"),
            SubstrateKind::Block,
            semantic_type,
            format!("{semantic_type} {confidence}"),
            "content",
        )
        .with_confidence(confidence)
        .with_state(SubstrateState::Accepted)
        .with_created_at(created_at)
    }

    #[test]
    fn test_freshness_decay() {
        assert!((freshness(0.0) - 1.0).abs() < 1e-6);
        assert!((freshness(90.0) - 0.0498).abs() < 1e-3);
        assert!(freshness(30.0) < freshness(1.0));
    }

    #[test]
    fn test_recency_cutoff_and_pins() {
        let now = 200 * DAY;
        let store = InMemoryStore::new();
        let fresh = unit(SemanticType::Insight, 0.7, now - DAY);
        let stale = unit(SemanticType::Insight, 0.9, now - 120 * DAY);
        let pinned_stale = unit(SemanticType::Fact, 0.4, now - 150 * DAY);
        for u in [&fresh, &stale, &pinned_stale] {
            store.insert_substrate(u).unwrap();
        }
        let analysis = analyze_intent("summarize the basket");
        let budget = RetrievalBudget::for_request(
            &analysis,
            &CompositionConfig::default(),
            &FeatureFlags::core(),
            None,
        );
        let found = retrieve(
            &store,
            &BasketId::new("b1"),
            &WorkspaceId::new("w1"),
            &analysis,
            &budget,
            &[pinned_stale.id.clone()],
            now,
        )
        .unwrap();
        let ids: Vec<&SubstrateId> = found.iter().map(|c| &c.id).collect();
        assert!(ids.contains(&&fresh.id));
        assert!(ids.contains(&&pinned_stale.id));
        assert!(!ids.contains(&&stale.id));
        assert!(found.iter().all(|c| c.kind != SubstrateKind::Dump));
    }

    #[test]
    fn test_per_type_cap_keeps_most_confident() {
        let now = 10 * DAY;
        let store = InMemoryStore::new();
        for i in 0..5u8 {
            store
                .insert_substrate(&unit(SemanticType::Fact, f32::from(i) / 10.0, now))
                .unwrap();
        }
        let analysis = analyze_intent("summarize");
        let budget = RetrievalBudget {
            recency_days: 90,
            per_type_cap: 2,
            include_raw_dumps: false,
        };
        let found = retrieve(
            &store,
            &BasketId::new("b1"),
            &WorkspaceId::new("w1"),
            &analysis,
            &budget,
            &[],
            now,
        )
        .unwrap();
        assert_eq!(found.len(), 2);
        assert!((found[0].confidence - 0.4).abs() < 1e-6);
    }

    #[test]
    fn test_raw_dumps_need_request_and_flag() {
        let analysis = analyze_intent("overview with raw quotes");
        let config = CompositionConfig::default();
        assert!(!RetrievalBudget::for_request(&analysis, &config, &FeatureFlags::core(), None).include_raw_dumps);
        assert!(RetrievalBudget::for_request(&analysis, &config, &FeatureFlags::all(), None).include_raw_dumps);
        let plain = analyze_intent("overview");
        assert!(!RetrievalBudget::for_request(&plain, &config, &FeatureFlags::all(), None).include_raw_dumps);
    }

    #[test]
    fn test_gap_fill_is_bounded() {
        let store = InMemoryStore::new();
        for text in [
            "We should implement caching to solve the latency problem.",
            "The goal is to reach 99.9% uptime by Q4.",
            "Another long note about unrelated matters that keeps going.",
            "A fourth dump that should not be used.",
        ] {
            store
                .insert_dump(&RawDump::new(BasketId::new("b1"), WorkspaceId::new("w1"), text))
                .unwrap();
        }
        let priorities = [SemanticType::Goal, SemanticType::Solution];
        let config = CompositionConfig::default();
        let fill = gap_fill(
            &store,
            &BasketId::new("b1"),
            &WorkspaceId::new("w1"),
            &priorities,
            &HashSet::new(),
            &config,
            0,
        )
        .unwrap();

        assert!(fill.snippets.len() <= config.gap_fill_max_snippets);
        let tokens: usize = fill.snippets.iter().map(|s| text::estimate_tokens(&s.text)).sum();
        assert!(tokens <= config.gap_fill_token_cap);
        assert!(fill.snippets.iter().all(|s| s.reason.starts_with("gap_fill")));
        assert!(fill.coverage > 0.0);
    }

    #[test]
    fn test_gap_fill_skips_other_workspaces() {
        let store = InMemoryStore::new();
        let foreign = RawDump::new(
            BasketId::new("b1"),
            WorkspaceId::new("w2"),
            "The goal is to migrate billing to the new ledger.",
        );
        store.insert_dump(&foreign).unwrap();
        let own = RawDump::new(
            BasketId::new("b1"),
            WorkspaceId::new("w1"),
            "We should implement caching to solve the latency problem.",
        );
        store.insert_dump(&own).unwrap();

        let fill = gap_fill(
            &store,
            &BasketId::new("b1"),
            &WorkspaceId::new("w1"),
            &[SemanticType::Goal, SemanticType::Solution],
            &HashSet::new(),
            &CompositionConfig::default(),
            0,
        )
        .unwrap();

        assert!(!fill.snippets.is_empty());
        assert!(fill.snippets.iter().all(|s| s.dump_id == own.id.to_string()));
    }

    #[test]
    fn test_no_gap_fill_when_covered() {
        let store = InMemoryStore::new();
        let covered: HashSet<SemanticType> = [SemanticType::Goal].into_iter().collect();
        let fill = gap_fill(
            &store,
            &BasketId::new("b1"),
            &WorkspaceId::new("w1"),
            &[SemanticType::Goal],
            &covered,
            &CompositionConfig::default(),
            0,
        )
        .unwrap();
        assert!(fill.snippets.is_empty());
        assert!((fill.coverage - 1.0).abs() < f32::EPSILON);
    }
}
