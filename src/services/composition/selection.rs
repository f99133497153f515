//! Candidate selection with a mandatory heuristic fallback.

use super::intent::IntentAnalysis;
use super::retrieval::CompositionCandidate;
use crate::llm::LlmProvider;
use crate::services::text;
use std::collections::HashSet;

/// Upper bound on items kept from the scoring step.
pub const MAX_SELECTED: usize = 15;

/// Candidates rendered into the scoring prompt.
const MAX_SCORED_CANDIDATES: usize = 60;

/// One selected candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectedItem {
    /// The candidate.
    pub candidate: CompositionCandidate,
    /// Relevance in `[0, 1]`.
    pub score: f32,
    /// Sub-theme grouping from the scoring step.
    pub theme: Option<String>,
}

/// Result of selection.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Selection {
    /// Selected items, best first.
    pub items: Vec<SelectedItem>,
    /// Whether the heuristic replaced the scoring step.
    pub used_fallback: bool,
}

/// Renders candidates one per line for the scoring prompt.
#[must_use]
pub fn render_candidates(candidates: &[CompositionCandidate]) -> String {
    candidates
        .iter()
        .take(MAX_SCORED_CANDIDATES)
        .map(|c| {
            format!(
                "{} | {} | {:.2} | {} | {}",
                c.id,
                c.semantic_type,
                c.confidence,
                c.title,
                text::truncate(&c.content, 160)
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Deterministic selection: by confidence, then recency, top `count`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn heuristic_selection(candidates: &[CompositionCandidate], count: usize) -> Vec<SelectedItem> {
    let mut sorted: Vec<&CompositionCandidate> = candidates.iter().collect();
    sorted.sort_by(|a, b| {
        b.confidence
            .total_cmp(&a.confidence)
            .then_with(|| b.created_at.cmp(&a.created_at))
    });
    sorted
        .into_iter()
        .take(count)
        .map(|c| SelectedItem {
            candidate: c.clone(),
            score: c.confidence,
            theme: None,
        })
        .collect()
}

/// Selects candidates for composition.
///
/// The scoring step is trusted only when it names at least one known
/// candidate; a transport error, malformed output or an empty selection
/// engages the heuristic. Pinned candidates are always kept.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn select(
    llm: Option<&dyn LlmProvider>,
    intent: &str,
    analysis: &IntentAnalysis,
    candidates: &[CompositionCandidate],
    fallback_count: usize,
) -> Selection {
    if candidates.is_empty() {
        return Selection::default();
    }

    let scored = llm.and_then(|llm| {
        match llm.score_candidates(intent, &analysis.themes, &render_candidates(candidates)) {
            Ok(selection) => {
                let mut seen = HashSet::new();
                let total = selection.selected.len().max(1) as f32;
                let items: Vec<SelectedItem> = selection
                    .selected
                    .into_iter()
                    .filter(|s| seen.insert(s.id.clone()))
                    .filter_map(|s| {
                        let candidate = candidates.iter().find(|c| c.id.as_str() == s.id)?;
                        Some((candidate.clone(), s.relevance, s.theme))
                    })
                    .take(MAX_SELECTED)
                    .enumerate()
                    .map(|(rank, (candidate, relevance, theme))| SelectedItem {
                        candidate,
                        score: relevance.unwrap_or(1.0 - rank as f32 / total).clamp(0.0, 1.0),
                        theme,
                    })
                    .collect();
                if items.is_empty() {
                    tracing::warn!("Scoring selected no known candidates, using heuristic selection");
                    None
                } else {
                    Some(items)
                }
            },
            Err(e) => {
                tracing::warn!(error = %e, "Candidate scoring failed, using heuristic selection");
                None
            },
        }
    });

    let (mut items, used_fallback) = match scored {
        Some(items) => (items, false),
        None => {
            metrics::counter!("composition_selection_fallbacks_total").increment(1);
            (heuristic_selection(candidates, fallback_count), true)
        },
    };

    let chosen: HashSet<_> = items.iter().map(|i| i.candidate.id.clone()).collect();
    let missing_pins: Vec<SelectedItem> = candidates
        .iter()
        .filter(|c| c.pinned && !chosen.contains(&c.id))
        .map(|c| SelectedItem {
            candidate: c.clone(),
            score: 1.0,
            theme: None,
        })
        .collect();
    items.splice(0..0, missing_pins);

    Selection {
        items,
        used_fallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{CandidateSelection, SelectedCandidate};
    use crate::models::{SemanticType, SubstrateId, SubstrateKind};
    use crate::services::composition::intent::analyze_intent;
    use crate::{Error, Result};
    use proptest::prelude::*;

    struct Scorer(Option<Vec<&'static str>>);

    impl LlmProvider for Scorer {
        fn name(&self) -> &'static str {
            "scorer"
        }
        fn complete(&self, _prompt: &str) -> Result<String> {
            Err(Error::operation("complete", "unused"))
        }
        fn score_candidates(&self, _: &str, _: &[String], _: &str) -> Result<CandidateSelection> {
            match &self.0 {
                Some(ids) => Ok(CandidateSelection {
                    selected: ids
                        .iter()
                        .map(|id| SelectedCandidate {
                            id: (*id).to_string(),
                            theme: Some("core".to_string()),
                            relevance: None,
                        })
                        .collect(),
                }),
                None => Err(Error::operation("score_candidates", "connection reset")),
            }
        }
    }

    fn candidate(id: &str, confidence: f32, created_at: u64) -> CompositionCandidate {
        CompositionCandidate {
            id: SubstrateId::new(id),
            kind: SubstrateKind::Block,
            semantic_type: SemanticType::Insight,
            title: id.to_string(),
            content: String::new(),
            confidence,
            created_at,
            freshness: 1.0,
            has_provenance: true,
            pinned: false,
        }
    }

    fn pool() -> Vec<CompositionCandidate> {
        vec![
            candidate("a", 0.5, 10),
            candidate("b", 0.9, 5),
            candidate("c", 0.9, 20),
            candidate("d", 0.2, 30),
        ]
    }

    #[test]
    fn test_scoring_error_falls_back_to_confidence_order() {
        let llm = Scorer(None);
        let selection = select(Some(&llm), "summarize", &analyze_intent("summarize"), &pool(), 2);
        assert!(selection.used_fallback);
        let ids: Vec<&str> = selection.items.iter().map(|i| i.candidate.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b"]);
    }

    #[test]
    fn test_unknown_ids_fall_back() {
        let llm = Scorer(Some(vec!["ghost", "phantom"]));
        let selection = select(Some(&llm), "summarize", &analyze_intent("summarize"), &pool(), 3);
        assert!(selection.used_fallback);
        assert_eq!(selection.items.len(), 3);
    }

    #[test]
    fn test_scored_selection_is_used_and_deduped() {
        let llm = Scorer(Some(vec!["d", "a", "d", "ghost"]));
        let selection = select(Some(&llm), "summarize", &analyze_intent("summarize"), &pool(), 3);
        assert!(!selection.used_fallback);
        let ids: Vec<&str> = selection.items.iter().map(|i| i.candidate.id.as_str()).collect();
        assert_eq!(ids, vec!["d", "a"]);
        assert_eq!(selection.items[0].theme.as_deref(), Some("core"));
        assert!(selection.items[0].score > selection.items[1].score);
    }

    #[test]
    fn test_pinned_always_included() {
        let mut candidates = pool();
        candidates[3].pinned = true;
        let selection = select(None, "summarize", &analyze_intent("summarize"), &candidates, 1);
        let ids: Vec<&str> = selection.items.iter().map(|i| i.candidate.id.as_str()).collect();
        assert_eq!(ids, vec!["d", "c"]);
    }

    proptest! {
        #[test]
        fn prop_fallback_keeps_best_candidate(
            confidences in proptest::collection::vec(0.0f32..1.0, 1..30),
            count in 1usize..12,
        ) {
            let candidates: Vec<CompositionCandidate> = confidences
                .iter()
                .enumerate()
                .map(|(i, c)| candidate(&format!("c{i}"), *c, i as u64))
                .collect();
            let selection = select(None, "x", &analyze_intent("x"), &candidates, count);
            prop_assert!(selection.used_fallback);
            prop_assert!(!selection.items.is_empty());
            let best = confidences.iter().copied().fold(f32::MIN, f32::max);
            prop_assert!((selection.items[0].candidate.confidence - best).abs() < f32::EPSILON);
        }
    }
}
