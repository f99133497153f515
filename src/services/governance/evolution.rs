//! Evolution decisions: whether a candidate creates, revises or merges
//! substrate.

use super::extraction::{BlockCandidate, Candidate, ContextCandidate};
use crate::config::GovernanceConfig;
use crate::models::{Operation, SubstrateId, SubstrateKind, SubstrateUnit};
use crate::services::text;
use std::collections::HashSet;

/// Outcome of comparing one candidate against existing substrate.
#[derive(Debug, Clone, PartialEq)]
pub enum EvolutionDecision {
    /// No similar unit exists.
    Create,
    /// A similar unit exists with less information; revise it.
    Update {
        /// Unit to revise.
        target: SubstrateId,
    },
    /// The candidate matches several existing context items which are
    /// near-duplicates of each other.
    Merge {
        /// Surviving item.
        canonical: SubstrateId,
        /// Items folded into the canonical one.
        duplicates: Vec<SubstrateId>,
    },
    /// Already represented; nothing to do.
    Skip,
}

/// Compares candidates with existing substrate and turns them into
/// operations.
#[derive(Debug, Clone, Copy)]
pub struct EvolutionPlanner {
    similarity_threshold: f32,
    update_length_ratio: f32,
}

impl EvolutionPlanner {
    /// Creates a planner from governance settings.
    #[must_use]
    pub const fn new(config: &GovernanceConfig) -> Self {
        Self {
            similarity_threshold: config.similarity_threshold,
            update_length_ratio: config.update_length_ratio,
        }
    }

    /// Decides how a block candidate evolves `existing`.
    ///
    /// A block is similar when the Jaccard overlap of word sets exceeds the
    /// threshold; it revises the match only when it is substantially longer.
    #[must_use]
    pub fn decide_block(
        &self,
        candidate: &BlockCandidate,
        existing: &[SubstrateUnit],
    ) -> EvolutionDecision {
        let words = text::word_set(&candidate.content, 0);
        let best = existing
            .iter()
            .filter(|unit| unit.kind == SubstrateKind::Block)
            .map(|unit| (unit, text::jaccard(&words, &text::word_set(&unit.content, 0))))
            .filter(|(_, overlap)| *overlap > self.similarity_threshold)
            .max_by(|a, b| a.1.total_cmp(&b.1));

        let Some((unit, _)) = best else {
            return EvolutionDecision::Create;
        };

        #[allow(clippy::cast_precision_loss)]
        let longer = candidate.content.chars().count() as f32
            > unit.content.chars().count() as f32 * self.update_length_ratio;
        if longer {
            EvolutionDecision::Update {
                target: unit.id.clone(),
            }
        } else {
            EvolutionDecision::Skip
        }
    }

    /// Decides how a context candidate evolves `existing`.
    ///
    /// Items match on normalized label equality, whole-word containment in
    /// either direction, or a stored synonym.
    #[must_use]
    pub fn decide_context(
        &self,
        candidate: &ContextCandidate,
        existing: &[SubstrateUnit],
    ) -> EvolutionDecision {
        let mut matches: Vec<&SubstrateUnit> = existing
            .iter()
            .filter(|unit| unit.kind == SubstrateKind::ContextItem)
            .filter(|unit| labels_match(&candidate.label, unit))
            .collect();

        match matches.len() {
            0 => EvolutionDecision::Create,
            1 => {
                let unit = matches[0];
                if new_synonyms(candidate, unit).is_empty()
                    && (candidate.semantic_meaning.is_empty() || !unit.content.is_empty())
                {
                    EvolutionDecision::Skip
                } else {
                    EvolutionDecision::Update {
                        target: unit.id.clone(),
                    }
                }
            },
            _ => {
                matches.sort_by(|a, b| {
                    b.confidence_score
                        .total_cmp(&a.confidence_score)
                        .then_with(|| a.created_at.cmp(&b.created_at))
                        .then_with(|| a.id.as_str().cmp(b.id.as_str()))
                });
                EvolutionDecision::Merge {
                    canonical: matches[0].id.clone(),
                    duplicates: matches[1..].iter().map(|u| u.id.clone()).collect(),
                }
            },
        }
    }

    /// Plans operations for every candidate.
    ///
    /// Block candidates are also compared against blocks created earlier in
    /// the same plan so a dump repeating itself yields one block.
    #[must_use]
    pub fn plan(&self, candidates: &[Candidate], existing: &[SubstrateUnit]) -> Vec<Operation> {
        let mut ops = Vec::new();
        let mut planned_blocks: Vec<HashSet<String>> = Vec::new();

        for candidate in candidates {
            match candidate {
                Candidate::Block(block) => {
                    let words = text::word_set(&block.content, 0);
                    if planned_blocks
                        .iter()
                        .any(|seen| text::jaccard(seen, &words) > self.similarity_threshold)
                    {
                        continue;
                    }
                    match self.decide_block(block, existing) {
                        EvolutionDecision::Create => {
                            planned_blocks.push(words);
                            ops.push(Operation::CreateBlock {
                                title: block.title.clone(),
                                content: block.content.clone(),
                                semantic_type: block.semantic_type,
                                confidence: block.confidence,
                                anchor_role: block.anchor_role,
                            });
                        },
                        EvolutionDecision::Update { target } => {
                            planned_blocks.push(words);
                            ops.push(Operation::ReviseBlock {
                                block_id: target,
                                content: block.content.clone(),
                                confidence: Some(block.confidence),
                            });
                        },
                        EvolutionDecision::Merge { .. } | EvolutionDecision::Skip => {},
                    }
                },
                Candidate::Context(item) => match self.decide_context(item, existing) {
                    EvolutionDecision::Create => ops.push(Operation::CreateContextItem {
                        label: item.label.clone(),
                        kind: item.kind,
                        semantic_meaning: item.semantic_meaning.clone(),
                        synonyms: item.synonyms.clone(),
                        confidence: item.confidence,
                    }),
                    EvolutionDecision::Update { target } => {
                        let add_synonyms = existing
                            .iter()
                            .find(|u| u.id == target)
                            .map(|unit| new_synonyms(item, unit))
                            .unwrap_or_default();
                        let needs_meaning = existing
                            .iter()
                            .any(|u| u.id == target && u.content.is_empty());
                        ops.push(Operation::UpdateContextItem {
                            context_item_id: target,
                            add_synonyms,
                            semantic_meaning: (needs_meaning && !item.semantic_meaning.is_empty())
                                .then(|| item.semantic_meaning.clone()),
                            confidence: Some(item.confidence),
                        });
                    },
                    EvolutionDecision::Merge {
                        canonical,
                        duplicates,
                    } => {
                        let merged_synonyms = merged_synonyms(item, &canonical, &duplicates, existing);
                        ops.push(Operation::MergeContextItems {
                            from_ids: duplicates,
                            canonical_id: canonical,
                            merged_synonyms,
                        });
                    },
                    EvolutionDecision::Skip => {},
                },
            }
        }
        ops
    }
}

fn labels_match(label: &str, unit: &SubstrateUnit) -> bool {
    let candidate = text::normalize_label(label);
    let existing = text::normalize_label(&unit.title);
    if candidate.is_empty() || existing.is_empty() {
        return false;
    }
    candidate == existing
        || contains_phrase(&existing, &candidate)
        || contains_phrase(&candidate, &existing)
        || unit
            .synonyms
            .iter()
            .any(|s| text::normalize_label(s) == candidate)
}

/// Whole-word phrase containment.
fn contains_phrase(haystack: &str, needle: &str) -> bool {
    format!(" {haystack} ").contains(&format!(" {needle} "))
}

/// Labels the candidate knows that the unit does not.
fn new_synonyms(candidate: &ContextCandidate, unit: &SubstrateUnit) -> Vec<String> {
    let mut known: HashSet<String> = unit
        .synonyms
        .iter()
        .map(|s| text::normalize_label(s))
        .collect();
    known.insert(text::normalize_label(&unit.title));

    std::iter::once(&candidate.label)
        .chain(candidate.synonyms.iter())
        .filter(|s| known.insert(text::normalize_label(s)))
        .cloned()
        .collect()
}

fn merged_synonyms(
    candidate: &ContextCandidate,
    canonical: &SubstrateId,
    duplicates: &[SubstrateId],
    existing: &[SubstrateUnit],
) -> Vec<String> {
    let canonical_label = existing
        .iter()
        .find(|u| &u.id == canonical)
        .map(|u| text::normalize_label(&u.title))
        .unwrap_or_default();
    let mut seen = HashSet::from([canonical_label]);

    let duplicate_labels = existing
        .iter()
        .filter(|u| duplicates.contains(&u.id))
        .flat_map(|u| std::iter::once(&u.title).chain(u.synonyms.iter()));

    duplicate_labels
        .chain(std::iter::once(&candidate.label))
        .chain(candidate.synonyms.iter())
        .filter(|s| seen.insert(text::normalize_label(s)))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BasketId, SemanticType, WorkspaceId};

    fn planner() -> EvolutionPlanner {
        EvolutionPlanner::new(&GovernanceConfig::default())
    }

    fn block(content: &str) -> SubstrateUnit {
        SubstrateUnit::new(
            BasketId::new("b1"),
            WorkspaceId::new("w1"),
            SubstrateKind::Block,
            SemanticType::Fact,
            "existing",
            content,
        )
    }

    fn context_item(label: &str, synonyms: &[&str], confidence: f32) -> SubstrateUnit {
        let mut unit = SubstrateUnit::new(
            BasketId::new("b1"),
            WorkspaceId::new("w1"),
            SubstrateKind::ContextItem,
            SemanticType::Organization,
            label,
            "known entity",
        )
        .with_confidence(confidence);
        unit.synonyms = synonyms.iter().map(ToString::to_string).collect();
        unit
    }

    fn block_candidate(content: &str) -> BlockCandidate {
        BlockCandidate {
            title: "candidate".to_string(),
            content: content.to_string(),
            semantic_type: SemanticType::Fact,
            confidence: 0.7,
            anchor_role: None,
        }
    }

    fn context_candidate(label: &str) -> ContextCandidate {
        ContextCandidate {
            label: label.to_string(),
            kind: SemanticType::Organization,
            semantic_meaning: String::new(),
            synonyms: Vec::new(),
            confidence: 0.6,
        }
    }

    #[test]
    fn test_longer_overlapping_block_revises() {
        let existing = block("rate limiting protects the public api");
        let candidate = block_candidate(
            "rate limiting protects the public api api api rate limiting protects the public api",
        );
        assert_eq!(
            planner().decide_block(&candidate, std::slice::from_ref(&existing)),
            EvolutionDecision::Update {
                target: existing.id.clone()
            }
        );
    }

    #[test]
    fn test_overlapping_block_not_longer_is_skipped() {
        let existing = block("rate limiting protects the public api");
        let candidate = block_candidate("rate limiting protects the public api");
        assert_eq!(
            planner().decide_block(&candidate, &[existing]),
            EvolutionDecision::Skip
        );
    }

    #[test]
    fn test_low_overlap_block_creates() {
        let existing = block("rate limiting protects the public api");
        let candidate = block_candidate(
            "customers asked for invoices in euros and quarterly billing cycles with discounts",
        );
        assert_eq!(
            planner().decide_block(&candidate, &[existing]),
            EvolutionDecision::Create
        );
    }

    #[test]
    fn test_context_label_matching() {
        let acme = context_item("Acme Corp", &["ACME"], 0.8);
        assert!(labels_match("acme corp", &acme));
        assert!(labels_match("Acme", &acme));
        assert!(labels_match("The Acme Corp Group", &acme));
        assert!(labels_match("acme", &acme));
        assert!(!labels_match("Acmeco", &acme));
    }

    #[test]
    fn test_context_update_adds_synonym() {
        let acme = context_item("Acme Corp", &[], 0.8);
        let decision = planner().decide_context(&context_candidate("Acme"), std::slice::from_ref(&acme));
        assert_eq!(decision, EvolutionDecision::Update { target: acme.id.clone() });

        let ops = planner().plan(&[Candidate::Context(context_candidate("Acme"))], &[acme]);
        match &ops[0] {
            Operation::UpdateContextItem { add_synonyms, .. } => {
                assert_eq!(add_synonyms, &vec!["Acme".to_string()]);
            },
            other => unreachable!("unexpected op {other:?}"),
        }
    }

    #[test]
    fn test_context_exact_match_skips() {
        let acme = context_item("Acme Corp", &[], 0.8);
        assert_eq!(
            planner().decide_context(&context_candidate("ACME corp"), &[acme]),
            EvolutionDecision::Skip
        );
    }

    #[test]
    fn test_context_multiple_matches_merge() {
        let strong = context_item("Acme Corp", &[], 0.9);
        let weak = context_item("Acme", &["Acme Inc"], 0.4);
        let ops = planner().plan(
            &[Candidate::Context(context_candidate("Acme"))],
            &[weak.clone(), strong.clone()],
        );
        assert_eq!(
            ops,
            vec![Operation::MergeContextItems {
                from_ids: vec![weak.id],
                canonical_id: strong.id,
                merged_synonyms: vec!["Acme".to_string(), "Acme Inc".to_string()],
            }]
        );
    }

    #[test]
    fn test_plan_dedupes_within_batch() {
        let ops = planner().plan(
            &[
                Candidate::Block(block_candidate("rate limiting protects the public api")),
                Candidate::Block(block_candidate("rate limiting protects the public api.")),
            ],
            &[],
        );
        assert_eq!(ops.len(), 1);
        assert!(ops[0].is_create());
    }
}
