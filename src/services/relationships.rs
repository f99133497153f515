//! P2 relationship mapping.
//!
//! Every unordered pair of settled substrate units is scored by independent
//! heuristic signals. Each signal that clears its threshold becomes a
//! candidate edge; candidates are then sorted, filtered and collapsed to one
//! edge per pair before an idempotent upsert.
//!
//! The pairwise scan is quadratic. Generation stops at
//! `max_candidates`, which bounds work on large baskets but means later
//! pairs in a big basket are not considered in a single run.

use crate::config::{PipelineConfig, RelationshipConfig};
use crate::models::{
    BasketId, NodeRef, Relationship, RelationshipType, SemanticType, SubstrateId, SubstrateKind,
    SubstrateState, SubstrateUnit, TimelineEventKind, WorkId, WorkspaceId,
};
use crate::services::cascade::{CascadeContext, CascadeTrigger, StageOutcome};
use crate::services::text;
use crate::services::timeline::TimelineEmitter;
use crate::storage::SubstrateStore;
use crate::Result;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tracing::instrument;

const SEMANTIC_SAME_TYPE: f32 = 0.6;
const SEMANTIC_RELATED_TYPE: f32 = 0.4;
const SEMANTIC_BASELINE: f32 = 0.2;
const SEMANTIC_THRESHOLD: f32 = 0.3;

const CONTENT_SHARED_WORDS_BOOST: f32 = 0.2;
const CONTENT_BOOST_MIN_SHARED: usize = 3;
const CONTENT_THRESHOLD: f32 = 0.4;

const THEMATIC_MULTI: f32 = 0.7;
const THEMATIC_SINGLE: f32 = 0.5;

const CAUSAL_ONE_SIDE: f32 = 0.6;
const CAUSAL_BOTH_SIDES: f32 = 0.8;
const CAUSAL_COMPATIBLE_BOOST: f32 = 0.1;
const CAUSAL_CAP: f32 = 0.95;
const CAUSAL_THRESHOLD: f32 = 0.6;

const CONTEXT_REFERENCE_STRENGTH: f32 = 0.75;

const ADDRESSES_BASE: f32 = 0.65;
const SUPPORTS_BASE: f32 = 0.55;
const SHARED_SOURCE_BOOST: f32 = 0.1;

/// Type pairs considered related for `semantic_similarity` (unordered).
const RELATED_TYPES: &[(SemanticType, SemanticType)] = &[
    (SemanticType::Goal, SemanticType::Solution),
    (SemanticType::Problem, SemanticType::Solution),
    (SemanticType::Question, SemanticType::Insight),
    (SemanticType::Concept, SemanticType::Goal),
    (SemanticType::Concept, SemanticType::Problem),
];

const THEMES: &[(&str, &[&str])] = &[
    (
        "technology",
        &[
            "api", "software", "system", "code", "platform", "database", "server",
            "infrastructure", "security", "cloud", "integration", "deploy",
        ],
    ),
    (
        "business",
        &[
            "revenue", "customer", "market", "sales", "cost", "pricing", "growth", "strategy",
            "budget", "profit",
        ],
    ),
    (
        "project",
        &[
            "project", "milestone", "deadline", "roadmap", "release", "sprint", "timeline",
            "deliverable", "launch",
        ],
    ),
    (
        "user",
        &[
            "user", "experience", "feedback", "onboarding", "usability", "interface", "persona",
            "support",
        ],
    ),
];

/// Trigger phrases and causally compatible type pairs per causal-family type.
struct CausalRule {
    relationship_type: RelationshipType,
    triggers: &'static [&'static str],
    compatible: &'static [(SemanticType, SemanticType)],
}

const CAUSAL_RULES: &[CausalRule] = &[
    CausalRule {
        relationship_type: RelationshipType::CausalRelationship,
        triggers: &[
            "because", "due to", "leads to", "caused by", "results in", "as a result",
            "therefore", "consequently",
        ],
        compatible: &[
            (SemanticType::Problem, SemanticType::Solution),
            (SemanticType::Event, SemanticType::Problem),
            (SemanticType::Insight, SemanticType::Action),
            (SemanticType::Finding, SemanticType::Problem),
        ],
    },
    CausalRule {
        relationship_type: RelationshipType::TemporalSequence,
        triggers: &[
            "before", "after", "then", "next step", "following", "subsequently", "finally",
            "afterwards",
        ],
        compatible: &[
            (SemanticType::Event, SemanticType::Event),
            (SemanticType::Action, SemanticType::Action),
            (SemanticType::Goal, SemanticType::Action),
        ],
    },
    CausalRule {
        relationship_type: RelationshipType::EnablementChain,
        triggers: &[
            "enables", "allows", "makes possible", "unlocks", "requires", "prerequisite",
            "depends on", "so that",
        ],
        compatible: &[
            (SemanticType::Solution, SemanticType::Goal),
            (SemanticType::Action, SemanticType::Goal),
            (SemanticType::Constraint, SemanticType::Solution),
        ],
    },
    CausalRule {
        relationship_type: RelationshipType::ImpactRelationship,
        triggers: &[
            "affects", "impacts", "influences", "reduces", "increases", "improves",
            "prevents", "protects",
        ],
        compatible: &[
            (SemanticType::Problem, SemanticType::Goal),
            (SemanticType::Solution, SemanticType::Problem),
            (SemanticType::Metric, SemanticType::Goal),
        ],
    },
    CausalRule {
        relationship_type: RelationshipType::ConditionalLogic,
        triggers: &["if ", "unless", "provided that", "only when", "in case", "assuming"],
        compatible: &[
            (SemanticType::Constraint, SemanticType::Action),
            (SemanticType::Assumption, SemanticType::Goal),
            (SemanticType::Question, SemanticType::Solution),
        ],
    },
];

/// Result of one mapping run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MappingOutcome {
    /// Relationships newly stored by this run.
    pub relationships_created: usize,
    /// Relationships that survived validation (new or already stored).
    pub relationships_validated: usize,
    /// Substrate units considered.
    pub substrate_analyzed: usize,
    /// Mean strength of validated relationships.
    pub connection_strength_avg: f32,
    /// Wall time of the run.
    pub processing_time_ms: u64,
}

/// A substrate unit with its pairwise-comparison features precomputed.
struct Node<'a> {
    unit: &'a SubstrateUnit,
    lower: String,
    words: HashSet<String>,
    themes: HashSet<&'static str>,
}

impl<'a> Node<'a> {
    fn new(unit: &'a SubstrateUnit) -> Self {
        let analyzable = unit.analyzable_text();
        let lower = analyzable.to_lowercase();
        let tokens: HashSet<String> = text::tokens(&analyzable).collect();
        let themes = THEMES
            .iter()
            .filter(|(_, words)| words.iter().any(|w| tokens.contains(*w)))
            .map(|(name, _)| *name)
            .collect();
        Self {
            unit,
            words: text::word_set(&analyzable, 3),
            lower,
            themes,
        }
    }

    fn node_ref(&self) -> NodeRef {
        NodeRef::new(self.unit.kind, self.unit.id.clone())
    }

    fn semantic_type(&self) -> SemanticType {
        self.unit.semantic_type
    }

    fn is_context(&self) -> bool {
        self.unit.kind == SubstrateKind::ContextItem || self.unit.semantic_type.is_entity_like()
    }

    fn shares_source(&self, other: &Self) -> bool {
        self.unit
            .provenance
            .dump_ids
            .iter()
            .any(|d| other.unit.derived_from(d))
    }
}

fn unordered_match(
    table: &[(SemanticType, SemanticType)],
    a: SemanticType,
    b: SemanticType,
) -> bool {
    table
        .iter()
        .any(|&(x, y)| (x == a && y == b) || (x == b && y == a))
}

fn edge(
    basket_id: &BasketId,
    from: &Node<'_>,
    to: &Node<'_>,
    relationship_type: RelationshipType,
    strength: f32,
    description: String,
) -> Relationship {
    Relationship::new(
        basket_id.clone(),
        from.node_ref(),
        to.node_ref(),
        relationship_type,
        strength,
        description,
    )
}

fn semantic_similarity(basket_id: &BasketId, a: &Node<'_>, b: &Node<'_>) -> Option<Relationship> {
    let strength = if a.semantic_type() == b.semantic_type() {
        SEMANTIC_SAME_TYPE
    } else if unordered_match(RELATED_TYPES, a.semantic_type(), b.semantic_type()) {
        SEMANTIC_RELATED_TYPE
    } else {
        SEMANTIC_BASELINE
    };
    (strength >= SEMANTIC_THRESHOLD).then(|| {
        edge(
            basket_id,
            a,
            b,
            RelationshipType::SemanticSimilarity,
            strength,
            format!("{} and {} are related types", a.semantic_type(), b.semantic_type()),
        )
    })
}

#[allow(clippy::cast_precision_loss)]
fn related_content(basket_id: &BasketId, a: &Node<'_>, b: &Node<'_>) -> Option<Relationship> {
    let shared = a.words.intersection(&b.words).count();
    let mut strength = text::jaccard(&a.words, &b.words);
    if shared >= CONTENT_BOOST_MIN_SHARED {
        strength += CONTENT_SHARED_WORDS_BOOST;
    }
    let strength = strength.min(1.0);
    (strength >= CONTENT_THRESHOLD).then(|| {
        edge(
            basket_id,
            a,
            b,
            RelationshipType::RelatedContent,
            strength,
            format!("{shared} shared terms"),
        )
    })
}

fn thematic_connection(basket_id: &BasketId, a: &Node<'_>, b: &Node<'_>) -> Option<Relationship> {
    let mut shared: Vec<&str> = a.themes.intersection(&b.themes).copied().collect();
    let strength = match shared.len() {
        0 => return None,
        1 => THEMATIC_SINGLE,
        _ => THEMATIC_MULTI,
    };
    shared.sort_unstable();
    Some(edge(
        basket_id,
        a,
        b,
        RelationshipType::ThematicConnection,
        strength,
        format!("shared themes: {}", shared.join(", ")),
    ))
}

/// Causal-family edges for a pair, strongest first, at most `max_per_pair`.
fn causal_family(
    basket_id: &BasketId,
    a: &Node<'_>,
    b: &Node<'_>,
    max_per_pair: usize,
) -> Vec<Relationship> {
    let mut found: Vec<Relationship> = CAUSAL_RULES
        .iter()
        .filter_map(|rule| {
            let in_a = text::contains_any(&a.lower, rule.triggers);
            let in_b = text::contains_any(&b.lower, rule.triggers);
            let mut strength = match (in_a, in_b) {
                (true, true) => CAUSAL_BOTH_SIDES,
                (true, false) | (false, true) => CAUSAL_ONE_SIDE,
                (false, false) => return None,
            };
            if unordered_match(rule.compatible, a.semantic_type(), b.semantic_type()) {
                strength += CAUSAL_COMPATIBLE_BOOST;
            }
            let strength = strength.min(CAUSAL_CAP);
            if strength < CAUSAL_THRESHOLD {
                return None;
            }
            // The side carrying the trigger language is the source.
            let (from, to) = if in_b && !in_a { (b, a) } else { (a, b) };
            Some(edge(
                basket_id,
                from,
                to,
                rule.relationship_type,
                strength,
                format!("{} language", rule.relationship_type),
            ))
        })
        .collect();
    found.sort_by(|x, y| y.strength.total_cmp(&x.strength));
    found.truncate(max_per_pair);
    found
}

/// Block→entity edge when the block text names the entity.
fn context_reference(basket_id: &BasketId, a: &Node<'_>, b: &Node<'_>) -> Option<Relationship> {
    let (block, entity) = match (a.is_context(), b.is_context()) {
        (false, true) => (a, b),
        (true, false) => (b, a),
        _ => return None,
    };
    let label = text::normalize_label(&entity.unit.title);
    if label.is_empty() || !block.lower.contains(&label) {
        return None;
    }
    Some(edge(
        basket_id,
        block,
        entity,
        RelationshipType::ContextReference,
        CONTEXT_REFERENCE_STRENGTH,
        format!("mentions '{}'", entity.unit.title),
    ))
}

/// Solution or action → problem, and evidence → goal.
fn directed_role(basket_id: &BasketId, a: &Node<'_>, b: &Node<'_>) -> Option<Relationship> {
    let is_remedy = |n: &Node<'_>| matches!(n.semantic_type(), SemanticType::Solution | SemanticType::Action);
    let is_evidence = |n: &Node<'_>| {
        matches!(
            n.semantic_type(),
            SemanticType::Insight | SemanticType::Fact | SemanticType::Finding | SemanticType::Metric
        )
    };
    let is_goal = |n: &Node<'_>| matches!(n.semantic_type(), SemanticType::Goal | SemanticType::Objective);
    let is_problem = |n: &Node<'_>| n.semantic_type() == SemanticType::Problem;

    let (from, to, relationship_type, base, description) = if is_remedy(a) && is_problem(b) {
        (a, b, RelationshipType::Addresses, ADDRESSES_BASE, "proposes a fix")
    } else if is_remedy(b) && is_problem(a) {
        (b, a, RelationshipType::Addresses, ADDRESSES_BASE, "proposes a fix")
    } else if is_evidence(a) && is_goal(b) {
        (a, b, RelationshipType::Supports, SUPPORTS_BASE, "supports the goal")
    } else if is_evidence(b) && is_goal(a) {
        (b, a, RelationshipType::Supports, SUPPORTS_BASE, "supports the goal")
    } else {
        return None;
    };

    let strength = if a.shares_source(b) {
        base + SHARED_SOURCE_BOOST
    } else {
        base
    };
    Some(edge(basket_id, from, to, relationship_type, strength, description.to_string()))
}

/// Generates candidate edges for all pairs, stopping at
/// `config.max_candidates`.
///
/// With a non-empty `focus`, only pairs touching a focused unit are scored.
#[must_use]
pub fn generate_candidates(
    basket_id: &BasketId,
    units: &[SubstrateUnit],
    focus: &[SubstrateId],
    config: &RelationshipConfig,
) -> Vec<Relationship> {
    let nodes: Vec<Node<'_>> = units.iter().map(Node::new).collect();
    let focus: HashSet<&SubstrateId> = focus.iter().collect();
    let mut candidates = Vec::new();

    'pairs: for (i, a) in nodes.iter().enumerate() {
        for b in &nodes[i + 1..] {
            if !focus.is_empty() && !focus.contains(&a.unit.id) && !focus.contains(&b.unit.id) {
                continue;
            }
            let mut pair: Vec<Relationship> = [
                semantic_similarity(basket_id, a, b),
                related_content(basket_id, a, b),
                thematic_connection(basket_id, a, b),
                context_reference(basket_id, a, b),
                directed_role(basket_id, a, b),
            ]
            .into_iter()
            .flatten()
            .collect();
            pair.extend(causal_family(basket_id, a, b, config.max_causal_per_pair));

            for relationship in pair {
                if candidates.len() >= config.max_candidates {
                    break 'pairs;
                }
                candidates.push(relationship);
            }
        }
    }
    candidates
}

/// Sorts by strength, drops weak edges, keeps the strongest edge per
/// unordered pair and caps the result.
#[must_use]
pub fn validate_candidates(
    mut candidates: Vec<Relationship>,
    config: &RelationshipConfig,
) -> Vec<Relationship> {
    candidates.sort_by(|a, b| {
        b.strength
            .total_cmp(&a.strength)
            .then_with(|| a.relationship_type.cmp(&b.relationship_type))
    });
    let mut seen = HashSet::new();
    candidates
        .into_iter()
        .filter(|r| r.strength >= config.min_strength)
        .filter(|r| seen.insert(r.pair_key()))
        .take(config.max_final)
        .collect()
}

/// Maps relationships between settled substrate in a basket.
pub struct RelationshipEngine {
    store: Arc<dyn SubstrateStore>,
    config: RelationshipConfig,
    timeline: TimelineEmitter,
    cascade: Option<CascadeTrigger>,
}

impl RelationshipEngine {
    /// Creates an engine.
    #[must_use]
    pub fn new(store: Arc<dyn SubstrateStore>, config: &PipelineConfig) -> Self {
        Self {
            timeline: TimelineEmitter::new(Arc::clone(&store), "relationships"),
            store,
            config: config.relationships,
            cascade: None,
        }
    }

    /// Enables the P2→P3 cascade.
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

    /// Scores, validates and stores relationships for the basket.
    ///
    /// Re-running over unchanged substrate stores nothing new.
    ///
    /// # Errors
    ///
    /// Returns storage errors.
    #[instrument(skip(self, focus), fields(operation = "relationships.map", basket_id = %basket_id, focus = focus.len()))]
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    pub fn map_relationships(
        &self,
        workspace_id: &WorkspaceId,
        basket_id: &BasketId,
        focus: &[SubstrateId],
        agent_id: Option<&str>,
        work_id: Option<&WorkId>,
    ) -> Result<MappingOutcome> {
        let start = Instant::now();
        let result = (|| {
            let units: Vec<SubstrateUnit> = self
                .store
                .list_substrate(basket_id, &[SubstrateState::Rejected, SubstrateState::Merged])?
                .into_iter()
                .filter(|u| &u.workspace_id == workspace_id)
                .filter(|u| u.state.is_settled() && u.kind != SubstrateKind::Dump)
                .collect();

            let mut outcome = MappingOutcome {
                relationships_created: 0,
                relationships_validated: 0,
                substrate_analyzed: units.len(),
                connection_strength_avg: 0.0,
                processing_time_ms: 0,
            };
            if units.len() < 2 {
                tracing::debug!(basket_id = %basket_id, units = units.len(), "Too little substrate to relate");
                return Ok(outcome);
            }

            let candidates = generate_candidates(basket_id, &units, focus, &self.config);
            let generated = candidates.len();
            let validated = validate_candidates(candidates, &self.config);

            let mut created = 0;
            for relationship in &validated {
                if self.store.upsert_relationship(relationship)? {
                    created += 1;
                }
            }

            outcome.relationships_created = created;
            outcome.relationships_validated = validated.len();
            if !validated.is_empty() {
                outcome.connection_strength_avg =
                    validated.iter().map(|r| r.strength).sum::<f32>() / validated.len() as f32;
            }
            tracing::info!(
                basket_id = %basket_id,
                substrate = units.len(),
                generated = generated,
                validated = validated.len(),
                created = created,
                "Relationships mapped"
            );
            Ok(outcome)
        })();

        let status = if result.is_ok() { "success" } else { "error" };
        metrics::counter!("relationship_runs_total", "status" => status).increment(1);
        metrics::histogram!("relationship_mapping_duration_ms")
            .record(start.elapsed().as_secs_f64() * 1000.0);

        let mut outcome = result?;
        outcome.processing_time_ms = start.elapsed().as_millis() as u64;
        metrics::counter!("relationships_created_total").increment(outcome.relationships_created as u64);

        if outcome.relationships_created > 0 {
            self.timeline.emit(
                basket_id,
                workspace_id,
                TimelineEventKind::RelationshipsMapped {
                    created: outcome.relationships_created,
                },
                agent_id,
            );
        }
        if let Some(cascade) = &self.cascade {
            cascade.trigger_next_stage(
                &CascadeContext::new(basket_id.clone(), workspace_id.clone()).with_work_id(work_id),
                &StageOutcome::Graph {
                    relationships_created: outcome.relationships_created,
                },
            );
        }
        Ok(outcome)
    }

    /// Stored relationships grouped by type, for inspection.
    ///
    /// # Errors
    ///
    /// Returns storage errors.
    pub fn relationship_counts(
        &self,
        basket_id: &BasketId,
    ) -> Result<HashMap<RelationshipType, usize>> {
        let mut counts = HashMap::new();
        for relationship in self.store.list_relationships(basket_id)? {
            *counts.entry(relationship.relationship_type).or_default() += 1;
        }
        Ok(counts)
    }
}

impl std::fmt::Debug for RelationshipEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelationshipEngine")
            .field("config", &self.config)
            .field("cascade", &self.cascade.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DumpId, Provenance, QueueState, WorkType};
    use crate::queue::QueueCoordinator;
    use crate::storage::{BlockBackend, GraphBackend, InMemoryStore, QueueBackend};
    use test_case::test_case;

    fn unit(semantic_type: SemanticType, content: &str) -> SubstrateUnit {
        SubstrateUnit::new(
            BasketId::new("b1"),
            WorkspaceId::new("w1"),
            SubstrateKind::Block,
            semantic_type,
            content,
            content,
        )
        .with_state(SubstrateState::Accepted)
        .with_provenance(Provenance {
            dump_ids: vec![DumpId::new("d1")],
            method: "test".to_string(),
            confidence: 0.7,
        })
    }

    fn entity(label: &str) -> SubstrateUnit {
        SubstrateUnit::new(
            BasketId::new("b1"),
            WorkspaceId::new("w1"),
            SubstrateKind::ContextItem,
            SemanticType::Project,
            label,
            "",
        )
        .with_state(SubstrateState::Accepted)
    }

    fn basket() -> BasketId {
        BasketId::new("b1")
    }

    #[test_case(SemanticType::Goal, SemanticType::Goal, Some(0.6); "same type")]
    #[test_case(SemanticType::Problem, SemanticType::Solution, Some(0.4); "related types")]
    #[test_case(SemanticType::Metric, SemanticType::Quote, None; "unrelated types")]
    fn test_semantic_similarity(a: SemanticType, b: SemanticType, expected: Option<f32>) {
        let (a, b) = (unit(a, "alpha"), unit(b, "beta"));
        let got = semantic_similarity(&basket(), &Node::new(&a), &Node::new(&b)).map(|r| r.strength);
        assert_eq!(got, expected);
    }

    #[test]
    fn test_problem_solution_pair_gets_addresses_edge() {
        let problem = unit(SemanticType::Problem, "Our API is vulnerable to spam attacks.");
        let solution = unit(SemanticType::Solution, "We should implement rate limiting.");
        let units = vec![problem.clone(), solution.clone()];

        let validated = validate_candidates(
            generate_candidates(&basket(), &units, &[], &RelationshipConfig::default()),
            &RelationshipConfig::default(),
        );
        assert_eq!(validated.len(), 1);
        let edge = &validated[0];
        assert_eq!(edge.relationship_type, RelationshipType::Addresses);
        assert_eq!(edge.from.id, solution.id);
        assert_eq!(edge.to.id, problem.id);
        assert!(edge.strength >= 0.6);
    }

    #[test]
    fn test_context_reference_is_block_to_entity() {
        let block = unit(SemanticType::Fact, "Project Atlas ships in March.");
        let atlas = entity("Project Atlas");
        for units in [vec![block.clone(), atlas.clone()], vec![atlas.clone(), block.clone()]] {
            let candidates =
                generate_candidates(&basket(), &units, &[], &RelationshipConfig::default());
            let reference = candidates
                .iter()
                .find(|r| r.relationship_type == RelationshipType::ContextReference)
                .unwrap();
            assert_eq!(reference.from.id, block.id);
            assert_eq!(reference.to.id, atlas.id);
            assert!((reference.strength - 0.75).abs() < f32::EPSILON);
        }
    }

    #[test]
    fn test_causal_family_capped_per_pair() {
        let a = unit(
            SemanticType::Problem,
            "Latency increases because the cache fails, then requires a restart if traffic spikes.",
        );
        let b = unit(
            SemanticType::Solution,
            "Sharding reduces load because it enables parallel reads, then afterwards unless idle.",
        );
        let edges = causal_family(&basket(), &Node::new(&a), &Node::new(&b), 3);
        assert_eq!(edges.len(), 3);
        assert!(edges.iter().all(|e| e.relationship_type.is_causal_family()));
        assert!(edges.iter().all(|e| e.strength >= 0.6 && e.strength <= 0.95));
    }

    #[test]
    fn test_generation_respects_global_cap() {
        let units: Vec<SubstrateUnit> = (0..20)
            .map(|i| unit(SemanticType::Goal, &format!("goal {i} for the platform api release")))
            .collect();
        let config = RelationshipConfig::default();
        let candidates = generate_candidates(&basket(), &units, &[], &config);
        assert_eq!(candidates.len(), config.max_candidates);

        let validated = validate_candidates(candidates, &config);
        assert!(validated.len() <= config.max_final);
        let pairs: HashSet<_> = validated.iter().map(Relationship::pair_key).collect();
        assert_eq!(pairs.len(), validated.len());
        assert!(validated.windows(2).all(|w| w[0].strength >= w[1].strength));
    }

    #[test]
    fn test_focus_limits_pairs() {
        let a = unit(SemanticType::Goal, "first goal");
        let b = unit(SemanticType::Goal, "second goal");
        let c = unit(SemanticType::Goal, "third goal");
        let units = vec![a, b, c.clone()];
        let candidates = generate_candidates(
            &basket(),
            &units,
            &[c.id.clone()],
            &RelationshipConfig::default(),
        );
        assert!(!candidates.is_empty());
        assert!(candidates.iter().all(|r| r.touches(&c.id)));
    }

    #[test]
    fn test_mapping_is_idempotent_and_cascades_once() {
        let store = Arc::new(InMemoryStore::new());
        store
            .insert_substrate(&unit(SemanticType::Problem, "Our API is vulnerable to spam attacks."))
            .unwrap();
        store
            .insert_substrate(&unit(SemanticType::Solution, "We should implement rate limiting."))
            .unwrap();
        let shared: Arc<dyn SubstrateStore> = store.clone();
        let queue = QueueCoordinator::new(shared.clone());
        let engine = RelationshipEngine::new(shared, &PipelineConfig::default())
            .with_cascade(CascadeTrigger::new(queue));

        let first = engine
            .map_relationships(&WorkspaceId::new("w1"), &basket(), &[], Some("test"), None)
            .unwrap();
        assert_eq!(first.substrate_analyzed, 2);
        assert_eq!(first.relationships_created, 1);

        let second = engine
            .map_relationships(&WorkspaceId::new("w1"), &basket(), &[], Some("test"), None)
            .unwrap();
        assert_eq!(second.relationships_created, 0);
        assert_eq!(second.relationships_validated, 1);
        assert_eq!(store.list_relationships(&basket()).unwrap().len(), 1);

        let pending = store
            .find_pending(&basket(), WorkType::P3Reflection)
            .unwrap();
        assert!(pending.is_some_and(|e| e.status == QueueState::Pending));
        assert_eq!(store.queue_stats().unwrap().total(), 1);
    }

    #[test]
    fn test_too_little_substrate_short_circuits() {
        let store = Arc::new(InMemoryStore::new());
        store
            .insert_substrate(&unit(SemanticType::Goal, "lonely goal"))
            .unwrap();
        let engine = RelationshipEngine::new(store, &PipelineConfig::default());
        let outcome = engine
            .map_relationships(&WorkspaceId::new("w1"), &basket(), &[], None, None)
            .unwrap();
        assert_eq!(outcome.relationships_created, 0);
        assert_eq!(outcome.substrate_analyzed, 1);
    }

    const WORDS: [&str; 8] = [
        "api", "latency", "because", "customers", "pricing", "enables", "platform", "churn",
    ];
    const TYPES: [SemanticType; 5] = [
        SemanticType::Goal,
        SemanticType::Problem,
        SemanticType::Solution,
        SemanticType::Insight,
        SemanticType::Fact,
    ];

    proptest::proptest! {
        #[test]
        fn prop_validated_edges_have_unique_pairs(
            specs in proptest::collection::vec(
                (0usize..TYPES.len(), proptest::collection::vec(0usize..WORDS.len(), 3..10)),
                2..12,
            ),
        ) {
            let units: Vec<SubstrateUnit> = specs
                .iter()
                .map(|(t, words)| {
                    let text: Vec<&str> = words.iter().map(|w| WORDS[*w]).collect();
                    unit(TYPES[*t], &text.join(" "))
                })
                .collect();
            let config = RelationshipConfig::default();
            let validated =
                validate_candidates(generate_candidates(&basket(), &units, &[], &config), &config);

            let pairs: HashSet<_> = validated.iter().map(Relationship::pair_key).collect();
            proptest::prop_assert_eq!(pairs.len(), validated.len());
            proptest::prop_assert!(validated.len() <= config.max_final);
            proptest::prop_assert!(validated.iter().all(|r| r.strength >= config.min_strength));
        }
    }
}
