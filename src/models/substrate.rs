//! Substrate unit types.
//!
//! Blocks and entity-style context items share one polymorphic record with a
//! [`SubstrateKind`] discriminant, so relationships are plain
//! `(kind, id) → (kind, id)` edges.

use super::{BasketId, DumpId, SubstrateId, WorkspaceId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Seconds per day, used for age calculations.
pub const SECONDS_PER_DAY: f64 = 86_400.0;

/// Discriminant for polymorphic substrate records and graph nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubstrateKind {
    /// Text block (fact, insight, action, ...).
    Block,
    /// Entity-style labelled item (person, project, ...).
    ContextItem,
    /// Reference to a raw dump.
    Dump,
}

impl SubstrateKind {
    /// Returns the kind as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Block => "block",
            Self::ContextItem => "context_item",
            Self::Dump => "dump",
        }
    }

    /// Parses a kind from a string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "block" => Some(Self::Block),
            "context_item" | "context-item" | "entity" => Some(Self::ContextItem),
            "dump" | "raw_dump" => Some(Self::Dump),
            _ => None,
        }
    }
}

impl fmt::Display for SubstrateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Semantic classification of a substrate unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SemanticType {
    /// Verifiable statement.
    Fact,
    /// Quantitative measurement.
    Metric,
    /// Something that happened.
    Event,
    /// Interpretation or learning.
    Insight,
    /// Something to do.
    Action,
    /// Result of an investigation.
    Finding,
    /// Verbatim quotation.
    Quote,
    /// Condensed restatement.
    Summary,
    /// Generic named entity.
    Entity,
    /// Category assignment.
    Classification,
    /// Stated intention.
    Intent,
    /// Target outcome.
    Objective,
    /// Reason behind a decision.
    Rationale,
    /// Guiding rule.
    Principle,
    /// Unverified belief.
    Assumption,
    /// Background information.
    Context,
    /// Limitation that must be respected.
    Constraint,
    /// Desired end state.
    Goal,
    /// Pain point or defect.
    Problem,
    /// Proposed remedy.
    Solution,
    /// Open question.
    Question,
    /// Idea or notion (fallback block type).
    Concept,
    /// Project entity.
    Project,
    /// Person entity.
    Person,
    /// Organization entity.
    Organization,
}

impl SemanticType {
    /// Returns all semantic types.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::Fact,
            Self::Metric,
            Self::Event,
            Self::Insight,
            Self::Action,
            Self::Finding,
            Self::Quote,
            Self::Summary,
            Self::Entity,
            Self::Classification,
            Self::Intent,
            Self::Objective,
            Self::Rationale,
            Self::Principle,
            Self::Assumption,
            Self::Context,
            Self::Constraint,
            Self::Goal,
            Self::Problem,
            Self::Solution,
            Self::Question,
            Self::Concept,
            Self::Project,
            Self::Person,
            Self::Organization,
        ]
    }

    /// Returns the type as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Fact => "fact",
            Self::Metric => "metric",
            Self::Event => "event",
            Self::Insight => "insight",
            Self::Action => "action",
            Self::Finding => "finding",
            Self::Quote => "quote",
            Self::Summary => "summary",
            Self::Entity => "entity",
            Self::Classification => "classification",
            Self::Intent => "intent",
            Self::Objective => "objective",
            Self::Rationale => "rationale",
            Self::Principle => "principle",
            Self::Assumption => "assumption",
            Self::Context => "context",
            Self::Constraint => "constraint",
            Self::Goal => "goal",
            Self::Problem => "problem",
            Self::Solution => "solution",
            Self::Question => "question",
            Self::Concept => "concept",
            Self::Project => "project",
            Self::Person => "person",
            Self::Organization => "organization",
        }
    }

    /// Parses a semantic type from a string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        let lower = s.trim().to_lowercase();
        Self::all()
            .iter()
            .copied()
            .find(|t| t.as_str() == lower)
            .or(match lower.as_str() {
                "org" | "company" | "team" => Some(Self::Organization),
                "task" | "todo" => Some(Self::Action),
                "kpi" | "measurement" => Some(Self::Metric),
                "issue" | "pain_point" => Some(Self::Problem),
                _ => None,
            })
    }

    /// Returns true for entity-style types stored as context items.
    #[must_use]
    pub const fn is_entity_like(&self) -> bool {
        matches!(
            self,
            Self::Entity | Self::Project | Self::Person | Self::Organization
        )
    }
}

impl fmt::Display for SemanticType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle state of a substrate unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubstrateState {
    /// Created but not yet accepted.
    #[default]
    Proposed,
    /// Accepted and active.
    Accepted,
    /// Rejected; excluded from every downstream read path.
    Rejected,
    /// Folded into a canonical unit.
    Merged,
    /// Accepted and frozen against revision.
    Locked,
}

impl SubstrateState {
    /// Returns the state as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Proposed => "PROPOSED",
            Self::Accepted => "ACCEPTED",
            Self::Rejected => "REJECTED",
            Self::Merged => "MERGED",
            Self::Locked => "LOCKED",
        }
    }

    /// Parses a state from a string (accepts `ACTIVE`/`CONSTANT` aliases).
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "PROPOSED" => Some(Self::Proposed),
            "ACCEPTED" | "ACTIVE" => Some(Self::Accepted),
            "REJECTED" => Some(Self::Rejected),
            "MERGED" => Some(Self::Merged),
            "LOCKED" | "CONSTANT" => Some(Self::Locked),
            _ => None,
        }
    }

    /// Returns true for states the graph stage operates on.
    #[must_use]
    pub const fn is_settled(&self) -> bool {
        matches!(self, Self::Accepted | Self::Locked)
    }
}

impl fmt::Display for SubstrateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Emergent semantic tag inferred from substrate content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnchorRole {
    /// Pain point being addressed.
    Problem,
    /// Measurable indicator.
    Metric,
    /// Who the work is for.
    Customer,
    /// Capability being built.
    Feature,
    /// Limitation to respect.
    Constraint,
    /// Long-term direction.
    Vision,
}

/// Keyword buckets for anchor inference, checked in declaration order.
const ANCHOR_KEYWORDS: &[(AnchorRole, &[&str])] = &[
    (
        AnchorRole::Problem,
        &[
            "problem",
            "issue",
            "bug",
            "pain",
            "vulnerable",
            "risk",
            "fail",
            "broken",
            "blocker",
            "struggle",
        ],
    ),
    (
        AnchorRole::Constraint,
        &[
            "constraint",
            "must not",
            "cannot",
            "limit",
            "budget",
            "deadline",
            "compliance",
            "regulation",
            "only if",
        ],
    ),
    (
        AnchorRole::Metric,
        &[
            "metric",
            "kpi",
            "percent",
            "%",
            "revenue",
            "conversion",
            "latency",
            "churn",
            "retention",
            "mrr",
        ],
    ),
    (
        AnchorRole::Customer,
        &[
            "customer", "user", "client", "persona", "buyer", "audience", "segment",
        ],
    ),
    (
        AnchorRole::Feature,
        &[
            "feature",
            "capability",
            "functionality",
            "implement",
            "integration",
            "endpoint",
            "release",
            "ship",
        ],
    ),
    (
        AnchorRole::Vision,
        &[
            "vision",
            "mission",
            "long-term",
            "long term",
            "north star",
            "future",
            "aspire",
        ],
    ),
];

impl AnchorRole {
    /// Returns the role as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Problem => "problem",
            Self::Metric => "metric",
            Self::Customer => "customer",
            Self::Feature => "feature",
            Self::Constraint => "constraint",
            Self::Vision => "vision",
        }
    }

    /// Parses a role from a string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        ANCHOR_KEYWORDS
            .iter()
            .map(|(role, _)| *role)
            .find(|role| role.as_str() == s.trim().to_lowercase())
    }

    /// Infers an anchor role from free text.
    ///
    /// The role with the most keyword hits wins; ties resolve in the order
    /// problem, constraint, metric, customer, feature, vision.
    #[must_use]
    pub fn infer(text: &str) -> Option<Self> {
        let lower = text.to_lowercase();
        let mut best: Option<(Self, usize)> = None;
        for (role, keywords) in ANCHOR_KEYWORDS {
            let hits = keywords.iter().filter(|k| lower.contains(*k)).count();
            if hits == 0 {
                continue;
            }
            if best.is_none_or(|(_, best_hits)| hits > best_hits) {
                best = Some((*role, hits));
            }
        }
        best.map(|(role, _)| role)
    }
}

impl fmt::Display for AnchorRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Where a substrate unit came from.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Provenance {
    /// Source dump ids.
    pub dump_ids: Vec<DumpId>,
    /// Extraction method (`heuristic`, `llm`, `manual`).
    pub method: String,
    /// Extraction confidence.
    pub confidence: f32,
}

/// A typed unit of extracted knowledge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubstrateUnit {
    /// Unique identifier.
    pub id: SubstrateId,
    /// Owning basket.
    pub basket_id: BasketId,
    /// Owning workspace.
    pub workspace_id: WorkspaceId,
    /// Block or context item.
    pub kind: SubstrateKind,
    /// Semantic classification.
    pub semantic_type: SemanticType,
    /// Title (blocks) or label (context items).
    pub title: String,
    /// Body text; for context items a short semantic meaning.
    pub content: String,
    /// Confidence in `[0, 1]`.
    pub confidence_score: f32,
    /// Lifecycle state.
    pub state: SubstrateState,
    /// Inferred anchor role.
    pub anchor_role: Option<AnchorRole>,
    /// Origin of the unit.
    pub provenance: Provenance,
    /// Alternative labels (context items).
    pub synonyms: Vec<String>,
    /// Canonical unit this one was merged into.
    pub canonical_id: Option<SubstrateId>,
    /// Creation timestamp (Unix epoch seconds).
    pub created_at: u64,
    /// Last update timestamp (Unix epoch seconds).
    pub updated_at: u64,
}

impl SubstrateUnit {
    /// Creates a new unit in `PROPOSED` state.
    #[must_use]
    pub fn new(
        basket_id: BasketId,
        workspace_id: WorkspaceId,
        kind: SubstrateKind,
        semantic_type: SemanticType,
        title: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let now = crate::current_timestamp();
        Self {
            id: SubstrateId::generate(),
            basket_id,
            workspace_id,
            kind,
            semantic_type,
            title: title.into(),
            content: content.into(),
            confidence_score: 0.5,
            state: SubstrateState::Proposed,
            anchor_role: None,
            provenance: Provenance::default(),
            synonyms: Vec::new(),
            canonical_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Sets the confidence score (clamped to `[0, 1]`).
    #[must_use]
    pub const fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence_score = confidence.clamp(0.0, 1.0);
        self
    }

    /// Sets the lifecycle state.
    #[must_use]
    pub const fn with_state(mut self, state: SubstrateState) -> Self {
        self.state = state;
        self
    }

    /// Sets provenance.
    #[must_use]
    pub fn with_provenance(mut self, provenance: Provenance) -> Self {
        self.provenance = provenance;
        self
    }

    /// Overrides the creation timestamp.
    #[must_use]
    pub const fn with_created_at(mut self, created_at: u64) -> Self {
        self.created_at = created_at;
        self.updated_at = created_at;
        self
    }

    /// Title and content joined for text analysis.
    #[must_use]
    pub fn analyzable_text(&self) -> String {
        if self.content.is_empty() {
            self.title.clone()
        } else {
            format!("{} {}", self.title, self.content)
        }
    }

    /// Returns true if this unit was extracted from the given dump.
    #[must_use]
    pub fn derived_from(&self, dump_id: &DumpId) -> bool {
        self.provenance.dump_ids.contains(dump_id)
    }

    /// Age in fractional days relative to `now`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn age_days(&self, now: u64) -> f64 {
        now.saturating_sub(self.created_at) as f64 / SECONDS_PER_DAY
    }
}

/// Partial update applied to a substrate unit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubstrateUpdate {
    /// New title.
    pub title: Option<String>,
    /// New content.
    pub content: Option<String>,
    /// New confidence.
    pub confidence: Option<f32>,
    /// New state.
    pub state: Option<SubstrateState>,
    /// Replacement synonym list.
    pub synonyms: Option<Vec<String>>,
    /// Canonical unit id (merges).
    pub canonical_id: Option<SubstrateId>,
}

impl SubstrateUpdate {
    /// Returns true if the update changes nothing.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.content.is_none()
            && self.confidence.is_none()
            && self.state.is_none()
            && self.synonyms.is_none()
            && self.canonical_id.is_none()
    }

    /// Applies the update to a unit in place.
    pub fn apply_to(&self, unit: &mut SubstrateUnit, now: u64) {
        if let Some(title) = &self.title {
            unit.title.clone_from(title);
        }
        if let Some(content) = &self.content {
            unit.content.clone_from(content);
        }
        if let Some(confidence) = self.confidence {
            unit.confidence_score = confidence.clamp(0.0, 1.0);
        }
        if let Some(state) = self.state {
            unit.state = state;
        }
        if let Some(synonyms) = &self.synonyms {
            unit.synonyms.clone_from(synonyms);
        }
        if let Some(canonical) = &self.canonical_id {
            unit.canonical_id = Some(canonical.clone());
        }
        unit.updated_at = now;
    }
}
