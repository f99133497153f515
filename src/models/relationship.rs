//! Relationship (graph edge) types.

use super::{BasketId, RelationshipId, SubstrateId, SubstrateKind};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Type of a directed substrate edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipType {
    /// Same or related semantic types.
    SemanticSimilarity,
    /// Overlapping vocabulary.
    RelatedContent,
    /// Shared keyword themes.
    ThematicConnection,
    /// One causes the other.
    CausalRelationship,
    /// One precedes the other.
    TemporalSequence,
    /// One enables the other.
    EnablementChain,
    /// One affects the other.
    ImpactRelationship,
    /// One is conditional on the other.
    ConditionalLogic,
    /// A block mentions an entity.
    ContextReference,
    /// A solution or action addresses a problem.
    Addresses,
    /// Evidence supports a goal or claim.
    Supports,
    /// Two units disagree.
    Contradicts,
    /// One requires the other.
    DependsOn,
}

impl RelationshipType {
    /// Returns the type as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::SemanticSimilarity => "semantic_similarity",
            Self::RelatedContent => "related_content",
            Self::ThematicConnection => "thematic_connection",
            Self::CausalRelationship => "causal_relationship",
            Self::TemporalSequence => "temporal_sequence",
            Self::EnablementChain => "enablement_chain",
            Self::ImpactRelationship => "impact_relationship",
            Self::ConditionalLogic => "conditional_logic",
            Self::ContextReference => "context_reference",
            Self::Addresses => "addresses",
            Self::Supports => "supports",
            Self::Contradicts => "contradicts",
            Self::DependsOn => "depends_on",
        }
    }

    /// Parses a type from a string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Self::all().iter().copied().find(|t| t.as_str() == s)
    }

    /// Returns all relationship types.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::SemanticSimilarity,
            Self::RelatedContent,
            Self::ThematicConnection,
            Self::CausalRelationship,
            Self::TemporalSequence,
            Self::EnablementChain,
            Self::ImpactRelationship,
            Self::ConditionalLogic,
            Self::ContextReference,
            Self::Addresses,
            Self::Supports,
            Self::Contradicts,
            Self::DependsOn,
        ]
    }

    /// Returns true for the trigger-phrase driven causal family.
    #[must_use]
    pub const fn is_causal_family(&self) -> bool {
        matches!(
            self,
            Self::CausalRelationship
                | Self::TemporalSequence
                | Self::EnablementChain
                | Self::ImpactRelationship
                | Self::ConditionalLogic
        )
    }
}

impl fmt::Display for RelationshipType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One end of an edge.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeRef {
    /// Node kind.
    pub kind: SubstrateKind,
    /// Node id.
    pub id: SubstrateId,
}

impl NodeRef {
    /// Creates a node reference.
    #[must_use]
    pub const fn new(kind: SubstrateKind, id: SubstrateId) -> Self {
        Self { kind, id }
    }
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// Storage conflict key: `(basket, from_kind, from_id, type, to_kind, to_id)`.
pub type ConflictKey = (BasketId, SubstrateKind, SubstrateId, RelationshipType, SubstrateKind, SubstrateId);

/// A typed directed edge between two substrate nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    /// Unique identifier.
    pub id: RelationshipId,
    /// Owning basket.
    pub basket_id: BasketId,
    /// Source node.
    pub from: NodeRef,
    /// Target node.
    pub to: NodeRef,
    /// Edge type.
    pub relationship_type: RelationshipType,
    /// Strength in `[0, 1]`.
    pub strength: f32,
    /// Human-readable explanation.
    pub description: String,
    /// Creation timestamp (Unix epoch seconds).
    pub created_at: u64,
}

impl Relationship {
    /// Creates a relationship; strength is clamped to `[0, 1]`.
    #[must_use]
    pub fn new(
        basket_id: BasketId,
        from: NodeRef,
        to: NodeRef,
        relationship_type: RelationshipType,
        strength: f32,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: RelationshipId::generate(),
            basket_id,
            from,
            to,
            relationship_type,
            strength: strength.clamp(0.0, 1.0),
            description: description.into(),
            created_at: crate::current_timestamp(),
        }
    }

    /// Returns the 6-tuple storage conflict key.
    #[must_use]
    pub fn conflict_key(&self) -> ConflictKey {
        (
            self.basket_id.clone(),
            self.from.kind,
            self.from.id.clone(),
            self.relationship_type,
            self.to.kind,
            self.to.id.clone(),
        )
    }

    /// Returns the normalized unordered pair key (smaller node first).
    #[must_use]
    pub fn pair_key(&self) -> (NodeRef, NodeRef) {
        if self.from <= self.to {
            (self.from.clone(), self.to.clone())
        } else {
            (self.to.clone(), self.from.clone())
        }
    }

    /// Returns true if the edge touches the given substrate id.
    #[must_use]
    pub fn touches(&self, id: &SubstrateId) -> bool {
        &self.from.id == id || &self.to.id == id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str) -> NodeRef {
        NodeRef::new(SubstrateKind::Block, SubstrateId::new(id))
    }

    #[test]
    fn test_pair_key_is_unordered() {
        let basket = BasketId::new("b");
        let ab = Relationship::new(
            basket.clone(),
            node("a"),
            node("b"),
            RelationshipType::RelatedContent,
            0.5,
            "",
        );
        let ba = Relationship::new(
            basket,
            node("b"),
            node("a"),
            RelationshipType::Supports,
            0.5,
            "",
        );
        assert_eq!(ab.pair_key(), ba.pair_key());
        assert_ne!(ab.conflict_key(), ba.conflict_key());
    }

    #[test]
    fn test_type_parse() {
        for t in RelationshipType::all() {
            assert_eq!(RelationshipType::parse(t.as_str()), Some(*t));
        }
        assert!(RelationshipType::TemporalSequence.is_causal_family());
        assert!(!RelationshipType::Addresses.is_causal_family());
    }
}
