//! Reflection artifacts and basket signatures.

use super::{AnchorRole, BasketId, ReflectionId, WorkspaceId};
use serde::{Deserialize, Serialize};

/// Category of a reflection entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReflectionCategory {
    /// Overall summary.
    Summary,
    /// Recurring pattern.
    Pattern,
    /// Tension between ideas.
    Tension,
    /// Opportunity worth pursuing.
    Opportunity,
    /// Open question.
    Question,
    /// Recommended next step.
    Recommendation,
    /// Missing information.
    Gap,
}

impl ReflectionCategory {
    /// Returns the category as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Summary => "summary",
            Self::Pattern => "pattern",
            Self::Tension => "tension",
            Self::Opportunity => "opportunity",
            Self::Question => "question",
            Self::Recommendation => "recommendation",
            Self::Gap => "gap",
        }
    }

    /// Parses a category, accepting plural forms.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        let lower = s.trim().to_lowercase();
        let singular = lower.strip_suffix('s').unwrap_or(&lower);
        match singular {
            "summary" | "summarie" => Some(Self::Summary),
            "pattern" => Some(Self::Pattern),
            "tension" => Some(Self::Tension),
            "opportunity" | "opportunitie" => Some(Self::Opportunity),
            "question" => Some(Self::Question),
            "recommendation" => Some(Self::Recommendation),
            "gap" => Some(Self::Gap),
            _ => None,
        }
    }
}

/// One cited reflection claim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReflectionEntry {
    /// Entry category.
    pub category: ReflectionCategory,
    /// Claim text.
    pub text: String,
    /// Ids of window items supporting the claim.
    pub evidence_ids: Vec<String>,
}

/// Read-only reflection output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReflectionArtifact {
    /// Unique identifier.
    pub id: ReflectionId,
    /// Owning basket.
    pub basket_id: BasketId,
    /// Owning workspace.
    pub workspace_id: WorkspaceId,
    /// Rendered reflection text.
    pub reflection_text: String,
    /// What was reflected on (`basket`).
    pub reflection_target_type: String,
    /// Oldest dump timestamp in the window.
    pub substrate_window_start: u64,
    /// Newest dump timestamp in the window.
    pub substrate_window_end: u64,
    /// Idempotency key.
    pub substrate_hash: String,
    /// Structured entries.
    pub entries: Vec<ReflectionEntry>,
    /// True when the heuristic path produced the entries.
    pub used_fallback: bool,
    /// Creation timestamp (Unix epoch seconds).
    pub computed_at: u64,
}

impl ReflectionArtifact {
    /// Returns the structured payload stored in the `meta` column.
    #[must_use]
    pub fn meta(&self) -> serde_json::Value {
        serde_json::json!({
            "entries": self.entries,
            "used_fallback": self.used_fallback,
        })
    }
}

/// Compact basket summary used for cross-basket routing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasketSignature {
    /// Basket described.
    pub basket_id: BasketId,
    /// Owning workspace.
    pub workspace_id: WorkspaceId,
    /// Most frequent keywords.
    pub keywords: Vec<String>,
    /// Most frequent anchor roles.
    pub anchor_roles: Vec<AnchorRole>,
    /// Substrate units considered.
    pub substrate_count: usize,
    /// Hash of the reflection this was computed from.
    pub source_hash: String,
    /// Last update timestamp.
    pub updated_at: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_parse_plural() {
        assert_eq!(
            ReflectionCategory::parse("Patterns"),
            Some(ReflectionCategory::Pattern)
        );
        assert_eq!(
            ReflectionCategory::parse("opportunities"),
            Some(ReflectionCategory::Opportunity)
        );
        assert_eq!(ReflectionCategory::parse("noise"), None);
    }
}
