//! Intent analysis for composition requests.

use crate::models::SemanticType;
use crate::services::text;

/// Kind of document a request asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentType {
    /// Condensed overview of the basket.
    Summary,
    /// Status or progress report.
    Report,
    /// Forward-looking plan.
    Plan,
    /// Short briefing.
    Brief,
    /// Analysis of decisions or trade-offs.
    Analysis,
    /// General narrative.
    Narrative,
}

impl DocumentType {
    /// Returns the type as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Summary => "summary",
            Self::Report => "report",
            Self::Plan => "plan",
            Self::Brief => "brief",
            Self::Analysis => "analysis",
            Self::Narrative => "narrative",
        }
    }

    /// Semantic types this document type draws on, most important first.
    #[must_use]
    pub const fn priorities(&self) -> &'static [SemanticType] {
        match self {
            Self::Summary => &[
                SemanticType::Insight,
                SemanticType::Fact,
                SemanticType::Goal,
                SemanticType::Problem,
            ],
            Self::Report => &[
                SemanticType::Metric,
                SemanticType::Event,
                SemanticType::Fact,
                SemanticType::Problem,
            ],
            Self::Plan => &[
                SemanticType::Goal,
                SemanticType::Action,
                SemanticType::Solution,
                SemanticType::Constraint,
            ],
            Self::Brief => &[SemanticType::Insight, SemanticType::Fact],
            Self::Analysis => &[
                SemanticType::Insight,
                SemanticType::Rationale,
                SemanticType::Solution,
                SemanticType::Problem,
                SemanticType::Constraint,
            ],
            Self::Narrative => &[
                SemanticType::Concept,
                SemanticType::Insight,
                SemanticType::Fact,
            ],
        }
    }

    const fn organization(&self) -> Organization {
        match self {
            Self::Report => Organization::Chronological,
            Self::Plan => Organization::Priority,
            Self::Analysis => Organization::ProblemSolution,
            Self::Summary | Self::Brief | Self::Narrative => Organization::Thematic,
        }
    }
}

/// How sections are ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Organization {
    /// Grouped by theme.
    Thematic,
    /// In time order.
    Chronological,
    /// Problems followed by their responses.
    ProblemSolution,
    /// Most important first.
    Priority,
}

impl Organization {
    /// Returns the organization as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Thematic => "thematic",
            Self::Chronological => "chronological",
            Self::ProblemSolution => "problem_solution",
            Self::Priority => "priority",
        }
    }
}

/// Register of the generated prose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    /// Neutral and precise.
    Analytical,
    /// Short and decision-oriented.
    Executive,
    /// Informal.
    Conversational,
}

/// Result of analyzing a composition request.
#[derive(Debug, Clone, PartialEq)]
pub struct IntentAnalysis {
    /// Detected document type.
    pub document_type: DocumentType,
    /// Key themes from the request.
    pub themes: Vec<String>,
    /// Semantic types to retrieve first.
    pub priorities: Vec<SemanticType>,
    /// Section ordering style.
    pub organization: Organization,
    /// Prose register.
    pub tone: Tone,
    /// Confidence in the classification.
    pub confidence: f32,
    /// Whether the request asks for raw source material.
    pub wants_raw_dumps: bool,
}

const TYPE_KEYWORDS: &[(DocumentType, &[&str])] = &[
    (
        DocumentType::Analysis,
        &["analy", "decision", "trade-off", "tradeoff", "compare", "evaluate", "why"],
    ),
    (DocumentType::Plan, &["plan", "roadmap", "strategy", "next steps", "proposal"]),
    (DocumentType::Report, &["report", "status", "progress", "update", "weekly"]),
    (DocumentType::Brief, &["brief", "overview", "tl;dr", "one-pager"]),
    (DocumentType::Summary, &["summar", "recap", "digest"]),
];

const RAW_MARKERS: &[&str] = &["raw", "verbatim", "quote", "source material", "original notes"];
const EXECUTIVE_MARKERS: &[&str] = &["executive", "leadership", "board", "stakeholder"];
const CONVERSATIONAL_MARKERS: &[&str] = &["blog", "casual", "story", "friendly"];

/// Classifies a free-text composition request.
///
/// The first matching type keyword group wins. A request matching none is a
/// general narrative with low confidence.
#[must_use]
pub fn analyze_intent(intent: &str) -> IntentAnalysis {
    let lower = intent.to_lowercase();
    let matched = TYPE_KEYWORDS
        .iter()
        .find(|(_, words)| text::contains_any(&lower, words))
        .map(|(document_type, _)| *document_type);
    let document_type = matched.unwrap_or(DocumentType::Narrative);

    let themes = text::keywords(intent, 5);
    let mut confidence: f32 = if matched.is_some() { 0.8 } else { 0.5 };
    if themes.len() >= 2 {
        confidence += 0.1;
    }

    let tone = if text::contains_any(&lower, EXECUTIVE_MARKERS) {
        Tone::Executive
    } else if text::contains_any(&lower, CONVERSATIONAL_MARKERS) {
        Tone::Conversational
    } else {
        Tone::Analytical
    };

    IntentAnalysis {
        document_type,
        priorities: document_type.priorities().to_vec(),
        organization: document_type.organization(),
        themes,
        tone,
        confidence: confidence.min(0.95),
        wants_raw_dumps: text::contains_any(&lower, RAW_MARKERS),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("summarize architecture decisions", DocumentType::Analysis; "decision beats summary")]
    #[test_case("weekly status report", DocumentType::Report; "report")]
    #[test_case("draft a roadmap for Q3", DocumentType::Plan; "plan")]
    #[test_case("recap of the offsite", DocumentType::Summary; "summary")]
    #[test_case("write something", DocumentType::Narrative; "fallback")]
    fn test_document_type(intent: &str, expected: DocumentType) {
        assert_eq!(analyze_intent(intent).document_type, expected);
    }

    #[test]
    fn test_unmatched_intent_has_low_confidence() {
        let analysis = analyze_intent("write something");
        assert!(analysis.confidence < 0.6);
        assert_eq!(analysis.organization, Organization::Thematic);
    }

    #[test]
    fn test_themes_and_raw_request() {
        let analysis = analyze_intent("Leadership brief on pricing experiments with raw quotes");
        assert_eq!(analysis.document_type, DocumentType::Brief);
        assert_eq!(analysis.tone, Tone::Executive);
        assert!(analysis.wants_raw_dumps);
        assert!(analysis.themes.contains(&"pricing".to_string()));
    }
}
