//! Candidate extraction from raw dump text.
//!
//! Two variants share one output shape:
//!
//! - **LLM**: detects the content type, then asks the provider for
//!   structured facts/insights/actions/context with explicit confidence.
//! - **Heuristic**: segments the text, classifies each segment by keyword
//!   buckets and pulls entity-like phrases with regexes.
//!
//! Extraction never fails. Provider errors and unusable output fall back to
//! the heuristic variant, and empty text yields an empty outcome.

use crate::llm::{ExtractionResponse, LlmProvider};
use crate::models::{AnchorRole, SemanticType};
use crate::services::text::{self, STOP_WORDS};
use regex::Regex;
use std::collections::HashSet;
use std::sync::{Arc, LazyLock};

/// Minimum characters for a segment to become a block candidate.
const MIN_SEGMENT_CHARS: usize = 15;

/// Maximum characters of a generated block title.
const MAX_TITLE_CHARS: usize = 80;

/// Heuristic confidence for a keyword-classified segment.
const CLASSIFIED_CONFIDENCE: f32 = 0.65;

/// Heuristic confidence for a segment that fell through to `concept`.
const FALLBACK_CONFIDENCE: f32 = 0.5;

/// Heuristic confidence for regex-detected entities.
const ENTITY_CONFIDENCE: f32 = 0.6;

static SENTENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^.!?\n]+[.!?]?").unwrap_or_else(|_| unreachable!()));

/// Two or more capitalized words in a row.
static CAPITALIZED_PHRASE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[A-Z][a-zA-Z0-9&]+(?:\s+[A-Z][a-zA-Z0-9&]+)+\b").unwrap_or_else(|_| unreachable!())
});

static QUOTED_PHRASE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"["“]([^"”\n]{3,60})["”]"#).unwrap_or_else(|_| unreachable!())
});

static PROJECT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[Pp]roject\s+([A-Z][\w-]+)").unwrap_or_else(|_| unreachable!())
});

/// Keyword buckets for block classification, in tie-break order.
const BLOCK_BUCKETS: &[(SemanticType, &[&str])] = &[
    (
        SemanticType::Problem,
        &[
            "problem", "issue", "vulnerable", "bug", "broken", "fail", "risk", "struggle",
            "pain", "slow", "error", "outage", "attack", "complain", "difficult", "blocker",
        ],
    ),
    (
        SemanticType::Solution,
        &[
            "should", "implement", "solution", "fix", "solve", "mitigate", "introduce",
            "propose", "resolve", "address", "adopt", "migrate", "rate limit",
        ],
    ),
    (
        SemanticType::Goal,
        &[
            "goal", "aim", "objective", "want to", "plan to", "target", "aspire", "by q",
            "milestone", "achieve",
        ],
    ),
    (
        SemanticType::Insight,
        &[
            "learned", "realized", "insight", "noticed", "found that", "turns out",
            "because", "suggests", "indicates", "means that",
        ],
    ),
];

const QUESTION_OPENERS: &[&str] = &[
    "how ", "what ", "why ", "when ", "where ", "who ", "which ", "should we ", "can we ",
    "could we ", "is it ", "are we ",
];

/// Keyword buckets for entity kind classification.
const ENTITY_BUCKETS: &[(SemanticType, &[&str])] = &[
    (
        SemanticType::Project,
        &["project", "initiative", "program", "launch", "roadmap", "release"],
    ),
    (
        SemanticType::Organization,
        &[
            "inc", "corp", "llc", "ltd", "company", "team", "group", "labs", "university",
            "agency", "foundation", "partners",
        ],
    ),
    (
        SemanticType::Person,
        &[
            "mr", "ms", "mrs", "dr", "ceo", "cto", "cfo", "manager", "engineer", "founder",
            "director", "lead", "said", "says",
        ],
    ),
    (
        SemanticType::Goal,
        &["goal", "objective", "target", "okr"],
    ),
];

/// Content type detected before LLM extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentType {
    /// Revenue, costs, forecasts.
    Financial,
    /// Vulnerabilities, incidents, access control.
    Security,
    /// Features, users, roadmaps.
    Product,
    /// Anything else.
    General,
}

const CONTENT_TYPE_KEYWORDS: &[(ContentType, &[&str])] = &[
    (
        ContentType::Financial,
        &[
            "revenue", "budget", "cost", "profit", "margin", "forecast", "invoice", "arr",
            "mrr", "cash", "expense", "funding", "$",
        ],
    ),
    (
        ContentType::Security,
        &[
            "vulnerab", "attack", "exploit", "breach", "auth", "token", "encryption", "cve",
            "phishing", "malware", "spam", "firewall", "incident",
        ],
    ),
    (
        ContentType::Product,
        &[
            "feature", "user", "customer", "roadmap", "release", "onboarding", "ux",
            "feedback", "launch", "api", "dashboard",
        ],
    ),
];

impl ContentType {
    /// Returns the wire name passed to the extraction provider.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Financial => "financial",
            Self::Security => "security",
            Self::Product => "product",
            Self::General => "general",
        }
    }

    /// Detects the dominant content type by keyword hits; requires at least
    /// two hits to leave `General`.
    #[must_use]
    pub fn detect(content: &str) -> Self {
        let lower = content.to_lowercase();
        let mut best = (Self::General, 1);
        for (kind, keywords) in CONTENT_TYPE_KEYWORDS {
            let hits = keywords.iter().filter(|k| lower.contains(*k)).count();
            if hits > best.1 {
                best = (*kind, hits);
            }
        }
        best.0
    }
}

/// A block-style candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockCandidate {
    /// Short title.
    pub title: String,
    /// Full statement.
    pub content: String,
    /// Classified semantic type.
    pub semantic_type: SemanticType,
    /// Extraction confidence.
    pub confidence: f32,
    /// Inferred anchor role.
    pub anchor_role: Option<AnchorRole>,
}

/// An entity-style (context item) candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextCandidate {
    /// Entity label.
    pub label: String,
    /// Entity kind.
    pub kind: SemanticType,
    /// What the label means in this basket.
    pub semantic_meaning: String,
    /// Alternative labels.
    pub synonyms: Vec<String>,
    /// Extraction confidence.
    pub confidence: f32,
}

/// A substrate candidate awaiting an evolution decision.
#[derive(Debug, Clone, PartialEq)]
pub enum Candidate {
    /// Block candidate.
    Block(BlockCandidate),
    /// Context item candidate.
    Context(ContextCandidate),
}

impl Candidate {
    /// Extraction confidence of either variant.
    #[must_use]
    pub const fn confidence(&self) -> f32 {
        match self {
            Self::Block(b) => b.confidence,
            Self::Context(c) => c.confidence,
        }
    }
}

/// Result of extracting candidates from one or more dumps.
#[derive(Debug, Clone)]
pub struct ExtractionOutcome {
    /// Extracted candidates, blocks first.
    pub candidates: Vec<Candidate>,
    /// Detected content type.
    pub content_type: ContentType,
    /// Top keywords of the analysed text.
    pub keywords: Vec<String>,
    /// Whether the heuristic path was used after an LLM failure.
    pub used_fallback: bool,
    /// Extraction method recorded in substrate provenance.
    pub method: &'static str,
}

impl ExtractionOutcome {
    fn empty() -> Self {
        Self {
            candidates: Vec::new(),
            content_type: ContentType::General,
            keywords: Vec::new(),
            used_fallback: false,
            method: Extractor::HEURISTIC_METHOD,
        }
    }

    /// Number of block candidates.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.candidates
            .iter()
            .filter(|c| matches!(c, Candidate::Block(_)))
            .count()
    }
}

/// Turns dump text into substrate candidates.
#[derive(Clone)]
pub struct Extractor {
    llm: Option<Arc<dyn LlmProvider>>,
}

impl Extractor {
    /// Provenance method for heuristic extraction.
    pub const HEURISTIC_METHOD: &'static str = "heuristic_extraction";

    /// Provenance method for LLM extraction.
    pub const LLM_METHOD: &'static str = "llm_extraction";

    /// Creates an extractor; `None` selects the heuristic variant only.
    #[must_use]
    pub fn new(llm: Option<Arc<dyn LlmProvider>>) -> Self {
        Self { llm }
    }

    /// Creates a heuristic-only extractor.
    #[must_use]
    pub const fn heuristic_only() -> Self {
        Self { llm: None }
    }

    /// Extracts candidates from `content`.
    #[must_use]
    pub fn extract(&self, content: &str) -> ExtractionOutcome {
        if content.trim().is_empty() {
            return ExtractionOutcome::empty();
        }
        let content_type = ContentType::detect(content);
        let keywords = text::keywords(content, 12);

        let Some(llm) = &self.llm else {
            return ExtractionOutcome {
                candidates: heuristic_candidates(content),
                content_type,
                keywords,
                used_fallback: false,
                method: Self::HEURISTIC_METHOD,
            };
        };

        match llm.extract(content, content_type.as_str()) {
            Ok(response) if !response.is_empty() => {
                let candidates = candidates_from_response(response);
                if !candidates.is_empty() {
                    metrics::counter!("extraction_total", "method" => "llm").increment(1);
                    return ExtractionOutcome {
                        candidates,
                        content_type,
                        keywords,
                        used_fallback: false,
                        method: Self::LLM_METHOD,
                    };
                }
                tracing::warn!(
                    content_type = content_type.as_str(),
                    "LLM extraction produced no usable candidates, using fallback"
                );
            },
            Ok(_) => {
                tracing::warn!(
                    content_type = content_type.as_str(),
                    "LLM extraction returned nothing, using fallback"
                );
            },
            Err(e) => {
                tracing::warn!(error = %e, "LLM extraction failed, using fallback");
            },
        }

        metrics::counter!("extraction_total", "method" => "fallback").increment(1);
        ExtractionOutcome {
            candidates: heuristic_candidates(content),
            content_type,
            keywords,
            used_fallback: true,
            method: Self::HEURISTIC_METHOD,
        }
    }

    /// Extracts jointly across several dump texts, producing one candidate
    /// set for a unified proposal.
    #[must_use]
    pub fn extract_joint<S: AsRef<str>>(&self, contents: &[S]) -> ExtractionOutcome {
        let joined = contents
            .iter()
            .map(AsRef::as_ref)
            .filter(|c| !c.trim().is_empty())
            .collect::<Vec<_>>()
            .join("\n\n");
        self.extract(&joined)
    }
}

impl std::fmt::Debug for Extractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Extractor")
            .field("llm", &self.llm.as_ref().map(|l| l.name()))
            .finish()
    }
}

fn candidates_from_response(response: ExtractionResponse) -> Vec<Candidate> {
    let typed = response
        .facts
        .into_iter()
        .map(|item| (item, SemanticType::Fact))
        .chain(response.insights.into_iter().map(|i| (i, SemanticType::Insight)))
        .chain(response.actions.into_iter().map(|i| (i, SemanticType::Action)));

    let mut candidates: Vec<Candidate> = typed
        .filter(|(item, _)| !item.content.trim().is_empty())
        .map(|(item, default_type)| {
            let semantic_type = item
                .semantic_type
                .as_deref()
                .and_then(SemanticType::parse)
                .unwrap_or(default_type);
            let content = item.content.trim().to_string();
            let title = if item.title.trim().is_empty() {
                title_for(&content)
            } else {
                text::truncate(&item.title, MAX_TITLE_CHARS)
            };
            Candidate::Block(BlockCandidate {
                anchor_role: AnchorRole::infer(&content),
                title,
                content,
                semantic_type,
                confidence: item.confidence.clamp(0.0, 1.0),
            })
        })
        .collect();

    candidates.extend(
        response
            .context
            .into_iter()
            .filter(|c| !c.label.trim().is_empty())
            .map(|c| {
                Candidate::Context(ContextCandidate {
                    kind: c
                        .kind
                        .as_deref()
                        .and_then(SemanticType::parse)
                        .unwrap_or(SemanticType::Entity),
                    label: c.label.trim().to_string(),
                    semantic_meaning: c.semantic_meaning.unwrap_or_default(),
                    synonyms: c.synonyms,
                    confidence: c.confidence.clamp(0.0, 1.0),
                })
            }),
    );
    candidates
}

/// Heuristic extraction: segment, classify, then detect entities.
#[must_use]
pub fn heuristic_candidates(content: &str) -> Vec<Candidate> {
    let segments = segments(content);
    let mut candidates: Vec<Candidate> = segments
        .iter()
        .map(|segment| {
            let (semantic_type, confidence) = classify_segment(segment);
            Candidate::Block(BlockCandidate {
                title: title_for(segment),
                content: segment.clone(),
                semantic_type,
                confidence,
                anchor_role: AnchorRole::infer(segment),
            })
        })
        .collect();
    candidates.extend(entity_candidates(content).into_iter().map(Candidate::Context));
    candidates
}

/// Splits content into paragraphs, then sentences, keeping segments above
/// the minimum length.
fn segments(content: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    content
        .split("\n\n")
        .flat_map(|paragraph| SENTENCE.find_iter(paragraph).map(|m| m.as_str().trim()))
        .map(|s| s.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|s| s.chars().count() >= MIN_SEGMENT_CHARS)
        .filter(|s| seen.insert(s.to_lowercase()))
        .collect()
}

/// Classifies a segment into a block semantic type by keyword buckets.
#[must_use]
pub fn classify_segment(segment: &str) -> (SemanticType, f32) {
    let lower = segment.to_lowercase();
    if lower.trim_end().ends_with('?') || QUESTION_OPENERS.iter().any(|q| lower.starts_with(q))
    {
        return (SemanticType::Question, CLASSIFIED_CONFIDENCE);
    }

    let mut best: Option<(SemanticType, usize)> = None;
    for (semantic_type, keywords) in BLOCK_BUCKETS {
        let hits = keywords.iter().filter(|k| lower.contains(*k)).count();
        if hits > best.map_or(0, |(_, h)| h) {
            best = Some((*semantic_type, hits));
        }
    }

    match best {
        Some((semantic_type, hits)) => {
            let bonus = if hits > 1 { 0.1 } else { 0.0 };
            (semantic_type, CLASSIFIED_CONFIDENCE + bonus)
        },
        None => (SemanticType::Concept, FALLBACK_CONFIDENCE),
    }
}

fn title_for(segment: &str) -> String {
    let words: Vec<&str> = segment
        .trim_end_matches(['.', '!', '?'])
        .split_whitespace()
        .take(10)
        .collect();
    text::truncate(&words.join(" "), MAX_TITLE_CHARS)
}

/// Detects entity-like phrases: capitalized runs, quoted phrases and
/// `Project X` mentions.
#[must_use]
pub fn entity_candidates(content: &str) -> Vec<ContextCandidate> {
    let mut found: Vec<(String, Option<SemanticType>)> = Vec::new();

    for cap in PROJECT_PATTERN.captures_iter(content) {
        if let Some(name) = cap.get(1) {
            found.push((format!("Project {}", name.as_str()), Some(SemanticType::Project)));
        }
    }
    for cap in QUOTED_PHRASE.captures_iter(content) {
        if let Some(phrase) = cap.get(1) {
            found.push((phrase.as_str().trim().to_string(), None));
        }
    }
    for m in CAPITALIZED_PHRASE.find_iter(content) {
        if let Some(label) = strip_leading_stop_words(m.as_str()) {
            found.push((label, None));
        }
    }

    let mut seen = HashSet::new();
    found
        .into_iter()
        .filter(|(label, _)| is_meaningful_label(label))
        .filter(|(label, _)| seen.insert(text::normalize_label(label)))
        .map(|(label, kind)| {
            let context = sentence_containing(content, &label);
            let kind = kind.unwrap_or_else(|| classify_entity(&label, &context));
            ContextCandidate {
                semantic_meaning: text::truncate(&context, 200),
                label,
                kind,
                synonyms: Vec::new(),
                confidence: ENTITY_CONFIDENCE,
            }
        })
        .collect()
}

fn strip_leading_stop_words(phrase: &str) -> Option<String> {
    let words: Vec<&str> = phrase
        .split_whitespace()
        .skip_while(|w| STOP_WORDS.contains(w.to_lowercase().as_str()))
        .collect();
    (!words.is_empty()).then(|| words.join(" "))
}

/// Labels must have three or more characters and not be a stop word.
#[must_use]
pub fn is_meaningful_label(label: &str) -> bool {
    let normalized = text::normalize_label(label);
    normalized.chars().count() >= 3 && !STOP_WORDS.contains(normalized.as_str())
}

fn sentence_containing(content: &str, label: &str) -> String {
    SENTENCE
        .find_iter(content)
        .map(|m| m.as_str().trim())
        .find(|s| s.contains(label))
        .unwrap_or(label)
        .to_string()
}

/// Classifies an entity label by keyword buckets over the label and its
/// surrounding sentence; `concept` when nothing matches.
#[must_use]
pub fn classify_entity(label: &str, context: &str) -> SemanticType {
    let label_words = text::word_set(label, 0);
    let context_words = text::word_set(context, 0);
    [label_words, context_words]
        .iter()
        .find_map(|words| {
            ENTITY_BUCKETS
                .iter()
                .find(|(_, keywords)| keywords.iter().any(|k| words.contains(*k)))
                .map(|(kind, _)| *kind)
        })
        .unwrap_or(SemanticType::Concept)
}
