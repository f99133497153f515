//! LLM client abstraction.
//!
//! Every pipeline stage that can use a model goes through [`LlmProvider`].
//! Each call returns either a parsed structured result or an error; the
//! stages rely on that explicit signal to take their heuristic fallbacks.

mod anthropic;
pub mod prompts;
mod resilience;

pub use anthropic::AnthropicClient;
pub use resilience::{LlmResilienceConfig, ResilientLlmProvider, RetryPolicy};

use crate::config::{LlmConfig, LlmProviderKind};
use crate::{Error, Result};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;

/// A model backend used by the pipeline stages.
///
/// Implementors supply [`complete`](Self::complete); the structured calls
/// build their prompts from [`prompts`] and parse the reply as JSON.
pub trait LlmProvider: Send + Sync {
    /// Short provider label used in logs and metric labels.
    fn name(&self) -> &'static str;

    /// Sends a single prompt and returns the raw reply text.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or an unusable reply.
    fn complete(&self, prompt: &str) -> Result<String>;

    /// Sends a system instruction plus a user message.
    ///
    /// Without native support the two are joined into one prompt.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or an unusable reply.
    fn complete_with_system(&self, system: &str, user: &str) -> Result<String> {
        self.complete(&format!("{system}\n\n## Input\n\n{user}"))
    }

    /// Extracts structured candidates from dump content.
    ///
    /// # Errors
    ///
    /// Returns an error if the call fails or the response is not valid JSON.
    fn extract(&self, content: &str, content_type: &str) -> Result<ExtractionResponse> {
        let (system, user) = prompts::extraction(content, content_type);
        parse_json("extract", &self.complete_with_system(&system, &user)?)
    }

    /// Selects the most relevant composition candidates.
    ///
    /// `candidates` is a rendered list with one `id` per line.
    ///
    /// # Errors
    ///
    /// Returns an error if the call fails or the response is malformed.
    fn score_candidates(
        &self,
        intent: &str,
        themes: &[String],
        candidates: &str,
    ) -> Result<CandidateSelection> {
        let (system, user) = prompts::scoring(intent, themes, candidates);
        parse_json("score_candidates", &self.complete_with_system(&system, &user)?)
    }

    /// Plans a document narrative over selected substrate.
    ///
    /// # Errors
    ///
    /// Returns an error if the call fails or the response is malformed.
    fn generate_narrative(
        &self,
        intent: &str,
        document_type: &str,
        digest: &str,
    ) -> Result<NarrativePlan> {
        let (system, user) = prompts::narrative(intent, document_type, digest);
        parse_json("generate_narrative", &self.complete_with_system(&system, &user)?)
    }

    /// Writes the prose of one document section.
    ///
    /// # Errors
    ///
    /// Returns an error if the call fails or returns no text.
    fn generate_section_text(
        &self,
        section: &PlannedSection,
        intent: &str,
        material: &str,
    ) -> Result<String> {
        let (system, user) =
            prompts::section(&section.title, &section.description, intent, material);
        let reply = self.complete_with_system(&system, &user)?;
        match reply.trim() {
            "" => Err(Error::operation("generate_section_text", "empty response")),
            text => Ok(text.to_string()),
        }
    }

    /// Produces a structured reflection over a window digest.
    ///
    /// # Errors
    ///
    /// Returns an error if the call fails or the response is malformed.
    fn generate_reflection(&self, digest: &str) -> Result<ReflectionDraft> {
        let (system, user) = prompts::reflection(digest);
        parse_json("generate_reflection", &self.complete_with_system(&system, &user)?)
    }
}

const fn default_confidence() -> f32 {
    0.7
}

/// Structured extraction output.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExtractionResponse {
    /// Factual statements.
    #[serde(default)]
    pub facts: Vec<ExtractedItem>,
    /// Interpretations and findings.
    #[serde(default)]
    pub insights: Vec<ExtractedItem>,
    /// Actions and next steps.
    #[serde(default)]
    pub actions: Vec<ExtractedItem>,
    /// Entity-like context items.
    #[serde(default)]
    pub context: Vec<ExtractedContext>,
}

impl ExtractionResponse {
    /// Returns true when nothing was extracted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
            && self.insights.is_empty()
            && self.actions.is_empty()
            && self.context.is_empty()
    }
}

/// One extracted block candidate.
#[derive(Debug, Clone, Deserialize)]
pub struct ExtractedItem {
    /// Short title.
    #[serde(default)]
    pub title: String,
    /// Full statement.
    pub content: String,
    /// Semantic type name, if the model gave one.
    #[serde(default)]
    pub semantic_type: Option<String>,
    /// Model confidence.
    #[serde(default = "default_confidence")]
    pub confidence: f32,
}

/// One extracted context item candidate.
#[derive(Debug, Clone, Deserialize)]
pub struct ExtractedContext {
    /// Entity label.
    pub label: String,
    /// Entity kind name.
    #[serde(default)]
    pub kind: Option<String>,
    /// What the entity means in this basket.
    #[serde(default)]
    pub semantic_meaning: Option<String>,
    /// Alternative names.
    #[serde(default)]
    pub synonyms: Vec<String>,
    /// Model confidence.
    #[serde(default = "default_confidence")]
    pub confidence: f32,
}

/// Candidate selection returned by the scoring step.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CandidateSelection {
    /// Selected candidates in preference order.
    #[serde(default)]
    pub selected: Vec<SelectedCandidate>,
}

/// One selected candidate.
#[derive(Debug, Clone, Deserialize)]
pub struct SelectedCandidate {
    /// Candidate id.
    pub id: String,
    /// Sub-theme grouping.
    #[serde(default)]
    pub theme: Option<String>,
    /// Relevance score.
    #[serde(default)]
    pub relevance: Option<f32>,
}

/// Narrative plan for a document.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NarrativePlan {
    /// Suggested title.
    #[serde(default)]
    pub title: Option<String>,
    /// Opening paragraph.
    #[serde(default)]
    pub introduction: String,
    /// One-line summary.
    #[serde(default)]
    pub summary: String,
    /// Planned sections.
    #[serde(default)]
    pub sections: Vec<PlannedSection>,
}

/// One planned section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlannedSection {
    /// Section title.
    pub title: String,
    /// What the section should convey.
    #[serde(default)]
    pub description: String,
    /// Semantic types feeding the section; empty means all.
    #[serde(default)]
    pub substrate_refs: Vec<String>,
    /// Display order.
    #[serde(default)]
    pub order: Option<usize>,
}

/// Structured reflection draft.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReflectionDraft {
    /// Overall summary.
    #[serde(default)]
    pub summary: String,
    /// Recurring patterns.
    #[serde(default)]
    pub patterns: Vec<DraftClaim>,
    /// Tensions or contradictions.
    #[serde(default)]
    pub tensions: Vec<DraftClaim>,
    /// Opportunities.
    #[serde(default)]
    pub opportunities: Vec<DraftClaim>,
    /// Open questions.
    #[serde(default)]
    pub questions: Vec<DraftClaim>,
    /// Recommendations.
    #[serde(default)]
    pub recommendations: Vec<DraftClaim>,
}

/// One cited claim in a reflection draft.
#[derive(Debug, Clone, Deserialize)]
pub struct DraftClaim {
    /// The claim.
    pub text: String,
    /// Ids cited as evidence.
    #[serde(default)]
    pub evidence_ids: Vec<String>,
}

/// Timeouts applied to provider HTTP clients. Zero leaves a timeout unset.
#[derive(Debug, Clone, Copy)]
pub struct LlmHttpConfig {
    /// Whole-request timeout in milliseconds.
    pub timeout_ms: u64,
    /// TCP connect timeout in milliseconds.
    pub connect_timeout_ms: u64,
}

impl Default for LlmHttpConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            connect_timeout_ms: 3_000,
        }
    }
}

impl LlmHttpConfig {
    /// Copies the timeouts out of `[llm]` settings.
    #[must_use]
    pub const fn from_config(config: &LlmConfig) -> Self {
        Self {
            timeout_ms: config.timeout_ms,
            connect_timeout_ms: config.connect_timeout_ms,
        }
    }
}

/// Builds the blocking client used by providers.
///
/// A builder failure (for example a broken TLS backend) degrades to a client
/// without timeouts rather than disabling the provider.
#[must_use]
pub fn build_http_client(config: LlmHttpConfig) -> reqwest::blocking::Client {
    let millis = |ms: u64| (ms > 0).then(|| Duration::from_millis(ms));
    let builder = reqwest::blocking::Client::builder();
    let builder = match millis(config.timeout_ms) {
        Some(timeout) => builder.timeout(timeout),
        None => builder.timeout(None),
    };
    let builder = match millis(config.connect_timeout_ms) {
        Some(timeout) => builder.connect_timeout(timeout),
        None => builder,
    };
    match builder.build() {
        Ok(client) => client,
        Err(e) => {
            tracing::warn!(error = %e, "LLM HTTP client fell back to defaults");
            reqwest::blocking::Client::new()
        },
    }
}

/// Builds the configured provider, wrapped with retries and a circuit breaker.
///
/// Returns `None` when no provider is configured or no API key is available;
/// every stage then runs its heuristic path.
#[must_use]
pub fn build_provider(config: &LlmConfig) -> Option<Arc<dyn LlmProvider>> {
    match config.provider {
        LlmProviderKind::None => None,
        LlmProviderKind::Anthropic => {
            let client = AnthropicClient::from_config(config);
            if !client.has_api_key() {
                tracing::warn!("No Anthropic API key configured, using heuristic stages");
                return None;
            }
            let resilience = LlmResilienceConfig::from_config(config);
            Some(Arc::new(ResilientLlmProvider::new(client, resilience)))
        },
    }
}

/// Parses the JSON payload of a model reply into `T`.
///
/// # Errors
///
/// Returns [`Error::OperationFailed`] tagged with `operation` when the
/// payload does not deserialize.
pub fn parse_json<T: DeserializeOwned>(operation: &str, response: &str) -> Result<T> {
    serde_json::from_str(extract_json_from_response(response))
        .map_err(|e| Error::operation(operation, format!("Invalid JSON: {e}")))
}

/// Locates the JSON payload in a model reply.
///
/// Prefers the body of the first fenced code block, then the widest
/// `{...}` span, then the widest `[...]` span, then the whole reply.
pub fn extract_json_from_response(response: &str) -> &str {
    let text = response.trim();
    fenced_body(text)
        .or_else(|| widest_span(text, '{', '}'))
        .or_else(|| widest_span(text, '[', ']'))
        .unwrap_or(text)
}

fn fenced_body(text: &str) -> Option<&str> {
    let after_fence = &text[text.find("```")? + 3..];
    // Skip a language tag such as `json`.
    let tag_len = after_fence
        .find(|c: char| !c.is_ascii_alphanumeric())
        .unwrap_or(after_fence.len());
    let body = &after_fence[tag_len..];
    Some(body[..body.find("```")?].trim())
}

fn widest_span(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    (end > start).then(|| &text[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(r#"{"a": 1}"#, r#"{"a": 1}"# ; "bare object")]
    #[test_case("```json\n{\"a\": 1}\n```", r#"{"a": 1}"# ; "tagged fence")]
    #[test_case("```\n[1, 2]\n```", "[1, 2]" ; "untagged fence")]
    #[test_case("Sure! {\"a\": 1} Anything else?", r#"{"a": 1}"# ; "chatty wrapper")]
    #[test_case("ids: [\"b1\", \"b2\"]", r#"["b1", "b2"]"# ; "bare array")]
    #[test_case("no payload", "no payload" ; "nothing to find")]
    fn test_extract_json_payload(reply: &str, expected: &str) {
        assert_eq!(extract_json_from_response(reply), expected);
    }

    #[test]
    fn test_parse_extraction_defaults() {
        let response = r#"{"facts": [{"title": "Spam", "content": "API gets spam"}]}"#;
        let parsed: ExtractionResponse = parse_json("extract", response).unwrap();
        assert_eq!(parsed.facts.len(), 1);
        assert!((parsed.facts[0].confidence - 0.7).abs() < f32::EPSILON);
        assert!(parsed.insights.is_empty());
        assert!(!parsed.is_empty());
    }

    #[test]
    fn test_parse_selection_malformed() {
        let result: Result<CandidateSelection> = parse_json("score", "no json here");
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_reflection_draft() {
        let response = r#"```json
        {"summary": "Rate limiting dominates", "patterns": [{"text": "spam", "evidence_ids": ["b1"]}]}
        ```"#;
        let draft: ReflectionDraft = parse_json("reflect", response).unwrap();
        assert_eq!(draft.patterns[0].evidence_ids, vec!["b1".to_string()]);
        assert!(draft.tensions.is_empty());
    }

    #[test]
    fn test_build_provider_none() {
        let config = LlmConfig {
            provider: LlmProviderKind::None,
            ..LlmConfig::default()
        };
        assert!(build_provider(&config).is_none());
    }
}
