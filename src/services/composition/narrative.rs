//! Narrative planning and per-section prose.

use super::intent::{IntentAnalysis, Organization};
use super::retrieval::GapSnippet;
use super::selection::SelectedItem;
use crate::llm::{LlmProvider, NarrativePlan, PlannedSection};
use crate::models::{DocumentSection, SemanticType};
use crate::services::text;
use std::fmt::Write as _;

/// Characters of each item in prompt material.
const MATERIAL_ITEM_CHARS: usize = 400;

/// A planned and written narrative.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ComposedNarrative {
    /// Title suggested by the plan.
    pub title: Option<String>,
    /// Opening paragraph.
    pub introduction: String,
    /// One-line summary.
    pub summary: String,
    /// Written sections in order.
    pub sections: Vec<DocumentSection>,
    /// Whether the heuristic plan replaced the narrative step.
    pub used_fallback_plan: bool,
    /// Sections whose prose fell back to their description.
    pub fallback_sections: usize,
}

impl ComposedNarrative {
    /// Renders the narrative as Markdown.
    #[must_use]
    pub fn render(&self, title: &str) -> String {
        let mut out = format!("# {title}\n\n");
        if !self.summary.is_empty() {
            let _ = write!(out, "_{}_\n\n", self.summary);
        }
        if !self.introduction.is_empty() {
            let _ = write!(out, "{}\n\n", self.introduction);
        }
        for section in &self.sections {
            let _ = write!(out, "## {}\n\n{}\n\n", section.title, section.content);
        }
        out.trim_end().to_string()
    }
}

/// Compact digest of selected material for the planning prompt.
#[must_use]
pub fn digest(items: &[SelectedItem], snippets: &[GapSnippet]) -> String {
    let mut lines: Vec<String> = items
        .iter()
        .map(|item| {
            let c = &item.candidate;
            format!(
                "[{}] {} ({}): {} | {}",
                c.id,
                c.semantic_type,
                item.theme.as_deref().unwrap_or("general"),
                c.title,
                text::truncate(&c.content, MATERIAL_ITEM_CHARS)
            )
        })
        .collect();
    lines.extend(
        snippets
            .iter()
            .map(|s| format!("[{}] raw ({}): {}", s.dump_id, s.reason, s.text)),
    );
    lines.join("\n")
}

/// Plans sections from selected items without a model.
///
/// One section per semantic type, in priority order. Descriptions carry the
/// items themselves so they read as content when used as fallback prose.
#[must_use]
pub fn heuristic_plan(analysis: &IntentAnalysis, items: &[SelectedItem]) -> NarrativePlan {
    let mut types: Vec<SemanticType> = Vec::new();
    for item in items {
        if !types.contains(&item.candidate.semantic_type) {
            types.push(item.candidate.semantic_type);
        }
    }
    let rank = |t: &SemanticType| {
        analysis
            .priorities
            .iter()
            .position(|p| p == t)
            .unwrap_or(usize::MAX)
    };
    match analysis.organization {
        Organization::ProblemSolution => types.sort_by_key(|t| match t {
            SemanticType::Problem => 0,
            SemanticType::Solution | SemanticType::Action => 1,
            _ => 2 + rank(t).min(100),
        }),
        Organization::Chronological => {},
        Organization::Thematic | Organization::Priority => types.sort_by_key(|t| rank(t)),
    }

    let sections = types
        .iter()
        .enumerate()
        .map(|(order, semantic_type)| {
            let sentences: Vec<String> = items
                .iter()
                .filter(|i| i.candidate.semantic_type == *semantic_type)
                .map(|i| sentence(&i.candidate.content, &i.candidate.title))
                .collect();
            PlannedSection {
                title: section_title(*semantic_type),
                description: sentences.join(" "),
                substrate_refs: vec![semantic_type.as_str().to_string()],
                order: Some(order),
            }
        })
        .collect();

    NarrativePlan {
        title: None,
        introduction: format!(
            "This {} draws on {} items from the basket.",
            analysis.document_type.as_str(),
            items.len()
        ),
        summary: if analysis.themes.is_empty() {
            String::new()
        } else {
            format!("Focus: {}.", analysis.themes.join(", "))
        },
        sections,
    }
}

fn sentence(content: &str, title: &str) -> String {
    let body = if content.trim().is_empty() { title } else { content };
    let body = body.trim();
    if body.ends_with(['.', '!', '?']) {
        body.to_string()
    } else {
        format!("{body}.")
    }
}

fn section_title(semantic_type: SemanticType) -> String {
    match semantic_type {
        SemanticType::Problem => "Challenges".to_string(),
        SemanticType::Solution => "Approaches".to_string(),
        SemanticType::Goal | SemanticType::Objective => "Goals".to_string(),
        SemanticType::Insight | SemanticType::Finding => "Insights".to_string(),
        SemanticType::Action => "Next Steps".to_string(),
        SemanticType::Question => "Open Questions".to_string(),
        other => {
            let name = other.as_str().replace('_', " ");
            let mut chars = name.chars();
            chars.next().map_or_else(String::new, |first| {
                first.to_uppercase().chain(chars).collect()
            })
        },
    }
}

/// Material for one section: items whose type the section references, or
/// every item when it references none.
fn material_for(section: &PlannedSection, items: &[SelectedItem], snippets: &[GapSnippet]) -> String {
    let wanted: Vec<SemanticType> = section
        .substrate_refs
        .iter()
        .filter_map(|r| SemanticType::parse(r))
        .collect();
    let mut lines: Vec<String> = items
        .iter()
        .filter(|i| wanted.is_empty() || wanted.contains(&i.candidate.semantic_type))
        .map(|i| {
            format!(
                "- {}: {}",
                i.candidate.title,
                text::truncate(&i.candidate.content, MATERIAL_ITEM_CHARS)
            )
        })
        .collect();
    if wanted.is_empty() {
        lines.extend(snippets.iter().map(|s| format!("- (raw) {}", s.text)));
    }
    lines.join("\n")
}

/// Plans the narrative and writes every section.
///
/// A failed or empty plan is replaced by [`heuristic_plan`]; a failed
/// section keeps its own description as prose.
#[must_use]
pub fn compose_narrative(
    llm: Option<&dyn LlmProvider>,
    intent: &str,
    analysis: &IntentAnalysis,
    items: &[SelectedItem],
    snippets: &[GapSnippet],
) -> ComposedNarrative {
    let planned = llm.and_then(|llm| {
        match llm.generate_narrative(intent, analysis.document_type.as_str(), &digest(items, snippets)) {
            Ok(plan) if !plan.sections.is_empty() => Some(plan),
            Ok(_) => {
                tracing::warn!("Narrative plan had no sections, using heuristic plan");
                None
            },
            Err(e) => {
                tracing::warn!(error = %e, "Narrative planning failed, using heuristic plan");
                None
            },
        }
    });
    let used_fallback_plan = planned.is_none();
    let mut plan = planned.unwrap_or_else(|| heuristic_plan(analysis, items));
    plan.sections.sort_by_key(|s| s.order.unwrap_or(usize::MAX));

    let mut fallback_sections = 0;
    let sections: Vec<DocumentSection> = plan
        .sections
        .iter()
        .enumerate()
        .map(|(order, section)| {
            let written = if used_fallback_plan {
                None
            } else {
                llm.and_then(|llm| {
                    let material = material_for(section, items, snippets);
                    llm.generate_section_text(section, intent, &material)
                        .map_err(|e| {
                            tracing::warn!(section = %section.title, error = %e, "Section generation failed");
                        })
                        .ok()
                })
            };
            let content = written.unwrap_or_else(|| {
                fallback_sections += 1;
                section.description.clone()
            });
            DocumentSection {
                title: section.title.clone(),
                content,
                order,
            }
        })
        .collect();

    ComposedNarrative {
        title: plan.title.filter(|t| !t.trim().is_empty()),
        introduction: plan.introduction,
        summary: plan.summary,
        sections,
        used_fallback_plan,
        fallback_sections,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SubstrateId, SubstrateKind};
    use crate::services::composition::intent::analyze_intent;
    use crate::services::composition::retrieval::CompositionCandidate;
    use crate::{Error, Result};

    fn item(id: &str, semantic_type: SemanticType, content: &str) -> SelectedItem {
        SelectedItem {
            candidate: CompositionCandidate {
                id: SubstrateId::new(id),
                kind: SubstrateKind::Block,
                semantic_type,
                title: id.to_string(),
                content: content.to_string(),
                confidence: 0.7,
                created_at: 0,
                freshness: 1.0,
                has_provenance: true,
                pinned: false,
            },
            score: 0.7,
            theme: None,
        }
    }

    struct Writer {
        plan: Option<NarrativePlan>,
        fail_sections: bool,
    }

    impl LlmProvider for Writer {
        fn name(&self) -> &'static str {
            "writer"
        }
        fn complete(&self, _prompt: &str) -> Result<String> {
            Err(Error::operation("complete", "unused"))
        }
        fn generate_narrative(&self, _: &str, _: &str, _: &str) -> Result<NarrativePlan> {
            self.plan
                .clone()
                .ok_or_else(|| Error::operation("generate_narrative", "timeout"))
        }
        fn generate_section_text(&self, section: &PlannedSection, _: &str, material: &str) -> Result<String> {
            if self.fail_sections {
                return Err(Error::operation("generate_section_text", "overloaded"));
            }
            Ok(format!("{} connects {} items", section.title, material.lines().count()))
        }
    }

    #[test]
    fn test_problem_solution_order() {
        let items = vec![
            item("s", SemanticType::Solution, "Add rate limiting"),
            item("i", SemanticType::Insight, "Spam peaks at night"),
            item("p", SemanticType::Problem, "API is vulnerable to spam"),
        ];
        let plan = heuristic_plan(&analyze_intent("analyze the decision"), &items);
        let titles: Vec<&str> = plan.sections.iter().map(|s| s.title.as_str()).collect();
        assert_eq!(titles, vec!["Challenges", "Approaches", "Insights"]);
        assert_eq!(plan.sections[1].description, "Add rate limiting.");
    }

    #[test]
    fn test_without_llm_sections_use_descriptions() {
        let items = vec![item("a", SemanticType::Insight, "Users churn after onboarding.")];
        let narrative = compose_narrative(None, "summarize", &analyze_intent("summarize"), &items, &[]);
        assert!(narrative.used_fallback_plan);
        assert_eq!(narrative.sections.len(), 1);
        assert_eq!(narrative.sections[0].content, "Users churn after onboarding.");
        assert!(narrative.render("Doc").contains("## Insights"));
    }

    #[test]
    fn test_failed_sections_keep_description() {
        let plan = NarrativePlan {
            title: Some("Spam Defense".to_string()),
            introduction: "How the pieces fit.".to_string(),
            summary: "Rate limiting answers the spam risk.".to_string(),
            sections: vec![
                PlannedSection {
                    title: "Risk".to_string(),
                    description: "Why spam matters".to_string(),
                    substrate_refs: vec!["problem".to_string()],
                    order: Some(1),
                },
                PlannedSection {
                    title: "Context".to_string(),
                    description: "Background".to_string(),
                    substrate_refs: Vec::new(),
                    order: Some(0),
                },
            ],
        };
        let llm = Writer {
            plan: Some(plan),
            fail_sections: true,
        };
        let items = vec![item("p", SemanticType::Problem, "API is vulnerable")];
        let narrative = compose_narrative(Some(&llm), "x", &analyze_intent("x"), &items, &[]);
        assert!(!narrative.used_fallback_plan);
        assert_eq!(narrative.fallback_sections, 2);
        assert_eq!(narrative.sections[0].title, "Context");
        assert_eq!(narrative.sections[1].content, "Why spam matters");
        assert_eq!(narrative.title.as_deref(), Some("Spam Defense"));
    }

    #[test]
    fn test_section_material_is_scoped() {
        let plan = NarrativePlan {
            sections: vec![PlannedSection {
                title: "Risk".to_string(),
                substrate_refs: vec!["problem".to_string()],
                ..PlannedSection::default()
            }],
            ..NarrativePlan::default()
        };
        let llm = Writer {
            plan: Some(plan),
            fail_sections: false,
        };
        let items = vec![
            item("p", SemanticType::Problem, "API is vulnerable"),
            item("g", SemanticType::Goal, "Reach 99.9% uptime"),
        ];
        let narrative = compose_narrative(Some(&llm), "x", &analyze_intent("x"), &items, &[]);
        assert_eq!(narrative.sections[0].content, "Risk connects 1 items");
        assert_eq!(narrative.fallback_sections, 0);
    }
}
