//! Proposal validation.

use crate::models::{Operation, SubstrateKind, SubstrateUnit, ValidatorReport};
use std::collections::HashSet;

/// Confidence below which an operation is flagged.
const LOW_CONFIDENCE: f32 = 0.4;

/// Confidence reported for operation sets that carry none.
const NEUTRAL_CONFIDENCE: f32 = 0.5;

/// Validates an operation set before it is persisted as a proposal.
///
/// Blocking issues keep a proposal in `PROPOSED` for human review; warnings
/// are informational.
pub trait ProposalValidator: Send + Sync {
    /// Produces a report for `ops` against the basket's current substrate.
    fn validate(&self, ops: &[Operation], existing: &[SubstrateUnit]) -> ValidatorReport;
}

/// Structural checks plus mean operation confidence.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultValidator;

impl ProposalValidator for DefaultValidator {
    fn validate(&self, ops: &[Operation], existing: &[SubstrateUnit]) -> ValidatorReport {
        let mut report = ValidatorReport::default();
        let blocks: HashSet<&str> = existing
            .iter()
            .filter(|u| u.kind == SubstrateKind::Block)
            .map(|u| u.id.as_str())
            .collect();
        let items: HashSet<&str> = existing
            .iter()
            .filter(|u| u.kind == SubstrateKind::ContextItem)
            .map(|u| u.id.as_str())
            .collect();

        if ops.is_empty() {
            report.warnings.push("proposal has no operations".to_string());
        }

        for (index, op) in ops.iter().enumerate() {
            if op.confidence().is_some_and(|c| c < LOW_CONFIDENCE) {
                report
                    .warnings
                    .push(format!("op {index} ({op}) has low confidence"));
            }
            match op {
                Operation::CreateBlock { content, .. } if content.trim().is_empty() => {
                    report
                        .blocking_issues
                        .push(format!("op {index} (CreateBlock) has empty content"));
                },
                Operation::CreateContextItem { label, .. } if label.trim().is_empty() => {
                    report
                        .blocking_issues
                        .push(format!("op {index} (CreateContextItem) has empty label"));
                },
                Operation::ReviseBlock { block_id, content, .. } => {
                    if content.trim().is_empty() {
                        report
                            .blocking_issues
                            .push(format!("op {index} (ReviseBlock) has empty content"));
                    }
                    if !blocks.contains(block_id.as_str()) {
                        report
                            .warnings
                            .push(format!("op {index} (ReviseBlock) targets unknown block {block_id}"));
                    }
                },
                Operation::UpdateContextItem {
                    context_item_id, ..
                } if !items.contains(context_item_id.as_str()) => {
                    report.warnings.push(format!(
                        "op {index} (UpdateContextItem) targets unknown item {context_item_id}"
                    ));
                },
                Operation::MergeContextItems {
                    from_ids,
                    canonical_id,
                    ..
                } => {
                    if from_ids.is_empty() {
                        report
                            .blocking_issues
                            .push(format!("op {index} (MergeContextItems) has nothing to merge"));
                    }
                    if from_ids.contains(canonical_id) {
                        report.blocking_issues.push(format!(
                            "op {index} (MergeContextItems) merges {canonical_id} into itself"
                        ));
                    }
                },
                _ => {},
            }
        }

        let confidences: Vec<f32> = ops.iter().filter_map(Operation::confidence).collect();
        report.confidence = if confidences.is_empty() {
            NEUTRAL_CONFIDENCE
        } else {
            #[allow(clippy::cast_precision_loss)]
            let mean = confidences.iter().sum::<f32>() / confidences.len() as f32;
            mean
        };
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SemanticType, SubstrateId};

    fn create_block(content: &str, confidence: f32) -> Operation {
        Operation::CreateBlock {
            title: "t".to_string(),
            content: content.to_string(),
            semantic_type: SemanticType::Fact,
            confidence,
            anchor_role: None,
        }
    }

    #[test]
    fn test_mean_confidence() {
        let report = DefaultValidator.validate(
            &[create_block("a", 0.6), create_block("b", 0.8)],
            &[],
        );
        assert!((report.confidence - 0.7).abs() < 1e-6);
        assert!(!report.is_blocked());
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn test_low_confidence_warns() {
        let report = DefaultValidator.validate(&[create_block("a", 0.2)], &[]);
        assert_eq!(report.warnings.len(), 1);
        assert!(!report.is_blocked());
    }

    #[test]
    fn test_empty_content_blocks() {
        let report = DefaultValidator.validate(&[create_block("  ", 0.9)], &[]);
        assert!(report.is_blocked());
    }

    #[test]
    fn test_self_merge_blocks() {
        let id = SubstrateId::new("s1");
        let report = DefaultValidator.validate(
            &[Operation::MergeContextItems {
                from_ids: vec![id.clone()],
                canonical_id: id,
                merged_synonyms: Vec::new(),
            }],
            &[],
        );
        assert!(report.is_blocked());
        assert!((report.confidence - NEUTRAL_CONFIDENCE).abs() < f32::EPSILON);
    }

    #[test]
    fn test_unknown_revise_target_warns() {
        let report = DefaultValidator.validate(
            &[Operation::ReviseBlock {
                block_id: SubstrateId::new("missing"),
                content: "longer content".to_string(),
                confidence: None,
            }],
            &[],
        );
        assert!(!report.is_blocked());
        assert_eq!(report.warnings.len(), 1);
    }
}
