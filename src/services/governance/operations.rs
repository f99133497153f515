//! Fairness filters applied to planned operations before validation.

use super::extraction::is_meaningful_label;
use crate::models::{Operation, SemanticType};
use crate::services::text;
use std::collections::HashMap;

/// What the fairness pass removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FairnessReport {
    /// Duplicate `(kind, label)` creations collapsed.
    pub duplicates: usize,
    /// Labels too short or stop words.
    pub filtered_labels: usize,
    /// Creations beyond the cap.
    pub over_cap: usize,
}

impl FairnessReport {
    /// Total operations removed.
    #[must_use]
    pub const fn removed(&self) -> usize {
        self.duplicates + self.filtered_labels + self.over_cap
    }
}

/// Filters context item creations.
///
/// Deduplicates `CreateContextItem` by `(kind, label)` keeping the highest
/// confidence, drops short or stop-word labels, and keeps at most
/// `max_context_items` creations ordered by confidence. Other operations
/// keep their relative order and precede the surviving creations.
#[must_use]
pub fn apply_fairness(ops: Vec<Operation>, max_context_items: usize) -> (Vec<Operation>, FairnessReport) {
    let mut report = FairnessReport::default();
    let mut kept: Vec<Operation> = Vec::with_capacity(ops.len());
    let mut best: HashMap<(SemanticType, String), Operation> = HashMap::new();
    let mut order: Vec<(SemanticType, String)> = Vec::new();

    for op in ops {
        let Operation::CreateContextItem {
            label,
            kind,
            confidence,
            ..
        } = &op
        else {
            kept.push(op);
            continue;
        };

        if !is_meaningful_label(label) {
            report.filtered_labels += 1;
            continue;
        }

        let key = (*kind, text::normalize_label(label));
        let confidence = *confidence;
        match best.get(&key) {
            Some(existing) if existing.confidence().unwrap_or(0.0) >= confidence => {
                report.duplicates += 1;
            },
            Some(_) => {
                report.duplicates += 1;
                best.insert(key, op);
            },
            None => {
                order.push(key.clone());
                best.insert(key, op);
            },
        }
    }

    let mut creations: Vec<Operation> = order.into_iter().filter_map(|k| best.remove(&k)).collect();
    creations.sort_by(|a, b| {
        b.confidence()
            .unwrap_or(0.0)
            .total_cmp(&a.confidence().unwrap_or(0.0))
    });
    if creations.len() > max_context_items {
        report.over_cap = creations.len() - max_context_items;
        creations.truncate(max_context_items);
    }

    if report.removed() > 0 {
        tracing::debug!(
            duplicates = report.duplicates,
            filtered_labels = report.filtered_labels,
            over_cap = report.over_cap,
            "Fairness filters removed context items"
        );
    }

    kept.extend(creations);
    (kept, report)
}
