//! Text helpers shared by the stage engines.

// Word counts are small; precision loss in ratios is irrelevant.
#![allow(clippy::cast_precision_loss)]

use std::collections::{BTreeMap, HashSet};
use std::sync::LazyLock;

/// Common English stop words filtered from keyword and label analysis.
pub static STOP_WORDS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    [
        "a", "about", "after", "again", "all", "also", "an", "and", "any", "are", "as", "at",
        "be", "because", "been", "before", "being", "but", "by", "can", "could", "did", "do",
        "does", "doing", "for", "from", "had", "has", "have", "having", "he", "her", "here",
        "him", "his", "how", "i", "if", "in", "into", "is", "it", "its", "just", "may", "me",
        "might", "more", "most", "must", "my", "no", "not", "now", "of", "on", "once", "only",
        "or", "other", "our", "out", "over", "own", "same", "shall", "she", "should", "so",
        "some", "such", "than", "that", "the", "their", "them", "then", "there", "these",
        "they", "this", "those", "through", "to", "too", "under", "until", "up", "very", "was",
        "we", "were", "what", "when", "where", "which", "while", "who", "whom", "why", "will",
        "with", "would", "you", "your", "yes", "yet", "get", "got", "let", "make", "made",
        "need", "needs", "new", "one", "two", "use", "used", "using", "way", "well", "like",
    ]
    .into_iter()
    .collect()
});

/// Lowercased alphanumeric tokens of `text`.
pub fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric() && c != '-' && c != '\'')
        .map(|w| w.trim_matches(|c: char| c == '-' || c == '\'').to_lowercase())
        .filter(|w| !w.is_empty())
}

/// Set of lowercased words in `text` longer than `min_len` characters.
pub fn word_set(text: &str, min_len: usize) -> HashSet<String> {
    tokens(text).filter(|w| w.chars().count() > min_len).collect()
}

/// Jaccard overlap of two word sets; 0 when both are empty.
pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f32 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f32 / union as f32
}

/// The `limit` most frequent non-stop-word keywords (length ≥ 4), ties
/// broken alphabetically.
pub fn keywords(text: &str, limit: usize) -> Vec<String> {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for word in tokens(text) {
        if word.chars().count() >= 4
            && !STOP_WORDS.contains(word.as_str())
            && !word.chars().all(|c| c.is_ascii_digit())
        {
            *counts.entry(word).or_default() += 1;
        }
    }
    let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.into_iter().take(limit).map(|(w, _)| w).collect()
}

/// Truncates to at most `max_chars` characters on a char boundary, adding an
/// ellipsis when shortened.
pub fn truncate(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= max_chars {
        return trimmed.to_string();
    }
    let cut: String = trimmed.chars().take(max_chars.saturating_sub(1)).collect();
    format!("{}…", cut.trim_end())
}

/// Normalizes a label for comparison: lowercase, single spaces, no
/// surrounding punctuation.
pub fn normalize_label(label: &str) -> String {
    label
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_matches(|c: char| !c.is_alphanumeric())
        .to_lowercase()
}

/// Rough token estimate (four characters per token).
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// Returns true if `haystack` contains any of `needles` (case-insensitive;
/// needles must already be lowercase).
pub fn contains_any(haystack_lower: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack_lower.contains(n))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word_set_filters_short_words() {
        let words = word_set("The API is vulnerable to spam", 3);
        assert!(words.contains("vulnerable"));
        assert!(words.contains("spam"));
        assert!(!words.contains("api"));
        assert!(!words.contains("the"));
    }

    #[test]
    fn test_jaccard() {
        let a = word_set("rate limiting protects the api", 0);
        let b = word_set("rate limiting protects the service", 0);
        let j = jaccard(&a, &b);
        assert!((j - 4.0 / 6.0).abs() < 1e-6);
        assert!(jaccard(&HashSet::new(), &HashSet::new()).abs() < f32::EPSILON);
    }

    #[test]
    fn test_keywords_ranked() {
        let kws = keywords("spam spam attacks attacks attacks the api limiting", 2);
        assert_eq!(kws, vec!["attacks".to_string(), "spam".to_string()]);
    }

    #[test]
    fn test_truncate_multibyte() {
        assert_eq!(truncate("héllo wörld", 20), "héllo wörld");
        let cut = truncate("héllo wörld", 6);
        assert!(cut.ends_with('…'));
        assert!(cut.chars().count() <= 6);
    }

    #[test]
    fn test_normalize_label() {
        assert_eq!(normalize_label("  Project   Apollo. "), "project apollo");
        assert_eq!(normalize_label("\"Acme\""), "acme");
    }
}
