//! Feature flags for optional pipeline behavior.

use serde::Deserialize;

/// Feature flags controlling optional stages and retrieval paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FeatureFlags {
    /// Use the LLM extraction variant when a provider is configured.
    pub llm_extraction: bool,
    /// Fill composition coverage gaps with raw dump snippets.
    pub gap_fill: bool,
    /// Restrict raw dump retrieval to gap filling only.
    pub raw_gaps_only: bool,
    /// Allow composition strategies to request raw dumps directly.
    pub include_raw_dumps: bool,
    /// Update basket signatures after each reflection.
    pub basket_signatures: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self::core()
    }
}

impl FeatureFlags {
    /// Creates feature flags with all features disabled.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            llm_extraction: false,
            gap_fill: false,
            raw_gaps_only: false,
            include_raw_dumps: false,
            basket_signatures: false,
        }
    }

    /// Creates the default production flag set.
    #[must_use]
    pub const fn core() -> Self {
        Self {
            llm_extraction: true,
            gap_fill: true,
            raw_gaps_only: true,
            include_raw_dumps: false,
            basket_signatures: true,
        }
    }

    /// Creates feature flags with all features enabled.
    #[must_use]
    pub const fn all() -> Self {
        Self {
            llm_extraction: true,
            gap_fill: true,
            raw_gaps_only: false,
            include_raw_dumps: true,
            basket_signatures: true,
        }
    }

    /// Whether composition may pull raw dumps outside of gap filling.
    #[must_use]
    pub const fn direct_raw_retrieval(&self) -> bool {
        self.include_raw_dumps && !self.raw_gaps_only
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direct_raw_retrieval() {
        assert!(!FeatureFlags::core().direct_raw_retrieval());
        assert!(FeatureFlags::all().direct_raw_retrieval());

        let flags = FeatureFlags {
            raw_gaps_only: true,
            ..FeatureFlags::all()
        };
        assert!(!flags.direct_raw_retrieval());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let flags: FeatureFlags = toml::from_str("gap_fill = false").unwrap();
        assert!(!flags.gap_fill);
        assert!(flags.basket_signatures);
    }
}
