//! Configuration management.
//!
//! Configuration is layered: built-in defaults, then a TOML file, then
//! `PIPELINE_*` environment variables (a `.env` file is honored).

mod features;

pub use features::FeatureFlags;

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Main configuration for the pipeline.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Worker loop settings.
    pub worker: WorkerConfig,
    /// Governance engine settings.
    pub governance: GovernanceConfig,
    /// Relationship engine settings.
    pub relationships: RelationshipConfig,
    /// Reflection engine settings.
    pub reflection: ReflectionConfig,
    /// Composition engine settings.
    pub composition: CompositionConfig,
    /// LLM provider settings.
    pub llm: LlmConfig,
    /// Feature flags.
    pub features: FeatureFlags,
    /// Storage backend settings.
    pub storage: StorageConfig,
    /// Logging and metrics settings.
    pub observability: ObservabilityConfig,
}

/// Worker loop configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Identifier recorded on claimed queue entries.
    pub worker_id: String,
    /// Maximum entries claimed per iteration.
    pub claim_limit: usize,
    /// Sleep between empty polls, in milliseconds.
    pub poll_interval_ms: u64,
    /// Age after which a processing claim may be reclaimed.
    pub stale_after_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("worker-{}", std::process::id()),
            claim_limit: 5,
            poll_interval_ms: 2_000,
            stale_after_secs: 300,
        }
    }
}

/// Governance engine configuration.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct GovernanceConfig {
    /// Cap on context item creations per proposal.
    pub max_context_items: usize,
    /// Word-set Jaccard overlap above which two blocks are similar.
    pub similarity_threshold: f32,
    /// Length ratio a similar candidate needs to revise an existing block.
    pub update_length_ratio: f32,
    /// Retry a failed execution once before reverting to `PROPOSED`.
    pub reattempt_on_failure: bool,
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        Self {
            max_context_items: 30,
            similarity_threshold: 0.6,
            update_length_ratio: 1.5,
            reattempt_on_failure: false,
        }
    }
}

/// Relationship engine configuration.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct RelationshipConfig {
    /// Global cap on candidates generated before validation.
    pub max_candidates: usize,
    /// Cap on relationships kept after validation.
    pub max_final: usize,
    /// Minimum strength kept after validation.
    pub min_strength: f32,
    /// Maximum causal-family relationships per pair.
    pub max_causal_per_pair: usize,
}

impl Default for RelationshipConfig {
    fn default() -> Self {
        Self {
            max_candidates: 50,
            max_final: 25,
            min_strength: 0.3,
            max_causal_per_pair: 3,
        }
    }
}

/// Reflection engine configuration.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct ReflectionConfig {
    /// Most recent dumps in the text window.
    pub max_dumps: usize,
    /// Optional recency cutoff for the text window.
    pub recency_hours: Option<u64>,
    /// Maximum digest items.
    pub max_digest_items: usize,
    /// Per-item character truncation in the digest.
    pub snippet_chars: usize,
    /// Maximum reflection entries kept.
    pub max_entries: usize,
}

impl Default for ReflectionConfig {
    fn default() -> Self {
        Self {
            max_dumps: 10,
            recency_hours: None,
            max_digest_items: 40,
            snippet_chars: 280,
            max_entries: 6,
        }
    }
}

/// Composition engine configuration.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct CompositionConfig {
    /// Recency cutoff for substrate retrieval.
    pub recency_days: u64,
    /// Per-semantic-type retrieval cap.
    pub per_type_cap: usize,
    /// Items taken by the heuristic selection fallback.
    pub fallback_count: usize,
    /// Target share of requested types covered by the selection.
    pub coverage_target: f32,
    /// Maximum raw snippets added by gap filling.
    pub gap_fill_max_snippets: usize,
    /// Approximate token cap on gap-fill snippets.
    pub gap_fill_token_cap: usize,
}

impl Default for CompositionConfig {
    fn default() -> Self {
        Self {
            recency_days: 90,
            per_type_cap: 20,
            fallback_count: 10,
            coverage_target: 0.9,
            gap_fill_max_snippets: 3,
            gap_fill_token_cap: 600,
        }
    }
}

/// Available LLM providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProviderKind {
    /// Anthropic Claude.
    #[default]
    Anthropic,
    /// No provider; every stage uses its heuristic path.
    None,
}

impl LlmProviderKind {
    /// Parses a provider string.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "none" | "off" | "heuristic" => Self::None,
            _ => Self::Anthropic,
        }
    }
}

/// LLM provider configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Provider to use.
    pub provider: LlmProviderKind,
    /// Model name.
    pub model: Option<String>,
    /// API key; falls back to `ANTHROPIC_API_KEY`.
    pub api_key: Option<String>,
    /// Base URL override.
    pub base_url: Option<String>,
    /// Request timeout in milliseconds.
    pub timeout_ms: u64,
    /// Connect timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Attempts per call, including the first.
    pub max_attempts: u32,
    /// Initial backoff, doubled after each failed attempt.
    pub retry_backoff_ms: u64,
    /// Consecutive failures before the circuit opens.
    pub breaker_failure_threshold: u32,
    /// How long the circuit stays open.
    pub breaker_reset_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProviderKind::default(),
            model: None,
            api_key: None,
            base_url: None,
            timeout_ms: 30_000,
            connect_timeout_ms: 3_000,
            max_attempts: 3,
            retry_backoff_ms: 250,
            breaker_failure_threshold: 5,
            breaker_reset_ms: 30_000,
        }
    }
}

/// Storage backend configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// `SQLite` database path; absent selects the in-memory store.
    pub sqlite_path: Option<PathBuf>,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable output.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

/// Logging and metrics configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    pub log_level: String,
    /// Output format.
    pub log_format: LogFormat,
    /// Port for the Prometheus listener; absent disables it.
    pub metrics_port: Option<u16>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::default(),
            metrics_port: None,
        }
    }
}

/// Reads and parses an environment variable, ignoring malformed values.
fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(variable = name, value = %raw, "Ignoring malformed environment override");
            None
        },
    }
}

impl PipelineConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from_file(path: &Path) -> crate::Result<Self> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| crate::Error::OperationFailed {
                operation: "read_config_file".to_string(),
                cause: e.to_string(),
            })?;

        Self::from_toml(&contents)
    }

    /// Parses configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is malformed.
    pub fn from_toml(contents: &str) -> crate::Result<Self> {
        toml::from_str(contents).map_err(|e| crate::Error::OperationFailed {
            operation: "parse_config_file".to_string(),
            cause: e.to_string(),
        })
    }

    /// Returns the default config file location.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "substrate-pipeline")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Loads configuration from the default location.
    ///
    /// Returns default configuration if no config file is found or it fails
    /// to parse.
    #[must_use]
    pub fn load_default() -> Self {
        let Some(path) = Self::default_path().filter(|p| p.exists()) else {
            return Self::default();
        };
        Self::load_from_file(&path).unwrap_or_else(|e| {
            tracing::warn!(path = %path.display(), error = %e, "Failed to load config, using defaults");
            Self::default()
        })
    }

    /// Loads `.env`, the config file (explicit path or default location),
    /// then applies environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if an explicitly given file cannot be loaded.
    pub fn load(path: Option<&Path>) -> crate::Result<Self> {
        let _ = dotenvy::dotenv();
        let config = match path {
            Some(path) => Self::load_from_file(path)?,
            None => Self::load_default(),
        };
        Ok(config.with_env_overrides())
    }

    /// Applies `PIPELINE_*` environment variable overrides.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(v) = std::env::var("PIPELINE_WORKER_ID") {
            self.worker.worker_id = v;
        }
        if let Some(v) = env_parse("PIPELINE_CLAIM_LIMIT") {
            self.worker.claim_limit = v;
        }
        if let Some(v) = env_parse("PIPELINE_POLL_INTERVAL_MS") {
            self.worker.poll_interval_ms = v;
        }
        if let Some(v) = env_parse("PIPELINE_STALE_AFTER_SECS") {
            self.worker.stale_after_secs = v;
        }
        if let Some(v) = env_parse("PIPELINE_REATTEMPT_ON_FAILURE") {
            self.governance.reattempt_on_failure = v;
        }
        if let Ok(v) = std::env::var("PIPELINE_LLM_PROVIDER") {
            self.llm.provider = LlmProviderKind::parse(&v);
        }
        if let Ok(v) = std::env::var("PIPELINE_LLM_MODEL") {
            self.llm.model = Some(v);
        }
        if let Some(v) = env_parse("PIPELINE_LLM_TIMEOUT_MS") {
            self.llm.timeout_ms = v;
        }
        if let Some(v) = env_parse::<u32>("PIPELINE_LLM_MAX_ATTEMPTS") {
            self.llm.max_attempts = v.max(1);
        }
        if let Some(v) = env_parse("PIPELINE_LLM_RETRY_BACKOFF_MS") {
            self.llm.retry_backoff_ms = v;
        }
        if let Ok(v) = std::env::var("PIPELINE_SQLITE_PATH") {
            self.storage.sqlite_path = Some(PathBuf::from(v));
        }
        if let Ok(v) = std::env::var("PIPELINE_LOG_LEVEL") {
            self.observability.log_level = v;
        }
        if let Ok(v) = std::env::var("PIPELINE_LOG_FORMAT") {
            self.observability.log_format = if v.eq_ignore_ascii_case("json") {
                LogFormat::Json
            } else {
                LogFormat::Pretty
            };
        }
        if let Some(v) = env_parse("PIPELINE_METRICS_PORT") {
            self.observability.metrics_port = Some(v);
        }
        self
    }

    /// Sets the worker id.
    #[must_use]
    pub fn with_worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker.worker_id = worker_id.into();
        self
    }

    /// Sets the `SQLite` path.
    #[must_use]
    pub fn with_sqlite_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.storage.sqlite_path = Some(path.into());
        self
    }

    /// Replaces the feature flags.
    #[must_use]
    pub const fn with_features(mut self, features: FeatureFlags) -> Self {
        self.features = features;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.worker.claim_limit, 5);
        assert_eq!(config.worker.stale_after_secs, 300);
        assert_eq!(config.governance.max_context_items, 30);
        assert!(!config.governance.reattempt_on_failure);
        assert_eq!(config.relationships.max_candidates, 50);
        assert_eq!(config.relationships.max_final, 25);
        assert_eq!(config.reflection.max_entries, 6);
        assert_eq!(config.composition.recency_days, 90);
        assert_eq!(config.llm.max_attempts, 3);
        assert!(config.storage.sqlite_path.is_none());
    }

    #[test]
    fn test_partial_toml() {
        let config = PipelineConfig::from_toml(
            r#"
            [worker]
            claim_limit = 12

            [governance]
            reattempt_on_failure = true

            [llm]
            provider = "none"

            [storage]
            sqlite_path = "/tmp/pipeline.db"
            "#,
        )
        .unwrap();

        assert_eq!(config.worker.claim_limit, 12);
        assert_eq!(config.worker.poll_interval_ms, 2_000);
        assert!(config.governance.reattempt_on_failure);
        assert_eq!(config.llm.provider, LlmProviderKind::None);
        assert_eq!(
            config.storage.sqlite_path.as_deref(),
            Some(Path::new("/tmp/pipeline.db"))
        );
    }

    #[test]
    fn test_invalid_toml() {
        let result = PipelineConfig::from_toml("[worker\nclaim_limit = ");
        assert!(result.is_err());
    }

    #[test]
    fn test_provider_parse() {
        assert_eq!(LlmProviderKind::parse("NONE"), LlmProviderKind::None);
        assert_eq!(
            LlmProviderKind::parse("anthropic"),
            LlmProviderKind::Anthropic
        );
    }
}
