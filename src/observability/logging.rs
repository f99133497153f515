//! Log filter construction.

use tracing_subscriber::EnvFilter;

/// Builds the log filter.
///
/// `RUST_LOG` wins when set and valid. Otherwise `default_level` applies to
/// this crate, raised to `debug` when `verbose` is set, while dependencies
/// stay at `warn`.
#[must_use]
pub fn build_filter(default_level: &str, verbose: bool) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }
    let level = if verbose { "debug" } else { default_level };
    EnvFilter::try_new(directive(level)).unwrap_or_else(|e| {
        tracing::warn!(level = level, error = %e, "Invalid log level, falling back to info");
        EnvFilter::new(directive("info"))
    })
}

fn directive(level: &str) -> String {
    format!("warn,substrate_pipeline={level}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directive_scopes_crate_level() {
        assert_eq!(directive("trace"), "warn,substrate_pipeline=trace");
    }

    #[test]
    fn test_invalid_level_falls_back() {
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        let filter = build_filter("not a level!!", false);
        assert!(filter.to_string().contains("substrate_pipeline=info"));
    }
}
