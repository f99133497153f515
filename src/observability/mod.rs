//! Observability and telemetry.
//!
//! Structured logging goes through `tracing`. Metrics are recorded with the
//! `metrics` facade and exported by Prometheus when a recorder is installed;
//! without one the macros are no-ops. Timeline events are also broadcast on
//! an in-process [`EventBus`].

mod event_bus;
mod logging;
mod metrics;

pub use event_bus::{EventBus, FilteredReceiver, global_event_bus};
pub use logging::build_filter;
pub use metrics::install_prometheus;

use crate::config::{LogFormat, ObservabilityConfig};
use crate::{Error, Result};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::OnceLock;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

static OBSERVABILITY_INIT: OnceLock<()> = OnceLock::new();

/// Handle for observability runtime components.
pub struct ObservabilityHandle {
    metrics: Option<PrometheusHandle>,
}

impl ObservabilityHandle {
    /// Renders current metrics in Prometheus text format, if a recorder is
    /// installed.
    #[must_use]
    pub fn render_metrics(&self) -> Option<String> {
        self.metrics.as_ref().map(PrometheusHandle::render)
    }
}

impl std::fmt::Debug for ObservabilityHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObservabilityHandle")
            .field("metrics", &self.metrics.is_some())
            .finish()
    }
}

/// Initializes logging and metrics for the process.
///
/// The Prometheus recorder is installed only when `metrics_port` is set.
///
/// # Errors
///
/// Returns an error if observability has already been initialized or a
/// component fails to install.
pub fn init(config: &ObservabilityConfig, verbose: bool) -> Result<ObservabilityHandle> {
    if OBSERVABILITY_INIT.get().is_some() {
        return Err(Error::operation(
            "observability_init",
            "observability already initialized",
        ));
    }

    let metrics = config.metrics_port.map(|port| install_prometheus(Some(port))).transpose()?;
    let filter = build_filter(&config.log_level, verbose);

    match config.log_format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_target(true)
                    .with_thread_ids(true),
            )
            .with(filter)
            .try_init()
            .map_err(init_error)?,
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_thread_names(true),
            )
            .with(filter)
            .try_init()
            .map_err(init_error)?,
    }

    OBSERVABILITY_INIT
        .set(())
        .map_err(|()| Error::operation("observability_init", "failed to mark initialized"))?;

    Ok(ObservabilityHandle { metrics })
}

#[allow(clippy::needless_pass_by_value)]
fn init_error(e: tracing_subscriber::util::TryInitError) -> Error {
    Error::operation("observability_init", e)
}
