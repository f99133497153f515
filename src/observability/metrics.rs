//! Prometheus metrics.

use crate::{Error, Result};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// Installs the Prometheus recorder as the global `metrics` recorder.
///
/// With a `port` the exporter also serves `/metrics` on all interfaces; the
/// HTTP task runs on the current Tokio runtime, so that form must be called
/// from inside one. Without a port, values are only kept in memory and read
/// through the returned handle.
///
/// # Errors
///
/// Returns an error if a global recorder is already installed, no runtime is
/// available for the listener, or the listener fails to build.
pub fn install_prometheus(port: Option<u16>) -> Result<PrometheusHandle> {
    let builder = PrometheusBuilder::new();
    let Some(port) = port else {
        let recorder = builder.build_recorder();
        let handle = recorder.handle();
        metrics::set_global_recorder(recorder).map_err(recorder_error)?;
        return Ok(handle);
    };

    let runtime = tokio::runtime::Handle::try_current()
        .map_err(|e| Error::operation("metrics_listener", e))?;
    let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port);
    let (recorder, serve) = {
        // The exporter binds its socket while building.
        let _entered = runtime.enter();
        builder
            .with_http_listener(addr)
            .build()
            .map_err(|e| Error::operation("metrics_listener", e))?
    };
    let handle = recorder.handle();
    metrics::set_global_recorder(recorder).map_err(recorder_error)?;
    runtime.spawn(serve);
    tracing::info!(%addr, "Serving Prometheus metrics");
    Ok(handle)
}

#[allow(clippy::needless_pass_by_value)]
fn recorder_error<E: std::fmt::Display>(e: E) -> Error {
    Error::operation("metrics_recorder_install", e)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_counters_render() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        metrics::with_local_recorder(&recorder, || {
            metrics::counter!("pipeline_entries_total", "work_type" => "P1_SUBSTRATE", "status" => "success")
                .increment(2);
        });
        let rendered = handle.render();
        assert!(rendered.contains("pipeline_entries_total"));
        assert!(rendered.contains("P1_SUBSTRATE"));
    }
}
