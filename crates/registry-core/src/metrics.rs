//! `OpenTelemetry` metrics export.
//!
//! Only compiled with the `metrics` Cargo feature. Installs a global meter
//! provider that pushes to an OTLP collector over gRPC; the engine's command
//! instruments are created from that provider.

use opentelemetry::global;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::metrics::SdkMeterProvider;

/// Errors from setting up or shutting down the metrics pipeline.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("failed to build OTLP exporter: {0}")]
    ExporterBuild(#[from] opentelemetry_otlp::ExporterBuildError),

    #[error("OpenTelemetry SDK error: {0}")]
    Sdk(#[from] opentelemetry_sdk::error::OTelSdkError),
}

/// Keeps the meter provider alive. Dropping it does not flush; call
/// [`MetricsGuard::shutdown`] before exit.
pub struct MetricsGuard {
    meter_provider: SdkMeterProvider,
}

impl MetricsGuard {
    /// Flush buffered measurements and stop the exporter.
    pub fn shutdown(self) -> Result<(), MetricsError> {
        self.meter_provider.shutdown()?;
        Ok(())
    }
}

/// Install the global meter provider exporting to `endpoint`, e.g.
/// `http://localhost:4317`.
pub fn init_metrics(endpoint: &str) -> Result<MetricsGuard, MetricsError> {
    let exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;

    let meter_provider = SdkMeterProvider::builder()
        .with_periodic_exporter(exporter)
        .build();
    global::set_meter_provider(meter_provider.clone());

    Ok(MetricsGuard { meter_provider })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[allow(clippy::unwrap_used)]
    async fn pipeline_builds_without_a_collector() {
        // Export fails at send time only; construction and shutdown succeed.
        let guard = init_metrics("http://localhost:4317").unwrap();
        guard.shutdown().unwrap();
    }
}
