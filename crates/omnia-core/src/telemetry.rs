// Telemetry initialization
//
// Structured logging via `tracing`, with optional OTLP trace export behind the
// `otel` feature. The control plane and CLI binaries keep the returned guard
// alive for the lifetime of the process.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Telemetry configuration, populated from the environment.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name attached to every span (`OTEL_SERVICE_NAME`).
    pub service_name: String,
    /// Service version, usually `CARGO_PKG_VERSION`.
    pub service_version: Option<String>,
    /// OTLP endpoint, e.g. `http://localhost:4317`. Absent disables OTLP export.
    pub otlp_endpoint: Option<String>,
    /// Deployment environment label (`OTEL_ENVIRONMENT`).
    pub environment: Option<String>,
    /// Whether to also log to stdout.
    pub enable_console: bool,
    /// `tracing_subscriber::EnvFilter` string, from `RUST_LOG` or `LOG_LEVEL`.
    pub log_filter: Option<String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "omnia-control-plane".to_string(),
            service_version: None,
            otlp_endpoint: None,
            environment: None,
            enable_console: true,
            log_filter: None,
        }
    }
}

impl TelemetryConfig {
    /// Build configuration from environment variables.
    ///
    /// - `OTEL_SERVICE_NAME`: service name (default: "omnia-control-plane")
    /// - `OTEL_SERVICE_VERSION`: service version
    /// - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP gRPC endpoint
    /// - `OTEL_ENVIRONMENT`: deployment environment label
    /// - `RUST_LOG` or `LOG_LEVEL`: tracing filter string
    pub fn from_env() -> Self {
        Self {
            service_name: std::env::var("OTEL_SERVICE_NAME")
                .unwrap_or_else(|_| "omnia-control-plane".to_string()),
            service_version: std::env::var("OTEL_SERVICE_VERSION").ok(),
            otlp_endpoint: std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok(),
            environment: std::env::var("OTEL_ENVIRONMENT").ok(),
            enable_console: true,
            log_filter: std::env::var("RUST_LOG")
                .ok()
                .or_else(|| std::env::var("LOG_LEVEL").ok()),
        }
    }
}

/// Guard returned by [`init_telemetry`]. Dropping it flushes and shuts down any
/// OTLP exporter; keep it alive for the process lifetime.
pub struct TelemetryGuard {
    #[cfg(feature = "otel")]
    provider: Option<opentelemetry_sdk::trace::SdkTracerProvider>,
}

#[cfg(feature = "otel")]
impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.provider.take() {
            if let Err(e) = provider.shutdown() {
                eprintln!("failed to shut down tracer provider: {e:?}");
            }
        }
    }
}

/// Initialize the global tracing subscriber. Returns a guard that must be
/// held for the process lifetime.
pub fn init_telemetry(config: TelemetryConfig) -> TelemetryGuard {
    let filter = config
        .log_filter
        .as_deref()
        .and_then(|f| EnvFilter::try_new(f).ok())
        .unwrap_or_else(|| EnvFilter::new("info"));

    let console_layer = config
        .enable_console
        .then(|| tracing_subscriber::fmt::layer().with_target(true));

    #[cfg(feature = "otel")]
    {
        if let Some(endpoint) = &config.otlp_endpoint {
            match build_otlp_layer(&config, endpoint) {
                Ok((provider, otel_layer)) => {
                    tracing_subscriber::registry()
                        .with(filter)
                        .with(console_layer)
                        .with(otel_layer)
                        .init();
                    return TelemetryGuard {
                        provider: Some(provider),
                    };
                }
                Err(e) => {
                    eprintln!("failed to initialize OTLP exporter, falling back to console-only: {e}");
                }
            }
        }
        tracing_subscriber::registry()
            .with(filter)
            .with(console_layer)
            .init();
        TelemetryGuard { provider: None }
    }

    #[cfg(not(feature = "otel"))]
    {
        tracing_subscriber::registry()
            .with(filter)
            .with(console_layer)
            .init();
        TelemetryGuard {}
    }
}

#[cfg(feature = "otel")]
fn build_otlp_layer(
    config: &TelemetryConfig,
    endpoint: &str,
) -> anyhow::Result<(
    opentelemetry_sdk::trace::SdkTracerProvider,
    tracing_opentelemetry::OpenTelemetryLayer<
        tracing_subscriber::Registry,
        opentelemetry_sdk::trace::Tracer,
    >,
)> {
    use opentelemetry::trace::TracerProvider as _;
    use opentelemetry::KeyValue;
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk::{trace::SdkTracerProvider, Resource};

    let mut attrs = vec![KeyValue::new("service.name", config.service_name.clone())];
    if let Some(v) = &config.service_version {
        attrs.push(KeyValue::new("service.version", v.clone()));
    }
    if let Some(env) = &config.environment {
        attrs.push(KeyValue::new("deployment.environment", env.clone()));
    }
    let resource = Resource::builder().with_attributes(attrs).build();

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;

    let provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(resource)
        .build();

    let tracer = provider.tracer("omnia-control-plane");
    let layer = tracing_opentelemetry::layer().with_tracer(tracer);
    Ok((provider, layer))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_no_otlp_endpoint() {
        let config = TelemetryConfig::default();
        assert!(config.otlp_endpoint.is_none());
        assert_eq!(config.service_name, "omnia-control-plane");
    }
}
