use anyhow::Result;
use opentelemetry::global;
use opentelemetry::trace::TracerProvider;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::{SdkTracerProvider, Tracer};
use std::env;
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_OTLP_HTTP_ENDPOINT: &str = "http://localhost:4318/v1/traces";

pub fn init_telemetry(service_name: &'static str) {
    // W3C trace context on every hop
    global::set_text_map_propagator(TraceContextPropagator::new());

    let otlp_enabled = env::var("OTEL_TRACES_EXPORTER")
        .map(|v| v == "otlp")
        .unwrap_or(false);

    let tracer = if otlp_enabled {
        // OTLP over HTTP to a local collector unless overridden
        let endpoint = env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
            .unwrap_or_else(|_| DEFAULT_OTLP_HTTP_ENDPOINT.to_string());

        match otlp_tracer(&endpoint, service_name) {
            Ok(tracer) => tracer,
            Err(e) => {
                eprintln!("failed to initialize OTLP tracer for {service_name}: {e}");
                eprintln!("falling back to stdout exporter");
                stdout_tracer(service_name)
            }
        }
    } else {
        stdout_tracer(service_name)
    };

    // RUST_LOG wins; the service itself logs at info by default
    let mut filter = EnvFilter::from_default_env();
    if let Ok(directive) = format!("{service_name}=info").parse() {
        filter = filter.add_directive(directive);
    }

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().compact().with_target(false))
        .with(OpenTelemetryLayer::new(tracer))
        .try_init();
}

fn otlp_tracer(endpoint: &str, service_name: &'static str) -> Result<Tracer> {
    use opentelemetry_otlp::WithExportConfig;

    // Only the HTTP transport is wired. A gRPC endpoint (4317) is rejected.
    if endpoint.contains(":4317") {
        anyhow::bail!("gRPC OTLP endpoint not supported, use the HTTP endpoint (port 4318)");
    }

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(endpoint)
        .build()?;

    let provider = SdkTracerProvider::builder()
        .with_simple_exporter(exporter)
        .build();

    Ok(provider.tracer(service_name))
}

fn stdout_tracer(service_name: &'static str) -> Tracer {
    let provider = SdkTracerProvider::builder()
        .with_simple_exporter(opentelemetry_stdout::SpanExporter::default())
        .build();

    provider.tracer(service_name)
}
