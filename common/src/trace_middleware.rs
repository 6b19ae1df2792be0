use axum::{extract::Request, http::HeaderMap, middleware::Next, response::Response};
use opentelemetry::global;
use opentelemetry::propagation::{Extractor, Injector};
use tracing::Span;
use tracing_opentelemetry::OpenTelemetrySpanExt;

/// Attaches the W3C trace context carried by an admin request to the current span.
pub async fn trace_context_middleware(
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Response {
    let parent = global::get_text_map_propagator(|propagator| {
        propagator.extract(&HeaderExtractor::new(&headers))
    });
    let _ = Span::current().set_parent(parent);

    next.run(request).await
}

pub struct HeaderExtractor<'a> {
    headers: &'a HeaderMap,
}

impl<'a> HeaderExtractor<'a> {
    pub fn new(headers: &'a HeaderMap) -> Self {
        Self { headers }
    }
}

impl Extractor for HeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.headers.get(key)?.to_str().ok()
    }

    fn keys(&self) -> Vec<&str> {
        self.headers.keys().map(|k| k.as_str()).collect()
    }
}

/// Collects propagation headers as plain pairs, skipping values reqwest would reject.
#[derive(Default)]
pub struct PairInjector {
    pub pairs: Vec<(String, String)>,
}

impl Injector for PairInjector {
    fn set(&mut self, key: &str, value: String) {
        self.pairs.push((key.to_string(), value));
    }
}

/// Propagates the current span's context onto an outgoing probe request.
pub fn inject_trace_context_reqwest(builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
    let mut injector = PairInjector::default();
    global::get_text_map_propagator(|propagator| {
        propagator.inject_context(&Span::current().context(), &mut injector)
    });

    injector
        .pairs
        .into_iter()
        .fold(builder, |builder, (key, value)| builder.header(key, value))
}
