//! W3C trace-context propagation over NATS message headers.

use crate::nats::traits::InboundMessage;
use async_nats::HeaderMap;
use opentelemetry::{
    global,
    propagation::{Extractor, Injector},
    Context,
};
use tracing_opentelemetry::OpenTelemetrySpanExt;

struct HeaderInjector<'a>(&'a mut HeaderMap);

impl Injector for HeaderInjector<'_> {
    fn set(&mut self, key: &str, value: String) {
        self.0.insert(key, value.as_str());
    }
}

struct HeaderExtractor<'a>(&'a HeaderMap);

impl Extractor for HeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(|v| v.as_str())
    }

    fn keys(&self) -> Vec<&str> {
        vec!["traceparent", "tracestate"]
    }
}

/// Write the current span's context as `traceparent`/`tracestate` headers.
/// No-op until a propagator is installed by `init_telemetry`.
pub fn inject_trace_context(headers: &mut HeaderMap) {
    let ctx = tracing::Span::current().context();
    global::get_text_map_propagator(|propagator| {
        propagator.inject_context(&ctx, &mut HeaderInjector(headers));
    });
}

pub fn extract_trace_context(headers: &HeaderMap) -> Context {
    global::get_text_map_propagator(|propagator| propagator.extract(&HeaderExtractor(headers)))
}

/// Parent the current span on the publisher's trace, if the message carries one
pub fn set_parent_from_message(message: &dyn InboundMessage) {
    if let Some(headers) = message.headers() {
        tracing::Span::current().set_parent(extract_trace_context(headers));
    }
}
