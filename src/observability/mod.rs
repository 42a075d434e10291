//! Observability middlewares: tracing spans, metrics, structured logging.
//!
//! All three keep their per-call state as *stacks* inside the shared
//! [`Context::data`](crate::context::Context::data) map, under reserved
//! `_`-prefixed keys. Stacks make nested calls compose: a module invoking
//! another module through the same executor pushes and pops in pairs, so span
//! parentage, duration nesting, and log timing always reflect the real call
//! tree. The reserved keys are filtered out of context serialization.

use std::sync::OnceLock;
use std::time::Instant;

use serde_json::Value;

use crate::context::Context;

pub mod logging;
pub mod metrics;
pub mod tracing;

pub use logging::{
    ContextLogger, LogFormat, LogLevel, LogWriter, LoggingMiddleware, MemoryLogWriter,
    StdoutLogWriter,
};
pub use metrics::{
    DEFAULT_BUCKETS, MODULE_CALLS_TOTAL, MODULE_DURATION_SECONDS, MODULE_ERRORS_TOTAL,
    MetricsCollector, MetricsMiddleware,
};
pub use tracing::{
    InMemoryExporter, SamplingStrategy, Span, SpanExporter, StdoutExporter, TracingMiddleware,
};

/// Reserved `Context::data` key holding the span stack.
pub const TRACING_SPANS_KEY: &str = "_tracing_spans";
/// Reserved `Context::data` key caching the per-trace sampling decision.
pub const TRACING_SAMPLED_KEY: &str = "_tracing_sampled";
/// Reserved `Context::data` key holding the metrics start-time stack.
pub const METRICS_STARTS_KEY: &str = "_metrics_starts";
/// Reserved `Context::data` key holding the logging start-time stack.
pub const LOGGING_STARTS_KEY: &str = "_obs_logging_starts";

/// Milliseconds on a process-local monotonic clock.
///
/// Serializable (plain `f64`) so it can sit on the stacks in `Context::data`,
/// unlike a raw `Instant`.
#[must_use]
pub fn monotonic_ms() -> f64 {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    EPOCH.get_or_init(Instant::now).elapsed().as_secs_f64() * 1000.0
}

/// Append an event record to the top span of the context's span stack, if a
/// span is currently open. Used by the approval gate for audit events.
pub(crate) fn append_span_event(ctx: &Context, name: &str, attributes: Value) {
    let mut data = ctx.data().lock();
    let Some(top) = data
        .get_mut(TRACING_SPANS_KEY)
        .and_then(Value::as_array_mut)
        .and_then(|stack| stack.last_mut())
    else {
        return;
    };
    if let Some(events) = top.get_mut("events").and_then(Value::as_array_mut) {
        events.push(serde_json::json!({
            "name": name,
            "attributes": attributes,
            "time": chrono::Utc::now().to_rfc3339(),
        }));
    }
}

/// Pop the most recent entry from a numeric stack in `Context::data`.
pub(crate) fn pop_start(ctx: &Context, key: &str) -> Option<f64> {
    let mut data = ctx.data().lock();
    data.get_mut(key)
        .and_then(Value::as_array_mut)
        .and_then(Vec::pop)
        .and_then(|value| value.as_f64())
}

/// Push an entry onto a numeric stack in `Context::data`, creating it on
/// first use.
pub(crate) fn push_start(ctx: &Context, key: &str, value: f64) {
    let mut data = ctx.data().lock();
    let stack = data
        .entry(key.to_string())
        .or_insert_with(|| Value::Array(Vec::new()));
    if let Some(items) = stack.as_array_mut() {
        items.push(Value::from(value));
    }
}
