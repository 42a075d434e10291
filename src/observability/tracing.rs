//! Stack-based span tracing for module calls.
//!
//! A span is opened in `before`, closed in `after`/`on_error`, and submitted
//! to the configured [`SpanExporter`] subject to a one-shot per-trace
//! sampling decision. Span records live as JSON values on the
//! `_tracing_spans` stack in `Context::data`, which is what lets the approval
//! gate attach audit events to the span that is currently open.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{TRACING_SAMPLED_KEY, TRACING_SPANS_KEY};
use crate::config::Config;
use crate::context::Context;
use crate::errors::ModuleError;
use crate::middleware::Middleware;
use crate::types::{BoxError, JsonMap};

/// One exported span.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Span {
    pub trace_id: String,
    pub span_id: String,
    #[serde(default)]
    pub parent_span_id: Option<String>,
    pub name: String,
    pub start_time: String,
    #[serde(default)]
    pub end_time: Option<String>,
    pub status: String,
    #[serde(default)]
    pub attributes: JsonMap,
    #[serde(default)]
    pub events: Vec<Value>,
}

fn new_span_id() -> String {
    format!("{:016x}", rand::random::<u64>())
}

/// When spans are exported.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SamplingStrategy {
    /// Every trace is exported.
    Full,
    /// No trace is exported.
    Off,
    /// Each trace is exported with probability `rate`; the decision is made
    /// once on the first span of the trace and inherited by nested spans.
    Proportional(f64),
    /// Successful spans obey a `rate`-based per-trace decision; error spans
    /// are exported unconditionally.
    ErrorFirst(f64),
}

impl SamplingStrategy {
    /// Read `tracing.strategy` / `tracing.rate` from config. Unknown or
    /// missing strategies default to [`SamplingStrategy::Full`].
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        let rate = config.get_f64("tracing.rate").unwrap_or(0.0);
        match config.get_str("tracing.strategy") {
            Some("off") => SamplingStrategy::Off,
            Some("proportional") => SamplingStrategy::Proportional(rate),
            Some("error_first") => SamplingStrategy::ErrorFirst(rate),
            _ => SamplingStrategy::Full,
        }
    }

    fn decide(&self) -> bool {
        match self {
            SamplingStrategy::Full => true,
            SamplingStrategy::Off => false,
            SamplingStrategy::Proportional(rate) | SamplingStrategy::ErrorFirst(rate) => {
                rand::random::<f64>() < *rate
            }
        }
    }
}

/// Span consumer. Implementations must not block the hot path.
pub trait SpanExporter: Send + Sync {
    fn export(&self, span: &Span);
}

/// Writes one JSON object per span to stdout.
#[derive(Clone, Copy, Debug, Default)]
pub struct StdoutExporter;

impl SpanExporter for StdoutExporter {
    fn export(&self, span: &Span) {
        match serde_json::to_string(span) {
            Ok(line) => println!("{line}"),
            Err(error) => tracing::warn!(%error, "failed to serialize span"),
        }
    }
}

/// Buffers spans in memory, dropping the oldest on overflow. For tests and
/// local inspection.
pub struct InMemoryExporter {
    max: usize,
    spans: Mutex<VecDeque<Span>>,
}

impl InMemoryExporter {
    pub const DEFAULT_CAPACITY: usize = 10_000;

    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }

    #[must_use]
    pub fn with_capacity(max: usize) -> Self {
        Self {
            max: max.max(1),
            spans: Mutex::new(VecDeque::new()),
        }
    }

    /// Defensive copy of the buffered spans, oldest first.
    #[must_use]
    pub fn spans(&self) -> Vec<Span> {
        self.spans.lock().iter().cloned().collect()
    }

    pub fn clear(&self) {
        self.spans.lock().clear();
    }
}

impl Default for InMemoryExporter {
    fn default() -> Self {
        Self::new()
    }
}

impl SpanExporter for InMemoryExporter {
    fn export(&self, span: &Span) {
        let mut spans = self.spans.lock();
        if spans.len() == self.max {
            spans.pop_front();
        }
        spans.push_back(span.clone());
    }
}

/// Middleware that opens a span per call and exports it on completion.
pub struct TracingMiddleware {
    strategy: SamplingStrategy,
    exporter: Arc<dyn SpanExporter>,
}

impl TracingMiddleware {
    #[must_use]
    pub fn new(exporter: Arc<dyn SpanExporter>, strategy: SamplingStrategy) -> Self {
        Self { strategy, exporter }
    }

    #[must_use]
    pub fn from_config(exporter: Arc<dyn SpanExporter>, config: &Config) -> Self {
        Self::new(exporter, SamplingStrategy::from_config(config))
    }

    /// Cached per-trace decision, made on the first span of the trace.
    fn sampled(&self, ctx: &Context) -> bool {
        let mut data = ctx.data().lock();
        if let Some(cached) = data.get(TRACING_SAMPLED_KEY).and_then(Value::as_bool) {
            return cached;
        }
        let decision = self.strategy.decide();
        data.insert(TRACING_SAMPLED_KEY.to_string(), Value::Bool(decision));
        decision
    }

    fn push_span(&self, module_id: &str, ctx: &Context) {
        let mut data = ctx.data().lock();
        let stack = data
            .entry(TRACING_SPANS_KEY.to_string())
            .or_insert_with(|| Value::Array(Vec::new()));
        let Some(stack) = stack.as_array_mut() else {
            return;
        };
        let parent_span_id = stack
            .last()
            .and_then(|span| span.get("spanId"))
            .and_then(Value::as_str)
            .map(str::to_string);
        let mut attributes = JsonMap::new();
        attributes.insert("module_id".to_string(), Value::from(module_id));
        let span = Span {
            trace_id: ctx.trace_id().to_string(),
            span_id: new_span_id(),
            parent_span_id,
            name: module_id.to_string(),
            start_time: Utc::now().to_rfc3339(),
            end_time: None,
            status: "unset".to_string(),
            attributes,
            events: Vec::new(),
        };
        match serde_json::to_value(&span) {
            Ok(value) => stack.push(value),
            Err(error) => tracing::warn!(%error, "failed to encode span"),
        }
    }

    fn pop_span(&self, ctx: &Context) -> Option<Span> {
        let mut data = ctx.data().lock();
        let popped = data
            .get_mut(TRACING_SPANS_KEY)
            .and_then(Value::as_array_mut)
            .and_then(Vec::pop)?;
        serde_json::from_value(popped).ok()
    }

    fn finish(&self, ctx: &Context, status: &str, error_code: Option<&str>) {
        let Some(mut span) = self.pop_span(ctx) else {
            return;
        };
        span.end_time = Some(Utc::now().to_rfc3339());
        span.status = status.to_string();
        if let Some(code) = error_code {
            span.attributes
                .insert("error_code".to_string(), Value::from(code));
        }
        let export = match self.strategy {
            // error spans bypass the cached decision
            SamplingStrategy::ErrorFirst(_) if status == "error" => true,
            _ => self.sampled(ctx),
        };
        if export {
            self.exporter.export(&span);
        }
    }
}

#[async_trait]
impl Middleware for TracingMiddleware {
    fn name(&self) -> String {
        "tracing".to_string()
    }

    async fn before(
        &self,
        module_id: &str,
        _inputs: &JsonMap,
        ctx: &Context,
    ) -> Result<Option<JsonMap>, BoxError> {
        self.sampled(ctx);
        self.push_span(module_id, ctx);
        Ok(None)
    }

    async fn after(
        &self,
        _module_id: &str,
        _inputs: &JsonMap,
        _output: &JsonMap,
        ctx: &Context,
    ) -> Result<Option<JsonMap>, BoxError> {
        self.finish(ctx, "ok", None);
        Ok(None)
    }

    async fn on_error(
        &self,
        _module_id: &str,
        _inputs: &JsonMap,
        error: &ModuleError,
        ctx: &Context,
    ) -> Result<Option<JsonMap>, BoxError> {
        self.finish(ctx, "error", Some(error.code()));
        Ok(None)
    }
}
