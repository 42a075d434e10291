//! Structured, context-bound logging.
//!
//! The [`ContextLogger`] is the user-facing logger of the pipeline: six
//! numeric levels, a JSON-line and a text format, `_secret_`-prefixed extras
//! masked before anything is written. It binds `trace_id` / `module_id` /
//! `caller_id` from a [`Context`] so every line is attributable to a call.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use parking_lot::Mutex;
use serde_json::Value;

use super::{LOGGING_STARTS_KEY, monotonic_ms, pop_start, push_start};
use crate::config::Config;
use crate::context::Context;
use crate::errors::ModuleError;
use crate::middleware::Middleware;
use crate::types::{BoxError, JsonMap};

/// Replacement written for `_secret_`-prefixed extras.
pub const REDACTED: &str = "***REDACTED***";

/// Log severity. The numeric values leave room between levels for future
/// interop with foreign level schemes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Trace = 0,
    Debug = 10,
    Info = 20,
    Warn = 30,
    Error = 40,
    Fatal = 50,
}

impl LogLevel {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Fatal => "fatal",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "trace" => Some(LogLevel::Trace),
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warn" => Some(LogLevel::Warn),
            "error" => Some(LogLevel::Error),
            "fatal" => Some(LogLevel::Fatal),
            _ => None,
        }
    }
}

/// Output encoding.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per line.
    Json,
    /// `<ISO ts> [LEVEL] [trace=…] [module=…] message k=v …`
    #[default]
    Text,
}

/// Line consumer behind the logger.
pub trait LogWriter: Send + Sync {
    fn write_line(&self, line: &str);
}

/// Writes lines to stdout.
#[derive(Clone, Copy, Debug, Default)]
pub struct StdoutLogWriter;

impl LogWriter for StdoutLogWriter {
    fn write_line(&self, line: &str) {
        println!("{line}");
    }
}

/// Captures lines in memory, for tests.
#[derive(Default)]
pub struct MemoryLogWriter {
    lines: Mutex<Vec<String>>,
}

impl MemoryLogWriter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the captured lines.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }

    pub fn clear(&self) {
        self.lines.lock().clear();
    }
}

impl LogWriter for MemoryLogWriter {
    fn write_line(&self, line: &str) {
        self.lines.lock().push(line.to_string());
    }
}

fn redact_extra(extra: &JsonMap) -> JsonMap {
    extra
        .iter()
        .map(|(key, value)| {
            if key.starts_with("_secret_") {
                (key.clone(), Value::String(REDACTED.to_string()))
            } else {
                (key.clone(), value.clone())
            }
        })
        .collect()
}

/// Structured logger bound to (at most) one call's context.
#[derive(Clone)]
pub struct ContextLogger {
    name: String,
    level: LogLevel,
    format: LogFormat,
    writer: Arc<dyn LogWriter>,
    trace_id: Option<String>,
    module_id: Option<String>,
    caller_id: Option<String>,
}

impl ContextLogger {
    /// Unbound logger with `info` level, text format, stdout output.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            level: LogLevel::Info,
            format: LogFormat::default(),
            writer: Arc::new(StdoutLogWriter),
            trace_id: None,
            module_id: None,
            caller_id: None,
        }
    }

    /// Read `logging.level` / `logging.format` from config.
    #[must_use]
    pub fn from_config(name: impl Into<String>, config: &Config) -> Self {
        let mut logger = Self::new(name);
        if let Some(level) = config.get_str("logging.level").and_then(LogLevel::parse) {
            logger.level = level;
        }
        if config.get_str("logging.format") == Some("json") {
            logger.format = LogFormat::Json;
        }
        logger
    }

    /// Unbound logger bound to `ctx`: `trace_id` from the trace,
    /// `module_id` from the last chain entry, `caller_id` from the caller.
    #[must_use]
    pub fn from_context(ctx: &Context, name: impl Into<String>) -> Self {
        Self::new(name).bind(ctx)
    }

    /// Bind a configured logger to a call context, keeping level, format,
    /// and writer.
    #[must_use]
    pub fn bind(&self, ctx: &Context) -> Self {
        let mut bound = self.clone();
        bound.trace_id = Some(ctx.trace_id().to_string());
        bound.module_id = ctx.module_id().map(str::to_string);
        bound.caller_id = ctx.caller_id().map(str::to_string);
        bound
    }

    #[must_use]
    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    #[must_use]
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    #[must_use]
    pub fn with_writer(mut self, writer: Arc<dyn LogWriter>) -> Self {
        self.writer = writer;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn level(&self) -> LogLevel {
        self.level
    }

    /// Emit one entry; entries below the configured level are dropped.
    pub fn log(&self, level: LogLevel, message: &str, extra: Option<&JsonMap>) {
        if level < self.level {
            return;
        }
        let extra = extra.map(redact_extra).unwrap_or_default();
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let line = match self.format {
            LogFormat::Json => serde_json::json!({
                "timestamp": timestamp,
                "level": level.as_str(),
                "message": message,
                "trace_id": self.trace_id,
                "module_id": self.module_id,
                "caller_id": self.caller_id,
                "logger": self.name,
                "extra": extra,
            })
            .to_string(),
            LogFormat::Text => {
                let mut line = format!("{timestamp} [{}]", level.as_str().to_uppercase());
                if let Some(trace_id) = &self.trace_id {
                    line.push_str(&format!(" [trace={trace_id}]"));
                }
                if let Some(module_id) = &self.module_id {
                    line.push_str(&format!(" [module={module_id}]"));
                }
                line.push(' ');
                line.push_str(message);
                for (key, value) in &extra {
                    match value {
                        Value::String(s) => line.push_str(&format!(" {key}={s}")),
                        other => line.push_str(&format!(" {key}={other}")),
                    }
                }
                line
            }
        };
        self.writer.write_line(&line);
    }

    pub fn trace(&self, message: &str, extra: Option<&JsonMap>) {
        self.log(LogLevel::Trace, message, extra);
    }

    pub fn debug(&self, message: &str, extra: Option<&JsonMap>) {
        self.log(LogLevel::Debug, message, extra);
    }

    pub fn info(&self, message: &str, extra: Option<&JsonMap>) {
        self.log(LogLevel::Info, message, extra);
    }

    pub fn warn(&self, message: &str, extra: Option<&JsonMap>) {
        self.log(LogLevel::Warn, message, extra);
    }

    pub fn error(&self, message: &str, extra: Option<&JsonMap>) {
        self.log(LogLevel::Error, message, extra);
    }

    pub fn fatal(&self, message: &str, extra: Option<&JsonMap>) {
        self.log(LogLevel::Fatal, message, extra);
    }
}

/// Middleware that logs call start/completion/failure with durations.
pub struct LoggingMiddleware {
    logger: ContextLogger,
}

impl LoggingMiddleware {
    /// Use `logger` as the prototype; each call gets a context-bound clone.
    #[must_use]
    pub fn new(logger: ContextLogger) -> Self {
        Self { logger }
    }

    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(ContextLogger::from_config("apcore.executor", config))
    }

    fn duration_extra(ctx: &Context) -> JsonMap {
        let mut extra = JsonMap::new();
        if let Some(start) = pop_start(ctx, LOGGING_STARTS_KEY) {
            let elapsed = monotonic_ms() - start;
            extra.insert("duration_ms".to_string(), Value::from(elapsed));
        }
        extra
    }
}

#[async_trait]
impl Middleware for LoggingMiddleware {
    fn name(&self) -> String {
        "logging".to_string()
    }

    async fn before(
        &self,
        _module_id: &str,
        _inputs: &JsonMap,
        ctx: &Context,
    ) -> Result<Option<JsonMap>, BoxError> {
        push_start(ctx, LOGGING_STARTS_KEY, monotonic_ms());
        self.logger.bind(ctx).info("module call started", None);
        Ok(None)
    }

    async fn after(
        &self,
        _module_id: &str,
        _inputs: &JsonMap,
        _output: &JsonMap,
        ctx: &Context,
    ) -> Result<Option<JsonMap>, BoxError> {
        let extra = Self::duration_extra(ctx);
        self.logger
            .bind(ctx)
            .info("module call completed", Some(&extra));
        Ok(None)
    }

    async fn on_error(
        &self,
        _module_id: &str,
        _inputs: &JsonMap,
        error: &ModuleError,
        ctx: &Context,
    ) -> Result<Option<JsonMap>, BoxError> {
        let mut extra = Self::duration_extra(ctx);
        extra.insert("error_code".to_string(), Value::from(error.code()));
        self.logger
            .bind(ctx)
            .error("module call failed", Some(&extra));
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn below_level_entries_are_dropped() {
        let writer = Arc::new(MemoryLogWriter::new());
        let logger = ContextLogger::new("test")
            .with_level(LogLevel::Warn)
            .with_writer(writer.clone());
        logger.info("quiet", None);
        logger.warn("loud", None);
        let lines = writer.lines();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("loud"));
    }

    #[test]
    fn secret_extras_are_masked() {
        let writer = Arc::new(MemoryLogWriter::new());
        let logger = ContextLogger::new("test")
            .with_format(LogFormat::Json)
            .with_writer(writer.clone());
        let mut extra = JsonMap::new();
        extra.insert("_secret_token".to_string(), Value::from("hunter2"));
        extra.insert("plain".to_string(), Value::from("ok"));
        logger.info("entry", Some(&extra));
        let line = writer.lines().remove(0);
        assert!(line.contains(REDACTED));
        assert!(!line.contains("hunter2"));
        assert!(line.contains("\"plain\":\"ok\""));
    }

    #[test]
    fn text_format_carries_context_fields() {
        let writer = Arc::new(MemoryLogWriter::new());
        let ctx = Context::new().child("echo");
        let logger = ContextLogger::new("test")
            .with_writer(writer.clone())
            .bind(&ctx);
        logger.info("ready", None);
        let line = writer.lines().remove(0);
        assert!(line.contains("[INFO]"));
        assert!(line.contains(&format!("[trace={}]", ctx.trace_id())));
        assert!(line.contains("[module=echo]"));
    }
}
