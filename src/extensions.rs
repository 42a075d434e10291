//! Typed extension points for assembling an executor from parts.
//!
//! Host applications (plugin loaders, config-driven assemblers) register
//! values against named points and then [`apply`](ExtensionManager::apply)
//! them onto an executor in one shot. Each point declares whether it accepts
//! multiple values and which payload kind it takes; the [`ExtensionValue`]
//! enum is the typed stand-in for a duck-typed interface probe.

use std::fmt;
use std::sync::Arc;

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::acl::AclEngine;
use crate::approval::ApprovalHandler;
use crate::config::Config;
use crate::executor::Executor;
use crate::middleware::Middleware;
use crate::observability::{
    ContextLogger, LoggingMiddleware, MetricsCollector, MetricsMiddleware, SpanExporter,
    TracingMiddleware,
};

/// Multi-valued point: middlewares, appended in registration order.
pub const MIDDLEWARE_POINT: &str = "middleware";
/// Single-valued point: the approval handler.
pub const APPROVAL_HANDLER_POINT: &str = "approval_handler";
/// Single-valued point: the ACL engine.
pub const ACL_POINT: &str = "acl";
/// Single-valued point: the metrics collector (wired as a metrics middleware).
pub const METRICS_COLLECTOR_POINT: &str = "metrics_collector";
/// Single-valued point: the span exporter (wired as a tracing middleware).
pub const TRACING_EXPORTER_POINT: &str = "tracing_exporter";
/// Single-valued point: the structured logger (wired as a logging middleware).
pub const CONTEXT_LOGGER_POINT: &str = "context_logger";

/// Payload kinds an extension point can accept.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExtensionKind {
    Middleware,
    ApprovalHandler,
    Acl,
    MetricsCollector,
    TracingExporter,
    ContextLogger,
}

impl fmt::Display for ExtensionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExtensionKind::Middleware => "middleware",
            ExtensionKind::ApprovalHandler => "approval handler",
            ExtensionKind::Acl => "acl engine",
            ExtensionKind::MetricsCollector => "metrics collector",
            ExtensionKind::TracingExporter => "tracing exporter",
            ExtensionKind::ContextLogger => "context logger",
        };
        write!(f, "{name}")
    }
}

/// A registrable value.
#[derive(Clone)]
pub enum ExtensionValue {
    Middleware(Arc<dyn Middleware>),
    ApprovalHandler(Arc<dyn ApprovalHandler>),
    Acl(Arc<dyn AclEngine>),
    MetricsCollector(Arc<MetricsCollector>),
    TracingExporter(Arc<dyn SpanExporter>),
    ContextLogger(ContextLogger),
}

impl ExtensionValue {
    #[must_use]
    pub fn kind(&self) -> ExtensionKind {
        match self {
            ExtensionValue::Middleware(_) => ExtensionKind::Middleware,
            ExtensionValue::ApprovalHandler(_) => ExtensionKind::ApprovalHandler,
            ExtensionValue::Acl(_) => ExtensionKind::Acl,
            ExtensionValue::MetricsCollector(_) => ExtensionKind::MetricsCollector,
            ExtensionValue::TracingExporter(_) => ExtensionKind::TracingExporter,
            ExtensionValue::ContextLogger(_) => ExtensionKind::ContextLogger,
        }
    }
}

/// Declaration of a named point.
#[derive(Clone, Debug)]
pub struct ExtensionPoint {
    pub name: String,
    pub multiple: bool,
    pub kind: ExtensionKind,
}

impl ExtensionPoint {
    pub fn new(name: impl Into<String>, multiple: bool, kind: ExtensionKind) -> Self {
        Self {
            name: name.into(),
            multiple,
            kind,
        }
    }
}

/// Errors raised by [`ExtensionManager::register`].
#[derive(Debug, Error, Diagnostic)]
pub enum ExtensionError {
    #[error("unknown extension point: {name}")]
    #[diagnostic(
        code(apcore::extensions::unknown_point),
        help("Declare custom points with ExtensionManager::declare before registering.")
    )]
    UnknownPoint { name: String },

    #[error("extension point {point} expects a {expected}, got a {got}")]
    #[diagnostic(code(apcore::extensions::type_mismatch))]
    TypeMismatch {
        point: String,
        expected: ExtensionKind,
        got: ExtensionKind,
    },
}

/// Registry of extension points and their registered values.
pub struct ExtensionManager {
    points: FxHashMap<String, ExtensionPoint>,
    values: FxHashMap<String, Vec<ExtensionValue>>,
    config: Config,
}

impl ExtensionManager {
    /// Manager with the built-in points declared.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    /// Manager whose observability wiring reads `tracing.*` / `metrics.*` /
    /// `logging.*` settings from `config`.
    #[must_use]
    pub fn with_config(config: Config) -> Self {
        let mut manager = Self {
            points: FxHashMap::default(),
            values: FxHashMap::default(),
            config,
        };
        manager.declare(ExtensionPoint::new(
            MIDDLEWARE_POINT,
            true,
            ExtensionKind::Middleware,
        ));
        manager.declare(ExtensionPoint::new(
            APPROVAL_HANDLER_POINT,
            false,
            ExtensionKind::ApprovalHandler,
        ));
        manager.declare(ExtensionPoint::new(ACL_POINT, false, ExtensionKind::Acl));
        manager.declare(ExtensionPoint::new(
            METRICS_COLLECTOR_POINT,
            false,
            ExtensionKind::MetricsCollector,
        ));
        manager.declare(ExtensionPoint::new(
            TRACING_EXPORTER_POINT,
            false,
            ExtensionKind::TracingExporter,
        ));
        manager.declare(ExtensionPoint::new(
            CONTEXT_LOGGER_POINT,
            false,
            ExtensionKind::ContextLogger,
        ));
        manager
    }

    /// Declare a custom point; re-declaring replaces the declaration but
    /// keeps registered values.
    pub fn declare(&mut self, point: ExtensionPoint) {
        self.points.insert(point.name.clone(), point);
    }

    /// Register a value against a point. The value's kind must match the
    /// point's declaration; single-valued points overwrite on re-register.
    pub fn register(
        &mut self,
        name: &str,
        value: ExtensionValue,
    ) -> Result<(), ExtensionError> {
        let point = self
            .points
            .get(name)
            .ok_or_else(|| ExtensionError::UnknownPoint {
                name: name.to_string(),
            })?;
        if value.kind() != point.kind {
            return Err(ExtensionError::TypeMismatch {
                point: name.to_string(),
                expected: point.kind,
                got: value.kind(),
            });
        }
        let slot = self.values.entry(name.to_string()).or_default();
        if !point.multiple {
            slot.clear();
        }
        slot.push(value);
        Ok(())
    }

    /// First registered value for a point (the only one for single points).
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ExtensionValue> {
        self.values.get(name).and_then(|values| values.first())
    }

    /// All registered values for a point, in registration order.
    #[must_use]
    pub fn get_all(&self, name: &str) -> &[ExtensionValue] {
        self.values.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Wire everything registered into `executor`.
    ///
    /// Observability points are appended first (so they see the outermost
    /// call boundaries): tracing, then metrics, then logging. Plain
    /// middlewares follow in registration order; the approval handler and
    /// ACL engine are set through their setters.
    pub fn apply(&self, executor: &Arc<Executor>) {
        if let Some(ExtensionValue::TracingExporter(exporter)) = self.get(TRACING_EXPORTER_POINT) {
            executor.middlewares().add(Arc::new(TracingMiddleware::from_config(
                exporter.clone(),
                &self.config,
            )));
        }
        if let Some(ExtensionValue::MetricsCollector(collector)) =
            self.get(METRICS_COLLECTOR_POINT)
        {
            executor
                .middlewares()
                .add(Arc::new(MetricsMiddleware::new(collector.clone())));
        }
        if let Some(ExtensionValue::ContextLogger(logger)) = self.get(CONTEXT_LOGGER_POINT) {
            executor
                .middlewares()
                .add(Arc::new(LoggingMiddleware::new(logger.clone())));
        }
        for value in self.get_all(MIDDLEWARE_POINT) {
            if let ExtensionValue::Middleware(middleware) = value {
                executor.middlewares().add(middleware.clone());
            }
        }
        if let Some(ExtensionValue::ApprovalHandler(handler)) = self.get(APPROVAL_HANDLER_POINT) {
            executor.set_approval_handler(handler.clone());
        }
        if let Some(ExtensionValue::Acl(acl)) = self.get(ACL_POINT) {
            executor.set_acl(acl.clone());
        }
    }
}

impl Default for ExtensionManager {
    fn default() -> Self {
        Self::new()
    }
}
