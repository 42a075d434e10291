//! # apcore: Instrumented Module-Call Orchestration
//!
//! apcore exposes a uniform way to invoke named units of work ("modules"),
//! each described by input/output schemas and annotations, through a fixed,
//! instrumented pipeline that enforces safety limits, access control,
//! approvals, validation, middleware, and timeouts around the module body.
//!
//! ## Core Concepts
//!
//! - **Modules**: Async units of work with declared schemas and annotations
//! - **Executor**: The fixed 10-step pipeline every call travels through
//! - **Context**: Per-call metadata (trace id, call chain, identity) that
//!   propagates into nested calls
//! - **Middleware onion**: `before` runs outermost-first, `after`/`on_error`
//!   unwind inside-out
//! - **Approval gate**: handler sign-off for modules annotated
//!   `requires_approval`, with a pending/resume flow
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use apcore::executor::ExecutorBuilder;
//! use apcore::module::FunctionModule;
//! use apcore::registry::InMemoryRegistry;
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), apcore::errors::ModuleError> {
//! let registry = Arc::new(InMemoryRegistry::new());
//! registry.register(
//!     "math.double",
//!     Arc::new(FunctionModule::new(
//!         json!({ "type": "object", "properties": { "x": { "type": "number" } } }),
//!         json!({ "type": "object", "properties": { "result": { "type": "number" } } }),
//!         |inputs, _ctx| async move {
//!             let x = inputs["x"].as_f64().unwrap_or_default();
//!             Ok(json!({ "result": x * 2.0 }))
//!         },
//!     )),
//! );
//!
//! let executor = ExecutorBuilder::new(registry).build();
//! let inputs = json!({ "x": 21 }).as_object().cloned().unwrap();
//! let output = executor.call("math.double", inputs, None).await?;
//! assert_eq!(output["result"], json!(42.0));
//! # Ok(())
//! # }
//! ```
//!
//! ## Observability
//!
//! Tracing spans, call metrics, and structured logging are ordinary
//! middlewares; register them on the executor (or through the
//! [`extensions`] manager) and they hook the same `before`/`after`/
//! `on_error` lifecycle as user middleware:
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use apcore::executor::ExecutorBuilder;
//! use apcore::observability::{
//!     InMemoryExporter, MetricsCollector, MetricsMiddleware, SamplingStrategy, TracingMiddleware,
//! };
//! use apcore::registry::InMemoryRegistry;
//!
//! let registry = Arc::new(InMemoryRegistry::new());
//! let exporter = Arc::new(InMemoryExporter::new());
//! let metrics = Arc::new(MetricsCollector::new());
//!
//! let executor = ExecutorBuilder::new(registry)
//!     .with_middleware(Arc::new(TracingMiddleware::new(
//!         exporter.clone(),
//!         SamplingStrategy::Full,
//!     )))
//!     .with_middleware(Arc::new(MetricsMiddleware::new(metrics.clone())))
//!     .build();
//! ```
//!
//! ## Module Guide
//!
//! - [`executor`] - The pipeline, its builder, and the streaming entry point
//! - [`context`] - Per-call metadata and its JSON encoding
//! - [`identity`] - Caller principals
//! - [`module`] - The module trait, annotations, and closure-backed modules
//! - [`registry`] - Module lookup seam and the in-memory registry
//! - [`middleware`] - The onion-model chain
//! - [`approval`] - Approval gate, request/result records, built-in handlers
//! - [`acl`] - Access-control seam and the pattern rule engine
//! - [`schema`] - Validation seam and the structural validator
//! - [`redact`] - Sensitive-field masking
//! - [`pattern`] - Wildcard module-id matching
//! - [`observability`] - Tracing, metrics, and logging middlewares
//! - [`extensions`] - Typed extension points
//! - [`config`] - Dot-path configuration
//! - [`errors`] - The pipeline error type

pub mod acl;
pub mod approval;
pub mod config;
pub mod context;
pub mod diagnostics;
pub mod errors;
pub mod executor;
pub mod extensions;
pub mod identity;
pub mod middleware;
pub mod module;
pub mod observability;
pub mod pattern;
pub mod redact;
pub mod registry;
pub mod schema;
pub mod types;
