//! The executor pipeline.
//!
//! [`Executor::call`] walks a fixed sequence of steps around every module
//! invocation:
//!
//! 1. context acquisition (root or child derivation)
//! 2. safety checks (depth, cycle, frequency)
//! 3. registry lookup
//! 4. ACL check
//! 5. approval gate
//! 6. input validation, then redacted-input caching on the context
//! 7. middleware `before` chain (forward)
//! 8. module body under a per-call timeout
//! 9. output validation
//! 10. middleware `after` chain (reverse)
//! 11. return
//!
//! Any error raised between steps 7 and 9 inclusive is offered to the
//! middleware `on_error` chain, which may recover the call with a replacement
//! output. Errors elsewhere terminate the pipeline directly.
//!
//! # Examples
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
//!     "echo",
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
//! let output = executor
//!     .call("echo", json!({ "x": 21 }).as_object().cloned().unwrap(), None)
//!     .await?;
//! assert_eq!(output["result"], json!(42.0));
//! # Ok(())
//! # }
//! ```

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};
use std::time::Duration;

use futures_util::{Stream, StreamExt};
use parking_lot::RwLock;
use serde_json::Value;
use tracing::instrument;

use crate::acl::AclEngine;
use crate::approval::{ApprovalHandler, run_gate};
use crate::config::Config;
use crate::context::Context;
use crate::errors::ModuleError;
use crate::middleware::{Middleware, MiddlewareManager};
use crate::module::Module;
use crate::redact::redact_sensitive;
use crate::registry::ModuleRegistry;
use crate::schema::{SchemaSide, SchemaValidator, StructuralValidator, ValidationStrategy};
use crate::types::{BoxError, JsonMap};

pub mod safety;

use safety::SafetyChecks;

/// Default per-call timeout when neither config nor module annotations set
/// one.
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Normalize a raw body result into an output mapping: `null` becomes empty,
/// a mapping passes through, anything else is wrapped as `{"result": value}`.
fn normalize_output(value: Value) -> JsonMap {
    match value {
        Value::Null => JsonMap::new(),
        Value::Object(map) => map,
        other => {
            let mut map = JsonMap::new();
            map.insert("result".to_string(), other);
            map
        }
    }
}

/// Type a body error: a nested pipeline error passes through unchanged,
/// anything else becomes [`ModuleError::Execution`].
fn type_body_error(module_id: &str, ctx: &Context, source: BoxError) -> ModuleError {
    match source.downcast::<ModuleError>() {
        Ok(inner) => *inner,
        Err(source) => ModuleError::Execution {
            module_id: module_id.to_string(),
            source,
            trace_id: Some(ctx.trace_id().to_string()),
        },
    }
}

/// Lazy sequence of validated output chunks from [`Executor::stream`].
pub struct OutputStream {
    inner: futures_util::stream::BoxStream<'static, Result<JsonMap, ModuleError>>,
}

impl OutputStream {
    fn from_receiver(rx: flume::Receiver<Result<JsonMap, ModuleError>>) -> Self {
        Self {
            inner: rx.into_stream().boxed(),
        }
    }
}

impl std::fmt::Debug for OutputStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputStream").finish()
    }
}

impl Stream for OutputStream {
    type Item = Result<JsonMap, ModuleError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

/// Builder for [`Executor`].
pub struct ExecutorBuilder {
    registry: Arc<dyn ModuleRegistry>,
    validator: Option<Arc<dyn SchemaValidator>>,
    acl: Option<Arc<dyn AclEngine>>,
    approval_handler: Option<Arc<dyn ApprovalHandler>>,
    middlewares: Vec<Arc<dyn Middleware>>,
    config: Config,
}

impl ExecutorBuilder {
    #[must_use]
    pub fn new(registry: Arc<dyn ModuleRegistry>) -> Self {
        Self {
            registry,
            validator: None,
            acl: None,
            approval_handler: None,
            middlewares: Vec::new(),
            config: Config::default(),
        }
    }

    /// Use `config` for executor, schema, and safety settings.
    #[must_use]
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn with_validator(mut self, validator: Arc<dyn SchemaValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    #[must_use]
    pub fn with_acl(mut self, acl: Arc<dyn AclEngine>) -> Self {
        self.acl = Some(acl);
        self
    }

    #[must_use]
    pub fn with_approval_handler(mut self, handler: Arc<dyn ApprovalHandler>) -> Self {
        self.approval_handler = Some(handler);
        self
    }

    /// Append a middleware; builder order is chain order.
    #[must_use]
    pub fn with_middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middlewares.push(middleware);
        self
    }

    #[must_use]
    pub fn build(self) -> Arc<Executor> {
        let validator = self.validator.unwrap_or_else(|| {
            Arc::new(StructuralValidator::new(ValidationStrategy::from_config(
                &self.config,
            )))
        });
        let middlewares = MiddlewareManager::new();
        for middleware in self.middlewares {
            middlewares.add(middleware);
        }
        Arc::new(Executor {
            registry: self.registry,
            validator,
            middlewares,
            approval_handler: RwLock::new(self.approval_handler),
            acl: RwLock::new(self.acl),
            default_timeout_ms: self
                .config
                .get_u64("executor.default_timeout_ms")
                .unwrap_or(DEFAULT_TIMEOUT_MS),
            safety: SafetyChecks::from_config(&self.config),
        })
    }
}

/// Orchestrates module calls through the fixed pipeline.
///
/// Cross-call shared state is limited to the registry, the ACL engine, the
/// middleware chain, and the frequency counter; each invocation otherwise
/// owns its context tree, so parallel calls compose safely.
pub struct Executor {
    registry: Arc<dyn ModuleRegistry>,
    validator: Arc<dyn SchemaValidator>,
    middlewares: MiddlewareManager,
    approval_handler: RwLock<Option<Arc<dyn ApprovalHandler>>>,
    acl: RwLock<Option<Arc<dyn AclEngine>>>,
    default_timeout_ms: u64,
    safety: SafetyChecks,
}

impl Executor {
    /// Executor over `registry` with defaults everywhere else.
    #[must_use]
    pub fn new(registry: Arc<dyn ModuleRegistry>) -> Arc<Self> {
        ExecutorBuilder::new(registry).build()
    }

    pub fn registry(&self) -> &Arc<dyn ModuleRegistry> {
        &self.registry
    }

    /// The middleware chain; mutate it to install or remove middlewares.
    pub fn middlewares(&self) -> &MiddlewareManager {
        &self.middlewares
    }

    pub fn default_timeout_ms(&self) -> u64 {
        self.default_timeout_ms
    }

    /// Install (or replace) the approval handler.
    pub fn set_approval_handler(&self, handler: Arc<dyn ApprovalHandler>) {
        *self.approval_handler.write() = Some(handler);
    }

    /// Install (or replace) the ACL engine.
    pub fn set_acl(&self, acl: Arc<dyn AclEngine>) {
        *self.acl.write() = Some(acl);
    }

    /// Steps 1–6: derive the child context, run safety checks, resolve the
    /// module, consult ACL and the approval gate, validate inputs, and cache
    /// their redacted form on the context.
    async fn prepare(
        self: &Arc<Self>,
        module_id: &str,
        mut inputs: JsonMap,
        ctx: Option<&Context>,
    ) -> Result<(Arc<dyn Module>, Context, JsonMap), ModuleError> {
        let mut child = match ctx {
            Some(parent) => parent.child(module_id),
            None => Context::new().child(module_id),
        };
        child.attach_executor(Arc::clone(self));
        let trace_id = child.trace_id().to_string();

        self.safety
            .check(&child, module_id)
            .map_err(|error| error.with_trace_id(&trace_id))?;

        let module = self
            .registry
            .get(module_id)
            .ok_or_else(|| ModuleError::ModuleNotFound {
                module_id: module_id.to_string(),
                trace_id: Some(trace_id.clone()),
            })?;

        // ACL runs before the approval gate so unauthorized callers never
        // reach the handler.
        let acl = self.acl.read().clone();
        if let Some(acl) = acl {
            let identity = child.identity().map(|arc| arc.as_ref());
            let decision = acl.check(identity, module_id, &inputs).await;
            if !decision.is_allowed() {
                return Err(ModuleError::AclDenied {
                    module_id: module_id.to_string(),
                    reason: decision.reason().map(str::to_string),
                    trace_id: Some(trace_id),
                });
            }
        }

        let handler = self.approval_handler.read().clone();
        if let Some(handler) = handler {
            run_gate(&handler, &module, module_id, &mut inputs, &child).await?;
        }

        let input_schema = module.input_schema();
        let validated =
            self.validator
                .validate(&input_schema, &inputs)
                .map_err(|issues| ModuleError::SchemaValidation {
                    module_id: module_id.to_string(),
                    side: SchemaSide::Input,
                    issues,
                    trace_id: Some(trace_id),
                })?;
        child.set_redacted_inputs(redact_sensitive(&validated, &input_schema));

        Ok((module, child, validated))
    }

    /// Invoke `module_id` with `inputs` under `ctx` (a root context is
    /// created when `ctx` is `None`).
    #[instrument(skip(self, inputs, ctx), err)]
    pub async fn call(
        self: &Arc<Self>,
        module_id: &str,
        inputs: JsonMap,
        ctx: Option<&Context>,
    ) -> Result<JsonMap, ModuleError> {
        let (module, child, validated) = self.prepare(module_id, inputs, ctx).await?;

        // 7. before chain
        let threaded = match self
            .middlewares
            .execute_before(module_id, validated.clone(), &child)
            .await
        {
            Ok(threaded) => threaded,
            Err(error) => {
                return self
                    .middlewares
                    .execute_on_error(module_id, &validated, error, &child)
                    .await;
            }
        };

        // 8. body under timeout; dropping the future at expiry is the
        // cancellation signal, so a late result can never reach the after
        // chain
        let timeout_ms = module
            .annotations()
            .timeout_ms
            .unwrap_or(self.default_timeout_ms);
        let outcome = tokio::time::timeout(
            Duration::from_millis(timeout_ms),
            module.execute(threaded.clone(), child.clone()),
        )
        .await;
        let raw = match outcome {
            Err(_elapsed) => {
                let error = ModuleError::Timeout {
                    module_id: module_id.to_string(),
                    timeout_ms,
                    trace_id: Some(child.trace_id().to_string()),
                };
                return self
                    .middlewares
                    .execute_on_error(module_id, &threaded, error, &child)
                    .await;
            }
            Ok(Err(source)) => {
                let error = type_body_error(module_id, &child, source);
                return self
                    .middlewares
                    .execute_on_error(module_id, &threaded, error, &child)
                    .await;
            }
            Ok(Ok(value)) => value,
        };

        // 9. output validation
        let normalized = normalize_output(raw);
        let output = match self.validator.validate(&module.output_schema(), &normalized) {
            Ok(output) => output,
            Err(issues) => {
                let error = ModuleError::SchemaValidation {
                    module_id: module_id.to_string(),
                    side: SchemaSide::Output,
                    issues,
                    trace_id: Some(child.trace_id().to_string()),
                };
                return self
                    .middlewares
                    .execute_on_error(module_id, &threaded, error, &child)
                    .await;
            }
        };

        // 10. after chain
        self.middlewares
            .execute_after(module_id, &threaded, output, &child)
            .await
    }

    /// Registry lookup plus input validation, with no execution.
    pub fn validate(&self, module_id: &str, inputs: &JsonMap) -> Result<JsonMap, ModuleError> {
        let module = self
            .registry
            .get(module_id)
            .ok_or_else(|| ModuleError::ModuleNotFound {
                module_id: module_id.to_string(),
                trace_id: None,
            })?;
        self.validator
            .validate(&module.input_schema(), inputs)
            .map_err(|issues| ModuleError::SchemaValidation {
                module_id: module_id.to_string(),
                side: SchemaSide::Input,
                issues,
                trace_id: None,
            })
    }

    /// Streaming entry point. Shares steps 1–7 with [`call`](Self::call),
    /// validates and normalizes chunks as the body produces them, and runs
    /// the after chain once the sequence terminates. An unrecovered
    /// mid-stream error arrives as the stream's terminal item.
    #[instrument(skip(self, inputs, ctx), err)]
    pub async fn stream(
        self: &Arc<Self>,
        module_id: &str,
        inputs: JsonMap,
        ctx: Option<&Context>,
    ) -> Result<OutputStream, ModuleError> {
        let (module, child, validated) = self.prepare(module_id, inputs, ctx).await?;

        let threaded = match self
            .middlewares
            .execute_before(module_id, validated.clone(), &child)
            .await
        {
            Ok(threaded) => threaded,
            Err(error) => {
                // a recovering middleware turns the failure into a one-chunk
                // stream; an unrecovered error fails the entry point
                let recovered = self
                    .middlewares
                    .execute_on_error(module_id, &validated, error, &child)
                    .await?;
                let (tx, rx) = flume::bounded(1);
                let _ = tx.send(Ok(recovered));
                return Ok(OutputStream::from_receiver(rx));
            }
        };

        let (tx, rx) = flume::unbounded();
        let executor = Arc::clone(self);
        let module_id = module_id.to_string();
        tokio::spawn(async move {
            executor
                .drive_stream(&module, &module_id, threaded, &child, tx)
                .await;
        });
        Ok(OutputStream::from_receiver(rx))
    }

    async fn drive_stream(
        self: Arc<Self>,
        module: &Arc<dyn Module>,
        module_id: &str,
        threaded: JsonMap,
        ctx: &Context,
        tx: flume::Sender<Result<JsonMap, ModuleError>>,
    ) {
        let output_schema = module.output_schema();
        let mut chunks = match module.execute_stream(threaded.clone(), ctx.clone()).await {
            Ok(chunks) => chunks,
            Err(source) => {
                let error = type_body_error(module_id, ctx, source);
                let outcome = self
                    .middlewares
                    .execute_on_error(module_id, &threaded, error, ctx)
                    .await;
                let _ = tx.send_async(outcome).await;
                return;
            }
        };

        while let Some(item) = chunks.next().await {
            let error = match item {
                Ok(value) => {
                    let normalized = normalize_output(value);
                    match self.validator.validate(&output_schema, &normalized) {
                        Ok(chunk) => {
                            if tx.send_async(Ok(chunk)).await.is_err() {
                                return; // receiver dropped
                            }
                            continue;
                        }
                        Err(issues) => ModuleError::SchemaValidation {
                            module_id: module_id.to_string(),
                            side: SchemaSide::Output,
                            issues,
                            trace_id: Some(ctx.trace_id().to_string()),
                        },
                    }
                }
                Err(source) => type_body_error(module_id, ctx, source),
            };
            let outcome = self
                .middlewares
                .execute_on_error(module_id, &threaded, error, ctx)
                .await;
            let _ = tx.send_async(outcome).await;
            return;
        }

        // step 10 once the sequence has terminated
        if let Err(error) = self
            .middlewares
            .execute_after(module_id, &threaded, JsonMap::new(), ctx)
            .await
        {
            let _ = tx.send_async(Err(error)).await;
        }
    }
}
