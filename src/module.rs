//! Module abstraction: the named units of work the executor orchestrates.
//!
//! A [`Module`] is anything that can execute a JSON input mapping into a JSON
//! output under a [`Context`], described by input/output schemas and a set of
//! [`Annotations`]. Modules are registered in a registry and invoked through
//! [`Executor::call`](crate::executor::Executor::call), never directly.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use futures_util::stream::{self, BoxStream};
use serde_json::Value;

use crate::context::Context;
use crate::types::{BoxError, JsonMap};

/// Lazy sequence of raw output chunks produced by a streaming module body.
pub type ModuleStream = BoxStream<'static, Result<Value, BoxError>>;

/// Semantic tags on a module.
///
/// The boolean tags drive pipeline behavior (`requires_approval` arms the
/// approval gate; the rest are advisory for callers and tooling).
/// `timeout_ms` overrides the executor's default per-call timeout. Vendor
/// keys (`x-*`) are preserved in `extra`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Annotations {
    pub readonly: bool,
    pub destructive: bool,
    pub idempotent: bool,
    pub requires_approval: bool,
    pub open_world: bool,
    pub timeout_ms: Option<u64>,
    /// Vendor extension keys, preserved verbatim.
    pub extra: JsonMap,
}

impl Annotations {
    /// Parse the raw-mapping form. Recognized keys are read with a tolerant
    /// present-and-truthy check; everything else lands in `extra`.
    #[must_use]
    pub fn from_value(value: &Value) -> Self {
        let Some(map) = value.as_object() else {
            return Self::default();
        };
        let flag = |key: &str| map.get(key).and_then(Value::as_bool).unwrap_or(false);
        let mut annotations = Self {
            readonly: flag("readonly"),
            destructive: flag("destructive"),
            idempotent: flag("idempotent"),
            requires_approval: flag("requiresApproval"),
            open_world: flag("openWorld"),
            timeout_ms: map.get("timeoutMs").and_then(Value::as_u64),
            extra: JsonMap::new(),
        };
        for (key, val) in map {
            if !matches!(
                key.as_str(),
                "readonly" | "destructive" | "idempotent" | "requiresApproval" | "openWorld"
                    | "timeoutMs"
            ) {
                annotations.extra.insert(key.clone(), val.clone());
            }
        }
        annotations
    }

    /// Normalized mapping form, used when freezing approval requests.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut map = JsonMap::new();
        map.insert("readonly".into(), Value::Bool(self.readonly));
        map.insert("destructive".into(), Value::Bool(self.destructive));
        map.insert("idempotent".into(), Value::Bool(self.idempotent));
        map.insert("requiresApproval".into(), Value::Bool(self.requires_approval));
        map.insert("openWorld".into(), Value::Bool(self.open_world));
        if let Some(ms) = self.timeout_ms {
            map.insert("timeoutMs".into(), Value::from(ms));
        }
        for (key, val) in &self.extra {
            map.insert(key.clone(), val.clone());
        }
        Value::Object(map)
    }

    #[must_use]
    pub fn with_requires_approval(mut self, requires_approval: bool) -> Self {
        self.requires_approval = requires_approval;
        self
    }

    #[must_use]
    pub fn with_readonly(mut self, readonly: bool) -> Self {
        self.readonly = readonly;
        self
    }

    #[must_use]
    pub fn with_destructive(mut self, destructive: bool) -> Self {
        self.destructive = destructive;
        self
    }

    #[must_use]
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }
}

/// A named unit of work.
///
/// Bodies return any JSON value; the pipeline normalizes it (`null` becomes
/// an empty mapping, a mapping passes through, any other value is wrapped as
/// `{"result": value}`) before output validation. A body error that is
/// already a pipeline error (from a nested call) propagates unchanged.
#[async_trait]
pub trait Module: Send + Sync {
    /// Execute the module body. `inputs` have already passed validation.
    async fn execute(&self, inputs: JsonMap, ctx: Context) -> Result<Value, BoxError>;

    /// Schema describing the input mapping.
    fn input_schema(&self) -> Value;

    /// Schema describing the output mapping.
    fn output_schema(&self) -> Value;

    fn annotations(&self) -> Annotations {
        Annotations::default()
    }

    /// Human-readable description, surfaced in approval requests.
    fn description(&self) -> Option<String> {
        None
    }

    /// Streaming body used by [`Executor::stream`](crate::executor::Executor::stream).
    ///
    /// Defaults to a one-chunk stream over [`execute`](Module::execute).
    async fn execute_stream(&self, inputs: JsonMap, ctx: Context) -> Result<ModuleStream, BoxError> {
        let chunk: Result<Value, BoxError> = Ok(self.execute(inputs, ctx).await?);
        Ok(Box::pin(stream::iter([chunk])))
    }
}

type ModuleFn =
    dyn Fn(JsonMap, Context) -> BoxFuture<'static, Result<Value, BoxError>> + Send + Sync;

/// A module backed by an async closure, for tests, demos, and glue code.
///
/// # Examples
///
/// ```rust
/// use apcore::module::FunctionModule;
/// use serde_json::json;
///
/// let echo = FunctionModule::new(
///     json!({ "type": "object", "properties": { "x": { "type": "number" } } }),
///     json!({ "type": "object", "properties": { "result": { "type": "number" } } }),
///     |inputs, _ctx| async move {
///         let x = inputs["x"].as_f64().unwrap_or_default();
///         Ok(json!({ "result": x * 2.0 }))
///     },
/// );
/// ```
pub struct FunctionModule {
    input_schema: Value,
    output_schema: Value,
    annotations: Annotations,
    description: Option<String>,
    body: Arc<ModuleFn>,
}

impl FunctionModule {
    pub fn new<F, Fut>(input_schema: Value, output_schema: Value, body: F) -> Self
    where
        F: Fn(JsonMap, Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, BoxError>> + Send + 'static,
    {
        Self {
            input_schema,
            output_schema,
            annotations: Annotations::default(),
            description: None,
            body: Arc::new(move |inputs, ctx| Box::pin(body(inputs, ctx))),
        }
    }

    #[must_use]
    pub fn with_annotations(mut self, annotations: Annotations) -> Self {
        self.annotations = annotations;
        self
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

#[async_trait]
impl Module for FunctionModule {
    async fn execute(&self, inputs: JsonMap, ctx: Context) -> Result<Value, BoxError> {
        (self.body)(inputs, ctx).await
    }

    fn input_schema(&self) -> Value {
        self.input_schema.clone()
    }

    fn output_schema(&self) -> Value {
        self.output_schema.clone()
    }

    fn annotations(&self) -> Annotations {
        self.annotations.clone()
    }

    fn description(&self) -> Option<String> {
        self.description.clone()
    }
}
