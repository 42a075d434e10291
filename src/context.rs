//! Per-call metadata propagated through the pipeline and into nested calls.
//!
//! A [`Context`] carries the trace id, the ancestry of module ids
//! (`call_chain`), the caller principal, and a `data` map that is shared *by
//! reference* down one call tree. Middlewares keep their per-trace stacks in
//! `data` under `_`-prefixed keys; those keys are reserved for the framework
//! and are never serialized.
//!
//! # Child contexts
//!
//! ```rust
//! use apcore::context::Context;
//!
//! let root = Context::new();
//! let child = root.child("billing.charge");
//!
//! assert_eq!(child.trace_id(), root.trace_id());
//! assert_eq!(child.call_chain(), &["billing.charge".to_string()]);
//! assert!(child.caller_id().is_none());
//!
//! let grandchild = child.child("billing.audit");
//! assert_eq!(grandchild.caller_id(), Some("billing.charge"));
//! ```

use std::fmt;
use std::sync::Arc;

use miette::Diagnostic;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::{Value, json};
use thiserror::Error;

use crate::executor::Executor;
use crate::identity::Identity;
use crate::types::JsonMap;

/// Shared per-trace data map. One instance is shared by reference across a
/// whole call tree; locks are short-held.
pub type ContextData = Arc<Mutex<FxHashMap<String, Value>>>;

/// Generate a fresh 128-bit lower-case hex trace id.
#[must_use]
pub fn new_trace_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Errors raised when decoding a serialized context.
#[derive(Debug, Error, Diagnostic)]
pub enum ContextError {
    /// The encoded value is not a JSON object.
    #[error("context encoding is not a JSON object")]
    #[diagnostic(code(apcore::context::not_an_object))]
    NotAnObject,

    /// A required field is absent or has the wrong type.
    #[error("context encoding is missing field: {field}")]
    #[diagnostic(code(apcore::context::missing_field))]
    MissingField { field: &'static str },
}

/// Per-call metadata. Cheap to clone; the `data` map is shared by reference.
#[derive(Clone)]
pub struct Context {
    trace_id: String,
    caller_id: Option<String>,
    call_chain: Vec<String>,
    executor: Option<Arc<Executor>>,
    identity: Option<Arc<Identity>>,
    redacted_inputs: Option<JsonMap>,
    data: ContextData,
}

impl Context {
    /// Create a root context: fresh trace id, empty call chain, no caller,
    /// fresh `data` map.
    #[must_use]
    pub fn new() -> Self {
        Self {
            trace_id: new_trace_id(),
            caller_id: None,
            call_chain: Vec::new(),
            executor: None,
            identity: None,
            redacted_inputs: None,
            data: Arc::new(Mutex::new(FxHashMap::default())),
        }
    }

    /// Attach the caller principal.
    #[must_use]
    pub fn with_identity(mut self, identity: Arc<Identity>) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Attach the owning executor so module bodies can issue nested calls.
    #[must_use]
    pub fn with_executor(mut self, executor: Arc<Executor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Derive the context for a nested call into `module_id`.
    ///
    /// The child shares `trace_id`, `identity`, `executor`, and the `data`
    /// map (by reference); its `call_chain` is the parent's chain plus
    /// `module_id`; `caller_id` is the parent chain's last entry;
    /// `redacted_inputs` is reset. The parent is left untouched.
    #[must_use]
    pub fn child(&self, module_id: &str) -> Self {
        let mut call_chain = self.call_chain.clone();
        call_chain.push(module_id.to_string());
        Self {
            trace_id: self.trace_id.clone(),
            caller_id: self.call_chain.last().cloned(),
            call_chain,
            executor: self.executor.clone(),
            identity: self.identity.clone(),
            redacted_inputs: None,
            data: Arc::clone(&self.data),
        }
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn caller_id(&self) -> Option<&str> {
        self.caller_id.as_deref()
    }

    pub fn call_chain(&self) -> &[String] {
        &self.call_chain
    }

    /// Module id of the call this context belongs to (last chain entry).
    #[must_use]
    pub fn module_id(&self) -> Option<&str> {
        self.call_chain.last().map(String::as_str)
    }

    pub fn identity(&self) -> Option<&Arc<Identity>> {
        self.identity.as_ref()
    }

    pub fn executor(&self) -> Option<&Arc<Executor>> {
        self.executor.as_ref()
    }

    /// Redacted copy of the validated inputs, cached by the pipeline after
    /// input validation for downstream observability.
    pub fn redacted_inputs(&self) -> Option<&JsonMap> {
        self.redacted_inputs.as_ref()
    }

    /// The shared per-trace data map.
    pub fn data(&self) -> &ContextData {
        &self.data
    }

    /// Copy a value out of the shared data map.
    #[must_use]
    pub fn data_get(&self, key: &str) -> Option<Value> {
        self.data.lock().get(key).cloned()
    }

    /// Insert a value into the shared data map.
    pub fn data_insert(&self, key: impl Into<String>, value: Value) {
        self.data.lock().insert(key.into(), value);
    }

    pub(crate) fn attach_executor(&mut self, executor: Arc<Executor>) {
        self.executor = Some(executor);
    }

    pub(crate) fn set_redacted_inputs(&mut self, redacted: JsonMap) {
        self.redacted_inputs = Some(redacted);
    }

    /// Serialize for cross-process call chains.
    ///
    /// Excludes the executor back-pointer and every `data` key starting with
    /// `_`; all retained containers are deep copies.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let data: JsonMap = self
            .data
            .lock()
            .iter()
            .filter(|(key, _)| !key.starts_with('_'))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        json!({
            "traceId": self.trace_id,
            "callerId": self.caller_id,
            "callChain": self.call_chain,
            "identity": self.identity.as_ref().map(|i| i.to_json()),
            "redactedInputs": self.redacted_inputs,
            "data": data,
        })
    }

    /// Decode a serialized context, optionally re-injecting an executor.
    pub fn from_json(
        value: &Value,
        executor: Option<Arc<Executor>>,
    ) -> Result<Self, ContextError> {
        let obj = value.as_object().ok_or(ContextError::NotAnObject)?;
        let trace_id = obj
            .get("traceId")
            .and_then(Value::as_str)
            .ok_or(ContextError::MissingField { field: "traceId" })?
            .to_string();
        let caller_id = obj
            .get("callerId")
            .and_then(Value::as_str)
            .map(str::to_string);
        let call_chain = obj
            .get("callChain")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        let identity = obj
            .get("identity")
            .filter(|v| !v.is_null())
            .and_then(Identity::from_json)
            .map(Arc::new);
        let redacted_inputs = obj
            .get("redactedInputs")
            .and_then(Value::as_object)
            .cloned();
        let data: FxHashMap<String, Value> = obj
            .get("data")
            .and_then(Value::as_object)
            .map(|map| {
                map.iter()
                    .map(|(key, value)| (key.clone(), value.clone()))
                    .collect()
            })
            .unwrap_or_default();
        Ok(Self {
            trace_id,
            caller_id,
            call_chain,
            executor,
            identity,
            redacted_inputs,
            data: Arc::new(Mutex::new(data)),
        })
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("trace_id", &self.trace_id)
            .field("caller_id", &self.caller_id)
            .field("call_chain", &self.call_chain)
            .field("identity", &self.identity)
            .field("has_executor", &self.executor.is_some())
            .finish_non_exhaustive()
    }
}
