#![allow(dead_code)]

use std::sync::Arc;

use apcore::approval::{ApprovalHandler, ApprovalRequest, ApprovalResult};
use apcore::context::Context;
use apcore::errors::ModuleError;
use apcore::middleware::Middleware;
use apcore::types::{BoxError, JsonMap};
use async_trait::async_trait;
use parking_lot::Mutex;

/// Records every hook invocation as `"<phase>:<label>"`.
pub struct RecordingMiddleware {
    label: &'static str,
    events: Arc<Mutex<Vec<String>>>,
}

impl RecordingMiddleware {
    pub fn new(label: &'static str, events: Arc<Mutex<Vec<String>>>) -> Self {
        Self { label, events }
    }

    fn record(&self, phase: &str) {
        self.events.lock().push(format!("{phase}:{}", self.label));
    }
}

#[async_trait]
impl Middleware for RecordingMiddleware {
    fn name(&self) -> String {
        self.label.to_string()
    }

    async fn before(
        &self,
        _module_id: &str,
        _inputs: &JsonMap,
        _ctx: &Context,
    ) -> Result<Option<JsonMap>, BoxError> {
        self.record("before");
        Ok(None)
    }

    async fn after(
        &self,
        _module_id: &str,
        _inputs: &JsonMap,
        _output: &JsonMap,
        _ctx: &Context,
    ) -> Result<Option<JsonMap>, BoxError> {
        self.record("after");
        Ok(None)
    }

    async fn on_error(
        &self,
        _module_id: &str,
        _inputs: &JsonMap,
        _error: &ModuleError,
        _ctx: &Context,
    ) -> Result<Option<JsonMap>, BoxError> {
        self.record("on_error");
        Ok(None)
    }
}

/// Recovers any error with a fixed output.
pub struct RecoveringMiddleware {
    output: JsonMap,
}

impl RecoveringMiddleware {
    pub fn new(output: JsonMap) -> Self {
        Self { output }
    }
}

#[async_trait]
impl Middleware for RecoveringMiddleware {
    fn name(&self) -> String {
        "recovering".to_string()
    }

    async fn on_error(
        &self,
        _module_id: &str,
        _inputs: &JsonMap,
        _error: &ModuleError,
        _ctx: &Context,
    ) -> Result<Option<JsonMap>, BoxError> {
        Ok(Some(self.output.clone()))
    }
}

/// Fails in the named phase.
pub struct FailingMiddleware {
    pub fail_before: bool,
    pub fail_on_error: bool,
}

#[async_trait]
impl Middleware for FailingMiddleware {
    fn name(&self) -> String {
        "failing".to_string()
    }

    async fn before(
        &self,
        _module_id: &str,
        _inputs: &JsonMap,
        _ctx: &Context,
    ) -> Result<Option<JsonMap>, BoxError> {
        if self.fail_before {
            return Err("before hook failed".into());
        }
        Ok(None)
    }

    async fn on_error(
        &self,
        _module_id: &str,
        _inputs: &JsonMap,
        _error: &ModuleError,
        _ctx: &Context,
    ) -> Result<Option<JsonMap>, BoxError> {
        if self.fail_on_error {
            return Err("on_error hook failed".into());
        }
        Ok(None)
    }
}

/// Captures the context's redacted inputs and serialized form in `before`.
pub struct ContextProbe {
    pub redacted: Arc<Mutex<Option<JsonMap>>>,
    pub encoded: Arc<Mutex<Option<serde_json::Value>>>,
}

impl ContextProbe {
    pub fn new() -> Self {
        Self {
            redacted: Arc::new(Mutex::new(None)),
            encoded: Arc::new(Mutex::new(None)),
        }
    }
}

#[async_trait]
impl Middleware for ContextProbe {
    fn name(&self) -> String {
        "context-probe".to_string()
    }

    async fn before(
        &self,
        _module_id: &str,
        _inputs: &JsonMap,
        ctx: &Context,
    ) -> Result<Option<JsonMap>, BoxError> {
        *self.redacted.lock() = ctx.redacted_inputs().cloned();
        *self.encoded.lock() = Some(ctx.to_json());
        Ok(None)
    }
}

/// Approval handler with scripted responses that records every invocation.
pub struct RecordingHandler {
    pub request_response: ApprovalResult,
    pub check_response: ApprovalResult,
    pub requests: Mutex<Vec<ApprovalRequest>>,
    pub checks: Mutex<Vec<String>>,
}

impl RecordingHandler {
    pub fn new(request_response: ApprovalResult, check_response: ApprovalResult) -> Self {
        Self {
            request_response,
            check_response,
            requests: Mutex::new(Vec::new()),
            checks: Mutex::new(Vec::new()),
        }
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn checked_ids(&self) -> Vec<String> {
        self.checks.lock().clone()
    }
}

#[async_trait]
impl ApprovalHandler for RecordingHandler {
    async fn request_approval(
        &self,
        request: &ApprovalRequest,
    ) -> Result<ApprovalResult, BoxError> {
        self.requests.lock().push(request.clone());
        Ok(self.request_response.clone())
    }

    async fn check_approval(&self, approval_id: &str) -> Result<ApprovalResult, BoxError> {
        self.checks.lock().push(approval_id.to_string());
        Ok(self.check_response.clone())
    }
}
