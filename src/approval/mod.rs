//! Approval gate: human (or policy) sign-off before sensitive modules run.
//!
//! The gate sits between the ACL check and input validation. It only engages
//! when a handler is configured *and* the module's annotations set
//! `requires_approval`; otherwise it is a no-op, which keeps modules without
//! approval semantics entirely unaffected.
//!
//! A handler decision of `pending` surfaces as
//! [`ModuleError::ApprovalPending`] carrying an approval id; the caller
//! resumes later by repeating the call with the reserved `_approval_token`
//! input set to that id, which routes to
//! [`ApprovalHandler::check_approval`] instead of opening a new request.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use serde_json::Value;

use crate::context::Context;
use crate::errors::ModuleError;
use crate::module::Module;
use crate::observability::append_span_event;
use crate::types::{BoxError, JsonMap};

/// Reserved input key that resumes a pending approval.
pub const APPROVAL_TOKEN_KEY: &str = "_approval_token";

/// Handler decision status.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ApprovalStatus {
    Approved,
    Rejected,
    Timeout,
    Pending,
    /// Any unrecognized status string; the gate fails closed on these.
    Other(String),
}

impl ApprovalStatus {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Rejected => "rejected",
            ApprovalStatus::Timeout => "timeout",
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Other(s) => s,
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value {
            "approved" => ApprovalStatus::Approved,
            "rejected" => ApprovalStatus::Rejected,
            "timeout" => ApprovalStatus::Timeout,
            "pending" => ApprovalStatus::Pending,
            other => ApprovalStatus::Other(other.to_string()),
        }
    }
}

/// Immutable approval decision, produced only through the factory
/// constructors.
#[derive(Clone, Debug, PartialEq)]
pub struct ApprovalResult {
    status: ApprovalStatus,
    approved_by: Option<String>,
    reason: Option<String>,
    approval_id: Option<String>,
    metadata: JsonMap,
}

impl ApprovalResult {
    #[must_use]
    pub fn approved(approved_by: impl Into<String>) -> Self {
        Self {
            status: ApprovalStatus::Approved,
            approved_by: Some(approved_by.into()),
            reason: None,
            approval_id: None,
            metadata: JsonMap::new(),
        }
    }

    #[must_use]
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            status: ApprovalStatus::Rejected,
            approved_by: None,
            reason: Some(reason.into()),
            approval_id: None,
            metadata: JsonMap::new(),
        }
    }

    #[must_use]
    pub fn timeout() -> Self {
        Self {
            status: ApprovalStatus::Timeout,
            approved_by: None,
            reason: Some("approval timed out".to_string()),
            approval_id: None,
            metadata: JsonMap::new(),
        }
    }

    #[must_use]
    pub fn pending(approval_id: impl Into<String>) -> Self {
        Self {
            status: ApprovalStatus::Pending,
            approved_by: None,
            reason: None,
            approval_id: Some(approval_id.into()),
            metadata: JsonMap::new(),
        }
    }

    /// Build a result with an arbitrary (possibly foreign) status.
    #[must_use]
    pub fn with_status(status: ApprovalStatus) -> Self {
        Self {
            status,
            approved_by: None,
            reason: None,
            approval_id: None,
            metadata: JsonMap::new(),
        }
    }

    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    #[must_use]
    pub fn with_approval_id(mut self, approval_id: impl Into<String>) -> Self {
        self.approval_id = Some(approval_id.into());
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: JsonMap) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn status(&self) -> &ApprovalStatus {
        &self.status
    }

    pub fn approved_by(&self) -> Option<&str> {
        self.approved_by.as_deref()
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    pub fn approval_id(&self) -> Option<&str> {
        self.approval_id.as_deref()
    }

    pub fn metadata(&self) -> &JsonMap {
        &self.metadata
    }

    /// The approval id to hand back to callers: `metadata` wins over the
    /// top-level field when both are set.
    #[must_use]
    pub fn effective_approval_id(&self) -> Option<String> {
        self.metadata
            .get("approval_id")
            .or_else(|| self.metadata.get("approvalId"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| self.approval_id.clone())
    }
}

/// Immutable snapshot handed to approval handlers.
#[derive(Clone, Debug)]
pub struct ApprovalRequest {
    module_id: String,
    arguments: JsonMap,
    context: Value,
    annotations: Value,
    description: Option<String>,
    tags: Vec<String>,
    requested_at: DateTime<Utc>,
}

impl ApprovalRequest {
    /// Freeze a request for `module_id`. The context is snapshotted through
    /// its JSON encoding so handlers can persist or forward it; tags come
    /// from the module's `x-tags` vendor annotation when present.
    #[must_use]
    pub fn new(module_id: &str, arguments: JsonMap, ctx: &Context, module: &dyn Module) -> Self {
        let annotations = module.annotations();
        let tags = annotations
            .extra
            .get("x-tags")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        Self {
            module_id: module_id.to_string(),
            arguments,
            context: ctx.to_json(),
            annotations: annotations.to_value(),
            description: module.description(),
            tags,
            requested_at: Utc::now(),
        }
    }

    pub fn module_id(&self) -> &str {
        &self.module_id
    }

    pub fn arguments(&self) -> &JsonMap {
        &self.arguments
    }

    /// JSON-encoded context snapshot (see [`Context::to_json`]).
    pub fn context(&self) -> &Value {
        &self.context
    }

    /// Normalized annotation mapping.
    pub fn annotations(&self) -> &Value {
        &self.annotations
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn requested_at(&self) -> DateTime<Utc> {
        self.requested_at
    }
}

/// Decision source for the approval gate.
///
/// Handler errors propagate to the caller of
/// [`Executor::call`](crate::executor::Executor::call) through the dedicated
/// [`ModuleError::ApprovalHandler`] carrier; the gate never converts them
/// into a denial or a module-body failure.
#[async_trait]
pub trait ApprovalHandler: Send + Sync {
    /// Open a new approval request.
    async fn request_approval(&self, request: &ApprovalRequest)
    -> Result<ApprovalResult, BoxError>;

    /// Look up the decision for a previously issued approval id.
    async fn check_approval(&self, approval_id: &str) -> Result<ApprovalResult, BoxError>;
}

/// Rejects everything. Useful as a safe default in locked-down deployments.
#[derive(Clone, Copy, Debug, Default)]
pub struct AlwaysDeny;

#[async_trait]
impl ApprovalHandler for AlwaysDeny {
    async fn request_approval(
        &self,
        _request: &ApprovalRequest,
    ) -> Result<ApprovalResult, BoxError> {
        Ok(ApprovalResult::rejected("Always denied"))
    }

    async fn check_approval(&self, _approval_id: &str) -> Result<ApprovalResult, BoxError> {
        Ok(ApprovalResult::rejected("Always denied"))
    }
}

/// Approves everything as `"auto"`. For development and trusted pipelines.
#[derive(Clone, Copy, Debug, Default)]
pub struct AutoApprove;

#[async_trait]
impl ApprovalHandler for AutoApprove {
    async fn request_approval(
        &self,
        _request: &ApprovalRequest,
    ) -> Result<ApprovalResult, BoxError> {
        Ok(ApprovalResult::approved("auto"))
    }

    async fn check_approval(&self, _approval_id: &str) -> Result<ApprovalResult, BoxError> {
        Ok(ApprovalResult::approved("auto"))
    }
}

type CallbackFn =
    dyn Fn(ApprovalRequest) -> BoxFuture<'static, Result<ApprovalResult, BoxError>> + Send + Sync;

/// Delegates `request_approval` to a closure; `check_approval` rejects by
/// default since a bare callback has no decision store to consult.
pub struct CallbackHandler {
    callback: Arc<CallbackFn>,
}

impl CallbackHandler {
    pub fn new<F, Fut>(callback: F) -> Self
    where
        F: Fn(ApprovalRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ApprovalResult, BoxError>> + Send + 'static,
    {
        Self {
            callback: Arc::new(move |request| Box::pin(callback(request))),
        }
    }
}

#[async_trait]
impl ApprovalHandler for CallbackHandler {
    async fn request_approval(
        &self,
        request: &ApprovalRequest,
    ) -> Result<ApprovalResult, BoxError> {
        (self.callback)(request.clone()).await
    }

    async fn check_approval(&self, _approval_id: &str) -> Result<ApprovalResult, BoxError> {
        Ok(ApprovalResult::rejected(
            "callback handler has no approval store",
        ))
    }
}

fn audit(ctx: &Context, module_id: &str, result: &ApprovalResult) {
    let approval_id = result.effective_approval_id();
    tracing::info!(
        module_id = %module_id,
        status = %result.status().as_str(),
        approved_by = result.approved_by(),
        reason = result.reason(),
        approval_id = approval_id.as_deref(),
        trace_id = %ctx.trace_id(),
        "approval decision"
    );
    append_span_event(
        ctx,
        &format!("approval.{}", result.status().as_str()),
        serde_json::json!({
            "module_id": module_id,
            "approved_by": result.approved_by(),
            "reason": result.reason(),
            "approval_id": result.effective_approval_id(),
        }),
    );
}

/// Run the approval gate for one call. `inputs` loses its `_approval_token`
/// key when present, so module bodies never observe the token.
pub(crate) async fn run_gate(
    handler: &Arc<dyn ApprovalHandler>,
    module: &Arc<dyn Module>,
    module_id: &str,
    inputs: &mut JsonMap,
    ctx: &Context,
) -> Result<(), ModuleError> {
    if !module.annotations().requires_approval {
        return Ok(());
    }

    let outcome = match inputs.remove(APPROVAL_TOKEN_KEY) {
        Some(token) => {
            let approval_id = match token {
                Value::String(s) => s,
                other => other.to_string(),
            };
            handler.check_approval(&approval_id).await
        }
        None => {
            let request = ApprovalRequest::new(module_id, inputs.clone(), ctx, module.as_ref());
            handler.request_approval(&request).await
        }
    };
    // Handler failures are the handler's own errors reaching the caller:
    // never a denial, never a body failure. A pipeline error raised by the
    // handler passes through untouched.
    let result = outcome.map_err(|source| match source.downcast::<ModuleError>() {
        Ok(inner) => *inner,
        Err(source) => ModuleError::ApprovalHandler {
            module_id: module_id.to_string(),
            source,
            trace_id: Some(ctx.trace_id().to_string()),
        },
    })?;

    audit(ctx, module_id, &result);

    let status = result.status().clone();
    match status {
        ApprovalStatus::Approved => Ok(()),
        ApprovalStatus::Rejected => Err(ModuleError::ApprovalDenied {
            module_id: module_id.to_string(),
            result,
            trace_id: Some(ctx.trace_id().to_string()),
        }),
        ApprovalStatus::Timeout => Err(ModuleError::ApprovalTimeout {
            module_id: module_id.to_string(),
            result,
            trace_id: Some(ctx.trace_id().to_string()),
        }),
        ApprovalStatus::Pending => {
            let approval_id = result.effective_approval_id();
            Err(ModuleError::ApprovalPending {
                module_id: module_id.to_string(),
                approval_id,
                result,
                trace_id: Some(ctx.trace_id().to_string()),
            })
        }
        ApprovalStatus::Other(status) => {
            tracing::warn!(
                module_id = %module_id,
                status = %status,
                "unknown approval status, failing closed"
            );
            Err(ModuleError::ApprovalDenied {
                module_id: module_id.to_string(),
                result,
                trace_id: Some(ctx.trace_id().to_string()),
            })
        }
    }
}
