//! Pipeline error types.
//!
//! Every failure the executor can produce is a [`ModuleError`] variant with a
//! stable sentinel [`code()`](ModuleError::code), a structured
//! [`details()`](ModuleError::details) mapping, and the trace id of the call
//! that raised it. Errors propagate through the pipeline unchanged unless a
//! middleware's `on_error` hook recovers them.

use miette::Diagnostic;
use serde_json::{Value, json};
use thiserror::Error;

use crate::approval::ApprovalResult;
use crate::middleware::MiddlewarePhase;
use crate::schema::{SchemaIssue, SchemaSide};
use crate::types::{BoxError, JsonMap};

/// Errors raised by [`Executor::call`](crate::executor::Executor::call) and
/// its sibling entry points.
///
/// Module-body failures that are not already a `ModuleError` surface as
/// [`ModuleError::Execution`]; a nested pipeline error coming back out of a
/// body is downcast and propagated as-is, never re-wrapped.
#[derive(Debug, Error, Diagnostic)]
pub enum ModuleError {
    /// The registry has no module under the requested id.
    #[error("module not found: {module_id}")]
    #[diagnostic(
        code(apcore::executor::module_not_found),
        help("Check the module id against the registry contents.")
    )]
    ModuleNotFound {
        module_id: String,
        trace_id: Option<String>,
    },

    /// The configured ACL engine denied the call.
    #[error("access denied for module {module_id}")]
    #[diagnostic(code(apcore::executor::acl_denied))]
    AclDenied {
        module_id: String,
        reason: Option<String>,
        trace_id: Option<String>,
    },

    /// Input or output failed schema validation.
    #[error("schema validation failed for module {module_id} ({side})")]
    #[diagnostic(
        code(apcore::schema::validation),
        help("Inspect the per-path issue list in the error details.")
    )]
    SchemaValidation {
        module_id: String,
        side: SchemaSide,
        issues: Vec<SchemaIssue>,
        trace_id: Option<String>,
    },

    /// The module body exceeded its per-call timeout.
    #[error("module {module_id} timed out after {timeout_ms}ms")]
    #[diagnostic(code(apcore::executor::timeout))]
    Timeout {
        module_id: String,
        timeout_ms: u64,
        trace_id: Option<String>,
    },

    /// The call chain grew past the configured depth limit.
    #[error("call depth {depth} exceeds maximum {max_depth}")]
    #[diagnostic(
        code(apcore::safety::call_depth),
        help("Deeply nested module calls usually indicate runaway recursion.")
    )]
    CallDepthExceeded {
        depth: usize,
        max_depth: usize,
        trace_id: Option<String>,
    },

    /// A repeating window was detected in the call chain.
    #[error("circular call detected at module {module_id}: cycle {cycle:?}")]
    #[diagnostic(code(apcore::safety::circular_call))]
    CircularCall {
        module_id: String,
        chain: Vec<String>,
        cycle: Vec<String>,
        trace_id: Option<String>,
    },

    /// The module was called more often than its sliding-window budget allows.
    #[error("module {module_id} exceeded {limit} calls per {window_ms}ms window")]
    #[diagnostic(code(apcore::safety::frequency))]
    FrequencyExceeded {
        module_id: String,
        limit: u32,
        window_ms: u64,
        trace_id: Option<String>,
    },

    /// A middleware hook failed outside the controlled recovery path.
    #[error("middleware chain failed for module {module_id} in {phase} phase")]
    #[diagnostic(
        code(apcore::middleware::chain),
        help("The executed list names the hooks that completed before the failure.")
    )]
    MiddlewareChain {
        module_id: String,
        phase: MiddlewarePhase,
        executed: Vec<String>,
        #[source]
        source: BoxError,
        trace_id: Option<String>,
    },

    /// The approval handler rejected the call (or returned an unknown status,
    /// which fails closed).
    #[error("approval denied for module {module_id}")]
    #[diagnostic(code(apcore::approval::denied))]
    ApprovalDenied {
        module_id: String,
        result: ApprovalResult,
        trace_id: Option<String>,
    },

    /// The approval handler timed out waiting for a decision.
    #[error("approval timed out for module {module_id}")]
    #[diagnostic(code(apcore::approval::timeout))]
    ApprovalTimeout {
        module_id: String,
        result: ApprovalResult,
        trace_id: Option<String>,
    },

    /// The approval is pending; retry the call with `_approval_token` set to
    /// the returned approval id once the decision lands.
    #[error("approval pending for module {module_id}")]
    #[diagnostic(
        code(apcore::approval::pending),
        help("Re-issue the call with the `_approval_token` input set to the approval id.")
    )]
    ApprovalPending {
        module_id: String,
        approval_id: Option<String>,
        result: ApprovalResult,
        trace_id: Option<String>,
    },

    /// The approval handler itself failed while deciding. This is the
    /// handler's own error surfacing to the caller, distinct from every
    /// pipeline outcome; the gate never converts it into a denial.
    #[error("approval handler failed for module {module_id}: {source}")]
    #[diagnostic(
        code(apcore::approval::handler),
        help("The decision backend errored; the call was neither approved nor denied.")
    )]
    ApprovalHandler {
        module_id: String,
        #[source]
        source: BoxError,
        trace_id: Option<String>,
    },

    /// The module body failed with a non-pipeline error.
    #[error("module {module_id} execution failed: {source}")]
    #[diagnostic(code(apcore::executor::execution))]
    Execution {
        module_id: String,
        #[source]
        source: BoxError,
        trace_id: Option<String>,
    },
}

impl ModuleError {
    /// Stable sentinel code for log lines and metrics labels.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            ModuleError::ModuleNotFound { .. } => "MODULE_NOT_FOUND",
            ModuleError::AclDenied { .. } => "ACL_DENIED",
            ModuleError::SchemaValidation { .. } => "SCHEMA_VALIDATION",
            ModuleError::Timeout { .. } => "TIMEOUT",
            ModuleError::CallDepthExceeded { .. } => "CALL_DEPTH_EXCEEDED",
            ModuleError::CircularCall { .. } => "CIRCULAR_CALL",
            ModuleError::FrequencyExceeded { .. } => "FREQUENCY_EXCEEDED",
            ModuleError::MiddlewareChain { .. } => "MIDDLEWARE_CHAIN_ERROR",
            ModuleError::ApprovalDenied { .. } => "APPROVAL_DENIED",
            ModuleError::ApprovalTimeout { .. } => "APPROVAL_TIMEOUT",
            ModuleError::ApprovalPending { .. } => "APPROVAL_PENDING",
            ModuleError::ApprovalHandler { .. } => "APPROVAL_HANDLER_ERROR",
            ModuleError::Execution { .. } => "EXECUTION",
        }
    }

    /// Structured details sufficient to render a log line without inspecting
    /// the error chain.
    #[must_use]
    pub fn details(&self) -> JsonMap {
        let value = match self {
            ModuleError::ModuleNotFound { module_id, .. } => json!({ "module_id": module_id }),
            ModuleError::AclDenied {
                module_id, reason, ..
            } => json!({ "module_id": module_id, "reason": reason }),
            ModuleError::SchemaValidation {
                module_id,
                side,
                issues,
                ..
            } => json!({
                "module_id": module_id,
                "side": side.to_string(),
                "issues": issues,
            }),
            ModuleError::Timeout {
                module_id,
                timeout_ms,
                ..
            } => json!({ "module_id": module_id, "timeout_ms": timeout_ms }),
            ModuleError::CallDepthExceeded {
                depth, max_depth, ..
            } => json!({ "depth": depth, "max_depth": max_depth }),
            ModuleError::CircularCall {
                module_id,
                chain,
                cycle,
                ..
            } => json!({ "module_id": module_id, "chain": chain, "cycle": cycle }),
            ModuleError::FrequencyExceeded {
                module_id,
                limit,
                window_ms,
                ..
            } => json!({ "module_id": module_id, "limit": limit, "window_ms": window_ms }),
            ModuleError::MiddlewareChain {
                module_id,
                phase,
                executed,
                source,
                ..
            } => json!({
                "module_id": module_id,
                "phase": phase.to_string(),
                "executed": executed,
                "cause": source.to_string(),
            }),
            ModuleError::ApprovalDenied {
                module_id, result, ..
            }
            | ModuleError::ApprovalTimeout {
                module_id, result, ..
            } => json!({
                "module_id": module_id,
                "status": result.status().as_str(),
                "reason": result.reason(),
            }),
            ModuleError::ApprovalPending {
                module_id,
                approval_id,
                ..
            } => json!({ "module_id": module_id, "approval_id": approval_id }),
            ModuleError::ApprovalHandler {
                module_id, source, ..
            }
            | ModuleError::Execution {
                module_id, source, ..
            } => json!({ "module_id": module_id, "cause": source.to_string() }),
        };
        match value {
            Value::Object(map) => map,
            _ => JsonMap::new(),
        }
    }

    /// Trace id of the call that raised this error, when known.
    #[must_use]
    pub fn trace_id(&self) -> Option<&str> {
        match self {
            ModuleError::ModuleNotFound { trace_id, .. }
            | ModuleError::AclDenied { trace_id, .. }
            | ModuleError::SchemaValidation { trace_id, .. }
            | ModuleError::Timeout { trace_id, .. }
            | ModuleError::CallDepthExceeded { trace_id, .. }
            | ModuleError::CircularCall { trace_id, .. }
            | ModuleError::FrequencyExceeded { trace_id, .. }
            | ModuleError::MiddlewareChain { trace_id, .. }
            | ModuleError::ApprovalDenied { trace_id, .. }
            | ModuleError::ApprovalTimeout { trace_id, .. }
            | ModuleError::ApprovalPending { trace_id, .. }
            | ModuleError::ApprovalHandler { trace_id, .. }
            | ModuleError::Execution { trace_id, .. } => trace_id.as_deref(),
        }
    }

    /// Approval id for [`ModuleError::ApprovalPending`]; `None` for every
    /// other variant.
    #[must_use]
    pub fn approval_id(&self) -> Option<&str> {
        match self {
            ModuleError::ApprovalPending { approval_id, .. } => approval_id.as_deref(),
            _ => None,
        }
    }

    /// Fill in the trace id if the error was constructed without one.
    #[must_use]
    pub(crate) fn with_trace_id(mut self, id: &str) -> Self {
        let slot = match &mut self {
            ModuleError::ModuleNotFound { trace_id, .. }
            | ModuleError::AclDenied { trace_id, .. }
            | ModuleError::SchemaValidation { trace_id, .. }
            | ModuleError::Timeout { trace_id, .. }
            | ModuleError::CallDepthExceeded { trace_id, .. }
            | ModuleError::CircularCall { trace_id, .. }
            | ModuleError::FrequencyExceeded { trace_id, .. }
            | ModuleError::MiddlewareChain { trace_id, .. }
            | ModuleError::ApprovalDenied { trace_id, .. }
            | ModuleError::ApprovalTimeout { trace_id, .. }
            | ModuleError::ApprovalPending { trace_id, .. }
            | ModuleError::ApprovalHandler { trace_id, .. }
            | ModuleError::Execution { trace_id, .. } => trace_id,
        };
        if slot.is_none() {
            *slot = Some(id.to_string());
        }
        self
    }
}
