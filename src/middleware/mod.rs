//! Middleware onion around module execution.
//!
//! `before` hooks run in registration order, `after` and `on_error` unwind in
//! reverse, so the first-registered middleware observes the outermost
//! boundaries. Hooks may replace the value flowing through the chain by
//! returning `Some(replacement)`, or leave it unchanged with `None`.
//!
//! Any hook failure outside the controlled recovery path is wrapped as
//! [`ModuleError::MiddlewareChain`] with the phase and the names of the hooks
//! that had already completed.

use std::any::type_name;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::context::Context;
use crate::errors::ModuleError;
use crate::types::{BoxError, JsonMap};

/// Which hook of the chain was running when a failure occurred.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MiddlewarePhase {
    Before,
    After,
    OnError,
}

impl fmt::Display for MiddlewarePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MiddlewarePhase::Before => write!(f, "before"),
            MiddlewarePhase::After => write!(f, "after"),
            MiddlewarePhase::OnError => write!(f, "onError"),
        }
    }
}

/// A pipeline middleware.
///
/// All hooks default to pass-through, so implementations only override the
/// phases they care about. Hooks are expected to return promptly; blocking
/// I/O belongs in module bodies, not the chain.
#[async_trait]
pub trait Middleware: Send + Sync {
    /// A stable, human-friendly identifier used in chain-error reports.
    fn name(&self) -> String {
        type_name::<Self>().to_string()
    }

    /// Runs before the module body; may replace the inputs.
    async fn before(
        &self,
        _module_id: &str,
        _inputs: &JsonMap,
        _ctx: &Context,
    ) -> Result<Option<JsonMap>, BoxError> {
        Ok(None)
    }

    /// Runs after a successful body (reverse order); may replace the output.
    async fn after(
        &self,
        _module_id: &str,
        _inputs: &JsonMap,
        _output: &JsonMap,
        _ctx: &Context,
    ) -> Result<Option<JsonMap>, BoxError> {
        Ok(None)
    }

    /// Runs when the call failed (reverse order). Returning `Some(output)`
    /// recovers the call; `None` passes the error along.
    async fn on_error(
        &self,
        _module_id: &str,
        _inputs: &JsonMap,
        _error: &ModuleError,
        _ctx: &Context,
    ) -> Result<Option<JsonMap>, BoxError> {
        Ok(None)
    }
}

/// Ordered middleware chain with snapshot semantics: each pipeline phase
/// operates on a copy of the chain taken at entry, so concurrent
/// registration never tears a call in half.
#[derive(Default)]
pub struct MiddlewareManager {
    chain: RwLock<Vec<Arc<dyn Middleware>>>,
}

impl MiddlewareManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a middleware to the chain.
    pub fn add(&self, middleware: Arc<dyn Middleware>) {
        self.chain.write().push(middleware);
    }

    /// Remove a middleware by identity; idempotent.
    pub fn remove(&self, middleware: &Arc<dyn Middleware>) {
        self.chain
            .write()
            .retain(|existing| !Arc::ptr_eq(existing, middleware));
    }

    /// Defensive copy of the current chain.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<dyn Middleware>> {
        self.chain.read().clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.chain.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chain.read().is_empty()
    }

    /// Run the `before` chain in registration order, threading replacement
    /// inputs forward.
    pub async fn execute_before(
        &self,
        module_id: &str,
        inputs: JsonMap,
        ctx: &Context,
    ) -> Result<JsonMap, ModuleError> {
        let chain = self.snapshot();
        let mut current = inputs;
        let mut executed = Vec::with_capacity(chain.len());
        for middleware in &chain {
            match middleware.before(module_id, &current, ctx).await {
                Ok(Some(replacement)) => current = replacement,
                Ok(None) => {}
                Err(source) => {
                    return Err(ModuleError::MiddlewareChain {
                        module_id: module_id.to_string(),
                        phase: MiddlewarePhase::Before,
                        executed,
                        source,
                        trace_id: Some(ctx.trace_id().to_string()),
                    });
                }
            }
            executed.push(middleware.name());
        }
        Ok(current)
    }

    /// Run the `after` chain in reverse order, threading replacement outputs.
    pub async fn execute_after(
        &self,
        module_id: &str,
        inputs: &JsonMap,
        output: JsonMap,
        ctx: &Context,
    ) -> Result<JsonMap, ModuleError> {
        let chain = self.snapshot();
        let mut current = output;
        let mut executed = Vec::with_capacity(chain.len());
        for middleware in chain.iter().rev() {
            match middleware.after(module_id, inputs, &current, ctx).await {
                Ok(Some(replacement)) => current = replacement,
                Ok(None) => {}
                Err(source) => {
                    return Err(ModuleError::MiddlewareChain {
                        module_id: module_id.to_string(),
                        phase: MiddlewarePhase::After,
                        executed,
                        source,
                        trace_id: Some(ctx.trace_id().to_string()),
                    });
                }
            }
            executed.push(middleware.name());
        }
        Ok(current)
    }

    /// Run the `on_error` chain in reverse order.
    ///
    /// The first middleware returning a replacement output recovers the call;
    /// the replacement is then threaded through the *remaining* `after` hooks
    /// (the middlewares outside the recovering one) and returned as
    /// `Ok(output)`. If no middleware recovers, the original error comes back
    /// as `Err`. If a hook itself fails, the chain aborts and the original
    /// error is wrapped in [`ModuleError::MiddlewareChain`].
    pub async fn execute_on_error(
        &self,
        module_id: &str,
        inputs: &JsonMap,
        error: ModuleError,
        ctx: &Context,
    ) -> Result<JsonMap, ModuleError> {
        let chain = self.snapshot();
        let mut executed = Vec::with_capacity(chain.len());
        for (position, middleware) in chain.iter().rev().enumerate() {
            match middleware.on_error(module_id, inputs, &error, ctx).await {
                Ok(Some(mut output)) => {
                    for outer in chain.iter().rev().skip(position + 1) {
                        match outer.after(module_id, inputs, &output, ctx).await {
                            Ok(Some(replacement)) => output = replacement,
                            Ok(None) => {}
                            Err(source) => {
                                return Err(ModuleError::MiddlewareChain {
                                    module_id: module_id.to_string(),
                                    phase: MiddlewarePhase::After,
                                    executed,
                                    source,
                                    trace_id: Some(ctx.trace_id().to_string()),
                                });
                            }
                        }
                    }
                    return Ok(output);
                }
                Ok(None) => executed.push(middleware.name()),
                Err(hook_error) => {
                    tracing::warn!(
                        module_id = %module_id,
                        middleware = %middleware.name(),
                        error = %hook_error,
                        "onError hook failed, aborting chain"
                    );
                    return Err(ModuleError::MiddlewareChain {
                        module_id: module_id.to_string(),
                        phase: MiddlewarePhase::OnError,
                        executed,
                        source: Box::new(error),
                        trace_id: Some(ctx.trace_id().to_string()),
                    });
                }
            }
        }
        Err(error)
    }
}
