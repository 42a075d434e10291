mod common;
use common::*;

use std::sync::Arc;

use apcore::context::Context;
use apcore::errors::ModuleError;
use apcore::executor::ExecutorBuilder;
use apcore::middleware::{Middleware, MiddlewareManager, MiddlewarePhase};
use apcore::module::FunctionModule;
use apcore::types::{BoxError, JsonMap};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;

#[tokio::test]
async fn onion_ordering_forward_then_reverse() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let registry = registry_with(&[("echo", echo_module() as _)]);
    let executor = ExecutorBuilder::new(registry)
        .with_middleware(Arc::new(RecordingMiddleware::new("outer", events.clone())))
        .with_middleware(Arc::new(RecordingMiddleware::new("inner", events.clone())))
        .build();

    executor
        .call("echo", obj(json!({ "x": 1 })), None)
        .await
        .unwrap();

    assert_eq!(
        events.lock().clone(),
        vec!["before:outer", "before:inner", "after:inner", "after:outer"]
    );
}

struct InputStamper;

#[async_trait]
impl Middleware for InputStamper {
    async fn before(
        &self,
        _module_id: &str,
        inputs: &JsonMap,
        _ctx: &Context,
    ) -> Result<Option<JsonMap>, BoxError> {
        let mut replaced = inputs.clone();
        replaced.insert("stamped".to_string(), json!(true));
        Ok(Some(replaced))
    }
}

struct OutputStamper;

#[async_trait]
impl Middleware for OutputStamper {
    async fn after(
        &self,
        _module_id: &str,
        _inputs: &JsonMap,
        output: &JsonMap,
        _ctx: &Context,
    ) -> Result<Option<JsonMap>, BoxError> {
        let mut replaced = output.clone();
        replaced.insert("decorated".to_string(), json!(true));
        Ok(Some(replaced))
    }
}

#[tokio::test]
async fn replacements_thread_through_both_chains() {
    let seen = Arc::new(Mutex::new(None));
    let probe = {
        let seen = seen.clone();
        Arc::new(FunctionModule::new(
            open_schema(),
            open_schema(),
            move |inputs, _ctx| {
                let seen = seen.clone();
                async move {
                    *seen.lock() = Some(inputs);
                    Ok(json!({ "body": 1 }))
                }
            },
        ))
    };
    let registry = registry_with(&[("probe", probe as _)]);
    let executor = ExecutorBuilder::new(registry)
        .with_middleware(Arc::new(InputStamper))
        .with_middleware(Arc::new(OutputStamper))
        .build();

    let output = executor.call("probe", JsonMap::new(), None).await.unwrap();
    assert_eq!(output["body"], json!(1));
    assert_eq!(output["decorated"], json!(true));
    let inputs = seen.lock().clone().unwrap();
    assert_eq!(inputs["stamped"], json!(true));
}

#[tokio::test]
async fn recovery_resumes_after_chain_from_that_position() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let registry = registry_with(&[("boom", failing_module() as _)]);
    let executor = ExecutorBuilder::new(registry)
        .with_middleware(Arc::new(RecordingMiddleware::new("outer", events.clone())))
        .with_middleware(Arc::new(RecoveringMiddleware::new(obj(json!({
            "recovered": true
        })))))
        .with_middleware(Arc::new(RecordingMiddleware::new("inner", events.clone())))
        .build();

    let output = executor.call("boom", JsonMap::new(), None).await.unwrap();
    assert_eq!(output["recovered"], json!(true));

    // reverse walk: inner's on_error passed, the recoverer answered, and the
    // remaining after chain (outer only) ran on the replacement
    assert_eq!(
        events.lock().clone(),
        vec![
            "before:outer",
            "before:inner",
            "on_error:inner",
            "after:outer"
        ]
    );
}

#[tokio::test]
async fn unrecovered_errors_propagate() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let registry = registry_with(&[("boom", failing_module() as _)]);
    let executor = ExecutorBuilder::new(registry)
        .with_middleware(Arc::new(RecordingMiddleware::new("only", events.clone())))
        .build();

    let error = executor.call("boom", JsonMap::new(), None).await.unwrap_err();
    assert_eq!(error.code(), "EXECUTION");
    assert_eq!(
        events.lock().clone(),
        vec!["before:only", "on_error:only"]
    );
}

#[tokio::test]
async fn before_hook_failure_wraps_and_reaches_on_error() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let registry = registry_with(&[("echo", echo_module() as _)]);
    let executor = ExecutorBuilder::new(registry)
        .with_middleware(Arc::new(RecordingMiddleware::new("first", events.clone())))
        .with_middleware(Arc::new(FailingMiddleware {
            fail_before: true,
            fail_on_error: false,
        }))
        .build();

    let error = executor
        .call("echo", obj(json!({ "x": 1 })), None)
        .await
        .unwrap_err();
    match error {
        ModuleError::MiddlewareChain {
            phase, executed, ..
        } => {
            assert_eq!(phase, MiddlewarePhase::Before);
            assert_eq!(executed, vec!["first".to_string()]);
        }
        other => panic!("expected middleware chain error, got {other:?}"),
    }
    // the wrapped failure was offered to the on_error chain
    assert!(events.lock().iter().any(|e| e == "on_error:first"));
}

#[tokio::test]
async fn failing_on_error_hook_aborts_the_chain() {
    let registry = registry_with(&[("boom", failing_module() as _)]);
    let executor = ExecutorBuilder::new(registry)
        .with_middleware(Arc::new(FailingMiddleware {
            fail_before: false,
            fail_on_error: true,
        }))
        .build();

    let error = executor.call("boom", JsonMap::new(), None).await.unwrap_err();
    match &error {
        ModuleError::MiddlewareChain { phase, source, .. } => {
            assert_eq!(*phase, MiddlewarePhase::OnError);
            // the original body error is the wrapped cause
            let original = source.downcast_ref::<ModuleError>().unwrap();
            assert_eq!(original.code(), "EXECUTION");
        }
        other => panic!("expected middleware chain error, got {other:?}"),
    }
}

#[tokio::test]
async fn manager_remove_is_by_identity_and_idempotent() {
    let manager = MiddlewareManager::new();
    let events = Arc::new(Mutex::new(Vec::new()));
    let first: Arc<dyn Middleware> = Arc::new(RecordingMiddleware::new("a", events.clone()));
    let second: Arc<dyn Middleware> = Arc::new(RecordingMiddleware::new("b", events));
    manager.add(first.clone());
    manager.add(second.clone());
    assert_eq!(manager.len(), 2);

    manager.remove(&first);
    manager.remove(&first);
    assert_eq!(manager.len(), 1);
    let remaining = manager.snapshot();
    assert!(Arc::ptr_eq(&remaining[0], &second));
}
