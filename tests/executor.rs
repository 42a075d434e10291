mod common;
use common::*;

use std::sync::Arc;

use apcore::config::Config;
use apcore::context::Context;
use apcore::errors::ModuleError;
use apcore::executor::ExecutorBuilder;
use apcore::identity::Identity;
use apcore::module::FunctionModule;
use apcore::observability::{MODULE_CALLS_TOTAL, MetricsCollector, MetricsMiddleware};
use apcore::types::JsonMap;
use parking_lot::Mutex;
use serde_json::{Value, json};

#[tokio::test]
async fn happy_path_doubles_and_counts() {
    let registry = registry_with(&[("echo", echo_module() as _)]);
    let metrics = Arc::new(MetricsCollector::new());
    let events = Arc::new(Mutex::new(Vec::new()));
    let executor = ExecutorBuilder::new(registry)
        .with_middleware(Arc::new(MetricsMiddleware::new(metrics.clone())))
        .with_middleware(Arc::new(RecordingMiddleware::new("rec", events.clone())))
        .build();

    let output = executor
        .call("echo", obj(json!({ "x": 21 })), None)
        .await
        .unwrap();
    assert_eq!(output["result"], json!(42.0));

    // after chain ran exactly once
    let after_count = events
        .lock()
        .iter()
        .filter(|event| event.as_str() == "after:rec")
        .count();
    assert_eq!(after_count, 1);

    assert_eq!(
        metrics.counter_value(
            MODULE_CALLS_TOTAL,
            &[("module_id", "echo"), ("status", "success")]
        ),
        1.0
    );
}

#[tokio::test]
async fn unknown_module_fails_lookup() {
    let registry = registry_with(&[]);
    let executor = ExecutorBuilder::new(registry).build();
    let error = executor
        .call("ghost", JsonMap::new(), None)
        .await
        .unwrap_err();
    assert_eq!(error.code(), "MODULE_NOT_FOUND");
    assert!(error.trace_id().is_some());
}

#[tokio::test]
async fn scalar_outputs_are_wrapped_and_null_is_empty() {
    let scalar = Arc::new(FunctionModule::new(
        open_schema(),
        json!({ "type": "object", "properties": { "result": { "type": "number" } } }),
        |_inputs, _ctx| async move { Ok(json!(7)) },
    ));
    let null = Arc::new(FunctionModule::new(
        open_schema(),
        open_schema(),
        |_inputs, _ctx| async move { Ok(Value::Null) },
    ));
    let registry = registry_with(&[("scalar", scalar as _), ("null", null as _)]);
    let executor = ExecutorBuilder::new(registry).build();

    let output = executor.call("scalar", JsonMap::new(), None).await.unwrap();
    assert_eq!(output["result"], json!(7));

    let output = executor.call("null", JsonMap::new(), None).await.unwrap();
    assert!(output.is_empty());
}

#[tokio::test]
async fn input_validation_failure_reports_paths() {
    let registry = registry_with(&[("echo", echo_module() as _)]);
    let executor = ExecutorBuilder::new(registry).build();
    let error = executor
        .call("echo", obj(json!({ "x": "not coercible" })), None)
        .await
        .unwrap_err();
    assert_eq!(error.code(), "SCHEMA_VALIDATION");
    let details = error.details();
    assert_eq!(details["side"], json!("inputs"));
    assert_eq!(details["issues"][0]["path"], json!("x"));
}

#[tokio::test]
async fn inputs_are_coerced_before_the_body() {
    let seen = Arc::new(Mutex::new(None));
    let capturing = capturing_module(seen.clone());
    let registry = registry_with(&[("capture", capturing as _)]);
    let executor = ExecutorBuilder::new(registry).build();

    executor
        .call("capture", obj(json!({ "y": "4" })), None)
        .await
        .unwrap();
    let inputs = seen.lock().clone().unwrap();
    assert_eq!(inputs["y"], json!(4.0));
}

#[tokio::test]
async fn validate_entry_point_skips_execution() {
    let registry = registry_with(&[("echo", echo_module() as _)]);
    let executor = ExecutorBuilder::new(registry).build();

    let validated = executor.validate("echo", &obj(json!({ "x": "3" }))).unwrap();
    assert_eq!(validated["x"], json!(3.0));

    let error = executor.validate("ghost", &JsonMap::new()).unwrap_err();
    assert_eq!(error.code(), "MODULE_NOT_FOUND");
}

#[tokio::test]
async fn nested_calls_share_trace_and_chain() {
    let trace_ids = Arc::new(Mutex::new(Vec::new()));
    let chains = Arc::new(Mutex::new(Vec::new()));
    let probe = {
        let trace_ids = trace_ids.clone();
        let chains = chains.clone();
        Arc::new(FunctionModule::new(
            open_schema(),
            open_schema(),
            move |_inputs, ctx: Context| {
                let trace_ids = trace_ids.clone();
                let chains = chains.clone();
                async move {
                    trace_ids.lock().push(ctx.trace_id().to_string());
                    chains.lock().push(ctx.call_chain().to_vec());
                    Ok(json!({}))
                }
            },
        ))
    };
    let registry = registry_with(&[("outer", forwarding_module("inner") as _), ("inner", probe as _)]);
    let executor = ExecutorBuilder::new(registry).build();

    let root = Context::new().with_identity(Arc::new(Identity::new("alice")));
    executor
        .call("outer", JsonMap::new(), Some(&root))
        .await
        .unwrap();

    let chains = chains.lock().clone();
    assert_eq!(chains, vec![vec!["outer".to_string(), "inner".to_string()]]);
    assert_eq!(trace_ids.lock().first().map(String::as_str), Some(root.trace_id()));
}

#[tokio::test]
async fn default_timeout_comes_from_config() {
    let registry = registry_with(&[]);
    let config = Config::from_value(json!({ "executor": { "default_timeout_ms": 1234 } }));
    let executor = ExecutorBuilder::new(registry).with_config(config).build();
    assert_eq!(executor.default_timeout_ms(), 1234);
}

#[tokio::test]
async fn body_errors_surface_as_execution() {
    let registry = registry_with(&[("boom", failing_module() as _)]);
    let executor = ExecutorBuilder::new(registry).build();
    let error = executor.call("boom", JsonMap::new(), None).await.unwrap_err();
    assert_eq!(error.code(), "EXECUTION");
    assert!(matches!(error, ModuleError::Execution { .. }));
}

#[tokio::test]
async fn nested_pipeline_errors_pass_through_unwrapped() {
    // outer forwards to a module that does not exist; the inner
    // MODULE_NOT_FOUND must come back out untouched
    let registry = registry_with(&[("outer", forwarding_module("missing") as _)]);
    let executor = ExecutorBuilder::new(registry).build();
    let error = executor.call("outer", JsonMap::new(), None).await.unwrap_err();
    assert_eq!(error.code(), "MODULE_NOT_FOUND");
}
