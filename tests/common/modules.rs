#![allow(dead_code)]

use std::sync::Arc;

use apcore::context::Context;
use apcore::module::{Annotations, FunctionModule, Module, ModuleStream};
use apcore::registry::InMemoryRegistry;
use apcore::types::{BoxError, JsonMap};
use async_trait::async_trait;
use futures_util::stream;
use parking_lot::Mutex;
use serde_json::{Value, json};

pub fn obj(value: Value) -> JsonMap {
    value.as_object().cloned().unwrap()
}

pub fn number_input_schema() -> Value {
    json!({
        "type": "object",
        "properties": { "x": { "type": "number" } },
        "required": ["x"],
    })
}

pub fn number_output_schema() -> Value {
    json!({
        "type": "object",
        "properties": { "result": { "type": "number" } },
    })
}

pub fn open_schema() -> Value {
    json!({ "type": "object", "properties": {} })
}

/// `echo`: doubles its numeric input.
pub fn echo_module() -> Arc<FunctionModule> {
    Arc::new(FunctionModule::new(
        number_input_schema(),
        number_output_schema(),
        |inputs, _ctx| async move {
            let x = inputs["x"].as_f64().unwrap_or_default();
            Ok(json!({ "result": x * 2.0 }))
        },
    ))
}

/// A module that sleeps for `sleep_ms` before answering, with a per-module
/// timeout annotation.
pub fn sleepy_module(sleep_ms: u64, timeout_ms: u64) -> Arc<FunctionModule> {
    Arc::new(
        FunctionModule::new(open_schema(), open_schema(), move |_inputs, _ctx| async move {
            tokio::time::sleep(std::time::Duration::from_millis(sleep_ms)).await;
            Ok(json!({ "done": true }))
        })
        .with_annotations(Annotations::default().with_timeout_ms(timeout_ms)),
    )
}

/// A module whose body always fails.
pub fn failing_module() -> Arc<FunctionModule> {
    Arc::new(FunctionModule::new(
        open_schema(),
        open_schema(),
        |_inputs, _ctx| async move { Err::<Value, BoxError>("body exploded".into()) },
    ))
}

/// A module that captures the inputs its body received.
pub fn capturing_module(seen: Arc<Mutex<Option<JsonMap>>>) -> Arc<FunctionModule> {
    Arc::new(FunctionModule::new(
        json!({
            "type": "object",
            "properties": { "y": { "type": "number" } },
        }),
        open_schema(),
        move |inputs, _ctx| {
            let seen = seen.clone();
            async move {
                *seen.lock() = Some(inputs);
                Ok(json!({ "ok": true }))
            }
        },
    ))
}

/// A module that calls another module through its context's executor.
pub fn forwarding_module(target: &str) -> Arc<FunctionModule> {
    let target = target.to_string();
    Arc::new(FunctionModule::new(
        open_schema(),
        open_schema(),
        move |_inputs, ctx: Context| {
            let target = target.clone();
            async move {
                let executor = ctx.executor().cloned().expect("executor attached");
                let output = executor.call(&target, JsonMap::new(), Some(&ctx)).await?;
                Ok(Value::Object(output))
            }
        },
    ))
}

/// Streaming module yielding `0..count` as `{"result": n}` chunks.
pub struct CountdownModule {
    pub count: usize,
}

#[async_trait]
impl Module for CountdownModule {
    async fn execute(&self, _inputs: JsonMap, _ctx: Context) -> Result<Value, BoxError> {
        Ok(json!({ "result": 0 }))
    }

    fn input_schema(&self) -> Value {
        open_schema()
    }

    fn output_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "result": { "type": "number" } },
        })
    }

    async fn execute_stream(
        &self,
        _inputs: JsonMap,
        _ctx: Context,
    ) -> Result<ModuleStream, BoxError> {
        let chunks: Vec<Result<Value, BoxError>> =
            (0..self.count).map(|n| Ok(json!({ "result": n }))).collect();
        Ok(Box::pin(stream::iter(chunks)))
    }
}

pub fn registry_with(modules: &[(&str, Arc<dyn Module>)]) -> Arc<InMemoryRegistry> {
    let registry = Arc::new(InMemoryRegistry::new());
    for (id, module) in modules {
        registry.register(*id, module.clone());
    }
    registry
}
