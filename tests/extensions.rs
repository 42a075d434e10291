mod common;
use common::*;

use std::sync::Arc;

use apcore::acl::{AclRule, PatternAcl};
use apcore::approval::AlwaysDeny;
use apcore::context::Context;
use apcore::executor::ExecutorBuilder;
use apcore::extensions::{
    ACL_POINT, APPROVAL_HANDLER_POINT, CONTEXT_LOGGER_POINT, ExtensionManager, ExtensionValue,
    METRICS_COLLECTOR_POINT, MIDDLEWARE_POINT, TRACING_EXPORTER_POINT,
};
use apcore::middleware::Middleware;
use apcore::module::{Annotations, FunctionModule};
use apcore::observability::{
    ContextLogger, InMemoryExporter, LogFormat, MODULE_CALLS_TOTAL, METRICS_STARTS_KEY,
    MemoryLogWriter, MetricsCollector, TRACING_SPANS_KEY,
};
use apcore::types::{BoxError, JsonMap};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};

/// Records whether the observability stacks were already populated when this
/// middleware's `before` ran (they are iff those middlewares sit outside it)
/// and whether they were still populated in `after` (they are iff the
/// observability `after` hooks, running reverse, have not yet fired).
struct OrderingProbe {
    before_sees: Arc<Mutex<Option<(bool, bool)>>>,
    after_sees: Arc<Mutex<Option<(bool, bool)>>>,
}

impl OrderingProbe {
    fn new() -> Self {
        Self {
            before_sees: Arc::new(Mutex::new(None)),
            after_sees: Arc::new(Mutex::new(None)),
        }
    }

    fn stacks_populated(ctx: &Context) -> (bool, bool) {
        let data = ctx.data().lock();
        let non_empty = |key: &str| {
            data.get(key)
                .and_then(Value::as_array)
                .map(|stack| !stack.is_empty())
                .unwrap_or(false)
        };
        (non_empty(TRACING_SPANS_KEY), non_empty(METRICS_STARTS_KEY))
    }
}

#[async_trait]
impl Middleware for OrderingProbe {
    fn name(&self) -> String {
        "ordering-probe".to_string()
    }

    async fn before(
        &self,
        _module_id: &str,
        _inputs: &JsonMap,
        ctx: &Context,
    ) -> Result<Option<JsonMap>, BoxError> {
        *self.before_sees.lock() = Some(Self::stacks_populated(ctx));
        Ok(None)
    }

    async fn after(
        &self,
        _module_id: &str,
        _inputs: &JsonMap,
        _output: &JsonMap,
        ctx: &Context,
    ) -> Result<Option<JsonMap>, BoxError> {
        *self.after_sees.lock() = Some(Self::stacks_populated(ctx));
        Ok(None)
    }
}

#[tokio::test]
async fn apply_wires_every_point_with_observability_outermost() {
    let guarded = Arc::new(
        FunctionModule::new(open_schema(), open_schema(), |_inputs, _ctx| async move {
            Ok(json!({}))
        })
        .with_annotations(Annotations::default().with_requires_approval(true)),
    );
    let registry = registry_with(&[
        ("echo", echo_module() as _),
        ("restricted", echo_like_noop() as _),
        ("risky", guarded as _),
    ]);
    let executor = ExecutorBuilder::new(registry).build();
    assert!(executor.middlewares().is_empty());

    let exporter = Arc::new(InMemoryExporter::new());
    let metrics = Arc::new(MetricsCollector::new());
    let writer = Arc::new(MemoryLogWriter::new());
    let logger = ContextLogger::new("apcore.executor")
        .with_format(LogFormat::Json)
        .with_writer(writer.clone());
    let probe = Arc::new(OrderingProbe::new());
    let before_sees = probe.before_sees.clone();
    let after_sees = probe.after_sees.clone();

    let mut manager = ExtensionManager::new();
    manager
        .register(
            TRACING_EXPORTER_POINT,
            ExtensionValue::TracingExporter(exporter.clone()),
        )
        .unwrap();
    manager
        .register(
            METRICS_COLLECTOR_POINT,
            ExtensionValue::MetricsCollector(metrics.clone()),
        )
        .unwrap();
    manager
        .register(CONTEXT_LOGGER_POINT, ExtensionValue::ContextLogger(logger))
        .unwrap();
    manager
        .register(MIDDLEWARE_POINT, ExtensionValue::Middleware(probe))
        .unwrap();
    manager
        .register(
            APPROVAL_HANDLER_POINT,
            ExtensionValue::ApprovalHandler(Arc::new(AlwaysDeny)),
        )
        .unwrap();
    manager
        .register(
            ACL_POINT,
            ExtensionValue::Acl(Arc::new(PatternAcl::new(vec![AclRule::deny("restricted")]))),
        )
        .unwrap();
    manager.apply(&executor);

    // tracing + metrics + logging middlewares plus the registered one
    assert_eq!(executor.middlewares().len(), 4);

    let output = executor
        .call("echo", obj(json!({ "x": 21 })), None)
        .await
        .unwrap();
    assert_eq!(output["result"], json!(42.0));

    // observability sits outside the registered middleware: its stacks are
    // already pushed when the probe's before runs, and not yet popped when
    // the probe's after runs
    assert_eq!(*before_sees.lock(), Some((true, true)));
    assert_eq!(*after_sees.lock(), Some((true, true)));

    // each wired collector actually saw the call
    assert_eq!(exporter.spans().len(), 1);
    assert_eq!(exporter.spans()[0].name, "echo");
    assert_eq!(
        metrics.counter_value(
            MODULE_CALLS_TOTAL,
            &[("module_id", "echo"), ("status", "success")]
        ),
        1.0
    );
    assert!(
        writer
            .lines()
            .iter()
            .any(|line| line.contains("module call completed"))
    );

    // the single-point setters took effect too
    let error = executor
        .call("restricted", JsonMap::new(), None)
        .await
        .unwrap_err();
    assert_eq!(error.code(), "ACL_DENIED");

    let error = executor.call("risky", JsonMap::new(), None).await.unwrap_err();
    assert_eq!(error.code(), "APPROVAL_DENIED");
}

#[tokio::test]
async fn apply_appends_plain_middlewares_in_registration_order() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let registry = registry_with(&[("echo", echo_module() as _)]);
    let executor = ExecutorBuilder::new(registry).build();

    let mut manager = ExtensionManager::new();
    manager
        .register(
            MIDDLEWARE_POINT,
            ExtensionValue::Middleware(Arc::new(RecordingMiddleware::new(
                "first",
                events.clone(),
            ))),
        )
        .unwrap();
    manager
        .register(
            MIDDLEWARE_POINT,
            ExtensionValue::Middleware(Arc::new(RecordingMiddleware::new(
                "second",
                events.clone(),
            ))),
        )
        .unwrap();
    manager.apply(&executor);

    executor
        .call("echo", obj(json!({ "x": 1 })), None)
        .await
        .unwrap();
    assert_eq!(
        events.lock().clone(),
        vec!["before:first", "before:second", "after:second", "after:first"]
    );
}

fn echo_like_noop() -> Arc<FunctionModule> {
    Arc::new(FunctionModule::new(
        open_schema(),
        open_schema(),
        |_inputs, _ctx| async move { Ok(json!({})) },
    ))
}
