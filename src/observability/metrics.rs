//! Call metrics: counters, histograms, and Prometheus text export.
//!
//! The collector keys every series by `name|k1=v1,k2=v2` with labels sorted
//! alphabetically, so label insertion order never splits a series. It is
//! shared across concurrent calls behind short-held locks.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;

use super::{METRICS_STARTS_KEY, monotonic_ms, pop_start, push_start};
use crate::config::Config;
use crate::context::Context;
use crate::errors::ModuleError;
use crate::middleware::Middleware;
use crate::types::{BoxError, JsonMap};

/// Histogram of module call durations, in seconds.
pub const MODULE_DURATION_SECONDS: &str = "apcore_module_duration_seconds";
/// Counter of finished calls, labeled by outcome.
pub const MODULE_CALLS_TOTAL: &str = "apcore_module_calls_total";
/// Counter of failed calls, labeled by error code.
pub const MODULE_ERRORS_TOTAL: &str = "apcore_module_errors_total";

/// Default histogram bucket ceilings, in seconds.
pub const DEFAULT_BUCKETS: [f64; 13] = [
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
];

type Labels = BTreeMap<String, String>;

fn to_labels(pairs: &[(&str, &str)]) -> Labels {
    pairs
        .iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

fn encode_key(name: &str, labels: &Labels) -> String {
    if labels.is_empty() {
        return name.to_string();
    }
    let encoded = labels
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join(",");
    format!("{name}|{encoded}")
}

fn format_label_set(labels: &Labels, extra_last: Option<(&str, &str)>) -> String {
    let mut parts: Vec<String> = labels
        .iter()
        .map(|(key, value)| format!("{key}=\"{value}\""))
        .collect();
    if let Some((key, value)) = extra_last {
        parts.push(format!("{key}=\"{value}\""));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!("{{{}}}", parts.join(","))
    }
}

fn format_value(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

#[derive(Clone, Debug)]
struct CounterCell {
    name: String,
    labels: Labels,
    value: f64,
}

#[derive(Clone, Debug)]
struct HistogramCell {
    name: String,
    labels: Labels,
    // one count per configured ceiling, plus the trailing +Inf bucket
    bucket_counts: Vec<u64>,
    sum: f64,
    count: u64,
}

/// Shared counter/histogram store with Prometheus text export.
///
/// # Examples
///
/// ```rust
/// use apcore::observability::MetricsCollector;
///
/// let metrics = MetricsCollector::new();
/// metrics.increment("jobs_total", &[("queue", "default")], 1.0);
/// metrics.observe("job_seconds", &[("queue", "default")], 0.2);
/// let text = metrics.export_prometheus();
/// assert!(text.contains("jobs_total{queue=\"default\"} 1"));
/// ```
pub struct MetricsCollector {
    buckets: Vec<f64>,
    help: Mutex<FxHashMap<String, String>>,
    counters: Mutex<FxHashMap<String, CounterCell>>,
    histograms: Mutex<FxHashMap<String, HistogramCell>>,
}

impl MetricsCollector {
    #[must_use]
    pub fn new() -> Self {
        Self::with_buckets(DEFAULT_BUCKETS.to_vec())
    }

    #[must_use]
    pub fn with_buckets(mut buckets: Vec<f64>) -> Self {
        buckets.sort_by(|a, b| a.total_cmp(b));
        buckets.dedup();
        let collector = Self {
            buckets,
            help: Mutex::new(FxHashMap::default()),
            counters: Mutex::new(FxHashMap::default()),
            histograms: Mutex::new(FxHashMap::default()),
        };
        collector.describe(MODULE_DURATION_SECONDS, "Module call duration in seconds");
        collector.describe(MODULE_CALLS_TOTAL, "Total module calls by status");
        collector.describe(MODULE_ERRORS_TOTAL, "Total failed module calls by error code");
        collector
    }

    /// Read `metrics.buckets` from config, falling back to the defaults.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        let buckets = config
            .get_array("metrics.buckets")
            .map(|items| items.iter().filter_map(Value::as_f64).collect::<Vec<_>>())
            .filter(|parsed: &Vec<f64>| !parsed.is_empty())
            .unwrap_or_else(|| DEFAULT_BUCKETS.to_vec());
        Self::with_buckets(buckets)
    }

    /// Attach a HELP line to a metric name.
    pub fn describe(&self, name: &str, help: &str) {
        self.help.lock().insert(name.to_string(), help.to_string());
    }

    /// Add `amount` to a counter series.
    pub fn increment(&self, name: &str, labels: &[(&str, &str)], amount: f64) {
        let labels = to_labels(labels);
        let key = encode_key(name, &labels);
        let mut counters = self.counters.lock();
        counters
            .entry(key)
            .or_insert_with(|| CounterCell {
                name: name.to_string(),
                labels,
                value: 0.0,
            })
            .value += amount;
    }

    /// Record `value` into a histogram series.
    pub fn observe(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        let labels = to_labels(labels);
        let key = encode_key(name, &labels);
        let mut histograms = self.histograms.lock();
        let cell = histograms.entry(key).or_insert_with(|| HistogramCell {
            name: name.to_string(),
            labels,
            bucket_counts: vec![0; self.buckets.len() + 1],
            sum: 0.0,
            count: 0,
        });
        let slot = self
            .buckets
            .iter()
            .position(|ceiling| value <= *ceiling)
            .unwrap_or(self.buckets.len());
        cell.bucket_counts[slot] += 1;
        cell.sum += value;
        cell.count += 1;
    }

    /// Current value of a counter series, zero when the series is absent.
    #[must_use]
    pub fn counter_value(&self, name: &str, labels: &[(&str, &str)]) -> f64 {
        let key = encode_key(name, &to_labels(labels));
        self.counters
            .lock()
            .get(&key)
            .map(|cell| cell.value)
            .unwrap_or(0.0)
    }

    /// `(sum, count)` of a histogram series, zeros when absent.
    #[must_use]
    pub fn histogram_sum_count(&self, name: &str, labels: &[(&str, &str)]) -> (f64, u64) {
        let key = encode_key(name, &to_labels(labels));
        self.histograms
            .lock()
            .get(&key)
            .map(|cell| (cell.sum, cell.count))
            .unwrap_or((0.0, 0))
    }

    fn help_for(&self, name: &str) -> String {
        self.help
            .lock()
            .get(name)
            .cloned()
            .unwrap_or_else(|| name.to_string())
    }

    /// Render the standard Prometheus text exposition format.
    #[must_use]
    pub fn export_prometheus(&self) -> String {
        let mut out = String::new();

        let counters: Vec<CounterCell> = self.counters.lock().values().cloned().collect();
        let mut by_name: BTreeMap<String, Vec<&CounterCell>> = BTreeMap::new();
        for cell in &counters {
            by_name.entry(cell.name.clone()).or_default().push(cell);
        }
        for (name, mut cells) in by_name {
            cells.sort_by(|a, b| a.labels.cmp(&b.labels));
            out.push_str(&format!("# HELP {name} {}\n", self.help_for(&name)));
            out.push_str(&format!("# TYPE {name} counter\n"));
            for cell in cells {
                out.push_str(&format!(
                    "{name}{} {}\n",
                    format_label_set(&cell.labels, None),
                    format_value(cell.value)
                ));
            }
        }

        let histograms: Vec<HistogramCell> = self.histograms.lock().values().cloned().collect();
        let mut by_name: BTreeMap<String, Vec<&HistogramCell>> = BTreeMap::new();
        for cell in &histograms {
            by_name.entry(cell.name.clone()).or_default().push(cell);
        }
        for (name, mut cells) in by_name {
            cells.sort_by(|a, b| a.labels.cmp(&b.labels));
            out.push_str(&format!("# HELP {name} {}\n", self.help_for(&name)));
            out.push_str(&format!("# TYPE {name} histogram\n"));
            for cell in cells {
                let mut cumulative = 0u64;
                for (ceiling, bucket_count) in self.buckets.iter().zip(&cell.bucket_counts) {
                    cumulative += bucket_count;
                    out.push_str(&format!(
                        "{name}_bucket{} {cumulative}\n",
                        format_label_set(&cell.labels, Some(("le", &format_value(*ceiling)))),
                    ));
                }
                cumulative += cell.bucket_counts[self.buckets.len()];
                out.push_str(&format!(
                    "{name}_bucket{} {cumulative}\n",
                    format_label_set(&cell.labels, Some(("le", "+Inf"))),
                ));
                out.push_str(&format!(
                    "{name}_sum{} {}\n",
                    format_label_set(&cell.labels, None),
                    cell.sum
                ));
                out.push_str(&format!(
                    "{name}_count{} {}\n",
                    format_label_set(&cell.labels, None),
                    cell.count
                ));
            }
        }

        out
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Middleware that times each call and maintains the standard `apcore_*`
/// series.
pub struct MetricsMiddleware {
    collector: Arc<MetricsCollector>,
}

impl MetricsMiddleware {
    #[must_use]
    pub fn new(collector: Arc<MetricsCollector>) -> Self {
        Self { collector }
    }

    pub fn collector(&self) -> &Arc<MetricsCollector> {
        &self.collector
    }

    fn observe_duration(&self, module_id: &str, ctx: &Context) {
        if let Some(start) = pop_start(ctx, METRICS_STARTS_KEY) {
            let seconds = (monotonic_ms() - start) / 1000.0;
            self.collector.observe(
                MODULE_DURATION_SECONDS,
                &[("module_id", module_id)],
                seconds,
            );
        }
    }
}

#[async_trait]
impl Middleware for MetricsMiddleware {
    fn name(&self) -> String {
        "metrics".to_string()
    }

    async fn before(
        &self,
        _module_id: &str,
        _inputs: &JsonMap,
        ctx: &Context,
    ) -> Result<Option<JsonMap>, BoxError> {
        push_start(ctx, METRICS_STARTS_KEY, monotonic_ms());
        Ok(None)
    }

    async fn after(
        &self,
        module_id: &str,
        _inputs: &JsonMap,
        _output: &JsonMap,
        ctx: &Context,
    ) -> Result<Option<JsonMap>, BoxError> {
        self.observe_duration(module_id, ctx);
        self.collector.increment(
            MODULE_CALLS_TOTAL,
            &[("module_id", module_id), ("status", "success")],
            1.0,
        );
        Ok(None)
    }

    async fn on_error(
        &self,
        module_id: &str,
        _inputs: &JsonMap,
        error: &ModuleError,
        ctx: &Context,
    ) -> Result<Option<JsonMap>, BoxError> {
        self.observe_duration(module_id, ctx);
        self.collector.increment(
            MODULE_CALLS_TOTAL,
            &[("module_id", module_id), ("status", "error")],
            1.0,
        );
        self.collector.increment(
            MODULE_ERRORS_TOTAL,
            &[("module_id", module_id), ("error_code", error.code())],
            1.0,
        );
        Ok(None)
    }
}
