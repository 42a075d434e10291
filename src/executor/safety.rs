//! Pre-flight safety guards: depth, cycle, and frequency limits.
//!
//! These run as the first failure point of the pipeline, before the registry
//! is even consulted, so a runaway call tree is cut off as cheaply as
//! possible.

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::collections::VecDeque;

use crate::config::Config;
use crate::context::Context;
use crate::errors::ModuleError;
use crate::observability::monotonic_ms;

/// Default maximum call-chain depth.
pub const DEFAULT_MAX_DEPTH: usize = 32;
/// Default sliding window width when a frequency limit is configured
/// without one.
pub const DEFAULT_WINDOW_MS: u64 = 60_000;

/// Find the first repeated contiguous window of length ≥ 2 in `chain`.
///
/// A cycle is any non-empty window that appears at least twice back to back.
/// Self-recursion of length 1 is deliberately not flagged; the depth limit
/// bounds it instead.
fn detect_cycle(chain: &[String]) -> Option<Vec<String>> {
    let n = chain.len();
    for window in 2..=n / 2 {
        for start in 0..=n - 2 * window {
            if chain[start..start + window] == chain[start + window..start + 2 * window] {
                return Some(chain[start..start + window].to_vec());
            }
        }
    }
    None
}

/// Process-wide sliding-window call counter keyed by module id.
///
/// Eviction is lazy: each check drops timestamps older than the window
/// before counting. The map is unbounded in module-id cardinality; callers
/// facing untrusted cardinality should cap ids upstream.
pub struct FrequencyGuard {
    max_per_window: Option<u32>,
    window_ms: u64,
    starts: Mutex<FxHashMap<String, VecDeque<f64>>>,
}

impl FrequencyGuard {
    /// Unlimited guard; every check passes.
    #[must_use]
    pub fn unlimited() -> Self {
        Self {
            max_per_window: None,
            window_ms: DEFAULT_WINDOW_MS,
            starts: Mutex::new(FxHashMap::default()),
        }
    }

    #[must_use]
    pub fn new(max_per_window: u32, window_ms: u64) -> Self {
        Self {
            max_per_window: Some(max_per_window),
            window_ms,
            starts: Mutex::new(FxHashMap::default()),
        }
    }

    fn check(&self, module_id: &str) -> Result<(), ModuleError> {
        let Some(limit) = self.max_per_window else {
            return Ok(());
        };
        let now = monotonic_ms();
        let horizon = now - self.window_ms as f64;
        let mut starts = self.starts.lock();
        let window = starts.entry(module_id.to_string()).or_default();
        while window.front().is_some_and(|started| *started < horizon) {
            window.pop_front();
        }
        if window.len() >= limit as usize {
            return Err(ModuleError::FrequencyExceeded {
                module_id: module_id.to_string(),
                limit,
                window_ms: self.window_ms,
                trace_id: None,
            });
        }
        window.push_back(now);
        Ok(())
    }
}

/// All three guards, configured together.
pub struct SafetyChecks {
    max_depth: usize,
    frequency: FrequencyGuard,
}

impl SafetyChecks {
    #[must_use]
    pub fn new(max_depth: usize, frequency: FrequencyGuard) -> Self {
        Self {
            max_depth,
            frequency,
        }
    }

    /// Read `executor.max_depth`, `executor.frequency.max_per_window`, and
    /// `executor.frequency.window_ms`. Frequency is unlimited unless
    /// configured.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        let max_depth = config
            .get_u64("executor.max_depth")
            .map(|depth| depth as usize)
            .unwrap_or(DEFAULT_MAX_DEPTH);
        let frequency = match config.get_u64("executor.frequency.max_per_window") {
            Some(limit) => FrequencyGuard::new(
                limit as u32,
                config
                    .get_u64("executor.frequency.window_ms")
                    .unwrap_or(DEFAULT_WINDOW_MS),
            ),
            None => FrequencyGuard::unlimited(),
        };
        Self::new(max_depth, frequency)
    }

    /// Run depth, cycle, and frequency checks for the call that owns `ctx`
    /// (whose chain already ends in `module_id`).
    pub fn check(&self, ctx: &Context, module_id: &str) -> Result<(), ModuleError> {
        let chain = ctx.call_chain();
        if chain.len() > self.max_depth {
            return Err(ModuleError::CallDepthExceeded {
                depth: chain.len(),
                max_depth: self.max_depth,
                trace_id: None,
            });
        }
        if let Some(cycle) = detect_cycle(chain) {
            return Err(ModuleError::CircularCall {
                module_id: module_id.to_string(),
                chain: chain.to_vec(),
                cycle,
                trace_id: None,
            });
        }
        self.frequency.check(module_id)
    }
}
