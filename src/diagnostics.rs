//! Opt-in framework diagnostics.
//!
//! The pipeline emits its internal warn/debug lines (unknown approval
//! statuses, aborted middleware chains, exporter failures) through
//! `tracing`. Hosts that want to see them call [`init_diagnostics`] once at
//! startup; library users who run their own subscriber just skip it.

use tracing_subscriber::EnvFilter;

/// Install a `tracing` subscriber honoring `RUST_LOG`, defaulting to `info`.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_diagnostics() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init();
}
