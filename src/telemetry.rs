//! Tracing initialization for the gateway binary.
//!
//! Structured logs go through `tracing`; the subscriber honors `RUST_LOG`.
//! When an OTLP endpoint is configured the span pipeline is expected to be
//! wired by the deployment (collector sidecar); the endpoint is recorded so
//! operators can see what the process was configured with.

use std::env;

use tracing_subscriber::{fmt, EnvFilter};

/// Whether telemetry was disabled via environment flags.
pub fn is_telemetry_disabled() -> bool {
    let opt_out = env::var("LUTHIEN_TELEMETRY_OPT_OUT").unwrap_or_default().to_lowercase();
    let otel_disabled = env::var("OTEL_SDK_DISABLED").unwrap_or_default().to_lowercase();
    opt_out == "true" || opt_out == "1" || otel_disabled == "true" || otel_disabled == "1"
}

/// Install the global tracing subscriber. Safe to call once per process;
/// later calls are no-ops.
pub fn init(otel_endpoint: Option<&str>) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();

    if is_telemetry_disabled() {
        tracing::info!("telemetry disabled via environment");
        return;
    }
    if let Some(endpoint) = otel_endpoint {
        tracing::info!(endpoint, "OTLP endpoint configured");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
