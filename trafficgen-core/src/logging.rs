//! Structured logging for traffic generation runs
//!
//! Everything in the workspace logs through `tracing`. Call one of the
//! initialisers once at the start of a binary or test to get terminal output.
//!
//! # Controlling Output
//!
//! ```rust,no_run
//! use trafficgen_core::init_simulation_logging_with_level;
//! init_simulation_logging_with_level("debug");
//! ```
//!
//! `RUST_LOG` always wins over the level passed in:
//!
//! ```bash
//! RUST_LOG=trafficgen_models::http=trace cargo run --example traffic_demo
//! ```
//!
//! # Level Guidelines
//! - **TRACE**: scheduling, every transport segment
//! - **DEBUG**: state machine transitions, connection lifecycle
//! - **INFO**: run start/end, application start/stop
//! - **WARN**: framing violations and operations ignored in the current state
//! - **ERROR**: inconsistencies that corrupt results

use crate::SimTime;
use tracing::{info, Span};
use tracing_subscriber::{filter::EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize logging at INFO.
pub fn init_simulation_logging() {
    init_simulation_logging_with_level("info")
}

/// Initialize logging with a specific level
///
/// # Arguments
/// * `level` - Log level: "trace", "debug", "info", "warn", or "error"
///
/// Calling this more than once is harmless; later calls are ignored.
pub fn init_simulation_logging_with_level(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("{level},trafficgen_core::scheduler=info").into()
    });

    let installed = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_file(true)
                .with_line_number(true),
        )
        .with(filter)
        .try_init();

    if installed.is_ok() {
        info!("Simulation logging initialized at level: {}", level);
    }
}

/// Initialize very verbose, pretty-printed logging for debugging a single run.
pub fn init_detailed_simulation_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "trace,trafficgen_core=trace,trafficgen_models=trace".into());

    let installed = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_file(true)
                .with_line_number(true)
                .pretty(),
        )
        .with(filter)
        .try_init();

    if installed.is_ok() {
        info!("Detailed simulation logging initialized");
    }
}

/// Create a span for tracking simulation execution
pub fn simulation_span(name: &str) -> Span {
    tracing::info_span!("simulation", name = name)
}

/// Logging utilities for common simulation events
pub mod events {
    use super::*;
    use tracing::debug;

    /// Log simulation start
    pub fn simulation_started(name: &str, end_time: Option<SimTime>) {
        match end_time {
            Some(end) => info!(simulation = name, end_time = %end, "Simulation started"),
            None => info!(simulation = name, "Simulation started (unbounded)"),
        }
    }

    /// Log simulation completion
    pub fn simulation_completed(name: &str, final_time: SimTime) {
        info!(simulation = name, final_time = %final_time, "Simulation completed");
    }

    /// Log component state change
    pub fn component_state_changed(component: &str, old_state: &str, new_state: &str) {
        debug!(
            component = component,
            old_state = old_state,
            new_state = new_state,
            "Component state changed"
        );
    }
}
