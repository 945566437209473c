/*!
 * Structured Tracing
 * Subscriber setup and timing spans for synchronizer workloads
 *
 * Features:
 * - Env-driven filtering via RUST_LOG
 * - JSON-formatted logs for structured parsing
 * - Scenario spans that flag slow runs
 */

use crate::core::limits::{ENV_TRACE_JSON, SLOW_SCENARIO_MS};
use std::time::{Duration, Instant};
use tracing::{debug, info, span, warn, Level};
use tracing_subscriber::{
    fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

/// Initialize structured tracing
///
/// Environment variables:
/// - RUST_LOG: Set log level (default: info)
/// - SYNC_TRACE_JSON: Enable JSON output (default: false)
///
/// Safe to call more than once; later calls keep the first subscriber.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let use_json = std::env::var(ENV_TRACE_JSON)
        .map(|v| v == "1" || v == "true")
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(env_filter);

    let installed = if use_json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_thread_names(true)
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .try_init()
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_thread_names(true)
                    .with_span_events(FmtSpan::CLOSE)
                    .compact(),
            )
            .try_init()
    };

    if installed.is_ok() {
        info!(json = use_json, "Structured tracing initialized");
    }
}

/// Span around one stress scenario; logs its duration when dropped
pub struct ScenarioSpan {
    span: tracing::Span,
    start: Instant,
    name: String,
}

impl ScenarioSpan {
    pub fn new(name: &str, threads: usize) -> Self {
        let span = span!(
            Level::INFO,
            "scenario",
            scenario = name,
            threads = threads,
            duration_ms = tracing::field::Empty,
            operations = tracing::field::Empty,
        );

        let _entered = span.enter();
        debug!(scenario = name, threads, "scenario started");
        drop(_entered);

        Self {
            span,
            start: Instant::now(),
            name: name.to_string(),
        }
    }

    /// Record the number of completed operations
    pub fn record_operations(&self, count: u64) {
        self.span.record("operations", count);
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn enter(&self) -> tracing::span::Entered<'_> {
        self.span.enter()
    }
}

impl Drop for ScenarioSpan {
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        let _entered = self.span.enter();
        self.span.record("duration_ms", duration.as_millis() as u64);

        if duration.as_millis() > SLOW_SCENARIO_MS {
            warn!(
                scenario = %self.name,
                duration_ms = duration.as_millis() as u64,
                slow = true,
                "slow scenario detected"
            );
        } else {
            debug!(
                scenario = %self.name,
                duration_us = duration.as_micros() as u64,
                "scenario completed"
            );
        }
    }
}

/// Helper to create a scenario span
#[inline]
pub fn span_scenario(name: &str, threads: usize) -> ScenarioSpan {
    ScenarioSpan::new(name, threads)
}
