//! Prometheus metrics registry and instruments.
//!
//! This module is framework-agnostic and can be used from any layer.

use lazy_static::lazy_static;
use prometheus::{IntCounterVec, Opts, Registry};

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // Auth completion metrics
    pub static ref AUTH_COMPLETIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("hive_auth_completions_total", "Total number of sign-in completions handled"),
        &["grant", "outcome"]
    ).expect("metric can be created");
    pub static ref SIGNOUTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("hive_signouts_total", "Total number of signouts handled"),
        &["entry", "outcome"]
    ).expect("metric can be created");
    pub static ref GUARD_DECISIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("hive_guard_decisions_total", "Total number of session guard decisions"),
        &["decision"]
    ).expect("metric can be created");

    // Error Metrics
    pub static ref ERRORS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("hive_errors_total", "Total number of errors"),
        &["error_type", "endpoint"]
    ).expect("metric can be created");
}

/// Initialize metrics registry.
pub fn init_metrics() {
    REGISTRY
        .register(Box::new(AUTH_COMPLETIONS_TOTAL.clone()))
        .expect("AUTH_COMPLETIONS_TOTAL can be registered");
    REGISTRY
        .register(Box::new(SIGNOUTS_TOTAL.clone()))
        .expect("SIGNOUTS_TOTAL can be registered");
    REGISTRY
        .register(Box::new(GUARD_DECISIONS_TOTAL.clone()))
        .expect("GUARD_DECISIONS_TOTAL can be registered");
    REGISTRY
        .register(Box::new(ERRORS_TOTAL.clone()))
        .expect("ERRORS_TOTAL can be registered");

    tracing::info!("Metrics registry initialized");
}

/// Record the outcome of one sign-in completion attempt
pub fn record_auth_completion(grant: &str, outcome: &str) {
    AUTH_COMPLETIONS_TOTAL
        .with_label_values(&[grant, outcome])
        .inc();
}

/// Record the outcome of one signout
pub fn record_signout(entry: &str, outcome: &str) {
    SIGNOUTS_TOTAL.with_label_values(&[entry, outcome]).inc();
}
