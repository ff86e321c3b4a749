//! API layer
//!
//! HTTP handlers for:
//! - Member area pages
//! - Metrics (Prometheus)

pub mod metrics;
mod platform;

pub use metrics::metrics_router;
pub use platform::platform_router;
