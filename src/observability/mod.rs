//! # Observability Infrastructure
//!
//! Structured logging and metrics for the reconciliation engine.

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, log_config_info};
pub use metrics::ReconcileMetrics;

use crate::config::ObservabilityConfig;
use ::tracing::info;

/// Initialize logging and register metric descriptions
pub fn init_observability(config: &ObservabilityConfig) {
    init_logging(config);
    ReconcileMetrics::new().register_metrics();

    info!(
        service_name = %config.service_name,
        log_level = %config.log_level,
        json_logging = %config.json_logging,
        "Observability initialized successfully"
    );
}
