//! # Structured Logging
//!
//! Provides structured logging macros and subscriber setup using the tracing
//! ecosystem.

use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::config::{AppConfig, ObservabilityConfig};

/// Create a tracing span for one reconciliation pass.
///
/// ```rust,ignore
/// let span = reconcile_span!("process", version = 4);
/// ```
#[macro_export]
macro_rules! reconcile_span {
    ($operation:expr) => {
        tracing::info_span!(
            "reconcile",
            operation = %$operation,
            operation_id = %uuid::Uuid::new_v4()
        )
    };
    ($operation:expr, $($field:tt)*) => {
        tracing::info_span!(
            "reconcile",
            operation = %$operation,
            operation_id = %uuid::Uuid::new_v4(),
            $($field)*
        )
    };
}

/// Install the global subscriber. `RUST_LOG` wins over the configured level.
pub fn init_logging(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str()));

    let builder = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true);

    #[cfg(feature = "json-logs")]
    let result = if config.json_logging {
        tracing::subscriber::set_global_default(builder.json().finish())
    } else {
        tracing::subscriber::set_global_default(builder.finish())
    };

    #[cfg(not(feature = "json-logs"))]
    let result = tracing::subscriber::set_global_default(builder.finish());

    if result.is_err() {
        // Subscriber already set elsewhere (e.g. integration tests); ignore.
    }
}

/// Log configuration at startup
pub fn log_config_info(config: &AppConfig) {
    tracing::info!(
        service_name = %config.observability.service_name,
        controller_name = %config.controller.controller_name,
        gateway_class = ?config.controller.gateway_class_name,
        secrets_dir = %config.controller.secrets_dir.display(),
        http_port = config.controller.http_port,
        https_port = config.controller.https_port,
        "Flowgate control plane configuration"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_macros_compile() {
        let _span = reconcile_span!("process");
        let _span = reconcile_span!("process", version = 2u64);
    }

    #[test]
    fn test_log_config_info() {
        let config = AppConfig::default();

        // This should not panic
        log_config_info(&config);
    }

    #[test]
    fn test_init_logging_twice() {
        let config = ObservabilityConfig::default();
        init_logging(&config);
        init_logging(&config);
    }
}
