//! # Configuration Settings
//!
//! Defines the configuration structure for the Flowgate control plane.

use std::path::{Path, PathBuf};

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::errors::{FlowgateError, Result};

/// Prefix of environment overrides, e.g. `FLOWGATE__CONTROLLER__HTTP_PORT`
pub const ENV_PREFIX: &str = "FLOWGATE";

lazy_static! {
    /// `<domain>/<path>` as required by `spec.controllerName`
    static ref CONTROLLER_NAME_REGEX: Regex = Regex::new(concat!(
        r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)+",
        r"/[A-Za-z0-9/\-._~%!$&'()*+,;=:]+$",
    ))
    .unwrap();
}

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Reconciliation engine configuration
    #[validate(nested)]
    pub controller: ControllerConfig,

    /// Observability configuration
    #[validate(nested)]
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// Load defaults, then an optional file, then `FLOWGATE__*` environment
    /// overrides, and validate the result.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<()> {
        Validate::validate(self).map_err(FlowgateError::from)?;
        self.validate_custom()?;
        Ok(())
    }

    /// Rules the derive cannot express
    fn validate_custom(&self) -> Result<()> {
        let controller = &self.controller;

        if !CONTROLLER_NAME_REGEX.is_match(&controller.controller_name) {
            return Err(FlowgateError::validation_field(
                "Controller name must have the form <domain>/<path>",
                "controller.controller_name",
            ));
        }

        if controller.http_port == controller.https_port {
            return Err(FlowgateError::validation(
                "HTTP and HTTPS listener ports cannot be the same",
            ));
        }

        if matches!(&controller.gateway_class_name, Some(name) if name.is_empty()) {
            return Err(FlowgateError::validation_field(
                "GatewayClass name cannot be empty when set",
                "controller.gateway_class_name",
            ));
        }

        Ok(())
    }
}

/// Reconciliation engine configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ControllerConfig {
    /// `spec.controllerName` owned by this controller
    #[validate(length(
        min = 1,
        max = 253,
        message = "Controller name must be 1-253 characters"
    ))]
    pub controller_name: String,

    /// When set, the only GatewayClass considered active
    pub gateway_class_name: Option<String>,

    /// Directory receiving certificate and CA bundles
    pub secrets_dir: PathBuf,

    /// Port every HTTP listener must use
    #[validate(range(
        min = 1,
        max = 65535,
        message = "HTTP port must be between 1 and 65535"
    ))]
    pub http_port: i32,

    /// Port every HTTPS listener must use
    #[validate(range(
        min = 1,
        max = 65535,
        message = "HTTPS port must be between 1 and 65535"
    ))]
    pub https_port: i32,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            controller_name: "gateway.flowgate.dev/controller".to_string(),
            gateway_class_name: None,
            secrets_dir: PathBuf::from("/etc/flowgate/secrets"),
            http_port: 80,
            https_port: 443,
        }
    }
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Default log level, overridden by `RUST_LOG`
    #[validate(length(min = 1, message = "Log level cannot be empty"))]
    pub log_level: String,

    /// Enable JSON structured logging
    pub json_logging: bool,

    /// Service name attached to startup logs
    #[validate(length(min = 1, message = "Service name cannot be empty"))]
    pub service_name: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logging: false,
            service_name: "flowgate".to_string(),
        }
    }
}
