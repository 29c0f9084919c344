//! # Error Types
//!
//! Error types for the Flowgate control plane using `thiserror`.

/// Custom result type for Flowgate operations
pub type Result<T> = std::result::Result<T, FlowgateError>;

/// Main error type for the Flowgate control plane
#[derive(thiserror::Error, Debug)]
pub enum FlowgateError {
    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Validation errors
    #[error("Validation error: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    /// The watch layer delivered a kind the engine does not handle
    #[error("Unsupported resource kind: {kind}")]
    UnsupportedResource { kind: String },

    /// A GatewayClass owned by another controller reached the engine
    #[error("GatewayClass '{name}' is owned by controller '{controller}'")]
    ForeignGatewayClass { name: String, controller: String },

    /// A field guaranteed by admission control was missing
    #[error("Invariant violated: {message}")]
    Invariant { message: String },

    /// I/O errors with additional context
    #[error("I/O error: {context}")]
    Io {
        #[source]
        source: std::io::Error,
        context: String,
    },

    /// JSON serialization errors
    #[error("Serialization error: {context}")]
    Serialization {
        #[source]
        source: serde_json::Error,
        context: String,
    },

    /// Manifest decoding errors
    #[error("Manifest error: {context}")]
    Manifest {
        #[source]
        source: serde_yaml::Error,
        context: String,
    },

    /// Internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl FlowgateError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    /// Create a configuration error with source
    pub fn config_with_source<S: Into<String>>(
        message: S,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        Self::Config {
            message: message.into(),
            source: Some(source),
        }
    }

    /// Create a validation error
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation {
            message: message.into(),
            field: None,
        }
    }

    /// Create a validation error with field information
    pub fn validation_field<S: Into<String>, F: Into<String>>(message: S, field: F) -> Self {
        Self::Validation {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create an unsupported resource error
    pub fn unsupported_resource<S: Into<String>>(kind: S) -> Self {
        Self::UnsupportedResource { kind: kind.into() }
    }

    /// Create an invariant violation error
    pub fn invariant<S: Into<String>>(message: S) -> Self {
        Self::Invariant {
            message: message.into(),
        }
    }

    /// Create an I/O error with context
    pub fn io<S: Into<String>>(source: std::io::Error, context: S) -> Self {
        Self::Io {
            source,
            context: context.into(),
        }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Errors that mean the watch layer or the builders drifted from their
    /// contract. The intake loop must stop on these.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            FlowgateError::UnsupportedResource { .. }
                | FlowgateError::ForeignGatewayClass { .. }
                | FlowgateError::Invariant { .. }
        )
    }
}

impl From<std::io::Error> for FlowgateError {
    fn from(error: std::io::Error) -> Self {
        Self::Io {
            source: error,
            context: "I/O operation failed".to_string(),
        }
    }
}

impl From<serde_json::Error> for FlowgateError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization {
            source: error,
            context: "JSON serialization failed".to_string(),
        }
    }
}

impl From<serde_yaml::Error> for FlowgateError {
    fn from(error: serde_yaml::Error) -> Self {
        Self::Manifest {
            source: error,
            context: "Manifest decoding failed".to_string(),
        }
    }
}

impl From<config::ConfigError> for FlowgateError {
    fn from(error: config::ConfigError) -> Self {
        Self::config_with_source("Configuration loading failed", Box::new(error))
    }
}

impl From<validator::ValidationErrors> for FlowgateError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let message = errors
            .field_errors()
            .iter()
            .map(|(field, field_errors)| {
                let error_messages: Vec<String> = field_errors
                    .iter()
                    .map(|e| {
                        e.message
                            .as_ref()
                            .map_or("Invalid value".to_string(), |m| m.to_string())
                    })
                    .collect();
                format!("{}: {}", field, error_messages.join(", "))
            })
            .collect::<Vec<_>>()
            .join("; ");

        Self::validation(format!("Validation failed: {}", message))
    }
}
