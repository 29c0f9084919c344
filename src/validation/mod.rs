//! # Validation Module
//!
//! Syntactic checks applied while building the graph:
//! 1. Hostname validation shared by Listeners, Routes, redirects and policies
//! 2. The [`HttpFieldsValidator`] capability for route match/filter fields
//!
//! Graph logic stays proxy-agnostic: it only calls the trait, and the
//! proxy-specific constraints live in [`ProxyHttpValidator`].

pub mod hostname;
pub mod http_fields;

use std::sync::Arc;

use validator::ValidationError;

pub use hostname::validate_hostname;
pub use http_fields::{HttpFieldsValidator, ProxyHttpValidator};

/// Capability bundle injected into the graph builder.
#[derive(Clone)]
pub struct Validators {
    pub http_fields: Arc<dyn HttpFieldsValidator>,
}

impl Validators {
    pub fn new(http_fields: Arc<dyn HttpFieldsValidator>) -> Self {
        Self { http_fields }
    }
}

impl Default for Validators {
    fn default() -> Self {
        Self {
            http_fields: Arc::new(ProxyHttpValidator),
        }
    }
}

impl std::fmt::Debug for Validators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Validators").finish_non_exhaustive()
    }
}

/// Build a [`ValidationError`] carrying a human readable message.
pub(crate) fn invalid(code: &'static str, message: impl Into<String>) -> ValidationError {
    let mut error = ValidationError::new(code);
    error.message = Some(message.into().into());
    error
}

/// Render a [`ValidationError`] for use in a Condition message.
pub fn describe(error: &ValidationError) -> String {
    error
        .message
        .as_ref()
        .map(|m| m.to_string())
        .unwrap_or_else(|| error.code.to_string())
}
