//! HTTP field validation for route matches and filters
//!
//! The dataplane renders matched values into proxy configuration, so each
//! proxy imposes its own syntactic limits. [`HttpFieldsValidator`] is the
//! seam; [`ProxyHttpValidator`] encodes the limits of the bundled renderer.

use lazy_static::lazy_static;
use regex::Regex;
use validator::ValidationError;

use super::{hostname::validate_hostname, invalid};

/// Methods accepted in a route match.
pub const SUPPORTED_METHODS: [&str; 9] =
    ["GET", "HEAD", "POST", "PUT", "DELETE", "CONNECT", "OPTIONS", "TRACE", "PATCH"];

/// Status codes accepted for a request redirect.
pub const SUPPORTED_REDIRECT_STATUS_CODES: [i32; 2] = [301, 302];

/// Schemes accepted for a request redirect.
pub const SUPPORTED_REDIRECT_SCHEMES: [&str; 2] = ["http", "https"];

const MAX_HEADER_VALUE_LENGTH: usize = 4096;

lazy_static! {
    /// RFC 7230 token, used for header names
    static ref HEADER_NAME_REGEX: Regex = Regex::new(r"^[A-Za-z0-9!#$%&'*+\-.^_`|~]+$").unwrap();

    /// Paths: leading slash, no whitespace or characters that break a location block
    static ref PATH_REGEX: Regex = Regex::new(r"^/[^\s{};\\$]*$").unwrap();

    /// Query parameter names: no whitespace, '=', '&' or config delimiters
    static ref QUERY_PARAM_NAME_REGEX: Regex = Regex::new(r"^[^\s=&{};\\$]+$").unwrap();
}

/// Validates route match and filter fields against proxy constraints.
pub trait HttpFieldsValidator: Send + Sync {
    fn validate_path_in_match(&self, path: &str) -> Result<(), ValidationError>;

    fn validate_header_name_in_match(&self, name: &str) -> Result<(), ValidationError>;

    fn validate_header_value_in_match(&self, value: &str) -> Result<(), ValidationError>;

    fn validate_query_param_name_in_match(&self, name: &str) -> Result<(), ValidationError>;

    fn validate_query_param_value_in_match(&self, value: &str) -> Result<(), ValidationError>;

    fn validate_method_in_match(&self, method: &str) -> Result<(), ValidationError>;

    fn validate_redirect_scheme(&self, scheme: &str) -> Result<(), ValidationError>;

    fn validate_redirect_hostname(&self, hostname: &str) -> Result<(), ValidationError> {
        validate_hostname(hostname)
    }

    fn validate_redirect_port(&self, port: i32) -> Result<(), ValidationError>;

    fn validate_redirect_status_code(&self, status_code: i32) -> Result<(), ValidationError>;

    fn validate_filter_header_name(&self, name: &str) -> Result<(), ValidationError>;

    fn validate_filter_header_value(&self, value: &str) -> Result<(), ValidationError>;
}

/// Constraints of the bundled proxy renderer.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProxyHttpValidator;

impl ProxyHttpValidator {
    fn validate_plain_value(value: &str, what: &'static str) -> Result<(), ValidationError> {
        if value.len() > MAX_HEADER_VALUE_LENGTH {
            return Err(invalid(
                "value_length",
                format!(
                    "{} must be no more than {} characters",
                    what, MAX_HEADER_VALUE_LENGTH
                ),
            ));
        }
        let forbidden = |c: char| c.is_control() || c == '$' || c == '\\';
        if value.chars().any(forbidden) {
            return Err(invalid(
                "value_characters",
                format!("{} must not contain control characters, '$' or '\\'", what),
            ));
        }
        Ok(())
    }
}

impl HttpFieldsValidator for ProxyHttpValidator {
    fn validate_path_in_match(&self, path: &str) -> Result<(), ValidationError> {
        if !PATH_REGEX.is_match(path) {
            return Err(invalid(
                "path_format",
                format!(
                    "path '{}' must start with '/' and must not contain whitespace, \
                     '{{', '}}', ';', '\\' or '$'",
                    path
                ),
            ));
        }
        Ok(())
    }

    fn validate_header_name_in_match(&self, name: &str) -> Result<(), ValidationError> {
        if !HEADER_NAME_REGEX.is_match(name) {
            return Err(invalid("header_name", format!("invalid header name '{}'", name)));
        }
        Ok(())
    }

    fn validate_header_value_in_match(&self, value: &str) -> Result<(), ValidationError> {
        Self::validate_plain_value(value, "header value")
    }

    fn validate_query_param_name_in_match(&self, name: &str) -> Result<(), ValidationError> {
        if !QUERY_PARAM_NAME_REGEX.is_match(name) {
            return Err(invalid(
                "query_param_name",
                format!("invalid query param name '{}'", name),
            ));
        }
        Ok(())
    }

    fn validate_query_param_value_in_match(&self, value: &str) -> Result<(), ValidationError> {
        Self::validate_plain_value(value, "query param value")
    }

    fn validate_method_in_match(&self, method: &str) -> Result<(), ValidationError> {
        if !SUPPORTED_METHODS.contains(&method) {
            return Err(invalid(
                "method",
                format!(
                    "method '{}' is not one of {}",
                    method,
                    SUPPORTED_METHODS.join(", ")
                ),
            ));
        }
        Ok(())
    }

    fn validate_redirect_scheme(&self, scheme: &str) -> Result<(), ValidationError> {
        if !SUPPORTED_REDIRECT_SCHEMES.contains(&scheme) {
            return Err(invalid(
                "redirect_scheme",
                format!(
                    "scheme '{}' is not one of {}",
                    scheme,
                    SUPPORTED_REDIRECT_SCHEMES.join(", ")
                ),
            ));
        }
        Ok(())
    }

    fn validate_redirect_port(&self, port: i32) -> Result<(), ValidationError> {
        if !(1..=65535).contains(&port) {
            return Err(invalid("redirect_port", format!("port {} is out of range", port)));
        }
        Ok(())
    }

    fn validate_redirect_status_code(&self, status_code: i32) -> Result<(), ValidationError> {
        if !SUPPORTED_REDIRECT_STATUS_CODES.contains(&status_code) {
            return Err(invalid(
                "redirect_status_code",
                format!("status code {} is not one of 301, 302", status_code),
            ));
        }
        Ok(())
    }

    fn validate_filter_header_name(&self, name: &str) -> Result<(), ValidationError> {
        self.validate_header_name_in_match(name)
    }

    fn validate_filter_header_value(&self, value: &str) -> Result<(), ValidationError> {
        Self::validate_plain_value(value, "header value")
    }
}
