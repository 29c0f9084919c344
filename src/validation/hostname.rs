//! Hostname validation
//!
//! Hostnames are RFC 1123 DNS subdomains. Wildcards and IP addresses are
//! rejected: the dataplane matches hostnames exactly.

use std::net::IpAddr;

use lazy_static::lazy_static;
use regex::Regex;
use validator::ValidationError;

use super::invalid;

const MAX_HOSTNAME_LENGTH: usize = 253;

lazy_static! {
    /// Lowercase RFC 1123 subdomain
    static ref DNS_SUBDOMAIN_REGEX: Regex =
        Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$").unwrap();
}

/// Validate a hostname used by a Listener, Route, redirect or policy.
pub fn validate_hostname(hostname: &str) -> Result<(), ValidationError> {
    if hostname.is_empty() {
        return Err(invalid("hostname_empty", "hostname cannot be empty"));
    }

    if hostname.contains('*') {
        return Err(invalid(
            "hostname_wildcard",
            format!("wildcard hostnames are not supported: {}", hostname),
        ));
    }

    if hostname.parse::<IpAddr>().is_ok() {
        return Err(invalid(
            "hostname_ip",
            format!("hostname must not be an IP address: {}", hostname),
        ));
    }

    if hostname.len() > MAX_HOSTNAME_LENGTH {
        return Err(invalid(
            "hostname_length",
            format!(
                "hostname must be no more than {} characters",
                MAX_HOSTNAME_LENGTH
            ),
        ));
    }

    if !DNS_SUBDOMAIN_REGEX.is_match(hostname) {
        return Err(invalid(
            "hostname_format",
            format!(
                "hostname '{}' must consist of lower case alphanumeric characters, '-' or '.', \
                 and must start and end with an alphanumeric character",
                hostname
            ),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_dns_names() {
        assert!(validate_hostname("foo.example.com").is_ok());
        assert!(validate_hostname("localhost").is_ok());
        assert!(validate_hostname("a-b.c-d.io").is_ok());
    }

    #[test]
    fn rejects_wildcards() {
        let err = validate_hostname("*.example.com").unwrap_err();
        assert_eq!(err.code, "hostname_wildcard");
    }

    #[test]
    fn rejects_malformed_names() {
        assert!(validate_hostname("").is_err());
        assert!(validate_hostname("Foo.example.com").is_err());
        assert!(validate_hostname("-foo.example.com").is_err());
        assert!(validate_hostname("foo..example.com").is_err());
        assert!(validate_hostname("foo_bar.example.com").is_err());
    }

    #[test]
    fn rejects_ip_addresses() {
        let err = validate_hostname("10.0.0.1").unwrap_err();
        assert_eq!(err.code, "hostname_ip");
        assert!(validate_hostname("::1").is_err());
    }

    #[test]
    fn rejects_overlong_names() {
        let label = "a".repeat(60);
        let hostname = vec![label.as_str(); 5].join(".");
        let err = validate_hostname(&hostname).unwrap_err();
        assert_eq!(err.code, "hostname_length");
    }
}
