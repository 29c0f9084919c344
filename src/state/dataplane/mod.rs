//! # Dataplane Configuration
//!
//! The flattened, proxy-agnostic model handed to the renderer. It is built
//! fresh from a [`Graph`](super::graph::Graph) by [`build_configuration`] and
//! never mutated afterwards.

pub mod builder;

use std::path::PathBuf;

use serde::Serialize;

use crate::resources::gateway_api::{HttpHeaderFilter, HttpRequestRedirectFilter, HttpRouteMatch};
use crate::resources::NamespacedName;

use super::graph::{BackendTls, ProxyOverrides};
use super::resolver::Endpoint;

pub use builder::build_configuration;

/// Upstream name used for backends that cannot receive traffic
pub const INVALID_BACKEND_REF: &str = "invalid-backend-ref";

/// Status returned for a Rule whose filters are invalid
pub const INVALID_FILTER_STATUS_CODE: u16 = 500;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Configuration {
    /// Strictly increasing per build
    pub version: u64,
    pub http_servers: Vec<VirtualServer>,
    pub ssl_servers: Vec<VirtualServer>,
    pub upstreams: Vec<Upstream>,
    pub backend_groups: Vec<BackendGroup>,
    pub splits: Vec<SplitClient>,
    pub overrides: ProxyOverrides,
}

impl Configuration {
    /// Configuration with no servers at all
    pub fn empty(version: u64) -> Self {
        Self {
            version,
            ..Default::default()
        }
    }

    pub fn upstream(&self, name: &str) -> Option<&Upstream> {
        self.upstreams.iter().find(|u| u.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualServer {
    /// Catch-all server answering requests for unknown hosts
    pub is_default: bool,
    pub hostname: String,
    pub port: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssl: Option<Ssl>,
    pub path_rules: Vec<PathRule>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Ssl {
    pub certificate_path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum PathType {
    Exact,
    Prefix,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PathRule {
    pub path: String,
    pub path_type: PathType,
    /// In precedence order
    pub match_rules: Vec<MatchRule>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchRule {
    pub source: NamespacedName,
    pub rule_idx: usize,
    pub match_idx: usize,
    pub matching: HttpRouteMatch,
    pub filters: Filters,
    pub backend_group: BackendGroup,
}

/// Filters of one Rule; at most one of each type
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Filters {
    /// Set when the Rule's filters are invalid; replaces every other filter
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invalid_filter: Option<InvalidFilter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_redirect: Option<HttpRequestRedirectFilter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_header_modifier: Option<HttpHeaderFilter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_header_modifier: Option<HttpHeaderFilter>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidFilter {
    pub status_code: u16,
}

/// Weighted backends of one (Route, Rule)
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendGroup {
    pub source: NamespacedName,
    pub rule_idx: usize,
    pub backends: Vec<Backend>,
}

impl BackendGroup {
    pub fn name(&self) -> String {
        format!("group_{}", self.split_name())
    }

    /// Name of the traffic split allocated for this group
    pub fn split_name(&self) -> String {
        format!(
            "{}__{}_rule{}",
            self.source.namespace, self.source.name, self.rule_idx
        )
    }

    /// Backends that receive a share of traffic
    pub fn weighted(&self) -> impl Iterator<Item = &Backend> {
        self.backends.iter().filter(|b| b.weight > 0)
    }

    pub fn needs_split(&self) -> bool {
        self.weighted().count() > 1
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Backend {
    pub upstream_name: String,
    pub weight: i32,
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls: Option<BackendTls>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Upstream {
    pub name: String,
    pub endpoints: Vec<Endpoint>,
    /// Why the endpoint list is empty, when resolution failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SplitClient {
    pub name: String,
    pub distributions: Vec<Distribution>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Distribution {
    /// Share of traffic with two decimals; shares of a split sum to 100
    pub percent: f64,
    pub upstream_name: String,
}

/// `<namespace>_<service>_<port>`
pub fn upstream_name(service: &NamespacedName, port: i32) -> String {
    format!("{}_{}_{}", service.namespace, service.name, port)
}
