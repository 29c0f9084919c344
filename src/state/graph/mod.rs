//! # Graph Builder
//!
//! Builds the Gateway → Listener → Route → Backend graph from a
//! [`ClusterState`] snapshot. The graph is rebuilt wholesale on every pass
//! and never mutated afterwards.
//!
//! Invalid user input never aborts a build: it is recorded as a
//! [`Condition`](super::conditions::Condition) on the smallest affected
//! entity. Only a missing field that admission control guarantees returns
//! an error ([`FlowgateError::Invariant`](crate::errors::FlowgateError)).

pub mod backend_refs;
pub mod gateway;
pub mod gateway_class;
pub mod listener;
pub mod policies;
pub mod reference_grant;
pub mod route;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::Serialize;
use tracing::debug;

use super::secrets::SecretRequester;
use super::store::ClusterState;
use crate::config::ControllerConfig;
use crate::errors::Result;
use crate::resources::{LabelSelector, NamespacedName};
use crate::validation::Validators;

pub use backend_refs::{BackendRefNode, BackendTls, TlsVerification};
pub use gateway::{GatewayEntry, GatewayNode, ProxyOverrides};
pub use gateway_class::{GatewayClassEntry, GatewayClassNode};
pub use listener::{AllowedNamespaces, ListenerCertificate, ListenerNode};
pub use policies::PolicyNode;
pub use reference_grant::{ReferenceFrom, ReferenceGrantResolver, ReferenceTo};
pub use route::{Attachment, ParentRefBinding, ParentRefNode, RouteNode, RuleNode};

/// Hostname key used when neither the Listener nor the Route names a host.
pub const WILDCARD_HOSTNAME: &str = "*";

/// Why an entity was seen but deliberately left out of configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum IgnoreReason {
    /// Another GatewayClass owned by this controller is active
    GatewayClassConflict,
    /// Another Gateway of the active class won the tie-break
    GatewayConflict,
    /// The Gateway references a GatewayClass that is ignored
    GatewayClassIgnored,
    /// A ParentRef names a Gateway that is ignored
    GatewayIgnored,
    /// A ParentRef names a Gateway this controller does not manage
    NotControlled,
}

impl fmt::Display for IgnoreReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            IgnoreReason::GatewayClassConflict => "GatewayClassConflict",
            IgnoreReason::GatewayConflict => "GatewayConflict",
            IgnoreReason::GatewayClassIgnored => "GatewayClassIgnored",
            IgnoreReason::GatewayIgnored => "GatewayIgnored",
            IgnoreReason::NotControlled => "NotControlled",
        };
        f.write_str(reason)
    }
}

/// Inputs of a graph build that do not come from the cluster.
#[derive(Debug, Clone)]
pub struct BuildContext {
    /// `spec.controllerName` this controller owns
    pub controller_name: String,
    /// When set, the only GatewayClass considered active
    pub gateway_class_name: Option<String>,
    pub http_port: i32,
    pub https_port: i32,
    pub validators: Validators,
}

impl BuildContext {
    pub fn new(controller_name: impl Into<String>) -> Self {
        Self {
            controller_name: controller_name.into(),
            gateway_class_name: None,
            http_port: 80,
            https_port: 443,
            validators: Validators::default(),
        }
    }

    pub fn from_config(config: &ControllerConfig) -> Self {
        Self {
            controller_name: config.controller_name.clone(),
            gateway_class_name: config.gateway_class_name.clone(),
            http_port: config.http_port,
            https_port: config.https_port,
            validators: Validators::default(),
        }
    }
}

/// Secondary resources the graph depends on, including references that do
/// not resolve yet. Drives relevance checks in the change processor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReferencedResources {
    pub services: BTreeSet<NamespacedName>,
    pub secrets: BTreeSet<NamespacedName>,
    /// Namespaces that matched a Listener selector
    pub namespaces: BTreeSet<NamespacedName>,
    /// Every Listener namespace selector in the graph
    pub namespace_selectors: Vec<LabelSelector>,
}

/// Ports the HTTP and HTTPS listeners must use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ListenerPorts {
    pub http: i32,
    pub https: i32,
}

impl Default for ListenerPorts {
    fn default() -> Self {
        Self {
            http: 80,
            https: 443,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Graph {
    pub gateway_classes: BTreeMap<NamespacedName, GatewayClassEntry>,
    pub gateways: BTreeMap<NamespacedName, GatewayEntry>,
    pub routes: BTreeMap<NamespacedName, RouteNode>,
    pub backend_tls_policies: BTreeMap<NamespacedName, PolicyNode>,
    pub referenced: ReferencedResources,
    pub ports: ListenerPorts,
}

impl Graph {
    pub fn active_class(&self) -> Option<&GatewayClassNode> {
        self.gateway_classes.values().find_map(|entry| match entry {
            GatewayClassEntry::Active(node) => Some(node),
            GatewayClassEntry::Ignored { .. } => None,
        })
    }

    pub fn active_gateway(&self) -> Option<&GatewayNode> {
        self.gateways.values().find_map(|entry| match entry {
            GatewayEntry::Active(node) => Some(node),
            GatewayEntry::Ignored { .. } => None,
        })
    }

    pub fn ignored_gateways(&self) -> BTreeSet<NamespacedName> {
        self.gateways
            .iter()
            .filter(|(_, entry)| matches!(entry, GatewayEntry::Ignored { .. }))
            .map(|(name, _)| name.clone())
            .collect()
    }
}

/// Build the graph for one reconciliation pass.
pub fn build_graph(
    state: &ClusterState,
    ctx: &BuildContext,
    secrets: &dyn SecretRequester,
) -> Result<Graph> {
    let grants = ReferenceGrantResolver::new(&state.reference_grants);
    let mut referenced = ReferencedResources::default();

    let gateway_classes = gateway_class::build_gateway_classes(
        &state.gateway_classes,
        &ctx.controller_name,
        ctx.gateway_class_name.as_deref(),
    );

    let active_class = gateway_classes.values().find_map(|entry| match entry {
        GatewayClassEntry::Active(node) => Some(node),
        GatewayClassEntry::Ignored { .. } => None,
    });
    let ignored_classes: BTreeSet<&str> = gateway_classes
        .iter()
        .filter(|(_, entry)| matches!(entry, GatewayClassEntry::Ignored { .. }))
        .map(|(name, _)| name.name.as_str())
        .collect();

    let mut gateways = gateway::build_gateways(
        state,
        active_class,
        &ignored_classes,
        ctx,
        &grants,
        secrets,
        &mut referenced,
    );

    let ignored_gateways: BTreeSet<NamespacedName> = gateways
        .iter()
        .filter(|(_, entry)| matches!(entry, GatewayEntry::Ignored { .. }))
        .map(|(name, _)| name.clone())
        .collect();
    let active_gateway = gateways.values_mut().find_map(|entry| match entry {
        GatewayEntry::Active(node) => Some(node),
        GatewayEntry::Ignored { .. } => None,
    });

    let mut routes = route::build_routes(
        state,
        active_gateway,
        &ignored_gateways,
        ctx,
        &grants,
        &mut referenced,
    )?;

    let backend_tls_policies =
        policies::build_backend_tls_policies(state, &mut routes, secrets, &mut referenced);

    debug!(
        gateway_classes = gateway_classes.len(),
        gateways = gateways.len(),
        routes = routes.len(),
        policies = backend_tls_policies.len(),
        "Built graph"
    );

    Ok(Graph {
        gateway_classes,
        gateways,
        routes,
        backend_tls_policies,
        referenced,
        ports: ListenerPorts {
            http: ctx.http_port,
            https: ctx.https_port,
        },
    })
}
