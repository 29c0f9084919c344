use std::path::PathBuf;

use serde::Serialize;

use crate::resources::gateway_api::HttpBackendRef;
use crate::resources::{NamespacedName, GATEWAY_API_GROUP};
use crate::state::conditions::{self, Condition};
use crate::state::store::ClusterState;

use super::{ReferenceFrom, ReferenceGrantResolver, ReferenceTo, ReferencedResources};

/// How the proxy verifies an upstream serving TLS
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum TlsVerification {
    /// CA bundle written to disk from a Secret
    CaBundle(PathBuf),
    /// The proxy's system trust store
    SystemTrust,
}

/// Upstream TLS settings attached by a BackendTLSPolicy
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendTls {
    pub server_name: String,
    pub verification: TlsVerification,
    pub policy: NamespacedName,
}

/// A resolved backend reference.
///
/// Invalid references stay in place so traffic shares remain stable; the
/// configuration builder answers their share with an error response.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendRefNode {
    pub service: Option<NamespacedName>,
    pub port: Option<i32>,
    pub weight: i32,
    pub valid: bool,
    pub tls: Option<BackendTls>,
}

impl BackendRefNode {
    /// Zero-weight stand-in for a reference to an unsupported kind
    pub fn invalid_kind() -> Self {
        Self {
            service: None,
            port: None,
            weight: 0,
            valid: false,
            tls: None,
        }
    }
}

pub(super) fn resolve_backend_refs(
    route: &NamespacedName,
    rule_idx: usize,
    refs: &[HttpBackendRef],
    state: &ClusterState,
    grants: &ReferenceGrantResolver<'_>,
    referenced: &mut ReferencedResources,
) -> (Vec<BackendRefNode>, Vec<Condition>) {
    let mut nodes = Vec::with_capacity(refs.len());
    let mut found = Vec::new();

    for (idx, backend_ref) in refs.iter().enumerate() {
        let field = format!("spec.rules[{}].backendRefs[{}]", rule_idx, idx);
        let (node, condition) = resolve_one(route, &field, backend_ref, state, grants, referenced);
        nodes.push(node);
        found.extend(condition);
    }

    (nodes, found)
}

fn resolve_one(
    route: &NamespacedName,
    field: &str,
    backend_ref: &HttpBackendRef,
    state: &ClusterState,
    grants: &ReferenceGrantResolver<'_>,
    referenced: &mut ReferencedResources,
) -> (BackendRefNode, Option<Condition>) {
    let group = backend_ref.group.as_deref().unwrap_or_default();
    let kind = backend_ref.kind.as_deref().unwrap_or("Service");
    if !group.is_empty() || kind != "Service" {
        let condition = conditions::route_backend_ref_invalid_kind(format!(
            "{}.kind: {} is not supported, only core Services are",
            field, kind
        ));
        return (BackendRefNode::invalid_kind(), Some(condition));
    }

    let namespace = backend_ref.namespace.as_deref().unwrap_or(&route.namespace);
    let service = NamespacedName::new(namespace, backend_ref.name.as_str());
    referenced.services.insert(service.clone());

    let mut node = BackendRefNode {
        service: Some(service.clone()),
        port: backend_ref.port,
        weight: backend_ref.weight.unwrap_or(1),
        valid: false,
        tls: None,
    };

    let from = ReferenceFrom {
        group: GATEWAY_API_GROUP,
        kind: "HTTPRoute",
        namespace: &route.namespace,
    };
    let to = ReferenceTo {
        group: "",
        kind: "Service",
        namespace: &service.namespace,
        name: &service.name,
    };
    if !grants.permits(from, to) {
        let condition = conditions::route_backend_ref_not_permitted(format!(
            "{}.namespace: reference to Service {} is not permitted by any ReferenceGrant",
            field, service
        ));
        return (node, Some(condition));
    }

    let Some(port) = backend_ref.port else {
        let condition = conditions::route_backend_ref_unsupported_value(format!(
            "{}.port: port is required",
            field
        ));
        return (node, Some(condition));
    };

    let Some(svc) = state.services.get(&service) else {
        let condition = conditions::route_backend_ref_not_found(format!(
            "{}.name: Service {} does not exist",
            field, service
        ));
        return (node, Some(condition));
    };

    let has_port = svc
        .spec
        .as_ref()
        .and_then(|spec| spec.ports.as_ref())
        .is_some_and(|ports| ports.iter().any(|p| p.port == port));
    if !has_port {
        let condition = conditions::route_backend_ref_not_found(format!(
            "{}.port: Service {} has no port {}",
            field, service, port
        ));
        return (node, Some(condition));
    }

    node.valid = true;
    (node, None)
}
