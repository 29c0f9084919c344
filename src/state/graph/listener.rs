use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use tracing::debug;

use crate::resources::gateway_api::{FromNamespaces, Listener, RouteGroupKind, TlsMode};
use crate::resources::{Gateway, LabelSelector, NamespacedName, GATEWAY_API_GROUP};
use crate::state::conditions::{self, Condition};
use crate::state::secrets::{SecretKind, SecretRequester};
use crate::state::store::ClusterState;
use crate::validation::{describe, validate_hostname};

use super::{BuildContext, ReferenceFrom, ReferenceGrantResolver, ReferenceTo, ReferencedResources};

pub const HTTP_PROTOCOL: &str = "HTTP";
pub const HTTPS_PROTOCOL: &str = "HTTPS";
pub const HTTP_ROUTE_KIND: &str = "HTTPRoute";

/// Resolved certificate of an HTTPS listener
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerCertificate {
    pub secret: NamespacedName,
    pub path: PathBuf,
}

/// Namespaces whose Routes may attach to a listener
#[derive(Debug, Clone, PartialEq)]
pub enum AllowedNamespaces {
    Same,
    All,
    Selector(LabelSelector),
}

#[derive(Debug, Clone)]
pub struct ListenerNode {
    pub name: String,
    pub source: Listener,
    pub valid: bool,
    pub conditions: Vec<Condition>,
    /// Routes attached to this listener
    pub routes: BTreeSet<NamespacedName>,
    /// Union of the hostnames accepted from attached Routes
    pub accepted_hostnames: BTreeSet<String>,
    pub allowed_namespaces: AllowedNamespaces,
    pub supported_kinds: Vec<RouteGroupKind>,
    pub certificate: Option<ListenerCertificate>,
}

impl ListenerNode {
    pub fn is_https(&self) -> bool {
        self.source.protocol == HTTPS_PROTOCOL
    }

    /// Listener hostname, `None` when unset or empty
    pub fn hostname(&self) -> Option<&str> {
        self.source.hostname.as_deref().filter(|h| !h.is_empty())
    }

    fn invalidate(&mut self, conditions: Vec<Condition>) {
        self.conditions.extend(conditions);
        self.valid = false;
    }

    pub fn allows_kind(&self, group: &str, kind: &str) -> bool {
        self.supported_kinds
            .iter()
            .any(|k| k.group.as_deref().unwrap_or(GATEWAY_API_GROUP) == group && k.kind == kind)
    }

    pub fn allows_namespace(
        &self,
        gateway_namespace: &str,
        route_namespace: &str,
        state: &ClusterState,
    ) -> bool {
        match &self.allowed_namespaces {
            AllowedNamespaces::Same => gateway_namespace == route_namespace,
            AllowedNamespaces::All => true,
            AllowedNamespaces::Selector(selector) => state
                .namespaces
                .get(&NamespacedName::cluster_scoped(route_namespace))
                .map(|ns| selector_matches(selector, ns.metadata.labels.as_ref()))
                .unwrap_or(false),
        }
    }
}

pub(super) fn build_listeners(
    gateway_name: &NamespacedName,
    gateway: &Gateway,
    ctx: &BuildContext,
    state: &ClusterState,
    grants: &ReferenceGrantResolver<'_>,
    secrets: &dyn SecretRequester,
    referenced: &mut ReferencedResources,
) -> Vec<ListenerNode> {
    let mut listeners: Vec<ListenerNode> = gateway
        .spec
        .listeners
        .iter()
        .map(|l| build_listener(gateway_name, l, ctx, state, grants, secrets, referenced))
        .collect();

    detect_conflicts(&mut listeners);
    listeners
}

struct ListenerBuilder {
    conditions: Vec<Condition>,
    valid: bool,
}

impl ListenerBuilder {
    fn invalidate(&mut self, conditions: Vec<Condition>) {
        self.conditions.extend(conditions);
        self.valid = false;
    }
}

fn build_listener(
    gateway_name: &NamespacedName,
    listener: &Listener,
    ctx: &BuildContext,
    state: &ClusterState,
    grants: &ReferenceGrantResolver<'_>,
    secrets: &dyn SecretRequester,
    referenced: &mut ReferencedResources,
) -> ListenerNode {
    let mut b = ListenerBuilder {
        conditions: Vec::new(),
        valid: true,
    };

    match listener.protocol.as_str() {
        HTTP_PROTOCOL => {
            if listener.port != ctx.http_port {
                b.invalidate(conditions::listener_port_unavailable(format!(
                    "port: HTTP listeners must use port {}",
                    ctx.http_port
                )));
            }
            if listener.tls.is_some() {
                b.invalidate(conditions::listener_unsupported_value(
                    "tls: tls is not supported for HTTP listeners",
                ));
            }
        }
        HTTPS_PROTOCOL => {
            if listener.port != ctx.https_port {
                b.invalidate(conditions::listener_port_unavailable(format!(
                    "port: HTTPS listeners must use port {}",
                    ctx.https_port
                )));
            }
            if listener.tls.is_none() {
                b.invalidate(conditions::listener_unsupported_value(
                    "tls: tls is required for HTTPS listeners",
                ));
            }
        }
        other => {
            b.invalidate(conditions::listener_unsupported_protocol(format!(
                "protocol: {} is not supported, supported protocols: {}, {}",
                other, HTTP_PROTOCOL, HTTPS_PROTOCOL
            )));
        }
    }

    if let Some(hostname) = listener.hostname.as_deref().filter(|h| !h.is_empty()) {
        if let Err(e) = validate_hostname(hostname) {
            b.invalidate(conditions::listener_unsupported_value(format!(
                "hostname: {}",
                describe(&e)
            )));
        }
    }

    let supported_kinds = resolve_route_kinds(listener, &mut b);
    let allowed_namespaces = resolve_allowed_namespaces(listener, state, &mut b, referenced);

    let certificate = if listener.protocol == HTTPS_PROTOCOL {
        resolve_certificate(
            gateway_name,
            listener,
            state,
            grants,
            secrets,
            &mut b,
            referenced,
        )
    } else {
        None
    };

    if !b.valid {
        debug!(gateway = %gateway_name, listener = %listener.name, "Listener is invalid");
    }

    ListenerNode {
        name: listener.name.clone(),
        source: listener.clone(),
        valid: b.valid,
        conditions: b.conditions,
        routes: BTreeSet::new(),
        accepted_hostnames: BTreeSet::new(),
        allowed_namespaces,
        supported_kinds,
        certificate,
    }
}

fn resolve_route_kinds(listener: &Listener, b: &mut ListenerBuilder) -> Vec<RouteGroupKind> {
    let http_route = RouteGroupKind {
        group: Some(GATEWAY_API_GROUP.to_string()),
        kind: HTTP_ROUTE_KIND.to_string(),
    };

    let requested = listener
        .allowed_routes
        .as_ref()
        .map(|a| a.kinds.as_slice())
        .unwrap_or_default();
    if requested.is_empty() {
        return vec![http_route];
    }

    let (supported, unsupported): (Vec<_>, Vec<_>) = requested.iter().partition(|k| {
        k.group.as_deref().unwrap_or(GATEWAY_API_GROUP) == GATEWAY_API_GROUP
            && k.kind == HTTP_ROUTE_KIND
    });

    if !unsupported.is_empty() {
        let names: Vec<&str> = unsupported.iter().map(|k| k.kind.as_str()).collect();
        let message = format!(
            "allowedRoutes.kinds: unsupported route kinds: {}",
            names.join(", ")
        );
        let conditions = conditions::listener_invalid_route_kinds(message, supported.is_empty());
        if supported.is_empty() {
            b.invalidate(conditions);
        } else {
            b.conditions.extend(conditions);
        }
    }

    if supported.is_empty() {
        Vec::new()
    } else {
        vec![http_route]
    }
}

fn resolve_allowed_namespaces(
    listener: &Listener,
    state: &ClusterState,
    b: &mut ListenerBuilder,
    referenced: &mut ReferencedResources,
) -> AllowedNamespaces {
    let namespaces = listener
        .allowed_routes
        .as_ref()
        .and_then(|a| a.namespaces.as_ref());

    match namespaces.and_then(|n| n.from) {
        None | Some(FromNamespaces::Same) => AllowedNamespaces::Same,
        Some(FromNamespaces::All) => AllowedNamespaces::All,
        Some(FromNamespaces::Selector) => {
            let Some(selector) = namespaces.and_then(|n| n.selector.as_ref()) else {
                b.invalidate(conditions::listener_unsupported_value(
                    "allowedRoutes.namespaces.selector: selector is required when from is Selector",
                ));
                return AllowedNamespaces::Same;
            };

            if let Err(message) = validate_selector(selector) {
                b.invalidate(conditions::listener_unsupported_value(format!(
                    "allowedRoutes.namespaces.selector: {}",
                    message
                )));
                return AllowedNamespaces::Same;
            }

            referenced.namespace_selectors.push(selector.clone());
            for (key, ns) in &state.namespaces {
                if selector_matches(selector, ns.metadata.labels.as_ref()) {
                    referenced.namespaces.insert(key.clone());
                }
            }
            AllowedNamespaces::Selector(selector.clone())
        }
    }
}

fn resolve_certificate(
    gateway_name: &NamespacedName,
    listener: &Listener,
    state: &ClusterState,
    grants: &ReferenceGrantResolver<'_>,
    secrets: &dyn SecretRequester,
    b: &mut ListenerBuilder,
    referenced: &mut ReferencedResources,
) -> Option<ListenerCertificate> {
    let tls = listener.tls.as_ref()?;

    if tls.mode == Some(TlsMode::Passthrough) {
        b.invalidate(conditions::listener_unsupported_value(
            "tls.mode: Passthrough is not supported",
        ));
        return None;
    }

    let [cert_ref] = tls.certificate_refs.as_slice() else {
        b.invalidate(conditions::listener_invalid_certificate_ref(
            "tls.certificateRefs: exactly one certificate reference is required",
        ));
        return None;
    };

    let group = cert_ref.group.as_deref().unwrap_or_default();
    let kind = cert_ref.kind.as_deref().unwrap_or("Secret");
    if !group.is_empty() || kind != "Secret" {
        b.invalidate(conditions::listener_invalid_certificate_ref(format!(
            "tls.certificateRefs[0]: unsupported reference {}/{}, only core Secrets are supported",
            group, kind
        )));
        return None;
    }

    let namespace = cert_ref
        .namespace
        .as_deref()
        .unwrap_or(&gateway_name.namespace);
    let secret_name = NamespacedName::new(namespace, cert_ref.name.as_str());
    referenced.secrets.insert(secret_name.clone());

    let from = ReferenceFrom {
        group: GATEWAY_API_GROUP,
        kind: "Gateway",
        namespace: &gateway_name.namespace,
    };
    let to = ReferenceTo {
        group: "",
        kind: "Secret",
        namespace: &secret_name.namespace,
        name: &secret_name.name,
    };
    if !grants.permits(from, to) {
        b.invalidate(conditions::listener_ref_not_permitted(format!(
            "tls.certificateRefs[0]: reference to {} is not permitted by any ReferenceGrant",
            secret_name
        )));
        return None;
    }

    let Some(secret) = state.secrets.get(&secret_name) else {
        b.invalidate(conditions::listener_invalid_certificate_ref(format!(
            "tls.certificateRefs[0]: Secret {} does not exist",
            secret_name
        )));
        return None;
    };

    if !b.valid {
        return None;
    }

    match secrets.request(&secret_name, secret, SecretKind::TlsKeyPair) {
        Ok(path) => Some(ListenerCertificate {
            secret: secret_name,
            path,
        }),
        Err(e) => {
            b.invalidate(conditions::listener_invalid_certificate_ref(format!(
                "tls.certificateRefs[0]: {}",
                e
            )));
            None
        }
    }
}

/// Invalidate colliding listeners in two passes: first every listener on a
/// port shared by more than one protocol, then every listener whose
/// (port, hostname) pair is not unique.
fn detect_conflicts(listeners: &mut [ListenerNode]) {
    let mut protocols_by_port: BTreeMap<i32, BTreeSet<String>> = BTreeMap::new();
    for l in listeners.iter() {
        protocols_by_port
            .entry(l.source.port)
            .or_default()
            .insert(l.source.protocol.clone());
    }

    let mut protocol_conflicted = vec![false; listeners.len()];
    for (i, l) in listeners.iter_mut().enumerate() {
        if protocols_by_port[&l.source.port].len() > 1 {
            l.invalidate(conditions::listener_protocol_conflict());
            protocol_conflicted[i] = true;
        }
    }

    let mut by_host: BTreeMap<(i32, String), Vec<usize>> = BTreeMap::new();
    for (i, l) in listeners.iter().enumerate() {
        if protocol_conflicted[i] {
            continue;
        }
        let host = l.hostname().unwrap_or_default().to_string();
        by_host.entry((l.source.port, host)).or_default().push(i);
    }

    for members in by_host.values().filter(|members| members.len() > 1) {
        for &i in members {
            listeners[i].invalidate(conditions::listener_hostname_conflict());
        }
    }
}

/// Check the operators and values of a label selector.
pub fn validate_selector(selector: &LabelSelector) -> Result<(), String> {
    for expr in selector.match_expressions.iter().flatten() {
        let values = expr.values.as_deref().unwrap_or_default();
        match expr.operator.as_str() {
            "In" | "NotIn" if values.is_empty() => {
                return Err(format!(
                    "operator {} on key {} requires at least one value",
                    expr.operator, expr.key
                ));
            }
            "Exists" | "DoesNotExist" if !values.is_empty() => {
                return Err(format!(
                    "operator {} on key {} must not have values",
                    expr.operator, expr.key
                ));
            }
            "In" | "NotIn" | "Exists" | "DoesNotExist" => {}
            other => return Err(format!("unknown operator {}", other)),
        }
    }
    Ok(())
}

/// Label selector semantics. An empty selector matches everything.
pub fn selector_matches(
    selector: &LabelSelector,
    labels: Option<&BTreeMap<String, String>>,
) -> bool {
    let empty = BTreeMap::new();
    let labels = labels.unwrap_or(&empty);

    let labels_match = selector
        .match_labels
        .iter()
        .flatten()
        .all(|(key, value)| labels.get(key) == Some(value));

    let expressions_match = selector.match_expressions.iter().flatten().all(|expr| {
        let values = expr.values.as_deref().unwrap_or_default();
        let current = labels.get(&expr.key);
        match expr.operator.as_str() {
            "In" => current.is_some_and(|v| values.contains(v)),
            "NotIn" => current.map_or(true, |v| !values.contains(v)),
            "Exists" => current.is_some(),
            "DoesNotExist" => current.is_none(),
            _ => false,
        }
    });

    labels_match && expressions_match
}
