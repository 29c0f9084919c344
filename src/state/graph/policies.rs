//! BackendTLSPolicy attachment
//!
//! A valid policy attaches upstream TLS settings to every backend reference
//! of the Services it targets. When two valid policies target the same
//! Service the older one wins.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::resources::{age_key, BackendTlsPolicy, NamespacedName, GATEWAY_API_GROUP};
use crate::state::conditions::{self, Condition};
use crate::state::secrets::{SecretKind, SecretRequester};
use crate::state::store::ClusterState;
use crate::validation::{describe, validate_hostname};

use super::backend_refs::{BackendTls, TlsVerification};
use super::route::{ParentRefBinding, RouteNode};
use super::ReferencedResources;

/// Value of `wellKnownCACertificates` selecting the system trust store
pub const SYSTEM_CA_CERTIFICATES: &str = "System";

#[derive(Debug, Clone)]
pub struct PolicyNode {
    pub source: BackendTlsPolicy,
    pub name: NamespacedName,
    pub valid: bool,
    pub conflicted: bool,
    pub conditions: Vec<Condition>,
    /// Targeted Services that exist
    pub targets: Vec<NamespacedName>,
    /// Gateways of the Routes attached through a targeted Service
    pub ancestors: BTreeSet<NamespacedName>,
    pub tls: Option<BackendTls>,
}

impl PolicyNode {
    /// Policies whose targets do not exist receive no status.
    pub fn has_targets(&self) -> bool {
        !self.targets.is_empty()
    }
}

pub(super) fn build_backend_tls_policies(
    state: &ClusterState,
    routes: &mut BTreeMap<NamespacedName, RouteNode>,
    secrets: &dyn SecretRequester,
    referenced: &mut ReferencedResources,
) -> BTreeMap<NamespacedName, PolicyNode> {
    let mut policies: BTreeMap<NamespacedName, PolicyNode> = state
        .backend_tls_policies
        .iter()
        .map(|(key, policy)| {
            let node = build_policy(key, policy, state, secrets, referenced);
            (key.clone(), node)
        })
        .collect();

    resolve_conflicts(&mut policies);

    for policy in policies.values_mut() {
        attach(policy, routes);
    }

    policies
}

fn build_policy(
    name: &NamespacedName,
    policy: &BackendTlsPolicy,
    state: &ClusterState,
    secrets: &dyn SecretRequester,
    referenced: &mut ReferencedResources,
) -> PolicyNode {
    let mut conditions = Vec::new();
    let mut targets = Vec::new();

    for (idx, target) in policy.spec.target_refs.iter().enumerate() {
        match (target.group.as_str(), target.kind.as_str()) {
            ("", "Service") => {
                let service = NamespacedName::new(name.namespace.clone(), target.name.clone());
                // creating or deleting the Service decides whether the policy gets a status
                referenced.services.insert(service.clone());
                if state.services.contains_key(&service) {
                    targets.push(service);
                }
            }
            (GATEWAY_API_GROUP, kind @ ("Gateway" | "HTTPRoute")) => {
                conditions.push(conditions::policy_invalid(format!(
                    "spec.targetRefs[{}].kind: {} is not a supported target for BackendTLSPolicy",
                    idx, kind
                )));
            }
            (group, kind) => {
                conditions.push(conditions::policy_invalid(format!(
                    "spec.targetRefs[{}]: unknown target kind {}/{}",
                    idx, group, kind
                )));
            }
        }
    }

    let validation = &policy.spec.validation;
    if validation.hostname.is_empty() {
        conditions.push(conditions::policy_invalid(
            "spec.validation.hostname: hostname is required",
        ));
    } else if let Err(e) = validate_hostname(&validation.hostname) {
        conditions.push(conditions::policy_invalid(format!(
            "spec.validation.hostname: {}",
            describe(&e)
        )));
    }

    let verification = match (
        validation.ca_certificate_refs.as_slice(),
        validation.well_known_ca_certificates.as_deref(),
    ) {
        ([], None) => {
            conditions.push(conditions::policy_invalid(
                "spec.validation: one of caCertificateRefs or wellKnownCACertificates is required",
            ));
            None
        }
        ([_, ..], Some(_)) => {
            conditions.push(conditions::policy_invalid(
                "spec.validation: caCertificateRefs conflicts with wellKnownCACertificates",
            ));
            None
        }
        ([], Some(SYSTEM_CA_CERTIFICATES)) => Some(TlsVerification::SystemTrust),
        ([], Some(other)) => {
            conditions.push(conditions::policy_invalid(format!(
                "spec.validation.wellKnownCACertificates: {} is not supported, only {}",
                other, SYSTEM_CA_CERTIFICATES
            )));
            None
        }
        ([ca_ref], None) => {
            if ca_ref.group.is_empty() && ca_ref.kind == "Secret" {
                let secret_name =
                    NamespacedName::new(name.namespace.clone(), ca_ref.name.clone());
                referenced.secrets.insert(secret_name.clone());

                match state.secrets.get(&secret_name) {
                    None => {
                        conditions.push(conditions::policy_invalid(format!(
                            "spec.validation.caCertificateRefs[0]: Secret {} does not exist",
                            secret_name
                        )));
                        None
                    }
                    Some(_) if !conditions.is_empty() => None,
                    Some(secret) => {
                        match secrets.request(&secret_name, secret, SecretKind::CaBundle) {
                            Ok(path) => Some(TlsVerification::CaBundle(path)),
                            Err(e) => {
                                conditions.push(conditions::policy_invalid(format!(
                                    "spec.validation.caCertificateRefs[0]: {}",
                                    e
                                )));
                                None
                            }
                        }
                    }
                }
            } else {
                conditions.push(conditions::policy_invalid(format!(
                    "spec.validation.caCertificateRefs[0]: unsupported reference {}/{}",
                    ca_ref.group, ca_ref.kind
                )));
                None
            }
        }
        (_, None) => {
            conditions.push(conditions::policy_invalid(
                "spec.validation.caCertificateRefs: only one CA certificate is supported",
            ));
            None
        }
    };

    let valid = conditions.is_empty();
    let tls = verification
        .filter(|_| valid)
        .map(|verification| BackendTls {
            server_name: validation.hostname.clone(),
            verification,
            policy: name.clone(),
        });

    PolicyNode {
        source: policy.clone(),
        name: name.clone(),
        valid,
        conflicted: false,
        conditions,
        targets,
        ancestors: BTreeSet::new(),
        tls,
    }
}

/// Oldest valid policy claims its Services; later ones targeting a claimed
/// Service are conflicted.
fn resolve_conflicts(policies: &mut BTreeMap<NamespacedName, PolicyNode>) {
    let mut order: Vec<(NamespacedName, _)> = policies
        .iter()
        .filter(|(_, p)| p.valid)
        .map(|(key, p)| (key.clone(), age_key(&p.source.metadata)))
        .collect();
    order.sort_by(|a, b| a.1.cmp(&b.1));

    let mut claimed: BTreeMap<NamespacedName, NamespacedName> = BTreeMap::new();
    for (key, _) in order {
        let Some(policy) = policies.get_mut(&key) else {
            continue;
        };

        if let Some((service, owner)) = policy
            .targets
            .iter()
            .find_map(|t| claimed.get(t).map(|owner| (t, owner)))
        {
            let message = format!(
                "Service {} is already targeted by BackendTLSPolicy {}",
                service, owner
            );
            debug!(policy = %key, %message, "BackendTLSPolicy conflicted");
            policy
                .conditions
                .push(conditions::policy_conflicted(message));
            policy.conflicted = true;
            policy.valid = false;
            policy.tls = None;
            continue;
        }

        for target in &policy.targets {
            claimed.insert(target.clone(), key.clone());
        }
    }
}

fn attach(policy: &mut PolicyNode, routes: &mut BTreeMap<NamespacedName, RouteNode>) {
    for route in routes.values_mut() {
        let mut uses_target = false;

        for backend in route
            .rules
            .iter_mut()
            .flat_map(|rule| rule.backend_refs.iter_mut())
        {
            let Some(service) = backend.service.as_ref() else {
                continue;
            };
            if !policy.targets.contains(service) {
                continue;
            }
            uses_target = true;
            if backend.valid {
                if let Some(tls) = &policy.tls {
                    backend.tls = Some(tls.clone());
                }
            }
        }

        if uses_target {
            for parent in &route.parent_refs {
                if let ParentRefBinding::Attached(attachment) = &parent.binding {
                    if attachment.attached {
                        policy.ancestors.insert(parent.gateway.clone());
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::gateway_api::{
        BackendTlsPolicySpec, BackendTlsPolicyValidation, HttpRouteSpec, LocalObjectReference,
        LocalPolicyTargetReference,
    };
    use crate::resources::{HttpRoute, ObjectMeta, Resource, Secret, Service};
    use crate::state::graph::{Attachment, BackendRefNode, ParentRefNode, RuleNode};
    use crate::state::secrets::SecretError;
    use chrono::{TimeZone, Utc};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use std::path::PathBuf;

    struct FixedPath;

    impl SecretRequester for FixedPath {
        fn request(
            &self,
            name: &NamespacedName,
            _: &Secret,
            _: SecretKind,
        ) -> std::result::Result<PathBuf, SecretError> {
            Ok(PathBuf::from(format!(
                "/secrets/{}_{}.pem",
                name.namespace, name.name
            )))
        }
    }

    fn meta(name: &str, created_secs: i64) -> ObjectMeta {
        ObjectMeta {
            namespace: Some("default".into()),
            name: Some(name.into()),
            creation_timestamp: Some(Time(Utc.timestamp_opt(created_secs, 0).unwrap())),
            ..Default::default()
        }
    }

    fn policy(name: &str, created_secs: i64, target_kind: &str) -> BackendTlsPolicy {
        let group = if target_kind == "Service" {
            String::new()
        } else {
            GATEWAY_API_GROUP.into()
        };

        BackendTlsPolicy {
            metadata: meta(name, created_secs),
            spec: BackendTlsPolicySpec {
                target_refs: vec![LocalPolicyTargetReference {
                    group,
                    kind: target_kind.into(),
                    name: "secure".into(),
                    section_name: None,
                }],
                validation: BackendTlsPolicyValidation {
                    ca_certificate_refs: Vec::new(),
                    well_known_ca_certificates: Some(SYSTEM_CA_CERTIFICATES.into()),
                    hostname: "secure.example.com".into(),
                },
            },
        }
    }

    fn state_with(policies: Vec<BackendTlsPolicy>) -> ClusterState {
        let mut state = ClusterState::new();
        state.upsert(Resource::Service(Service {
            metadata: meta("secure", 0),
            ..Default::default()
        }));
        for p in policies {
            state.upsert(Resource::BackendTlsPolicy(p));
        }
        state
    }

    fn build(state: &ClusterState) -> (BTreeMap<NamespacedName, PolicyNode>, ReferencedResources) {
        let mut routes = BTreeMap::new();
        let mut referenced = ReferencedResources::default();
        let policies = build_backend_tls_policies(state, &mut routes, &FixedPath, &mut referenced);
        (policies, referenced)
    }

    fn route_to_secure(gateway: &str, attached: bool) -> RouteNode {
        RouteNode {
            source: HttpRoute {
                metadata: meta("route", 0),
                spec: HttpRouteSpec::default(),
            },
            name: NamespacedName::new("default", "route"),
            hostnames: Vec::new(),
            parent_refs: vec![ParentRefNode {
                idx: 0,
                gateway: NamespacedName::new("default", gateway),
                section_name: None,
                port: None,
                binding: ParentRefBinding::Attached(Attachment {
                    attached,
                    failed_condition: None,
                    accepted_hostnames: BTreeMap::new(),
                }),
            }],
            rules: vec![RuleNode {
                valid_matches: true,
                valid_filters: true,
                matches: Vec::new(),
                filters: Vec::new(),
                backend_refs: vec![BackendRefNode {
                    service: Some(NamespacedName::new("default", "secure")),
                    port: Some(443),
                    weight: 1,
                    valid: true,
                    tls: None,
                }],
            }],
            valid: true,
            conditions: Vec::new(),
        }
    }

    #[test]
    fn system_trust_policy_is_valid() {
        let (policies, _) = build(&state_with(vec![policy("tls", 10, "Service")]));
        let node = &policies[&NamespacedName::new("default", "tls")];
        assert!(node.valid, "{:?}", node.conditions);
        assert!(node.has_targets());
        assert_eq!(
            node.tls.as_ref().unwrap().verification,
            TlsVerification::SystemTrust
        );
    }

    #[test]
    fn unsupported_target_kinds_are_invalid() {
        let (policies, _) = build(&state_with(vec![policy("gw-tls", 10, "Gateway")]));
        let node = &policies[&NamespacedName::new("default", "gw-tls")];
        assert!(!node.valid);
        assert!(!node.has_targets());
    }

    #[test]
    fn missing_target_service_is_still_referenced() {
        let mut p = policy("tls", 10, "Service");
        p.spec.target_refs[0].name = "tea".into();

        let (policies, referenced) = build(&state_with(vec![p]));
        assert!(!policies[&NamespacedName::new("default", "tls")].has_targets());
        assert!(referenced
            .services
            .contains(&NamespacedName::new("default", "tea")));
    }

    #[test]
    fn older_policy_wins_conflict() {
        let (policies, _) = build(&state_with(vec![
            policy("newer", 20, "Service"),
            policy("older", 10, "Service"),
        ]));

        assert!(policies[&NamespacedName::new("default", "older")].valid);
        let newer = &policies[&NamespacedName::new("default", "newer")];
        assert!(newer.conflicted);
        assert_eq!(newer.conditions[0].reason, conditions::REASON_CONFLICTED);
    }

    #[test]
    fn ancestors_only_include_attached_parents() {
        let state = state_with(vec![policy("tls", 10, "Service")]);
        let mut routes = BTreeMap::from([(
            NamespacedName::new("default", "route"),
            route_to_secure("gateway", true),
        )]);
        let mut failed = route_to_secure("other", false);
        failed.name = NamespacedName::new("default", "failed");
        routes.insert(failed.name.clone(), failed);

        let mut referenced = ReferencedResources::default();
        let policies = build_backend_tls_policies(&state, &mut routes, &FixedPath, &mut referenced);

        let node = &policies[&NamespacedName::new("default", "tls")];
        assert_eq!(
            node.ancestors,
            BTreeSet::from([NamespacedName::new("default", "gateway")])
        );
        let backend = &routes[&NamespacedName::new("default", "route")].rules[0].backend_refs[0];
        let tls = backend.tls.as_ref().unwrap();
        assert_eq!(tls.server_name, "secure.example.com");
    }

    #[test]
    fn ca_secret_reference_is_resolved_and_recorded() {
        let mut p = policy("tls", 10, "Service");
        p.spec.validation.well_known_ca_certificates = None;
        p.spec.validation.ca_certificate_refs = vec![LocalObjectReference {
            group: String::new(),
            kind: "Secret".into(),
            name: "ca".into(),
        }];

        let mut state = state_with(vec![p]);
        let (policies, referenced) = build(&state);
        let node = &policies[&NamespacedName::new("default", "tls")];
        assert!(!node.valid);
        assert!(referenced
            .secrets
            .contains(&NamespacedName::new("default", "ca")));

        state.upsert(Resource::Secret(Secret {
            metadata: meta("ca", 0),
            ..Default::default()
        }));
        let (policies, _) = build(&state);
        let node = &policies[&NamespacedName::new("default", "tls")];
        assert_eq!(
            node.tls.as_ref().unwrap().verification,
            TlsVerification::CaBundle(PathBuf::from("/secrets/default_ca.pem"))
        );
    }

    #[test]
    fn requires_exactly_one_trust_source() {
        let mut p = policy("tls", 10, "Service");
        p.spec.validation.well_known_ca_certificates = None;
        let (policies, _) = build(&state_with(vec![p]));
        assert!(!policies[&NamespacedName::new("default", "tls")].valid);
    }
}
