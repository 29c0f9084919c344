use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::resources::{creation_time, Gateway, NamespacedName};
use crate::state::conditions::{self, Condition};
use crate::state::secrets::SecretRequester;
use crate::state::store::ClusterState;

use super::gateway_class::GatewayClassNode;
use super::listener::{self, ListenerNode};
use super::{BuildContext, IgnoreReason, ReferenceGrantResolver, ReferencedResources};

/// Deployment overrides requested through `spec.infrastructure`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProxyOverrides {
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct GatewayNode {
    pub source: Gateway,
    pub name: NamespacedName,
    pub listeners: Vec<ListenerNode>,
    pub valid: bool,
    pub conditions: Vec<Condition>,
    pub overrides: ProxyOverrides,
}

impl GatewayNode {
    pub fn listener(&self, name: &str) -> Option<&ListenerNode> {
        self.listeners.iter().find(|l| l.name == name)
    }
}

#[derive(Debug, Clone)]
pub enum GatewayEntry {
    Active(GatewayNode),
    Ignored {
        source: Gateway,
        reason: IgnoreReason,
    },
}

impl GatewayEntry {
    pub fn source(&self) -> &Gateway {
        match self {
            GatewayEntry::Active(node) => &node.source,
            GatewayEntry::Ignored { source, .. } => source,
        }
    }
}

/// Select the winning Gateway of the active class and build it.
///
/// Gateways of other classes owned by this controller are ignored; Gateways
/// of unrelated classes are left out of the graph entirely.
pub(super) fn build_gateways(
    state: &ClusterState,
    active_class: Option<&GatewayClassNode>,
    ignored_classes: &BTreeSet<&str>,
    ctx: &BuildContext,
    grants: &ReferenceGrantResolver<'_>,
    secrets: &dyn SecretRequester,
    referenced: &mut ReferencedResources,
) -> BTreeMap<NamespacedName, GatewayEntry> {
    let mut entries = BTreeMap::new();

    for (key, gateway) in &state.gateways {
        if ignored_classes.contains(gateway.spec.gateway_class_name.as_str()) {
            entries.insert(
                key.clone(),
                GatewayEntry::Ignored {
                    source: gateway.clone(),
                    reason: IgnoreReason::GatewayClassIgnored,
                },
            );
        }
    }

    let Some(class) = active_class else {
        return entries;
    };

    let candidates: Vec<(&NamespacedName, &Gateway)> = state
        .gateways
        .iter()
        .filter(|(_, gw)| gw.spec.gateway_class_name == class.name.name)
        .collect();

    let winner = candidates
        .iter()
        .min_by_key(|(key, gw)| (creation_time(&gw.metadata), (*key).clone()))
        .map(|(key, _)| (*key).clone());

    for (key, gateway) in candidates {
        let entry = if Some(key) == winner.as_ref() {
            GatewayEntry::Active(build_gateway(
                key, gateway, class, ctx, state, grants, secrets, referenced,
            ))
        } else {
            GatewayEntry::Ignored {
                source: gateway.clone(),
                reason: IgnoreReason::GatewayConflict,
            }
        };
        entries.insert(key.clone(), entry);
    }

    entries
}

#[allow(clippy::too_many_arguments)]
fn build_gateway(
    name: &NamespacedName,
    gateway: &Gateway,
    class: &GatewayClassNode,
    ctx: &BuildContext,
    state: &ClusterState,
    grants: &ReferenceGrantResolver<'_>,
    secrets: &dyn SecretRequester,
    referenced: &mut ReferencedResources,
) -> GatewayNode {
    let mut conditions = Vec::new();

    if !class.valid {
        conditions.extend(conditions::gateway_invalid("GatewayClass is invalid"));
    }
    if !gateway.spec.addresses.is_empty() {
        conditions.extend(conditions::gateway_unsupported_address());
    }

    let listeners =
        listener::build_listeners(name, gateway, ctx, state, grants, secrets, referenced);

    let overrides = gateway
        .spec
        .infrastructure
        .as_ref()
        .map(|infra| ProxyOverrides {
            labels: infra.labels.clone(),
            annotations: infra.annotations.clone(),
        })
        .unwrap_or_default();

    GatewayNode {
        source: gateway.clone(),
        name: name.clone(),
        listeners,
        valid: conditions.is_empty(),
        conditions,
        overrides,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::gateway_api::{GatewayAddress, GatewayClassSpec, GatewaySpec};
    use crate::resources::{GatewayClass, ObjectMeta, Resource, Secret};
    use crate::state::secrets::{SecretError, SecretKind};
    use chrono::{TimeZone, Utc};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use std::path::PathBuf;

    struct NoSecrets;

    impl SecretRequester for NoSecrets {
        fn request(
            &self,
            name: &NamespacedName,
            _: &Secret,
            _: SecretKind,
        ) -> std::result::Result<PathBuf, SecretError> {
            Err(SecretError::MissingKey {
                name: name.clone(),
                key: "tls.crt",
            })
        }
    }

    fn class_node(valid: bool) -> GatewayClassNode {
        GatewayClassNode {
            source: GatewayClass {
                metadata: ObjectMeta {
                    name: Some("flowgate".into()),
                    ..Default::default()
                },
                spec: GatewayClassSpec {
                    controller_name: "example.com/flowgate".into(),
                    ..Default::default()
                },
            },
            name: NamespacedName::cluster_scoped("flowgate"),
            valid,
            conditions: Vec::new(),
        }
    }

    fn gateway(name: &str, class: &str, created_secs: i64) -> Resource {
        Resource::Gateway(Gateway {
            metadata: ObjectMeta {
                namespace: Some("default".into()),
                name: Some(name.into()),
                creation_timestamp: Some(Time(Utc.timestamp_opt(created_secs, 0).unwrap())),
                ..Default::default()
            },
            spec: GatewaySpec {
                gateway_class_name: class.into(),
                ..Default::default()
            },
        })
    }

    fn build(
        state: &ClusterState,
        class: Option<&GatewayClassNode>,
        ignored: &BTreeSet<&str>,
    ) -> BTreeMap<NamespacedName, GatewayEntry> {
        let grants = ReferenceGrantResolver::new(&state.reference_grants);
        let ctx = BuildContext::new("example.com/flowgate");
        let mut referenced = ReferencedResources::default();
        build_gateways(
            state,
            class,
            ignored,
            &ctx,
            &grants,
            &NoSecrets,
            &mut referenced,
        )
    }

    #[test]
    fn oldest_gateway_wins_and_others_conflict() {
        let mut state = ClusterState::new();
        state.upsert(gateway("newer", "flowgate", 200));
        state.upsert(gateway("older", "flowgate", 100));
        state.upsert(gateway("unrelated", "other", 50));

        let class = class_node(true);
        let entries = build(&state, Some(&class), &BTreeSet::new());

        assert_eq!(entries.len(), 2);
        let older = NamespacedName::new("default", "older");
        let newer = NamespacedName::new("default", "newer");
        assert!(matches!(entries[&older], GatewayEntry::Active(_)));
        assert!(matches!(
            entries[&newer],
            GatewayEntry::Ignored {
                reason: IgnoreReason::GatewayConflict,
                ..
            }
        ));
    }

    #[test]
    fn gateways_of_ignored_classes_are_ignored() {
        let mut state = ClusterState::new();
        state.upsert(gateway("legacy", "old-class", 100));

        let ignored = BTreeSet::from(["old-class"]);
        let entries = build(&state, None, &ignored);
        let legacy = NamespacedName::new("default", "legacy");
        assert!(matches!(
            entries[&legacy],
            GatewayEntry::Ignored {
                reason: IgnoreReason::GatewayClassIgnored,
                ..
            }
        ));
    }

    #[test]
    fn invalid_class_and_addresses_invalidate_gateway() {
        let mut state = ClusterState::new();
        let Resource::Gateway(mut gw) = gateway("gw", "flowgate", 100) else {
            unreachable!()
        };
        gw.spec.addresses = vec![GatewayAddress {
            type_: None,
            value: "10.0.0.1".into(),
        }];
        state.upsert(Resource::Gateway(gw));

        let class = class_node(false);
        let entries = build(&state, Some(&class), &BTreeSet::new());
        let GatewayEntry::Active(node) = &entries[&NamespacedName::new("default", "gw")] else {
            panic!("expected active gateway")
        };
        assert!(!node.valid);
        let reasons: Vec<_> = node.conditions.iter().map(|c| c.reason.as_str()).collect();
        assert!(reasons.contains(&conditions::REASON_INVALID));
        assert!(reasons.contains(&conditions::REASON_UNSUPPORTED_ADDRESS));
    }
}
