//! Status Builder
//!
//! Default positive conditions are merged with the negative ones recorded on
//! the graph; [`deduplicate`] keeps the last condition of each type, so
//! recorded failures always override defaults and apply outcomes.

use std::collections::BTreeMap;

use crate::resources::{generation, NamespacedName};
use crate::state::conditions::{self, deduplicate, Condition};
use crate::state::graph::{
    GatewayClassEntry, GatewayEntry, GatewayNode, Graph, IgnoreReason, ListenerNode,
    ParentRefBinding, PolicyNode, RouteNode,
};

use super::{
    AncestorStatus, ApplyOutcome, GatewayClassStatus, GatewayStatus, HttpRouteStatus,
    ListenerStatus, ParentStatus, PolicyStatus, Statuses,
};

/// Build statuses for every resource the controller is responsible for.
pub fn build_statuses(graph: &Graph, outcome: &ApplyOutcome) -> Statuses {
    // every class in the graph is owned by this controller
    let controller_name = graph
        .gateway_classes
        .values()
        .next()
        .map(|entry| entry.source().spec.controller_name.clone())
        .unwrap_or_default();

    Statuses {
        gateway_classes: gateway_class_statuses(graph),
        gateways: gateway_statuses(graph, outcome),
        http_routes: graph
            .routes
            .iter()
            .map(|(name, route)| (name.clone(), route_status(route, &controller_name)))
            .collect(),
        backend_tls_policies: graph
            .backend_tls_policies
            .iter()
            .filter(|(_, policy)| policy.has_targets())
            .map(|(name, policy)| (name.clone(), policy_status(policy, &controller_name)))
            .collect(),
    }
}

fn gateway_class_statuses(graph: &Graph) -> BTreeMap<NamespacedName, GatewayClassStatus> {
    graph
        .gateway_classes
        .iter()
        .map(|(name, entry)| {
            let conditions = match entry {
                GatewayClassEntry::Active(node) => {
                    let mut conditions = conditions::gateway_class_defaults();
                    conditions.extend(node.conditions.iter().cloned());
                    deduplicate(conditions)
                }
                GatewayClassEntry::Ignored { .. } => vec![conditions::gateway_class_conflict()],
            };
            let status = GatewayClassStatus {
                observed_generation: generation(&entry.source().metadata),
                conditions,
            };
            (name.clone(), status)
        })
        .collect()
}

fn gateway_statuses(
    graph: &Graph,
    outcome: &ApplyOutcome,
) -> BTreeMap<NamespacedName, GatewayStatus> {
    graph
        .gateways
        .iter()
        .map(|(name, entry)| {
            let status = match entry {
                GatewayEntry::Active(node) => active_gateway_status(node, outcome),
                GatewayEntry::Ignored { source, reason } => {
                    let conditions = match reason {
                        IgnoreReason::GatewayConflict => conditions::gateway_conflict(),
                        IgnoreReason::GatewayClassIgnored => conditions::gateway_invalid(format!(
                            "GatewayClass {} is ignored by the controller",
                            source.spec.gateway_class_name
                        )),
                        other => {
                            conditions::gateway_invalid(format!("Gateway is ignored: {}", other))
                        }
                    };
                    GatewayStatus {
                        observed_generation: generation(&source.metadata),
                        conditions,
                        listeners: Vec::new(),
                    }
                }
            };
            (name.clone(), status)
        })
        .collect()
}

/// Programmed condition contributed by the apply outcome, if any.
fn outcome_condition(outcome: &ApplyOutcome, listener: Option<&str>) -> Option<Condition> {
    match outcome {
        ApplyOutcome::Pending => Some(conditions::programmed_pending()),
        ApplyOutcome::Succeeded => None,
        ApplyOutcome::Failed { message } => {
            Some(conditions::gateway_not_programmed(message.clone()))
        }
        ApplyOutcome::Partial {
            message,
            failed_listeners,
        } => {
            let failed = listener.is_some_and(|name| failed_listeners.contains(name));
            failed.then(|| conditions::gateway_not_programmed(message.clone()))
        }
    }
}

fn active_gateway_status(gateway: &GatewayNode, outcome: &ApplyOutcome) -> GatewayStatus {
    let mut conditions = conditions::gateway_defaults();
    if gateway.valid {
        conditions.extend(outcome_condition(outcome, None));
    }
    conditions.extend(gateway.conditions.iter().cloned());

    GatewayStatus {
        observed_generation: generation(&gateway.source.metadata),
        conditions: deduplicate(conditions),
        listeners: gateway
            .listeners
            .iter()
            .map(|l| listener_status(l, gateway, outcome))
            .collect(),
    }
}

fn listener_status(
    listener: &ListenerNode,
    gateway: &GatewayNode,
    outcome: &ApplyOutcome,
) -> ListenerStatus {
    let mut conditions = conditions::listener_defaults();
    if !gateway.valid {
        conditions.push(conditions::gateway_not_programmed("Gateway is invalid"));
    } else if listener.valid {
        conditions.extend(outcome_condition(outcome, Some(&listener.name)));
    }
    conditions.extend(listener.conditions.iter().cloned());

    ListenerStatus {
        name: listener.name.clone(),
        attached_routes: listener.routes.len(),
        supported_kinds: listener.supported_kinds.clone(),
        conditions: deduplicate(conditions),
    }
}

fn route_status(route: &RouteNode, controller_name: &str) -> HttpRouteStatus {
    let parents = route
        .parent_refs
        .iter()
        .filter_map(|parent| {
            let failure = match &parent.binding {
                ParentRefBinding::Attached(attachment) => attachment.failed_condition.clone(),
                ParentRefBinding::Ignored(IgnoreReason::GatewayIgnored) => {
                    Some(conditions::route_gateway_ignored())
                }
                // not ours to report on
                ParentRefBinding::Ignored(_) => return None,
            };

            let mut conditions = conditions::route_defaults();
            conditions.extend(route.conditions.iter().cloned());
            conditions.extend(failure);

            Some(ParentStatus {
                gateway: parent.gateway.clone(),
                section_name: parent.section_name.clone(),
                controller_name: controller_name.to_string(),
                conditions: deduplicate(conditions),
            })
        })
        .collect();

    HttpRouteStatus {
        observed_generation: generation(&route.source.metadata),
        parents,
    }
}

fn policy_status(policy: &PolicyNode, controller_name: &str) -> PolicyStatus {
    let mut conditions = conditions::policy_defaults();
    conditions.extend(policy.conditions.iter().cloned());
    let conditions = deduplicate(conditions);

    PolicyStatus {
        observed_generation: generation(&policy.source.metadata),
        ancestors: policy
            .ancestors
            .iter()
            .map(|gateway| AncestorStatus {
                gateway: gateway.clone(),
                controller_name: controller_name.to_string(),
                conditions: conditions.clone(),
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::{Resource, Secret};
    use crate::state::conditions::{
        ConditionStatus, REASON_GATEWAY_CONFLICT, REASON_GATEWAY_IGNORED, REASON_NO_MATCHING_PARENT,
        REASON_PENDING, TYPE_ACCEPTED, TYPE_PROGRAMMED,
    };
    use crate::state::graph::{build_graph, BuildContext};
    use crate::state::secrets::{SecretError, SecretKind, SecretRequester};
    use crate::state::statuses::find_condition;
    use crate::state::store::ClusterState;
    use serde::Deserialize;
    use std::collections::BTreeSet;
    use std::path::PathBuf;

    struct FixedPath;

    impl SecretRequester for FixedPath {
        fn request(
            &self,
            name: &NamespacedName,
            _: &Secret,
            _: SecretKind,
        ) -> std::result::Result<PathBuf, SecretError> {
            Ok(PathBuf::from(format!("/secrets/{}_{}.pem", name.namespace, name.name)))
        }
    }

    const MANIFESTS: &str = r#"
apiVersion: gateway.networking.k8s.io/v1
kind: GatewayClass
metadata:
  name: flowgate
  generation: 1
spec:
  controllerName: example.com/flowgate
---
apiVersion: gateway.networking.k8s.io/v1
kind: Gateway
metadata:
  name: gateway
  namespace: default
  generation: 3
  creationTimestamp: "2024-01-01T00:00:00Z"
spec:
  gatewayClassName: flowgate
  listeners:
    - name: http
      port: 80
      protocol: HTTP
    - name: tcp
      port: 8080
      protocol: TCP
---
apiVersion: gateway.networking.k8s.io/v1
kind: Gateway
metadata:
  name: late
  namespace: default
  creationTimestamp: "2024-06-01T00:00:00Z"
spec:
  gatewayClassName: flowgate
  listeners:
    - name: http
      port: 80
      protocol: HTTP
---
apiVersion: gateway.networking.k8s.io/v1
kind: HTTPRoute
metadata:
  name: route
  namespace: default
  generation: 7
spec:
  parentRefs:
    - name: gateway
    - name: gateway
      sectionName: missing
    - name: late
    - name: elsewhere
  rules:
    - matches:
        - path:
            type: PathPrefix
            value: /
"#;

    fn graph() -> Graph {
        let mut state = ClusterState::new();
        for doc in serde_yaml::Deserializer::from_str(MANIFESTS) {
            let value = serde_yaml::Value::deserialize(doc).unwrap();
            state.upsert(Resource::from_manifest(value).unwrap());
        }
        let ctx = BuildContext::new("example.com/flowgate");
        build_graph(&state, &ctx, &FixedPath).unwrap()
    }

    fn condition<'a>(conditions: &'a [Condition], type_: &str) -> &'a Condition {
        find_condition(conditions, type_).unwrap_or_else(|| panic!("missing {} condition", type_))
    }

    #[test]
    fn pending_outcome_marks_programmed_unknown() {
        let statuses = build_statuses(&graph(), &ApplyOutcome::Pending);
        let gateway = &statuses.gateways[&NamespacedName::new("default", "gateway")];
        assert_eq!(gateway.observed_generation, 3);
        let programmed = condition(&gateway.conditions, TYPE_PROGRAMMED);
        assert_eq!(programmed.reason, REASON_PENDING);

        let http = gateway.listener("http").unwrap();
        assert_eq!(http.attached_routes, 1);
        let programmed = condition(&http.conditions, TYPE_PROGRAMMED);
        assert_eq!(programmed.reason, REASON_PENDING);

        // recorded failure wins over the outcome
        let tcp = gateway.listener("tcp").unwrap();
        let programmed = condition(&tcp.conditions, TYPE_PROGRAMMED);
        assert_eq!(programmed.status, ConditionStatus::False);
    }

    #[test]
    fn partial_outcome_only_fails_named_listeners() {
        let outcome = ApplyOutcome::Partial {
            message: "reload failed".into(),
            failed_listeners: BTreeSet::from(["http".to_string()]),
        };
        let statuses = build_statuses(&graph(), &outcome);
        let gateway = &statuses.gateways[&NamespacedName::new("default", "gateway")];

        assert!(condition(&gateway.conditions, TYPE_PROGRAMMED).is_true());
        let http = gateway.listener("http").unwrap();
        let programmed = condition(&http.conditions, TYPE_PROGRAMMED);
        assert_eq!(programmed.status, ConditionStatus::False);
        assert_eq!(programmed.message, "reload failed");
    }

    #[test]
    fn failed_outcome_fails_gateway() {
        let outcome = ApplyOutcome::Failed {
            message: "proxy rejected configuration".into(),
        };
        let statuses = build_statuses(&graph(), &outcome);
        let gateway = &statuses.gateways[&NamespacedName::new("default", "gateway")];
        let programmed = condition(&gateway.conditions, TYPE_PROGRAMMED);
        assert_eq!(programmed.status, ConditionStatus::False);
    }

    #[test]
    fn ignored_gateway_reports_conflict() {
        let statuses = build_statuses(&graph(), &ApplyOutcome::Succeeded);
        let late = &statuses.gateways[&NamespacedName::new("default", "late")];
        let accepted = condition(&late.conditions, TYPE_ACCEPTED);
        assert_eq!(accepted.reason, REASON_GATEWAY_CONFLICT);
        assert!(late.listeners.is_empty());
    }

    #[test]
    fn route_parents_carry_individual_outcomes() {
        let statuses = build_statuses(&graph(), &ApplyOutcome::Succeeded);
        let route = &statuses.http_routes[&NamespacedName::new("default", "route")];
        assert_eq!(route.observed_generation, 7);
        // the uncontrolled parent gets no entry
        assert_eq!(route.parents.len(), 3);

        assert!(condition(&route.parents[0].conditions, TYPE_ACCEPTED).is_true());
        assert_eq!(route.parents[0].controller_name, "example.com/flowgate");
        assert_eq!(
            condition(&route.parents[1].conditions, TYPE_ACCEPTED).reason,
            REASON_NO_MATCHING_PARENT
        );
        let late = NamespacedName::new("default", "late");
        assert_eq!(route.parents[2].gateway, late);
        assert_eq!(
            condition(&route.parents[2].conditions, TYPE_ACCEPTED).reason,
            REASON_GATEWAY_IGNORED
        );
    }

    #[test]
    fn gateway_class_status() {
        let statuses = build_statuses(&graph(), &ApplyOutcome::Succeeded);
        let class = &statuses.gateway_classes[&NamespacedName::cluster_scoped("flowgate")];
        assert_eq!(class.observed_generation, 1);
        assert!(condition(&class.conditions, TYPE_ACCEPTED).is_true());
    }
}
