use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::errors::{FlowgateError, Result};
use crate::resources::gateway_api::{
    HttpHeaderFilter, HttpPathMatch, HttpRouteFilter, HttpRouteFilterType, HttpRouteMatch,
    HttpRouteRule, PathMatchType, StringMatchType,
};
use crate::resources::{HttpRoute, NamespacedName, GATEWAY_API_GROUP};
use crate::state::conditions::{self, Condition};
use crate::state::store::ClusterState;
use crate::validation::{describe, validate_hostname, HttpFieldsValidator};

use super::backend_refs::{self, BackendRefNode};
use super::gateway::GatewayNode;
use super::listener::HTTP_ROUTE_KIND;
use super::{
    BuildContext, IgnoreReason, ReferenceGrantResolver, ReferencedResources, WILDCARD_HOSTNAME,
};

/// Outcome of binding one ParentRef to the active Gateway
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Attachment {
    pub attached: bool,
    pub failed_condition: Option<Condition>,
    /// Listener name → hostnames accepted on that listener
    pub accepted_hostnames: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParentRefBinding {
    /// Targets the active Gateway; carries the binding outcome
    Attached(Attachment),
    Ignored(IgnoreReason),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParentRefNode {
    /// Index into `spec.parentRefs`
    pub idx: usize,
    pub gateway: NamespacedName,
    pub section_name: Option<String>,
    pub port: Option<i32>,
    pub binding: ParentRefBinding,
}

impl ParentRefNode {
    /// Binding outcome when this ref targets the active Gateway
    pub fn attachment(&self) -> Option<&Attachment> {
        match &self.binding {
            ParentRefBinding::Attached(attachment) => Some(attachment),
            ParentRefBinding::Ignored(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RuleNode {
    pub valid_matches: bool,
    pub valid_filters: bool,
    /// Matches with admission defaults applied
    pub matches: Vec<HttpRouteMatch>,
    pub filters: Vec<HttpRouteFilter>,
    pub backend_refs: Vec<BackendRefNode>,
}

#[derive(Debug, Clone)]
pub struct RouteNode {
    pub source: HttpRoute,
    pub name: NamespacedName,
    pub hostnames: Vec<String>,
    pub parent_refs: Vec<ParentRefNode>,
    pub rules: Vec<RuleNode>,
    pub valid: bool,
    pub conditions: Vec<Condition>,
}

impl RouteNode {
    /// True when at least one ParentRef attached to a listener
    pub fn is_attached(&self) -> bool {
        self.parent_refs
            .iter()
            .filter_map(ParentRefNode::attachment)
            .any(|a| a.attached)
    }

    /// Hostnames accepted on a listener across every attached ParentRef
    pub fn hostnames_on(&self, listener: &str) -> BTreeSet<&str> {
        self.parent_refs
            .iter()
            .filter_map(ParentRefNode::attachment)
            .filter(|a| a.attached)
            .filter_map(|a| a.accepted_hostnames.get(listener))
            .flatten()
            .map(String::as_str)
            .collect()
    }
}

pub(super) fn build_routes(
    state: &ClusterState,
    gateway: Option<&mut GatewayNode>,
    ignored_gateways: &BTreeSet<NamespacedName>,
    ctx: &BuildContext,
    grants: &ReferenceGrantResolver<'_>,
    referenced: &mut ReferencedResources,
) -> Result<BTreeMap<NamespacedName, RouteNode>> {
    let active = gateway.as_ref().map(|gw| gw.name.clone());
    let mut routes = BTreeMap::new();

    for (key, route) in &state.http_routes {
        let parent_refs = resolve_parent_refs(key, route, active.as_ref(), ignored_gateways);
        let relevant = parent_refs
            .iter()
            .any(|p| p.binding != ParentRefBinding::Ignored(IgnoreReason::NotControlled));
        if !relevant {
            continue;
        }

        let node = build_route(key, route, parent_refs, ctx, state, grants, referenced)?;
        routes.insert(key.clone(), node);
    }

    if let Some(gateway) = gateway {
        for route in routes.values_mut() {
            bind_route(route, gateway, state);
        }
    }

    Ok(routes)
}

fn resolve_parent_refs(
    route_name: &NamespacedName,
    route: &HttpRoute,
    active: Option<&NamespacedName>,
    ignored_gateways: &BTreeSet<NamespacedName>,
) -> Vec<ParentRefNode> {
    route
        .spec
        .parent_refs
        .iter()
        .enumerate()
        .map(|(idx, parent)| {
            let namespace = parent.namespace.as_deref().unwrap_or(&route_name.namespace);
            let gateway = NamespacedName::new(namespace, parent.name.as_str());
            let group = parent.group.as_deref().unwrap_or(GATEWAY_API_GROUP);
            let kind = parent.kind.as_deref().unwrap_or("Gateway");
            let is_gateway = group == GATEWAY_API_GROUP && kind == "Gateway";

            let binding = if is_gateway && Some(&gateway) == active {
                ParentRefBinding::Attached(Attachment::default())
            } else if is_gateway && ignored_gateways.contains(&gateway) {
                ParentRefBinding::Ignored(IgnoreReason::GatewayIgnored)
            } else {
                ParentRefBinding::Ignored(IgnoreReason::NotControlled)
            };

            ParentRefNode {
                idx,
                gateway,
                section_name: parent.section_name.clone(),
                port: parent.port,
                binding,
            }
        })
        .collect()
}

fn build_route(
    name: &NamespacedName,
    route: &HttpRoute,
    parent_refs: Vec<ParentRefNode>,
    ctx: &BuildContext,
    state: &ClusterState,
    grants: &ReferenceGrantResolver<'_>,
    referenced: &mut ReferencedResources,
) -> Result<RouteNode> {
    let mut conditions = Vec::new();
    let mut valid = true;

    for (idx, hostname) in route.spec.hostnames.iter().enumerate() {
        if let Err(e) = validate_hostname(hostname) {
            conditions.push(conditions::route_unsupported_value(format!(
                "spec.hostnames[{}]: {}",
                idx,
                describe(&e)
            )));
            valid = false;
        }
    }

    let validator = ctx.validators.http_fields.as_ref();
    let mut rules = Vec::with_capacity(route.spec.rules.len());
    let mut rule_errors = Vec::new();

    for (idx, rule) in route.spec.rules.iter().enumerate() {
        let (matches, match_errors) = validate_matches(rule, idx, validator)?;
        let filter_errors = validate_filters(rule, idx, validator)?;
        let (backend_refs, backend_conditions) = backend_refs::resolve_backend_refs(
            name,
            idx,
            &rule.backend_refs,
            state,
            grants,
            referenced,
        );
        conditions.extend(backend_conditions);

        rules.push(RuleNode {
            valid_matches: match_errors.is_empty(),
            valid_filters: filter_errors.is_empty(),
            matches,
            filters: rule.filters.clone(),
            backend_refs,
        });
        rule_errors.extend(match_errors);
        rule_errors.extend(filter_errors);
    }

    let invalid_rules = rules
        .iter()
        .filter(|r| !r.valid_matches || !r.valid_filters)
        .count();
    if invalid_rules > 0 && invalid_rules == rules.len() {
        conditions.push(conditions::route_unsupported_value(format!(
            "All rules are invalid: {}",
            rule_errors.join("; ")
        )));
        valid = false;
    } else if invalid_rules > 0 {
        conditions.push(conditions::route_partially_invalid(format!(
            "{} of {} rules are invalid: {}",
            invalid_rules,
            rules.len(),
            rule_errors.join("; ")
        )));
    }

    if !valid {
        debug!(route = %name, "HTTPRoute is invalid");
    }

    Ok(RouteNode {
        source: route.clone(),
        name: name.clone(),
        hostnames: route.spec.hostnames.clone(),
        parent_refs,
        rules,
        valid,
        conditions,
    })
}

fn validate_matches(
    rule: &HttpRouteRule,
    rule_idx: usize,
    validator: &dyn HttpFieldsValidator,
) -> Result<(Vec<HttpRouteMatch>, Vec<String>)> {
    let source = if rule.matches.is_empty() {
        vec![HttpRouteMatch::default()]
    } else {
        rule.matches.clone()
    };

    let mut errors = Vec::new();
    let mut matches = Vec::with_capacity(source.len());

    for (idx, mut m) in source.into_iter().enumerate() {
        let field = format!("spec.rules[{}].matches[{}]", rule_idx, idx);

        let path = m.path.get_or_insert_with(|| HttpPathMatch {
            type_: Some(PathMatchType::PathPrefix),
            value: Some("/".to_string()),
        });
        let value = path.value.as_deref().ok_or_else(|| {
            FlowgateError::invariant(format!("{}.path.value must be defaulted", field))
        })?;
        let path_type = path.type_.ok_or_else(|| {
            FlowgateError::invariant(format!("{}.path.type must be defaulted", field))
        })?;

        if path_type == PathMatchType::RegularExpression {
            errors.push(format!("{}.path.type: RegularExpression is not supported", field));
        } else if let Err(e) = validator.validate_path_in_match(value) {
            errors.push(format!("{}.path.value: {}", field, describe(&e)));
        }

        for (h, header) in m.headers.iter().enumerate() {
            let header_field = format!("{}.headers[{}]", field, h);
            if header.type_ == Some(StringMatchType::RegularExpression) {
                errors.push(format!("{}.type: RegularExpression is not supported", header_field));
                continue;
            }
            if let Err(e) = validator.validate_header_name_in_match(&header.name) {
                errors.push(format!("{}.name: {}", header_field, describe(&e)));
            }
            if let Err(e) = validator.validate_header_value_in_match(&header.value) {
                errors.push(format!("{}.value: {}", header_field, describe(&e)));
            }
        }

        for (q, param) in m.query_params.iter().enumerate() {
            let param_field = format!("{}.queryParams[{}]", field, q);
            if param.type_ == Some(StringMatchType::RegularExpression) {
                errors.push(format!("{}.type: RegularExpression is not supported", param_field));
                continue;
            }
            if let Err(e) = validator.validate_query_param_name_in_match(&param.name) {
                errors.push(format!("{}.name: {}", param_field, describe(&e)));
            }
            if let Err(e) = validator.validate_query_param_value_in_match(&param.value) {
                errors.push(format!("{}.value: {}", param_field, describe(&e)));
            }
        }

        if let Some(method) = m.method.as_deref() {
            if let Err(e) = validator.validate_method_in_match(method) {
                errors.push(format!("{}.method: {}", field, describe(&e)));
            }
        }

        matches.push(m);
    }

    Ok((matches, errors))
}

fn validate_filters(
    rule: &HttpRouteRule,
    rule_idx: usize,
    validator: &dyn HttpFieldsValidator,
) -> Result<Vec<String>> {
    let mut errors = Vec::new();

    for (idx, filter) in rule.filters.iter().enumerate() {
        let field = format!("spec.rules[{}].filters[{}]", rule_idx, idx);

        match filter.type_ {
            HttpRouteFilterType::RequestRedirect => {
                let redirect = filter.request_redirect.as_ref().ok_or_else(|| {
                    FlowgateError::invariant(format!("{}.requestRedirect cannot be nil", field))
                })?;
                let field = format!("{}.requestRedirect", field);

                if let Some(scheme) = redirect.scheme.as_deref() {
                    if let Err(e) = validator.validate_redirect_scheme(scheme) {
                        errors.push(format!("{}.scheme: {}", field, describe(&e)));
                    }
                }
                if let Some(hostname) = redirect.hostname.as_deref() {
                    if let Err(e) = validator.validate_redirect_hostname(hostname) {
                        errors.push(format!("{}.hostname: {}", field, describe(&e)));
                    }
                }
                if let Some(port) = redirect.port {
                    if let Err(e) = validator.validate_redirect_port(port) {
                        errors.push(format!("{}.port: {}", field, describe(&e)));
                    }
                }
                if let Some(status_code) = redirect.status_code {
                    if let Err(e) = validator.validate_redirect_status_code(status_code) {
                        errors.push(format!("{}.statusCode: {}", field, describe(&e)));
                    }
                }
            }
            HttpRouteFilterType::RequestHeaderModifier => {
                let modifier = filter.request_header_modifier.as_ref().ok_or_else(|| {
                    FlowgateError::invariant(format!(
                        "{}.requestHeaderModifier cannot be nil",
                        field
                    ))
                })?;
                validate_header_filter(
                    modifier,
                    &format!("{}.requestHeaderModifier", field),
                    validator,
                    &mut errors,
                );
            }
            HttpRouteFilterType::ResponseHeaderModifier => {
                let modifier = filter.response_header_modifier.as_ref().ok_or_else(|| {
                    FlowgateError::invariant(format!(
                        "{}.responseHeaderModifier cannot be nil",
                        field
                    ))
                })?;
                validate_header_filter(
                    modifier,
                    &format!("{}.responseHeaderModifier", field),
                    validator,
                    &mut errors,
                );
            }
            other @ (HttpRouteFilterType::UrlRewrite
            | HttpRouteFilterType::RequestMirror
            | HttpRouteFilterType::ExtensionRef) => {
                errors.push(format!("{}.type: {} filter is not supported", field, other.as_str()));
            }
        }
    }

    Ok(errors)
}

fn validate_header_filter(
    modifier: &HttpHeaderFilter,
    field: &str,
    validator: &dyn HttpFieldsValidator,
    errors: &mut Vec<String>,
) {
    let headers = modifier
        .set
        .iter()
        .map(|h| ("set", h))
        .chain(modifier.add.iter().map(|h| ("add", h)));
    for (op, header) in headers {
        if let Err(e) = validator.validate_filter_header_name(&header.name) {
            errors.push(format!("{}.{}: {}", field, op, describe(&e)));
        }
        if let Err(e) = validator.validate_filter_header_value(&header.value) {
            errors.push(format!("{}.{}: {}", field, op, describe(&e)));
        }
    }
    for name in &modifier.remove {
        if let Err(e) = validator.validate_filter_header_name(name) {
            errors.push(format!("{}.remove: {}", field, describe(&e)));
        }
    }
}

/// Hostnames a listener accepts from a route.
///
/// An empty listener hostname accepts every route hostname; an empty route
/// hostname list takes the listener hostname, or the wildcard key when the
/// listener has none either.
pub fn find_accepted_hostnames(
    listener_hostname: Option<&str>,
    route_hostnames: &[String],
) -> Vec<String> {
    let listener_hostname = listener_hostname.filter(|h| !h.is_empty());
    match (listener_hostname, route_hostnames.is_empty()) {
        (None, true) => vec![WILDCARD_HOSTNAME.to_string()],
        (None, false) => route_hostnames.to_vec(),
        (Some(listener), true) => vec![listener.to_string()],
        (Some(listener), false) => route_hostnames
            .iter()
            .filter(|h| h.as_str() == listener)
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect(),
    }
}

fn bind_route(route: &mut RouteNode, gateway: &mut GatewayNode, state: &ClusterState) {
    if !route.valid {
        return;
    }

    let RouteNode {
        name,
        hostnames,
        parent_refs,
        ..
    } = route;

    for parent in parent_refs.iter_mut() {
        let ParentRefBinding::Attached(attachment) = &mut parent.binding else {
            continue;
        };

        if parent.port.is_some() {
            attachment.failed_condition = Some(conditions::route_unsupported_value(format!(
                "spec.parentRefs[{}].port: port is not supported",
                parent.idx
            )));
            continue;
        }

        if !gateway.valid {
            attachment.failed_condition = Some(conditions::route_invalid_gateway());
            continue;
        }

        let section = parent.section_name.as_deref();
        let candidates: Vec<usize> = gateway
            .listeners
            .iter()
            .enumerate()
            .filter(|(_, l)| section.map_or(true, |s| l.name == s))
            .map(|(i, _)| i)
            .collect();
        if candidates.is_empty() {
            let message = match section {
                Some(section) => format!(
                    "spec.parentRefs[{}].sectionName: Gateway has no listener named {}",
                    parent.idx, section
                ),
                None => "Gateway has no listeners".to_string(),
            };
            attachment.failed_condition = Some(conditions::route_no_matching_parent(message));
            continue;
        }

        let valid: Vec<usize> = candidates
            .into_iter()
            .filter(|&i| gateway.listeners[i].valid)
            .collect();
        if valid.is_empty() {
            attachment.failed_condition = Some(conditions::route_invalid_listener());
            continue;
        }

        let allowed: Vec<usize> = valid
            .into_iter()
            .filter(|&i| {
                let listener = &gateway.listeners[i];
                listener.allows_kind(GATEWAY_API_GROUP, HTTP_ROUTE_KIND)
                    && listener.allows_namespace(&gateway.name.namespace, &name.namespace, state)
            })
            .collect();
        if allowed.is_empty() {
            attachment.failed_condition = Some(conditions::route_not_allowed_by_listeners());
            continue;
        }

        for i in allowed {
            let listener = &mut gateway.listeners[i];
            let accepted = find_accepted_hostnames(listener.hostname(), hostnames);
            if accepted.is_empty() {
                continue;
            }
            listener.routes.insert(name.clone());
            listener.accepted_hostnames.extend(accepted.iter().cloned());
            attachment
                .accepted_hostnames
                .insert(listener.name.clone(), accepted);
        }

        if attachment.accepted_hostnames.is_empty() {
            attachment.failed_condition = Some(conditions::route_no_matching_listener_hostname());
        } else {
            attachment.attached = true;
        }
    }
}
