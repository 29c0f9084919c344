//! Configuration Builder
//!
//! Flattens the graph into virtual servers keyed by hostname, one set per
//! protocol. Every accumulator here lives for a single call.
//!
//! Upstreams are resolved through the [`ServiceResolver`] while building.
//! The Services behind them were already recorded as referenced by the
//! graph, so endpoint churn is picked up by the relationship capturer.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use tracing::{debug, warn};

use crate::observability::metrics::ReconcileMetrics;
use crate::resources::gateway_api::{HttpRouteFilterType, HttpRouteMatch, PathMatchType};
use crate::resources::{creation_time, NamespacedName};
use crate::state::graph::listener::HTTPS_PROTOCOL;
use crate::state::graph::{Graph, GatewayNode, ListenerNode, RouteNode, RuleNode};
use crate::state::resolver::ServiceResolver;

use super::{
    upstream_name, Backend, BackendGroup, Configuration, Distribution, Filters, InvalidFilter,
    MatchRule, PathRule, PathType, SplitClient, Ssl, Upstream, VirtualServer, INVALID_BACKEND_REF,
    INVALID_FILTER_STATUS_CODE,
};

/// Hundredths of a percent in a whole split
const SPLIT_TOTAL: i64 = 10_000;

/// Build the dataplane configuration for one pass.
///
/// Without a valid GatewayClass or an active Gateway the configuration has
/// no servers at all. Otherwise it always carries a default HTTP server, and
/// a default SSL server when at least one HTTPS listener is valid.
pub async fn build_configuration(
    graph: &Graph,
    resolver: &dyn ServiceResolver,
    version: u64,
) -> Configuration {
    if !graph.active_class().is_some_and(|class| class.valid) {
        debug!(version, "No valid GatewayClass, configuration is empty");
        return Configuration::empty(version);
    }
    let Some(gateway) = graph.active_gateway() else {
        debug!(version, "No active Gateway, configuration is empty");
        return Configuration::empty(version);
    };

    let mut groups = GroupAccumulator::default();
    let mut http = ServerAccumulator::new(listener_port(gateway, false, graph.ports.http));
    let mut ssl = ServerAccumulator::new(listener_port(gateway, true, graph.ports.https));

    for listener in gateway.listeners.iter().filter(|l| l.valid) {
        let servers = if listener.is_https() {
            &mut ssl
        } else {
            &mut http
        };
        servers.add_listener(listener, graph, &mut groups);
    }

    let has_ssl = gateway.listeners.iter().any(|l| l.valid && l.is_https());
    let http_servers = http.finish(graph, false);
    let ssl_servers = if has_ssl {
        ssl.finish(graph, true)
    } else {
        Vec::new()
    };

    let upstreams = resolve_upstreams(&groups.upstreams, resolver).await;
    let backend_groups: Vec<BackendGroup> = groups.groups.into_values().collect();
    let splits = backend_groups
        .iter()
        .filter(|g| g.needs_split())
        .map(split_client)
        .collect();

    let configuration = Configuration {
        version,
        http_servers,
        ssl_servers,
        upstreams,
        backend_groups,
        splits,
        overrides: gateway.overrides.clone(),
    };

    debug!(
        version,
        http_servers = configuration.http_servers.len(),
        ssl_servers = configuration.ssl_servers.len(),
        upstreams = configuration.upstreams.len(),
        splits = configuration.splits.len(),
        "Built dataplane configuration"
    );

    configuration
}

/// Port of the first valid listener of a protocol, or the configured one.
fn listener_port(gateway: &GatewayNode, https: bool, configured: i32) -> i32 {
    gateway
        .listeners
        .iter()
        .find(|l| (l.source.protocol == HTTPS_PROTOCOL) == https && l.valid)
        .map(|l| l.source.port)
        .unwrap_or(configured)
}

#[derive(Default)]
struct GroupAccumulator {
    groups: BTreeMap<(NamespacedName, usize), BackendGroup>,
    /// Upstream name → (Service, port)
    upstreams: BTreeMap<String, (NamespacedName, i32)>,
}

impl GroupAccumulator {
    fn group_for(&mut self, route: &RouteNode, rule_idx: usize, rule: &RuleNode) -> BackendGroup {
        let key = (route.name.clone(), rule_idx);
        if let Some(group) = self.groups.get(&key) {
            return group.clone();
        }

        let backends = rule
            .backend_refs
            .iter()
            .map(|backend_ref| {
                let upstream = match (&backend_ref.service, backend_ref.port) {
                    (Some(service), Some(port)) if backend_ref.valid => {
                        let name = upstream_name(service, port);
                        self.upstreams.insert(name.clone(), (service.clone(), port));
                        name
                    }
                    _ => INVALID_BACKEND_REF.to_string(),
                };
                Backend {
                    upstream_name: upstream,
                    weight: backend_ref.weight,
                    valid: backend_ref.valid,
                    tls: backend_ref.tls.clone(),
                }
            })
            .collect();

        let group = BackendGroup {
            source: route.name.clone(),
            rule_idx,
            backends,
        };
        self.groups.insert(key, group.clone());
        group
    }
}

#[derive(Default)]
struct HostEntry {
    certificate: Option<PathBuf>,
    /// Certificate came from a listener naming this exact hostname
    exact_certificate: bool,
    routes: BTreeSet<NamespacedName>,
    path_rules: BTreeMap<(String, PathType), Vec<MatchRule>>,
}

struct ServerAccumulator {
    port: i32,
    hosts: BTreeMap<String, HostEntry>,
}

impl ServerAccumulator {
    fn new(port: i32) -> Self {
        Self {
            port,
            hosts: BTreeMap::new(),
        }
    }

    fn add_listener(
        &mut self,
        listener: &ListenerNode,
        graph: &Graph,
        groups: &mut GroupAccumulator,
    ) {
        for route_name in &listener.routes {
            let Some(route) = graph.routes.get(route_name) else {
                continue;
            };

            for hostname in route.hostnames_on(&listener.name) {
                let entry = self.hosts.entry(hostname.to_string()).or_default();

                if let Some(cert) = &listener.certificate {
                    let exact = listener.hostname() == Some(hostname);
                    if entry.certificate.is_none() || (exact && !entry.exact_certificate) {
                        entry.certificate = Some(cert.path.clone());
                        entry.exact_certificate = exact;
                    }
                }

                // a route reachable through two listeners contributes once
                if entry.routes.insert(route_name.clone()) {
                    add_route(entry, route, groups);
                }
            }
        }
    }

    fn finish(self, graph: &Graph, ssl: bool) -> Vec<VirtualServer> {
        let default_server = VirtualServer {
            is_default: true,
            hostname: String::new(),
            port: self.port,
            ssl: None,
            path_rules: Vec::new(),
        };

        let port = self.port;
        let hosts = self.hosts.into_iter().map(|(hostname, entry)| {
            let path_rules = entry
                .path_rules
                .into_iter()
                .map(|((path, path_type), mut match_rules)| {
                    sort_match_rules(&mut match_rules, graph);
                    PathRule {
                        path,
                        path_type,
                        match_rules,
                    }
                })
                .collect();

            VirtualServer {
                is_default: false,
                hostname,
                port,
                ssl: if ssl {
                    entry
                        .certificate
                        .map(|certificate_path| Ssl { certificate_path })
                } else {
                    None
                },
                path_rules,
            }
        });

        std::iter::once(default_server).chain(hosts).collect()
    }
}

fn add_route(entry: &mut HostEntry, route: &RouteNode, groups: &mut GroupAccumulator) {
    for (rule_idx, rule) in route.rules.iter().enumerate() {
        if !rule.valid_matches {
            continue;
        }

        let backend_group = groups.group_for(route, rule_idx, rule);
        let filters = build_filters(rule);

        for (match_idx, matching) in rule.matches.iter().enumerate() {
            let Some(key) = path_key(matching) else {
                continue;
            };
            entry.path_rules.entry(key).or_default().push(MatchRule {
                source: route.name.clone(),
                rule_idx,
                match_idx,
                matching: matching.clone(),
                filters: filters.clone(),
                backend_group: backend_group.clone(),
            });
        }
    }
}

fn path_key(matching: &HttpRouteMatch) -> Option<(String, PathType)> {
    let path = matching.path.as_ref()?;
    let path_type = match path.type_? {
        PathMatchType::Exact => PathType::Exact,
        PathMatchType::PathPrefix => PathType::Prefix,
        PathMatchType::RegularExpression => return None,
    };
    Some((path.value.clone()?, path_type))
}

fn build_filters(rule: &RuleNode) -> Filters {
    if !rule.valid_filters {
        return Filters {
            invalid_filter: Some(InvalidFilter {
                status_code: INVALID_FILTER_STATUS_CODE,
            }),
            ..Default::default()
        };
    }

    let mut filters = Filters::default();
    for filter in &rule.filters {
        match filter.type_ {
            HttpRouteFilterType::RequestRedirect => {
                if filters.request_redirect.is_none() {
                    filters.request_redirect = filter.request_redirect.clone();
                }
            }
            HttpRouteFilterType::RequestHeaderModifier => {
                if filters.request_header_modifier.is_none() {
                    filters.request_header_modifier = filter.request_header_modifier.clone();
                }
            }
            HttpRouteFilterType::ResponseHeaderModifier => {
                if filters.response_header_modifier.is_none() {
                    filters.response_header_modifier = filter.response_header_modifier.clone();
                }
            }
            HttpRouteFilterType::UrlRewrite
            | HttpRouteFilterType::RequestMirror
            | HttpRouteFilterType::ExtensionRef => {}
        }
    }
    filters
}

/// Older routes take precedence, then namespace/name, rule and match order.
fn sort_match_rules(rules: &mut [MatchRule], graph: &Graph) {
    rules.sort_by_cached_key(|rule| {
        let created = graph
            .routes
            .get(&rule.source)
            .and_then(|r| creation_time(&r.source.metadata));
        (created, rule.source.clone(), rule.rule_idx, rule.match_idx)
    });
}

async fn resolve_upstreams(
    targets: &BTreeMap<String, (NamespacedName, i32)>,
    resolver: &dyn ServiceResolver,
) -> Vec<Upstream> {
    let metrics = ReconcileMetrics::new();
    let mut upstreams = Vec::with_capacity(targets.len());

    for (name, (service, port)) in targets {
        let upstream = match resolver.resolve(service, *port).await {
            Ok(endpoints) => Upstream {
                name: name.clone(),
                endpoints,
                error_message: None,
            },
            Err(e) => {
                warn!(
                    upstream = %name,
                    service = %service,
                    port,
                    error = %e,
                    "Failed to resolve endpoints"
                );
                metrics.record_resolver_failure(service);
                Upstream {
                    name: name.clone(),
                    endpoints: Vec::new(),
                    error_message: Some(e.to_string()),
                }
            }
        };
        upstreams.push(upstream);
    }

    upstreams
}

/// Split traffic by weight in hundredths of a percent, truncating each
/// share. The last weighted backend takes the remainder.
///
/// Invalid backends keep their share and point at [`INVALID_BACKEND_REF`],
/// so that portion of traffic fails instead of moving to valid backends.
pub fn split_client(group: &BackendGroup) -> SplitClient {
    let weighted: Vec<&Backend> = group.weighted().collect();
    let total: i64 = weighted.iter().map(|b| i64::from(b.weight)).sum();

    let mut remaining = SPLIT_TOTAL;
    let distributions = weighted
        .iter()
        .enumerate()
        .map(|(idx, backend)| {
            let share = if idx + 1 == weighted.len() {
                remaining
            } else {
                i64::from(backend.weight) * SPLIT_TOTAL / total
            };
            remaining -= share;
            Distribution {
                percent: share as f64 / 100.0,
                upstream_name: backend.upstream_name.clone(),
            }
        })
        .collect();

    SplitClient {
        name: group.split_name(),
        distributions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::gateway_api::{
        GatewayClassSpec, GatewaySpec, HttpPathMatch, HttpRouteFilter, HttpRouteSpec, Listener,
    };
    use crate::resources::{Gateway, GatewayClass, HttpRoute, ObjectMeta};
    use crate::state::graph::{
        AllowedNamespaces, Attachment, BackendRefNode, GatewayClassEntry, GatewayClassNode,
        GatewayEntry, ListenerCertificate, ListenerPorts, ParentRefBinding, ParentRefNode,
        ProxyOverrides,
    };
    use crate::state::resolver::{Endpoint, ResolveError};
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

    struct StaticResolver;

    #[async_trait]
    impl ServiceResolver for StaticResolver {
        async fn resolve(
            &self,
            service: &NamespacedName,
            port: i32,
        ) -> Result<Vec<Endpoint>, ResolveError> {
            if service.name == "missing" {
                return Err(ResolveError::NoEndpoints {
                    service: service.clone(),
                    port,
                });
            }
            Ok(vec![Endpoint {
                address: "10.0.0.1".into(),
                port: 8080,
                ipv6: false,
            }])
        }
    }

    fn backend(name: &str, weight: i32) -> Backend {
        Backend {
            upstream_name: name.into(),
            weight,
            valid: true,
            tls: None,
        }
    }

    fn group(backends: Vec<Backend>) -> BackendGroup {
        BackendGroup {
            source: NamespacedName::new("default", "route"),
            rule_idx: 0,
            backends,
        }
    }

    fn percents(split: &SplitClient) -> Vec<f64> {
        split.distributions.iter().map(|d| d.percent).collect()
    }

    #[test]
    fn group_and_split_names() {
        let g = group(Vec::new());
        assert_eq!(g.name(), "group_default__route_rule0");
        assert_eq!(g.split_name(), "default__route_rule0");
    }

    #[test]
    fn equal_weights_split_evenly() {
        let g = group(vec![backend("a", 1), backend("b", 1)]);
        assert!(g.needs_split());
        assert_eq!(percents(&split_client(&g)), vec![50.0, 50.0]);
    }

    #[test]
    fn uneven_weights_truncate_and_last_takes_remainder() {
        let g = group(vec![backend("a", 1), backend("b", 1), backend("c", 1)]);
        assert_eq!(percents(&split_client(&g)), vec![33.33, 33.33, 33.34]);
    }

    #[test]
    fn zero_weight_backends_are_excluded() {
        let g = group(vec![backend("a", 3), backend("b", 0), backend("c", 1)]);
        let split = split_client(&g);
        assert_eq!(percents(&split), vec![75.0, 25.0]);
        assert_eq!(split.distributions[1].upstream_name, "c");

        assert!(!group(vec![backend("a", 1), backend("b", 0)]).needs_split());
        assert!(!group(vec![backend("a", 1)]).needs_split());
    }

    fn meta(name: &str, created_secs: i64) -> ObjectMeta {
        ObjectMeta {
            namespace: Some("default".into()),
            name: Some(name.into()),
            creation_timestamp: Some(Time(Utc.timestamp_opt(created_secs, 0).unwrap())),
            ..Default::default()
        }
    }

    fn listener(name: &str, protocol: &str, port: i32, hostname: Option<&str>) -> ListenerNode {
        ListenerNode {
            name: name.into(),
            source: Listener {
                name: name.into(),
                hostname: hostname.map(str::to_string),
                port,
                protocol: protocol.into(),
                tls: None,
                allowed_routes: None,
            },
            valid: true,
            conditions: Vec::new(),
            routes: BTreeSet::new(),
            accepted_hostnames: BTreeSet::new(),
            allowed_namespaces: AllowedNamespaces::Same,
            supported_kinds: Vec::new(),
            certificate: (protocol == HTTPS_PROTOCOL).then(|| ListenerCertificate {
                secret: NamespacedName::new("default", "cert"),
                path: PathBuf::from("/etc/flowgate/secrets/default_cert.pem"),
            }),
        }
    }

    fn rule(paths: &[&str], backends: Vec<BackendRefNode>) -> RuleNode {
        RuleNode {
            valid_matches: true,
            valid_filters: true,
            matches: paths
                .iter()
                .map(|p| HttpRouteMatch {
                    path: Some(HttpPathMatch {
                        type_: Some(PathMatchType::PathPrefix),
                        value: Some(p.to_string()),
                    }),
                    ..Default::default()
                })
                .collect(),
            filters: Vec::new(),
            backend_refs: backends,
        }
    }

    fn service_ref(name: &str, weight: i32) -> BackendRefNode {
        BackendRefNode {
            service: Some(NamespacedName::new("default", name)),
            port: Some(80),
            weight,
            valid: true,
            tls: None,
        }
    }

    fn attached_route(
        name: &str,
        created_secs: i64,
        listener: &str,
        hostname: &str,
        rules: Vec<RuleNode>,
    ) -> RouteNode {
        RouteNode {
            source: HttpRoute {
                metadata: meta(name, created_secs),
                spec: HttpRouteSpec::default(),
            },
            name: NamespacedName::new("default", name),
            hostnames: vec![hostname.to_string()],
            parent_refs: vec![ParentRefNode {
                idx: 0,
                gateway: NamespacedName::new("default", "gateway"),
                section_name: None,
                port: None,
                binding: ParentRefBinding::Attached(Attachment {
                    attached: true,
                    failed_condition: None,
                    accepted_hostnames: BTreeMap::from([(
                        listener.to_string(),
                        vec![hostname.to_string()],
                    )]),
                }),
            }],
            rules,
            valid: true,
            conditions: Vec::new(),
        }
    }

    fn graph(mut listeners: Vec<ListenerNode>, routes: Vec<RouteNode>) -> Graph {
        for route in &routes {
            for listener in listeners.iter_mut() {
                if !route.hostnames_on(&listener.name).is_empty() {
                    listener.routes.insert(route.name.clone());
                }
            }
        }

        let class = GatewayClassNode {
            source: GatewayClass {
                metadata: ObjectMeta {
                    name: Some("flowgate".into()),
                    ..Default::default()
                },
                spec: GatewayClassSpec::default(),
            },
            name: NamespacedName::cluster_scoped("flowgate"),
            valid: true,
            conditions: Vec::new(),
        };
        let gateway = GatewayNode {
            source: Gateway {
                metadata: meta("gateway", 0),
                spec: GatewaySpec::default(),
            },
            name: NamespacedName::new("default", "gateway"),
            listeners,
            valid: true,
            conditions: Vec::new(),
            overrides: ProxyOverrides::default(),
        };

        Graph {
            gateway_classes: BTreeMap::from([(
                class.name.clone(),
                GatewayClassEntry::Active(class),
            )]),
            gateways: BTreeMap::from([(gateway.name.clone(), GatewayEntry::Active(gateway))]),
            routes: routes.into_iter().map(|r| (r.name.clone(), r)).collect(),
            ..Default::default()
        }
    }

    fn web_route(name: &str, created_secs: i64, listener: &str) -> RouteNode {
        attached_route(
            name,
            created_secs,
            listener,
            "foo.example.com",
            vec![rule(&["/"], vec![service_ref("web", 1)])],
        )
    }

    #[tokio::test]
    async fn empty_without_active_gateway() {
        let config = build_configuration(&Graph::default(), &StaticResolver, 3).await;
        assert_eq!(config, Configuration::empty(3));
    }

    #[tokio::test]
    async fn default_servers_without_routes() {
        let g = graph(vec![listener("http", "HTTP", 80, None)], Vec::new());
        let config = build_configuration(&g, &StaticResolver, 1).await;
        assert_eq!(config.http_servers.len(), 1);
        assert!(config.http_servers[0].is_default);
        assert!(config.ssl_servers.is_empty());

        let g = graph(
            vec![
                listener("http", "HTTP", 80, None),
                listener("https", "HTTPS", 443, None),
            ],
            Vec::new(),
        );
        let config = build_configuration(&g, &StaticResolver, 2).await;
        assert_eq!(config.ssl_servers.len(), 1);
        assert!(config.ssl_servers[0].is_default);
        assert_eq!(config.ssl_servers[0].port, 443);
    }

    #[tokio::test]
    async fn default_server_uses_configured_port_without_valid_listener() {
        let mut invalid = listener("http", "HTTP", 80, None);
        invalid.valid = false;
        let mut g = graph(vec![invalid], Vec::new());
        g.ports = ListenerPorts {
            http: 8080,
            https: 8443,
        };

        let config = build_configuration(&g, &StaticResolver, 1).await;
        assert_eq!(config.http_servers.len(), 1);
        assert_eq!(config.http_servers[0].port, 8080);
    }

    #[tokio::test]
    async fn match_rules_ordered_by_route_age() {
        let newer = web_route("newer", 200, "http");
        let older = attached_route(
            "older",
            100,
            "http",
            "foo.example.com",
            vec![rule(&["/", "/api"], vec![service_ref("api", 1)])],
        );
        let g = graph(vec![listener("http", "HTTP", 80, None)], vec![newer, older]);

        let config = build_configuration(&g, &StaticResolver, 1).await;
        let server = &config.http_servers[1];
        assert_eq!(server.hostname, "foo.example.com");
        let paths: Vec<&str> = server.path_rules.iter().map(|p| p.path.as_str()).collect();
        assert_eq!(paths, vec!["/", "/api"]);

        let sources: Vec<&str> = server.path_rules[0]
            .match_rules
            .iter()
            .map(|m| m.source.name.as_str())
            .collect();
        assert_eq!(sources, vec!["older", "newer"]);
    }

    #[tokio::test]
    async fn upstreams_are_resolved_and_failures_degrade() {
        let route = attached_route(
            "route",
            100,
            "http",
            "foo.example.com",
            vec![rule(
                &["/"],
                vec![service_ref("web", 1), service_ref("missing", 1)],
            )],
        );
        let g = graph(vec![listener("http", "HTTP", 80, None)], vec![route]);

        let config = build_configuration(&g, &StaticResolver, 1).await;
        assert_eq!(config.upstreams.len(), 2);
        assert_eq!(
            config.upstream("default_web_80").unwrap().endpoints.len(),
            1
        );
        let missing = config.upstream("default_missing_80").unwrap();
        assert!(missing.endpoints.is_empty());
        assert!(missing.error_message.is_some());
        assert_eq!(config.splits.len(), 1);
    }

    #[tokio::test]
    async fn invalid_backend_keeps_its_share_of_the_split() {
        let mut not_found = service_ref("tea", 1);
        not_found.valid = false;
        let route = attached_route(
            "route",
            100,
            "http",
            "foo.example.com",
            vec![rule(&["/"], vec![service_ref("web", 1), not_found])],
        );
        let g = graph(vec![listener("http", "HTTP", 80, None)], vec![route]);

        let config = build_configuration(&g, &StaticResolver, 1).await;
        assert_eq!(config.upstreams.len(), 1);
        assert_eq!(config.splits.len(), 1);

        let split = &config.splits[0];
        let targets: Vec<(&str, f64)> = split
            .distributions
            .iter()
            .map(|d| (d.upstream_name.as_str(), d.percent))
            .collect();
        assert_eq!(
            targets,
            vec![("default_web_80", 50.0), (INVALID_BACKEND_REF, 50.0)]
        );
    }

    #[tokio::test]
    async fn invalid_filters_answer_with_500() {
        let mut r = rule(&["/"], vec![service_ref("web", 1)]);
        r.valid_filters = false;
        r.filters = vec![HttpRouteFilter::of_type(HttpRouteFilterType::UrlRewrite)];
        let route = attached_route("route", 100, "http", "foo.example.com", vec![r]);
        let g = graph(vec![listener("http", "HTTP", 80, None)], vec![route]);

        let config = build_configuration(&g, &StaticResolver, 1).await;
        let match_rule = &config.http_servers[1].path_rules[0].match_rules[0];
        assert_eq!(
            match_rule.filters.invalid_filter,
            Some(InvalidFilter { status_code: 500 })
        );
    }

    #[tokio::test]
    async fn ssl_server_prefers_exact_hostname_certificate() {
        let mut exact = listener("https-foo", "HTTPS", 443, Some("foo.example.com"));
        exact.certificate.as_mut().unwrap().path = PathBuf::from("/secrets/foo.pem");
        let mut route = web_route("route", 100, "https");
        if let ParentRefBinding::Attached(a) = &mut route.parent_refs[0].binding {
            a.accepted_hostnames
                .insert("https-foo".into(), vec!["foo.example.com".into()]);
        }
        let g = graph(
            vec![listener("https", "HTTPS", 443, None), exact],
            vec![route],
        );

        let config = build_configuration(&g, &StaticResolver, 1).await;
        assert_eq!(config.ssl_servers.len(), 2);
        let server = &config.ssl_servers[1];
        assert_eq!(
            server.ssl.as_ref().unwrap().certificate_path,
            PathBuf::from("/secrets/foo.pem")
        );
        // contributed once although reachable through both listeners
        assert_eq!(server.path_rules[0].match_rules.len(), 1);
    }
}
