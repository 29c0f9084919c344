//! Relationship Capturer
//!
//! Remembers which secondary resources the last graph depends on so that
//! changes to unrelated Services, EndpointSlices, Secrets and Namespaces do
//! not trigger a rebuild. It is replaced wholesale after every build.

use std::collections::BTreeSet;

use crate::resources::{LabelSelector, NamespacedName, Resource, ResourceKind, SERVICE_NAME_LABEL};

use super::graph::listener::selector_matches;
use super::graph::Graph;

#[derive(Debug, Clone, Default)]
pub struct RelationshipCapturer {
    services: BTreeSet<NamespacedName>,
    secrets: BTreeSet<NamespacedName>,
    namespaces: BTreeSet<NamespacedName>,
    namespace_selectors: Vec<LabelSelector>,
}

impl RelationshipCapturer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_graph(graph: &Graph) -> Self {
        let referenced = &graph.referenced;
        Self {
            services: referenced.services.clone(),
            secrets: referenced.secrets.clone(),
            namespaces: referenced.namespaces.clone(),
            namespace_selectors: referenced.namespace_selectors.clone(),
        }
    }

    /// Whether the graph references a secondary resource by name.
    ///
    /// EndpointSlices are looked up by the Service that owns them.
    pub fn exists(&self, kind: ResourceKind, name: &NamespacedName) -> bool {
        match kind {
            ResourceKind::Service | ResourceKind::EndpointSlice => self.services.contains(name),
            ResourceKind::Secret => self.secrets.contains(name),
            ResourceKind::Namespace => self.namespaces.contains(name),
            ResourceKind::GatewayClass
            | ResourceKind::Gateway
            | ResourceKind::HttpRoute
            | ResourceKind::ReferenceGrant
            | ResourceKind::BackendTlsPolicy => false,
        }
    }

    /// Whether a change to this secondary resource can alter the graph or
    /// the configuration built from it.
    pub fn is_relevant(&self, resource: &Resource) -> bool {
        match resource {
            Resource::Service(_) | Resource::Secret(_) => {
                self.exists(resource.kind(), &resource.namespaced_name())
            }
            Resource::EndpointSlice(slice) => slice
                .metadata
                .labels
                .as_ref()
                .and_then(|labels| labels.get(SERVICE_NAME_LABEL))
                .map(|service| {
                    let owner = NamespacedName::new(
                        slice.metadata.namespace.clone().unwrap_or_default(),
                        service.clone(),
                    );
                    self.services.contains(&owner)
                })
                .unwrap_or(false),
            Resource::Namespace(ns) => {
                self.namespaces.contains(&resource.namespaced_name())
                    || self
                        .namespace_selectors
                        .iter()
                        .any(|selector| selector_matches(selector, ns.metadata.labels.as_ref()))
            }
            Resource::GatewayClass(_)
            | Resource::Gateway(_)
            | Resource::HttpRoute(_)
            | Resource::ReferenceGrant(_)
            | Resource::BackendTlsPolicy(_) => false,
        }
    }
}
