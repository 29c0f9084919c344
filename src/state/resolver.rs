//! Service endpoint resolution
//!
//! Endpoints are resolved while building the dataplane configuration, not
//! while building the graph, so endpoint churn never forces a graph rebuild.

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::store::ClusterStore;
use crate::resources::{NamespacedName, SERVICE_NAME_LABEL};

/// A single ready backend address
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    pub address: String,
    pub port: i32,
    pub ipv6: bool,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("Service {service} does not exist")]
    ServiceNotFound { service: NamespacedName },

    #[error("Service {service} has no port {port}")]
    PortNotFound { service: NamespacedName, port: i32 },

    #[error("Service {service} has no ready endpoints for port {port}")]
    NoEndpoints { service: NamespacedName, port: i32 },

    #[error("Endpoint lookup failed: {message}")]
    Backend { message: String },
}

/// Resolves a Service port to its ready endpoints.
#[async_trait]
pub trait ServiceResolver: Send + Sync {
    /// Implementations must return only ready endpoints, deduplicated by
    /// address and port.
    async fn resolve(
        &self,
        service: &NamespacedName,
        port: i32,
    ) -> Result<Vec<Endpoint>, ResolveError>;
}

/// Resolver backed by the EndpointSlices in the working cluster store.
#[derive(Debug, Clone)]
pub struct ClusterStoreResolver {
    store: ClusterStore,
}

impl ClusterStoreResolver {
    pub fn new(store: ClusterStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ServiceResolver for ClusterStoreResolver {
    async fn resolve(
        &self,
        service: &NamespacedName,
        port: i32,
    ) -> Result<Vec<Endpoint>, ResolveError> {
        let state = self.store.read();

        let svc = state
            .services
            .get(service)
            .ok_or_else(|| ResolveError::ServiceNotFound {
                service: service.clone(),
            })?;

        let service_port = svc
            .spec
            .as_ref()
            .and_then(|spec| spec.ports.as_ref())
            .and_then(|ports| ports.iter().find(|p| p.port == port))
            .ok_or_else(|| ResolveError::PortNotFound {
                service: service.clone(),
                port,
            })?;
        let port_name = service_port.name.as_deref().unwrap_or_default();

        let mut endpoints = BTreeSet::new();
        let slices = state.endpoint_slices.iter().filter(|(key, slice)| {
            key.namespace == service.namespace
                && slice
                    .metadata
                    .labels
                    .as_ref()
                    .and_then(|labels| labels.get(SERVICE_NAME_LABEL))
                    .is_some_and(|owner| *owner == service.name)
        });

        for (_, slice) in slices {
            let Some(target_port) = slice
                .ports
                .iter()
                .flatten()
                .find(|p| p.name.as_deref().unwrap_or_default() == port_name)
                .and_then(|p| p.port)
            else {
                continue;
            };
            let ipv6 = slice.address_type == "IPv6";

            for endpoint in &slice.endpoints {
                // unset readiness is treated as ready
                let ready = endpoint
                    .conditions
                    .as_ref()
                    .and_then(|c| c.ready)
                    .unwrap_or(true);
                if !ready {
                    continue;
                }
                for address in &endpoint.addresses {
                    endpoints.insert(Endpoint {
                        address: address.clone(),
                        port: target_port,
                        ipv6,
                    });
                }
            }
        }

        if endpoints.is_empty() {
            return Err(ResolveError::NoEndpoints {
                service: service.clone(),
                port,
            });
        }

        debug!(service = %service, port, endpoints = endpoints.len(), "Resolved service endpoints");
        Ok(endpoints.into_iter().collect())
    }
}
