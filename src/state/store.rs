//! Working snapshot of the cluster objects the engine consumes
//!
//! [`ClusterState`] holds one ordered map per kind. The change processor
//! writes into it on capture; builders only ever read a locked snapshot.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::resources::{
    BackendTlsPolicy, EndpointSlice, Gateway, GatewayClass, HttpRoute, Namespace, NamespacedName,
    ReferenceGrant, Resource, ResourceKind, Secret, Service,
};

/// Point-in-time view of every relevant cluster object, keyed by
/// namespaced name. Cluster-scoped kinds use an empty namespace.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClusterState {
    pub gateway_classes: BTreeMap<NamespacedName, GatewayClass>,
    pub gateways: BTreeMap<NamespacedName, Gateway>,
    pub http_routes: BTreeMap<NamespacedName, HttpRoute>,
    pub reference_grants: BTreeMap<NamespacedName, ReferenceGrant>,
    pub backend_tls_policies: BTreeMap<NamespacedName, BackendTlsPolicy>,
    pub services: BTreeMap<NamespacedName, Service>,
    pub endpoint_slices: BTreeMap<NamespacedName, EndpointSlice>,
    pub secrets: BTreeMap<NamespacedName, Secret>,
    pub namespaces: BTreeMap<NamespacedName, Namespace>,
}

impl ClusterState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a resource. Returns the previous version, if any.
    pub fn upsert(&mut self, resource: Resource) -> Option<Resource> {
        let key = resource.namespaced_name();
        match resource {
            Resource::GatewayClass(r) => self.gateway_classes.insert(key, r).map(Into::into),
            Resource::Gateway(r) => self.gateways.insert(key, r).map(Into::into),
            Resource::HttpRoute(r) => self.http_routes.insert(key, r).map(Into::into),
            Resource::ReferenceGrant(r) => self.reference_grants.insert(key, r).map(Into::into),
            Resource::BackendTlsPolicy(r) => {
                self.backend_tls_policies.insert(key, r).map(Into::into)
            }
            Resource::Service(r) => self.services.insert(key, r).map(Into::into),
            Resource::EndpointSlice(r) => self.endpoint_slices.insert(key, r).map(Into::into),
            Resource::Secret(r) => self.secrets.insert(key, r).map(Into::into),
            Resource::Namespace(r) => self.namespaces.insert(key, r).map(Into::into),
        }
    }

    /// Remove a resource. Returns the removed version, if it existed.
    pub fn delete(&mut self, kind: ResourceKind, name: &NamespacedName) -> Option<Resource> {
        match kind {
            ResourceKind::GatewayClass => self.gateway_classes.remove(name).map(Into::into),
            ResourceKind::Gateway => self.gateways.remove(name).map(Into::into),
            ResourceKind::HttpRoute => self.http_routes.remove(name).map(Into::into),
            ResourceKind::ReferenceGrant => self.reference_grants.remove(name).map(Into::into),
            ResourceKind::BackendTlsPolicy => {
                self.backend_tls_policies.remove(name).map(Into::into)
            }
            ResourceKind::Service => self.services.remove(name).map(Into::into),
            ResourceKind::EndpointSlice => self.endpoint_slices.remove(name).map(Into::into),
            ResourceKind::Secret => self.secrets.remove(name).map(Into::into),
            ResourceKind::Namespace => self.namespaces.remove(name).map(Into::into),
        }
    }

    pub fn contains(&self, kind: ResourceKind, name: &NamespacedName) -> bool {
        match kind {
            ResourceKind::GatewayClass => self.gateway_classes.contains_key(name),
            ResourceKind::Gateway => self.gateways.contains_key(name),
            ResourceKind::HttpRoute => self.http_routes.contains_key(name),
            ResourceKind::ReferenceGrant => self.reference_grants.contains_key(name),
            ResourceKind::BackendTlsPolicy => self.backend_tls_policies.contains_key(name),
            ResourceKind::Service => self.services.contains_key(name),
            ResourceKind::EndpointSlice => self.endpoint_slices.contains_key(name),
            ResourceKind::Secret => self.secrets.contains_key(name),
            ResourceKind::Namespace => self.namespaces.contains_key(name),
        }
    }

    /// Look up a stored resource by kind. Clones the stored object.
    pub fn get(&self, kind: ResourceKind, name: &NamespacedName) -> Option<Resource> {
        match kind {
            ResourceKind::GatewayClass => self.gateway_classes.get(name).cloned().map(Into::into),
            ResourceKind::Gateway => self.gateways.get(name).cloned().map(Into::into),
            ResourceKind::HttpRoute => self.http_routes.get(name).cloned().map(Into::into),
            ResourceKind::ReferenceGrant => {
                self.reference_grants.get(name).cloned().map(Into::into)
            }
            ResourceKind::BackendTlsPolicy => {
                self.backend_tls_policies.get(name).cloned().map(Into::into)
            }
            ResourceKind::Service => self.services.get(name).cloned().map(Into::into),
            ResourceKind::EndpointSlice => self.endpoint_slices.get(name).cloned().map(Into::into),
            ResourceKind::Secret => self.secrets.get(name).cloned().map(Into::into),
            ResourceKind::Namespace => self.namespaces.get(name).cloned().map(Into::into),
        }
    }

    /// Number of stored objects of a kind
    pub fn count(&self, kind: ResourceKind) -> usize {
        match kind {
            ResourceKind::GatewayClass => self.gateway_classes.len(),
            ResourceKind::Gateway => self.gateways.len(),
            ResourceKind::HttpRoute => self.http_routes.len(),
            ResourceKind::ReferenceGrant => self.reference_grants.len(),
            ResourceKind::BackendTlsPolicy => self.backend_tls_policies.len(),
            ResourceKind::Service => self.services.len(),
            ResourceKind::EndpointSlice => self.endpoint_slices.len(),
            ResourceKind::Secret => self.secrets.len(),
            ResourceKind::Namespace => self.namespaces.len(),
        }
    }
}

/// Shared handle to the working [`ClusterState`].
///
/// Locks are synchronous and held only for the duration of a lookup or a
/// build; no guard is ever held across an `.await`.
#[derive(Debug, Clone, Default)]
pub struct ClusterStore {
    inner: Arc<RwLock<ClusterState>>,
}

impl ClusterStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_state(state: ClusterState) -> Self {
        Self {
            inner: Arc::new(RwLock::new(state)),
        }
    }

    pub fn read(&self) -> RwLockReadGuard<'_, ClusterState> {
        self.inner.read().expect("cluster store lock poisoned")
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, ClusterState> {
        self.inner.write().expect("cluster store lock poisoned")
    }

    /// Owned copy of the current state
    pub fn snapshot(&self) -> ClusterState {
        self.read().clone()
    }
}
