//! Cluster resource model
//!
//! The engine only ever sees the kinds enumerated in [`ResourceKind`]. Core
//! Kubernetes objects come from `k8s-openapi`; Gateway API objects are
//! modelled in [`gateway_api`] with the subset of fields the engine reads.

pub mod gateway_api;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{FlowgateError, Result};

pub use gateway_api::{
    BackendTlsPolicy, Gateway, GatewayClass, HttpRoute, ReferenceGrant, GATEWAY_API_GROUP,
};
pub use k8s_openapi::api::core::v1::{Namespace, Secret, Service};
pub use k8s_openapi::api::discovery::v1::EndpointSlice;
pub use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};

/// Label linking an EndpointSlice to its owning Service.
pub const SERVICE_NAME_LABEL: &str = "kubernetes.io/service-name";

/// Namespace/name pair identifying a resource of a known kind.
///
/// Cluster-scoped resources (GatewayClass, Namespace) use an empty namespace.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct NamespacedName {
    pub namespace: String,
    pub name: String,
}

impl NamespacedName {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Identity of a cluster-scoped resource
    pub fn cluster_scoped(name: impl Into<String>) -> Self {
        Self {
            namespace: String::new(),
            name: name.into(),
        }
    }

    pub fn from_meta(meta: &ObjectMeta) -> Self {
        Self {
            namespace: meta.namespace.clone().unwrap_or_default(),
            name: meta.name.clone().unwrap_or_default(),
        }
    }
}

impl fmt::Display for NamespacedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}/{}", self.namespace, self.name)
        }
    }
}

/// Every kind the engine consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    GatewayClass,
    Gateway,
    HttpRoute,
    ReferenceGrant,
    BackendTlsPolicy,
    Service,
    EndpointSlice,
    Secret,
    Namespace,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 9] = [
        ResourceKind::GatewayClass,
        ResourceKind::Gateway,
        ResourceKind::HttpRoute,
        ResourceKind::ReferenceGrant,
        ResourceKind::BackendTlsPolicy,
        ResourceKind::Service,
        ResourceKind::EndpointSlice,
        ResourceKind::Secret,
        ResourceKind::Namespace,
    ];

    /// Kubernetes `kind` string
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::GatewayClass => "GatewayClass",
            ResourceKind::Gateway => "Gateway",
            ResourceKind::HttpRoute => "HTTPRoute",
            ResourceKind::ReferenceGrant => "ReferenceGrant",
            ResourceKind::BackendTlsPolicy => "BackendTLSPolicy",
            ResourceKind::Service => "Service",
            ResourceKind::EndpointSlice => "EndpointSlice",
            ResourceKind::Secret => "Secret",
            ResourceKind::Namespace => "Namespace",
        }
    }

    /// Primary kinds trigger a rebuild on generation change. Secondary kinds
    /// trigger one only when the graph references them.
    pub fn is_primary(&self) -> bool {
        match self {
            ResourceKind::GatewayClass
            | ResourceKind::Gateway
            | ResourceKind::HttpRoute
            | ResourceKind::ReferenceGrant
            | ResourceKind::BackendTlsPolicy => true,
            ResourceKind::Service
            | ResourceKind::EndpointSlice
            | ResourceKind::Secret
            | ResourceKind::Namespace => false,
        }
    }

    pub fn is_cluster_scoped(&self) -> bool {
        matches!(self, ResourceKind::GatewayClass | ResourceKind::Namespace)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = FlowgateError;

    fn from_str(s: &str) -> Result<Self> {
        ResourceKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| FlowgateError::unsupported_resource(s))
    }
}

/// A resource delivered by the watch layer.
#[derive(Debug, Clone, PartialEq)]
pub enum Resource {
    GatewayClass(GatewayClass),
    Gateway(Gateway),
    HttpRoute(HttpRoute),
    ReferenceGrant(ReferenceGrant),
    BackendTlsPolicy(BackendTlsPolicy),
    Service(Service),
    EndpointSlice(EndpointSlice),
    Secret(Secret),
    Namespace(Namespace),
}

macro_rules! resource_from {
    ($($kind:ident),+ $(,)?) => {
        $(
            impl From<$kind> for Resource {
                fn from(resource: $kind) -> Self {
                    Resource::$kind(resource)
                }
            }
        )+
    };
}

resource_from!(
    GatewayClass,
    Gateway,
    HttpRoute,
    ReferenceGrant,
    BackendTlsPolicy,
    Service,
    EndpointSlice,
    Secret,
    Namespace,
);

impl Resource {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Resource::GatewayClass(_) => ResourceKind::GatewayClass,
            Resource::Gateway(_) => ResourceKind::Gateway,
            Resource::HttpRoute(_) => ResourceKind::HttpRoute,
            Resource::ReferenceGrant(_) => ResourceKind::ReferenceGrant,
            Resource::BackendTlsPolicy(_) => ResourceKind::BackendTlsPolicy,
            Resource::Service(_) => ResourceKind::Service,
            Resource::EndpointSlice(_) => ResourceKind::EndpointSlice,
            Resource::Secret(_) => ResourceKind::Secret,
            Resource::Namespace(_) => ResourceKind::Namespace,
        }
    }

    pub fn metadata(&self) -> &ObjectMeta {
        match self {
            Resource::GatewayClass(r) => &r.metadata,
            Resource::Gateway(r) => &r.metadata,
            Resource::HttpRoute(r) => &r.metadata,
            Resource::ReferenceGrant(r) => &r.metadata,
            Resource::BackendTlsPolicy(r) => &r.metadata,
            Resource::Service(r) => &r.metadata,
            Resource::EndpointSlice(r) => &r.metadata,
            Resource::Secret(r) => &r.metadata,
            Resource::Namespace(r) => &r.metadata,
        }
    }

    pub fn namespaced_name(&self) -> NamespacedName {
        if self.kind().is_cluster_scoped() {
            NamespacedName::cluster_scoped(self.metadata().name.clone().unwrap_or_default())
        } else {
            NamespacedName::from_meta(self.metadata())
        }
    }

    /// Decode a single manifest document using its `kind` field.
    pub fn from_manifest(document: serde_yaml::Value) -> Result<Self> {
        let kind = document
            .get("kind")
            .and_then(serde_yaml::Value::as_str)
            .ok_or_else(|| FlowgateError::validation_field("manifest has no kind", "kind"))?;

        let resource = match kind.parse::<ResourceKind>()? {
            ResourceKind::GatewayClass => Resource::GatewayClass(serde_yaml::from_value(document)?),
            ResourceKind::Gateway => Resource::Gateway(serde_yaml::from_value(document)?),
            ResourceKind::HttpRoute => Resource::HttpRoute(serde_yaml::from_value(document)?),
            ResourceKind::ReferenceGrant => {
                Resource::ReferenceGrant(serde_yaml::from_value(document)?)
            }
            ResourceKind::BackendTlsPolicy => {
                Resource::BackendTlsPolicy(serde_yaml::from_value(document)?)
            }
            ResourceKind::Service => Resource::Service(serde_yaml::from_value(document)?),
            ResourceKind::EndpointSlice => {
                Resource::EndpointSlice(serde_yaml::from_value(document)?)
            }
            ResourceKind::Secret => Resource::Secret(serde_yaml::from_value(document)?),
            ResourceKind::Namespace => Resource::Namespace(serde_yaml::from_value(document)?),
        };

        Ok(resource)
    }
}

/// Split a multi-document YAML stream into manifest values, skipping empty
/// documents.
pub fn manifest_documents(source: &str) -> Result<Vec<serde_yaml::Value>> {
    let mut documents = Vec::new();
    for document in serde_yaml::Deserializer::from_str(source) {
        let value = serde_yaml::Value::deserialize(document)?;
        if !value.is_null() {
            documents.push(value);
        }
    }
    Ok(documents)
}

/// Decode every document of a multi-document YAML stream.
pub fn parse_manifests(source: &str) -> Result<Vec<Resource>> {
    manifest_documents(source)?
        .into_iter()
        .map(Resource::from_manifest)
        .collect()
}

/// Generation recorded by the API server, zero when unset.
pub fn generation(meta: &ObjectMeta) -> i64 {
    meta.generation.unwrap_or_default()
}

/// Creation timestamp used for conflict tie-breaks.
pub fn creation_time(meta: &ObjectMeta) -> Option<DateTime<Utc>> {
    meta.creation_timestamp.as_ref().map(|time| time.0)
}

/// Ordering key shared by every "oldest wins" tie-break: creation time
/// first, then namespace/name.
pub fn age_key(meta: &ObjectMeta) -> (Option<DateTime<Utc>>, NamespacedName) {
    (creation_time(meta), NamespacedName::from_meta(meta))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_round_trips_through_strings() {
        for kind in ResourceKind::ALL {
            assert_eq!(kind.as_str().parse::<ResourceKind>().unwrap(), kind);
        }
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let err = "TCPRoute".parse::<ResourceKind>().unwrap_err();
        assert!(matches!(err, FlowgateError::UnsupportedResource { .. }));
        assert_eq!(err.to_string(), "Unsupported resource kind: TCPRoute");
    }

    #[test]
    fn primary_and_secondary_kinds() {
        assert!(ResourceKind::HttpRoute.is_primary());
        assert!(ResourceKind::BackendTlsPolicy.is_primary());
        assert!(!ResourceKind::EndpointSlice.is_primary());
        assert!(!ResourceKind::Namespace.is_primary());
    }

    #[test]
    fn parses_multi_document_streams() {
        let source = r#"
---
apiVersion: v1
kind: Namespace
metadata:
  name: prod
---
---
apiVersion: v1
kind: Service
metadata:
  name: web
  namespace: prod
"#;
        let resources = parse_manifests(source).unwrap();
        assert_eq!(resources.len(), 2);
        let names: Vec<_> = resources.iter().map(Resource::namespaced_name).collect();
        assert_eq!(
            names,
            vec![
                NamespacedName::cluster_scoped("prod"),
                NamespacedName::new("prod", "web"),
            ]
        );
    }

    #[test]
    fn namespaced_name_display() {
        let namespaced = NamespacedName::new("default", "web");
        assert_eq!(namespaced.to_string(), "default/web");
        let cluster = NamespacedName::cluster_scoped("flowgate");
        assert_eq!(cluster.to_string(), "flowgate");
    }

    #[test]
    fn decodes_manifest_by_kind() {
        let doc: serde_yaml::Value = serde_yaml::from_str(
            r#"
apiVersion: gateway.networking.k8s.io/v1
kind: GatewayClass
metadata:
  name: flowgate
  generation: 2
spec:
  controllerName: example.com/flowgate
"#,
        )
        .unwrap();

        let resource = Resource::from_manifest(doc).unwrap();
        assert_eq!(resource.kind(), ResourceKind::GatewayClass);
        assert_eq!(
            resource.namespaced_name(),
            NamespacedName::cluster_scoped("flowgate")
        );
        assert_eq!(generation(resource.metadata()), 2);
    }

    #[test]
    fn manifest_with_unsupported_kind_fails() {
        let doc: serde_yaml::Value =
            serde_yaml::from_str("kind: TLSRoute\nmetadata:\n  name: x\n").unwrap();
        assert!(Resource::from_manifest(doc).is_err());
    }
}
