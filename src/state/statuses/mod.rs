//! # Statuses
//!
//! Per-resource status reports derived from the graph and the outcome of
//! applying the configuration. The status writer stamps generation and
//! transition time through [`Condition::to_k8s`](super::conditions::Condition::to_k8s).

pub mod builder;

use std::collections::{BTreeMap, BTreeSet};

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

use crate::resources::gateway_api::RouteGroupKind;
use crate::resources::NamespacedName;

use super::conditions::Condition;

pub use builder::build_statuses;

/// Result of handing the configuration to the dataplane
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ApplyOutcome {
    /// Not applied yet
    #[default]
    Pending,
    Succeeded,
    Failed { message: String },
    /// Only the named listeners failed to program
    Partial {
        message: String,
        failed_listeners: BTreeSet<String>,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Statuses {
    #[serde(serialize_with = "by_name")]
    pub gateway_classes: BTreeMap<NamespacedName, GatewayClassStatus>,
    #[serde(serialize_with = "by_name")]
    pub gateways: BTreeMap<NamespacedName, GatewayStatus>,
    #[serde(serialize_with = "by_name")]
    pub http_routes: BTreeMap<NamespacedName, HttpRouteStatus>,
    #[serde(serialize_with = "by_name")]
    pub backend_tls_policies: BTreeMap<NamespacedName, PolicyStatus>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayClassStatus {
    pub observed_generation: i64,
    pub conditions: Vec<Condition>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayStatus {
    pub observed_generation: i64,
    pub conditions: Vec<Condition>,
    pub listeners: Vec<ListenerStatus>,
}

impl GatewayStatus {
    pub fn listener(&self, name: &str) -> Option<&ListenerStatus> {
        self.listeners.iter().find(|l| l.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListenerStatus {
    pub name: String,
    pub attached_routes: usize,
    pub supported_kinds: Vec<RouteGroupKind>,
    pub conditions: Vec<Condition>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpRouteStatus {
    pub observed_generation: i64,
    pub parents: Vec<ParentStatus>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParentStatus {
    pub gateway: NamespacedName,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section_name: Option<String>,
    pub controller_name: String,
    pub conditions: Vec<Condition>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyStatus {
    pub observed_generation: i64,
    pub ancestors: Vec<AncestorStatus>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AncestorStatus {
    pub gateway: NamespacedName,
    pub controller_name: String,
    pub conditions: Vec<Condition>,
}

/// Find a condition by type.
pub fn find_condition<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

/// JSON object keys must be strings, so maps are keyed by `namespace/name`.
fn by_name<S, V>(map: &BTreeMap<NamespacedName, V>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
    V: Serialize,
{
    let mut out = serializer.serialize_map(Some(map.len()))?;
    for (name, value) in map {
        out.serialize_entry(&name.to_string(), value)?;
    }
    out.end()
}
