//! Gateway API condition vocabulary
//!
//! Builders record *negative* conditions on the entity they invalidate.
//! The status builder merges them over the default positive set with
//! [`deduplicate`], so a recorded condition always overrides the default of
//! the same type.

use std::fmt;

use chrono::{DateTime, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition as K8sCondition, Time};
use serde::{Deserialize, Serialize};

pub const TYPE_ACCEPTED: &str = "Accepted";
pub const TYPE_PROGRAMMED: &str = "Programmed";
pub const TYPE_RESOLVED_REFS: &str = "ResolvedRefs";
pub const TYPE_CONFLICTED: &str = "Conflicted";
pub const TYPE_PARTIALLY_INVALID: &str = "PartiallyInvalid";

pub const REASON_ACCEPTED: &str = "Accepted";
pub const REASON_PROGRAMMED: &str = "Programmed";
pub const REASON_RESOLVED_REFS: &str = "ResolvedRefs";
pub const REASON_NO_CONFLICTS: &str = "NoConflicts";
pub const REASON_PENDING: &str = "Pending";
pub const REASON_INVALID: &str = "Invalid";
pub const REASON_INVALID_PARAMETERS: &str = "InvalidParameters";
pub const REASON_GATEWAY_CLASS_CONFLICT: &str = "GatewayClassConflict";
pub const REASON_GATEWAY_CONFLICT: &str = "GatewayConflict";
pub const REASON_UNSUPPORTED_ADDRESS: &str = "UnsupportedAddress";
pub const REASON_UNSUPPORTED_PROTOCOL: &str = "UnsupportedProtocol";
pub const REASON_PORT_UNAVAILABLE: &str = "PortUnavailable";
pub const REASON_UNSUPPORTED_VALUE: &str = "UnsupportedValue";
pub const REASON_INVALID_CERTIFICATE_REF: &str = "InvalidCertificateRef";
pub const REASON_REF_NOT_PERMITTED: &str = "RefNotPermitted";
pub const REASON_INVALID_ROUTE_KINDS: &str = "InvalidRouteKinds";
pub const REASON_PROTOCOL_CONFLICT: &str = "ProtocolConflict";
pub const REASON_HOSTNAME_CONFLICT: &str = "HostnameConflict";
pub const REASON_NO_MATCHING_PARENT: &str = "NoMatchingParent";
pub const REASON_NOT_ALLOWED_BY_LISTENERS: &str = "NotAllowedByListeners";
pub const REASON_NO_MATCHING_LISTENER_HOSTNAME: &str = "NoMatchingListenerHostname";
pub const REASON_INVALID_LISTENER: &str = "InvalidListener";
pub const REASON_INVALID_GATEWAY: &str = "InvalidGateway";
pub const REASON_GATEWAY_IGNORED: &str = "GatewayIgnored";
pub const REASON_INVALID_KIND: &str = "InvalidKind";
pub const REASON_BACKEND_NOT_FOUND: &str = "BackendNotFound";
pub const REASON_CONFLICTED: &str = "Conflicted";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl ConditionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionStatus::True => "True",
            ConditionStatus::False => "False",
            ConditionStatus::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A status condition before generation and timestamp are stamped on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: ConditionStatus,
    pub reason: String,
    pub message: String,
}

impl Condition {
    pub fn new(
        type_: &str,
        status: ConditionStatus,
        reason: &str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_: type_.to_string(),
            status,
            reason: reason.to_string(),
            message: message.into(),
        }
    }

    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }

    /// Convert to the wire type written to resource status.
    pub fn to_k8s(&self, observed_generation: i64, time: DateTime<Utc>) -> K8sCondition {
        K8sCondition {
            last_transition_time: Time(time),
            message: self.message.clone(),
            observed_generation: Some(observed_generation),
            reason: self.reason.clone(),
            status: self.status.to_string(),
            type_: self.type_.clone(),
        }
    }
}

/// Keep the last condition of each type, in order of first appearance.
pub fn deduplicate(conditions: Vec<Condition>) -> Vec<Condition> {
    let mut result: Vec<Condition> = Vec::with_capacity(conditions.len());
    for condition in conditions {
        match result.iter_mut().find(|c| c.type_ == condition.type_) {
            Some(existing) => *existing = condition,
            None => result.push(condition),
        }
    }
    result
}

fn not_programmed(message: impl Into<String>) -> Condition {
    Condition::new(
        TYPE_PROGRAMMED,
        ConditionStatus::False,
        REASON_INVALID,
        message,
    )
}

fn unaccepted(reason: &str, message: impl Into<String>) -> Condition {
    Condition::new(TYPE_ACCEPTED, ConditionStatus::False, reason, message)
}

fn unresolved(reason: &str, message: impl Into<String>) -> Condition {
    Condition::new(TYPE_RESOLVED_REFS, ConditionStatus::False, reason, message)
}

fn conflicted(reason: &str, message: impl Into<String>) -> Condition {
    Condition::new(TYPE_CONFLICTED, ConditionStatus::True, reason, message)
}

// =============================================================================
// GatewayClass
// =============================================================================

pub fn gateway_class_defaults() -> Vec<Condition> {
    vec![Condition::new(
        TYPE_ACCEPTED,
        ConditionStatus::True,
        REASON_ACCEPTED,
        "GatewayClass is accepted",
    )]
}

pub fn gateway_class_invalid_parameters(message: impl Into<String>) -> Condition {
    unaccepted(REASON_INVALID_PARAMETERS, message)
}

pub fn gateway_class_conflict() -> Condition {
    Condition::new(
        TYPE_ACCEPTED,
        ConditionStatus::False,
        REASON_GATEWAY_CLASS_CONFLICT,
        "Another GatewayClass owned by this controller is active",
    )
}

// =============================================================================
// Gateway
// =============================================================================

pub fn gateway_defaults() -> Vec<Condition> {
    vec![
        Condition::new(
            TYPE_ACCEPTED,
            ConditionStatus::True,
            REASON_ACCEPTED,
            "Gateway is accepted",
        ),
        Condition::new(
            TYPE_PROGRAMMED,
            ConditionStatus::True,
            REASON_PROGRAMMED,
            "Gateway is programmed",
        ),
    ]
}

pub fn gateway_conflict() -> Vec<Condition> {
    let message = "Another Gateway of the same GatewayClass is active";
    vec![
        unaccepted(REASON_GATEWAY_CONFLICT, message),
        Condition::new(
            TYPE_PROGRAMMED,
            ConditionStatus::False,
            REASON_GATEWAY_CONFLICT,
            message,
        ),
    ]
}

pub fn gateway_unsupported_address() -> Vec<Condition> {
    let message = "spec.addresses is not supported";
    vec![
        unaccepted(REASON_UNSUPPORTED_ADDRESS, message),
        not_programmed(message),
    ]
}

pub fn gateway_invalid(message: impl Into<String>) -> Vec<Condition> {
    let message = message.into();
    vec![
        unaccepted(REASON_INVALID, message.clone()),
        not_programmed(message),
    ]
}

pub fn gateway_not_programmed(message: impl Into<String>) -> Condition {
    not_programmed(message)
}

// =============================================================================
// Listener
// =============================================================================

pub fn listener_defaults() -> Vec<Condition> {
    vec![
        Condition::new(
            TYPE_ACCEPTED,
            ConditionStatus::True,
            REASON_ACCEPTED,
            "Listener is accepted",
        ),
        Condition::new(
            TYPE_PROGRAMMED,
            ConditionStatus::True,
            REASON_PROGRAMMED,
            "Listener is programmed",
        ),
        Condition::new(
            TYPE_RESOLVED_REFS,
            ConditionStatus::True,
            REASON_RESOLVED_REFS,
            "All references are resolved",
        ),
        Condition::new(
            TYPE_CONFLICTED,
            ConditionStatus::False,
            REASON_NO_CONFLICTS,
            "No conflicts",
        ),
    ]
}

pub fn listener_unsupported_protocol(message: impl Into<String>) -> Vec<Condition> {
    let message = message.into();
    vec![
        unaccepted(REASON_UNSUPPORTED_PROTOCOL, message.clone()),
        not_programmed(message),
    ]
}

pub fn listener_port_unavailable(message: impl Into<String>) -> Vec<Condition> {
    let message = message.into();
    vec![
        unaccepted(REASON_PORT_UNAVAILABLE, message.clone()),
        not_programmed(message),
    ]
}

pub fn listener_unsupported_value(message: impl Into<String>) -> Vec<Condition> {
    let message = message.into();
    vec![
        unaccepted(REASON_UNSUPPORTED_VALUE, message.clone()),
        not_programmed(message),
    ]
}

pub fn listener_invalid_certificate_ref(message: impl Into<String>) -> Vec<Condition> {
    let message = message.into();
    vec![
        unresolved(REASON_INVALID_CERTIFICATE_REF, message.clone()),
        not_programmed(message),
    ]
}

pub fn listener_ref_not_permitted(message: impl Into<String>) -> Vec<Condition> {
    let message = message.into();
    vec![
        unresolved(REASON_REF_NOT_PERMITTED, message.clone()),
        not_programmed(message),
    ]
}

/// Unsupported route kinds. Only invalidates the listener when no supported
/// kind remains, which the caller signals with `listener_invalid`.
pub fn listener_invalid_route_kinds(
    message: impl Into<String>,
    listener_invalid: bool,
) -> Vec<Condition> {
    let message = message.into();
    let mut conditions = vec![unresolved(REASON_INVALID_ROUTE_KINDS, message.clone())];
    if listener_invalid {
        conditions.push(not_programmed(message));
    }
    conditions
}

pub fn listener_protocol_conflict() -> Vec<Condition> {
    let message = "Multiple listeners for the same port use different protocols";
    vec![
        conflicted(REASON_PROTOCOL_CONFLICT, message),
        not_programmed(message),
    ]
}

pub fn listener_hostname_conflict() -> Vec<Condition> {
    let message = "Multiple listeners for the same port use the same hostname";
    vec![
        conflicted(REASON_HOSTNAME_CONFLICT, message),
        not_programmed(message),
    ]
}

// =============================================================================
// HTTPRoute
// =============================================================================

pub fn route_defaults() -> Vec<Condition> {
    vec![
        Condition::new(
            TYPE_ACCEPTED,
            ConditionStatus::True,
            REASON_ACCEPTED,
            "The route is accepted",
        ),
        Condition::new(
            TYPE_RESOLVED_REFS,
            ConditionStatus::True,
            REASON_RESOLVED_REFS,
            "All references are resolved",
        ),
    ]
}

pub fn route_unsupported_value(message: impl Into<String>) -> Condition {
    unaccepted(REASON_UNSUPPORTED_VALUE, message)
}

pub fn route_partially_invalid(message: impl Into<String>) -> Condition {
    Condition::new(
        TYPE_PARTIALLY_INVALID,
        ConditionStatus::True,
        REASON_UNSUPPORTED_VALUE,
        message,
    )
}

pub fn route_no_matching_parent(message: impl Into<String>) -> Condition {
    unaccepted(REASON_NO_MATCHING_PARENT, message)
}

pub fn route_not_allowed_by_listeners() -> Condition {
    unaccepted(
        REASON_NOT_ALLOWED_BY_LISTENERS,
        "Route is not allowed by any listener",
    )
}

pub fn route_no_matching_listener_hostname() -> Condition {
    Condition::new(
        TYPE_ACCEPTED,
        ConditionStatus::False,
        REASON_NO_MATCHING_LISTENER_HOSTNAME,
        "Listener hostname does not match the route hostnames",
    )
}

pub fn route_invalid_listener() -> Condition {
    unaccepted(
        REASON_INVALID_LISTENER,
        "Route is referencing an invalid listener",
    )
}

pub fn route_invalid_gateway() -> Condition {
    unaccepted(REASON_INVALID_GATEWAY, "Parent Gateway is invalid")
}

pub fn route_gateway_ignored() -> Condition {
    unaccepted(
        REASON_GATEWAY_IGNORED,
        "The Gateway is ignored by the controller",
    )
}

pub fn route_backend_ref_invalid_kind(message: impl Into<String>) -> Condition {
    unresolved(REASON_INVALID_KIND, message)
}

pub fn route_backend_ref_not_permitted(message: impl Into<String>) -> Condition {
    unresolved(REASON_REF_NOT_PERMITTED, message)
}

pub fn route_backend_ref_not_found(message: impl Into<String>) -> Condition {
    unresolved(REASON_BACKEND_NOT_FOUND, message)
}

pub fn route_backend_ref_unsupported_value(message: impl Into<String>) -> Condition {
    unresolved(REASON_UNSUPPORTED_VALUE, message)
}

// =============================================================================
// BackendTLSPolicy
// =============================================================================

pub fn policy_defaults() -> Vec<Condition> {
    vec![Condition::new(
        TYPE_ACCEPTED,
        ConditionStatus::True,
        REASON_ACCEPTED,
        "Policy is accepted",
    )]
}

pub fn policy_invalid(message: impl Into<String>) -> Condition {
    unaccepted(REASON_INVALID, message)
}

pub fn policy_conflicted(message: impl Into<String>) -> Condition {
    unaccepted(REASON_CONFLICTED, message)
}

// =============================================================================
// Apply outcome
// =============================================================================

pub fn programmed_pending() -> Condition {
    Condition::new(
        TYPE_PROGRAMMED,
        ConditionStatus::Unknown,
        REASON_PENDING,
        "Waiting for the dataplane configuration to be applied",
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deduplicate_keeps_last_of_each_type() {
        let mut conditions = listener_defaults();
        conditions.extend(listener_hostname_conflict());

        let merged = deduplicate(conditions);
        assert_eq!(merged.len(), 4);

        let conflicted = merged.iter().find(|c| c.type_ == TYPE_CONFLICTED).unwrap();
        assert!(conflicted.is_true());
        assert_eq!(conflicted.reason, REASON_HOSTNAME_CONFLICT);

        let programmed = merged.iter().find(|c| c.type_ == TYPE_PROGRAMMED).unwrap();
        assert_eq!(programmed.status, ConditionStatus::False);

        // first-appearance order is preserved
        assert_eq!(merged[0].type_, TYPE_ACCEPTED);
    }

    #[test]
    fn converts_to_k8s_condition() {
        let time = Utc::now();
        let condition = route_gateway_ignored().to_k8s(3, time);

        assert_eq!(condition.type_, "Accepted");
        assert_eq!(condition.status, "False");
        assert_eq!(condition.reason, REASON_GATEWAY_IGNORED);
        assert_eq!(condition.observed_generation, Some(3));
        assert_eq!(condition.last_transition_time.0, time);
    }

    #[test]
    fn route_kinds_only_invalidate_when_asked() {
        assert_eq!(listener_invalid_route_kinds("x", false).len(), 1);
        assert_eq!(listener_invalid_route_kinds("x", true).len(), 2);
    }
}
