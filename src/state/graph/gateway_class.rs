use std::collections::BTreeMap;

use crate::resources::{age_key, GatewayClass, NamespacedName};
use crate::state::conditions::{self, Condition};

use super::IgnoreReason;

#[derive(Debug, Clone)]
pub struct GatewayClassNode {
    pub source: GatewayClass,
    pub name: NamespacedName,
    pub valid: bool,
    pub conditions: Vec<Condition>,
}

#[derive(Debug, Clone)]
pub enum GatewayClassEntry {
    Active(GatewayClassNode),
    Ignored {
        source: GatewayClass,
        reason: IgnoreReason,
    },
}

impl GatewayClassEntry {
    pub fn source(&self) -> &GatewayClass {
        match self {
            GatewayClassEntry::Active(node) => &node.source,
            GatewayClassEntry::Ignored { source, .. } => source,
        }
    }
}

/// Pick the active class among those owned by `controller_name`.
///
/// A configured class name wins outright. Otherwise the oldest class wins,
/// ties broken by name. Every other owned class is ignored.
pub(super) fn build_gateway_classes(
    classes: &BTreeMap<NamespacedName, GatewayClass>,
    controller_name: &str,
    configured: Option<&str>,
) -> BTreeMap<NamespacedName, GatewayClassEntry> {
    let owned: Vec<(&NamespacedName, &GatewayClass)> = classes
        .iter()
        .filter(|(_, class)| class.spec.controller_name == controller_name)
        .collect();

    let winner = match configured {
        Some(name) => owned
            .iter()
            .find(|(key, _)| key.name == name)
            .map(|(key, _)| (*key).clone()),
        None => owned
            .iter()
            .min_by_key(|(key, class)| (age_key(&class.metadata).0, (*key).clone()))
            .map(|(key, _)| (*key).clone()),
    };

    owned
        .into_iter()
        .map(|(key, class)| {
            let entry = if Some(key) == winner.as_ref() {
                GatewayClassEntry::Active(validate(key, class))
            } else {
                GatewayClassEntry::Ignored {
                    source: class.clone(),
                    reason: IgnoreReason::GatewayClassConflict,
                }
            };
            (key.clone(), entry)
        })
        .collect()
}

fn validate(name: &NamespacedName, class: &GatewayClass) -> GatewayClassNode {
    let mut conditions = Vec::new();

    if class.spec.parameters_ref.is_some() {
        conditions.push(conditions::gateway_class_invalid_parameters(
            "spec.parametersRef: parametersRef is not supported",
        ));
    }

    GatewayClassNode {
        source: class.clone(),
        name: name.clone(),
        valid: conditions.is_empty(),
        conditions,
    }
}
