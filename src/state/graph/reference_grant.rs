//! Cross-namespace reference authorization
//!
//! A ReferenceGrant lives in the namespace of the *referenced* object and
//! lists which (group, kind, namespace) sources may refer into it.

use std::collections::BTreeMap;

use crate::resources::{NamespacedName, ReferenceGrant};

/// Source side of a cross-namespace reference
#[derive(Debug, Clone, Copy)]
pub struct ReferenceFrom<'a> {
    pub group: &'a str,
    pub kind: &'a str,
    pub namespace: &'a str,
}

/// Target side of a cross-namespace reference
#[derive(Debug, Clone, Copy)]
pub struct ReferenceTo<'a> {
    pub group: &'a str,
    pub kind: &'a str,
    pub namespace: &'a str,
    pub name: &'a str,
}

pub struct ReferenceGrantResolver<'a> {
    grants: &'a BTreeMap<NamespacedName, ReferenceGrant>,
}

impl<'a> ReferenceGrantResolver<'a> {
    pub fn new(grants: &'a BTreeMap<NamespacedName, ReferenceGrant>) -> Self {
        Self { grants }
    }

    /// Same-namespace references are always permitted.
    pub fn permits(&self, from: ReferenceFrom<'_>, to: ReferenceTo<'_>) -> bool {
        if from.namespace == to.namespace {
            return true;
        }

        self.grants
            .iter()
            .filter(|(key, _)| key.namespace == to.namespace)
            .any(|(_, grant)| {
                let from_allowed = grant.spec.from.iter().any(|f| {
                    f.group == from.group && f.kind == from.kind && f.namespace == from.namespace
                });
                let to_allowed = grant.spec.to.iter().any(|t| {
                    t.group == to.group
                        && t.kind == to.kind
                        && t.name.as_deref().map_or(true, |name| name == to.name)
                });
                from_allowed && to_allowed
            })
    }
}
