//! # Metrics Collection
//!
//! Counters emitted by the reconciliation engine. No exporter is installed
//! here; the embedding process decides where the `metrics` facade reports.

use metrics::{counter, describe_counter, describe_gauge, gauge, Unit};

use crate::resources::{NamespacedName, ResourceKind};

/// Metrics recorder for change intake and rebuilds
#[derive(Debug, Clone, Default)]
pub struct ReconcileMetrics;

impl ReconcileMetrics {
    /// Create a new metrics recorder instance
    pub fn new() -> Self {
        Self
    }

    /// Record a captured upsert or delete and whether it marked the state changed
    pub fn record_capture(&self, kind: ResourceKind, operation: &str, changed: bool) {
        let labels = [
            ("kind", kind.to_string()),
            ("operation", operation.to_string()),
            ("changed", changed.to_string()),
        ];
        counter!("flowgate_changes_captured_total", &labels).increment(1);
    }

    /// Record a graph, configuration and status rebuild
    pub fn record_rebuild(&self, version: u64) {
        counter!("flowgate_rebuilds_total").increment(1);
        gauge!("flowgate_configuration_version").set(version as f64);
    }

    /// Record a process call that found nothing to do
    pub fn record_skipped(&self) {
        counter!("flowgate_rebuilds_skipped_total").increment(1);
    }

    /// Update the number of invalid listeners on the active gateway
    pub fn update_invalid_listeners(&self, count: usize) {
        gauge!("flowgate_invalid_listeners").set(count as f64);
    }

    /// Record a Service whose endpoints could not be resolved
    pub fn record_resolver_failure(&self, service: &NamespacedName) {
        let labels = [("service", service.to_string())];
        counter!("flowgate_resolver_failures_total", &labels).increment(1);
    }

    /// Register metric descriptions with the installed recorder
    pub fn register_metrics(&self) {
        describe_counter!(
            "flowgate_changes_captured_total",
            Unit::Count,
            "Resource upserts and deletes captured by the change processor"
        );
        describe_counter!(
            "flowgate_rebuilds_total",
            Unit::Count,
            "Rebuilds of the graph, configuration and statuses"
        );
        describe_counter!(
            "flowgate_rebuilds_skipped_total",
            Unit::Count,
            "Process calls that found no relevant change"
        );
        describe_counter!(
            "flowgate_resolver_failures_total",
            Unit::Count,
            "Service endpoint resolutions that failed"
        );
        describe_gauge!(
            "flowgate_configuration_version",
            Unit::Count,
            "Version of the latest built configuration"
        );
        describe_gauge!(
            "flowgate_invalid_listeners",
            Unit::Count,
            "Invalid listeners on the active gateway"
        );
    }
}
