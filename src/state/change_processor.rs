//! # Change Processor
//!
//! Top-level state machine of the engine. Watch events are merged into the
//! working [`ClusterStore`] through [`ChangeProcessor::capture_upsert`] and
//! [`ChangeProcessor::capture_delete`]; [`ChangeProcessor::process`] rebuilds
//! the graph, the dataplane configuration and the statuses only when a
//! captured change can affect them.
//!
//! Endpoints are resolved while building the configuration, not the graph.
//! A batch that only moved endpoints of referenced Services keeps the last
//! graph and statuses and rebuilds the configuration alone.
//!
//! Capture and process calls come from one serialized intake loop. The last
//! complete result is published through a [`LatestResult`] handle that may be
//! read from other tasks while a build is running.

use std::sync::{Arc, RwLock};

use tracing::{debug, info, Instrument};

use crate::errors::{FlowgateError, Result};
use crate::observability::metrics::ReconcileMetrics;
use crate::reconcile_span;
use crate::resources::{generation, NamespacedName, Resource, ResourceKind};

use super::dataplane::{build_configuration, Configuration};
use super::graph::{build_graph, BuildContext, Graph};
use super::relationship::RelationshipCapturer;
use super::resolver::ServiceResolver;
use super::secrets::SecretRequester;
use super::statuses::{build_statuses, ApplyOutcome, Statuses};
use super::store::ClusterStore;

/// How much of the last result a batch of captured changes invalidates.
///
/// Variants are ordered by reach; a batch keeps the widest change it saw.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum ChangeType {
    #[default]
    NoChange,
    /// Only EndpointSlices of referenced Services changed
    EndpointsOnly,
    /// The graph must be rebuilt
    ClusterState,
}

impl ChangeType {
    fn merge(self, other: ChangeType) -> ChangeType {
        self.max(other)
    }
}

/// Output of one rebuild
#[derive(Debug, Clone)]
pub struct ProcessResult {
    pub graph: Arc<Graph>,
    pub configuration: Configuration,
    /// Statuses before the configuration is applied
    pub statuses: Statuses,
}

impl ProcessResult {
    /// Statuses once the dataplane reported how applying went
    pub fn statuses_for(&self, outcome: &ApplyOutcome) -> Statuses {
        build_statuses(&self.graph, outcome)
    }
}

#[derive(Debug, Clone)]
pub enum ProcessOutcome {
    /// Nothing captured since the last rebuild can change the result
    NoChange,
    Changed(Arc<ProcessResult>),
}

impl ProcessOutcome {
    pub fn is_changed(&self) -> bool {
        matches!(self, ProcessOutcome::Changed(_))
    }

    pub fn result(&self) -> Option<&Arc<ProcessResult>> {
        match self {
            ProcessOutcome::NoChange => None,
            ProcessOutcome::Changed(result) => Some(result),
        }
    }
}

/// Read side of the last complete [`ProcessResult`].
///
/// The slot is swapped in one step after a build finishes, so readers see
/// either the previous result or the new one, never a partial build.
#[derive(Debug, Clone, Default)]
pub struct LatestResult {
    inner: Arc<RwLock<Option<Arc<ProcessResult>>>>,
}

impl LatestResult {
    pub fn get(&self) -> Option<Arc<ProcessResult>> {
        self.inner
            .read()
            .expect("latest result lock poisoned")
            .clone()
    }

    fn set(&self, result: Arc<ProcessResult>) {
        *self.inner.write().expect("latest result lock poisoned") = Some(result);
    }
}

pub struct ChangeProcessor {
    store: ClusterStore,
    ctx: BuildContext,
    secrets: Arc<dyn SecretRequester>,
    resolver: Arc<dyn ServiceResolver>,
    capturer: RelationshipCapturer,
    change: ChangeType,
    version: u64,
    latest: LatestResult,
    metrics: ReconcileMetrics,
}

impl ChangeProcessor {
    pub fn new(
        store: ClusterStore,
        ctx: BuildContext,
        secrets: Arc<dyn SecretRequester>,
        resolver: Arc<dyn ServiceResolver>,
    ) -> Self {
        Self {
            store,
            ctx,
            secrets,
            resolver,
            capturer: RelationshipCapturer::new(),
            change: ChangeType::NoChange,
            version: 0,
            latest: LatestResult::default(),
            metrics: ReconcileMetrics::new(),
        }
    }

    /// Working store shared with the resolver
    pub fn store(&self) -> &ClusterStore {
        &self.store
    }

    pub fn latest_handle(&self) -> LatestResult {
        self.latest.clone()
    }

    /// Whether a captured change is waiting for [`process`](Self::process)
    pub fn has_pending_changes(&self) -> bool {
        self.change != ChangeType::NoChange
    }

    /// Widest change captured since the last successful process
    pub fn pending_change(&self) -> ChangeType {
        self.change
    }

    /// Record a created or updated resource.
    ///
    /// Fails on a GatewayClass owned by another controller; the watch layer
    /// must never deliver one.
    pub fn capture_upsert(&mut self, resource: Resource) -> Result<()> {
        if let Resource::GatewayClass(class) = &resource {
            if class.spec.controller_name != self.ctx.controller_name {
                return Err(FlowgateError::ForeignGatewayClass {
                    name: resource.namespaced_name().to_string(),
                    controller: class.spec.controller_name.clone(),
                });
            }
        }

        let kind = resource.kind();
        let change = if kind.is_primary() {
            let new_generation = generation(resource.metadata());
            let previous = self.store.write().upsert(resource);
            match previous {
                Some(previous) if generation(previous.metadata()) == new_generation => {
                    ChangeType::NoChange
                }
                _ => ChangeType::ClusterState,
            }
        } else {
            let change = self.secondary_change(&resource);
            self.store.write().upsert(resource);
            change
        };

        self.record(kind, "upsert", change);
        Ok(())
    }

    /// Record a deleted resource. Deleting an unknown object changes nothing.
    pub fn capture_delete(&mut self, kind: ResourceKind, name: &NamespacedName) -> Result<()> {
        let previous = self.store.write().delete(kind, name);
        let change = match previous {
            Some(_) if kind.is_primary() => ChangeType::ClusterState,
            Some(previous) => self.secondary_change(&previous),
            None => ChangeType::NoChange,
        };

        self.record(kind, "delete", change);
        Ok(())
    }

    fn secondary_change(&self, resource: &Resource) -> ChangeType {
        if !self.capturer.is_relevant(resource) {
            return ChangeType::NoChange;
        }
        match resource.kind() {
            ResourceKind::EndpointSlice => ChangeType::EndpointsOnly,
            _ => ChangeType::ClusterState,
        }
    }

    fn record(&mut self, kind: ResourceKind, operation: &str, change: ChangeType) {
        let changed = change != ChangeType::NoChange;
        debug!(kind = %kind, operation, change = ?change, "Captured change");
        self.metrics.record_capture(kind, operation, changed);
        self.change = self.change.merge(change);
    }

    /// Rebuild what the captured changes invalidated.
    ///
    /// An error means an admission-guaranteed invariant did not hold; the
    /// pending change is kept so the caller may retry after recovery.
    pub async fn process(&mut self) -> Result<ProcessOutcome> {
        let change = self.change;
        if change == ChangeType::NoChange {
            self.metrics.record_skipped();
            return Ok(ProcessOutcome::NoChange);
        }

        let version = self.version + 1;
        let span = reconcile_span!("process", version = version, change = ?change);
        let result = match (change, self.latest.get()) {
            (ChangeType::EndpointsOnly, Some(previous)) => {
                self.refresh_endpoints(&previous, version)
                    .instrument(span)
                    .await
            }
            _ => self.rebuild(version).instrument(span).await?,
        };

        self.version = version;
        self.change = ChangeType::NoChange;
        self.latest.set(result.clone());
        Ok(ProcessOutcome::Changed(result))
    }

    async fn rebuild(&mut self, version: u64) -> Result<Arc<ProcessResult>> {
        self.secrets.reset();

        let graph = {
            let state = self.store.read();
            build_graph(&state, &self.ctx, self.secrets.as_ref())?
        };
        self.capturer = RelationshipCapturer::from_graph(&graph);

        let configuration = build_configuration(&graph, self.resolver.as_ref(), version).await;
        let statuses = build_statuses(&graph, &ApplyOutcome::Pending);

        let invalid_listeners = graph
            .active_gateway()
            .map(|gateway| gateway.listeners.iter().filter(|l| !l.valid).count())
            .unwrap_or(0);
        self.metrics.update_invalid_listeners(invalid_listeners);
        self.metrics.record_rebuild(version);

        info!(
            version,
            http_servers = configuration.http_servers.len(),
            ssl_servers = configuration.ssl_servers.len(),
            upstreams = configuration.upstreams.len(),
            invalid_listeners,
            "Rebuilt dataplane configuration"
        );

        Ok(Arc::new(ProcessResult {
            graph: Arc::new(graph),
            configuration,
            statuses,
        }))
    }

    /// Re-resolve upstreams against the previous graph.
    async fn refresh_endpoints(
        &self,
        previous: &ProcessResult,
        version: u64,
    ) -> Arc<ProcessResult> {
        let graph = Arc::clone(&previous.graph);
        let configuration = build_configuration(&graph, self.resolver.as_ref(), version).await;
        self.metrics.record_rebuild(version);

        info!(
            version,
            upstreams = configuration.upstreams.len(),
            "Refreshed upstream endpoints"
        );

        Arc::new(ProcessResult {
            graph,
            configuration,
            statuses: previous.statuses.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::{EndpointSlice, ObjectMeta, Secret, Service, SERVICE_NAME_LABEL};
    use crate::state::resolver::ClusterStoreResolver;
    use crate::state::secrets::{SecretError, SecretKind};
    use serde::Deserialize;
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    struct FixedPath;

    impl SecretRequester for FixedPath {
        fn request(
            &self,
            name: &NamespacedName,
            _: &Secret,
            _: SecretKind,
        ) -> std::result::Result<PathBuf, SecretError> {
            Ok(PathBuf::from(format!(
                "/secrets/{}_{}.pem",
                name.namespace, name.name
            )))
        }
    }

    const MANIFESTS: &str = r#"
apiVersion: gateway.networking.k8s.io/v1
kind: GatewayClass
metadata:
  name: flowgate
  generation: 1
spec:
  controllerName: example.com/flowgate
---
apiVersion: gateway.networking.k8s.io/v1
kind: Gateway
metadata:
  name: gateway
  namespace: default
  generation: 1
spec:
  gatewayClassName: flowgate
  listeners:
    - name: http
      port: 80
      protocol: HTTP
---
apiVersion: gateway.networking.k8s.io/v1
kind: HTTPRoute
metadata:
  name: coffee
  namespace: default
  generation: 1
spec:
  parentRefs:
    - name: gateway
  hostnames:
    - cafe.example.com
  rules:
    - backendRefs:
        - name: coffee
          port: 80
"#;

    fn manifests(source: &str) -> Vec<Resource> {
        serde_yaml::Deserializer::from_str(source)
            .map(|doc| {
                let value = serde_yaml::Value::deserialize(doc).unwrap();
                Resource::from_manifest(value).unwrap()
            })
            .collect()
    }

    fn processor() -> ChangeProcessor {
        let store = ClusterStore::new();
        let resolver = Arc::new(ClusterStoreResolver::new(store.clone()));
        ChangeProcessor::new(
            store,
            BuildContext::new("example.com/flowgate"),
            Arc::new(FixedPath),
            resolver,
        )
    }

    fn service(name: &str) -> Resource {
        Resource::Service(Service {
            metadata: ObjectMeta {
                namespace: Some("default".to_string()),
                name: Some(name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        })
    }

    fn endpoint_slice(service: &str) -> Resource {
        Resource::EndpointSlice(EndpointSlice {
            metadata: ObjectMeta {
                namespace: Some("default".to_string()),
                name: Some(format!("{}-abc12", service)),
                labels: Some(BTreeMap::from([(
                    SERVICE_NAME_LABEL.to_string(),
                    service.to_string(),
                )])),
                ..Default::default()
            },
            address_type: "IPv4".to_string(),
            ..Default::default()
        })
    }

    async fn loaded() -> ChangeProcessor {
        let mut processor = processor();
        for resource in manifests(MANIFESTS) {
            processor.capture_upsert(resource).unwrap();
        }
        assert!(processor.process().await.unwrap().is_changed());
        processor
    }

    #[tokio::test]
    async fn test_process_without_captures_is_noop() {
        let mut processor = processor();
        assert!(!processor.process().await.unwrap().is_changed());
        assert!(processor.latest_handle().get().is_none());
    }

    #[tokio::test]
    async fn test_reprocess_is_idempotent() {
        let mut processor = loaded().await;
        let first = processor.latest_handle().get().unwrap();

        assert!(!processor.process().await.unwrap().is_changed());
        assert!(!processor.process().await.unwrap().is_changed());
        let latest = processor.latest_handle().get().unwrap();
        assert_eq!(latest.configuration, first.configuration);
    }

    #[tokio::test]
    async fn test_same_generation_does_not_rebuild() {
        let mut processor = loaded().await;

        // A status-only edit keeps the generation.
        let route = manifests(MANIFESTS).pop().unwrap();
        processor.capture_upsert(route.clone()).unwrap();
        assert!(!processor.has_pending_changes());

        let Resource::HttpRoute(mut bumped) = route else {
            panic!("expected HTTPRoute")
        };
        bumped.metadata.generation = Some(2);
        processor
            .capture_upsert(Resource::HttpRoute(bumped))
            .unwrap();
        assert!(processor.has_pending_changes());
    }

    #[tokio::test]
    async fn test_changed_flag_is_monotonic() {
        let mut processor = loaded().await;

        processor.capture_upsert(service("coffee")).unwrap();
        assert!(processor.has_pending_changes());
        processor.capture_upsert(service("unrelated")).unwrap();
        assert!(processor.has_pending_changes());

        let outcome = processor.process().await.unwrap();
        assert_eq!(outcome.result().unwrap().configuration.version, 2);
    }

    #[tokio::test]
    async fn test_endpoint_only_change_reuses_graph() {
        let mut processor = loaded().await;
        let before = processor.latest_handle().get().unwrap();

        processor
            .capture_upsert(endpoint_slice("unrelated"))
            .unwrap();
        assert_eq!(processor.pending_change(), ChangeType::NoChange);
        processor.capture_upsert(endpoint_slice("coffee")).unwrap();
        assert_eq!(processor.pending_change(), ChangeType::EndpointsOnly);

        let outcome = processor.process().await.unwrap();
        let after = outcome.result().unwrap();
        assert!(Arc::ptr_eq(&before.graph, &after.graph));
        assert_eq!(after.configuration.version, 2);
        assert!(!processor.has_pending_changes());
    }

    #[tokio::test]
    async fn test_cluster_change_outranks_endpoint_change() {
        let mut processor = loaded().await;
        let before = processor.latest_handle().get().unwrap();

        processor.capture_upsert(service("coffee")).unwrap();
        processor.capture_upsert(endpoint_slice("coffee")).unwrap();
        assert_eq!(processor.pending_change(), ChangeType::ClusterState);

        let outcome = processor.process().await.unwrap();
        assert!(!Arc::ptr_eq(&before.graph, &outcome.result().unwrap().graph));
    }

    #[tokio::test]
    async fn test_unreferenced_secondary_resources_are_ignored() {
        let mut processor = loaded().await;

        processor.capture_upsert(service("unrelated")).unwrap();
        processor
            .capture_delete(
                ResourceKind::Service,
                &NamespacedName::new("default", "unrelated"),
            )
            .unwrap();
        processor
            .capture_delete(
                ResourceKind::Secret,
                &NamespacedName::new("default", "missing"),
            )
            .unwrap();
        assert!(!processor.process().await.unwrap().is_changed());
    }

    #[tokio::test]
    async fn test_primary_delete_rebuilds() {
        let mut processor = loaded().await;

        processor
            .capture_delete(
                ResourceKind::HttpRoute,
                &NamespacedName::new("default", "coffee"),
            )
            .unwrap();
        let outcome = processor.process().await.unwrap();
        let result = outcome.result().unwrap();
        assert!(result.graph.routes.is_empty());
        assert!(result.configuration.upstreams.is_empty());
    }

    #[tokio::test]
    async fn test_foreign_gateway_class_is_rejected() {
        let mut processor = processor();
        let class = manifests(
            r#"
apiVersion: gateway.networking.k8s.io/v1
kind: GatewayClass
metadata:
  name: other
spec:
  controllerName: example.org/other
"#,
        )
        .pop()
        .unwrap();

        let err = processor.capture_upsert(class).unwrap_err();
        assert!(matches!(err, FlowgateError::ForeignGatewayClass { .. }));
        assert!(err.is_fatal());
        assert!(!processor.has_pending_changes());
    }

    #[tokio::test]
    async fn test_statuses_after_apply() {
        let processor = loaded().await;
        let latest = processor.latest_handle().get().unwrap();
        let statuses = latest.statuses_for(&ApplyOutcome::Succeeded);
        let gateway = &statuses.gateways[&NamespacedName::new("default", "gateway")];
        assert!(gateway.conditions.iter().all(|c| c.is_true()));
    }
}
