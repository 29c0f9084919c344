//! `flowgate reconcile`: one pass over a manifest snapshot
//!
//! The command stands in for the watch layer. It filters what a watch would
//! never deliver (unsupported kinds, GatewayClasses of other controllers),
//! captures the rest, and runs a single process pass.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::errors::FlowgateError;
use crate::resources::{manifest_documents, Resource};
use crate::state::{
    BuildContext, ChangeProcessor, ClusterStore, ClusterStoreResolver, Configuration,
    ProcessOutcome, SecretDiskManager, Statuses,
};

/// Everything one reconcile pass produced
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    pub configuration: Configuration,
    pub statuses: Statuses,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub secret_files: Vec<PathBuf>,
}

/// Decode a snapshot file, skipping kinds the engine does not consume.
pub fn load_snapshot(path: &Path) -> Result<Vec<Resource>> {
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read snapshot {}", path.display()))?;

    let mut resources = Vec::new();
    for document in manifest_documents(&source)? {
        match Resource::from_manifest(document) {
            Ok(resource) => resources.push(resource),
            Err(FlowgateError::UnsupportedResource { kind }) => {
                warn!(kind = %kind, "Skipping unsupported manifest");
            }
            Err(e) => return Err(e).context("Failed to decode manifest"),
        }
    }

    info!(count = resources.len(), snapshot = %path.display(), "Loaded snapshot");
    Ok(resources)
}

/// Capture every resource and run one process pass.
pub async fn reconcile(
    config: &AppConfig,
    resources: Vec<Resource>,
    write_secrets: bool,
) -> Result<ReconcileReport> {
    let store = ClusterStore::new();
    let secrets = Arc::new(SecretDiskManager::new(&config.controller.secrets_dir));
    let resolver = Arc::new(ClusterStoreResolver::new(store.clone()));
    let mut processor = ChangeProcessor::new(
        store,
        BuildContext::from_config(&config.controller),
        secrets.clone(),
        resolver,
    );

    for resource in resources {
        if let Resource::GatewayClass(class) = &resource {
            if class.spec.controller_name != config.controller.controller_name {
                debug!(
                    gateway_class = %resource.namespaced_name(),
                    controller = %class.spec.controller_name,
                    "Skipping GatewayClass of another controller"
                );
                continue;
            }
        }
        processor.capture_upsert(resource)?;
    }

    let report = match processor.process().await? {
        ProcessOutcome::Changed(result) => {
            let secret_files = if write_secrets {
                secrets.write_all()?
            } else {
                Vec::new()
            };
            ReconcileReport {
                configuration: result.configuration.clone(),
                statuses: result.statuses.clone(),
                secret_files,
            }
        }
        ProcessOutcome::NoChange => ReconcileReport {
            configuration: Configuration::empty(0),
            statuses: Statuses::default(),
            secret_files: Vec::new(),
        },
    };

    Ok(report)
}
