//! # Flowgate
//!
//! Flowgate is the reconciliation engine of a Kubernetes Gateway API control
//! plane. It turns GatewayClasses, Gateways, HTTPRoutes, ReferenceGrants and
//! BackendTLSPolicies, together with the Services, EndpointSlices, Secrets
//! and Namespaces they reference, into a proxy-agnostic dataplane
//! configuration plus the status reports owed to each resource.
//!
//! ## Architecture
//!
//! ```text
//! Watch events → Change Processor → Graph Builder → Configuration Builder → renderer
//!                      ↓                                  ↘
//!            Relationship Capturer                   Status Builder → status writer
//! ```
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use flowgate::state::{
//!     BuildContext, ChangeProcessor, ClusterStore, ClusterStoreResolver, SecretDiskManager,
//! };
//!
//! # async fn run(resources: Vec<flowgate::resources::Resource>) -> flowgate::Result<()> {
//! let store = ClusterStore::new();
//! let mut processor = ChangeProcessor::new(
//!     store.clone(),
//!     BuildContext::new("example.com/flowgate"),
//!     Arc::new(SecretDiskManager::new("/etc/flowgate/secrets")),
//!     Arc::new(ClusterStoreResolver::new(store)),
//! );
//! for resource in resources {
//!     processor.capture_upsert(resource)?;
//! }
//! if let Some(result) = processor.process().await?.result() {
//!     println!("configuration version {}", result.configuration.version);
//! }
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod config;
pub mod errors;
pub mod observability;
pub mod resources;
pub mod state;
pub mod validation;

// Re-export commonly used types
pub use config::AppConfig;
pub use errors::{FlowgateError, Result};

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name from Cargo.toml
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
