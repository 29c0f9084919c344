//! # Reconciliation State
//!
//! Everything between the watch layer and the dataplane renderer: the
//! working cluster store, change detection, the graph, the dataplane
//! configuration and the statuses built from it.

pub mod change_processor;
pub mod conditions;
pub mod dataplane;
pub mod graph;
pub mod relationship;
pub mod resolver;
pub mod secrets;
pub mod statuses;
pub mod store;

pub use change_processor::{
    ChangeProcessor, ChangeType, LatestResult, ProcessOutcome, ProcessResult,
};
pub use conditions::{Condition, ConditionStatus};
pub use dataplane::{build_configuration, Configuration};
pub use graph::{build_graph, BuildContext, Graph};
pub use relationship::RelationshipCapturer;
pub use resolver::{ClusterStoreResolver, Endpoint, ResolveError, ServiceResolver};
pub use secrets::{SecretDiskManager, SecretError, SecretKind, SecretRequester};
pub use statuses::{build_statuses, ApplyOutcome, Statuses};
pub use store::{ClusterState, ClusterStore};
