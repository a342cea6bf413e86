//! Device state synchronization for Kubernetes nodes and pods
//!
//! Scheduler-private device state lives in the `KubeDevice/DeviceInfo`
//! annotation. This crate provides:
//! - The private model and its annotation codec
//! - Reconciliation with the fields Kubernetes is authoritative for
//! - Strategic merge patch computation
//! - Ordered patch plans and metadata-only updates over an object store
//! - Health checks and observability

pub mod codec;
pub mod error;
pub mod health;
pub mod observability;
pub mod patch;
pub mod quantity;
pub mod reconcile;
pub mod store;
pub mod types;
pub mod update;

pub use codec::ANNOTATION_KEY;
pub use error::{StoreError, SubResource, SyncError};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use observability::{StructuredLogger, SyncMetrics};
pub use reconcile::{annotation_to_node_info, reconcile_node, reconcile_pod};
pub use store::{KubeStore, MemoryStore, ObjectStore};
pub use types::*;
pub use update::{PatchPlan, PatchStep, Updater};
