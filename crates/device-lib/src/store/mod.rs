//! Object store seam
//!
//! The updater talks to the API server only through [`ObjectStore`]:
//! get, patch one sub-resource, or replace a whole object. [`KubeStore`]
//! is the production implementation over a `kube::Client`; [`MemoryStore`]
//! keeps objects in process for tests and dry runs.

mod kubernetes;
mod memory;

pub use kubernetes::KubeStore;
pub use memory::{MemoryStore, StoreCall, StoreOp};

use crate::error::{StoreError, SubResource};
use crate::patch::PatchDocument;

pub use async_trait::async_trait;

/// Remote object repository for one kind of object
#[async_trait]
pub trait ObjectStore<K>: Send + Sync {
    /// Fetch the live object
    async fn get(&self, name: &str, namespace: Option<&str>) -> Result<K, StoreError>;

    /// Apply a strategic merge patch to one sub-resource
    async fn patch(
        &self,
        name: &str,
        namespace: Option<&str>,
        patch: &PatchDocument,
        subresource: SubResource,
    ) -> Result<K, StoreError>;

    /// Replace the whole object. The object's resource version is checked
    /// by the server.
    async fn update(&self, object: &K) -> Result<K, StoreError>;
}
