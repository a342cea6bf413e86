//! Object store backed by the Kubernetes API server

use super::ObjectStore;
use crate::error::{StoreError, SubResource};
use crate::observability::SyncMetrics;
use crate::patch::PatchDocument;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::api::{Patch, PatchParams, PostParams};
use kube::{Api, Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;
use std::time::Instant;
use tracing::trace;

/// Store for nodes (cluster scoped) and pods (namespaced)
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
    field_manager: Option<String>,
    metrics: SyncMetrics,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            field_manager: None,
            metrics: SyncMetrics::new(),
        }
    }

    /// Connect using kubeconfig or the in-cluster service account
    pub async fn try_default() -> Result<Self, StoreError> {
        Ok(Self::new(Client::try_default().await?))
    }

    /// Field manager recorded by the API server for our writes
    pub fn with_field_manager(mut self, manager: impl Into<String>) -> Self {
        self.field_manager = Some(manager.into());
        self
    }

    fn nodes(&self) -> Api<Node> {
        Api::all(self.client.clone())
    }

    fn pods(&self, namespace: Option<&str>) -> Api<Pod> {
        match namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::default_namespaced(self.client.clone()),
        }
    }

    async fn get_with<K>(&self, api: &Api<K>, name: &str) -> Result<K, StoreError>
    where
        K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug,
    {
        let start = Instant::now();
        let result = api.get(name).await;
        self.metrics
            .observe_store_latency("get", start.elapsed().as_secs_f64());
        result.map_err(|e| map_error(&K::kind(&()), name, e))
    }

    async fn patch_with<K>(
        &self,
        api: &Api<K>,
        name: &str,
        patch: &PatchDocument,
        subresource: SubResource,
    ) -> Result<K, StoreError>
    where
        K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug,
    {
        let params = PatchParams {
            field_manager: self.field_manager.clone(),
            ..Default::default()
        };
        let body = Patch::Strategic(patch.as_value());
        trace!(name = %name, subresource = %subresource, patch = %patch, "Sending strategic merge patch");

        let start = Instant::now();
        let result = match subresource {
            SubResource::Main => api.patch(name, &params, &body).await,
            SubResource::Status => api.patch_status(name, &params, &body).await,
        };
        self.metrics
            .observe_store_latency("patch", start.elapsed().as_secs_f64());
        result.map_err(|e| map_error(&K::kind(&()), name, e))
    }

    async fn replace_with<K>(&self, api: &Api<K>, object: &K) -> Result<K, StoreError>
    where
        K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Serialize + Debug,
    {
        let name = object.name_any();
        let params = PostParams {
            dry_run: false,
            field_manager: self.field_manager.clone(),
        };

        let start = Instant::now();
        let result = api.replace(&name, &params, object).await;
        self.metrics
            .observe_store_latency("update", start.elapsed().as_secs_f64());
        result.map_err(|e| map_error(&K::kind(&()), &name, e))
    }
}

/// Translate API status codes into store errors
fn map_error(kind: &str, name: &str, err: kube::Error) -> StoreError {
    match err {
        kube::Error::Api(resp) if resp.code == 404 => StoreError::NotFound {
            kind: kind.to_string(),
            name: name.to_string(),
        },
        kube::Error::Api(resp) if resp.code == 409 => StoreError::Conflict {
            kind: kind.to_string(),
            name: name.to_string(),
            message: resp.message,
        },
        kube::Error::Api(resp) if resp.code == 422 => StoreError::Invalid {
            kind: kind.to_string(),
            name: name.to_string(),
            message: resp.message,
        },
        other => StoreError::Kube(other),
    }
}

#[async_trait]
impl ObjectStore<Node> for KubeStore {
    async fn get(&self, name: &str, _namespace: Option<&str>) -> Result<Node, StoreError> {
        self.get_with(&self.nodes(), name).await
    }

    async fn patch(
        &self,
        name: &str,
        _namespace: Option<&str>,
        patch: &PatchDocument,
        subresource: SubResource,
    ) -> Result<Node, StoreError> {
        self.patch_with(&self.nodes(), name, patch, subresource).await
    }

    async fn update(&self, object: &Node) -> Result<Node, StoreError> {
        self.replace_with(&self.nodes(), object).await
    }
}

#[async_trait]
impl ObjectStore<Pod> for KubeStore {
    async fn get(&self, name: &str, namespace: Option<&str>) -> Result<Pod, StoreError> {
        self.get_with(&self.pods(namespace), name).await
    }

    async fn patch(
        &self,
        name: &str,
        namespace: Option<&str>,
        patch: &PatchDocument,
        subresource: SubResource,
    ) -> Result<Pod, StoreError> {
        self.patch_with(&self.pods(namespace), name, patch, subresource)
            .await
    }

    async fn update(&self, object: &Pod) -> Result<Pod, StoreError> {
        let namespace = object.namespace();
        self.replace_with(&self.pods(namespace.as_deref()), object)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;

    fn api_error(code: u16) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: format!("status {code}"),
            reason: String::new(),
            code,
        })
    }

    #[test]
    fn test_map_error_by_status_code() {
        assert!(map_error("Node", "n1", api_error(404)).is_not_found());
        assert!(map_error("Pod", "p1", api_error(409)).is_conflict());
        assert!(matches!(
            map_error("Pod", "p1", api_error(422)),
            StoreError::Invalid { .. }
        ));
        assert!(matches!(
            map_error("Pod", "p1", api_error(500)),
            StoreError::Kube(_)
        ));
    }
}
