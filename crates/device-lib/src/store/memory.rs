//! In-process object store
//!
//! Mirrors the API server behaviour the updater relies on:
//! - strategic merge patches, applied with the object's [`PatchSchema`]
//! - a patch to the main resource ignores `status`; a patch to `status`
//!   only changes `status` and `metadata`
//! - full updates must carry the current resource version, keep the stored
//!   `status`, and may not change declared immutable fields
//!
//! Failures can be injected per operation, and every call is recorded.

use super::ObjectStore;
use crate::error::{StoreError, SubResource};
use crate::patch::{apply_patch, PatchDocument, PatchSchema, Strategic};
use async_trait::async_trait;
use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};
use std::marker::PhantomData;
use tokio::sync::RwLock;

/// Store operation, used for call history and failure injection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
    Get,
    Patch(SubResource),
    Update,
}

/// A recorded call
#[derive(Debug, Clone, PartialEq)]
pub struct StoreCall {
    pub op: StoreOp,
    pub name: String,
    /// Patch body for patch calls
    pub body: Option<Value>,
}

type ObjectKey = (String, String);

/// Objects of kind `K` kept as JSON in memory
pub struct MemoryStore<K> {
    objects: RwLock<BTreeMap<ObjectKey, Value>>,
    calls: RwLock<Vec<StoreCall>>,
    failures: RwLock<VecDeque<(StoreOp, String)>>,
    immutable: Vec<&'static str>,
    schema: PatchSchema,
    _kind: PhantomData<fn() -> K>,
}

impl<K> Default for MemoryStore<K>
where
    K: Strategic,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> MemoryStore<K>
where
    K: Strategic,
{
    pub fn new() -> Self {
        Self::with_schema(K::patch_schema())
    }
}

impl<K> MemoryStore<K> {
    pub fn with_schema(schema: PatchSchema) -> Self {
        Self {
            objects: RwLock::new(BTreeMap::new()),
            calls: RwLock::new(Vec::new()),
            failures: RwLock::new(VecDeque::new()),
            immutable: Vec::new(),
            schema,
            _kind: PhantomData,
        }
    }

    /// Reject full updates that change the field at `pointer`
    /// (JSON pointer, e.g. `/spec/nodeName`)
    pub fn with_immutable_field(mut self, pointer: &'static str) -> Self {
        self.immutable.push(pointer);
        self
    }

    /// Make the next call of kind `op` fail
    pub async fn fail_next(&self, op: StoreOp, message: impl Into<String>) {
        self.failures.write().await.push_back((op, message.into()));
    }

    /// Calls made so far, oldest first
    pub async fn calls(&self) -> Vec<StoreCall> {
        self.calls.read().await.clone()
    }

    async fn record(&self, op: StoreOp, name: &str, body: Option<Value>) {
        self.calls.write().await.push(StoreCall {
            op,
            name: name.to_string(),
            body,
        });
    }

    async fn take_failure(&self, op: StoreOp) -> Option<String> {
        let mut failures = self.failures.write().await;
        let index = failures.iter().position(|(o, _)| *o == op)?;
        failures.remove(index).map(|(_, message)| message)
    }
}

fn object_key(name: &str, namespace: Option<&str>) -> ObjectKey {
    (namespace.unwrap_or_default().to_string(), name.to_string())
}

fn bump_version(object: &mut Value) {
    let next = object
        .pointer("/metadata/resourceVersion")
        .and_then(Value::as_str)
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0)
        + 1;
    object["metadata"]["resourceVersion"] = Value::String(next.to_string());
}

impl<K> MemoryStore<K>
where
    K: Resource<DynamicType = ()> + Serialize + DeserializeOwned + Send + Sync,
{
    fn kind() -> String {
        K::kind(&()).to_string()
    }

    fn injected(name: &str, message: String) -> StoreError {
        StoreError::Injected {
            kind: Self::kind(),
            name: name.to_string(),
            message,
        }
    }

    fn not_found(name: &str) -> StoreError {
        StoreError::NotFound {
            kind: Self::kind(),
            name: name.to_string(),
        }
    }

    fn decode(name: &str, value: &Value) -> Result<K, StoreError> {
        serde_json::from_value(value.clone()).map_err(|e| StoreError::Invalid {
            kind: Self::kind(),
            name: name.to_string(),
            message: e.to_string(),
        })
    }

    /// Seed or overwrite an object, bypassing every check.
    ///
    /// Panics if the object cannot be serialized.
    pub async fn insert(&self, object: &K) {
        let key = object_key(&object.name_any(), object.namespace().as_deref());
        let mut value = serde_json::to_value(object).expect("object serializes to JSON");
        if value.pointer("/metadata/resourceVersion").is_none() {
            bump_version(&mut value);
        }
        self.objects.write().await.insert(key, value);
    }

    /// Current stored copy, without recording a call
    pub async fn object(&self, name: &str, namespace: Option<&str>) -> Option<K> {
        self.objects
            .read()
            .await
            .get(&object_key(name, namespace))
            .and_then(|v| Self::decode(name, v).ok())
    }
}

#[async_trait]
impl<K> ObjectStore<K> for MemoryStore<K>
where
    K: Resource<DynamicType = ()> + Serialize + DeserializeOwned + Send + Sync,
{
    async fn get(&self, name: &str, namespace: Option<&str>) -> Result<K, StoreError> {
        self.record(StoreOp::Get, name, None).await;
        if let Some(message) = self.take_failure(StoreOp::Get).await {
            return Err(Self::injected(name, message));
        }

        self.objects
            .read()
            .await
            .get(&object_key(name, namespace))
            .ok_or_else(|| Self::not_found(name))
            .and_then(|v| Self::decode(name, v))
    }

    async fn patch(
        &self,
        name: &str,
        namespace: Option<&str>,
        patch: &PatchDocument,
        subresource: SubResource,
    ) -> Result<K, StoreError> {
        let op = StoreOp::Patch(subresource);
        self.record(op, name, Some(patch.as_value().clone())).await;
        if let Some(message) = self.take_failure(op).await {
            return Err(Self::injected(name, message));
        }

        let mut objects = self.objects.write().await;
        let stored = objects
            .get_mut(&object_key(name, namespace))
            .ok_or_else(|| Self::not_found(name))?;

        let mut body = patch.as_value().clone();
        if let Value::Object(fields) = &mut body {
            match subresource {
                SubResource::Main => {
                    fields.remove("status");
                }
                SubResource::Status => fields.retain(|k, _| k == "status" || k == "metadata"),
            }
        }
        apply_patch(stored, &PatchDocument::new(body), &self.schema);
        bump_version(stored);
        Self::decode(name, stored)
    }

    async fn update(&self, object: &K) -> Result<K, StoreError> {
        let name = object.name_any();
        self.record(StoreOp::Update, &name, None).await;
        if let Some(message) = self.take_failure(StoreOp::Update).await {
            return Err(Self::injected(&name, message));
        }

        let mut objects = self.objects.write().await;
        let stored = objects
            .get_mut(&object_key(&name, object.namespace().as_deref()))
            .ok_or_else(|| Self::not_found(&name))?;

        let mut incoming = serde_json::to_value(object).map_err(|e| StoreError::Invalid {
            kind: Self::kind(),
            name: name.clone(),
            message: e.to_string(),
        })?;

        let current_version = stored.pointer("/metadata/resourceVersion").cloned();
        if incoming.pointer("/metadata/resourceVersion") != current_version.as_ref() {
            return Err(StoreError::Conflict {
                kind: Self::kind(),
                name,
                message: "the object has been modified; please apply your changes to the latest version".to_string(),
            });
        }
        for pointer in &self.immutable {
            if incoming.pointer(pointer) != stored.pointer(pointer) {
                return Err(StoreError::Invalid {
                    kind: Self::kind(),
                    name,
                    message: format!("field {pointer} is immutable"),
                });
            }
        }

        if let Value::Object(fields) = &mut incoming {
            match stored.get("status") {
                Some(status) => fields.insert("status".to_string(), status.clone()),
                None => fields.remove("status"),
            };
        }
        *stored = incoming;
        bump_version(stored);
        Self::decode(&name, stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{Pod, PodSpec, PodStatus};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use serde_json::json;

    fn pod(node: &str) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some("p".to_string()),
                namespace: Some("ns".to_string()),
                ..Default::default()
            },
            spec: Some(PodSpec {
                node_name: Some(node.to_string()),
                ..Default::default()
            }),
            status: Some(PodStatus {
                phase: Some("Running".to_string()),
                ..Default::default()
            }),
        }
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let store = MemoryStore::<Pod>::new();
        let err = store.get("p", Some("ns")).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_patch_main_ignores_status() {
        let store = MemoryStore::<Pod>::new();
        store.insert(&pod("n1")).await;

        let patch = PatchDocument::new(json!({
            "metadata": {"labels": {"a": "b"}},
            "status": {"phase": "Failed"}
        }));
        let updated = store
            .patch("p", Some("ns"), &patch, SubResource::Main)
            .await
            .unwrap();

        assert_eq!(updated.labels()["a"], "b");
        assert_eq!(updated.status.unwrap().phase.as_deref(), Some("Running"));
        assert_eq!(updated.metadata.resource_version.as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn test_patch_status_ignores_spec() {
        let store = MemoryStore::<Pod>::new();
        store.insert(&pod("n1")).await;

        let patch = PatchDocument::new(json!({
            "spec": {"nodeName": "n2"},
            "status": {"phase": "Failed"}
        }));
        let updated = store
            .patch("p", Some("ns"), &patch, SubResource::Status)
            .await
            .unwrap();

        assert_eq!(updated.spec.unwrap().node_name.as_deref(), Some("n1"));
        assert_eq!(updated.status.unwrap().phase.as_deref(), Some("Failed"));
    }

    #[tokio::test]
    async fn test_update_rejects_stale_version() {
        let store = MemoryStore::<Pod>::new();
        store.insert(&pod("n1")).await;
        let mut stale = store.get("p", Some("ns")).await.unwrap();
        store
            .patch(
                "p",
                Some("ns"),
                &PatchDocument::new(json!({"metadata": {"labels": {"x": "y"}}})),
                SubResource::Main,
            )
            .await
            .unwrap();

        stale.metadata.labels = Some(Default::default());
        let err = store.update(&stale).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_update_rejects_immutable_change() {
        let store = MemoryStore::<Pod>::new().with_immutable_field("/spec/nodeName");
        store.insert(&pod("n1")).await;

        let mut changed = store.get("p", Some("ns")).await.unwrap();
        changed.spec.as_mut().unwrap().node_name = Some("n2".to_string());
        let err = store.update(&changed).await.unwrap_err();
        assert!(matches!(err, StoreError::Invalid { .. }));
    }

    #[tokio::test]
    async fn test_injected_failure_applies_once() {
        let store = MemoryStore::<Pod>::new();
        store.insert(&pod("n1")).await;
        store.fail_next(StoreOp::Get, "boom").await;

        assert!(matches!(
            store.get("p", Some("ns")).await,
            Err(StoreError::Injected { .. })
        ));
        assert!(store.get("p", Some("ns")).await.is_ok());
        assert_eq!(store.calls().await.len(), 2);
    }
}
