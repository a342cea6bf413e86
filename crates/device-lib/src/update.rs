//! Write device state back to the API server
//!
//! Two paths:
//! - a strategic merge patch computed from (old, new), applied as an ordered
//!   plan across sub-resources with the same bytes for every step
//! - a restricted full update that only carries annotations, for callers
//!   whose local copy may be stale in fields the server will not accept

use crate::error::{SubResource, SyncError};
use crate::observability::SyncMetrics;
use crate::patch::{build_patch, PatchDocument, Strategic};
use crate::store::ObjectStore;
use kube::{Resource, ResourceExt};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

/// One sub-resource write in a [`PatchPlan`]
#[derive(Debug, Clone)]
pub struct PatchStep {
    pub subresource: SubResource,
    pub patch: Arc<PatchDocument>,
}

/// Ordered patch steps. Steps run in order and stop at the first failure;
/// earlier steps are not rolled back.
#[derive(Debug, Clone)]
pub struct PatchPlan {
    steps: Vec<PatchStep>,
}

impl PatchPlan {
    /// The same patch to the object, then to its status
    pub fn metadata_and_status(patch: PatchDocument) -> Self {
        Self::for_subresources(patch, &[SubResource::Main, SubResource::Status])
    }

    pub fn main_only(patch: PatchDocument) -> Self {
        Self::for_subresources(patch, &[SubResource::Main])
    }

    fn for_subresources(patch: PatchDocument, subresources: &[SubResource]) -> Self {
        let patch = Arc::new(patch);
        Self {
            steps: subresources
                .iter()
                .map(|&subresource| PatchStep {
                    subresource,
                    patch: Arc::clone(&patch),
                })
                .collect(),
        }
    }

    pub fn steps(&self) -> &[PatchStep] {
        &self.steps
    }

    /// True when running the plan would not change anything
    pub fn is_noop(&self) -> bool {
        self.steps.iter().all(|s| s.patch.is_empty())
    }
}

fn object_id(namespace: Option<&str>, name: &str) -> String {
    match namespace {
        Some(ns) => format!("{ns}/{name}"),
        None => name.to_string(),
    }
}

/// Applies device state changes through an [`ObjectStore`]
pub struct Updater<S> {
    store: S,
    metrics: SyncMetrics,
}

impl<S> Updater<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            metrics: SyncMetrics::new(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Patch metadata and status so that the object moves from `old` to
    /// `new`. Returns the server's copy after the last step.
    ///
    /// When `old` and `new` produce an empty patch nothing is written: the
    /// live object is fetched with a single `get` and returned as is.
    pub async fn patch_metadata_and_status<K>(
        &self,
        name: &str,
        namespace: Option<&str>,
        old: &K,
        new: &K,
    ) -> Result<K, SyncError>
    where
        S: ObjectStore<K>,
        K: Resource<DynamicType = ()> + Serialize + Strategic + Send + Sync,
    {
        let patch = build_patch(name, old, new, &K::patch_schema())?;
        self.run_plan(name, namespace, PatchPlan::metadata_and_status(patch))
            .await
    }

    /// Like [`Updater::patch_metadata_and_status`] without the status step
    pub async fn patch_metadata<K>(
        &self,
        name: &str,
        namespace: Option<&str>,
        old: &K,
        new: &K,
    ) -> Result<K, SyncError>
    where
        S: ObjectStore<K>,
        K: Resource<DynamicType = ()> + Serialize + Strategic + Send + Sync,
    {
        let patch = build_patch(name, old, new, &K::patch_schema())?;
        self.run_plan(name, namespace, PatchPlan::main_only(patch))
            .await
    }

    /// Run each step of `plan` in order
    pub async fn run_plan<K>(
        &self,
        name: &str,
        namespace: Option<&str>,
        plan: PatchPlan,
    ) -> Result<K, SyncError>
    where
        S: ObjectStore<K>,
        K: Resource<DynamicType = ()> + Send + Sync,
    {
        let kind = K::kind(&()).to_string();

        if plan.is_noop() {
            debug!(kind = %kind, name = %name, "Nothing to patch");
            return Ok(self.store.get(name, namespace).await?);
        }

        let mut applied = Vec::with_capacity(plan.steps().len());
        let mut latest = None;
        for step in plan.steps() {
            debug!(
                kind = %kind,
                name = %name,
                subresource = %step.subresource,
                patch = %step.patch,
                "Patching"
            );
            match self
                .store
                .patch(name, namespace, &step.patch, step.subresource)
                .await
            {
                Ok(object) => {
                    self.metrics.record_patch(&kind, step.subresource, true);
                    applied.push(step.subresource);
                    latest = Some(object);
                }
                Err(source) => {
                    warn!(
                        kind = %kind,
                        name = %name,
                        subresource = %step.subresource,
                        applied = ?applied,
                        error = %source,
                        "Patch step failed"
                    );
                    self.metrics.record_patch(&kind, step.subresource, false);
                    return Err(SyncError::PatchApply {
                        kind,
                        name: name.to_string(),
                        subresource: step.subresource,
                        applied,
                        source,
                    });
                }
            }
        }

        match latest {
            Some(object) => Ok(object),
            None => Ok(self.store.get(name, namespace).await?),
        }
    }

    /// Write the annotations of `desired` with a full update of the live
    /// object. Every other field is sent back exactly as the server has it.
    pub async fn update_metadata_only<K>(&self, desired: &K) -> Result<K, SyncError>
    where
        S: ObjectStore<K>,
        K: Resource<DynamicType = ()> + Send + Sync,
    {
        let kind = K::kind(&()).to_string();
        let name = desired.name_any();
        let namespace = desired.namespace();

        let mut live = self.store.get(&name, namespace.as_deref()).await?;
        if live.name_any() != name || live.namespace() != namespace {
            self.metrics.record_restricted_update(&kind, false);
            return Err(SyncError::IdentityMismatch {
                desired: object_id(namespace.as_deref(), &name),
                live: object_id(live.namespace().as_deref(), &live.name_any()),
            });
        }

        live.meta_mut().annotations = desired.meta().annotations.clone();
        debug!(kind = %kind, name = %name, "Updating annotations only");

        let result = self.store.update(&live).await;
        self.metrics.record_restricted_update(&kind, result.is_ok());
        Ok(result?)
    }
}
