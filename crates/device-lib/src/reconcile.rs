//! Reconcile the private device model with live Kubernetes objects
//!
//! Every read decodes the annotation and then overlays the fields
//! Kubernetes is authoritative for: node capacity/allocatable and the
//! requests declared in the pod spec.

use crate::codec::read_annotation;
use crate::error::SyncError;
use crate::quantity::to_resource_list;
use crate::types::{ContainerInfo, NodeInfo, PodInfo};
use k8s_openapi::api::core::v1::{Container, Node, Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;
use tracing::{debug, trace};

/// Decode a node's device info from its metadata.
///
/// An empty decoded name falls back to the object's name. Usage counters in
/// `existing` are merged into the decoded ones and win on collision, since
/// the caller's cache is fresher than whoever last wrote the annotation.
pub fn annotation_to_node_info(
    meta: &ObjectMeta,
    existing: Option<&NodeInfo>,
) -> Result<NodeInfo, SyncError> {
    let mut node_info: NodeInfo = read_annotation("Node", meta)?;

    if node_info.name.trim().is_empty() {
        node_info.name = meta.name.clone().unwrap_or_default();
    }
    if let Some(existing) = existing {
        node_info.merge_used(&existing.used);
    }

    trace!(annotations = ?meta.annotations, node_info = ?node_info, "Annotations converted to NodeInfo");
    Ok(node_info)
}

/// Build the device view of a node, refreshing Kubernetes capacity and
/// allocatable from its status
pub fn reconcile_node(node: &Node, existing: Option<&NodeInfo>) -> Result<NodeInfo, SyncError> {
    let mut node_info = annotation_to_node_info(&node.metadata, existing)?;

    if let Some(status) = &node.status {
        if let Some(capacity) = &status.capacity {
            node_info.kube_cap.extend(to_resource_list(capacity)?);
        }
        if let Some(allocatable) = &status.allocatable {
            node_info.kube_alloc.extend(to_resource_list(allocatable)?);
        }
    }

    debug!(
        node = %node_info.name,
        kube_cap = node_info.kube_cap.len(),
        used = node_info.used.len(),
        "Reconciled node"
    );
    Ok(node_info)
}

/// Build the device view of a pod.
///
/// With `invalidate`, any tentative device assignment is discarded: every
/// container loses `allocate_from`, gets `dev_requests` rebuilt from
/// `requests`, and the pod's scheduled node is cleared.
pub fn reconcile_pod(pod: &Pod, invalidate: bool) -> Result<PodInfo, SyncError> {
    let mut pod_info: PodInfo = read_annotation("Pod", &pod.metadata)?;
    pod_info.name = pod.metadata.name.clone().unwrap_or_default();

    if let Some(spec) = &pod.spec {
        let init = spec.init_containers.as_deref().unwrap_or_default();
        merge_containers(&mut pod_info.init_containers, init, invalidate)?;
        merge_containers(&mut pod_info.running_containers, &spec.containers, invalidate)?;
    } else if invalidate {
        merge_containers(&mut pod_info.init_containers, &[], true)?;
        merge_containers(&mut pod_info.running_containers, &[], true)?;
    }

    if invalidate {
        pod_info.node_name.clear();
    }

    debug!(
        pod = %pod_info.name,
        containers = pod_info.init_containers.len() + pod_info.running_containers.len(),
        invalidate = invalidate,
        "Reconciled pod"
    );
    Ok(pod_info)
}

fn merge_containers(
    containers: &mut BTreeMap<String, ContainerInfo>,
    declared: &[Container],
    invalidate: bool,
) -> Result<(), SyncError> {
    for c in declared {
        let cont = containers.entry(c.name.clone()).or_default();
        if let Some(requests) = c.resources.as_ref().and_then(|r| r.requests.as_ref()) {
            cont.kube_requests.extend(to_resource_list(requests)?);
        }
    }

    if invalidate {
        for cont in containers.values_mut() {
            cont.invalidate();
        }
    }
    Ok(())
}
