//! Scheduler-private device model carried in the device annotation
//!
//! These types are owned by the device scheduler. The orchestrator never
//! interprets them; they only travel as JSON inside a single annotation.
//! Every struct decodes with defaults for missing fields and ignores fields
//! it does not know, so annotations written by older or newer releases
//! still load.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Name of a resource, e.g. `nvidia.com/gpu` or `gpu/0/memory`
pub type ResourceName = String;

/// Amount per resource
pub type ResourceList = BTreeMap<ResourceName, i64>;

/// Resource to the concrete device instance it was allocated from
pub type ResourceLocation = BTreeMap<ResourceName, ResourceName>;

/// Device view of a node
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeInfo {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// Device capacity published by the advertiser
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub capacity: ResourceList,
    /// Device allocatable published by the advertiser
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub allocatable: ResourceList,
    /// Cumulative usage recorded by the scheduler.
    ///
    /// Not derivable from the node object. Only ever merged into, never
    /// replaced, across reads of the same node.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub used: ResourceList,
    /// Copied from `status.capacity` on every read
    #[serde(rename = "kubecap", skip_serializing_if = "BTreeMap::is_empty")]
    pub kube_cap: ResourceList,
    /// Copied from `status.allocatable` on every read
    #[serde(rename = "kubealloc", skip_serializing_if = "BTreeMap::is_empty")]
    pub kube_alloc: ResourceList,
}

impl NodeInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Merge usage counters into this node, overwriting on key collision
    pub fn merge_used(&mut self, used: &ResourceList) {
        for (key, value) in used {
            self.used.insert(key.clone(), *value);
        }
    }
}

/// Device view of a single container
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerInfo {
    /// Requests declared in the pod spec; overwritten on every read
    #[serde(rename = "kuberequests", skip_serializing_if = "BTreeMap::is_empty")]
    pub kube_requests: ResourceList,
    /// Scheduler-semantic requests
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub requests: ResourceList,
    /// Device requests still outstanding
    #[serde(rename = "devrequests", skip_serializing_if = "BTreeMap::is_empty")]
    pub dev_requests: ResourceList,
    /// Device assignment
    #[serde(rename = "allocatefrom", skip_serializing_if = "BTreeMap::is_empty")]
    pub allocate_from: ResourceLocation,
}

impl ContainerInfo {
    /// Forget any device assignment and mark every request outstanding again
    pub fn invalidate(&mut self) {
        self.allocate_from.clear();
        self.dev_requests = self.requests.clone();
    }
}

/// Device view of a pod
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PodInfo {
    #[serde(rename = "podname", skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// Node chosen by the device scheduler, independent of `spec.nodeName`
    #[serde(rename = "nodename", skip_serializing_if = "String::is_empty")]
    pub node_name: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub requests: ResourceList,
    #[serde(rename = "initcontainer", skip_serializing_if = "BTreeMap::is_empty")]
    pub init_containers: BTreeMap<String, ContainerInfo>,
    #[serde(rename = "runningcontainer", skip_serializing_if = "BTreeMap::is_empty")]
    pub running_containers: BTreeMap<String, ContainerInfo>,
}

impl PodInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Iterate over init and running containers
    pub fn containers(&self) -> impl Iterator<Item = (&String, &ContainerInfo)> {
        self.init_containers
            .iter()
            .chain(self.running_containers.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_used_overwrites_collisions() {
        let mut node = NodeInfo::new("node-a");
        node.used.insert("gpu".to_string(), 1);
        node.used.insert("fpga".to_string(), 3);

        let mut cached = ResourceList::new();
        cached.insert("gpu".to_string(), 2);
        cached.insert("nic".to_string(), 1);
        node.merge_used(&cached);

        assert_eq!(node.used["gpu"], 2);
        assert_eq!(node.used["fpga"], 3);
        assert_eq!(node.used["nic"], 1);
    }

    #[test]
    fn test_container_invalidate() {
        let mut cont = ContainerInfo::default();
        cont.requests.insert("gpu".to_string(), 2);
        cont.dev_requests.insert("gpu/0".to_string(), 1);
        cont.allocate_from
            .insert("gpu".to_string(), "dev0".to_string());

        cont.invalidate();

        assert!(cont.allocate_from.is_empty());
        assert_eq!(cont.dev_requests, cont.requests);
    }

    #[test]
    fn test_empty_fields_are_omitted() {
        let json = serde_json::to_string(&PodInfo::new("p")).unwrap();
        assert_eq!(json, r#"{"podname":"p"}"#);
    }

    #[test]
    fn test_unknown_fields_are_ignored() {
        let json = r#"{"name":"n1","used":{"gpu":1},"scorer":{"gpu":4},"future":[1,2]}"#;
        let node: NodeInfo = serde_json::from_str(json).unwrap();
        assert_eq!(node.name, "n1");
        assert_eq!(node.used["gpu"], 1);
    }
}
