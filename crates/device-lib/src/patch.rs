//! Two-way strategic merge patches
//!
//! `build_patch` turns an old and a new copy of an object into the smallest
//! strategic merge patch that moves the server copy from one to the other.
//! Fields the two copies agree on never appear in the patch, so writes made
//! by other clients since `old` was read are left alone.
//!
//! Merge behaviour per field comes from a [`PatchSchema`]:
//! - scalars and lists without a merge key are replaced wholesale
//! - nested objects are diffed recursively; removed keys become `null`
//! - lists with a merge key carry only added or changed elements, plus
//!   `{"$patch": "delete"}` markers for removed ones
//!
//! Element order within keyed lists is not tracked.

use crate::error::SyncError;
use k8s_openapi::api::core::v1::{Node, Pod};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

const PATCH_DIRECTIVE: &str = "$patch";
const DELETE: &str = "delete";

/// Strategic merge metadata for one object type
#[derive(Debug, Clone, Default)]
pub struct PatchSchema {
    merge_keys: BTreeMap<String, &'static str>,
}

impl PatchSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare that the list at `path` (dot separated, list elements do not
    /// add a segment) merges elements by `key`
    pub fn with_merge_key(mut self, path: impl Into<String>, key: &'static str) -> Self {
        self.merge_keys.insert(path.into(), key);
        self
    }

    pub fn merge_key(&self, path: &str) -> Option<&'static str> {
        self.merge_keys.get(path).copied()
    }

    pub fn for_node() -> Self {
        Self::new()
            .with_merge_key("metadata.ownerReferences", "uid")
            .with_merge_key("status.conditions", "type")
            .with_merge_key("status.addresses", "type")
            .with_merge_key("status.volumesAttached", "name")
    }

    pub fn for_pod() -> Self {
        let mut schema = Self::new()
            .with_merge_key("metadata.ownerReferences", "uid")
            .with_merge_key("spec.volumes", "name")
            .with_merge_key("spec.imagePullSecrets", "name")
            .with_merge_key("spec.hostAliases", "ip")
            .with_merge_key("status.conditions", "type")
            .with_merge_key("status.podIPs", "ip");

        for containers in ["spec.containers", "spec.initContainers", "spec.ephemeralContainers"] {
            schema = schema
                .with_merge_key(containers, "name")
                .with_merge_key(format!("{containers}.ports"), "containerPort")
                .with_merge_key(format!("{containers}.env"), "name")
                .with_merge_key(format!("{containers}.volumeMounts"), "mountPath")
                .with_merge_key(format!("{containers}.volumeDevices"), "devicePath");
        }
        schema
    }
}

/// Object types with a known strategic merge schema
pub trait Strategic {
    fn patch_schema() -> PatchSchema;
}

impl Strategic for Node {
    fn patch_schema() -> PatchSchema {
        PatchSchema::for_node()
    }
}

impl Strategic for Pod {
    fn patch_schema() -> PatchSchema {
        PatchSchema::for_pod()
    }
}

/// A strategic merge patch body
#[derive(Debug, Clone, PartialEq)]
pub struct PatchDocument(Value);

impl PatchDocument {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// True if applying the patch would change nothing
    pub fn is_empty(&self) -> bool {
        match &self.0 {
            Value::Object(map) => map.is_empty(),
            Value::Null => true,
            _ => false,
        }
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }
}

impl fmt::Display for PatchDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Compute the strategic merge patch taking `old` to `new`
pub fn build_patch<T: Serialize>(
    name: &str,
    old: &T,
    new: &T,
    schema: &PatchSchema,
) -> Result<PatchDocument, SyncError> {
    let to_value = |obj: &T| {
        serde_json::to_value(obj).map_err(|source| SyncError::Diff {
            name: name.to_string(),
            source,
        })
    };
    let old = to_value(old)?;
    let new = to_value(new)?;

    match (&old, &new) {
        (Value::Object(o), Value::Object(n)) => {
            Ok(PatchDocument(Value::Object(diff_object(o, n, "", schema))))
        }
        _ => Err(SyncError::Diff {
            name: name.to_string(),
            source: <serde_json::Error as serde::ser::Error>::custom(
                "patch target is not a JSON object",
            ),
        }),
    }
}

fn child_path(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}

fn diff_object(
    old: &Map<String, Value>,
    new: &Map<String, Value>,
    path: &str,
    schema: &PatchSchema,
) -> Map<String, Value> {
    let mut patch = Map::new();

    for (key, new_value) in new {
        let Some(old_value) = old.get(key) else {
            patch.insert(key.clone(), new_value.clone());
            continue;
        };
        if old_value == new_value {
            continue;
        }

        let path = child_path(path, key);
        let change = match (old_value, new_value) {
            (Value::Object(o), Value::Object(n)) => {
                let diff = diff_object(o, n, &path, schema);
                (!diff.is_empty()).then_some(Value::Object(diff))
            }
            (Value::Array(o), Value::Array(n)) => match schema
                .merge_key(&path)
                .and_then(|merge_key| diff_keyed_list(o, n, merge_key, &path, schema))
            {
                Some(items) => (!items.is_empty()).then_some(Value::Array(items)),
                None => Some(new_value.clone()),
            },
            _ => Some(new_value.clone()),
        };
        if let Some(change) = change {
            patch.insert(key.clone(), change);
        }
    }

    for key in old.keys() {
        if !new.contains_key(key) {
            patch.insert(key.clone(), Value::Null);
        }
    }

    patch
}

/// Diff two lists merged by `merge_key`. Returns `None` if either list has an
/// element without the key, in which case the caller replaces the list.
fn diff_keyed_list(
    old: &[Value],
    new: &[Value],
    merge_key: &str,
    path: &str,
    schema: &PatchSchema,
) -> Option<Vec<Value>> {
    let key_of = |v: &Value| v.as_object().and_then(|m| m.get(merge_key)).cloned();

    let mut old_by_key = Vec::with_capacity(old.len());
    for item in old {
        old_by_key.push((key_of(item)?, item));
    }

    let mut patch = Vec::new();
    let mut seen = Vec::with_capacity(new.len());
    for item in new {
        let key = key_of(item)?;
        match old_by_key.iter().find(|(k, _)| *k == key) {
            Some((_, old_item)) if *old_item == item => {}
            Some((_, old_item)) => {
                let (Value::Object(o), Value::Object(n)) = (old_item, item) else {
                    return None;
                };
                let mut change = diff_object(o, n, path, schema);
                change.insert(merge_key.to_string(), key.clone());
                patch.push(Value::Object(change));
            }
            None => patch.push(item.clone()),
        }
        seen.push(key);
    }

    for (key, _) in &old_by_key {
        if !seen.contains(key) {
            let mut marker = Map::new();
            marker.insert(merge_key.to_string(), key.clone());
            marker.insert(PATCH_DIRECTIVE.to_string(), Value::String(DELETE.to_string()));
            patch.push(Value::Object(marker));
        }
    }

    Some(patch)
}

/// Apply a strategic merge patch to `target` in place
pub fn apply_patch(target: &mut Value, patch: &PatchDocument, schema: &PatchSchema) {
    apply_value(target, &patch.0, "", schema);
}

fn apply_value(target: &mut Value, patch: &Value, path: &str, schema: &PatchSchema) {
    let Value::Object(patch) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    let Value::Object(fields) = target else {
        return;
    };

    for (key, change) in patch {
        if key.starts_with('$') {
            continue;
        }
        if change.is_null() {
            fields.remove(key);
            continue;
        }

        let path = child_path(path, key);
        match (fields.get_mut(key), change) {
            (Some(Value::Array(items)), Value::Array(changes)) => {
                match schema.merge_key(&path) {
                    Some(merge_key) => merge_keyed_list(items, changes, merge_key, &path, schema),
                    None => *items = changes.clone(),
                }
            }
            (Some(existing), _) => apply_value(existing, change, &path, schema),
            (None, _) => {
                let mut fresh = Value::Null;
                apply_value(&mut fresh, change, &path, schema);
                if let Value::Array(items) = &mut fresh {
                    items.retain(|item| !is_delete_marker(item));
                }
                fields.insert(key.clone(), fresh);
            }
        }
    }
}

fn is_delete_marker(item: &Value) -> bool {
    item.get(PATCH_DIRECTIVE).and_then(Value::as_str) == Some(DELETE)
}

fn merge_keyed_list(
    items: &mut Vec<Value>,
    changes: &[Value],
    merge_key: &str,
    path: &str,
    schema: &PatchSchema,
) {
    for change in changes {
        let key = change.get(merge_key).cloned();
        let position = key
            .as_ref()
            .and_then(|k| items.iter().position(|item| item.get(merge_key) == Some(k)));

        match (position, is_delete_marker(change)) {
            (Some(i), true) => {
                items.remove(i);
            }
            (None, true) => {}
            (Some(i), false) => apply_value(&mut items[i], change, path, schema),
            (None, false) => {
                let mut fresh = Value::Null;
                apply_value(&mut fresh, change, path, schema);
                items.push(fresh);
            }
        }
    }
}
