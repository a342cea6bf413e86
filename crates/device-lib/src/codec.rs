//! Device annotation codec
//!
//! The private model travels as JSON in a single annotation. Reading an
//! object without the annotation yields an empty model; reading one whose
//! annotation cannot be parsed is an error, since it means an earlier
//! writer corrupted the state.

use crate::error::SyncError;
use crate::observability::SyncMetrics;
use crate::types::{NodeInfo, PodInfo};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

/// Annotation key holding the serialized device model
pub const ANNOTATION_KEY: &str = "KubeDevice/DeviceInfo";

/// Serialize a model to its annotation value
pub fn encode<T: Serialize>(model: &T) -> Result<String, SyncError> {
    serde_json::to_string(model).map_err(SyncError::Serialization)
}

/// Parse an annotation value. A missing value decodes to `T::default()`.
pub fn decode<T: DeserializeOwned + Default>(value: Option<&str>) -> serde_json::Result<T> {
    match value {
        Some(raw) => serde_json::from_str(raw),
        None => Ok(T::default()),
    }
}

/// Raw annotation value on an object, if present
pub fn annotation(meta: &ObjectMeta) -> Option<&str> {
    meta.annotations
        .as_ref()
        .and_then(|a| a.get(ANNOTATION_KEY))
        .map(String::as_str)
}

/// Decode the device model from an object's metadata
pub fn read_annotation<T: DeserializeOwned + Default>(
    kind: &str,
    meta: &ObjectMeta,
) -> Result<T, SyncError> {
    let metrics = SyncMetrics::new();
    match decode(annotation(meta)) {
        Ok(model) => {
            metrics.inc_decoded(kind);
            Ok(model)
        }
        Err(source) => {
            let name = meta.name.clone().unwrap_or_default();
            warn!(kind = %kind, name = %name, error = %source, "Malformed device annotation");
            metrics.inc_decode_errors(kind);
            Err(SyncError::Deserialization {
                kind: kind.to_string(),
                name,
                source,
            })
        }
    }
}

/// Store the device model on an object's metadata, leaving every other
/// annotation as it was
pub fn write_annotation<T: Serialize>(meta: &mut ObjectMeta, model: &T) -> Result<(), SyncError> {
    let value = encode(model)?;
    meta.annotations
        .get_or_insert_with(Default::default)
        .insert(ANNOTATION_KEY.to_string(), value);
    Ok(())
}

/// Used by the device advertiser to publish a node's device info
pub fn node_info_to_annotation(meta: &mut ObjectMeta, node_info: &NodeInfo) -> Result<(), SyncError> {
    write_annotation(meta, node_info)?;
    debug!(node = %node_info.name, annotation = ?annotation(meta), "NodeInfo converted to annotation");
    Ok(())
}

pub fn pod_info_to_annotation(meta: &mut ObjectMeta, pod_info: &PodInfo) -> Result<(), SyncError> {
    write_annotation(meta, pod_info)?;
    debug!(pod = %pod_info.name, annotation = ?annotation(meta), "PodInfo converted to annotation");
    Ok(())
}
