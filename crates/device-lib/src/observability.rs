//! Observability for device state synchronization
//!
//! Provides:
//! - Prometheus metrics (store latency, patch outcomes, decode errors)
//! - Structured event logging with tracing

use crate::error::SubResource;
use crate::types::ResourceList;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge_vec, HistogramVec,
    IntCounterVec, IntGaugeVec,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for store round trips (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
];

static GLOBAL_METRICS: OnceLock<SyncMetricsInner> = OnceLock::new();

struct SyncMetricsInner {
    store_latency_seconds: HistogramVec,
    decoded: IntCounterVec,
    decode_errors: IntCounterVec,
    patches: IntCounterVec,
    restricted_updates: IntCounterVec,
    advertised_devices: IntGaugeVec,
}

impl SyncMetricsInner {
    fn new() -> Self {
        Self {
            store_latency_seconds: register_histogram_vec!(
                "kubedevice_store_latency_seconds",
                "Round-trip latency of object store calls",
                &["operation"],
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register store_latency_seconds"),

            decoded: register_int_counter_vec!(
                "kubedevice_annotations_decoded_total",
                "Device annotations decoded",
                &["kind"]
            )
            .expect("Failed to register annotations_decoded"),

            decode_errors: register_int_counter_vec!(
                "kubedevice_annotation_decode_errors_total",
                "Device annotations that could not be decoded",
                &["kind"]
            )
            .expect("Failed to register annotation_decode_errors"),

            patches: register_int_counter_vec!(
                "kubedevice_patches_total",
                "Patch applications by sub-resource and outcome",
                &["kind", "subresource", "outcome"]
            )
            .expect("Failed to register patches"),

            restricted_updates: register_int_counter_vec!(
                "kubedevice_restricted_updates_total",
                "Metadata-only updates by outcome",
                &["kind", "outcome"]
            )
            .expect("Failed to register restricted_updates"),

            advertised_devices: register_int_gauge_vec!(
                "kubedevice_advertised_devices",
                "Device capacity last published for this node",
                &["resource"]
            )
            .expect("Failed to register advertised_devices"),
        }
    }
}

fn outcome(ok: bool) -> &'static str {
    if ok {
        "success"
    } else {
        "failure"
    }
}

/// Handle to the process-wide sync metrics.
///
/// Clones share the same underlying metrics.
#[derive(Clone)]
pub struct SyncMetrics {
    _private: (),
}

impl Default for SyncMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(SyncMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &SyncMetricsInner {
        GLOBAL_METRICS.get().expect("Metrics not initialized")
    }

    pub fn observe_store_latency(&self, operation: &str, duration_secs: f64) {
        self.inner()
            .store_latency_seconds
            .with_label_values(&[operation])
            .observe(duration_secs);
    }

    pub fn inc_decoded(&self, kind: &str) {
        self.inner().decoded.with_label_values(&[kind]).inc();
    }

    pub fn inc_decode_errors(&self, kind: &str) {
        self.inner().decode_errors.with_label_values(&[kind]).inc();
    }

    pub fn record_patch(&self, kind: &str, subresource: SubResource, ok: bool) {
        let sub = subresource.to_string();
        self.inner()
            .patches
            .with_label_values(&[kind, sub.as_str(), outcome(ok)])
            .inc();
    }

    pub fn record_restricted_update(&self, kind: &str, ok: bool) {
        self.inner()
            .restricted_updates
            .with_label_values(&[kind, outcome(ok)])
            .inc();
    }

    /// Replace the advertised device gauge with the given capacity
    pub fn set_advertised_devices(&self, capacity: &ResourceList) {
        let gauge = &self.inner().advertised_devices;
        gauge.reset();
        for (resource, amount) in capacity {
            gauge.with_label_values(&[resource.as_str()]).set(*amount);
        }
    }

    pub fn patch_count(&self, kind: &str, subresource: SubResource, ok: bool) -> u64 {
        let sub = subresource.to_string();
        self.inner()
            .patches
            .with_label_values(&[kind, sub.as_str(), outcome(ok)])
            .get()
    }
}

/// Structured logger for device sync events
#[derive(Clone)]
pub struct StructuredLogger {
    node_name: String,
}

impl StructuredLogger {
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
        }
    }

    pub fn log_startup(&self, version: &str, resources: usize) {
        info!(
            event = "advertiser_started",
            node = %self.node_name,
            version = %version,
            resources = resources,
            "Device advertiser started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "advertiser_shutdown",
            node = %self.node_name,
            reason = %reason,
            "Device advertiser shutting down"
        );
    }

    /// Log the outcome of publishing the node annotation
    pub fn log_node_published(&self, capacity: &ResourceList, changed: bool) {
        if changed {
            info!(
                event = "node_published",
                node = %self.node_name,
                capacity = ?capacity,
                "Published device info to node"
            );
        } else {
            tracing::debug!(
                event = "node_unchanged",
                node = %self.node_name,
                "Device info already current"
            );
        }
    }

    pub fn log_publish_failed(&self, error: &str, consecutive_failures: u32) {
        warn!(
            event = "node_publish_failed",
            node = %self.node_name,
            error = %error,
            consecutive_failures = consecutive_failures,
            "Failed to publish device info"
        );
    }

    pub fn log_pod_invalidated(&self, namespace: &str, pod: &str, containers: usize) {
        info!(
            event = "pod_invalidated",
            node = %self.node_name,
            namespace = %namespace,
            pod = %pod,
            containers = containers,
            "Cleared device allocation for pod"
        );
    }
}
