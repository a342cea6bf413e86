//! Node device publishing loop
//!
//! Each cycle reads the node, reconciles the device annotation from the
//! live copy alone, overlays the configured inventory and patches the node
//! only when the annotation actually changed. Usage belongs to the
//! scheduler: whatever the live annotation records is written back as is.

use device_lib::codec::{annotation, node_info_to_annotation};
use device_lib::health::{components, ComponentStatus, HealthRegistry};
use device_lib::observability::{StructuredLogger, SyncMetrics};
use device_lib::{reconcile_node, NodeInfo, ObjectStore, ResourceList, SyncError, Updater};
use k8s_openapi::api::core::v1::Node;
use std::future::Future;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::info;

/// Devices this node offers
#[derive(Debug, Clone, Default)]
pub struct Inventory {
    pub capacity: ResourceList,
    pub allocatable: ResourceList,
}

/// Publishes one node's device inventory
pub struct Advertiser<S> {
    node_name: String,
    inventory: Inventory,
    updater: Updater<S>,
    health: HealthRegistry,
    metrics: SyncMetrics,
    logger: StructuredLogger,
    /// Last published view of the node, for reporting only
    cached: Option<NodeInfo>,
}

impl<S> Advertiser<S>
where
    S: ObjectStore<Node>,
{
    pub fn new(
        node_name: impl Into<String>,
        inventory: Inventory,
        store: S,
        health: HealthRegistry,
    ) -> Self {
        let node_name = node_name.into();
        Self {
            logger: StructuredLogger::new(&node_name),
            node_name,
            inventory,
            updater: Updater::new(store),
            health,
            metrics: SyncMetrics::new(),
            cached: None,
        }
    }

    pub fn cached(&self) -> Option<&NodeInfo> {
        self.cached.as_ref()
    }

    pub fn store(&self) -> &S {
        self.updater.store()
    }

    /// Publish once. Returns whether the node had to be patched.
    pub async fn publish(&mut self) -> Result<bool, SyncError> {
        let live = self.updater.store().get(&self.node_name, None).await?;

        // The scheduler may have written usage since the last cycle, so
        // the live annotation is the only source of `used`.
        let mut node_info = reconcile_node(&live, None)?;
        node_info.capacity = self.inventory.capacity.clone();
        node_info.allocatable = self.inventory.allocatable.clone();

        let mut desired = live.clone();
        node_info_to_annotation(&mut desired.metadata, &node_info)?;

        let changed = annotation(&live.metadata) != annotation(&desired.metadata);
        if changed {
            self.updater
                .patch_metadata_and_status(&self.node_name, None, &live, &desired)
                .await?;
        }

        self.cached = Some(node_info);
        Ok(changed)
    }

    /// Publish once and report the outcome to health, metrics and logs
    pub async fn tick(&mut self) {
        match self.publish().await {
            Ok(changed) => {
                self.health.record_success(components::STORE).await;
                self.health.record_success(components::ADVERTISER).await;
                self.health.set_ready(true).await;
                self.metrics
                    .set_advertised_devices(&self.inventory.capacity);
                self.logger
                    .log_node_published(&self.inventory.capacity, changed);
            }
            Err(e) => {
                let message = e.to_string();
                let status = self
                    .health
                    .record_failure(components::STORE, message.as_str())
                    .await;
                if status == ComponentStatus::Unhealthy {
                    self.health
                        .record_failure(components::ADVERTISER, message.as_str())
                        .await;
                }
                let failures = self.health.consecutive_failures(components::STORE).await;
                self.logger.log_publish_failed(&message, failures);
            }
        }
    }

    /// Publish every `period` until `shutdown` resolves
    pub async fn run(mut self, period: Duration, shutdown: impl Future<Output = ()>) {
        info!(
            node = %self.node_name,
            interval_secs = period.as_secs(),
            "Starting device advertiser loop"
        );

        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.tick().await,
                _ = &mut shutdown => {
                    info!("Stopping device advertiser loop");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use device_lib::codec::write_annotation;
    use device_lib::store::{MemoryStore, StoreOp};
    use device_lib::SubResource;
    use k8s_openapi::api::core::v1::NodeStatus;
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::collections::BTreeMap;

    fn node(name: &str) -> Node {
        let mut capacity = BTreeMap::new();
        capacity.insert("cpu".to_string(), Quantity("8".to_string()));
        Node {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            status: Some(NodeStatus {
                capacity: Some(capacity),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn gpus(count: i64) -> Inventory {
        let mut capacity = ResourceList::new();
        capacity.insert("nvidia.com/gpu".to_string(), count);
        Inventory {
            allocatable: capacity.clone(),
            capacity,
        }
    }

    fn patch_calls(ops: &[StoreOp]) -> usize {
        ops.iter()
            .filter(|op| matches!(op, StoreOp::Patch(_)))
            .count()
    }

    #[tokio::test]
    async fn test_publish_patches_only_on_change() {
        let store = MemoryStore::<Node>::new();
        store.insert(&node("n1")).await;
        let mut advertiser = Advertiser::new("n1", gpus(2), store, HealthRegistry::new());

        assert!(advertiser.publish().await.unwrap());
        assert!(!advertiser.publish().await.unwrap());

        let ops: Vec<_> = advertiser
            .store()
            .calls()
            .await
            .iter()
            .map(|c| c.op)
            .collect();
        assert_eq!(patch_calls(&ops), 2);
        assert!(ops.contains(&StoreOp::Patch(SubResource::Status)));

        let stored = advertiser.store().object("n1", None).await.unwrap();
        let info = reconcile_node(&stored, None).unwrap();
        assert_eq!(info.capacity["nvidia.com/gpu"], 2);
        assert_eq!(info.kube_cap["cpu"], 8);
    }

    #[tokio::test]
    async fn test_publish_keeps_scheduler_usage() {
        let mut live = node("n1");
        let mut recorded = NodeInfo::new("n1");
        recorded.used.insert("nvidia.com/gpu".to_string(), 1);
        write_annotation(&mut live.metadata, &recorded).unwrap();

        let store = MemoryStore::<Node>::new();
        store.insert(&live).await;
        let mut advertiser = Advertiser::new("n1", gpus(4), store, HealthRegistry::new());
        advertiser.publish().await.unwrap();

        let stored = advertiser.store().object("n1", None).await.unwrap();
        let info = reconcile_node(&stored, None).unwrap();
        assert_eq!(info.used["nvidia.com/gpu"], 1);
        assert_eq!(info.capacity["nvidia.com/gpu"], 4);
        assert_eq!(advertiser.cached(), Some(&info));
    }

    #[tokio::test]
    async fn test_publish_preserves_usage_written_between_cycles() {
        let mut live = node("n1");
        let mut recorded = NodeInfo::new("n1");
        recorded.used.insert("nvidia.com/gpu".to_string(), 1);
        write_annotation(&mut live.metadata, &recorded).unwrap();

        let store = MemoryStore::<Node>::new();
        store.insert(&live).await;
        let mut advertiser = Advertiser::new("n1", gpus(4), store, HealthRegistry::new());
        advertiser.publish().await.unwrap();
        assert_eq!(advertiser.cached().unwrap().used["nvidia.com/gpu"], 1);

        // scheduler allocates two more devices before the next cycle
        let mut scheduled = advertiser.store().object("n1", None).await.unwrap();
        let mut info = reconcile_node(&scheduled, None).unwrap();
        info.used.insert("nvidia.com/gpu".to_string(), 3);
        write_annotation(&mut scheduled.metadata, &info).unwrap();
        advertiser.store().insert(&scheduled).await;

        assert!(!advertiser.publish().await.unwrap());

        let stored = advertiser.store().object("n1", None).await.unwrap();
        let info = reconcile_node(&stored, None).unwrap();
        assert_eq!(info.used["nvidia.com/gpu"], 3);
        assert_eq!(info.capacity["nvidia.com/gpu"], 4);
        assert_eq!(advertiser.cached().unwrap().used["nvidia.com/gpu"], 3);
    }

    #[tokio::test]
    async fn test_publish_reflects_released_usage() {
        let mut live = node("n1");
        let mut recorded = NodeInfo::new("n1");
        recorded.used.insert("nvidia.com/gpu".to_string(), 2);
        write_annotation(&mut live.metadata, &recorded).unwrap();

        let store = MemoryStore::<Node>::new();
        store.insert(&live).await;
        let mut advertiser = Advertiser::new("n1", gpus(4), store, HealthRegistry::new());
        advertiser.publish().await.unwrap();

        let mut released = advertiser.store().object("n1", None).await.unwrap();
        let mut info = reconcile_node(&released, None).unwrap();
        info.used.insert("nvidia.com/gpu".to_string(), 0);
        write_annotation(&mut released.metadata, &info).unwrap();
        advertiser.store().insert(&released).await;

        advertiser.publish().await.unwrap();

        let stored = advertiser.store().object("n1", None).await.unwrap();
        assert_eq!(reconcile_node(&stored, None).unwrap().used["nvidia.com/gpu"], 0);
    }

    #[tokio::test]
    async fn test_tick_failures_escalate_health() {
        let health = HealthRegistry::with_failure_threshold(2);
        let mut advertiser =
            Advertiser::new("missing", gpus(1), MemoryStore::<Node>::new(), health.clone());

        advertiser.tick().await;
        assert_eq!(health.health().await.status, ComponentStatus::Degraded);

        advertiser.tick().await;
        assert_eq!(health.health().await.status, ComponentStatus::Unhealthy);
        assert!(!health.readiness().await.ready);
        assert_eq!(health.consecutive_failures(components::STORE).await, 2);
    }

    #[tokio::test]
    async fn test_tick_success_clears_failure_count() {
        let health = HealthRegistry::new();
        let store = MemoryStore::<Node>::new();
        store.insert(&node("n1")).await;
        store.fail_next(StoreOp::Get, "connection refused").await;
        let mut advertiser = Advertiser::new("n1", gpus(1), store, health.clone());

        advertiser.tick().await;
        assert_eq!(health.consecutive_failures(components::STORE).await, 1);

        advertiser.tick().await;
        assert_eq!(health.consecutive_failures(components::STORE).await, 0);
        assert_eq!(health.health().await.status, ComponentStatus::Healthy);
    }

    #[tokio::test]
    async fn test_tick_success_marks_ready() {
        let health = HealthRegistry::new();
        let store = MemoryStore::<Node>::new();
        store.insert(&node("n1")).await;
        let mut advertiser = Advertiser::new("n1", gpus(1), store, health.clone());

        advertiser.tick().await;
        assert!(health.readiness().await.ready);
        assert_eq!(health.health().await.status, ComponentStatus::Healthy);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let store = MemoryStore::<Node>::new();
        store.insert(&node("n1")).await;
        let advertiser = Advertiser::new("n1", gpus(1), store, HealthRegistry::new());

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let handle = tokio::spawn(advertiser.run(Duration::from_millis(10), async move {
            let _ = rx.await;
        }));
        tokio::time::sleep(Duration::from_millis(30)).await;
        tx.send(()).unwrap();
        handle.await.unwrap();
    }
}
