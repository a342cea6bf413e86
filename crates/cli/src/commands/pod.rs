//! Pod device commands

use anyhow::{Context, Result};
use colored::Colorize;
use device_lib::codec::{annotation, pod_info_to_annotation};
use device_lib::observability::StructuredLogger;
use device_lib::{reconcile_pod, ObjectStore, PodInfo, Updater};
use k8s_openapi::api::core::v1::Pod;
use tabled::Tabled;

use crate::output::{
    format_locations, format_resources, print_info, print_json, print_success, print_warning,
    OutputFormat,
};

/// Row for the pod containers table
#[derive(Tabled)]
struct ContainerRow {
    #[tabled(rename = "Container")]
    name: String,
    #[tabled(rename = "Type")]
    kind: String,
    #[tabled(rename = "Kube Requests")]
    kube_requests: String,
    #[tabled(rename = "Requests")]
    requests: String,
    #[tabled(rename = "Dev Requests")]
    dev_requests: String,
    #[tabled(rename = "Allocated From")]
    allocate_from: String,
}

fn rows(info: &PodInfo) -> Vec<ContainerRow> {
    let init = info.init_containers.iter().map(|c| ("init", c));
    let running = info.running_containers.iter().map(|c| ("running", c));

    init.chain(running)
        .map(|(kind, (name, c))| ContainerRow {
            name: name.clone(),
            kind: kind.to_string(),
            kube_requests: format_resources(&c.kube_requests),
            requests: format_resources(&c.requests),
            dev_requests: format_resources(&c.dev_requests),
            allocate_from: format_locations(&c.allocate_from),
        })
        .collect()
}

/// Print a pod's device view
pub fn render(info: &PodInfo, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(info)?,
        OutputFormat::Table => {
            println!("{} {}", "Pod:".bold(), info.name.cyan());
            let node = if info.node_name.is_empty() {
                "-".dimmed().to_string()
            } else {
                info.node_name.cyan().to_string()
            };
            println!("{} {}", "Node:".bold(), node);
            if !info.requests.is_empty() {
                println!("{} {}", "Requests:".bold(), format_resources(&info.requests));
            }

            let rows = rows(info);
            if rows.is_empty() {
                print_warning("No containers recorded");
                return Ok(());
            }
            let table = tabled::Table::new(rows)
                .with(tabled::settings::Style::rounded())
                .to_string();
            println!("{}", table);
        }
    }
    Ok(())
}

async fn fetch<S: ObjectStore<Pod>>(updater: &Updater<S>, name: &str, namespace: &str) -> Result<Pod> {
    updater
        .store()
        .get(name, Some(namespace))
        .await
        .with_context(|| format!("Failed to get pod {namespace}/{name}"))
}

/// Show the reconciled device info of a pod, optionally as it would look
/// after invalidation. Nothing is written.
pub async fn show<S: ObjectStore<Pod>>(
    updater: &Updater<S>,
    name: &str,
    namespace: &str,
    invalidate: bool,
    format: OutputFormat,
) -> Result<()> {
    let pod = fetch(updater, name, namespace).await?;
    let info = reconcile_pod(&pod, invalidate)?;
    render(&info, format)
}

/// Clear a pod's device assignment and write it back with a
/// metadata-only update. Returns the annotation value written (or that
/// would be written on a dry run).
pub async fn invalidate<S: ObjectStore<Pod>>(
    updater: &Updater<S>,
    name: &str,
    namespace: &str,
    dry_run: bool,
) -> Result<String> {
    let pod = fetch(updater, name, namespace).await?;
    let info = reconcile_pod(&pod, true)?;

    let mut desired = pod.clone();
    pod_info_to_annotation(&mut desired.metadata, &info)?;
    let value = annotation(&desired.metadata).unwrap_or_default().to_string();

    if !dry_run {
        updater.update_metadata_only(&desired).await?;
        let node = pod
            .spec
            .as_ref()
            .and_then(|s| s.node_name.clone())
            .unwrap_or_default();
        StructuredLogger::new(node).log_pod_invalidated(
            namespace,
            name,
            info.containers().count(),
        );
    }
    Ok(value)
}

pub async fn run_invalidate<S: ObjectStore<Pod>>(
    updater: &Updater<S>,
    name: &str,
    namespace: &str,
    dry_run: bool,
) -> Result<()> {
    let value = invalidate(updater, name, namespace, dry_run).await?;
    if dry_run {
        print_info("Dry run: annotation that would be written");
        println!("{}", value);
    } else {
        print_success(&format!("Cleared device assignment of pod {namespace}/{name}"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use device_lib::codec::write_annotation;
    use device_lib::store::{MemoryStore, StoreOp};
    use device_lib::ContainerInfo;
    use k8s_openapi::api::core::v1::{Container, PodSpec};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn assigned_pod() -> Pod {
        let mut pod = Pod {
            metadata: ObjectMeta {
                name: Some("trainer".to_string()),
                namespace: Some("ml".to_string()),
                ..Default::default()
            },
            spec: Some(PodSpec {
                node_name: Some("n1".to_string()),
                containers: vec![Container {
                    name: "main".to_string(),
                    ..Default::default()
                }],
                ..Default::default()
            }),
            ..Default::default()
        };

        let mut info = PodInfo::new("trainer");
        info.node_name = "n1".to_string();
        let mut container = ContainerInfo::default();
        container.requests.insert("gpu".to_string(), 1);
        container.dev_requests.insert("gpu/0/cards".to_string(), 1);
        container
            .allocate_from
            .insert("gpu/0/cards".to_string(), "gpu/0".to_string());
        info.running_containers.insert("main".to_string(), container);
        write_annotation(&mut pod.metadata, &info).unwrap();
        pod
    }

    #[tokio::test]
    async fn test_invalidate_writes_cleared_assignment() {
        let store = MemoryStore::<Pod>::new().with_immutable_field("/spec/nodeName");
        store.insert(&assigned_pod()).await;
        let updater = Updater::new(store);

        invalidate(&updater, "trainer", "ml", false).await.unwrap();

        let stored = updater.store().object("trainer", Some("ml")).await.unwrap();
        let info = reconcile_pod(&stored, false).unwrap();
        let main = &info.running_containers["main"];
        assert!(main.allocate_from.is_empty());
        assert_eq!(main.dev_requests, main.requests);
        assert!(info.node_name.is_empty());
        assert_eq!(
            stored.spec.unwrap().node_name.as_deref(),
            Some("n1"),
            "only annotations change"
        );
    }

    #[tokio::test]
    async fn test_invalidate_dry_run_does_not_write() {
        let store = MemoryStore::<Pod>::new();
        store.insert(&assigned_pod()).await;
        let updater = Updater::new(store);

        let value = invalidate(&updater, "trainer", "ml", true).await.unwrap();
        assert!(!value.contains("allocatefrom"));

        let ops: Vec<_> = updater
            .store()
            .calls()
            .await
            .iter()
            .map(|c| c.op)
            .collect();
        assert_eq!(ops, vec![StoreOp::Get]);
    }

    #[test]
    fn test_rows_list_init_before_running() {
        let mut info = PodInfo::new("p");
        info.running_containers
            .insert("a".to_string(), ContainerInfo::default());
        info.init_containers
            .insert("z".to_string(), ContainerInfo::default());

        let rows = rows(&info);
        assert_eq!(rows[0].name, "z");
        assert_eq!(rows[0].kind, "init");
        assert_eq!(rows[1].kind, "running");
        assert_eq!(rows[1].requests, "-");
    }
}
