//! Node device commands

use anyhow::{bail, Context, Result};
use colored::Colorize;
use device_lib::codec::{annotation, node_info_to_annotation};
use device_lib::{reconcile_node, NodeInfo, ObjectStore, ResourceList, Updater};
use k8s_openapi::api::core::v1::Node;
use std::collections::BTreeSet;
use tabled::Tabled;

use crate::output::{
    color_used, format_amount, print_info, print_json, print_success, print_warning, OutputFormat,
};

/// Row for the node devices table
#[derive(Tabled)]
struct ResourceRow {
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Capacity")]
    capacity: String,
    #[tabled(rename = "Allocatable")]
    allocatable: String,
    #[tabled(rename = "Used")]
    used: String,
    #[tabled(rename = "Kube Cap")]
    kube_cap: String,
    #[tabled(rename = "Kube Alloc")]
    kube_alloc: String,
}

fn rows(info: &NodeInfo) -> Vec<ResourceRow> {
    let resources: BTreeSet<&String> = info
        .capacity
        .keys()
        .chain(info.allocatable.keys())
        .chain(info.used.keys())
        .chain(info.kube_cap.keys())
        .chain(info.kube_alloc.keys())
        .collect();

    resources
        .into_iter()
        .map(|r| ResourceRow {
            resource: r.clone(),
            capacity: format_amount(&info.capacity, r),
            allocatable: format_amount(&info.allocatable, r),
            used: info
                .used
                .get(r)
                .map(|u| color_used(*u, info.allocatable.get(r).copied()))
                .unwrap_or_else(|| "-".to_string()),
            kube_cap: format_amount(&info.kube_cap, r),
            kube_alloc: format_amount(&info.kube_alloc, r),
        })
        .collect()
}

/// Print a node's device view
pub fn render(info: &NodeInfo, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(info)?,
        OutputFormat::Table => {
            println!("{} {}", "Node:".bold(), info.name.cyan());
            let rows = rows(info);
            if rows.is_empty() {
                print_warning("No resources recorded");
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

/// Show the reconciled device info of a node
pub async fn show<S: ObjectStore<Node>>(
    updater: &Updater<S>,
    name: &str,
    format: OutputFormat,
) -> Result<()> {
    let node = updater
        .store()
        .get(name, None)
        .await
        .with_context(|| format!("Failed to get node {name}"))?;
    let info = reconcile_node(&node, None)?;
    render(&info, format)
}

/// Parse `resource=count`
pub fn parse_resource(s: &str) -> Result<(String, i64)> {
    let (resource, count) = s
        .split_once('=')
        .with_context(|| format!("expected RESOURCE=COUNT, got {s:?}"))?;
    let resource = resource.trim();
    if resource.is_empty() {
        bail!("empty resource name in {s:?}");
    }
    let count: i64 = count
        .trim()
        .parse()
        .with_context(|| format!("invalid count in {s:?}"))?;
    if count < 0 {
        bail!("negative count in {s:?}");
    }
    Ok((resource.to_string(), count))
}

/// Publish device capacity/allocatable on a node once.
///
/// Returns the device info as written. Allocatable defaults to capacity.
pub async fn advertise<S: ObjectStore<Node>>(
    updater: &Updater<S>,
    name: &str,
    capacity: Vec<(String, i64)>,
    allocatable: Vec<(String, i64)>,
) -> Result<(NodeInfo, bool)> {
    let live = updater
        .store()
        .get(name, None)
        .await
        .with_context(|| format!("Failed to get node {name}"))?;

    let capacity: ResourceList = capacity.into_iter().collect();
    let allocatable: ResourceList = if allocatable.is_empty() {
        capacity.clone()
    } else {
        allocatable.into_iter().collect()
    };

    let mut info = reconcile_node(&live, None)?;
    info.capacity = capacity;
    info.allocatable = allocatable;

    let mut desired = live.clone();
    node_info_to_annotation(&mut desired.metadata, &info)?;
    let changed = annotation(&live.metadata) != annotation(&desired.metadata);
    if changed {
        updater
            .patch_metadata_and_status(name, None, &live, &desired)
            .await?;
    }
    Ok((info, changed))
}

pub async fn run_advertise<S: ObjectStore<Node>>(
    updater: &Updater<S>,
    name: &str,
    capacity: Vec<(String, i64)>,
    allocatable: Vec<(String, i64)>,
    format: OutputFormat,
) -> Result<()> {
    let (info, changed) = advertise(updater, name, capacity, allocatable).await?;
    if changed {
        print_success(&format!("Published device info to node {name}"));
    } else {
        print_info(&format!("Node {name} already up to date"));
    }
    render(&info, format)
}
