//! Kubernetes connection for the CLI

use anyhow::{Context, Result};
use device_lib::{KubeStore, Updater};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::Client;
use tracing::debug;

/// Field manager recorded for writes made by the CLI
const FIELD_MANAGER: &str = "kdctl";

/// Build an updater over the cluster named by `kubeconfig`, or the default
/// kubeconfig / in-cluster config when none is given
pub async fn connect(kubeconfig: Option<&str>) -> Result<Updater<KubeStore>> {
    let client = match kubeconfig {
        Some(path) => {
            debug!(kubeconfig = %path, "Loading kubeconfig");
            let kubeconfig = Kubeconfig::read_from(path)
                .with_context(|| format!("Failed to read kubeconfig {path}"))?;
            let config =
                kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                    .await
                    .context("Invalid kubeconfig")?;
            Client::try_from(config).context("Failed to create Kubernetes client")?
        }
        None => Client::try_default()
            .await
            .context("Failed to create Kubernetes client")?,
    };

    Ok(Updater::new(
        KubeStore::new(client).with_field_manager(FIELD_MANAGER),
    ))
}
