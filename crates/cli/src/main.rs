//! KubeDevice CLI
//!
//! Inspect and repair the device state that the device scheduler keeps in
//! the `KubeDevice/DeviceInfo` annotation of nodes and pods.

mod client;
mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{annotation, node, pod};
use tracing_subscriber::EnvFilter;

/// KubeDevice CLI
#[derive(Parser)]
#[command(name = "kdctl")]
#[command(author, version, about = "Inspect and repair KubeDevice device state", long_about = None)]
pub struct Cli {
    /// Path to kubeconfig file (uses default if not specified)
    #[arg(long, env = "KUBECONFIG")]
    pub kubeconfig: Option<String>,

    /// Output format (defaults to the config file setting, then table)
    #[arg(long, short)]
    pub format: Option<output::OutputFormat>,

    /// Enable verbose output
    #[arg(long, short)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Node device commands
    #[command(subcommand)]
    Node(NodeCommands),

    /// Pod device commands
    #[command(subcommand)]
    Pod(PodCommands),

    /// Work with raw annotation values
    #[command(subcommand)]
    Annotation(AnnotationCommands),
}

#[derive(Subcommand)]
pub enum NodeCommands {
    /// Show the reconciled device info of a node
    Show {
        /// Node name
        name: String,
    },

    /// Publish device capacity on a node once
    Advertise {
        /// Node name
        name: String,

        /// Device capacity as RESOURCE=COUNT (repeatable)
        #[arg(long, value_parser = node::parse_resource, required = true)]
        capacity: Vec<(String, i64)>,

        /// Device allocatable as RESOURCE=COUNT (defaults to capacity)
        #[arg(long, value_parser = node::parse_resource)]
        allocatable: Vec<(String, i64)>,
    },
}

#[derive(Subcommand)]
pub enum PodCommands {
    /// Show the reconciled device info of a pod
    Show {
        /// Pod name
        name: String,

        /// Namespace
        #[arg(long, short, env = "KDCTL_NAMESPACE")]
        namespace: Option<String>,

        /// Show the state as it would be after invalidation
        #[arg(long)]
        invalidate: bool,
    },

    /// Clear the device assignment of a pod
    Invalidate {
        /// Pod name
        name: String,

        /// Namespace
        #[arg(long, short, env = "KDCTL_NAMESPACE")]
        namespace: Option<String>,

        /// Print the new annotation without writing it
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Subcommand)]
pub enum AnnotationCommands {
    /// Decode an annotation value read from stdin
    Decode {
        /// Kind of object the value came from
        #[arg(long, short, value_enum, default_value = "node")]
        kind: annotation::AnnotationKind,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let config = config::Config::load()?;
    let format = config.format(cli.format);

    match cli.command {
        Commands::Node(node_cmd) => {
            let updater = client::connect(cli.kubeconfig.as_deref()).await?;
            match node_cmd {
                NodeCommands::Show { name } => {
                    node::show(&updater, &name, format).await?;
                }
                NodeCommands::Advertise {
                    name,
                    capacity,
                    allocatable,
                } => {
                    node::run_advertise(&updater, &name, capacity, allocatable, format).await?;
                }
            }
        }
        Commands::Pod(pod_cmd) => {
            let updater = client::connect(cli.kubeconfig.as_deref()).await?;
            match pod_cmd {
                PodCommands::Show {
                    name,
                    namespace,
                    invalidate,
                } => {
                    let namespace = config.namespace(namespace);
                    pod::show(&updater, &name, &namespace, invalidate, format).await?;
                }
                PodCommands::Invalidate {
                    name,
                    namespace,
                    dry_run,
                } => {
                    let namespace = config.namespace(namespace);
                    pod::run_invalidate(&updater, &name, &namespace, dry_run).await?;
                }
            }
        }
        Commands::Annotation(AnnotationCommands::Decode { kind }) => {
            annotation::decode_from(std::io::stdin().lock(), kind, format)?;
        }
    }

    Ok(())
}
