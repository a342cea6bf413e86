//! Device advertiser
//!
//! Runs on every node and keeps the node's `KubeDevice/DeviceInfo`
//! annotation in line with the configured device inventory, while
//! preserving usage recorded by the scheduler.

pub mod advertise;
pub mod api;
pub mod config;

pub use advertise::{Advertiser, Inventory};
pub use api::AppState;
pub use config::AdvertiserConfig;
