//! Output formatting utilities

use clap::ValueEnum;
use colored::Colorize;
use device_lib::{ResourceList, ResourceLocation};
use serde::Serialize;

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Amount for one resource, `-` when absent
pub fn format_amount(list: &ResourceList, resource: &str) -> String {
    list.get(resource)
        .map(|n| n.to_string())
        .unwrap_or_else(|| "-".to_string())
}

/// `a=1, b=2`, or `-` for an empty list
pub fn format_resources(list: &ResourceList) -> String {
    if list.is_empty() {
        return "-".to_string();
    }
    list.iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn format_locations(locations: &ResourceLocation) -> String {
    if locations.is_empty() {
        return "-".to_string();
    }
    locations
        .iter()
        .map(|(k, v)| format!("{k}→{v}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Highlight usage that exceeds what is allocatable
pub fn color_used(used: i64, allocatable: Option<i64>) -> String {
    match allocatable {
        Some(limit) if used > limit => used.to_string().red().to_string(),
        Some(_) => used.to_string().green().to_string(),
        None => used.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_resources() {
        let mut list = ResourceList::new();
        assert_eq!(format_resources(&list), "-");

        list.insert("gpu".to_string(), 2);
        list.insert("cpu".to_string(), 4000);
        assert_eq!(format_resources(&list), "cpu=4000, gpu=2");
        assert_eq!(format_amount(&list, "gpu"), "2");
        assert_eq!(format_amount(&list, "fpga"), "-");
    }
}
