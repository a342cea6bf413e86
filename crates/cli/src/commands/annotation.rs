//! Raw annotation commands

use anyhow::{Context, Result};
use clap::ValueEnum;
use device_lib::codec::decode;
use device_lib::{NodeInfo, PodInfo};
use std::io::Read;

use super::{node, pod};
use crate::output::OutputFormat;

/// Object kind the annotation was taken from
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum AnnotationKind {
    Node,
    Pod,
}

/// Decode an annotation value read from `input`
pub fn decode_from(mut input: impl Read, kind: AnnotationKind, format: OutputFormat) -> Result<()> {
    let mut raw = String::new();
    input
        .read_to_string(&mut raw)
        .context("Failed to read annotation")?;
    let raw = raw.trim();
    let value = (!raw.is_empty()).then_some(raw);

    match kind {
        AnnotationKind::Node => {
            let info: NodeInfo = decode(value).context("Malformed node device annotation")?;
            node::render(&info, format)
        }
        AnnotationKind::Pod => {
            let info: PodInfo = decode(value).context("Malformed pod device annotation")?;
            pod::render(&info, format)
        }
    }
}
