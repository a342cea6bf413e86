//! Error types for device state synchronization

use std::fmt;
use thiserror::Error;

/// Independently versioned facet of an object that a patch targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubResource {
    /// The object itself (metadata and spec)
    Main,
    /// The `status` sub-resource
    Status,
}

impl fmt::Display for SubResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubResource::Main => f.write_str("main"),
            SubResource::Status => f.write_str("status"),
        }
    }
}

/// Errors raised by an object store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} {name} not found")]
    NotFound { kind: String, name: String },

    /// The write was computed against a stale read
    #[error("conflict writing {kind} {name}: {message}")]
    Conflict {
        kind: String,
        name: String,
        message: String,
    },

    /// The API server refused the change, e.g. an immutable field differs
    #[error("invalid change to {kind} {name}: {message}")]
    Invalid {
        kind: String,
        name: String,
        message: String,
    },

    /// Failure injected into an in-memory store
    #[error("injected failure on {kind} {name}: {message}")]
    Injected {
        kind: String,
        name: String,
        message: String,
    },

    #[error(transparent)]
    Kube(#[from] kube::Error),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

/// Errors raised while reading or writing device state
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("failed to encode device info: {0}")]
    Serialization(#[source] serde_json::Error),

    /// A previous writer left an annotation we cannot read
    #[error("malformed device annotation on {kind} {name}: {source}")]
    Deserialization {
        kind: String,
        name: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("resource {resource} has unparsable quantity {value:?}")]
    Quantity { resource: String, value: String },

    #[error("failed to create patch for {name}: {source}")]
    Diff {
        name: String,
        #[source]
        source: serde_json::Error,
    },

    /// A patch step failed. Steps listed in `applied` already took effect
    /// and were not rolled back.
    #[error("failed to patch {subresource} of {kind} {name} (applied: {applied:?}): {source}")]
    PatchApply {
        kind: String,
        name: String,
        subresource: SubResource,
        applied: Vec<SubResource>,
        #[source]
        source: StoreError,
    },

    #[error("desired object {desired} does not match live object {live}")]
    IdentityMismatch { desired: String, live: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SyncError {
    /// True if the object was not found, whichever step hit it
    pub fn is_not_found(&self) -> bool {
        match self {
            SyncError::Store(e) => e.is_not_found(),
            SyncError::PatchApply { source, .. } => source.is_not_found(),
            _ => false,
        }
    }
}
