//! Error types for the guard daemon.
//!
//! Explicit enum variants only - no `Box<dyn Error>`, no `anyhow::Result`.
//! Per-file copy failures inside pack/unpack are logged and skipped at the
//! call site and never appear here; every other failure aborts the current
//! operation, triggers staging cleanup, and is reported. None of these crash
//! the daemon.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::{CheckpointRound, NodeId};

/// Top-level error type for the guard.
#[derive(Debug, Error)]
pub enum GuardError {
    // =========================================================================
    // Configuration errors - fatal at startup only
    // =========================================================================
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    #[error("Configuration parse error: {message}")]
    ConfigParse { message: String },

    #[error("Invalid configuration: {field} - {reason}")]
    InvalidConfig { field: &'static str, reason: String },

    // =========================================================================
    // Routing errors
    // =========================================================================
    #[error("Unknown node id: {0}")]
    UnknownNode(NodeId),

    #[error("Request addressed to node {requested} rejected by node {local}")]
    AccessDenied { requested: NodeId, local: NodeId },

    #[error("Forwarding to node {node} failed: {reason}")]
    RemoteDispatchFailed { node: NodeId, reason: String },

    // =========================================================================
    // Checkpoint/restore errors
    // =========================================================================
    #[error("No PID known for the watched process")]
    PidUnavailable,

    #[error("No checkpoint archive at or below round {requested}")]
    NoCheckpointAvailable { requested: CheckpointRound },

    #[error("Resource packing failed: {reason}")]
    PackFailed { reason: String },

    #[error("Staged external-data copy missing at {path}")]
    ExternalResourceRestoreFailed { path: PathBuf },

    #[error("{utility} exited with status {status:?}: {stderr}")]
    ExternalUtilityFailed {
        utility: &'static str,
        status: Option<i32>,
        stderr: String,
    },

    #[error("Another checkpoint/restore operation is already in progress")]
    OperationInProgress,

    #[error("{operation} did not finish within {limit_secs}s")]
    OperationTimedOut {
        operation: &'static str,
        limit_secs: u64,
    },

    // =========================================================================
    // System errors
    // =========================================================================
    #[error("IO error: {context} - {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
}

impl GuardError {
    /// Attach a context string to a raw IO error.
    pub fn io(context: &'static str, source: std::io::Error) -> Self {
        Self::Io { context, source }
    }
}

/// Result type alias using GuardError.
pub type GuardResult<T> = Result<T, GuardError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_denied_display_names_both_nodes() {
        let err = GuardError::AccessDenied {
            requested: NodeId::new(3),
            local: NodeId::new(1),
        };
        let text = err.to_string();
        assert!(text.contains('3'));
        assert!(text.contains('1'));
    }

    #[test]
    fn io_context_is_preserved() {
        let err = GuardError::io(
            "creating staging directory",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(err.to_string().contains("creating staging directory"));
    }
}
