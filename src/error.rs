//! Error types for the build executor.

use std::path::PathBuf;

/// Result type alias for executor operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while executing a build.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Executor configuration is incomplete or invalid.
    #[error("invalid executor configuration: {0}")]
    InvalidConfig(String),

    /// A container declares artifacts but no artifact store is configured.
    #[error("container '{container}' declares artifacts but no artifact store is configured")]
    MissingStorage { container: String },

    /// Repository is not trusted to run privileged containers.
    #[error("repo {repo} is not trusted to run privileged container '{container}'")]
    Untrusted { repo: String, container: String },

    // =========================================================================
    // Unit Lifecycle Errors
    // =========================================================================
    /// An empty (zero-value) container was handed to a lifecycle call.
    #[error("empty container provided")]
    EmptyContainer,

    /// A lifecycle call ran before the unit was planned.
    #[error("unable to load {kind} {id}: not planned")]
    NotPlanned { kind: &'static str, id: String },

    /// Variable substitution failed for a container.
    #[error("unable to substitute container '{container}': {reason}")]
    Substitution { container: String, reason: String },

    /// A lifecycle phase failed for a named unit.
    #[error("unable to {phase} {kind} {name}: {source}")]
    Unit {
        phase: &'static str,
        kind: &'static str,
        name: String,
        #[source]
        source: Box<Error>,
    },

    /// The build's pipeline does not contain an init step.
    #[error("unable to find init step in pipeline {0}")]
    MissingInit(String),

    // =========================================================================
    // Stage Errors
    // =========================================================================
    /// A stage this stage needs finished with an error.
    #[error("stage {stage} depends on stage {needs} which failed: {reason}")]
    StageDependency {
        stage: String,
        needs: String,
        reason: String,
    },

    // =========================================================================
    // Cancellation
    // =========================================================================
    /// The controlling token was canceled.
    #[error("context done")]
    Cancelled,

    // =========================================================================
    // Runtime Errors
    // =========================================================================
    /// The container runtime rejected an operation.
    #[error("runtime {operation} failed for {target}: {reason}")]
    Runtime {
        operation: &'static str,
        target: String,
        reason: String,
    },

    // =========================================================================
    // Reporting Errors
    // =========================================================================
    /// The control server rejected or could not receive an update.
    #[error("api request failed: {0}")]
    Api(String),

    // =========================================================================
    // Storage Errors
    // =========================================================================
    /// Artifact store initialization failed.
    #[error("failed to initialize artifact store at {path}: {reason}")]
    StorageInitFailed { path: PathBuf, reason: String },

    /// Artifact key would escape the store root.
    #[error("invalid artifact key '{key}': {reason}")]
    InvalidArtifactKey { key: String, reason: String },

    /// Artifact write failed.
    #[error("failed to write artifact: {0}")]
    StorageWriteFailed(String),

    // =========================================================================
    // I/O Errors
    // =========================================================================
    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// Internal error (should not happen).
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Wraps an error with the unit kind, name and lifecycle phase it came from.
    pub fn unit(phase: &'static str, kind: &'static str, name: impl Into<String>, source: Error) -> Self {
        Self::Unit {
            phase,
            kind,
            name: name.into(),
            source: Box::new(source),
        }
    }

    /// Builds a runtime error for an operation against a target.
    pub fn runtime(operation: &'static str, target: impl Into<String>, reason: impl ToString) -> Self {
        Self::Runtime {
            operation,
            target: target.into(),
            reason: reason.to_string(),
        }
    }

    /// Returns true if this error (or the error it wraps) is a cancellation.
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::Unit { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }
}
