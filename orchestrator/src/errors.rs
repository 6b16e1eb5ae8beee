//! Error types for the arrstack orchestrator

use thiserror::Error;

use crate::validation::report::ValidationReport;

/// Main error type for the orchestrator
#[derive(Error, Debug)]
pub enum StackError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Validation failed with {} error(s)", .0.errors.len())]
    Validation(Box<ValidationReport>),

    #[error("A run is already in progress for target '{target}' ({run_id})")]
    Conflict { target: String, run_id: String },

    #[error("Collaborator error: {0}")]
    Collaborator(#[from] CollaboratorError),

    #[error("Registry invariant violated: {0}")]
    RegistryInvariant(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for StackError {
    fn from(err: anyhow::Error) -> Self {
        StackError::Internal(err.to_string())
    }
}

/// Failure reported by an external collaborator (renderer, deployer,
/// service configuration client or health probe)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CollaboratorError {
    #[error("{0}")]
    Failed(String),

    #[error("timed out after {0}s")]
    Timeout(u64),

    #[error("unreachable: {0}")]
    Unavailable(String),
}

/// Deploy failure with partial progress, so the summary can name which
/// services came up and which did not
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct DeployFailure {
    pub message: String,
    pub started: Vec<String>,
    pub failed: Vec<String>,
}

impl DeployFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            started: Vec::new(),
            failed: Vec::new(),
        }
    }
}

impl From<CollaboratorError> for DeployFailure {
    fn from(err: CollaboratorError) -> Self {
        DeployFailure::new(err.to_string())
    }
}
