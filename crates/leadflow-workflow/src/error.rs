//! Error types for the leadflow workflow model.

use thiserror::Error;

/// Primary error type for workflow operations.
#[derive(Error, Debug, Clone)]
pub enum WorkflowError {
    #[error("Step not found: {0}")]
    StepNotFound(usize),

    #[error("Workflow not found: {0}")]
    WorkflowNotFound(String),

    #[error("Invalid workflow: {0}")]
    InvalidWorkflow(String),

    #[error("Invalid dependency: {0}")]
    InvalidDependency(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for WorkflowError {
    fn from(e: serde_json::Error) -> Self {
        WorkflowError::Serialization(e.to_string())
    }
}

/// Result of validating a workflow's dependency declarations.
///
/// Validation errors abort the job before any step runs; each invalid
/// `depends_on` entry produces exactly one error message.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub errors: Vec<String>,
}

impl ValidationReport {
    pub fn valid() -> Self {
        Self {
            is_valid: true,
            errors: Vec::new(),
        }
    }

    pub fn invalid(errors: Vec<String>) -> Self {
        Self {
            is_valid: false,
            errors,
        }
    }
}
