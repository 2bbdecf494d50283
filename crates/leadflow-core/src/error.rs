//! Error types for the execution engine.

use leadflow_provider::ProviderError;
use leadflow_workflow::{ErrorType, WorkflowError};
use thiserror::Error;

/// Errors that can occur during workflow execution.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Record not found: {0}")]
    RecordNotFound(String),

    #[error("Step execution error in '{step}': {message}")]
    StepExecution { step: String, message: String },

    #[error("No handler registered for step type: {0}")]
    HandlerNotFound(String),

    #[error("Execution was canceled")]
    Canceled,

    #[error("Tool loop timed out after {0} seconds")]
    LoopTimeout(u64),

    #[error("Trace persistence failed: {0}")]
    TracePersistence(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Driver error: {0}")]
    Driver(String),

    #[error("Upload rejected: {0}")]
    UploadRejected(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Classification recorded on a failed job.
    pub fn error_type(&self) -> ErrorType {
        match self {
            EngineError::Provider(e) => match e {
                ProviderError::Authentication(_) => ErrorType::Authentication,
                ProviderError::RateLimit(_) => ErrorType::RateLimit,
                ProviderError::ModelNotFound(_) => ErrorType::ModelNotFound,
                ProviderError::Timeout(_) => ErrorType::Timeout,
                ProviderError::Safety(_) => ErrorType::Safety,
                _ => ErrorType::Unknown,
            },
            EngineError::Validation(_) | EngineError::Workflow(_) => ErrorType::Validation,
            EngineError::UploadRejected(_) => ErrorType::Validation,
            EngineError::LoopTimeout(_) => ErrorType::Timeout,
            _ => ErrorType::Unknown,
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::Internal(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_errors_classify() {
        let e = EngineError::Provider(ProviderError::RateLimit("busy".into()));
        assert_eq!(e.error_type(), ErrorType::RateLimit);
        let e = EngineError::Validation("bad dag".into());
        assert_eq!(e.error_type(), ErrorType::Validation);
        let e = EngineError::LoopTimeout(300);
        assert_eq!(e.error_type(), ErrorType::Timeout);
        let e = EngineError::Internal("boom".into());
        assert_eq!(e.error_type(), ErrorType::Unknown);
    }
}
