//! Provider error taxonomy.

use thiserror::Error;

/// Errors surfaced by a model provider call.
#[derive(Error, Debug, Clone)]
pub enum ProviderError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Rate limited: {0}")]
    RateLimit(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Bad request: {message}")]
    BadRequest {
        message: String,
        /// Error code from the provider body, when present.
        code: Option<String>,
        /// Offending parameter from the provider body, when present.
        param: Option<String>,
    },

    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    #[error("Safety refusal: {0}")]
    Safety(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Image upload failed: {0}")]
    ImageUpload(String),
}

impl ProviderError {
    /// Transient errors are retried with backoff; everything else is not.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimit(_)
                | ProviderError::Timeout(_)
                | ProviderError::Unavailable(_)
                | ProviderError::Transport(_)
        )
    }

    /// Whether this error reports a failed image download, recoverable by
    /// substituting base64 content or dropping the image (see
    /// [`crate::retry`]).
    pub fn is_image_download_error(&self) -> bool {
        match self {
            ProviderError::BadRequest { message, code, param } => {
                message.contains("Error while downloading")
                    || message.to_lowercase().contains("downloading")
                    || (code.as_deref() == Some("invalid_value")
                        && param.as_deref() == Some("url"))
            }
            _ => false,
        }
    }
}

impl From<serde_json::Error> for ProviderError {
    fn from(e: serde_json::Error) -> Self {
        ProviderError::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ProviderError::Timeout(e.to_string())
        } else {
            ProviderError::Transport(e.to_string())
        }
    }
}
