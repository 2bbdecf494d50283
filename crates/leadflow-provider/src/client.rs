//! Model provider trait and retry wrapper.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::ProviderError;
use crate::request::ResponseRequest;
use crate::response::ProviderResponse;

/// A Responses-API–shaped model provider. Stateless at this layer; turn
/// linkage happens through `previous_response_id` on the request.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    async fn create(&self, request: &ResponseRequest) -> Result<ProviderResponse, ProviderError>;
}

/// Bounded attempts for transient provider errors.
pub const MAX_TRANSIENT_RETRIES: u32 = 3;

/// Base delay for the capped exponential backoff.
pub const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

/// Ceiling for a single backoff sleep.
pub const RETRY_MAX_DELAY: Duration = Duration::from_secs(8);

/// Call the provider, retrying transient failures (rate limit, timeout,
/// 5xx, transport) with capped exponential backoff. Non-transient errors
/// surface immediately.
pub async fn call_with_backoff(
    provider: &dyn ModelProvider,
    request: &ResponseRequest,
) -> Result<ProviderResponse, ProviderError> {
    let mut attempt = 0u32;
    loop {
        match provider.create(request).await {
            Ok(response) => return Ok(response),
            Err(error) if error.is_transient() && attempt < MAX_TRANSIENT_RETRIES => {
                let delay = RETRY_BASE_DELAY
                    .saturating_mul(2u32.saturating_pow(attempt))
                    .min(RETRY_MAX_DELAY);
                attempt += 1;
                tracing::warn!(
                    model = %request.model,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "transient provider error, retrying with backoff"
                );
                tokio::time::sleep(delay).await;
            }
            Err(error) => return Err(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::RequestBuilder;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyProvider {
        failures: AtomicU32,
    }

    #[async_trait]
    impl ModelProvider for FlakyProvider {
        async fn create(
            &self,
            _request: &ResponseRequest,
        ) -> Result<ProviderResponse, ProviderError> {
            if self.failures.fetch_sub(1, Ordering::SeqCst) > 0 {
                Err(ProviderError::RateLimit("slow down".to_string()))
            } else {
                Ok(ProviderResponse {
                    id: "resp_ok".to_string(),
                    output_text: Some("done".to_string()),
                    ..Default::default()
                })
            }
        }
    }

    #[tokio::test]
    async fn transient_errors_are_retried() {
        let provider = FlakyProvider {
            failures: AtomicU32::new(2),
        };
        let request = RequestBuilder::new("gpt-5", "go", "data").build();
        let response = call_with_backoff(&provider, &request).await.unwrap();
        assert_eq!(response.id, "resp_ok");
    }

    struct AlwaysAuthError;

    #[async_trait]
    impl ModelProvider for AlwaysAuthError {
        async fn create(
            &self,
            _request: &ResponseRequest,
        ) -> Result<ProviderResponse, ProviderError> {
            Err(ProviderError::Authentication("bad key".to_string()))
        }
    }

    #[tokio::test]
    async fn non_transient_errors_surface_immediately() {
        let request = RequestBuilder::new("gpt-5", "go", "data").build();
        let error = call_with_backoff(&AlwaysAuthError, &request).await.unwrap_err();
        assert!(matches!(error, ProviderError::Authentication(_)));
    }
}
