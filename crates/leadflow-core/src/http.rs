//! Outbound HTTP client abstraction.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::EngineError;

/// An outbound HTTP request (webhooks, handoff triggers, share hooks).
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    /// JSON body; serialized as-is.
    pub body: Option<serde_json::Value>,
    /// Raw body used when the content type is not JSON.
    pub raw_body: Option<String>,
    pub timeout: Duration,
}

impl HttpRequest {
    pub fn post_json(url: impl Into<String>, body: serde_json::Value, timeout: Duration) -> Self {
        Self {
            method: "POST".to_string(),
            url: url.into(),
            headers: Vec::new(),
            body: Some(body),
            raw_body: None,
            timeout,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// Response from an outbound call.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    /// Body decoded as text (lossy for binary payloads).
    pub body: String,
    /// Raw body bytes; what image downloads consume.
    pub bytes: bytes::Bytes,
}

impl HttpResponse {
    pub fn new(status: u16, bytes: bytes::Bytes) -> Self {
        let body = String::from_utf8_lossy(&bytes).into_owned();
        Self {
            status,
            body,
            bytes,
        }
    }

    pub fn text(status: u16, body: impl Into<String>) -> Self {
        let body = body.into();
        Self {
            status,
            bytes: bytes::Bytes::from(body.clone().into_bytes()),
            body,
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Outbound HTTP transport.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, EngineError>;
}

/// reqwest-backed transport.
pub struct ReqwestHttpClient {
    client: reqwest::Client,
}

impl ReqwestHttpClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    pub fn inner(&self) -> &reqwest::Client {
        &self.client
    }
}

impl Default for ReqwestHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, EngineError> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|e| EngineError::Http(e.to_string()))?;

        let mut builder = self
            .client
            .request(method, &request.url)
            .timeout(request.timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        } else if let Some(raw) = &request.raw_body {
            builder = builder.body(raw.clone());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| EngineError::Http(e.to_string()))?;
        let status = response.status().as_u16();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| EngineError::Http(e.to_string()))?;

        Ok(HttpResponse::new(status, bytes))
    }
}
