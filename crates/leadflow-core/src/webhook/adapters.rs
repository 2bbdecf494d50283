//! Webhook delivery adapters.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;

use crate::error::EngineError;
use crate::http::{HttpClient, HttpRequest, HttpResponse};

/// Resolved request configuration handed to an adapter.
#[derive(Debug, Clone)]
pub struct WebhookRequestConfig {
    pub url: String,
    pub method: String,
    pub headers: HashMap<String, String>,
    pub timeout: Duration,
}

/// A webhook destination adapter.
#[async_trait]
pub trait WebhookAdapter: Send + Sync {
    fn name(&self) -> &'static str;

    async fn send(
        &self,
        http: &dyn HttpClient,
        payload: &Value,
        config: &WebhookRequestConfig,
    ) -> Result<HttpResponse, EngineError>;
}

fn base_request(payload: &Value, config: &WebhookRequestConfig) -> HttpRequest {
    let is_json = config
        .headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("content-type"))
        .map(|(_, v)| v.to_lowercase().contains("application/json"))
        .unwrap_or(true);

    let mut request = HttpRequest {
        method: config.method.clone(),
        url: config.url.clone(),
        headers: config.headers.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        body: None,
        raw_body: None,
        timeout: config.timeout,
    };

    // A custom body that failed to parse as JSON travels in `raw_body`.
    if let Some(raw) = payload.get("raw_body").and_then(|v| v.as_str()) {
        if !is_json {
            request.raw_body = Some(raw.to_string());
            return request;
        }
    }
    if request.method != "GET" {
        request.body = Some(payload.clone());
    }
    request
}

/// Plain HTTP adapter: posts the payload as-is.
pub struct GenericHttpAdapter;

#[async_trait]
impl WebhookAdapter for GenericHttpAdapter {
    fn name(&self) -> &'static str {
        "generic"
    }

    async fn send(
        &self,
        http: &dyn HttpClient,
        payload: &Value,
        config: &WebhookRequestConfig,
    ) -> Result<HttpResponse, EngineError> {
        http.send(base_request(payload, config)).await
    }
}

/// Slack incoming-webhook adapter. Slack requires a `text` field; payloads
/// without one are summarized into it.
pub struct SlackAdapter;

impl SlackAdapter {
    fn summarize(payload: &Value) -> String {
        if let Some(context) = payload.get("deliverable_context").and_then(|v| v.as_str()) {
            if !context.is_empty() {
                return context.to_string();
            }
        }
        if let Some(job_info) = payload.get("job_info") {
            return format!(
                "Job {} completed a workflow step.",
                job_info.get("job_id").and_then(|v| v.as_str()).unwrap_or("?")
            );
        }
        payload.to_string()
    }
}

#[async_trait]
impl WebhookAdapter for SlackAdapter {
    fn name(&self) -> &'static str {
        "slack"
    }

    async fn send(
        &self,
        http: &dyn HttpClient,
        payload: &Value,
        config: &WebhookRequestConfig,
    ) -> Result<HttpResponse, EngineError> {
        let slack_payload = if payload.get("text").is_some() {
            payload.clone()
        } else {
            json!({ "text": Self::summarize(payload) })
        };
        http.send(base_request(&slack_payload, config)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct CapturingHttp {
        captured: Mutex<Vec<HttpRequest>>,
    }

    #[async_trait]
    impl HttpClient for CapturingHttp {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse, EngineError> {
            self.captured.lock().unwrap().push(request);
            Ok(HttpResponse::text(200, "ok"))
        }
    }

    fn config() -> WebhookRequestConfig {
        WebhookRequestConfig {
            url: "https://hooks.slack.com/services/T/B/X".to_string(),
            method: "POST".to_string(),
            headers: HashMap::from([(
                "Content-Type".to_string(),
                "application/json".to_string(),
            )]),
            timeout: Duration::from_secs(15),
        }
    }

    #[tokio::test]
    async fn slack_adapter_wraps_payload_in_text() {
        let http = CapturingHttp {
            captured: Mutex::new(Vec::new()),
        };
        let payload = json!({ "deliverable_context": "Step 2: Done\nresult" });
        SlackAdapter.send(&http, &payload, &config()).await.unwrap();

        let captured = http.captured.lock().unwrap();
        let body = captured[0].body.as_ref().unwrap();
        assert!(body["text"].as_str().unwrap().contains("result"));
    }

    #[tokio::test]
    async fn generic_adapter_posts_payload_verbatim() {
        let http = CapturingHttp {
            captured: Mutex::new(Vec::new()),
        };
        let payload = json!({ "job_info": { "job_id": "j1" } });
        GenericHttpAdapter.send(&http, &payload, &config()).await.unwrap();

        let captured = http.captured.lock().unwrap();
        assert_eq!(captured[0].body.as_ref().unwrap()["job_info"]["job_id"], "j1");
    }

    #[tokio::test]
    async fn raw_body_travels_unwrapped_for_non_json() {
        let http = CapturingHttp {
            captured: Mutex::new(Vec::new()),
        };
        let mut cfg = config();
        cfg.headers
            .insert("Content-Type".to_string(), "text/plain".to_string());
        let payload = json!({ "raw_body": "plain text body" });
        GenericHttpAdapter.send(&http, &payload, &cfg).await.unwrap();

        let captured = http.captured.lock().unwrap();
        assert_eq!(captured[0].raw_body.as_deref(), Some("plain text body"));
        assert!(captured[0].body.is_none());
    }
}
