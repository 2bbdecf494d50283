//! Webhook step execution: payload assembly, template rendering, and
//! adapter dispatch.

pub mod adapters;

use regex::Regex;
use serde_json::{json, Map, Value};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use crate::context;
use crate::error::EngineError;
use crate::http::HttpClient;
use adapters::{GenericHttpAdapter, SlackAdapter, WebhookAdapter, WebhookRequestConfig};
use leadflow_workflow::{Job, StepOutput, Submission, WebhookBodyMode, WebhookConfig, WorkflowStep};

/// Result of one webhook dispatch.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct WebhookResult {
    pub webhook_url: String,
    pub method: String,
    pub response_status: Option<u16>,
    pub response_body: String,
    pub success: bool,
    pub duration_ms: u64,
    pub payload_size_bytes: usize,
}

/// Executes webhook steps through the configured adapter.
pub struct WebhookStepService {
    http: Arc<dyn HttpClient>,
    timeout: Duration,
}

impl WebhookStepService {
    pub fn new(http: Arc<dyn HttpClient>, timeout: Duration) -> Self {
        Self { http, timeout }
    }

    fn adapter_for(config: &WebhookConfig) -> Box<dyn WebhookAdapter> {
        let explicit = config.webhook_type.as_deref();
        let slack = explicit == Some("slack")
            || (explicit.is_none() && config.url.contains("hooks.slack.com"));
        if slack {
            Box::new(SlackAdapter)
        } else {
            Box::new(GenericHttpAdapter)
        }
    }

    /// Execute a webhook step. Returns the dispatch result; HTTP-level
    /// failure is reported through `success`, not an error.
    pub async fn execute(
        &self,
        step: &WorkflowStep,
        step_index: usize,
        job: &Job,
        submission: &Submission,
        step_outputs: &[StepOutput],
        sorted_steps: &[WorkflowStep],
    ) -> Result<WebhookResult, EngineError> {
        let config = step.webhook.clone().ok_or_else(|| EngineError::Validation(
            format!("webhook step '{}' has no webhook configuration", step.step_name),
        ))?;
        if config.url.is_empty() {
            return Err(EngineError::Validation(format!(
                "webhook step '{}' has no URL",
                step.step_name
            )));
        }

        let adapter = Self::adapter_for(&config);
        let resolved_url = build_url_with_query_params(&config.url, &config.query_params);
        let content_type = config
            .content_type
            .clone()
            .unwrap_or_else(|| "application/json".to_string());

        let mut headers = config.headers.clone();
        if !headers.keys().any(|k| k.eq_ignore_ascii_case("content-type")) {
            headers.insert("Content-Type".to_string(), content_type.clone());
        }

        let body_mode = config.body_mode.unwrap_or(match &config.body {
            Some(body) if !body.trim().is_empty() => WebhookBodyMode::Custom,
            _ => WebhookBodyMode::Auto,
        });
        let use_custom = body_mode == WebhookBodyMode::Custom
            && config.body.as_deref().map(|b| !b.trim().is_empty()).unwrap_or(false);

        let payload = if use_custom {
            let variables = build_template_context(job, submission, step_outputs, sorted_steps);
            let rendered = render_template(config.body.as_deref().unwrap_or(""), &variables);
            match serde_json::from_str::<Value>(&rendered) {
                Ok(value) => value,
                // Non-JSON custom bodies are wrapped so the adapter can
                // still carry them.
                Err(_) => json!({ "raw_body": rendered }),
            }
        } else {
            build_auto_payload(
                job,
                submission,
                step_outputs,
                sorted_steps,
                step_index,
                &config,
            )
        };

        let request_config = WebhookRequestConfig {
            url: resolved_url.clone(),
            method: config
                .method
                .clone()
                .unwrap_or_else(|| "POST".to_string())
                .to_uppercase(),
            headers,
            timeout: self.timeout,
        };

        tracing::info!(
            step_name = %step.step_name,
            adapter = adapter.name(),
            url = %resolved_url,
            "executing webhook step"
        );

        let payload_size = serde_json::to_vec(&payload).map(|v| v.len()).unwrap_or(0);
        let started = std::time::Instant::now();
        let sent = adapter.send(self.http.as_ref(), &payload, &request_config).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let result = match sent {
            Ok(response) => WebhookResult {
                webhook_url: resolved_url,
                method: request_config.method,
                response_status: Some(response.status),
                success: response.is_success(),
                response_body: truncate(&response.body, 10_000),
                duration_ms,
                payload_size_bytes: payload_size,
            },
            Err(e) => WebhookResult {
                webhook_url: resolved_url,
                method: request_config.method,
                response_status: None,
                success: false,
                response_body: e.to_string(),
                duration_ms,
                payload_size_bytes: payload_size,
            },
        };
        Ok(result)
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}

/// Merge query params into a URL, preserving existing ones.
pub fn build_url_with_query_params(
    url: &str,
    query_params: &std::collections::HashMap<String, String>,
) -> String {
    if query_params.is_empty() {
        return url.to_string();
    }
    let Ok(mut parsed) = reqwest::Url::parse(url) else {
        return url.to_string();
    };
    let existing: Vec<(String, String)> = parsed
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    let mut merged: Vec<(String, String)> = existing;
    for (key, value) in query_params {
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        match merged.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = value.clone(),
            None => merged.push((key.to_string(), value.clone())),
        }
    }

    parsed.set_query(None);
    if !merged.is_empty() {
        let query = merged
            .iter()
            .map(|(k, v)| {
                format!(
                    "{}={}",
                    urlencoding::encode(k),
                    urlencoding::encode(v)
                )
            })
            .collect::<Vec<_>>()
            .join("&");
        parsed.set_query(Some(&query));
    }
    parsed.to_string()
}

/// Look up a dotted path (`job.status`, `steps.0.output`) in a JSON value.
pub fn get_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for part in path.split('.').map(str::trim).filter(|p| !p.is_empty()) {
        current = match current {
            Value::Object(map) => map.get(part)?,
            Value::Array(entries) => entries.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

fn template_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{\s*([^}]+?)\s*\}\}").expect("valid regex"))
}

/// Render a `{{dotted.path}}` template against a JSON context. Unknown
/// paths render empty; object/array values render as JSON.
pub fn render_template(template: &str, variables: &Value) -> String {
    template_regex()
        .replace_all(template, |captures: &regex::Captures<'_>| {
            let key = captures[1].trim();
            match get_path(variables, key) {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Null) | None => String::new(),
                Some(other) => other.to_string(),
            }
        })
        .into_owned()
}

/// Context available to custom body templates.
pub fn build_template_context(
    job: &Job,
    submission: &Submission,
    step_outputs: &[StepOutput],
    sorted_steps: &[WorkflowStep],
) -> Value {
    let submission_meta = json!({
        "submission_id": submission.submission_id,
        "tenant_id": submission.tenant_id,
        "submitter_email": submission.submitter_email,
        "created_at": submission.created_at,
    });

    let deliverable_context = context::build_deliverable_context(step_outputs, sorted_steps);
    let deliverable_steps = context::build_deliverable_steps(step_outputs, sorted_steps);

    json!({
        "job": job,
        "submission": Value::Object(submission.submission_data.clone()),
        "submission_meta": submission_meta,
        "steps": step_outputs,
        "deliverable_context": deliverable_context,
        "deliverable_steps": Value::Object(deliverable_steps),
        "artifacts": [],
    })
}

/// Auto payload: structured job/submission/step sections gated by the
/// step's data-selection flags. Step outputs at or beyond the current
/// step are excluded along with anything in `exclude_step_indices`.
pub fn build_auto_payload(
    job: &Job,
    submission: &Submission,
    step_outputs: &[StepOutput],
    sorted_steps: &[WorkflowStep],
    step_index: usize,
    config: &WebhookConfig,
) -> Value {
    let selection = &config.data_selection;
    let mut payload = Map::new();

    let mut outputs = Map::new();
    for output in step_outputs {
        let idx = output.step_index;
        if selection.exclude_step_indices.contains(&idx) || idx >= step_index {
            continue;
        }
        outputs.insert(
            format!("step_{idx}"),
            json!({
                "step_name": output.step_name,
                "step_index": idx,
                "output": output.output,
                "artifact_id": output.artifact_id,
                "image_urls": output.image_urls,
            }),
        );
    }
    if !outputs.is_empty() {
        payload.insert("step_outputs".to_string(), Value::Object(outputs));
    }

    if selection.include_job_info {
        payload.insert(
            "job_info".to_string(),
            json!({
                "job_id": job.job_id,
                "workflow_id": job.workflow_id,
                "status": job.status,
                "created_at": job.created_at,
            }),
        );
    }

    if selection.include_submission {
        payload.insert(
            "submission_data".to_string(),
            Value::Object(submission.submission_data.clone()),
        );
    }

    let deliverable_context = context::build_deliverable_context(step_outputs, sorted_steps);
    if !deliverable_context.is_empty() {
        payload.insert(
            "deliverable_context".to_string(),
            Value::String(deliverable_context),
        );
        let deliverable_steps = context::build_deliverable_steps(step_outputs, sorted_steps);
        if !deliverable_steps.is_empty() {
            payload.insert(
                "deliverable_steps".to_string(),
                Value::Object(deliverable_steps),
            );
        }
    }

    Value::Object(payload)
}
