//! Deliverable dispatch: webhook and SMS delivery plus tenant
//! notifications. Nothing here ever fails the job.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

use crate::error::EngineError;
use crate::handlers::Services;
use leadflow_provider::{call_with_backoff, RequestBuilder};
use leadflow_workflow::{
    DeliveryMethod, Job, Notification, Submission, Usage, Workflow,
};

/// Outbound SMS transport.
#[async_trait]
pub trait SmsGateway: Send + Sync {
    async fn send(&self, to: &str, body: &str) -> Result<(), EngineError>;
}

const DELIVERY_RETRIES: u32 = 3;

/// Dispatch the finished deliverable according to the workflow's delivery
/// configuration. Failures are logged and swallowed.
pub async fn deliver_job(
    services: &Services,
    workflow: &Workflow,
    job: &Job,
    public_url: &str,
    submission: &Submission,
    report_content: Option<&str>,
) {
    match workflow.delivery.method {
        DeliveryMethod::Webhook => {
            let Some(url) = workflow.delivery.webhook_url.as_deref() else {
                tracing::warn!(job_id = %job.job_id, "webhook delivery enabled but no webhook URL configured");
                return;
            };
            tracing::info!(job_id = %job.job_id, "sending delivery webhook");
            send_delivery_webhook(services, workflow, job, url, public_url, submission).await;
        }
        DeliveryMethod::Sms => {
            tracing::info!(job_id = %job.job_id, "sending SMS notification");
            send_sms(services, workflow, job, public_url, submission, report_content).await;
        }
        DeliveryMethod::None => {
            tracing::info!(job_id = %job.job_id, "no delivery method configured, skipping delivery");
        }
    }
}

/// Artifact-enriched payload sent to the delivery webhook.
async fn build_delivery_payload(
    services: &Services,
    job: &Job,
    public_url: &str,
    submission: &Submission,
) -> Value {
    let mut artifacts = Vec::new();
    let mut images = Vec::new();
    let mut html_files = Vec::new();
    let mut markdown_files = Vec::new();

    for artifact_id in &job.artifacts {
        let Ok(Some(artifact)) = services.records.get_artifact(artifact_id).await else {
            continue;
        };
        let entry = json!({
            "artifact_id": artifact.artifact_id,
            "kind": artifact.kind,
            "name": artifact.name,
            "public_url": artifact.public_url,
            "mime": artifact.mime,
            "size": artifact.size,
        });
        if artifact.is_image() {
            images.push(entry.clone());
        } else if artifact.is_html() {
            html_files.push(entry.clone());
        } else if artifact.is_markdown() {
            markdown_files.push(entry.clone());
        }
        artifacts.push(entry);
    }

    json!({
        "job_id": job.job_id,
        "status": "completed",
        "output_url": public_url,
        "workflow_id": job.workflow_id,
        "submission_data": Value::Object(submission.submission_data.clone()),
        "artifacts": artifacts,
        "images": images,
        "html_files": html_files,
        "markdown_files": markdown_files,
    })
}

async fn send_delivery_webhook(
    services: &Services,
    workflow: &Workflow,
    job: &Job,
    url: &str,
    public_url: &str,
    submission: &Submission,
) {
    let payload = build_delivery_payload(services, job, public_url, submission).await;
    let mut request = crate::http::HttpRequest::post_json(
        url.to_string(),
        payload,
        services.config.delivery_webhook_timeout,
    );
    for (name, value) in &workflow.delivery.webhook_headers {
        request = request.header(name.clone(), value.clone());
    }

    let mut delay = Duration::from_secs(1);
    for attempt in 1..=DELIVERY_RETRIES {
        match services.http.send(request.clone()).await {
            Ok(response) if response.is_success() => {
                tracing::info!(job_id = %job.job_id, status = response.status, "delivery webhook sent");
                return;
            }
            Ok(response) => {
                tracing::warn!(
                    job_id = %job.job_id,
                    attempt,
                    status = response.status,
                    "delivery webhook returned non-success status"
                );
            }
            Err(e) => {
                tracing::warn!(job_id = %job.job_id, attempt, error = %e, "delivery webhook send failed");
            }
        }
        if attempt < DELIVERY_RETRIES {
            tokio::time::sleep(delay).await;
            delay *= 2;
        }
    }
    tracing::error!(job_id = %job.job_id, "delivery webhook failed after retries; job remains completed");
}

/// Render a short SMS through the model and send it via the gateway.
async fn send_sms(
    services: &Services,
    workflow: &Workflow,
    job: &Job,
    public_url: &str,
    submission: &Submission,
    report_content: Option<&str>,
) {
    let Some(gateway) = &services.sms else {
        tracing::warn!(job_id = %job.job_id, "SMS delivery configured but no gateway available");
        return;
    };
    let Some(to) = workflow
        .delivery
        .sms_to
        .as_deref()
        .or(submission.submitter_email.as_deref())
    else {
        tracing::warn!(job_id = %job.job_id, "SMS delivery configured but no destination");
        return;
    };

    let instructions = workflow
        .delivery
        .sms_instructions
        .clone()
        .unwrap_or_else(|| {
            "Write a friendly SMS (under 300 characters) telling the recipient their personalized \
             document is ready at the provided link. Output only the message text."
                .to_string()
        });
    let mut input = format!(
        "Workflow: {}\nDocument link: {public_url}",
        workflow.workflow_name
    );
    if let Some(report) = report_content {
        input.push_str("\n\nDocument summary source:\n");
        input.push_str(&report.chars().take(2000).collect::<String>());
    }

    let request = RequestBuilder::new("gpt-5-mini", instructions, input).build();
    let body = match call_with_backoff(services.provider.as_ref(), &request).await {
        Ok(response) => {
            let usage = response.usage.clone().unwrap_or_default();
            services
                .usage
                .record(
                    &job.tenant_id,
                    &job.job_id,
                    &request.model,
                    &Usage {
                        input_tokens: usage.input_tokens,
                        output_tokens: usage.output_tokens,
                        total_tokens: usage.total_tokens,
                    },
                    "sms_render",
                )
                .await;
            let text = response.text();
            if text.trim().is_empty() {
                format!("Your document is ready: {public_url}")
            } else {
                text
            }
        }
        Err(e) => {
            tracing::warn!(job_id = %job.job_id, error = %e, "SMS rendering failed, using fallback message");
            format!("Your document is ready: {public_url}")
        }
    };

    if let Err(e) = gateway.send(to, &body).await {
        tracing::error!(job_id = %job.job_id, error = %e, "SMS send failed; job remains completed");
    }
}

/// Best-effort completion notification.
pub async fn notify_completion(
    services: &Services,
    job: &Job,
    workflow: &Workflow,
    submission: &Submission,
) {
    let submitter = submission
        .submitter_email
        .as_deref()
        .unwrap_or("customer");
    let notification = Notification::new(
        job.tenant_id.clone(),
        "job_completed",
        "Lead magnet delivered",
        format!(
            "Your lead magnet \"{}\" has been delivered for {submitter}.",
            workflow.workflow_name
        ),
    )
    .about(job.job_id.clone(), "job");

    if let Err(e) = services.records.put_notification(&notification).await {
        tracing::error!(job_id = %job.job_id, error = %e, "error creating completion notification");
    }
}

/// Best-effort failure notification.
pub async fn notify_failure(services: &Services, job: &Job, workflow_name: &str, message: &str) {
    let notification = Notification::new(
        job.tenant_id.clone(),
        "job_failed",
        "Lead magnet failed",
        format!("Workflow \"{workflow_name}\" failed: {message}"),
    )
    .about(job.job_id.clone(), "job");

    if let Err(e) = services.records.put_notification(&notification).await {
        tracing::error!(job_id = %job.job_id, error = %e, "error creating failure notification");
    }
}
