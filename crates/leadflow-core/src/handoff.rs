//! Workflow handoff: trigger another workflow through the public
//! webhook-trigger endpoint.

use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;

use crate::context;
use crate::error::EngineError;
use crate::http::{HttpClient, HttpRequest};
use crate::store::RecordStore;
use leadflow_workflow::{
    HandoffConfig, HandoffPayloadMode, Job, StepOutput, Submission, WorkflowStep,
};

/// Result of triggering a handoff.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct HandoffResult {
    pub target_workflow_id: String,
    pub triggered_job_id: Option<String>,
    pub success: bool,
    pub response_status: Option<u16>,
    pub response_body: String,
    pub error: Option<String>,
}

/// Triggers destination workflows for handoff steps. The created job is
/// independent: the parent never awaits the child.
pub struct HandoffService {
    records: Arc<dyn RecordStore>,
    http: Arc<dyn HttpClient>,
    api_url: Option<String>,
    timeout: Duration,
}

impl HandoffService {
    pub fn new(
        records: Arc<dyn RecordStore>,
        http: Arc<dyn HttpClient>,
        api_url: Option<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            records,
            http,
            api_url,
            timeout,
        }
    }

    async fn webhook_token(&self, tenant_id: &str) -> Result<String, EngineError> {
        let settings = self.records.get_settings(tenant_id).await?;
        settings
            .and_then(|s| s.webhook_token)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                EngineError::Validation("missing webhook_token in tenant settings".to_string())
            })
    }

    /// Validate the target and trigger it. Validation problems error out;
    /// a failed HTTP trigger is reported in the result instead.
    pub async fn execute(
        &self,
        step: &WorkflowStep,
        step_index: usize,
        job: &Job,
        submission: &Submission,
        previous_context: &str,
        step_outputs: &[StepOutput],
        sorted_steps: &[WorkflowStep],
    ) -> Result<(HandoffResult, Value), EngineError> {
        let config = step.handoff.clone().ok_or_else(|| {
            EngineError::Validation(format!(
                "handoff step '{}' has no handoff configuration",
                step.step_name
            ))
        })?;
        let target_workflow_id = config.workflow_id.trim().to_string();
        if target_workflow_id.is_empty() {
            return Err(EngineError::Validation(
                "handoff workflow_id is required for workflow_handoff steps".to_string(),
            ));
        }
        if job.workflow_id == target_workflow_id {
            return Err(EngineError::Validation(
                "cannot hand off to the same workflow".to_string(),
            ));
        }

        let target = self
            .records
            .get_workflow(&target_workflow_id)
            .await?
            .filter(|w| w.deleted_at.is_none())
            .ok_or_else(|| {
                EngineError::Validation(format!(
                    "target workflow {target_workflow_id} not found"
                ))
            })?;
        if target.tenant_id != job.tenant_id {
            return Err(EngineError::Validation(
                "target workflow is not in the same tenant".to_string(),
            ));
        }

        let api_base = job
            .api_url
            .clone()
            .or_else(|| self.api_url.clone())
            .map(|u| u.trim_end_matches('/').to_string())
            .filter(|u| !u.is_empty())
            .ok_or_else(|| {
                EngineError::Validation(
                    "missing api_url for current job; cannot trigger handoff".to_string(),
                )
            })?;

        let token = self.webhook_token(&job.tenant_id).await?;
        let webhook_url = format!("{api_base}/v1/webhooks/{token}");

        let outgoing = build_outgoing_submission(
            &config,
            step,
            step_index,
            job,
            submission,
            previous_context,
            step_outputs,
            sorted_steps,
        );

        let request_body = json!({
            "workflow_id": target_workflow_id,
            "submission_data": outgoing,
        });

        let response = self
            .http
            .send(HttpRequest::post_json(
                webhook_url.clone(),
                request_body.clone(),
                self.timeout,
            ))
            .await;

        let result = match response {
            Ok(response) => {
                let triggered_job_id = serde_json::from_str::<Value>(&response.body)
                    .ok()
                    .and_then(|body| {
                        body.get("job_id")
                            .or_else(|| body.get("jobId"))
                            .and_then(|v| v.as_str())
                            .map(String::from)
                    });
                let success = response.is_success()
                    && triggered_job_id.as_deref().map(|id| !id.is_empty()).unwrap_or(false);
                HandoffResult {
                    target_workflow_id: target_workflow_id.clone(),
                    triggered_job_id,
                    success,
                    response_status: Some(response.status),
                    response_body: response.body.chars().take(10_000).collect(),
                    error: (!success).then(|| {
                        format!("Failed to trigger handoff (status={})", response.status)
                    }),
                }
            }
            Err(e) => {
                tracing::error!(
                    job_id = %job.job_id,
                    target_workflow_id = %target_workflow_id,
                    error = %e,
                    "error triggering handoff"
                );
                HandoffResult {
                    target_workflow_id: target_workflow_id.clone(),
                    triggered_job_id: None,
                    success: false,
                    response_status: None,
                    response_body: String::new(),
                    error: Some(e.to_string()),
                }
            }
        };

        let request_details = json!({
            "webhook_url": webhook_url,
            "payload": request_body,
        });
        Ok((result, request_details))
    }
}

#[allow(clippy::too_many_arguments)]
fn build_outgoing_submission(
    config: &HandoffConfig,
    step: &WorkflowStep,
    step_index: usize,
    job: &Job,
    submission: &Submission,
    previous_context: &str,
    step_outputs: &[StepOutput],
    sorted_steps: &[WorkflowStep],
) -> Value {
    let mut outgoing = Map::new();
    if config.include_submission_data {
        for (key, value) in &submission.submission_data {
            outgoing.insert(key.clone(), value.clone());
        }
    }

    let deliverable_context = context::build_deliverable_context(step_outputs, sorted_steps);
    let deliverable_steps = context::build_deliverable_steps(step_outputs, sorted_steps);

    let last_output = || {
        step_outputs
            .last()
            .map(|o| o.output.clone())
            .unwrap_or_default()
    };
    let primary_value = match config.payload_mode {
        HandoffPayloadMode::SubmissionOnly => String::new(),
        HandoffPayloadMode::FullContext => previous_context.to_string(),
        HandoffPayloadMode::DeliverableOutput => {
            if deliverable_context.is_empty() {
                last_output()
            } else {
                deliverable_context.clone()
            }
        }
        HandoffPayloadMode::PreviousStepOutput => last_output(),
    };

    let input_field = if config.input_field.trim().is_empty() {
        "input"
    } else {
        config.input_field.trim()
    };
    outgoing.insert(input_field.to_string(), Value::String(primary_value));

    if config.include_context && config.payload_mode != HandoffPayloadMode::FullContext {
        outgoing.insert(
            "context".to_string(),
            Value::String(previous_context.to_string()),
        );
    }
    if !deliverable_context.is_empty() {
        outgoing.insert(
            "deliverable_context".to_string(),
            Value::String(deliverable_context),
        );
        if !deliverable_steps.is_empty() {
            outgoing.insert(
                "deliverable_steps".to_string(),
                Value::Object(deliverable_steps),
            );
        }
    }

    outgoing.insert(
        "_handoff".to_string(),
        json!({
            "source_job_id": job.job_id,
            "source_workflow_id": job.workflow_id,
            "source_step_index": step_index,
            "source_step_name": step.step_name,
            "bypass_required_inputs": config.bypass_required_inputs,
            "timestamp": chrono::Utc::now(),
        }),
    );

    Value::Object(outgoing)
}
