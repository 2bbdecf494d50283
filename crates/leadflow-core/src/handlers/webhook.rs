//! Webhook step handler.

use async_trait::async_trait;
use serde_json::json;

use super::{record_step_failure, Services, StepHandler, StepInvocation};
use crate::error::EngineError;
use crate::redact;
use crate::webhook::WebhookStepService;
use leadflow_workflow::{ExecutionStep, StepKind, StepOutput};

pub struct WebhookHandler;

#[async_trait]
impl StepHandler for WebhookHandler {
    fn kind(&self) -> StepKind {
        StepKind::Webhook
    }

    async fn execute(
        &self,
        services: &Services,
        invocation: StepInvocation<'_>,
    ) -> Result<StepOutput, EngineError> {
        let started = chrono::Utc::now();
        let timer = std::time::Instant::now();

        let service = WebhookStepService::new(
            services.http.clone(),
            services.config.webhook_trigger_timeout,
        );
        let sent = service
            .execute(
                invocation.step,
                invocation.step_index,
                invocation.job,
                invocation.submission,
                invocation.step_outputs,
                invocation.sorted_steps,
            )
            .await;
        let duration_ms = timer.elapsed().as_millis() as u64;

        let result = match sent {
            Ok(result) => result,
            Err(error) => {
                record_step_failure(services, &invocation, "webhook", started, duration_ms, &error)
                    .await;
                return Err(error);
            }
        };

        let config = invocation.step.webhook.as_ref();
        let mut record =
            ExecutionStep::new(invocation.step_name(), invocation.step_order(), "webhook");
        record.input = redact::redacted(&json!({
            "url": result.webhook_url,
            "method": result.method,
            "headers": config.map(|c| c.headers.clone()),
        }));
        record.output = serde_json::to_value(&result)?;
        record.timestamp = started;
        record.duration_ms = result.duration_ms;
        record.success = result.success;
        if !result.success {
            record.error = Some(format!(
                "webhook returned status {:?}",
                result.response_status
            ));
        }
        services
            .trace
            .record(&invocation.job.job_id, record, invocation.trace_mode)
            .await?;

        if !result.success {
            return Err(EngineError::StepExecution {
                step: invocation.step_name(),
                message: format!(
                    "webhook to {} failed with status {:?}",
                    result.webhook_url, result.response_status
                ),
            });
        }

        let mut output = StepOutput::new(
            invocation.step_name(),
            invocation.step_index,
            format!(
                "Webhook delivered to {} (status {})",
                result.webhook_url,
                result.response_status.unwrap_or_default()
            ),
        );
        output.extras = serde_json::to_value(&result)?;
        Ok(output)
    }
}
