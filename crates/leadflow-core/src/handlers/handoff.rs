//! Workflow-handoff step handler.

use async_trait::async_trait;

use super::{record_step_failure, Services, StepHandler, StepInvocation};
use crate::error::EngineError;
use crate::handoff::HandoffService;
use crate::redact;
use leadflow_workflow::{ExecutionStep, StepKind, StepOutput};

pub struct HandoffHandler;

#[async_trait]
impl StepHandler for HandoffHandler {
    fn kind(&self) -> StepKind {
        StepKind::WorkflowHandoff
    }

    async fn execute(
        &self,
        services: &Services,
        invocation: StepInvocation<'_>,
    ) -> Result<StepOutput, EngineError> {
        let started = chrono::Utc::now();
        let timer = std::time::Instant::now();

        let service = HandoffService::new(
            services.records.clone(),
            services.http.clone(),
            services.config.api_url.clone(),
            services.config.webhook_trigger_timeout,
        );
        let executed = service
            .execute(
                invocation.step,
                invocation.step_index,
                invocation.job,
                invocation.submission,
                invocation.previous_context,
                invocation.step_outputs,
                invocation.sorted_steps,
            )
            .await;
        let duration_ms = timer.elapsed().as_millis() as u64;

        let (result, request_details) = match executed {
            Ok(pair) => pair,
            Err(error) => {
                record_step_failure(
                    services,
                    &invocation,
                    "workflow_handoff",
                    started,
                    duration_ms,
                    &error,
                )
                .await;
                return Err(error);
            }
        };

        let mut record = ExecutionStep::new(
            invocation.step_name(),
            invocation.step_order(),
            "workflow_handoff",
        );
        record.input = redact::redacted(&request_details);
        record.output = serde_json::to_value(&result)?;
        record.timestamp = started;
        record.duration_ms = duration_ms;
        record.success = result.success;
        record.error = result.error.clone();
        services
            .trace
            .record(&invocation.job.job_id, record, invocation.trace_mode)
            .await?;

        if !result.success {
            return Err(EngineError::StepExecution {
                step: invocation.step_name(),
                message: result
                    .error
                    .unwrap_or_else(|| "failed to trigger handoff".to_string()),
            });
        }

        let mut output = StepOutput::new(
            invocation.step_name(),
            invocation.step_index,
            format!(
                "Triggered workflow {} (job_id={})",
                result.target_workflow_id,
                result.triggered_job_id.as_deref().unwrap_or("unknown")
            ),
        );
        output.extras = serde_json::to_value(&result)?;
        Ok(output)
    }
}
