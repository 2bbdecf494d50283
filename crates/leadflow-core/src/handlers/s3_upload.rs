//! S3-upload step handler: publishes content produced by a prior step.

use async_trait::async_trait;
use serde_json::json;

use super::{record_step_failure, Services, StepHandler, StepInvocation};
use crate::error::EngineError;
use crate::s3_upload::{resolve_output_config, OutputPublisher};
use leadflow_workflow::{ExecutionStep, StepKind, StepOutput};

pub struct S3UploadHandler;

#[async_trait]
impl StepHandler for S3UploadHandler {
    fn kind(&self) -> StepKind {
        StepKind::S3Upload
    }

    async fn execute(
        &self,
        services: &Services,
        invocation: StepInvocation<'_>,
    ) -> Result<StepOutput, EngineError> {
        let started = chrono::Utc::now();
        let timer = std::time::Instant::now();

        let result = publish(services, &invocation).await;
        let duration_ms = timer.elapsed().as_millis() as u64;

        let (published, source_index) = match result {
            Ok(pair) => pair,
            Err(error) => {
                record_step_failure(services, &invocation, "s3_upload", started, duration_ms, &error)
                    .await;
                return Err(error);
            }
        };

        let mut record =
            ExecutionStep::new(invocation.step_name(), invocation.step_order(), "s3_upload");
        record.input = json!({ "source_step_index": source_index });
        record.output = serde_json::to_value(&published)?;
        record.timestamp = started;
        record.duration_ms = duration_ms;
        services
            .trace
            .record(&invocation.job.job_id, record, invocation.trace_mode)
            .await?;

        let mut output = StepOutput::new(
            invocation.step_name(),
            invocation.step_index,
            format!("Uploaded to s3://{}/{} ({})", published.bucket, published.key, published.url),
        );
        output.extras = serde_json::to_value(&published)?;
        Ok(output)
    }
}

async fn publish(
    services: &Services,
    invocation: &StepInvocation<'_>,
) -> Result<(crate::s3_upload::PublishResult, usize), EngineError> {
    let resolved = resolve_output_config(invocation.step, &services.config).ok_or_else(|| {
        EngineError::Validation(format!(
            "s3_upload step '{}' has no resolvable destination",
            invocation.step_name()
        ))
    })?;

    // Content comes from the most recent dependency, falling back to the
    // latest completed step.
    let source = invocation
        .dependency_indices
        .iter()
        .rev()
        .find_map(|dep| invocation.step_outputs.iter().find(|o| o.step_index == *dep))
        .or_else(|| invocation.step_outputs.last())
        .ok_or_else(|| {
            EngineError::Validation(format!(
                "s3_upload step '{}' has no prior step output to publish",
                invocation.step_name()
            ))
        })?;

    let publisher = OutputPublisher {
        writer: services.bucket_writer.as_ref(),
        config: &services.config,
    };
    let published = publisher
        .publish(
            &resolved,
            &invocation.job.tenant_id,
            &invocation.job.job_id,
            &invocation.step_name(),
            &source.output,
        )
        .await?;
    Ok((published, source.step_index))
}
