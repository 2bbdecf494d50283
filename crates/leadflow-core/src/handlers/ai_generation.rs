//! AI-generation step handler.

use async_trait::async_trait;
use serde_json::json;

use super::{record_step_failure, Services, StepHandler, StepInvocation};
use crate::artifacts::JobImageSink;
use crate::context;
use crate::error::EngineError;
use crate::loops::{run_computer_use_loop, run_shell_loop};
use crate::redact;
use crate::s3_upload::{self, OutputPublisher};
use leadflow_provider::{
    call_with_backoff, ensure_tool_choice_safety, has_tool, images, process_response,
    recover_image_download_error, RequestBuilder, ResponseRequest,
};
use leadflow_workflow::{ExecutionStep, StepKind, StepOutput, Usage};

const DEFAULT_MODEL: &str = "gpt-5";

pub struct AiGenerationHandler;

struct GenerationResult {
    content: String,
    image_urls: Vec<String>,
    usage: Usage,
}

#[async_trait]
impl StepHandler for AiGenerationHandler {
    fn kind(&self) -> StepKind {
        StepKind::AiGeneration
    }

    async fn execute(
        &self,
        services: &Services,
        invocation: StepInvocation<'_>,
    ) -> Result<StepOutput, EngineError> {
        let started = chrono::Utc::now();
        let timer = std::time::Instant::now();

        let (request, previous_image_urls) = build_request(services, &invocation).await;
        let request_details = redacted_request_details(&invocation, &request, &previous_image_urls);

        let result = run_generation(services, &invocation, request).await;
        let duration_ms = timer.elapsed().as_millis() as u64;

        let generation = match result {
            Ok(generation) => generation,
            Err(error) => {
                record_step_failure(services, &invocation, "ai_generation", started, duration_ms, &error)
                    .await;
                return Err(error);
            }
        };

        let job = invocation.job;
        let model = invocation.step.model.as_deref().unwrap_or(DEFAULT_MODEL);

        // Publish to the external bucket when the step declares an output
        // destination.
        if let Some(resolved) = s3_upload::resolve_output_config(invocation.step, &services.config)
        {
            let publisher = OutputPublisher {
                writer: services.bucket_writer.as_ref(),
                config: &services.config,
            };
            match publisher
                .publish(
                    &resolved,
                    &job.tenant_id,
                    &job.job_id,
                    &invocation.step_name(),
                    &generation.content,
                )
                .await
            {
                Ok(published) => {
                    tracing::info!(
                        job_id = %job.job_id,
                        bucket = %published.bucket,
                        key = %published.key,
                        "published step output to external bucket"
                    );
                }
                Err(e) => {
                    tracing::warn!(job_id = %job.job_id, error = %e, "external publish failed");
                }
            }
        }

        let artifact_id = services
            .artifacts
            .store_artifact(
                &job.tenant_id,
                &job.job_id,
                "step_output",
                &generation.content,
                &format!("step_{}_output.md", invocation.step_index + 1),
                true,
            )
            .await?;

        let mut image_artifact_ids = Vec::with_capacity(generation.image_urls.len());
        for url in &generation.image_urls {
            match services
                .artifacts
                .store_image_artifact(&job.tenant_id, &job.job_id, url, None)
                .await
            {
                Ok(id) => image_artifact_ids.push(id),
                Err(e) => {
                    tracing::warn!(job_id = %job.job_id, url_preview = %url.chars().take(80).collect::<String>(), error = %e, "failed to index image artifact");
                }
            }
        }

        services
            .usage
            .record(&job.tenant_id, &job.job_id, model, &generation.usage, "workflow_step")
            .await;

        let mut record = ExecutionStep::new(
            invocation.step_name(),
            invocation.step_order(),
            "ai_generation",
        );
        record.input = request_details;
        record.output = serde_json::Value::String(generation.content.clone());
        record.image_urls = generation.image_urls.clone();
        record.usage = Some(generation.usage.clone());
        record.timestamp = started;
        record.duration_ms = duration_ms;
        record.artifact_id = Some(artifact_id.clone());
        services
            .trace
            .record(&job.job_id, record, invocation.trace_mode)
            .await?;

        let mut output = StepOutput::new(
            invocation.step_name(),
            invocation.step_index,
            generation.content,
        );
        output.artifact_id = Some(artifact_id);
        output.image_urls = generation.image_urls;
        output.image_artifact_ids = image_artifact_ids;
        Ok(output)
    }
}

/// Assemble the provider request for this step: dependency context as
/// input, prior images attached when usable, all builder invariants
/// applied, and the tool-choice final clamp.
async fn build_request(
    services: &Services,
    invocation: &StepInvocation<'_>,
) -> (ResponseRequest, Vec<String>) {
    let step = invocation.step;
    let model = step.model.as_deref().unwrap_or(DEFAULT_MODEL);

    let mut instructions = step.instructions.clone();
    if let Some(resolved) = s3_upload::resolve_output_config(step, &services.config) {
        instructions = s3_upload::inject_upload_context(&instructions, &resolved);
    }

    // `required` with no tools gets a default research tool rather than a
    // request the API will reject.
    let mut tools = step.tools.clone();
    let mut tool_choice = step.tool_choice.as_str().to_string();
    if tool_choice == "required" && tools.is_empty() {
        tracing::warn!(
            step_name = %step.step_name,
            "tool_choice 'required' with no tools; adding default web_search and downgrading to auto"
        );
        tools.push(json!({ "type": "web_search" }));
        tool_choice = "auto".to_string();
    }

    let raw_urls = context::previous_image_urls(
        invocation.step_outputs,
        Some(invocation.dependency_indices),
    );
    let (valid_urls, _) = images::validate_and_filter_image_urls(&raw_urls);

    let builder = RequestBuilder::new(model, instructions, invocation.previous_context)
        .tools(tools)
        .tool_choice(tool_choice)
        .reasoning_effort(step.reasoning_effort.clone())
        .service_tier(step.service_tier.clone())
        .text_verbosity(step.text_verbosity.clone())
        .max_output_tokens(step.max_output_tokens)
        .output_format(step.output_format.clone());

    let mut request = builder
        .build_multimodal(&services.image_http, &valid_urls)
        .await;
    ensure_tool_choice_safety(&mut request);
    (request, valid_urls)
}

async fn run_generation(
    services: &Services,
    invocation: &StepInvocation<'_>,
    request: ResponseRequest,
) -> Result<GenerationResult, EngineError> {
    let job = invocation.job;
    let sink = JobImageSink {
        artifacts: services.artifacts.clone(),
        tenant_id: job.tenant_id.clone(),
        job_id: job.job_id.clone(),
    };
    let tools = request.tools.clone().unwrap_or_default();

    if has_tool(&tools, "computer_use_preview") {
        let outcome = run_computer_use_loop(
            services.provider.as_ref(),
            services.driver_factory.as_ref(),
            &services.artifacts,
            &services.config,
            request,
            &job.tenant_id,
            &job.job_id,
            None,
        )
        .await?;
        return Ok(GenerationResult {
            content: outcome.final_text,
            image_urls: outcome.screenshot_urls,
            usage: Usage {
                input_tokens: outcome.usage.input_tokens,
                output_tokens: outcome.usage.output_tokens,
                total_tokens: outcome.usage.total_tokens,
            },
        });
    }

    if has_tool(&tools, "shell") {
        let outcome = run_shell_loop(
            services.provider.as_ref(),
            services.shell_runner.as_ref(),
            &services.config,
            request,
            &job.tenant_id,
            &job.job_id,
            invocation.step_index,
            None,
        )
        .await?;
        let processed = process_response(&outcome.response, &sink).await;
        return Ok(GenerationResult {
            content: processed.content,
            image_urls: processed.image_urls,
            usage: Usage {
                input_tokens: processed.usage.input_tokens,
                output_tokens: processed.usage.output_tokens,
                total_tokens: processed.usage.total_tokens,
            },
        });
    }

    let response = match call_with_backoff(services.provider.as_ref(), &request).await {
        Ok(response) => response,
        Err(error) if error.is_image_download_error() => {
            recover_image_download_error(
                services.provider.as_ref(),
                &services.image_http,
                error,
                &request,
            )
            .await?
        }
        Err(error) => return Err(error.into()),
    };

    let processed = process_response(&response, &sink).await;
    Ok(GenerationResult {
        content: processed.content,
        image_urls: processed.image_urls,
        usage: Usage {
            input_tokens: processed.usage.input_tokens,
            output_tokens: processed.usage.output_tokens,
            total_tokens: processed.usage.total_tokens,
        },
    })
}

fn redacted_request_details(
    invocation: &StepInvocation<'_>,
    request: &ResponseRequest,
    previous_image_urls: &[String],
) -> serde_json::Value {
    let details = json!({
        "model": request.model,
        "instructions": request.instructions,
        "input": invocation.previous_context,
        "tools": request.tools.clone().unwrap_or_default(),
        "tool_choice": request.tool_choice,
        "previous_image_urls": previous_image_urls,
    });
    redact::redacted(&details)
}
