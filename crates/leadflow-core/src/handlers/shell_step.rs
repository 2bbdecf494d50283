//! Shell step handler.
//!
//! Steps declaring a model run the shell tool loop; pure-shell steps (no
//! model) run their instruction lines directly as one batch.

use async_trait::async_trait;
use serde_json::json;

use super::{record_step_failure, Services, StepHandler, StepInvocation};
use crate::artifacts::JobImageSink;
use crate::drivers::{derive_workspace_id, ShellBatchRequest};
use crate::error::EngineError;
use crate::loops::run_shell_loop;
use crate::redact;
use leadflow_provider::{ensure_tool_choice_safety, process_response, RequestBuilder};
use leadflow_workflow::{ExecutionStep, StepKind, StepOutput, Usage};

pub struct ShellStepHandler;

#[async_trait]
impl StepHandler for ShellStepHandler {
    fn kind(&self) -> StepKind {
        StepKind::Shell
    }

    async fn execute(
        &self,
        services: &Services,
        invocation: StepInvocation<'_>,
    ) -> Result<StepOutput, EngineError> {
        let started = chrono::Utc::now();
        let timer = std::time::Instant::now();

        let result = if invocation.step.model.is_some() {
            run_model_driven(services, &invocation).await
        } else {
            run_direct_batch(services, &invocation).await
        };
        let duration_ms = timer.elapsed().as_millis() as u64;

        let (content, usage, input_details) = match result {
            Ok(parts) => parts,
            Err(error) => {
                record_step_failure(services, &invocation, "shell", started, duration_ms, &error)
                    .await;
                return Err(error);
            }
        };

        let job = invocation.job;
        let artifact_id = services
            .artifacts
            .store_artifact(
                &job.tenant_id,
                &job.job_id,
                "step_output",
                &content,
                &format!("step_{}_output.md", invocation.step_index + 1),
                true,
            )
            .await?;

        if let Some(usage) = &usage {
            let model = invocation.step.model.as_deref().unwrap_or("gpt-5");
            services
                .usage
                .record(&job.tenant_id, &job.job_id, model, usage, "workflow_step")
                .await;
        }

        let mut record =
            ExecutionStep::new(invocation.step_name(), invocation.step_order(), "shell");
        record.input = input_details;
        record.output = serde_json::Value::String(content.clone());
        record.usage = usage;
        record.timestamp = started;
        record.duration_ms = duration_ms;
        record.artifact_id = Some(artifact_id.clone());
        services
            .trace
            .record(&job.job_id, record, invocation.trace_mode)
            .await?;

        let mut output = StepOutput::new(invocation.step_name(), invocation.step_index, content);
        output.artifact_id = Some(artifact_id);
        Ok(output)
    }
}

async fn run_model_driven(
    services: &Services,
    invocation: &StepInvocation<'_>,
) -> Result<(String, Option<Usage>, serde_json::Value), EngineError> {
    let step = invocation.step;
    let model = step.model.as_deref().unwrap_or("gpt-5");

    let mut tools = step.tools.clone();
    if !step.has_tool("shell") {
        tools.push(json!({ "type": "shell" }));
    }

    let mut request = RequestBuilder::new(model, step.instructions.clone(), invocation.previous_context)
        .tools(tools)
        .tool_choice(step.tool_choice.as_str())
        .reasoning_effort(step.reasoning_effort.clone())
        .text_verbosity(step.text_verbosity.clone())
        .max_output_tokens(step.max_output_tokens)
        .build();
    ensure_tool_choice_safety(&mut request);

    let input_details = redact::redacted(&json!({
        "model": request.model,
        "instructions": request.instructions,
        "input": invocation.previous_context,
        "tools": request.tools.clone().unwrap_or_default(),
        "tool_choice": request.tool_choice,
    }));

    let outcome = run_shell_loop(
        services.provider.as_ref(),
        services.shell_runner.as_ref(),
        &services.config,
        request,
        &invocation.job.tenant_id,
        &invocation.job.job_id,
        invocation.step_index,
        None,
    )
    .await?;

    let sink = JobImageSink {
        artifacts: services.artifacts.clone(),
        tenant_id: invocation.job.tenant_id.clone(),
        job_id: invocation.job.job_id.clone(),
    };
    let processed = process_response(&outcome.response, &sink).await;
    let usage = Usage {
        input_tokens: processed.usage.input_tokens,
        output_tokens: processed.usage.output_tokens,
        total_tokens: processed.usage.total_tokens,
    };
    Ok((processed.content, Some(usage), input_details))
}

/// Run the instruction lines as one direct batch, no model in the loop.
async fn run_direct_batch(
    services: &Services,
    invocation: &StepInvocation<'_>,
) -> Result<(String, Option<Usage>, serde_json::Value), EngineError> {
    let commands: Vec<String> = invocation
        .step
        .instructions
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(String::from)
        .collect();
    if commands.is_empty() {
        return Err(EngineError::Validation(format!(
            "shell step '{}' has no commands",
            invocation.step_name()
        )));
    }

    let workspace_id = derive_workspace_id(
        &invocation.job.tenant_id,
        &invocation.job.job_id,
        invocation.step_index,
    );
    let result = services
        .shell_runner
        .run(ShellBatchRequest {
            commands: commands.clone(),
            timeout_ms: Some(services.config.shell_batch_timeout.as_millis() as u64),
            max_output_length: Some(services.config.shell_default_output_cap),
            workspace_id: workspace_id.clone(),
            reset_workspace: true,
        })
        .await?;

    let mut sections = Vec::new();
    for item in &result.output {
        if !item.stdout.is_empty() {
            sections.push(item.stdout.clone());
        }
        if !item.stderr.is_empty() {
            sections.push(format!("[stderr] {}", item.stderr));
        }
    }

    let input_details = redact::redacted(&json!({
        "commands": commands,
        "workspace_id": workspace_id,
    }));
    Ok((sections.join("\n"), None, input_details))
}
