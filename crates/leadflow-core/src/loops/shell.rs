//! Shell tool loop: execute model-requested command batches in a
//! persistent workspace and submit the outputs back.

use std::time::Instant;
use tokio::sync::mpsc;

use super::{emit, emit_response_narration, LoopEvent, LoopTermination};
use crate::config::RuntimeConfig;
use crate::drivers::{derive_workspace_id, ShellBatchRequest, ShellRunner};
use crate::error::EngineError;
use leadflow_provider::{
    call_with_backoff, InputItem, ModelProvider, ProviderResponse, RequestInput, ResponseRequest,
    ShellCallOutput, ShellCommandOutput,
};

/// Result of a shell loop run.
#[derive(Debug)]
pub struct ShellLoopOutcome {
    pub response: ProviderResponse,
    pub iterations: u32,
    pub reason: LoopTermination,
}

/// Run the shell tool loop. Pass `events` for the streaming variant.
///
/// The workspace id is derived from (tenant, job, step) so retries land in
/// the same directory; the workspace is reset exactly once, on the first
/// batch of the loop. `tool_choice="required"` is relaxed to `"auto"` on
/// follow-up turns so the model can eventually emit final text.
pub async fn run_shell_loop(
    provider: &dyn ModelProvider,
    runner: &dyn ShellRunner,
    config: &RuntimeConfig,
    request: ResponseRequest,
    tenant_id: &str,
    job_id: &str,
    step_index: usize,
    events: Option<&mpsc::Sender<LoopEvent>>,
) -> Result<ShellLoopOutcome, EngineError> {
    tracing::info!(
        job_id,
        tenant_id,
        step_index,
        model = %request.model,
        max_iterations = config.shell_max_iterations,
        max_duration_seconds = config.shell_max_duration.as_secs(),
        "starting shell loop"
    );
    emit(
        events,
        LoopEvent::Log {
            level: "info",
            message: "Starting shell execution...".to_string(),
        },
    )
    .await;

    let workspace_id = derive_workspace_id(tenant_id, job_id, step_index);
    let mut reset_workspace_next = true;

    let started = Instant::now();
    let mut iterations = 0u32;
    let mut reason = LoopTermination::Completed;

    let mut response = call_with_backoff(provider, &request).await?;
    emit_response_narration(events, &response).await;
    let mut previous_response_id = (!response.id.is_empty()).then(|| response.id.clone());

    while iterations < config.shell_max_iterations {
        if started.elapsed() > config.shell_max_duration {
            tracing::warn!(job_id, iterations, "shell loop timed out");
            emit(
                events,
                LoopEvent::Error {
                    message: "Timeout reached".to_string(),
                },
            )
            .await;
            reason = LoopTermination::Timeout;
            break;
        }

        let shell_calls = response.shell_calls();
        if shell_calls.is_empty() {
            emit(
                events,
                LoopEvent::Complete {
                    text: response.text(),
                },
            )
            .await;
            break;
        }

        iterations += 1;
        tracing::info!(
            job_id,
            iteration = iterations,
            shell_calls_count = shell_calls.len(),
            "processing shell_call batch"
        );

        let mut tool_outputs: Vec<InputItem> = Vec::with_capacity(shell_calls.len());
        for (call_id, action) in shell_calls {
            let max_output_length = action
                .max_output_length
                .unwrap_or(config.shell_default_output_cap);

            if action.commands.is_empty() {
                tool_outputs.push(InputItem::ShellCallOutput(ShellCallOutput::new(
                    call_id,
                    max_output_length,
                    vec![ShellCommandOutput::error("shell_call had no commands")],
                )));
                continue;
            }

            for command in &action.commands {
                emit(
                    events,
                    LoopEvent::Log {
                        level: "info",
                        message: command.clone(),
                    },
                )
                .await;
            }

            let result = runner
                .run(ShellBatchRequest {
                    commands: action.commands.clone(),
                    timeout_ms: action.timeout_ms,
                    max_output_length: Some(max_output_length),
                    workspace_id: workspace_id.clone(),
                    reset_workspace: reset_workspace_next,
                })
                .await?;
            reset_workspace_next = false;

            for item in &result.output {
                if !item.stdout.trim().is_empty() {
                    emit(
                        events,
                        LoopEvent::Log {
                            level: "info",
                            message: item.stdout.chars().take(500).collect(),
                        },
                    )
                    .await;
                }
                if !item.stderr.trim().is_empty() {
                    emit(
                        events,
                        LoopEvent::Log {
                            level: "warning",
                            message: item.stderr.chars().take(500).collect(),
                        },
                    )
                    .await;
                }
            }

            tool_outputs.push(InputItem::ShellCallOutput(ShellCallOutput::new(
                call_id,
                result.max_output_length.unwrap_or(max_output_length),
                result.output,
            )));
        }

        let mut next_request = request.clone();
        next_request.input = RequestInput::Items(tool_outputs);
        next_request.previous_response_id = previous_response_id.clone();
        if next_request.tool_choice.as_deref() == Some("required") {
            next_request.tool_choice = Some("auto".to_string());
        }

        emit(
            events,
            LoopEvent::Log {
                level: "info",
                message: "Sending feedback to model...".to_string(),
            },
        )
        .await;
        response = call_with_backoff(provider, &next_request).await?;
        emit_response_narration(events, &response).await;
        if !response.id.is_empty() {
            previous_response_id = Some(response.id.clone());
        }
    }

    if iterations >= config.shell_max_iterations && reason == LoopTermination::Completed {
        reason = LoopTermination::Timeout;
    }

    tracing::info!(
        job_id,
        iterations,
        final_output_text_length = response.text().len(),
        "shell loop complete"
    );
    Ok(ShellLoopOutcome {
        response,
        iterations,
        reason,
    })
}
