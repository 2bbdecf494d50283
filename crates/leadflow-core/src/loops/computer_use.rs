//! Computer-use loop: execute actions, capture screenshots, feed them back
//! to the model until it stops requesting actions.

use regex::Regex;
use std::sync::OnceLock;
use std::time::Instant;
use tokio::sync::mpsc;

use super::{emit, emit_response_narration, LoopEvent, LoopTermination};
use crate::artifacts::ArtifactService;
use crate::config::RuntimeConfig;
use crate::drivers::{ComputerDriver, ComputerDriverFactory};
use crate::error::EngineError;
use leadflow_provider::{
    call_with_backoff, computer_use_display, has_tool, ComputerCallOutput, ComputerCallScreenshot,
    InputItem, InputMessage, ModelProvider, RequestInput, ResponseRequest, ResponseUsage,
    SafetyCheck,
};

/// Guidelines appended to instructions so the agent never stops to ask for
/// permission mid-run.
const COMPUTER_USE_GUIDELINES: &str = "\n\n[COMPUTER USE GUIDELINES]\n\
1. AUTONOMY: You are an autonomous agent. Do NOT ask for permission to proceed. Do NOT ask 'Should I...?'\n\
2. COMPLETION: Execute all necessary steps to achieve the goal fully. Only stop when the request is strictly satisfied.\n\
3. IF STUCK: Try alternative paths (e.g. scroll, search, different selectors) before giving up.\n\
4. UPLOADS: If the task involves uploading a screenshot, the system automatically uploads it. Use the provided URL.\n";

/// Result of a computer-use loop run.
#[derive(Debug, Clone)]
pub struct ComputerUseOutcome {
    pub final_text: String,
    pub screenshot_urls: Vec<String>,
    pub usage: ResponseUsage,
    pub iterations: u32,
    pub reason: LoopTermination,
}

fn first_url_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"https?://[^\s<>"')\]]+"#).expect("valid regex"))
}

/// First http(s) URL mentioned in the initial input, if any; the loop
/// navigates there before the first model call.
pub fn extract_initial_url(input_text: &str) -> Option<String> {
    first_url_regex()
        .find(input_text)
        .map(|m| m.as_str().trim_end_matches(['.', ',']).to_string())
}

/// Run the computer-use loop. Pass `events` for the streaming variant.
///
/// The driver is acquired fresh for this step and cleaned up best-effort
/// on every exit path. Action failures are reported to the model but do
/// not abort the loop; a failed screenshot does, since the cycle cannot
/// continue without one.
pub async fn run_computer_use_loop(
    provider: &dyn ModelProvider,
    driver_factory: &dyn ComputerDriverFactory,
    artifacts: &ArtifactService,
    config: &RuntimeConfig,
    mut request: ResponseRequest,
    tenant_id: &str,
    job_id: &str,
    events: Option<&mpsc::Sender<LoopEvent>>,
) -> Result<ComputerUseOutcome, EngineError> {
    let tools = request.tools.clone().unwrap_or_default();
    if !has_tool(&tools, "computer_use_preview") {
        return Err(EngineError::Validation(
            "computer_use_preview tool not found in tools list".to_string(),
        ));
    }
    let (display_width, display_height) = computer_use_display(&tools);

    if !request
        .instructions
        .to_lowercase()
        .contains("do not ask for permission")
    {
        request.instructions.push_str(COMPUTER_USE_GUIDELINES);
    }
    request.truncation = Some("auto".to_string());

    tracing::info!(
        job_id,
        display_width,
        display_height,
        max_iterations = config.cua_max_iterations,
        max_duration_seconds = config.cua_max_duration.as_secs(),
        "starting computer-use loop"
    );

    let mut driver = driver_factory.acquire().await?;
    let outcome = drive_loop(
        provider,
        driver.as_mut(),
        artifacts,
        config,
        request,
        display_width,
        display_height,
        tenant_id,
        job_id,
        events,
    )
    .await;
    driver.cleanup().await;

    if let Ok(outcome) = &outcome {
        tracing::info!(
            job_id,
            iterations = outcome.iterations,
            screenshots_captured = outcome.screenshot_urls.len(),
            final_report_length = outcome.final_text.len(),
            "computer-use loop complete"
        );
    }
    outcome
}

#[allow(clippy::too_many_arguments)]
async fn drive_loop(
    provider: &dyn ModelProvider,
    driver: &mut dyn ComputerDriver,
    artifacts: &ArtifactService,
    config: &RuntimeConfig,
    request: ResponseRequest,
    display_width: u32,
    display_height: u32,
    tenant_id: &str,
    job_id: &str,
    events: Option<&mpsc::Sender<LoopEvent>>,
) -> Result<ComputerUseOutcome, EngineError> {
    driver.initialize(display_width, display_height).await?;

    // Prime the browser so the first action does not race startup.
    if let Err(e) = driver.navigate("about:blank").await {
        tracing::warn!(job_id, error = %e, "failed to navigate to initial page");
    }
    // A URL mentioned in the step instructions or input is the starting
    // point; navigate there before the first model turn.
    let initial_url = extract_initial_url(&request.instructions).or_else(|| match &request.input {
        RequestInput::Text(input_text) => extract_initial_url(input_text),
        _ => None,
    });
    if let Some(url) = initial_url {
        emit(
            events,
            LoopEvent::Log {
                level: "info",
                message: format!("Navigating to {url}"),
            },
        )
        .await;
        if let Err(e) = driver.navigate(&url).await {
            tracing::warn!(job_id, url, error = %e, "initial navigation failed");
        }
    }

    let started = Instant::now();
    let mut iterations = 0u32;
    let mut screenshot_urls: Vec<String> = Vec::new();
    let mut acknowledged: Vec<SafetyCheck> = Vec::new();
    let mut reason = LoopTermination::Completed;

    let mut response = call_with_backoff(provider, &request).await?;
    emit_response_narration(events, &response).await;
    let mut previous_response_id = (!response.id.is_empty()).then(|| response.id.clone());

    while iterations < config.cua_max_iterations {
        if started.elapsed() > config.cua_max_duration {
            tracing::warn!(
                job_id,
                elapsed_seconds = started.elapsed().as_secs(),
                "computer-use loop timeout"
            );
            reason = LoopTermination::Timeout;
            break;
        }
        iterations += 1;

        let mut calls = response.computer_calls();
        if calls.is_empty() {
            tracing::info!(job_id, "no more computer calls, loop complete");
            break;
        }
        // Typically one call per response; process the first.
        let call = calls.remove(0);
        let call_id = call.call_id;
        let Some(action) = call.action else {
            tracing::warn!(job_id, "computer call has no action, stopping loop");
            break;
        };

        if !call.pending_safety_checks.is_empty() {
            tracing::warn!(
                job_id,
                safety_checks = call.pending_safety_checks.len(),
                "safety checks triggered, auto-acknowledging"
            );
            acknowledged = call.pending_safety_checks;
            emit(
                events,
                LoopEvent::SafetyCheck {
                    checks: acknowledged.clone(),
                },
            )
            .await;
        }

        emit(
            events,
            LoopEvent::ActionCall {
                action_type: action.action_type.clone(),
            },
        )
        .await;
        tracing::info!(job_id, action_type = %action.action_type, "executing action");
        let execution_error = match driver.execute_action(&action).await {
            Ok(()) => None,
            Err(e) => {
                // Report to the model and continue with a fresh screenshot.
                tracing::error!(job_id, error = %e, "error executing action");
                Some(e.to_string())
            }
        };
        emit(
            events,
            LoopEvent::ActionExecuted {
                action_type: action.action_type.clone(),
                error: execution_error.clone(),
            },
        )
        .await;

        // Give the page a moment to settle before capturing.
        tokio::time::sleep(std::time::Duration::from_secs(1)).await;

        let screenshot_b64 = match driver.screenshot().await {
            Ok(b64) => b64,
            Err(e) => {
                tracing::error!(job_id, error = %e, "screenshot capture failed, cannot continue loop");
                reason = LoopTermination::Error(format!("screenshot capture failed: {e}"));
                break;
            }
        };
        let current_url = driver.current_url().await;

        let uploaded_url = match artifacts
            .store_base64_image(tenant_id, job_id, &screenshot_b64, "image/png", None)
            .await
        {
            Ok(url) => {
                screenshot_urls.push(url.clone());
                emit(events, LoopEvent::Screenshot { url: url.clone() }).await;
                tracing::info!(job_id, screenshot_url = %url, "screenshot captured and uploaded");
                Some(url)
            }
            Err(e) => {
                tracing::warn!(job_id, error = %e, "failed to upload screenshot");
                None
            }
        };

        let mut output_item = ComputerCallOutput::new(
            call_id,
            ComputerCallScreenshot::new(format!("data:image/png;base64,{screenshot_b64}")),
        );
        output_item.acknowledged_safety_checks = std::mem::take(&mut acknowledged);
        let mut next_items = vec![InputItem::ComputerCallOutput(output_item)];

        let mut notes = Vec::new();
        if let Some(error) = &execution_error {
            notes.push(format!("Computer action failed: {error}"));
        }
        if let Some(url) = &current_url {
            notes.push(format!("Current URL: {url}"));
        }
        if let Some(url) = &uploaded_url {
            notes.push(format!("Screenshot uploaded to: {url}"));
        }
        if !notes.is_empty() {
            next_items.push(InputItem::Message(InputMessage::system_note(notes.join("\n"))));
        }

        let mut next_request = request.clone();
        next_request.input = RequestInput::Items(next_items);
        next_request.previous_response_id = previous_response_id.clone();
        next_request.truncation = Some("auto".to_string());

        tracing::info!(job_id, iteration = iterations, "sending screenshot back to model");
        response = call_with_backoff(provider, &next_request).await?;
        emit_response_narration(events, &response).await;
        if !response.id.is_empty() {
            previous_response_id = Some(response.id.clone());
        }
    }

    if iterations >= config.cua_max_iterations && reason == LoopTermination::Completed {
        reason = LoopTermination::Timeout;
    }

    let final_text = response.text();
    match &reason {
        LoopTermination::Completed => {
            emit(
                events,
                LoopEvent::Complete {
                    text: final_text.clone(),
                },
            )
            .await;
        }
        LoopTermination::Timeout => {
            emit(
                events,
                LoopEvent::Error {
                    message: "Timeout reached".to_string(),
                },
            )
            .await;
        }
        LoopTermination::Error(message) => {
            emit(
                events,
                LoopEvent::Error {
                    message: message.clone(),
                },
            )
            .await;
        }
    }

    Ok(ComputerUseOutcome {
        final_text,
        screenshot_urls,
        usage: response.usage.clone().unwrap_or_default(),
        iterations,
        reason,
    })
}
