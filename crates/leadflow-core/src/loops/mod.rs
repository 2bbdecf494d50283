//! Tool loops: cooperative call/act/submit cycles around the provider.

pub mod computer_use;
pub mod shell;

pub use computer_use::{run_computer_use_loop, ComputerUseOutcome};
pub use shell::{run_shell_loop, ShellLoopOutcome};

use leadflow_provider::SafetyCheck;
use tokio::sync::mpsc;

/// Why a tool loop stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopTermination {
    /// The model produced final output with no further tool calls.
    Completed,
    /// Iteration or duration bound reached.
    Timeout,
    /// The loop could not continue (e.g. screenshot capture failed).
    Error(String),
}

/// Events yielded by the streaming variants of the loops.
#[derive(Debug, Clone)]
pub enum LoopEvent {
    Log {
        level: &'static str,
        message: String,
    },
    ActionCall {
        action_type: String,
    },
    ActionExecuted {
        action_type: String,
        error: Option<String>,
    },
    Screenshot {
        url: String,
    },
    SafetyCheck {
        checks: Vec<SafetyCheck>,
    },
    Complete {
        text: String,
    },
    Error {
        message: String,
    },
}

pub(crate) async fn emit(events: Option<&mpsc::Sender<LoopEvent>>, event: LoopEvent) {
    if let Some(tx) = events {
        let _ = tx.send(event).await;
    }
}

/// Surface assistant text and reasoning summaries from a response as log
/// events (streaming mode only).
pub(crate) async fn emit_response_narration(
    events: Option<&mpsc::Sender<LoopEvent>>,
    response: &leadflow_provider::ProviderResponse,
) {
    if events.is_none() {
        return;
    }
    for item in &response.output {
        match item {
            leadflow_provider::OutputItem::Text { text } if !text.is_empty() => {
                emit(
                    events,
                    LoopEvent::Log {
                        level: "info",
                        message: text.clone(),
                    },
                )
                .await;
            }
            leadflow_provider::OutputItem::Reasoning { summary } => {
                for segment in summary {
                    if !segment.text.is_empty() {
                        emit(
                            events,
                            LoopEvent::Log {
                                level: "info",
                                message: segment.text.clone(),
                            },
                        )
                        .await;
                    }
                }
            }
            _ => {}
        }
    }
}
