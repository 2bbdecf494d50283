//! Execution trace records and runtime step outputs.

use serde::{Deserialize, Serialize};

/// Token usage reported for one model call.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

impl Usage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
        }
    }
}

/// One record of the per-job execution trace.
///
/// Append-only within a run; the trace is rewritten atomically as a whole
/// when persisted. `input` holds the redacted request details.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionStep {
    pub step_name: String,
    pub step_order: i64,
    pub step_type: String,
    #[serde(default)]
    pub input: serde_json::Value,
    #[serde(default)]
    pub output: serde_json::Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_urls: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_id: Option<String>,
    #[serde(default = "default_success")]
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn default_success() -> bool {
    true
}

impl ExecutionStep {
    pub fn new(name: impl Into<String>, step_order: i64, step_type: impl Into<String>) -> Self {
        Self {
            step_name: name.into(),
            step_order,
            step_type: step_type.into(),
            input: serde_json::Value::Null,
            output: serde_json::Value::Null,
            image_urls: Vec::new(),
            usage: None,
            timestamp: chrono::Utc::now(),
            duration_ms: 0,
            artifact_id: None,
            success: true,
            error: None,
        }
    }

    /// Output text when the output field carries plain text.
    pub fn output_text(&self) -> Option<&str> {
        self.output.as_str()
    }
}

/// Runtime output of a completed step, fed into later steps' context.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepOutput {
    pub step_name: String,
    pub step_index: usize,
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_artifact_ids: Vec<String>,
    /// Handler-specific extras (webhook result, handoff result, ...).
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub extras: serde_json::Value,
}

impl StepOutput {
    pub fn new(step_name: impl Into<String>, step_index: usize, output: impl Into<String>) -> Self {
        Self {
            step_name: step_name.into(),
            step_index,
            output: output.into(),
            artifact_id: None,
            image_urls: Vec::new(),
            image_artifact_ids: Vec::new(),
            extras: serde_json::Value::Null,
        }
    }
}

/// Reconstruct runtime step outputs from a persisted trace.
///
/// Used by single-step rerun to rebuild the dependency context of the
/// target step without re-running anything. Only workflow step records
/// (not the final-output entry) are mapped, keyed by `step_order - 1`.
pub fn step_outputs_from_trace(trace: &[ExecutionStep]) -> Vec<StepOutput> {
    let mut outputs = Vec::new();
    for record in trace {
        if record.step_type == "final_output" || record.step_type == "html_generation" {
            continue;
        }
        if record.step_order < 1 {
            continue;
        }
        let output_text = match &record.output {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Null => String::new(),
            other => other.to_string(),
        };
        outputs.push(StepOutput {
            step_name: record.step_name.clone(),
            step_index: (record.step_order - 1) as usize,
            output: output_text,
            artifact_id: record.artifact_id.clone(),
            image_urls: record.image_urls.clone(),
            image_artifact_ids: Vec::new(),
            extras: serde_json::Value::Null,
        });
    }
    outputs.sort_by_key(|o| o.step_index);
    outputs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_outputs_skip_final_entries() {
        let mut trace = vec![
            ExecutionStep::new("Research", 1, "ai_generation"),
            ExecutionStep::new("Summarize", 2, "ai_generation"),
            ExecutionStep::new("Final Output", 3, "final_output"),
        ];
        trace[0].output = serde_json::Value::String("alpha".into());
        trace[1].output = serde_json::Value::String("beta".into());

        let outputs = step_outputs_from_trace(&trace);
        assert_eq!(outputs.len(), 2);
        assert_eq!(outputs[0].step_index, 0);
        assert_eq!(outputs[0].output, "alpha");
        assert_eq!(outputs[1].step_index, 1);
    }

    #[test]
    fn structured_output_is_stringified() {
        let mut step = ExecutionStep::new("Webhook", 1, "webhook");
        step.output = serde_json::json!({"response_status": 200});
        let outputs = step_outputs_from_trace(&[step]);
        assert!(outputs[0].output.contains("response_status"));
    }
}
