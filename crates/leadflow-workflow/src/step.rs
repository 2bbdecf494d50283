//! Workflow definitions and step configuration.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Kind of work a step performs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    #[default]
    AiGeneration,
    Webhook,
    WorkflowHandoff,
    Shell,
    S3Upload,
}

impl StepKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::AiGeneration => "ai_generation",
            StepKind::Webhook => "webhook",
            StepKind::WorkflowHandoff => "workflow_handoff",
            StepKind::Shell => "shell",
            StepKind::S3Upload => "s3_upload",
        }
    }
}

/// How strongly the model is steered toward tool use.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ToolChoice {
    #[default]
    Auto,
    Required,
    None,
}

impl ToolChoice {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolChoice::Auto => "auto",
            ToolChoice::Required => "required",
            ToolChoice::None => "none",
        }
    }
}

/// How a webhook step builds its request body.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum WebhookBodyMode {
    #[default]
    Auto,
    Custom,
}

/// Flags selecting which sections appear in an auto webhook payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookDataSelection {
    pub include_job_info: bool,
    pub include_submission: bool,
    /// Step indices filtered out of `step_outputs`. Indices at or beyond
    /// the current step are excluded regardless, so future indices here
    /// are a no-op.
    pub exclude_step_indices: Vec<usize>,
}

impl Default for WebhookDataSelection {
    fn default() -> Self {
        Self {
            include_job_info: true,
            include_submission: true,
            exclude_step_indices: Vec::new(),
        }
    }
}

/// Webhook step configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    pub headers: HashMap<String, String>,
    pub query_params: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body_mode: Option<WebhookBodyMode>,
    /// `{{dotted.path}}` template used in custom body mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    pub data_selection: WebhookDataSelection,
    /// Explicit adapter selection ("generic" | "slack"); the URL hostname
    /// is consulted when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_type: Option<String>,
}

/// What a handoff step passes as the destination workflow's primary input.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum HandoffPayloadMode {
    #[default]
    PreviousStepOutput,
    SubmissionOnly,
    FullContext,
    DeliverableOutput,
}

/// Workflow-handoff step configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HandoffConfig {
    pub workflow_id: String,
    pub payload_mode: HandoffPayloadMode,
    /// Field name the primary value lands in within `submission_data`.
    pub input_field: String,
    pub include_submission_data: bool,
    pub include_context: bool,
    pub bypass_required_inputs: bool,
}

impl Default for HandoffConfig {
    fn default() -> Self {
        Self {
            workflow_id: String::new(),
            payload_mode: HandoffPayloadMode::PreviousStepOutput,
            input_field: "input".to_string(),
            include_submission_data: true,
            include_context: false,
            bypass_required_inputs: true,
        }
    }
}

/// Source of the content an S3-upload step publishes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum OutputSourceType {
    #[default]
    TextContent,
    File,
}

/// Explicit output configuration for an S3-upload step.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Only "s3" enables the upload; anything else disables it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_provider: Option<String>,
    pub source_type: OutputSourceType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_path: Option<String>,
    /// Destination key template; falls back to a sanitized default.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

/// One step of a workflow definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub step_name: String,
    /// Author-assigned ordering; not necessarily dense or unique.
    #[serde(default)]
    pub step_order: i64,
    #[serde(default, rename = "step_type")]
    pub kind: StepKind,
    /// Explicit dependencies. Entries may be `step_order` values, array
    /// indices, or stringly-typed integers; the resolver normalizes them.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub depends_on: Option<Vec<serde_json::Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default)]
    pub instructions: String,
    /// Tool declarations in wire form: either a string type
    /// (`"web_search"`) or an object (`{"type": "...", ...}`).
    #[serde(default)]
    pub tools: Vec<serde_json::Value>,
    #[serde(default)]
    pub tool_choice: ToolChoice,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_tier: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_verbosity: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
    /// Structured output request (`text.format` on the wire).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_format: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook: Option<WebhookConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handoff: Option<HandoffConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_config: Option<OutputConfig>,
    /// Step failure fails the job unless set.
    #[serde(default)]
    pub continue_on_error: bool,
    /// Marks this step's output as part of the deliverable projection.
    #[serde(default)]
    pub deliverable: bool,
}

impl WorkflowStep {
    pub fn new(name: impl Into<String>, order: i64, kind: StepKind) -> Self {
        Self {
            step_name: name.into(),
            step_order: order,
            kind,
            depends_on: None,
            model: None,
            instructions: String::new(),
            tools: Vec::new(),
            tool_choice: ToolChoice::Auto,
            reasoning_effort: None,
            service_tier: None,
            text_verbosity: None,
            max_output_tokens: None,
            output_format: None,
            webhook: None,
            handoff: None,
            output_config: None,
            continue_on_error: false,
            deliverable: false,
        }
    }

    /// Whether the tools list declares the given wire type.
    pub fn has_tool(&self, tool_type: &str) -> bool {
        self.tools.iter().any(|t| match t {
            serde_json::Value::String(s) => s == tool_type,
            serde_json::Value::Object(map) => {
                map.get("type").and_then(|v| v.as_str()) == Some(tool_type)
            }
            _ => false,
        })
    }
}

/// How the finished deliverable is pushed out.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMethod {
    #[default]
    None,
    Webhook,
    Sms,
}

/// Delivery configuration attached to a workflow.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    pub method: DeliveryMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
    pub webhook_headers: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sms_to: Option<String>,
    /// Instructions for the model-rendered SMS body.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sms_instructions: Option<String>,
}

/// A workflow definition (lead magnet).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub workflow_id: String,
    pub tenant_id: String,
    pub workflow_name: String,
    /// Steps as authored; execution order is resolved from `step_order`
    /// and `depends_on`, not array position.
    #[serde(default)]
    pub steps: Vec<WorkflowStep>,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template_id: Option<String>,
    #[serde(default)]
    pub template_version: u32,
    /// Legacy-format flags. A workflow with no steps falls back to the
    /// research/HTML pipeline driven by these.
    #[serde(default = "default_true")]
    pub research_enabled: bool,
    #[serde(default = "default_true")]
    pub html_enabled: bool,
    #[serde(default)]
    pub ai_instructions: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rewrite_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<chrono::DateTime<chrono::Utc>>,
}

fn default_true() -> bool {
    true
}

impl Workflow {
    pub fn new(
        workflow_id: impl Into<String>,
        tenant_id: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            tenant_id: tenant_id.into(),
            workflow_name: name.into(),
            steps: Vec::new(),
            delivery: DeliveryConfig::default(),
            template_id: None,
            template_version: 0,
            research_enabled: true,
            html_enabled: true,
            ai_instructions: String::new(),
            ai_model: None,
            rewrite_model: None,
            deleted_at: None,
        }
    }

    /// Steps sorted by `step_order` (stable for equal orders).
    pub fn sorted_steps(&self) -> Vec<(usize, &WorkflowStep)> {
        let mut indexed: Vec<(usize, &WorkflowStep)> = self.steps.iter().enumerate().collect();
        indexed.sort_by_key(|(_, s)| s.step_order);
        indexed
    }

    /// Model of the last step by `step_order`, used for HTML generation.
    pub fn last_step_model(&self, default: &str) -> String {
        self.sorted_steps()
            .last()
            .and_then(|(_, s)| s.model.clone())
            .unwrap_or_else(|| default.to_string())
    }

    /// Whether this workflow uses the legacy (step-less) format.
    pub fn is_legacy(&self) -> bool {
        self.steps.is_empty()
    }
}
