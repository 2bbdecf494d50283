//! Responses-API request types and the request builder.
//!
//! The builder enforces the invariants the API demands: the autonomy
//! preamble, the deep-research tool requirement, computer-use tool
//! compatibility, container injection, tool-choice safety, and the
//! GPT-5-family reasoning/service-tier defaults.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::images;
use crate::response::SafetyCheck;
use crate::tools;

/// Guardrail prepended to instructions: workflows run end-to-end with no
/// user interaction between steps, so the model must never pause for
/// confirmation.
pub const AUTONOMY_PREAMBLE: &str = "IMPORTANT: This workflow runs end-to-end with NO user interaction between steps. \
Do NOT ask the user for confirmation or additional input. \
Do NOT pause waiting for responses. \
If information is missing or ambiguous, make reasonable assumptions and proceed.\n\n";

/// Phrases whose presence means the instructions already address autonomy.
const AUTONOMY_MARKERS: &[&str] = &[
    "ask for confirmation",
    "no user interaction",
    "no user input",
    "no human-in-the-loop",
];

/// One segment of a message item's content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ContentItem {
    #[serde(rename = "input_text")]
    InputText { text: String },
    #[serde(rename = "input_image")]
    InputImage { image_url: String },
}

/// A role-tagged message in list-form input.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InputMessage {
    #[serde(rename = "type", default = "message_type", skip_serializing_if = "Option::is_none")]
    pub item_type: Option<String>,
    pub role: String,
    pub content: Vec<ContentItem>,
}

fn message_type() -> Option<String> {
    None
}

impl InputMessage {
    pub fn user(content: Vec<ContentItem>) -> Self {
        Self {
            item_type: None,
            role: "user".to_string(),
            content,
        }
    }

    pub fn system_note(text: impl Into<String>) -> Self {
        Self {
            item_type: Some("message".to_string()),
            role: "system".to_string(),
            content: vec![ContentItem::InputText { text: text.into() }],
        }
    }
}

/// Screenshot payload submitted back from the computer-use loop.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ComputerCallScreenshot {
    #[serde(rename = "type")]
    pub output_type: String,
    pub image_url: String,
}

impl ComputerCallScreenshot {
    pub fn new(data_url: impl Into<String>) -> Self {
        Self {
            output_type: "input_image".to_string(),
            image_url: data_url.into(),
        }
    }
}

/// `computer_call_output` item submitted after executing an action.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ComputerCallOutput {
    #[serde(rename = "type")]
    pub item_type: String,
    pub call_id: String,
    pub output: ComputerCallScreenshot,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub acknowledged_safety_checks: Vec<SafetyCheck>,
}

impl ComputerCallOutput {
    pub fn new(call_id: impl Into<String>, screenshot: ComputerCallScreenshot) -> Self {
        Self {
            item_type: "computer_call_output".to_string(),
            call_id: call_id.into(),
            output: screenshot,
            acknowledged_safety_checks: Vec::new(),
        }
    }
}

/// Output of one shell command within a batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ShellCommandOutput {
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Value>,
}

impl ShellCommandOutput {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: String::new(),
            outcome: Some(json!({ "type": "error", "message": message.into() })),
        }
    }
}

/// `shell_call_output` item submitted after executing a batch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ShellCallOutput {
    #[serde(rename = "type")]
    pub item_type: String,
    pub call_id: String,
    pub max_output_length: usize,
    pub output: Vec<ShellCommandOutput>,
}

impl ShellCallOutput {
    pub fn new(call_id: impl Into<String>, max_output_length: usize, output: Vec<ShellCommandOutput>) -> Self {
        Self {
            item_type: "shell_call_output".to_string(),
            call_id: call_id.into(),
            max_output_length,
            output,
        }
    }
}

/// One item of list-form request input.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum InputItem {
    ComputerCallOutput(ComputerCallOutput),
    ShellCallOutput(ShellCallOutput),
    Message(InputMessage),
}

/// Request input: a plain string or a sequence of items.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum RequestInput {
    Text(String),
    Items(Vec<InputItem>),
}

impl Default for RequestInput {
    fn default() -> Self {
        RequestInput::Text(String::new())
    }
}

/// Reasoning options.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Reasoning {
    pub effort: String,
}

/// `text` options: verbosity and structured-output format.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TextOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verbosity: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<Value>,
}

/// A Responses-API request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseRequest {
    pub model: String,
    pub instructions: String,
    pub input: RequestInput,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<Reasoning>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_tier: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<TextOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub truncation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_response_id: Option<String>,
}

impl ResponseRequest {
    /// Tool types present on the request.
    pub fn tool_types(&self) -> Vec<&str> {
        self.tools
            .as_deref()
            .unwrap_or_default()
            .iter()
            .filter_map(tools::tool_type)
            .collect()
    }
}

/// Final clamp: `tool_choice == "required"` must never be emitted with an
/// empty tools list. The request is downgraded to `auto` and a default
/// `web_search` tool is inserted so the call still succeeds.
pub fn ensure_tool_choice_safety(request: &mut ResponseRequest) {
    let tools_empty = request.tools.as_ref().map(|t| t.is_empty()).unwrap_or(true);
    if request.tool_choice.as_deref() == Some("required") && tools_empty {
        tracing::warn!(
            model = %request.model,
            "tool_choice was 'required' with no tools; downgrading to 'auto' with a default web_search tool"
        );
        request.tools = Some(vec![json!({ "type": "web_search" })]);
        request.tool_choice = Some("auto".to_string());
    }
}

/// Combine the dependency context and the current step context into the
/// request input text.
pub fn build_input_text(context: &str, previous_context: &str) -> String {
    if previous_context.is_empty() {
        context.to_string()
    } else {
        format!("{previous_context}\n\n--- Current Step Context ---\n{context}")
    }
}

/// Builder for [`ResponseRequest`].
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    model: String,
    instructions: String,
    input_text: String,
    tools: Vec<Value>,
    tool_choice: String,
    reasoning_effort: Option<String>,
    service_tier: Option<String>,
    text_verbosity: Option<String>,
    max_output_tokens: Option<u32>,
    output_format: Option<Value>,
    previous_response_id: Option<String>,
    truncation: Option<String>,
}

impl RequestBuilder {
    pub fn new(
        model: impl Into<String>,
        instructions: impl Into<String>,
        input_text: impl Into<String>,
    ) -> Self {
        Self {
            model: model.into(),
            instructions: instructions.into(),
            input_text: input_text.into(),
            tools: Vec::new(),
            tool_choice: "auto".to_string(),
            reasoning_effort: None,
            service_tier: None,
            text_verbosity: None,
            max_output_tokens: None,
            output_format: None,
            previous_response_id: None,
            truncation: None,
        }
    }

    pub fn tools(mut self, tools: Vec<Value>) -> Self {
        self.tools = tools;
        self
    }

    pub fn tool_choice(mut self, choice: impl Into<String>) -> Self {
        self.tool_choice = choice.into();
        self
    }

    pub fn reasoning_effort(mut self, effort: Option<String>) -> Self {
        self.reasoning_effort = effort;
        self
    }

    pub fn service_tier(mut self, tier: Option<String>) -> Self {
        self.service_tier = tier;
        self
    }

    pub fn text_verbosity(mut self, verbosity: Option<String>) -> Self {
        self.text_verbosity = verbosity;
        self
    }

    pub fn max_output_tokens(mut self, max: Option<u32>) -> Self {
        self.max_output_tokens = max;
        self
    }

    /// Structured output request: `{type: "text" | "json_object"}` or
    /// `{type: "json_schema", name, schema, description?, strict?}`.
    pub fn output_format(mut self, format: Option<Value>) -> Self {
        self.output_format = format;
        self
    }

    pub fn previous_response_id(mut self, id: Option<String>) -> Self {
        self.previous_response_id = id;
        self
    }

    pub fn truncation(mut self, truncation: impl Into<String>) -> Self {
        self.truncation = Some(truncation.into());
        self
    }

    /// Build with plain text input.
    pub fn build(self) -> ResponseRequest {
        let input = RequestInput::Text(self.input_text.clone());
        self.finish(input)
    }

    /// Build with explicit list-form input (tool-loop follow-ups).
    pub fn build_with_items(self, items: Vec<InputItem>) -> ResponseRequest {
        self.finish(RequestInput::Items(items))
    }

    /// Build multimodal input from prior steps' image URLs.
    ///
    /// Images are attached only when an `image_generation` tool is present
    /// and the model supports image inputs (computer-use-preview models do
    /// not). Problematic hosts are pre-downloaded to base64 and substituted
    /// in place; hostile hosts are skipped; order is preserved modulo
    /// deduplication. Falls back to plain text when nothing survives.
    pub async fn build_multimodal(
        self,
        http: &reqwest::Client,
        previous_image_urls: &[String],
    ) -> ResponseRequest {
        let has_image_generation = tools::has_tool(&self.tools, "image_generation");
        let model_supports_images = !self.model.to_lowercase().contains("computer-use");

        if !has_image_generation || previous_image_urls.is_empty() || !model_supports_images {
            if has_image_generation && !previous_image_urls.is_empty() && !model_supports_images {
                tracing::debug!(model = %self.model, "model does not support image inputs, excluding images");
            }
            return self.build();
        }

        let deduplicated = images::deduplicate_image_urls(previous_image_urls);
        let mut content = vec![ContentItem::InputText {
            text: self.input_text.clone(),
        }];
        let mut attached = 0usize;
        let mut converted = 0usize;
        let mut skipped = 0usize;

        for url in &deduplicated {
            if url.is_empty() || images::is_hostile_url(url) {
                skipped += 1;
                continue;
            }
            if images::is_problematic_url(url) {
                match images::download_image_as_data_url(http, url).await {
                    Some(data_url) => {
                        content.push(ContentItem::InputImage { image_url: data_url });
                        attached += 1;
                        converted += 1;
                    }
                    None => {
                        skipped += 1;
                        tracing::warn!(url_preview = %url.chars().take(100).collect::<String>(), "failed to convert problematic URL, skipping");
                    }
                }
            } else {
                content.push(ContentItem::InputImage {
                    image_url: url.clone(),
                });
                attached += 1;
            }
        }

        if attached == 0 {
            tracing::warn!(
                original_count = previous_image_urls.len(),
                "no valid image URLs after filtering, using text-only input"
            );
            return self.build();
        }

        tracing::info!(
            original_image_urls_count = previous_image_urls.len(),
            deduplicated_count = deduplicated.len(),
            attached,
            converted_to_base64_count = converted,
            skipped_count = skipped,
            "built multimodal input with previous image URLs"
        );

        self.finish(RequestInput::Items(vec![InputItem::Message(
            InputMessage::user(content),
        )]))
    }

    fn finish(self, input: RequestInput) -> ResponseRequest {
        let mut instructions = self.instructions;
        let lower = instructions.to_lowercase();
        if !AUTONOMY_MARKERS.iter().any(|m| lower.contains(m)) {
            instructions = format!("{AUTONOMY_PREAMBLE}{instructions}");
        }

        let mut tool_list = self.tools;

        // Deep research models require at least one of the research tools;
        // add file_search defensively so the call is accepted.
        if self.model.to_lowercase().contains("deep-research") {
            let has_required = tool_list
                .iter()
                .filter_map(tools::tool_type)
                .any(|t| tools::DEEP_RESEARCH_TOOLS.contains(&t));
            if !has_required {
                tracing::info!(
                    model = %self.model,
                    "deep research model requires a research tool; adding file_search"
                );
                tool_list.push(json!({ "type": "file_search" }));
            }
        }

        let has_computer_use = tools::has_tool(&tool_list, "computer_use_preview");
        let mut cleaned = tools::clean_tools(&tool_list);
        if has_computer_use {
            cleaned = tools::filter_incompatible_with_computer_use(cleaned);
        }

        let (tools_field, tool_choice_field) = if !cleaned.is_empty() {
            let choice = if self.tool_choice != "none" {
                Some(self.tool_choice.clone())
            } else {
                None
            };
            (Some(cleaned), choice)
        } else {
            if self.tool_choice == "required" {
                tracing::warn!(
                    model = %self.model,
                    "all tools were filtered out but tool_choice was 'required'; not setting tool_choice"
                );
            }
            (None, None)
        };

        // Default to high reasoning and the priority tier for the GPT-5
        // family unless the caller overrides.
        let reasoning_effort = self.reasoning_effort.or_else(|| {
            self.model
                .starts_with("gpt-5")
                .then(|| "high".to_string())
        });
        let service_tier = self.service_tier.or_else(|| {
            self.model
                .starts_with("gpt-5")
                .then(|| "priority".to_string())
        });

        let mut text_cfg = TextOptions {
            verbosity: self.text_verbosity,
            format: None,
        };
        if let Some(format) = &self.output_format {
            match format.get("type").and_then(|t| t.as_str()) {
                Some(kind @ ("text" | "json_object")) => {
                    text_cfg.format = Some(json!({ "type": kind }));
                    if kind == "json_object" && !instructions.to_lowercase().contains("json") {
                        instructions.push_str(
                            "\n\nIMPORTANT: Please output your response in JSON format.",
                        );
                    }
                }
                Some("json_schema") => {
                    let name = format.get("name").and_then(|v| v.as_str());
                    let schema = format.get("schema").filter(|s| s.is_object());
                    if let (Some(name), Some(schema)) = (name, schema) {
                        let mut fmt = json!({
                            "type": "json_schema",
                            "name": name,
                            "schema": schema,
                        });
                        if let Some(desc) = format.get("description").and_then(|v| v.as_str()) {
                            fmt["description"] = json!(desc);
                        }
                        if let Some(strict) = format.get("strict").and_then(|v| v.as_bool()) {
                            fmt["strict"] = json!(strict);
                        }
                        text_cfg.format = Some(fmt);
                    }
                }
                _ => {}
            }
        }
        let text = (text_cfg.verbosity.is_some() || text_cfg.format.is_some()).then_some(text_cfg);

        ResponseRequest {
            model: self.model,
            instructions,
            input,
            tools: tools_field,
            tool_choice: tool_choice_field,
            reasoning: reasoning_effort.map(|effort| Reasoning { effort }),
            service_tier,
            text,
            max_output_tokens: self.max_output_tokens,
            truncation: self.truncation,
            previous_response_id: self.previous_response_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn autonomy_preamble_prepended_once() {
        let request = RequestBuilder::new("gpt-5", "Write a report.", "data").build();
        assert!(request.instructions.starts_with("IMPORTANT: This workflow runs"));

        let already = RequestBuilder::new(
            "gpt-5",
            "This runs with no user interaction. Write a report.",
            "data",
        )
        .build();
        assert!(!already.instructions.starts_with("IMPORTANT: This workflow runs"));
    }

    #[test]
    fn deep_research_gets_file_search() {
        let request = RequestBuilder::new("o4-deep-research", "go", "data")
            .tools(vec![json!({ "type": "image_generation" })])
            .build();
        assert!(request.tool_types().contains(&"file_search"));

        let with_web = RequestBuilder::new("o4-deep-research", "go", "data")
            .tools(vec![json!("web_search_preview")])
            .build();
        assert!(!with_web.tool_types().contains(&"file_search"));
    }

    #[test]
    fn computer_use_filters_code_interpreter() {
        let request = RequestBuilder::new("computer-use-preview", "go", "data")
            .tools(vec![json!("computer_use_preview"), json!("code_interpreter")])
            .build();
        let types = request.tool_types();
        assert!(types.contains(&"computer_use_preview"));
        assert!(!types.contains(&"code_interpreter"));
    }

    #[test]
    fn required_with_no_tools_is_not_emitted() {
        let request = RequestBuilder::new("gpt-5", "go", "data")
            .tool_choice("required")
            .build();
        assert!(request.tools.is_none());
        assert!(request.tool_choice.is_none());
    }

    #[test]
    fn final_clamp_inserts_default_tool() {
        let mut request = RequestBuilder::new("gpt-5", "go", "data").build();
        request.tool_choice = Some("required".to_string());
        ensure_tool_choice_safety(&mut request);
        assert_eq!(request.tool_choice.as_deref(), Some("auto"));
        assert_eq!(request.tool_types(), vec!["web_search"]);
    }

    #[test]
    fn gpt5_defaults_applied_unless_overridden() {
        let request = RequestBuilder::new("gpt-5", "go", "data").build();
        assert_eq!(request.reasoning.as_ref().unwrap().effort, "high");
        assert_eq!(request.service_tier.as_deref(), Some("priority"));

        let overridden = RequestBuilder::new("gpt-5-mini", "go", "data")
            .reasoning_effort(Some("low".to_string()))
            .service_tier(Some("default".to_string()))
            .build();
        assert_eq!(overridden.reasoning.as_ref().unwrap().effort, "low");
        assert_eq!(overridden.service_tier.as_deref(), Some("default"));

        let other = RequestBuilder::new("gpt-4.1", "go", "data").build();
        assert!(other.reasoning.is_none());
        assert!(other.service_tier.is_none());
    }

    #[test]
    fn json_object_format_ensures_json_in_instructions() {
        let request = RequestBuilder::new("gpt-5", "Summarize the data.", "data")
            .output_format(Some(json!({ "type": "json_object" })))
            .build();
        assert!(request.instructions.to_lowercase().contains("json"));
        let text = request.text.unwrap();
        assert_eq!(text.format.unwrap()["type"], "json_object");
    }

    #[test]
    fn json_schema_format_passes_through() {
        let request = RequestBuilder::new("gpt-5", "go", "data")
            .output_format(Some(json!({
                "type": "json_schema",
                "name": "assets",
                "schema": { "type": "object" },
                "strict": true
            })))
            .build();
        let fmt = request.text.unwrap().format.unwrap();
        assert_eq!(fmt["type"], "json_schema");
        assert_eq!(fmt["name"], "assets");
        assert_eq!(fmt["strict"], true);
    }

    #[tokio::test]
    async fn multimodal_requires_image_generation_tool() {
        let http = reqwest::Client::new();
        let urls = vec!["https://example.com/a.png".to_string()];

        let without_tool = RequestBuilder::new("gpt-5", "go", "data")
            .build_multimodal(&http, &urls)
            .await;
        assert!(matches!(without_tool.input, RequestInput::Text(_)));

        let with_tool = RequestBuilder::new("gpt-5", "go", "data")
            .tools(vec![json!({ "type": "image_generation" })])
            .build_multimodal(&http, &urls)
            .await;
        match with_tool.input {
            RequestInput::Items(items) => {
                let InputItem::Message(message) = &items[0] else {
                    panic!("expected message item");
                };
                assert_eq!(message.content.len(), 2);
                assert!(matches!(message.content[0], ContentItem::InputText { .. }));
                assert!(matches!(message.content[1], ContentItem::InputImage { .. }));
            }
            other => panic!("expected list input, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn computer_use_models_exclude_images() {
        let http = reqwest::Client::new();
        let urls = vec!["https://example.com/a.png".to_string()];
        let request = RequestBuilder::new("computer-use-preview", "go", "data")
            .tools(vec![json!("computer_use_preview"), json!({ "type": "image_generation" })])
            .build_multimodal(&http, &urls)
            .await;
        assert!(matches!(request.input, RequestInput::Text(_)));
    }

    #[test]
    fn input_text_combines_contexts() {
        assert_eq!(build_input_text("now", ""), "now");
        let combined = build_input_text("now", "before");
        assert!(combined.starts_with("before"));
        assert!(combined.contains("--- Current Step Context ---"));
        assert!(combined.ends_with("now"));
    }

    #[test]
    fn tool_output_items_serialize_with_type_tags() {
        let screenshot = ComputerCallOutput::new(
            "cc1",
            ComputerCallScreenshot::new("data:image/png;base64,AAAA"),
        );
        let value = serde_json::to_value(&screenshot).unwrap();
        assert_eq!(value["type"], "computer_call_output");
        assert_eq!(value["output"]["type"], "input_image");

        let shell = ShellCallOutput::new("sc1", 4096, vec![ShellCommandOutput::default()]);
        let value = serde_json::to_value(&shell).unwrap();
        assert_eq!(value["type"], "shell_call_output");
        assert_eq!(value["max_output_length"], 4096);
    }
}
