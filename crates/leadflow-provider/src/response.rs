//! Responses-API response types.
//!
//! The provider's `output[]` carries multiple overlapping item shapes,
//! legacy and modern. Parsing is lenient and tolerant: unknown types
//! deserialize to [`OutputItem::Unknown`] and are ignored; missing fields
//! fall through alternative extractors.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Token usage block on a response.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ResponseUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

/// A pending safety check on a computer call.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SafetyCheck {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

/// A computer-use action requested by the model.
///
/// The action vocabulary (click, type, scroll, keypress, wait, drag,
/// navigate, screenshot, ...) drifts across SDK versions, so everything
/// beyond the type tag is passed through untyped to the driver.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ComputerAction {
    #[serde(rename = "type", default)]
    pub action_type: String,
    #[serde(flatten)]
    pub fields: serde_json::Map<String, Value>,
}

impl ComputerAction {
    pub fn new(action_type: impl Into<String>) -> Self {
        Self {
            action_type: action_type.into(),
            fields: serde_json::Map::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }
}

/// A shell batch requested by the model.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ShellAction {
    #[serde(default)]
    pub commands: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_length: Option<usize>,
}

/// One segment of a message item's content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageContent {
    #[serde(rename = "type", default)]
    pub content_type: String,
    #[serde(default)]
    pub text: String,
}

/// One reasoning summary segment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningSummary {
    #[serde(default)]
    pub text: String,
}

/// Tagged variant over the provider's output-item shapes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OutputItem {
    #[serde(rename = "reasoning")]
    Reasoning {
        #[serde(default)]
        summary: Vec<ReasoningSummary>,
    },
    #[serde(rename = "message")]
    Message {
        #[serde(default)]
        role: String,
        #[serde(default)]
        content: Vec<MessageContent>,
    },
    #[serde(rename = "text", alias = "output_text")]
    Text {
        #[serde(default)]
        text: String,
    },
    #[serde(rename = "image")]
    Image {
        #[serde(skip_serializing_if = "Option::is_none")]
        url: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        image_url: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        image: Option<Value>,
    },
    #[serde(rename = "image_generation_call")]
    ImageGenerationCall {
        #[serde(default)]
        id: String,
        /// Base64-encoded result image.
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<String>,
    },
    #[serde(rename = "tool_call", alias = "tool_calls")]
    ToolCall {
        #[serde(skip_serializing_if = "Option::is_none")]
        call_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        tool_name: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        arguments: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        action: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        output: Option<Value>,
    },
    #[serde(rename = "function_call")]
    FunctionCall {
        #[serde(skip_serializing_if = "Option::is_none")]
        call_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        /// Nested `{name, arguments}` form used by some SDKs.
        #[serde(skip_serializing_if = "Option::is_none")]
        function: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        arguments: Option<Value>,
    },
    #[serde(rename = "computer_call")]
    ComputerCall {
        #[serde(default)]
        call_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        action: Option<ComputerAction>,
        #[serde(default)]
        pending_safety_checks: Vec<SafetyCheck>,
    },
    #[serde(rename = "computer_screenshot")]
    ComputerScreenshot {
        #[serde(skip_serializing_if = "Option::is_none")]
        image_url: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        url: Option<String>,
    },
    #[serde(rename = "shell_call")]
    ShellCall {
        #[serde(skip_serializing_if = "Option::is_none")]
        call_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        action: Option<ShellAction>,
    },
    #[serde(other)]
    Unknown,
}

/// One computer_call pulled out of a response.
#[derive(Debug, Clone)]
pub struct ComputerCallItem {
    pub call_id: String,
    pub action: Option<ComputerAction>,
    pub pending_safety_checks: Vec<SafetyCheck>,
}

/// A Responses-API response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderResponse {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub output: Vec<OutputItem>,
    #[serde(default)]
    pub output_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<ResponseUsage>,
}

impl ProviderResponse {
    /// The response's text content: the `output_text` convenience field
    /// when present, else assistant message/text items concatenated.
    pub fn text(&self) -> String {
        if let Some(text) = &self.output_text {
            if !text.is_empty() {
                return text.clone();
            }
        }
        let mut parts = Vec::new();
        for item in &self.output {
            match item {
                OutputItem::Text { text } if !text.is_empty() => parts.push(text.clone()),
                OutputItem::Message { content, .. } => {
                    for segment in content {
                        if segment.content_type == "output_text" && !segment.text.is_empty() {
                            parts.push(segment.text.clone());
                        }
                    }
                }
                _ => {}
            }
        }
        parts.join("")
    }

    /// All computer_call items, in output order.
    pub fn computer_calls(&self) -> Vec<ComputerCallItem> {
        self.output
            .iter()
            .filter_map(|item| match item {
                OutputItem::ComputerCall {
                    call_id,
                    action,
                    pending_safety_checks,
                } => Some(ComputerCallItem {
                    call_id: call_id.clone(),
                    action: action.clone(),
                    pending_safety_checks: pending_safety_checks.clone(),
                }),
                _ => None,
            })
            .collect()
    }

    /// Shell invocations, covering the three wire shapes the model may
    /// emit: `shell_call`, `tool_call{name=shell}`, and
    /// `function_call{name=shell}`.
    pub fn shell_calls(&self) -> Vec<(String, ShellAction)> {
        let mut calls = Vec::new();
        for item in &self.output {
            match item {
                OutputItem::ShellCall { call_id, id, action } => {
                    let call_id = call_id.clone().or_else(|| id.clone()).unwrap_or_default();
                    calls.push((call_id, action.clone().unwrap_or_default()));
                }
                OutputItem::ToolCall {
                    call_id,
                    id,
                    name,
                    tool_name,
                    arguments,
                    action,
                    ..
                } => {
                    let tool = tool_name.as_deref().or(name.as_deref());
                    if tool == Some("shell") {
                        let call_id = call_id.clone().or_else(|| id.clone()).unwrap_or_default();
                        let raw = action.clone().or_else(|| arguments.clone());
                        calls.push((call_id, parse_shell_action(raw)));
                    }
                }
                OutputItem::FunctionCall {
                    call_id,
                    id,
                    name,
                    function,
                    arguments,
                } => {
                    let fn_name = name.clone().or_else(|| {
                        function
                            .as_ref()
                            .and_then(|f| f.get("name"))
                            .and_then(|n| n.as_str())
                            .map(String::from)
                    });
                    if fn_name.as_deref() == Some("shell") {
                        let call_id = call_id.clone().or_else(|| id.clone()).unwrap_or_default();
                        let raw = arguments.clone().or_else(|| {
                            function.as_ref().and_then(|f| f.get("arguments").cloned())
                        });
                        calls.push((call_id, parse_shell_action(raw)));
                    }
                }
                _ => {}
            }
        }
        calls
    }
}

/// Parse a shell action from either an object or a JSON-encoded string
/// (function-call arguments arrive as strings).
fn parse_shell_action(raw: Option<Value>) -> ShellAction {
    match raw {
        Some(Value::String(s)) => serde_json::from_str(&s).unwrap_or_default(),
        Some(value) => serde_json::from_value(value).unwrap_or_default(),
        None => ShellAction::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unknown_item_types_are_tolerated() {
        let response: ProviderResponse = serde_json::from_value(json!({
            "id": "resp_1",
            "output": [
                { "type": "some_future_item", "payload": 42 },
                { "type": "text", "text": "hello" }
            ],
            "output_text": "hello"
        }))
        .unwrap();
        assert_eq!(response.output.len(), 2);
        assert!(matches!(response.output[0], OutputItem::Unknown));
        assert_eq!(response.text(), "hello");
    }

    #[test]
    fn text_falls_back_to_message_items() {
        let response: ProviderResponse = serde_json::from_value(json!({
            "id": "resp_2",
            "output": [{
                "type": "message",
                "role": "assistant",
                "content": [{ "type": "output_text", "text": "from message" }]
            }]
        }))
        .unwrap();
        assert_eq!(response.text(), "from message");
    }

    #[test]
    fn shell_calls_detected_across_shapes() {
        let response: ProviderResponse = serde_json::from_value(json!({
            "id": "resp_3",
            "output": [
                { "type": "shell_call", "call_id": "c1",
                  "action": { "commands": ["ls"] } },
                { "type": "tool_call", "id": "c2", "tool_name": "shell",
                  "arguments": { "commands": ["pwd"], "timeout_ms": 1000 } },
                { "type": "function_call", "call_id": "c3", "name": "shell",
                  "arguments": "{\"commands\":[\"echo hi\"]}" },
                { "type": "function_call", "call_id": "c4", "name": "other",
                  "arguments": "{}" }
            ]
        }))
        .unwrap();

        let calls = response.shell_calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0].0, "c1");
        assert_eq!(calls[0].1.commands, vec!["ls"]);
        assert_eq!(calls[1].1.timeout_ms, Some(1000));
        assert_eq!(calls[2].1.commands, vec!["echo hi"]);
    }

    #[test]
    fn computer_call_parses_action_and_safety_checks() {
        let response: ProviderResponse = serde_json::from_value(json!({
            "id": "resp_4",
            "output": [{
                "type": "computer_call",
                "call_id": "cc1",
                "action": { "type": "click", "x": 10, "y": 20 },
                "pending_safety_checks": [
                    { "id": "sc1", "code": "malicious_instructions", "message": "check" }
                ]
            }]
        }))
        .unwrap();

        let calls = response.computer_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].call_id, "cc1");
        assert_eq!(calls[0].action.as_ref().unwrap().action_type, "click");
        assert_eq!(calls[0].pending_safety_checks[0].code, "malicious_instructions");
    }
}
