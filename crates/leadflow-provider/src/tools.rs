//! Tool declaration helpers.
//!
//! Tools travel in wire form: either a bare string type (`"web_search"`)
//! or an object (`{"type": "...", ...extras}`). These helpers normalize
//! that shape and enforce the container requirement some tool types carry.

use serde_json::{json, Value};

/// Tool types that require a `container` object on the declaration.
pub const CONTAINER_REQUIRED_TOOLS: &[&str] = &["code_interpreter", "computer_use_preview"];

/// Tool types incompatible with `computer_use_preview` in the same request.
pub const INCOMPATIBLE_WITH_COMPUTER_USE: &[&str] = &["code_interpreter"];

/// Tool types that satisfy the deep-research model requirement.
pub const DEEP_RESEARCH_TOOLS: &[&str] = &["web_search_preview", "mcp", "file_search"];

/// Wire type of a tool declaration, for both string and object forms.
pub fn tool_type(tool: &Value) -> Option<&str> {
    match tool {
        Value::String(s) => Some(s.as_str()),
        Value::Object(map) => map.get("type").and_then(|v| v.as_str()),
        _ => None,
    }
}

/// Whether a tools list declares the given type.
pub fn has_tool(tools: &[Value], wanted: &str) -> bool {
    tools.iter().any(|t| tool_type(t) == Some(wanted))
}

/// Normalize a tool to object form and inject `container: {type: "auto"}`
/// where the tool type requires one. Pre-existing container configs are
/// preserved verbatim.
pub fn normalize_tool(tool: &Value) -> Value {
    let mut obj = match tool {
        Value::String(s) => json!({ "type": s }),
        other => other.clone(),
    };

    if let Some(map) = obj.as_object_mut() {
        let needs_container = map
            .get("type")
            .and_then(|v| v.as_str())
            .map(|t| CONTAINER_REQUIRED_TOOLS.contains(&t))
            .unwrap_or(false);
        if needs_container && !map.contains_key("container") {
            map.insert("container".to_string(), json!({ "type": "auto" }));
        }
    }

    obj
}

/// Normalize a tools list for the wire: object form, containers injected,
/// null/invalid entries dropped.
pub fn clean_tools(tools: &[Value]) -> Vec<Value> {
    tools
        .iter()
        .filter(|t| tool_type(t).is_some())
        .map(normalize_tool)
        .collect()
}

/// Remove tools that the API rejects alongside `computer_use_preview`.
pub fn filter_incompatible_with_computer_use(tools: Vec<Value>) -> Vec<Value> {
    tools
        .into_iter()
        .filter(|t| {
            let keep = tool_type(t)
                .map(|ty| !INCOMPATIBLE_WITH_COMPUTER_USE.contains(&ty))
                .unwrap_or(false);
            if !keep {
                tracing::debug!(tool = ?tool_type(t), "filtering tool incompatible with computer_use_preview");
            }
            keep
        })
        .collect()
}

/// Display dimensions declared on a `computer_use_preview` tool,
/// defaulting to 1024x768.
pub fn computer_use_display(tools: &[Value]) -> (u32, u32) {
    for tool in tools {
        if tool_type(tool) == Some("computer_use_preview") {
            if let Some(map) = tool.as_object() {
                let width = map
                    .get("display_width")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(1024) as u32;
                let height = map
                    .get("display_height")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(768) as u32;
                return (width, height);
            }
            return (1024, 768);
        }
    }
    (1024, 768)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_tools_normalize_to_objects() {
        let cleaned = clean_tools(&[json!("web_search")]);
        assert_eq!(cleaned, vec![json!({ "type": "web_search" })]);
    }

    #[test]
    fn container_injected_for_required_types() {
        for ty in CONTAINER_REQUIRED_TOOLS {
            let cleaned = clean_tools(&[json!(ty)]);
            assert_eq!(cleaned[0]["container"], json!({ "type": "auto" }));
        }
    }

    #[test]
    fn existing_container_preserved_verbatim() {
        let tool = json!({
            "type": "code_interpreter",
            "container": { "type": "fixed", "id": "ctr_123" }
        });
        let cleaned = clean_tools(&[tool.clone()]);
        assert_eq!(cleaned[0], tool);
    }

    #[test]
    fn non_container_tools_untouched() {
        let cleaned = clean_tools(&[json!({ "type": "image_generation" })]);
        assert!(cleaned[0].get("container").is_none());
    }

    #[test]
    fn computer_use_filter_drops_code_interpreter() {
        let tools = clean_tools(&[json!("computer_use_preview"), json!("code_interpreter")]);
        let filtered = filter_incompatible_with_computer_use(tools);
        assert_eq!(filtered.len(), 1);
        assert_eq!(tool_type(&filtered[0]), Some("computer_use_preview"));
    }

    #[test]
    fn display_dims_default_and_override() {
        assert_eq!(computer_use_display(&[json!("computer_use_preview")]), (1024, 768));
        let tool = json!({
            "type": "computer_use_preview",
            "display_width": 1280,
            "display_height": 800
        });
        assert_eq!(computer_use_display(&[tool]), (1280, 800));
    }
}
