//! Response processing: text extraction, embedded base64 asset rewriting,
//! and image URL harvesting.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::ProviderError;
use crate::response::{OutputItem, ProviderResponse};

/// Destination for base64 image payloads pulled out of responses. The
/// engine implements this on top of its artifact service; uploads land
/// under the job's image prefix and return a public URL.
#[async_trait]
pub trait ImageSink: Send + Sync {
    async fn store_base64_image(
        &self,
        image_b64: &str,
        content_type: &str,
        filename: Option<String>,
    ) -> Result<String, ProviderError>;
}

/// Full result of processing one provider response.
#[derive(Debug, Clone)]
pub struct ProcessedResponse {
    pub content: String,
    pub usage: crate::response::ResponseUsage,
    pub image_urls: Vec<String>,
}

fn extension_for(content_type: &str) -> &'static str {
    if content_type.contains("jpeg") || content_type.contains("jpg") {
        "jpg"
    } else {
        "png"
    }
}

/// Process one base64 asset entry: upload it, rewrite `data` to the URL,
/// flip `encoding` to `url`. Returns the URL, or `None` when the entry is
/// not a base64 image asset.
async fn process_base64_asset(asset: &mut Value, sink: &dyn ImageSink) -> Option<String> {
    let obj = asset.as_object()?;
    let encoding = obj.get("encoding")?.as_str()?.to_ascii_lowercase();
    let content_type = obj.get("content_type")?.as_str()?.to_string();
    let data = obj.get("data")?.as_str()?.to_string();

    if encoding != "base64" || !content_type.starts_with("image/") || data.is_empty() {
        return None;
    }

    let filename = obj
        .get("name")
        .and_then(|n| n.as_str())
        .filter(|n| !n.is_empty())
        .map(String::from)
        .or_else(|| {
            obj.get("id")
                .and_then(|i| i.as_str())
                .filter(|i| !i.is_empty())
                .map(|id| format!("{id}.{}", extension_for(&content_type)))
        });

    match sink.store_base64_image(&data, &content_type, filename.clone()).await {
        Ok(url) => {
            let obj = asset.as_object_mut()?;
            obj.insert("data".to_string(), Value::String(url.clone()));
            obj.insert("encoding".to_string(), Value::String("url".to_string()));
            obj.insert(
                "original_data_encoding".to_string(),
                Value::String("base64".to_string()),
            );
            tracing::info!(
                image_filename = filename.as_deref().unwrap_or("generated"),
                content_type = %content_type,
                "converted base64 asset to URL"
            );
            Some(url)
        }
        Err(error) => {
            tracing::warn!(error = %error, "failed to upload base64 asset");
            None
        }
    }
}

/// Extract base64-encoded images from a JSON document of the shape
/// `{assets: [{encoding: "base64", content_type: "image/...", data}]}`,
/// upload them, and rewrite the document with the substituted URLs.
///
/// Non-JSON content and shapes without an assets array pass through
/// untouched with no URLs.
pub async fn extract_and_convert_base64_assets(
    content: &str,
    sink: &dyn ImageSink,
) -> (String, Vec<String>) {
    let Ok(mut document) = serde_json::from_str::<Value>(content) else {
        return (content.to_string(), Vec::new());
    };
    let Some(assets) = document.get_mut("assets").and_then(|a| a.as_array_mut()) else {
        return (content.to_string(), Vec::new());
    };

    let mut image_urls = Vec::new();
    for asset in assets.iter_mut() {
        if let Some(url) = process_base64_asset(asset, sink).await {
            image_urls.push(url);
        }
    }

    if image_urls.is_empty() {
        (content.to_string(), Vec::new())
    } else {
        let rewritten = serde_json::to_string_pretty(&document)
            .unwrap_or_else(|_| content.to_string());
        tracing::info!(image_count = image_urls.len(), "converted base64 assets to URLs");
        (rewritten, image_urls)
    }
}

fn url_from_image_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => map
            .get("url")
            .or_else(|| map.get("image_url"))
            .and_then(|v| v.as_str())
            .map(String::from),
        _ => None,
    }
}

/// Harvest image URLs from a response's output items.
///
/// `image_generation_call` results arrive as base64 and are uploaded via
/// the sink; `image` items are checked for URL fields across the shapes
/// different SDK versions emit; `tool_call` items contribute when they
/// name the image-generation tool. Pre-converted base64 URLs are appended
/// last, and the whole list is deduplicated preserving order.
pub async fn extract_image_urls(
    response: &ProviderResponse,
    sink: &dyn ImageSink,
    base64_image_urls: &[String],
) -> Vec<String> {
    let mut image_urls: Vec<String> = Vec::new();

    for item in &response.output {
        match item {
            OutputItem::ImageGenerationCall { id, result } => {
                if let Some(result) = result {
                    match sink.store_base64_image(result, "image/png", None).await {
                        Ok(url) => {
                            tracing::info!(asset_id = %id, image_url = %url, "converted image generation result to URL");
                            image_urls.push(url);
                        }
                        Err(error) => {
                            tracing::error!(asset_id = %id, error = %error, "failed to convert image generation result");
                        }
                    }
                }
            }
            OutputItem::Image { url, image_url, image } => {
                let found = image_url
                    .clone()
                    .or_else(|| url.clone())
                    .or_else(|| image.as_ref().and_then(url_from_image_value));
                if let Some(found) = found {
                    image_urls.push(found);
                }
            }
            OutputItem::ToolCall { name, tool_name, result, output, .. } => {
                let tool = tool_name.as_deref().or(name.as_deref());
                if tool != Some("image_generation") {
                    continue;
                }
                let payload = result.as_ref().or(output.as_ref());
                match payload {
                    Some(Value::Array(entries)) => {
                        image_urls.extend(entries.iter().filter_map(url_from_image_value));
                    }
                    Some(single) => {
                        if let Some(url) = url_from_image_value(single) {
                            image_urls.push(url);
                        }
                    }
                    None => {}
                }
            }
            OutputItem::ComputerScreenshot { image_url, url } => {
                if let Some(found) = image_url.clone().or_else(|| url.clone()) {
                    image_urls.push(found);
                }
            }
            _ => {}
        }
    }

    image_urls.extend(base64_image_urls.iter().cloned());
    crate::images::deduplicate_image_urls(&image_urls)
}

/// Process a provider response: extract text, rewrite embedded base64
/// assets, compute usage, and harvest image URLs.
pub async fn process_response(
    response: &ProviderResponse,
    sink: &dyn ImageSink,
) -> ProcessedResponse {
    let raw_content = response.text();
    let (content, base64_image_urls) =
        extract_and_convert_base64_assets(&raw_content, sink).await;
    let image_urls = extract_image_urls(response, sink, &base64_image_urls).await;
    let usage = response.usage.clone().unwrap_or_default();

    ProcessedResponse {
        content,
        usage,
        image_urls,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    struct RecordingSink {
        uploads: Mutex<Vec<String>>,
    }

    impl RecordingSink {
        fn new() -> Self {
            Self {
                uploads: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ImageSink for RecordingSink {
        async fn store_base64_image(
            &self,
            _image_b64: &str,
            content_type: &str,
            _filename: Option<String>,
        ) -> Result<String, ProviderError> {
            let mut uploads = self.uploads.lock().unwrap();
            let url = format!(
                "https://cdn.example.com/t1/jobs/j1/images/gen_{}.{}",
                uploads.len(),
                extension_for(content_type)
            );
            uploads.push(url.clone());
            Ok(url)
        }
    }

    #[tokio::test]
    async fn base64_assets_are_rewritten_in_place() {
        let sink = RecordingSink::new();
        let content = json!({
            "assets": [
                { "id": "a1", "encoding": "base64", "content_type": "image/png", "data": "AAAA" },
                { "id": "a2", "encoding": "url", "content_type": "image/png", "data": "https://x/y.png" }
            ]
        })
        .to_string();

        let (rewritten, urls) = extract_and_convert_base64_assets(&content, &sink).await;
        assert_eq!(urls.len(), 1);
        let document: Value = serde_json::from_str(&rewritten).unwrap();
        assert_eq!(document["assets"][0]["encoding"], "url");
        assert_eq!(document["assets"][0]["data"], urls[0]);
        assert_eq!(document["assets"][0]["original_data_encoding"], "base64");
        // Untouched asset preserved verbatim.
        assert_eq!(document["assets"][1]["data"], "https://x/y.png");
    }

    #[tokio::test]
    async fn non_json_content_passes_through() {
        let sink = RecordingSink::new();
        let (content, urls) =
            extract_and_convert_base64_assets("plain markdown output", &sink).await;
        assert_eq!(content, "plain markdown output");
        assert!(urls.is_empty());
    }

    #[tokio::test]
    async fn image_urls_harvested_and_deduped() {
        let sink = RecordingSink::new();
        let response: ProviderResponse = serde_json::from_value(json!({
            "id": "r1",
            "output": [
                { "type": "image_generation_call", "id": "ig1", "result": "AAAA" },
                { "type": "image", "image_url": "https://cdn.example.com/a.png" },
                { "type": "image", "url": "https://cdn.example.com/a.png?v=2" },
                { "type": "tool_call", "tool_name": "image_generation",
                  "output": [{ "url": "https://cdn.example.com/b.png" }] },
                { "type": "tool_call", "tool_name": "web_search", "output": "irrelevant" }
            ]
        }))
        .unwrap();

        let urls = extract_image_urls(&response, &sink, &[]).await;
        // generation result + a.png (query variants deduped) + b.png
        assert_eq!(urls.len(), 3);
        assert!(urls[0].contains("gen_0"));
        assert!(urls[1].contains("a.png"));
        assert!(urls[2].contains("b.png"));
    }
}
