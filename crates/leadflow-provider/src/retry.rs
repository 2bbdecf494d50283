//! Recovery from provider-side image-download failures.
//!
//! When the provider rejects a request because it could not download an
//! input image, the offending URL is parsed out of the error message, the
//! image is re-fetched locally and substituted as base64, and the call is
//! retried. Images that cannot be fetched are removed. Bounded attempts;
//! any non-URL error terminates the loop immediately.

use regex::Regex;
use std::sync::OnceLock;

use crate::client::ModelProvider;
use crate::error::ProviderError;
use crate::images::{clean_image_url, download_image_as_data_url};
use crate::request::{ContentItem, InputItem, RequestInput, ResponseRequest};
use crate::response::ProviderResponse;

/// Maximum recovery attempts before the original error surfaces.
pub const MAX_IMAGE_RETRIES: u32 = 10;

fn download_url_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)downloading\s+(https?://[^\s<>"{}|\\^`\[\]]+)"#).expect("valid regex")
    })
}

fn image_url_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"(?i)https?://[^\s<>"{}|\\^`\[\]]+\.(?:png|jpg|jpeg|gif|webp|svg|bmp|ico)(?:\?[^\s<>"{}|\\^`\[\]]*)?"#,
        )
        .expect("valid regex")
    })
}

/// Extract the failed image URL from a provider error. Three strategies:
/// the URL after "downloading", any image-extension URL in the message,
/// then the `param`/`url` field of the error body.
pub fn extract_failed_url(error: &ProviderError) -> Option<String> {
    let ProviderError::BadRequest { message, param, .. } = error else {
        return None;
    };

    if let Some(captures) = download_url_regex().captures(message) {
        return Some(clean_image_url(&captures[1]));
    }
    if let Some(found) = image_url_regex().find(message) {
        return Some(clean_image_url(found.as_str()));
    }
    param
        .as_deref()
        .filter(|p| p.starts_with("http"))
        .map(clean_image_url)
}

fn input_images(request: &ResponseRequest) -> Vec<String> {
    let RequestInput::Items(items) = &request.input else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match item {
            InputItem::Message(message) => Some(message),
            _ => None,
        })
        .flat_map(|message| message.content.iter())
        .filter_map(|content| match content {
            ContentItem::InputImage { image_url } => Some(image_url.clone()),
            _ => None,
        })
        .collect()
}

fn urls_match(a: &str, b: &str) -> bool {
    a.contains(b) || b.contains(a)
}

/// Replace the failed URL with `replacement` (or remove it when `None`)
/// across the request's message content. Returns whether anything changed.
fn substitute_or_remove(request: &mut ResponseRequest, failed_url: &str, replacement: Option<String>) -> bool {
    let RequestInput::Items(items) = &mut request.input else {
        return false;
    };
    let mut changed = false;
    for item in items.iter_mut() {
        let InputItem::Message(message) = item else { continue };
        let mut content = Vec::with_capacity(message.content.len());
        for segment in message.content.drain(..) {
            match segment {
                ContentItem::InputImage { image_url } if urls_match(&image_url, failed_url) => {
                    changed = true;
                    if let Some(replacement) = &replacement {
                        content.push(ContentItem::InputImage {
                            image_url: replacement.clone(),
                        });
                    }
                }
                other => content.push(other),
            }
        }
        message.content = content;
    }
    changed
}

/// Convert every remaining non-data image URL in the request to base64,
/// removing the ones that fail to download. Fallback when the error did
/// not name a specific URL.
async fn convert_all_remaining(request: &mut ResponseRequest, http: &reqwest::Client) {
    let RequestInput::Items(items) = &mut request.input else {
        return;
    };
    for item in items.iter_mut() {
        let InputItem::Message(message) = item else { continue };
        let mut content = Vec::with_capacity(message.content.len());
        for segment in std::mem::take(&mut message.content) {
            match segment {
                ContentItem::InputImage { image_url } if !image_url.starts_with("data:") => {
                    match download_image_as_data_url(http, &image_url).await {
                        Some(data_url) => content.push(ContentItem::InputImage {
                            image_url: data_url,
                        }),
                        None => {
                            tracing::warn!(
                                url_preview = %image_url.chars().take(100).collect::<String>(),
                                "failed to convert image URL, removing it"
                            );
                        }
                    }
                }
                other => content.push(other),
            }
        }
        message.content = content;
    }
}

/// Recover from an image-download failure and retry the call.
///
/// Returns the first successful response, or the original error when the
/// error is not image-related, the request carries no images, or retries
/// are exhausted.
pub async fn recover_image_download_error(
    provider: &dyn ModelProvider,
    http: &reqwest::Client,
    error: ProviderError,
    request: &ResponseRequest,
) -> Result<ProviderResponse, ProviderError> {
    if !error.is_image_download_error() {
        return Err(error);
    }

    let mut current = request.clone();
    let mut failed_url = extract_failed_url(&error);
    let mut attempts = 0u32;

    while attempts < MAX_IMAGE_RETRIES {
        attempts += 1;
        if input_images(&current).is_empty() {
            break;
        }

        match &failed_url {
            Some(url) => {
                tracing::warn!(
                    failed_image_url = %url,
                    retry_attempt = attempts,
                    "image download failed, attempting to fix"
                );
                let data_url = download_image_as_data_url(http, url).await;
                if data_url.is_some() {
                    substitute_or_remove(&mut current, url, data_url);
                } else {
                    tracing::warn!(failed_image_url = %url, "failed to download/convert image, removing it");
                    substitute_or_remove(&mut current, url, None);
                }
            }
            None => {
                tracing::warn!(
                    retry_attempt = attempts,
                    "image download error without a specific URL, converting all images to base64"
                );
                convert_all_remaining(&mut current, http).await;
            }
        }

        match provider.create(&current).await {
            Ok(response) => return Ok(response),
            Err(retry_error) if retry_error.is_image_download_error() => {
                failed_url = extract_failed_url(&retry_error);
            }
            Err(other) => return Err(other),
        }
    }

    tracing::error!(retry_count = attempts, "exceeded maximum retries for image URL errors");
    Err(error)
}
