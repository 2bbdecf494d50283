//! Image input pipeline: URL validation, problematic-host conversion,
//! download-to-data-URL, and deduplication.

use base64::Engine;
use std::collections::HashSet;
use std::time::Duration;

/// Hosts the provider cannot download from directly (auth tokens, access
/// restrictions). Images there are pre-downloaded and sent as base64.
const PROBLEMATIC_HOSTS: &[&str] = &["firebasestorage.googleapis.com"];

/// Hosts skipped entirely: neither the provider nor we can fetch them.
const HOSTILE_HOSTS: &[&str] = &["cdn.openai.com"];

/// Maximum accepted image size.
pub const MAX_IMAGE_BYTES: usize = 20 * 1024 * 1024;

/// Default timeout for image downloads.
pub const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp", "svg", "bmp", "ico"];

/// Whether a URL is a base64 data URL (`data:image/...;base64,...`).
pub fn is_base64_data_url(url: &str) -> bool {
    url.starts_with("data:image/") && url.contains(";base64,")
}

/// Whether a URL parses as http(s) with a host.
pub fn is_valid_http_url(url: &str) -> bool {
    match reqwest::Url::parse(url) {
        Ok(parsed) => {
            matches!(parsed.scheme(), "http" | "https") && parsed.host_str().is_some()
        }
        Err(_) => false,
    }
}

/// Best-effort check that a URL path looks like an image. Non-rejecting:
/// a missing extension only produces a warning at the call site.
pub fn looks_like_image_url(url: &str) -> bool {
    let path = reqwest::Url::parse(url)
        .map(|u| u.path().to_ascii_lowercase())
        .unwrap_or_else(|_| url.to_ascii_lowercase());
    IMAGE_EXTENSIONS.iter().any(|ext| path.ends_with(&format!(".{ext}")))
}

fn host_of(url: &str) -> Option<String> {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
}

/// Whether the provider is known to fail downloading from this host.
pub fn is_problematic_url(url: &str) -> bool {
    host_of(url)
        .map(|host| PROBLEMATIC_HOSTS.iter().any(|p| host.contains(p)))
        .unwrap_or(false)
}

/// Whether this host is skipped entirely.
pub fn is_hostile_url(url: &str) -> bool {
    HOSTILE_HOSTS.iter().any(|h| url.contains(h))
}

/// Validate an image URL for use as model input.
///
/// Data URLs are rejected at this layer: they should have been uploaded to
/// object storage already, and oversized or corrupted base64 payloads fail
/// the whole request.
pub fn validate_image_url(url: &str) -> Result<(), &'static str> {
    if url.is_empty() {
        return Err("URL is empty");
    }
    if is_base64_data_url(url) {
        return Err("base64 data URL (should be an object-store URL)");
    }
    if !is_valid_http_url(url) {
        return Err("not a valid HTTP/HTTPS URL");
    }
    if !looks_like_image_url(url) {
        tracing::warn!(url_preview = %preview(url), "URL does not have an image extension");
    }
    Ok(())
}

/// Filter a URL list down to valid image inputs, preserving order.
/// Returns `(valid, filtered_with_reasons)`.
pub fn validate_and_filter_image_urls(urls: &[String]) -> (Vec<String>, Vec<(String, String)>) {
    let mut valid = Vec::new();
    let mut filtered = Vec::new();
    for url in urls {
        match validate_image_url(url) {
            Ok(()) => valid.push(url.clone()),
            Err(reason) => {
                tracing::warn!(url_preview = %preview(url), reason, "filtered invalid image URL");
                filtered.push((url.clone(), reason.to_string()));
            }
        }
    }
    (valid, filtered)
}

/// Deduplicate image URLs, preserving first-occurrence order. URLs are
/// compared by scheme, host, and path so that re-signed copies of the same
/// object collapse to one entry.
pub fn deduplicate_image_urls(urls: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut result = Vec::new();
    for url in urls {
        let key = match reqwest::Url::parse(url) {
            Ok(parsed) => format!(
                "{}://{}{}",
                parsed.scheme(),
                parsed.host_str().unwrap_or(""),
                parsed.path()
            ),
            Err(_) => url.clone(),
        };
        if seen.insert(key) {
            result.push(url.clone());
        }
    }
    result
}

/// Validate raw bytes as an image by magic bytes and return the canonical
/// MIME type. PNG, JPEG, GIF, and WebP are supported.
pub fn validate_image_bytes(bytes: &[u8]) -> Result<&'static str, String> {
    if bytes.is_empty() {
        return Err("image bytes are empty".to_string());
    }
    if bytes.len() > MAX_IMAGE_BYTES {
        return Err(format!(
            "image size ({:.2}MB) exceeds maximum ({}MB)",
            bytes.len() as f64 / 1024.0 / 1024.0,
            MAX_IMAGE_BYTES / 1024 / 1024
        ));
    }

    if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
        Ok("image/png")
    } else if bytes.starts_with(b"\xff\xd8\xff") {
        Ok("image/jpeg")
    } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        Ok("image/gif")
    } else if bytes.starts_with(b"RIFF") && bytes.len() >= 12 && &bytes[8..12] == b"WEBP" {
        Ok("image/webp")
    } else {
        Err("bytes do not represent a supported image format".to_string())
    }
}

/// Strip trailing punctuation a URL regex may have dragged in from prose.
pub fn clean_image_url(url: &str) -> String {
    url.trim_end_matches(|c: char| matches!(c, '.' | ',' | ')' | ']' | '}' | '\'' | '"' | ';'))
        .to_string()
}

/// Download an image and convert it to a `data:<mime>;base64,` URL.
///
/// Returns `None` on any failure (timeout, HTTP error, empty body, invalid
/// image bytes); callers treat a missing result as "skip this image".
pub async fn download_image_as_data_url(http: &reqwest::Client, url: &str) -> Option<String> {
    if !is_valid_http_url(url) {
        tracing::error!(url_preview = %preview(url), "invalid URL for image download");
        return None;
    }

    let response = match http
        .get(url)
        .timeout(DOWNLOAD_TIMEOUT)
        .send()
        .await
        .and_then(|r| r.error_for_status())
    {
        Ok(r) => r,
        Err(e) => {
            tracing::error!(url_preview = %preview(url), error = %e, "failed to download image");
            return None;
        }
    };

    let bytes = match response.bytes().await {
        Ok(b) => b,
        Err(e) => {
            tracing::error!(url_preview = %preview(url), error = %e, "failed to read image body");
            return None;
        }
    };

    match validate_image_bytes(&bytes) {
        Ok(mime) => {
            let encoded = base64::engine::general_purpose::STANDARD.encode(&bytes);
            tracing::info!(
                url_preview = %preview(url),
                image_size_bytes = bytes.len(),
                mime,
                "downloaded and converted image to data URL"
            );
            Some(format!("data:{mime};base64,{encoded}"))
        }
        Err(reason) => {
            tracing::error!(url_preview = %preview(url), reason, "downloaded content is not a valid image");
            None
        }
    }
}

fn preview(url: &str) -> String {
    url.chars().take(100).collect()
}
