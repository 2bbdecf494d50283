//! Artifact records.

use serde::{Deserialize, Serialize};

/// An immutable blob written during execution or at finalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub artifact_id: String,
    pub tenant_id: String,
    pub job_id: String,
    /// Kind tag, e.g. `step_output`, `image`, `html_final`,
    /// `markdown_final`, `text_final`, `report_markdown`.
    pub kind: String,
    pub name: String,
    /// Storage-scheme URL (`storage://bucket/key`).
    pub blob_key: String,
    pub blob_url: String,
    /// CDN URL when configured, else a durable direct URL.
    pub public_url: String,
    #[serde(default)]
    pub is_public: bool,
    pub size: u64,
    pub mime: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl Artifact {
    pub fn is_image(&self) -> bool {
        self.mime.starts_with("image/")
    }

    pub fn is_html(&self) -> bool {
        self.mime == "text/html"
    }

    pub fn is_markdown(&self) -> bool {
        self.mime == "text/markdown"
    }
}

/// MIME type inferred from a filename extension.
pub fn mime_for_filename(filename: &str) -> &'static str {
    let ext = filename.rsplit('.').next().unwrap_or("");
    match ext.to_ascii_lowercase().as_str() {
        "html" => "text/html",
        "md" => "text/markdown",
        "txt" => "text/plain",
        "json" => "application/json",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        _ => "application/octet-stream",
    }
}
