//! Object store trait and the in-memory backend.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::EngineError;

/// Result of storing a blob.
#[derive(Debug, Clone)]
pub struct StoredObject {
    /// Storage-scheme URL (`storage://bucket/key`).
    pub blob_url: String,
    /// CDN URL when configured, else a durable direct URL.
    pub public_url: String,
}

/// Blob storage for artifacts, screenshots, and execution traces.
///
/// Key layout: `{tenant}/jobs/{job}/{filename}` for artifacts,
/// `jobs/{job}/execution_steps.json` for traces, and
/// `{tenant}/jobs/{job}/images/...` for screenshots.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(
        &self,
        key: &str,
        bytes: Bytes,
        content_type: &str,
        public: bool,
    ) -> Result<StoredObject, EngineError>;

    async fn get(&self, key: &str) -> Result<Bytes, EngineError>;

    fn bucket(&self) -> &str;

    /// CDN domain preferred for public URLs.
    fn cdn_domain(&self) -> Option<&str>;

    /// Endpoint used for direct URLs (`https://{bucket}.{endpoint}/{key}`).
    fn endpoint(&self) -> &str;

    fn blob_url(&self, key: &str) -> String {
        format!("storage://{}/{}", self.bucket(), key)
    }

    fn public_url(&self, key: &str) -> String {
        match self.cdn_domain() {
            Some(domain) => format!("https://{domain}/{key}"),
            None => format!("https://{}.{}/{}", self.bucket(), self.endpoint(), key),
        }
    }

    /// Whether a URL points into this store (direct, CDN, or presigned),
    /// and if so the key it refers to.
    fn key_for_url(&self, url: &str) -> Option<String> {
        let direct_marker = format!("{}.{}/", self.bucket(), self.endpoint());
        if let Some(rest) = url.split(&direct_marker).nth(1) {
            return Some(rest.split('?').next().unwrap_or(rest).to_string());
        }
        if let Some(domain) = self.cdn_domain() {
            let marker = format!("{domain}/");
            if url.contains(domain) {
                if let Some(rest) = url.split(&marker).nth(1) {
                    return Some(rest.split('?').next().unwrap_or(rest).to_string());
                }
            }
        }
        // Legacy presigned form: bucket.s3.amazonaws.com/key?...
        let presigned_marker = format!("{}.s3.amazonaws.com/", self.bucket());
        if let Some(rest) = url.split(&presigned_marker).nth(1) {
            return Some(rest.split('?').next().unwrap_or(rest).to_string());
        }
        None
    }
}

/// Blob key for a job's execution trace.
pub fn trace_key(job_id: &str) -> String {
    format!("jobs/{job_id}/execution_steps.json")
}

/// Blob key for a job-scoped artifact.
pub fn artifact_key(tenant_id: &str, job_id: &str, filename: &str) -> String {
    format!("{tenant_id}/jobs/{job_id}/{filename}")
}

/// Blob key for a job-scoped image (screenshots, generated images).
pub fn image_key(tenant_id: &str, job_id: &str, filename: &str) -> String {
    format!("{tenant_id}/jobs/{job_id}/images/{filename}")
}

/// In-memory object store (for testing and development).
pub struct MemoryObjectStore {
    bucket: String,
    endpoint: String,
    cdn_domain: Option<String>,
    objects: Arc<RwLock<HashMap<String, (Bytes, String)>>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self {
            bucket: "leadflow-artifacts".to_string(),
            endpoint: "s3.us-east-1.amazonaws.com".to_string(),
            cdn_domain: None,
            objects: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn with_cdn(mut self, domain: impl Into<String>) -> Self {
        self.cdn_domain = Some(domain.into());
        self
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.objects.read().await.contains_key(key)
    }

    pub async fn object_count(&self) -> usize {
        self.objects.read().await.len()
    }
}

impl Default for MemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(
        &self,
        key: &str,
        bytes: Bytes,
        content_type: &str,
        _public: bool,
    ) -> Result<StoredObject, EngineError> {
        self.objects
            .write()
            .await
            .insert(key.to_string(), (bytes, content_type.to_string()));
        Ok(StoredObject {
            blob_url: self.blob_url(key),
            public_url: self.public_url(key),
        })
    }

    async fn get(&self, key: &str) -> Result<Bytes, EngineError> {
        self.objects
            .read()
            .await
            .get(key)
            .map(|(bytes, _)| bytes.clone())
            .ok_or_else(|| EngineError::Storage(format!("object not found: {key}")))
    }

    fn bucket(&self) -> &str {
        &self.bucket
    }

    fn cdn_domain(&self) -> Option<&str> {
        self.cdn_domain.as_deref()
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn public_url_prefers_cdn() {
        let plain = MemoryObjectStore::new();
        assert_eq!(
            plain.public_url("t1/jobs/j1/final.html"),
            "https://leadflow-artifacts.s3.us-east-1.amazonaws.com/t1/jobs/j1/final.html"
        );

        let with_cdn = MemoryObjectStore::new().with_cdn("cdn.example.com");
        assert_eq!(
            with_cdn.public_url("t1/jobs/j1/final.html"),
            "https://cdn.example.com/t1/jobs/j1/final.html"
        );
    }

    #[tokio::test]
    async fn key_for_url_detects_in_bucket_urls() {
        let store = MemoryObjectStore::new().with_cdn("cdn.example.com");
        assert_eq!(
            store.key_for_url("https://cdn.example.com/t1/jobs/j1/a.png?sig=1"),
            Some("t1/jobs/j1/a.png".to_string())
        );
        assert_eq!(
            store.key_for_url(
                "https://leadflow-artifacts.s3.us-east-1.amazonaws.com/t1/jobs/j1/a.png"
            ),
            Some("t1/jobs/j1/a.png".to_string())
        );
        assert_eq!(store.key_for_url("https://elsewhere.com/a.png"), None);
    }

    #[test]
    fn key_layout() {
        assert_eq!(trace_key("j1"), "jobs/j1/execution_steps.json");
        assert_eq!(artifact_key("t1", "j1", "final.html"), "t1/jobs/j1/final.html");
        assert_eq!(image_key("t1", "j1", "shot.png"), "t1/jobs/j1/images/shot.png");
    }
}
