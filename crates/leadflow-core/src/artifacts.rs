//! Artifact storage: text and image blobs plus their index rows.

use base64::Engine;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;

use crate::error::EngineError;
use crate::http::{HttpClient, HttpRequest};
use crate::store::{artifact_key, image_key, ObjectStore, RecordStore};
use leadflow_provider::images::validate_image_bytes;
use leadflow_workflow::{mime_for_filename, Artifact};

fn new_artifact_id() -> String {
    format!("art_{}", uuid::Uuid::new_v4().simple())
}

fn generated_image_filename(content_type: &str) -> String {
    let ext = if content_type.contains("jpeg") || content_type.contains("jpg") {
        "jpg"
    } else {
        "png"
    };
    format!(
        "image_{}_{}.{ext}",
        chrono::Utc::now().timestamp(),
        &uuid::Uuid::new_v4().simple().to_string()[..8]
    )
}

/// Stores artifacts in the object store and indexes them in the record
/// store. Image URLs already pointing into our bucket are indexed without
/// a re-download.
#[derive(Clone)]
pub struct ArtifactService {
    records: Arc<dyn RecordStore>,
    objects: Arc<dyn ObjectStore>,
    http: Arc<dyn HttpClient>,
    /// Base URL of the public API; enables the best-effort share hook.
    api_url: Option<String>,
    image_download_timeout: Duration,
}

impl ArtifactService {
    pub fn new(
        records: Arc<dyn RecordStore>,
        objects: Arc<dyn ObjectStore>,
        http: Arc<dyn HttpClient>,
        api_url: Option<String>,
        image_download_timeout: Duration,
    ) -> Self {
        Self {
            records,
            objects,
            http,
            api_url,
            image_download_timeout,
        }
    }

    /// Store text content as an artifact. Returns the artifact id.
    pub async fn store_artifact(
        &self,
        tenant_id: &str,
        job_id: &str,
        kind: &str,
        content: &str,
        filename: &str,
        public: bool,
    ) -> Result<String, EngineError> {
        let size = content.len() as u64;
        tracing::info!(
            tenant_id,
            job_id,
            artifact_kind = kind,
            artifact_filename = filename,
            content_size_bytes = size,
            "storing artifact"
        );

        let artifact_id = new_artifact_id();
        let key = artifact_key(tenant_id, job_id, filename);
        let mime = mime_for_filename(filename);
        let stored = self
            .objects
            .put(&key, Bytes::from(content.to_string()), mime, public)
            .await?;

        let artifact = Artifact {
            artifact_id: artifact_id.clone(),
            tenant_id: tenant_id.to_string(),
            job_id: job_id.to_string(),
            kind: kind.to_string(),
            name: filename.to_string(),
            blob_key: key,
            blob_url: stored.blob_url,
            public_url: stored.public_url,
            is_public: public,
            size,
            mime: mime.to_string(),
            created_at: chrono::Utc::now(),
        };
        self.records.put_artifact(&artifact).await?;

        self.share_artifact(&artifact_id, job_id, tenant_id).await;
        Ok(artifact_id)
    }

    /// Store an image artifact from a URL.
    ///
    /// URLs already pointing into our bucket (direct, CDN, or presigned)
    /// skip the download and reuse the URL; external URLs are downloaded,
    /// validated, and re-uploaded under the job prefix.
    pub async fn store_image_artifact(
        &self,
        tenant_id: &str,
        job_id: &str,
        image_url: &str,
        filename: Option<String>,
    ) -> Result<String, EngineError> {
        let (key, public_url, size, mime, name) = match self.objects.key_for_url(image_url) {
            Some(existing_key) => {
                let name = filename.unwrap_or_else(|| {
                    existing_key
                        .rsplit('/')
                        .next()
                        .unwrap_or("image.png")
                        .to_string()
                });
                let mime = mime_for_filename(&name).to_string();
                (existing_key, image_url.to_string(), 0u64, mime, name)
            }
            None => {
                tracing::info!(
                    tenant_id,
                    job_id,
                    image_url_preview = %image_url.chars().take(80).collect::<String>(),
                    "downloading image from external URL"
                );
                let bytes = self.download_image(image_url).await?;
                let mime = validate_image_bytes(&bytes)
                    .map_err(|reason| {
                        EngineError::StepExecution {
                            step: "image_artifact".to_string(),
                            message: format!("downloaded content is not a valid image: {reason}"),
                        }
                    })?
                    .to_string();

                let name = filename
                    .or_else(|| filename_from_url(image_url))
                    .unwrap_or_else(|| generated_image_filename(&mime));
                let key = artifact_key(tenant_id, job_id, &name);
                let size = bytes.len() as u64;
                let stored = self.objects.put(&key, bytes, &mime, true).await?;
                (key, stored.public_url, size, mime, name)
            }
        };

        let artifact_id = new_artifact_id();
        let artifact = Artifact {
            artifact_id: artifact_id.clone(),
            tenant_id: tenant_id.to_string(),
            job_id: job_id.to_string(),
            kind: "image".to_string(),
            name,
            blob_url: self.objects.blob_url(&key),
            blob_key: key,
            public_url,
            is_public: true,
            size,
            mime,
            created_at: chrono::Utc::now(),
        };
        self.records.put_artifact(&artifact).await?;

        self.share_artifact(&artifact_id, job_id, tenant_id).await;
        Ok(artifact_id)
    }

    /// Upload a base64 image under the job's image prefix and return its
    /// public URL. No artifact row is written; callers index images they
    /// want surfaced.
    pub async fn store_base64_image(
        &self,
        tenant_id: &str,
        job_id: &str,
        image_b64: &str,
        content_type: &str,
        filename: Option<String>,
    ) -> Result<String, EngineError> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(image_b64.trim())
            .map_err(|e| EngineError::Internal(format!("invalid base64 image data: {e}")))?;

        let name = filename.unwrap_or_else(|| generated_image_filename(content_type));
        let key = image_key(tenant_id, job_id, &name);
        let stored = self
            .objects
            .put(&key, Bytes::from(bytes), content_type, true)
            .await?;
        Ok(stored.public_url)
    }

    /// Public URL of an artifact; errors when the artifact is missing or
    /// carries no URL.
    pub async fn get_public_url(&self, artifact_id: &str) -> Result<String, EngineError> {
        let artifact = self
            .records
            .get_artifact(artifact_id)
            .await?
            .ok_or_else(|| EngineError::RecordNotFound(format!("artifact {artifact_id}")))?;
        if artifact.public_url.is_empty() {
            return Err(EngineError::RecordNotFound(format!(
                "artifact {artifact_id} has no public_url"
            )));
        }
        Ok(artifact.public_url)
    }

    async fn download_image(&self, url: &str) -> Result<Bytes, EngineError> {
        let request = HttpRequest {
            method: "GET".to_string(),
            url: url.to_string(),
            headers: Vec::new(),
            body: None,
            raw_body: None,
            timeout: self.image_download_timeout,
        };
        let response = self.http.send(request).await?;
        if !response.is_success() {
            return Err(EngineError::Http(format!(
                "image download failed with status {}",
                response.status
            )));
        }
        Ok(response.bytes)
    }

    /// Best-effort hook letting shared workflows see the new artifact.
    async fn share_artifact(&self, artifact_id: &str, job_id: &str, tenant_id: &str) {
        let Some(api_url) = &self.api_url else {
            return;
        };
        let request = HttpRequest::post_json(
            format!("{api_url}/internal/workflow-sharing/share-artifact"),
            serde_json::json!({
                "artifact_id": artifact_id,
                "job_id": job_id,
                "tenant_id": tenant_id,
            }),
            Duration::from_secs(5),
        );
        if let Err(e) = self.http.send(request).await {
            tracing::warn!(artifact_id, job_id, error = %e, "failed to share artifact with shared workflows");
        }
    }
}

fn filename_from_url(url: &str) -> Option<String> {
    let parsed = reqwest::Url::parse(url).ok()?;
    let name = parsed.path_segments()?.last()?.to_string();
    (!name.is_empty() && name.contains('.')).then_some(name)
}

/// [`leadflow_provider::ImageSink`] bound to one job, backing generated
/// images and screenshots.
pub struct JobImageSink {
    pub artifacts: ArtifactService,
    pub tenant_id: String,
    pub job_id: String,
}

#[async_trait::async_trait]
impl leadflow_provider::ImageSink for JobImageSink {
    async fn store_base64_image(
        &self,
        image_b64: &str,
        content_type: &str,
        filename: Option<String>,
    ) -> Result<String, leadflow_provider::ProviderError> {
        self.artifacts
            .store_base64_image(&self.tenant_id, &self.job_id, image_b64, content_type, filename)
            .await
            .map_err(|e| leadflow_provider::ProviderError::ImageUpload(e.to_string()))
    }
}
