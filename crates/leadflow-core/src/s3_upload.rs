//! S3-upload step: publish step output to an external bucket.
//!
//! The destination comes from an explicit `output_config` when present,
//! else from a best-effort parse of the step instructions, constrained by
//! a bucket allow-list and a placeholder denylist.

use rand::Rng;
use regex::Regex;
use std::sync::OnceLock;

use crate::config::RuntimeConfig;
use crate::error::EngineError;
use async_trait::async_trait;
use bytes::Bytes;
use leadflow_workflow::{OutputConfig, OutputSourceType, WorkflowStep};

/// Bucket names that are placeholders, never real destinations.
const PLACEHOLDER_BUCKETS: &[&str] = &[
    "bucket",
    "my-bucket",
    "your-bucket",
    "example-bucket",
    "test-bucket",
];

const STOP_WORDS: &[&str] = &[
    "not", "is", "in", "to", "for", "with", "on", "at", "by", "from", "of", "and", "or", "but",
    "the", "a", "an", "bucket",
];

/// Write access to external buckets. The production implementation lives
/// outside the core; tests use an in-memory bucket.
#[async_trait]
pub trait BucketWriter: Send + Sync {
    async fn exists(&self, bucket: &str, key: &str) -> Result<bool, EngineError>;
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        bytes: Bytes,
        content_type: &str,
    ) -> Result<(), EngineError>;
}

/// Destination resolved for one step.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedOutputConfig {
    pub source_type: OutputSourceType,
    pub source_path: Option<String>,
    pub destination_path: Option<String>,
    pub content_type: Option<String>,
    pub bucket: String,
    pub region: String,
    /// Whether the step carried an explicit config (vs instruction parse).
    pub explicit: bool,
}

/// Result of a publish.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PublishResult {
    pub bucket: String,
    pub key: String,
    pub url: String,
    pub size: u64,
}

fn bucket_name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"s3://([a-z0-9][a-z0-9.-]{1,61}[a-z0-9])").expect("valid regex"))
}

fn bucket_word_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\bbucket\s+([a-z0-9][a-z0-9.-]{1,61}[a-z0-9])\b").expect("valid regex")
    })
}

fn bucket_suffix_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b([a-z0-9][a-z0-9.-]{1,61}[a-z0-9])\s+s3\s+bucket\b").expect("valid regex")
    })
}

fn region_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b([a-z]{2}-[a-z0-9-]+-\d)\b").expect("valid regex"))
}

fn region_phrase_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(us)\s+(east|west)\s+(\d)\b").expect("valid regex"))
}

fn is_placeholder(bucket: &str) -> bool {
    PLACEHOLDER_BUCKETS.contains(&bucket.to_ascii_lowercase().as_str())
}

/// Best-effort parse of an upload target from step instructions.
///
/// Requires an upload-shaped verb near "s3", accepts `s3://name`,
/// "bucket name", and "name s3 bucket" phrasings, and rejects placeholder
/// names.
pub fn parse_upload_target(instructions: &str, default_region: &str) -> Option<(String, String)> {
    let lower = instructions.to_lowercase();
    if !lower.contains("s3") {
        return None;
    }
    if !["upload", "write", "save", "put", "copy"]
        .iter()
        .any(|verb| lower.contains(verb))
    {
        return None;
    }

    let mut bucket = bucket_name_regex()
        .captures(&lower)
        .map(|c| c[1].to_string())
        .filter(|b| !is_placeholder(b));

    if bucket.is_none() {
        bucket = bucket_word_regex()
            .captures(&lower)
            .map(|c| c[1].to_string())
            .filter(|b| !STOP_WORDS.contains(&b.as_str()) && !is_placeholder(b));
    }
    if bucket.is_none() {
        bucket = bucket_suffix_regex()
            .captures(&lower)
            .map(|c| c[1].to_string())
            .filter(|b| !STOP_WORDS.contains(&b.as_str()) && !is_placeholder(b));
    }
    let bucket = bucket?;

    let region = region_regex()
        .captures(&lower)
        .map(|c| c[1].to_string())
        .or_else(|| {
            region_phrase_regex()
                .captures(&lower)
                .map(|c| format!("{}-{}-{}", &c[1], &c[2], &c[3]))
        })
        .unwrap_or_else(|| default_region.to_string());

    Some((bucket, region))
}

/// Resolve a step's upload destination: explicit config first, then the
/// instruction heuristics.
pub fn resolve_output_config(
    step: &WorkflowStep,
    config: &RuntimeConfig,
) -> Option<ResolvedOutputConfig> {
    if let Some(output_config) = &step.output_config {
        if output_config.storage_provider.as_deref() != Some("s3") {
            return None;
        }
        // Explicit configs land in the first allowed bucket; with no
        // allow-list configured there is nowhere to publish.
        let Some(bucket) = config.allowed_upload_buckets.first().cloned() else {
            tracing::warn!(
                step_name = %step.step_name,
                "output_config requests an s3 upload but no buckets are allowed"
            );
            return None;
        };
        return Some(ResolvedOutputConfig {
            source_type: output_config.source_type,
            source_path: output_config.source_path.clone(),
            destination_path: output_config.destination_path.clone(),
            content_type: output_config.content_type.clone(),
            bucket,
            region: config.default_region.clone(),
            explicit: true,
        });
    }

    let (bucket, region) = parse_upload_target(&step.instructions, &config.default_region)?;
    Some(ResolvedOutputConfig {
        source_type: OutputSourceType::TextContent,
        source_path: None,
        destination_path: None,
        content_type: None,
        bucket,
        region,
        explicit: false,
    })
}

/// Context block appended to LLM instructions when a step's output will
/// be published; keeps the model from attempting the upload itself.
pub fn inject_upload_context(current_context: &str, resolved: &ResolvedOutputConfig) -> String {
    let block = if resolved.source_type == OutputSourceType::File {
        let path = resolved.source_path.as_deref().unwrap_or("/work/output.bin");
        format!(
            "=== Output Requirement ===\n\
             You must generate a file at: {path}\n\
             The system will automatically upload this file to storage after you complete the step.\n\
             Do NOT run any upload commands (like curl or aws s3 cp) yourself.\n\
             Just ensure the file exists at that path before finishing."
        )
    } else {
        format!(
            "=== S3 Upload Note ===\n\
             The system will automatically upload your final text output to S3 bucket '{}'.\n\
             Please output ONLY the content you want uploaded (e.g. the HTML code).",
            resolved.bucket
        )
    };
    if current_context.is_empty() {
        block
    } else {
        format!("{current_context}\n\n{block}")
    }
}

/// Sanitize a filename into a safe S3 key component.
pub fn sanitize_key_filename(filename: &str) -> String {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"[^A-Za-z0-9._-]+").expect("valid regex"));
    let safe = re.replace_all(filename.trim(), "_").into_owned();
    let safe = safe.trim_matches('_').to_string();
    if safe.is_empty() {
        "artifact.bin".to_string()
    } else {
        safe
    }
}

fn append_random_suffix(key: &str) -> String {
    let suffix: String = {
        let mut rng = rand::thread_rng();
        (0..8)
            .map(|_| {
                let c: u8 = rng.gen_range(0..16);
                char::from_digit(c as u32, 16).unwrap_or('0')
            })
            .collect()
    };
    let (prefix, filename) = match key.rsplit_once('/') {
        Some((prefix, filename)) => (format!("{prefix}/"), filename.to_string()),
        None => (String::new(), key.to_string()),
    };
    match filename.rsplit_once('.') {
        Some((base, ext)) => format!("{prefix}{base}_{suffix}.{ext}"),
        None => format!("{prefix}{filename}_{suffix}"),
    }
}

fn infer_content_type(resolved: &ResolvedOutputConfig, dest_key: &str) -> String {
    if let Some(content_type) = &resolved.content_type {
        let lower = content_type.to_lowercase();
        if lower.starts_with("text/") && !lower.contains("charset=") {
            return format!("{content_type}; charset=utf-8");
        }
        return content_type.clone();
    }
    let guessed = leadflow_workflow::mime_for_filename(dest_key);
    let guessed = if guessed == "application/octet-stream"
        && resolved.source_type == OutputSourceType::TextContent
    {
        "text/plain"
    } else {
        guessed
    };
    if guessed.starts_with("text/") {
        format!("{guessed}; charset=utf-8")
    } else {
        guessed.to_string()
    }
}

/// Publishes step content to an external bucket.
pub struct OutputPublisher<'a> {
    pub writer: &'a dyn BucketWriter,
    pub config: &'a RuntimeConfig,
}

impl<'a> OutputPublisher<'a> {
    fn key_prefix(&self, tenant_id: &str, job_id: &str) -> Result<String, EngineError> {
        let mut prefix = self
            .config
            .upload_key_prefix
            .clone()
            .unwrap_or_else(|| format!("leadmagnet/{tenant_id}/{job_id}/"));
        prefix = prefix.trim_start_matches('/').to_string();
        if prefix.contains("..") {
            return Err(EngineError::UploadRejected(
                "invalid upload key prefix (must not contain '..')".to_string(),
            ));
        }
        if !prefix.is_empty() && !prefix.ends_with('/') {
            prefix.push('/');
        }
        Ok(prefix)
    }

    /// Publish content for a step. Collisions get an 8-hex random suffix;
    /// any upload error is retried once with a fresh suffix.
    pub async fn publish(
        &self,
        resolved: &ResolvedOutputConfig,
        tenant_id: &str,
        job_id: &str,
        step_name: &str,
        content: &str,
    ) -> Result<PublishResult, EngineError> {
        if !self.config.allowed_upload_buckets.contains(&resolved.bucket) {
            return Err(EngineError::UploadRejected(format!(
                "bucket '{}' is not in the allowed upload list",
                resolved.bucket
            )));
        }

        let filename = resolved
            .destination_path
            .as_deref()
            .map(sanitize_key_filename)
            .unwrap_or_else(|| format!("{}.html", sanitize_key_filename(step_name)));
        let mut key = format!("{}{filename}", self.key_prefix(tenant_id, job_id)?);

        if self.writer.exists(&resolved.bucket, &key).await? {
            let suffixed = append_random_suffix(&key);
            tracing::info!(bucket = %resolved.bucket, key, suffixed, "destination exists, adding suffix");
            key = suffixed;
        }

        let content_type = infer_content_type(resolved, &key);
        let bytes = Bytes::from(content.to_string());
        let size = bytes.len() as u64;

        if let Err(first_error) = self
            .writer
            .put(&resolved.bucket, &key, bytes.clone(), &content_type)
            .await
        {
            let retry_key = append_random_suffix(&key);
            tracing::warn!(
                bucket = %resolved.bucket,
                key,
                retry_key,
                error = %first_error,
                "upload failed, retrying with a fresh suffix"
            );
            self.writer
                .put(&resolved.bucket, &retry_key, bytes, &content_type)
                .await?;
            key = retry_key;
        }

        let url = format!(
            "https://{}.s3.{}.amazonaws.com/{}",
            resolved.bucket, resolved.region, key
        );
        Ok(PublishResult {
            bucket: resolved.bucket.clone(),
            key,
            url,
            size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use leadflow_workflow::StepKind;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[test]
    fn instruction_heuristics_accept_real_buckets() {
        let (bucket, region) =
            parse_upload_target("Upload the page to s3://leadflow-pages in us-west-2", "us-east-1")
                .unwrap();
        assert_eq!(bucket, "leadflow-pages");
        assert_eq!(region, "us-west-2");

        let (bucket, region) =
            parse_upload_target("write an html file to the leadflow-pages s3 bucket us west 2", "us-east-1")
                .unwrap();
        assert_eq!(bucket, "leadflow-pages");
        assert_eq!(region, "us-west-2");
    }

    #[test]
    fn placeholders_and_non_upload_text_are_rejected() {
        assert!(parse_upload_target("upload to s3://my-bucket", "us-east-1").is_none());
        assert!(parse_upload_target("upload to s3://example-bucket", "us-east-1").is_none());
        assert!(parse_upload_target("talk about s3 architecture", "us-east-1").is_none());
        assert!(parse_upload_target("upload the file somewhere", "us-east-1").is_none());
    }

    #[test]
    fn filename_sanitization() {
        assert_eq!(sanitize_key_filename("My Report (final).html"), "My_Report_final_.html");
        assert_eq!(sanitize_key_filename("  "), "artifact.bin");
        assert_eq!(sanitize_key_filename("ok-name_1.txt"), "ok-name_1.txt");
    }

    #[test]
    fn random_suffix_preserves_extension() {
        let suffixed = append_random_suffix("pages/report.html");
        assert!(suffixed.starts_with("pages/report_"));
        assert!(suffixed.ends_with(".html"));
        assert_ne!(suffixed, append_random_suffix("pages/report.html"));
    }

    fn allowing(bucket: &str) -> RuntimeConfig {
        let mut config = RuntimeConfig::default();
        config.allowed_upload_buckets = vec![bucket.to_string()];
        config
    }

    #[test]
    fn explicit_config_takes_precedence() {
        let mut step = WorkflowStep::new("Publish", 0, StepKind::S3Upload);
        step.instructions = "upload to s3://other-bucket".to_string();
        step.output_config = Some(OutputConfig {
            storage_provider: Some("s3".to_string()),
            source_type: OutputSourceType::TextContent,
            destination_path: Some("landing.html".to_string()),
            ..Default::default()
        });
        let resolved = resolve_output_config(&step, &allowing("leadflow-pages")).unwrap();
        assert!(resolved.explicit);
        assert_eq!(resolved.bucket, "leadflow-pages");
        assert_eq!(resolved.destination_path.as_deref(), Some("landing.html"));
    }

    #[test]
    fn explicit_config_needs_an_allowed_bucket() {
        let mut step = WorkflowStep::new("Publish", 0, StepKind::S3Upload);
        step.output_config = Some(OutputConfig {
            storage_provider: Some("s3".to_string()),
            ..Default::default()
        });
        // The default allow-list is empty, so there is nowhere to publish.
        assert!(resolve_output_config(&step, &RuntimeConfig::default()).is_none());
    }

    struct MemoryBucket {
        objects: Mutex<HashMap<String, Vec<u8>>>,
        fail_next_put: Mutex<bool>,
    }

    impl MemoryBucket {
        fn new() -> Self {
            Self {
                objects: Mutex::new(HashMap::new()),
                fail_next_put: Mutex::new(false),
            }
        }
    }

    #[async_trait]
    impl BucketWriter for MemoryBucket {
        async fn exists(&self, bucket: &str, key: &str) -> Result<bool, EngineError> {
            Ok(self
                .objects
                .lock()
                .unwrap()
                .contains_key(&format!("{bucket}/{key}")))
        }

        async fn put(
            &self,
            bucket: &str,
            key: &str,
            bytes: Bytes,
            _content_type: &str,
        ) -> Result<(), EngineError> {
            let mut fail = self.fail_next_put.lock().unwrap();
            if *fail {
                *fail = false;
                return Err(EngineError::Storage("simulated upload failure".to_string()));
            }
            self.objects
                .lock()
                .unwrap()
                .insert(format!("{bucket}/{key}"), bytes.to_vec());
            Ok(())
        }
    }

    fn resolved() -> ResolvedOutputConfig {
        ResolvedOutputConfig {
            source_type: OutputSourceType::TextContent,
            source_path: None,
            destination_path: Some("landing.html".to_string()),
            content_type: None,
            bucket: "leadflow-pages".to_string(),
            region: "us-east-1".to_string(),
            explicit: true,
        }
    }

    #[tokio::test]
    async fn publish_uses_tenant_job_prefix() {
        let bucket = MemoryBucket::new();
        let config = allowing("leadflow-pages");
        let publisher = OutputPublisher {
            writer: &bucket,
            config: &config,
        };
        let result = publisher
            .publish(&resolved(), "t1", "j1", "Publish", "<html></html>")
            .await
            .unwrap();
        assert_eq!(result.key, "leadmagnet/t1/j1/landing.html");
        assert!(result.url.contains("leadflow-pages.s3.us-east-1.amazonaws.com"));
    }

    #[tokio::test]
    async fn collision_appends_suffix() {
        let bucket = MemoryBucket::new();
        let config = allowing("leadflow-pages");
        let publisher = OutputPublisher {
            writer: &bucket,
            config: &config,
        };
        let first = publisher
            .publish(&resolved(), "t1", "j1", "Publish", "one")
            .await
            .unwrap();
        let second = publisher
            .publish(&resolved(), "t1", "j1", "Publish", "two")
            .await
            .unwrap();
        assert_ne!(first.key, second.key);
        assert!(second.key.starts_with("leadmagnet/t1/j1/landing_"));
        assert!(second.key.ends_with(".html"));
    }

    #[tokio::test]
    async fn upload_error_retries_with_fresh_suffix() {
        let bucket = MemoryBucket::new();
        *bucket.fail_next_put.lock().unwrap() = true;
        let config = allowing("leadflow-pages");
        let publisher = OutputPublisher {
            writer: &bucket,
            config: &config,
        };
        let result = publisher
            .publish(&resolved(), "t1", "j1", "Publish", "content")
            .await
            .unwrap();
        assert!(result.key.starts_with("leadmagnet/t1/j1/landing_"));
    }

    #[tokio::test]
    async fn disallowed_bucket_is_rejected() {
        let bucket = MemoryBucket::new();
        let config = allowing("leadflow-pages");
        let publisher = OutputPublisher {
            writer: &bucket,
            config: &config,
        };
        let mut target = resolved();
        target.bucket = "random-bucket".to_string();
        let error = publisher
            .publish(&target, "t1", "j1", "Publish", "content")
            .await
            .unwrap_err();
        assert!(matches!(error, EngineError::UploadRejected(_)));
    }
}
