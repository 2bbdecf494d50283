//! Runtime configuration and the environment snapshot.

use std::time::Duration;

/// How the shell executor decides which workspace files to publish after a
/// batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShellUploadMode {
    /// Upload only files declared in the workspace manifest.
    #[default]
    Manifest,
    /// Upload the `dist/` subtree.
    Dist,
    /// Upload the `build/` subtree.
    Build,
    /// Upload everything in the workspace.
    All,
}

impl ShellUploadMode {
    pub fn from_str(s: &str) -> Self {
        match s {
            "dist" => ShellUploadMode::Dist,
            "build" => ShellUploadMode::Build,
            "all" => ShellUploadMode::All,
            _ => ShellUploadMode::Manifest,
        }
    }
}

/// Computer-use driver provisioning knobs.
#[derive(Debug, Clone, Default)]
pub struct CuaDriverConfig {
    pub container_name: Option<String>,
    pub vnc_display: Option<String>,
    pub auto_start: bool,
    pub stop_on_cleanup: bool,
}

/// Runtime configuration for the execution engine.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Bound on concurrent steps within a parallel group.
    pub max_parallel_steps: usize,
    /// Computer-use loop bounds.
    pub cua_max_iterations: u32,
    pub cua_max_duration: Duration,
    /// Shell loop bounds.
    pub shell_max_iterations: u32,
    pub shell_max_duration: Duration,
    /// Default cap applied to shell command output when the tool call does
    /// not set one; prevents context-window blow-up.
    pub shell_default_output_cap: usize,
    /// Default per-batch shell timeout.
    pub shell_batch_timeout: Duration,
    /// Timeout for the handoff webhook trigger.
    pub webhook_trigger_timeout: Duration,
    /// Timeout for the delivery webhook at finalization.
    pub delivery_webhook_timeout: Duration,
    /// Timeout for image downloads.
    pub image_download_timeout: Duration,
    /// CDN domain preferred for public URLs.
    pub cdn_domain: Option<String>,
    /// Base URL of the public API (handoff trigger, share hook).
    pub api_url: Option<String>,
    /// Allow-list for the S3-upload step's target buckets.
    pub allowed_upload_buckets: Vec<String>,
    /// Key prefix template for S3-upload destinations.
    pub upload_key_prefix: Option<String>,
    /// Default region used when instructions do not name one.
    pub default_region: String,
    /// Shell executor workspace root.
    pub shell_work_root: String,
    pub shell_upload_mode: ShellUploadMode,
    pub shell_upload_bucket: Option<String>,
    pub shell_upload_prefix_template: Option<String>,
    pub cua_driver: CuaDriverConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_parallel_steps: 4,
            cua_max_iterations: 50,
            cua_max_duration: Duration::from_secs(300),
            shell_max_iterations: 25,
            shell_max_duration: Duration::from_secs(300),
            shell_default_output_cap: 4096,
            shell_batch_timeout: Duration::from_secs(900),
            webhook_trigger_timeout: Duration::from_secs(15),
            delivery_webhook_timeout: Duration::from_secs(180),
            image_download_timeout: Duration::from_secs(30),
            cdn_domain: None,
            api_url: None,
            // No buckets are writable until the operator allows some.
            allowed_upload_buckets: Vec::new(),
            upload_key_prefix: None,
            default_region: "us-east-1".to_string(),
            shell_work_root: "/work".to_string(),
            shell_upload_mode: ShellUploadMode::Manifest,
            shell_upload_bucket: None,
            shell_upload_prefix_template: None,
            cua_driver: CuaDriverConfig::default(),
        }
    }
}

impl RuntimeConfig {
    /// Snapshot configuration from the environment. Taken once at startup;
    /// the engine never re-reads the environment afterwards.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(domain) = std::env::var("CDN_DOMAIN") {
            if !domain.is_empty() {
                config.cdn_domain = Some(domain);
            }
        }
        if let Ok(url) = std::env::var("API_URL").or_else(|_| std::env::var("API_GATEWAY_URL")) {
            if !url.is_empty() {
                config.api_url = Some(url.trim_end_matches('/').to_string());
            }
        }
        if let Ok(buckets) = std::env::var("SHELL_S3_UPLOAD_ALLOWED_BUCKETS") {
            let parsed: Vec<String> = buckets
                .split(',')
                .map(|b| b.trim().to_string())
                .filter(|b| !b.is_empty())
                .collect();
            if !parsed.is_empty() {
                config.allowed_upload_buckets = parsed;
            }
        }
        if let Ok(prefix) = std::env::var("SHELL_S3_UPLOAD_KEY_PREFIX") {
            if !prefix.is_empty() {
                config.upload_key_prefix = Some(prefix);
            }
        }
        if let Ok(region) = std::env::var("AWS_REGION") {
            if !region.is_empty() {
                config.default_region = region;
            }
        }
        if let Ok(root) = std::env::var("SHELL_EXECUTOR_WORK_ROOT") {
            if !root.is_empty() {
                config.shell_work_root = root;
            }
        }
        if let Ok(mode) = std::env::var("SHELL_EXECUTOR_UPLOAD_MODE") {
            config.shell_upload_mode = ShellUploadMode::from_str(&mode);
        }
        if let Ok(bucket) = std::env::var("SHELL_EXECUTOR_UPLOAD_BUCKET") {
            if !bucket.is_empty() {
                config.shell_upload_bucket = Some(bucket);
            }
        }
        if let Ok(template) = std::env::var("SHELL_EXECUTOR_UPLOAD_PREFIX_TEMPLATE") {
            if !template.is_empty() {
                config.shell_upload_prefix_template = Some(template);
            }
        }

        config.cua_driver = CuaDriverConfig {
            container_name: std::env::var("CUA_DOCKER_CONTAINER_NAME").ok().filter(|v| !v.is_empty()),
            vnc_display: std::env::var("CUA_DOCKER_VNC_DISPLAY").ok().filter(|v| !v.is_empty()),
            auto_start: env_flag("CUA_DOCKER_AUTO_START"),
            stop_on_cleanup: env_flag("CUA_DOCKER_STOP_ON_CLEANUP"),
        };

        config
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}
