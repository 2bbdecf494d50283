//! External driver traits: browser/VM control and sandboxed shell
//! execution.

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::error::EngineError;
use leadflow_provider::{ComputerAction, ShellCommandOutput};

/// Browser/VM control surface for the computer-use loop.
///
/// One driver instance per computer-use step; never shared across steps.
/// `cleanup` is best-effort and called on every loop exit path.
#[async_trait]
pub trait ComputerDriver: Send {
    async fn initialize(&mut self, display_width: u32, display_height: u32)
        -> Result<(), EngineError>;

    async fn navigate(&mut self, url: &str) -> Result<(), EngineError>;

    async fn execute_action(&mut self, action: &ComputerAction) -> Result<(), EngineError>;

    /// Capture a screenshot as base64-encoded PNG.
    async fn screenshot(&mut self) -> Result<String, EngineError>;

    async fn current_url(&mut self) -> Option<String>;

    async fn cleanup(&mut self);
}

/// Acquires a fresh driver per computer-use step.
#[async_trait]
pub trait ComputerDriverFactory: Send + Sync {
    async fn acquire(&self) -> Result<Box<dyn ComputerDriver>, EngineError>;
}

/// One shell batch submitted to the executor.
#[derive(Debug, Clone)]
pub struct ShellBatchRequest {
    pub commands: Vec<String>,
    pub timeout_ms: Option<u64>,
    pub max_output_length: Option<usize>,
    /// Persistent workspace the batch runs in.
    pub workspace_id: String,
    /// Reset the workspace before running; set exactly once at the start
    /// of a loop to defeat stale state across retries.
    pub reset_workspace: bool,
}

/// Result of a shell batch.
#[derive(Debug, Clone, Default)]
pub struct ShellBatchResult {
    pub output: Vec<ShellCommandOutput>,
    /// Cap the executor actually applied; falls back to the requested
    /// value when absent.
    pub max_output_length: Option<usize>,
}

/// Sandboxed shell executor with a persistent per-workspace root.
#[async_trait]
pub trait ShellRunner: Send + Sync {
    async fn run(&self, request: ShellBatchRequest) -> Result<ShellBatchResult, EngineError>;
}

/// Deterministically derive the workspace id for a step.
///
/// Keeps shell runs for the same (tenant, job, step) in the same
/// workspace while staying a safe, hex-only path component.
pub fn derive_workspace_id(tenant_id: &str, job_id: &str, step_index: usize) -> String {
    let base = format!("{tenant_id}:{job_id}:{step_index}");
    let digest = Sha256::digest(base.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    format!("w_{}", &hex[..32])
}
