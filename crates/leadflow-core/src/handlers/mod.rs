//! Step handler trait and registry.

pub mod ai_generation;
pub mod handoff;
pub mod s3_upload;
pub mod shell_step;
pub mod webhook;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::artifacts::ArtifactService;
use crate::config::RuntimeConfig;
use crate::drivers::{ComputerDriverFactory, ShellRunner};
use crate::error::EngineError;
use crate::http::HttpClient;
use crate::s3_upload::BucketWriter;
use crate::store::{ObjectStore, RecordStore};
use crate::trace::{TraceMode, TraceStore};
use crate::usage::UsageService;
use leadflow_provider::ModelProvider;
use leadflow_workflow::{
    ExecutionStep, Job, StepKind, StepOutput, Submission, Workflow, WorkflowStep,
};

/// Shared service handles available to every handler.
pub struct Services {
    pub records: Arc<dyn RecordStore>,
    pub objects: Arc<dyn ObjectStore>,
    pub provider: Arc<dyn ModelProvider>,
    pub http: Arc<dyn HttpClient>,
    pub driver_factory: Arc<dyn ComputerDriverFactory>,
    pub shell_runner: Arc<dyn ShellRunner>,
    pub bucket_writer: Arc<dyn BucketWriter>,
    pub sms: Option<Arc<dyn crate::delivery::SmsGateway>>,
    pub config: RuntimeConfig,
    pub trace: TraceStore,
    pub artifacts: ArtifactService,
    pub usage: UsageService,
    /// Plain HTTP client used for provider-side image conversions.
    pub image_http: reqwest::Client,
}

impl Services {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        records: Arc<dyn RecordStore>,
        objects: Arc<dyn ObjectStore>,
        provider: Arc<dyn ModelProvider>,
        http: Arc<dyn HttpClient>,
        driver_factory: Arc<dyn ComputerDriverFactory>,
        shell_runner: Arc<dyn ShellRunner>,
        bucket_writer: Arc<dyn BucketWriter>,
        sms: Option<Arc<dyn crate::delivery::SmsGateway>>,
        config: RuntimeConfig,
    ) -> Self {
        let trace = TraceStore::new(records.clone(), objects.clone());
        let artifacts = ArtifactService::new(
            records.clone(),
            objects.clone(),
            http.clone(),
            config.api_url.clone(),
            config.image_download_timeout,
        );
        let usage = UsageService::new(records.clone());
        Self {
            records,
            objects,
            provider,
            http,
            driver_factory,
            shell_runner,
            bucket_writer,
            sms,
            config,
            trace,
            artifacts,
            usage,
            image_http: reqwest::Client::new(),
        }
    }
}

/// Everything a handler needs to execute one step.
pub struct StepInvocation<'a> {
    pub step: &'a WorkflowStep,
    /// Position in the sorted step list; trace records carry
    /// `step_order = step_index + 1`.
    pub step_index: usize,
    pub job: &'a Job,
    pub workflow: &'a Workflow,
    pub submission: &'a Submission,
    /// Dependency-filtered context, submission block first.
    pub previous_context: &'a str,
    /// Outputs of completed steps (snapshot; read-only within a group).
    pub step_outputs: &'a [StepOutput],
    pub sorted_steps: &'a [WorkflowStep],
    /// Normalized dependency indices of this step.
    pub dependency_indices: &'a [usize],
    pub trace_mode: TraceMode,
}

impl StepInvocation<'_> {
    pub fn step_name(&self) -> String {
        if self.step.step_name.is_empty() {
            format!("Step {}", self.step_index + 1)
        } else {
            self.step.step_name.clone()
        }
    }

    pub fn step_order(&self) -> i64 {
        self.step_index as i64 + 1
    }
}

/// Uniform contract for executing one kind of step.
///
/// Every handler records exactly one [`ExecutionStep`] through the trace
/// store (success or failure) before returning.
#[async_trait]
pub trait StepHandler: Send + Sync {
    /// The step kind this handler executes.
    fn kind(&self) -> StepKind;

    async fn execute(
        &self,
        services: &Services,
        invocation: StepInvocation<'_>,
    ) -> Result<StepOutput, EngineError>;
}

/// Registry of step handlers keyed by step kind.
pub struct StepHandlerRegistry {
    handlers: HashMap<StepKind, Arc<dyn StepHandler>>,
}

impl StepHandlerRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            handlers: HashMap::new(),
        };
        registry.register(Arc::new(ai_generation::AiGenerationHandler));
        registry.register(Arc::new(webhook::WebhookHandler));
        registry.register(Arc::new(handoff::HandoffHandler));
        registry.register(Arc::new(shell_step::ShellStepHandler));
        registry.register(Arc::new(s3_upload::S3UploadHandler));
        registry
    }

    pub fn register(&mut self, handler: Arc<dyn StepHandler>) {
        self.handlers.insert(handler.kind(), handler);
    }

    pub fn get(&self, kind: StepKind) -> Option<Arc<dyn StepHandler>> {
        self.handlers.get(&kind).cloned()
    }
}

impl Default for StepHandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Record a failed step in the trace. Called by handlers on their error
/// path so the trace stays complete up to the failure point.
pub(crate) async fn record_step_failure(
    services: &Services,
    invocation: &StepInvocation<'_>,
    step_type: &str,
    started: chrono::DateTime<chrono::Utc>,
    duration_ms: u64,
    error: &EngineError,
) {
    let mut record = ExecutionStep::new(invocation.step_name(), invocation.step_order(), step_type);
    record.timestamp = started;
    record.duration_ms = duration_ms;
    record.success = false;
    record.error = Some(crate::redact::redact_text(&error.to_string()));

    if let Err(e) = services
        .trace
        .record(&invocation.job.job_id, record, invocation.trace_mode)
        .await
    {
        tracing::error!(
            job_id = %invocation.job.job_id,
            step_index = invocation.step_index,
            error = %e,
            "failed to record step failure in trace"
        );
    }
}
