//! Job records and trigger messages.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Job lifecycle status.
///
/// A job is created externally in `Pending`, moves to `Processing` when the
/// orchestrator picks it up, and then to exactly one of `Completed` or
/// `Failed`. Terminal states are never left.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "processing" => Some(JobStatus::Processing),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }
}

/// Classification attached to a failed job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    Authentication,
    RateLimit,
    ModelNotFound,
    Timeout,
    Validation,
    Safety,
    #[default]
    Unknown,
}

impl ErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorType::Authentication => "authentication",
            ErrorType::RateLimit => "rate_limit",
            ErrorType::ModelNotFound => "model_not_found",
            ErrorType::Timeout => "timeout",
            ErrorType::Validation => "validation",
            ErrorType::Safety => "safety",
            ErrorType::Unknown => "unknown",
        }
    }
}

/// A lead-magnet job: one workflow execution for one form submission.
///
/// `execution_steps_key` is the only trace field persisted on the record;
/// the trace itself always lives in the object store under that key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    pub tenant_id: String,
    pub workflow_id: String,
    pub submission_id: String,
    #[serde(default)]
    pub status: JobStatus,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
    /// Public URL of the final deliverable, set at finalization.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_url: Option<String>,
    /// Ordered artifact ids owned by this job.
    #[serde(default)]
    pub artifacts: Vec<String>,
    /// Blob key of the execution trace (`jobs/{job_id}/execution_steps.json`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_steps_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<ErrorType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Base URL of the public API, used by handoff steps to reach the
    /// webhook-trigger endpoint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
}

impl Job {
    /// Create a new pending job.
    pub fn new(
        job_id: impl Into<String>,
        tenant_id: impl Into<String>,
        workflow_id: impl Into<String>,
        submission_id: impl Into<String>,
    ) -> Self {
        let now = chrono::Utc::now();
        Self {
            job_id: job_id.into(),
            tenant_id: tenant_id.into(),
            workflow_id: workflow_id.into(),
            submission_id: submission_id.into(),
            status: JobStatus::Pending,
            created_at: now,
            updated_at: now,
            completed_at: None,
            output_url: None,
            artifacts: Vec::new(),
            execution_steps_key: None,
            error_type: None,
            error_message: None,
            api_url: None,
        }
    }
}

/// Partial update applied to a job record.
///
/// `None` fields are left untouched; the trace list never appears here —
/// callers go through the trace store, which stores the blob and sets
/// `execution_steps_key`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<JobStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifacts: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_steps_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<ErrorType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl JobUpdate {
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            updated_at: Some(chrono::Utc::now()),
            ..Default::default()
        }
    }

    pub fn apply(self, job: &mut Job) {
        if let Some(status) = self.status {
            job.status = status;
        }
        if let Some(url) = self.output_url {
            job.output_url = Some(url);
        }
        if let Some(artifacts) = self.artifacts {
            job.artifacts = artifacts;
        }
        if let Some(key) = self.execution_steps_key {
            job.execution_steps_key = Some(key);
        }
        if let Some(at) = self.completed_at {
            job.completed_at = Some(at);
        }
        if let Some(at) = self.updated_at {
            job.updated_at = at;
        }
        if let Some(error_type) = self.error_type {
            job.error_type = Some(error_type);
        }
        if let Some(message) = self.error_message {
            job.error_message = Some(message);
        }
    }
}

/// What the trigger asks the orchestrator to do.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobAction {
    #[default]
    ProcessJob,
    ProcessSingleStep,
}

/// Message placed onto the orchestrator by the trigger fabric.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerMessage {
    pub job_id: String,
    pub tenant_id: String,
    pub workflow_id: String,
    pub submission_id: String,
    #[serde(default)]
    pub action: JobAction,
    /// Target step for `ProcessSingleStep` (array index).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_index: Option<usize>,
}

impl TriggerMessage {
    pub fn process_job(job: &Job) -> Self {
        Self {
            job_id: job.job_id.clone(),
            tenant_id: job.tenant_id.clone(),
            workflow_id: job.workflow_id.clone(),
            submission_id: job.submission_id.clone(),
            action: JobAction::ProcessJob,
            step_index: None,
        }
    }

    pub fn process_single_step(job: &Job, step_index: usize) -> Self {
        Self {
            step_index: Some(step_index),
            action: JobAction::ProcessSingleStep,
            ..Self::process_job(job)
        }
    }
}

/// Tenant settings row (webhook token for handoff triggers).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TenantSettings {
    pub tenant_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_token: Option<String>,
    #[serde(default, flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}
