//! Storage backends: key/value records and blobs.

pub mod object;

pub use object::{
    artifact_key, image_key, trace_key, MemoryObjectStore, ObjectStore, StoredObject,
};

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::EngineError;
use leadflow_workflow::{
    Artifact, Job, JobUpdate, Notification, Submission, Template, TenantSettings, UsageRecord,
    Workflow,
};

/// Key/value row storage for jobs, workflows, submissions, templates,
/// artifacts, usage records, and notifications.
///
/// Usage and notification writes are best-effort at the call sites: a
/// failure there is logged and never fails the job.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn get_job(&self, job_id: &str) -> Result<Option<Job>, EngineError>;
    async fn put_job(&self, job: &Job) -> Result<(), EngineError>;
    async fn update_job(&self, job_id: &str, update: JobUpdate) -> Result<(), EngineError>;

    async fn get_workflow(&self, workflow_id: &str) -> Result<Option<Workflow>, EngineError>;
    async fn get_submission(&self, submission_id: &str) -> Result<Option<Submission>, EngineError>;

    /// Version 0 means latest.
    async fn get_template(
        &self,
        template_id: &str,
        version: u32,
    ) -> Result<Option<Template>, EngineError>;

    async fn put_artifact(&self, artifact: &Artifact) -> Result<(), EngineError>;
    async fn get_artifact(&self, artifact_id: &str) -> Result<Option<Artifact>, EngineError>;

    async fn get_settings(&self, tenant_id: &str) -> Result<Option<TenantSettings>, EngineError>;

    async fn put_usage_record(&self, record: &UsageRecord) -> Result<(), EngineError>;
    async fn put_notification(&self, notification: &Notification) -> Result<(), EngineError>;
}

/// In-memory record store (for testing and development).
#[derive(Default)]
pub struct MemoryRecordStore {
    jobs: Arc<RwLock<HashMap<String, Job>>>,
    workflows: Arc<RwLock<HashMap<String, Workflow>>>,
    submissions: Arc<RwLock<HashMap<String, Submission>>>,
    templates: Arc<RwLock<HashMap<String, Vec<Template>>>>,
    artifacts: Arc<RwLock<HashMap<String, Artifact>>>,
    settings: Arc<RwLock<HashMap<String, TenantSettings>>>,
    usage_records: Arc<RwLock<Vec<UsageRecord>>>,
    notifications: Arc<RwLock<Vec<Notification>>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn seed_workflow(&self, workflow: Workflow) {
        self.workflows
            .write()
            .await
            .insert(workflow.workflow_id.clone(), workflow);
    }

    pub async fn seed_submission(&self, submission: Submission) {
        self.submissions
            .write()
            .await
            .insert(submission.submission_id.clone(), submission);
    }

    pub async fn seed_template(&self, template: Template) {
        self.templates
            .write()
            .await
            .entry(template.template_id.clone())
            .or_default()
            .push(template);
    }

    pub async fn seed_settings(&self, settings: TenantSettings) {
        self.settings
            .write()
            .await
            .insert(settings.tenant_id.clone(), settings);
    }

    pub async fn usage_records(&self) -> Vec<UsageRecord> {
        self.usage_records.read().await.clone()
    }

    pub async fn notifications(&self) -> Vec<Notification> {
        self.notifications.read().await.clone()
    }

    pub async fn artifacts_for_job(&self, job_id: &str) -> Vec<Artifact> {
        self.artifacts
            .read()
            .await
            .values()
            .filter(|a| a.job_id == job_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn get_job(&self, job_id: &str) -> Result<Option<Job>, EngineError> {
        Ok(self.jobs.read().await.get(job_id).cloned())
    }

    async fn put_job(&self, job: &Job) -> Result<(), EngineError> {
        self.jobs
            .write()
            .await
            .insert(job.job_id.clone(), job.clone());
        Ok(())
    }

    async fn update_job(&self, job_id: &str, update: JobUpdate) -> Result<(), EngineError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| EngineError::JobNotFound(job_id.to_string()))?;
        update.apply(job);
        Ok(())
    }

    async fn get_workflow(&self, workflow_id: &str) -> Result<Option<Workflow>, EngineError> {
        Ok(self.workflows.read().await.get(workflow_id).cloned())
    }

    async fn get_submission(&self, submission_id: &str) -> Result<Option<Submission>, EngineError> {
        Ok(self.submissions.read().await.get(submission_id).cloned())
    }

    async fn get_template(
        &self,
        template_id: &str,
        version: u32,
    ) -> Result<Option<Template>, EngineError> {
        let templates = self.templates.read().await;
        let Some(versions) = templates.get(template_id) else {
            return Ok(None);
        };
        if version == 0 {
            Ok(versions.iter().max_by_key(|t| t.version).cloned())
        } else {
            Ok(versions.iter().find(|t| t.version == version).cloned())
        }
    }

    async fn put_artifact(&self, artifact: &Artifact) -> Result<(), EngineError> {
        self.artifacts
            .write()
            .await
            .insert(artifact.artifact_id.clone(), artifact.clone());
        Ok(())
    }

    async fn get_artifact(&self, artifact_id: &str) -> Result<Option<Artifact>, EngineError> {
        Ok(self.artifacts.read().await.get(artifact_id).cloned())
    }

    async fn get_settings(&self, tenant_id: &str) -> Result<Option<TenantSettings>, EngineError> {
        Ok(self.settings.read().await.get(tenant_id).cloned())
    }

    async fn put_usage_record(&self, record: &UsageRecord) -> Result<(), EngineError> {
        self.usage_records.write().await.push(record.clone());
        Ok(())
    }

    async fn put_notification(&self, notification: &Notification) -> Result<(), EngineError> {
        self.notifications.write().await.push(notification.clone());
        Ok(())
    }
}
