//! Workflow orchestrator.
//!
//! Drives jobs group-by-group through the dependency plan, fanning a
//! parallelizable group out over bounded concurrent tasks with a barrier
//! between groups. Also services single-step reruns, which touch exactly
//! one trace record and leave the rest of the job alone.

use futures::StreamExt;
use std::sync::Arc;

use crate::context;
use crate::delivery;
use crate::error::EngineError;
use crate::finalize::JobFinalizer;
use crate::handlers::{Services, StepHandlerRegistry, StepInvocation};
use crate::redact;
use crate::runtime::RuntimeContext;
use crate::trace::TraceMode;
use leadflow_provider::{call_with_backoff, process_response, RequestBuilder};
use leadflow_workflow::{
    build_dependency_graph, resolve_execution_groups, step_outputs_from_trace,
    validate_dependencies, ExecutionStep, Job, JobAction, JobStatus, JobUpdate, StepOutput,
    Submission, TriggerMessage, Usage, Workflow, WorkflowStep,
};

const DEFAULT_MODEL: &str = "gpt-5";

/// Workflow execution engine.
pub struct WorkflowEngine {
    services: Arc<Services>,
    handlers: StepHandlerRegistry,
    runtime: RuntimeContext,
}

impl WorkflowEngine {
    pub fn new(services: Arc<Services>) -> Self {
        let runtime = RuntimeContext::new(services.config.clone());
        Self {
            services,
            handlers: StepHandlerRegistry::new(),
            runtime,
        }
    }

    pub fn with_handlers(mut self, handlers: StepHandlerRegistry) -> Self {
        self.handlers = handlers;
        self
    }

    pub fn runtime(&self) -> &RuntimeContext {
        &self.runtime
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    /// Process a trigger message. Unrecoverable errors move the job to
    /// `failed` (unless it is already terminal) and are returned to the
    /// caller.
    pub async fn process(&self, trigger: &TriggerMessage) -> Result<(), EngineError> {
        let result = match trigger.action {
            JobAction::ProcessJob => self.process_job(trigger).await,
            JobAction::ProcessSingleStep => self.process_single_step(trigger).await,
        };
        if let Err(error) = &result {
            self.fail_job(&trigger.job_id, error).await;
        }
        result
    }

    async fn load_frame(
        &self,
        trigger: &TriggerMessage,
    ) -> Result<(Job, Workflow, Submission), EngineError> {
        let job = self
            .services
            .records
            .get_job(&trigger.job_id)
            .await?
            .ok_or_else(|| EngineError::JobNotFound(trigger.job_id.clone()))?;
        let workflow = self
            .services
            .records
            .get_workflow(&job.workflow_id)
            .await?
            .ok_or_else(|| {
                EngineError::Validation(format!("workflow {} not found", job.workflow_id))
            })?;
        let submission = self
            .services
            .records
            .get_submission(&job.submission_id)
            .await?
            .ok_or_else(|| {
                EngineError::Validation(format!("submission {} not found", job.submission_id))
            })?;
        Ok((job, workflow, submission))
    }

    async fn process_job(&self, trigger: &TriggerMessage) -> Result<(), EngineError> {
        let (job, workflow, submission) = self.load_frame(trigger).await?;
        if job.status.is_terminal() {
            tracing::warn!(job_id = %job.job_id, status = job.status.as_str(), "job already finished, skipping");
            return Ok(());
        }

        tracing::info!(
            job_id = %job.job_id,
            workflow_id = %workflow.workflow_id,
            steps = workflow.steps.len(),
            "processing job"
        );
        self.services
            .records
            .update_job(&job.job_id, JobUpdate::status(JobStatus::Processing))
            .await?;

        if workflow.is_legacy() {
            return self.process_legacy(&job, &workflow, &submission).await;
        }

        let sorted_steps: Vec<WorkflowStep> = workflow
            .sorted_steps()
            .into_iter()
            .map(|(_, step)| step.clone())
            .collect();

        let report = validate_dependencies(&sorted_steps);
        if !report.is_valid {
            return Err(EngineError::Validation(report.errors.join("; ")));
        }

        let plan = resolve_execution_groups(&sorted_steps);
        let graph = build_dependency_graph(&sorted_steps);
        tracing::info!(
            job_id = %job.job_id,
            groups = plan.execution_groups.len(),
            total_steps = plan.total_steps,
            "resolved execution groups"
        );

        let mut step_outputs: Vec<StepOutput> = Vec::new();
        let mut image_artifact_ids: Vec<String> = Vec::new();

        for group in &plan.execution_groups {
            if self.runtime.is_canceled() {
                return Err(EngineError::Canceled);
            }

            let mut results: Vec<(usize, Result<StepOutput, EngineError>)> =
                if group.can_run_in_parallel && group.step_indices.len() > 1 {
                    let limit = std::cmp::max(
                        1,
                        std::cmp::min(
                            group.step_indices.len(),
                            self.services.config.max_parallel_steps,
                        ),
                    );
                    tracing::info!(
                        job_id = %job.job_id,
                        group_index = group.group_index,
                        steps = group.step_indices.len(),
                        limit,
                        "running group in parallel"
                    );
                    futures::stream::iter(group.step_indices.iter().copied())
                        .map(|index| {
                            let outputs = &step_outputs;
                            let graph = &graph;
                            let sorted_steps = &sorted_steps;
                            let job = &job;
                            let workflow = &workflow;
                            let submission = &submission;
                            async move {
                                let result = self
                                    .execute_step(
                                        index,
                                        sorted_steps,
                                        graph,
                                        job,
                                        workflow,
                                        submission,
                                        outputs,
                                        TraceMode::Append,
                                    )
                                    .await;
                                (index, result)
                            }
                        })
                        .buffer_unordered(limit)
                        .collect()
                        .await
                } else {
                    let mut results = Vec::with_capacity(group.step_indices.len());
                    for &index in &group.step_indices {
                        if self.runtime.is_canceled() {
                            return Err(EngineError::Canceled);
                        }
                        let result = self
                            .execute_step(
                                index,
                                &sorted_steps,
                                &graph,
                                &job,
                                &workflow,
                                &submission,
                                &step_outputs,
                                TraceMode::Append,
                            )
                            .await;
                        results.push((index, result));
                    }
                    results
                };

            // Barrier: collect the whole group, in step order.
            results.sort_by_key(|(index, _)| *index);
            for (index, result) in results {
                match result {
                    Ok(output) => {
                        image_artifact_ids.extend(output.image_artifact_ids.iter().cloned());
                        step_outputs.push(output);
                    }
                    Err(error) => {
                        if sorted_steps[index].continue_on_error {
                            tracing::warn!(
                                job_id = %job.job_id,
                                step_index = index,
                                error = %error,
                                "step failed but continue_on_error is set"
                            );
                            let mut placeholder = StepOutput::new(
                                step_display_name(&sorted_steps[index], index),
                                index,
                                format!("Step failed: {error}"),
                            );
                            placeholder.extras = serde_json::json!({ "success": false });
                            step_outputs.push(placeholder);
                        } else {
                            tracing::error!(
                                job_id = %job.job_id,
                                step_index = index,
                                error = %error,
                                "step execution failed"
                            );
                            return Err(error);
                        }
                    }
                }
            }
        }

        let finalizer = JobFinalizer {
            services: self.services.as_ref(),
        };
        finalizer
            .finalize(&job, &workflow, &submission, None, &image_artifact_ids)
            .await?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn execute_step(
        &self,
        step_index: usize,
        sorted_steps: &[WorkflowStep],
        graph: &std::collections::HashMap<usize, Vec<usize>>,
        job: &Job,
        workflow: &Workflow,
        submission: &Submission,
        step_outputs: &[StepOutput],
        trace_mode: TraceMode,
    ) -> Result<StepOutput, EngineError> {
        let step = &sorted_steps[step_index];
        let handler = self
            .handlers
            .get(step.kind)
            .ok_or_else(|| EngineError::HandlerNotFound(step.kind.as_str().to_string()))?;

        let empty = Vec::new();
        let dependency_indices = graph.get(&step_index).unwrap_or(&empty);
        let previous_context =
            context::build_previous_context(submission, step_outputs, Some(dependency_indices));

        tracing::info!(
            job_id = %job.job_id,
            step_index,
            step_type = step.kind.as_str(),
            step_name = %step.step_name,
            "executing step"
        );

        handler
            .execute(
                &self.services,
                StepInvocation {
                    step,
                    step_index,
                    job,
                    workflow,
                    submission,
                    previous_context: &previous_context,
                    step_outputs,
                    sorted_steps,
                    dependency_indices,
                    trace_mode,
                },
            )
            .await
    }

    /// Rerun exactly one step of an existing job. Prior step outputs are
    /// reconstructed from the persisted trace; only the target step's
    /// record changes, and later steps are untouched.
    async fn process_single_step(&self, trigger: &TriggerMessage) -> Result<(), EngineError> {
        let step_index = trigger.step_index.ok_or_else(|| {
            EngineError::Validation("process_single_step requires step_index".to_string())
        })?;
        let (job, workflow, submission) = self.load_frame(trigger).await?;

        let sorted_steps: Vec<WorkflowStep> = workflow
            .sorted_steps()
            .into_iter()
            .map(|(_, step)| step.clone())
            .collect();
        if step_index >= sorted_steps.len() {
            return Err(EngineError::Validation(format!(
                "step_index {step_index} out of range (workflow has {} steps)",
                sorted_steps.len()
            )));
        }

        tracing::info!(job_id = %job.job_id, step_index, "rerunning single step");

        let trace = self.services.trace.load(&job.job_id).await?;
        let step_outputs = step_outputs_from_trace(&trace);
        let graph = build_dependency_graph(&sorted_steps);

        self.execute_step(
            step_index,
            &sorted_steps,
            &graph,
            &job,
            &workflow,
            &submission,
            &step_outputs,
            TraceMode::ReplaceAtOrder(step_index as i64 + 1),
        )
        .await?;

        self.services
            .records
            .update_job(
                &job.job_id,
                JobUpdate {
                    updated_at: Some(chrono::Utc::now()),
                    ..Default::default()
                },
            )
            .await?;
        Ok(())
    }

    /// Legacy step-less workflows: one research report, then finalize.
    async fn process_legacy(
        &self,
        job: &Job,
        workflow: &Workflow,
        submission: &Submission,
    ) -> Result<(), EngineError> {
        tracing::info!(job_id = %job.job_id, "processing legacy workflow format");

        if workflow.html_enabled && workflow.template_id.is_none() {
            return Err(EngineError::Validation(
                "template id is required when HTML generation is enabled".to_string(),
            ));
        }

        let mut report: Option<(String, String)> = None;
        if workflow.research_enabled {
            tracing::info!(job_id = %job.job_id, "generating research report");
            let started = chrono::Utc::now();
            let timer = std::time::Instant::now();

            let model = workflow.ai_model.as_deref().unwrap_or(DEFAULT_MODEL);
            let formatted_submission = context::format_submission(submission);
            let request = RequestBuilder::new(
                model,
                workflow.ai_instructions.clone(),
                formatted_submission.clone(),
            )
            .tools(vec![serde_json::json!({ "type": "web_search_preview" })])
            .build();

            let response = call_with_backoff(self.services.provider.as_ref(), &request).await?;
            let sink = crate::artifacts::JobImageSink {
                artifacts: self.services.artifacts.clone(),
                tenant_id: job.tenant_id.clone(),
                job_id: job.job_id.clone(),
            };
            let processed = process_response(&response, &sink).await;
            let duration_ms = timer.elapsed().as_millis() as u64;

            let usage = Usage {
                input_tokens: processed.usage.input_tokens,
                output_tokens: processed.usage.output_tokens,
                total_tokens: processed.usage.total_tokens,
            };
            self.services
                .usage
                .record(&job.tenant_id, &job.job_id, model, &usage, "workflow_step")
                .await;

            let artifact_id = self
                .services
                .artifacts
                .store_artifact(
                    &job.tenant_id,
                    &job.job_id,
                    "report_markdown",
                    &processed.content,
                    "report.md",
                    true,
                )
                .await?;

            let mut record = ExecutionStep::new("AI Research Report", 1, "ai_generation");
            record.input = redact::redacted(&serde_json::json!({
                "model": model,
                "instructions": request.instructions,
                "input": formatted_submission,
            }));
            record.output = serde_json::Value::String(processed.content.clone());
            record.image_urls = processed.image_urls.clone();
            record.usage = Some(usage);
            record.timestamp = started;
            record.duration_ms = duration_ms;
            record.artifact_id = Some(artifact_id.clone());
            self.services
                .trace
                .record(&job.job_id, record, TraceMode::Append)
                .await?;

            report = Some((processed.content, artifact_id));
        } else {
            tracing::info!(job_id = %job.job_id, "research disabled, skipping report generation");
        }

        let finalizer = JobFinalizer {
            services: self.services.as_ref(),
        };
        finalizer
            .finalize(job, workflow, submission, report, &[])
            .await?;
        Ok(())
    }

    /// Move a job to `failed` with a classified, redacted error. Terminal
    /// jobs are left alone.
    async fn fail_job(&self, job_id: &str, error: &EngineError) {
        let job = match self.services.records.get_job(job_id).await {
            Ok(Some(job)) => job,
            _ => return,
        };
        if job.status.is_terminal() {
            tracing::warn!(job_id, "not failing job already in a terminal state");
            return;
        }

        let message = redact::redact_text(&error.to_string());
        tracing::error!(job_id, error_type = error.error_type().as_str(), %message, "job failed");

        let update = JobUpdate {
            status: Some(JobStatus::Failed),
            error_type: Some(error.error_type()),
            error_message: Some(message.clone()),
            updated_at: Some(chrono::Utc::now()),
            ..Default::default()
        };
        if let Err(e) = self.services.records.update_job(job_id, update).await {
            tracing::error!(job_id, error = %e, "failed to mark job failed");
        }

        let workflow_name = match self.services.records.get_workflow(&job.workflow_id).await {
            Ok(Some(workflow)) => workflow.workflow_name,
            _ => job.workflow_id.clone(),
        };
        delivery::notify_failure(&self.services, &job, &workflow_name, &message).await;
    }
}

fn step_display_name(step: &WorkflowStep, index: usize) -> String {
    if step.step_name.is_empty() {
        format!("Step {}", index + 1)
    } else {
        step.step_name.clone()
    }
}
