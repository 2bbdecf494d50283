//! Job finalization: choose the deliverable, store it, close the job,
//! and dispatch delivery.

use serde_json::json;

use crate::context;
use crate::delivery;
use crate::error::EngineError;
use crate::handlers::Services;
use crate::redact;
use crate::tracking::{inject_tracking_script, TRACKING_MARKER};
use leadflow_provider::{call_with_backoff, RequestBuilder};
use leadflow_workflow::{
    ExecutionStep, Job, JobStatus, JobUpdate, Submission, Usage, Workflow,
};

const DEFAULT_MODEL: &str = "gpt-5";

/// The deliverable chosen at finalization.
struct Deliverable {
    content: String,
    kind: &'static str,
    filename: &'static str,
}

/// Finalizes completed jobs.
pub struct JobFinalizer<'a> {
    pub services: &'a Services,
}

impl JobFinalizer<'_> {
    /// Finalize a job on normal completion. Returns the public URL of the
    /// final artifact. Delivery and notification failures never propagate.
    pub async fn finalize(
        &self,
        job: &Job,
        workflow: &Workflow,
        submission: &Submission,
        report: Option<(String, String)>,
        image_artifact_ids: &[String],
    ) -> Result<String, EngineError> {
        let services = self.services;
        let job_id = &job.job_id;

        // Reload the trace from the blob so entries appended during step
        // processing are not lost to a stale in-memory copy.
        let trace = services.trace.load(job_id).await?;
        let report_content = report.as_ref().map(|(content, _)| content.as_str());

        let mut deliverable =
            self.choose_deliverable(job, workflow, submission, &trace, report_content).await?;

        if deliverable.kind == "html_final"
            && !deliverable.content.trim().is_empty()
            && !deliverable.content.contains(TRACKING_MARKER)
        {
            deliverable.content =
                inject_tracking_script(&deliverable.content, job_id, &job.tenant_id);
        }

        let final_artifact_id = services
            .artifacts
            .store_artifact(
                &job.tenant_id,
                job_id,
                deliverable.kind,
                &deliverable.content,
                deliverable.filename,
                true,
            )
            .await
            .map_err(|e| EngineError::Internal(format!("failed to store final document: {e}")))?;
        let public_url = services.artifacts.get_public_url(&final_artifact_id).await?;
        tracing::info!(job_id = %job_id, url_preview = %public_url.chars().take(80).collect::<String>(), "final artifact stored");

        let mut artifacts_list: Vec<String> = Vec::new();
        if let Some((_, report_artifact_id)) = &report {
            artifacts_list.push(report_artifact_id.clone());
        }
        artifacts_list.push(final_artifact_id.clone());
        for id in image_artifact_ids {
            if !artifacts_list.contains(id) {
                artifacts_list.push(id.clone());
            }
        }
        for id in &job.artifacts {
            if !artifacts_list.contains(id) {
                artifacts_list.push(id.clone());
            }
        }

        // Re-read just before appending so the final-output record never
        // clobbers entries written by concurrent finishers.
        let mut trace = services.trace.load(job_id).await?;
        let mut final_step = ExecutionStep::new(
            "Final Output",
            trace.len() as i64 + 1,
            "final_output",
        );
        final_step.output = json!({
            "artifact_type": deliverable.kind,
            "filename": deliverable.filename,
            "artifact_id": final_artifact_id,
            "public_url": public_url,
        });
        trace.push(final_step);
        services.trace.persist(job_id, &trace).await?;

        tracing::info!(job_id = %job_id, "finalizing job");
        let now = chrono::Utc::now();
        services
            .records
            .update_job(
                job_id,
                JobUpdate {
                    status: Some(JobStatus::Completed),
                    output_url: Some(public_url.clone()),
                    artifacts: Some(artifacts_list),
                    completed_at: Some(now),
                    updated_at: Some(now),
                    ..Default::default()
                },
            )
            .await?;

        // Refresh the record so delivery sees the final artifact list.
        let job = services
            .records
            .get_job(job_id)
            .await?
            .ok_or_else(|| EngineError::JobNotFound(job_id.to_string()))?;

        delivery::deliver_job(services, workflow, &job, &public_url, submission, report_content)
            .await;
        delivery::notify_completion(services, &job, workflow, submission).await;

        Ok(public_url)
    }

    /// Pick the deliverable: template-driven HTML when enabled, else the
    /// last textual output as markdown, else a plain submission dump.
    async fn choose_deliverable(
        &self,
        job: &Job,
        workflow: &Workflow,
        submission: &Submission,
        trace: &[ExecutionStep],
        report_content: Option<&str>,
    ) -> Result<Deliverable, EngineError> {
        if workflow.html_enabled {
            if let Some(template_id) = &workflow.template_id {
                match self
                    .services
                    .records
                    .get_template(template_id, workflow.template_version)
                    .await?
                {
                    Some(template) => {
                        let content = self
                            .generate_html(job, workflow, submission, trace, report_content, &template)
                            .await?;
                        return Ok(Deliverable {
                            content,
                            kind: "html_final",
                            filename: "final.html",
                        });
                    }
                    None => {
                        tracing::warn!(
                            job_id = %job.job_id,
                            template_id = %template_id,
                            "template not found, skipping HTML generation"
                        );
                    }
                }
            }
        }

        let last_text = report_content
            .map(String::from)
            .or_else(|| last_textual_output(trace));
        match last_text {
            Some(content) if !content.trim().is_empty() => Ok(Deliverable {
                content,
                kind: "markdown_final",
                filename: "final.md",
            }),
            _ => Ok(Deliverable {
                content: context::submission_dump(submission),
                kind: "text_final",
                filename: "final.txt",
            }),
        }
    }

    /// Generate the styled HTML deliverable from the accumulated context
    /// and the template, then append the html_generation trace record.
    async fn generate_html(
        &self,
        job: &Job,
        workflow: &Workflow,
        submission: &Submission,
        trace: &[ExecutionStep],
        report_content: Option<&str>,
        template: &leadflow_workflow::Template,
    ) -> Result<String, EngineError> {
        let services = self.services;
        tracing::info!(job_id = %job.job_id, "generating HTML from accumulated step outputs");
        let started = chrono::Utc::now();
        let timer = std::time::Instant::now();

        let initial_context = context::format_submission(submission);
        let accumulated = match report_content {
            Some(report) => format!("{initial_context}\n\n{report}"),
            None => context::build_accumulated_context(&initial_context, trace),
        };

        let model = workflow
            .rewrite_model
            .clone()
            .unwrap_or_else(|| workflow.last_step_model(DEFAULT_MODEL));

        let instructions = format!(
            "You are rewriting research content into a polished HTML document.\n\
             Use the provided template's structure and styling; replace its placeholder \
             content with the research content, personalized with the submission data.\n\
             Style notes: {}\n\
             Output ONLY the complete HTML document, nothing else.",
            template.style_description
        );
        let input = format!(
            "=== Research Content ===\n{accumulated}\n\n\
             === Template HTML ===\n{}\n\n\
             === Submission Data ===\n{}",
            template.html_content,
            context::submission_dump(submission),
        );

        let request = RequestBuilder::new(&model, instructions, input).build();
        let response = call_with_backoff(services.provider.as_ref(), &request).await?;
        let html = response.text();
        let usage = response.usage.clone().unwrap_or_default();
        let duration_ms = timer.elapsed().as_millis() as u64;

        services
            .usage
            .record(
                &job.tenant_id,
                &job.job_id,
                &model,
                &Usage {
                    input_tokens: usage.input_tokens,
                    output_tokens: usage.output_tokens,
                    total_tokens: usage.total_tokens,
                },
                "html_generation",
            )
            .await;

        let html = inject_tracking_script(&html, &job.job_id, &job.tenant_id);

        // Reload before appending; step records may have landed since the
        // caller's snapshot.
        let mut current = services.trace.load(&job.job_id).await?;
        let mut record = ExecutionStep::new(
            "HTML Generation",
            current.len() as i64 + 1,
            "html_generation",
        );
        record.input = redact::redacted(&json!({
            "model": model,
            "instructions": request.instructions,
            "template_id": template.template_id,
        }));
        record.output =
            serde_json::Value::String(html.chars().take(5000).collect::<String>());
        record.usage = Some(Usage {
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            total_tokens: usage.total_tokens,
        });
        record.timestamp = started;
        record.duration_ms = duration_ms;
        current.push(record);
        services.trace.persist(&job.job_id, &current).await?;

        Ok(html)
    }
}

/// Last workflow-step record whose output is non-empty text.
fn last_textual_output(trace: &[ExecutionStep]) -> Option<String> {
    trace
        .iter()
        .rev()
        .filter(|record| record.step_type != "final_output" && record.step_type != "html_generation")
        .find_map(|record| {
            record
                .output_text()
                .filter(|text| !text.trim().is_empty())
                .map(String::from)
        })
}
