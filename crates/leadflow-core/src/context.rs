//! Context assembly for step execution and finalization.
//!
//! Every LLM-facing step receives one textual `previous_context` built
//! from the form submission followed by the outputs of its dependency
//! steps. Finalization uses the accumulated projection; handoff and
//! webhook payloads use the deliverable projection.

use leadflow_workflow::{ExecutionStep, StepOutput, Submission, WorkflowStep};

/// Format the form submission as a `label: value` block, one field per
/// line. Labels resolve through the form schema; absent labels fall back
/// to the field id.
pub fn format_submission(submission: &Submission) -> String {
    let mut lines = Vec::with_capacity(submission.submission_data.len());
    for (field, value) in &submission.submission_data {
        let label = submission.label_for(field);
        let rendered = match value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        lines.push(format!("{label}: {rendered}"));
    }
    lines.join("\n")
}

fn format_step_block(output: &StepOutput) -> String {
    let mut block = format!(
        "Step {}: {}\n{}",
        output.step_index + 1,
        output.step_name,
        output.output
    );
    if !output.image_urls.is_empty() {
        block.push_str("\n\nGenerated Images:");
        for url in &output.image_urls {
            block.push_str("\n- ");
            block.push_str(url);
        }
    }
    block
}

/// Build the dependency-filtered context for one step.
///
/// `dependency_indices` honors `depends_on` when present; `None` means
/// every strictly prior step contributes. The submission block leads,
/// followed by one block per contributing step.
pub fn build_previous_context(
    submission: &Submission,
    step_outputs: &[StepOutput],
    dependency_indices: Option<&[usize]>,
) -> String {
    let mut sections = Vec::new();
    let submission_block = format_submission(submission);
    if !submission_block.is_empty() {
        sections.push(submission_block);
    }

    match dependency_indices {
        Some(deps) => {
            for &dep in deps {
                if let Some(output) = step_outputs.iter().find(|o| o.step_index == dep) {
                    sections.push(format_step_block(output));
                }
            }
        }
        None => {
            for output in step_outputs {
                sections.push(format_step_block(output));
            }
        }
    }

    sections.join("\n\n")
}

/// Union of the dependency steps' image URLs, deduplicated and
/// order-preserving.
pub fn previous_image_urls(
    step_outputs: &[StepOutput],
    dependency_indices: Option<&[usize]>,
) -> Vec<String> {
    let mut urls = Vec::new();
    let mut push_all = |output: &StepOutput| {
        for url in &output.image_urls {
            if !urls.contains(url) {
                urls.push(url.clone());
            }
        }
    };

    match dependency_indices {
        Some(deps) => {
            for &dep in deps {
                if let Some(output) = step_outputs.iter().find(|o| o.step_index == dep) {
                    push_all(output);
                }
            }
        }
        None => {
            for output in step_outputs {
                push_all(output);
            }
        }
    }
    urls
}

/// Accumulated context for final HTML generation: the initial submission
/// block followed by every workflow step's output from the trace.
pub fn build_accumulated_context(initial_context: &str, trace: &[ExecutionStep]) -> String {
    let mut sections = Vec::new();
    if !initial_context.is_empty() {
        sections.push(initial_context.to_string());
    }
    for (position, record) in trace.iter().enumerate() {
        if record.step_type == "final_output" || record.step_type == "html_generation" {
            continue;
        }
        let output = match &record.output {
            serde_json::Value::String(s) if !s.is_empty() => s.clone(),
            serde_json::Value::Null => continue,
            serde_json::Value::String(_) => continue,
            other => other.to_string(),
        };
        sections.push(format!(
            "Step {}: {}\n{}",
            position + 1,
            record.step_name,
            output
        ));
    }
    sections.join("\n\n")
}

/// Indices of the deliverable steps: those flagged in the workflow, else
/// the last step.
pub fn resolve_deliverable_indices(sorted_steps: &[WorkflowStep]) -> Vec<usize> {
    let flagged: Vec<usize> = sorted_steps
        .iter()
        .enumerate()
        .filter(|(_, s)| s.deliverable)
        .map(|(i, _)| i)
        .collect();
    if !flagged.is_empty() {
        flagged
    } else if sorted_steps.is_empty() {
        Vec::new()
    } else {
        vec![sorted_steps.len() - 1]
    }
}

/// Deliverable projection: the flagged steps' outputs in the standard
/// block format, concatenated in step order.
pub fn build_deliverable_context(
    step_outputs: &[StepOutput],
    sorted_steps: &[WorkflowStep],
) -> String {
    let mut blocks = Vec::new();
    for index in resolve_deliverable_indices(sorted_steps) {
        if let Some(output) = step_outputs.iter().find(|o| o.step_index == index) {
            if !output.output.trim().is_empty() {
                blocks.push(format_step_block(output));
            }
        }
    }
    blocks.join("\n\n")
}

/// Deliverable steps keyed `step_{index}`, used in handoff and webhook
/// payloads.
pub fn build_deliverable_steps(
    step_outputs: &[StepOutput],
    sorted_steps: &[WorkflowStep],
) -> serde_json::Map<String, serde_json::Value> {
    let mut map = serde_json::Map::new();
    for index in resolve_deliverable_indices(sorted_steps) {
        let Some(output) = step_outputs.iter().find(|o| o.step_index == index) else {
            continue;
        };
        if output.output.trim().is_empty() {
            continue;
        }
        map.insert(
            format!("step_{}", output.step_index),
            serde_json::json!({
                "step_name": output.step_name,
                "step_index": output.step_index,
                "output": output.output,
                "artifact_id": output.artifact_id,
                "image_urls": output.image_urls,
            }),
        );
    }
    map
}

/// Plain `key: value` dump of the submission, used when neither HTML nor
/// a textual step output is available as the deliverable.
pub fn submission_dump(submission: &Submission) -> String {
    submission
        .submission_data
        .iter()
        .map(|(key, value)| match value {
            serde_json::Value::String(s) => format!("{key}: {s}"),
            other => format!("{key}: {other}"),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use leadflow_workflow::StepKind;

    fn submission() -> Submission {
        Submission::new("s1", "t1")
            .with_field("email", "a@b.co")
            .with_field("company", "Acme")
            .with_label("email", "Email Address")
    }

    fn output(index: usize, name: &str, text: &str, images: &[&str]) -> StepOutput {
        let mut o = StepOutput::new(name, index, text);
        o.image_urls = images.iter().map(|s| s.to_string()).collect();
        o
    }

    #[test]
    fn submission_block_uses_labels_with_id_fallback() {
        let block = format_submission(&submission());
        assert!(block.contains("Email Address: a@b.co"));
        assert!(block.contains("company: Acme"));
    }

    #[test]
    fn previous_context_honors_dependency_filter() {
        let outputs = vec![
            output(0, "Research", "alpha", &[]),
            output(1, "Design", "beta", &["https://cdn/img.png"]),
        ];
        let context = build_previous_context(&submission(), &outputs, Some(&[1]));
        assert!(!context.contains("alpha"));
        assert!(context.contains("Step 2: Design\nbeta"));
        assert!(context.contains("Generated Images:\n- https://cdn/img.png"));

        let all = build_previous_context(&submission(), &outputs, None);
        assert!(all.contains("alpha"));
        assert!(all.contains("beta"));
    }

    #[test]
    fn image_union_dedupes_preserving_order() {
        let outputs = vec![
            output(0, "a", "x", &["https://cdn/1.png", "https://cdn/2.png"]),
            output(1, "b", "y", &["https://cdn/2.png", "https://cdn/3.png"]),
        ];
        let urls = previous_image_urls(&outputs, None);
        assert_eq!(
            urls,
            vec!["https://cdn/1.png", "https://cdn/2.png", "https://cdn/3.png"]
        );
    }

    #[test]
    fn deliverable_defaults_to_last_step() {
        let steps = vec![
            WorkflowStep::new("a", 0, StepKind::AiGeneration),
            WorkflowStep::new("b", 1, StepKind::AiGeneration),
        ];
        assert_eq!(resolve_deliverable_indices(&steps), vec![1]);

        let mut flagged = steps.clone();
        flagged[0].deliverable = true;
        assert_eq!(resolve_deliverable_indices(&flagged), vec![0]);
    }

    #[test]
    fn deliverable_context_concatenates_flagged_steps() {
        let mut steps = vec![
            WorkflowStep::new("a", 0, StepKind::AiGeneration),
            WorkflowStep::new("b", 1, StepKind::AiGeneration),
            WorkflowStep::new("c", 2, StepKind::AiGeneration),
        ];
        steps[0].deliverable = true;
        steps[2].deliverable = true;
        let outputs = vec![
            output(0, "a", "first", &[]),
            output(1, "b", "middle", &[]),
            output(2, "c", "last", &[]),
        ];
        let context = build_deliverable_context(&outputs, &steps);
        assert!(context.contains("first"));
        assert!(!context.contains("middle"));
        assert!(context.contains("last"));

        let map = build_deliverable_steps(&outputs, &steps);
        assert!(map.contains_key("step_0"));
        assert!(map.contains_key("step_2"));
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn accumulated_context_skips_finalization_records() {
        let mut trace = vec![
            ExecutionStep::new("a", 1, "ai_generation"),
            ExecutionStep::new("html", 2, "html_generation"),
        ];
        trace[0].output = serde_json::Value::String("body".into());
        trace[1].output = serde_json::Value::String("<html>".into());
        let context = build_accumulated_context("intro", &trace);
        assert!(context.contains("intro"));
        assert!(context.contains("body"));
        assert!(!context.contains("<html>"));
    }
}
