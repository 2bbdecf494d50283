//! Integration tests for the workflow execution engine.
//!
//! These tests drive full jobs through the orchestrator against in-memory
//! storage and scripted provider/driver/runner mocks: sequential and
//! parallel execution, cycle rejection, image chaining between steps,
//! the computer-use loop, single-step rerun, and delivery non-fatality.

use async_trait::async_trait;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use leadflow_core::{
    BucketWriter, ComputerDriver, ComputerDriverFactory, EngineError, HttpClient, HttpRequest,
    HttpResponse, MemoryObjectStore, MemoryRecordStore, ObjectStore, RecordStore, RuntimeConfig,
    Services, ShellBatchRequest, ShellBatchResult, ShellRunner, WorkflowEngine,
};
use leadflow_provider::{
    ComputerAction, ContentItem, InputItem, ModelProvider, ProviderError, ProviderResponse,
    RequestInput, ResponseRequest,
};
use leadflow_workflow::{
    DeliveryConfig, DeliveryMethod, ExecutionStep, Job, JobStatus, StepKind, Submission,
    TriggerMessage, Workflow, WorkflowStep,
};

// ============================================================================
// Mocks
// ============================================================================

/// Provider that pops scripted responses in order and records every
/// request it saw.
struct ScriptedProvider {
    responses: Mutex<VecDeque<ProviderResponse>>,
    requests: Mutex<Vec<ResponseRequest>>,
}

impl ScriptedProvider {
    fn new(responses: Vec<ProviderResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    fn requests(&self) -> Vec<ResponseRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    async fn create(&self, request: &ResponseRequest) -> Result<ProviderResponse, ProviderError> {
        self.requests.lock().unwrap().push(request.clone());
        Ok(self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| text_response("resp_default", "default output")))
    }
}

fn text_response(id: &str, text: &str) -> ProviderResponse {
    serde_json::from_value(json!({
        "id": id,
        "output": [{ "type": "text", "text": text }],
        "output_text": text,
        "usage": { "input_tokens": 10, "output_tokens": 20, "total_tokens": 30 }
    }))
    .unwrap()
}

/// HTTP client returning one scripted status for everything.
struct ScriptedHttp {
    status: u16,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedHttp {
    fn ok() -> Self {
        Self {
            status: 200,
            requests: Mutex::new(Vec::new()),
        }
    }

    fn failing() -> Self {
        Self {
            status: 500,
            requests: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl HttpClient for ScriptedHttp {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, EngineError> {
        self.requests.lock().unwrap().push(request);
        Ok(HttpResponse::text(self.status, "{}"))
    }
}

struct MockDriver {
    navigations: Arc<Mutex<Vec<String>>>,
    executed: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl ComputerDriver for MockDriver {
    async fn initialize(&mut self, _width: u32, _height: u32) -> Result<(), EngineError> {
        Ok(())
    }

    async fn navigate(&mut self, url: &str) -> Result<(), EngineError> {
        self.navigations.lock().unwrap().push(url.to_string());
        Ok(())
    }

    async fn execute_action(&mut self, action: &ComputerAction) -> Result<(), EngineError> {
        self.executed.lock().unwrap().push(action.action_type.clone());
        Ok(())
    }

    async fn screenshot(&mut self) -> Result<String, EngineError> {
        use base64::Engine;
        Ok(base64::engine::general_purpose::STANDARD.encode(b"\x89PNG\r\n\x1a\nshot"))
    }

    async fn current_url(&mut self) -> Option<String> {
        self.navigations.lock().unwrap().last().cloned()
    }

    async fn cleanup(&mut self) {}
}

struct MockDriverFactory {
    navigations: Arc<Mutex<Vec<String>>>,
    executed: Arc<Mutex<Vec<String>>>,
}

impl MockDriverFactory {
    fn new() -> Self {
        Self {
            navigations: Arc::new(Mutex::new(Vec::new())),
            executed: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

#[async_trait]
impl ComputerDriverFactory for MockDriverFactory {
    async fn acquire(&self) -> Result<Box<dyn ComputerDriver>, EngineError> {
        Ok(Box::new(MockDriver {
            navigations: self.navigations.clone(),
            executed: self.executed.clone(),
        }))
    }
}

struct EchoShellRunner;

#[async_trait]
impl ShellRunner for EchoShellRunner {
    async fn run(&self, request: ShellBatchRequest) -> Result<ShellBatchResult, EngineError> {
        Ok(ShellBatchResult {
            output: request
                .commands
                .iter()
                .map(|command| leadflow_provider::ShellCommandOutput {
                    stdout: format!("ran: {command}"),
                    stderr: String::new(),
                    outcome: None,
                })
                .collect(),
            max_output_length: request.max_output_length,
        })
    }
}

struct NoopBucket;

#[async_trait]
impl BucketWriter for NoopBucket {
    async fn exists(&self, _bucket: &str, _key: &str) -> Result<bool, EngineError> {
        Ok(false)
    }

    async fn put(
        &self,
        _bucket: &str,
        _key: &str,
        _bytes: bytes::Bytes,
        _content_type: &str,
    ) -> Result<(), EngineError> {
        Ok(())
    }
}

// ============================================================================
// Harness
// ============================================================================

struct Harness {
    records: Arc<MemoryRecordStore>,
    objects: Arc<MemoryObjectStore>,
    provider: Arc<ScriptedProvider>,
    http: Arc<ScriptedHttp>,
    driver_factory: Arc<MockDriverFactory>,
    engine: WorkflowEngine,
}

fn build_harness(responses: Vec<ProviderResponse>, http: ScriptedHttp) -> Harness {
    let records = Arc::new(MemoryRecordStore::new());
    let objects = Arc::new(MemoryObjectStore::new());
    let provider = Arc::new(ScriptedProvider::new(responses));
    let http = Arc::new(http);
    let driver_factory = Arc::new(MockDriverFactory::new());

    let mut config = RuntimeConfig::default();
    config.cua_max_iterations = 3;

    let services = Arc::new(Services::new(
        records.clone(),
        objects.clone(),
        provider.clone(),
        http.clone(),
        driver_factory.clone(),
        Arc::new(EchoShellRunner),
        Arc::new(NoopBucket),
        None,
        config,
    ));
    let engine = WorkflowEngine::new(services);

    Harness {
        records,
        objects,
        provider,
        http,
        driver_factory,
        engine,
    }
}

fn ai_step(name: &str, order: i64) -> WorkflowStep {
    let mut step = WorkflowStep::new(name, order, StepKind::AiGeneration);
    step.model = Some("gpt-5".to_string());
    step.instructions = format!("Produce the {name} section.");
    step
}

async fn seed_job(harness: &Harness, workflow: Workflow) -> TriggerMessage {
    let submission = Submission::new("s1", "t1")
        .with_field("email", "lead@example.com")
        .with_field("company", "Acme")
        .with_label("email", "Email Address");
    harness.records.seed_submission(submission).await;

    let job = Job::new("j1", "t1", workflow.workflow_id.clone(), "s1");
    harness
        .records
        .put_job(&job)
        .await
        .expect("job seeded");
    harness.records.seed_workflow(workflow).await;
    TriggerMessage::process_job(&job)
}

async fn load_trace(harness: &Harness) -> Vec<ExecutionStep> {
    harness.engine.services().trace.load("j1").await.unwrap()
}

// ============================================================================
// Seed scenarios
// ============================================================================

#[tokio::test]
async fn sequential_three_step_workflow_completes() {
    let harness = build_harness(
        vec![
            text_response("r1", "alpha"),
            text_response("r2", "beta"),
            text_response("r3", "gamma"),
        ],
        ScriptedHttp::ok(),
    );
    let mut workflow = Workflow::new("w1", "t1", "Sequential");
    workflow.html_enabled = false;
    workflow.steps = vec![ai_step("one", 0), ai_step("two", 1), ai_step("three", 2)];
    let trigger = seed_job(&harness, workflow).await;

    harness.engine.process(&trigger).await.unwrap();

    let job = harness.records.get_job("j1").await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert!(job.output_url.is_some());
    assert!(job.completed_at.is_some());
    // Only the blob key lives on the record.
    assert!(job.execution_steps_key.is_some());

    // 3 steps + final-output.
    let trace = load_trace(&harness).await;
    assert_eq!(trace.len(), 4);
    assert_eq!(trace[0].output_text(), Some("alpha"));
    assert_eq!(trace[1].output_text(), Some("beta"));
    assert_eq!(trace[2].output_text(), Some("gamma"));
    assert_eq!(trace[3].step_type, "final_output");

    // Second step's context carries the first step's output.
    let requests = harness.provider.requests();
    let RequestInput::Text(second_input) = &requests[1].input else {
        panic!("expected text input");
    };
    assert!(second_input.contains("Step 1: one"));
    assert!(second_input.contains("alpha"));
    assert!(second_input.contains("Email Address: lead@example.com"));

    // Usage recorded per model call.
    assert_eq!(harness.records.usage_records().await.len(), 3);
}

#[tokio::test]
async fn parallel_fan_in_runs_both_branches_before_join() {
    let harness = build_harness(
        vec![
            text_response("r1", "branch-a"),
            text_response("r2", "branch-b"),
            text_response("r3", "joined"),
        ],
        ScriptedHttp::ok(),
    );
    let mut workflow = Workflow::new("w1", "t1", "FanIn");
    workflow.html_enabled = false;
    let mut join = ai_step("join", 1);
    join.depends_on = Some(vec![json!(0), json!(1)]);
    workflow.steps = vec![ai_step("a", 0), ai_step("b", 0), join];
    let trigger = seed_job(&harness, workflow).await;

    harness.engine.process(&trigger).await.unwrap();

    let job = harness.records.get_job("j1").await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);

    let trace = load_trace(&harness).await;
    assert_eq!(trace.len(), 4);
    // Both parallel branches landed in the trace despite concurrent appends.
    let names: Vec<&str> = trace.iter().map(|s| s.step_name.as_str()).collect();
    assert!(names.contains(&"a"));
    assert!(names.contains(&"b"));

    // The join step saw both branch outputs in its context.
    let requests = harness.provider.requests();
    let join_request = requests
        .iter()
        .find_map(|r| match &r.input {
            RequestInput::Text(text) if text.contains("branch-a") && text.contains("branch-b") => {
                Some(text.clone())
            }
            _ => None,
        })
        .expect("join step saw both branches");
    assert!(join_request.contains("Step 1: a"));
    assert!(join_request.contains("Step 2: b"));
}

#[tokio::test]
async fn circular_dependencies_fail_validation_before_any_step() {
    let harness = build_harness(vec![], ScriptedHttp::ok());
    let mut workflow = Workflow::new("w1", "t1", "Cycle");
    workflow.html_enabled = false;
    let mut s1 = ai_step("s1", 0);
    s1.depends_on = Some(vec![json!(1)]);
    let mut s2 = ai_step("s2", 1);
    s2.depends_on = Some(vec![json!(0)]);
    workflow.steps = vec![s1, s2];
    let trigger = seed_job(&harness, workflow).await;

    let error = harness.engine.process(&trigger).await.unwrap_err();
    assert!(error.to_string().contains("Circular"));

    let job = harness.records.get_job("j1").await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error_type, Some(leadflow_workflow::ErrorType::Validation));
    assert!(job.error_message.unwrap().contains("Circular"));

    // No steps ran and no model calls were made.
    assert!(harness.provider.requests().is_empty());
    // Failure notification row was written.
    let notifications = harness.records.notifications().await;
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].notification_type, "job_failed");
}

#[tokio::test]
async fn generated_images_flow_into_the_next_step_as_input() {
    use base64::Engine;
    let png_b64 = base64::engine::general_purpose::STANDARD.encode(b"\x89PNG\r\n\x1a\nimg");

    // Step 1 returns JSON with two embedded base64 assets.
    let assets_json = json!({
        "assets": [
            { "id": "hero", "encoding": "base64", "content_type": "image/png", "data": png_b64 },
            { "id": "footer", "encoding": "base64", "content_type": "image/png", "data": png_b64 }
        ]
    })
    .to_string();

    let harness = build_harness(
        vec![text_response("r1", &assets_json), text_response("r2", "used images")],
        ScriptedHttp::ok(),
    );
    let mut workflow = Workflow::new("w1", "t1", "Images");
    workflow.html_enabled = false;
    let mut generate = ai_step("generate", 0);
    generate.tools = vec![json!({ "type": "image_generation" })];
    let mut compose = ai_step("compose", 1);
    compose.tools = vec![json!({ "type": "image_generation" })];
    workflow.steps = vec![generate, compose];
    let trigger = seed_job(&harness, workflow).await;

    harness.engine.process(&trigger).await.unwrap();

    // Step 1's trace record lists both uploaded image URLs.
    let trace = load_trace(&harness).await;
    assert_eq!(trace[0].image_urls.len(), 2);
    for url in &trace[0].image_urls {
        assert!(url.contains("/images/"));
        assert!(url.ends_with(".png"));
    }
    // The document was rewritten with the substituted URLs.
    let rewritten = trace[0].output_text().unwrap();
    assert!(rewritten.contains("\"encoding\": \"url\""));
    assert!(!rewritten.contains(&png_b64));

    // Step 2's request input carries input_image items at those URLs.
    let requests = harness.provider.requests();
    let RequestInput::Items(items) = &requests[1].input else {
        panic!("expected multimodal input for step 2");
    };
    let InputItem::Message(message) = &items[0] else {
        panic!("expected message item");
    };
    let image_urls: Vec<&str> = message
        .content
        .iter()
        .filter_map(|c| match c {
            ContentItem::InputImage { image_url } => Some(image_url.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(image_urls.len(), 2);
    for url in image_urls {
        assert!(trace[0].image_urls.iter().any(|u| u == url));
    }
}

#[tokio::test(start_paused = true)]
async fn computer_use_navigates_and_captures_screenshots() {
    let with_call: ProviderResponse = serde_json::from_value(json!({
        "id": "r1",
        "output": [{
            "type": "computer_call",
            "call_id": "cc1",
            "action": { "type": "screenshot" },
            "pending_safety_checks": []
        }]
    }))
    .unwrap();

    let harness = build_harness(
        vec![with_call, text_response("r2", "Browsing complete.")],
        ScriptedHttp::ok(),
    );
    let mut workflow = Workflow::new("w1", "t1", "Browse");
    workflow.html_enabled = false;
    let mut browse = ai_step("browse", 0);
    browse.model = Some("computer-use-preview".to_string());
    browse.instructions = "Visit https://example.com and describe the page.".to_string();
    browse.tools = vec![json!({ "type": "computer_use_preview" })];
    workflow.steps = vec![browse];
    let trigger = seed_job(&harness, workflow).await;

    harness.engine.process(&trigger).await.unwrap();

    let job = harness.records.get_job("j1").await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);

    // The driver navigated to the URL from the instructions.
    let navigations = harness.driver_factory.navigations.lock().unwrap().clone();
    assert!(navigations.iter().any(|u| u == "https://example.com"));
    let executed = harness.driver_factory.executed.lock().unwrap().clone();
    assert_eq!(executed, vec!["screenshot"]);

    // The screenshot was uploaded and recorded on the step.
    let trace = load_trace(&harness).await;
    assert!(!trace[0].image_urls.is_empty());
    assert!(trace[0].image_urls[0].contains("/images/"));
    assert_eq!(trace[0].output_text(), Some("Browsing complete."));

    // The follow-up turn chained via previous_response_id with a
    // computer_call_output screenshot item.
    let requests = harness.provider.requests();
    assert_eq!(requests[1].previous_response_id.as_deref(), Some("r1"));
    let RequestInput::Items(items) = &requests[1].input else {
        panic!("expected tool output items");
    };
    let InputItem::ComputerCallOutput(output) = &items[0] else {
        panic!("expected computer_call_output first");
    };
    assert_eq!(output.call_id, "cc1");
    assert!(output.output.image_url.starts_with("data:image/png;base64,"));
}

#[tokio::test]
async fn single_step_rerun_touches_only_its_trace_record() {
    let harness = build_harness(
        vec![
            text_response("r1", "alpha"),
            text_response("r2", "beta"),
            text_response("r3", "gamma"),
            // Rerun of the middle step.
            text_response("r4", "beta-rerun"),
        ],
        ScriptedHttp::ok(),
    );
    let mut workflow = Workflow::new("w1", "t1", "Rerun");
    workflow.html_enabled = false;
    workflow.steps = vec![ai_step("one", 0), ai_step("two", 1), ai_step("three", 2)];
    let trigger = seed_job(&harness, workflow).await;
    harness.engine.process(&trigger).await.unwrap();

    let before = load_trace(&harness).await;
    assert_eq!(before.len(), 4);
    let serialized_before: Vec<String> = before
        .iter()
        .map(|s| serde_json::to_string(s).unwrap())
        .collect();

    let job = harness.records.get_job("j1").await.unwrap().unwrap();
    let rerun = TriggerMessage::process_single_step(&job, 1);
    harness.engine.process(&rerun).await.unwrap();

    let after = load_trace(&harness).await;
    assert_eq!(after.len(), 4);
    for (index, record) in after.iter().enumerate() {
        let serialized = serde_json::to_string(record).unwrap();
        if record.step_order == 2 {
            assert_eq!(record.output_text(), Some("beta-rerun"));
            assert_ne!(serialized, serialized_before[index]);
        } else {
            // Untouched records are byte-equal.
            assert_eq!(serialized, serialized_before[index]);
        }
    }

    // The job stayed completed.
    let job = harness.records.get_job("j1").await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
}

// ============================================================================
// Invariants
// ============================================================================

#[tokio::test(start_paused = true)]
async fn delivery_failure_leaves_job_completed() {
    let harness = build_harness(vec![text_response("r1", "content")], ScriptedHttp::failing());
    let mut workflow = Workflow::new("w1", "t1", "Deliver");
    workflow.html_enabled = false;
    workflow.steps = vec![ai_step("one", 0)];
    workflow.delivery = DeliveryConfig {
        method: DeliveryMethod::Webhook,
        webhook_url: Some("https://receiver.example.com/hook".to_string()),
        ..Default::default()
    };
    let trigger = seed_job(&harness, workflow).await;

    harness.engine.process(&trigger).await.unwrap();

    let job = harness.records.get_job("j1").await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert!(job.error_message.is_none());

    // Delivery was attempted (and retried) against the failing receiver.
    let delivery_attempts = harness
        .http
        .requests
        .lock()
        .unwrap()
        .iter()
        .filter(|r| r.url.contains("receiver.example.com"))
        .count();
    assert_eq!(delivery_attempts, 3);

    // Completion notification still written.
    let notifications = harness.records.notifications().await;
    assert!(notifications
        .iter()
        .any(|n| n.notification_type == "job_completed"));
}

#[tokio::test]
async fn webhook_step_posts_auto_payload() {
    let harness = build_harness(vec![text_response("r1", "research")], ScriptedHttp::ok());
    let mut workflow = Workflow::new("w1", "t1", "Hook");
    workflow.html_enabled = false;
    let mut hook = WorkflowStep::new("notify", 1, StepKind::Webhook);
    hook.webhook = Some(leadflow_workflow::WebhookConfig {
        url: "https://consumer.example.com/hook".to_string(),
        ..Default::default()
    });
    workflow.steps = vec![ai_step("one", 0), hook];
    let trigger = seed_job(&harness, workflow).await;

    harness.engine.process(&trigger).await.unwrap();

    let requests = harness.http.requests.lock().unwrap();
    let hook_request = requests
        .iter()
        .find(|r| r.url.contains("consumer.example.com"))
        .expect("webhook request sent");
    let body = hook_request.body.as_ref().unwrap();
    assert_eq!(body["job_info"]["job_id"], "j1");
    assert_eq!(body["step_outputs"]["step_0"]["output"], "research");
    assert_eq!(body["submission_data"]["company"], "Acme");
}

#[tokio::test]
async fn continue_on_error_lets_the_job_finish() {
    let harness = build_harness(
        vec![text_response("r1", "survivor")],
        ScriptedHttp::failing(),
    );
    let mut workflow = Workflow::new("w1", "t1", "Tolerant");
    workflow.html_enabled = false;
    // The failing webhook step is tolerated; the ai step supplies output.
    let mut hook = WorkflowStep::new("flaky-hook", 1, StepKind::Webhook);
    hook.continue_on_error = true;
    hook.webhook = Some(leadflow_workflow::WebhookConfig {
        url: "https://consumer.example.com/hook".to_string(),
        ..Default::default()
    });
    workflow.steps = vec![ai_step("one", 0), hook];
    let trigger = seed_job(&harness, workflow).await;

    harness.engine.process(&trigger).await.unwrap();

    let job = harness.records.get_job("j1").await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);

    // The webhook failure is preserved in the trace.
    let trace = load_trace(&harness).await;
    let hook_record = trace.iter().find(|s| s.step_name == "flaky-hook").unwrap();
    assert!(!hook_record.success);
}

#[tokio::test]
async fn legacy_workflow_generates_report_and_finalizes() {
    let harness = build_harness(
        vec![text_response("r1", "# Research Report\nFindings.")],
        ScriptedHttp::ok(),
    );
    let mut workflow = Workflow::new("w1", "t1", "Legacy");
    workflow.html_enabled = false;
    workflow.ai_instructions = "Research the company.".to_string();
    let trigger = seed_job(&harness, workflow).await;

    harness.engine.process(&trigger).await.unwrap();

    let job = harness.records.get_job("j1").await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    // report.md + final.md both recorded as artifacts.
    let artifacts = harness.records.artifacts_for_job("j1").await;
    assert!(artifacts.iter().any(|a| a.name == "report.md"));
    assert!(artifacts.iter().any(|a| a.name == "final.md"));
    assert!(harness.objects.contains("t1/jobs/j1/report.md").await);

    let trace = load_trace(&harness).await;
    assert_eq!(trace[0].step_name, "AI Research Report");
    assert_eq!(trace.last().unwrap().step_type, "final_output");
}

#[tokio::test]
async fn html_finalization_injects_tracking_exactly_once() {
    let harness = build_harness(
        vec![
            text_response("r1", "step content"),
            text_response("r2", "<html><body><h1>Doc</h1></body></html>"),
        ],
        ScriptedHttp::ok(),
    );
    let mut workflow = Workflow::new("w1", "t1", "Html");
    workflow.template_id = Some("tmpl1".to_string());
    workflow.steps = vec![ai_step("one", 0)];
    harness
        .records
        .seed_template(leadflow_workflow::Template {
            template_id: "tmpl1".to_string(),
            version: 1,
            html_content: "<html><body>{{content}}</body></html>".to_string(),
            style_description: "clean".to_string(),
        })
        .await;
    let trigger = seed_job(&harness, workflow).await;

    harness.engine.process(&trigger).await.unwrap();

    let job = harness.records.get_job("j1").await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);

    let html_bytes = harness
        .engine
        .services()
        .objects
        .get("t1/jobs/j1/final.html")
        .await
        .unwrap();
    let html = String::from_utf8(html_bytes.to_vec()).unwrap();
    assert_eq!(html.matches("Lead Magnet Tracking Script").count(), 1);
    let marker_pos = html.find("Lead Magnet Tracking Script").unwrap();
    assert!(marker_pos < html.find("</body>").unwrap());

    // html_generation step recorded before the final-output record.
    let trace = load_trace(&harness).await;
    let types: Vec<&str> = trace.iter().map(|s| s.step_type.as_str()).collect();
    assert_eq!(types, vec!["ai_generation", "html_generation", "final_output"]);
}

#[tokio::test]
async fn shell_step_runs_loop_and_submits_outputs() {
    let with_shell_call: ProviderResponse = serde_json::from_value(json!({
        "id": "r1",
        "output": [{
            "type": "shell_call",
            "call_id": "sc1",
            "action": { "commands": ["echo hello"] }
        }]
    }))
    .unwrap();

    let harness = build_harness(
        vec![with_shell_call, text_response("r2", "Build finished.")],
        ScriptedHttp::ok(),
    );
    let mut workflow = Workflow::new("w1", "t1", "Shell");
    workflow.html_enabled = false;
    let mut build = WorkflowStep::new("build", 0, StepKind::Shell);
    build.model = Some("gpt-5".to_string());
    build.instructions = "Build the landing page.".to_string();
    workflow.steps = vec![build];
    let trigger = seed_job(&harness, workflow).await;

    harness.engine.process(&trigger).await.unwrap();

    let job = harness.records.get_job("j1").await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);

    // The follow-up turn submitted a shell_call_output for the batch.
    let requests = harness.provider.requests();
    let RequestInput::Items(items) = &requests[1].input else {
        panic!("expected shell output items");
    };
    let InputItem::ShellCallOutput(output) = &items[0] else {
        panic!("expected shell_call_output");
    };
    assert_eq!(output.call_id, "sc1");
    assert_eq!(output.output[0].stdout, "ran: echo hello");
    assert_eq!(output.max_output_length, 4096);

    let trace = load_trace(&harness).await;
    assert_eq!(trace[0].output_text(), Some("Build finished."));
}
