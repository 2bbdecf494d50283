//! # leadflow-core
//!
//! Workflow execution engine for leadflow.
//!
//! This crate drives lead-magnet jobs end to end: it resolves the step
//! DAG into execution groups, runs each step through a registered handler
//! (model calls with tool loops, webhooks, handoffs, shell batches,
//! external uploads), persists every intermediate artifact and the
//! blob-backed execution trace, and finalizes the job with a public
//! deliverable plus optional webhook/SMS delivery.

pub mod artifacts;
pub mod config;
pub mod context;
pub mod delivery;
pub mod drivers;
pub mod engine;
pub mod error;
pub mod finalize;
pub mod handlers;
pub mod handoff;
pub mod http;
pub mod loops;
pub mod redact;
pub mod runtime;
pub mod s3_upload;
pub mod store;
pub mod trace;
pub mod tracking;
pub mod usage;
pub mod webhook;

pub use artifacts::{ArtifactService, JobImageSink};
pub use config::{CuaDriverConfig, RuntimeConfig, ShellUploadMode};
pub use delivery::SmsGateway;
pub use drivers::{
    derive_workspace_id, ComputerDriver, ComputerDriverFactory, ShellBatchRequest,
    ShellBatchResult, ShellRunner,
};
pub use engine::WorkflowEngine;
pub use error::EngineError;
pub use finalize::JobFinalizer;
pub use handlers::{Services, StepHandler, StepHandlerRegistry, StepInvocation};
pub use http::{HttpClient, HttpRequest, HttpResponse, ReqwestHttpClient};
pub use loops::{LoopEvent, LoopTermination};
pub use runtime::RuntimeContext;
pub use s3_upload::{BucketWriter, OutputPublisher};
pub use store::{MemoryObjectStore, MemoryRecordStore, ObjectStore, RecordStore};
pub use trace::{TraceMode, TraceStore};
