//! Execution trace store.
//!
//! The canonical trace for a job is a JSON array of [`ExecutionStep`]
//! records stored as one blob under `jobs/{job_id}/execution_steps.json`.
//! Writes go through the blob without exception; the job record only ever
//! holds the key. Rewriters re-read the blob first so entries appended by
//! parallel siblings are never lost.

use bytes::Bytes;
use std::sync::Arc;

use crate::error::EngineError;
use crate::store::{trace_key, ObjectStore, RecordStore};
use leadflow_workflow::{ExecutionStep, JobUpdate};

/// Where a handler's trace record lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceMode {
    /// Append after a fresh reload (normal execution).
    Append,
    /// Replace the record whose `step_order` matches (single-step rerun);
    /// appended when no such record exists.
    ReplaceAtOrder(i64),
}

/// Blob-backed store for per-job execution traces.
#[derive(Clone)]
pub struct TraceStore {
    records: Arc<dyn RecordStore>,
    objects: Arc<dyn ObjectStore>,
    /// Serializes record() cycles so parallel group members cannot
    /// interleave their load/persist pairs and drop each other's entries.
    write_lock: Arc<tokio::sync::Mutex<()>>,
}

impl TraceStore {
    pub fn new(records: Arc<dyn RecordStore>, objects: Arc<dyn ObjectStore>) -> Self {
        Self {
            records,
            objects,
            write_lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    /// Load the trace for a job. A job with no trace key yields an empty
    /// list; a present key whose blob fails to load degrades to empty with
    /// an error log (the read path tolerates the write window).
    pub async fn load(&self, job_id: &str) -> Result<Vec<ExecutionStep>, EngineError> {
        let job = self
            .records
            .get_job(job_id)
            .await?
            .ok_or_else(|| EngineError::JobNotFound(job_id.to_string()))?;

        let Some(key) = job.execution_steps_key else {
            return Ok(Vec::new());
        };

        match self.objects.get(&key).await {
            Ok(bytes) => match serde_json::from_slice::<Vec<ExecutionStep>>(&bytes) {
                Ok(steps) => Ok(steps),
                Err(e) => {
                    tracing::error!(job_id, key, error = %e, "failed to parse execution trace");
                    Ok(Vec::new())
                }
            },
            Err(e) => {
                tracing::error!(job_id, key, error = %e, "failed to load execution trace blob");
                Ok(Vec::new())
            }
        }
    }

    /// Persist a full trace: one blob put, then the job-record key update.
    /// Persistence failure is fatal — integrity trumps progress.
    pub async fn persist(
        &self,
        job_id: &str,
        steps: &[ExecutionStep],
    ) -> Result<(), EngineError> {
        let key = trace_key(job_id);
        let json = serde_json::to_vec(steps)
            .map_err(|e| EngineError::TracePersistence(e.to_string()))?;

        self.objects
            .put(&key, Bytes::from(json), "application/json", true)
            .await
            .map_err(|e| EngineError::TracePersistence(e.to_string()))?;

        self.records
            .update_job(
                job_id,
                JobUpdate {
                    execution_steps_key: Some(key.clone()),
                    updated_at: Some(chrono::Utc::now()),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| EngineError::TracePersistence(e.to_string()))?;

        tracing::debug!(job_id, key, steps_count = steps.len(), "persisted execution trace");
        Ok(())
    }

    /// Record one step according to the trace mode, re-reading the blob
    /// first so concurrent appends are preserved. Returns the trace as
    /// persisted.
    pub async fn record(
        &self,
        job_id: &str,
        step: ExecutionStep,
        mode: TraceMode,
    ) -> Result<Vec<ExecutionStep>, EngineError> {
        let _guard = self.write_lock.lock().await;
        let mut steps = self.load(job_id).await?;
        match mode {
            TraceMode::Append => steps.push(step),
            TraceMode::ReplaceAtOrder(order) => {
                match steps.iter_mut().find(|s| s.step_order == order) {
                    Some(slot) => *slot = step,
                    None => steps.push(step),
                }
            }
        }
        self.persist(job_id, &steps).await?;
        Ok(steps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryObjectStore, MemoryRecordStore};
    use leadflow_workflow::Job;

    async fn store_with_job() -> (TraceStore, Arc<MemoryRecordStore>) {
        let records = Arc::new(MemoryRecordStore::new());
        let objects = Arc::new(MemoryObjectStore::new());
        records
            .put_job(&Job::new("j1", "t1", "w1", "s1"))
            .await
            .unwrap();
        (
            TraceStore::new(records.clone(), objects),
            records,
        )
    }

    #[tokio::test]
    async fn trace_round_trips_through_the_blob() {
        let (trace, records) = store_with_job().await;
        trace
            .record("j1", ExecutionStep::new("a", 1, "ai_generation"), TraceMode::Append)
            .await
            .unwrap();
        trace
            .record("j1", ExecutionStep::new("b", 2, "webhook"), TraceMode::Append)
            .await
            .unwrap();

        let loaded = trace.load("j1").await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[1].step_name, "b");

        // Only the key lives on the record.
        let job = records.get_job("j1").await.unwrap().unwrap();
        assert_eq!(job.execution_steps_key.as_deref(), Some("jobs/j1/execution_steps.json"));
    }

    #[tokio::test]
    async fn append_reloads_before_writing() {
        let (trace, _) = store_with_job().await;
        // Simulate a parallel sibling writing between this writer's load and
        // record: record() must re-read, so the sibling's entry survives.
        trace
            .record("j1", ExecutionStep::new("sibling", 1, "ai_generation"), TraceMode::Append)
            .await
            .unwrap();
        let steps = trace
            .record("j1", ExecutionStep::new("mine", 2, "ai_generation"), TraceMode::Append)
            .await
            .unwrap();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].step_name, "sibling");
    }

    #[tokio::test]
    async fn replace_at_order_touches_only_the_slot() {
        let (trace, _) = store_with_job().await;
        for (name, order) in [("a", 1), ("b", 2), ("c", 3)] {
            trace
                .record("j1", ExecutionStep::new(name, order, "ai_generation"), TraceMode::Append)
                .await
                .unwrap();
        }

        let mut replacement = ExecutionStep::new("b-rerun", 2, "ai_generation");
        replacement.output = serde_json::Value::String("new".into());
        let steps = trace
            .record("j1", replacement, TraceMode::ReplaceAtOrder(2))
            .await
            .unwrap();

        assert_eq!(steps.len(), 3);
        assert_eq!(steps[0].step_name, "a");
        assert_eq!(steps[1].step_name, "b-rerun");
        assert_eq!(steps[2].step_name, "c");
    }
}
