//! Usage recording and cost computation.

use std::sync::Arc;

use crate::store::RecordStore;
use leadflow_workflow::{Usage, UsageRecord};

/// Per-million-token prices (input, output) by model prefix. Longest
/// matching prefix wins; unknown models record zero cost.
const MODEL_PRICES: &[(&str, f64, f64)] = &[
    ("gpt-5-mini", 0.25, 2.0),
    ("gpt-5-nano", 0.05, 0.4),
    ("gpt-5", 1.25, 10.0),
    ("gpt-4.1-mini", 0.4, 1.6),
    ("gpt-4.1", 2.0, 8.0),
    ("computer-use-preview", 3.0, 12.0),
    ("o4-deep-research", 2.0, 8.0),
];

/// Cost in USD for one call.
pub fn calculate_cost(model: &str, input_tokens: u64, output_tokens: u64) -> f64 {
    let price = MODEL_PRICES
        .iter()
        .filter(|(prefix, _, _)| model.starts_with(prefix))
        .max_by_key(|(prefix, _, _)| prefix.len());
    match price {
        Some((_, input_price, output_price)) => {
            (input_tokens as f64 / 1_000_000.0) * input_price
                + (output_tokens as f64 / 1_000_000.0) * output_price
        }
        None => 0.0,
    }
}

/// Best-effort usage recording. One record per model call; failures are
/// logged and never fail the job.
pub struct UsageService {
    records: Arc<dyn RecordStore>,
}

impl UsageService {
    pub fn new(records: Arc<dyn RecordStore>) -> Self {
        Self { records }
    }

    pub async fn record(
        &self,
        tenant_id: &str,
        job_id: &str,
        model: &str,
        usage: &Usage,
        service_type: &str,
    ) {
        let record = UsageRecord {
            usage_id: format!("usage_{}", uuid::Uuid::new_v4().simple()),
            tenant_id: tenant_id.to_string(),
            job_id: job_id.to_string(),
            model: model.to_string(),
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            cost_usd: calculate_cost(model, usage.input_tokens, usage.output_tokens),
            service_type: service_type.to_string(),
            created_at: chrono::Utc::now(),
        };

        if let Err(e) = self.records.put_usage_record(&record).await {
            tracing::error!(job_id, tenant_id, error = %e, "failed to store usage record");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn longest_prefix_wins() {
        let mini = calculate_cost("gpt-5-mini", 1_000_000, 0);
        let full = calculate_cost("gpt-5", 1_000_000, 0);
        assert!(mini < full);
    }

    #[test]
    fn unknown_models_cost_zero() {
        assert_eq!(calculate_cost("some-local-model", 1_000_000, 1_000_000), 0.0);
    }
}
