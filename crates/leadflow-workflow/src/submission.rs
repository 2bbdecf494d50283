//! Form submission records.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A form submission: field id → value, plus optional display labels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    pub submission_id: String,
    pub tenant_id: String,
    /// Raw form values keyed by field id.
    #[serde(default)]
    pub submission_data: serde_json::Map<String, serde_json::Value>,
    /// Field id → human label, resolved from the form schema. Fields
    /// missing from the map render under their raw id.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub field_labels: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submitter_email: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl Submission {
    pub fn new(submission_id: impl Into<String>, tenant_id: impl Into<String>) -> Self {
        Self {
            submission_id: submission_id.into(),
            tenant_id: tenant_id.into(),
            submission_data: serde_json::Map::new(),
            field_labels: HashMap::new(),
            submitter_email: None,
            created_at: chrono::Utc::now(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.submission_data.insert(key.into(), value.into());
        self
    }

    pub fn with_label(mut self, field: impl Into<String>, label: impl Into<String>) -> Self {
        self.field_labels.insert(field.into(), label.into());
        self
    }

    /// Display label for a field, defaulting to the field id.
    pub fn label_for<'a>(&'a self, field: &'a str) -> &'a str {
        self.field_labels.get(field).map(String::as_str).unwrap_or(field)
    }
}
