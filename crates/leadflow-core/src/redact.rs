//! Secret redaction for persisted request fields.
//!
//! Applied to everything that lands in the execution trace (`input`,
//! request dumps) and to error messages recorded on failed jobs.

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

pub const REDACTED: &str = "[REDACTED]";

/// Keys whose values are always redacted wherever they appear.
const SECRET_KEYS: &[&str] = &[
    "authorization",
    "api_key",
    "apikey",
    "x-api-key",
    "token",
    "secret",
    "password",
    "webhook_token",
];

fn secret_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        vec![
            // Bearer / Basic credentials in header-like text.
            Regex::new(r"(?i)\b(bearer|basic)\s+[A-Za-z0-9._~+/=\-]{8,}").expect("valid regex"),
            // Provider-style API keys.
            Regex::new(r"\bsk-[A-Za-z0-9_\-]{10,}").expect("valid regex"),
            // key=value / key: value pairs with secret-shaped keys.
            Regex::new(
                r#"(?i)\b(api[_-]?key|token|secret|password)["']?\s*[:=]\s*["']?[A-Za-z0-9._~+/\-]{8,}"#,
            )
            .expect("valid regex"),
        ]
    })
}

/// Redact secret-shaped substrings from free text.
pub fn redact_text(text: &str) -> String {
    let mut result = text.to_string();
    for pattern in secret_patterns() {
        result = pattern.replace_all(&result, REDACTED).to_string();
    }
    result
}

/// Redact a JSON value in place: secret-named keys are replaced wholesale,
/// and string values are scrubbed for secret-shaped substrings.
pub fn redact_value(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, entry) in map.iter_mut() {
                if SECRET_KEYS.contains(&key.to_ascii_lowercase().as_str()) {
                    *entry = Value::String(REDACTED.to_string());
                } else {
                    redact_value(entry);
                }
            }
        }
        Value::Array(entries) => {
            for entry in entries.iter_mut() {
                redact_value(entry);
            }
        }
        Value::String(s) => {
            let redacted = redact_text(s);
            if redacted != *s {
                *s = redacted;
            }
        }
        _ => {}
    }
}

/// Redacted copy of a JSON value.
pub fn redacted(value: &Value) -> Value {
    let mut copy = value.clone();
    redact_value(&mut copy);
    copy
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn bearer_tokens_are_scrubbed() {
        let text = "calling with Authorization: Bearer abcd1234efgh5678 now";
        let redacted = redact_text(text);
        assert!(!redacted.contains("abcd1234efgh5678"));
        assert!(redacted.contains(REDACTED));
    }

    #[test]
    fn provider_keys_are_scrubbed() {
        let redacted = redact_text("use sk-proj4abcdef1234567890 for this");
        assert!(!redacted.contains("sk-proj4abcdef1234567890"));
    }

    #[test]
    fn secret_keys_replaced_in_objects() {
        let value = json!({
            "model": "gpt-5",
            "headers": { "Authorization": "Bearer tok_12345678", "X-Api-Key": "key_12345678" },
            "nested": [{ "token": "tkn_12345678" }],
            "instructions": "api_key=abcdefgh12345678 inside text"
        });
        let clean = redacted(&value);
        assert_eq!(clean["headers"]["Authorization"], REDACTED);
        assert_eq!(clean["headers"]["X-Api-Key"], REDACTED);
        assert_eq!(clean["nested"][0]["token"], REDACTED);
        assert!(!clean["instructions"].as_str().unwrap().contains("abcdefgh12345678"));
        assert_eq!(clean["model"], "gpt-5");
    }
}
