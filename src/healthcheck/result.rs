//! Per-attempt result record.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::healthcheck::{Check, CheckError, Source};

/// Maximum length of a failure message built from an HTTP response body.
pub const MAX_MESSAGE_SIZE: usize = 1000;

/// Outcome of one probe attempt, fanned out to the store, the metrics
/// surface and the exporters. Equality is structural across all fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CheckResult {
    pub name: String,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
    pub success: bool,
    /// Unix seconds at attempt completion.
    pub healthcheck_timestamp: i64,
    pub message: String,
    /// Attempt duration in milliseconds.
    pub duration: u64,
    pub source: Source,
}

impl CheckResult {
    /// Build the result for one finished attempt.
    pub fn from_attempt(check: &Check, outcome: &Result<(), CheckError>, duration: Duration) -> Self {
        let base = check.base();
        let (success, message) = match outcome {
            Ok(()) => (true, "success".to_string()),
            Err(err) => (false, err.to_string()),
        };
        CheckResult {
            name: base.name.clone(),
            summary: check.summary(),
            labels: base.labels.clone(),
            success,
            healthcheck_timestamp: chrono::Utc::now().timestamp(),
            message,
            duration: duration.as_millis() as u64,
            source: base.source.clone(),
        }
    }
}

/// HTML-escape a response fragment before it lands in a failure message.
pub fn escape_message(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&#34;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Truncate a response body to [`MAX_MESSAGE_SIZE`] characters, on a char
/// boundary.
pub fn truncate_message(input: &str) -> &str {
    match input.char_indices().nth(MAX_MESSAGE_SIZE) {
        Some((idx, _)) => &input[..idx],
        None => input,
    }
}
