//! Tool result validation and payload compression.

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use serde::Serialize;
use serde_json::{json, Map, Value};

use super::{ToolData, ToolResult};

/// Default serialized-size budget for `data`.
pub const DEFAULT_MAX_LENGTH: usize = 1000;

/// Elements kept from an oversized array.
const SAMPLE_SIZE: usize = 3;

/// Outcome of checking a raw payload against the tool result contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolValidation {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl ToolValidation {
    fn ok() -> Self {
        Self {
            valid: true,
            error: None,
            suggestion: None,
        }
    }

    fn invalid(error: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self {
            valid: false,
            error: Some(error.into()),
            suggestion: Some(suggestion.into()),
        }
    }
}

/// Check that a raw payload honors the tool result contract.
///
/// Rejects non-objects, a missing or non-boolean `success`, and failed results
/// without an `error` string. Tool-specific checks only log.
pub fn validate_tool_result(raw: &Value, tool_name: &str) -> ToolValidation {
    let Some(object) = raw.as_object() else {
        return ToolValidation::invalid(
            format!("{} returned {} instead of an object", tool_name, json_kind(raw)),
            "Return an object such as {\"success\": true, \"data\": ...}",
        );
    };

    let success = match object.get("success") {
        Some(Value::Bool(success)) => *success,
        Some(other) => {
            return ToolValidation::invalid(
                format!(
                    "{} returned a non-boolean `success` field ({})",
                    tool_name,
                    json_kind(other)
                ),
                "Set `success` to true or false",
            )
        }
        None => {
            return ToolValidation::invalid(
                format!("{} result is missing the `success` field", tool_name),
                "Include `success: true` or `success: false` in every result",
            )
        }
    };

    if !success && !matches!(object.get("error"), Some(Value::String(_))) {
        return ToolValidation::invalid(
            format!("{} failed without an `error` message", tool_name),
            "Include an `error` string describing why the call failed",
        );
    }

    advisory_checks(object, success, tool_name);
    ToolValidation::ok()
}

fn advisory_checks(object: &Map<String, Value>, success: bool, tool_name: &str) {
    if success {
        if let Some(Value::String(stderr)) = object.get("stderr") {
            if !stderr.trim().is_empty() {
                tracing::warn!(
                    tool = tool_name,
                    stderr_len = stderr.len(),
                    "Tool reported success but wrote to stderr"
                );
            }
        }
    }

    let name = tool_name.to_lowercase();
    let is_listing = ["list", "search", "fetch"].iter().any(|k| name.contains(k));
    if is_listing && matches!(object.get("data"), Some(Value::Array(items)) if items.is_empty()) {
        tracing::debug!(tool = tool_name, "Listing tool returned no items");
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Shrink `data` when it exceeds `max_length`.
///
/// - arrays become `{type: "array", count, sample, preview}`
/// - objects become `{type: "object", keys, preview}`
/// - text and scalars are truncated with a byte-count marker
pub fn compress_result(mut result: ToolResult, max_length: usize) -> ToolResult {
    let Some(data) = result.data.take() else {
        return result;
    };

    let original_len = data.measured_len();
    if original_len <= max_length {
        result.data = Some(data);
        return result;
    }

    let preview_len = max_length / 2;
    let compressed = match data {
        ToolData::List(items) => {
            let serialized = serde_json::to_string(&items).unwrap_or_default();
            let mut summary = Map::new();
            summary.insert("type".into(), json!("array"));
            summary.insert("count".into(), json!(items.len()));
            summary.insert(
                "sample".into(),
                Value::Array(items.into_iter().take(SAMPLE_SIZE).collect()),
            );
            summary.insert("preview".into(), json!(preview(&serialized, preview_len)));
            ToolData::Record(summary)
        }
        ToolData::Record(map) => {
            let serialized = serde_json::to_string(&map).unwrap_or_default();
            let mut summary = Map::new();
            summary.insert("type".into(), json!("object"));
            summary.insert(
                "keys".into(),
                Value::Array(map.keys().cloned().map(Value::String).collect()),
            );
            summary.insert("preview".into(), json!(preview(&serialized, preview_len)));
            ToolData::Record(summary)
        }
        ToolData::Text(text) => ToolData::Text(truncate_with_marker(&text, max_length)),
        ToolData::Scalar(value) => ToolData::Text(truncate_with_marker(&value.to_string(), max_length)),
    };

    tracing::debug!(
        original_len,
        compressed_len = compressed.measured_len(),
        max_length,
        "Compressed tool result"
    );
    result.data = Some(compressed);
    result
}

/// First `max_chars` characters, respecting UTF-8 boundaries.
fn head(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

fn preview(serialized: &str, max_chars: usize) -> String {
    let kept = head(serialized, max_chars);
    if kept.len() < serialized.len() {
        format!("{}...", kept)
    } else {
        kept.to_string()
    }
}

fn truncate_with_marker(text: &str, max_chars: usize) -> String {
    let kept = head(text, max_chars);
    let omitted = text.len() - kept.len();
    format!("{}... [truncated {} bytes]", kept, omitted)
}

fn rate_limit_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)rate[\s_-]?limit|too many requests|\b429\b|quota exceeded").unwrap()
    })
}

fn retry_after_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)retry[\s_-]?after\D{0,3}?(\d+(?:\.\d+)?)(?:\s*(ms|milliseconds?|seconds?|secs?|s|minutes?|mins?|m)\b)?",
        )
        .unwrap()
    })
}

/// Whether a result's `error`/`stderr` text indicates rate limiting.
pub fn is_rate_limited(result: &ToolResult) -> bool {
    rate_limit_regex().is_match(&result.failure_text())
}

/// Explicit "retry after N" hint in `error`/`stderr`.
///
/// A bare number is read as seconds.
pub fn get_retry_after(result: &ToolResult) -> Option<Duration> {
    let text = result.failure_text();
    let captures = retry_after_regex().captures(&text)?;
    let amount: f64 = captures.get(1)?.as_str().parse().ok()?;
    let unit = captures
        .get(2)
        .map(|m| m.as_str().to_lowercase())
        .unwrap_or_default();

    let millis = match unit.as_str() {
        "ms" | "millisecond" | "milliseconds" => amount,
        "m" | "min" | "mins" | "minute" | "minutes" => amount * 60_000.0,
        _ => amount * 1000.0,
    };
    Some(Duration::from_millis(millis.round() as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_non_object() {
        let validation = validate_tool_result(&json!("ok"), "github_list_repos");
        assert!(!validation.valid);
        assert!(validation.error.unwrap().contains("a string"));
        assert!(validation.suggestion.is_some());
    }

    #[test]
    fn test_rejects_missing_or_non_boolean_success() {
        let missing = validate_tool_result(&json!({"data": []}), "trello_cards");
        assert!(!missing.valid);
        assert!(missing.error.unwrap().contains("missing"));

        let wrong = validate_tool_result(&json!({"success": "yes"}), "trello_cards");
        assert!(!wrong.valid);
    }

    #[test]
    fn test_failed_result_needs_error_string() {
        let bare = validate_tool_result(&json!({"success": false}), "gcloud");
        assert!(!bare.valid);

        let numeric = validate_tool_result(&json!({"success": false, "error": 500}), "gcloud");
        assert!(!numeric.valid);

        let described =
            validate_tool_result(&json!({"success": false, "error": "quota"}), "gcloud");
        assert!(described.valid);
    }

    #[test]
    fn test_advisory_checks_never_block() {
        let noisy = json!({"success": true, "data": [], "stderr": "warning: deprecated"});
        assert_eq!(validate_tool_result(&noisy, "search_repos"), ToolValidation::ok());
    }

    #[test]
    fn test_small_payload_untouched() {
        let result = ToolResult::ok(json!({"id": 1, "name": "board"}));
        assert_eq!(compress_result(result.clone(), DEFAULT_MAX_LENGTH), result);

        let empty = ToolResult::failure("nope");
        assert_eq!(compress_result(empty.clone(), 10), empty);
    }

    #[test]
    fn test_long_string_truncated_with_marker() {
        let text = "x".repeat(5000);
        let compressed = compress_result(ToolResult::ok(text), 1000);

        let Some(ToolData::Text(out)) = compressed.data else {
            panic!("expected text data");
        };
        assert!(out.len() <= 1040);
        assert!(out.starts_with(&"x".repeat(1000)));
        assert!(out.ends_with("... [truncated 4000 bytes]"));
    }

    #[test]
    fn test_truncation_respects_utf8() {
        let text = "é".repeat(20);
        let compressed = compress_result(ToolResult::ok(text), 5);
        let Some(ToolData::Text(out)) = compressed.data else {
            panic!("expected text data");
        };
        assert!(out.starts_with("ééééé..."));
        assert!(out.ends_with("[truncated 30 bytes]"));
    }

    #[test]
    fn test_large_array_summarized() {
        let items: Vec<Value> = (0..8)
            .map(|i| json!({"id": i, "body": "y".repeat(200)}))
            .collect();
        let compressed = compress_result(ToolResult::ok(Value::Array(items)), 1000);

        let Some(ToolData::Record(summary)) = compressed.data else {
            panic!("expected summary record");
        };
        assert_eq!(summary["type"], json!("array"));
        assert_eq!(summary["count"], json!(8));
        assert_eq!(summary["sample"].as_array().unwrap().len(), 3);
        assert!(summary["preview"].as_str().unwrap().ends_with("..."));
    }

    #[test]
    fn test_large_object_summarized() {
        let object = json!({"alpha": "a".repeat(600), "beta": "b".repeat(600)});
        let compressed = compress_result(ToolResult::ok(object), 1000);

        let Some(ToolData::Record(summary)) = compressed.data else {
            panic!("expected summary record");
        };
        assert_eq!(summary["type"], json!("object"));
        assert_eq!(summary["keys"], json!(["alpha", "beta"]));
        assert!(summary["preview"].as_str().unwrap().len() <= 503);
    }

    #[test]
    fn test_rate_limit_detection() {
        let limited = ToolResult::failure("GitHub API rate limit exceeded");
        assert!(is_rate_limited(&limited));

        let stderr = ToolResult::failure("exit status 1").with_stderr("HTTP 429");
        assert!(is_rate_limited(&stderr));

        assert!(!is_rate_limited(&ToolResult::failure("not found")));
    }

    #[test]
    fn test_retry_after_hint() {
        let seconds = ToolResult::failure("Too many requests, retry after 30 seconds");
        assert_eq!(get_retry_after(&seconds), Some(Duration::from_secs(30)));

        let header = ToolResult::failure("rate limited").with_stderr("Retry-After: 5");
        assert_eq!(get_retry_after(&header), Some(Duration::from_secs(5)));

        let millis = ToolResult::failure("retry after 250ms");
        assert_eq!(get_retry_after(&millis), Some(Duration::from_millis(250)));

        let minutes = ToolResult::failure("quota exceeded, retry after 2 minutes");
        assert_eq!(get_retry_after(&minutes), Some(Duration::from_secs(120)));

        assert_eq!(get_retry_after(&ToolResult::failure("rate limit")), None);
    }
}
