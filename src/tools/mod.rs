//! Tool results and the tool invocation seam.
//!
//! Tools are the agent's external dependencies (GitHub, Trello, gcloud, shell
//! commands...). The core never trusts what they return: every raw payload is
//! checked with [`validate_tool_result`] before it is parsed into a
//! [`ToolResult`], and large payloads are shrunk with [`compress_result`]
//! before they travel upstream.

mod validate;

pub use validate::{
    compress_result, get_retry_after, is_rate_limited, validate_tool_result, ToolValidation,
    DEFAULT_MAX_LENGTH,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::task::Subtask;

/// Payload carried by a tool result.
///
/// Deserialization is untagged: JSON strings become `Text`, arrays `List`,
/// objects `Record`, everything else `Scalar`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolData {
    Text(String),
    List(Vec<Value>),
    Record(Map<String, Value>),
    Scalar(Value),
}

impl ToolData {
    /// Size used for compression decisions: characters for text, serialized
    /// JSON length for everything else.
    pub fn measured_len(&self) -> usize {
        match self {
            Self::Text(text) => text.chars().count(),
            other => serde_json::to_string(other).map(|s| s.len()).unwrap_or(0),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Self::Text(text) => Value::String(text.clone()),
            Self::List(items) => Value::Array(items.clone()),
            Self::Record(map) => Value::Object(map.clone()),
            Self::Scalar(value) => value.clone(),
        }
    }
}

impl From<Value> for ToolData {
    fn from(value: Value) -> Self {
        match value {
            Value::String(text) => Self::Text(text),
            Value::Array(items) => Self::List(items),
            Value::Object(map) => Self::Record(map),
            other => Self::Scalar(other),
        }
    }
}

impl From<String> for ToolData {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for ToolData {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

/// The contract every tool call must honor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<ToolData>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
}

impl ToolResult {
    /// Create a successful result.
    pub fn ok(data: impl Into<ToolData>) -> Self {
        Self {
            success: true,
            data: Some(data.into()),
            error: None,
            stdout: None,
            stderr: None,
        }
    }

    /// Create a failure result.
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            stdout: None,
            stderr: None,
        }
    }

    pub fn with_stdout(mut self, stdout: impl Into<String>) -> Self {
        self.stdout = Some(stdout.into());
        self
    }

    pub fn with_stderr(mut self, stderr: impl Into<String>) -> Self {
        self.stderr = Some(stderr.into());
        self
    }

    /// Parse a raw payload. Call [`validate_tool_result`] first for a
    /// structured explanation of why a payload is unusable.
    pub fn from_value(raw: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(raw)
    }

    /// Error and stderr text joined, for failure inspection.
    pub fn failure_text(&self) -> String {
        [self.error.as_deref(), self.stderr.as_deref()]
            .into_iter()
            .flatten()
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Executes subtasks against external tools.
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    /// Name of the dependency a subtask talks to; selects its circuit breaker.
    fn dependency(&self, subtask: &Subtask) -> String;

    /// Run the subtask and return the tool's raw, unvalidated payload.
    async fn invoke(&self, subtask: &Subtask) -> anyhow::Result<Value>;
}
