//! Tool contract and parameter helpers.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

pub use crate::error::ToolError;

/// Caller-side context a tool executes under.
#[derive(Debug, Clone)]
pub struct ToolContext {
    /// Session the invocation belongs to; becomes the originator session
    /// for delegations.
    pub session_id: String,
}

/// Structured result of a tool execution.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub result: Value,
    pub duration: Duration,
}

impl ToolOutput {
    pub fn success(result: Value, duration: Duration) -> Self {
        Self { result, duration }
    }
}

/// A named operation the runtime can invoke with JSON parameters.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema of the accepted parameters.
    fn parameters_schema(&self) -> Value;

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<ToolOutput, ToolError>;
}

pub fn require_str<'a>(params: &'a Value, key: &str) -> Result<&'a str, ToolError> {
    params
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ToolError::InvalidParameters(format!("missing required string '{key}'")))
}

pub fn optional_str<'a>(params: &'a Value, key: &str) -> Option<&'a str> {
    params.get(key).and_then(Value::as_str)
}

pub fn optional_bool(params: &Value, key: &str) -> bool {
    params.get(key).and_then(Value::as_bool).unwrap_or(false)
}

pub fn optional_u64(params: &Value, key: &str) -> Option<u64> {
    params.get(key).and_then(Value::as_u64)
}

pub fn optional_f64(params: &Value, key: &str) -> Option<f64> {
    params.get(key).and_then(Value::as_f64)
}

pub fn optional_str_list(params: &Value, key: &str) -> Option<Vec<String>> {
    params.get(key).and_then(Value::as_array).map(|items| {
        items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect()
    })
}
