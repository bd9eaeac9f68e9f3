//! Tool contract: descriptors plus the trait user tools implement.

use async_trait::async_trait;
use schemars::{schema_for, JsonSchema};
use serde_json::Value;
use thiserror::Error;

/// Tool execution errors.
#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    #[error("tool not found: {0}")]
    NotFound(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Metadata describing a registered tool.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ToolDescriptor {
    /// Unique tool name.
    pub name: String,
    /// Description shown to the model.
    pub description: String,
    /// JSON schema for the tool's arguments.
    pub parameters: Value,
}

impl ToolDescriptor {
    /// Create a descriptor with an empty object schema.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: serde_json::json!({"type": "object", "properties": {}}),
        }
    }

    /// Set the parameters schema.
    #[must_use]
    pub fn with_parameters(mut self, schema: Value) -> Self {
        self.parameters = schema;
        self
    }

    /// Derive the parameters schema from a type.
    #[must_use]
    pub fn with_parameters_for<T: JsonSchema>(mut self) -> Self {
        self.parameters = serde_json::to_value(schema_for!(T)).unwrap_or_default();
        self
    }
}

/// A native tool callable by agents.
///
/// Implementations execute one action and return a JSON result. Failures are
/// surfaced into the calling agent's session as tool-result messages so the
/// model can react to them.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Metadata for registration and model-facing schemas.
    fn descriptor(&self) -> ToolDescriptor;

    /// Execute the tool with the given arguments.
    async fn execute(&self, arguments: Value) -> Result<Value, ToolError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(JsonSchema, serde::Deserialize)]
    #[allow(dead_code)]
    struct EchoArgs {
        text: String,
    }

    #[test]
    fn schema_derivation_produces_object_schema() {
        let desc = ToolDescriptor::new("echo", "Echo text").with_parameters_for::<EchoArgs>();
        assert_eq!(desc.parameters["type"], serde_json::json!("object"));
        assert!(desc.parameters["properties"].get("text").is_some());
    }
}
