//! Data model for procedure definitions and invocations.
//!
//! The orchestration script itself is runtime-facing (see `tactus-runtime`);
//! this module holds the pure-data parts: parameter schemas, agent
//! declarations, evaluation config, and the persisted invocation record.

use crate::error::ScriptError;
use crate::provider::ModelConfig;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Declared type of a procedure parameter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    String,
    Number,
    Boolean,
    List,
    Map,
    #[default]
    Any,
}

impl ParamType {
    fn matches(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::List => value.is_array(),
            Self::Map => value.is_object(),
            Self::Any => true,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::List => "list",
            Self::Map => "map",
            Self::Any => "any",
        }
    }
}

/// One declared parameter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParamField {
    #[serde(default)]
    pub param_type: ParamType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ParamField {
    /// A required field of the given type.
    pub fn required(param_type: ParamType) -> Self {
        Self {
            param_type,
            required: true,
            ..Self::default()
        }
    }

    /// An optional field with a default value.
    pub fn with_default(param_type: ParamType, default: Value) -> Self {
        Self {
            param_type,
            default: Some(default),
            ..Self::default()
        }
    }
}

/// Typed parameter schema for a procedure definition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParamSchema {
    /// Declared fields, keyed by name. Ordered for stable display.
    pub fields: BTreeMap<String, ParamField>,
}

impl ParamSchema {
    /// Add a field.
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, field: ParamField) -> Self {
        self.fields.insert(name.into(), field);
        self
    }

    /// Resolve supplied parameters against this schema.
    ///
    /// Applies defaults, checks required fields, and type-checks every
    /// supplied value. Unknown parameters are rejected.
    pub fn resolve(&self, supplied: &Map<String, Value>) -> Result<Map<String, Value>, ScriptError> {
        for key in supplied.keys() {
            if !self.fields.contains_key(key) {
                return Err(ScriptError::validation(format!("unknown parameter '{key}'")));
            }
        }

        let mut resolved = Map::new();
        for (name, field) in &self.fields {
            match supplied.get(name) {
                Some(value) => {
                    if !field.param_type.matches(value) {
                        return Err(ScriptError::validation(format!(
                            "parameter '{name}' expects {}, got {value}",
                            field.param_type.as_str()
                        )));
                    }
                    resolved.insert(name.clone(), value.clone());
                }
                None => {
                    if let Some(default) = &field.default {
                        resolved.insert(name.clone(), default.clone());
                    } else if field.required {
                        return Err(ScriptError::validation(format!(
                            "missing required parameter '{name}'"
                        )));
                    }
                }
            }
        }
        Ok(resolved)
    }
}

/// Declarative context filter attached to an agent declaration.
///
/// Built-in filters form a closed set; the runtime composes them into a
/// filter chain in declaration order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "filter", rename_all = "snake_case")]
pub enum FilterSpec {
    /// Drop oldest messages until the estimated token count fits.
    TokenBudget { max_tokens: usize },
    /// Retain only the last `count` tool-result messages.
    LimitToolResults { count: usize },
    /// Drop messages whose visibility class is listed.
    HideClass {
        classes: Vec<crate::session::VisibilityClass>,
    },
}

/// One declared agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    pub model: ModelConfig,
    #[serde(default)]
    pub system_prompt: String,
    /// First user message injected on the agent's first turn.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_message: Option<String>,
    /// Names of the tools this agent may call.
    #[serde(default)]
    pub tools: Vec<String>,
    /// Context filters applied, in order, when building the model's view.
    #[serde(default)]
    pub filters: Vec<FilterSpec>,
}

/// Evaluation settings carried by a procedure definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationConfig {
    /// Runs per scenario.
    pub runs: usize,
    /// Parallel worker cap.
    pub workers: usize,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self { runs: 10, workers: 4 }
    }
}

/// Status of a procedure invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationStatus {
    Running,
    WaitingHuman,
    WaitingChild,
    Completed,
    Failed,
    Cancelled,
}

impl InvocationStatus {
    /// Whether this status is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Stable wire/display label.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::WaitingHuman => "waiting_human",
            Self::WaitingChild => "waiting_child",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Persisted record of one invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationRecord {
    pub id: String,
    /// Name/version reference of the definition this invocation executes.
    pub definition_ref: String,
    /// Resolved parameters.
    pub params: Value,
    pub status: InvocationStatus,
    pub created_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> ParamSchema {
        ParamSchema::default()
            .with_field("name", ParamField::with_default(ParamType::String, json!("World")))
            .with_field("count", ParamField::required(ParamType::Number))
    }

    #[test]
    fn resolve_applies_defaults_and_checks_required() {
        let mut supplied = Map::new();
        supplied.insert("count".into(), json!(3));
        let resolved = schema().resolve(&supplied).unwrap();
        assert_eq!(resolved["name"], json!("World"));
        assert_eq!(resolved["count"], json!(3));

        let err = schema().resolve(&Map::new()).unwrap_err();
        assert!(err.message.contains("count"));
    }

    #[test]
    fn resolve_rejects_type_mismatch_and_unknown_keys() {
        let mut supplied = Map::new();
        supplied.insert("count".into(), json!("three"));
        assert!(schema().resolve(&supplied).is_err());

        let mut supplied = Map::new();
        supplied.insert("count".into(), json!(1));
        supplied.insert("bogus".into(), json!(1));
        assert!(schema().resolve(&supplied).is_err());
    }
}
