use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Message attribute (and execution input field) carrying the discriminator.
pub const TASK_TYPE_ATTRIBUTE: &str = "taskType";
/// Execution input field holding the object location handed to the task.
pub const S3_FILE_PATH_FIELD: &str = "s3FilePath";
pub const DEFAULT_TASK_TYPE: &str = "A";

/// Container environment variable names injected by the workflow.
pub const S3_FILE_PATH_ENV: &str = "S3_FILE_PATH";
pub const TASK_TYPE_ENV: &str = "TASK_TYPE";

pub type ExecutionInput = Map<String, Value>;

/// Processing branch selected by the `taskType` discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskType {
    A,
    B,
}

impl TaskType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::A => "A",
            Self::B => "B",
        }
    }

    /// Routing rule of the workflow's choice state: only an exact `"B"`
    /// selects branch B, everything else falls through to the default A.
    pub fn route(discriminator: Option<&str>) -> Self {
        match discriminator {
            Some("B") => Self::B,
            _ => Self::A,
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = ContractError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "A" => Ok(Self::A),
            "B" => Ok(Self::B),
            other => Err(ContractError::UnknownTaskType(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContractError {
    #[error("payload must be a JSON object, got {0}")]
    PayloadNotObject(&'static str),
    #[error("unknown task type '{0}', expected A or B")]
    UnknownTaskType(String),
}

/// Resolves the discriminator carried by a message. An absent attribute
/// resolves to the default; any present value is passed through verbatim so
/// the workflow's choice state decides how to route it.
pub fn resolve_task_type(attribute: Option<&str>) -> String {
    attribute.unwrap_or(DEFAULT_TASK_TYPE).to_string()
}

/// Shallow merge of the payload with `{taskType}`. The resolved discriminator
/// replaces any `taskType` field already present in the payload.
pub fn build_execution_input(
    payload: Value,
    task_type: &str,
) -> Result<ExecutionInput, ContractError> {
    let mut input = match payload {
        Value::Object(fields) => fields,
        other => return Err(ContractError::PayloadNotObject(json_kind(&other))),
    };
    input.insert(
        TASK_TYPE_ATTRIBUTE.to_string(),
        Value::String(task_type.to_string()),
    );
    Ok(input)
}

/// Stable fingerprint of an execution input, used to correlate duplicate
/// runs started from redelivered messages.
pub fn input_fingerprint(input: &ExecutionInput) -> String {
    let mut hasher = Sha256::new();
    hasher.update(stable_contract_json(input));
    format!("{:x}", hasher.finalize())
}

pub fn stable_contract_json(value: impl Serialize) -> String {
    serde_json::to_string(&value).expect("serialization of contract value should not fail")
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn absent_attribute_resolves_to_default() {
        assert_eq!(resolve_task_type(None), "A");
    }

    #[test]
    fn present_attribute_is_passed_through() {
        assert_eq!(resolve_task_type(Some("A")), "A");
        assert_eq!(resolve_task_type(Some("B")), "B");
        assert_eq!(resolve_task_type(Some("C")), "C");
    }

    #[test]
    fn routing_defaults_unknown_values_to_branch_a() {
        assert_eq!(TaskType::route(Some("B")), TaskType::B);
        assert_eq!(TaskType::route(Some("A")), TaskType::A);
        assert_eq!(TaskType::route(Some("b")), TaskType::A);
        assert_eq!(TaskType::route(Some("")), TaskType::A);
        assert_eq!(TaskType::route(None), TaskType::A);
    }

    #[test]
    fn execution_input_merges_discriminator_into_payload() {
        let input = build_execution_input(json!({"s3FilePath": "s3://bucket/key"}), "B")
            .expect("object payload should merge");

        assert_eq!(
            Value::Object(input),
            json!({"s3FilePath": "s3://bucket/key", "taskType": "B"})
        );
    }

    #[test]
    fn resolved_discriminator_overrides_payload_field() {
        let input = build_execution_input(json!({"taskType": "B", "n": 1}), "A")
            .expect("object payload should merge");

        assert_eq!(input.get("taskType"), Some(&json!("A")));
        assert_eq!(input.get("n"), Some(&json!(1)));
    }

    #[test]
    fn non_object_payload_is_rejected() {
        let error = build_execution_input(json!([1, 2]), "A").expect_err("arrays cannot merge");
        assert_eq!(error, ContractError::PayloadNotObject("array"));
    }

    #[test]
    fn fingerprint_is_stable_for_equal_inputs() {
        let first = build_execution_input(json!({"s3FilePath": "s3://b/k"}), "A")
            .expect("object payload should merge");
        let second = build_execution_input(json!({"s3FilePath": "s3://b/k"}), "A")
            .expect("object payload should merge");
        let other = build_execution_input(json!({"s3FilePath": "s3://b/k"}), "B")
            .expect("object payload should merge");

        assert_eq!(input_fingerprint(&first), input_fingerprint(&second));
        assert_ne!(input_fingerprint(&first), input_fingerprint(&other));
    }

    #[test]
    fn task_type_parses_closed_enumeration() {
        assert_eq!("A".parse::<TaskType>(), Ok(TaskType::A));
        assert_eq!("B".parse::<TaskType>(), Ok(TaskType::B));
        assert!("C".parse::<TaskType>().is_err());
    }
}
