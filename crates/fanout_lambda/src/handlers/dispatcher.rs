use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::adapters::execution::ExecutionStarter;
use crate::runtime::contract::{
    build_execution_input, input_fingerprint, resolve_task_type, stable_contract_json,
    TASK_TYPE_ATTRIBUTE,
};
use crate::runtime::queue::{parse_receive_count, RECEIVE_COUNT_ATTRIBUTE};

pub const SQS_EVENT_SOURCE: &str = "aws:sqs";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatcherConfig {
    pub state_machine_arn: String,
}

impl DispatcherConfig {
    pub fn new(state_machine_arn: Option<&str>) -> Result<Self, DispatchError> {
        match state_machine_arn {
            Some(value) if !value.trim().is_empty() => Ok(Self {
                state_machine_arn: value.trim().to_string(),
            }),
            _ => Err(DispatchError::Misconfigured),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MessageAttribute {
    #[serde(default)]
    pub string_value: Option<String>,
    #[serde(default)]
    pub data_type: Option<String>,
}

/// One record of a queue-triggered invocation.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SqsRecord {
    pub message_id: String,
    pub body: String,
    #[serde(default)]
    pub message_attributes: BTreeMap<String, MessageAttribute>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    #[serde(default)]
    pub event_source: Option<String>,
}

impl SqsRecord {
    pub fn task_type_attribute(&self) -> Option<&str> {
        self.message_attributes
            .get(TASK_TYPE_ATTRIBUTE)
            .and_then(|attribute| attribute.string_value.as_deref())
    }

    pub fn receive_count(&self) -> Option<u32> {
        self.attributes
            .get(RECEIVE_COUNT_ATTRIBUTE)
            .and_then(|value| parse_receive_count(value))
    }
}

/// Partial batch response: only the listed records are left on the queue.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SqsBatchResponse {
    pub batch_item_failures: Vec<BatchItemFailure>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BatchItemFailure {
    pub item_identifier: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub message_id: String,
    pub execution_arn: String,
    pub task_type: String,
    pub input_fingerprint: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("event is not an SQS batch: {0}")]
    InvalidEvent(String),
    #[error("STATE_MACHINE_ARN must be configured")]
    Misconfigured,
    #[error("malformed payload in message {message_id}: {reason}")]
    MalformedPayload { message_id: String, reason: String },
    #[error("failed to start execution for message {message_id}: {reason}")]
    StartExecution { message_id: String, reason: String },
}

pub fn is_sqs_event(event: &Value) -> bool {
    event
        .get("Records")
        .and_then(Value::as_array)
        .map(|records| {
            !records.is_empty()
                && records.iter().all(|record| {
                    record
                        .get("eventSource")
                        .and_then(Value::as_str)
                        .map(|source| source == SQS_EVENT_SOURCE)
                        .unwrap_or(false)
                })
        })
        .unwrap_or(false)
}

/// Starts one workflow run per record. A record that cannot be dispatched is
/// reported in the batch response instead of failing the whole batch, so the
/// queue redelivers it (and eventually dead-letters it) on its own.
pub fn handle_sqs_event(
    event: &Value,
    config: &DispatcherConfig,
    starter: &dyn ExecutionStarter,
) -> Result<SqsBatchResponse, DispatchError> {
    if !is_sqs_event(event) {
        return Err(DispatchError::InvalidEvent(
            "expected a non-empty Records array from aws:sqs".to_string(),
        ));
    }
    let records = event
        .get("Records")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    let mut response = SqsBatchResponse::default();
    for raw_record in records {
        let record = match serde_json::from_value::<SqsRecord>(raw_record.clone()) {
            Ok(value) => value,
            Err(error) => {
                let Some(message_id) = raw_record.get("messageId").and_then(Value::as_str) else {
                    return Err(DispatchError::InvalidEvent(format!(
                        "record without messageId: {error}"
                    )));
                };
                let error = DispatchError::MalformedPayload {
                    message_id: message_id.to_string(),
                    reason: error.to_string(),
                };
                tracing::error!(
                    component = "dispatcher",
                    event = "record_rejected",
                    message_id,
                    error = %error,
                );
                response.batch_item_failures.push(BatchItemFailure {
                    item_identifier: message_id.to_string(),
                });
                continue;
            }
        };

        match dispatch_record(&record, config, starter) {
            Ok(outcome) => {
                tracing::info!(
                    component = "dispatcher",
                    event = "execution_started",
                    message_id = %outcome.message_id,
                    execution_arn = %outcome.execution_arn,
                    task_type = %outcome.task_type,
                    input_fingerprint = %outcome.input_fingerprint,
                    receive_count = record.receive_count(),
                );
            }
            Err(error) => {
                tracing::error!(
                    component = "dispatcher",
                    event = "record_rejected",
                    message_id = %record.message_id,
                    receive_count = record.receive_count(),
                    error = %error,
                );
                response.batch_item_failures.push(BatchItemFailure {
                    item_identifier: record.message_id.clone(),
                });
            }
        }
    }

    Ok(response)
}

pub fn dispatch_record(
    record: &SqsRecord,
    config: &DispatcherConfig,
    starter: &dyn ExecutionStarter,
) -> Result<DispatchOutcome, DispatchError> {
    let malformed = |reason: String| DispatchError::MalformedPayload {
        message_id: record.message_id.clone(),
        reason,
    };

    let payload: Value =
        serde_json::from_str(&record.body).map_err(|error| malformed(error.to_string()))?;
    let task_type = resolve_task_type(record.task_type_attribute());
    let input =
        build_execution_input(payload, &task_type).map_err(|error| malformed(error.to_string()))?;

    let execution_arn = starter
        .start_execution(&config.state_machine_arn, &stable_contract_json(&input))
        .map_err(|reason| DispatchError::StartExecution {
            message_id: record.message_id.clone(),
            reason,
        })?;

    Ok(DispatchOutcome {
        message_id: record.message_id.clone(),
        execution_arn,
        task_type,
        input_fingerprint: input_fingerprint(&input),
    })
}
