//! Alternative wirings that deliver queue messages to the workflow.
//!
//! Exactly one strategy is deployed at a time; they are never composed.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::contract::{S3_FILE_PATH_FIELD, TASK_TYPE_ATTRIBUTE};
use crate::queue::DEFAULT_BATCH_SIZE;

pub const RULE_EVENT_SOURCE: &str = "aws.sqs";
pub const RULE_DETAIL_EVENT_SOURCE: &str = "sqs.amazonaws.com";
pub const RULE_DETAIL_EVENT_NAME: &str = "SendMessage";
pub const RULE_TARGET_ID: &str = "RunContainerTask";

/// Partial batch responses are only honoured when the mapping opts in.
pub const REPORT_BATCH_ITEM_FAILURES: &str = "ReportBatchItemFailures";

/// Inline input template of the pipe target.
pub const PIPE_INPUT_TEMPLATE: &str = r#"{"s3FilePath": <$.body.s3FilePath>, "taskType": <$.messageAttributes.taskType.stringValue>}"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportStrategy {
    /// Event rule matching queue API-call events starts the container task.
    Rule,
    /// The queue pushes records to the dispatcher function.
    Dispatcher,
    /// A managed pipe maps records straight into workflow input.
    Pipe,
}

impl fmt::Display for TransportStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rule => write!(f, "rule"),
            Self::Dispatcher => write!(f, "dispatcher"),
            Self::Pipe => write!(f, "pipe"),
        }
    }
}

impl FromStr for TransportStrategy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "rule" => Ok(Self::Rule),
            "dispatcher" => Ok(Self::Dispatcher),
            "pipe" => Ok(Self::Pipe),
            other => Err(format!(
                "unknown transport '{other}', expected rule, dispatcher or pipe"
            )),
        }
    }
}

pub fn rule_event_pattern() -> Value {
    json!({
        "source": [RULE_EVENT_SOURCE],
        "detail": {
            "eventSource": [RULE_DETAIL_EVENT_SOURCE],
            "eventName": [RULE_DETAIL_EVENT_NAME],
        }
    })
}

/// Whether an API-call event would be matched by [`rule_event_pattern`].
pub fn rule_matches(event: &Value) -> bool {
    let field = |value: Option<&Value>, key: &str| {
        value
            .and_then(|value| value.get(key))
            .and_then(Value::as_str)
            .map(str::to_owned)
    };
    let detail = event.get("detail");

    field(Some(event), "source").as_deref() == Some(RULE_EVENT_SOURCE)
        && field(detail, "eventSource").as_deref() == Some(RULE_DETAIL_EVENT_SOURCE)
        && field(detail, "eventName").as_deref() == Some(RULE_DETAIL_EVENT_NAME)
}

/// Container task started by the rule, one task per matched event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleTarget {
    pub cluster_arn: String,
    pub task_definition_arn: String,
    pub role_arn: String,
    pub subnets: Vec<String>,
    #[serde(default)]
    pub security_groups: Vec<String>,
}

/// Rule resource properties: the API-call pattern plus a single Fargate task
/// target on public subnets.
pub fn rule_definition(target: &RuleTarget) -> Value {
    json!({
        "EventPattern": rule_event_pattern(),
        "State": "ENABLED",
        "Targets": [
            {
                "Id": RULE_TARGET_ID,
                "Arn": target.cluster_arn,
                "RoleArn": target.role_arn,
                "EcsParameters": {
                    "TaskDefinitionArn": target.task_definition_arn,
                    "TaskCount": 1,
                    "LaunchType": "FARGATE",
                    "NetworkConfiguration": {
                        "AwsVpcConfiguration": {
                            "Subnets": target.subnets,
                            "SecurityGroups": target.security_groups,
                            "AssignPublicIp": "ENABLED"
                        }
                    }
                }
            }
        ]
    })
}

/// Event source mapping that pushes queue records to the dispatcher function.
pub fn event_source_mapping_definition(queue_arn: &str, function_arn: &str) -> Value {
    json!({
        "EventSourceArn": queue_arn,
        "FunctionName": function_arn,
        "BatchSize": DEFAULT_BATCH_SIZE,
        "FunctionResponseTypes": [REPORT_BATCH_ITEM_FAILURES],
    })
}

/// Pipe resource properties for a queue source and a workflow target.
pub fn pipe_definition(queue_arn: &str, state_machine_arn: &str, role_arn: &str) -> Value {
    json!({
        "Source": queue_arn,
        "SourceParameters": {
            "SqsQueueParameters": { "BatchSize": DEFAULT_BATCH_SIZE }
        },
        "Target": state_machine_arn,
        "TargetParameters": {
            "StepFunctionStateMachineParameters": { "InvocationType": "FIRE_AND_FORGET" },
            "InputTemplate": PIPE_INPUT_TEMPLATE,
        },
        "RoleArn": role_arn,
    })
}

/// Renders [`PIPE_INPUT_TEMPLATE`] for one queue record. A JSON string body
/// is parsed first; paths that do not resolve are left out of the result so
/// the workflow's choice state falls back to its default branch.
pub fn render_pipe_input(record: &Value) -> Map<String, Value> {
    let body = match record.get("body") {
        Some(Value::String(text)) => serde_json::from_str(text).unwrap_or(Value::Null),
        Some(other) => other.clone(),
        None => Value::Null,
    };

    let mut input = Map::new();
    if let Some(path) = body.get(S3_FILE_PATH_FIELD) {
        input.insert(S3_FILE_PATH_FIELD.to_string(), path.clone());
    }
    let task_type = record
        .get("messageAttributes")
        .and_then(|attributes| attributes.get(TASK_TYPE_ATTRIBUTE))
        .and_then(|attribute| attribute.get("stringValue"));
    if let Some(task_type) = task_type {
        input.insert(TASK_TYPE_ATTRIBUTE.to_string(), task_type.clone());
    }
    input
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_round_trips_through_names() {
        for strategy in [
            TransportStrategy::Rule,
            TransportStrategy::Dispatcher,
            TransportStrategy::Pipe,
        ] {
            assert_eq!(strategy.to_string().parse::<TransportStrategy>(), Ok(strategy));
        }
        assert!("lambda".parse::<TransportStrategy>().is_err());
    }

    #[test]
    fn rule_matches_send_message_api_calls_only() {
        let send = json!({
            "source": "aws.sqs",
            "detail": {"eventSource": "sqs.amazonaws.com", "eventName": "SendMessage"}
        });
        let delete = json!({
            "source": "aws.sqs",
            "detail": {"eventSource": "sqs.amazonaws.com", "eventName": "DeleteMessage"}
        });

        assert!(rule_matches(&send));
        assert!(!rule_matches(&delete));
        assert!(!rule_matches(&json!({"source": "aws.sqs"})));
    }

    #[test]
    fn rule_definition_runs_one_public_fargate_task() {
        let rule = rule_definition(&RuleTarget {
            cluster_arn: "arn:cluster".to_string(),
            task_definition_arn: "arn:task-def".to_string(),
            role_arn: "arn:role".to_string(),
            subnets: vec!["subnet-public-1".to_string()],
            security_groups: vec!["sg-default".to_string()],
        });

        assert_eq!(rule["EventPattern"], rule_event_pattern());
        let target = &rule["Targets"][0];
        assert_eq!(target["Arn"], "arn:cluster");
        assert_eq!(target["RoleArn"], "arn:role");
        let ecs = &target["EcsParameters"];
        assert_eq!(ecs["TaskDefinitionArn"], "arn:task-def");
        assert_eq!(ecs["TaskCount"], 1);
        let network = &ecs["NetworkConfiguration"]["AwsVpcConfiguration"];
        assert_eq!(network["Subnets"], json!(["subnet-public-1"]));
        assert_eq!(network["AssignPublicIp"], "ENABLED");
    }

    #[test]
    fn dispatcher_mapping_uses_batch_size_one_and_partial_failures() {
        let mapping = event_source_mapping_definition("arn:queue", "arn:function");

        assert_eq!(mapping["EventSourceArn"], "arn:queue");
        assert_eq!(mapping["FunctionName"], "arn:function");
        assert_eq!(mapping["BatchSize"], 1);
        assert_eq!(
            mapping["FunctionResponseTypes"],
            json!(["ReportBatchItemFailures"])
        );
    }

    #[test]
    fn pipe_template_maps_body_path_and_attribute() {
        let record = json!({
            "messageId": "m-1",
            "body": "{\"s3FilePath\": \"s3://bucket/key\", \"ignored\": 1}",
            "messageAttributes": {
                "taskType": {"stringValue": "B", "dataType": "String"}
            }
        });

        assert_eq!(
            Value::Object(render_pipe_input(&record)),
            json!({"s3FilePath": "s3://bucket/key", "taskType": "B"})
        );
    }

    #[test]
    fn pipe_template_omits_unresolved_paths() {
        let record = json!({"messageId": "m-2", "body": "not json"});
        assert!(render_pipe_input(&record).is_empty());
    }

    #[test]
    fn pipe_definition_uses_batch_size_one() {
        let pipe = pipe_definition("arn:queue", "arn:sm", "arn:role");

        assert_eq!(pipe["SourceParameters"]["SqsQueueParameters"]["BatchSize"], 1);
        assert_eq!(pipe["TargetParameters"]["InputTemplate"], PIPE_INPUT_TEMPLATE);
    }
}
