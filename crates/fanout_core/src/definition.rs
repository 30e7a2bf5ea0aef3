//! Amazon States Language rendering of the conditional-dispatch workflow.
//!
//! The rendered definition mirrors [`crate::workflow::WorkflowRun`]: a choice
//! state that only routes an exact `"B"` to task B, and two `runTask.sync`
//! states sharing the same retry and timeout policy.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::contract::{
    TaskType, S3_FILE_PATH_ENV, S3_FILE_PATH_FIELD, TASK_TYPE_ATTRIBUTE, TASK_TYPE_ENV,
};
use crate::workflow::{WorkflowPolicy, TASK_FAILED_ERROR};

pub const CHOICE_STATE: &str = "ChooseTaskType";
pub const ECS_RUN_TASK_SYNC: &str = "arn:aws:states:::ecs:runTask.sync";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskTarget {
    pub task_definition_arn: String,
    pub container_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefinitionConfig {
    pub cluster_arn: String,
    pub task_a: TaskTarget,
    pub task_b: TaskTarget,
    pub subnets: Vec<String>,
    #[serde(default)]
    pub security_groups: Vec<String>,
    #[serde(default)]
    pub assign_public_ip: bool,
    #[serde(default)]
    pub policy: WorkflowPolicy,
}

impl DefinitionConfig {
    fn target(&self, branch: TaskType) -> &TaskTarget {
        match branch {
            TaskType::A => &self.task_a,
            TaskType::B => &self.task_b,
        }
    }
}

pub fn task_state_name(branch: TaskType) -> String {
    format!("RunTask{branch}")
}

pub fn render_definition(config: &DefinitionConfig) -> Value {
    let discriminator_path = format!("$.{TASK_TYPE_ATTRIBUTE}");
    json!({
        "Comment": "Routes a work item to container task A or B by taskType",
        "StartAt": CHOICE_STATE,
        "TimeoutSeconds": config.policy.run_timeout_secs,
        "States": {
            CHOICE_STATE: {
                "Type": "Choice",
                "Choices": [
                    {
                        "And": [
                            { "Variable": discriminator_path, "IsPresent": true },
                            { "Variable": discriminator_path, "StringEquals": TaskType::B.as_str() }
                        ],
                        "Next": task_state_name(TaskType::B)
                    }
                ],
                "Default": task_state_name(TaskType::A)
            },
            task_state_name(TaskType::A): render_task_state(config, TaskType::A),
            task_state_name(TaskType::B): render_task_state(config, TaskType::B),
        }
    })
}

fn render_task_state(config: &DefinitionConfig, branch: TaskType) -> Value {
    let target = config.target(branch);
    let mut state = json!({
        "Type": "Task",
        "Resource": ECS_RUN_TASK_SYNC,
        "Parameters": {
            "LaunchType": "FARGATE",
            "Cluster": config.cluster_arn,
            "TaskDefinition": target.task_definition_arn,
            "NetworkConfiguration": {
                "AwsvpcConfiguration": {
                    "Subnets": config.subnets,
                    "SecurityGroups": config.security_groups,
                    "AssignPublicIp": if config.assign_public_ip { "ENABLED" } else { "DISABLED" }
                }
            },
            "Overrides": {
                "ContainerOverrides": [
                    {
                        "Name": target.container_name,
                        "Environment": [
                            { "Name": S3_FILE_PATH_ENV, "Value.$": format!("$.{S3_FILE_PATH_FIELD}") },
                            { "Name": TASK_TYPE_ENV, "Value": branch.as_str() }
                        ]
                    }
                ]
            }
        },
        "TimeoutSeconds": config.policy.task_timeout_secs,
        "End": true
    });

    let retries = config.policy.max_retries;
    if retries > 0 {
        state["Retry"] = json!([
            {
                "ErrorEquals": [TASK_FAILED_ERROR],
                "IntervalSeconds": config.policy.retry_interval_secs,
                "MaxAttempts": retries,
                "BackoffRate": 1.0
            }
        ]);
    }
    state
}
