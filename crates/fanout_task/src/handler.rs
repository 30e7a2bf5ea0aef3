use fanout_core::contract::TaskType;

use crate::adapters::{Notifier, ObjectInspector, WebhookMessage};
use crate::config::{S3Uri, TaskArgs};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskReport {
    pub task_type: TaskType,
    pub object: S3Uri,
    pub size_bytes: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    #[error("failed to inspect {uri}: {reason}")]
    Inspect { uri: String, reason: String },
    #[error("failed to send notification: {0}")]
    Notify(String),
}

pub fn notification_text(task_type: TaskType, object: &S3Uri, size_bytes: Option<i64>) -> String {
    match size_bytes {
        Some(size) => format!("MESSAGE: task {task_type} processed {object} ({size} bytes)"),
        None => format!("MESSAGE: task {task_type} processed {object}"),
    }
}

pub fn run_task(
    args: &TaskArgs,
    inspector: &impl ObjectInspector,
    notifier: &impl Notifier,
) -> Result<TaskReport, TaskError> {
    tracing::info!(
        component = "task",
        event = "task_started",
        task_type = %args.task_type,
        object = %args.s3_file_path,
    );

    let size_bytes = inspector
        .object_size(&args.s3_file_path)
        .map_err(|reason| TaskError::Inspect {
            uri: args.s3_file_path.to_string(),
            reason,
        })?;

    let message = WebhookMessage {
        text: notification_text(args.task_type, &args.s3_file_path, size_bytes),
        channel: args.slack_channel.clone(),
    };
    notifier.notify(&message).map_err(TaskError::Notify)?;

    tracing::info!(
        component = "task",
        event = "task_completed",
        task_type = %args.task_type,
        object = %args.s3_file_path,
        size_bytes,
    );

    Ok(TaskReport {
        task_type: args.task_type,
        object: args.s3_file_path.clone(),
        size_bytes,
    })
}
