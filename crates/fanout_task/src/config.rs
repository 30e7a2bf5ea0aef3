use std::fmt;
use std::str::FromStr;

use clap::Parser;
use fanout_core::contract::TaskType;

#[derive(Debug, Clone, Parser)]
#[command(
    name = "fanout_task",
    about = "Processes one work item handed over by the fan-out workflow"
)]
pub struct TaskArgs {
    /// Object location of the work item (s3://bucket/key)
    #[arg(long, env = "S3_FILE_PATH")]
    pub s3_file_path: S3Uri,
    /// Workflow branch running this container
    #[arg(long, env = "TASK_TYPE", value_parser = parse_task_type)]
    pub task_type: TaskType,
    /// Incoming webhook receiving the notification
    #[arg(long, env = "SLACK_WEBHOOK_URL")]
    pub slack_webhook_url: String,
    /// Channel the notification is posted to
    #[arg(long, env = "SLACK_CHANNEL")]
    pub slack_channel: String,
}

fn parse_task_type(value: &str) -> Result<TaskType, String> {
    value
        .parse::<TaskType>()
        .map_err(|error| error.to_string())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Uri {
    pub bucket: String,
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum S3UriError {
    #[error("'{0}' is not an s3:// URI")]
    MissingScheme(String),
    #[error("'{0}' has no bucket")]
    MissingBucket(String),
    #[error("'{0}' has no object key")]
    MissingKey(String),
}

impl FromStr for S3Uri {
    type Err = S3UriError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let rest = value
            .strip_prefix("s3://")
            .ok_or_else(|| S3UriError::MissingScheme(value.to_string()))?;
        let (bucket, key) = rest.split_once('/').unwrap_or((rest, ""));
        if bucket.is_empty() {
            return Err(S3UriError::MissingBucket(value.to_string()));
        }
        if key.is_empty() {
            return Err(S3UriError::MissingKey(value.to_string()));
        }
        Ok(Self {
            bucket: bucket.to_string(),
            key: key.to_string(),
        })
    }
}

impl fmt::Display for S3Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bucket_and_nested_key() {
        let uri: S3Uri = "s3://bucket/path/to/file.csv".parse().expect("uri should parse");

        assert_eq!(uri.bucket, "bucket");
        assert_eq!(uri.key, "path/to/file.csv");
        assert_eq!(uri.to_string(), "s3://bucket/path/to/file.csv");
    }

    #[test]
    fn rejects_incomplete_uris() {
        assert_eq!(
            "https://bucket/key".parse::<S3Uri>(),
            Err(S3UriError::MissingScheme("https://bucket/key".to_string()))
        );
        assert_eq!(
            "s3:///key".parse::<S3Uri>(),
            Err(S3UriError::MissingBucket("s3:///key".to_string()))
        );
        assert_eq!(
            "s3://bucket".parse::<S3Uri>(),
            Err(S3UriError::MissingKey("s3://bucket".to_string()))
        );
    }

    #[test]
    fn args_parse_from_flags() {
        let args = TaskArgs::try_parse_from([
            "fanout_task",
            "--s3-file-path",
            "s3://bucket/key",
            "--task-type",
            "B",
            "--slack-webhook-url",
            "https://hooks.example.com/x",
            "--slack-channel",
            "#ops",
        ])
        .expect("args should parse");

        assert_eq!(args.task_type, TaskType::B);
        assert_eq!(args.s3_file_path.key, "key");
    }

    #[test]
    fn args_reject_unknown_task_type() {
        let result = TaskArgs::try_parse_from([
            "fanout_task",
            "--s3-file-path",
            "s3://bucket/key",
            "--task-type",
            "C",
            "--slack-webhook-url",
            "https://hooks.example.com/x",
            "--slack-channel",
            "#ops",
        ]);

        assert!(result.is_err());
    }
}
