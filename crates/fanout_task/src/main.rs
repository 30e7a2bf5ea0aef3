use std::process::ExitCode;

use clap::Parser;
use fanout_core::telemetry::init_tracing;
use fanout_task::adapters::{Notifier, ObjectInspector, WebhookMessage};
use fanout_task::config::{S3Uri, TaskArgs};
use fanout_task::handler::run_task;

struct S3ObjectInspector {
    s3_client: aws_sdk_s3::Client,
}

impl ObjectInspector for S3ObjectInspector {
    fn object_size(&self, uri: &S3Uri) -> Result<Option<i64>, String> {
        let client = self.s3_client.clone();
        let bucket = uri.bucket.clone();
        let key = uri.key.clone();

        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(async move {
                client
                    .head_object()
                    .bucket(bucket)
                    .key(key)
                    .send()
                    .await
                    .map(|output| output.content_length())
                    .map_err(|error| format!("failed to read object metadata from s3: {error}"))
            })
        })
    }
}

struct WebhookNotifier {
    http_client: reqwest::Client,
    webhook_url: String,
}

impl Notifier for WebhookNotifier {
    fn notify(&self, message: &WebhookMessage) -> Result<(), String> {
        let client = self.http_client.clone();
        let url = self.webhook_url.clone();
        let message = message.clone();

        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(async move {
                let response = client
                    .post(url)
                    .json(&message)
                    .send()
                    .await
                    .map_err(|error| format!("failed to post webhook message: {error}"))?;
                let status = response.status();
                if status.is_success() {
                    Ok(())
                } else {
                    Err(format!("non-success webhook response: {status}"))
                }
            })
        })
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let args = TaskArgs::parse();

    let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
    let inspector = S3ObjectInspector {
        s3_client: aws_sdk_s3::Client::new(&aws_config),
    };
    let notifier = WebhookNotifier {
        http_client: reqwest::Client::new(),
        webhook_url: args.slack_webhook_url.clone(),
    };

    match run_task(&args, &inspector, &notifier) {
        Ok(_) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!(
                component = "task",
                event = "task_failed",
                task_type = %args.task_type,
                object = %args.s3_file_path,
                error = %error,
            );
            ExitCode::FAILURE
        }
    }
}
