use fanout_lambda::adapters::execution::ExecutionStarter;
use fanout_lambda::handlers::dispatcher::{handle_sqs_event, DispatcherConfig, SqsBatchResponse};
use fanout_lambda::runtime::telemetry::init_tracing;
use lambda_runtime::{service_fn, Error, LambdaEvent};
use serde_json::Value;

struct StepFunctionsExecutionStarter {
    sfn_client: aws_sdk_sfn::Client,
}

impl ExecutionStarter for StepFunctionsExecutionStarter {
    fn start_execution(&self, state_machine_arn: &str, input: &str) -> Result<String, String> {
        let client = self.sfn_client.clone();
        let state_machine_arn = state_machine_arn.to_string();
        let input = input.to_string();

        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(async move {
                client
                    .start_execution()
                    .state_machine_arn(state_machine_arn)
                    .input(input)
                    .send()
                    .await
                    .map(|output| output.execution_arn().to_string())
                    .map_err(|error| format!("failed to start execution: {error}"))
            })
        })
    }
}

async fn handle_request(
    event: LambdaEvent<Value>,
    starter: &StepFunctionsExecutionStarter,
) -> Result<SqsBatchResponse, Error> {
    let state_machine_arn = std::env::var("STATE_MACHINE_ARN").ok();
    let config = DispatcherConfig::new(state_machine_arn.as_deref()).map_err(Error::from)?;

    handle_sqs_event(&event.payload, &config, starter).map_err(Error::from)
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    init_tracing();

    let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
    let starter = &StepFunctionsExecutionStarter {
        sfn_client: aws_sdk_sfn::Client::new(&aws_config),
    };

    lambda_runtime::run(service_fn(move |event| handle_request(event, starter))).await
}
