use std::collections::BTreeMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, TimeZone, Utc};
use fanout_core::queue::{Disposition, QueueConfig};
use fanout_core::workflow::{RunCommand, RunStatus, WorkflowPolicy, WorkflowRun};
use fanout_lambda::adapters::execution::ExecutionStarter;
use fanout_lambda::handlers::dispatcher::{handle_sqs_event, DispatcherConfig};
use serde_json::{json, Value};

const STATE_MACHINE_ARN: &str = "arn:aws:states:eu-west-1:123456789012:stateMachine:fanout";

/// Starts in-memory workflow runs, or refuses every start when `available`
/// is false.
struct InMemoryWorkflow {
    available: bool,
    runs: Mutex<Vec<WorkflowRun>>,
}

impl InMemoryWorkflow {
    fn new(available: bool) -> Self {
        Self {
            available,
            runs: Mutex::new(Vec::new()),
        }
    }

    fn runs(&self) -> Vec<WorkflowRun> {
        self.runs.lock().expect("poisoned mutex").clone()
    }
}

impl ExecutionStarter for InMemoryWorkflow {
    fn start_execution(&self, _state_machine_arn: &str, input: &str) -> Result<String, String> {
        if !self.available {
            return Err("service unavailable".to_string());
        }
        let input = serde_json::from_str(input).map_err(|error| error.to_string())?;
        let mut runs = self.runs.lock().expect("poisoned mutex");
        let execution_id = format!("execution-{}", runs.len() + 1);
        runs.push(WorkflowRun::new(
            execution_id.clone(),
            input,
            WorkflowPolicy::default(),
            t0(),
        ));
        Ok(execution_id)
    }
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0)
        .single()
        .expect("valid timestamp")
}

fn sqs_event(message_id: &str, body: &str, task_type: &str, receive_count: u32) -> Value {
    json!({
        "Records": [{
            "messageId": message_id,
            "body": body,
            "attributes": {"ApproximateReceiveCount": receive_count.to_string()},
            "messageAttributes": {
                "taskType": {"stringValue": task_type, "dataType": "String"}
            },
            "eventSource": "aws:sqs"
        }]
    })
}

fn config() -> DispatcherConfig {
    DispatcherConfig::new(Some(STATE_MACHINE_ARN)).expect("config should be valid")
}

#[test]
fn message_routes_to_task_b_with_injected_environment() {
    let workflow = InMemoryWorkflow::new(true);
    let event = sqs_event("m-1", "{\"s3FilePath\": \"s3://bucket/key\"}", "B", 1);

    let response = handle_sqs_event(&event, &config(), &workflow).expect("batch should run");
    assert!(response.batch_item_failures.is_empty());

    let mut run = workflow.runs().remove(0);
    assert_eq!(
        Value::Object(run.input().clone()),
        json!({"s3FilePath": "s3://bucket/key", "taskType": "B"})
    );

    let commands = run.choose(t0()).expect("choose should succeed");
    assert_eq!(run.status(), RunStatus::RunningTaskB);
    match commands.as_slice() {
        [RunCommand::LaunchTask(invocation)] => assert_eq!(
            invocation.environment,
            BTreeMap::from([
                ("S3_FILE_PATH".to_string(), "s3://bucket/key".to_string()),
                ("TASK_TYPE".to_string(), "B".to_string()),
            ])
        ),
        other => panic!("expected a single launch, got {other:?}"),
    }
}

#[test]
fn redelivery_past_max_receive_count_is_dead_lettered() {
    let queue = QueueConfig::default();
    let workflow = InMemoryWorkflow::new(false);
    let body = "{\"s3FilePath\": \"s3://bucket/key\"}";

    let mut delivered = 0;
    let mut dead_lettered = false;
    for receive_count in 1..=4 {
        match queue.disposition(receive_count) {
            Disposition::Deliver => {
                delivered += 1;
                let event = sqs_event("m-1", body, "A", receive_count);
                let response =
                    handle_sqs_event(&event, &config(), &workflow).expect("batch should run");
                assert_eq!(response.batch_item_failures.len(), 1);
            }
            Disposition::DeadLetter => {
                dead_lettered = true;
                break;
            }
        }
    }

    assert_eq!(delivered, 3);
    assert!(dead_lettered);
    assert!(workflow.runs().is_empty());
}

#[test]
fn run_that_succeeds_after_three_retries_ends_succeeded() {
    let workflow = InMemoryWorkflow::new(true);
    let event = sqs_event("m-1", "{\"s3FilePath\": \"s3://bucket/key\"}", "A", 1);
    handle_sqs_event(&event, &config(), &workflow).expect("batch should run");

    let mut run = workflow.runs().remove(0);
    let mut now = t0();
    let mut launches = run.choose(now).expect("choose should succeed").len();
    for attempt in 1..=3 {
        now += Duration::seconds(30);
        run.task_failed(attempt, "container exited with 1", now)
            .expect("failure should be accepted");
        now += Duration::seconds(5);
        launches += run.tick(now).len();
    }
    run.task_succeeded(4, now + Duration::seconds(30))
        .expect("success should be accepted");

    assert_eq!(launches, 4);
    assert_eq!(run.status(), RunStatus::Succeeded);
}
