//! Conditional-dispatch workflow run.
//!
//! A run is an explicit finite-state machine driven from outside: the driver
//! feeds it task completion callbacks and clock ticks, and performs the
//! [`RunCommand`]s it returns. The machine itself never does I/O.
//!
//! ```text
//!                 taskType == "B"        ┌──────────────┐
//!            ┌──────────────────────────►│ RunningTaskB │──┐
//! ┌──────────┐                           └──────────────┘  │   ┌───────────┐
//! │ Choosing │                                             ├──►│ Succeeded │
//! └──────────┘   otherwise (default)     ┌──────────────┐  │   ├───────────┤
//!            └──────────────────────────►│ RunningTaskA │──┤   │  Failed   │
//!                                        └──────────────┘  │   ├───────────┤
//!                                         ▲ retry after    └──►│ TimedOut  │
//!                                         └ fixed delay        └───────────┘
//! ```

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::contract::{
    ExecutionInput, TaskType, S3_FILE_PATH_ENV, S3_FILE_PATH_FIELD, TASK_TYPE_ATTRIBUTE,
    TASK_TYPE_ENV,
};

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_INTERVAL_SECS: u32 = 5;
pub const DEFAULT_TASK_TIMEOUT_SECS: u32 = 30 * 60;
pub const DEFAULT_RUN_TIMEOUT_SECS: u32 = 60 * 60;

/// Error name recorded when a task exhausts its retries.
pub const TASK_FAILED_ERROR: &str = "States.TaskFailed";
/// Error name recorded when an input path cannot be resolved.
pub const RUNTIME_ERROR: &str = "States.Runtime";

/// Retry and timeout bounds applied to every task-running state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowPolicy {
    /// Retries after a failed first attempt; a task state runs at most
    /// `max_retries + 1` attempts.
    pub max_retries: u32,
    pub retry_interval_secs: u32,
    pub task_timeout_secs: u32,
    pub run_timeout_secs: u32,
}

impl Default for WorkflowPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            retry_interval_secs: DEFAULT_RETRY_INTERVAL_SECS,
            task_timeout_secs: DEFAULT_TASK_TIMEOUT_SECS,
            run_timeout_secs: DEFAULT_RUN_TIMEOUT_SECS,
        }
    }
}

impl WorkflowPolicy {
    pub fn retry_interval(&self) -> Duration {
        Duration::seconds(i64::from(self.retry_interval_secs))
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::seconds(i64::from(self.task_timeout_secs))
    }

    pub fn run_timeout(&self) -> Duration {
        Duration::seconds(i64::from(self.run_timeout_secs))
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// Coarse status of a run, as reported in execution history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Choosing,
    RunningTaskA,
    RunningTaskB,
    Succeeded,
    Failed,
    TimedOut,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::TimedOut)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Choosing => write!(f, "choosing"),
            Self::RunningTaskA => write!(f, "running_task_a"),
            Self::RunningTaskB => write!(f, "running_task_b"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::TimedOut => write!(f, "timed_out"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutScope {
    /// A single task attempt exceeded its timeout.
    Task,
    /// The whole run exceeded its timeout.
    Run,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum AttemptPhase {
    /// Container task launched and not yet reported back.
    InFlight { started_at: DateTime<Utc> },
    /// Previous attempt failed; next attempt launches at `resume_at`.
    Backoff { resume_at: DateTime<Utc> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunState {
    Choosing,
    Running {
        branch: TaskType,
        attempt: u32,
        phase: AttemptPhase,
    },
    Succeeded {
        branch: TaskType,
        attempts: u32,
    },
    Failed {
        branch: TaskType,
        error: String,
        cause: String,
    },
    TimedOut {
        branch: Option<TaskType>,
        scope: TimeoutScope,
    },
}

/// One container task launch requested by the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskInvocation {
    pub branch: TaskType,
    pub attempt: u32,
    pub environment: BTreeMap<String, String>,
}

/// Side effect the driver must perform after a transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum RunCommand {
    LaunchTask(TaskInvocation),
    StopTask { branch: TaskType, attempt: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorkflowError {
    #[error("invalid transition: {event} while {status}")]
    InvalidTransition {
        status: RunStatus,
        event: &'static str,
    },
    #[error("input path `$.{path}` did not resolve to a string")]
    MissingInputPath { path: &'static str },
}

pub type Result<T> = std::result::Result<T, WorkflowError>;

/// Environment injected into the container of `branch`.
pub fn container_environment(
    input: &ExecutionInput,
    branch: TaskType,
) -> Result<BTreeMap<String, String>> {
    let s3_file_path = input
        .get(S3_FILE_PATH_FIELD)
        .and_then(Value::as_str)
        .ok_or(WorkflowError::MissingInputPath {
            path: S3_FILE_PATH_FIELD,
        })?;

    Ok(BTreeMap::from([
        (S3_FILE_PATH_ENV.to_string(), s3_file_path.to_string()),
        (TASK_TYPE_ENV.to_string(), branch.as_str().to_string()),
    ]))
}

/// One execution of the conditional-dispatch routine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRun {
    execution_id: String,
    input: ExecutionInput,
    policy: WorkflowPolicy,
    started_at: DateTime<Utc>,
    state: RunState,
}

impl WorkflowRun {
    pub fn new(
        execution_id: impl Into<String>,
        input: ExecutionInput,
        policy: WorkflowPolicy,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            execution_id: execution_id.into(),
            input,
            policy,
            started_at,
            state: RunState::Choosing,
        }
    }

    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    pub fn input(&self) -> &ExecutionInput {
        &self.input
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    pub fn status(&self) -> RunStatus {
        match &self.state {
            RunState::Choosing => RunStatus::Choosing,
            RunState::Running {
                branch: TaskType::A,
                ..
            } => RunStatus::RunningTaskA,
            RunState::Running {
                branch: TaskType::B,
                ..
            } => RunStatus::RunningTaskB,
            RunState::Succeeded { .. } => RunStatus::Succeeded,
            RunState::Failed { .. } => RunStatus::Failed,
            RunState::TimedOut { .. } => RunStatus::TimedOut,
        }
    }

    pub fn run_deadline(&self) -> DateTime<Utc> {
        self.started_at + self.policy.run_timeout()
    }

    /// Earliest instant at which [`WorkflowRun::tick`] would change state.
    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        let run_deadline = self.run_deadline();
        match &self.state {
            RunState::Choosing => Some(run_deadline),
            RunState::Running { phase, .. } => {
                let phase_deadline = match phase {
                    AttemptPhase::InFlight { started_at } => {
                        *started_at + self.policy.task_timeout()
                    }
                    AttemptPhase::Backoff { resume_at } => *resume_at,
                };
                Some(phase_deadline.min(run_deadline))
            }
            _ => None,
        }
    }

    /// Evaluates the choice state and launches the first attempt.
    pub fn choose(&mut self, now: DateTime<Utc>) -> Result<Vec<RunCommand>> {
        self.ensure_status(RunStatus::Choosing, "choose")?;
        let commands = self.apply_deadlines(now);
        if self.status().is_terminal() {
            return Ok(commands);
        }

        let discriminator = self.input.get(TASK_TYPE_ATTRIBUTE).and_then(Value::as_str);
        let branch = TaskType::route(discriminator);
        Ok(self.launch(branch, 1, now).into_iter().collect())
    }

    /// Records a successful attempt. A completion that arrives after a
    /// deadline has passed is superseded by the timeout.
    pub fn task_succeeded(&mut self, attempt: u32, now: DateTime<Utc>) -> Result<Vec<RunCommand>> {
        let branch = self.in_flight_branch(attempt, "task_succeeded")?;
        let commands = self.apply_deadlines(now);
        if self.status().is_terminal() {
            return Ok(commands);
        }

        self.state = RunState::Succeeded {
            branch,
            attempts: attempt,
        };
        Ok(Vec::new())
    }

    /// Records a failed attempt and either schedules the next attempt after
    /// the fixed retry interval or fails the run once retries are exhausted.
    pub fn task_failed(
        &mut self,
        attempt: u32,
        cause: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<Vec<RunCommand>> {
        let branch = self.in_flight_branch(attempt, "task_failed")?;
        let commands = self.apply_deadlines(now);
        if self.status().is_terminal() {
            return Ok(commands);
        }

        if attempt < self.policy.max_attempts() {
            self.state = RunState::Running {
                branch,
                attempt,
                phase: AttemptPhase::Backoff {
                    resume_at: now + self.policy.retry_interval(),
                },
            };
        } else {
            self.state = RunState::Failed {
                branch,
                error: TASK_FAILED_ERROR.to_string(),
                cause: cause.into(),
            };
        }
        Ok(Vec::new())
    }

    /// Advances the clock: enforces timeouts and launches due retries.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Vec<RunCommand> {
        let mut commands = self.apply_deadlines(now);
        if let RunState::Running {
            branch,
            attempt,
            phase: AttemptPhase::Backoff { resume_at },
        } = self.state
        {
            if now >= resume_at {
                commands.extend(self.launch(branch, attempt + 1, now));
            }
        }
        commands
    }

    fn launch(
        &mut self,
        branch: TaskType,
        attempt: u32,
        now: DateTime<Utc>,
    ) -> Option<RunCommand> {
        match container_environment(&self.input, branch) {
            Ok(environment) => {
                self.state = RunState::Running {
                    branch,
                    attempt,
                    phase: AttemptPhase::InFlight { started_at: now },
                };
                Some(RunCommand::LaunchTask(TaskInvocation {
                    branch,
                    attempt,
                    environment,
                }))
            }
            Err(error) => {
                self.state = RunState::Failed {
                    branch,
                    error: RUNTIME_ERROR.to_string(),
                    cause: error.to_string(),
                };
                None
            }
        }
    }

    fn apply_deadlines(&mut self, now: DateTime<Utc>) -> Vec<RunCommand> {
        let run_expired = now >= self.run_deadline();
        match self.state {
            RunState::Choosing if run_expired => {
                self.state = RunState::TimedOut {
                    branch: None,
                    scope: TimeoutScope::Run,
                };
                Vec::new()
            }
            RunState::Running {
                branch,
                attempt,
                phase: AttemptPhase::InFlight { started_at },
            } => {
                let scope = if run_expired {
                    TimeoutScope::Run
                } else if now >= started_at + self.policy.task_timeout() {
                    TimeoutScope::Task
                } else {
                    return Vec::new();
                };
                self.state = RunState::TimedOut {
                    branch: Some(branch),
                    scope,
                };
                vec![RunCommand::StopTask { branch, attempt }]
            }
            RunState::Running {
                branch,
                phase: AttemptPhase::Backoff { .. },
                ..
            } if run_expired => {
                self.state = RunState::TimedOut {
                    branch: Some(branch),
                    scope: TimeoutScope::Run,
                };
                Vec::new()
            }
            _ => Vec::new(),
        }
    }

    fn ensure_status(&self, expected: RunStatus, event: &'static str) -> Result<()> {
        let status = self.status();
        if status == expected {
            Ok(())
        } else {
            Err(WorkflowError::InvalidTransition { status, event })
        }
    }

    fn in_flight_branch(&self, attempt: u32, event: &'static str) -> Result<TaskType> {
        match self.state {
            RunState::Running {
                branch,
                attempt: current,
                phase: AttemptPhase::InFlight { .. },
            } if current == attempt => Ok(branch),
            _ => Err(WorkflowError::InvalidTransition {
                status: self.status(),
                event,
            }),
        }
    }
}
