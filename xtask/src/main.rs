use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{exit, Command, ExitStatus};

use clap::{Parser, Subcommand, ValueEnum};
use fanout_core::definition::{render_definition, DefinitionConfig};
use fanout_core::queue::RedrivePolicy;
use fanout_core::transport::{
    event_source_mapping_definition, pipe_definition, rule_definition, RuleTarget,
};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

// ── CLI definition ─────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "xtask",
    about = "Task runner for the queue fan-out workspace",
    long_about = "A unified CLI for CI checks, Lambda packaging, and rendering\n\
                  the workflow, pipe, rule, and dispatcher artifacts of the
                  fan-out workspace."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run CI checks (fmt, clippy, tests)
    Ci {
        /// Job to run
        #[arg(value_enum, default_value_t = CiJob::Check)]
        job: CiJob,
    },
    /// Build and package Rust Lambda and task artifacts for deployment inputs
    ServerlessPackage {
        /// Compilation target triple for Lambda binaries
        #[arg(long, default_value = "x86_64-unknown-linux-gnu")]
        target: String,
        /// Build profile used for binaries
        #[arg(value_enum, long, default_value_t = BuildProfile::Release)]
        profile: BuildProfile,
    },
    /// Print a deployment artifact as JSON
    Render {
        #[command(subcommand)]
        artifact: Artifact,
    },
}

#[derive(Subcommand)]
enum Artifact {
    /// States Language definition of the conditional-dispatch workflow
    StateMachine {
        /// JSON file with cluster, task definitions, and network settings
        #[arg(long)]
        config: PathBuf,
    },
    /// Pipe properties mapping queue records straight into workflow input
    Pipe {
        #[arg(long, env = "QUEUE_ARN")]
        queue_arn: String,
        #[arg(long, env = "STATE_MACHINE_ARN")]
        state_machine_arn: String,
        #[arg(long, env = "PIPE_ROLE_ARN")]
        role_arn: String,
    },
    /// Rule matching queue SendMessage API calls and starting one container task
    Rule {
        #[arg(long, env = "CLUSTER_ARN")]
        cluster_arn: String,
        #[arg(long, env = "TASK_DEFINITION_ARN")]
        task_definition_arn: String,
        #[arg(long, env = "RULE_ROLE_ARN")]
        role_arn: String,
        /// Public subnets the task runs in (comma separated or repeated)
        #[arg(long = "subnet", env = "SUBNETS", value_delimiter = ',', required = true)]
        subnets: Vec<String>,
        #[arg(long = "security-group", env = "SECURITY_GROUPS", value_delimiter = ',')]
        security_groups: Vec<String>,
    },
    /// Event source mapping pushing queue records to the dispatcher lambda
    Dispatcher {
        #[arg(long, env = "QUEUE_ARN")]
        queue_arn: String,
        #[arg(long, env = "DISPATCHER_FUNCTION_ARN")]
        function_arn: String,
    },
    /// Queue redrive policy attribute
    Redrive {
        #[arg(long, env = "DEAD_LETTER_QUEUE_ARN")]
        dead_letter_queue_arn: String,
        #[arg(long, default_value_t = RedrivePolicy::default().max_receive_count)]
        max_receive_count: u32,
    },
}

#[derive(Clone, ValueEnum)]
enum CiJob {
    /// Formatting and clippy
    Check,
    /// Unit and integration tests
    Test,
    /// Run check + test
    All,
}

#[derive(Clone, Copy, ValueEnum)]
enum BuildProfile {
    Debug,
    Release,
}

impl BuildProfile {
    fn dir_name(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Release => "release",
        }
    }

    fn as_cargo_flag(self) -> Option<&'static str> {
        match self {
            Self::Debug => None,
            Self::Release => Some("--release"),
        }
    }
}

// ── helpers ────────────────────────────────────────────────────────

fn step(label: &str) {
    eprintln!("\n=== {label} ===");
}

fn cargo(args: &[&str]) -> ExitStatus {
    eprintln!("+ cargo {}", args.join(" "));
    Command::new("cargo")
        .args(args)
        .status()
        .expect("failed to execute cargo")
}

fn run_cargo(args: &[&str]) {
    let status = cargo(args);
    if !status.success() {
        exit(status.code().unwrap_or(1));
    }
}

fn package_serverless_artifacts(target: &str, profile: BuildProfile) {
    ensure_rust_target_installed(target);

    step("Build dispatcher lambda and task binaries");

    let mut cargo_args = vec![
        "build",
        "-p",
        "fanout_lambda",
        "-p",
        "fanout_task",
        "--target",
        target,
        "--bin",
        "dispatcher_lambda",
        "--bin",
        "fanout_task",
    ];
    if let Some(flag) = profile.as_cargo_flag() {
        cargo_args.push(flag);
    }
    run_cargo(&cargo_args);

    step("Package dispatcher zip and task binary");
    let target_dir = Path::new("target").join(target).join(profile.dir_name());
    let dist_dir = Path::new("dist");
    fs::create_dir_all(dist_dir).expect("failed to create dist directory");

    package_dispatcher_zip(
        &target_dir.join(binary_name("dispatcher_lambda", target)),
        &dist_dir.join("dispatcher.zip"),
    );
    let task_binary = dist_dir.join(binary_name("fanout_task", target));
    fs::copy(target_dir.join(binary_name("fanout_task", target)), &task_binary)
        .expect("failed to copy fanout_task binary");

    eprintln!(
        "\nPackaged artifacts:\n- {}\n- {}",
        dist_dir.join("dispatcher.zip").display(),
        task_binary.display()
    );
}

fn ensure_rust_target_installed(target: &str) {
    let output = Command::new("rustup")
        .args(["target", "list", "--installed"])
        .output();

    let output = match output {
        Ok(value) => value,
        Err(error) => {
            eprintln!(
                "warning: could not query rustup ({error}); building dispatcher_lambda and fanout_task for `{target}` without a target check"
            );
            return;
        }
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        panic!(
            "rustup could not list installed targets for the fan-out binaries: {}",
            stderr.trim()
        );
    }

    let installed = String::from_utf8_lossy(&output.stdout);
    if !installed.lines().any(|line| line.trim() == target) {
        panic!(
            "dispatcher_lambda and fanout_task need the `{target}` target: run `rustup target add {target}`, then `cargo run -p xtask -- serverless-package --target {target}`"
        );
    }
}

/// File name of `dispatcher_lambda` or `fanout_task` as built for `target`.
fn binary_name(bin: &str, target: &str) -> String {
    if target.contains("windows") {
        return format!("{bin}.exe");
    }
    bin.to_owned()
}

/// Zips the dispatcher binary as the `bootstrap` entry the custom runtime
/// expects.
fn package_dispatcher_zip(dispatcher_binary: &Path, zip_path: &Path) {
    if !dispatcher_binary.exists() {
        panic!(
            "dispatcher_lambda was not built at '{}'",
            dispatcher_binary.display()
        );
    }

    let binary = fs::read(dispatcher_binary).expect("failed to read dispatcher_lambda binary");
    let file = fs::File::create(zip_path).expect("failed to create dispatcher zip");
    let options = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .unix_permissions(0o755);
    let mut zip = ZipWriter::new(file);
    zip.start_file("bootstrap", options)
        .expect("failed to add bootstrap to dispatcher zip");
    zip.write_all(&binary)
        .expect("failed to write dispatcher_lambda into bootstrap");
    zip.finish().expect("failed to finish dispatcher zip");
}

// ── render ─────────────────────────────────────────────────────────

fn render(artifact: Artifact) -> serde_json::Value {
    match artifact {
        Artifact::StateMachine { config } => {
            let raw = fs::read_to_string(&config).unwrap_or_else(|error| {
                panic!("failed to read '{}': {error}", config.display())
            });
            let config: DefinitionConfig = serde_json::from_str(&raw)
                .unwrap_or_else(|error| panic!("invalid definition config: {error}"));
            render_definition(&config)
        }
        Artifact::Pipe {
            queue_arn,
            state_machine_arn,
            role_arn,
        } => pipe_definition(&queue_arn, &state_machine_arn, &role_arn),
        Artifact::Rule {
            cluster_arn,
            task_definition_arn,
            role_arn,
            subnets,
            security_groups,
        } => rule_definition(&RuleTarget {
            cluster_arn,
            task_definition_arn,
            role_arn,
            subnets,
            security_groups,
        }),
        Artifact::Dispatcher {
            queue_arn,
            function_arn,
        } => event_source_mapping_definition(&queue_arn, &function_arn),
        Artifact::Redrive {
            dead_letter_queue_arn,
            max_receive_count,
        } => RedrivePolicy { max_receive_count }.to_attribute(&dead_letter_queue_arn),
    }
}

// ── CI jobs ────────────────────────────────────────────────────────

fn ci_check() {
    step("Check formatting");
    run_cargo(&["fmt", "--all", "--", "--check"]);

    step("Clippy");
    run_cargo(&[
        "clippy",
        "--all-targets",
        "--all-features",
        "--",
        "-D",
        "warnings",
    ]);
}

fn ci_test() {
    step("Test fanout_core");
    run_cargo(&["test", "-p", "fanout_core"]);

    step("Test fanout_lambda");
    run_cargo(&["test", "-p", "fanout_lambda"]);

    step("Test fanout_task");
    run_cargo(&["test", "-p", "fanout_task"]);
}

// ── main ───────────────────────────────────────────────────────────

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Ci { job } => {
            match job {
                CiJob::Check => ci_check(),
                CiJob::Test => ci_test(),
                CiJob::All => {
                    ci_check();
                    ci_test();
                }
            }
            eprintln!("\nCI job passed.");
        }
        Commands::ServerlessPackage { target, profile } => {
            package_serverless_artifacts(&target, profile);
        }
        Commands::Render { artifact } => {
            let rendered = render(artifact);
            println!(
                "{}",
                serde_json::to_string_pretty(&rendered).expect("rendered JSON should serialize")
            );
        }
    }
}
