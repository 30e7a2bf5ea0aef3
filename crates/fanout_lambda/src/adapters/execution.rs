/// Starts workflow runs on behalf of the dispatcher.
pub trait ExecutionStarter {
    /// Starts one run of `state_machine_arn` with `input` (a JSON document)
    /// and returns the execution identifier.
    fn start_execution(&self, state_machine_arn: &str, input: &str) -> Result<String, String>;
}
