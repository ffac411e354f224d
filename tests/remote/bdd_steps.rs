//! BDD step definitions for remote command execution.

use std::time::Duration;

use reality_proxy::remote::{InvocationStatus, RemoteCommand, RemoteExecutor};
use rstest_bdd_macros::{given, then, when};
use tokio::runtime::Runtime;

use super::test_helpers::{RemoteContext, RemoteOutcome};

const INSTANCE_ID: &str = "i-0123456789abcdef0";

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("assertion failed: {0}")]
    Assertion(String),
}

#[given("a ready remote executor")]
fn ready_executor(remote_context: &RemoteContext) {
    assert!(remote_context.outcome.borrow().is_none());
}

#[given("the command stays in progress for {polls} polls")]
fn stays_in_progress(remote_context: &RemoteContext, polls: usize) {
    remote_context.channel.push_in_progress(polls);
}

#[given("the command succeeds with output \"{output}\"")]
fn command_succeeds(remote_context: &RemoteContext, output: String) {
    remote_context.channel.push_success(output);
}

#[given("the command fails with stderr \"{stderr}\"")]
fn command_fails(remote_context: &RemoteContext, stderr: String) {
    remote_context
        .channel
        .push_terminal(InvocationStatus::Failed, stderr);
}

#[given("the command is cancelled remotely")]
fn command_cancelled(remote_context: &RemoteContext) {
    remote_context.channel.push_status(InvocationStatus::Cancelled);
}

#[given("the executor deadline has already passed")]
fn deadline_passed(remote_context: &RemoteContext) {
    let policy = remote_context.policy.borrow().with_timeout(Duration::ZERO);
    *remote_context.policy.borrow_mut() = policy;
}

#[when("I execute the remote command")]
fn execute_command(remote_context: &RemoteContext) -> Result<(), StepError> {
    let runtime = Runtime::new().map_err(|err| StepError::Assertion(err.to_string()))?;
    let executor = RemoteExecutor::new(remote_context.channel.clone())
        .with_policy(*remote_context.policy.borrow());
    let command = RemoteCommand::new(INSTANCE_ID, "cat /etc/hostname");

    let result = runtime.block_on(async { executor.execute(&command).await });
    *remote_context.outcome.borrow_mut() = Some(RemoteOutcome::from(result));
    Ok(())
}

fn outcome(remote_context: &RemoteContext) -> Result<RemoteOutcome, StepError> {
    remote_context
        .outcome
        .borrow()
        .clone()
        .ok_or_else(|| StepError::Assertion(String::from("missing outcome")))
}

#[then("the output is \"{expected}\"")]
fn output_is(remote_context: &RemoteContext, expected: String) -> Result<(), StepError> {
    match outcome(remote_context)? {
        RemoteOutcome::Output(stdout) if stdout == expected => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected output {expected:?}, got {other:?}"
        ))),
    }
}

#[then("the execution fails with status \"{expected}\"")]
fn fails_with_status(remote_context: &RemoteContext, expected: String) -> Result<(), StepError> {
    match outcome(remote_context)? {
        RemoteOutcome::Failed { status, .. } if status == expected => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected failure with status {expected}, got {other:?}"
        ))),
    }
}

#[then("the error output is \"{expected}\"")]
fn error_output_is(remote_context: &RemoteContext, expected: String) -> Result<(), StepError> {
    check_stderr(remote_context, &expected)
}

#[then("the error output is empty")]
fn error_output_is_empty(remote_context: &RemoteContext) -> Result<(), StepError> {
    check_stderr(remote_context, "")
}

fn check_stderr(remote_context: &RemoteContext, expected: &str) -> Result<(), StepError> {
    match outcome(remote_context)? {
        RemoteOutcome::Failed { stderr, .. } if stderr == expected => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected stderr {expected:?}, got {other:?}"
        ))),
    }
}

#[then("the execution times out")]
fn execution_times_out(remote_context: &RemoteContext) -> Result<(), StepError> {
    match outcome(remote_context)? {
        RemoteOutcome::TimedOut(_) => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected a timeout, got {other:?}"
        ))),
    }
}

#[then("the command was sent once")]
fn sent_once(remote_context: &RemoteContext) -> Result<(), StepError> {
    let sent = remote_context.channel.sent_commands().len();
    if sent == 1 {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected one dispatch, got {sent}"
        )))
    }
}

#[then("cancellation of the command was requested")]
fn cancellation_requested(remote_context: &RemoteContext) -> Result<(), StepError> {
    if remote_context.channel.cancelled().is_empty() {
        Err(StepError::Assertion(String::from(
            "cancel_command should be invoked",
        )))
    } else {
        Ok(())
    }
}
