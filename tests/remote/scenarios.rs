//! BDD scenarios for remote command execution.

use rstest_bdd_macros::scenario;

use super::test_helpers::{RemoteContext, remote_context};

#[scenario(
    path = "tests/features/remote_execution.feature",
    name = "Return stdout once the command succeeds"
)]
fn scenario_success(remote_context: RemoteContext) {
    drop(remote_context);
}

#[scenario(
    path = "tests/features/remote_execution.feature",
    name = "Surface stderr when the command fails"
)]
fn scenario_failure(remote_context: RemoteContext) {
    drop(remote_context);
}

#[scenario(
    path = "tests/features/remote_execution.feature",
    name = "Report a cancelled command with empty stderr"
)]
fn scenario_cancelled(remote_context: RemoteContext) {
    drop(remote_context);
}

#[scenario(
    path = "tests/features/remote_execution.feature",
    name = "Time out and cancel a command that never finishes"
)]
fn scenario_timeout(remote_context: RemoteContext) {
    drop(remote_context);
}
