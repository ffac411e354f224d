//! BDD scenarios for the configuration fetch flow.

use rstest_bdd_macros::scenario;

use super::test_helpers::{FetchContext, fetch_context};

#[scenario(
    path = "tests/features/fetch_config.feature",
    name = "Save the client configuration"
)]
fn scenario_save_configuration(fetch_context: FetchContext) {
    drop(fetch_context);
}

#[scenario(
    path = "tests/features/fetch_config.feature",
    name = "Fail before connecting when outputs are missing"
)]
fn scenario_missing_outputs(fetch_context: FetchContext) {
    drop(fetch_context);
}

#[scenario(
    path = "tests/features/fetch_config.feature",
    name = "Fail before connecting when the instance is unknown"
)]
fn scenario_unknown_instance(fetch_context: FetchContext) {
    drop(fetch_context);
}

#[scenario(
    path = "tests/features/fetch_config.feature",
    name = "Keep no file when the installer reports an error"
)]
fn scenario_installer_failure(fetch_context: FetchContext) {
    drop(fetch_context);
}
