//! BDD step definitions for the configuration fetch flow.

use std::fs::{read_to_string, write};

use reality_proxy::remote::InvocationStatus;
use reality_proxy::test_support::complete_outputs;
use rstest_bdd_macros::{given, then, when};
use serde_json::{Map, Value, json};
use tokio::runtime::Runtime;

use super::test_helpers::FetchContext;

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("assertion failed: {0}")]
    Assertion(String),
}

fn seed_outputs(fetch_context: &FetchContext, facts: &[(&str, &str)]) {
    let entry: Map<String, Value> = facts
        .iter()
        .map(|(key, value)| ((*key).to_owned(), json!(value)))
        .collect();
    let document = json!({ "VlessProxyStack": entry });
    write(fetch_context.outputs_path(), document.to_string())
        .unwrap_or_else(|err| panic!("seed outputs file: {err}"));
}

#[given("deployment outputs for the proxy")]
fn outputs_present(fetch_context: &FetchContext) {
    seed_outputs(fetch_context, &complete_outputs());
}

#[given("deployment outputs without an instance id")]
fn outputs_without_instance(fetch_context: &FetchContext) {
    let facts: Vec<_> = complete_outputs()
        .into_iter()
        .filter(|(key, _)| *key != "InstanceId")
        .collect();
    seed_outputs(fetch_context, &facts);
}

#[given("no deployment outputs")]
fn outputs_absent(fetch_context: &FetchContext) {
    assert!(!fetch_context.outputs_path().exists());
}

#[given("the proxy prints \"{config}\"")]
fn proxy_prints(fetch_context: &FetchContext, config: String) {
    fetch_context.connector.channel().push_success(config);
}

#[given("the installer fails with \"{stderr}\"")]
fn installer_fails(fetch_context: &FetchContext, stderr: String) {
    fetch_context
        .connector
        .channel()
        .push_terminal(InvocationStatus::Failed, stderr);
}

#[when("I fetch the configuration")]
fn fetch_configuration(fetch_context: &FetchContext) -> Result<(), StepError> {
    let runtime = Runtime::new().map_err(|err| StepError::Assertion(err.to_string()))?;
    let fetcher = fetch_context.fetcher();
    let request = fetch_context.request();

    let result = runtime.block_on(async {
        fetcher
            .fetch(&fetch_context.connector, &request)
            .await
            .map_err(|err| err.to_string())
    });
    *fetch_context.outcome.borrow_mut() = Some(result);
    Ok(())
}

#[then("the configuration file contains \"{expected}\"")]
fn file_contains(fetch_context: &FetchContext, expected: String) -> Result<(), StepError> {
    let outcome = fetch_context.outcome.borrow().clone();
    let path = match outcome {
        Some(Ok(path)) => path,
        other => {
            return Err(StepError::Assertion(format!(
                "expected a saved configuration, got {other:?}"
            )));
        }
    };
    let written = read_to_string(&path).map_err(|err| StepError::Assertion(err.to_string()))?;
    if written == expected {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {expected:?} in {path}, found {written:?}"
        )))
    }
}

#[then("the channel was opened in \"{region}\"")]
fn channel_region(fetch_context: &FetchContext, region: String) -> Result<(), StepError> {
    let regions = fetch_context.connector.regions();
    if regions == [region.clone()] {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected one connection in {region}, got {regions:?}"
        )))
    }
}

#[then("the fetch fails mentioning \"{fragment}\"")]
fn fetch_fails(fetch_context: &FetchContext, fragment: String) -> Result<(), StepError> {
    match fetch_context.outcome.borrow().as_ref() {
        Some(Err(message)) if message.contains(&fragment) => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected failure mentioning {fragment:?}, got {other:?}"
        ))),
    }
}

#[then("no channel was opened")]
fn no_channel(fetch_context: &FetchContext) -> Result<(), StepError> {
    let regions = fetch_context.connector.regions();
    let sent = fetch_context.connector.channel().sent_commands();
    if regions.is_empty() && sent.is_empty() {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected no connection, got regions {regions:?} and commands {sent:?}"
        )))
    }
}

#[then("no configuration file was written")]
fn no_file(fetch_context: &FetchContext) -> Result<(), StepError> {
    if fetch_context.output_path().exists() {
        Err(StepError::Assertion(String::from(
            "configuration file should not exist",
        )))
    } else {
        Ok(())
    }
}
