//! Shared fixtures for remote execution BDD scenarios.

use std::cell::RefCell;
use std::time::Duration;

use reality_proxy::remote::{PollPolicy, RemoteExecutionError};
use reality_proxy::test_support::{ScriptedChannel, ScriptedError};
use rstest::fixture;

/// Outcome of one execution, reduced to what the steps assert on.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RemoteOutcome {
    Output(String),
    Failed { status: String, stderr: String },
    TimedOut(String),
    Other(String),
}

impl From<Result<String, RemoteExecutionError<ScriptedError>>> for RemoteOutcome {
    fn from(result: Result<String, RemoteExecutionError<ScriptedError>>) -> Self {
        match result {
            Ok(stdout) => Self::Output(stdout),
            Err(RemoteExecutionError::Failed { status, stderr, .. }) => Self::Failed {
                status: status.as_str().to_owned(),
                stderr,
            },
            Err(err @ RemoteExecutionError::TimedOut { .. }) => Self::TimedOut(err.to_string()),
            Err(err) => Self::Other(err.to_string()),
        }
    }
}

#[derive(Debug)]
pub struct RemoteContext {
    pub channel: ScriptedChannel,
    pub policy: RefCell<PollPolicy>,
    pub outcome: RefCell<Option<RemoteOutcome>>,
}

#[fixture]
pub fn remote_context() -> RemoteContext {
    RemoteContext {
        channel: ScriptedChannel::new(),
        policy: RefCell::new(PollPolicy {
            initial_interval: Duration::from_millis(1),
            max_interval: Duration::from_millis(4),
            timeout: Duration::from_secs(5),
        }),
        outcome: RefCell::new(None),
    }
}
