//! Test support utilities shared across unit and integration tests.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;

use crate::engine::{EngineFuture, StackEngine, StackSnapshot, StackStatus, UpdateOutcome};
use crate::fetch::{ChannelConnector, ConnectFuture};
use crate::image::{ImageLookupError, ImageResolver};
use crate::remote::{
    ChannelFuture, CommandId, CommandInvocation, InvocationStatus, ManagementChannel,
    RemoteCommand,
};
use crate::stack::ImageId;

/// Account embedded in stack ids produced by [`stack_snapshot`].
pub const TEST_ACCOUNT: &str = "123456789012";

/// Error returned by the scripted doubles.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("scripted failure: {0}")]
pub struct ScriptedError(pub String);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct ChannelState {
    invocations: VecDeque<Result<CommandInvocation, ScriptedError>>,
    send_error: Option<String>,
    cancel_error: Option<String>,
    sent: Vec<RemoteCommand>,
    polls: usize,
    cancelled: Vec<CommandId>,
}

/// Scripted management channel returning queued invocations in FIFO order.
///
/// Once the queue is empty every poll reports `InProgress`. Clones share
/// state, so a test can keep a handle while the executor owns another.
#[derive(Clone, Debug, Default)]
pub struct ScriptedChannel {
    state: Arc<Mutex<ChannelState>>,
}

impl ScriptedChannel {
    /// Creates a channel with no queued invocations.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues an invocation with `status` and no output.
    pub fn push_status(&self, status: InvocationStatus) {
        self.push_invocation(CommandInvocation::with_status(status));
    }

    /// Queues `count` in-progress polls.
    pub fn push_in_progress(&self, count: usize) {
        for _ in 0..count {
            self.push_status(InvocationStatus::InProgress);
        }
    }

    /// Queues a successful invocation with `stdout`.
    pub fn push_success(&self, stdout: impl Into<String>) {
        self.push_invocation(CommandInvocation {
            status: InvocationStatus::Success,
            stdout: stdout.into(),
            stderr: String::new(),
        });
    }

    /// Queues a terminal invocation with `stderr`.
    pub fn push_terminal(&self, status: InvocationStatus, stderr: impl Into<String>) {
        self.push_invocation(CommandInvocation {
            status,
            stdout: String::new(),
            stderr: stderr.into(),
        });
    }

    /// Queues an explicit invocation.
    pub fn push_invocation(&self, invocation: CommandInvocation) {
        lock(&self.state).invocations.push_back(Ok(invocation));
    }

    /// Queues a failing poll.
    pub fn push_poll_error(&self, message: impl Into<String>) {
        lock(&self.state)
            .invocations
            .push_back(Err(ScriptedError(message.into())));
    }

    /// Makes every dispatch fail with `message`.
    pub fn fail_send(&self, message: impl Into<String>) {
        lock(&self.state).send_error = Some(message.into());
    }

    /// Makes every cancellation fail with `message`.
    pub fn fail_cancel(&self, message: impl Into<String>) {
        lock(&self.state).cancel_error = Some(message.into());
    }

    /// Commands dispatched so far.
    #[must_use]
    pub fn sent_commands(&self) -> Vec<RemoteCommand> {
        lock(&self.state).sent.clone()
    }

    /// Number of invocation polls so far.
    #[must_use]
    pub fn poll_count(&self) -> usize {
        lock(&self.state).polls
    }

    /// Commands whose cancellation was requested.
    #[must_use]
    pub fn cancelled(&self) -> Vec<CommandId> {
        lock(&self.state).cancelled.clone()
    }
}

impl ManagementChannel for ScriptedChannel {
    type Error = ScriptedError;

    fn send_command<'a>(
        &'a self,
        command: &'a RemoteCommand,
    ) -> ChannelFuture<'a, CommandId, Self::Error> {
        let result = {
            let mut state = lock(&self.state);
            if let Some(message) = state.send_error.clone() {
                Err(ScriptedError(message))
            } else {
                state.sent.push(command.clone());
                Ok(CommandId::new(format!("cmd-{}", state.sent.len())))
            }
        };
        Box::pin(async move { result })
    }

    fn get_command_invocation<'a>(
        &'a self,
        _command_id: &'a CommandId,
        _instance_id: &'a str,
    ) -> ChannelFuture<'a, CommandInvocation, Self::Error> {
        let result = {
            let mut state = lock(&self.state);
            state.polls += 1;
            state.invocations.pop_front().unwrap_or_else(|| {
                Ok(CommandInvocation::with_status(InvocationStatus::InProgress))
            })
        };
        Box::pin(async move { result })
    }

    fn cancel_command<'a>(
        &'a self,
        command_id: &'a CommandId,
        _instance_id: &'a str,
    ) -> ChannelFuture<'a, (), Self::Error> {
        let result = {
            let mut state = lock(&self.state);
            state.cancelled.push(command_id.clone());
            state.cancel_error.clone().map_or(Ok(()), |message| Err(ScriptedError(message)))
        };
        Box::pin(async move { result })
    }
}

/// Connector handing out a shared [`ScriptedChannel`] and recording regions.
#[derive(Clone, Debug, Default)]
pub struct ScriptedConnector {
    channel: ScriptedChannel,
    regions: Arc<Mutex<Vec<String>>>,
}

impl ScriptedConnector {
    /// Channel every connection shares.
    #[must_use]
    pub const fn channel(&self) -> &ScriptedChannel {
        &self.channel
    }

    /// Regions connected so far.
    #[must_use]
    pub fn regions(&self) -> Vec<String> {
        lock(&self.regions).clone()
    }
}

impl ChannelConnector for ScriptedConnector {
    type Channel = ScriptedChannel;

    fn connect<'a>(&'a self, region: &'a str) -> ConnectFuture<'a, Self::Channel> {
        lock(&self.regions).push(region.to_owned());
        let channel = self.channel.clone();
        Box::pin(async move { channel })
    }
}

/// Call recorded by [`ScriptedEngine`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum EngineCall {
    /// `describe` was called.
    Describe,
    /// `create` was called with this template body.
    Create(String),
    /// `update` was called with this template body.
    Update(String),
    /// `delete` was called.
    Delete,
}

#[derive(Debug)]
struct EngineState {
    snapshots: VecDeque<Option<StackSnapshot>>,
    update_outcome: UpdateOutcome,
    create_error: Option<String>,
    calls: Vec<EngineCall>,
}

impl Default for EngineState {
    fn default() -> Self {
        Self {
            snapshots: VecDeque::new(),
            update_outcome: UpdateOutcome::Started,
            create_error: None,
            calls: Vec::new(),
        }
    }
}

/// Scripted stack engine returning queued snapshots in FIFO order.
///
/// The last queued snapshot is sticky: once only one remains, every further
/// `describe` returns it. An empty queue describes a missing stack.
#[derive(Clone, Debug, Default)]
pub struct ScriptedEngine {
    state: Arc<Mutex<EngineState>>,
}

impl ScriptedEngine {
    /// Creates an engine that describes no stack.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues the result of a `describe` call.
    pub fn push_describe(&self, snapshot: Option<StackSnapshot>) {
        lock(&self.state).snapshots.push_back(snapshot);
    }

    /// Queues a snapshot with `status` and `outputs`.
    pub fn push_status(&self, status: &str, outputs: &[(&str, &str)]) {
        self.push_describe(Some(stack_snapshot(status, outputs)));
    }

    /// Sets the result of every `update` call.
    pub fn set_update_outcome(&self, outcome: UpdateOutcome) {
        lock(&self.state).update_outcome = outcome;
    }

    /// Makes every `create` call fail with `message`.
    pub fn fail_create(&self, message: impl Into<String>) {
        lock(&self.state).create_error = Some(message.into());
    }

    /// Calls recorded so far.
    #[must_use]
    pub fn calls(&self) -> Vec<EngineCall> {
        lock(&self.state).calls.clone()
    }
}

impl StackEngine for ScriptedEngine {
    type Error = ScriptedError;

    fn describe<'a>(
        &'a self,
        _stack_name: &'a str,
    ) -> EngineFuture<'a, Option<StackSnapshot>, Self::Error> {
        let snapshot = {
            let mut state = lock(&self.state);
            state.calls.push(EngineCall::Describe);
            if state.snapshots.len() > 1 {
                state.snapshots.pop_front().flatten()
            } else {
                state.snapshots.front().cloned().flatten()
            }
        };
        Box::pin(async move { Ok(snapshot) })
    }

    fn create<'a>(
        &'a self,
        stack_name: &'a str,
        template_body: &'a str,
    ) -> EngineFuture<'a, String, Self::Error> {
        let result = {
            let mut state = lock(&self.state);
            state.calls.push(EngineCall::Create(template_body.to_owned()));
            state
                .create_error
                .clone()
                .map_or_else(|| Ok(stack_arn(stack_name)), |message| Err(ScriptedError(message)))
        };
        Box::pin(async move { result })
    }

    fn update<'a>(
        &'a self,
        _stack_name: &'a str,
        template_body: &'a str,
    ) -> EngineFuture<'a, UpdateOutcome, Self::Error> {
        let outcome = {
            let mut state = lock(&self.state);
            state.calls.push(EngineCall::Update(template_body.to_owned()));
            state.update_outcome
        };
        Box::pin(async move { Ok(outcome) })
    }

    fn delete<'a>(&'a self, _stack_name: &'a str) -> EngineFuture<'a, (), Self::Error> {
        lock(&self.state).calls.push(EngineCall::Delete);
        Box::pin(async { Ok(()) })
    }
}

fn stack_arn(stack_name: &str) -> String {
    format!("arn:aws:cloudformation:us-east-1:{TEST_ACCOUNT}:stack/{stack_name}/0000")
}

/// Builds a snapshot of `VlessProxyStack` owned by [`TEST_ACCOUNT`].
#[must_use]
pub fn stack_snapshot(status: &str, outputs: &[(&str, &str)]) -> StackSnapshot {
    StackSnapshot {
        stack_id: stack_arn("VlessProxyStack"),
        status: StackStatus::from(status),
        status_reason: None,
        outputs: outputs
            .iter()
            .map(|(key, value)| ((*key).to_owned(), (*value).to_owned()))
            .collect::<BTreeMap<_, _>>(),
    }
}

/// Outputs a settled proxy stack exports.
#[must_use]
pub fn complete_outputs() -> Vec<(&'static str, &'static str)> {
    vec![
        ("ProxyIP", "203.0.113.10"),
        ("InstanceId", "i-0123456789abcdef0"),
        ("Region", "us-east-1"),
        (
            "SessionManagerAccess",
            "aws ssm start-session --target i-0123456789abcdef0",
        ),
        (
            "ConfigInstructions",
            "Run 'reality-proxy fetch-config' to get your Reality configuration",
        ),
    ]
}

/// Image resolver returning a fixed result and counting lookups.
#[derive(Clone, Debug)]
pub struct ScriptedImageResolver {
    result: Result<ImageId, ImageLookupError>,
    lookups: Arc<Mutex<usize>>,
}

impl ScriptedImageResolver {
    /// Resolver that always yields `image`.
    #[must_use]
    pub fn resolving(image: &str) -> Self {
        Self {
            result: Ok(ImageId::from(image)),
            lookups: Arc::default(),
        }
    }

    /// Resolver that always fails with `err`.
    #[must_use]
    pub fn failing(err: ImageLookupError) -> Self {
        Self {
            result: Err(err),
            lookups: Arc::default(),
        }
    }

    /// Number of lookups so far.
    #[must_use]
    pub fn lookups(&self) -> usize {
        *lock(&self.lookups)
    }
}

impl ImageResolver for ScriptedImageResolver {
    fn resolve(&self) -> EngineFuture<'_, ImageId, ImageLookupError> {
        *lock(&self.lookups) += 1;
        let result = self.result.clone();
        Box::pin(async move { result })
    }
}
