//! Remote command execution over the instance management channel.
//!
//! A command is dispatched exactly once and its invocation polled until it
//! reaches a terminal status. Polls are spaced by exponential backoff, bounded
//! by an overall deadline, and abandoned early when the cancellation token
//! fires. No output is returned before a terminal status is observed.

mod ssm;

use std::fmt::{self, Display};
use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};

use backoff::ExponentialBackoff;
use backoff::backoff::Backoff;
use thiserror::Error;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use ssm::{SsmChannel, SsmChannelError};

/// Future returned by management channel operations.
pub type ChannelFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// One shell command addressed to one instance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RemoteCommand {
    /// Provider id of the target instance.
    pub target_instance_id: String,
    /// Script text executed by the instance shell.
    pub shell_text: String,
}

impl RemoteCommand {
    /// Builds a command for `target_instance_id`.
    #[must_use]
    pub fn new(target_instance_id: impl Into<String>, shell_text: impl Into<String>) -> Self {
        Self {
            target_instance_id: target_instance_id.into(),
            shell_text: shell_text.into(),
        }
    }
}

/// Identifier assigned by the channel to a dispatched command.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct CommandId(String);

impl CommandId {
    /// Wraps a raw identifier.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the wrapped identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Status of a command invocation as reported by the channel.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum InvocationStatus {
    /// Queued and not yet picked up by the agent.
    Pending,
    /// Running on the instance.
    InProgress,
    /// Delivery delayed, the agent will retry.
    Delayed,
    /// Finished with exit code zero.
    Success,
    /// Cancelled before completion.
    Cancelled,
    /// Cancellation requested but not yet confirmed.
    Cancelling,
    /// Finished with a non-zero exit code.
    Failed,
    /// The provider-side execution timeout elapsed.
    TimedOut,
    /// Status string this client does not recognise.
    Unknown(String),
}

impl InvocationStatus {
    /// Maps the provider's status string.
    #[must_use]
    pub fn from_provider(value: &str) -> Self {
        match value {
            "Pending" => Self::Pending,
            "InProgress" => Self::InProgress,
            "Delayed" => Self::Delayed,
            "Success" => Self::Success,
            "Cancelled" => Self::Cancelled,
            "Cancelling" => Self::Cancelling,
            "Failed" => Self::Failed,
            "TimedOut" => Self::TimedOut,
            other => Self::Unknown(other.to_owned()),
        }
    }

    /// Provider spelling of the status.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Pending => "Pending",
            Self::InProgress => "InProgress",
            Self::Delayed => "Delayed",
            Self::Success => "Success",
            Self::Cancelled => "Cancelled",
            Self::Cancelling => "Cancelling",
            Self::Failed => "Failed",
            Self::TimedOut => "TimedOut",
            Self::Unknown(other) => other,
        }
    }

    /// Whether polling stops at this status.
    ///
    /// Only `Success`, `Failed`, and `Cancelled` end the poll loop; every
    /// other status, including `TimedOut`, is bounded by the client deadline.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Cancelled)
    }
}

impl Display for InvocationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observed state of one invocation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// Current status.
    pub status: InvocationStatus,
    /// Captured standard output, empty until the command writes any.
    pub stdout: String,
    /// Captured standard error, empty until the command writes any.
    pub stderr: String,
}

impl CommandInvocation {
    /// Invocation with `status` and no captured output.
    #[must_use]
    pub const fn with_status(status: InvocationStatus) -> Self {
        Self {
            status,
            stdout: String::new(),
            stderr: String::new(),
        }
    }
}

/// Interface to the instance management service.
pub trait ManagementChannel {
    /// Provider specific error type returned by the channel.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Dispatches `command` and returns its identifier.
    fn send_command<'a>(
        &'a self,
        command: &'a RemoteCommand,
    ) -> ChannelFuture<'a, CommandId, Self::Error>;

    /// Reads the invocation of `command_id` on `instance_id`.
    fn get_command_invocation<'a>(
        &'a self,
        command_id: &'a CommandId,
        instance_id: &'a str,
    ) -> ChannelFuture<'a, CommandInvocation, Self::Error>;

    /// Requests cancellation of `command_id` on `instance_id`.
    fn cancel_command<'a>(
        &'a self,
        command_id: &'a CommandId,
        instance_id: &'a str,
    ) -> ChannelFuture<'a, (), Self::Error>;
}

/// Spacing and deadline of the poll loop.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PollPolicy {
    /// Delay before the second poll.
    pub initial_interval: Duration,
    /// Upper bound for the delay between polls.
    pub max_interval: Duration,
    /// Overall deadline measured from dispatch.
    pub timeout: Duration,
}

const BACKOFF_MULTIPLIER: f64 = 2.0;

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(10),
            timeout: Duration::from_secs(600),
        }
    }
}

impl PollPolicy {
    /// Overrides the overall deadline.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn backoff(&self) -> ExponentialBackoff {
        let mut backoff = ExponentialBackoff {
            initial_interval: self.initial_interval,
            max_interval: self.max_interval,
            multiplier: BACKOFF_MULTIPLIER,
            randomization_factor: 0.0,
            max_elapsed_time: None,
            ..Default::default()
        };
        backoff.reset();
        backoff
    }
}

/// Errors surfaced while executing a remote command.
#[derive(Debug, Error)]
pub enum RemoteExecutionError<ChannelError>
where
    ChannelError: std::error::Error + 'static,
{
    /// The command reached `Failed` or `Cancelled`.
    #[error("remote command {command_id} ended with status {status}: {stderr}")]
    Failed {
        /// Identifier of the command.
        command_id: CommandId,
        /// Terminal status.
        status: InvocationStatus,
        /// Captured standard error, possibly empty.
        stderr: String,
    },
    /// A channel call failed.
    #[error("management channel error: {0}")]
    Channel(#[source] ChannelError),
    /// No terminal status was observed before the deadline.
    #[error("remote command timed out: {message}")]
    TimedOut {
        /// Human-readable description of the failure.
        message: String,
    },
    /// The cancellation token fired before a terminal status was observed.
    #[error("remote command interrupted: {message}")]
    Interrupted {
        /// Human-readable description of the failure.
        message: String,
    },
}

/// Executes commands through a management channel.
#[derive(Debug)]
pub struct RemoteExecutor<C> {
    channel: C,
    policy: PollPolicy,
    cancel: CancellationToken,
}

impl<C> RemoteExecutor<C>
where
    C: ManagementChannel,
{
    /// Creates an executor with the default poll policy.
    #[must_use]
    pub fn new(channel: C) -> Self {
        Self {
            channel,
            policy: PollPolicy::default(),
            cancel: CancellationToken::new(),
        }
    }

    /// Overrides the poll policy.
    #[must_use]
    pub const fn with_policy(mut self, policy: PollPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Replaces the cancellation token observed between polls.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Dispatches `command` and waits for its terminal status.
    ///
    /// Returns the captured standard output when the command succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteExecutionError::Failed`] when the command ends in
    /// `Failed` or `Cancelled`, [`RemoteExecutionError::Channel`] when a
    /// channel call fails, and [`RemoteExecutionError::TimedOut`] or
    /// [`RemoteExecutionError::Interrupted`] when polling is abandoned.
    pub async fn execute(
        &self,
        command: &RemoteCommand,
    ) -> Result<String, RemoteExecutionError<C::Error>> {
        let instance_id = command.target_instance_id.as_str();
        if self.cancel.is_cancelled() {
            return Err(RemoteExecutionError::Interrupted {
                message: format!("command for {instance_id} was cancelled before dispatch"),
            });
        }
        let command_id = self
            .channel
            .send_command(command)
            .await
            .map_err(RemoteExecutionError::Channel)?;
        info!(command_id = %command_id, instance_id, "remote command dispatched");

        let deadline = Instant::now().checked_add(self.policy.timeout);
        let mut backoff = self.policy.backoff();
        loop {
            if self.cancel.is_cancelled() {
                return Err(self.interrupted(&command_id, instance_id).await);
            }

            let invocation = self
                .channel
                .get_command_invocation(&command_id, instance_id)
                .await
                .map_err(RemoteExecutionError::Channel)?;
            debug!(command_id = %command_id, status = %invocation.status, "polled invocation");

            match invocation.status {
                InvocationStatus::Success => return Ok(invocation.stdout),
                InvocationStatus::Failed | InvocationStatus::Cancelled => {
                    return Err(RemoteExecutionError::Failed {
                        command_id,
                        status: invocation.status,
                        stderr: invocation.stderr,
                    });
                }
                _ => {}
            }

            let now = Instant::now();
            if deadline.is_some_and(|limit| now >= limit) {
                return Err(self.timed_out(&command_id, instance_id).await);
            }
            let next = backoff.next_backoff().unwrap_or(self.policy.max_interval);
            let delay = deadline.map_or(next, |limit| {
                next.min(limit.saturating_duration_since(now))
            });

            tokio::select! {
                () = sleep(delay) => {}
                () = self.cancel.cancelled() => {
                    return Err(self.interrupted(&command_id, instance_id).await);
                }
            }
        }
    }

    async fn timed_out(
        &self,
        command_id: &CommandId,
        instance_id: &str,
    ) -> RemoteExecutionError<C::Error> {
        let message = format!(
            "no terminal status for command {command_id} within {}s",
            self.policy.timeout.as_secs_f64()
        );
        RemoteExecutionError::TimedOut {
            message: self.cancel_with_note(command_id, instance_id, message).await,
        }
    }

    async fn interrupted(
        &self,
        command_id: &CommandId,
        instance_id: &str,
    ) -> RemoteExecutionError<C::Error> {
        let message = format!("polling of command {command_id} was cancelled");
        RemoteExecutionError::Interrupted {
            message: self.cancel_with_note(command_id, instance_id, message).await,
        }
    }

    async fn cancel_with_note(
        &self,
        command_id: &CommandId,
        instance_id: &str,
        message: String,
    ) -> String {
        let cancel_error = self
            .channel
            .cancel_command(command_id, instance_id)
            .await
            .err();
        if let Some(err) = cancel_error.as_ref() {
            warn!(command_id = %command_id, error = %err, "failed to cancel remote command");
        }
        append_cancel_note(message, cancel_error.as_ref())
    }
}

fn append_cancel_note<E: Display>(message: String, cancel_error: Option<&E>) -> String {
    if let Some(cancel) = cancel_error {
        format!("{message} (cancel also failed: {cancel})")
    } else {
        message
    }
}
