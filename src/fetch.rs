//! Retrieval of the proxy's client configuration.
//!
//! The fetch flow reads the persisted deployment facts, connects a
//! management channel in the recorded region, asks the installer on the
//! instance to print the client configuration, and writes that output to a
//! local file. Facts are validated before any channel is built.

use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use shell_escape::unix::escape;
use thiserror::Error;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::outputs::{OutputsError, OutputsStore, write_file};
use crate::remote::{
    ManagementChannel, PollPolicy, RemoteCommand, RemoteExecutionError, RemoteExecutor,
    SsmChannel,
};
use crate::stack::{SETUP_COMPLETE_MARKER, installer_invocation};

/// User whose client configuration the installer prints.
pub const PROXY_USER: &str = "RealityEZPZ";

const SETUP_READY: &str = "ready";
const SETUP_POLL_INTERVAL: Duration = Duration::from_secs(15);
const SETUP_WAIT_TIMEOUT: Duration = Duration::from_secs(20 * 60);

/// Future returned by [`ChannelConnector::connect`].
pub type ConnectFuture<'a, C> = Pin<Box<dyn Future<Output = C> + Send + 'a>>;

/// Builds a management channel scoped to a region.
pub trait ChannelConnector {
    /// Channel produced by the connector.
    type Channel: ManagementChannel;

    /// Connects a channel for `region`.
    fn connect<'a>(&'a self, region: &'a str) -> ConnectFuture<'a, Self::Channel>;
}

/// Connector producing [`SsmChannel`]s.
#[derive(Clone, Copy, Debug, Default)]
pub struct SsmConnector;

impl ChannelConnector for SsmConnector {
    type Channel = SsmChannel;

    fn connect<'a>(&'a self, region: &'a str) -> ConnectFuture<'a, Self::Channel> {
        Box::pin(SsmChannel::connect(region))
    }
}

/// Command that prints the client configuration for [`PROXY_USER`].
#[must_use]
pub fn show_user_command() -> String {
    let script = format!("{} --show-user {PROXY_USER}", installer_invocation());
    format!("sudo bash -c {}", escape(script.into()))
}

/// Command that prints `ready` once the boot installer has finished.
#[must_use]
pub fn setup_probe_command() -> String {
    let marker = escape(SETUP_COMPLETE_MARKER.into());
    format!("if [ -f {marker} ]; then echo {SETUP_READY}; fi")
}

/// Errors surfaced while fetching the client configuration.
#[derive(Debug, Error)]
pub enum FetchError<ChannelError>
where
    ChannelError: std::error::Error + 'static,
{
    /// The deployment facts are absent or incomplete.
    #[error("{0}")]
    MissingOutputFacts(#[source] OutputsError),
    /// A remote command failed.
    #[error("{0}")]
    Remote(#[source] RemoteExecutionError<ChannelError>),
    /// The boot installer did not finish before the deadline.
    #[error("proxy setup did not complete within {waited_secs}s")]
    SetupIncomplete {
        /// Seconds spent waiting.
        waited_secs: u64,
    },
    /// The wait for proxy setup was cancelled.
    #[error("cancelled while waiting for proxy setup")]
    Interrupted,
    /// Writing the configuration file failed.
    #[error("failed to write {path}: {message}")]
    Write {
        /// Destination path.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
}

/// Parameters of one fetch.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FetchRequest {
    /// Stack whose facts are read.
    pub stack_name: String,
    /// Destination of the client configuration.
    pub output_path: Utf8PathBuf,
    /// Wait for the boot installer to finish first.
    pub wait_for_setup: bool,
}

/// Executes the fetch flow.
#[derive(Debug)]
pub struct ConfigFetcher {
    store: OutputsStore,
    policy: PollPolicy,
    cancel: CancellationToken,
    setup_poll_interval: Duration,
    setup_wait_timeout: Duration,
}

impl ConfigFetcher {
    /// Creates a fetcher reading facts from `store`.
    #[must_use]
    pub fn new(store: OutputsStore) -> Self {
        Self {
            store,
            policy: PollPolicy::default(),
            cancel: CancellationToken::new(),
            setup_poll_interval: SETUP_POLL_INTERVAL,
            setup_wait_timeout: SETUP_WAIT_TIMEOUT,
        }
    }

    /// Overrides the poll policy of each remote command.
    #[must_use]
    pub const fn with_policy(mut self, policy: PollPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Replaces the cancellation token handed to the executor.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Overrides the spacing of setup probes.
    ///
    /// This is primarily used by tests to keep timeout scenarios fast.
    #[must_use]
    pub const fn with_setup_poll_interval(mut self, interval: Duration) -> Self {
        self.setup_poll_interval = interval;
        self
    }

    /// Overrides the setup wait deadline.
    ///
    /// This is primarily used by tests to keep timeout scenarios fast.
    #[must_use]
    pub const fn with_setup_wait_timeout(mut self, timeout: Duration) -> Self {
        self.setup_wait_timeout = timeout;
        self
    }

    /// Fetches the client configuration and returns the written path.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::MissingOutputFacts`] before connecting when the
    /// facts cannot be loaded, [`FetchError::Remote`] when a remote command
    /// fails, [`FetchError::SetupIncomplete`] when the setup wait expires,
    /// and [`FetchError::Write`] when the file cannot be written.
    pub async fn fetch<K>(
        &self,
        connector: &K,
        request: &FetchRequest,
    ) -> Result<Utf8PathBuf, FetchError<<K::Channel as ManagementChannel>::Error>>
    where
        K: ChannelConnector,
    {
        let target = self
            .store
            .load_target(&request.stack_name)
            .map_err(FetchError::MissingOutputFacts)?;
        info!(
            region = %target.region,
            instance_id = %target.instance_id,
            "connecting management channel"
        );

        let channel = connector.connect(&target.region).await;
        let executor = RemoteExecutor::new(channel)
            .with_policy(self.policy)
            .with_cancellation(self.cancel.clone());

        if request.wait_for_setup {
            self.wait_for_setup(&executor, &target.instance_id).await?;
        }

        let command = RemoteCommand::new(target.instance_id, show_user_command());
        let config = executor.execute(&command).await.map_err(FetchError::Remote)?;

        write_output(&request.output_path, &config)?;
        info!(path = %request.output_path, "client configuration written");
        Ok(request.output_path.clone())
    }

    async fn wait_for_setup<C>(
        &self,
        executor: &RemoteExecutor<C>,
        instance_id: &str,
    ) -> Result<(), FetchError<C::Error>>
    where
        C: ManagementChannel,
    {
        let probe = RemoteCommand::new(instance_id, setup_probe_command());
        let started = Instant::now();
        let deadline = started.checked_add(self.setup_wait_timeout);
        loop {
            let output = executor.execute(&probe).await.map_err(FetchError::Remote)?;
            if output.trim() == SETUP_READY {
                info!("proxy setup complete");
                return Ok(());
            }
            if deadline.is_some_and(|limit| Instant::now() >= limit) {
                return Err(FetchError::SetupIncomplete {
                    waited_secs: started.elapsed().as_secs(),
                });
            }
            debug!("proxy setup still running");
            tokio::select! {
                () = sleep(self.setup_poll_interval) => {}
                () = self.cancel.cancelled() => return Err(FetchError::Interrupted),
            }
        }
    }
}

fn write_output<E>(path: &Utf8Path, contents: &str) -> Result<(), FetchError<E>>
where
    E: std::error::Error + 'static,
{
    write_file(path, contents).map_err(|err| FetchError::Write {
        path: path.to_owned(),
        message: err.to_string(),
    })
}
