//! Orchestrates deployment of the proxy stack.
//!
//! The provisioner resolves the boot image, declares and synthesises the
//! resource graph, submits it to the stack engine, waits for the stack to
//! settle, and persists the exported facts. Any step failing aborts the run;
//! rollback is left to the engine.

use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::engine::{StackEngine, StackPhase, StackSnapshot, UpdateOutcome};
use crate::image::{ImageLookupError, ImageResolver};
use crate::outputs::{
    CONFIG_INSTRUCTIONS_KEY, INSTANCE_ID_KEY, OutputFacts, OutputsError, OutputsStore,
    PROXY_IP_KEY, REGION_KEY, SESSION_MANAGER_ACCESS_KEY,
};
use crate::stack::{ProxyStack, StackSettings, Template};

const POLL_INTERVAL: Duration = Duration::from_secs(5);
const WAIT_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Facts every settled stack must export.
pub const REQUIRED_OUTPUTS: [&str; 5] = [
    PROXY_IP_KEY,
    INSTANCE_ID_KEY,
    REGION_KEY,
    SESSION_MANAGER_ACCESS_KEY,
    CONFIG_INSTRUCTIONS_KEY,
];

/// Parameters of one deployment.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DeployRequest {
    /// Stack name, also the key in the outputs file.
    pub stack_name: String,
    /// Account the stack must belong to, when known.
    pub account: Option<String>,
    /// Target region.
    pub region: String,
    /// Instance size.
    pub instance_type: String,
}

/// Errors surfaced while provisioning or tearing down the stack.
#[derive(Debug, Error)]
pub enum ProvisionError<EngineError>
where
    EngineError: std::error::Error + 'static,
{
    /// Raised when the boot image cannot be resolved.
    #[error("failed to resolve boot image: {0}")]
    Image(#[source] ImageLookupError),
    /// Raised when the template cannot be rendered.
    #[error("failed to render template: {message}")]
    Render {
        /// Human-readable description of the failure.
        message: String,
    },
    /// Raised when an engine call fails.
    #[error("stack engine error: {0}")]
    Engine(#[source] EngineError),
    /// Raised when an existing stack can only be deleted.
    #[error(
        "stack {stack_name} is in {status} and cannot be updated; run `reality-proxy destroy` first"
    )]
    RequiresTeardown {
        /// Stack name.
        stack_name: String,
        /// Current status.
        status: String,
    },
    /// Raised when the stack belongs to a different account.
    #[error("stack {stack_name} belongs to account {actual}, expected {expected}")]
    AccountMismatch {
        /// Stack name.
        stack_name: String,
        /// Configured account.
        expected: String,
        /// Account embedded in the stack id.
        actual: String,
    },
    /// Raised when the stack settles in a failed state.
    #[error("stack {stack_name} ended in {status}: {reason}")]
    StackFailed {
        /// Stack name.
        stack_name: String,
        /// Final status.
        status: String,
        /// Status reason reported by the engine.
        reason: String,
    },
    /// Raised when the stack disappears while being waited on.
    #[error("stack {stack_name} no longer exists")]
    Vanished {
        /// Stack name.
        stack_name: String,
    },
    /// Raised when the stack does not settle before the deadline.
    #[error("timeout waiting for stack {stack_name} (last status {status})")]
    Timeout {
        /// Stack name.
        stack_name: String,
        /// Last observed status.
        status: String,
    },
    /// Raised when a settled stack lacks a required output.
    #[error("stack {stack_name} did not export {key}")]
    MissingOutput {
        /// Stack name.
        stack_name: String,
        /// Missing output key.
        key: &'static str,
    },
    /// Raised when the outputs file cannot be written.
    #[error("failed to persist outputs: {0}")]
    Persist(#[source] OutputsError),
}

/// Result of a teardown request.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DestroyOutcome {
    /// The stack existed and has been deleted.
    Deleted,
    /// No stack with that name existed.
    Absent,
}

/// Drives a stack engine through creation, update and deletion waits.
#[derive(Debug)]
pub struct StackLifecycle<E> {
    engine: E,
    poll_interval: Duration,
    wait_timeout: Duration,
}

impl<E> StackLifecycle<E>
where
    E: StackEngine,
{
    /// Creates a lifecycle driver with the default poll cadence.
    #[must_use]
    pub const fn new(engine: E) -> Self {
        Self {
            engine,
            poll_interval: POLL_INTERVAL,
            wait_timeout: WAIT_TIMEOUT,
        }
    }

    /// Overrides the stack polling interval.
    ///
    /// This is primarily used by tests to keep timeout scenarios fast.
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Overrides the stack wait timeout.
    ///
    /// This is primarily used by tests to keep timeout scenarios fast.
    #[must_use]
    pub const fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = timeout;
        self
    }

    /// Deletes the stack and waits until it is gone.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError`] when an engine call fails, the deletion
    /// fails, or the stack is still present at the deadline.
    pub async fn destroy(
        &self,
        stack_name: &str,
    ) -> Result<DestroyOutcome, ProvisionError<E::Error>> {
        let existing = self
            .engine
            .describe(stack_name)
            .await
            .map_err(ProvisionError::Engine)?;
        if existing.is_none_or(|snapshot| snapshot.status.phase() == StackPhase::Deleted) {
            warn!(stack = stack_name, "stack does not exist; nothing to destroy");
            return Ok(DestroyOutcome::Absent);
        }

        info!(stack = stack_name, "deleting stack");
        self.engine
            .delete(stack_name)
            .await
            .map_err(ProvisionError::Engine)?;
        self.wait_until_gone(stack_name).await?;
        Ok(DestroyOutcome::Deleted)
    }

    async fn wait_until_settled(
        &self,
        stack_name: &str,
    ) -> Result<StackSnapshot, ProvisionError<E::Error>> {
        let deadline = Instant::now().checked_add(self.wait_timeout);
        loop {
            let snapshot = self
                .engine
                .describe(stack_name)
                .await
                .map_err(ProvisionError::Engine)?
                .ok_or_else(|| ProvisionError::Vanished {
                    stack_name: stack_name.to_owned(),
                })?;

            match snapshot.status.phase() {
                StackPhase::Settled => return Ok(snapshot),
                StackPhase::InProgress => {
                    debug!(stack = stack_name, status = %snapshot.status, "stack in progress");
                }
                StackPhase::Failed | StackPhase::Deleted => {
                    return Err(stack_failed(stack_name, snapshot));
                }
            }

            if is_past(deadline) {
                return Err(ProvisionError::Timeout {
                    stack_name: stack_name.to_owned(),
                    status: snapshot.status.to_string(),
                });
            }
            sleep(self.poll_interval).await;
        }
    }

    async fn wait_until_gone(&self, stack_name: &str) -> Result<(), ProvisionError<E::Error>> {
        let deadline = Instant::now().checked_add(self.wait_timeout);
        loop {
            let Some(snapshot) = self
                .engine
                .describe(stack_name)
                .await
                .map_err(ProvisionError::Engine)?
            else {
                return Ok(());
            };

            match snapshot.status.phase() {
                StackPhase::Deleted => return Ok(()),
                StackPhase::Failed => return Err(stack_failed(stack_name, snapshot)),
                StackPhase::InProgress | StackPhase::Settled => {}
            }

            if is_past(deadline) {
                return Err(ProvisionError::Timeout {
                    stack_name: stack_name.to_owned(),
                    status: snapshot.status.to_string(),
                });
            }
            sleep(self.poll_interval).await;
        }
    }
}

/// Executes deployments against a stack engine.
#[derive(Debug)]
pub struct Provisioner<E, R> {
    lifecycle: StackLifecycle<E>,
    resolver: R,
    store: OutputsStore,
}

impl<E, R> Provisioner<E, R>
where
    E: StackEngine,
    R: ImageResolver,
{
    /// Creates a new provisioner.
    #[must_use]
    pub const fn new(engine: E, resolver: R, store: OutputsStore) -> Self {
        Self {
            lifecycle: StackLifecycle::new(engine),
            resolver,
            store,
        }
    }

    /// Overrides the stack polling interval.
    ///
    /// This is primarily used by tests to keep timeout scenarios fast.
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.lifecycle.poll_interval = interval;
        self
    }

    /// Overrides the stack wait timeout.
    ///
    /// This is primarily used by tests to keep timeout scenarios fast.
    #[must_use]
    pub const fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.lifecycle.wait_timeout = timeout;
        self
    }

    /// Resolves the image and synthesises the template without deploying.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Image`] when the image cannot be resolved.
    pub async fn synth(
        &self,
        request: &DeployRequest,
    ) -> Result<Template, ProvisionError<E::Error>> {
        synthesize_template(&self.resolver, &request.instance_type)
            .await
            .map_err(ProvisionError::Image)
    }

    /// Deploys the stack and returns the persisted facts.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError`] when image resolution, template rendering,
    /// an engine call, the stack itself, or persistence fails.
    pub async fn provision(
        &self,
        request: &DeployRequest,
    ) -> Result<OutputFacts, ProvisionError<E::Error>> {
        let template = self.synth(request).await?;
        let body = template.render().map_err(|err| ProvisionError::Render {
            message: err.to_string(),
        })?;

        let engine = &self.lifecycle.engine;
        let stack_name = request.stack_name.as_str();
        let existing = engine
            .describe(stack_name)
            .await
            .map_err(ProvisionError::Engine)?
            .filter(|snapshot| snapshot.status.phase() != StackPhase::Deleted);

        let settled = match existing {
            Some(snapshot) => {
                check_account(request, &snapshot)?;
                if snapshot.status.requires_teardown() {
                    return Err(ProvisionError::RequiresTeardown {
                        stack_name: stack_name.to_owned(),
                        status: snapshot.status.to_string(),
                    });
                }
                info!(stack = stack_name, "updating existing stack");
                match engine
                    .update(stack_name, &body)
                    .await
                    .map_err(ProvisionError::Engine)?
                {
                    UpdateOutcome::Started => {
                        self.lifecycle.wait_until_settled(stack_name).await?
                    }
                    UpdateOutcome::NoChanges => {
                        info!(stack = stack_name, "stack already up to date");
                        snapshot
                    }
                }
            }
            None => {
                info!(stack = stack_name, region = %request.region, "creating stack");
                let stack_id = engine
                    .create(stack_name, &body)
                    .await
                    .map_err(ProvisionError::Engine)?;
                debug!(stack_id = %stack_id, "stack creation accepted");
                self.lifecycle.wait_until_settled(stack_name).await?
            }
        };

        check_account(request, &settled)?;
        let facts = collect_outputs(stack_name, &settled)?;
        self.store
            .write(stack_name, &facts)
            .map_err(ProvisionError::Persist)?;
        info!(stack = stack_name, path = %self.store.path(), "outputs persisted");
        Ok(facts)
    }
}

/// Resolves the boot image and synthesises the template.
///
/// Needs no stack engine, so `synth` works without deployment credentials
/// when the image is given explicitly.
///
/// # Errors
///
/// Returns [`ImageLookupError`] when the image cannot be resolved.
pub async fn synthesize_template<R>(
    resolver: &R,
    instance_type: &str,
) -> Result<Template, ImageLookupError>
where
    R: ImageResolver,
{
    let image = resolver.resolve().await?;
    info!(image = %image, "resolved boot image");
    let stack = ProxyStack::declare(StackSettings {
        instance_type: instance_type.to_owned(),
        image,
    });
    Ok(stack.synthesize())
}

fn is_past(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|limit| Instant::now() >= limit)
}

fn stack_failed<E>(stack_name: &str, snapshot: StackSnapshot) -> ProvisionError<E>
where
    E: std::error::Error + 'static,
{
    ProvisionError::StackFailed {
        stack_name: stack_name.to_owned(),
        status: snapshot.status.to_string(),
        reason: snapshot
            .status_reason
            .unwrap_or_else(|| String::from("no reason reported")),
    }
}

fn check_account<E>(
    request: &DeployRequest,
    snapshot: &StackSnapshot,
) -> Result<(), ProvisionError<E>>
where
    E: std::error::Error + 'static,
{
    let (Some(expected), Some(actual)) = (request.account.as_deref(), snapshot.account_id()) else {
        return Ok(());
    };
    if expected == actual {
        return Ok(());
    }
    Err(ProvisionError::AccountMismatch {
        stack_name: request.stack_name.clone(),
        expected: expected.to_owned(),
        actual: actual.to_owned(),
    })
}

fn collect_outputs<E>(
    stack_name: &str,
    snapshot: &StackSnapshot,
) -> Result<OutputFacts, ProvisionError<E>>
where
    E: std::error::Error + 'static,
{
    let mut facts = OutputFacts::new();
    for key in REQUIRED_OUTPUTS {
        let value = snapshot
            .outputs
            .get(key)
            .ok_or_else(|| ProvisionError::MissingOutput {
                stack_name: stack_name.to_owned(),
                key,
            })?;
        facts.insert(key, value.clone());
    }
    Ok(facts)
}

#[cfg(test)]
mod tests;
