//! Declarative stack engine abstraction.
//!
//! The engine owns idempotency and rollback: callers submit a whole template
//! and observe the stack status until it settles.

mod cloudformation;

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;

pub use cloudformation::{CloudFormationEngine, CloudFormationError};

/// Future returned by engine operations.
pub type EngineFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Status string reported by the engine for a stack.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StackStatus(String);

/// Coarse classification of a [`StackStatus`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StackPhase {
    /// The engine is still applying changes.
    InProgress,
    /// The last change completed.
    Settled,
    /// The last change failed or was rolled back.
    Failed,
    /// The stack no longer exists.
    Deleted,
}

impl StackStatus {
    /// Wraps a raw status string.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Raw status string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Classifies the status.
    ///
    /// Rollback completions count as failures even though the engine treats
    /// them as stable, because the requested change did not apply.
    #[must_use]
    pub fn phase(&self) -> StackPhase {
        let status = self.0.as_str();
        if status == "DELETE_COMPLETE" {
            StackPhase::Deleted
        } else if status.ends_with("_IN_PROGRESS") {
            StackPhase::InProgress
        } else if status.ends_with("_FAILED") || status.ends_with("ROLLBACK_COMPLETE") {
            StackPhase::Failed
        } else if status.ends_with("_COMPLETE") {
            StackPhase::Settled
        } else {
            StackPhase::Failed
        }
    }

    /// Whether the stack can only be deleted, never updated.
    #[must_use]
    pub fn requires_teardown(&self) -> bool {
        matches!(self.0.as_str(), "ROLLBACK_COMPLETE" | "ROLLBACK_FAILED")
    }
}

impl fmt::Display for StackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StackStatus {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Point-in-time view of a stack.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StackSnapshot {
    /// Engine identifier of the stack.
    pub stack_id: String,
    /// Current status.
    pub status: StackStatus,
    /// Reason attached to the status, if any.
    pub status_reason: Option<String>,
    /// Outputs exported by the stack.
    pub outputs: BTreeMap<String, String>,
}

impl StackSnapshot {
    /// Account id embedded in the stack id, when it is an ARN.
    #[must_use]
    pub fn account_id(&self) -> Option<&str> {
        self.stack_id
            .strip_prefix("arn:")
            .and_then(|rest| rest.split(':').nth(3))
            .filter(|account| !account.is_empty())
    }
}

/// Result of submitting an update.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum UpdateOutcome {
    /// The engine accepted changes and is applying them.
    Started,
    /// The template matches the deployed stack.
    NoChanges,
}

/// Minimal interface implemented by stack engines.
pub trait StackEngine {
    /// Provider specific error type returned by the engine.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Describes the named stack, returning `None` when it does not exist.
    fn describe<'a>(
        &'a self,
        stack_name: &'a str,
    ) -> EngineFuture<'a, Option<StackSnapshot>, Self::Error>;

    /// Creates the stack from `template_body` and returns its id.
    fn create<'a>(
        &'a self,
        stack_name: &'a str,
        template_body: &'a str,
    ) -> EngineFuture<'a, String, Self::Error>;

    /// Submits `template_body` as the new desired state of the stack.
    fn update<'a>(
        &'a self,
        stack_name: &'a str,
        template_body: &'a str,
    ) -> EngineFuture<'a, UpdateOutcome, Self::Error>;

    /// Requests deletion of the stack and every resource it owns.
    fn delete<'a>(&'a self, stack_name: &'a str) -> EngineFuture<'a, (), Self::Error>;
}
