//! CloudFormation implementation of [`StackEngine`].

use std::collections::BTreeMap;

use aws_config::{BehaviorVersion, Region};
use aws_sdk_cloudformation::Client;
use aws_sdk_cloudformation::error::{DisplayErrorContext, ProvideErrorMetadata};
use aws_sdk_cloudformation::types::{Capability, OnFailure, Stack};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use super::{EngineFuture, StackEngine, StackSnapshot, StackStatus, UpdateOutcome};

const NO_UPDATES: &str = "No updates are to be performed";
const DOES_NOT_EXIST: &str = "does not exist";

/// Errors raised by the CloudFormation engine.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum CloudFormationError {
    /// Wrapper for API level failures.
    #[error("cloudformation {operation} failed: {message}")]
    Api {
        /// API operation that failed.
        operation: &'static str,
        /// Message returned by the SDK.
        message: String,
    },
    /// Raised when a response lacks a field the engine relies on.
    #[error("cloudformation {operation} response missing {field}")]
    MissingField {
        /// API operation whose response was incomplete.
        operation: &'static str,
        /// Missing field name.
        field: &'static str,
    },
}

/// Engine backed by the CloudFormation API in one region.
#[derive(Clone, Debug)]
pub struct CloudFormationEngine {
    client: Client,
}

impl CloudFormationEngine {
    /// Builds an engine for `region` using the default credential chain.
    pub async fn connect(region: &str) -> Self {
        let config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_owned()))
            .load()
            .await;
        Self {
            client: Client::new(&config),
        }
    }

    async fn describe_stack(
        &self,
        stack_name: &str,
    ) -> Result<Option<StackSnapshot>, CloudFormationError> {
        let response = self
            .client
            .describe_stacks()
            .stack_name(stack_name)
            .send()
            .await;

        let output = match response {
            Ok(output) => output,
            Err(err)
                if err
                    .as_service_error()
                    .and_then(|service| service.message())
                    .is_some_and(|message| message.contains(DOES_NOT_EXIST)) =>
            {
                return Ok(None);
            }
            Err(err) => return Err(api_error("DescribeStacks", &err)),
        };

        output.stacks().first().map(snapshot_from).transpose()
    }

    async fn create_stack(
        &self,
        stack_name: &str,
        template_body: &str,
    ) -> Result<String, CloudFormationError> {
        let token = Uuid::new_v4().to_string();
        debug!(stack = stack_name, token = %token, "creating stack");
        let output = self
            .client
            .create_stack()
            .stack_name(stack_name)
            .template_body(template_body)
            .capabilities(Capability::CapabilityIam)
            .on_failure(OnFailure::Rollback)
            .client_request_token(token)
            .send()
            .await
            .map_err(|err| api_error("CreateStack", &err))?;

        output
            .stack_id()
            .map(str::to_owned)
            .ok_or(CloudFormationError::MissingField {
                operation: "CreateStack",
                field: "StackId",
            })
    }

    async fn update_stack(
        &self,
        stack_name: &str,
        template_body: &str,
    ) -> Result<UpdateOutcome, CloudFormationError> {
        let token = Uuid::new_v4().to_string();
        debug!(stack = stack_name, token = %token, "updating stack");
        let response = self
            .client
            .update_stack()
            .stack_name(stack_name)
            .template_body(template_body)
            .capabilities(Capability::CapabilityIam)
            .client_request_token(token)
            .send()
            .await;

        match response {
            Ok(_) => Ok(UpdateOutcome::Started),
            Err(err)
                if err
                    .as_service_error()
                    .and_then(|service| service.message())
                    .is_some_and(|message| message.contains(NO_UPDATES)) =>
            {
                Ok(UpdateOutcome::NoChanges)
            }
            Err(err) => Err(api_error("UpdateStack", &err)),
        }
    }

    async fn delete_stack(&self, stack_name: &str) -> Result<(), CloudFormationError> {
        self.client
            .delete_stack()
            .stack_name(stack_name)
            .send()
            .await
            .map_err(|err| api_error("DeleteStack", &err))?;
        Ok(())
    }
}

impl StackEngine for CloudFormationEngine {
    type Error = CloudFormationError;

    fn describe<'a>(
        &'a self,
        stack_name: &'a str,
    ) -> EngineFuture<'a, Option<StackSnapshot>, Self::Error> {
        Box::pin(self.describe_stack(stack_name))
    }

    fn create<'a>(
        &'a self,
        stack_name: &'a str,
        template_body: &'a str,
    ) -> EngineFuture<'a, String, Self::Error> {
        Box::pin(self.create_stack(stack_name, template_body))
    }

    fn update<'a>(
        &'a self,
        stack_name: &'a str,
        template_body: &'a str,
    ) -> EngineFuture<'a, UpdateOutcome, Self::Error> {
        Box::pin(self.update_stack(stack_name, template_body))
    }

    fn delete<'a>(&'a self, stack_name: &'a str) -> EngineFuture<'a, (), Self::Error> {
        Box::pin(self.delete_stack(stack_name))
    }
}

fn snapshot_from(stack: &Stack) -> Result<StackSnapshot, CloudFormationError> {
    let stack_id = stack
        .stack_id()
        .ok_or(CloudFormationError::MissingField {
            operation: "DescribeStacks",
            field: "StackId",
        })?
        .to_owned();
    let status = stack
        .stack_status()
        .map(|status| StackStatus::new(status.as_str()))
        .ok_or(CloudFormationError::MissingField {
            operation: "DescribeStacks",
            field: "StackStatus",
        })?;
    let outputs: BTreeMap<String, String> = stack
        .outputs()
        .iter()
        .filter_map(|output| {
            Some((
                output.output_key()?.to_owned(),
                output.output_value()?.to_owned(),
            ))
        })
        .collect();

    Ok(StackSnapshot {
        stack_id,
        status,
        status_reason: stack.stack_status_reason().map(str::to_owned),
        outputs,
    })
}

fn api_error<E>(operation: &'static str, err: &E) -> CloudFormationError
where
    E: std::error::Error,
{
    CloudFormationError::Api {
        operation,
        message: DisplayErrorContext(err).to_string(),
    }
}
