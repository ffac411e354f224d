//! Systems Manager implementation of [`ManagementChannel`].

use aws_config::{BehaviorVersion, Region};
use aws_sdk_ssm::Client;
use aws_sdk_ssm::error::DisplayErrorContext;
use aws_sdk_ssm::operation::get_command_invocation::GetCommandInvocationError;
use thiserror::Error;

use super::{
    ChannelFuture, CommandId, CommandInvocation, InvocationStatus, ManagementChannel,
    RemoteCommand,
};

/// Document that runs its `commands` parameter through `/bin/sh`.
pub const SHELL_DOCUMENT: &str = "AWS-RunShellScript";

/// Errors raised by the Systems Manager channel.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum SsmChannelError {
    /// Wrapper for API level failures.
    #[error("ssm {operation} failed: {message}")]
    Api {
        /// API operation that failed.
        operation: &'static str,
        /// Message returned by the SDK.
        message: String,
    },
    /// Raised when a response lacks a field the channel relies on.
    #[error("ssm {operation} response missing {field}")]
    MissingField {
        /// API operation whose response was incomplete.
        operation: &'static str,
        /// Missing field name.
        field: &'static str,
    },
}

/// Channel backed by the Systems Manager API in one region.
#[derive(Clone, Debug)]
pub struct SsmChannel {
    client: Client,
}

impl SsmChannel {
    /// Builds a channel for `region` using the default credential chain.
    pub async fn connect(region: &str) -> Self {
        let config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_owned()))
            .load()
            .await;
        Self {
            client: Client::new(&config),
        }
    }

    async fn send(&self, command: &RemoteCommand) -> Result<CommandId, SsmChannelError> {
        let output = self
            .client
            .send_command()
            .instance_ids(command.target_instance_id.as_str())
            .document_name(SHELL_DOCUMENT)
            .parameters("commands", vec![command.shell_text.clone()])
            .send()
            .await
            .map_err(|err| api_error("SendCommand", &err))?;

        output
            .command()
            .and_then(|sent| sent.command_id())
            .map(CommandId::new)
            .ok_or(SsmChannelError::MissingField {
                operation: "SendCommand",
                field: "CommandId",
            })
    }

    async fn invocation(
        &self,
        command_id: &CommandId,
        instance_id: &str,
    ) -> Result<CommandInvocation, SsmChannelError> {
        let response = self
            .client
            .get_command_invocation()
            .command_id(command_id.as_str())
            .instance_id(instance_id)
            .send()
            .await;

        let output = match response {
            Ok(output) => output,
            // The invocation becomes visible shortly after dispatch.
            Err(err)
                if err
                    .as_service_error()
                    .is_some_and(GetCommandInvocationError::is_invocation_does_not_exist) =>
            {
                return Ok(CommandInvocation::with_status(InvocationStatus::Pending));
            }
            Err(err) => return Err(api_error("GetCommandInvocation", &err)),
        };

        let status = output
            .status()
            .map(|status| InvocationStatus::from_provider(status.as_str()))
            .ok_or(SsmChannelError::MissingField {
                operation: "GetCommandInvocation",
                field: "Status",
            })?;

        Ok(CommandInvocation {
            status,
            stdout: output
                .standard_output_content()
                .unwrap_or_default()
                .to_owned(),
            stderr: output
                .standard_error_content()
                .unwrap_or_default()
                .to_owned(),
        })
    }

    async fn cancel(
        &self,
        command_id: &CommandId,
        instance_id: &str,
    ) -> Result<(), SsmChannelError> {
        self.client
            .cancel_command()
            .command_id(command_id.as_str())
            .instance_ids(instance_id)
            .send()
            .await
            .map_err(|err| api_error("CancelCommand", &err))?;
        Ok(())
    }
}

impl ManagementChannel for SsmChannel {
    type Error = SsmChannelError;

    fn send_command<'a>(
        &'a self,
        command: &'a RemoteCommand,
    ) -> ChannelFuture<'a, CommandId, Self::Error> {
        Box::pin(self.send(command))
    }

    fn get_command_invocation<'a>(
        &'a self,
        command_id: &'a CommandId,
        instance_id: &'a str,
    ) -> ChannelFuture<'a, CommandInvocation, Self::Error> {
        Box::pin(self.invocation(command_id, instance_id))
    }

    fn cancel_command<'a>(
        &'a self,
        command_id: &'a CommandId,
        instance_id: &'a str,
    ) -> ChannelFuture<'a, (), Self::Error> {
        Box::pin(self.cancel(command_id, instance_id))
    }
}

fn api_error<E>(operation: &'static str, err: &E) -> SsmChannelError
where
    E: std::error::Error,
{
    SsmChannelError::Api {
        operation,
        message: DisplayErrorContext(err).to_string(),
    }
}
