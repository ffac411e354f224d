//! Core library for the `reality-proxy` deployment tool.
//!
//! The crate declares the network, identity, and compute resources of a
//! VLESS/REALITY proxy as typed values, synthesises them into a
//! CloudFormation template, and drives the stack to a settled state. Once
//! deployed, the proxy's client configuration is retrieved over the AWS
//! Systems Manager command channel without opening an inbound shell port.

pub mod config;
pub mod engine;
pub mod fetch;
pub mod image;
pub mod logging;
pub mod outputs;
pub mod provision;
pub mod remote;
pub mod stack;
pub mod test_support;

pub use config::{ConfigError, DeployConfig, FetchConfig};
pub use engine::{
    CloudFormationEngine, CloudFormationError, StackEngine, StackPhase, StackSnapshot,
    StackStatus, UpdateOutcome,
};
pub use fetch::{ChannelConnector, ConfigFetcher, FetchError, FetchRequest, SsmConnector};
pub use image::{FixedImage, ImageLookupError, ImageResolver, ImageSource, SsmParameterResolver};
pub use outputs::{OutputFacts, OutputsError, OutputsStore, ProxyTarget};
pub use provision::{
    DeployRequest, DestroyOutcome, ProvisionError, Provisioner, StackLifecycle,
    synthesize_template,
};
pub use remote::{
    CommandId, CommandInvocation, InvocationStatus, ManagementChannel, PollPolicy,
    RemoteCommand, RemoteExecutionError, RemoteExecutor, SsmChannel, SsmChannelError,
};
pub use stack::{ProxyStack, StackSettings, Template};
