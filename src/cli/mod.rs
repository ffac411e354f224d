//! Command-line interface definitions for the `reality-proxy` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Top-level CLI for the `reality-proxy` binary.
#[derive(Debug, Parser)]
#[command(
    name = "reality-proxy",
    about = "Deploy a VLESS/REALITY proxy on AWS and fetch its client configuration",
    version,
    arg_required_else_help = true
)]
pub(crate) struct Cli {
    /// Diagnostic log level written to stderr. Overrides `REALITY_PROXY_LOG`.
    #[arg(long, global = true, value_enum, value_name = "LEVEL")]
    pub(crate) log_level: Option<LogLevel>,
    /// Subcommand to run.
    #[command(subcommand)]
    pub(crate) command: Command,
}

/// Subcommands of the `reality-proxy` binary.
#[derive(Debug, Subcommand)]
pub(crate) enum Command {
    /// Create or update the proxy stack and record its outputs.
    #[command(name = "deploy")]
    Deploy(DeployArgs),
    /// Print the stack template without deploying it.
    #[command(name = "synth")]
    Synth(DeployArgs),
    /// Delete the proxy stack and every resource it owns.
    #[command(name = "destroy")]
    Destroy(StackArgs),
    /// Retrieve the client configuration from the deployed proxy.
    #[command(name = "fetch-config")]
    FetchConfig(FetchArgs),
}

/// Levels accepted by `--log-level`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub(crate) enum LogLevel {
    /// Failures only.
    Error,
    /// Failures and warnings.
    Warn,
    /// Progress of each step.
    Info,
    /// Polling detail.
    Debug,
    /// Everything.
    Trace,
}

/// Stack identity shared by every deployment subcommand.
#[derive(Clone, Debug, Default, Args)]
pub(crate) struct StackArgs {
    /// Override the stack name (default `VlessProxyStack`).
    #[arg(long, value_name = "NAME")]
    pub(crate) stack_name: Option<String>,
    /// Override `CDK_DEPLOY_ACCOUNT`.
    #[arg(long, value_name = "ACCOUNT")]
    pub(crate) account: Option<String>,
    /// Override `CDK_DEPLOY_REGION`.
    #[arg(long, value_name = "REGION")]
    pub(crate) region: Option<String>,
}

/// Arguments for `deploy` and `synth`.
#[derive(Clone, Debug, Default, Args)]
pub(crate) struct DeployArgs {
    /// Stack identity overrides.
    #[command(flatten)]
    pub(crate) stack: StackArgs,
    /// Override the instance type (default `t2.micro`).
    #[arg(long, value_name = "TYPE")]
    pub(crate) instance_type: Option<String>,
    /// Boot this image instead of the current Ubuntu 22.04 image.
    ///
    /// Skips the public parameter lookup, so `synth` needs no credentials.
    #[arg(long, value_name = "AMI")]
    pub(crate) image_id: Option<String>,
    /// Override where deployment outputs are recorded.
    #[arg(long, value_name = "PATH")]
    pub(crate) outputs_file: Option<String>,
}

/// Arguments for `fetch-config`.
#[derive(Clone, Debug, Default, Args)]
pub(crate) struct FetchArgs {
    /// Override the stack whose outputs are read.
    #[arg(long, value_name = "NAME")]
    pub(crate) stack_name: Option<String>,
    /// Override where deployment outputs were recorded.
    #[arg(long, value_name = "PATH")]
    pub(crate) outputs_file: Option<String>,
    /// Override the destination of the client configuration.
    #[arg(long, value_name = "PATH")]
    pub(crate) output_file: Option<String>,
    /// Wait for the boot installer to finish before fetching.
    #[arg(long)]
    pub(crate) wait_for_setup: bool,
    /// Override the deadline in seconds for each remote command.
    #[arg(long, value_name = "SECONDS")]
    pub(crate) timeout_secs: Option<u64>,
}
