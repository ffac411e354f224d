//! Binary entry point for the `reality-proxy` CLI.

mod cli;

use std::io::{self, Write};
use std::process;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use clap::Parser;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{Level, warn};

use cli::{Cli, Command, DeployArgs, FetchArgs, LogLevel, StackArgs};
use reality_proxy::logging::{self, LoggingError};
use reality_proxy::{
    CloudFormationEngine, CloudFormationError, ConfigError, ConfigFetcher, DeployConfig,
    DestroyOutcome, FetchConfig, FetchError, FetchRequest, FixedImage, ImageLookupError,
    ImageSource, OutputFacts, OutputsStore, PollPolicy, ProvisionError, Provisioner,
    SsmChannelError, SsmConnector, SsmParameterResolver, StackLifecycle, synthesize_template,
};

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Logging(#[from] LoggingError),
    #[error("failed to resolve boot image: {0}")]
    Image(#[from] ImageLookupError),
    #[error(transparent)]
    Provision(#[from] ProvisionError<CloudFormationError>),
    #[error(transparent)]
    Fetch(#[from] FetchError<SsmChannelError>),
    #[error("failed to render template: {0}")]
    Render(#[from] serde_json::Error),
    #[error("failed to write to stdout: {0}")]
    Output(#[from] io::Error),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

async fn dispatch(cli: Cli) -> Result<(), CliError> {
    logging::init(cli.log_level.map(tracing_level))?;
    match cli.command {
        Command::Deploy(args) => deploy(&args).await,
        Command::Synth(args) => synth(&args).await,
        Command::Destroy(args) => destroy(&args).await,
        Command::FetchConfig(args) => fetch_config(&args).await,
    }
}

const fn tracing_level(level: LogLevel) -> Level {
    match level {
        LogLevel::Error => Level::ERROR,
        LogLevel::Warn => Level::WARN,
        LogLevel::Info => Level::INFO,
        LogLevel::Debug => Level::DEBUG,
        LogLevel::Trace => Level::TRACE,
    }
}

async fn deploy(args: &DeployArgs) -> Result<(), CliError> {
    let config = apply_deploy_overrides(DeployConfig::load_without_cli_args()?, args);
    let request = config.as_request()?;
    let provisioner = Provisioner::new(
        CloudFormationEngine::connect(&request.region).await,
        image_source(&config).await?,
        OutputsStore::new(config.outputs_path()),
    );

    let facts = provisioner.provision(&request).await?;
    write_facts(io::stdout(), &request.stack_name, &facts)?;
    Ok(())
}

async fn synth(args: &DeployArgs) -> Result<(), CliError> {
    let config = apply_deploy_overrides(DeployConfig::load_without_cli_args()?, args);
    config.validate()?;
    let template = synthesize_template(&image_source(&config).await?, &config.instance_type)
        .await?;
    let body = template.render()?;
    writeln!(io::stdout(), "{body}")?;
    Ok(())
}

async fn destroy(args: &StackArgs) -> Result<(), CliError> {
    let mut config = DeployConfig::load_without_cli_args()?;
    apply_stack_overrides(&mut config, args);
    let request = config.as_request()?;
    let lifecycle = StackLifecycle::new(CloudFormationEngine::connect(&request.region).await);

    let message = match lifecycle.destroy(&request.stack_name).await? {
        DestroyOutcome::Deleted => format!("Stack {} deleted", request.stack_name),
        DestroyOutcome::Absent => format!("Stack {} does not exist", request.stack_name),
    };
    writeln!(io::stdout(), "{message}")?;
    Ok(())
}

async fn fetch_config(args: &FetchArgs) -> Result<(), CliError> {
    let config = apply_fetch_overrides(FetchConfig::load_without_cli_args()?, args);
    config.validate()?;

    let fetcher = ConfigFetcher::new(OutputsStore::new(config.outputs_file.trim()))
        .with_policy(PollPolicy::default().with_timeout(Duration::from_secs(config.timeout_secs)))
        .with_cancellation(cancel_on_interrupt());
    let request = FetchRequest {
        stack_name: config.stack_name.trim().to_owned(),
        output_path: Utf8PathBuf::from(config.output_file.trim()),
        wait_for_setup: config.wait_for_setup,
    };

    let path = fetcher.fetch(&SsmConnector, &request).await?;
    write_saved(io::stdout(), &path)?;
    Ok(())
}

async fn image_source(config: &DeployConfig) -> Result<ImageSource, CliError> {
    match config.image_id.as_deref() {
        Some(value) => Ok(ImageSource::Fixed(FixedImage::parse(value)?)),
        None => {
            let region = config.region()?;
            Ok(ImageSource::Parameter(
                SsmParameterResolver::connect(&region).await,
            ))
        }
    }
}

fn cancel_on_interrupt() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; cancelling remote command");
            trigger.cancel();
        }
    });
    token
}

fn apply_stack_overrides(config: &mut DeployConfig, args: &StackArgs) {
    if let Some(stack_name) = &args.stack_name {
        config.stack_name.clone_from(stack_name);
    }
    if let Some(account) = &args.account {
        config.deploy_account = Some(account.clone());
    }
    if let Some(region) = &args.region {
        config.deploy_region = Some(region.clone());
    }
}

fn apply_deploy_overrides(mut config: DeployConfig, args: &DeployArgs) -> DeployConfig {
    apply_stack_overrides(&mut config, &args.stack);
    if let Some(instance_type) = &args.instance_type {
        config.instance_type.clone_from(instance_type);
    }
    if let Some(image_id) = &args.image_id {
        config.image_id = Some(image_id.clone());
    }
    if let Some(outputs_file) = &args.outputs_file {
        config.outputs_file.clone_from(outputs_file);
    }
    config
}

fn apply_fetch_overrides(mut config: FetchConfig, args: &FetchArgs) -> FetchConfig {
    if let Some(stack_name) = &args.stack_name {
        config.stack_name.clone_from(stack_name);
    }
    if let Some(outputs_file) = &args.outputs_file {
        config.outputs_file.clone_from(outputs_file);
    }
    if let Some(output_file) = &args.output_file {
        config.output_file.clone_from(output_file);
    }
    if args.wait_for_setup {
        config.wait_for_setup = true;
    }
    if let Some(timeout_secs) = args.timeout_secs {
        config.timeout_secs = timeout_secs;
    }
    config
}

fn write_facts(mut target: impl Write, stack_name: &str, facts: &OutputFacts) -> io::Result<()> {
    writeln!(target, "Outputs:")?;
    for (key, value) in facts.iter() {
        writeln!(target, "{stack_name}.{key} = {value}")?;
    }
    Ok(())
}

fn write_saved(mut target: impl Write, path: &Utf8Path) -> io::Result<()> {
    writeln!(target, "Configuration saved to {path}")
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "Error: {err}").ok();
}

#[cfg(test)]
#[path = "main_tests.rs"]
mod tests;
