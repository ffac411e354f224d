//! Configuration loading via `ortho-config`.
//!
//! Values merge defaults, `reality-proxy.toml`, and environment variables.
//! Command-line flags are applied on top by the binary.

use std::ffi::OsString;

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::outputs::DEFAULT_OUTPUTS_FILE;
use crate::provision::DeployRequest;
use crate::stack::{DEFAULT_INSTANCE_TYPE, DEFAULT_STACK_NAME};

const APP_NAME: &str = "reality-proxy";
const CONFIG_FILE: &str = "reality-proxy.toml";

/// Default destination of the fetched client configuration.
pub const DEFAULT_CONFIG_OUTPUT_FILE: &str = "reality-config.txt";

/// Settings for `deploy`, `synth`, and `destroy`.
///
/// The `CDK` prefix keeps the account and region variables compatible with
/// existing `CDK_DEPLOY_ACCOUNT` and `CDK_DEPLOY_REGION` exports.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "CDK",
    discovery(
        app_name = "reality-proxy",
        env_var = "REALITY_PROXY_CONFIG_PATH",
        config_file_name = "reality-proxy.toml",
        dotfile_name = ".reality-proxy.toml",
        project_file_name = "reality-proxy.toml"
    )
)]
pub struct DeployConfig {
    /// Account the stack must belong to.
    pub deploy_account: Option<String>,
    /// Region to deploy into. This value is required.
    pub deploy_region: Option<String>,
    /// Stack name, also the key in the outputs file.
    #[ortho_config(default = DEFAULT_STACK_NAME.to_owned())]
    pub stack_name: String,
    /// Instance size. Defaults to `t2.micro`.
    #[ortho_config(default = DEFAULT_INSTANCE_TYPE.to_owned())]
    pub instance_type: String,
    /// Explicit boot image, skipping the public parameter lookup.
    pub image_id: Option<String>,
    /// Where deployment facts are persisted.
    #[ortho_config(default = DEFAULT_OUTPUTS_FILE.to_owned())]
    pub outputs_file: String,
}

/// Settings for `fetch-config`.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "REALITY",
    discovery(
        app_name = "reality-proxy",
        env_var = "REALITY_PROXY_CONFIG_PATH",
        config_file_name = "reality-proxy.toml",
        dotfile_name = ".reality-proxy.toml",
        project_file_name = "reality-proxy.toml"
    )
)]
pub struct FetchConfig {
    /// Stack whose facts are read.
    #[ortho_config(default = DEFAULT_STACK_NAME.to_owned())]
    pub stack_name: String,
    /// Where deployment facts were persisted.
    #[ortho_config(default = DEFAULT_OUTPUTS_FILE.to_owned())]
    pub outputs_file: String,
    /// Destination of the client configuration.
    #[ortho_config(default = DEFAULT_CONFIG_OUTPUT_FILE.to_owned())]
    pub output_file: String,
    /// Wait for the boot installer to finish before fetching.
    #[ortho_config(default = false)]
    pub wait_for_setup: bool,
    /// Deadline in seconds for each remote command.
    #[ortho_config(default = 600)]
    pub timeout_secs: u64,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(
        description: &'static str,
        env_var: &'static str,
        toml_key: &'static str,
    ) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }

    fn missing(&self) -> ConfigError {
        ConfigError::MissingField(format!(
            "missing {}: set {} or add {} to {CONFIG_FILE}",
            self.description, self.env_var, self.toml_key
        ))
    }
}

fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(metadata.missing());
    }
    Ok(())
}

const STACK_NAME: FieldMetadata = FieldMetadata::new("stack name", "CDK_STACK_NAME", "stack_name");
const INSTANCE_TYPE: FieldMetadata =
    FieldMetadata::new("instance type", "CDK_INSTANCE_TYPE", "instance_type");
const OUTPUTS_FILE: FieldMetadata =
    FieldMetadata::new("outputs file", "CDK_OUTPUTS_FILE", "outputs_file");
const REGION: FieldMetadata =
    FieldMetadata::new("deployment region", "CDK_DEPLOY_REGION", "deploy_region");

impl DeployConfig {
    /// Loads configuration without attempting to parse CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from(APP_NAME)])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation on fields every command needs.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_field(&self.stack_name, &STACK_NAME)?;
        require_field(&self.instance_type, &INSTANCE_TYPE)?;
        require_field(&self.outputs_file, &OUTPUTS_FILE)?;
        Ok(())
    }

    /// Returns the trimmed region.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when no region is configured.
    pub fn region(&self) -> Result<String, ConfigError> {
        self.deploy_region
            .as_deref()
            .map(str::trim)
            .filter(|region| !region.is_empty())
            .map(str::to_owned)
            .ok_or_else(|| REGION.missing())
    }

    /// Builds a [`DeployRequest`] from the merged configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when validation fails or no
    /// region is configured.
    pub fn as_request(&self) -> Result<DeployRequest, ConfigError> {
        self.validate()?;
        Ok(DeployRequest {
            stack_name: self.stack_name.trim().to_owned(),
            account: self
                .deploy_account
                .as_deref()
                .map(str::trim)
                .filter(|account| !account.is_empty())
                .map(str::to_owned),
            region: self.region()?,
            instance_type: self.instance_type.trim().to_owned(),
        })
    }

    /// Location of the outputs file.
    #[must_use]
    pub fn outputs_path(&self) -> Utf8PathBuf {
        Utf8PathBuf::from(self.outputs_file.trim())
    }
}

impl FetchConfig {
    /// Loads configuration without attempting to parse CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from(APP_NAME)])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation on required fields.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty
    /// and [`ConfigError::InvalidTimeout`] when the timeout is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_field(
            &self.stack_name,
            &FieldMetadata::new("stack name", "REALITY_STACK_NAME", "stack_name"),
        )?;
        require_field(
            &self.outputs_file,
            &FieldMetadata::new("outputs file", "REALITY_OUTPUTS_FILE", "outputs_file"),
        )?;
        require_field(
            &self.output_file,
            &FieldMetadata::new("output file", "REALITY_OUTPUT_FILE", "output_file"),
        )?;
        if self.timeout_secs == 0 {
            return Err(ConfigError::InvalidTimeout);
        }
        Ok(())
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Raised when the command timeout is zero.
    #[error("timeout_secs must be greater than zero")]
    InvalidTimeout,
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
