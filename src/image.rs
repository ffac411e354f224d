//! Boot image resolution.

use aws_config::{BehaviorVersion, Region};
use aws_sdk_ssm::Client;
use aws_sdk_ssm::error::DisplayErrorContext;
use thiserror::Error;
use tracing::debug;

use crate::engine::EngineFuture;
use crate::stack::ImageId;

/// Public parameter tracking the current Ubuntu 22.04 amd64 image.
pub const UBUNTU_IMAGE_PARAMETER: &str =
    "/aws/service/canonical/ubuntu/server/22.04/stable/current/amd64/hvm/ebs-gp2/ami-id";

const IMAGE_PREFIX: &str = "ami-";

/// Errors raised while resolving the boot image.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ImageLookupError {
    /// Wrapper for API level failures.
    #[error("failed to read image parameter {parameter}: {message}")]
    Api {
        /// Parameter name.
        parameter: String,
        /// Message returned by the SDK.
        message: String,
    },
    /// The parameter exists but carries no value.
    #[error("image parameter {parameter} has no value")]
    Missing {
        /// Parameter name.
        parameter: String,
    },
    /// The value is not an image id.
    #[error("'{value}' is not an image id")]
    Invalid {
        /// Rejected value.
        value: String,
    },
}

/// Resolves the boot image for the proxy instance.
pub trait ImageResolver {
    /// Returns the image id to boot.
    fn resolve(&self) -> EngineFuture<'_, ImageId, ImageLookupError>;
}

/// Validates a candidate image id.
///
/// # Errors
///
/// Returns [`ImageLookupError::Invalid`] unless the trimmed value starts with
/// `ami-` and has a non-empty suffix.
pub fn parse_image_id(value: &str) -> Result<ImageId, ImageLookupError> {
    let trimmed = value.trim();
    match trimmed.strip_prefix(IMAGE_PREFIX) {
        Some(suffix) if !suffix.is_empty() => Ok(ImageId::from(trimmed)),
        _ => Err(ImageLookupError::Invalid {
            value: trimmed.to_owned(),
        }),
    }
}

/// Resolver that reads a public SSM parameter.
#[derive(Clone, Debug)]
pub struct SsmParameterResolver {
    client: Client,
    parameter: String,
}

impl SsmParameterResolver {
    /// Builds a resolver for [`UBUNTU_IMAGE_PARAMETER`] in `region`.
    pub async fn connect(region: &str) -> Self {
        let config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_owned()))
            .load()
            .await;
        Self {
            client: Client::new(&config),
            parameter: UBUNTU_IMAGE_PARAMETER.to_owned(),
        }
    }

    async fn lookup(&self) -> Result<ImageId, ImageLookupError> {
        debug!(parameter = %self.parameter, "resolving boot image");
        let output = self
            .client
            .get_parameter()
            .name(&self.parameter)
            .send()
            .await
            .map_err(|err| ImageLookupError::Api {
                parameter: self.parameter.clone(),
                message: DisplayErrorContext(&err).to_string(),
            })?;

        let value = output
            .parameter()
            .and_then(|parameter| parameter.value())
            .ok_or_else(|| ImageLookupError::Missing {
                parameter: self.parameter.clone(),
            })?;
        parse_image_id(value)
    }
}

impl ImageResolver for SsmParameterResolver {
    fn resolve(&self) -> EngineFuture<'_, ImageId, ImageLookupError> {
        Box::pin(self.lookup())
    }
}

/// Resolver that always returns a configured image.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FixedImage(ImageId);

impl FixedImage {
    /// Wraps an explicit image id.
    ///
    /// # Errors
    ///
    /// Returns [`ImageLookupError::Invalid`] when `value` is not an image id.
    pub fn parse(value: &str) -> Result<Self, ImageLookupError> {
        parse_image_id(value).map(Self)
    }
}

impl ImageResolver for FixedImage {
    fn resolve(&self) -> EngineFuture<'_, ImageId, ImageLookupError> {
        let image = self.0.clone();
        Box::pin(async move { Ok(image) })
    }
}

/// Image resolver chosen at runtime.
#[derive(Clone, Debug)]
pub enum ImageSource {
    /// An explicitly configured image.
    Fixed(FixedImage),
    /// The public Ubuntu parameter.
    Parameter(SsmParameterResolver),
}

impl ImageResolver for ImageSource {
    fn resolve(&self) -> EngineFuture<'_, ImageId, ImageLookupError> {
        match self {
            Self::Fixed(image) => image.resolve(),
            Self::Parameter(resolver) => resolver.resolve(),
        }
    }
}
