//! Resource adapters for Amazon Web Services.
pub use aws_config::SdkConfig;
use aws_config::{retry::RetryConfig, BehaviorVersion, Region};

use crate::{
    config::ProviderConfig,
    tags::{self, Tags},
};

pub mod amp;
pub mod chimesdkmediapipelines;
pub mod codeconnections;
pub mod opensearchserverless;
pub mod resourceexplorer2;

/// Per-service AWS clients, built once from one `SdkConfig` and passed to
/// every adapter call.
#[derive(Clone, Debug)]
pub struct AwsClient {
    pub amp: aws_sdk_amp::Client,
    pub chime_media_pipelines: aws_sdk_chimesdkmediapipelines::Client,
    pub codeconnections: aws_sdk_codeconnections::Client,
    pub opensearch_serverless: aws_sdk_opensearchserverless::Client,
    pub resource_explorer: aws_sdk_resourceexplorer2::Client,
    /// Tags applied to every taggable resource.
    pub default_tags: Tags,
}

impl AwsClient {
    /// Loads the shared AWS configuration, applying the region, profile and
    /// retry overrides of `config`.
    pub async fn from_config(config: &ProviderConfig) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = &config.region {
            loader = loader.region(Region::new(region.clone()));
        }
        if let Some(profile) = &config.profile {
            loader = loader.profile_name(profile);
        }
        if let Some(max_attempts) = config.max_attempts {
            loader = loader.retry_config(RetryConfig::standard().with_max_attempts(max_attempts));
        }
        let sdk_config = loader.load().await;
        log::debug!(
            "loaded aws config for region {:?}",
            sdk_config.region().map(|r| r.as_ref())
        );
        Self::new(&sdk_config, config.default_tags.clone())
    }

    pub fn new(sdk_config: &SdkConfig, default_tags: Tags) -> Self {
        Self {
            amp: aws_sdk_amp::Client::new(sdk_config),
            chime_media_pipelines: aws_sdk_chimesdkmediapipelines::Client::new(sdk_config),
            codeconnections: aws_sdk_codeconnections::Client::new(sdk_config),
            opensearch_serverless: aws_sdk_opensearchserverless::Client::new(sdk_config),
            resource_explorer: aws_sdk_resourceexplorer2::Client::new(sdk_config),
            default_tags,
        }
    }

    /// The tags to send for a resource: its own tags over the default tags.
    pub fn tags_all(&self, tags: &Tags) -> Tags {
        tags::merge(&self.default_tags, tags)
    }
}

#[cfg(test)]
impl AwsClient {
    /// Clients with no credentials, for tests that swap in stubbed ones.
    pub(crate) fn offline() -> Self {
        let sdk_config = SdkConfig::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new("us-east-1"))
            .build();
        Self::new(&sdk_config, Tags::new())
    }
}
