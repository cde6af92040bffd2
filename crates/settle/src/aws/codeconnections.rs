//! AWS CodeConnections connections and hosts.
use std::time::Duration;

use aws_sdk_codeconnections::{operation::get_host::GetHostOutput, types as aws};

use crate::{
    aws::AwsClient,
    finder,
    tags::{Tags, TagsDiff},
    waiter::Waiter,
    HasChanges, Resource, Result, Timeouts,
};

const HOST_TIMEOUT: Duration = Duration::from_secs(30 * 60);

const HOST_VPC_CONFIG_INITIALIZING: &str = "VPC_CONFIG_INITIALIZING";
const HOST_VPC_CONFIG_DELETING: &str = "VPC_CONFIG_DELETING";
const HOST_AVAILABLE: &str = "AVAILABLE";
const HOST_PENDING: &str = "PENDING";

fn expand_tags(tags: &Tags) -> Result<Option<Vec<aws::Tag>>> {
    if tags.is_empty() {
        return Ok(None);
    }
    let tags = tags
        .iter()
        .map(|(key, value)| aws::Tag::builder().key(key).value(value).build())
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Some(tags))
}

async fn find_tags(client: &aws_sdk_codeconnections::Client, arn: &str) -> Result<Tags> {
    let out = client.list_tags_for_resource().resource_arn(arn).send().await?;
    Ok(out
        .tags
        .unwrap_or_default()
        .into_iter()
        .map(|tag| (tag.key, tag.value))
        .collect())
}

async fn update_tags(
    client: &aws_sdk_codeconnections::Client,
    arn: &str,
    diff: &TagsDiff,
) -> Result<()> {
    if !diff.remove.is_empty() {
        client
            .untag_resource()
            .resource_arn(arn)
            .set_tag_keys(Some(diff.remove.clone()))
            .send()
            .await?;
    }
    if let Some(tags) = expand_tags(&diff.upsert)? {
        client
            .tag_resource()
            .resource_arn(arn)
            .set_tags(Some(tags))
            .send()
            .await?;
    }
    Ok(())
}

/// A connection to a third-party source provider, eg GitHub.
///
/// Created in the `PENDING` status, a connection has to be completed in the
/// console before it can be used.
#[derive(HasChanges, Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Connection {
    #[settle(force_new)]
    pub name: String,
    /// Provider of a cloud hosted repository, eg `GitHub` or `Bitbucket`.
    /// Exactly one of this and `host_arn` must be set.
    #[serde(default)]
    #[settle(force_new)]
    pub provider_type: Option<String>,
    /// Host of a self-managed provider.
    #[serde(default)]
    #[settle(force_new)]
    pub host_arn: Option<String>,
    #[serde(default)]
    pub tags: Tags,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ConnectionOutput {
    pub arn: String,
    pub name: String,
    pub provider_type: Option<String>,
    pub host_arn: Option<String>,
    pub owner_account_id: Option<String>,
    pub connection_status: String,
    pub tags_all: Tags,
}

pub async fn find_connection_by_arn(
    client: &aws_sdk_codeconnections::Client,
    arn: &str,
) -> Result<aws::Connection> {
    let out = client.get_connection().connection_arn(arn).send().await?;
    finder::required(out.connection, format!("get connection {arn}"))
}

impl Connection {
    fn validate(&self) -> Result<()> {
        if self.provider_type.is_some() == self.host_arn.is_some() {
            return Err(anyhow::anyhow!(
                "exactly one of provider_type and host_arn must be set on connection '{}'",
                self.name
            )
            .into());
        }
        Ok(())
    }
}

impl Resource for Connection {
    type Provider = AwsClient;
    type Output = ConnectionOutput;

    const NAME: &'static str = "CodeConnections Connection";

    fn id(remote: &ConnectionOutput) -> String {
        remote.arn.clone()
    }

    async fn create(&self, client: &AwsClient) -> Result<String> {
        self.validate()?;
        let out = client
            .codeconnections
            .create_connection()
            .connection_name(&self.name)
            .set_provider_type(self.provider_type.as_deref().map(aws::ProviderType::from))
            .set_host_arn(self.host_arn.clone())
            .set_tags(expand_tags(&client.tags_all(&self.tags))?)
            .send()
            .await?;
        log::info!(
            "  connection {} is pending, complete the handshake in the console",
            out.connection_arn
        );
        Ok(out.connection_arn)
    }

    async fn read(&self, client: &AwsClient, id: &str) -> Result<ConnectionOutput> {
        let connection = find_connection_by_arn(&client.codeconnections, id).await?;
        let tags_all = find_tags(&client.codeconnections, id).await?;
        Ok(ConnectionOutput {
            arn: connection
                .connection_arn
                .unwrap_or_else(|| id.to_owned()),
            name: connection.connection_name.unwrap_or_default(),
            provider_type: connection.provider_type.map(|p| p.as_str().to_owned()),
            host_arn: connection.host_arn,
            owner_account_id: connection.owner_account_id,
            connection_status: connection
                .connection_status
                .map(|s| s.as_str().to_owned())
                .unwrap_or_default(),
            tags_all,
        })
    }

    async fn update(
        &self,
        client: &AwsClient,
        _previous_local: &Self,
        previous_remote: &ConnectionOutput,
    ) -> Result<ConnectionOutput> {
        let diff = TagsDiff::new(&previous_remote.tags_all, &client.tags_all(&self.tags));
        update_tags(&client.codeconnections, &previous_remote.arn, &diff).await?;
        self.read(client, &previous_remote.arn).await
    }

    async fn delete(&self, client: &AwsClient, remote: &ConnectionOutput) -> Result<()> {
        let deleted = client
            .codeconnections
            .delete_connection()
            .connection_arn(&remote.arn)
            .send()
            .await;
        finder::ignore_not_found(deleted.map(|_| ()).map_err(Into::into))
    }
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct VpcConfiguration {
    pub vpc_id: String,
    pub subnet_ids: Vec<String>,
    pub security_group_ids: Vec<String>,
    #[serde(default)]
    pub tls_certificate: Option<String>,
}

impl VpcConfiguration {
    fn expand(&self) -> Result<aws::VpcConfiguration> {
        Ok(aws::VpcConfiguration::builder()
            .vpc_id(&self.vpc_id)
            .set_subnet_ids(Some(self.subnet_ids.clone()))
            .set_security_group_ids(Some(self.security_group_ids.clone()))
            .set_tls_certificate(self.tls_certificate.clone())
            .build()?)
    }

    fn flatten(config: aws::VpcConfiguration) -> Self {
        VpcConfiguration {
            vpc_id: config.vpc_id,
            subnet_ids: config.subnet_ids,
            security_group_ids: config.security_group_ids,
            tls_certificate: config.tls_certificate,
        }
    }
}

/// The infrastructure of a self-managed provider, eg GitHub Enterprise
/// Server, optionally reached through a VPC.
#[derive(HasChanges, Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Host {
    #[settle(force_new)]
    pub name: String,
    #[settle(force_new)]
    pub provider_type: String,
    pub provider_endpoint: String,
    #[serde(default)]
    pub vpc_configuration: Option<VpcConfiguration>,
    #[serde(default)]
    pub tags: Tags,
    #[serde(default)]
    #[settle(ignore)]
    pub timeouts: Timeouts,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct HostOutput {
    pub arn: String,
    pub name: String,
    pub provider_type: String,
    pub provider_endpoint: String,
    pub vpc_configuration: Option<VpcConfiguration>,
    pub status: String,
    pub tags_all: Tags,
}

pub async fn find_host_by_arn(
    client: &aws_sdk_codeconnections::Client,
    arn: &str,
) -> Result<GetHostOutput> {
    Ok(client.get_host().host_arn(arn).send().await?)
}

pub async fn status_host(
    client: &aws_sdk_codeconnections::Client,
    arn: &str,
) -> Result<Option<(GetHostOutput, String)>> {
    finder::status(find_host_by_arn(client, arn).await, |host| {
        host.status.clone().unwrap_or_default()
    })
}

/// Waits for the VPC configuration of a host to be set up. A host without
/// one goes straight to `PENDING`.
pub async fn wait_host_available(
    client: &aws_sdk_codeconnections::Client,
    arn: &str,
    timeout: Duration,
) -> Result<GetHostOutput> {
    Ok(Waiter::new(timeout)
        .pending([HOST_VPC_CONFIG_INITIALIZING])
        .target([HOST_AVAILABLE, HOST_PENDING])
        .wait(|| status_host(client, arn))
        .await?)
}

pub async fn wait_host_deleted(
    client: &aws_sdk_codeconnections::Client,
    arn: &str,
    timeout: Duration,
) -> Result<()> {
    Ok(Waiter::<GetHostOutput>::new(timeout)
        .pending([HOST_VPC_CONFIG_DELETING, HOST_AVAILABLE, HOST_PENDING])
        .wait_gone(|| status_host(client, arn))
        .await?)
}

impl Resource for Host {
    type Provider = AwsClient;
    type Output = HostOutput;

    const NAME: &'static str = "CodeConnections Host";

    fn id(remote: &HostOutput) -> String {
        remote.arn.clone()
    }

    async fn create(&self, client: &AwsClient) -> Result<String> {
        let out = client
            .codeconnections
            .create_host()
            .name(&self.name)
            .provider_type(aws::ProviderType::from(self.provider_type.as_str()))
            .provider_endpoint(&self.provider_endpoint)
            .set_vpc_configuration(
                self.vpc_configuration
                    .as_ref()
                    .map(VpcConfiguration::expand)
                    .transpose()?,
            )
            .set_tags(expand_tags(&client.tags_all(&self.tags))?)
            .send()
            .await?;
        finder::required(out.host_arn, "create host arn")
    }

    async fn wait_created(&self, client: &AwsClient, id: &str) -> Result<()> {
        wait_host_available(
            &client.codeconnections,
            id,
            self.timeouts.create_or(HOST_TIMEOUT),
        )
        .await?;
        Ok(())
    }

    async fn read(&self, client: &AwsClient, id: &str) -> Result<HostOutput> {
        let host = find_host_by_arn(&client.codeconnections, id).await?;
        let tags_all = find_tags(&client.codeconnections, id).await?;
        Ok(HostOutput {
            arn: id.to_owned(),
            name: host.name.unwrap_or_default(),
            provider_type: host
                .provider_type
                .map(|p| p.as_str().to_owned())
                .unwrap_or_default(),
            provider_endpoint: host.provider_endpoint.unwrap_or_default(),
            vpc_configuration: host.vpc_configuration.map(VpcConfiguration::flatten),
            status: host.status.unwrap_or_default(),
            tags_all,
        })
    }

    async fn update(
        &self,
        client: &AwsClient,
        previous_local: &Self,
        previous_remote: &HostOutput,
    ) -> Result<HostOutput> {
        let arn = previous_remote.arn.as_str();
        if self.provider_endpoint != previous_local.provider_endpoint
            || self.vpc_configuration != previous_local.vpc_configuration
        {
            client
                .codeconnections
                .update_host()
                .host_arn(arn)
                .provider_endpoint(&self.provider_endpoint)
                .set_vpc_configuration(
                    self.vpc_configuration
                        .as_ref()
                        .map(VpcConfiguration::expand)
                        .transpose()?,
                )
                .send()
                .await?;
            wait_host_available(
                &client.codeconnections,
                arn,
                self.timeouts.update_or(HOST_TIMEOUT),
            )
            .await?;
        }

        let diff = TagsDiff::new(&previous_remote.tags_all, &client.tags_all(&self.tags));
        update_tags(&client.codeconnections, arn, &diff).await?;

        self.read(client, arn).await
    }

    async fn delete(&self, client: &AwsClient, remote: &HostOutput) -> Result<()> {
        let deleted = client
            .codeconnections
            .delete_host()
            .host_arn(&remote.arn)
            .send()
            .await;
        finder::ignore_not_found(deleted.map(|_| ()).map_err(Into::into))?;
        wait_host_deleted(
            &client.codeconnections,
            &remote.arn,
            self.timeouts.delete_or(HOST_TIMEOUT),
        )
        .await
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn connection_needs_exactly_one_provider() {
        let github = Connection {
            name: "github".into(),
            provider_type: Some("GitHub".into()),
            ..Default::default()
        };
        github.validate().unwrap();

        let both = Connection {
            host_arn: Some("arn:aws:codeconnections:us-east-1:123456789012:host/ghe-1".into()),
            ..github.clone()
        };
        assert!(both.validate().is_err());

        let neither = Connection {
            provider_type: None,
            ..github
        };
        assert!(neither.validate().is_err());
    }

    #[test]
    fn vpc_configuration_round_trips() {
        let config = VpcConfiguration {
            vpc_id: "vpc-1".into(),
            subnet_ids: vec!["subnet-1".into(), "subnet-2".into()],
            security_group_ids: vec!["sg-1".into()],
            tls_certificate: None,
        };
        let expanded = config.expand().unwrap();
        assert_eq!("vpc-1", expanded.vpc_id);
        assert_eq!(config, VpcConfiguration::flatten(expanded));
    }

    #[test]
    fn host_changes() {
        let previous = Host {
            name: "ghe".into(),
            provider_type: "GitHubEnterpriseServer".into(),
            provider_endpoint: "https://ghe.example.com".into(),
            ..Default::default()
        };
        let moved = Host {
            provider_endpoint: "https://git.example.com".into(),
            ..previous.clone()
        };
        let changes = moved.changes(&previous);
        assert_eq!(&["provider_endpoint"], changes.fields());
        assert!(!changes.requires_replace());
    }
}
