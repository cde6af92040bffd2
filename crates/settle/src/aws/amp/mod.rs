//! Amazon Managed Service for Prometheus.
use std::time::Duration;

use aws_sdk_amp::types::{
    LoggingConfigurationMetadata, LoggingConfigurationStatusCode, WorkspaceDescription,
    WorkspaceStatusCode,
};

use crate::{
    aws::AwsClient,
    finder,
    tags::{self, Tags, TagsDiff},
    waiter::Waiter,
    HasChanges, Resource, Result, Timeouts,
};

mod alert_manager_definition;
mod rule_groups_namespace;

pub use alert_manager_definition::*;
pub use rule_groups_namespace::*;

const WORKSPACE_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// A Prometheus workspace.
#[derive(HasChanges, Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct Workspace {
    pub alias: Option<String>,
    /// Customer managed key used to encrypt the workspace.
    #[settle(force_new)]
    pub kms_key_arn: Option<String>,
    pub logging_configuration: Option<LoggingConfiguration>,
    pub tags: Tags,
    #[settle(ignore)]
    pub timeouts: Timeouts,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct LoggingConfiguration {
    /// ARN of the CloudWatch log group vended logs are written to. Must end
    /// in `:*`.
    pub log_group_arn: String,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct WorkspaceOutput {
    pub id: String,
    pub arn: String,
    pub alias: Option<String>,
    pub prometheus_endpoint: Option<String>,
    pub kms_key_arn: Option<String>,
    pub logging_configuration: Option<LoggingConfiguration>,
    pub status: String,
    pub tags_all: Tags,
}

pub async fn find_workspace_by_id(
    client: &aws_sdk_amp::Client,
    id: &str,
) -> Result<WorkspaceDescription> {
    let out = client.describe_workspace().workspace_id(id).send().await?;
    finder::required(out.workspace, format!("describe workspace {id}"))
}

fn workspace_status(workspace: &WorkspaceDescription) -> String {
    workspace
        .status
        .as_ref()
        .map(|s| s.status_code.as_str().to_owned())
        .unwrap_or_default()
}

pub async fn status_workspace(
    client: &aws_sdk_amp::Client,
    id: &str,
) -> Result<Option<(WorkspaceDescription, String)>> {
    finder::status(find_workspace_by_id(client, id).await, workspace_status)
}

pub async fn wait_workspace_created(
    client: &aws_sdk_amp::Client,
    id: &str,
    timeout: Duration,
) -> Result<WorkspaceDescription> {
    Ok(Waiter::new(timeout)
        .pending([WorkspaceStatusCode::Creating.as_str()])
        .target([WorkspaceStatusCode::Active.as_str()])
        .wait(|| status_workspace(client, id))
        .await?)
}

pub async fn wait_workspace_updated(
    client: &aws_sdk_amp::Client,
    id: &str,
    timeout: Duration,
) -> Result<WorkspaceDescription> {
    Ok(Waiter::new(timeout)
        .pending([WorkspaceStatusCode::Updating.as_str()])
        .target([WorkspaceStatusCode::Active.as_str()])
        .wait(|| status_workspace(client, id))
        .await?)
}

pub async fn wait_workspace_deleted(
    client: &aws_sdk_amp::Client,
    id: &str,
    timeout: Duration,
) -> Result<()> {
    Ok(Waiter::<WorkspaceDescription>::new(timeout)
        .pending([WorkspaceStatusCode::Deleting.as_str()])
        .wait_gone(|| status_workspace(client, id))
        .await?)
}

pub async fn find_logging_configuration(
    client: &aws_sdk_amp::Client,
    workspace_id: &str,
) -> Result<LoggingConfigurationMetadata> {
    let out = client
        .describe_logging_configuration()
        .workspace_id(workspace_id)
        .send()
        .await?;
    finder::required(
        out.logging_configuration,
        format!("describe logging configuration {workspace_id}"),
    )
}

pub async fn status_logging_configuration(
    client: &aws_sdk_amp::Client,
    workspace_id: &str,
) -> Result<Option<(LoggingConfigurationMetadata, String)>> {
    finder::status(
        find_logging_configuration(client, workspace_id).await,
        |config| {
            config
                .status
                .as_ref()
                .map(|s| s.status_code.as_str().to_owned())
                .unwrap_or_default()
        },
    )
}

fn logging_status_reason(config: &LoggingConfigurationMetadata) -> Option<String> {
    config.status.as_ref()?.status_reason.clone()
}

/// Waits for a logging configuration to become active after it was
/// created (`pending` CREATING) or updated (`pending` UPDATING).
async fn wait_logging_configuration_active(
    client: &aws_sdk_amp::Client,
    workspace_id: &str,
    pending: LoggingConfigurationStatusCode,
    timeout: Duration,
) -> Result<LoggingConfigurationMetadata> {
    Ok(Waiter::new(timeout)
        .pending([pending.as_str()])
        .target([LoggingConfigurationStatusCode::Active.as_str()])
        .status_reason(logging_status_reason)
        .wait(|| status_logging_configuration(client, workspace_id))
        .await?)
}

async fn wait_logging_configuration_deleted(
    client: &aws_sdk_amp::Client,
    workspace_id: &str,
    timeout: Duration,
) -> Result<()> {
    Ok(Waiter::<LoggingConfigurationMetadata>::new(timeout)
        .pending([LoggingConfigurationStatusCode::Deleting.as_str()])
        .status_reason(logging_status_reason)
        .wait_gone(|| status_logging_configuration(client, workspace_id))
        .await?)
}

/// What to do with a workspace's logging configuration.
#[derive(Debug, PartialEq)]
enum LoggingChange<'a> {
    Unchanged,
    Create(&'a LoggingConfiguration),
    Update(&'a LoggingConfiguration),
    Delete,
}

impl<'a> LoggingChange<'a> {
    fn new(
        previous: Option<&LoggingConfiguration>,
        next: Option<&'a LoggingConfiguration>,
    ) -> Self {
        match (previous, next) {
            (previous, next) if previous == next => LoggingChange::Unchanged,
            (None, Some(next)) => LoggingChange::Create(next),
            (Some(_), Some(next)) => LoggingChange::Update(next),
            (Some(_), None) => LoggingChange::Delete,
            (None, None) => LoggingChange::Unchanged,
        }
    }
}

async fn apply_logging_change(
    client: &aws_sdk_amp::Client,
    workspace_id: &str,
    change: LoggingChange<'_>,
    timeout: Duration,
) -> Result<()> {
    match change {
        LoggingChange::Unchanged => {}
        LoggingChange::Create(config) => {
            log::info!("  enabling logging to {}", config.log_group_arn);
            client
                .create_logging_configuration()
                .workspace_id(workspace_id)
                .log_group_arn(&config.log_group_arn)
                .send()
                .await?;
            wait_logging_configuration_active(
                client,
                workspace_id,
                LoggingConfigurationStatusCode::Creating,
                timeout,
            )
            .await?;
        }
        LoggingChange::Update(config) => {
            log::info!("  logging to {}", config.log_group_arn);
            client
                .update_logging_configuration()
                .workspace_id(workspace_id)
                .log_group_arn(&config.log_group_arn)
                .send()
                .await?;
            wait_logging_configuration_active(
                client,
                workspace_id,
                LoggingConfigurationStatusCode::Updating,
                timeout,
            )
            .await?;
        }
        LoggingChange::Delete => {
            log::info!("  disabling logging");
            let deleted = client
                .delete_logging_configuration()
                .workspace_id(workspace_id)
                .send()
                .await;
            finder::ignore_not_found(deleted.map(|_| ()).map_err(Into::into))?;
            wait_logging_configuration_deleted(client, workspace_id, timeout).await?;
        }
    }
    Ok(())
}

/// Applies a tag diff to any AMP resource.
pub(crate) async fn update_tags(
    client: &aws_sdk_amp::Client,
    arn: &str,
    diff: &TagsDiff,
) -> Result<()> {
    if !diff.remove.is_empty() {
        log::debug!("  untagging {arn}: {:?}", diff.remove);
        client
            .untag_resource()
            .resource_arn(arn)
            .set_tag_keys(Some(diff.remove.clone()))
            .send()
            .await?;
    }
    if !diff.upsert.is_empty() {
        log::debug!("  tagging {arn}: {:?}", diff.upsert);
        client
            .tag_resource()
            .resource_arn(arn)
            .set_tags(tags::to_sdk(&diff.upsert))
            .send()
            .await?;
    }
    Ok(())
}

fn flatten_workspace(
    workspace: WorkspaceDescription,
    logging_configuration: Option<LoggingConfigurationMetadata>,
) -> WorkspaceOutput {
    let status = workspace_status(&workspace);
    WorkspaceOutput {
        tags_all: tags::from_sdk(workspace.tags.as_ref()),
        id: workspace.workspace_id,
        arn: workspace.arn,
        alias: workspace.alias,
        prometheus_endpoint: workspace.prometheus_endpoint,
        kms_key_arn: workspace.kms_key_arn,
        logging_configuration: logging_configuration.map(|config| LoggingConfiguration {
            log_group_arn: config.log_group_arn,
        }),
        status,
    }
}

impl Resource for Workspace {
    type Provider = AwsClient;
    type Output = WorkspaceOutput;

    const NAME: &'static str = "Prometheus Workspace";

    fn id(remote: &WorkspaceOutput) -> String {
        remote.id.clone()
    }

    async fn create(&self, client: &AwsClient) -> Result<String> {
        let out = client
            .amp
            .create_workspace()
            .set_alias(self.alias.clone())
            .set_kms_key_arn(self.kms_key_arn.clone())
            .set_tags(tags::to_sdk(&client.tags_all(&self.tags)))
            .send()
            .await?;
        Ok(out.workspace_id)
    }

    async fn wait_created(&self, client: &AwsClient, id: &str) -> Result<()> {
        let timeout = self.timeouts.create_or(WORKSPACE_TIMEOUT);
        log::info!("  waiting for workspace {id} to become active");
        wait_workspace_created(&client.amp, id, timeout).await?;

        if let Some(config) = &self.logging_configuration {
            apply_logging_change(&client.amp, id, LoggingChange::Create(config), timeout).await?;
        }
        Ok(())
    }

    async fn read(&self, client: &AwsClient, id: &str) -> Result<WorkspaceOutput> {
        let workspace = find_workspace_by_id(&client.amp, id).await?;
        let logging_configuration = match find_logging_configuration(&client.amp, id).await {
            Ok(config) => Some(config),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e),
        };
        Ok(flatten_workspace(workspace, logging_configuration))
    }

    async fn update(
        &self,
        client: &AwsClient,
        previous_local: &Self,
        previous_remote: &WorkspaceOutput,
    ) -> Result<WorkspaceOutput> {
        let id = previous_remote.id.as_str();
        let timeout = self.timeouts.update_or(WORKSPACE_TIMEOUT);

        if self.alias != previous_local.alias {
            log::info!("  setting alias to {:?}", self.alias);
            client
                .amp
                .update_workspace_alias()
                .workspace_id(id)
                .set_alias(self.alias.clone())
                .send()
                .await?;
            wait_workspace_updated(&client.amp, id, timeout).await?;
        }

        let change = LoggingChange::new(
            previous_local.logging_configuration.as_ref(),
            self.logging_configuration.as_ref(),
        );
        apply_logging_change(&client.amp, id, change, timeout).await?;

        let diff = TagsDiff::new(&previous_remote.tags_all, &client.tags_all(&self.tags));
        update_tags(&client.amp, &previous_remote.arn, &diff).await?;

        self.read(client, id).await
    }

    async fn delete(&self, client: &AwsClient, remote: &WorkspaceOutput) -> Result<()> {
        let deleted = client
            .amp
            .delete_workspace()
            .workspace_id(&remote.id)
            .send()
            .await;
        finder::ignore_not_found(deleted.map(|_| ()).map_err(Into::into))?;
        wait_workspace_deleted(
            &client.amp,
            &remote.id,
            self.timeouts.delete_or(WORKSPACE_TIMEOUT),
        )
        .await
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn logging(arn: &str) -> LoggingConfiguration {
        LoggingConfiguration {
            log_group_arn: arn.to_owned(),
        }
    }

    #[test]
    fn logging_changes() {
        let a = logging("arn:aws:logs:us-east-1:123456789012:log-group:a:*");
        let b = logging("arn:aws:logs:us-east-1:123456789012:log-group:b:*");
        assert_eq!(LoggingChange::Unchanged, LoggingChange::new(None, None));
        assert_eq!(LoggingChange::Unchanged, LoggingChange::new(Some(&a), Some(&a)));
        assert_eq!(LoggingChange::Create(&a), LoggingChange::new(None, Some(&a)));
        assert_eq!(LoggingChange::Update(&b), LoggingChange::new(Some(&a), Some(&b)));
        assert_eq!(LoggingChange::Delete, LoggingChange::new(Some(&a), None));
    }

    #[test]
    fn workspace_changes() {
        let previous = Workspace {
            alias: Some("metrics".into()),
            ..Default::default()
        };
        let renamed = Workspace {
            alias: Some("prod-metrics".into()),
            timeouts: Timeouts {
                create: Some(Duration::from_secs(60)),
                ..Default::default()
            },
            ..previous.clone()
        };
        let changes = renamed.changes(&previous);
        assert_eq!(&["alias"], changes.fields());
        assert!(!changes.requires_replace());

        let encrypted = Workspace {
            kms_key_arn: Some("arn:aws:kms:us-east-1:123456789012:key/abc".into()),
            ..previous.clone()
        };
        assert!(encrypted.changes(&previous).requires_replace());
    }

    #[test]
    fn workspace_definition_defaults() {
        let workspace: Workspace = serde_json::from_str(r#"{"alias": "metrics"}"#).unwrap();
        assert_eq!(Some("metrics"), workspace.alias.as_deref());
        assert_eq!(None, workspace.logging_configuration);
        assert!(workspace.tags.is_empty());
    }
}
