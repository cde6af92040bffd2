use std::time::Duration;

use aws_sdk_amp::{
    primitives::Blob,
    types::{RuleGroupsNamespaceDescription, RuleGroupsNamespaceStatusCode},
};

use crate::{
    arn,
    aws::AwsClient,
    finder,
    tags::{self, Tags, TagsDiff},
    waiter::Waiter,
    HasChanges, Resource, Result, Timeouts,
};

const RULE_GROUPS_NAMESPACE_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// A namespace of Prometheus recording and alerting rules in a workspace.
#[derive(HasChanges, Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RuleGroupsNamespace {
    #[settle(force_new)]
    pub workspace_id: String,
    #[settle(force_new)]
    pub name: String,
    /// The rules file, in YAML.
    pub data: String,
    #[serde(default)]
    pub tags: Tags,
    #[serde(default)]
    #[settle(ignore)]
    pub timeouts: Timeouts,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RuleGroupsNamespaceOutput {
    pub arn: String,
    pub workspace_id: String,
    pub name: String,
    pub data: String,
    pub status: String,
    pub tags_all: Tags,
}

/// Finds a namespace by its ARN.
pub async fn find_rule_groups_namespace_by_arn(
    client: &aws_sdk_amp::Client,
    arn: &str,
) -> Result<RuleGroupsNamespaceDescription> {
    let (workspace_id, name) = arn::rule_groups_namespace_ids(arn)?;
    let out = client
        .describe_rule_groups_namespace()
        .workspace_id(workspace_id)
        .name(name)
        .send()
        .await?;
    finder::required(
        out.rule_groups_namespace,
        format!("describe rule groups namespace {arn}"),
    )
}

pub async fn status_rule_groups_namespace(
    client: &aws_sdk_amp::Client,
    arn: &str,
) -> Result<Option<(RuleGroupsNamespaceDescription, String)>> {
    finder::status(
        find_rule_groups_namespace_by_arn(client, arn).await,
        |namespace| {
            namespace
                .status
                .as_ref()
                .map(|s| s.status_code.as_str().to_owned())
                .unwrap_or_default()
        },
    )
}

fn status_reason(namespace: &RuleGroupsNamespaceDescription) -> Option<String> {
    namespace.status.as_ref()?.status_reason.clone()
}

pub async fn wait_rule_groups_namespace_created(
    client: &aws_sdk_amp::Client,
    arn: &str,
    timeout: Duration,
) -> Result<RuleGroupsNamespaceDescription> {
    Ok(Waiter::new(timeout)
        .pending([RuleGroupsNamespaceStatusCode::Creating.as_str()])
        .target([RuleGroupsNamespaceStatusCode::Active.as_str()])
        .status_reason(status_reason)
        .wait(|| status_rule_groups_namespace(client, arn))
        .await?)
}

pub async fn wait_rule_groups_namespace_updated(
    client: &aws_sdk_amp::Client,
    arn: &str,
    timeout: Duration,
) -> Result<RuleGroupsNamespaceDescription> {
    Ok(Waiter::new(timeout)
        .pending([RuleGroupsNamespaceStatusCode::Updating.as_str()])
        .target([RuleGroupsNamespaceStatusCode::Active.as_str()])
        .status_reason(status_reason)
        .wait(|| status_rule_groups_namespace(client, arn))
        .await?)
}

pub async fn wait_rule_groups_namespace_deleted(
    client: &aws_sdk_amp::Client,
    arn: &str,
    timeout: Duration,
) -> Result<()> {
    Ok(Waiter::<RuleGroupsNamespaceDescription>::new(timeout)
        .pending([RuleGroupsNamespaceStatusCode::Deleting.as_str()])
        .status_reason(status_reason)
        .wait_gone(|| status_rule_groups_namespace(client, arn))
        .await?)
}

fn flatten_rule_groups_namespace(
    workspace_id: String,
    namespace: RuleGroupsNamespaceDescription,
) -> RuleGroupsNamespaceOutput {
    RuleGroupsNamespaceOutput {
        status: namespace
            .status
            .as_ref()
            .map(|s| s.status_code.as_str().to_owned())
            .unwrap_or_default(),
        tags_all: tags::from_sdk(namespace.tags.as_ref()),
        data: String::from_utf8_lossy(namespace.data.as_ref()).into_owned(),
        arn: namespace.arn,
        workspace_id,
        name: namespace.name,
    }
}

impl Resource for RuleGroupsNamespace {
    type Provider = AwsClient;
    type Output = RuleGroupsNamespaceOutput;

    const NAME: &'static str = "Prometheus Rule Groups Namespace";

    fn id(remote: &RuleGroupsNamespaceOutput) -> String {
        remote.arn.clone()
    }

    async fn create(&self, client: &AwsClient) -> Result<String> {
        let out = client
            .amp
            .create_rule_groups_namespace()
            .workspace_id(&self.workspace_id)
            .name(&self.name)
            .data(Blob::new(self.data.as_bytes()))
            .set_tags(tags::to_sdk(&client.tags_all(&self.tags)))
            .send()
            .await?;
        Ok(out.arn)
    }

    async fn wait_created(&self, client: &AwsClient, id: &str) -> Result<()> {
        wait_rule_groups_namespace_created(
            &client.amp,
            id,
            self.timeouts.create_or(RULE_GROUPS_NAMESPACE_TIMEOUT),
        )
        .await?;
        Ok(())
    }

    async fn read(&self, client: &AwsClient, id: &str) -> Result<RuleGroupsNamespaceOutput> {
        let (workspace_id, _) = arn::rule_groups_namespace_ids(id)?;
        let namespace = find_rule_groups_namespace_by_arn(&client.amp, id).await?;
        Ok(flatten_rule_groups_namespace(workspace_id, namespace))
    }

    async fn update(
        &self,
        client: &AwsClient,
        previous_local: &Self,
        previous_remote: &RuleGroupsNamespaceOutput,
    ) -> Result<RuleGroupsNamespaceOutput> {
        let arn = previous_remote.arn.as_str();
        if self.data != previous_local.data {
            log::info!("  putting rules of {arn}");
            client
                .amp
                .put_rule_groups_namespace()
                .workspace_id(&self.workspace_id)
                .name(&self.name)
                .data(Blob::new(self.data.as_bytes()))
                .send()
                .await?;
            wait_rule_groups_namespace_updated(
                &client.amp,
                arn,
                self.timeouts.update_or(RULE_GROUPS_NAMESPACE_TIMEOUT),
            )
            .await?;
        }

        let diff = TagsDiff::new(&previous_remote.tags_all, &client.tags_all(&self.tags));
        super::update_tags(&client.amp, arn, &diff).await?;

        self.read(client, arn).await
    }

    async fn delete(&self, client: &AwsClient, remote: &RuleGroupsNamespaceOutput) -> Result<()> {
        let deleted = client
            .amp
            .delete_rule_groups_namespace()
            .workspace_id(&remote.workspace_id)
            .name(&remote.name)
            .send()
            .await;
        finder::ignore_not_found(deleted.map(|_| ()).map_err(Into::into))?;
        wait_rule_groups_namespace_deleted(
            &client.amp,
            &remote.arn,
            self.timeouts.delete_or(RULE_GROUPS_NAMESPACE_TIMEOUT),
        )
        .await
    }
}
