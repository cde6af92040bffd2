use std::time::Duration;

use aws_sdk_amp::{
    primitives::Blob,
    types::{AlertManagerDefinitionDescription, AlertManagerDefinitionStatusCode},
};

use crate::{aws::AwsClient, finder, waiter::Waiter, HasChanges, Resource, Result, Timeouts};

const ALERT_MANAGER_DEFINITION_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// The alert manager configuration of a workspace. A workspace has at most
/// one, so it is identified by the workspace id.
#[derive(HasChanges, Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AlertManagerDefinition {
    #[settle(force_new)]
    pub workspace_id: String,
    /// The alert manager configuration, in YAML.
    pub definition: String,
    #[serde(default)]
    #[settle(ignore)]
    pub timeouts: Timeouts,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AlertManagerDefinitionOutput {
    pub workspace_id: String,
    pub definition: String,
    pub status: String,
}

pub async fn find_alert_manager_definition(
    client: &aws_sdk_amp::Client,
    workspace_id: &str,
) -> Result<AlertManagerDefinitionDescription> {
    let out = client
        .describe_alert_manager_definition()
        .workspace_id(workspace_id)
        .send()
        .await?;
    finder::required(
        out.alert_manager_definition,
        format!("describe alert manager definition {workspace_id}"),
    )
}

pub async fn status_alert_manager_definition(
    client: &aws_sdk_amp::Client,
    workspace_id: &str,
) -> Result<Option<(AlertManagerDefinitionDescription, String)>> {
    finder::status(
        find_alert_manager_definition(client, workspace_id).await,
        |definition| {
            definition
                .status
                .as_ref()
                .map(|s| s.status_code.as_str().to_owned())
                .unwrap_or_default()
        },
    )
}

fn status_reason(definition: &AlertManagerDefinitionDescription) -> Option<String> {
    definition.status.as_ref()?.status_reason.clone()
}

async fn wait_alert_manager_definition_active(
    client: &aws_sdk_amp::Client,
    workspace_id: &str,
    pending: AlertManagerDefinitionStatusCode,
    timeout: Duration,
) -> Result<AlertManagerDefinitionDescription> {
    Ok(Waiter::new(timeout)
        .pending([pending.as_str()])
        .target([AlertManagerDefinitionStatusCode::Active.as_str()])
        .status_reason(status_reason)
        .wait(|| status_alert_manager_definition(client, workspace_id))
        .await?)
}

pub async fn wait_alert_manager_definition_created(
    client: &aws_sdk_amp::Client,
    workspace_id: &str,
    timeout: Duration,
) -> Result<AlertManagerDefinitionDescription> {
    wait_alert_manager_definition_active(
        client,
        workspace_id,
        AlertManagerDefinitionStatusCode::Creating,
        timeout,
    )
    .await
}

pub async fn wait_alert_manager_definition_updated(
    client: &aws_sdk_amp::Client,
    workspace_id: &str,
    timeout: Duration,
) -> Result<AlertManagerDefinitionDescription> {
    wait_alert_manager_definition_active(
        client,
        workspace_id,
        AlertManagerDefinitionStatusCode::Updating,
        timeout,
    )
    .await
}

pub async fn wait_alert_manager_definition_deleted(
    client: &aws_sdk_amp::Client,
    workspace_id: &str,
    timeout: Duration,
) -> Result<()> {
    Ok(Waiter::<AlertManagerDefinitionDescription>::new(timeout)
        .pending([AlertManagerDefinitionStatusCode::Deleting.as_str()])
        .status_reason(status_reason)
        .wait_gone(|| status_alert_manager_definition(client, workspace_id))
        .await?)
}

impl Resource for AlertManagerDefinition {
    type Provider = AwsClient;
    type Output = AlertManagerDefinitionOutput;

    const NAME: &'static str = "Prometheus Alert Manager Definition";

    fn id(remote: &AlertManagerDefinitionOutput) -> String {
        remote.workspace_id.clone()
    }

    async fn create(&self, client: &AwsClient) -> Result<String> {
        client
            .amp
            .create_alert_manager_definition()
            .workspace_id(&self.workspace_id)
            .data(Blob::new(self.definition.as_bytes()))
            .send()
            .await?;
        Ok(self.workspace_id.clone())
    }

    async fn wait_created(&self, client: &AwsClient, id: &str) -> Result<()> {
        wait_alert_manager_definition_created(
            &client.amp,
            id,
            self.timeouts.create_or(ALERT_MANAGER_DEFINITION_TIMEOUT),
        )
        .await?;
        Ok(())
    }

    async fn read(&self, client: &AwsClient, id: &str) -> Result<AlertManagerDefinitionOutput> {
        let definition = find_alert_manager_definition(&client.amp, id).await?;
        Ok(AlertManagerDefinitionOutput {
            workspace_id: id.to_owned(),
            status: definition
                .status
                .as_ref()
                .map(|s| s.status_code.as_str().to_owned())
                .unwrap_or_default(),
            definition: String::from_utf8_lossy(definition.data.as_ref()).into_owned(),
        })
    }

    async fn update(
        &self,
        client: &AwsClient,
        _previous_local: &Self,
        previous_remote: &AlertManagerDefinitionOutput,
    ) -> Result<AlertManagerDefinitionOutput> {
        let workspace_id = previous_remote.workspace_id.as_str();
        client
            .amp
            .put_alert_manager_definition()
            .workspace_id(workspace_id)
            .data(Blob::new(self.definition.as_bytes()))
            .send()
            .await?;
        wait_alert_manager_definition_updated(
            &client.amp,
            workspace_id,
            self.timeouts.update_or(ALERT_MANAGER_DEFINITION_TIMEOUT),
        )
        .await?;
        self.read(client, workspace_id).await
    }

    async fn delete(&self, client: &AwsClient, remote: &AlertManagerDefinitionOutput) -> Result<()> {
        let deleted = client
            .amp
            .delete_alert_manager_definition()
            .workspace_id(&remote.workspace_id)
            .send()
            .await;
        finder::ignore_not_found(deleted.map(|_| ()).map_err(Into::into))?;
        wait_alert_manager_definition_deleted(
            &client.amp,
            &remote.workspace_id,
            self.timeouts.delete_or(ALERT_MANAGER_DEFINITION_TIMEOUT),
        )
        .await
    }
}
