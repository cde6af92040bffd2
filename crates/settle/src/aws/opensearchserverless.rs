//! Amazon OpenSearch Serverless collections.
use std::time::Duration;

use aws_sdk_opensearchserverless::types as aws;

use crate::{
    aws::AwsClient,
    finder,
    tags::{Tags, TagsDiff},
    waiter::Waiter,
    HasChanges, Resource, Result, Timeouts,
};

const COLLECTION_TIMEOUT: Duration = Duration::from_secs(20 * 60);

#[derive(Clone, Copy, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CollectionType {
    #[default]
    Search,
    Timeseries,
    Vectorsearch,
}

impl From<CollectionType> for aws::CollectionType {
    fn from(value: CollectionType) -> Self {
        match value {
            CollectionType::Search => aws::CollectionType::Search,
            CollectionType::Timeseries => aws::CollectionType::Timeseries,
            CollectionType::Vectorsearch => aws::CollectionType::Vectorsearch,
        }
    }
}

/// A serverless OpenSearch collection.
///
/// An encryption policy matching the collection name must exist before it
/// can be created.
#[derive(HasChanges, Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Collection {
    #[settle(force_new)]
    pub name: String,
    #[serde(default)]
    #[settle(force_new)]
    pub collection_type: CollectionType,
    #[serde(default)]
    pub description: Option<String>,
    /// Whether to use standby replicas. Defaults to enabled.
    #[serde(default)]
    #[settle(force_new)]
    pub standby_replicas: Option<bool>,
    #[serde(default)]
    pub tags: Tags,
    #[serde(default)]
    #[settle(ignore)]
    pub timeouts: Timeouts,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CollectionOutput {
    pub id: String,
    pub arn: String,
    pub name: String,
    pub description: Option<String>,
    pub collection_endpoint: Option<String>,
    pub dashboard_endpoint: Option<String>,
    pub kms_key_arn: Option<String>,
    pub status: String,
    pub tags_all: Tags,
}

/// Finds a collection by id. Errs if the batch read returns more than one.
pub async fn find_collection_by_id(
    client: &aws_sdk_opensearchserverless::Client,
    id: &str,
) -> Result<aws::CollectionDetail> {
    let out = client.batch_get_collection().ids(id).send().await?;
    finder::single(
        out.collection_details.unwrap_or_default(),
        format!("collection {id}"),
    )
}

pub async fn status_collection(
    client: &aws_sdk_opensearchserverless::Client,
    id: &str,
) -> Result<Option<(aws::CollectionDetail, String)>> {
    finder::status(find_collection_by_id(client, id).await, |collection| {
        collection
            .status
            .as_ref()
            .map(|s| s.as_str().to_owned())
            .unwrap_or_default()
    })
}

fn failure_reason(collection: &aws::CollectionDetail) -> Option<String> {
    match (&collection.failure_code, &collection.failure_message) {
        (Some(code), Some(message)) => Some(format!("{code}: {message}")),
        (None, Some(message)) => Some(message.clone()),
        (Some(code), None) => Some(code.clone()),
        (None, None) => None,
    }
}

pub async fn wait_collection_created(
    client: &aws_sdk_opensearchserverless::Client,
    id: &str,
    timeout: Duration,
) -> Result<aws::CollectionDetail> {
    Ok(Waiter::new(timeout)
        .pending([aws::CollectionStatus::Creating.as_str()])
        .target([aws::CollectionStatus::Active.as_str()])
        .status_reason(failure_reason)
        .wait(|| status_collection(client, id))
        .await?)
}

pub async fn wait_collection_deleted(
    client: &aws_sdk_opensearchserverless::Client,
    id: &str,
    timeout: Duration,
) -> Result<()> {
    Ok(Waiter::<aws::CollectionDetail>::new(timeout)
        .pending([aws::CollectionStatus::Deleting.as_str()])
        .status_reason(failure_reason)
        .wait_gone(|| status_collection(client, id))
        .await?)
}

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

async fn find_tags(client: &aws_sdk_opensearchserverless::Client, arn: &str) -> Result<Tags> {
    let out = client.list_tags_for_resource().resource_arn(arn).send().await?;
    Ok(out
        .tags
        .unwrap_or_default()
        .into_iter()
        .map(|tag| (tag.key, tag.value))
        .collect())
}

fn flatten_collection(collection: aws::CollectionDetail, tags_all: Tags) -> CollectionOutput {
    CollectionOutput {
        status: collection
            .status
            .as_ref()
            .map(|s| s.as_str().to_owned())
            .unwrap_or_default(),
        id: collection.id.unwrap_or_default(),
        arn: collection.arn.unwrap_or_default(),
        name: collection.name.unwrap_or_default(),
        description: collection.description,
        collection_endpoint: collection.collection_endpoint,
        dashboard_endpoint: collection.dashboard_endpoint,
        kms_key_arn: collection.kms_key_arn,
        tags_all,
    }
}

impl Resource for Collection {
    type Provider = AwsClient;
    type Output = CollectionOutput;

    const NAME: &'static str = "OpenSearch Serverless Collection";

    fn id(remote: &CollectionOutput) -> String {
        remote.id.clone()
    }

    async fn create(&self, client: &AwsClient) -> Result<String> {
        let standby_replicas = self.standby_replicas.map(|enabled| {
            if enabled {
                aws::StandbyReplicas::Enabled
            } else {
                aws::StandbyReplicas::Disabled
            }
        });
        let out = client
            .opensearch_serverless
            .create_collection()
            .name(&self.name)
            .r#type(self.collection_type.into())
            .set_description(self.description.clone())
            .set_standby_replicas(standby_replicas)
            .set_tags(expand_tags(&client.tags_all(&self.tags))?)
            .send()
            .await?;
        let detail = finder::required(out.create_collection_detail, "create collection detail")?;
        finder::required(detail.id, "create collection id")
    }

    async fn wait_created(&self, client: &AwsClient, id: &str) -> Result<()> {
        wait_collection_created(
            &client.opensearch_serverless,
            id,
            self.timeouts.create_or(COLLECTION_TIMEOUT),
        )
        .await?;
        Ok(())
    }

    async fn read(&self, client: &AwsClient, id: &str) -> Result<CollectionOutput> {
        let collection = find_collection_by_id(&client.opensearch_serverless, id).await?;
        let tags_all = match collection.arn.as_deref() {
            Some(arn) => find_tags(&client.opensearch_serverless, arn).await?,
            None => Tags::new(),
        };
        Ok(flatten_collection(collection, tags_all))
    }

    async fn update(
        &self,
        client: &AwsClient,
        previous_local: &Self,
        previous_remote: &CollectionOutput,
    ) -> Result<CollectionOutput> {
        let id = previous_remote.id.as_str();
        if self.description != previous_local.description {
            client
                .opensearch_serverless
                .update_collection()
                .id(id)
                .description(self.description.clone().unwrap_or_default())
                .send()
                .await?;
        }

        let diff = TagsDiff::new(&previous_remote.tags_all, &client.tags_all(&self.tags));
        if !diff.remove.is_empty() {
            client
                .opensearch_serverless
                .untag_resource()
                .resource_arn(&previous_remote.arn)
                .set_tag_keys(Some(diff.remove.clone()))
                .send()
                .await?;
        }
        if let Some(tags) = expand_tags(&diff.upsert)? {
            client
                .opensearch_serverless
                .tag_resource()
                .resource_arn(&previous_remote.arn)
                .set_tags(Some(tags))
                .send()
                .await?;
        }

        self.read(client, id).await
    }

    async fn delete(&self, client: &AwsClient, remote: &CollectionOutput) -> Result<()> {
        let deleted = client
            .opensearch_serverless
            .delete_collection()
            .id(&remote.id)
            .send()
            .await;
        finder::ignore_not_found(deleted.map(|_| ()).map_err(Into::into))?;
        wait_collection_deleted(
            &client.opensearch_serverless,
            &remote.id,
            self.timeouts.delete_or(COLLECTION_TIMEOUT),
        )
        .await
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn failure_reasons() {
        let failed = aws::CollectionDetail::builder()
            .status(aws::CollectionStatus::Failed)
            .failure_code("KMS_KEY_NOT_FOUND")
            .failure_message("the encryption key is gone")
            .build();
        assert_eq!(
            Some("KMS_KEY_NOT_FOUND: the encryption key is gone".to_owned()),
            failure_reason(&failed)
        );
        assert_eq!(None, failure_reason(&aws::CollectionDetail::builder().build()));
    }

    #[test]
    fn flatten() {
        let detail = aws::CollectionDetail::builder()
            .id("abc123")
            .arn("arn:aws:aoss:us-east-1:123456789012:collection/abc123")
            .name("logs")
            .status(aws::CollectionStatus::Active)
            .collection_endpoint("https://abc123.us-east-1.aoss.amazonaws.com")
            .build();
        let output = flatten_collection(detail, Tags::new());
        assert_eq!("abc123", output.id);
        assert_eq!("ACTIVE", output.status);
        assert_eq!(
            Some("https://abc123.us-east-1.aoss.amazonaws.com"),
            output.collection_endpoint.as_deref()
        );
    }

    #[test]
    fn collection_type_names() {
        let collection: Collection =
            serde_json::from_str(r#"{"name": "logs", "collection_type": "TIMESERIES"}"#).unwrap();
        assert_eq!(CollectionType::Timeseries, collection.collection_type);
        assert_eq!(
            aws::CollectionType::Timeseries,
            aws::CollectionType::from(collection.collection_type)
        );
    }
}
