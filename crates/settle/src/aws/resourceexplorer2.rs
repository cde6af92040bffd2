//! AWS Resource Explorer indexes and views.
use std::time::Duration;

use aws_sdk_resourceexplorer2::{
    operation::get_index::GetIndexOutput,
    types::{self as aws, IndexState},
};

use crate::{
    arn::Arn,
    aws::AwsClient,
    finder,
    tags::{self, Tags, TagsDiff},
    waiter::Waiter,
    Error, HasChanges, Resource, Result, Timeouts,
};

const INDEX_CREATE_TIMEOUT: Duration = Duration::from_secs(2 * 60 * 60);
const INDEX_UPDATE_TIMEOUT: Duration = Duration::from_secs(2 * 60 * 60);
const INDEX_DELETE_TIMEOUT: Duration = Duration::from_secs(10 * 60);

async fn update_tags(
    client: &aws_sdk_resourceexplorer2::Client,
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
    if !diff.upsert.is_empty() {
        client
            .tag_resource()
            .resource_arn(arn)
            .set_tags(tags::to_sdk(&diff.upsert))
            .send()
            .await?;
    }
    Ok(())
}

#[derive(Clone, Copy, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IndexType {
    #[default]
    Local,
    /// Replicates the indexes of every other region. One per account.
    Aggregator,
}

impl From<IndexType> for aws::IndexType {
    fn from(value: IndexType) -> Self {
        match value {
            IndexType::Local => aws::IndexType::Local,
            IndexType::Aggregator => aws::IndexType::Aggregator,
        }
    }
}

/// The Resource Explorer index of the client's region.
#[derive(HasChanges, Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct Index {
    pub index_type: IndexType,
    pub tags: Tags,
    #[settle(ignore)]
    pub timeouts: Timeouts,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct IndexOutput {
    pub arn: String,
    pub index_type: String,
    pub state: String,
    pub tags_all: Tags,
}

/// Finds the index of the client's region. An index in the `DELETED` state
/// is not found.
pub async fn find_index(client: &aws_sdk_resourceexplorer2::Client) -> Result<GetIndexOutput> {
    let out = client.get_index().send().await?;
    if out.state == Some(IndexState::Deleted) {
        return Err(Error::NotFound {
            message: "index is deleted".into(),
        });
    }
    Ok(out)
}

pub async fn status_index(
    client: &aws_sdk_resourceexplorer2::Client,
) -> Result<Option<(GetIndexOutput, String)>> {
    finder::status(find_index(client).await, |index| {
        index
            .state
            .as_ref()
            .map(|s| s.as_str().to_owned())
            .unwrap_or_default()
    })
}

pub async fn wait_index_created(
    client: &aws_sdk_resourceexplorer2::Client,
    timeout: Duration,
) -> Result<GetIndexOutput> {
    Ok(Waiter::new(timeout)
        .pending([IndexState::Creating.as_str()])
        .target([IndexState::Active.as_str()])
        .wait(|| status_index(client))
        .await?)
}

pub async fn wait_index_updated(
    client: &aws_sdk_resourceexplorer2::Client,
    timeout: Duration,
) -> Result<GetIndexOutput> {
    Ok(Waiter::new(timeout)
        .pending([IndexState::Updating.as_str()])
        .target([IndexState::Active.as_str()])
        .wait(|| status_index(client))
        .await?)
}

pub async fn wait_index_deleted(
    client: &aws_sdk_resourceexplorer2::Client,
    timeout: Duration,
) -> Result<()> {
    Ok(Waiter::<GetIndexOutput>::new(timeout)
        .pending([IndexState::Deleting.as_str()])
        .wait_gone(|| status_index(client))
        .await?)
}

async fn update_index_type(
    client: &aws_sdk_resourceexplorer2::Client,
    arn: &str,
    index_type: IndexType,
    timeout: Duration,
) -> Result<()> {
    log::info!("  changing index type to {index_type:?}");
    client
        .update_index_type()
        .arn(arn)
        .r#type(index_type.into())
        .send()
        .await?;
    wait_index_updated(client, timeout).await?;
    Ok(())
}

impl Resource for Index {
    type Provider = AwsClient;
    type Output = IndexOutput;

    const NAME: &'static str = "Resource Explorer Index";

    fn id(remote: &IndexOutput) -> String {
        remote.arn.clone()
    }

    async fn create(&self, client: &AwsClient) -> Result<String> {
        let out = client
            .resource_explorer
            .create_index()
            .set_tags(tags::to_sdk(&client.tags_all(&self.tags)))
            .send()
            .await?;
        finder::required(out.arn, "create index arn")
    }

    async fn wait_created(&self, client: &AwsClient, id: &str) -> Result<()> {
        let timeout = self.timeouts.create_or(INDEX_CREATE_TIMEOUT);
        wait_index_created(&client.resource_explorer, timeout).await?;

        if self.index_type != IndexType::Local {
            update_index_type(&client.resource_explorer, id, self.index_type, timeout).await?;
        }
        Ok(())
    }

    async fn read(&self, client: &AwsClient, id: &str) -> Result<IndexOutput> {
        let index = find_index(&client.resource_explorer).await?;
        let arn = index.arn.unwrap_or_else(|| id.to_owned());
        if arn != id {
            return Err(Error::NotFound {
                message: format!("the region's index is now {arn}"),
            });
        }
        Ok(IndexOutput {
            arn,
            index_type: index
                .r#type
                .map(|t| t.as_str().to_owned())
                .unwrap_or_default(),
            state: index
                .state
                .map(|s| s.as_str().to_owned())
                .unwrap_or_default(),
            tags_all: tags::from_sdk(index.tags.as_ref()),
        })
    }

    async fn update(
        &self,
        client: &AwsClient,
        previous_local: &Self,
        previous_remote: &IndexOutput,
    ) -> Result<IndexOutput> {
        let arn = previous_remote.arn.as_str();
        if self.index_type != previous_local.index_type {
            update_index_type(
                &client.resource_explorer,
                arn,
                self.index_type,
                self.timeouts.update_or(INDEX_UPDATE_TIMEOUT),
            )
            .await?;
        }

        let diff = TagsDiff::new(&previous_remote.tags_all, &client.tags_all(&self.tags));
        update_tags(&client.resource_explorer, arn, &diff).await?;

        self.read(client, arn).await
    }

    async fn delete(&self, client: &AwsClient, remote: &IndexOutput) -> Result<()> {
        let deleted = client
            .resource_explorer
            .delete_index()
            .arn(&remote.arn)
            .send()
            .await;
        finder::ignore_not_found(deleted.map(|_| ()).map_err(Into::into))?;
        wait_index_deleted(
            &client.resource_explorer,
            self.timeouts.delete_or(INDEX_DELETE_TIMEOUT),
        )
        .await
    }
}

/// A saved search over the index, limited by a filter.
///
/// A view can be the default view of its region, used by searches that
/// don't name one.
#[derive(HasChanges, Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct View {
    #[settle(force_new)]
    pub name: String,
    /// Search query, eg `resourcetype:ec2:instance region:us-west-2`.
    #[serde(default)]
    pub filter: Option<String>,
    /// Extra properties included in results, eg `tags`.
    #[serde(default)]
    pub included_properties: Vec<String>,
    #[serde(default)]
    pub default_view: bool,
    #[serde(default)]
    pub tags: Tags,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ViewOutput {
    pub arn: String,
    pub name: String,
    pub filter: Option<String>,
    pub included_properties: Vec<String>,
    pub default_view: bool,
    pub tags_all: Tags,
}

/// Name of a view, from an ARN ending in `view/<name>/<uuid>`.
pub fn view_name(arn: &str) -> Result<String> {
    let parsed: Arn = arn.parse()?;
    match parsed.resource_parts().as_slice() {
        ["view", name, _] if !name.is_empty() => Ok((*name).to_owned()),
        _ => Err(Error::MalformedId {
            id: arn.to_owned(),
            expected: "view/<name>/<id>".into(),
        }),
    }
}

impl View {
    fn expand_filter(&self) -> Result<Option<aws::SearchFilter>> {
        self.filter
            .as_ref()
            .map(|filter| aws::SearchFilter::builder().filter_string(filter).build())
            .transpose()
            .map_err(Into::into)
    }

    fn expand_included_properties(&self) -> Result<Option<Vec<aws::IncludedProperty>>> {
        if self.included_properties.is_empty() {
            return Ok(None);
        }
        let properties = self
            .included_properties
            .iter()
            .map(|name| aws::IncludedProperty::builder().name(name).build())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Some(properties))
    }
}

pub async fn find_view_by_arn(
    client: &aws_sdk_resourceexplorer2::Client,
    arn: &str,
) -> Result<(aws::View, Tags)> {
    let out = client.get_view().view_arn(arn).send().await?;
    let tags = tags::from_sdk(out.tags.as_ref());
    let view = finder::required(out.view, format!("get view {arn}"))?;
    Ok((view, tags))
}

async fn find_default_view_arn(client: &aws_sdk_resourceexplorer2::Client) -> Result<Option<String>> {
    Ok(client.get_default_view().send().await?.view_arn)
}

async fn set_default_view(
    client: &aws_sdk_resourceexplorer2::Client,
    arn: &str,
    default_view: bool,
) -> Result<()> {
    if default_view {
        log::info!("  making {arn} the default view");
        client.associate_default_view().view_arn(arn).send().await?;
    } else if find_default_view_arn(client).await?.as_deref() == Some(arn) {
        log::info!("  {arn} is no longer the default view");
        client.disassociate_default_view().send().await?;
    }
    Ok(())
}

impl Resource for View {
    type Provider = AwsClient;
    type Output = ViewOutput;

    const NAME: &'static str = "Resource Explorer View";

    fn id(remote: &ViewOutput) -> String {
        remote.arn.clone()
    }

    async fn create(&self, client: &AwsClient) -> Result<String> {
        let out = client
            .resource_explorer
            .create_view()
            .view_name(&self.name)
            .set_filters(self.expand_filter()?)
            .set_included_properties(self.expand_included_properties()?)
            .set_tags(tags::to_sdk(&client.tags_all(&self.tags)))
            .send()
            .await?;
        let view = finder::required(out.view, "create view")?;
        finder::required(view.view_arn, "create view arn")
    }

    async fn wait_created(&self, client: &AwsClient, id: &str) -> Result<()> {
        if self.default_view {
            set_default_view(&client.resource_explorer, id, true).await?;
        }
        Ok(())
    }

    async fn read(&self, client: &AwsClient, id: &str) -> Result<ViewOutput> {
        let (view, tags_all) = find_view_by_arn(&client.resource_explorer, id).await?;
        let default_view = find_default_view_arn(&client.resource_explorer)
            .await?
            .as_deref()
            == Some(id);
        Ok(ViewOutput {
            name: view_name(id)?,
            arn: view.view_arn.unwrap_or_else(|| id.to_owned()),
            filter: view.filters.map(|filters| filters.filter_string),
            included_properties: view
                .included_properties
                .unwrap_or_default()
                .into_iter()
                .map(|property| property.name)
                .collect(),
            default_view,
            tags_all,
        })
    }

    /// Updates the search settings, then the default view association, then
    /// the tags. A failure in a later step leaves the earlier steps applied.
    async fn update(
        &self,
        client: &AwsClient,
        previous_local: &Self,
        previous_remote: &ViewOutput,
    ) -> Result<ViewOutput> {
        let arn = previous_remote.arn.as_str();
        if self.filter != previous_local.filter
            || self.included_properties != previous_local.included_properties
        {
            client
                .resource_explorer
                .update_view()
                .view_arn(arn)
                .set_filters(self.expand_filter()?)
                .set_included_properties(self.expand_included_properties()?)
                .send()
                .await?;
        }

        if self.default_view != previous_remote.default_view {
            set_default_view(&client.resource_explorer, arn, self.default_view).await?;
        }

        let diff = TagsDiff::new(&previous_remote.tags_all, &client.tags_all(&self.tags));
        update_tags(&client.resource_explorer, arn, &diff).await?;

        self.read(client, arn).await
    }

    async fn delete(&self, client: &AwsClient, remote: &ViewOutput) -> Result<()> {
        if remote.default_view {
            set_default_view(&client.resource_explorer, &remote.arn, false).await?;
        }
        let deleted = client
            .resource_explorer
            .delete_view()
            .view_arn(&remote.arn)
            .send()
            .await;
        finder::ignore_not_found(deleted.map(|_| ()).map_err(Into::into))
    }
}

#[cfg(test)]
mod test {
    use aws_sdk_resourceexplorer2::{
        operation::{
            delete_index::{DeleteIndexError, DeleteIndexOutput},
            delete_view::DeleteViewError,
            get_index::GetIndexError,
        },
        types::error::{AccessDeniedException, ResourceNotFoundException},
        Client,
    };
    use aws_smithy_mocks::{mock, mock_client, RuleMode};
    use aws_smithy_types::error::ErrorMetadata;

    use super::*;

    const INDEX_ARN: &str = "arn:aws:resource-explorer-2:us-east-1:123456789012:index/0a1b2c3d";

    fn not_found() -> ResourceNotFoundException {
        ResourceNotFoundException::builder()
            .message("no index in us-east-1")
            .meta(
                ErrorMetadata::builder()
                    .code("ResourceNotFoundException")
                    .message("no index in us-east-1")
                    .build(),
            )
            .build()
    }

    fn index_output() -> IndexOutput {
        IndexOutput {
            arn: INDEX_ARN.into(),
            index_type: "LOCAL".into(),
            state: "ACTIVE".into(),
            tags_all: Tags::new(),
        }
    }

    fn with_resource_explorer(resource_explorer: Client) -> AwsClient {
        AwsClient {
            resource_explorer,
            ..AwsClient::offline()
        }
    }

    #[tokio::test]
    async fn deleted_index_is_not_found() {
        let get_index = mock!(Client::get_index).then_output(|| {
            GetIndexOutput::builder()
                .arn(INDEX_ARN)
                .state(IndexState::Deleted)
                .build()
        });
        let client = with_resource_explorer(mock_client!(
            aws_sdk_resourceexplorer2,
            RuleMode::MatchAny,
            [&get_index]
        ));

        let err = find_index(&client.resource_explorer).await.unwrap_err();
        assert!(err.is_not_found(), "{err}");
        assert!(status_index(&client.resource_explorer).await.unwrap().is_none());
        let err = Index::default().read(&client, INDEX_ARN).await.unwrap_err();
        assert!(err.is_not_found(), "{err}");
        assert_eq!(3, get_index.num_calls());
    }

    #[tokio::test]
    async fn index_delete_finishes_once_the_index_is_deleted() {
        let delete_index =
            mock!(Client::delete_index).then_output(|| DeleteIndexOutput::builder().build());
        let get_index = mock!(Client::get_index).then_output(|| {
            GetIndexOutput::builder()
                .arn(INDEX_ARN)
                .state(IndexState::Deleted)
                .build()
        });
        let client = with_resource_explorer(mock_client!(
            aws_sdk_resourceexplorer2,
            RuleMode::MatchAny,
            [&delete_index, &get_index]
        ));

        Index::default().delete(&client, &index_output()).await.unwrap();
        assert_eq!(1, delete_index.num_calls());
        assert_eq!(1, get_index.num_calls());
    }

    #[tokio::test]
    async fn deleting_a_missing_index_succeeds() {
        let delete_index = mock!(Client::delete_index)
            .then_error(|| DeleteIndexError::ResourceNotFoundException(not_found()));
        let get_index = mock!(Client::get_index)
            .then_error(|| GetIndexError::ResourceNotFoundException(not_found()));
        let client = with_resource_explorer(mock_client!(
            aws_sdk_resourceexplorer2,
            RuleMode::MatchAny,
            [&delete_index, &get_index]
        ));

        Index::default().delete(&client, &index_output()).await.unwrap();
        assert_eq!(1, delete_index.num_calls());
        assert_eq!(1, get_index.num_calls());
    }

    #[tokio::test]
    async fn index_delete_errors_propagate() {
        let delete_index = mock!(Client::delete_index).then_error(|| {
            DeleteIndexError::AccessDeniedException(
                AccessDeniedException::builder()
                    .message("not allowed")
                    .meta(
                        ErrorMetadata::builder()
                            .code("AccessDeniedException")
                            .message("not allowed")
                            .build(),
                    )
                    .build(),
            )
        });
        let get_index = mock!(Client::get_index)
            .then_error(|| GetIndexError::ResourceNotFoundException(not_found()));
        let client = with_resource_explorer(mock_client!(
            aws_sdk_resourceexplorer2,
            RuleMode::MatchAny,
            [&delete_index, &get_index]
        ));

        let err = Index::default()
            .delete(&client, &index_output())
            .await
            .unwrap_err();
        assert!(err.has_code("AccessDeniedException"), "{err:?}");
        assert_eq!(0, get_index.num_calls());
    }

    #[tokio::test]
    async fn deleting_a_missing_view_succeeds() {
        let delete_view = mock!(Client::delete_view)
            .then_error(|| DeleteViewError::ResourceNotFoundException(not_found()));
        let client = with_resource_explorer(mock_client!(
            aws_sdk_resourceexplorer2,
            RuleMode::MatchAny,
            [&delete_view]
        ));
        let remote = ViewOutput {
            arn: "arn:aws:resource-explorer-2:us-east-1:123456789012:view/all/6d3e6c1a".into(),
            name: "all".into(),
            filter: None,
            included_properties: vec![],
            default_view: false,
            tags_all: Tags::new(),
        };

        View::default().delete(&client, &remote).await.unwrap();
        assert_eq!(1, delete_view.num_calls());
    }

    #[test]
    fn view_names() {
        assert_eq!(
            "all-ec2",
            view_name(
                "arn:aws:resource-explorer-2:us-east-1:123456789012:view/all-ec2/6d3e6c1a-56d2-4cfe-a4e0-11e9f1b1b5a3"
            )
            .unwrap()
        );
        let err = view_name("arn:aws:resource-explorer-2:us-east-1:123456789012:index/abc")
            .unwrap_err();
        assert!(matches!(err, Error::MalformedId { .. }), "{err}");
        assert!(view_name("all-ec2").is_err());
    }

    #[test]
    fn view_expansion() {
        let view = View {
            name: "all-ec2".into(),
            filter: Some("resourcetype:ec2:instance".into()),
            included_properties: vec!["tags".into()],
            ..Default::default()
        };
        let filter = view.expand_filter().unwrap().unwrap();
        assert_eq!("resourcetype:ec2:instance", filter.filter_string);
        let properties = view.expand_included_properties().unwrap().unwrap();
        assert_eq!("tags", properties[0].name);

        let bare = View {
            name: "everything".into(),
            ..Default::default()
        };
        assert!(bare.expand_filter().unwrap().is_none());
        assert!(bare.expand_included_properties().unwrap().is_none());
    }

    #[test]
    fn default_view_is_an_in_place_change() {
        let previous = View {
            name: "all".into(),
            ..Default::default()
        };
        let next = View {
            default_view: true,
            ..previous.clone()
        };
        let changes = next.changes(&previous);
        assert_eq!(&["default_view"], changes.fields());
        assert!(!changes.requires_replace());
    }

    #[test]
    fn index_type_names() {
        let index: Index = serde_json::from_str(r#"{"index_type": "AGGREGATOR"}"#).unwrap();
        assert_eq!(IndexType::Aggregator, index.index_type);
        assert_eq!(Index::default().index_type, IndexType::Local);
    }
}
