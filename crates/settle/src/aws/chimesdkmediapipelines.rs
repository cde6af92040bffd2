//! Amazon Chime SDK media pipelines.
use std::time::Duration;

use aws_sdk_chimesdkmediapipelines::types as aws;

use crate::{
    aws::AwsClient,
    finder, retry,
    tags::{Tags, TagsDiff},
    Error, HasChanges, Resource, Result, Timeouts,
};

const FORBIDDEN: &str = "ForbiddenException";

/// How long create and update retry while the access role propagates.
const CONFIGURATION_TIMEOUT: Duration = Duration::from_secs(3 * 60);

/// Reads a service flag, unset meaning off.
fn flag(value: impl Into<Option<bool>>) -> bool {
    value.into().unwrap_or_default()
}

/// Where a sink or processor element delivers insights.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Element {
    KinesisDataStreamSink {
        insights_target: String,
    },
    LambdaFunctionSink {
        insights_target: String,
    },
    SnsTopicSink {
        insights_target: String,
    },
    SqsQueueSink {
        insights_target: String,
    },
    S3RecordingSink {
        destination: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        recording_file_format: Option<RecordingFileFormat>,
    },
    VoiceAnalyticsProcessor {
        speaker_search_enabled: bool,
        voice_tone_analysis_enabled: bool,
    },
    AmazonTranscribeCallAnalyticsProcessor {
        #[serde(flatten)]
        transcription: Transcription,
        /// Categories of the call analytics stream, eg `"positive-callers"`.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        call_analytics_stream_categories: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        post_call_analytics_settings: Option<PostCallAnalyticsSettings>,
    },
    AmazonTranscribeProcessor {
        #[serde(flatten)]
        transcription: Transcription,
        #[serde(default)]
        show_speaker_label: bool,
    },
}

/// Streaming transcription settings shared by the Amazon Transcribe
/// processors.
///
/// Service enums are kept as their wire strings, eg `"en-US"` for
/// `language_code` or `"PII"` for the content types.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Transcription {
    pub language_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vocabulary_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vocabulary_filter_name: Option<String>,
    /// `remove`, `mask` or `tag`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vocabulary_filter_method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language_model_name: Option<String>,
    #[serde(default)]
    pub enable_partial_results_stabilization: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partial_results_stability: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_identification_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_redaction_type: Option<String>,
    /// Comma separated, eg `"NAME,ADDRESS"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pii_entity_types: Option<String>,
    #[serde(default)]
    pub filter_partial_results: bool,
}

/// Where Amazon Transcribe writes call analytics once a call ends.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PostCallAnalyticsSettings {
    pub output_location: String,
    pub data_access_role_arn: String,
    /// `redacted` or `redacted_and_unredacted`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_redaction_output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_encryption_kms_key_id: Option<String>,
}

fn expand_post_call_analytics_settings(
    settings: &PostCallAnalyticsSettings,
) -> Result<aws::PostCallAnalyticsSettings> {
    Ok(aws::PostCallAnalyticsSettings::builder()
        .output_location(&settings.output_location)
        .data_access_role_arn(&settings.data_access_role_arn)
        .set_content_redaction_output(
            settings
                .content_redaction_output
                .as_deref()
                .map(aws::ContentRedactionOutput::from),
        )
        .set_output_encryption_kms_key_id(settings.output_encryption_kms_key_id.clone())
        .build()?)
}

fn flatten_post_call_analytics_settings(
    settings: aws::PostCallAnalyticsSettings,
) -> PostCallAnalyticsSettings {
    PostCallAnalyticsSettings {
        output_location: settings.output_location,
        data_access_role_arn: settings.data_access_role_arn,
        content_redaction_output: settings
            .content_redaction_output
            .map(|output| output.as_str().to_owned()),
        output_encryption_kms_key_id: settings.output_encryption_kms_key_id,
    }
}

fn expand_call_analytics_processor(
    transcription: &Transcription,
    stream_categories: &[String],
    post_call: Option<&PostCallAnalyticsSettings>,
) -> Result<aws::AmazonTranscribeCallAnalyticsProcessorConfiguration> {
    let t = transcription;
    Ok(
        aws::AmazonTranscribeCallAnalyticsProcessorConfiguration::builder()
            .language_code(aws::CallAnalyticsLanguageCode::from(t.language_code.as_str()))
            .set_vocabulary_name(t.vocabulary_name.clone())
            .set_vocabulary_filter_name(t.vocabulary_filter_name.clone())
            .set_vocabulary_filter_method(
                t.vocabulary_filter_method
                    .as_deref()
                    .map(aws::VocabularyFilterMethod::from),
            )
            .set_language_model_name(t.language_model_name.clone())
            .enable_partial_results_stabilization(t.enable_partial_results_stabilization)
            .set_partial_results_stability(
                t.partial_results_stability
                    .as_deref()
                    .map(aws::PartialResultsStability::from),
            )
            .set_content_identification_type(
                t.content_identification_type.as_deref().map(aws::ContentType::from),
            )
            .set_content_redaction_type(
                t.content_redaction_type.as_deref().map(aws::ContentType::from),
            )
            .set_pii_entity_types(t.pii_entity_types.clone())
            .filter_partial_results(t.filter_partial_results)
            .set_call_analytics_stream_categories(
                (!stream_categories.is_empty()).then(|| stream_categories.to_vec()),
            )
            .set_post_call_analytics_settings(
                post_call.map(expand_post_call_analytics_settings).transpose()?,
            )
            .build()?,
    )
}

fn expand_transcribe_processor(
    transcription: &Transcription,
    show_speaker_label: bool,
) -> aws::AmazonTranscribeProcessorConfiguration {
    let t = transcription;
    aws::AmazonTranscribeProcessorConfiguration::builder()
        .language_code(aws::CallAnalyticsLanguageCode::from(t.language_code.as_str()))
        .set_vocabulary_name(t.vocabulary_name.clone())
        .set_vocabulary_filter_name(t.vocabulary_filter_name.clone())
        .set_vocabulary_filter_method(
            t.vocabulary_filter_method
                .as_deref()
                .map(aws::VocabularyFilterMethod::from),
        )
        .set_language_model_name(t.language_model_name.clone())
        .enable_partial_results_stabilization(t.enable_partial_results_stabilization)
        .set_partial_results_stability(
            t.partial_results_stability
                .as_deref()
                .map(aws::PartialResultsStability::from),
        )
        .set_content_identification_type(
            t.content_identification_type.as_deref().map(aws::ContentType::from),
        )
        .set_content_redaction_type(t.content_redaction_type.as_deref().map(aws::ContentType::from))
        .set_pii_entity_types(t.pii_entity_types.clone())
        .filter_partial_results(t.filter_partial_results)
        .show_speaker_label(show_speaker_label)
        .build()
}

#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum RecordingFileFormat {
    Wav,
    Opus,
}

impl From<RecordingFileFormat> for aws::RecordingFileFormat {
    fn from(value: RecordingFileFormat) -> Self {
        match value {
            RecordingFileFormat::Wav => aws::RecordingFileFormat::Wav,
            RecordingFileFormat::Opus => aws::RecordingFileFormat::Opus,
        }
    }
}

fn voice_analytics_status(enabled: bool) -> aws::VoiceAnalyticsConfigurationStatus {
    if enabled {
        aws::VoiceAnalyticsConfigurationStatus::Enabled
    } else {
        aws::VoiceAnalyticsConfigurationStatus::Disabled
    }
}

fn expand_element(element: &Element) -> Result<aws::MediaInsightsPipelineConfigurationElement> {
    use aws::MediaInsightsPipelineConfigurationElementType as Type;

    let builder = aws::MediaInsightsPipelineConfigurationElement::builder();
    let builder = match element {
        Element::KinesisDataStreamSink { insights_target } => builder
            .r#type(Type::KinesisDataStreamSink)
            .kinesis_data_stream_sink_configuration(
                aws::KinesisDataStreamSinkConfiguration::builder()
                    .insights_target(insights_target)
                    .build(),
            ),
        Element::LambdaFunctionSink { insights_target } => builder
            .r#type(Type::LambdaFunctionSink)
            .lambda_function_sink_configuration(
                aws::LambdaFunctionSinkConfiguration::builder()
                    .insights_target(insights_target)
                    .build(),
            ),
        Element::SnsTopicSink { insights_target } => builder
            .r#type(Type::SnsTopicSink)
            .sns_topic_sink_configuration(
                aws::SnsTopicSinkConfiguration::builder()
                    .insights_target(insights_target)
                    .build(),
            ),
        Element::SqsQueueSink { insights_target } => builder
            .r#type(Type::SqsQueueSink)
            .sqs_queue_sink_configuration(
                aws::SqsQueueSinkConfiguration::builder()
                    .insights_target(insights_target)
                    .build(),
            ),
        Element::S3RecordingSink {
            destination,
            recording_file_format,
        } => builder.r#type(Type::S3RecordingSink).s3_recording_sink_configuration(
            aws::S3RecordingSinkConfiguration::builder()
                .destination(destination)
                .set_recording_file_format(recording_file_format.map(Into::into))
                .build(),
        ),
        Element::VoiceAnalyticsProcessor {
            speaker_search_enabled,
            voice_tone_analysis_enabled,
        } => builder
            .r#type(Type::VoiceAnalyticsProcessor)
            .voice_analytics_processor_configuration(
                aws::VoiceAnalyticsProcessorConfiguration::builder()
                    .speaker_search_status(voice_analytics_status(*speaker_search_enabled))
                    .voice_tone_analysis_status(voice_analytics_status(
                        *voice_tone_analysis_enabled,
                    ))
                    .build(),
            ),
        Element::AmazonTranscribeCallAnalyticsProcessor {
            transcription,
            call_analytics_stream_categories,
            post_call_analytics_settings,
        } => builder
            .r#type(Type::AmazonTranscribeCallAnalyticsProcessor)
            .amazon_transcribe_call_analytics_processor_configuration(
                expand_call_analytics_processor(
                    transcription,
                    call_analytics_stream_categories,
                    post_call_analytics_settings.as_ref(),
                )?,
            ),
        Element::AmazonTranscribeProcessor {
            transcription,
            show_speaker_label,
        } => builder
            .r#type(Type::AmazonTranscribeProcessor)
            .amazon_transcribe_processor_configuration(expand_transcribe_processor(
                transcription,
                *show_speaker_label,
            )),
    };
    Ok(builder.build()?)
}

/// Converts an element read from the API. Errs on element kinds this
/// crate doesn't know.
fn flatten_element(element: aws::MediaInsightsPipelineConfigurationElement) -> Result<Element> {
    let target = |target: Option<String>| target.unwrap_or_default();
    if let Some(sink) = element.kinesis_data_stream_sink_configuration {
        return Ok(Element::KinesisDataStreamSink {
            insights_target: target(sink.insights_target),
        });
    }
    if let Some(sink) = element.lambda_function_sink_configuration {
        return Ok(Element::LambdaFunctionSink {
            insights_target: target(sink.insights_target),
        });
    }
    if let Some(sink) = element.sns_topic_sink_configuration {
        return Ok(Element::SnsTopicSink {
            insights_target: target(sink.insights_target),
        });
    }
    if let Some(sink) = element.sqs_queue_sink_configuration {
        return Ok(Element::SqsQueueSink {
            insights_target: target(sink.insights_target),
        });
    }
    if let Some(sink) = element.s3_recording_sink_configuration {
        return Ok(Element::S3RecordingSink {
            destination: target(sink.destination),
            recording_file_format: sink.recording_file_format.and_then(|format| match format {
                aws::RecordingFileFormat::Wav => Some(RecordingFileFormat::Wav),
                aws::RecordingFileFormat::Opus => Some(RecordingFileFormat::Opus),
                _ => None,
            }),
        });
    }
    if let Some(processor) = element.voice_analytics_processor_configuration {
        let enabled = |status: Option<aws::VoiceAnalyticsConfigurationStatus>| {
            status == Some(aws::VoiceAnalyticsConfigurationStatus::Enabled)
        };
        return Ok(Element::VoiceAnalyticsProcessor {
            speaker_search_enabled: enabled(processor.speaker_search_status),
            voice_tone_analysis_enabled: enabled(processor.voice_tone_analysis_status),
        });
    }
    if let Some(processor) = element.amazon_transcribe_call_analytics_processor_configuration {
        return Ok(Element::AmazonTranscribeCallAnalyticsProcessor {
            transcription: Transcription {
                language_code: processor.language_code.as_str().to_owned(),
                vocabulary_name: processor.vocabulary_name,
                vocabulary_filter_name: processor.vocabulary_filter_name,
                vocabulary_filter_method: processor
                    .vocabulary_filter_method
                    .map(|m| m.as_str().to_owned()),
                language_model_name: processor.language_model_name,
                enable_partial_results_stabilization: flag(
                    processor.enable_partial_results_stabilization,
                ),
                partial_results_stability: processor
                    .partial_results_stability
                    .map(|s| s.as_str().to_owned()),
                content_identification_type: processor
                    .content_identification_type
                    .map(|t| t.as_str().to_owned()),
                content_redaction_type: processor
                    .content_redaction_type
                    .map(|t| t.as_str().to_owned()),
                pii_entity_types: processor.pii_entity_types,
                filter_partial_results: flag(processor.filter_partial_results),
            },
            call_analytics_stream_categories: processor
                .call_analytics_stream_categories
                .unwrap_or_default(),
            post_call_analytics_settings: processor
                .post_call_analytics_settings
                .map(flatten_post_call_analytics_settings),
        });
    }
    if let Some(processor) = element.amazon_transcribe_processor_configuration {
        return Ok(Element::AmazonTranscribeProcessor {
            transcription: Transcription {
                language_code: processor
                    .language_code
                    .map(|code| code.as_str().to_owned())
                    .unwrap_or_default(),
                vocabulary_name: processor.vocabulary_name,
                vocabulary_filter_name: processor.vocabulary_filter_name,
                vocabulary_filter_method: processor
                    .vocabulary_filter_method
                    .map(|m| m.as_str().to_owned()),
                language_model_name: processor.language_model_name,
                enable_partial_results_stabilization: flag(
                    processor.enable_partial_results_stabilization,
                ),
                partial_results_stability: processor
                    .partial_results_stability
                    .map(|s| s.as_str().to_owned()),
                content_identification_type: processor
                    .content_identification_type
                    .map(|t| t.as_str().to_owned()),
                content_redaction_type: processor
                    .content_redaction_type
                    .map(|t| t.as_str().to_owned()),
                pii_entity_types: processor.pii_entity_types,
                filter_partial_results: flag(processor.filter_partial_results),
            },
            show_speaker_label: flag(processor.show_speaker_label),
        });
    }
    Err(anyhow::anyhow!("unsupported element type '{}'", element.r#type.as_str()).into())
}

/// A rule that raises a real-time alert.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AlertRule {
    KeywordMatch {
        rule_name: String,
        keywords: Vec<String>,
        #[serde(default)]
        negate: bool,
    },
    Sentiment {
        rule_name: String,
        /// Only `NEGATIVE` is supported by the service.
        sentiment_type: String,
        /// Analysis window, in seconds.
        time_period: i32,
    },
    IssueDetection {
        rule_name: String,
    },
}

#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RealTimeAlertConfiguration {
    #[serde(default)]
    pub disabled: bool,
    pub rules: Vec<AlertRule>,
}

fn expand_rule(rule: &AlertRule) -> Result<aws::RealTimeAlertRule> {
    let builder = aws::RealTimeAlertRule::builder();
    let builder = match rule {
        AlertRule::KeywordMatch {
            rule_name,
            keywords,
            negate,
        } => builder
            .r#type(aws::RealTimeAlertRuleType::KeywordMatch)
            .keyword_match_configuration(
                aws::KeywordMatchConfiguration::builder()
                    .rule_name(rule_name)
                    .set_keywords(Some(keywords.clone()))
                    .negate(*negate)
                    .build()?,
            ),
        AlertRule::Sentiment {
            rule_name,
            sentiment_type,
            time_period,
        } => builder
            .r#type(aws::RealTimeAlertRuleType::Sentiment)
            .sentiment_configuration(
                aws::SentimentConfiguration::builder()
                    .rule_name(rule_name)
                    .sentiment_type(aws::SentimentType::from(sentiment_type.as_str()))
                    .time_period(*time_period)
                    .build()?,
            ),
        AlertRule::IssueDetection { rule_name } => builder
            .r#type(aws::RealTimeAlertRuleType::IssueDetection)
            .issue_detection_configuration(
                aws::IssueDetectionConfiguration::builder()
                    .rule_name(rule_name)
                    .build()?,
            ),
    };
    Ok(builder.build()?)
}

fn flatten_rule(rule: aws::RealTimeAlertRule) -> Result<AlertRule> {
    if let Some(config) = rule.keyword_match_configuration {
        return Ok(AlertRule::KeywordMatch {
            rule_name: config.rule_name,
            keywords: config.keywords,
            negate: flag(config.negate),
        });
    }
    if let Some(config) = rule.sentiment_configuration {
        return Ok(AlertRule::Sentiment {
            rule_name: config.rule_name,
            sentiment_type: config.sentiment_type.as_str().to_owned(),
            time_period: config.time_period,
        });
    }
    if let Some(config) = rule.issue_detection_configuration {
        return Ok(AlertRule::IssueDetection {
            rule_name: config.rule_name,
        });
    }
    Err(anyhow::anyhow!("alert rule '{}' has no configuration", rule.r#type.as_str()).into())
}

fn expand_real_time_alert_configuration(
    config: &RealTimeAlertConfiguration,
) -> Result<aws::RealTimeAlertConfiguration> {
    let rules = config.rules.iter().map(expand_rule).collect::<Result<Vec<_>>>()?;
    Ok(aws::RealTimeAlertConfiguration::builder()
        .disabled(config.disabled)
        .set_rules(Some(rules))
        .build())
}

fn flatten_real_time_alert_configuration(
    config: aws::RealTimeAlertConfiguration,
) -> Result<RealTimeAlertConfiguration> {
    Ok(RealTimeAlertConfiguration {
        disabled: flag(config.disabled),
        rules: config
            .rules
            .unwrap_or_default()
            .into_iter()
            .map(flatten_rule)
            .collect::<Result<_>>()?,
    })
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

/// A reusable configuration of the elements and alerts of a media insights
/// pipeline.
#[derive(HasChanges, Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MediaInsightsPipelineConfiguration {
    #[settle(force_new)]
    pub name: String,
    /// Role the pipeline assumes to reach its sinks.
    pub resource_access_role_arn: String,
    pub elements: Vec<Element>,
    #[serde(default)]
    pub real_time_alert_configuration: Option<RealTimeAlertConfiguration>,
    #[serde(default)]
    pub tags: Tags,
    /// Create and update retry for as long as the access role isn't
    /// assumable yet.
    #[serde(default)]
    #[settle(ignore)]
    pub timeouts: Timeouts,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MediaInsightsPipelineConfigurationOutput {
    pub arn: String,
    pub id: String,
    pub name: String,
    pub resource_access_role_arn: String,
    pub elements: Vec<Element>,
    pub real_time_alert_configuration: Option<RealTimeAlertConfiguration>,
    pub tags_all: Tags,
}

pub async fn find_media_insights_pipeline_configuration_by_id(
    client: &aws_sdk_chimesdkmediapipelines::Client,
    id: &str,
) -> Result<aws::MediaInsightsPipelineConfiguration> {
    let out = client
        .get_media_insights_pipeline_configuration()
        .identifier(id)
        .send()
        .await?;
    finder::required(
        out.media_insights_pipeline_configuration,
        format!("get media insights pipeline configuration {id}"),
    )
}

async fn find_tags(client: &aws_sdk_chimesdkmediapipelines::Client, arn: &str) -> Result<Tags> {
    let out = client.list_tags_for_resource().resource_arn(arn).send().await?;
    Ok(out
        .tags
        .unwrap_or_default()
        .into_iter()
        .map(|tag| (tag.key, tag.value))
        .collect())
}

async fn update_tags(
    client: &aws_sdk_chimesdkmediapipelines::Client,
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

impl MediaInsightsPipelineConfiguration {
    fn expand_elements(&self) -> Result<Vec<aws::MediaInsightsPipelineConfigurationElement>> {
        self.elements.iter().map(expand_element).collect()
    }

    fn expand_alerts(&self) -> Result<Option<aws::RealTimeAlertConfiguration>> {
        self.real_time_alert_configuration
            .as_ref()
            .map(expand_real_time_alert_configuration)
            .transpose()
    }
}

impl Resource for MediaInsightsPipelineConfiguration {
    type Provider = AwsClient;
    type Output = MediaInsightsPipelineConfigurationOutput;

    const NAME: &'static str = "Media Insights Pipeline Configuration";

    fn id(remote: &MediaInsightsPipelineConfigurationOutput) -> String {
        remote.arn.clone()
    }

    async fn create(&self, client: &AwsClient) -> Result<String> {
        let elements = self.expand_elements()?;
        let alerts = self.expand_alerts()?;
        let tags = expand_tags(&client.tags_all(&self.tags))?;

        // The access role may not be assumable until IAM has propagated it.
        let (elements, alerts, tags) = (&elements, &alerts, &tags);
        let timeout = self.timeouts.create_or(CONFIGURATION_TIMEOUT);
        let out = retry::retry_on_code(timeout, FORBIDDEN, || async move {
            Ok::<_, Error>(
                client
                    .chime_media_pipelines
                    .create_media_insights_pipeline_configuration()
                    .media_insights_pipeline_configuration_name(&self.name)
                    .resource_access_role_arn(&self.resource_access_role_arn)
                    .set_elements(Some(elements.clone()))
                    .set_real_time_alert_configuration(alerts.clone())
                    .set_tags(tags.clone())
                    .send()
                    .await?,
            )
        })
        .await?;

        let config = finder::required(
            out.media_insights_pipeline_configuration,
            "create media insights pipeline configuration",
        )?;
        finder::required(
            config.media_insights_pipeline_configuration_arn,
            "media insights pipeline configuration arn",
        )
    }

    async fn read(
        &self,
        client: &AwsClient,
        id: &str,
    ) -> Result<MediaInsightsPipelineConfigurationOutput> {
        let config =
            find_media_insights_pipeline_configuration_by_id(&client.chime_media_pipelines, id)
                .await?;
        let arn = config
            .media_insights_pipeline_configuration_arn
            .unwrap_or_else(|| id.to_owned());
        let tags_all = find_tags(&client.chime_media_pipelines, &arn).await?;
        Ok(MediaInsightsPipelineConfigurationOutput {
            id: config
                .media_insights_pipeline_configuration_id
                .unwrap_or_default(),
            name: config
                .media_insights_pipeline_configuration_name
                .unwrap_or_default(),
            resource_access_role_arn: config.resource_access_role_arn.unwrap_or_default(),
            elements: config
                .elements
                .unwrap_or_default()
                .into_iter()
                .map(flatten_element)
                .collect::<Result<_>>()?,
            real_time_alert_configuration: config
                .real_time_alert_configuration
                .map(flatten_real_time_alert_configuration)
                .transpose()?,
            tags_all,
            arn,
        })
    }

    async fn update(
        &self,
        client: &AwsClient,
        previous_local: &Self,
        previous_remote: &MediaInsightsPipelineConfigurationOutput,
    ) -> Result<MediaInsightsPipelineConfigurationOutput> {
        let arn = previous_remote.arn.as_str();
        let changes = self.changes(previous_local);
        if changes.fields().iter().any(|field| *field != "tags") {
            let elements = &self.expand_elements()?;
            let alerts = &self.expand_alerts()?;
            let timeout = self.timeouts.update_or(CONFIGURATION_TIMEOUT);
            retry::retry_on_code(timeout, FORBIDDEN, || async move {
                Ok::<_, Error>(
                    client
                        .chime_media_pipelines
                        .update_media_insights_pipeline_configuration()
                        .identifier(arn)
                        .resource_access_role_arn(&self.resource_access_role_arn)
                        .set_elements(Some(elements.clone()))
                        .set_real_time_alert_configuration(alerts.clone())
                        .send()
                        .await?,
                )
            })
            .await?;
        }

        let diff = TagsDiff::new(&previous_remote.tags_all, &client.tags_all(&self.tags));
        update_tags(&client.chime_media_pipelines, arn, &diff).await?;

        self.read(client, arn).await
    }

    async fn delete(
        &self,
        client: &AwsClient,
        remote: &MediaInsightsPipelineConfigurationOutput,
    ) -> Result<()> {
        log::info!("deleting media insights pipeline configuration {}", remote.arn);
        let deleted = client
            .chime_media_pipelines
            .delete_media_insights_pipeline_configuration()
            .identifier(&remote.arn)
            .send()
            .await;
        finder::ignore_not_found(deleted.map(|_| ()).map_err(Into::into))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn definition() -> MediaInsightsPipelineConfiguration {
        serde_json::from_str(
            r#"{
                "name": "calls",
                "resource_access_role_arn": "arn:aws:iam::123456789012:role/calls",
                "elements": [
                    {
                        "type": "voice_analytics_processor",
                        "speaker_search_enabled": true,
                        "voice_tone_analysis_enabled": false
                    },
                    {
                        "type": "kinesis_data_stream_sink",
                        "insights_target": "arn:aws:kinesis:us-east-1:123456789012:stream/calls"
                    },
                    {
                        "type": "s3_recording_sink",
                        "destination": "arn:aws:s3:::recordings",
                        "recording_file_format": "Wav"
                    }
                ],
                "real_time_alert_configuration": {
                    "rules": [
                        { "type": "issue_detection", "rule_name": "issues" },
                        { "type": "keyword_match", "rule_name": "angry", "keywords": ["refund"] },
                        {
                            "type": "sentiment",
                            "rule_name": "negative",
                            "sentiment_type": "NEGATIVE",
                            "time_period": 60
                        }
                    ]
                }
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn definition_parses_sum_types() {
        let config = definition();
        assert_eq!(3, config.elements.len());
        assert_eq!(
            Element::VoiceAnalyticsProcessor {
                speaker_search_enabled: true,
                voice_tone_analysis_enabled: false
            },
            config.elements[0]
        );
        let alerts = config.real_time_alert_configuration.unwrap();
        assert!(!alerts.disabled);
        assert_eq!(
            AlertRule::KeywordMatch {
                rule_name: "angry".into(),
                keywords: vec!["refund".into()],
                negate: false
            },
            alerts.rules[1]
        );
    }

    #[test]
    fn elements_round_trip_through_the_sdk() {
        let config = definition();
        let expanded = config.expand_elements().unwrap();
        assert_eq!(
            aws::MediaInsightsPipelineConfigurationElementType::VoiceAnalyticsProcessor,
            expanded[0].r#type
        );
        assert_eq!(
            Some(aws::VoiceAnalyticsConfigurationStatus::Enabled),
            expanded[0]
                .voice_analytics_processor_configuration
                .as_ref()
                .and_then(|c| c.speaker_search_status.clone())
        );
        let flattened = expanded
            .into_iter()
            .map(flatten_element)
            .collect::<Result<Vec<_>>>()
            .unwrap();
        pretty_assertions::assert_eq!(config.elements, flattened);
    }

    #[test]
    fn alert_rules_round_trip_through_the_sdk() {
        let alerts = definition().real_time_alert_configuration.unwrap();
        let expanded = expand_real_time_alert_configuration(&alerts).unwrap();
        let flattened = flatten_real_time_alert_configuration(expanded).unwrap();
        pretty_assertions::assert_eq!(alerts, flattened);
    }

    #[test]
    fn unknown_elements_are_errors() {
        let element = aws::MediaInsightsPipelineConfigurationElement::builder()
            .r#type(aws::MediaInsightsPipelineConfigurationElementType::from("FutureSink"))
            .build()
            .unwrap();
        let err = flatten_element(element).unwrap_err();
        assert!(err.to_string().contains("FutureSink"), "{err}");
    }

    fn transcribe_elements() -> Vec<Element> {
        serde_json::from_str(
            r#"[
                {
                    "type": "amazon_transcribe_call_analytics_processor",
                    "language_code": "en-US",
                    "vocabulary_filter_name": "profanity",
                    "vocabulary_filter_method": "mask",
                    "enable_partial_results_stabilization": true,
                    "partial_results_stability": "high",
                    "content_redaction_type": "PII",
                    "pii_entity_types": "NAME,ADDRESS",
                    "call_analytics_stream_categories": ["positive-callers"],
                    "post_call_analytics_settings": {
                        "output_location": "s3://calls/analytics",
                        "data_access_role_arn": "arn:aws:iam::123456789012:role/transcribe",
                        "content_redaction_output": "redacted"
                    }
                },
                {
                    "type": "amazon_transcribe_processor",
                    "language_code": "en-GB",
                    "vocabulary_name": "products",
                    "content_identification_type": "PII",
                    "filter_partial_results": true,
                    "show_speaker_label": true
                }
            ]"#,
        )
        .unwrap()
    }

    #[test]
    fn transcribe_processors_parse() {
        let elements = transcribe_elements();
        let Element::AmazonTranscribeCallAnalyticsProcessor {
            transcription,
            call_analytics_stream_categories,
            post_call_analytics_settings,
        } = &elements[0]
        else {
            panic!("expected a call analytics processor, got {:?}", elements[0]);
        };
        assert_eq!("en-US", transcription.language_code);
        assert!(transcription.enable_partial_results_stabilization);
        assert!(!transcription.filter_partial_results);
        assert_eq!(&["positive-callers".to_owned()], call_analytics_stream_categories.as_slice());
        assert_eq!(
            Some("redacted"),
            post_call_analytics_settings
                .as_ref()
                .and_then(|s| s.content_redaction_output.as_deref())
        );

        let Element::AmazonTranscribeProcessor {
            transcription,
            show_speaker_label,
        } = &elements[1]
        else {
            panic!("expected a transcribe processor, got {:?}", elements[1]);
        };
        assert_eq!(Some("products"), transcription.vocabulary_name.as_deref());
        assert!(show_speaker_label);
    }

    #[test]
    fn transcribe_processors_round_trip_through_the_sdk() {
        let elements = transcribe_elements();
        let expanded = elements
            .iter()
            .map(expand_element)
            .collect::<Result<Vec<_>>>()
            .unwrap();

        let call_analytics = expanded[0]
            .amazon_transcribe_call_analytics_processor_configuration
            .as_ref()
            .unwrap();
        assert_eq!(aws::CallAnalyticsLanguageCode::EnUs, call_analytics.language_code);
        assert_eq!(
            Some(&aws::VocabularyFilterMethod::Mask),
            call_analytics.vocabulary_filter_method.as_ref()
        );
        assert_eq!(
            Some(&aws::ContentRedactionOutput::Redacted),
            call_analytics
                .post_call_analytics_settings
                .as_ref()
                .and_then(|s| s.content_redaction_output.as_ref())
        );
        assert_eq!(
            aws::MediaInsightsPipelineConfigurationElementType::AmazonTranscribeProcessor,
            expanded[1].r#type
        );

        let flattened = expanded
            .into_iter()
            .map(flatten_element)
            .collect::<Result<Vec<_>>>()
            .unwrap();
        pretty_assertions::assert_eq!(elements, flattened);
    }

    #[test]
    fn post_call_analytics_needs_an_output_location() {
        let err = serde_json::from_str::<PostCallAnalyticsSettings>(
            r#"{ "data_access_role_arn": "arn:aws:iam::123456789012:role/transcribe" }"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("output_location"), "{err}");
    }

    #[test]
    fn timeouts_are_not_changes() {
        let previous = definition();
        let mut next = previous.clone();
        next.timeouts.create = Some(Duration::from_secs(600));
        assert!(next.changes(&previous).is_empty());
    }

    #[test]
    fn tag_changes_alone_skip_the_configuration_update() {
        let previous = definition();
        let mut next = previous.clone();
        next.tags.insert("team".into(), "contact-center".into());
        assert_eq!(&["tags"], next.changes(&previous).fields());
        assert!(!next.changes(&previous).requires_replace());

        next.name = "other".into();
        assert!(next.changes(&previous).requires_replace());
    }
}
