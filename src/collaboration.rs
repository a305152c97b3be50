//! Collaboration API wrappers: channels, messages, search and agent metadata.
//!
//! Each call is a single request through [`ApiClient::execute`]; the
//! executor handles authentication and the 401 retry.

use std::collections::BTreeMap;

use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::client::{ApiClient, ApiError, ApiRequest};

const CHANNELS_PATH: &str = "/Collaboration/v1/Channels";
const SEARCH_PATH: &str = "/Collaboration/v1/Channels/Search";
const METADATA_PATH: &str = "/Collaboration/v1/MetaData";

/// Key/value pair in the service's dictionary encoding.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct KeyValue {
    pub key: String,
    #[serde(default)]
    pub value: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Channel {
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub email_address: Option<String>,
    #[serde(default)]
    pub can_accept_files: bool,
    #[serde(default)]
    pub is_read_only: bool,
    #[serde(default, rename = "MetaData", deserialize_with = "dictionary")]
    pub metadata: BTreeMap<String, String>,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Message {
    pub id: String,
    #[serde(default)]
    pub is_alert: bool,
    pub sender_id: String,
    #[serde(default)]
    pub sender_alias: Option<String>,
    #[serde(default)]
    pub channel_id: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    pub text: String,
    #[serde(default)]
    pub message_parts: Value,
    pub timestamp: i64,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub classification: Option<Value>,
    #[serde(default, alias = "SecurityContext")]
    pub security_contexts: Option<Value>,
    #[serde(default)]
    pub data_attributes: Option<Value>,
}

/// Messages matched in one channel by [`CollaborationClient::search_channels`].
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SearchResultSet {
    pub channel_id: String,
    pub count: u32,
    pub max_message_id: String,
    pub min_message_id: String,
    pub messages: Vec<Message>,
}

/// Time window of a message search.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum SearchWindow {
    DaysBack {
        #[serde(rename = "DaysBack")]
        days_back: u32,
    },
    OnDate {
        #[serde(rename = "OnDate")]
        on_date: String,
    },
    Between {
        #[serde(rename = "FromDate")]
        from_date: String,
        #[serde(rename = "ToDate")]
        to_date: String,
    },
}

/// Search request for [`CollaborationClient::search_channels`].
///
/// Dates are passed through to the service as given.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct MessageSearchCriteria {
    pub search_term: String,
    pub match_case: bool,
    /// Match the term as a phrase rather than as separate words.
    pub match_exact: bool,
    /// Require every word of the term instead of any one.
    pub match_all: bool,
    pub limit: u32,
    pub channel_ids: Vec<String>,
    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    pub window: Option<SearchWindow>,
}

impl MessageSearchCriteria {
    /// Any-word, case-insensitive search over `channel_ids` with no window.
    pub fn new<I, S>(search_term: impl Into<String>, limit: u32, channel_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            search_term: search_term.into(),
            match_case: false,
            match_exact: false,
            match_all: false,
            limit,
            channel_ids: channel_ids.into_iter().map(Into::into).collect(),
            window: None,
        }
    }

    pub fn days_back(mut self, days_back: u32) -> Self {
        self.window = Some(SearchWindow::DaysBack { days_back });
        self
    }

    pub fn on_date(mut self, on_date: impl Into<String>) -> Self {
        self.window = Some(SearchWindow::OnDate {
            on_date: on_date.into(),
        });
        self
    }

    pub fn between(mut self, from_date: impl Into<String>, to_date: impl Into<String>) -> Self {
        self.window = Some(SearchWindow::Between {
            from_date: from_date.into(),
            to_date: to_date.into(),
        });
        self
    }
}

/// Security classification attached to an outgoing message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(
    tag = "__type",
    rename = "Classification:http://schemas.fcg.im/foundation/v1/collaboration"
)]
pub struct Classification {
    #[serde(rename = "Token")]
    pub token: String,
}

impl Classification {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

/// Community of interest an outgoing message is restricted to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(
    tag = "__type",
    rename = "SecurityContext:http://schemas.fcg.im/foundation/v1/collaboration"
)]
pub struct SecurityContext {
    #[serde(rename = "Id")]
    pub id: String,
}

impl SecurityContext {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// Rich message segment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "__type")]
pub enum MessagePart {
    #[serde(
        rename = "PlainTextMessagePart:http://schemas.fcg.im/foundation/v1/collaboration",
        rename_all = "PascalCase"
    )]
    PlainText { text: String },
    #[serde(
        rename = "HyperlinkMessagePart:http://schemas.fcg.im/foundation/v1/collaboration",
        rename_all = "PascalCase"
    )]
    Hyperlink { text: String, url: String },
    #[serde(
        rename = "ChannelLinkMessagePart:http://schemas.fcg.im/foundation/v1/collaboration",
        rename_all = "PascalCase"
    )]
    ChannelLink {
        channel_name: String,
        channel_id: String,
    },
    #[serde(
        rename = "HashtagMessagePart:http://schemas.fcg.im/foundation/v1/collaboration",
        rename_all = "PascalCase"
    )]
    Hashtag { hashtag: String },
    #[serde(
        rename = "CodeBlockMessagePart:http://schemas.fcg.im/foundation/v1/collaboration",
        rename_all = "PascalCase"
    )]
    CodeBlock { code_block: String },
}

/// Body of a message post.
///
/// Either `text` or `message_parts` carries the content; servers older than
/// 18.6 only accept `text`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct OutgoingMessage {
    pub is_alert: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub message_parts: Vec<MessagePart>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classification: Option<Classification>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub security_contexts: Vec<SecurityContext>,
}

impl OutgoingMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn parts(parts: impl IntoIterator<Item = MessagePart>) -> Self {
        Self {
            message_parts: parts.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn alert(mut self) -> Self {
        self.is_alert = true;
        self
    }

    /// Turns the message into a story.
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn with_classification(mut self, classification: Classification) -> Self {
        self.classification = Some(classification);
        self
    }

    pub fn with_security_context(mut self, context: SecurityContext) -> Self {
        self.security_contexts.push(context);
        self
    }
}

/// Presence of the agent's counterpart in a channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresenceState {
    Unknown,
    Available,
    AvailableIdle,
    Busy,
    BusyIdle,
    DoNotDisturb,
    BeRightBack,
    Away,
    Offline,
}

impl PresenceState {
    /// Maps the service's numeric presence code; unrecognised codes are
    /// `Unknown`.
    pub fn from_code(code: i64) -> Self {
        match code {
            100 => Self::Available,
            150 => Self::AvailableIdle,
            200 => Self::Busy,
            250 => Self::BusyIdle,
            300 => Self::DoNotDisturb,
            400 => Self::BeRightBack,
            500 => Self::Away,
            600 => Self::Offline,
            _ => Self::Unknown,
        }
    }
}

impl<'de> Deserialize<'de> for PresenceState {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        Ok(Self::from_code(i64::deserialize(deserializer)?))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ChannelState {
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(rename = "PresenceState")]
    pub presence: PresenceState,
    #[serde(default)]
    pub presence_text: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct ComposingStateRequest {
    is_composing: bool,
}

/// Channel and metadata calls on behalf of the authenticated agent.
#[derive(Clone, Debug)]
pub struct CollaborationClient {
    api: ApiClient,
}

impl CollaborationClient {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub async fn send_message(&self, channel_id: &str, text: &str) -> Result<(), ApiError> {
        self.send(channel_id, &OutgoingMessage::text(text)).await
    }

    pub async fn send_alert(&self, channel_id: &str, text: &str) -> Result<(), ApiError> {
        self.send(channel_id, &OutgoingMessage::text(text).alert())
            .await
    }

    /// Sends a story: a message with a subject line.
    pub async fn send_story(
        &self,
        channel_id: &str,
        subject: &str,
        text: &str,
    ) -> Result<(), ApiError> {
        self.send(channel_id, &OutgoingMessage::text(text).with_subject(subject))
            .await
    }

    /// Sends a plain message carrying a classification and security contexts.
    pub async fn send_message_with_metadata(
        &self,
        channel_id: &str,
        text: &str,
        classification: Option<Classification>,
        security_contexts: impl IntoIterator<Item = SecurityContext>,
    ) -> Result<(), ApiError> {
        let mut message = OutgoingMessage::text(text);
        message.classification = classification;
        message.security_contexts.extend(security_contexts);
        self.send(channel_id, &message).await
    }

    pub async fn send_message_parts(
        &self,
        channel_id: &str,
        parts: impl IntoIterator<Item = MessagePart>,
    ) -> Result<(), ApiError> {
        self.send(channel_id, &OutgoingMessage::parts(parts)).await
    }

    pub async fn send(&self, channel_id: &str, message: &OutgoingMessage) -> Result<(), ApiError> {
        let body = serde_json::to_string(message).map_err(ApiError::Encode)?;
        self.api
            .execute(
                Method::POST,
                &channel_path(channel_id, "/Messages"),
                Some(&body),
            )
            .await?;
        Ok(())
    }

    /// Searches the channels named in `criteria`; one result set per channel.
    pub async fn search_channels(
        &self,
        criteria: &MessageSearchCriteria,
    ) -> Result<Vec<SearchResultSet>, ApiError> {
        self.get_json(ApiRequest::post(SEARCH_PATH).with_json(criteria)?)
            .await
    }

    pub async fn channels(&self) -> Result<Vec<Channel>, ApiError> {
        self.get_json(ApiRequest::get(CHANNELS_PATH)).await
    }

    pub async fn channel(&self, channel_id: &str) -> Result<Channel, ApiError> {
        self.get_json(ApiRequest::get(channel_path(channel_id, ""))).await
    }

    pub async fn channel_state(&self, channel_id: &str) -> Result<ChannelState, ApiError> {
        self.get_json(ApiRequest::get(channel_path(channel_id, "/State")))
            .await
    }

    /// Returns up to `take` recent messages, optionally only those before the
    /// message identified by `before`.
    pub async fn channel_history(
        &self,
        channel_id: &str,
        take: u32,
        before: Option<&str>,
    ) -> Result<Vec<Message>, ApiError> {
        let mut request = ApiRequest::get(channel_path(channel_id, "/Messages"))
            .with_query("take", take.to_string());
        if let Some(before) = before {
            request = request.with_query("before", before);
        }
        self.get_json(request).await
    }

    /// Agent metadata as a key/value map.
    pub async fn metadata(&self) -> Result<BTreeMap<String, String>, ApiError> {
        let entries: Vec<KeyValue> = self.get_json(ApiRequest::get(METADATA_PATH)).await?;
        Ok(collect_dictionary(entries))
    }

    /// Updates whether the agent shows as composing in a channel.
    pub async fn set_composing(&self, channel_id: &str, is_composing: bool) -> Result<(), ApiError> {
        let request = ApiRequest::post(channel_path(channel_id, "/Me"))
            .with_json(&ComposingStateRequest { is_composing })?;
        self.api.send(&request, true).await?;
        Ok(())
    }

    async fn get_json<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T, ApiError> {
        let body = self.api.send(&request, true).await?;
        serde_json::from_str(&body).map_err(ApiError::Decode)
    }
}

fn channel_path(channel_id: &str, suffix: &str) -> String {
    format!("{CHANNELS_PATH}/{channel_id}{suffix}")
}

fn collect_dictionary(entries: Vec<KeyValue>) -> BTreeMap<String, String> {
    entries
        .into_iter()
        .map(|entry| (entry.key, entry.value.unwrap_or_default()))
        .collect()
}

fn dictionary<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let entries = Option::<Vec<KeyValue>>::deserialize(deserializer)?;
    Ok(collect_dictionary(entries.unwrap_or_default()))
}
