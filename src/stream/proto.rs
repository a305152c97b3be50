use std::fmt;

use serde::{Deserialize, Deserializer};
use serde_json::Value;
use thiserror::Error;

const TYPE_FIELD: &str = "__type";

/// Event categories accepted by the events endpoint filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EventType {
    Message,
    MetaData,
    ChannelState,
}

impl EventType {
    pub const ALL: [EventType; 3] = [Self::Message, Self::MetaData, Self::ChannelState];

    /// Token used for this type in the `types` query parameter.
    pub fn request_form(self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::MetaData => "meta-data",
            Self::ChannelState => "channel-state",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.request_form())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MessageEvent {
    pub event_id: u64,
    #[serde(default, deserialize_with = "lenient_time")]
    pub time: i64,
    pub channel_id: String,
    #[serde(rename = "Sender")]
    pub sender_id: String,
    #[serde(default, deserialize_with = "non_empty_string")]
    pub sender_alias: Option<String>,
    /// Present only for stories.
    #[serde(default, deserialize_with = "non_empty_string")]
    pub subject: Option<String>,
    #[serde(default, deserialize_with = "string_or_empty")]
    pub content: String,
    #[serde(default)]
    pub message_parts: Value,
    #[serde(default, deserialize_with = "non_empty_string")]
    pub token: Option<String>,
    #[serde(default)]
    pub classification: Option<Value>,
    #[serde(default, alias = "SecurityContext")]
    pub security_contexts: Option<Value>,
    #[serde(default)]
    pub data_attributes: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MetaDataEvent {
    pub event_id: u64,
    #[serde(default, deserialize_with = "lenient_time")]
    pub time: i64,
    pub key: String,
    /// `None` means the key was deleted.
    #[serde(default)]
    pub value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ChannelStateEvent {
    pub event_id: u64,
    #[serde(default, deserialize_with = "lenient_time")]
    pub time: i64,
    pub channel_id: String,
    pub active: bool,
}

/// Event decoded from the events endpoint.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Message(MessageEvent),
    MetaData(MetaDataEvent),
    ChannelState(ChannelStateEvent),
}

impl Event {
    pub fn event_id(&self) -> u64 {
        match self {
            Self::Message(event) => event.event_id,
            Self::MetaData(event) => event.event_id,
            Self::ChannelState(event) => event.event_id,
        }
    }

    pub fn time(&self) -> i64 {
        match self {
            Self::Message(event) => event.time,
            Self::MetaData(event) => event.time,
            Self::ChannelState(event) => event.time,
        }
    }

    pub fn event_type(&self) -> EventType {
        match self {
            Self::Message(_) => EventType::Message,
            Self::MetaData(_) => EventType::MetaData,
            Self::ChannelState(_) => EventType::ChannelState,
        }
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("event payload has no __type tag")]
    MissingType,

    #[error("unknown event type: {0}")]
    UnknownEventType(String),

    #[error("malformed event payload: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("events response is not a json array: {0}")]
    NotAnArray(#[source] serde_json::Error),
}

/// Decodes one tagged event object.
///
/// Anything after the first `:` in the `__type` tag is a schema qualifier
/// and is ignored.
pub fn decode_event(raw: &Value) -> Result<Event, DecodeError> {
    let tag = raw
        .get(TYPE_FIELD)
        .and_then(Value::as_str)
        .ok_or(DecodeError::MissingType)?;
    let name = tag.split(':').next().unwrap_or_default();

    match name {
        "MessageEvent" => variant(raw).map(Event::Message),
        "MetaDataEvent" => variant(raw).map(Event::MetaData),
        "ChannelStateEvent" => variant(raw).map(Event::ChannelState),
        _ => Err(DecodeError::UnknownEventType(name.to_string())),
    }
}

/// Parses an events response body into its raw elements.
pub fn parse_event_batch(body: &str) -> Result<Vec<Value>, DecodeError> {
    serde_json::from_str(body).map_err(DecodeError::NotAnArray)
}

fn variant<T: for<'de> Deserialize<'de>>(raw: &Value) -> Result<T, DecodeError> {
    T::deserialize(raw).map_err(DecodeError::Malformed)
}

fn lenient_time<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(Value::as_i64).unwrap_or(0))
}

fn non_empty_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|text| !text.is_empty()))
}

fn string_or_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}
