//! Channel Messages
//!
//! Wire envelope `{type, payload?, channel?, timestamp?}` and the typed
//! events it is decoded into at the channel boundary.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, SyncError};
use crate::state::Severity;

// == Message Type Names ==
pub const AUTH: &str = "auth";
pub const PING: &str = "ping";
pub const PONG: &str = "pong";
pub const NEW_MESSAGE: &str = "new_message";
pub const NEW_ANNOUNCEMENT: &str = "new_announcement";
pub const USER_ONLINE: &str = "user_online";
pub const USER_OFFLINE: &str = "user_offline";
pub const DATA_UPDATED: &str = "data_updated";
pub const NOTIFICATION: &str = "notification";

// == Wire Envelope ==
/// Raw message as sent over the socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
}

// == Payloads ==
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthPayload {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMessagePayload {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub sender_id: Option<String>,
    #[serde(default)]
    pub preview: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnouncementPayload {
    #[serde(default)]
    pub id: Option<Value>,
    pub title: String,
    #[serde(default)]
    pub important: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresencePayload {
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataUpdatedPayload {
    /// Resource collection name, e.g. `announcements`
    pub resource: String,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub id: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPayload {
    #[serde(default = "default_severity")]
    pub severity: Severity,
    pub message: String,
}

fn default_severity() -> Severity {
    Severity::Info
}

// == Channel Event ==
/// A decoded channel message. Each known type has exactly one payload shape.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Auth(AuthPayload),
    Ping,
    Pong,
    NewMessage(NewMessagePayload),
    NewAnnouncement(AnnouncementPayload),
    UserOnline(PresencePayload),
    UserOffline(PresencePayload),
    DataUpdated(DataUpdatedPayload),
    Notification(NotificationPayload),
    /// Unknown type, kept as-is for subscribers
    Other { kind: String, payload: Option<Value> },
}

impl ChannelEvent {
    /// Wire `type` of the event.
    pub fn kind(&self) -> &str {
        match self {
            ChannelEvent::Auth(_) => AUTH,
            ChannelEvent::Ping => PING,
            ChannelEvent::Pong => PONG,
            ChannelEvent::NewMessage(_) => NEW_MESSAGE,
            ChannelEvent::NewAnnouncement(_) => NEW_ANNOUNCEMENT,
            ChannelEvent::UserOnline(_) => USER_ONLINE,
            ChannelEvent::UserOffline(_) => USER_OFFLINE,
            ChannelEvent::DataUpdated(_) => DATA_UPDATED,
            ChannelEvent::Notification(_) => NOTIFICATION,
            ChannelEvent::Other { kind, .. } => kind,
        }
    }

    /// Decodes a wire message, validating the payload for known types.
    pub fn decode(wire: &WireMessage) -> Result<Self> {
        let event = match wire.kind.as_str() {
            AUTH => ChannelEvent::Auth(payload(wire)?),
            PING => ChannelEvent::Ping,
            PONG => ChannelEvent::Pong,
            NEW_MESSAGE => ChannelEvent::NewMessage(payload_or_default(wire)?),
            NEW_ANNOUNCEMENT => ChannelEvent::NewAnnouncement(payload(wire)?),
            USER_ONLINE => ChannelEvent::UserOnline(payload(wire)?),
            USER_OFFLINE => ChannelEvent::UserOffline(payload(wire)?),
            DATA_UPDATED => ChannelEvent::DataUpdated(payload(wire)?),
            NOTIFICATION => ChannelEvent::Notification(payload(wire)?),
            other => ChannelEvent::Other {
                kind: other.to_string(),
                payload: wire.payload.clone(),
            },
        };
        Ok(event)
    }

    /// Builds the wire envelope for this event.
    pub fn encode(&self, channel: Option<String>, timestamp: u64) -> Result<WireMessage> {
        let payload = match self {
            ChannelEvent::Auth(p) => Some(to_value(p)?),
            ChannelEvent::Ping | ChannelEvent::Pong => None,
            ChannelEvent::NewMessage(p) => Some(to_value(p)?),
            ChannelEvent::NewAnnouncement(p) => Some(to_value(p)?),
            ChannelEvent::UserOnline(p) | ChannelEvent::UserOffline(p) => Some(to_value(p)?),
            ChannelEvent::DataUpdated(p) => Some(to_value(p)?),
            ChannelEvent::Notification(p) => Some(to_value(p)?),
            ChannelEvent::Other { payload, .. } => payload.clone(),
        };
        Ok(WireMessage {
            kind: self.kind().to_string(),
            payload,
            channel,
            timestamp: Some(timestamp),
        })
    }
}

// == Inbound Message ==
/// What subscribers receive: the decoded event plus envelope metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub event: ChannelEvent,
    pub channel: Option<String>,
    pub timestamp: Option<u64>,
}

impl InboundMessage {
    /// Parses raw socket text into a typed message.
    pub fn parse(text: &str) -> Result<Self> {
        let wire: WireMessage = serde_json::from_str(text)
            .map_err(|e| SyncError::Channel(format!("malformed channel message: {e}")))?;
        Ok(Self {
            event: ChannelEvent::decode(&wire)?,
            channel: wire.channel,
            timestamp: wire.timestamp,
        })
    }
}

fn payload<T: DeserializeOwned>(wire: &WireMessage) -> Result<T> {
    let value = wire
        .payload
        .clone()
        .ok_or_else(|| SyncError::Channel(format!("'{}' message without payload", wire.kind)))?;
    serde_json::from_value(value)
        .map_err(|e| SyncError::Channel(format!("invalid '{}' payload: {e}", wire.kind)))
}

fn payload_or_default<T: DeserializeOwned>(wire: &WireMessage) -> Result<T> {
    let value = wire
        .payload
        .clone()
        .unwrap_or_else(|| Value::Object(Default::default()));
    serde_json::from_value(value)
        .map_err(|e| SyncError::Channel(format!("invalid '{}' payload: {e}", wire.kind)))
}

fn to_value<T: Serialize>(payload: &T) -> Result<Value> {
    serde_json::to_value(payload).map_err(|e| SyncError::Channel(e.to_string()))
}
