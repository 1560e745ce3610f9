//! Broker destinations and the JSON payloads exchanged on them.

use serde::{Deserialize, Serialize};

use crate::{
    domain::{DirectMessage, PresenceMap, UserId},
    error::PayloadError,
};

/// Shared topic carrying full presence snapshots.
pub const USERS_TOPIC: &str = "/topic/users";
pub const JOIN_DESTINATION: &str = "/app/chat.join";
pub const LEAVE_DESTINATION: &str = "/app/chat.leave";
pub const SEND_DESTINATION: &str = "/app/chat.send";

const PRIVATE_QUEUE_PREFIX: &str = "/queue/messages/";

/// Private queue that only receives messages addressed to `user`.
pub fn private_queue(user: &UserId) -> String {
    format!("{PRIVATE_QUEUE_PREFIX}{user}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnnouncementKind {
    Join,
    Leave,
}

impl AnnouncementKind {
    pub fn destination(self) -> &'static str {
        match self {
            Self::Join => JOIN_DESTINATION,
            Self::Leave => LEAVE_DESTINATION,
        }
    }
}

/// `{sender, type}` body published when a user joins or leaves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Announcement {
    pub sender: UserId,
    #[serde(rename = "type")]
    pub kind: AnnouncementKind,
}

impl Announcement {
    pub fn join(sender: UserId) -> Self {
        Self {
            sender,
            kind: AnnouncementKind::Join,
        }
    }

    pub fn leave(sender: UserId) -> Self {
        Self {
            sender,
            kind: AnnouncementKind::Leave,
        }
    }
}

/// `{sender, receiver, content}` body published to [`SEND_DESTINATION`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendMessageRequest {
    pub sender: UserId,
    pub receiver: UserId,
    pub content: String,
}

impl From<&DirectMessage> for SendMessageRequest {
    fn from(message: &DirectMessage) -> Self {
        Self {
            sender: message.sender.clone(),
            receiver: message.receiver.clone(),
            content: message.content.clone(),
        }
    }
}

/// Inbound frame as the broker delivers it. Brokers may attach extra fields
/// (`type`, `timestamp`), which are ignored.
#[derive(Debug, Deserialize)]
struct InboundMessage {
    #[serde(default)]
    sender: Option<UserId>,
    #[serde(default)]
    receiver: Option<UserId>,
    #[serde(default)]
    content: Option<String>,
}

pub fn decode_direct_message(body: &str) -> Result<DirectMessage, PayloadError> {
    let inbound: InboundMessage =
        serde_json::from_str(body).map_err(|err| PayloadError::json("direct message", err))?;

    match (inbound.sender, inbound.receiver) {
        (Some(sender), Some(receiver)) if !sender.0.is_empty() && !receiver.0.is_empty() => Ok(
            DirectMessage::new(sender, receiver, inbound.content.unwrap_or_default()),
        ),
        _ => Err(PayloadError::MissingParticipant),
    }
}

pub fn decode_presence(body: &str) -> Result<PresenceMap, PayloadError> {
    serde_json::from_str(body).map_err(|err| PayloadError::json("presence", err))
}
