//! Value types exchanged with the automation client.

use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::types::Identifier;

/// The logged-in account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileInfo {
    pub push_name: Option<String>,
    pub number: String,
    pub platform: String,
    pub server: String,
}

/// Product/order fields some business messages carry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_amount_1000: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_currency_code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastMessage {
    pub body: String,
    pub timestamp: i64,
    pub from_me: bool,
    #[serde(rename = "type")]
    pub kind: String,
}

/// One entry of the chat list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSummary {
    pub id: Identifier,
    pub name: Option<String>,
    /// Best known phone number; defaults to the id's local part.
    pub phone_number: String,
    pub unread_count: u32,
    pub last_message: Option<LastMessage>,
    pub is_group: bool,
    pub timestamp: i64,
    #[serde(default)]
    pub labels: Vec<String>,
}

/// One message from a chat's recent window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    pub id: String,
    pub body: String,
    pub from_me: bool,
    pub timestamp: i64,
    #[serde(rename = "type")]
    pub kind: String,
    pub ack: i32,
    pub has_media: bool,
    pub author: Option<String>,
    #[serde(flatten)]
    pub order: OrderMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Label {
    pub id: String,
    pub name: String,
    pub hex_color: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupParticipant {
    pub id: Identifier,
    pub is_admin: bool,
    pub is_super_admin: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupMetadata {
    pub id: Identifier,
    pub name: String,
    pub description: Option<String>,
    pub owner: Option<Identifier>,
    pub participants: Vec<GroupParticipant>,
    pub creation: Option<i64>,
}

/// Result of creating a group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedGroup {
    pub id: Identifier,
    pub title: String,
    /// Participants the platform refused to add, keyed by id.
    #[serde(default)]
    pub missing_participants: Vec<Identifier>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactInfo {
    pub id: Identifier,
    pub name: Option<String>,
    pub pushname: Option<String>,
    pub number: Option<String>,
    pub is_business: bool,
    pub is_enterprise: bool,
    pub is_blocked: bool,
    pub about: Option<String>,
}

/// Membership change applied to a group's participants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantAction {
    Add,
    Remove,
    Promote,
    Demote,
}

/// Binary attachment plus its metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaPayload {
    pub mimetype: String,
    pub filename: Option<String>,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

impl MediaPayload {
    pub fn new(mimetype: impl Into<String>, filename: Option<String>, data: Vec<u8>) -> Self {
        Self {
            mimetype: mimetype.into(),
            filename,
            data,
        }
    }

    /// Builds a payload from base64 text, the form callers usually upload.
    pub fn from_base64(
        mimetype: impl Into<String>,
        filename: Option<String>,
        encoded: &str,
    ) -> Result<Self, base64::DecodeError> {
        let data = base64::engine::general_purpose::STANDARD.decode(encoded.trim())?;
        Ok(Self::new(mimetype, filename, data))
    }

    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.data)
    }
}

/// What actually goes over the collaborator's send call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundContent {
    Text(String),
    Media {
        media: MediaPayload,
        caption: Option<String>,
    },
}

/// Options passed along with a send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendOptions {
    /// Whether the client should mark the chat as seen while sending.
    pub send_seen: bool,
}

/// What the collaborator reports after accepting a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentMessage {
    pub id: String,
    pub timestamp: i64,
}

mod base64_bytes {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
