//! Interface to the browser-automated WhatsApp Web client.
//!
//! The gateway never talks to WhatsApp itself. Everything goes through an
//! [`AutomationClient`] built by a [`ClientFactory`]; lifecycle signals arrive
//! on the channel bundled in the [`ClientHandle`].
//!
//! Extended operations (labels, notes, chat flags, groups, contacts) are
//! optional: their default implementations report
//! [`CollaboratorError::Unsupported`], which is how a client version that lacks
//! the method is modeled. For those, the client may expose a [`ScriptContext`]
//! able to run a [`StoreScript`] directly against its internal data store.

pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::config::GatewayConfig;
use crate::types::{
    ChatSummary, ContactInfo, CreatedGroup, GroupMetadata, Identifier, InboundMessage, Label,
    MediaPayload, MessageRecord, OutboundContent, ParticipantAction, ProfileInfo, SendOptions,
    SentMessage,
};

/// Failure reported by the automation client.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CollaboratorError {
    /// The installed client has no such method.
    #[error("{0} is not available on this client")]
    Unsupported(&'static str),
    #[error("{0} not found")]
    NotFound(String),
    /// The store refused to delete a label that chats still reference.
    #[error("label {0} is referenced by chats")]
    LabelInUse(String),
    #[error("{0}")]
    Failed(String),
}

impl CollaboratorError {
    /// Whether the rendered message contains `fragment`.
    pub fn mentions(&self, fragment: &str) -> bool {
        !fragment.is_empty() && self.to_string().contains(fragment)
    }
}

pub type CollaboratorResult<T> = Result<T, CollaboratorError>;

/// Raw lifecycle signal emitted by a client handle.
#[derive(Debug, Clone, PartialEq)]
pub enum CollaboratorEvent {
    Qr(String),
    Authenticated,
    AuthFailure(String),
    Ready,
    Disconnected(String),
    Message(Box<InboundMessage>),
    Loading { percent: u8, message: String },
    Error(String),
}

/// A freshly constructed client and the stream of its lifecycle signals.
pub struct ClientHandle {
    pub client: Arc<dyn AutomationClient>,
    pub events: mpsc::UnboundedReceiver<CollaboratorEvent>,
}

/// Builds client handles. Called once at startup and again after every
/// teardown.
pub trait ClientFactory: Send + Sync {
    fn create(&self, config: &GatewayConfig) -> CollaboratorResult<ClientHandle>;
}

/// Low-level command run inside the client's execution context.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum StoreScript {
    CreateLabel {
        name: String,
        hex_color: Option<String>,
    },
    UpdateLabel {
        label_id: String,
        name: String,
        hex_color: Option<String>,
    },
    DeleteLabel {
        label_id: String,
    },
    ChangeChatLabels {
        chat_id: Identifier,
        label_ids: Vec<String>,
    },
    GetChatNote {
        chat_id: Identifier,
    },
    SetChatNote {
        chat_id: Identifier,
        note: String,
    },
    SetArchived {
        chat_id: Identifier,
        archived: bool,
    },
    SetPinned {
        chat_id: Identifier,
        pinned: bool,
    },
    SetMuted {
        chat_id: Identifier,
        until: Option<DateTime<Utc>>,
    },
    MarkUnread {
        chat_id: Identifier,
    },
    CreateGroup {
        title: String,
        participants: Vec<Identifier>,
    },
    GroupMetadata {
        group_id: Identifier,
    },
    UpdateParticipants {
        group_id: Identifier,
        participants: Vec<Identifier>,
        action: ParticipantAction,
    },
    GetContact {
        contact_id: Identifier,
    },
    SetBlocked {
        contact_id: Identifier,
        blocked: bool,
    },
    BlockedContacts,
}

/// Injectable low-level execution context of the client.
#[async_trait]
pub trait ScriptContext: Send + Sync {
    /// Runs `script` and returns its JSON result (`null` for commands with no
    /// result).
    async fn evaluate(&self, script: &StoreScript) -> CollaboratorResult<serde_json::Value>;
}

/// The automation client surface the gateway relies on.
#[async_trait]
pub trait AutomationClient: Send + Sync {
    /// Starts the browser session. Lifecycle signals follow on the event channel.
    async fn initialize(&self) -> CollaboratorResult<()>;
    /// Graceful logout; also unlinks the device.
    async fn logout(&self) -> CollaboratorResult<()>;
    /// Forced teardown of the browser session.
    async fn destroy(&self) -> CollaboratorResult<()>;

    async fn profile(&self) -> CollaboratorResult<ProfileInfo>;
    /// Registration lookup. `None` when the number is not on WhatsApp.
    async fn number_id(&self, id: &Identifier) -> CollaboratorResult<Option<Identifier>>;
    async fn chat_by_id(&self, id: &Identifier) -> CollaboratorResult<ChatSummary>;
    async fn chats(&self) -> CollaboratorResult<Vec<ChatSummary>>;
    async fn chat_contact(&self, chat: &Identifier) -> CollaboratorResult<ContactInfo>;
    async fn send_message(
        &self,
        to: &Identifier,
        content: &OutboundContent,
        options: SendOptions,
    ) -> CollaboratorResult<SentMessage>;
    /// Most recent `limit` messages of a chat, oldest first.
    async fn fetch_messages(
        &self,
        chat: &Identifier,
        limit: usize,
    ) -> CollaboratorResult<Vec<MessageRecord>>;
    async fn labels(&self) -> CollaboratorResult<Vec<Label>>;

    async fn create_label(
        &self,
        _name: &str,
        _hex_color: Option<&str>,
    ) -> CollaboratorResult<Label> {
        Err(CollaboratorError::Unsupported("create_label"))
    }

    async fn update_label(&self, _label: &Label) -> CollaboratorResult<()> {
        Err(CollaboratorError::Unsupported("update_label"))
    }

    async fn delete_label(&self, _label_id: &str) -> CollaboratorResult<()> {
        Err(CollaboratorError::Unsupported("delete_label"))
    }

    async fn change_chat_labels(
        &self,
        _chat: &Identifier,
        _label_ids: &[String],
    ) -> CollaboratorResult<()> {
        Err(CollaboratorError::Unsupported("change_chat_labels"))
    }

    async fn chat_note(&self, _chat: &Identifier) -> CollaboratorResult<Option<String>> {
        Err(CollaboratorError::Unsupported("chat_note"))
    }

    async fn set_chat_note(&self, _chat: &Identifier, _note: &str) -> CollaboratorResult<()> {
        Err(CollaboratorError::Unsupported("set_chat_note"))
    }

    async fn set_archived(&self, _chat: &Identifier, _archived: bool) -> CollaboratorResult<()> {
        Err(CollaboratorError::Unsupported("set_archived"))
    }

    async fn set_pinned(&self, _chat: &Identifier, _pinned: bool) -> CollaboratorResult<()> {
        Err(CollaboratorError::Unsupported("set_pinned"))
    }

    /// Mutes until `until`, or unmutes when `None`.
    async fn set_muted(
        &self,
        _chat: &Identifier,
        _until: Option<DateTime<Utc>>,
    ) -> CollaboratorResult<()> {
        Err(CollaboratorError::Unsupported("set_muted"))
    }

    async fn mark_unread(&self, _chat: &Identifier) -> CollaboratorResult<()> {
        Err(CollaboratorError::Unsupported("mark_unread"))
    }

    async fn create_group(
        &self,
        _title: &str,
        _participants: &[Identifier],
    ) -> CollaboratorResult<CreatedGroup> {
        Err(CollaboratorError::Unsupported("create_group"))
    }

    async fn group_metadata(&self, _group: &Identifier) -> CollaboratorResult<GroupMetadata> {
        Err(CollaboratorError::Unsupported("group_metadata"))
    }

    async fn update_participants(
        &self,
        _group: &Identifier,
        _participants: &[Identifier],
        _action: ParticipantAction,
    ) -> CollaboratorResult<()> {
        Err(CollaboratorError::Unsupported("update_participants"))
    }

    async fn contact_by_id(&self, _id: &Identifier) -> CollaboratorResult<ContactInfo> {
        Err(CollaboratorError::Unsupported("contact_by_id"))
    }

    async fn set_blocked(&self, _id: &Identifier, _blocked: bool) -> CollaboratorResult<()> {
        Err(CollaboratorError::Unsupported("set_blocked"))
    }

    async fn blocked_contacts(&self) -> CollaboratorResult<Vec<ContactInfo>> {
        Err(CollaboratorError::Unsupported("blocked_contacts"))
    }

    async fn delete_message(
        &self,
        _chat: &Identifier,
        _message_id: &str,
        _everyone: bool,
    ) -> CollaboratorResult<()> {
        Err(CollaboratorError::Unsupported("delete_message"))
    }

    async fn react_to_message(
        &self,
        _chat: &Identifier,
        _message_id: &str,
        _reaction: &str,
    ) -> CollaboratorResult<()> {
        Err(CollaboratorError::Unsupported("react_to_message"))
    }

    async fn star_message(
        &self,
        _chat: &Identifier,
        _message_id: &str,
        _starred: bool,
    ) -> CollaboratorResult<()> {
        Err(CollaboratorError::Unsupported("star_message"))
    }

    async fn download_media(
        &self,
        _chat: &Identifier,
        _message_id: &str,
    ) -> CollaboratorResult<Option<MediaPayload>> {
        Err(CollaboratorError::Unsupported("download_media"))
    }

    /// Low-level execution context, when the client exposes one.
    fn script_context(&self) -> Option<Arc<dyn ScriptContext>> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::normalize;

    #[test]
    fn scripts_serialize_with_command_tag() {
        let script = StoreScript::ChangeChatLabels {
            chat_id: normalize("201001112222"),
            label_ids: vec!["3".into()],
        };
        let json = serde_json::to_value(&script).unwrap();
        assert_eq!(json["command"], "change_chat_labels");
        assert_eq!(json["chat_id"], "201001112222@c.us");
        assert_eq!(json["label_ids"][0], "3");
    }

    #[test]
    fn error_fragment_matching() {
        let err = CollaboratorError::Failed(
            "Cannot read properties of undefined (reading 'markedUnread')".into(),
        );
        assert!(err.mentions("markedUnread"));
        assert!(!err.mentions("Session closed"));
        assert!(!err.mentions(""));
    }
}
