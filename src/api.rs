//! Caller-facing operations.
//!
//! [`Gateway`] wires the session, dispatch engine and feature gateway together
//! and reports every operation as a serializable [`Outcome`].

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;

use crate::broadcast::{BroadcasterAdapter, EventBroadcaster};
use crate::collaborator::ClientFactory;
use crate::config::GatewayConfig;
use crate::dispatch::{DispatchEngine, MessageHandle, WelcomeMessage};
use crate::error::{ErrorKind, GatewayError, GatewayResult};
use crate::gateway::FeatureGateway;
use crate::session::SessionManager;
use crate::types::{
    ChatSummary, ContactInfo, CreatedGroup, GroupMetadata, Label, MediaPayload, MessageRecord,
    ParticipantAction, ProfileInfo,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub message: String,
}

/// `{success, data}` or `{success, error: {kind, message}}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Outcome<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl<T> Outcome<T> {
    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}

impl<T> From<GatewayResult<T>> for Outcome<T> {
    fn from(result: GatewayResult<T>) -> Self {
        match result {
            Ok(data) => Outcome {
                success: true,
                data: Some(data),
                error: None,
            },
            Err(err) => Outcome {
                success: false,
                data: None,
                error: Some(ErrorBody {
                    kind: err.kind(),
                    message: err.to_string(),
                }),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub connected: bool,
    pub initializing: bool,
    #[serde(rename = "hasQR")]
    pub has_qr: bool,
}

/// What a caller waiting to pair should show.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum QrStatus {
    Connected,
    QrAvailable { qr: String },
    Loading,
    Disconnected,
}

pub struct Gateway {
    session: Arc<SessionManager>,
    dispatch: DispatchEngine,
    features: FeatureGateway,
}

impl Gateway {
    pub fn new(config: GatewayConfig, factory: Arc<dyn ClientFactory>) -> Self {
        Self::from_session(SessionManager::new(config, factory))
    }

    pub fn from_session(session: Arc<SessionManager>) -> Self {
        Self {
            dispatch: DispatchEngine::new(session.clone()),
            features: FeatureGateway::new(session.clone()),
            session,
        }
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    pub fn features(&self) -> &FeatureGateway {
        &self.features
    }

    /// Brings the session up. Failures are logged and not retried.
    pub async fn start(&self) -> Outcome<()> {
        self.session.start().await.into()
    }

    /// Forwards lifecycle events to `sink` for as long as the session lives.
    pub fn attach_broadcaster(&self, sink: Arc<dyn EventBroadcaster>) -> JoinHandle<()> {
        BroadcasterAdapter::new(sink).attach(&self.session)
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            connected: self.session.is_ready(),
            initializing: self.session.is_initializing(),
            has_qr: self.session.current_qr().is_some(),
        }
    }

    pub fn qr(&self) -> QrStatus {
        if self.session.is_ready() {
            return QrStatus::Connected;
        }
        if let Some(qr) = self.session.current_qr() {
            return QrStatus::QrAvailable { qr };
        }
        if self.session.is_initializing() {
            QrStatus::Loading
        } else {
            QrStatus::Disconnected
        }
    }

    pub async fn profile(&self) -> Outcome<ProfileInfo> {
        if !self.session.is_ready() {
            return Outcome::from(Err(GatewayError::NotConnected));
        }
        self.session
            .profile()
            .await
            .ok_or_else(|| GatewayError::Collaborator("could not fetch profile information".into()))
            .into()
    }

    /// Logs out and schedules a fresh session.
    pub async fn logout(&self) -> Outcome<()> {
        self.session.logout().await.into()
    }

    pub async fn send_text(&self, to: &str, body: &str, agent: Option<&str>) -> Outcome<MessageHandle> {
        self.try_send_text(to, body, agent).await.into()
    }

    async fn try_send_text(&self, to: &str, body: &str, agent: Option<&str>) -> GatewayResult<MessageHandle> {
        require(&[("phone", to), ("message", body)])?;
        self.dispatch.send_text(to, body, agent).await
    }

    /// Sends an attachment given as base64 data.
    pub async fn send_media(
        &self,
        to: &str,
        data_base64: &str,
        mimetype: &str,
        filename: Option<&str>,
        caption: Option<&str>,
        agent: Option<&str>,
    ) -> Outcome<MessageHandle> {
        self.try_send_media(to, data_base64, mimetype, filename, caption, agent)
            .await
            .into()
    }

    async fn try_send_media(
        &self,
        to: &str,
        data_base64: &str,
        mimetype: &str,
        filename: Option<&str>,
        caption: Option<&str>,
        agent: Option<&str>,
    ) -> GatewayResult<MessageHandle> {
        require(&[("phone", to), ("media", data_base64), ("mimetype", mimetype)])?;
        let media = MediaPayload::from_base64(mimetype, filename.map(str::to_string), data_base64)
            .map_err(|e| GatewayError::InvalidRequest(format!("media is not valid base64: {e}")))?;
        self.dispatch
            .send_media(to, media, caption.map(str::to_string), agent)
            .await
    }

    pub async fn send_welcome(&self, welcome: &WelcomeMessage) -> Outcome<MessageHandle> {
        self.dispatch.send_welcome(welcome).await.into()
    }

    pub async fn list_chats(&self) -> Outcome<Vec<ChatSummary>> {
        self.features.list_chats().await.into()
    }

    pub async fn list_messages(&self, chat: &str, limit: Option<usize>) -> Outcome<Vec<MessageRecord>> {
        self.features.list_messages(chat, limit).await.into()
    }

    pub async fn message_media(&self, chat: &str, message_id: &str) -> Outcome<MediaPayload> {
        self.features.message_media(chat, message_id).await.into()
    }

    pub async fn delete_message(&self, chat: &str, message_id: &str, everyone: bool) -> Outcome<()> {
        self.features.delete_message(chat, message_id, everyone).await.into()
    }

    pub async fn react(&self, chat: &str, message_id: &str, reaction: &str) -> Outcome<()> {
        self.features.react(chat, message_id, reaction).await.into()
    }

    pub async fn star(&self, chat: &str, message_id: &str, starred: bool) -> Outcome<()> {
        self.features.star(chat, message_id, starred).await.into()
    }

    pub async fn labels(&self) -> Outcome<Vec<Label>> {
        self.features.labels().await.into()
    }

    pub async fn create_label(&self, name: &str, hex_color: Option<&str>) -> Outcome<Label> {
        self.features.create_label(name, hex_color).await.into()
    }

    pub async fn update_label(&self, label_id: &str, name: &str, hex_color: Option<&str>) -> Outcome<()> {
        self.features.update_label(label_id, name, hex_color).await.into()
    }

    pub async fn delete_label(&self, label_id: &str) -> Outcome<()> {
        self.features.delete_label(label_id).await.into()
    }

    pub async fn chat_labels(&self, chat: &str) -> Outcome<Vec<Label>> {
        self.features.chat_labels(chat).await.into()
    }

    pub async fn assign_labels(&self, chat: &str, label_ids: &[String]) -> Outcome<()> {
        self.features.assign_labels(chat, label_ids).await.into()
    }

    pub async fn chat_note(&self, chat: &str) -> Outcome<Option<String>> {
        self.features.chat_note(chat).await.into()
    }

    pub async fn set_chat_note(&self, chat: &str, note: &str) -> Outcome<()> {
        self.features.set_chat_note(chat, note).await.into()
    }

    pub async fn set_archived(&self, chat: &str, archived: bool) -> Outcome<()> {
        self.features.set_archived(chat, archived).await.into()
    }

    pub async fn set_pinned(&self, chat: &str, pinned: bool) -> Outcome<()> {
        self.features.set_pinned(chat, pinned).await.into()
    }

    pub async fn mute(&self, chat: &str, duration: Duration) -> Outcome<()> {
        self.features.mute(chat, duration).await.into()
    }

    pub async fn unmute(&self, chat: &str) -> Outcome<()> {
        self.features.unmute(chat).await.into()
    }

    pub async fn mark_unread(&self, chat: &str) -> Outcome<()> {
        self.features.mark_unread(chat).await.into()
    }

    pub async fn create_group(&self, title: &str, participants: &[String]) -> Outcome<CreatedGroup> {
        self.features.create_group(title, participants).await.into()
    }

    pub async fn group_metadata(&self, group: &str) -> Outcome<GroupMetadata> {
        self.features.group_metadata(group).await.into()
    }

    pub async fn update_participants(
        &self,
        group: &str,
        participants: &[String],
        action: ParticipantAction,
    ) -> Outcome<()> {
        self.features
            .update_participants(group, participants, action)
            .await
            .into()
    }

    pub async fn contact(&self, id: &str) -> Outcome<ContactInfo> {
        self.features.contact(id).await.into()
    }

    pub async fn block(&self, id: &str) -> Outcome<()> {
        self.features.block(id).await.into()
    }

    pub async fn unblock(&self, id: &str) -> Outcome<()> {
        self.features.unblock(id).await.into()
    }

    pub async fn blocked_contacts(&self) -> Outcome<Vec<ContactInfo>> {
        self.features.blocked_contacts().await.into()
    }
}

fn require(fields: &[(&str, &str)]) -> GatewayResult<()> {
    let missing: Vec<&str> = fields
        .iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| *name)
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(GatewayError::InvalidRequest(format!("{} required", missing.join(", "))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_shapes() {
        let ok = Outcome::from(GatewayResult::Ok(7u32));
        assert_eq!(
            serde_json::to_value(&ok).unwrap(),
            serde_json::json!({"success": true, "data": 7})
        );

        let failed: Outcome<u32> =
            Outcome::from(Err(GatewayError::NotRegistered("15550000000@c.us".into())));
        assert_eq!(
            serde_json::to_value(&failed).unwrap(),
            serde_json::json!({
                "success": false,
                "error": {
                    "kind": "not_registered",
                    "message": "the number 15550000000@c.us is not registered on WhatsApp"
                }
            })
        );
    }

    #[test]
    fn status_and_qr_serialize_like_the_http_surface() {
        let status = SessionStatus {
            connected: false,
            initializing: true,
            has_qr: true,
        };
        assert_eq!(
            serde_json::to_value(status).unwrap(),
            serde_json::json!({"connected": false, "initializing": true, "hasQR": true})
        );
        assert_eq!(
            serde_json::to_value(QrStatus::QrAvailable { qr: "2@abc".into() }).unwrap(),
            serde_json::json!({"status": "qr_available", "qr": "2@abc"})
        );
        assert_eq!(
            serde_json::to_value(QrStatus::Loading).unwrap(),
            serde_json::json!({"status": "loading"})
        );
    }

    #[test]
    fn missing_fields_are_named() {
        assert_eq!(
            require(&[("phone", ""), ("message", " ")]),
            Err(GatewayError::InvalidRequest("phone, message required".into()))
        );
        assert!(require(&[("phone", "1")]).is_ok());
    }
}
