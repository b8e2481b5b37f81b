use std::time::Duration;

use chrono::Utc;
use log::warn;

use super::operation::{execute, FeatureOperation};
use super::{target, FeatureGateway};
use crate::collaborator::StoreScript;
use crate::error::{GatewayError, GatewayResult};
use crate::types::{ChatSummary, MessageRecord};

impl FeatureGateway {
    /// All chats, newest first, each with the best phone number known for it.
    /// Unnamed chats are named after that number.
    pub async fn list_chats(&self) -> GatewayResult<Vec<ChatSummary>> {
        let client = self.client().await?;
        let mut chats = client.chats().await?;
        for chat in chats.iter_mut().filter(|chat| !chat.is_group) {
            match client.chat_contact(&chat.id).await {
                Ok(contact) => {
                    if let Some(number) = contact.number.filter(|n| !n.is_empty()) {
                        chat.phone_number = number;
                    }
                }
                Err(err) => warn!("could not load contact for chat {}: {err}", chat.id),
            }
        }
        for chat in chats.iter_mut() {
            if chat.name.as_deref().map_or(true, str::is_empty) {
                chat.name = Some(chat.phone_number.clone());
            }
        }
        Ok(chats)
    }

    /// Most recent messages of a chat, oldest first. `limit` defaults to the
    /// configured message window.
    pub async fn list_messages(
        &self,
        chat: &str,
        limit: Option<usize>,
    ) -> GatewayResult<Vec<MessageRecord>> {
        let chat = target(chat)?;
        let client = self.client().await?;
        let limit = limit.filter(|l| *l > 0).unwrap_or(self.message_window());
        Ok(client.fetch_messages(&chat, limit).await?)
    }

    pub async fn chat_note(&self, chat: &str) -> GatewayResult<Option<String>> {
        let chat = target(chat)?;
        let client = self.client().await?;
        let script = StoreScript::GetChatNote {
            chat_id: chat.clone(),
        };
        let op = FeatureOperation::new("chat_note", Some(&chat), &script);
        execute(&client, op, client.chat_note(&chat), script)
            .await
            .into_result()
    }

    pub async fn set_chat_note(&self, chat: &str, note: &str) -> GatewayResult<()> {
        let chat = target(chat)?;
        let client = self.client().await?;
        let script = StoreScript::SetChatNote {
            chat_id: chat.clone(),
            note: note.to_string(),
        };
        let op = FeatureOperation::new("set_chat_note", Some(&chat), &script);
        execute(&client, op, client.set_chat_note(&chat, note), script)
            .await
            .into_result()
    }

    pub async fn set_archived(&self, chat: &str, archived: bool) -> GatewayResult<()> {
        let chat = target(chat)?;
        let client = self.client().await?;
        let script = StoreScript::SetArchived {
            chat_id: chat.clone(),
            archived,
        };
        let op = FeatureOperation::new("set_archived", Some(&chat), &script);
        execute(&client, op, client.set_archived(&chat, archived), script)
            .await
            .into_result()
    }

    pub async fn set_pinned(&self, chat: &str, pinned: bool) -> GatewayResult<()> {
        let chat = target(chat)?;
        let client = self.client().await?;
        let script = StoreScript::SetPinned {
            chat_id: chat.clone(),
            pinned,
        };
        let op = FeatureOperation::new("set_pinned", Some(&chat), &script);
        execute(&client, op, client.set_pinned(&chat, pinned), script)
            .await
            .into_result()
    }

    /// Mutes the chat for `duration` from now.
    pub async fn mute(&self, chat: &str, duration: Duration) -> GatewayResult<()> {
        let until = chrono::Duration::from_std(duration)
            .ok()
            .and_then(|d| Utc::now().checked_add_signed(d))
            .ok_or_else(|| GatewayError::InvalidRequest("mute duration out of range".into()))?;
        self.apply_mute(chat, Some(until)).await
    }

    pub async fn unmute(&self, chat: &str) -> GatewayResult<()> {
        self.apply_mute(chat, None).await
    }

    async fn apply_mute(
        &self,
        chat: &str,
        until: Option<chrono::DateTime<Utc>>,
    ) -> GatewayResult<()> {
        let chat = target(chat)?;
        let client = self.client().await?;
        let script = StoreScript::SetMuted {
            chat_id: chat.clone(),
            until,
        };
        let op = FeatureOperation::new("set_muted", Some(&chat), &script);
        execute(&client, op, client.set_muted(&chat, until), script)
            .await
            .into_result()
    }

    pub async fn mark_unread(&self, chat: &str) -> GatewayResult<()> {
        let chat = target(chat)?;
        let client = self.client().await?;
        let script = StoreScript::MarkUnread {
            chat_id: chat.clone(),
        };
        let op = FeatureOperation::new("mark_unread", Some(&chat), &script);
        execute(&client, op, client.mark_unread(&chat), script)
            .await
            .into_result()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::collaborator::memory::ScriptMode;
    use crate::error::GatewayError;
    use crate::gateway::testing;
    use crate::types::{normalize, ContactInfo};

    #[tokio::test(start_paused = true)]
    async fn chat_listing_enriches_numbers_best_effort() {
        let fx = testing::ready().await;
        fx.factory.with_world(|w| {
            let known = w.register("201001112222");
            w.add_chat(&known, Some("Mona"));
            w.add_contact(ContactInfo {
                id: known.clone(),
                name: Some("Mona".into()),
                pushname: None,
                number: Some("+20 100 111 2222".into()),
                is_business: false,
                is_enterprise: false,
                is_blocked: false,
                about: None,
            });
            let stranger = w.register("201005556666");
            w.add_chat(&stranger, None);
        });

        let chats = fx.gateway.list_chats().await.unwrap();
        assert_eq!(chats.len(), 2);
        let mona = chats.iter().find(|c| c.name.as_deref() == Some("Mona")).unwrap();
        assert_eq!(mona.phone_number, "+20 100 111 2222");
        let stranger = chats
            .iter()
            .find(|c| c.id.local_part() == "201005556666")
            .unwrap();
        assert_eq!(stranger.phone_number, "201005556666");
        assert_eq!(stranger.name.as_deref(), Some("201005556666"));
    }

    #[tokio::test(start_paused = true)]
    async fn message_listing_defaults_to_the_window() {
        let fx = testing::ready().await;
        let chat = fx.factory.with_world(|w| {
            let chat = w.register("201001112222");
            for i in 0..60 {
                w.receive_text(&chat, &format!("message {i}"));
            }
            chat
        });

        let messages = fx.gateway.list_messages(&chat.to_string(), None).await.unwrap();
        assert_eq!(messages.len(), 50);
        assert_eq!(messages[0].body, "message 10");
        assert_eq!(messages[49].body, "message 59");

        let few = fx.gateway.list_messages(&chat.to_string(), Some(5)).await.unwrap();
        assert_eq!(few.len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn notes_and_flags_fall_back_to_the_store() {
        let fx = testing::ready().await;
        for method in ["chat_note", "set_chat_note", "set_muted", "mark_unread"] {
            fx.factory.without_method(method);
        }
        let chat = fx.factory.with_world(|w| w.register("201001112222"));
        let raw = "00201001112222";

        fx.gateway.set_chat_note(raw, "call back monday").await.unwrap();
        assert_eq!(
            fx.gateway.chat_note(raw).await.unwrap().as_deref(),
            Some("call back monday")
        );
        fx.gateway.mute(raw, Duration::from_secs(8 * 3600)).await.unwrap();
        fx.gateway.set_pinned(raw, true).await.unwrap();
        fx.gateway.mark_unread(raw).await.unwrap();

        let (muted, pinned, unread) = fx.factory.with_world(|w| {
            let entry = &w.chats[&chat.to_string()];
            (entry.muted_until.is_some(), entry.pinned, entry.summary.unread_count)
        });
        assert!(muted && pinned);
        assert_eq!(unread, 1);
        // Pinning went through the native method.
        assert_eq!(fx.factory.scripts().len(), 4);

        fx.gateway.unmute(raw).await.unwrap();
        assert!(fx
            .factory
            .with_world(|w| w.chats[&chat.to_string()].muted_until.is_none()));
    }

    #[tokio::test(start_paused = true)]
    async fn archive_without_any_store_access() {
        let fx = testing::ready().await;
        fx.factory.without_method("set_archived");
        fx.factory.set_script_mode(ScriptMode::Missing);
        assert_eq!(
            fx.gateway
                .set_archived(&normalize("201001112222").to_string(), true)
                .await,
            Err(GatewayError::StoreUnavailable("set_archived".into()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn chat_operations_require_a_ready_session() {
        let fx = testing::ready().await;
        fx.session.shutdown().await;
        assert_eq!(
            fx.gateway.set_pinned("201001112222", true).await,
            Err(GatewayError::NotConnected)
        );
    }
}
