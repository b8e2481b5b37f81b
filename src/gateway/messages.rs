use std::sync::Arc;

use super::{target, FeatureGateway};
use crate::collaborator::AutomationClient;
use crate::error::{GatewayError, GatewayResult};
use crate::types::{Identifier, MediaPayload, MessageRecord};

/// Finds `message_id` among the chat's `window` most recent messages.
async fn find_in_window(
    client: &Arc<dyn AutomationClient>,
    chat: &Identifier,
    message_id: &str,
    window: usize,
) -> GatewayResult<MessageRecord> {
    client
        .fetch_messages(chat, window)
        .await?
        .into_iter()
        .find(|message| message.id == message_id)
        .ok_or_else(|| GatewayError::NotFound(format!("message {message_id} in {chat}")))
}

impl FeatureGateway {
    /// Deletes a message for this account only, or for everyone.
    pub async fn delete_message(
        &self,
        chat: &str,
        message_id: &str,
        everyone: bool,
    ) -> GatewayResult<()> {
        let chat = target(chat)?;
        let client = self.client().await?;
        let message = find_in_window(&client, &chat, message_id, self.message_window()).await?;
        Ok(client.delete_message(&chat, &message.id, everyone).await?)
    }

    /// Reacts with `reaction`; an empty string removes the reaction.
    pub async fn react(&self, chat: &str, message_id: &str, reaction: &str) -> GatewayResult<()> {
        let chat = target(chat)?;
        let client = self.client().await?;
        let message = find_in_window(&client, &chat, message_id, self.message_window()).await?;
        Ok(client.react_to_message(&chat, &message.id, reaction).await?)
    }

    pub async fn star(&self, chat: &str, message_id: &str, starred: bool) -> GatewayResult<()> {
        let chat = target(chat)?;
        let client = self.client().await?;
        let message = find_in_window(&client, &chat, message_id, self.message_window()).await?;
        Ok(client.star_message(&chat, &message.id, starred).await?)
    }

    pub async fn message_media(&self, chat: &str, message_id: &str) -> GatewayResult<MediaPayload> {
        let chat = target(chat)?;
        let client = self.client().await?;
        let message = find_in_window(&client, &chat, message_id, self.media_window()).await?;
        if !message.has_media {
            return Err(GatewayError::NotFound(format!("media of message {message_id}")));
        }
        client
            .download_media(&chat, &message.id)
            .await?
            .ok_or_else(|| GatewayError::NotFound(format!("media of message {message_id}")))
    }
}

#[cfg(test)]
mod tests {
    use crate::error::GatewayError;
    use crate::gateway::testing;
    use crate::types::MediaPayload;

    #[tokio::test(start_paused = true)]
    async fn actions_only_reach_recent_messages() {
        let fx = testing::ready().await;
        let (chat, old, recent) = fx.factory.with_world(|w| {
            let chat = w.register("201001112222");
            let old = w.receive_text(&chat, "ancient");
            for i in 0..50 {
                w.receive_text(&chat, &format!("filler {i}"));
            }
            let recent = w.receive_text(&chat, "latest");
            (chat, old, recent)
        });
        let chat_id = chat.to_string();

        assert!(matches!(
            fx.gateway.react(&chat_id, &old, "👍").await,
            Err(GatewayError::NotFound(_))
        ));
        fx.gateway.react(&chat_id, &recent, "👍").await.unwrap();
        fx.gateway.star(&chat_id, &recent, true).await.unwrap();
        fx.gateway.delete_message(&chat_id, &recent, false).await.unwrap();

        let (reaction, starred, remaining) = fx.factory.with_world(|w| {
            let entry = &w.chats[&chat_id];
            (
                entry.reactions.get(&recent).cloned(),
                entry.starred.contains(&recent),
                entry.messages.len(),
            )
        });
        assert_eq!(reaction.as_deref(), Some("👍"));
        assert!(starred);
        assert_eq!(remaining, 51);
    }

    #[tokio::test(start_paused = true)]
    async fn media_download_uses_the_wider_window() {
        let fx = testing::ready().await;
        let payload = MediaPayload::new("image/jpeg", Some("photo.jpg".into()), vec![0xff, 0xd8]);
        let (chat, media_id, text_id) = fx.factory.with_world(|w| {
            let chat = w.register("201001112222");
            let media_id = w.receive_media(&chat, payload.clone());
            for i in 0..100 {
                w.receive_text(&chat, &format!("filler {i}"));
            }
            let text_id = w.receive_text(&chat, "no attachment");
            (chat.to_string(), media_id, text_id)
        });

        assert_eq!(fx.gateway.message_media(&chat, &media_id).await.unwrap(), payload);
        assert!(matches!(
            fx.gateway.message_media(&chat, &text_id).await,
            Err(GatewayError::NotFound(_))
        ));
        assert!(matches!(
            fx.gateway.star(&chat, &media_id, true).await,
            Err(GatewayError::NotFound(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn missing_native_action_is_unsupported() {
        let fx = testing::ready().await;
        fx.factory.without_method("react_to_message");
        let (chat, id) = fx.factory.with_world(|w| {
            let chat = w.register("201001112222");
            let id = w.receive_text(&chat, "hello");
            (chat.to_string(), id)
        });
        assert!(matches!(
            fx.gateway.react(&chat, &id, "❤️").await,
            Err(GatewayError::FeatureUnsupported { .. })
        ));
    }
}
