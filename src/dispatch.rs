//! Outbound message delivery.
//!
//! Every attempt resolves the target's registration, pre-warms the chat and
//! sends with "do not mark as seen". The one known transient fault of the
//! client's send path is retried with a linearly growing delay; anything else
//! fails the send immediately.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use serde::Serialize;

use crate::collaborator::CollaboratorError;
use crate::error::{GatewayError, GatewayResult};
use crate::session::SessionManager;
use crate::types::{normalize, Identifier, MediaPayload, OutboundContent, SendOptions, SentMessage};

pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// One outbound attempt sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSend {
    pub target: Identifier,
    pub content: OutboundContent,
    /// Appended to the text or caption as `~ <agent>`.
    pub agent: Option<String>,
    pub max_retries: u32,
}

impl PendingSend {
    pub fn text(target: Identifier, body: impl Into<String>) -> Self {
        Self {
            target,
            content: OutboundContent::Text(body.into()),
            agent: None,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub fn media(target: Identifier, media: MediaPayload, caption: Option<String>) -> Self {
        Self {
            target,
            content: OutboundContent::Media { media, caption },
            agent: None,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    /// Signs the message with the sending agent's name. Blank names are ignored.
    pub fn with_agent(mut self, agent: Option<impl Into<String>>) -> Self {
        self.agent = agent.map(Into::into).filter(|a: &String| !a.trim().is_empty());
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// The content as it goes over the wire, signature included.
    pub fn rendered(&self) -> OutboundContent {
        let Some(agent) = &self.agent else {
            return self.content.clone();
        };
        match &self.content {
            OutboundContent::Text(body) => OutboundContent::Text(format!("{body}\n\n~ {agent}")),
            OutboundContent::Media { media, caption } => {
                let caption = match caption.as_deref().filter(|c| !c.is_empty()) {
                    Some(caption) => format!("{caption}\n\n~ {agent}"),
                    None => format!("~ {agent}"),
                };
                OutboundContent::Media {
                    media: media.clone(),
                    caption: Some(caption),
                }
            }
        }
    }
}

/// Delivered message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageHandle {
    pub id: String,
    /// Resolved target the message actually went to.
    pub to: Identifier,
    pub timestamp: i64,
    /// Attempts it took, counting the successful one.
    pub attempts: u32,
}

/// Delay before retry number `attempt` (counted from 1).
pub fn backoff(step: Duration, attempt: u32) -> Duration {
    step * attempt
}

/// Onboarding message carrying a customer's license credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WelcomeMessage {
    pub phone: String,
    pub license_key: String,
    pub email: String,
    pub app_link: Option<String>,
}

impl WelcomeMessage {
    fn validate(&self) -> GatewayResult<()> {
        let missing: Vec<&str> = [
            ("phone", &self.phone),
            ("license key", &self.license_key),
            ("email", &self.email),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
        .collect();
        if !missing.is_empty() {
            return Err(GatewayError::InvalidRequest(format!(
                "{} required",
                missing.join(", ")
            )));
        }
        Ok(())
    }

    pub fn render(&self, default_link: &str) -> String {
        let link = self
            .app_link
            .as_deref()
            .filter(|l| !l.trim().is_empty())
            .unwrap_or(default_link);
        format!(
            "🎉 *Welcome aboard!*\n\n\
             Your account is now active. Here are your sign-in details:\n\n\
             🔑 *License key:*\n`{key}`\n\n\
             📧 *Email:*\n{email}\n\n\
             📱 *Phone:*\n{phone}\n\n\
             🌐 *App link:*\n{link}\n\n\
             ℹ️ *How to sign in:*\n\
             1. Open the app from the link above\n\
             2. Enter your license key\n\
             3. Start using every feature\n\n\
             💡 *Tip:* keep your license key somewhere safe.\n\n\
             If anything goes wrong, just reply to this message.",
            key = self.license_key,
            email = self.email,
            phone = self.phone,
        )
    }
}

pub struct DispatchEngine {
    session: Arc<SessionManager>,
}

impl DispatchEngine {
    pub fn new(session: Arc<SessionManager>) -> Self {
        Self { session }
    }

    /// Normalizes `to` and sends a text message.
    pub async fn send_text(
        &self,
        to: &str,
        body: impl Into<String>,
        agent: Option<&str>,
    ) -> GatewayResult<MessageHandle> {
        let pending = PendingSend::text(normalize(to), body)
            .with_agent(agent)
            .with_max_retries(self.max_retries());
        self.send(pending).await
    }

    /// Normalizes `to` and sends an attachment.
    pub async fn send_media(
        &self,
        to: &str,
        media: MediaPayload,
        caption: Option<String>,
        agent: Option<&str>,
    ) -> GatewayResult<MessageHandle> {
        let pending = PendingSend::media(normalize(to), media, caption)
            .with_agent(agent)
            .with_max_retries(self.max_retries());
        self.send(pending).await
    }

    /// Runs the full attempt sequence for `pending`.
    pub async fn send(&self, pending: PendingSend) -> GatewayResult<MessageHandle> {
        let target = pending.target.clone().require_valid()?;
        let content = pending.rendered();
        let step = self.session.config().retry_step();

        let mut attempt = 1;
        loop {
            match self.attempt(&target, &content, attempt).await {
                Ok((to, sent)) => {
                    info!("message {} delivered to {to} (attempt {attempt})", sent.id);
                    return Ok(MessageHandle {
                        id: sent.id,
                        to,
                        timestamp: sent.timestamp,
                        attempts: attempt,
                    });
                }
                Err(GatewayError::TransientSessionFault(cause)) => {
                    if attempt > pending.max_retries {
                        warn!("failed to send message to {target} after {attempt} attempts: {cause}");
                        return Err(GatewayError::SendFailed(cause));
                    }
                    let delay = backoff(step, attempt);
                    warn!(
                        "transient send fault for {target}, retrying in {}ms ({} retries left)",
                        delay.as_millis(),
                        pending.max_retries + 1 - attempt
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    warn!("failed to send message to {target}: {err}");
                    return Err(err);
                }
            }
        }
    }

    /// Like [`DispatchEngine::send`], but the whole sequence including backoff
    /// must finish within `ceiling`.
    pub async fn send_with_deadline(
        &self,
        pending: PendingSend,
        ceiling: Duration,
    ) -> GatewayResult<MessageHandle> {
        match tokio::time::timeout(ceiling, self.send(pending)).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::Timeout(ceiling.as_secs())),
        }
    }

    /// Sends the onboarding message under the configured welcome ceiling.
    pub async fn send_welcome(&self, welcome: &WelcomeMessage) -> GatewayResult<MessageHandle> {
        if !self.session.is_ready() {
            return Err(GatewayError::NotConnected);
        }
        welcome.validate()?;
        let config = self.session.config();
        let body = welcome.render(&config.default_app_link);
        let pending = PendingSend::text(normalize(&welcome.phone), body)
            .with_max_retries(config.max_send_retries);
        self.send_with_deadline(pending, config.welcome_timeout()).await
    }

    fn max_retries(&self) -> u32 {
        self.session.config().max_send_retries
    }

    async fn attempt(
        &self,
        target: &Identifier,
        content: &OutboundContent,
        attempt: u32,
    ) -> GatewayResult<(Identifier, SentMessage)> {
        let client = self.session.client().await?;

        let resolved = client
            .number_id(target)
            .await
            .map_err(|err| self.classify(err))?
            .ok_or_else(|| GatewayError::NotRegistered(target.to_string()))?;
        debug!("sending message to {resolved} (attempt {attempt})");

        if let Err(err) = client.chat_by_id(&resolved).await {
            warn!("could not pre-load chat {resolved}: {err}");
        }

        let sent = client
            .send_message(&resolved, content, SendOptions { send_seen: false })
            .await
            .map_err(|err| self.classify(err))?;
        Ok((resolved, sent))
    }

    fn classify(&self, err: CollaboratorError) -> GatewayError {
        if err.mentions(&self.session.config().transient_fault_signature) {
            GatewayError::TransientSessionFault(err.to_string())
        } else {
            GatewayError::SendFailed(err.to_string())
        }
    }
}
