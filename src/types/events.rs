//! Lifecycle events republished by the session manager.

use serde::Serialize;

use crate::types::{Identifier, OrderMetadata};

/// Inbound (or self-authored, echoed) message as seen by subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
    pub id: String,
    pub body: String,
    pub from: String,
    pub to: String,
    pub from_me: bool,
    pub timestamp: i64,
    pub has_media: bool,
    #[serde(rename = "type")]
    pub kind: String,
    pub author: Option<String>,
    pub chat_id: Option<Identifier>,
    pub chat_name: Option<String>,
    pub unread_count: Option<u32>,
    #[serde(flatten)]
    pub order: OrderMetadata,
}

/// Everything the session manager tells the outside world.
#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleEvent {
    /// A new pairing QR payload is available.
    QrIssued(String),
    Authenticated,
    AuthFailed(String),
    Ready,
    Disconnected(String),
    InboundMessage(Box<InboundMessage>),
}

impl LifecycleEvent {
    /// Event name used on the external broadcaster.
    pub fn name(&self) -> &'static str {
        match self {
            LifecycleEvent::QrIssued(_) => "whatsapp_qr",
            LifecycleEvent::Authenticated => "whatsapp_authenticated",
            LifecycleEvent::AuthFailed(_) => "whatsapp_auth_failure",
            LifecycleEvent::Ready => "whatsapp_ready",
            LifecycleEvent::Disconnected(_) => "whatsapp_disconnected",
            LifecycleEvent::InboundMessage(_) => "whatsapp_message",
        }
    }

    /// JSON payload accompanying [`LifecycleEvent::name`].
    pub fn payload(&self) -> serde_json::Value {
        match self {
            LifecycleEvent::QrIssued(qr) => serde_json::Value::String(qr.clone()),
            LifecycleEvent::AuthFailed(reason) | LifecycleEvent::Disconnected(reason) => {
                serde_json::Value::String(reason.clone())
            }
            LifecycleEvent::Authenticated | LifecycleEvent::Ready => serde_json::Value::Null,
            LifecycleEvent::InboundMessage(message) => {
                serde_json::to_value(message).unwrap_or(serde_json::Value::Null)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::normalize;

    #[test]
    fn inbound_payload_uses_camel_case_and_flattens_order_fields() {
        let message = InboundMessage {
            id: "false_201001112222@c.us_ABC".into(),
            body: "hello".into(),
            from: "201001112222@c.us".into(),
            to: "201009998888@c.us".into(),
            from_me: false,
            timestamp: 1_700_000_000,
            has_media: false,
            kind: "chat".into(),
            author: None,
            chat_id: Some(normalize("201001112222")),
            chat_name: Some("Mona".into()),
            unread_count: Some(2),
            order: OrderMetadata {
                order_title: Some("Order #12".into()),
                ..Default::default()
            },
        };

        let event = LifecycleEvent::InboundMessage(Box::new(message));
        assert_eq!(event.name(), "whatsapp_message");
        let payload = event.payload();
        assert_eq!(payload["fromMe"], false);
        assert_eq!(payload["type"], "chat");
        assert_eq!(payload["chatId"], "201001112222@c.us");
        assert_eq!(payload["orderTitle"], "Order #12");
    }

    #[test]
    fn ready_has_null_payload() {
        assert_eq!(LifecycleEvent::Ready.payload(), serde_json::Value::Null);
        assert_eq!(
            LifecycleEvent::Disconnected("LOGOUT".into()).payload(),
            serde_json::json!("LOGOUT")
        );
    }
}
