//! Republishes session lifecycle events to an external event bus.

use std::sync::Arc;

use log::info;
use tokio::task::JoinHandle;

use crate::session::SessionManager;
use crate::types::LifecycleEvent;

/// External fan-out surface (a websocket hub, a message bus, ...).
///
/// Delivery is fire-and-forget: implementations must not block and have no
/// way to report failure back to the session.
pub trait EventBroadcaster: Send + Sync {
    fn emit(&self, name: &str, payload: serde_json::Value);
}

/// Writes every event to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogBroadcaster;

impl EventBroadcaster for LogBroadcaster {
    fn emit(&self, name: &str, payload: serde_json::Value) {
        match payload {
            serde_json::Value::Null => info!("event {name}"),
            payload => info!("event {name}: {payload}"),
        }
    }
}

/// Forwards lifecycle events to an [`EventBroadcaster`], in emission order.
pub struct BroadcasterAdapter {
    sink: Arc<dyn EventBroadcaster>,
}

impl BroadcasterAdapter {
    pub fn new(sink: Arc<dyn EventBroadcaster>) -> Self {
        Self { sink }
    }

    pub fn forward(&self, event: &LifecycleEvent) {
        self.sink.emit(event.name(), event.payload());
    }

    /// Subscribes to `session` and forwards until the session is dropped.
    pub fn attach(self, session: &SessionManager) -> JoinHandle<()> {
        session.on_lifecycle_event(move |event| self.forward(&event))
    }
}
