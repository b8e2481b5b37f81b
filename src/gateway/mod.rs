//! Extended operations: labels, notes, chat flags, groups, contacts and
//! actions on recent messages.
//!
//! Operations that newer client versions expose natively go through
//! [`operation::execute`]: the native method first, then a single
//! [`StoreScript`](crate::collaborator::StoreScript) fallback.

mod chats;
mod contacts;
mod groups;
mod labels;
mod messages;
pub mod operation;

use std::sync::Arc;

use crate::collaborator::AutomationClient;
use crate::error::{GatewayError, GatewayResult};
use crate::session::SessionManager;
use crate::types::{normalize, Identifier};

pub use operation::{ExecutionPath, ExecutionRecord, FeatureOperation, OpOutcome};

pub struct FeatureGateway {
    session: Arc<SessionManager>,
}

impl FeatureGateway {
    pub fn new(session: Arc<SessionManager>) -> Self {
        Self { session }
    }

    async fn client(&self) -> GatewayResult<Arc<dyn AutomationClient>> {
        self.session.client().await
    }

    fn message_window(&self) -> usize {
        self.session.config().message_window
    }

    fn media_window(&self) -> usize {
        self.session.config().media_window
    }
}

/// Normalizes a caller-supplied chat/contact handle and rejects empty ones.
fn target(raw: &str) -> GatewayResult<Identifier> {
    normalize(raw).require_valid()
}

fn require_text(field: &str, value: &str) -> GatewayResult<()> {
    if value.trim().is_empty() {
        return Err(GatewayError::InvalidRequest(format!("{field} required")));
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::collaborator::memory::MemoryClientFactory;
    use crate::config::GatewayConfig;

    pub(crate) struct Fixture {
        pub factory: Arc<MemoryClientFactory>,
        pub session: Arc<SessionManager>,
        pub gateway: FeatureGateway,
    }

    /// A ready session over a fresh in-memory world.
    pub(crate) async fn ready() -> Fixture {
        let factory = Arc::new(MemoryClientFactory::new().with_saved_session());
        let session = SessionManager::new(GatewayConfig::default(), factory.clone());
        session.start().await.unwrap();
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(session.is_ready());
        Fixture {
            factory,
            gateway: FeatureGateway::new(session.clone()),
            session,
        }
    }
}
