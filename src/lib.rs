//! wweb-gateway: lifecycle and reliability layer for a browser-automated
//! WhatsApp Web client.
//!
//! The crate never speaks the WhatsApp protocol. It drives an opaque
//! automation client (see [`collaborator`]) and adds what that client lacks:
//!
//! - `types` - identifiers, lifecycle events and chat/contact records
//! - `session` - the single long-lived session and its crash recovery
//! - `dispatch` - sends with registration lookup and transient-fault retry
//! - `gateway` - labels, notes, chat flags, groups and contacts with a
//!   low-level fallback for client versions lacking a method
//! - `broadcast` - republishing lifecycle events to external subscribers
//! - `api` - caller-facing operations returning serializable outcomes

pub mod api;
pub mod broadcast;
pub mod collaborator;
pub mod dispatch;
pub mod gateway;
pub mod session;
pub mod types;

mod config;
mod error;
mod state;

pub use api::{Gateway, Outcome, QrStatus, SessionStatus};
pub use config::GatewayConfig;
pub use error::{ErrorKind, GatewayError, GatewayResult};
pub use state::{SessionPhase, SessionState};

pub use types::{normalize, Identifier, LifecycleEvent};
