//! Core value types shared by every component.
//!
//! Identifiers, lifecycle events and the chat/contact/label records that
//! travel between callers and the automation client.

mod events;
mod identifier;
mod models;

pub use events::*;
pub use identifier::*;
pub use models::*;
