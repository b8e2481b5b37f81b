use serde::Serialize;
use thiserror::Error;

use crate::collaborator::CollaboratorError;

/// Errors surfaced to callers of the gateway.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum GatewayError {
    #[error("WhatsApp is not connected")]
    NotConnected,
    #[error("the number {0} is not registered on WhatsApp")]
    NotRegistered(String),
    #[error("transient session fault: {0}")]
    TransientSessionFault(String),
    #[error("failed to send message: {0}")]
    SendFailed(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("{operation} is not supported by this client: {cause}")]
    FeatureUnsupported { operation: String, cause: String },
    #[error("label {0} is still assigned to chats")]
    LabelInUse(String),
    #[error("invalid identifier {0:?}")]
    InvalidIdentifier(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("client store is unavailable for {0}")]
    StoreUnavailable(String),
    #[error("chat {0} is not a group")]
    NotAGroup(String),
    #[error("operation timed out after {0} seconds")]
    Timeout(u64),
    #[error("client error: {0}")]
    Collaborator(String),
    #[error("configuration error: {0}")]
    Config(String),
}

/// Stable, caller-facing name of an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotConnected,
    NotRegistered,
    TransientSessionFault,
    SendFailed,
    NotFound,
    FeatureUnsupported,
    LabelInUse,
    InvalidIdentifier,
    InvalidRequest,
    StoreUnavailable,
    NotAGroup,
    Timeout,
    Collaborator,
    Config,
}

impl GatewayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::NotConnected => ErrorKind::NotConnected,
            GatewayError::NotRegistered(_) => ErrorKind::NotRegistered,
            GatewayError::TransientSessionFault(_) => ErrorKind::TransientSessionFault,
            GatewayError::SendFailed(_) => ErrorKind::SendFailed,
            GatewayError::NotFound(_) => ErrorKind::NotFound,
            GatewayError::FeatureUnsupported { .. } => ErrorKind::FeatureUnsupported,
            GatewayError::LabelInUse(_) => ErrorKind::LabelInUse,
            GatewayError::InvalidIdentifier(_) => ErrorKind::InvalidIdentifier,
            GatewayError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            GatewayError::StoreUnavailable(_) => ErrorKind::StoreUnavailable,
            GatewayError::NotAGroup(_) => ErrorKind::NotAGroup,
            GatewayError::Timeout(_) => ErrorKind::Timeout,
            GatewayError::Collaborator(_) => ErrorKind::Collaborator,
            GatewayError::Config(_) => ErrorKind::Config,
        }
    }
}

impl From<CollaboratorError> for GatewayError {
    fn from(err: CollaboratorError) -> Self {
        match err {
            CollaboratorError::NotFound(what) => GatewayError::NotFound(what),
            CollaboratorError::LabelInUse(label) => GatewayError::LabelInUse(label),
            CollaboratorError::Unsupported(method) => GatewayError::FeatureUnsupported {
                operation: method.to_string(),
                cause: "method not available".into(),
            },
            CollaboratorError::Failed(message) => GatewayError::Collaborator(message),
        }
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_serialize_in_snake_case() {
        let kind = GatewayError::LabelInUse("7".into()).kind();
        assert_eq!(serde_json::to_value(kind).unwrap(), "label_in_use");
        assert_eq!(
            serde_json::to_value(GatewayError::NotConnected.kind()).unwrap(),
            "not_connected"
        );
    }

    #[test]
    fn collaborator_errors_keep_their_meaning() {
        assert_eq!(
            GatewayError::from(CollaboratorError::NotFound("chat 1@c.us".into())),
            GatewayError::NotFound("chat 1@c.us".into())
        );
        assert_eq!(
            GatewayError::from(CollaboratorError::Failed("boom".into())).kind(),
            ErrorKind::Collaborator
        );
    }
}
