//! Canonical chat/contact identifiers.
//!
//! Callers hand us phone numbers in every shape imaginable: `+20 100 111 2222`,
//! `0020-100-111-2222`, `201001112222@c.us`. The automation client only accepts
//! the `<digits>@<server>` form, so everything is funneled through [`normalize`].

use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::GatewayError;

/// Server suffixes understood by the automation client.
pub mod servers {
    pub const USER: &str = "c.us";
    pub const DEFAULT_USER: &str = "s.whatsapp.net";
    pub const GROUP: &str = "g.us";
}

/// Addressing domain of an identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    #[default]
    User,
    Group,
}

impl Domain {
    /// Server suffix the automation client expects for this domain.
    pub fn server(&self) -> &'static str {
        match self {
            Domain::User => servers::USER,
            Domain::Group => servers::GROUP,
        }
    }

    /// Maps a server suffix to a domain. Unknown suffixes yield `None`.
    pub fn from_server(server: &str) -> Option<Self> {
        match server {
            servers::USER | servers::DEFAULT_USER => Some(Domain::User),
            servers::GROUP => Some(Domain::Group),
            _ => None,
        }
    }
}

/// A normalized handle: digits-only local part plus domain.
///
/// Only [`normalize`] builds these, so a value in hand never carries a `+` or
/// international `00` prefix. The local part may still be empty when the raw
/// input contained no digits; use [`Identifier::require_valid`] before handing
/// one to the collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identifier {
    local_part: String,
    domain: Domain,
}

impl Identifier {
    pub fn local_part(&self) -> &str {
        &self.local_part
    }

    pub fn domain(&self) -> Domain {
        self.domain
    }

    pub fn is_group(&self) -> bool {
        self.domain == Domain::Group
    }

    /// True when normalization found no digits at all.
    pub fn is_empty(&self) -> bool {
        self.local_part.is_empty()
    }

    /// Rejects identifiers with an empty local part.
    pub fn require_valid(self) -> Result<Self, GatewayError> {
        if self.is_empty() {
            return Err(GatewayError::InvalidIdentifier(self.to_string()));
        }
        Ok(self)
    }

    /// Same local part, forced into the user domain.
    pub fn as_user(&self) -> Self {
        Self {
            local_part: self.local_part.clone(),
            domain: Domain::User,
        }
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.local_part, self.domain.server())
    }
}

impl FromStr for Identifier {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(normalize(s))
    }
}

impl Serialize for Identifier {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Identifier {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(normalize(&raw))
    }
}

/// Canonicalizes a raw handle.
///
/// Keeps only digits (a leading `+` is the one tolerated non-digit and is then
/// dropped), removes a leading `00` once, and keeps the domain named by an
/// `@server` suffix, defaulting to the user domain. Never fails.
pub fn normalize(raw: &str) -> Identifier {
    let raw = raw.trim();
    let (user, server) = match raw.split_once('@') {
        Some((user, server)) => (user, Some(server.trim().to_ascii_lowercase())),
        None => (raw, None),
    };

    let domain = match server.as_deref() {
        None | Some("") => Domain::User,
        Some(server) => Domain::from_server(server).unwrap_or_else(|| {
            log::debug!("unknown server suffix {server:?}, treating {user:?} as a user handle");
            Domain::User
        }),
    };

    let digits: String = user.chars().filter(char::is_ascii_digit).collect();
    let local_part = match digits.strip_prefix("00") {
        Some(rest) => rest.to_string(),
        None => digits,
    };

    Identifier { local_part, domain }
}

/// Normalizes a group participant. Participants are always users.
pub fn normalize_participant(raw: &str) -> Identifier {
    normalize(raw).as_user()
}
