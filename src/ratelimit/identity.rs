//! Client identity keys.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

/// The key under which request counts are tracked.
///
/// Identities are resolved upstream: anonymous clients by IP address or
/// session token, authenticated clients by API key. An anonymous and an
/// authenticated identity sharing the same string are distinct.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientIdentity {
    /// An unauthenticated client, keyed by IP address or session token
    Anonymous(String),
    /// A client presenting a registered API key
    Authenticated(String),
}

impl ClientIdentity {
    pub fn anonymous(ip_or_session_key: impl Into<String>) -> Self {
        ClientIdentity::Anonymous(ip_or_session_key.into())
    }

    pub fn authenticated(api_key: impl Into<String>) -> Self {
        ClientIdentity::Authenticated(api_key.into())
    }

    /// Anonymous identity for a remote address.
    pub fn from_ip(addr: IpAddr) -> Self {
        ClientIdentity::Anonymous(addr.to_string())
    }

    /// The raw key string, without the identity kind.
    pub fn key(&self) -> &str {
        match self {
            ClientIdentity::Anonymous(key) | ClientIdentity::Authenticated(key) => key,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, ClientIdentity::Authenticated(_))
    }
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientIdentity::Anonymous(key) => write!(f, "anon:{}", key),
            ClientIdentity::Authenticated(key) => write!(f, "key:{}", key),
        }
    }
}
