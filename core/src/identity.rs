//! Identities and server endpoints used when registering with a network

use serde::{Deserialize, Serialize};
use std::fmt;

/// TLS behaviour for an outbound server connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TlsMode {
    /// Plain TCP
    #[default]
    None,
    /// Start plain, upgrade via STARTTLS when the server offers it
    Opportunistic,
    /// TLS handshake immediately after connect
    Required,
}

/// An IRC server endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSpec {
    /// Server hostname
    pub host: String,
    /// Server port
    pub port: u16,
    /// TLS mode
    #[serde(default)]
    pub tls: TlsMode,
}

impl fmt::Display for ServerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Registration identity for a network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Primary nickname
    pub nick: String,
    /// Alternate nicknames, consumed left-to-right on collision
    #[serde(default)]
    pub nick_alt: Vec<String>,
    /// Username (ident)
    pub user_name: String,
    /// Real name
    pub real_name: String,
}
