//! TURN server configuration handed out by the homeserver, plus URI parsing
//! for the feature flags shown in the report.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Default TURN port (RFC 5766).
const DEFAULT_TURN_PORT: u16 = 3478;
/// Default TURN-over-TLS port.
const DEFAULT_TURNS_PORT: u16 = 5349;

/// TURN credentials and URIs from `/voip/turnServer`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnConfig {
    pub uris: Vec<String>,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
    /// Credential lifetime in seconds, if the homeserver reported one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u64>,
}

/// A single ICE server entry for one session.
#[derive(Debug, Clone, PartialEq)]
pub struct IceServer {
    pub uri: String,
    pub username: String,
    pub credential: String,
}

impl IceServer {
    pub fn from_config(config: &TurnConfig, uri: &str) -> Self {
        Self {
            uri: uri.to_string(),
            username: config.username.clone(),
            credential: config.password.clone(),
        }
    }
}

/// Transport for a TURN server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnTransport {
    Udp,
    Tcp,
    Tls,
}

/// Parsed `turn:`/`turns:` URI.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnUri {
    pub secure: bool,
    pub host: String,
    pub port: u16,
    pub transport: TurnTransport,
}

impl TurnUri {
    /// Parse a TURN URI like `turn:host:port?transport=udp` or `turns:host:port`.
    pub fn parse(uri: &str) -> Option<TurnUri> {
        let (secure, rest) = if let Some(rest) = uri.strip_prefix("turns:") {
            (true, rest)
        } else if let Some(rest) = uri.strip_prefix("turn:") {
            (false, rest)
        } else {
            return None;
        };

        let (host_port, query) = rest.split_once('?').unwrap_or((rest, ""));
        let transport = if secure {
            TurnTransport::Tls
        } else if query.contains("transport=tcp") {
            TurnTransport::Tcp
        } else {
            TurnTransport::Udp
        };

        let default_port = if secure {
            DEFAULT_TURNS_PORT
        } else {
            DEFAULT_TURN_PORT
        };

        // IPv6 literals are bracketed: turn:[2001:db8::1]:3478
        let (host, port) = if let Some(bracketed) = host_port.strip_prefix('[') {
            let (host, after) = bracketed.split_once(']')?;
            let port = after
                .strip_prefix(':')
                .and_then(|p| p.parse().ok())
                .unwrap_or(default_port);
            (host.to_string(), port)
        } else if let Some((h, p)) = host_port.rsplit_once(':') {
            (h.to_string(), p.parse().unwrap_or(default_port))
        } else {
            (host_port.to_string(), default_port)
        };

        if host.is_empty() {
            return None;
        }

        Some(TurnUri {
            secure,
            host,
            port,
            transport,
        })
    }

    /// Feature flags for the report (`turns`, `tcp`, `port-443`, ...).
    pub fn features(&self) -> BTreeSet<String> {
        let mut features = BTreeSet::new();
        features.insert(if self.secure { "turns" } else { "turn" }.to_string());
        features.insert(
            match self.transport {
                TurnTransport::Udp => "udp",
                TurnTransport::Tcp => "tcp",
                TurnTransport::Tls => "tls",
            }
            .to_string(),
        );
        if self.port == 443 {
            features.insert("port-443".to_string());
        }
        features
    }
}
