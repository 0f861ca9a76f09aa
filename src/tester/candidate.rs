//! Local ICE candidates as reported by the WebRTC engine.
//!
//! Only the fields the relay test needs are kept: the raw SDP candidate line
//! (used verbatim when doctoring the offer), the candidate type, the address,
//! the port and the transport protocol.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::VoipTestError;

/// SDP attribute prefix of a candidate line.
pub const CANDIDATE_ATTR_PREFIX: &str = "a=candidate:";

/// ICE candidate type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CandidateType {
    #[serde(rename = "host")]
    Host,
    #[serde(rename = "srflx")]
    ServerReflexive,
    #[serde(rename = "prflx")]
    PeerReflexive,
    #[serde(rename = "relay")]
    Relay,
}

impl CandidateType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CandidateType::Host => "host",
            CandidateType::ServerReflexive => "srflx",
            CandidateType::PeerReflexive => "prflx",
            CandidateType::Relay => "relay",
        }
    }
}

impl fmt::Display for CandidateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// ICE transport protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    Udp,
    Tcp,
}

impl Transport {
    pub fn as_str(&self) -> &'static str {
        match self {
            Transport::Udp => "udp",
            Transport::Tcp => "tcp",
        }
    }
}

/// A gathered local ICE candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IceCandidate {
    /// SDP candidate-line body without the `a=` prefix (`candidate:...`).
    pub candidate: String,
    #[serde(rename = "type")]
    pub candidate_type: CandidateType,
    pub ip: String,
    pub port: u16,
    pub transport: Transport,
}

impl IceCandidate {
    /// Build a candidate from its SDP line, with or without the `a=` prefix.
    pub fn from_sdp_line(line: &str) -> Result<Self, VoipTestError> {
        let line = line.trim();
        let body = line.strip_prefix("a=").unwrap_or(line);
        let parsed = parse_candidate(body)?;
        Ok(IceCandidate {
            candidate: body.to_string(),
            candidate_type: parsed.candidate_type,
            ip: parsed.address,
            port: parsed.port,
            transport: parsed.transport,
        })
    }

    /// The full SDP attribute line for this candidate (`a=candidate:...`).
    pub fn sdp_attribute(&self) -> String {
        format!("a={}", self.candidate)
    }

    pub fn ip_version(&self) -> IpVersion {
        IpVersion::of(&self.ip)
    }
}

/// IP version of a candidate address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum IpVersion {
    IPv4,
    IPv6,
}

impl IpVersion {
    /// Classify an address textually: a dotted quad of 1-3 digit groups is
    /// IPv4, anything else is IPv6.
    ///
    /// Hostnames (e.g. mDNS `.local` candidates) therefore count as IPv6.
    pub fn of(address: &str) -> IpVersion {
        let groups: Vec<&str> = address.split('.').collect();
        let dotted_quad = groups.len() == 4
            && groups
                .iter()
                .all(|g| (1..=3).contains(&g.len()) && g.bytes().all(|b| b.is_ascii_digit()));
        if dotted_quad {
            IpVersion::IPv4
        } else {
            IpVersion::IPv6
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            IpVersion::IPv4 => "IPv4",
            IpVersion::IPv6 => "IPv6",
        }
    }
}

impl fmt::Display for IpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fields of a `candidate:` line the tester cares about.
#[derive(Debug, Clone)]
struct ParsedCandidate {
    transport: Transport,
    address: String,
    port: u16,
    candidate_type: CandidateType,
}

/// Parse an `a=candidate:` or `candidate:` line. Trailing extensions
/// (`raddr`, `rport`, `tcptype`, ...) are ignored.
fn parse_candidate(line: &str) -> Result<ParsedCandidate, VoipTestError> {
    let bad = |what: &str| VoipTestError::Engine(format!("{}: {}", what, line));

    let line = line.trim();
    let content = line
        .strip_prefix(CANDIDATE_ATTR_PREFIX)
        .or_else(|| line.strip_prefix("candidate:"))
        .ok_or_else(|| bad("not a candidate line"))?;

    let parts: Vec<&str> = content.split_whitespace().collect();
    if parts.len() < 8 {
        return Err(bad("candidate line too short"));
    }

    parts[1].parse::<u16>().map_err(|_| bad("bad component"))?;

    let transport = match parts[2].to_ascii_lowercase().as_str() {
        "udp" => Transport::Udp,
        "tcp" => Transport::Tcp,
        _ => return Err(bad("unsupported transport")),
    };

    parts[3].parse::<u32>().map_err(|_| bad("bad priority"))?;
    let address = parts[4].to_string();
    let port: u16 = parts[5].parse().map_err(|_| bad("bad port"))?;

    if parts[6] != "typ" {
        return Err(bad("expected 'typ' keyword"));
    }

    let candidate_type = match parts[7] {
        "host" => CandidateType::Host,
        "srflx" => CandidateType::ServerReflexive,
        "prflx" => CandidateType::PeerReflexive,
        "relay" => CandidateType::Relay,
        _ => return Err(bad("unknown candidate type")),
    };

    Ok(ParsedCandidate {
        transport,
        address,
        port,
        candidate_type,
    })
}
