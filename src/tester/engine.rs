//! Seam between the test pipeline and the WebRTC engine doing the actual
//! ICE/TURN/DTLS work.

use async_trait::async_trait;

use std::fmt;

use super::candidate::{CandidateType, IceCandidate};
use super::sdp::SessionDescription;
use super::turn::IceServer;
use crate::error::VoipTestError;

/// Label of the data channel created in every session.
pub const DATA_CHANNEL_LABEL: &str = "voiptest";

/// Sent over the data channel once it opens through the relay.
pub const MAGIC_QUESTION: &str = "Hello? Is this on?";
/// Expected reply from the testing service.
pub const MAGIC_ANSWER: &str = "Yes; yes, it is! :^)";

/// Local end of the candidate pair ICE selected for a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedPath {
    pub candidate_type: CandidateType,
    pub ip: String,
    pub port: u16,
}

impl SelectedPath {
    /// Whether traffic leaves through `candidate` itself.
    pub fn is_through(&self, candidate: &IceCandidate) -> bool {
        self.candidate_type == candidate.candidate_type
            && self.ip == candidate.ip
            && self.port == candidate.port
    }
}

impl fmt::Display for SelectedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}:{}", self.candidate_type, self.ip, self.port)
    }
}

/// Creates ICE sessions, one per TURN URI under test.
#[async_trait]
pub trait IceEngine: Send + Sync {
    type Session: PeerSession;

    /// Open a session configured with exactly `server` and one data channel.
    ///
    /// The session synthesises and applies its local offer on its own, which
    /// starts candidate gathering.
    async fn open_session(&self, server: &IceServer) -> Result<Self::Session, VoipTestError>;
}

/// One live ICE agent plus data channel.
#[async_trait]
pub trait PeerSession: Send + Sync {
    /// Next discovered local candidate. `Ok(None)` is the end-of-candidates
    /// marker.
    async fn next_candidate(&mut self) -> Result<Option<IceCandidate>, VoipTestError>;

    /// Current local description, including gathered candidates.
    async fn local_description(&self) -> Option<SessionDescription>;

    async fn set_local_description(&mut self, desc: SessionDescription) -> Result<(), VoipTestError>;

    async fn set_remote_description(&mut self, desc: SessionDescription)
        -> Result<(), VoipTestError>;

    /// Wait until the data channel carried the magic question and answer.
    async fn probe_relay(&mut self) -> Result<(), VoipTestError>;

    /// Local end of the selected candidate pair. `None` until ICE connected.
    async fn selected_path(&self) -> Option<SelectedPath>;

    /// Release every resource of the session. Idempotent.
    async fn close(&mut self);
}

/// Outcome of candidate gathering for one TURN URI. Owns the live session.
pub struct CandidateGatheringResult<S> {
    pub session: S,
    pub candidates: Vec<IceCandidate>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selected_path_must_match_candidate() {
        let relay = IceCandidate::from_sdp_line(
            "candidate:3 1 udp 16777215 203.0.113.9 61000 typ relay raddr 10.0.0.5 rport 50000",
        )
        .unwrap();
        let path = SelectedPath {
            candidate_type: CandidateType::Relay,
            ip: "203.0.113.9".into(),
            port: 61000,
        };
        assert!(path.is_through(&relay));
        assert_eq!(path.to_string(), "relay 203.0.113.9:61000");

        let other_port = SelectedPath {
            port: 61001,
            ..path.clone()
        };
        assert!(!other_port.is_through(&relay));

        let host = SelectedPath {
            candidate_type: CandidateType::Host,
            ip: "10.0.0.5".into(),
            port: 50000,
        };
        assert!(!host.is_through(&relay));
    }
}
