//! Error taxonomy for the TURN relay tester.
//!
//! Authentication and TURN configuration errors abort a run. Everything that
//! can go wrong while testing a single TURN URI is recorded in that URI's
//! report entry instead.

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

/// Errors surfaced by the homeserver client, the remote testing service and
/// the relay test pipeline.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum VoipTestError {
    #[error("Bad access token: {0}")]
    BadAccessToken(String),

    #[error("Failed homeserver connection: {0}")]
    FailedHomeserverConnection(String),

    #[error("Bad credentials: {0}")]
    BadLoginCredentials(String),

    #[error("Login method not supported, supply an access token instead: {0}")]
    LoginMethodUnsupported(String),

    #[error("Bad TURN credentials: {0}")]
    BadTurnCredentials(String),

    #[error("Can't get TURN credentials from homeserver: {0}")]
    CannotGetTurnCredentials(String),

    #[error("No TURN servers: {0}")]
    NoTurnServers(String),

    #[error("Failed to doctor the SDP: wanted candidate `{0}` not found in offer")]
    SdpDoctorFailed(String),

    #[error("Failed testing service request: {0}")]
    RemoteServiceRequestFailed(String),

    #[error("Candidate gathering did not finish within {0:?}")]
    GatheringTimeout(Duration),

    #[error("Relay test did not finish within {0:?}")]
    RelayTestTimeout(Duration),

    #[error("Traffic did not go through the relay: {0}")]
    RelayNotUsed(String),

    #[error("WebRTC engine error: {0}")]
    Engine(String),

    #[error("Test run cancelled")]
    Cancelled,

    #[error("Unknown: {0}")]
    Unknown(String),
}

/// Stable, serialisable name for each error variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    BadAccessToken,
    FailedHomeserverConnection,
    BadLoginCredentials,
    LoginMethodUnsupported,
    BadTurnCredentials,
    CannotGetTurnCredentials,
    NoTurnServers,
    SdpDoctorFailed,
    RemoteServiceRequestFailed,
    GatheringTimeout,
    RelayTestTimeout,
    RelayNotUsed,
    Engine,
    Cancelled,
    Unknown,
}

impl VoipTestError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::BadAccessToken(_) => ErrorKind::BadAccessToken,
            Self::FailedHomeserverConnection(_) => ErrorKind::FailedHomeserverConnection,
            Self::BadLoginCredentials(_) => ErrorKind::BadLoginCredentials,
            Self::LoginMethodUnsupported(_) => ErrorKind::LoginMethodUnsupported,
            Self::BadTurnCredentials(_) => ErrorKind::BadTurnCredentials,
            Self::CannotGetTurnCredentials(_) => ErrorKind::CannotGetTurnCredentials,
            Self::NoTurnServers(_) => ErrorKind::NoTurnServers,
            Self::SdpDoctorFailed(_) => ErrorKind::SdpDoctorFailed,
            Self::RemoteServiceRequestFailed(_) => ErrorKind::RemoteServiceRequestFailed,
            Self::GatheringTimeout(_) => ErrorKind::GatheringTimeout,
            Self::RelayTestTimeout(_) => ErrorKind::RelayTestTimeout,
            Self::RelayNotUsed(_) => ErrorKind::RelayNotUsed,
            Self::Engine(_) => ErrorKind::Engine,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Unknown(_) => ErrorKind::Unknown,
        }
    }

    /// Whether this error ends the whole run rather than a single URI test.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::BadAccessToken(_)
                | Self::FailedHomeserverConnection(_)
                | Self::BadLoginCredentials(_)
                | Self::LoginMethodUnsupported(_)
                | Self::BadTurnCredentials(_)
                | Self::CannotGetTurnCredentials(_)
                | Self::NoTurnServers(_)
                | Self::Cancelled
                | Self::Unknown(_)
        )
    }

    pub fn engine(err: impl std::fmt::Display) -> Self {
        Self::Engine(err.to_string())
    }
}
