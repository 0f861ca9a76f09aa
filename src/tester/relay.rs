//! Relay verification for one gathered session.
//!
//! Picks a relay candidate of the wanted IP version, isolates it in the
//! offer, hands the doctored offer to the testing service and waits until
//! the data channel works. The test only passes if ICE ended up sending
//! from that relay candidate.

use std::time::{Duration, Instant};

use serde::Serialize;

use super::cancel::Cancellation;
use super::candidate::{CandidateType, IceCandidate, IpVersion, Transport};
use super::engine::{CandidateGatheringResult, PeerSession};
use super::remote::RemoteTestService;
use super::sdp::{self, SessionDescription};
use crate::error::VoipTestError;

/// Offer/answer pair exchanged during a relay test.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OfferAnswer {
    pub offer: SessionDescription,
    pub answer: SessionDescription,
}

/// A successful relay test.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelayResult {
    /// The candidate line kept in the doctored offer.
    pub candidate: String,
    pub relay_ip: String,
    pub transport: Transport,
    pub elapsed_ms: u64,
    #[serde(skip)]
    pub transcript: OfferAnswer,
}

/// First relay candidate, in gathering order, whose address is of `ip_version`.
pub fn select_relay_candidate(
    candidates: &[IceCandidate],
    ip_version: IpVersion,
) -> Option<&IceCandidate> {
    candidates
        .iter()
        .find(|c| c.candidate_type == CandidateType::Relay && c.ip_version() == ip_version)
}

/// Test TURN relaying over the session in `gathering`.
///
/// `Ok(None)` means there was no relay candidate of `ip_version` to test.
/// The session is left open; the caller closes it.
pub async fn test_turn_relaying<S: PeerSession>(
    ip_version: IpVersion,
    gathering: &mut CandidateGatheringResult<S>,
    remote: &RemoteTestService,
    timeout: Duration,
    cancel: &Cancellation,
) -> Result<Option<RelayResult>, VoipTestError> {
    let Some(candidate) = select_relay_candidate(&gathering.candidates, ip_version).cloned() else {
        tracing::info!("No {} relay candidate to test", ip_version);
        return Ok(None);
    };
    tracing::info!("Testing {} relay candidate {}", ip_version, candidate.ip);

    let started = Instant::now();
    let session = &mut gathering.session;
    let transcript = cancel
        .guard_with_deadline(
            timeout,
            VoipTestError::RelayTestTimeout(timeout),
            relay_exchange(session, &candidate, remote),
        )
        .await?;

    Ok(Some(RelayResult {
        candidate: candidate.candidate.clone(),
        relay_ip: candidate.ip.clone(),
        transport: candidate.transport,
        elapsed_ms: started.elapsed().as_millis() as u64,
        transcript,
    }))
}

async fn relay_exchange<S: PeerSession>(
    session: &mut S,
    candidate: &IceCandidate,
    remote: &RemoteTestService,
) -> Result<OfferAnswer, VoipTestError> {
    let local = session
        .local_description()
        .await
        .ok_or_else(|| VoipTestError::Engine("session has no local offer".into()))?;

    let doctored = SessionDescription::offer(sdp::doctor_offer_sdp(&local.sdp, candidate)?);

    // Commit the local peer to the single candidate.
    session.set_local_description(doctored.clone()).await?;
    tracing::debug!("Doctored offer applied");

    let answer = remote.exchange(&doctored, &candidate.candidate).await?;
    tracing::debug!("Answer received from testing service");
    session.set_remote_description(answer.clone()).await?;

    session.probe_relay().await?;
    match session.selected_path().await {
        Some(path) if path.is_through(candidate) => {
            tracing::info!("Relay confirmed via {}", path);
        }
        Some(path) => {
            return Err(VoipTestError::RelayNotUsed(format!(
                "connected over {}, expected relay {}:{}",
                path, candidate.ip, candidate.port
            )));
        }
        None => {
            return Err(VoipTestError::RelayNotUsed(
                "no selected candidate pair".into(),
            ));
        }
    }

    Ok(OfferAnswer {
        offer: doctored,
        answer,
    })
}
