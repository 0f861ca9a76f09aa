//! Candidate gathering for a single TURN URI.

use std::time::Duration;

use super::cancel::Cancellation;
use super::candidate::IceCandidate;
use super::engine::{CandidateGatheringResult, IceEngine, PeerSession};
use super::turn::IceServer;
use crate::error::VoipTestError;

/// Gathering that ended without the end-of-candidates marker.
#[derive(Debug)]
pub struct GatheringFailure {
    pub error: VoipTestError,
    /// Candidates discovered before the failure, in discovery order.
    pub candidates: Vec<IceCandidate>,
}

impl From<VoipTestError> for GatheringFailure {
    fn from(error: VoipTestError) -> Self {
        Self {
            error,
            candidates: Vec::new(),
        }
    }
}

/// Open a session against `server` and collect its local candidates until
/// the end-of-candidates marker.
///
/// The session is returned open. On timeout, cancellation or engine failure
/// it is closed, and the error comes back with whatever was gathered.
pub async fn gather_candidates<E: IceEngine>(
    engine: &E,
    server: &IceServer,
    timeout: Duration,
    cancel: &Cancellation,
) -> Result<CandidateGatheringResult<E::Session>, GatheringFailure> {
    tracing::debug!("Opening ICE session for {}", server.uri);
    let mut session = cancel.guard(engine.open_session(server)).await?;

    let mut candidates = Vec::new();
    let res = cancel
        .guard_with_deadline(
            timeout,
            VoipTestError::GatheringTimeout(timeout),
            collect(&mut session, &mut candidates),
        )
        .await;

    match res {
        Ok(()) => {
            tracing::debug!(
                "Gathered {} candidates for {}",
                candidates.len(),
                server.uri
            );
            Ok(CandidateGatheringResult {
                session,
                candidates,
            })
        }
        Err(e) => {
            tracing::warn!(
                "Candidate gathering for {} failed after {} candidates: {}",
                server.uri,
                candidates.len(),
                e
            );
            session.close().await;
            Err(GatheringFailure {
                error: e,
                candidates,
            })
        }
    }
}

async fn collect<S: PeerSession>(
    session: &mut S,
    candidates: &mut Vec<IceCandidate>,
) -> Result<(), VoipTestError> {
    while let Some(candidate) = session.next_candidate().await? {
        tracing::debug!("ICE candidate: {}", candidate.candidate);
        candidates.push(candidate);
    }
    Ok(())
}
