//! SDP doctoring: isolate a single candidate in an offer.
//!
//! Only behaves for offers with a single media section; with several
//! sections the wanted line survives only where it appears verbatim.

use serde::{Deserialize, Serialize};

use super::candidate::{IceCandidate, CANDIDATE_ATTR_PREFIX};
use crate::error::VoipTestError;

/// SDP description type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Pranswer,
    Answer,
    Rollback,
}

/// Session description in its JSON wire form: `{"type": ..., "sdp": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: String) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp,
        }
    }

    #[cfg(test)]
    pub fn answer(sdp: String) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp,
        }
    }
}

/// Remove every candidate line from `offer_sdp` except the one for `wanted`.
///
/// Accepts CRLF or LF input, always emits CRLF. Fails if the wanted
/// candidate does not appear verbatim in the offer.
pub fn doctor_offer_sdp(offer_sdp: &str, wanted: &IceCandidate) -> Result<String, VoipTestError> {
    let checking_for = wanted.sdp_attribute();
    let mut found = false;

    let kept: Vec<&str> = offer_sdp
        .split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .filter(|line| {
            if !line.starts_with(CANDIDATE_ATTR_PREFIX) {
                return true;
            }
            if *line == checking_for {
                found = true;
                true
            } else {
                false
            }
        })
        .collect();

    if !found {
        return Err(VoipTestError::SdpDoctorFailed(wanted.candidate.clone()));
    }

    Ok(kept.join("\r\n"))
}

/// Candidate lines (`a=candidate:...`) of an SDP blob, in order.
#[cfg(test)]
pub fn candidate_lines(sdp: &str) -> Vec<&str> {
    sdp.lines()
        .map(str::trim_end)
        .filter(|line| line.starts_with(CANDIDATE_ATTR_PREFIX))
        .collect()
}
