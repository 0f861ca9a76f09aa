//! Test report: per IP version, one entry per TURN URI.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::candidate::{CandidateType, IceCandidate, IpVersion};
use super::relay::RelayResult;
use super::turn::{TurnConfig, TurnUri};
use crate::error::{ErrorKind, VoipTestError};

/// Counts over the candidates gathered for one URI.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CandidateSummary {
    /// Gathering reached end-of-candidates.
    pub complete: bool,
    pub total: usize,
    pub host: usize,
    pub srflx: usize,
    pub prflx: usize,
    pub relay: usize,
    pub relay_ipv4: usize,
    pub relay_ipv6: usize,
    pub transports: BTreeSet<String>,
}

impl CandidateSummary {
    /// Summary of a gathering that reached end-of-candidates.
    pub fn from_candidates(candidates: &[IceCandidate]) -> Self {
        Self::count(candidates, true)
    }

    /// Summary of what was gathered before gathering failed.
    pub fn incomplete(candidates: &[IceCandidate]) -> Self {
        Self::count(candidates, false)
    }

    fn count(candidates: &[IceCandidate], complete: bool) -> Self {
        let mut summary = CandidateSummary {
            complete,
            total: candidates.len(),
            ..Default::default()
        };
        for c in candidates {
            match c.candidate_type {
                CandidateType::Host => summary.host += 1,
                CandidateType::ServerReflexive => summary.srflx += 1,
                CandidateType::PeerReflexive => summary.prflx += 1,
                CandidateType::Relay => {
                    summary.relay += 1;
                    match c.ip_version() {
                        IpVersion::IPv4 => summary.relay_ipv4 += 1,
                        IpVersion::IPv6 => summary.relay_ipv6 += 1,
                    }
                }
            }
            summary.transports.insert(c.transport.as_str().to_string());
        }
        summary
    }
}

/// What happened when relaying was tested.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RelayOutcome {
    Relayed(RelayResult),
    /// No relay candidate of the pass's IP version was gathered.
    NoCandidate,
    Failed { kind: ErrorKind, message: String },
}

impl RelayOutcome {
    pub fn failed(err: &VoipTestError) -> Self {
        RelayOutcome::Failed {
            kind: err.kind(),
            message: err.to_string(),
        }
    }

    pub fn from_result(res: Result<Option<RelayResult>, VoipTestError>) -> Self {
        match res {
            Ok(Some(result)) => RelayOutcome::Relayed(result),
            Ok(None) => RelayOutcome::NoCandidate,
            Err(e) => RelayOutcome::failed(&e),
        }
    }
}

/// Overall verdict for one URI in one pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UriSummary {
    pub success: bool,
    /// Gathering plus relay test.
    pub elapsed_ms: u64,
    pub features: BTreeSet<String>,
}

impl UriSummary {
    pub fn compute(uri: &str, relay: &RelayOutcome, elapsed_ms: u64) -> Self {
        let mut features = TurnUri::parse(uri)
            .map(|u| u.features())
            .unwrap_or_default();
        let success = match relay {
            RelayOutcome::Relayed(r) => {
                features.insert(format!("relay-{}", r.transport.as_str()));
                true
            }
            _ => false,
        };
        UriSummary {
            success,
            elapsed_ms,
            features,
        }
    }
}

/// Raw material captured when debug capture is on.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UriDebug {
    pub candidates: Vec<IceCandidate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TurnUriReport {
    pub uri: String,
    pub candidates: Option<CandidateSummary>,
    pub relay: Option<RelayOutcome>,
    pub summary: Option<UriSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug: Option<UriDebug>,
}

impl TurnUriReport {
    pub fn new(uri: &str) -> Self {
        Self {
            uri: uri.to_string(),
            candidates: None,
            relay: None,
            summary: None,
            debug: None,
        }
    }

    /// Fill in the summary. No-op until both candidates and relay are known.
    pub fn finish(&mut self, elapsed_ms: u64) {
        if let (Some(_), Some(relay)) = (&self.candidates, &self.relay) {
            self.summary = Some(UriSummary::compute(&self.uri, relay, elapsed_ms));
        }
    }

    pub fn is_success(&self) -> bool {
        self.summary.as_ref().map(|s| s.success).unwrap_or(false)
    }
}

/// Results of one IP-version pass, in TURN URI order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct TestPassReport {
    entries: Vec<TurnUriReport>,
}

impl TestPassReport {
    pub fn push(&mut self, entry: TurnUriReport) {
        self.entries.push(entry);
    }

    #[cfg(test)]
    pub fn get(&self, uri: &str) -> Option<&TurnUriReport> {
        self.entries.iter().find(|e| e.uri == uri)
    }

    pub fn entries(&self) -> &[TurnUriReport] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn successes(&self) -> usize {
        self.entries.iter().filter(|e| e.is_success()).count()
    }
}

/// Everything one run found out.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub turn_config: TurnConfig,
    pub passes: BTreeMap<IpVersion, TestPassReport>,
}

impl TestReport {
    #[cfg(test)]
    pub fn pass(&self, ip_version: IpVersion) -> Option<&TestPassReport> {
        self.passes.get(&ip_version)
    }

    /// At least one URI relayed in at least one pass.
    pub fn any_success(&self) -> bool {
        self.passes.values().any(|p| p.successes() > 0)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

fn describe_outcome(relay: Option<&RelayOutcome>) -> String {
    match relay {
        Some(RelayOutcome::Relayed(r)) => format!(
            "OK via {} ({}, {} ms)",
            r.relay_ip,
            r.transport.as_str(),
            r.elapsed_ms
        ),
        Some(RelayOutcome::NoCandidate) => "no relay candidate".to_string(),
        Some(RelayOutcome::Failed { message, .. }) => format!("FAILED: {}", message),
        None => "not tested".to_string(),
    }
}

impl fmt::Display for TestReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "VoIP relay test {}", self.run_id)?;
        writeln!(
            f,
            "  {} .. {}",
            self.started_at.format("%Y-%m-%d %H:%M:%S UTC"),
            self.finished_at.format("%H:%M:%S UTC")
        )?;
        writeln!(
            f,
            "  {} TURN URI(s), username {}",
            self.turn_config.uris.len(),
            self.turn_config.username
        )?;

        for (ip_version, pass) in &self.passes {
            writeln!(f)?;
            writeln!(
                f,
                "{}: {}/{} relaying",
                ip_version,
                pass.successes(),
                pass.len()
            )?;
            for entry in pass.entries() {
                writeln!(f, "  {}", entry.uri)?;
                if let Some(c) = &entry.candidates {
                    if c.complete {
                        writeln!(
                            f,
                            "    candidates: {} (host {}, srflx {}, relay {})",
                            c.total, c.host, c.srflx, c.relay
                        )?;
                    } else {
                        writeln!(
                            f,
                            "    candidates: {} before gathering stopped (host {}, srflx {}, relay {})",
                            c.total, c.host, c.srflx, c.relay
                        )?;
                    }
                }
                writeln!(f, "    relay: {}", describe_outcome(entry.relay.as_ref()))?;
                if let Some(s) = &entry.summary {
                    let features: Vec<&str> = s.features.iter().map(String::as_str).collect();
                    writeln!(f, "    features: {}", features.join(", "))?;
                }
            }
        }
        Ok(())
    }
}
