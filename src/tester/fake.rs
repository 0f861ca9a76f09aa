//! Scripted in-memory engine for exercising the pipeline without a network.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::candidate::{CandidateType, IceCandidate};
use super::engine::{IceEngine, PeerSession, SelectedPath};
use super::sdp::{self, SessionDescription};
use super::turn::IceServer;
use crate::error::VoipTestError;

/// How a fake session behaves for one TURN URI.
#[derive(Debug, Clone, Default)]
pub struct FakeScript {
    candidates: Vec<String>,
    finishes: bool,
    echoes: bool,
    stale_offer: bool,
    direct: bool,
    open_error: Option<String>,
}

impl FakeScript {
    /// Yields `lines` then end-of-candidates; the relay probe succeeds.
    pub fn relaying(lines: &[&str]) -> Self {
        Self {
            candidates: lines.iter().map(|l| l.to_string()).collect(),
            finishes: true,
            echoes: true,
            ..Default::default()
        }
    }

    /// Never sends end-of-candidates.
    pub fn never_finishes(mut self) -> Self {
        self.finishes = false;
        self
    }

    /// The relay probe never gets an answer.
    pub fn silent(mut self) -> Self {
        self.echoes = false;
        self
    }

    /// ICE connects over the first non-relay candidate instead of the one
    /// left in the local offer.
    pub fn direct(mut self) -> Self {
        self.direct = true;
        self
    }

    /// The local offer carries no candidate lines.
    pub fn stale_offer(mut self) -> Self {
        self.stale_offer = true;
        self
    }

    pub fn failing_open(reason: &str) -> Self {
        Self {
            open_error: Some(reason.to_string()),
            ..Default::default()
        }
    }
}

#[derive(Default)]
struct FakeState {
    scripts: HashMap<String, FakeScript>,
    open: usize,
    max_open: usize,
    events: Vec<String>,
    local_sdps: Vec<String>,
}

/// Engine handing out [`FakeSession`]s according to per-URI scripts.
/// URIs without a script gather nothing and finish immediately.
#[derive(Clone, Default)]
pub struct FakeEngine {
    state: Arc<Mutex<FakeState>>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, uri: &str, script: FakeScript) {
        self.state
            .lock()
            .unwrap()
            .scripts
            .insert(uri.to_string(), script);
    }

    pub fn open_sessions(&self) -> usize {
        self.state.lock().unwrap().open
    }

    pub fn max_open_sessions(&self) -> usize {
        self.state.lock().unwrap().max_open
    }

    pub fn events(&self) -> Vec<String> {
        self.state.lock().unwrap().events.clone()
    }

    /// Every SDP applied through `set_local_description`, in order.
    pub fn local_sdps(&self) -> Vec<String> {
        self.state.lock().unwrap().local_sdps.clone()
    }
}

#[async_trait]
impl IceEngine for FakeEngine {
    type Session = FakeSession;

    async fn open_session(&self, server: &IceServer) -> Result<FakeSession, VoipTestError> {
        let mut state = self.state.lock().unwrap();
        let script = state.scripts.get(&server.uri).cloned().unwrap_or(FakeScript {
            finishes: true,
            ..Default::default()
        });
        if let Some(reason) = script.open_error {
            return Err(VoipTestError::Engine(reason));
        }

        let candidates: Vec<IceCandidate> = script
            .candidates
            .iter()
            .map(|l| IceCandidate::from_sdp_line(l).unwrap())
            .collect();

        let mut sdp = String::from(
            "v=0\r\no=- 1 2 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n\
             m=application 9 UDP/DTLS/SCTP webrtc-datachannel\r\na=mid:0\r\n",
        );
        if !script.stale_offer {
            for c in &candidates {
                sdp.push_str(&c.sdp_attribute());
                sdp.push_str("\r\n");
            }
        }
        sdp.push_str("a=sctp-port:5000\r\n");

        state.open += 1;
        state.max_open = state.max_open.max(state.open);
        state.events.push(format!("open {}", server.uri));

        Ok(FakeSession {
            uri: server.uri.clone(),
            gathered: candidates.clone(),
            pending: candidates.into(),
            finishes: script.finishes,
            echoes: script.echoes,
            direct: script.direct,
            local: Some(SessionDescription::offer(sdp)),
            remote: None,
            closed: false,
            state: Arc::clone(&self.state),
        })
    }
}

pub struct FakeSession {
    uri: String,
    gathered: Vec<IceCandidate>,
    pending: VecDeque<IceCandidate>,
    finishes: bool,
    echoes: bool,
    direct: bool,
    local: Option<SessionDescription>,
    remote: Option<SessionDescription>,
    closed: bool,
    state: Arc<Mutex<FakeState>>,
}

impl FakeSession {
    fn event(&self, what: &str) {
        self.state
            .lock()
            .unwrap()
            .events
            .push(format!("{} {}", what, self.uri));
    }
}

#[async_trait]
impl PeerSession for FakeSession {
    async fn next_candidate(&mut self) -> Result<Option<IceCandidate>, VoipTestError> {
        if let Some(c) = self.pending.pop_front() {
            return Ok(Some(c));
        }
        if !self.finishes {
            std::future::pending::<()>().await;
        }
        Ok(None)
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        self.local.clone()
    }

    async fn set_local_description(&mut self, desc: SessionDescription) -> Result<(), VoipTestError> {
        self.state.lock().unwrap().local_sdps.push(desc.sdp.clone());
        self.event("set-local");
        self.local = Some(desc);
        Ok(())
    }

    async fn set_remote_description(
        &mut self,
        desc: SessionDescription,
    ) -> Result<(), VoipTestError> {
        self.event("set-remote");
        self.remote = Some(desc);
        Ok(())
    }

    async fn probe_relay(&mut self) -> Result<(), VoipTestError> {
        if self.remote.is_none() {
            return Err(VoipTestError::Engine("no remote description".into()));
        }
        if !self.echoes {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn selected_path(&self) -> Option<SelectedPath> {
        self.remote.as_ref()?;
        let chosen = if self.direct {
            self.gathered
                .iter()
                .find(|c| c.candidate_type != CandidateType::Relay)
                .cloned()
        } else {
            let local = self.local.as_ref()?;
            sdp::candidate_lines(&local.sdp)
                .first()
                .and_then(|line| IceCandidate::from_sdp_line(line).ok())
        }?;
        Some(SelectedPath {
            candidate_type: chosen.candidate_type,
            ip: chosen.ip,
            port: chosen.port,
        })
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.state.lock().unwrap().open -= 1;
        self.event("close");
    }
}
