//! `IceEngine` backed by the `webrtc` crate.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use tokio::sync::mpsc;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice::candidate::{CandidatePairState, CandidateType as IceCandidateType};
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::ice_transport::ice_credential_type::RTCIceCredentialType;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::policy::ice_transport_policy::RTCIceTransportPolicy;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::stats::{StatsReport, StatsReportType};

use super::candidate::{CandidateType, IceCandidate};
use super::engine::{
    IceEngine, PeerSession, SelectedPath, DATA_CHANNEL_LABEL, MAGIC_ANSWER, MAGIC_QUESTION,
};
use super::sdp::{SdpType, SessionDescription};
use super::turn::IceServer;
use crate::error::VoipTestError;

type GatherEvent = Result<Option<IceCandidate>, VoipTestError>;

pub struct WebRtcEngine {
    api: API,
}

impl WebRtcEngine {
    pub fn new() -> Result<Self, VoipTestError> {
        let mut media_engine = MediaEngine::default();
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(VoipTestError::engine)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        Ok(Self { api })
    }
}

/// Peer connection configuration with `server` as the only ICE server.
///
/// Relay-only: webrtc-rs cannot re-apply a doctored offer, so the agent
/// must never hold a host or srflx candidate to begin with.
fn rtc_configuration(server: &IceServer) -> RTCConfiguration {
    RTCConfiguration {
        ice_servers: vec![RTCIceServer {
            urls: vec![server.uri.clone()],
            username: server.username.clone(),
            credential: server.credential.clone(),
            credential_type: RTCIceCredentialType::Password,
        }],
        ice_transport_policy: RTCIceTransportPolicy::Relay,
        ..Default::default()
    }
}

/// Goes through the SDP line so the candidate matches the offer verbatim.
fn convert_candidate(c: &RTCIceCandidate) -> Result<IceCandidate, VoipTestError> {
    let init = c.to_json().map_err(VoipTestError::engine)?;
    IceCandidate::from_sdp_line(&init.candidate)
}

fn candidate_type(typ: IceCandidateType) -> Option<CandidateType> {
    match typ {
        IceCandidateType::Host => Some(CandidateType::Host),
        IceCandidateType::ServerReflexive => Some(CandidateType::ServerReflexive),
        IceCandidateType::PeerReflexive => Some(CandidateType::PeerReflexive),
        IceCandidateType::Relay => Some(CandidateType::Relay),
        _ => None,
    }
}

/// Local candidate of the nominated, succeeded pair in `stats`.
fn selected_local(stats: &StatsReport) -> Option<SelectedPath> {
    let local_id = stats.reports.values().find_map(|report| match report {
        StatsReportType::CandidatePair(pair)
            if pair.nominated && pair.state == CandidatePairState::Succeeded =>
        {
            Some(pair.local_candidate_id.as_str())
        }
        _ => None,
    })?;
    stats.reports.values().find_map(|report| match report {
        StatsReportType::LocalCandidate(c) if c.id == local_id => Some(SelectedPath {
            candidate_type: candidate_type(c.candidate_type)?,
            ip: c.ip.clone(),
            port: c.port,
        }),
        _ => None,
    })
}

fn to_rtc(desc: SessionDescription) -> Result<RTCSessionDescription, VoipTestError> {
    match desc.sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(desc.sdp),
        SdpType::Answer => RTCSessionDescription::answer(desc.sdp),
        SdpType::Pranswer => RTCSessionDescription::pranswer(desc.sdp),
        SdpType::Rollback => {
            let mut rollback = RTCSessionDescription::default();
            rollback.sdp_type = RTCSdpType::Rollback;
            Ok(rollback)
        }
    }
    .map_err(VoipTestError::engine)
}

fn from_rtc(desc: RTCSessionDescription) -> Option<SessionDescription> {
    let sdp_type = match desc.sdp_type {
        RTCSdpType::Offer => SdpType::Offer,
        RTCSdpType::Answer => SdpType::Answer,
        RTCSdpType::Pranswer => SdpType::Pranswer,
        RTCSdpType::Rollback => SdpType::Rollback,
        _ => return None,
    };
    Some(SessionDescription {
        sdp_type,
        sdp: desc.sdp,
    })
}

/// Create and apply the local offer. Runs once per session.
async fn negotiate(pc: &RTCPeerConnection) -> Result<(), VoipTestError> {
    let offer = pc.create_offer(None).await.map_err(VoipTestError::engine)?;
    pc.set_local_description(offer)
        .await
        .map_err(VoipTestError::engine)?;
    tracing::debug!("Local offer applied, gathering started");
    Ok(())
}

#[async_trait]
impl IceEngine for WebRtcEngine {
    type Session = WebRtcSession;

    async fn open_session(&self, server: &IceServer) -> Result<WebRtcSession, VoipTestError> {
        let pc = Arc::new(
            self.api
                .new_peer_connection(rtc_configuration(server))
                .await
                .map_err(VoipTestError::engine)?,
        );

        let (gather_tx, gather_rx) = mpsc::unbounded_channel::<GatherEvent>();

        let tx = gather_tx.clone();
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let event = match candidate {
                Some(c) => convert_candidate(&c).map(Some),
                None => Ok(None),
            };
            let _ = tx.send(event);
            Box::pin(async {})
        }));

        // Registered before the data channel exists: creating it is what
        // fires negotiation-needed.
        let offered = Arc::new(AtomicBool::new(false));
        let weak: Weak<RTCPeerConnection> = Arc::downgrade(&pc);
        let tx = gather_tx;
        pc.on_negotiation_needed(Box::new(move || {
            let pc = weak.clone();
            let offered = Arc::clone(&offered);
            let tx = tx.clone();
            Box::pin(async move {
                if offered.swap(true, Ordering::SeqCst) {
                    return;
                }
                let Some(pc) = pc.upgrade() else { return };
                if let Err(e) = negotiate(&pc).await {
                    let _ = tx.send(Err(e));
                }
            })
        }));

        let channel = match pc.create_data_channel(DATA_CHANNEL_LABEL, None).await {
            Ok(channel) => channel,
            Err(e) => {
                let _ = pc.close().await;
                return Err(VoipTestError::engine(e));
            }
        };

        let (echo_tx, echo_rx) = mpsc::unbounded_channel::<String>();
        let dc = Arc::downgrade(&channel);
        channel.on_open(Box::new(move || {
            Box::pin(async move {
                let Some(dc) = dc.upgrade() else { return };
                tracing::debug!("Data channel open, sending probe");
                if let Err(e) = dc.send_text(MAGIC_QUESTION.to_string()).await {
                    tracing::warn!("Failed to send relay probe: {}", e);
                }
            })
        }));
        channel.on_message(Box::new(move |msg: DataChannelMessage| {
            if msg.is_string {
                let _ = echo_tx.send(String::from_utf8_lossy(&msg.data).into_owned());
            }
            Box::pin(async {})
        }));

        Ok(WebRtcSession {
            pc,
            _channel: channel,
            candidates: gather_rx,
            echoes: echo_rx,
            advertised: None,
            closed: false,
        })
    }
}

pub struct WebRtcSession {
    pc: Arc<RTCPeerConnection>,
    _channel: Arc<RTCDataChannel>,
    candidates: mpsc::UnboundedReceiver<GatherEvent>,
    echoes: mpsc::UnboundedReceiver<String>,
    /// Doctored offer the engine refused to re-apply. The relay-only policy
    /// still keeps the agent off non-relayed paths.
    advertised: Option<SessionDescription>,
    closed: bool,
}

#[async_trait]
impl PeerSession for WebRtcSession {
    async fn next_candidate(&mut self) -> Result<Option<IceCandidate>, VoipTestError> {
        match self.candidates.recv().await {
            Some(event) => event,
            None => Err(VoipTestError::Engine("candidate stream closed".into())),
        }
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        if let Some(desc) = &self.advertised {
            return Some(desc.clone());
        }
        self.pc.local_description().await.and_then(from_rtc)
    }

    async fn set_local_description(&mut self, desc: SessionDescription) -> Result<(), VoipTestError> {
        let had_offer = self.pc.pending_local_description().await.is_some();
        match self.pc.set_local_description(to_rtc(desc.clone())?).await {
            Ok(()) => {
                self.advertised = None;
                Ok(())
            }
            // webrtc-rs only accepts the offer it generated itself. The remote
            // side still learns nothing but the candidates in `desc`.
            Err(e) if had_offer && desc.sdp_type == SdpType::Offer => {
                tracing::debug!("Keeping engine offer, advertising doctored one: {}", e);
                self.advertised = Some(desc);
                Ok(())
            }
            Err(e) => Err(VoipTestError::engine(e)),
        }
    }

    async fn set_remote_description(
        &mut self,
        desc: SessionDescription,
    ) -> Result<(), VoipTestError> {
        self.pc
            .set_remote_description(to_rtc(desc)?)
            .await
            .map_err(VoipTestError::engine)
    }

    async fn probe_relay(&mut self) -> Result<(), VoipTestError> {
        while let Some(text) = self.echoes.recv().await {
            if text == MAGIC_ANSWER {
                tracing::debug!("Relay probe answered");
                return Ok(());
            }
            tracing::warn!("Unexpected data channel message: {:?}", text);
        }
        Err(VoipTestError::Engine("data channel closed before answer".into()))
    }

    async fn selected_path(&self) -> Option<SelectedPath> {
        let path = selected_local(&self.pc.get_stats().await);
        tracing::debug!("Selected local path: {:?}", path);
        path
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.pc.close().await {
            tracing::debug!("Error closing peer connection: {}", e);
        }
    }
}
