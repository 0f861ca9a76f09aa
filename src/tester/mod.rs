//! TURN relay test pipeline: gathering, SDP doctoring, offer/answer exchange
//! with the testing service, and the orchestrated run over all URIs.

pub mod cancel;
pub mod candidate;
pub mod engine;
pub mod gatherer;
pub mod orchestrator;
pub mod progress;
pub mod relay;
pub mod remote;
pub mod report;
pub mod sdp;
pub mod turn;
pub mod webrtc_engine;

#[cfg(test)]
mod fake;

pub use orchestrator::{TesterSettings, VoipTester};
pub use progress::{ConsoleProgress, ProgressSink};
pub use remote::RemoteTestService;
pub use webrtc_engine::WebRtcEngine;
