//! Runs the relay test for every TURN URI, IPv4 pass first, then IPv6.
//!
//! Tests never overlap: each URI's session is closed before the next one is
//! opened.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use super::cancel::{cancellation, AbortHandle, Cancellation};
use super::candidate::IpVersion;
use super::engine::{IceEngine, PeerSession};
use super::gatherer::gather_candidates;
use super::progress::ProgressSink;
use super::relay::test_turn_relaying;
use super::remote::RemoteTestService;
use super::report::{
    CandidateSummary, RelayOutcome, TestPassReport, TestReport, TurnUriReport, UriDebug,
};
use super::turn::{IceServer, TurnConfig};
use crate::error::VoipTestError;
use crate::homeserver::HomeserverClient;

/// IP versions in the order they are tested.
pub const PASSES: [IpVersion; 2] = [IpVersion::IPv4, IpVersion::IPv6];

#[derive(Debug, Clone)]
pub struct TesterSettings {
    pub gathering_timeout: Duration,
    pub relay_timeout: Duration,
    /// Capture candidates, doctored offer and answer in the report.
    pub debug: bool,
}

impl Default for TesterSettings {
    fn default() -> Self {
        Self {
            gathering_timeout: Duration::from_secs(10),
            relay_timeout: Duration::from_secs(15),
            debug: false,
        }
    }
}

/// Source of TURN credentials for a run.
#[async_trait]
pub trait TurnSource: Send + Sync {
    async fn turn_config(&self) -> Result<TurnConfig, VoipTestError>;
}

#[async_trait]
impl TurnSource for HomeserverClient {
    async fn turn_config(&self) -> Result<TurnConfig, VoipTestError> {
        self.get_turn_config().await
    }
}

pub struct VoipTester<T, E> {
    turn: T,
    remote: RemoteTestService,
    engine: E,
    settings: TesterSettings,
    abort: AbortHandle,
    cancel: Cancellation,
}

impl<T: TurnSource, E: IceEngine> VoipTester<T, E> {
    pub fn new(turn: T, remote: RemoteTestService, engine: E, settings: TesterSettings) -> Self {
        let (abort, cancel) = cancellation();
        Self {
            turn,
            remote,
            engine,
            settings,
            abort,
            cancel,
        }
    }

    /// Handle that aborts the run from another task.
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    /// Fetch TURN credentials and test every URI for both IP versions.
    ///
    /// Failures of a single URI are recorded in its report entry. Credential
    /// errors and cancellation end the run without a report.
    pub async fn run(&self, progress: &mut dyn ProgressSink) -> Result<TestReport, VoipTestError> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        tracing::info!("Starting VoIP relay test run {}", run_id);

        progress.on_progress(1, 0, 3, "Requesting TURN details from homeserver");
        let turn_config = self.cancel.guard(self.turn.turn_config()).await?;
        if turn_config.uris.is_empty() {
            return Err(VoipTestError::NoTurnServers(
                "homeserver returned an empty URI list".into(),
            ));
        }
        tracing::info!("Testing {} TURN URIs", turn_config.uris.len());

        let mut passes = BTreeMap::new();
        for (i, ip_version) in PASSES.into_iter().enumerate() {
            progress.on_progress(
                1,
                i as u32 + 1,
                3,
                &format!("Testing ({} candidates)", ip_version),
            );
            let pass = self.run_pass(ip_version, &turn_config, progress).await?;
            passes.insert(ip_version, pass);
        }
        progress.on_progress(1, 3, 3, "Finished");

        Ok(TestReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            turn_config,
            passes,
        })
    }

    async fn run_pass(
        &self,
        ip_version: IpVersion,
        turn_config: &TurnConfig,
        progress: &mut dyn ProgressSink,
    ) -> Result<TestPassReport, VoipTestError> {
        let total = turn_config.uris.len() as u32;
        let mut pass = TestPassReport::default();

        for (i, uri) in turn_config.uris.iter().enumerate() {
            if self.cancel.is_cancelled() {
                return Err(VoipTestError::Cancelled);
            }
            progress.on_progress(2, i as u32, total, &format!("TURN URI: {}", uri));
            let server = IceServer::from_config(turn_config, uri);
            let entry = self.test_uri(ip_version, &server, progress).await?;
            pass.push(entry);
        }
        progress.on_progress(2, total, total, &format!("{} pass done", ip_version));

        Ok(pass)
    }

    async fn test_uri(
        &self,
        ip_version: IpVersion,
        server: &IceServer,
        progress: &mut dyn ProgressSink,
    ) -> Result<TurnUriReport, VoipTestError> {
        let started = Instant::now();
        let mut entry = TurnUriReport::new(&server.uri);
        let mut debug = self.settings.debug.then(UriDebug::default);

        progress.on_progress(3, 0, 2, "Gathering candidates");
        let gathered = gather_candidates(
            &self.engine,
            server,
            self.settings.gathering_timeout,
            &self.cancel,
        )
        .await;

        let mut gathering = match gathered {
            Ok(g) => g,
            Err(failure) if failure.error.is_fatal() => return Err(failure.error),
            Err(failure) => {
                tracing::warn!("{}: gathering failed: {}", server.uri, failure.error);
                progress.on_progress(3, 1, 2, "Gathering failed");
                entry.candidates = Some(CandidateSummary::incomplete(&failure.candidates));
                entry.relay = Some(RelayOutcome::failed(&failure.error));
                if let Some(d) = debug.as_mut() {
                    d.candidates = failure.candidates;
                }
                entry.debug = debug;
                entry.finish(elapsed_ms(started));
                progress.on_progress(3, 2, 2, "Skipped relay test");
                return Ok(entry);
            }
        };
        entry.candidates = Some(CandidateSummary::from_candidates(&gathering.candidates));
        if let Some(d) = debug.as_mut() {
            d.candidates = gathering.candidates.clone();
        }

        progress.on_progress(3, 1, 2, "Testing TURN relaying");
        let res = test_turn_relaying(
            ip_version,
            &mut gathering,
            &self.remote,
            self.settings.relay_timeout,
            &self.cancel,
        )
        .await;
        gathering.session.close().await;

        let outcome = match res {
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                tracing::warn!("{}: {} relay test failed: {}", server.uri, ip_version, e);
                RelayOutcome::failed(&e)
            }
            Ok(result) => {
                if let (Some(d), Some(r)) = (debug.as_mut(), result.as_ref()) {
                    d.offer = Some(r.transcript.offer.sdp.clone());
                    d.answer = Some(r.transcript.answer.sdp.clone());
                }
                RelayOutcome::from_result(Ok(result))
            }
        };
        entry.relay = Some(outcome);
        entry.debug = debug;
        entry.finish(elapsed_ms(started));
        progress.on_progress(3, 2, 2, "Done");

        Ok(entry)
    }
}

fn elapsed_ms(since: Instant) -> u64 {
    since.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tester::fake::{FakeEngine, FakeScript};
    use crate::tester::progress::ProgressEvent;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const HOST: &str = "candidate:1 1 udp 2130706431 10.0.0.5 50000 typ host";
    const RELAY4: &str =
        "candidate:3 1 udp 16777215 198.51.100.7 61000 typ relay raddr 10.0.0.5 rport 50000";
    const RELAY6: &str = "candidate:4 1 udp 16777215 2001:db8::1 61002 typ relay raddr :: rport 0";

    struct StaticTurn(Result<TurnConfig, VoipTestError>);

    #[async_trait]
    impl TurnSource for StaticTurn {
        async fn turn_config(&self) -> Result<TurnConfig, VoipTestError> {
            self.0.clone()
        }
    }

    fn turn(uris: &[&str]) -> StaticTurn {
        StaticTurn(Ok(TurnConfig {
            uris: uris.iter().map(|u| u.to_string()).collect(),
            username: "u".into(),
            password: "p".into(),
            ttl: Some(86400),
        }))
    }

    async fn answering_service() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "answer": {"type": "answer", "sdp": "v=0\r\n"}
            })))
            .mount(&server)
            .await;
        server
    }

    fn build_tester(
        turn: StaticTurn,
        service: &MockServer,
        engine: &FakeEngine,
        settings: TesterSettings,
    ) -> VoipTester<StaticTurn, FakeEngine> {
        let remote =
            RemoteTestService::new(reqwest::Client::new(), &service.uri(), Duration::from_secs(5));
        VoipTester::new(turn, remote, engine.clone(), settings)
    }

    fn quick() -> TesterSettings {
        TesterSettings {
            gathering_timeout: Duration::from_millis(200),
            relay_timeout: Duration::from_millis(200),
            debug: false,
        }
    }

    fn progress_of(events: &[ProgressEvent]) -> Vec<(u32, u32, u32)> {
        events.iter().map(|e| (e.level, e.current, e.max)).collect()
    }

    #[tokio::test]
    async fn test_end_to_end_single_uri() {
        let service = answering_service().await;
        let engine = FakeEngine::new();
        engine.script("turn:a", FakeScript::relaying(&[HOST, RELAY4]));
        let tester = build_tester(turn(&["turn:a"]), &service, &engine, quick());

        let mut events: Vec<ProgressEvent> = Vec::new();
        let report = tester.run(&mut events).await.unwrap();

        assert_eq!(report.passes.len(), 2);
        assert_eq!(report.turn_config.username, "u");

        let v4 = report.pass(IpVersion::IPv4).unwrap().get("turn:a").unwrap();
        match v4.relay.as_ref().unwrap() {
            RelayOutcome::Relayed(r) => assert_eq!(r.relay_ip, "198.51.100.7"),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!(v4.is_success());

        let v6 = report.pass(IpVersion::IPv6).unwrap().get("turn:a").unwrap();
        assert_eq!(v6.relay, Some(RelayOutcome::NoCandidate));
        assert!(!v6.is_success());
        assert!(v6.summary.is_some());

        // One POST, from the IPv4 pass only.
        assert_eq!(service.received_requests().await.unwrap().len(), 1);
        assert_eq!(engine.open_sessions(), 0);
    }

    #[tokio::test]
    async fn test_progress_sequence() {
        let service = answering_service().await;
        let engine = FakeEngine::new();
        for uri in ["turn:a", "turn:b", "turn:c"] {
            engine.script(uri, FakeScript::relaying(&[RELAY4, RELAY6]));
        }
        let tester = build_tester(turn(&["turn:a", "turn:b", "turn:c"]), &service, &engine, quick());

        let mut events: Vec<ProgressEvent> = Vec::new();
        tester.run(&mut events).await.unwrap();

        let mut expected = vec![(1, 0, 3)];
        for pass in 1..=2 {
            expected.push((1, pass, 3));
            for i in 0..3 {
                expected.extend([(2, i, 3), (3, 0, 2), (3, 1, 2), (3, 2, 2)]);
            }
            expected.push((2, 3, 3));
        }
        expected.push((1, 3, 3));
        assert_eq!(progress_of(&events), expected);
    }

    #[tokio::test]
    async fn test_sessions_never_overlap() {
        let service = answering_service().await;
        let engine = FakeEngine::new();
        for uri in ["turn:a", "turn:b", "turn:c"] {
            engine.script(uri, FakeScript::relaying(&[HOST, RELAY4, RELAY6]));
        }
        let tester = build_tester(turn(&["turn:a", "turn:b", "turn:c"]), &service, &engine, quick());

        let report = tester.run(&mut Vec::new()).await.unwrap();

        assert_eq!(engine.max_open_sessions(), 1);
        assert_eq!(engine.open_sessions(), 0);

        // open/close strictly alternate, URIs in order, IPv4 pass first.
        let lifecycle: Vec<String> = engine
            .events()
            .into_iter()
            .filter(|e| e.starts_with("open") || e.starts_with("close"))
            .collect();
        let mut expected = Vec::new();
        for _ in 0..2 {
            for uri in ["turn:a", "turn:b", "turn:c"] {
                expected.push(format!("open {}", uri));
                expected.push(format!("close {}", uri));
            }
        }
        assert_eq!(lifecycle, expected);

        for ip in PASSES {
            assert_eq!(report.pass(ip).unwrap().successes(), 3);
        }
    }

    #[tokio::test]
    async fn test_failing_uri_does_not_stop_the_run() {
        let service = answering_service().await;
        let engine = FakeEngine::new();
        engine.script("turn:stuck", FakeScript::relaying(&[HOST]).never_finishes());
        engine.script("turn:silent", FakeScript::relaying(&[RELAY4]).silent());
        engine.script("turn:good", FakeScript::relaying(&[RELAY4]));
        let tester = build_tester(
            turn(&["turn:stuck", "turn:silent", "turn:good"]),
            &service,
            &engine,
            quick(),
        );

        let report = tester.run(&mut Vec::new()).await.unwrap();
        let v4 = report.pass(IpVersion::IPv4).unwrap();
        assert_eq!(v4.len(), 3);

        let stuck = v4.get("turn:stuck").unwrap();
        assert!(matches!(
            stuck.relay,
            Some(RelayOutcome::Failed {
                kind: crate::error::ErrorKind::GatheringTimeout,
                ..
            })
        ));
        let gathered = stuck.candidates.as_ref().unwrap();
        assert!(!gathered.complete);
        assert_eq!((gathered.total, gathered.host), (1, 1));
        assert!(stuck.summary.is_some());

        let silent = v4.get("turn:silent").unwrap();
        assert!(matches!(
            silent.relay,
            Some(RelayOutcome::Failed {
                kind: crate::error::ErrorKind::RelayTestTimeout,
                ..
            })
        ));

        assert!(v4.get("turn:good").unwrap().is_success());
        assert_eq!(engine.open_sessions(), 0);
    }

    #[tokio::test]
    async fn test_gathering_failure_progress_and_debug() {
        let service = answering_service().await;
        let engine = FakeEngine::new();
        engine.script("turn:stuck", FakeScript::relaying(&[HOST]).never_finishes());
        let settings = TesterSettings {
            debug: true,
            ..quick()
        };
        let tester = build_tester(turn(&["turn:stuck"]), &service, &engine, settings);

        let mut events: Vec<ProgressEvent> = Vec::new();
        let report = tester.run(&mut events).await.unwrap();

        let steps: Vec<(u32, u32, &str)> = events
            .iter()
            .filter(|e| e.level == 3)
            .take(3)
            .map(|e| (e.current, e.max, e.message.as_str()))
            .collect();
        assert_eq!(
            steps,
            vec![
                (0, 2, "Gathering candidates"),
                (1, 2, "Gathering failed"),
                (2, 2, "Skipped relay test"),
            ]
        );

        let stuck = report.pass(IpVersion::IPv4).unwrap().get("turn:stuck").unwrap();
        assert_eq!(stuck.debug.as_ref().unwrap().candidates.len(), 1);
        assert!(service.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_echo_over_direct_path_is_recorded_as_failure() {
        let service = answering_service().await;
        let engine = FakeEngine::new();
        engine.script("turn:a", FakeScript::relaying(&[HOST, RELAY4]).direct());
        let tester = build_tester(turn(&["turn:a"]), &service, &engine, quick());

        let report = tester.run(&mut Vec::new()).await.unwrap();
        let v4 = report.pass(IpVersion::IPv4).unwrap().get("turn:a").unwrap();
        assert!(matches!(
            v4.relay,
            Some(RelayOutcome::Failed {
                kind: crate::error::ErrorKind::RelayNotUsed,
                ..
            })
        ));
        assert!(!v4.is_success());
        assert!(!report.any_success());
        assert_eq!(engine.open_sessions(), 0);
    }

    #[tokio::test]
    async fn test_turn_errors_are_fatal() {
        let service = MockServer::start().await;
        let engine = FakeEngine::new();

        let tester = build_tester(turn(&[]), &service, &engine, quick());
        let err = tester.run(&mut Vec::new()).await.unwrap_err();
        assert!(matches!(err, VoipTestError::NoTurnServers(_)));

        let failing = StaticTurn(Err(VoipTestError::CannotGetTurnCredentials(
            "M_UNKNOWN boom 500".into(),
        )));
        let tester = build_tester(failing, &service, &engine, quick());
        let mut events: Vec<ProgressEvent> = Vec::new();
        let err = tester.run(&mut events).await.unwrap_err();
        assert!(matches!(err, VoipTestError::CannotGetTurnCredentials(_)));
        assert_eq!(progress_of(&events), vec![(1, 0, 3)]);
        assert!(engine.events().is_empty());
    }

    #[tokio::test]
    async fn test_abort_cancels_run_and_closes_session() {
        let service = answering_service().await;
        let engine = FakeEngine::new();
        engine.script("turn:slow", FakeScript::relaying(&[HOST]).never_finishes());
        let settings = TesterSettings {
            gathering_timeout: Duration::from_secs(30),
            ..quick()
        };
        let tester = build_tester(turn(&["turn:slow"]), &service, &engine, settings);

        let abort = tester.abort_handle();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            abort.abort();
        });

        let err = tester.run(&mut Vec::new()).await.unwrap_err();
        assert_eq!(err, VoipTestError::Cancelled);
        assert_eq!(engine.open_sessions(), 0);
    }

    #[tokio::test]
    async fn test_debug_capture() {
        let service = answering_service().await;
        let engine = FakeEngine::new();
        engine.script("turn:a", FakeScript::relaying(&[HOST, RELAY4]));
        let settings = TesterSettings {
            debug: true,
            ..quick()
        };
        let tester = build_tester(turn(&["turn:a"]), &service, &engine, settings);

        let report = tester.run(&mut Vec::new()).await.unwrap();
        let v4 = report.pass(IpVersion::IPv4).unwrap().get("turn:a").unwrap();
        let debug = v4.debug.as_ref().unwrap();
        assert_eq!(debug.candidates.len(), 2);
        assert!(debug.offer.as_deref().unwrap().contains(RELAY4));
        assert!(!debug.offer.as_deref().unwrap().contains(HOST));
        assert_eq!(debug.answer.as_deref(), Some("v=0\r\n"));

        let v6 = report.pass(IpVersion::IPv6).unwrap().get("turn:a").unwrap();
        assert!(v6.debug.as_ref().unwrap().offer.is_none());
    }
}
