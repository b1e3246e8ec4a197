//! Session state machine tests against a simulated ECU transport

use std::{
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use odx_diag::{
    DiagError,
    client::{SessionEvent, SessionEventHandler, UdsClientConfig, UdsSession},
    transport::SimulationTransport,
};

fn fast_config() -> UdsClientConfig {
    let _ = env_logger::builder().is_test(true).try_init();
    UdsClientConfig {
        request_timeout: Duration::from_millis(300),
        p2: Duration::from_millis(100),
        p2_star: Duration::from_millis(500),
        ..Default::default()
    }
}

#[test]
fn pending_loop_ends_in_positive_response() {
    let sim = SimulationTransport::new();
    sim.add_response_sequence(
        &[0x31, 0x01, 0x40, 0x00],
        &[
            (Duration::from_millis(20), vec![0x7F, 0x31, 0x78]),
            (Duration::from_millis(20), vec![0x7F, 0x31, 0x78]),
            (Duration::from_millis(20), vec![0x71, 0x01, 0x40, 0x00, 0x01]),
        ],
    );
    let session = UdsSession::new(sim, fast_config()).unwrap();
    let result = session.start_routine(0x4000, &[]).unwrap();
    assert_eq!(result, vec![0x01]);
}

#[test]
fn request_timeout_caps_pending_extensions() {
    // The server pends every 200ms forever; P2* alone would allow 500ms
    // waits, but the 300ms request timeout must cut everything off.
    let sim = SimulationTransport::new();
    let pending = vec![0x7F, 0x22, 0x78];
    sim.add_response_sequence(
        &[0x22, 0xF1, 0x90],
        &[
            (Duration::from_millis(200), pending.clone()),
            (Duration::from_millis(200), pending.clone()),
            (Duration::from_millis(200), pending.clone()),
            (Duration::from_millis(200), pending),
        ],
    );
    let session = UdsSession::new(sim, fast_config()).unwrap();

    let started = Instant::now();
    let err = session.send_request(&[0x22, 0xF1, 0x90]).unwrap_err();
    let elapsed = started.elapsed();

    assert!(matches!(err, DiagError::Timeout));
    assert!(
        elapsed >= Duration::from_millis(300),
        "failed too early: {elapsed:?}"
    );
    assert!(
        elapsed < Duration::from_millis(450),
        "waited past the request timeout: {elapsed:?}"
    );
}

#[test]
fn second_request_on_busy_session_fails_fast() {
    let sim = SimulationTransport::new();
    sim.add_delayed_response(&[0x10, 0x03], Duration::from_millis(150), &[0x50, 0x03]);
    let session = Arc::new(UdsSession::new(sim, fast_config()).unwrap());

    let busy = Arc::clone(&session);
    let prober = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(40));
        busy.send_request(&[0x3E, 0x00])
    });

    let first = session.send_request(&[0x10, 0x03]).unwrap();
    assert!(first.positive);
    assert!(matches!(
        prober.join().unwrap().unwrap_err(),
        DiagError::SessionBusy
    ));
}

#[derive(Default)]
struct RecordingHandler {
    log: Arc<Mutex<Vec<String>>>,
}

impl SessionEventHandler for RecordingHandler {
    fn on_event(&mut self, event: SessionEvent<'_>) {
        let entry = match event {
            SessionEvent::Request(_) => "request".to_string(),
            SessionEvent::StateTransition { from, to } => format!("{from:?}->{to:?}"),
            SessionEvent::Response(_) => "response".to_string(),
            SessionEvent::EcuBusy => "busy".to_string(),
            SessionEvent::NegativeResponse { code } => format!("nrc:{code:02X}"),
            SessionEvent::UnexpectedResponse { .. } => "unexpected".to_string(),
            SessionEvent::InvalidResponse => "invalid".to_string(),
            SessionEvent::Timeout { .. } => "timeout".to_string(),
        };
        self.log.lock().unwrap().push(entry);
    }
}

#[test]
fn every_transition_is_observable() {
    let sim = SimulationTransport::new();
    sim.add_response_sequence(
        &[0x11, 0x01],
        &[
            (Duration::ZERO, vec![0x7F, 0x11, 0x78]),
            (Duration::from_millis(20), vec![0x51, 0x01]),
        ],
    );
    let log = Arc::new(Mutex::new(Vec::new()));
    let handler = RecordingHandler { log: log.clone() };
    let session = UdsSession::with_handler(sim, fast_config(), Box::new(handler)).unwrap();
    session.ecu_hard_reset().unwrap();

    let events = log.lock().unwrap().clone();
    assert_eq!(
        events,
        vec![
            "request",
            "Idle->AwaitingFirstResponse",
            "response",
            "busy",
            "AwaitingFirstResponse->PendingWait",
            "response",
            "PendingWait->Completed",
        ]
    );
}

#[test]
fn negative_response_carries_the_code() {
    let sim = SimulationTransport::new();
    // SecurityAccessDenied on seed request
    sim.add_response(&[0x27, 0x01], &[0x7F, 0x27, 0x33]);
    let session = UdsSession::new(sim, fast_config()).unwrap();
    let err = session.request_seed(0x01, &[]).unwrap_err();
    match err {
        DiagError::EcuNegativeResponse { code, def } => {
            assert_eq!(code, 0x33);
            assert!(def.unwrap().contains("SecurityAccessDenied"));
        }
        other => panic!("expected negative response, got {other:?}"),
    }
}

#[test]
fn security_unlock_uses_configured_algorithm() {
    struct XorAlgorithm;
    impl odx_diag::client::SecurityAlgorithm for XorAlgorithm {
        fn compute_key(&self, _level: u8, seed: &[u8]) -> Result<Vec<u8>, DiagError> {
            Ok(seed.iter().map(|b| b ^ 0xFF).collect())
        }
    }

    let sim = SimulationTransport::new();
    sim.add_response(&[0x27, 0x01], &[0x67, 0x01, 0x12, 0x34]);
    sim.add_response(&[0x27, 0x02, 0xED, 0xCB], &[0x67, 0x02]);

    let config = UdsClientConfig {
        security_algorithm: Some(Arc::new(XorAlgorithm)),
        ..fast_config()
    };
    let session = UdsSession::new(sim, config).unwrap();
    session.unlock_security_access(0x01, &[]).unwrap();
}

#[test]
fn unlock_without_algorithm_is_a_configuration_error() {
    let sim = SimulationTransport::new();
    let session = UdsSession::new(sim, fast_config()).unwrap();
    assert!(matches!(
        session.unlock_security_access(0x01, &[]).unwrap_err(),
        DiagError::NoSecurityAlgorithm
    ));
}

#[test]
fn all_zero_seed_skips_key_exchange() {
    let sim = SimulationTransport::new();
    sim.add_response(&[0x27, 0x03], &[0x67, 0x03, 0x00, 0x00]);
    // No sendKey response scripted: the exchange must stop after the seed

    struct NeverCalled;
    impl odx_diag::client::SecurityAlgorithm for NeverCalled {
        fn compute_key(&self, _level: u8, _seed: &[u8]) -> Result<Vec<u8>, DiagError> {
            panic!("key derivation must not run for an all-zero seed");
        }
    }
    let config = UdsClientConfig {
        security_algorithm: Some(Arc::new(NeverCalled)),
        ..fast_config()
    };
    let session = UdsSession::new(sim, config).unwrap();
    session.unlock_security_access(0x03, &[]).unwrap();
}

#[test]
fn server_timing_is_adopted_and_capped() {
    let sim = SimulationTransport::new();
    // P2 = 0x0050ms = 80ms, P2* = 0x0008 * 10ms = 80ms
    sim.add_response(&[0x10, 0x03], &[0x50, 0x03, 0x00, 0x50, 0x00, 0x08]);
    let session = UdsSession::new(sim, fast_config()).unwrap();
    session.set_session_mode(0x03u8.into()).unwrap();
    let timers = session.current_timers();
    assert_eq!(timers.p2, Duration::from_millis(80));
    assert_eq!(timers.p2_star, Duration::from_millis(80));

    // A second ECU reporting huge windows is capped by the request timeout
    let sim2 = SimulationTransport::new();
    sim2.add_response(&[0x10, 0x03], &[0x50, 0x03, 0xFF, 0xFF, 0xFF, 0xFF]);
    let session2 = UdsSession::new(sim2, fast_config()).unwrap();
    session2.set_session_mode(0x03.into()).unwrap();
    let timers2 = session2.current_timers();
    assert_eq!(timers2.p2, Duration::from_millis(300));
    assert_eq!(timers2.p2_star, Duration::from_millis(300));
}

#[test]
fn dtc_report_parses_records_and_padding() {
    let sim = SimulationTransport::new();
    sim.add_response(
        &[0x19, 0x02, 0x08],
        &[
            0x59, 0x02, 0xFF, // availability
            0x01, 0x23, 0x45, 0x09, // DTC 0x012345, testFailed|confirmed
            0x0A, 0xBB, 0xCC, 0x08, // DTC 0x0ABBCC, confirmed
            0x00, 0x00, // zero padding
        ],
    );
    let session = UdsSession::new(sim, fast_config()).unwrap();
    let report = session
        .read_dtc_by_status_mask(odx_diag::dtc::DtcStatusMask::CONFIRMED_DTC)
        .unwrap();
    assert_eq!(report.dtcs.len(), 2);
    assert_eq!(report.dtcs[0].raw, 0x012345);
    assert!(!report.dtcs[0].mil_on());
    assert!(report.dtcs[0].confirmed());
    assert_eq!(report.dtcs[1].raw, 0x0ABBCC);
}
